use crate::error::Result;
use crate::models::question::QuestionMetadata;
use sha2::{Digest, Sha256};

/// Exact-duplicate key of a question: SHA-256 over `"{text}:{metadata json}"`.
pub fn content_hash(text: &str, metadata: &QuestionMetadata) -> Result<String> {
    let input = format!("{}:{}", text, serde_json::to_string(metadata)?);
    Ok(hex::encode(Sha256::digest(input.as_bytes())))
}
