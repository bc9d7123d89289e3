use crate::database::kv_store::KeyValueStore;
use crate::error::Result;
use crate::services::signature_service::{Signature, SignatureService};
use std::sync::Arc;
use std::time::Duration;

const KEY_PREFIX: &str = "question_signature:";

/// Memoizes signatures in the key-value store, keyed by content hash.
/// Writes are last-write-wins; concurrent computations of the same key
/// produce identical values.
#[derive(Clone)]
pub struct SignatureCache {
    store: Arc<dyn KeyValueStore>,
    ttl: Option<Duration>,
}

impl SignatureCache {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Option<Duration>) -> Self {
        Self { store, ttl }
    }

    pub fn key(hash: &str) -> String {
        format!("{}{}", KEY_PREFIX, hash)
    }

    /// Cached signature, or `None` when absent, unreadable, or built with a
    /// different permutation count.
    pub async fn get(&self, hash: &str, expected_len: usize) -> Result<Option<Signature>> {
        let Some(raw) = self.store.get(&Self::key(hash)).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<Signature>(&raw) {
            Ok(sig) if sig.len() == expected_len => Ok(Some(sig)),
            Ok(sig) => {
                tracing::debug!(hash, cached_len = sig.len(), expected_len, "stale signature length");
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(hash, error = %e, "discarding unreadable cached signature");
                Ok(None)
            }
        }
    }

    pub async fn put(&self, hash: &str, signature: &Signature) -> Result<()> {
        let raw = serde_json::to_string(signature)?;
        self.store.set(&Self::key(hash), &raw, self.ttl).await
    }

    /// Returns the cached signature for `hash`, computing and storing it from
    /// `normalized_text` on a miss.
    pub async fn get_or_compute(
        &self,
        engine: &SignatureService,
        hash: &str,
        normalized_text: &str,
    ) -> Result<Signature> {
        if let Some(sig) = self.get(hash, engine.num_permutations()).await? {
            return Ok(sig);
        }
        let sig = engine.signature_of_text(normalized_text);
        self.put(hash, &sig).await?;
        Ok(sig)
    }
}
