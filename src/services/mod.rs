pub mod ai_service;
pub mod corpus_service;
pub mod dedup_service;
pub mod generation_service;
pub mod job_service;
pub mod lexical_service;
pub mod queue_service;
pub mod signature_cache;
pub mod signature_service;
pub mod usage_service;
