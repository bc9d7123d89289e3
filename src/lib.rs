pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use crate::config::Config;
use crate::database::kv_store::{KeyValueStore, MemoryKeyValueStore, PgKeyValueStore};
use crate::middleware::auth::ApiKey;
use crate::services::{
    ai_service::GenerationBackend,
    corpus_service::{CorpusIndex, MemoryCorpusIndex, PgCorpusIndex},
    dedup_service::{DedupService, DedupSettings},
    generation_service::{GenerationService, GenerationSettings},
    job_service::JobService,
    queue_service::JobQueue,
    signature_cache::SignatureCache,
    usage_service::{MemoryUsageStore, PgUsageStore, UsageService, UsageStore},
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

pub use routes::router;

/// Storage handles shared by the services.
#[derive(Clone)]
pub struct Stores {
    pub kv: Arc<dyn KeyValueStore>,
    pub corpus: Arc<dyn CorpusIndex>,
    pub usage: Arc<dyn UsageStore>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            kv: Arc::new(PgKeyValueStore::new(pool.clone())),
            corpus: Arc::new(PgCorpusIndex::new(pool.clone())),
            usage: Arc::new(PgUsageStore::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            kv: Arc::new(MemoryKeyValueStore::new()),
            corpus: Arc::new(MemoryCorpusIndex::new()),
            usage: Arc::new(MemoryUsageStore::new()),
        }
    }
}

/// Knobs derived from `Config` and injected into the services.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceSettings {
    pub dedup: DedupSettings,
    pub generation: GenerationSettings,
    pub signature_cache_ttl: Option<Duration>,
}

impl From<&Config> for ServiceSettings {
    fn from(config: &Config) -> Self {
        Self {
            dedup: DedupSettings {
                threshold: config.duplicate_threshold,
                num_permutations: config.minhash_permutations,
            },
            generation: GenerationSettings {
                max_attempts: config.max_generation_attempts,
                poll_max_iterations: config.poll_max_iterations,
                poll_interval: config.poll_interval,
            },
            signature_cache_ttl: config.signature_cache_ttl,
        }
    }
}

pub fn build_generation_service(
    stores: &Stores,
    backend: Arc<dyn GenerationBackend>,
    settings: ServiceSettings,
) -> GenerationService {
    let cache = SignatureCache::new(stores.kv.clone(), settings.signature_cache_ttl);
    let dedup = DedupService::new(stores.corpus.clone(), cache, settings.dedup);
    GenerationService::new(
        backend,
        dedup,
        JobService::new(stores.kv.clone()),
        UsageService::new(stores.usage.clone()),
        settings.generation,
    )
}

#[derive(Clone)]
pub struct AppState {
    pub generation: GenerationService,
    pub corpus: Arc<dyn CorpusIndex>,
    pub queue: Arc<dyn JobQueue>,
    pub api_key: ApiKey,
    pub max_questions_per_request: u32,
}

impl AppState {
    pub fn new(
        generation: GenerationService,
        corpus: Arc<dyn CorpusIndex>,
        queue: Arc<dyn JobQueue>,
        api_key: ApiKey,
        max_questions_per_request: u32,
    ) -> Self {
        Self {
            generation,
            corpus,
            queue,
            api_key,
            max_questions_per_request,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_service_defaults() {
        let settings = ServiceSettings::default();
        assert_eq!(settings.generation.max_attempts, 3);
        assert_eq!(settings.dedup.num_permutations, 100);
        assert!(settings.signature_cache_ttl.is_none());
    }
}
