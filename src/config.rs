use crate::error::{Error, Result};
use crate::models::question::Technology;
use dotenvy::dotenv;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(Self::Postgres),
            "memory" | "mem" => Ok(Self::Memory),
            other => Err(format!("unknown storage backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    Postgres,
    Local,
}

impl FromStr for QueueBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(Self::Postgres),
            "local" => Ok(Self::Local),
            other => Err(format!("unknown queue backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: Option<String>,
    pub api_key: String,
    pub openai_api_key: String,
    pub openai_base_url: Option<String>,
    pub assistants: HashMap<Technology, String>,
    pub storage_backend: StorageBackend,
    pub queue_backend: QueueBackend,
    pub duplicate_threshold: f64,
    pub minhash_permutations: usize,
    pub max_generation_attempts: u32,
    pub poll_max_iterations: u32,
    pub poll_interval: Duration,
    pub signature_cache_ttl: Option<Duration>,
    pub max_questions_per_request: u32,
    pub json_logs: bool,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let storage_backend = get_env_or("STORAGE_BACKEND", StorageBackend::Postgres)?;
        let queue_backend = get_env_or("QUEUE_BACKEND", QueueBackend::Postgres)?;
        let database_url = env::var("DATABASE_URL").ok();
        let needs_database =
            storage_backend == StorageBackend::Postgres || queue_backend == QueueBackend::Postgres;
        if needs_database && database_url.is_none() {
            return Err(Error::Config(
                "Missing environment variable: DATABASE_URL".to_string(),
            ));
        }

        let duplicate_threshold: f64 = get_env_or("DUPLICATE_THRESHOLD", 0.85)?;
        if !(0.0..=1.0).contains(&duplicate_threshold) {
            return Err(Error::Config(format!(
                "DUPLICATE_THRESHOLD must be within [0, 1], got {}",
                duplicate_threshold
            )));
        }

        let minhash_permutations: usize =
            positive("MINHASH_PERMUTATIONS", get_env_or("MINHASH_PERMUTATIONS", 100)?)?;
        let max_generation_attempts: u32 =
            positive("MAX_GENERATION_ATTEMPTS", get_env_or("MAX_GENERATION_ATTEMPTS", 3)?)?;
        let poll_max_iterations: u32 =
            positive("POLL_MAX_ITERATIONS", get_env_or("POLL_MAX_ITERATIONS", 60)?)?;

        Ok(Self {
            server_address: get_env_or("SERVER_ADDRESS", "0.0.0.0:8000".to_string())?,
            database_url,
            api_key: get_env("API_KEY")?,
            openai_api_key: get_env("OPENAI_API_KEY")?,
            openai_base_url: env::var("OPENAI_BASE_URL").ok().filter(|v| !v.is_empty()),
            assistants: parse_assistants(&env::var("OPENAI_ASSISTANTS").unwrap_or_default())?,
            storage_backend,
            queue_backend,
            duplicate_threshold,
            minhash_permutations,
            max_generation_attempts,
            poll_max_iterations,
            poll_interval: Duration::from_millis(get_env_or("POLL_INTERVAL_MS", 1000)?),
            signature_cache_ttl: env::var("SIGNATURE_CACHE_TTL_SECS")
                .ok()
                .map(|raw| {
                    raw.parse::<u64>().map(Duration::from_secs).map_err(|e| {
                        Error::Config(format!("Invalid value for SIGNATURE_CACHE_TTL_SECS: {}", e))
                    })
                })
                .transpose()?,
            max_questions_per_request: get_env_or("MAX_QUESTIONS_PER_REQUEST", 10)?,
            json_logs: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }
}

/// Parses `React=asst_1,Golang=asst_2` into a technology lookup.
pub fn parse_assistants(raw: &str) -> Result<HashMap<Technology, String>> {
    let mut out = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (tech, assistant) = pair.split_once('=').ok_or_else(|| {
            Error::Config(format!("Invalid OPENAI_ASSISTANTS entry: {}", pair))
        })?;
        let tech: Technology = tech
            .parse()
            .map_err(|e: String| Error::Config(format!("Invalid OPENAI_ASSISTANTS entry: {}", e)))?;
        out.insert(tech, assistant.trim().to_string());
    }
    Ok(out)
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

fn positive<T>(name: &str, value: T) -> Result<T>
where
    T: Default + PartialEq,
{
    if value == T::default() {
        return Err(Error::Config(format!("{} must be positive", name)));
    }
    Ok(value)
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> Result<&'static Config> {
    CONFIG
        .get()
        .ok_or_else(|| Error::Config("Configuration has not been initialized".to_string()))
}
