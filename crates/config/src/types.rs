use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub server: ServerConfig,
    pub mongo: MongoConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    pub providers: ProviderConfig,
    pub workers: WorkerConfig,
    /// TTL applied to realtime buffer chunks, in seconds.
    pub buffer_ttl_seconds: u64,
    /// Accepted for the wider deployment; the realtime core does not use it.
    pub postgres_uri: Option<String>,
    /// Accepted for the wider deployment; the realtime core does not use it.
    pub gcs_bucket: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub db: String,
    /// Development-only fallback: accept invalid TLS certificates.
    pub insecure_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Full connection URL, e.g. "redis://localhost:6379".
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret for bearer tokens. Requests fail with INTERNAL when unset.
    pub jwt_secret: Option<String>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Run the pipeline against in-process fake STT/LLM providers.
    pub use_mock: bool,
    pub vertex_project_id: Option<String>,
    pub vertex_location: Option<String>,
    pub vertex_gemini_model: String,
    /// API key sent as `x-goog-api-key` to the Speech and Gemini REST APIs.
    pub google_api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Co-host the audio worker pool in this process.
    pub enabled: bool,
    pub num_workers: usize,
    pub stream: String,
    pub group: String,
    pub consumer_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MONGO_DB: &str = "yoospeak";
const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
const DEFAULT_NUM_WORKERS: usize = 5;
const DEFAULT_BUFFER_TTL_SECONDS: u64 = 24 * 60 * 60;
const DEFAULT_AUDIO_STREAM: &str = "audio:stream";
const DEFAULT_AUDIO_GROUP: &str = "audio-workers";
const DEFAULT_CONSUMER_PREFIX: &str = "c";

impl ApiConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    ///
    /// Separated from [`ApiConfig::from_env`] so tests can feed variables
    /// without mutating process state.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let port = match get("PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| format!("PORT is not a valid port number: {raw}"))?,
            None => DEFAULT_PORT,
        };

        let mongo_uri = get("MONGO_URI").ok_or("MONGO_URI environment variable is not set")?;

        let redis_url = get("REDIS_ADDR")
            .or_else(|| get("REDIS_URI"))
            .or_else(|| get("REDIS_URL"))
            .ok_or("REDIS_ADDR environment variable is not set")?;

        let num_workers = match get("NUM_AUDIO_WORKERS") {
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| format!("NUM_AUDIO_WORKERS is not a number: {raw}"))?,
            None => DEFAULT_NUM_WORKERS,
        };

        let buffer_ttl_seconds = match get("BUFFER_TTL_SECONDS") {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|_| format!("BUFFER_TTL_SECONDS is not a number: {raw}"))?,
            None => DEFAULT_BUFFER_TTL_SECONDS,
        };

        Ok(Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port,
            },
            mongo: MongoConfig {
                uri: mongo_uri,
                db: get("MONGO_DB").unwrap_or_else(|| DEFAULT_MONGO_DB.to_string()),
                insecure_tls: flag(get("MONGO_INSECURE_TLS")),
            },
            redis: RedisConfig {
                url: normalize_redis_url(redis_url),
            },
            auth: AuthConfig {
                jwt_secret: get("SUPABASE_JWT_SECRET"),
                issuer: get("SUPABASE_JWT_ISSUER"),
                audience: get("SUPABASE_JWT_AUDIENCE"),
            },
            providers: ProviderConfig {
                use_mock: flag(get("USE_MOCK_PROVIDERS")),
                vertex_project_id: get("VERTEX_PROJECT_ID"),
                vertex_location: get("VERTEX_LOCATION"),
                vertex_gemini_model: get("VERTEX_GEMINI_MODEL")
                    .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
                google_api_key: get("GOOGLE_API_KEY"),
            },
            workers: WorkerConfig {
                enabled: flag(get("RUN_WORKERS")),
                num_workers,
                stream: DEFAULT_AUDIO_STREAM.to_string(),
                group: DEFAULT_AUDIO_GROUP.to_string(),
                consumer_prefix: DEFAULT_CONSUMER_PREFIX.to_string(),
            },
            buffer_ttl_seconds,
            postgres_uri: get("POSTGRES_URI"),
            gcs_bucket: get("GCS_BUCKET"),
            logging: LoggingConfig {
                level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
                format: get("LOG_FORMAT").unwrap_or_else(|| "pretty".to_string()),
            },
        })
    }
}

fn flag(value: Option<String>) -> bool {
    matches!(value.as_deref(), Some("1") | Some("true") | Some("TRUE"))
}

/// `REDIS_ADDR` is historically a bare `host:port`; the client wants a URL.
fn normalize_redis_url(raw: String) -> String {
    if raw.contains("://") {
        raw
    } else {
        format!("redis://{raw}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn minimal_env_gets_defaults() {
        let cfg = ApiConfig::from_lookup(lookup(&[
            ("MONGO_URI", "mongodb://localhost:27017"),
            ("REDIS_ADDR", "localhost:6379"),
        ]))
        .unwrap();

        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.mongo.db, "yoospeak");
        assert_eq!(cfg.redis.url, "redis://localhost:6379");
        assert_eq!(cfg.providers.vertex_gemini_model, "gemini-1.5-flash");
        assert_eq!(cfg.workers.num_workers, 5);
        assert_eq!(cfg.workers.stream, "audio:stream");
        assert_eq!(cfg.workers.group, "audio-workers");
        assert_eq!(cfg.buffer_ttl_seconds, 86_400);
        assert!(!cfg.workers.enabled);
        assert!(!cfg.mongo.insecure_tls);
    }

    #[test]
    fn missing_mongo_uri_is_an_error() {
        let err = ApiConfig::from_lookup(lookup(&[("REDIS_ADDR", "localhost:6379")])).unwrap_err();
        assert!(err.contains("MONGO_URI"));
    }

    #[test]
    fn missing_redis_is_an_error() {
        let err =
            ApiConfig::from_lookup(lookup(&[("MONGO_URI", "mongodb://localhost")])).unwrap_err();
        assert!(err.contains("REDIS_ADDR"));
    }

    #[test]
    fn redis_url_variants_are_accepted() {
        let cfg = ApiConfig::from_lookup(lookup(&[
            ("MONGO_URI", "mongodb://localhost"),
            ("REDIS_URL", "rediss://cache.internal:6380"),
        ]))
        .unwrap();
        assert_eq!(cfg.redis.url, "rediss://cache.internal:6380");
    }

    #[test]
    fn worker_flags_are_parsed() {
        let cfg = ApiConfig::from_lookup(lookup(&[
            ("MONGO_URI", "mongodb://localhost"),
            ("REDIS_ADDR", "localhost:6379"),
            ("RUN_WORKERS", "1"),
            ("NUM_AUDIO_WORKERS", "3"),
        ]))
        .unwrap();
        assert!(cfg.workers.enabled);
        assert_eq!(cfg.workers.num_workers, 3);
    }

    #[test]
    fn invalid_port_is_an_error() {
        let err = ApiConfig::from_lookup(lookup(&[
            ("MONGO_URI", "mongodb://localhost"),
            ("REDIS_ADDR", "localhost:6379"),
            ("PORT", "not-a-port"),
        ]))
        .unwrap_err();
        assert!(err.contains("PORT"));
    }
}
