//! MongoDB bootstrap and index management.

use std::time::Duration;

use mongodb::bson::doc;
use mongodb::options::{ClientOptions, IndexOptions, Tls, TlsOptions};
use mongodb::{Client, Collection, IndexModel};

use services::common::RepositoryError;

const SESSIONS_COLLECTION: &str = "sessions";
const BUFFER_COLLECTION: &str = "realtime_buffer";

/// Process-wide MongoDB handle. Constructed once at startup and injected
/// into the repositories; tests construct their own stores instead.
pub struct Database {
    db: mongodb::Database,
}

impl Database {
    /// Connect and verify the connection with a ping.
    pub async fn connect(cfg: &config::MongoConfig) -> Result<Self, RepositoryError> {
        let mut options = ClientOptions::parse(&cfg.uri)
            .await
            .map_err(|e| RepositoryError::ConnectionFailed(e.to_string()))?;
        options.app_name = Some("yoospeak-api".to_string());
        options.server_selection_timeout = Some(Duration::from_secs(20));
        options.connect_timeout = Some(Duration::from_secs(15));

        if cfg.insecure_tls {
            tracing::warn!("MONGO_INSECURE_TLS is set; certificate validation disabled");
            let mut tls_options = TlsOptions::default();
            tls_options.allow_invalid_certificates = Some(true);
            options.tls = Some(Tls::Enabled(tls_options));
        }

        let client = Client::with_options(options)
            .map_err(|e| RepositoryError::ConnectionFailed(e.to_string()))?;
        let db = client.database(&cfg.db);

        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| RepositoryError::ConnectionFailed(e.to_string()))?;

        tracing::info!(db = %cfg.db, "MongoDB connected");
        Ok(Self { db })
    }

    pub fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        self.db.collection(name)
    }

    pub fn sessions_collection<T: Send + Sync>(&self) -> Collection<T> {
        self.collection(SESSIONS_COLLECTION)
    }

    pub fn buffer_collection<T: Send + Sync>(&self) -> Collection<T> {
        self.collection(BUFFER_COLLECTION)
    }

    /// Create the indexes the realtime core relies on. Safe to call on
    /// every startup; existing indexes are left alone.
    pub async fn ensure_indexes(&self) -> Result<(), RepositoryError> {
        let buffer: Collection<mongodb::bson::Document> = self.buffer_collection();
        buffer
            .create_indexes(vec![
                // TTL: the store physically deletes rows past expires_at.
                IndexModel::builder()
                    .keys(doc! { "expires_at": 1 })
                    .options(
                        IndexOptions::builder()
                            .name("ttl_expires_at".to_string())
                            .expire_after(Duration::from_secs(0))
                            .build(),
                    )
                    .build(),
                // No duplicate chunk per session.
                IndexModel::builder()
                    .keys(doc! { "session_id": 1, "chunk_index": 1 })
                    .options(
                        IndexOptions::builder()
                            .name("uniq_session_chunk".to_string())
                            .unique(true)
                            .build(),
                    )
                    .build(),
                // Query helper.
                IndexModel::builder()
                    .keys(doc! { "session_id": 1, "timestamp": -1 })
                    .options(IndexOptions::builder().name("by_session_ts".to_string()).build())
                    .build(),
            ])
            .await
            .map_err(|e| RepositoryError::DatabaseError(e.into()))?;

        let sessions: Collection<mongodb::bson::Document> = self.sessions_collection();
        sessions
            .create_indexes(vec![
                IndexModel::builder()
                    .keys(doc! { "session_id": 1 })
                    .options(
                        IndexOptions::builder()
                            .name("uniq_session_id".to_string())
                            .unique(true)
                            .build(),
                    )
                    .build(),
                IndexModel::builder()
                    .keys(doc! { "user_id": 1, "created_at": -1 })
                    .options(IndexOptions::builder().name("by_user_created".to_string()).build())
                    .build(),
            ])
            .await
            .map_err(|e| RepositoryError::DatabaseError(e.into()))?;

        tracing::info!("MongoDB indexes ensured");
        Ok(())
    }
}

/// True when the error is a unique-index violation (E11000).
pub(crate) fn is_duplicate_key_error(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    matches!(
        *err.kind,
        ErrorKind::Write(WriteFailure::WriteError(ref write_error)) if write_error.code == 11000
    )
}
