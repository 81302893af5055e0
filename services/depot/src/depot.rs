//! The shared service context and its builder.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use storage::Storage;
use tokio_util::sync::CancellationToken;

use crate::clock::{Clock, SystemClock};
use crate::config::{DepotConfig, GcConfig};
use crate::db::{Database, accounts};
use crate::error::{DepotError, DepotResult, Resource};
use crate::names::validate_name;
use crate::pagination::DEFAULT_MAX_PAGE_SIZE;

/// Everything an operation needs: the database, the blob backend, the clock
/// and the sweep timing. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Depot {
    db: Database,
    storage: Storage,
    clock: Arc<dyn Clock>,
    gc: GcConfig,
    max_page_size: u32,
    shutdown: CancellationToken,
}

impl Depot {
    /// Open the database and backend named in `config`.
    pub async fn from_config(config: &DepotConfig) -> DepotResult<Self> {
        let db = Database::open(&config.database.path, config.database.max_connections).await?;
        let storage = config
            .storage
            .clone()
            .build()
            .with_timeout(config.backend.timeout());

        Ok(DepotBuilder::new(db, storage)
            .gc(config.gc)
            .max_page_size(config.api.max_page_size)
            .build())
    }

    /// The relational store.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// The blob backend.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Current time according to the configured clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Sweep timing.
    pub fn gc(&self) -> &GcConfig {
        &self.gc
    }

    /// Upper bound for the `limit` of listings.
    pub fn max_page_size(&self) -> u32 {
        self.max_page_size
    }

    /// A token which is cancelled when the service shuts down.
    pub fn cancellation(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Cancel all in-flight backend calls and stop the janitor.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Create an account. Creating an existing account is not an error.
    #[tracing::instrument(skip(self))]
    pub async fn create_account(&self, name: &str) -> DepotResult<bool> {
        validate_name(name)?;
        let mut conn = self.db.pool().acquire().await?;
        let created = accounts::create_account(&mut conn, name, self.now()).await?;
        if created {
            tracing::info!(account = name, "created account");
        }
        Ok(created)
    }

    /// Ensure an account exists.
    pub(crate) async fn require_account(&self, name: &str) -> DepotResult<()> {
        validate_name(name)?;
        let mut conn = self.db.pool().acquire().await?;
        match accounts::find_account(&mut conn, name).await? {
            Some(_) => Ok(()),
            None => Err(DepotError::not_found(Resource::Account, name)),
        }
    }
}

/// Builder for [`Depot`].
#[derive(Debug)]
pub struct DepotBuilder {
    db: Database,
    storage: Storage,
    clock: Option<Arc<dyn Clock>>,
    gc: GcConfig,
    max_page_size: u32,
}

impl DepotBuilder {
    /// Start from a database and a blob backend.
    pub fn new(db: Database, storage: Storage) -> Self {
        Self {
            db,
            storage,
            clock: None,
            gc: GcConfig::default(),
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }

    /// Use a different time source.
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Set the sweep timing.
    pub fn gc(mut self, gc: GcConfig) -> Self {
        self.gc = gc;
        self
    }

    /// Set the upper bound for the `limit` of listings.
    pub fn max_page_size(mut self, max_page_size: u32) -> Self {
        self.max_page_size = max_page_size.max(1);
        self
    }

    /// Build the service context.
    pub fn build(self) -> Depot {
        Depot {
            db: self.db,
            storage: self.storage,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            gc: self.gc,
            max_page_size: self.max_page_size,
            shutdown: CancellationToken::new(),
        }
    }
}
