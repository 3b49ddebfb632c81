//! # clinsync-db
//!
//! PostgreSQL database layer for clinsync.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for patients, reports, notifications,
//!   clinic roles and application settings
//! - A row-change feed over LISTEN/NOTIFY driving the realtime pipeline
//!
//! ## Example
//!
//! ```rust,ignore
//! use clinsync_db::Database;
//! use clinsync_core::{CreateReportRequest, ReportStore, ReportType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/clinsync").await?;
//!
//!     let report = db.reports.insert(CreateReportRequest {
//!         patient_id: patient_id,
//!         report_type: ReportType::Pano,
//!     }).await?;
//!
//!     println!("Created report: {}", report.id);
//!     Ok(())
//! }
//! ```
pub mod feed;
pub mod notifications;
pub mod patients;
pub mod pool;
pub mod reports;
pub mod roles;
pub mod settings;

// Compiled unconditionally so downstream crates' ignored DB tests can
// reach the seed helpers and DEFAULT_TEST_DATABASE_URL.
pub mod test_fixtures;

pub use clinsync_core::*;

pub use feed::{channel_name, PgChangeFeed, PgChangeFeedStream, CHANNEL_PREFIX};
pub use notifications::PgNotificationRepository;
pub use patients::PgPatientRepository;
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use reports::PgReportRepository;
pub use roles::PgRoleRepository;
pub use settings::PgSettingsRepository;

/// One pool plus every repository that runs on it.
pub struct Database {
    pub pool: sqlx::Pool<sqlx::Postgres>,
    pub patients: PgPatientRepository,
    pub reports: PgReportRepository,
    pub notifications: PgNotificationRepository,
    pub roles: PgRoleRepository,
    pub settings: PgSettingsRepository,
}

impl Database {
    /// Build the repository set over an existing pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            patients: PgPatientRepository::new(pool.clone()),
            reports: PgReportRepository::new(pool.clone()),
            notifications: PgNotificationRepository::new(pool.clone()),
            roles: PgRoleRepository::new(pool.clone()),
            settings: PgSettingsRepository::new(pool.clone()),
            pool,
        }
    }

    /// Connect with the default pool configuration.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Connect with explicit pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Apply pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Change feed sharing this database's pool.
    pub fn feed(&self) -> PgChangeFeed {
        PgChangeFeed::new(self.pool.clone())
    }

    /// The shared connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self::new(self.pool.clone())
    }
}
