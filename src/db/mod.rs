//! Job record persistence
//!
//! Connection pooling, embedded migrations and the job repository.

pub mod connection;
pub mod repositories;

use sqlx::PgPool;

pub use connection::create_pool;
pub use repositories::{JobStore, PgJobStore};

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
