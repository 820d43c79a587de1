mod from_row;
mod schema;
pub mod queries;

pub use schema::init_db;

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::payments::PaymentGateway;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state: database pool, the injected payment gateway, and
/// deployment-time pricing configuration.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Explicitly constructed and injected payment-provider client.
    /// No hidden global initialization.
    pub gateway: Arc<dyn PaymentGateway>,
    /// Currency applied to all checkouts (e.g. "usd").
    pub currency: String,
    /// Sitewide promotional discount percentage, if enabled at deploy time.
    pub sitewide_discount: Option<f64>,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
    });
    Pool::builder().max_size(10).build(manager)
}
