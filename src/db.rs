use metrics::gauge;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, EntityTrait, Schema,
};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::entities::{Event, Folder, Order, OrderItem, Photo, PriceListItem, Subject};
use crate::errors::ServiceError;

/// Type alias for a database connection pool
pub type DbPool = DatabaseConnection;

/// Configuration for database connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections
    pub max_connections: u32,
    /// Minimum number of connections
    pub min_connections: u32,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Idle timeout duration
    pub idle_timeout: Duration,
    /// Acquire connection timeout
    pub acquire_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(8),
        }
    }
}

impl From<&AppConfig> for DbConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            url: cfg.database_url.clone(),
            ..Default::default()
        }
    }
}

/// Establishes a connection pool to the database with custom configuration
///
/// # Errors
/// Returns a `ServiceError` if the connection cannot be established
pub async fn establish_connection_with_config(config: &DbConfig) -> Result<DbPool, ServiceError> {
    debug!(
        max_connections = config.max_connections,
        "Configuring database connection"
    );

    let mut opt = ConnectOptions::new(config.url.clone());
    opt.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .sqlx_logging(false);

    gauge!("photo_checkout.db.max_connections", config.max_connections as f64);

    let pool = Database::connect(opt).await?;
    info!("Database connection pool established");
    Ok(pool)
}

/// Establishes a connection pool using `AppConfig`
pub async fn establish_connection_from_app_config(cfg: &AppConfig) -> Result<DbPool, ServiceError> {
    establish_connection_with_config(&cfg.into()).await
}

/// Creates any missing tables straight from the entity definitions.
///
/// Meant for SQLite and development databases; production schemas are
/// managed outside this service.
pub async fn create_schema(db: &DatabaseConnection) -> Result<(), ServiceError> {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    create_table(db, backend, &schema, Event).await?;
    create_table(db, backend, &schema, Folder).await?;
    create_table(db, backend, &schema, Photo).await?;
    create_table(db, backend, &schema, PriceListItem).await?;
    create_table(db, backend, &schema, Subject).await?;
    create_table(db, backend, &schema, Order).await?;
    create_table(db, backend, &schema, OrderItem).await?;

    info!(?backend, "Database schema ensured");
    Ok(())
}

async fn create_table<E: EntityTrait>(
    db: &DatabaseConnection,
    backend: DbBackend,
    schema: &Schema,
    entity: E,
) -> Result<(), ServiceError> {
    let mut statement = schema.create_table_from_entity(entity);
    statement.if_not_exists();
    db.execute(backend.build(&statement)).await?;
    Ok(())
}

/// Round-trips a trivial query and returns its latency.
pub async fn ping(db: &DatabaseConnection) -> Result<Duration, ServiceError> {
    let start = Instant::now();
    db.ping().await?;
    Ok(start.elapsed())
}
