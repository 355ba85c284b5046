use diesel::r2d2::{ConnectionManager, Pool, PoolError, PooledConnection};
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::sync::Arc;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;
pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;
pub type DbPool = Arc<PgPool>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(Debug)]
pub enum DbError {
    PoolError(PoolError),
    DieselError(diesel::result::Error),
    TaskJoinError(String),
}

impl From<PoolError> for DbError {
    fn from(err: PoolError) -> Self {
        DbError::PoolError(err)
    }
}

impl From<diesel::result::Error> for DbError {
    fn from(err: diesel::result::Error) -> Self {
        DbError::DieselError(err)
    }
}

impl From<tokio::task::JoinError> for DbError {
    fn from(err: tokio::task::JoinError) -> Self {
        DbError::TaskJoinError(err.to_string())
    }
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbError::PoolError(e) => write!(f, "Pool error: {}", e),
            DbError::DieselError(e) => write!(f, "Database error: {}", e),
            DbError::TaskJoinError(e) => write!(f, "Task join error: {}", e),
        }
    }
}

impl std::error::Error for DbError {}

impl DbError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::DieselError(diesel::result::Error::NotFound))
    }
}

pub fn create_pool(database_url: &str) -> Result<PgPool, PoolError> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder().max_size(10).build(manager)
}

pub fn run_migrations(pool: &PgPool) -> Result<usize, String> {
    let conn = &mut pool.get().map_err(|e| e.to_string())?;
    conn.run_pending_migrations(MIGRATIONS)
        .map(|applied| applied.len())
        .map_err(|e| e.to_string())
}

/// Runs synchronous data-access functions on the blocking thread pool.
pub async fn run_blocking<T, F>(pool: &DbPool, f: F) -> Result<T, DbError>
where
    T: Send + 'static,
    F: FnOnce(&PgPool) -> Result<T, DbError> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || f(pool.as_ref())).await?
}

pub fn ping(pool: &PgPool) -> Result<(), DbError> {
    use diesel::RunQueryDsl;
    let conn = &mut pool.get()?;
    diesel::sql_query("SELECT 1").execute(conn)?;
    Ok(())
}
