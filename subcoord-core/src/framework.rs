use sqlx::PgPool;

/// Executes the query objects in [`crate::entities`] against PostgreSQL.
///
/// Each query is a plain struct; `impl Processor<Query> for DatabaseProcessor`
/// holds its SQL.
#[derive(Debug, Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}

impl DatabaseProcessor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Start a database transaction for multi-row writes.
    pub async fn begin(&self) -> Result<sqlx::Transaction<'static, sqlx::Postgres>, sqlx::Error> {
        self.pool.begin().await
    }
}
