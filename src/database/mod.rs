use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;

use crate::error::AuctionError;

pub struct DatabaseManager {
    pub pool: Arc<PgPool>,
}

impl DatabaseManager {
    /// Connect using DATABASE_URL.
    pub async fn new() -> Result<Self, AuctionError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| AuctionError::Internal("DATABASE_URL must be set".to_string()))?;
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn get_pool(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }

    /// Apply the schema. Statements are idempotent, so this is safe on every
    /// boot.
    pub async fn initialize_database(&self) -> Result<(), AuctionError> {
        let create_schema_sql = include_str!("../sql/01-create-schema.sql");
        self.execute_multi_query(create_schema_sql).await?;
        Ok(())
    }

    async fn execute_multi_query(&self, sql: &str) -> Result<(), AuctionError> {
        for query in sql.split(';') {
            let query = query.trim();
            if !query.is_empty() {
                sqlx::query(query).execute(&*self.pool).await?;
            }
        }
        Ok(())
    }
}
