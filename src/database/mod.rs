use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};

use crate::{config, error::Result};

pub mod store;
pub mod table;

/// PostgreSQL 連線池。
///
/// 由組裝根建立一次後傳遞，不使用模組層級單例。
pub struct PostgresSQL {
    pool: PgPool,
}

impl PostgresSQL {
    pub fn new(cfg: &config::PostgreSQL) -> PostgresSQL {
        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}?application_name=mops_api",
            cfg.user, cfg.password, cfg.host, cfg.port, cfg.db
        );
        let pool = PgPoolOptions::new()
            .max_connections(cfg.pool_max)
            .connect_lazy(&database_url)
            .unwrap_or_else(|_| panic!("wrong database URL {}", database_url));

        PostgresSQL { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn tx(&self) -> Result<Transaction<'_, Postgres>> {
        Ok(self.pool.begin().await?)
    }
}
