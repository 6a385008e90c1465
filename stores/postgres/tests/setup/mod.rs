#![allow(dead_code)]

use envconfig::Envconfig;
use optlock_postgres::config::Config;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

/// Connects to the database configured in the environment, either through
/// `DATABASE_URL` or the `DB_*` variables read by [`Config`].
pub async fn connect_to_database() -> PgPool {
    if let Ok(url) = std::env::var("DATABASE_URL") {
        return PgPool::connect(&url)
            .await
            .expect("connection to the database should work");
    }

    Config::init_from_env()
        .expect("config should be read from env")
        .connect()
        .await
        .expect("connection to the database should work")
}

/// Returns a record type name no other test run is using.
pub fn unique_record_type(prefix: &str) -> String {
    format!("{}-{}", prefix, rand::thread_rng().gen::<u64>())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Running,
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub pipeline_id: i64,
    pub number: i64,
    pub status: Status,
    pub stages: Vec<String>,
}

impl Execution {
    pub fn pending(pipeline_id: i64, number: i64) -> Self {
        Self {
            pipeline_id,
            number,
            status: Status::Pending,
            stages: Vec::new(),
        }
    }
}
