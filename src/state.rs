use std::sync::Arc;

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::config::AppConfig;
use crate::users::repo::{PgUserRepo, UserRepository};

/// Handed to every request through axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserRepository>,
}

impl AppState {
    /// Connects the pool and wires the Postgres repository. The pool is also
    /// returned so the caller can run migrations on it.
    pub async fn init(config: &AppConfig) -> anyhow::Result<(Self, PgPool)> {
        let db = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        let users = Arc::new(PgUserRepo::new(db.clone())) as Arc<dyn UserRepository>;
        Ok((Self::from_parts(users), db))
    }

    pub fn from_parts(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }
}
