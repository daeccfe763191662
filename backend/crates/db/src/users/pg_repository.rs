use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::users::models::User;
use crate::users::repositories::UserRepository;
use labelcheck_common::error::{LabelError, LabelResult};

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn lookup_by_external_id(&self, external_id: &str) -> LabelResult<Option<User>> {
        let row = sqlx::query(
            "select id, external_id, email, created_at from users where external_id = $1",
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| LabelError::Database(e.to_string()))?;

        Ok(row.map(|row| User {
            id: row.get("id"),
            external_id: row.get("external_id"),
            email: row.get("email"),
            created_at: row.get("created_at"),
        }))
    }
}
