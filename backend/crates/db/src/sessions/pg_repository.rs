use std::str::FromStr;

use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, QueryBuilder, Row};
use uuid::Uuid;

use crate::sessions::models::{
    Iteration, IterationContent, IterationType, NewIteration, Session, SessionFilter,
    SessionStatus,
};
use crate::sessions::repositories::SessionRepository;
use labelcheck_common::error::{LabelError, LabelResult};

/// Attempts at claiming the next sequence number before giving up.
const SEQUENCE_CLAIM_ATTEMPTS: u32 = 3;

const ITERATION_COLUMNS: &str = "id, session_id, sequence, iteration_type, input, result, \
                                 file_ref, parent_iteration_id, created_at";

#[derive(Clone)]
pub struct PgSessionRepository {
    pool: PgPool,
}

impl PgSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_session_row(row: &PgRow) -> LabelResult<Session> {
        let status_raw: String = row.get("status");
        let status = SessionStatus::from_str(&status_raw).map_err(LabelError::Database)?;

        Ok(Session {
            id: row.get("id"),
            user_id: row.get("user_id"),
            status,
            created_at: row.get("created_at"),
        })
    }

    fn map_iteration_row(row: &PgRow) -> LabelResult<Iteration> {
        let kind_raw: String = row.get("iteration_type");
        let kind = IterationType::from_str(&kind_raw).map_err(LabelError::Database)?;
        let content = IterationContent::from_columns(kind, row.get("input"), row.get("result"))?;

        Ok(Iteration {
            id: row.get("id"),
            session_id: row.get("session_id"),
            sequence: row.get("sequence"),
            content,
            file_ref: row.get("file_ref"),
            parent_iteration_id: row.get("parent_iteration_id"),
            created_at: row.get("created_at"),
        })
    }
}

fn db_err(e: sqlx::Error) -> LabelError {
    LabelError::Database(e.to_string())
}

#[async_trait]
impl SessionRepository for PgSessionRepository {
    async fn create_session(&self, session: Session) -> LabelResult<Session> {
        let row = sqlx::query(
            "insert into label_sessions (id, user_id, status, created_at)
             values ($1, $2, $3, $4)
             returning id, user_id, status, created_at",
        )
        .bind(session.id)
        .bind(session.user_id)
        .bind(session.status.as_str())
        .bind(session.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Self::map_session_row(&row)
    }

    async fn get_session(&self, id: Uuid) -> LabelResult<Option<Session>> {
        let row = sqlx::query(
            "select id, user_id, status, created_at
             from label_sessions
             where id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(Self::map_session_row).transpose()
    }

    async fn list_sessions(&self, filter: SessionFilter) -> LabelResult<Vec<Session>> {
        let mut qb = QueryBuilder::new(
            "select id, user_id, status, created_at from label_sessions where 1=1",
        );

        if let Some(user_id) = filter.user_id {
            qb.push(" and user_id = ").push_bind(user_id);
        }

        qb.push(" order by created_at desc, id");
        qb.push(" limit ").push_bind(filter.limit.unwrap_or(50));
        qb.push(" offset ").push_bind(filter.offset.unwrap_or(0));

        let rows = qb.build().fetch_all(&self.pool).await.map_err(db_err)?;

        rows.iter().map(Self::map_session_row).collect()
    }

    async fn list_iterations(&self, session_id: Uuid) -> LabelResult<Vec<Iteration>> {
        let rows = sqlx::query(&format!(
            "select {ITERATION_COLUMNS} from label_iterations
             where session_id = $1
             order by sequence asc"
        ))
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(Self::map_iteration_row).collect()
    }

    async fn get_iteration(&self, session_id: Uuid, id: Uuid) -> LabelResult<Option<Iteration>> {
        let row = sqlx::query(&format!(
            "select {ITERATION_COLUMNS} from label_iterations
             where session_id = $1 and id = $2"
        ))
        .bind(session_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(Self::map_iteration_row).transpose()
    }

    async fn insert_iteration(&self, iteration: NewIteration) -> LabelResult<Iteration> {
        let (kind, input, result) = iteration.content.to_columns()?;

        // Sequence and timestamp are derived from the session's current tail in
        // the same statement; a concurrent writer claiming the same sequence hits
        // the (session_id, sequence) unique key and we try again.
        let sql = format!(
            "insert into label_iterations ({ITERATION_COLUMNS})
             select $1, $2, coalesce(max(sequence), 0) + 1, $3, $4, $5, $6, $7,
                    greatest(now(), coalesce(max(created_at), now()))
             from label_iterations
             where session_id = $2
             returning {ITERATION_COLUMNS}"
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = sqlx::query(&sql)
                .bind(iteration.id)
                .bind(iteration.session_id)
                .bind(kind.as_str())
                .bind(&input)
                .bind(&result)
                .bind(&iteration.file_ref)
                .bind(iteration.parent_iteration_id)
                .fetch_one(&self.pool)
                .await;

            match outcome {
                Ok(row) => return Self::map_iteration_row(&row),
                Err(sqlx::Error::Database(e))
                    if e.is_unique_violation() && attempt < SEQUENCE_CLAIM_ATTEMPTS =>
                {
                    tracing::debug!(
                        session_id = %iteration.session_id,
                        attempt,
                        "sequence claimed concurrently, retrying insert"
                    );
                }
                Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                    return Err(LabelError::Validation(format!(
                        "iteration references a missing session or parent: {e}"
                    )));
                }
                Err(e) => return Err(db_err(e)),
            }
        }
    }

    async fn latest_iteration_of_types(
        &self,
        session_id: Uuid,
        types: &[IterationType],
    ) -> LabelResult<Option<Iteration>> {
        let names: Vec<String> = types.iter().map(|t| t.as_str().to_string()).collect();

        let row = sqlx::query(&format!(
            "select {ITERATION_COLUMNS} from label_iterations
             where session_id = $1 and iteration_type = any($2)
             order by sequence desc
             limit 1"
        ))
        .bind(session_id)
        .bind(&names)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(Self::map_iteration_row).transpose()
    }
}
