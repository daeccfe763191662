use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Row};

use crate::regulatory::models::RegulatoryDocument;
use crate::regulatory::repositories::RegulatoryRepository;
use labelcheck_common::error::{LabelError, LabelResult};

#[derive(Clone)]
pub struct PgRegulatoryRepository {
    pool: PgPool,
}

impl PgRegulatoryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_document_row(row: &PgRow) -> RegulatoryDocument {
    RegulatoryDocument {
        id: row.get("id"),
        title: row.get("title"),
        content: row.get("content"),
        category: row.get("category"),
        jurisdiction: row.get("jurisdiction"),
        source_url: row.get("source_url"),
        is_active: row.get("is_active"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl RegulatoryRepository for PgRegulatoryRepository {
    async fn list_active_documents(&self) -> LabelResult<Vec<RegulatoryDocument>> {
        let rows = sqlx::query(
            "select id, title, content, category, jurisdiction, source_url, is_active, updated_at
             from regulatory_documents
             where is_active",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| LabelError::Database(e.to_string()))?;

        Ok(rows.iter().map(map_document_row).collect())
    }
}
