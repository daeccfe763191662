use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reference regulation text (CFR part, USDA directive, guidance document).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegulatoryDocument {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub category: Option<String>,
    pub jurisdiction: Option<String>,
    pub source_url: Option<String>,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}
