use labelcheck_analysis::SessionWithIterations;
use labelcheck_db::sessions::models::Session;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Default)]
pub struct SessionsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub data: Vec<Session>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct SessionDetailResponse {
    pub data: SessionWithIterations,
}
