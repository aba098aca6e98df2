//! Log search and statistics handlers

use axum::{extract::State, Json};
use validator::Validate;

use crate::{AppState, AppResult};
use crate::models::{LogRecord, LogSearch, LogStats};
use crate::store::filter::LogFilter;

/// Filtered search, newest first
pub async fn search(
    State(state): State<AppState>,
    Json(req): Json<LogSearch>,
) -> AppResult<Json<Vec<LogRecord>>> {
    req.validate()?;
    let filter = LogFilter::from_search(&req)?;

    let logs = LogRecord::search(&state.pool, &filter).await?;
    tracing::debug!("Search returned {} records", logs.len());
    Ok(Json(logs))
}

pub async fn stats(State(state): State<AppState>) -> AppResult<Json<LogStats>> {
    let stats = LogRecord::stats(&state.pool).await?;
    Ok(Json(stats))
}
