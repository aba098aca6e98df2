//! Pattern mining handler

use axum::{extract::{State, Query}, Json};
use validator::Validate;

use crate::{AppState, AppResult};
use crate::models::{PatternQuery, PatternTemplate};

/// Most frequent message templates in the recent window
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<PatternQuery>,
) -> AppResult<Json<Vec<PatternTemplate>>> {
    query.validate()?;

    let defaults = state.miner.defaults();
    let templates = state
        .miner
        .mine(
            query.window.unwrap_or(defaults.window),
            query.limit.unwrap_or(defaults.top_k),
            query.examples.unwrap_or(defaults.examples),
        )
        .await?;

    Ok(Json(templates))
}
