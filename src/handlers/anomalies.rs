//! Anomaly handlers

use axum::{extract::{State, Path, Query}, Json};
use uuid::Uuid;
use validator::Validate;

use crate::{AppState, AppResult, AppError};
use crate::models::{AnomalyExplanation, LogRecord, RecentAnomalies};

const DEFAULT_RECENT: i64 = 10;

/// Most recent anomalies
pub async fn recent(
    State(state): State<AppState>,
    Query(query): Query<RecentAnomalies>,
) -> AppResult<Json<Vec<LogRecord>>> {
    query.validate()?;
    let anomalies = LogRecord::recent_anomalies(&state.pool, query.limit.unwrap_or(DEFAULT_RECENT)).await?;
    Ok(Json(anomalies))
}

/// Anomaly with surrounding context and a generated explanation
pub async fn explain(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<AnomalyExplanation>> {
    let anomaly = LogRecord::find_anomaly(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Anomaly not found".to_string()))?;

    let similar = LogRecord::similar_anomalies(&state.pool, &anomaly).await?;
    let stats = LogRecord::window_stats(&state.pool, anomaly.ts).await?;

    Ok(Json(AnomalyExplanation::build(anomaly, similar, stats)))
}
