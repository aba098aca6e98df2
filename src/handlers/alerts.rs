//! Alert rule handlers

use axum::{extract::{State, Path}, http::StatusCode, Json};
use validator::Validate;

use crate::{AppState, AppResult, AppError};
use crate::models::{AlertRule, CreateAlertRule, UpdateAlertRule};

pub async fn list(State(state): State<AppState>) -> AppResult<Json<Vec<AlertRule>>> {
    let rules = AlertRule::list(&state.pool).await?;
    Ok(Json(rules))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<Json<AlertRule>> {
    let rule = AlertRule::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Alert not found".to_string()))?;

    Ok(Json(rule))
}

pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateAlertRule>,
) -> AppResult<(StatusCode, Json<AlertRule>)> {
    req.validate()?;

    let rule = AlertRule::create(&state.pool, req).await?;
    tracing::info!("Alert rule {} ({}) created", rule.id, rule.name);
    Ok((StatusCode::CREATED, Json(rule)))
}

/// Partial update; omitted fields keep their value
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(req): Json<UpdateAlertRule>,
) -> AppResult<Json<AlertRule>> {
    req.validate()?;

    let rule = AlertRule::update(&state.pool, id, req)
        .await?
        .ok_or_else(|| AppError::NotFound("Alert not found".to_string()))?;

    Ok(Json(rule))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    if !AlertRule::delete(&state.pool, id).await? {
        return Err(AppError::NotFound("Alert not found".to_string()));
    }

    tracing::info!("Alert rule {} deleted", id);
    Ok(StatusCode::NO_CONTENT)
}
