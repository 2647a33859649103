use crate::{
    abtest, db,
    error::AppError,
    models::{TestStatus, Variant},
    AppState,
};
use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

// ── Request shapes ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTestRequest {
    pub link_id: i64,
    pub variant_b_title: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndTestRequest {
    pub link_id: i64,
    pub apply_winner: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestStatusResponse {
    pub running: bool,
    pub variant_a_title: String,
    pub variant_b_title: String,
    pub clicks_a: i64,
    pub clicks_b: i64,
    pub progress: i64,
    pub winner: Option<Variant>,
    pub status: &'static str,
}

// ── Handlers ───────────────────────────────────────────────────────────────

/// POST /api/ab-test/start
pub async fn start_test(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartTestRequest>,
) -> Result<Json<Value>, AppError> {
    let title = req.variant_b_title.trim();
    if title.is_empty() {
        return Err(AppError::Invalid("variantBTitle must not be empty".into()));
    }

    let link = abtest::start_test(
        &state.db,
        req.link_id,
        title,
        state.config.free_tier_test_cap,
    )
    .await?;

    tracing::info!("A/B test started on link {} ('{}')", link.id, link.title);
    Ok(Json(json!({ "success": true })))
}

/// POST /api/ab-test/end
pub async fn end_test(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EndTestRequest>,
) -> Result<Json<Value>, AppError> {
    let link = abtest::end_test(&state.db, req.link_id, req.apply_winner).await?;

    tracing::info!(
        "A/B test ended on link {} (apply_winner={}, title now '{}')",
        link.id,
        req.apply_winner,
        link.title
    );
    Ok(Json(json!({ "success": true })))
}

/// GET /api/ab-test/:link_id
///
/// Read-only status for dashboard badges: variant titles, click counts,
/// progress toward the 50-click target, and the winner so far. For a
/// running test the winner is computed live; an archived test reports the
/// winner frozen at end time.
pub async fn test_status(
    State(state): State<Arc<AppState>>,
    Path(link_id): Path<i64>,
) -> Result<Response, AppError> {
    let link = db::get_link_by_id(&state.db, link_id)
        .await?
        .ok_or(AppError::NotFound)?;

    let Some(data) = link.test_data() else {
        return Ok(Json(json!({ "running": false })).into_response());
    };

    let winner = match data.status {
        TestStatus::Running => abtest::calculate_winner(data.clicks_a, data.clicks_b),
        TestStatus::Completed => data.winner,
    };

    let body = TestStatusResponse {
        running: data.status == TestStatus::Running,
        variant_a_title: link.variant_title(Variant::A).to_owned(),
        variant_b_title: data.variant_b_title.clone(),
        clicks_a: data.clicks_a,
        clicks_b: data.clicks_b,
        progress: abtest::test_progress(data.clicks_a, data.clicks_b),
        winner,
        status: data.status.as_str(),
    };

    Ok(Json(body).into_response())
}
