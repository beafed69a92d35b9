use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::Submitter;
use crate::api::validation::validate_image_reference;
use crate::core::state::AppState;
use crate::core::time::now_utc;
use crate::db::models::{GradingRecord, NewGrading};
use crate::schemas::grading::{
    GradingCreate, GradingListResponse, GradingResponse, GradingSummary, ParentDashboardResponse,
    ParentHistoryResponse, SubmissionStatistics,
};
use crate::tasks::dispatcher::{Claim, DispatchError};
use crate::tasks::grading::AWAITING_FEEDBACK;

const DEFAULT_LIST_LIMIT: i64 = 100;
const MAX_LIST_LIMIT: i64 = 500;
const DASHBOARD_RECENT: usize = 5;
const QUEUE_REJECTED_FEEDBACK: &str = "评分队列繁忙，请稍后重新提交";

#[derive(Debug, Deserialize)]
pub(crate) struct ListQuery {
    #[serde(default)]
    limit: Option<i64>,
}

impl ListQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
    }
}

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/grading", get(list_gradings).post(create_grading))
        .route("/grading/:id", get(get_grading))
        .route("/grading/:id/process", post(process_grading))
        .route("/parent/submit", post(create_grading))
        .route("/parent/results", get(parent_results))
        .route("/parent/result/:id", get(parent_result))
        .route("/parent/dashboard", get(parent_dashboard))
        .route("/parent/history", get(parent_history))
}

async fn create_grading(
    State(state): State<AppState>,
    submitter: Submitter,
    Json(payload): Json<GradingCreate>,
) -> Result<(StatusCode, Json<GradingResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    for reference in payload
        .images
        .iter()
        .chain(payload.paper_image_url.iter())
        .chain(payload.answer_image_url.iter())
    {
        validate_image_reference(reference)?;
    }
    if !payload.has_image() {
        tracing::warn!(owner = %submitter.username, "Grading submitted without a paper image");
    }

    let mut record = GradingRecord::new(NewGrading {
        id: Uuid::new_v4().to_string(),
        subject: payload.subject,
        images: payload.images,
        paper_image: payload.paper_image_url,
        answer_image: payload.answer_image_url,
        description: payload.description,
        owner_username: submitter.username,
        owner_role: submitter.role,
        now: now_utc(),
    });
    record.feedback = Some(AWAITING_FEEDBACK.to_string());

    let claim = state.dispatcher().claim(&record.id)?;
    state
        .gradings()
        .upsert(&record)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to store grading record"))?;

    enqueue(&state, &mut record, claim).await?;

    tracing::info!(
        grading_id = %record.id,
        subject = %record.subject,
        owner = %record.owner_username,
        "Grading submitted"
    );

    Ok((StatusCode::CREATED, Json(GradingResponse::from(record))))
}

async fn process_grading(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<GradingResponse>), ApiError> {
    let mut record = find_record(&state, &id).await?;

    let claim = state.dispatcher().claim(&id)?;
    record.reset_for_run(AWAITING_FEEDBACK);
    state
        .gradings()
        .upsert(&record)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to reset grading record"))?;

    enqueue(&state, &mut record, claim).await?;

    tracing::info!(grading_id = %id, "Grading re-run requested");

    Ok((StatusCode::ACCEPTED, Json(GradingResponse::from(record))))
}

async fn get_grading(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<GradingResponse>, ApiError> {
    let record = find_record(&state, &id).await?;
    Ok(Json(GradingResponse::from(record)))
}

async fn list_gradings(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<GradingListResponse>, ApiError> {
    let records = state
        .gradings()
        .list_recent(None, query.limit())
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list gradings"))?;

    Ok(Json(GradingListResponse::from_records(records)))
}

async fn parent_results(
    State(state): State<AppState>,
    submitter: Submitter,
    Query(query): Query<ListQuery>,
) -> Result<Json<GradingListResponse>, ApiError> {
    let records = state
        .gradings()
        .list_recent(Some(&submitter.username), query.limit())
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list gradings"))?;

    Ok(Json(GradingListResponse::from_records(records)))
}

async fn parent_result(
    State(state): State<AppState>,
    submitter: Submitter,
    Path(id): Path<String>,
) -> Result<Json<GradingResponse>, ApiError> {
    let record = find_record(&state, &id).await?;
    if record.owner_username != submitter.username {
        return Err(ApiError::NotFound("Grading record not found".to_string()));
    }
    Ok(Json(GradingResponse::from(record)))
}

async fn parent_dashboard(
    State(state): State<AppState>,
    submitter: Submitter,
) -> Result<Json<ParentDashboardResponse>, ApiError> {
    let records = owned_records(&state, &submitter).await?;
    let statistics = SubmissionStatistics::from_records(&records);
    let recent_results =
        records.into_iter().take(DASHBOARD_RECENT).map(GradingSummary::from).collect();

    Ok(Json(ParentDashboardResponse { recent_results, statistics }))
}

async fn parent_history(
    State(state): State<AppState>,
    submitter: Submitter,
) -> Result<Json<ParentHistoryResponse>, ApiError> {
    let records = owned_records(&state, &submitter).await?;
    let statistics = SubmissionStatistics::from_records(&records);
    let history = records.into_iter().map(GradingSummary::from).collect();

    Ok(Json(ParentHistoryResponse { history, statistics }))
}

/// Newest `MAX_LIST_LIMIT` records of the caller; statistics cover this window.
async fn owned_records(
    state: &AppState,
    submitter: &Submitter,
) -> Result<Vec<GradingRecord>, ApiError> {
    state
        .gradings()
        .list_recent(Some(&submitter.username), MAX_LIST_LIMIT)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list gradings"))
}

async fn find_record(state: &AppState, id: &str) -> Result<GradingRecord, ApiError> {
    state
        .gradings()
        .find_by_id(id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to load grading record"))?
        .ok_or_else(|| ApiError::NotFound("Grading record not found".to_string()))
}

/// Hands a stored record to the workers. A rejected enqueue leaves the
/// record `failed` so it never looks stuck in `processing`.
async fn enqueue(state: &AppState, record: &mut GradingRecord, claim: Claim) -> Result<(), ApiError> {
    let Err(err) = state.dispatcher().submit(claim) else {
        return Ok(());
    };

    tracing::warn!(grading_id = %record.id, error = %err, "Grading dispatch rejected");
    if matches!(err, DispatchError::QueueFull | DispatchError::ShuttingDown) {
        record.mark_failed(QUEUE_REJECTED_FEEDBACK.to_string());
        state
            .gradings()
            .upsert(record)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to store grading record"))?;
    }

    Err(err.into())
}
