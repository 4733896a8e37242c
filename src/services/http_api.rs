//! REST API routes for the assignment service.
//!
//! Handlers only decode requests, call the service and map results onto
//! JSON responses and status codes.

use crate::error::AppError;
use crate::models::{PullRequest, Team, User};
use crate::services::assignment::AssignmentService;
use crate::storage::sqlite::SqliteStorage;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Shared state for the API routes.
#[derive(Clone)]
pub struct ApiState {
    pub service: AssignmentService<SqliteStorage>,
    /// Cancelled on server shutdown; every request token derives from it.
    pub shutdown: CancellationToken,
    pub request_timeout: Duration,
}

impl ApiState {
    pub fn new(
        service: AssignmentService<SqliteStorage>,
        shutdown: CancellationToken,
        request_timeout: Duration,
    ) -> Self {
        Self {
            service,
            shutdown,
            request_timeout,
        }
    }

    /// A cancellation token for one request.
    ///
    /// It fires on shutdown or after `request_timeout`. Dropping the guard
    /// cancels it too, which stops the timer task.
    fn request_scope(&self) -> (CancellationToken, DropGuard) {
        let token = self.shutdown.child_token();
        let timer = token.clone();
        let timeout = self.request_timeout;

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => timer.cancel(),
                _ = timer.cancelled() => {}
            }
        });

        (token.clone(), token.drop_guard())
    }
}

// ── Error handling ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

/// Wrapper to make AppError usable as an axum error response.
pub struct ApiErr(AppError);

impl ApiErr {
    fn status(&self) -> StatusCode {
        match &self.0 {
            AppError::AlreadyExists { resource, .. } if resource == "team" => StatusCode::BAD_REQUEST,
            AppError::AlreadyExists { .. }
            | AppError::AlreadyMerged { .. }
            | AppError::ReviewerNotAssigned { .. }
            | AppError::NoCandidate { .. } => StatusCode::CONFLICT,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            AppError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database { .. } | AppError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiErr {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("Request failed: {}", self.0);
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.0.code(),
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<AppError> for ApiErr {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiErr {
    fn from(rejection: JsonRejection) -> Self {
        Self(AppError::invalid_input(format!(
            "invalid JSON: {}",
            rejection.body_text()
        )))
    }
}

// ── DTOs ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct TeamMemberDto {
    pub user_id: String,
    pub username: String,
    pub is_active: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TeamDto {
    pub team_name: String,
    pub members: Vec<TeamMemberDto>,
}

impl From<TeamDto> for Team {
    fn from(dto: TeamDto) -> Self {
        let members = dto
            .members
            .into_iter()
            .map(|m| User::new(m.user_id, m.username, dto.team_name.as_str(), m.is_active))
            .collect();
        Team::new(dto.team_name, members)
    }
}

impl From<Team> for TeamDto {
    fn from(team: Team) -> Self {
        Self {
            team_name: team.team_name,
            members: team
                .members
                .into_iter()
                .map(|m| TeamMemberDto {
                    user_id: m.user_id,
                    username: m.username,
                    is_active: m.is_active,
                })
                .collect(),
        }
    }
}

#[derive(Serialize)]
struct TeamAddResponse {
    team: TeamDto,
}

#[derive(Serialize)]
struct UserDto {
    user_id: String,
    username: String,
    team_name: String,
    is_active: bool,
}

impl From<User> for UserDto {
    fn from(user: User) -> Self {
        Self {
            user_id: user.user_id,
            username: user.username,
            team_name: user.team_name,
            is_active: user.is_active,
        }
    }
}

#[derive(Serialize)]
struct UserResponse {
    user: UserDto,
}

#[derive(Deserialize)]
struct SetIsActiveRequest {
    user_id: String,
    is_active: bool,
}

#[derive(Serialize)]
struct PullRequestDto {
    pull_request_id: String,
    pull_request_name: String,
    author_id: String,
    status: String,
    assigned_reviewers: Vec<String>,
    #[serde(rename = "createdAt")]
    created_at: DateTime<Utc>,
    #[serde(rename = "mergedAt", skip_serializing_if = "Option::is_none")]
    merged_at: Option<DateTime<Utc>>,
}

impl From<PullRequest> for PullRequestDto {
    fn from(pr: PullRequest) -> Self {
        Self {
            status: pr.status.to_string(),
            pull_request_id: pr.pull_request_id,
            pull_request_name: pr.pull_request_name,
            author_id: pr.author_id,
            assigned_reviewers: pr.assigned_reviewers,
            created_at: pr.created_at,
            merged_at: pr.merged_at,
        }
    }
}

#[derive(Serialize)]
struct PullRequestShortDto {
    pull_request_id: String,
    pull_request_name: String,
    author_id: String,
    status: String,
}

impl From<PullRequest> for PullRequestShortDto {
    fn from(pr: PullRequest) -> Self {
        Self {
            status: pr.status.to_string(),
            pull_request_id: pr.pull_request_id,
            pull_request_name: pr.pull_request_name,
            author_id: pr.author_id,
        }
    }
}

#[derive(Serialize)]
struct UserReviewsResponse {
    user_id: String,
    pull_requests: Vec<PullRequestShortDto>,
}

#[derive(Serialize)]
struct PullRequestResponse {
    pr: PullRequestDto,
}

#[derive(Deserialize)]
struct CreatePullRequestRequest {
    pull_request_id: String,
    pull_request_name: String,
    author_id: String,
}

#[derive(Deserialize)]
struct MergePullRequestRequest {
    pull_request_id: String,
}

#[derive(Deserialize)]
struct ReassignRequest {
    pull_request_id: String,
    old_user_id: String,
}

#[derive(Serialize)]
struct ReassignResponse {
    pr: PullRequestDto,
    replaced_by: String,
}

#[derive(Deserialize)]
struct TeamQuery {
    team_name: Option<String>,
}

#[derive(Deserialize)]
struct UserQuery {
    user_id: Option<String>,
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiErr> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiErr(AppError::invalid_input_field(format!("{} is required", field), field)))
}

// ── Route builder ────────────────────────────────────────────────────────────

pub fn api_routes() -> Router<ApiState> {
    Router::new()
        .route("/team/add", post(add_team))
        .route("/team/get", get(get_team))
        .route("/users/setIsActive", post(set_is_active))
        .route("/users/getReview", get(get_user_reviews))
        .route("/pullRequest/create", post(create_pull_request))
        .route("/pullRequest/merge", post(merge_pull_request))
        .route("/pullRequest/reassign", post(reassign_reviewer))
        .route("/health", get(health))
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// POST /team/add: create a team with its members.
async fn add_team(
    State(state): State<ApiState>,
    payload: Result<Json<TeamDto>, JsonRejection>,
) -> Result<impl IntoResponse, ApiErr> {
    let Json(dto) = payload?;
    let (cancel, _guard) = state.request_scope();

    let team = state.service.create_team(Team::from(dto), &cancel).await?;
    Ok((
        StatusCode::CREATED,
        Json(TeamAddResponse {
            team: TeamDto::from(team),
        }),
    ))
}

/// GET /team/get?team_name=X
async fn get_team(
    State(state): State<ApiState>,
    Query(query): Query<TeamQuery>,
) -> Result<Json<TeamDto>, ApiErr> {
    let team_name = required(query.team_name, "team_name")?;
    let (cancel, _guard) = state.request_scope();

    let team = state.service.get_team(&team_name, &cancel).await?;
    Ok(Json(TeamDto::from(team)))
}

/// POST /users/setIsActive
async fn set_is_active(
    State(state): State<ApiState>,
    payload: Result<Json<SetIsActiveRequest>, JsonRejection>,
) -> Result<Json<UserResponse>, ApiErr> {
    let Json(req) = payload?;
    let (cancel, _guard) = state.request_scope();

    let user = state
        .service
        .set_user_active(&req.user_id, req.is_active, &cancel)
        .await?;
    Ok(Json(UserResponse {
        user: UserDto::from(user),
    }))
}

/// GET /users/getReview?user_id=X: pull requests the user reviews.
async fn get_user_reviews(
    State(state): State<ApiState>,
    Query(query): Query<UserQuery>,
) -> Result<Json<UserReviewsResponse>, ApiErr> {
    let user_id = required(query.user_id, "user_id")?;
    let (cancel, _guard) = state.request_scope();

    let prs = state.service.list_user_reviews(&user_id, &cancel).await?;
    Ok(Json(UserReviewsResponse {
        user_id,
        pull_requests: prs.into_iter().map(PullRequestShortDto::from).collect(),
    }))
}

/// POST /pullRequest/create
async fn create_pull_request(
    State(state): State<ApiState>,
    payload: Result<Json<CreatePullRequestRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiErr> {
    let Json(req) = payload?;
    let (cancel, _guard) = state.request_scope();

    let pr = state
        .service
        .create_pull_request(&req.pull_request_id, &req.pull_request_name, &req.author_id, &cancel)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(PullRequestResponse {
            pr: PullRequestDto::from(pr),
        }),
    ))
}

/// POST /pullRequest/merge (idempotent)
async fn merge_pull_request(
    State(state): State<ApiState>,
    payload: Result<Json<MergePullRequestRequest>, JsonRejection>,
) -> Result<Json<PullRequestResponse>, ApiErr> {
    let Json(req) = payload?;
    let (cancel, _guard) = state.request_scope();

    let pr = state
        .service
        .merge_pull_request(&req.pull_request_id, &cancel)
        .await?;
    Ok(Json(PullRequestResponse {
        pr: PullRequestDto::from(pr),
    }))
}

/// POST /pullRequest/reassign
async fn reassign_reviewer(
    State(state): State<ApiState>,
    payload: Result<Json<ReassignRequest>, JsonRejection>,
) -> Result<Json<ReassignResponse>, ApiErr> {
    let Json(req) = payload?;
    let (cancel, _guard) = state.request_scope();

    let reassignment = state
        .service
        .reassign_reviewer(&req.pull_request_id, &req.old_user_id, &cancel)
        .await?;
    Ok(Json(ReassignResponse {
        pr: PullRequestDto::from(reassignment.pull_request),
        replaced_by: reassignment.replaced_by,
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
