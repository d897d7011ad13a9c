//! HTTP routes.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use folio_domain::{
    Bible, Chapter, CharacterProfile, CoreConcept, DomainError, GenerationKind, OutlineEntry,
    OutlineId, ProjectId, SequenceError, UserId, WritingInstructions,
};

use crate::app::App;
use crate::infrastructure::ports::RepoError;
use crate::use_cases::bible::AssistError;
use crate::use_cases::chapters::{GenerateChapter, GenerationError, GenerationEvent};
use crate::use_cases::continuity::ExtractionError;
use crate::use_cases::credits::LedgerError;
use crate::use_cases::export::{ExportError, ManuscriptExport};
use crate::use_cases::sequence::{SequenceQueryError, SlotView};

/// Create all HTTP routes.
pub fn routes() -> Router<Arc<App>> {
    Router::new()
        .route("/", get(health))
        .route("/api/health", get(health))
        .route("/api/credits", get(get_balance))
        .route("/api/credits/account", post(open_account))
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/generate", post(generate_full_bible))
        .route("/api/projects/core/generate", post(generate_core))
        .route("/api/projects/{id}", get(get_project).put(save_project))
        .route("/api/projects/{id}/characters/generate", post(generate_characters))
        .route("/api/projects/{id}/outline/generate", post(generate_outline))
        .route(
            "/api/projects/{id}/instructions/generate",
            post(generate_instructions),
        )
        .route("/api/projects/{id}/chapters", get(list_slots))
        .route(
            "/api/projects/{id}/chapters/{outline_id}/can-generate",
            get(can_generate),
        )
        .route(
            "/api/projects/{id}/chapters/{outline_id}/context",
            get(get_context),
        )
        .route(
            "/api/projects/{id}/chapters/{outline_id}/generate",
            post(generate_chapter),
        )
        .route(
            "/api/projects/{id}/chapters/{outline_id}/retry-analysis",
            post(retry_analysis),
        )
        .route("/api/projects/{id}/generation/cancel", post(cancel_generation))
        .route("/api/projects/{id}/export", get(export_project))
}

async fn health() -> &'static str {
    "OK"
}

// =============================================================================
// Caller identity
// =============================================================================

/// Account making the request, taken from the `X-User-Id` header.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub UserId);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get("X-User-Id")
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;
        let user = raw
            .parse::<UserId>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        Ok(CurrentUser(user))
    }
}

/// Load a bible and make sure the caller owns it. Someone else's project
/// looks the same as a missing one.
async fn owned_bible(app: &App, project_id: ProjectId, user: UserId) -> Result<Bible, ApiError> {
    let bible = app.use_cases.bible.get(project_id).await?;
    if bible.owner != user {
        return Err(ApiError::NotFound);
    }
    Ok(bible)
}

// =============================================================================
// Credits
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BalanceResponse {
    user_id: UserId,
    balance: u64,
}

async fn get_balance(
    State(app): State<Arc<App>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = app.use_cases.credits.get_balance(user).await?;
    Ok(Json(BalanceResponse {
        user_id: user,
        balance,
    }))
}

async fn open_account(
    State(app): State<Arc<App>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = app.use_cases.credits.open_account(user).await?;
    Ok(Json(BalanceResponse {
        user_id: user,
        balance,
    }))
}

// =============================================================================
// Story bibles
// =============================================================================

async fn list_projects(
    State(app): State<Arc<App>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Bible>>, ApiError> {
    Ok(Json(app.use_cases.bible.list(user).await?))
}

async fn create_project(
    State(app): State<Arc<App>>,
    CurrentUser(user): CurrentUser,
    Json(core): Json<CoreConcept>,
) -> Result<(StatusCode, Json<Bible>), ApiError> {
    let bible = app.use_cases.bible.create(user, core).await?;
    Ok((StatusCode::CREATED, Json(bible)))
}

async fn get_project(
    State(app): State<Arc<App>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Bible>, ApiError> {
    Ok(Json(owned_bible(&app, ProjectId::from_uuid(id), user).await?))
}

async fn save_project(
    State(app): State<Arc<App>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(mut bible): Json<Bible>,
) -> Result<Json<Bible>, ApiError> {
    let project_id = ProjectId::from_uuid(id);
    owned_bible(&app, project_id, user).await?;
    if bible.id != project_id {
        return Err(ApiError::BadRequest(
            "Project id in body does not match the path".to_string(),
        ));
    }
    bible.owner = user;
    Ok(Json(app.use_cases.bible.save(bible).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FullBibleRequest {
    idea: String,
    chapter_count: Option<u32>,
    word_count: Option<u32>,
}

async fn generate_full_bible(
    State(app): State<Arc<App>>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<FullBibleRequest>,
) -> Result<(StatusCode, Json<Bible>), ApiError> {
    if request.idea.trim().is_empty() {
        return Err(ApiError::BadRequest("Idea cannot be empty".to_string()));
    }
    let bible = app
        .use_cases
        .bible
        .generate_full_bible(user, &request.idea, request.chapter_count, request.word_count)
        .await?;
    Ok((StatusCode::CREATED, Json(bible)))
}

async fn generate_core(
    State(app): State<Arc<App>>,
    CurrentUser(user): CurrentUser,
    Json(partial): Json<CoreConcept>,
) -> Result<Json<CoreConcept>, ApiError> {
    Ok(Json(app.use_cases.bible.generate_core(user, partial).await?))
}

async fn generate_characters(
    State(app): State<Arc<App>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<CharacterProfile>>, ApiError> {
    let project_id = ProjectId::from_uuid(id);
    owned_bible(&app, project_id, user).await?;
    Ok(Json(app.use_cases.bible.generate_characters(project_id).await?))
}

async fn generate_outline(
    State(app): State<Arc<App>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<OutlineEntry>>, ApiError> {
    let project_id = ProjectId::from_uuid(id);
    owned_bible(&app, project_id, user).await?;
    Ok(Json(app.use_cases.bible.generate_outline(project_id).await?))
}

async fn generate_instructions(
    State(app): State<Arc<App>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<WritingInstructions>, ApiError> {
    let project_id = ProjectId::from_uuid(id);
    owned_bible(&app, project_id, user).await?;
    Ok(Json(app.use_cases.bible.generate_instructions(project_id).await?))
}

// =============================================================================
// Chapters
// =============================================================================

async fn list_slots(
    State(app): State<Arc<App>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<SlotView>>, ApiError> {
    let project_id = ProjectId::from_uuid(id);
    owned_bible(&app, project_id, user).await?;
    Ok(Json(app.use_cases.sequence.slot_states(project_id).await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CanGenerateResponse {
    allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

async fn can_generate(
    State(app): State<Arc<App>>,
    CurrentUser(user): CurrentUser,
    Path((id, outline_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CanGenerateResponse>, ApiError> {
    let project_id = ProjectId::from_uuid(id);
    owned_bible(&app, project_id, user).await?;
    let verdict = app
        .use_cases
        .sequence
        .can_generate(project_id, OutlineId::from_uuid(outline_id))
        .await;
    match verdict {
        Ok(()) => Ok(Json(CanGenerateResponse {
            allowed: true,
            reason: None,
        })),
        Err(SequenceQueryError::Sequence(SequenceError::UnknownEntry(_))) => Err(ApiError::NotFound),
        Err(SequenceQueryError::Sequence(e)) => Ok(Json(CanGenerateResponse {
            allowed: false,
            reason: Some(e.to_string()),
        })),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContextQuery {
    rewrite_instructions: Option<String>,
}

#[derive(Debug, Serialize)]
struct ContextResponse {
    context: String,
}

async fn get_context(
    State(app): State<Arc<App>>,
    CurrentUser(user): CurrentUser,
    Path((id, outline_id)): Path<(Uuid, Uuid)>,
    Query(query): Query<ContextQuery>,
) -> Result<Json<ContextResponse>, ApiError> {
    let project_id = ProjectId::from_uuid(id);
    owned_bible(&app, project_id, user).await?;
    let context = app
        .use_cases
        .sequence
        .get_context(
            project_id,
            OutlineId::from_uuid(outline_id),
            query.rewrite_instructions.as_deref(),
        )
        .await?;
    Ok(Json(ContextResponse { context }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GenerateChapterRequest {
    /// Twice the bible's target length, at the long-chapter price.
    long: bool,
    rewrite_instructions: Option<String>,
}

/// Start a generation and stream its events as server-sent events.
///
/// Closing the stream cancels the generation.
async fn generate_chapter(
    State(app): State<Arc<App>>,
    CurrentUser(user): CurrentUser,
    Path((id, outline_id)): Path<(Uuid, Uuid)>,
    body: Option<Json<GenerateChapterRequest>>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let project_id = ProjectId::from_uuid(id);
    let outline_id = OutlineId::from_uuid(outline_id);
    owned_bible(&app, project_id, user).await?;

    // Refuse up front so a locked or busy slot gets a plain status code;
    // the generator repeats the check under its lease.
    app.use_cases
        .sequence
        .can_generate(project_id, outline_id)
        .await?;

    let Json(body) = body.unwrap_or_default();
    let kind = if body.long {
        GenerationKind::ChapterLong
    } else {
        GenerationKind::ChapterNormal
    };
    let handle = app.use_cases.chapters.spawn(GenerateChapter {
        project_id,
        outline_id,
        user_id: user,
        kind,
        rewrite_instructions: body
            .rewrite_instructions
            .filter(|text| !text.trim().is_empty()),
    });

    let events = stream::unfold(handle.events, |mut events| async move {
        let event = events.recv().await?;
        Some((Ok(to_sse_event(&event)), events))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_sse_event(event: &GenerationEvent) -> Event {
    let name = match event {
        GenerationEvent::Stage { .. } => "stage",
        GenerationEvent::Fragment { .. } => "fragment",
        GenerationEvent::Completed { .. } => "completed",
        GenerationEvent::Failed { .. } => "failed",
    };
    Event::default()
        .event(name)
        .json_data(event)
        .unwrap_or_else(|e| Event::default().event("failed").data(e.to_string()))
}

async fn retry_analysis(
    State(app): State<Arc<App>>,
    CurrentUser(user): CurrentUser,
    Path((id, outline_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Chapter>, ApiError> {
    let project_id = ProjectId::from_uuid(id);
    owned_bible(&app, project_id, user).await?;
    let generated = app
        .use_cases
        .chapters
        .retry_analysis(project_id, OutlineId::from_uuid(outline_id))
        .await?;
    Ok(Json(generated.chapter))
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    cancelled: bool,
}

async fn cancel_generation(
    State(app): State<Arc<App>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<CancelResponse>, ApiError> {
    let project_id = ProjectId::from_uuid(id);
    owned_bible(&app, project_id, user).await?;
    Ok(Json(CancelResponse {
        cancelled: app.use_cases.chapters.cancel(project_id),
    }))
}

async fn export_project(
    State(app): State<Arc<App>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ManuscriptExport>, ApiError> {
    let project_id = ProjectId::from_uuid(id);
    owned_bible(&app, project_id, user).await?;
    Ok(Json(app.use_cases.export.execute(project_id).await?))
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug)]
pub enum ApiError {
    NotFound,
    Unauthorized,
    BadRequest(String),
    /// Sequence lock or a generation already running.
    Conflict(String),
    PaymentRequired(String),
    /// The bible is not complete enough for the request.
    Unprocessable(String),
    /// The model failed or answered with something unusable.
    BadGateway(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Not found").into_response(),
            ApiError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "Missing X-User-Id header").into_response()
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
            ApiError::PaymentRequired(msg) => (StatusCode::PAYMENT_REQUIRED, msg).into_response(),
            ApiError::Unprocessable(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, msg).into_response()
            }
            ApiError::BadGateway(msg) => {
                tracing::warn!(error = %msg, "Model call failed");
                (StatusCode::BAD_GATEWAY, msg).into_response()
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        if e.is_not_found() {
            ApiError::NotFound
        } else {
            ApiError::Internal(e.to_string())
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        match e {
            DomainError::NotFound { .. } => ApiError::NotFound,
            DomainError::InvalidId(_) => ApiError::BadRequest(e.to_string()),
            DomainError::Constraint(_) => ApiError::Conflict(e.to_string()),
            _ => ApiError::Unprocessable(e.to_string()),
        }
    }
}

impl From<SequenceError> for ApiError {
    fn from(e: SequenceError) -> Self {
        match e {
            SequenceError::UnknownEntry(_) => ApiError::NotFound,
            _ => ApiError::Conflict(e.to_string()),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds { .. } => ApiError::PaymentRequired(e.to_string()),
            LedgerError::InvalidAmount => ApiError::BadRequest(e.to_string()),
            LedgerError::BalanceOverflow { .. } => ApiError::Conflict(e.to_string()),
            LedgerError::Repo(e) => e.into(),
        }
    }
}

impl From<SequenceQueryError> for ApiError {
    fn from(e: SequenceQueryError) -> Self {
        match e {
            SequenceQueryError::ProjectNotFound(_) => ApiError::NotFound,
            SequenceQueryError::Sequence(e) => e.into(),
            SequenceQueryError::Repo(e) => e.into(),
        }
    }
}

impl From<ExtractionError> for ApiError {
    fn from(e: ExtractionError) -> Self {
        match e {
            ExtractionError::EmptyProse => ApiError::Unprocessable(e.to_string()),
            _ => ApiError::BadGateway(e.to_string()),
        }
    }
}

impl From<GenerationError> for ApiError {
    fn from(e: GenerationError) -> Self {
        match e {
            GenerationError::ProjectNotFound(_) => ApiError::NotFound,
            GenerationError::Sequence(e) => e.into(),
            GenerationError::Precondition(e) => e.into(),
            GenerationError::Credits(e) => e.into(),
            GenerationError::Stream(_) => ApiError::BadGateway(e.to_string()),
            GenerationError::Extraction(e) => e.into(),
            GenerationError::Cancelled => ApiError::Conflict(e.to_string()),
            GenerationError::NothingToAnalyze(_) | GenerationError::PartialDraft(_) => {
                ApiError::Unprocessable(e.to_string())
            }
            GenerationError::TaskAborted(_) => ApiError::Internal(e.to_string()),
            GenerationError::Repo(e) => e.into(),
        }
    }
}

impl From<AssistError> for ApiError {
    fn from(e: AssistError) -> Self {
        match e {
            AssistError::ProjectNotFound(_) => ApiError::NotFound,
            AssistError::Precondition(e) => e.into(),
            AssistError::Credits(e) => e.into(),
            AssistError::Llm(_) | AssistError::EmptyResult(_) => ApiError::BadGateway(e.to_string()),
            AssistError::Repo(e) => e.into(),
        }
    }
}

impl From<ExportError> for ApiError {
    fn from(e: ExportError) -> Self {
        match e {
            ExportError::ProjectNotFound(_) => ApiError::NotFound,
            ExportError::Repo(e) => e.into(),
        }
    }
}
