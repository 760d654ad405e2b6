//! HTTP surface of the clearing engine

use actix_web::{web, HttpResponse};
use clearing_core::{ClearingEngine, ClearingError, InclusionStatus, RegisterInstruction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Shared application state
pub struct AppState {
    /// The clearing engine
    pub engine: Arc<ClearingEngine>,
}

/// Error body returned to external callers
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code
    pub code: String,
    /// Human-readable message
    pub message: String,
}

fn error_response(err: &ClearingError) -> HttpResponse {
    let body = ErrorBody {
        code: err.code().to_string(),
        message: err.to_string(),
    };

    match err {
        ClearingError::NoOpenCycle
        | ClearingError::CycleNotFound(_)
        | ClearingError::InstructionNotFound(_) => HttpResponse::NotFound().json(body),
        ClearingError::AlreadyClosed(_) | ClearingError::DuplicateInstruction(_) => {
            HttpResponse::Conflict().json(body)
        }
        ClearingError::InvalidAmount(_) => HttpResponse::BadRequest().json(body),
        ClearingError::DispatchFailed(_) => HttpResponse::BadGateway().json(body),
        ClearingError::UnbalancedCycle { .. }
        | ClearingError::Config(_)
        | ClearingError::Serialization(_)
        | ClearingError::Internal(_) => HttpResponse::InternalServerError().json(body),
    }
}

/// Register service routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/cycles", web::get().to(list_cycles))
            .route("/cycles/current", web::get().to(current_cycle))
            .route("/cycles/{id}", web::get().to(get_cycle))
            .route("/cycles/{id}/positions", web::get().to(get_positions))
            .route("/cycles/{id}/instructions", web::get().to(get_instructions))
            .route(
                "/cycles/{id}/settlement-file",
                web::get().to(get_settlement_file),
            )
            .route("/cycles/{id}/close", web::post().to(close_cycle))
            .route("/instructions", web::post().to(register_instruction))
            .route(
                "/instructions/{id}/inclusion",
                web::put().to(set_inclusion),
            ),
    )
    .route("/health", web::get().to(health))
    .route("/metrics", web::get().to(metrics));
}

async fn list_cycles(state: web::Data<AppState>) -> HttpResponse {
    match state.engine.list_cycles().await {
        Ok(cycles) => HttpResponse::Ok().json(cycles),
        Err(e) => error_response(&e),
    }
}

async fn current_cycle(state: web::Data<AppState>) -> HttpResponse {
    match state.engine.current_open_cycle() {
        Ok(cycle) => HttpResponse::Ok().json(cycle),
        Err(e) => error_response(&e),
    }
}

async fn get_cycle(state: web::Data<AppState>, path: web::Path<i64>) -> HttpResponse {
    match state.engine.cycle(path.into_inner()) {
        Ok(cycle) => HttpResponse::Ok().json(cycle),
        Err(e) => error_response(&e),
    }
}

async fn get_positions(state: web::Data<AppState>, path: web::Path<i64>) -> HttpResponse {
    match state.engine.positions(path.into_inner()) {
        Ok(positions) => HttpResponse::Ok().json(positions),
        Err(e) => error_response(&e),
    }
}

async fn get_instructions(state: web::Data<AppState>, path: web::Path<i64>) -> HttpResponse {
    match state.engine.instructions(path.into_inner()) {
        Ok(instructions) => HttpResponse::Ok().json(instructions),
        Err(e) => error_response(&e),
    }
}

async fn get_settlement_file(state: web::Data<AppState>, path: web::Path<i64>) -> HttpResponse {
    let cycle_id = path.into_inner();
    match state.engine.artifact(cycle_id) {
        Ok(Some(artifact)) => HttpResponse::Ok().json(artifact),
        Ok(None) => HttpResponse::NotFound().json(ErrorBody {
            code: "SETTLEMENT_FILE_NOT_GENERATED".to_string(),
            message: format!("cycle {} has not closed yet", cycle_id),
        }),
        Err(e) => error_response(&e),
    }
}

/// Optional closure parameters
#[derive(Debug, Deserialize)]
pub struct CloseParams {
    /// Duration in minutes for the successor cycle; configured default
    /// when absent
    pub next_duration_minutes: Option<i64>,
}

async fn close_cycle(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    params: web::Query<CloseParams>,
) -> HttpResponse {
    match state
        .engine
        .close_cycle(path.into_inner(), params.next_duration_minutes)
        .await
    {
        Ok(closure) => HttpResponse::Ok().json(closure),
        Err(e) => {
            warn!("Cycle closure rejected: {}", e);
            error_response(&e)
        }
    }
}

async fn register_instruction(
    state: web::Data<AppState>,
    request: web::Json<RegisterInstruction>,
) -> HttpResponse {
    match state.engine.register_instruction(request.into_inner()).await {
        Ok(instruction) => HttpResponse::Created().json(instruction),
        Err(e) => error_response(&e),
    }
}

/// Inclusion override request body
#[derive(Debug, Deserialize)]
pub struct InclusionRequest {
    /// Target inclusion status
    pub status: InclusionStatus,
}

async fn set_inclusion(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    request: web::Json<InclusionRequest>,
) -> HttpResponse {
    match state
        .engine
        .set_inclusion_status(path.into_inner(), request.status)
        .await
    {
        Ok(instruction) => HttpResponse::Ok().json(instruction),
        Err(e) => error_response(&e),
    }
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "UP" }))
}

async fn metrics(state: web::Data<AppState>) -> HttpResponse {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let families = state.engine.metrics().registry().gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        return HttpResponse::InternalServerError().body(format!("metrics encode: {}", e));
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
