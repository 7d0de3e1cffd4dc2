use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use engine::LedgerError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("no price available for {0} yet")]
    NoPrice(String),
    #[error("unknown symbol {0}")]
    UnknownSymbol(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Ledger(e) => match e {
                LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
                LedgerError::InsufficientCash { .. } => StatusCode::PAYMENT_REQUIRED,
                LedgerError::SessionNotFound(_) | LedgerError::PlayerNotFound(_) => StatusCode::NOT_FOUND,
                LedgerError::NotHost => StatusCode::FORBIDDEN,
                LedgerError::SessionFull
                | LedgerError::AlreadyFinished
                | LedgerError::NotStarted
                | LedgerError::AlreadyJoined(_)
                | LedgerError::DuplicateSession(_) => StatusCode::CONFLICT,
                LedgerError::Contention { .. } => StatusCode::SERVICE_UNAVAILABLE,
            },
            ApiError::NoPrice(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::UnknownSymbol(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Ledger(e) => match e {
                LedgerError::Validation(_) => "validation",
                LedgerError::InsufficientCash { .. } => "insufficient_cash",
                LedgerError::SessionNotFound(_) => "session_not_found",
                LedgerError::PlayerNotFound(_) => "player_not_found",
                LedgerError::NotHost => "not_host",
                LedgerError::SessionFull => "session_full",
                LedgerError::AlreadyFinished => "already_finished",
                LedgerError::NotStarted => "not_started",
                LedgerError::AlreadyJoined(_) => "already_joined",
                LedgerError::DuplicateSession(_) => "duplicate_session",
                LedgerError::Contention { .. } => "contention",
            },
            ApiError::NoPrice(_) => "no_price",
            ApiError::UnknownSymbol(_) => "unknown_symbol",
            ApiError::Conflict(_) => "conflict",
            ApiError::BadRequest(_) => "bad_request",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = axum::Json(json!({
            "error": self.to_string(),
            "code": self.code(),
            "retryable": matches!(&self, ApiError::Ledger(e) if e.is_transient()),
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
