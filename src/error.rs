// region:    --- Imports
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::fmt;

// endregion: --- Imports

// region:    --- Error Taxonomy

/// Engine error taxonomy. Every operation failure carries a stable reason
/// code; validation and authorization failures occur before any mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuctionError {
    /// Malformed input, stale bid amount, wrong status, self-bid.
    Validation(String),
    /// Reservation or transfer could not be funded.
    InsufficientFunds,
    /// Optimistic version check failed after exhausted retries.
    Conflict,
    /// Caller lacks rights for the operation.
    Forbidden(String),
    /// Listing or item does not exist.
    NotFound(String),
    /// Unexpected downstream failure; the whole transaction was rolled back.
    Internal(String),
}

impl AuctionError {
    pub fn code(&self) -> &'static str {
        match self {
            AuctionError::Validation(_) => "VALIDATION",
            AuctionError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            AuctionError::Conflict => "CONFLICT",
            AuctionError::Forbidden(_) => "FORBIDDEN",
            AuctionError::NotFound(_) => "NOT_FOUND",
            AuctionError::Internal(_) => "INTERNAL",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AuctionError::Validation(_) => StatusCode::BAD_REQUEST,
            AuctionError::InsufficientFunds => StatusCode::PAYMENT_REQUIRED,
            AuctionError::Conflict => StatusCode::CONFLICT,
            AuctionError::Forbidden(_) => StatusCode::FORBIDDEN,
            AuctionError::NotFound(_) => StatusCode::NOT_FOUND,
            AuctionError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for AuctionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuctionError::Validation(msg) => write!(f, "{msg}"),
            AuctionError::InsufficientFunds => write!(f, "insufficient available funds"),
            AuctionError::Conflict => write!(f, "concurrent modification, retries exhausted"),
            AuctionError::Forbidden(msg) => write!(f, "{msg}"),
            AuctionError::NotFound(msg) => write!(f, "{msg}"),
            AuctionError::Internal(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for AuctionError {}

impl From<sqlx::Error> for AuctionError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AuctionError::NotFound("row not found".to_string()),
            other => AuctionError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AuctionError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": self.to_string(),
            "code": self.code(),
        }));
        (self.status(), body).into_response()
    }
}

// endregion: --- Error Taxonomy

// region:    --- Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(AuctionError::Validation("x".into()).code(), "VALIDATION");
        assert_eq!(AuctionError::InsufficientFunds.code(), "INSUFFICIENT_FUNDS");
        assert_eq!(AuctionError::Conflict.code(), "CONFLICT");
        assert_eq!(AuctionError::Forbidden("x".into()).code(), "FORBIDDEN");
        assert_eq!(AuctionError::NotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(AuctionError::Internal("x".into()).code(), "INTERNAL");
    }

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err: AuctionError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}

// endregion: --- Tests
