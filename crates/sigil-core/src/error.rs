//! Error taxonomy for the SIGIL system.
//!
//! Every failure surfaced by the service maps onto one of five public
//! codes. Storage, crypto, and messaging detail never crosses the
//! service boundary; those variants all collapse to `internal`.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("invalid {field}: {message}")]
    InvalidField { field: String, message: String },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("database error: {0}")]
    Database(String),

    #[error("cryptography error: {0}")]
    Crypto(String),

    #[error("messaging error: {0}")]
    Messaging(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Public error codes, rendered into response bodies and mapped onto
/// HTTP statuses by the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidToken,
    InvalidField,
    BadRequest,
    NotFound,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidToken => "invalid_token",
            ErrorCode::InvalidField => "invalid_field",
            ErrorCode::BadRequest => "bad_request",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Internal => "internal",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::InvalidToken => 401,
            ErrorCode::InvalidField | ErrorCode::BadRequest => 400,
            ErrorCode::NotFound => 404,
            ErrorCode::Internal => 500,
        }
    }
}

impl Error {
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Error::InvalidToken(message.into())
    }

    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::InvalidField {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest(message.into())
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidToken(_) => ErrorCode::InvalidToken,
            Error::InvalidField { .. } => ErrorCode::InvalidField,
            Error::BadRequest(_) => ErrorCode::BadRequest,
            Error::NotFound { .. } => ErrorCode::NotFound,
            Error::Database(_) | Error::Crypto(_) | Error::Messaging(_) | Error::Internal(_) => {
                ErrorCode::Internal
            }
        }
    }

    /// The message safe to render to a client. Variants carrying
    /// infrastructure detail are replaced with a terse generic line.
    pub fn public_message(&self) -> String {
        match self.code() {
            ErrorCode::Internal => "an internal error occurred".into(),
            _ => self.to_string(),
        }
    }
}

/// Wire shape of an error response: `{"error":{"code","message"}}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        ErrorBody {
            error: ErrorDetail {
                code: err.code(),
                message: err.public_message(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_statuses() {
        assert_eq!(Error::invalid_token("x").code().http_status(), 401);
        assert_eq!(Error::invalid_field("code", "x").code().http_status(), 400);
        assert_eq!(Error::bad_request("x").code().http_status(), 400);
        assert_eq!(Error::not_found("user", "1").code().http_status(), 404);
        assert_eq!(Error::internal("x").code().http_status(), 500);
    }

    #[test]
    fn internal_detail_is_not_disclosed() {
        let err = Error::Database("connection refused to 10.0.0.3:5432".into());
        assert_eq!(err.code(), ErrorCode::Internal);
        assert_eq!(err.public_message(), "an internal error occurred");
    }

    #[test]
    fn error_body_wire_shape() {
        let err = Error::invalid_token("token is revoked");
        let body = serde_json::to_value(ErrorBody::from(&err)).unwrap();
        assert_eq!(body["error"]["code"], "invalid_token");
        assert_eq!(body["error"]["message"], "invalid token: token is revoked");
    }
}
