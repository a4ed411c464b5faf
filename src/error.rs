//! 统一的请求错误类型与转换。

use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::fmt;
use std::io::ErrorKind;

use crate::storage::StorageError;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound,
    Forbidden,
    MethodNotAllowed,
    Conflict(String),
    LengthRequired,
    PayloadTooLarge(u64),
    RequestTimeout,
    Internal(String),
}

impl ApiError {
    /// 是否属于服务端故障（需要以 ERROR 级别记录）。
    pub fn is_server_fault(&self) -> bool {
        matches!(self, ApiError::Internal(_))
    }

    /// 隐藏内部错误细节，用于 `--quiet-errors`。
    pub fn redacted(self) -> Self {
        match self {
            ApiError::Internal(_) => ApiError::Internal("internal error".into()),
            other => other,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {msg}"),
            ApiError::NotFound => f.write_str("Not Found"),
            ApiError::Forbidden => f.write_str("Forbidden"),
            ApiError::MethodNotAllowed => f.write_str("Method Not Allowed"),
            ApiError::Conflict(msg) => write!(f, "Conflict: {msg}"),
            ApiError::LengthRequired => f.write_str("Length Required: Content-Length is missing"),
            ApiError::PayloadTooLarge(limit) => {
                write!(f, "Payload Too Large: limit is {limit} bytes")
            }
            ApiError::RequestTimeout => f.write_str("Request Timeout"),
            ApiError::Internal(msg) => write!(f, "Internal Server Error: {msg}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = self.to_string();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::MethodNotAllowed => {
                headers.insert(header::ALLOW, HeaderValue::from_static("GET, POST"));
                StatusCode::METHOD_NOT_ALLOWED
            }
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::LengthRequired => StatusCode::LENGTH_REQUIRED,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RequestTimeout => StatusCode::REQUEST_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, headers, body).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidPath(msg) => ApiError::BadRequest(msg),
            StorageError::OutsideRoot => ApiError::Forbidden,
            StorageError::Io(err) => match err.kind() {
                ErrorKind::NotFound => ApiError::NotFound,
                _ => ApiError::Internal(err.to_string()),
            },
        }
    }
}
