//! 请求分发：GET 浏览/下载，POST 上传，每个请求写一行审计日志。

use axum::body::{Body as AxumBody, Bytes};
use axum::extract::{Extension, connect_info::ConnectInfo};
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Router, middleware};
use futures_util::stream::{self, Stream, StreamExt};
use httpdate::fmt_http_date;
use std::fmt;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::time::{self, Instant};
use tokio_util::io::ReaderStream;
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, error, warn};

use crate::audit::{AuditLog, Severity};
use crate::config::{TIMEOUT_BACKSTOP_SECS, UPLOAD_HEADER_NAME};
use crate::error::ApiError;
use crate::http::add_security_headers;
use crate::listing::render_listing;
use crate::storage::{ResolvedTarget, Storage};
use crate::upload::{FileStore, StoreError, UploadConfig};

/// 响应相关的开关。
#[derive(Clone, Copy, Debug)]
pub struct ResponseOptions {
    /// 是否在 5xx 响应体中附带内部错误信息。
    pub verbose_errors: bool,
    /// 单个请求（含接收上传请求体）的处理时限。
    pub request_timeout: Duration,
}

struct Handled {
    response: Response,
    stored: Option<PathBuf>,
}

impl From<Response> for Handled {
    fn from(response: Response) -> Self {
        Self {
            response,
            stored: None,
        }
    }
}

/// 组装服务路由：统一入口、安全响应头与共享状态。
///
/// 外层 `TimeoutLayer` 只是兜底，正常的超时在 `dispatch` 内部处理并写入审计日志。
pub fn router(
    storage: Arc<Storage>,
    store: Arc<FileStore>,
    uploads: Arc<UploadConfig>,
    audit: Arc<AuditLog>,
    options: ResponseOptions,
) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(middleware::from_fn(add_security_headers))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            options.request_timeout + Duration::from_secs(TIMEOUT_BACKSTOP_SECS),
        ))
        .layer(Extension(storage))
        .layer(Extension(store))
        .layer(Extension(uploads))
        .layer(Extension(audit))
        .layer(Extension(options))
}

/// 所有路径、所有方法的统一入口。
///
/// 处理在独立任务中进行：连接断开或外层超时丢弃本 future 时，审计记录照常写入。
pub async fn dispatch(
    ConnectInfo(client): ConnectInfo<SocketAddr>,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(store): Extension<Arc<FileStore>>,
    Extension(uploads): Extension<Arc<UploadConfig>>,
    Extension(audit): Extension<Arc<AuditLog>>,
    Extension(options): Extension<ResponseOptions>,
    request: Request<AxumBody>,
) -> Response {
    let task = tokio::spawn(handle(
        client, storage, store, uploads, audit, options, request,
    ));
    match task.await {
        Ok(response) => response,
        Err(err) => {
            error!(%client, error = %err, "request task failed");
            ApiError::Internal("request task failed".into()).into_response()
        }
    }
}

async fn handle(
    client: SocketAddr,
    storage: Arc<Storage>,
    store: Arc<FileStore>,
    uploads: Arc<UploadConfig>,
    audit: Arc<AuditLog>,
    options: ResponseOptions,
    request: Request<AxumBody>,
) -> Response {
    let (parts, body) = request.into_parts();
    let raw_path = parts
        .uri
        .path_and_query()
        .map(|value| value.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let deadline = Instant::now() + options.request_timeout;

    let outcome = match parts.method {
        Method::GET => {
            let work = serve_get(&storage, parts.uri.path());
            match time::timeout_at(deadline, work).await {
                Ok(result) => result.map(Handled::from),
                Err(_) => Err(ApiError::RequestTimeout),
            }
        }
        Method::POST => serve_post(&parts.headers, body, &store, &uploads, deadline).await,
        _ => Err(ApiError::MethodNotAllowed),
    };

    let mut line = format!(
        "{} {}:{} ({raw_path})",
        parts.method,
        client.ip(),
        client.port()
    );
    match outcome {
        Ok(handled) => {
            if let Some(stored) = &handled.stored {
                line.push_str(&format!(" - {}", stored.display()));
            }
            audit.log(Severity::Info, &line).await;
            handled.response
        }
        Err(err) => {
            let severity = if err.is_server_fault() {
                line.push_str(&format!(" - {err}"));
                Severity::Error
            } else if matches!(err, ApiError::Forbidden) {
                line.push_str(" - path escapes serving root");
                Severity::Warning
            } else {
                Severity::Info
            };
            audit.log(severity, &line).await;
            if options.verbose_errors {
                err.into_response()
            } else {
                err.redacted().into_response()
            }
        }
    }
}

async fn serve_get(storage: &Storage, raw_path: &str) -> Result<Response, ApiError> {
    match storage.resolve(raw_path).await? {
        ResolvedTarget::Directory(dir) => serve_listing(storage, &dir).await,
        ResolvedTarget::File(path) => serve_file(&path).await,
        ResolvedTarget::Missing => Err(ApiError::NotFound),
    }
}

/// 目录枚举失败按 404 处理。
async fn serve_listing(storage: &Storage, dir: &Path) -> Result<Response, ApiError> {
    let entries = storage.list_dir(dir).await.map_err(|err| {
        warn!(path = ?dir, error = %err, "directory enumeration failed");
        ApiError::NotFound
    })?;
    let relative = storage.relative_url(dir).unwrap_or_default();
    debug!(path = %relative, count = entries.len(), "list directory");
    let body = render_listing(&relative, &entries);
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        body,
    )
        .into_response())
}

/// 以 `application/octet-stream` 流式返回文件内容。
async fn serve_file(path: &Path) -> Result<Response, ApiError> {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Err(ApiError::NotFound),
        Err(err) => return Err(ApiError::Internal(err.to_string())),
    };
    let metadata = file
        .metadata()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    if let Ok(modified) = metadata.modified()
        && let Ok(value) = HeaderValue::from_str(&fmt_http_date(modified))
    {
        headers.insert(header::LAST_MODIFIED, value);
    }

    debug!(path = ?path, size = metadata.len(), "download file");
    let stream = ReaderStream::new(file);
    Ok((StatusCode::OK, headers, AxumBody::from_stream(stream)).into_response())
}

async fn serve_post(
    headers: &HeaderMap,
    body: AxumBody,
    store: &FileStore,
    uploads: &UploadConfig,
    deadline: Instant,
) -> Result<Handled, ApiError> {
    let file_name = headers
        .get(UPLOAD_HEADER_NAME)
        .map(|value| {
            std::str::from_utf8(value.as_bytes())
                .map_err(|_| ApiError::BadRequest("Filename is not valid UTF-8".into()))
        })
        .transpose()?
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Filename is missing".into()))?;

    let declared = headers
        .get(header::CONTENT_LENGTH)
        .ok_or(ApiError::LengthRequired)?
        .to_str()
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .ok_or_else(|| ApiError::BadRequest("invalid Content-Length".into()))?;
    if declared > uploads.max_size {
        return Err(ApiError::PayloadTooLarge(uploads.max_size));
    }

    let chunks = exact_length(body, declared, deadline);
    let stored = match store.store_stream(&uploads.dir, file_name, chunks).await {
        Ok(stored) => stored,
        Err(StoreError::Interrupted(_)) if Instant::now() >= deadline => {
            return Err(ApiError::RequestTimeout);
        }
        Err(err) => return Err(err.into()),
    };
    Ok(Handled {
        response: (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "File uploaded successfully",
        )
            .into_response(),
        stored: Some(stored),
    })
}

#[derive(Debug)]
enum BodyError {
    Transport(String),
    TooLong(u64),
    TooShort { received: u64, declared: u64 },
    TimedOut,
}

impl fmt::Display for BodyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BodyError::Transport(err) => write!(f, "upload body interrupted: {err}"),
            BodyError::TooLong(declared) => {
                write!(f, "body longer than Content-Length ({declared} bytes)")
            }
            BodyError::TooShort { received, declared } => write!(
                f,
                "body shorter than Content-Length ({received} of {declared} bytes)"
            ),
            BodyError::TimedOut => f.write_str("upload body timed out"),
        }
    }
}

/// 逐块转发请求体，确保总长度恰好等于 `declared`，并在 `deadline` 后中止。
fn exact_length(
    body: AxumBody,
    declared: u64,
    deadline: Instant,
) -> impl Stream<Item = Result<Bytes, BodyError>> + Send + Unpin {
    let state = Some((body.into_data_stream(), 0u64));
    Box::pin(stream::unfold(state, move |state| async move {
        let (mut data, received) = state?;
        let Ok(next) = time::timeout_at(deadline, data.next()).await else {
            return Some((Err(BodyError::TimedOut), None));
        };
        match next {
            Some(Ok(chunk)) => {
                let received = received + chunk.len() as u64;
                if received > declared {
                    Some((Err(BodyError::TooLong(declared)), None))
                } else {
                    Some((Ok(chunk), Some((data, received))))
                }
            }
            Some(Err(err)) => Some((Err(BodyError::Transport(err.to_string())), None)),
            None if received < declared => {
                Some((Err(BodyError::TooShort { received, declared }), None))
            }
            None => None,
        }
    }))
}
