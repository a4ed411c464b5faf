//! HTTP 辅助工具：安全响应头与对外地址。

use axum::body::Body as AxumBody;
use axum::http::{HeaderValue, Request, StatusCode, header};
use axum::{middleware, response::Response};
use std::net::{IpAddr, Ipv4Addr};

/// 添加基础安全响应头。
pub async fn add_security_headers(
    request: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, StatusCode> {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    Ok(response)
}

/// 生成 URL 与客户端命令时使用的主机名。
///
/// 监听 `0.0.0.0`/`::` 时无法得知对端可达的地址，退回到 `127.0.0.1`。
pub fn advertise_host(bind: IpAddr, explicit: Option<&str>) -> String {
    if let Some(host) = explicit.map(str::trim).filter(|host| !host.is_empty()) {
        return host.to_string();
    }
    let ip = if bind.is_unspecified() {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        bind
    };
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{v6}]"),
    }
}

/// `http://host:port`
pub fn base_url(host: &str, port: u16) -> String {
    format!("http://{host}:{port}")
}
