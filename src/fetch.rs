//! 控制台抓取：从 URL 下载文件到当前服务目录。

use reqwest::{Client, Url};
use std::fmt;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::time::Duration;
use tracing::info;

use crate::upload::{FileStore, StoreError};

const FETCH_TIMEOUT_SECS: u64 = 600;

#[derive(Debug)]
pub enum FetchError {
    InvalidUrl(String),
    NoFileName,
    Http(reqwest::Error),
    Store(StoreError),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::InvalidUrl(msg) => write!(f, "invalid url: {msg}"),
            FetchError::NoFileName => f.write_str("url does not name a file"),
            FetchError::Http(err) => write!(f, "download failed: {err}"),
            FetchError::Store(err) => write!(f, "could not store file: {err}"),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Http(err)
    }
}

impl From<StoreError> for FetchError {
    fn from(err: StoreError) -> Self {
        FetchError::Store(err)
    }
}

/// 控制台使用的 HTTP 客户端。
pub fn build_client() -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
        .build()
}

/// URL 路径最后一段（解码后）作为文件名。
pub fn file_name_from_url(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    let decoded = urlencoding::decode(last).ok()?;
    let name = decoded.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// 下载 `url` 到 `dir`，重名按存储策略处理，返回最终路径。
pub async fn fetch_into(
    client: &Client,
    store: &FileStore,
    dir: &Path,
    url: &str,
) -> Result<PathBuf, FetchError> {
    let url = Url::parse(url.trim()).map_err(|err| FetchError::InvalidUrl(err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(FetchError::InvalidUrl(format!(
            "unsupported scheme {}",
            url.scheme()
        )));
    }
    let name = file_name_from_url(&url).ok_or(FetchError::NoFileName)?;

    let response = client.get(url.clone()).send().await?.error_for_status()?;
    let chunks = pin!(response.bytes_stream());
    let stored = store.store_stream(dir, &name, chunks).await?;
    info!(%url, path = ?stored, "fetched file");
    Ok(stored)
}
