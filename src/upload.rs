//! 上传文件落盘：文件名校验、冲突策略、同名串行化与原子替换。

use futures_util::stream::{self, Stream, StreamExt};
use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::atomic::AtomicFile;
use crate::audit::AuditLog;
use crate::config::{CollisionPolicy, DEFAULT_LOCK_WAIT_TIMEOUT_SECS};
use crate::error::ApiError;
use crate::locking::LockManager;
use crate::naming::choose_target;
use crate::storage::Storage;

#[derive(Debug)]
pub struct UploadConfig {
    /// 接收上传的目录（不在服务目录之内）。
    pub dir: PathBuf,
    pub max_size: u64,
}

#[derive(Debug)]
pub enum StoreError {
    InvalidName(String),
    AlreadyExists(String),
    Busy,
    /// 数据源（请求体或下载流）中断或长度不符。
    Interrupted(String),
    Io(io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::InvalidName(name) => write!(f, "invalid file name {name:?}"),
            StoreError::AlreadyExists(name) => write!(f, "{name} already exists"),
            StoreError::Busy => f.write_str("target is busy"),
            StoreError::Interrupted(msg) => f.write_str(msg),
            StoreError::Io(err) => err.fmt(f),
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::InvalidName(_) => ApiError::BadRequest(error.to_string()),
            StoreError::AlreadyExists(_) | StoreError::Busy => ApiError::Conflict(error.to_string()),
            StoreError::Interrupted(msg) => ApiError::BadRequest(msg),
            StoreError::Io(err) => ApiError::Internal(err.to_string()),
        }
    }
}

/// 上传目录落在服务目录之内时，上传的文件可被 GET 取回；记录一条 WARNING。
pub async fn audit_uploads_location(
    storage: &Storage,
    uploads_dir: &Path,
    audit: &AuditLog,
) -> bool {
    if !uploads_dir.starts_with(storage.root_path()) {
        return false;
    }
    audit
        .warning(&format!(
            "Uploads directory {} is inside the served tree",
            uploads_dir.display()
        ))
        .await;
    true
}

/// 校验客户端声明的文件名：必须是单个普通路径段。
pub fn sanitize_file_name(declared: &str) -> Result<&str, StoreError> {
    let name = declared.trim();
    if name.is_empty() || name.contains(['/', '\\', '\0']) {
        return Err(StoreError::InvalidName(declared.to_string()));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(StoreError::InvalidName(declared.to_string())),
    }
}

/// 按统一冲突策略写入文件；上传与控制台抓取共用。
#[derive(Debug)]
pub struct FileStore {
    policy: CollisionPolicy,
    locks: LockManager,
}

impl FileStore {
    pub fn new(policy: CollisionPolicy) -> Self {
        Self {
            policy,
            locks: LockManager::new(),
        }
    }

    /// 写入完整内容，返回最终存储路径。
    pub async fn store_bytes(
        &self,
        dir: &Path,
        declared_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, StoreError> {
        self.store_stream(dir, declared_name, stream::iter([Ok::<_, io::Error>(bytes)]))
            .await
    }

    /// 以流的方式写入；流出错时丢弃临时文件。
    pub async fn store_stream<S, B, E>(
        &self,
        dir: &Path,
        declared_name: &str,
        mut chunks: S,
    ) -> Result<PathBuf, StoreError>
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: fmt::Display,
    {
        let name = sanitize_file_name(declared_name)?;
        let _guard = self
            .locks
            .lock_path_with_timeout(
                &dir.join(name),
                Duration::from_secs(DEFAULT_LOCK_WAIT_TIMEOUT_SECS),
            )
            .await
            .map_err(|_| StoreError::Busy)?;

        let target = match choose_target(dir, name, self.policy).await {
            Ok(target) => target,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(name.to_string()));
            }
            Err(err) => return Err(StoreError::Io(err)),
        };
        debug!(?target, policy = ?self.policy, "store target chosen");

        let mut atomic = AtomicFile::new(&target).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = chunks.next().await {
            let result = match chunk {
                Ok(chunk) => atomic
                    .file_mut()
                    .write_all(chunk.as_ref())
                    .await
                    .map(|_| written += chunk.as_ref().len() as u64)
                    .map_err(StoreError::Io),
                Err(err) => Err(StoreError::Interrupted(err.to_string())),
            };
            if let Err(err) = result {
                atomic.cleanup().await;
                return Err(err);
            }
        }
        let stored = atomic.finalize().await?;
        info!(path = ?stored, bytes = written, "file stored");
        Ok(stored)
    }
}
