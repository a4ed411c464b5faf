//! 请求路径解析：解码、规范化并限制在服务根目录之内。

use std::cmp::Ordering;
use std::io::{self, ErrorKind};
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;
use tokio::fs;

use crate::atomic::is_temp_name;

/// 请求路径映射到文件系统后的分类结果。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolvedTarget {
    Directory(PathBuf),
    File(PathBuf),
    Missing,
}

/// 目录列表中的一项。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    /// 相对当前服务目录的 URL 路径（`/` 分隔，不含前导 `/`）。
    pub path: String,
    pub is_dir: bool,
}

#[derive(Debug)]
pub struct Storage {
    root: PathBuf,
    base: RwLock<PathBuf>,
}

impl Storage {
    /// 创建（必要时）并规范化服务根目录。
    pub async fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        fs::create_dir_all(root.as_ref()).await?;
        let root = fs::canonicalize(root.as_ref()).await?;
        Ok(Self {
            base: RwLock::new(root.clone()),
            root,
        })
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 当前生效的服务目录（位于根目录之内）。
    pub fn base_path(&self) -> PathBuf {
        self.base
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// 当前服务目录相对根目录的显示形式，如 `/` 或 `/tools/linux`。
    pub fn base_display(&self) -> String {
        let base = self.base_path();
        match base.strip_prefix(&self.root) {
            Ok(relative) => format!("/{}", to_url_path(relative)),
            Err(_) => "/".to_string(),
        }
    }

    /// 解码请求路径并分类目标。越界访问返回 `OutsideRoot`。
    pub async fn resolve(&self, raw_path: &str) -> Result<ResolvedTarget, StorageError> {
        let decoded = decode_path(raw_path)?;
        let mut segments = Vec::new();
        push_segments(&mut segments, &decoded)?;

        let base = self.base_path();
        let candidate = segments.iter().fold(base.clone(), |path, s| path.join(s));
        let canonical = match fs::canonicalize(&candidate).await {
            Ok(path) => path,
            Err(err) if is_missing(&err) => return Ok(ResolvedTarget::Missing),
            Err(err) => return Err(StorageError::Io(err)),
        };
        if !canonical.starts_with(&base) {
            return Err(StorageError::OutsideRoot);
        }

        let metadata = match fs::metadata(&canonical).await {
            Ok(metadata) => metadata,
            Err(err) if is_missing(&err) => return Ok(ResolvedTarget::Missing),
            Err(err) => return Err(StorageError::Io(err)),
        };
        if metadata.is_dir() {
            Ok(ResolvedTarget::Directory(canonical))
        } else if metadata.is_file() {
            Ok(ResolvedTarget::File(canonical))
        } else {
            Ok(ResolvedTarget::Missing)
        }
    }

    /// 目标目录相对当前服务目录的 URL 路径；不在服务目录内时返回 `None`。
    pub fn relative_url(&self, path: &Path) -> Option<String> {
        let base = self.base_path();
        path.strip_prefix(&base).ok().map(to_url_path)
    }

    /// 枚举目录的直接子项：目录在前，名称不区分大小写排序。
    ///
    /// 指向服务目录之外的符号链接不会出现在结果中。
    pub async fn list_dir(&self, dir: &Path) -> Result<Vec<DirEntry>, StorageError> {
        let base = self.base_path();
        let relative_dir = dir
            .strip_prefix(&base)
            .map_err(|_| StorageError::OutsideRoot)?
            .to_path_buf();
        let mut read_dir = fs::read_dir(dir).await?;
        let mut entries = Vec::new();

        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if is_temp_name(&name) {
                continue;
            }
            let file_type = entry.file_type().await?;
            let is_dir = if file_type.is_symlink() {
                let Ok(target) = fs::canonicalize(entry.path()).await else {
                    continue;
                };
                if !target.starts_with(&base) {
                    continue;
                }
                fs::metadata(&target).await?.is_dir()
            } else {
                file_type.is_dir()
            };

            entries.push(DirEntry {
                path: to_url_path(&relative_dir.join(&name)),
                name,
                is_dir,
            });
        }

        entries.sort_by(|a, b| match (a.is_dir, b.is_dir) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        });

        Ok(entries)
    }

    /// 切换当前服务目录。以 `/` 开头时相对根目录，否则相对当前目录。
    pub async fn change_base(&self, target: &str) -> Result<PathBuf, StorageError> {
        let current = self.base_path();
        let mut segments = Vec::new();
        if !target.starts_with(['/', '\\'])
            && let Ok(relative) = current.strip_prefix(&self.root)
        {
            for component in relative.components() {
                segments.push(component.as_os_str().to_string_lossy().to_string());
            }
        }
        push_segments(&mut segments, target)?;

        let candidate = segments.iter().fold(self.root.clone(), |path, s| path.join(s));
        let canonical = fs::canonicalize(&candidate).await?;
        if !canonical.starts_with(&self.root) {
            return Err(StorageError::OutsideRoot);
        }
        if !fs::metadata(&canonical).await?.is_dir() {
            return Err(StorageError::InvalidPath("not a directory".into()));
        }

        *self
            .base
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = canonical.clone();
        Ok(canonical)
    }
}

fn decode_path(raw: &str) -> Result<String, StorageError> {
    let without_query = raw.split(['?', '#']).next().unwrap_or_default();
    urlencoding::decode(without_query)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| StorageError::InvalidPath("path is not valid UTF-8".into()))
}

/// 逐段规范化：忽略空段与 `.`，`..` 弹出一段，弹出越过起点即视为越界。
fn push_segments(segments: &mut Vec<String>, input: &str) -> Result<(), StorageError> {
    for segment in input.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => {
                if segments.pop().is_none() {
                    return Err(StorageError::OutsideRoot);
                }
            }
            value => {
                if value.contains('\0') {
                    return Err(StorageError::InvalidPath("path contains NUL".into()));
                }
                let mut components = Path::new(value).components();
                match (components.next(), components.next()) {
                    (Some(Component::Normal(_)), None) => segments.push(value.to_string()),
                    _ => return Err(StorageError::OutsideRoot),
                }
            }
        }
    }
    Ok(())
}

fn is_missing(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory)
}

fn to_url_path(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Debug)]
pub enum StorageError {
    InvalidPath(String),
    OutsideRoot,
    Io(io::Error),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::InvalidPath(msg) => write!(f, "invalid path: {msg}"),
            StorageError::OutsideRoot => f.write_str("path escapes the serving root"),
            StorageError::Io(err) => err.fmt(f),
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}
