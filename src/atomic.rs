//! 临时写入与原子替换的辅助方法。

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

const TEMP_MARKER: &str = ".tmp.";

/// 可用于原子替换的临时文件封装。
pub struct AtomicFile {
    target: PathBuf,
    temp_path: PathBuf,
    file: File,
}

impl AtomicFile {
    /// 在目标路径同目录创建临时文件。
    pub async fn new(target: &Path) -> io::Result<Self> {
        let parent = target
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid target path"))?;
        let base = target
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| "file".into());
        let temp_name = format!(".{base}{TEMP_MARKER}{}", Uuid::new_v4());
        let temp_path = parent.join(temp_name);
        let file = File::create(&temp_path).await?;
        Ok(Self {
            target: target.to_path_buf(),
            temp_path,
            file,
        })
    }

    /// 返回临时文件的可写句柄。
    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// 放弃并清理临时文件。
    pub async fn cleanup(self) {
        drop(self.file);
        let _ = fs::remove_file(&self.temp_path).await;
    }

    /// 同步并原子替换目标文件。
    pub async fn finalize(mut self) -> io::Result<PathBuf> {
        if let Err(err) = self.file.flush().await {
            self.cleanup().await;
            return Err(err);
        }
        if let Err(err) = self.file.sync_all().await {
            self.cleanup().await;
            return Err(err);
        }
        drop(self.file);

        if let Err(err) = fs::rename(&self.temp_path, &self.target).await {
            #[cfg(windows)]
            {
                if fs::remove_file(&self.target).await.is_ok() {
                    if let Err(err) = fs::rename(&self.temp_path, &self.target).await {
                        let _ = fs::remove_file(&self.temp_path).await;
                        return Err(err);
                    }
                } else {
                    let _ = fs::remove_file(&self.temp_path).await;
                    return Err(err);
                }
            }
            #[cfg(not(windows))]
            {
                let _ = fs::remove_file(&self.temp_path).await;
                return Err(err);
            }
        }

        if let Some(parent) = self.target.parent() {
            let _ = sync_dir(parent).await;
        }

        Ok(self.target)
    }
}

/// 判断文件名是否为 `AtomicFile` 产生的临时文件。
pub fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.contains(TEMP_MARKER)
}

/// 删除目录中早于 `ttl` 的孤立临时文件，返回删除数量。
pub async fn sweep_stale_temp_files(dir: &Path, ttl: Duration) -> io::Result<u64> {
    let mut removed = 0;
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(err) => return Err(err),
    };
    let now = SystemTime::now();

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if !is_temp_name(&name.to_string_lossy()) {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age >= ttl && fs::remove_file(entry.path()).await.is_ok() {
            removed += 1;
        }
    }

    Ok(removed)
}

async fn sync_dir(path: &Path) -> io::Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = std::fs::File::open(path)?;
        dir.sync_all()
    })
    .await
    .map_err(|err| io::Error::other(err.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn finalize_replaces_target_and_leaves_no_temp() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("loot.bin");
        std::fs::write(&target, b"old").unwrap();

        let mut atomic = AtomicFile::new(&target).await.expect("create");
        atomic.file_mut().write_all(b"new contents").await.unwrap();
        let stored = atomic.finalize().await.expect("finalize");
        assert_eq!(stored, target);
        assert_eq!(std::fs::read(&target).unwrap(), b"new contents");
        let leftovers = std::fs::read_dir(temp.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn cleanup_discards_partial_write() {
        let temp = tempdir().expect("tempdir");
        let target = temp.path().join("partial.bin");
        let mut atomic = AtomicFile::new(&target).await.expect("create");
        atomic.file_mut().write_all(b"half").await.unwrap();
        atomic.cleanup().await;

        assert!(!target.exists());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn sweep_removes_only_temp_files() {
        let temp = tempdir().expect("tempdir");
        std::fs::write(temp.path().join(".a.txt.tmp.1234"), b"x").unwrap();
        std::fs::write(temp.path().join("a.txt"), b"x").unwrap();
        std::fs::write(temp.path().join(".bashrc"), b"x").unwrap();

        let removed = sweep_stale_temp_files(temp.path(), Duration::ZERO)
            .await
            .expect("sweep");
        assert_eq!(removed, 1);
        assert!(temp.path().join("a.txt").exists());
        assert!(temp.path().join(".bashrc").exists());
    }

    #[test]
    fn temp_names_are_recognized() {
        assert!(is_temp_name(".report.txt.tmp.0f0e"));
        assert!(!is_temp_name("report.tmp.txt"));
        assert!(!is_temp_name(".hidden"));
    }
}
