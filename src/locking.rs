//! 内存路径锁：串行化同名文件的选名与落盘。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time;

/// Manages asynchronous mutexes keyed by destination path.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LockManager {
    /// 创建新的锁管理器实例。
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// 在给定超时时间内获取路径锁，超时返回 Err。
    pub async fn lock_path_with_timeout(
        &self,
        path: &Path,
        timeout: Duration,
    ) -> Result<OwnedMutexGuard<()>, ()> {
        let key = normalize_lock_key(path);
        let lock = {
            let mut locks = self.locks.lock().await;
            // 没有持有者也没有等待者的锁可以丢弃。
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        time::timeout(timeout, lock.lock_owned())
            .await
            .map_err(|_| ())
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

fn normalize_lock_key(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_locker_times_out_while_held() {
        let manager = LockManager::new();
        let path = Path::new("/uploads/shell.php");
        let guard = manager
            .lock_path_with_timeout(path, Duration::from_secs(1))
            .await
            .expect("first lock");

        let second = manager
            .lock_path_with_timeout(path, Duration::from_millis(20))
            .await;
        assert!(second.is_err());

        drop(guard);
        assert!(
            manager
                .lock_path_with_timeout(path, Duration::from_millis(20))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn released_locks_are_pruned() {
        let manager = LockManager::new();
        for name in ["a", "b", "c"] {
            let guard = manager
                .lock_path_with_timeout(Path::new(name), Duration::from_secs(1))
                .await
                .expect("lock");
            drop(guard);
        }
        assert_eq!(manager.len().await, 1);
    }
}
