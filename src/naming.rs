//! 存储文件名的冲突处理。

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::config::CollisionPolicy;

/// 按扩展名拆分文件名；前导点不视为扩展名分隔符（`.bashrc` 没有扩展名）。
pub fn split_extension(name: &str) -> (&str, &str) {
    let leading = name.len() - name.trim_start_matches('.').len();
    match name[leading..].rfind('.') {
        Some(index) => name.split_at(leading + index),
        None => (name, ""),
    }
}

/// `report.txt` + 2 => `report.2.txt`
pub fn numbered_name(name: &str, counter: u64) -> String {
    let (stem, extension) = split_extension(name);
    format!("{stem}.{counter}{extension}")
}

/// 根据冲突策略为 `name` 选定 `dir` 下的最终路径。
///
/// `Reject` 策略在目标已存在时返回 `AlreadyExists`。
pub async fn choose_target(
    dir: &Path,
    name: &str,
    policy: CollisionPolicy,
) -> io::Result<PathBuf> {
    let target = dir.join(name);
    match policy {
        CollisionPolicy::Overwrite => Ok(target),
        CollisionPolicy::Reject => {
            if fs::try_exists(&target).await? {
                Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{name} already exists"),
                ))
            } else {
                Ok(target)
            }
        }
        CollisionPolicy::Rename => {
            let mut candidate = target;
            let mut counter = 0;
            while fs::try_exists(&candidate).await? {
                counter += 1;
                candidate = dir.join(numbered_name(name, counter));
            }
            Ok(candidate)
        }
    }
}
