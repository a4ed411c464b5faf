//! 审计日志：每次运行一个文件，按行追加带时间戳与级别的记录。
//!
//! 行格式：`[DD/MM/YYYY:HH:MM:SS] <SEVERITY> <message>`。

use chrono::{DateTime, Local, NaiveDateTime};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y:%H:%M:%S";
const FILE_NAME_FORMAT: &str = "%d%m%Y%H%M%S";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "INFO" => Ok(Severity::Info),
            "WARNING" => Ok(Severity::Warning),
            "ERROR" => Ok(Severity::Error),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: NaiveDateTime,
    pub severity: Severity,
    pub message: String,
}

impl LogEntry {
    /// 解析一行审计日志；格式不符时返回 `None`。
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.strip_prefix('[')?;
        let (timestamp, rest) = rest.split_once("] ")?;
        let timestamp = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
        let (severity, message) = match rest.split_once(' ') {
            Some((severity, message)) => (severity, message),
            None => (rest, ""),
        };
        Some(Self {
            timestamp,
            severity: severity.parse().ok()?,
            message: message.to_string(),
        })
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.severity,
            self.message
        )
    }
}

/// 追加写入的审计日志，所有请求共享同一实例。
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl AuditLog {
    /// 在 `logs_dir` 下创建以启动时间命名的日志文件。
    pub async fn create(logs_dir: &Path, started: DateTime<Local>) -> io::Result<Self> {
        fs::create_dir_all(logs_dir).await?;
        let path = logs_dir.join(format!("{}.txt", started.format(FILE_NAME_FORMAT)));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 写入一行记录。时间戳在持锁期间生成，保证文件内时间单调不减。
    pub async fn record(&self, severity: Severity, message: &str) -> io::Result<()> {
        let message = single_line(message);
        match severity {
            Severity::Info => info!(target: "audit", "{message}"),
            Severity::Warning => warn!(target: "audit", "{message}"),
            Severity::Error => error!(target: "audit", "{message}"),
        }

        let mut file = self.file.lock().await;
        let entry = LogEntry {
            timestamp: Local::now().naive_local(),
            severity,
            message,
        };
        file.write_all(format!("{entry}\n").as_bytes()).await?;
        file.flush().await
    }

    /// 写入记录；失败只记录到诊断日志，不影响调用方。
    pub async fn log(&self, severity: Severity, message: &str) {
        if let Err(err) = self.record(severity, message).await {
            error!(error = %err, path = ?self.path, "audit log write failed");
        }
    }

    pub async fn info(&self, message: &str) {
        self.log(Severity::Info, message).await;
    }

    pub async fn warning(&self, message: &str) {
        self.log(Severity::Warning, message).await;
    }

    pub async fn error(&self, message: &str) {
        self.log(Severity::Error, message).await;
    }

    /// 读回全部记录，忽略无法解析的行。
    pub async fn read_entries(&self) -> io::Result<Vec<LogEntry>> {
        let _guard = self.file.lock().await;
        let content = fs::read_to_string(&self.path).await?;
        Ok(content.lines().filter_map(LogEntry::parse).collect())
    }
}

fn single_line(message: &str) -> String {
    message.trim().replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[tokio::test]
    async fn file_is_named_by_start_time() {
        let temp = tempdir().expect("tempdir");
        let started = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let audit = AuditLog::create(&temp.path().join("logs"), started)
            .await
            .expect("create");
        assert_eq!(
            audit.path().file_name().unwrap().to_string_lossy(),
            "09032024140507.txt"
        );
        assert!(audit.path().exists());
    }

    #[tokio::test]
    async fn lines_follow_the_audit_format() {
        let temp = tempdir().expect("tempdir");
        let audit = AuditLog::create(temp.path(), Local::now())
            .await
            .expect("create");
        audit.info("GET 10.10.14.2:51234 (/)").await;
        audit.error("  upload failed\nsecond line  ").await;

        let content = std::fs::read_to_string(audit.path()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] INFO GET 10.10.14.2:51234 (/)"));
        assert!(lines[1].ends_with("] ERROR upload failed second line"));
        // `[DD/MM/YYYY:HH:MM:SS]` 固定 21 个字符。
        assert_eq!(lines[0].find(']'), Some(20));
    }

    #[tokio::test]
    async fn entries_read_back_in_order() {
        let temp = tempdir().expect("tempdir");
        let audit = AuditLog::create(temp.path(), Local::now())
            .await
            .expect("create");
        audit.info("first").await;
        audit.warning("second").await;
        audit.error("third").await;

        let entries = audit.read_entries().await.expect("read");
        let summary: Vec<_> = entries
            .iter()
            .map(|entry| (entry.severity, entry.message.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (Severity::Info, "first"),
                (Severity::Warning, "second"),
                (Severity::Error, "third"),
            ]
        );
        assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn parse_rejects_foreign_lines() {
        assert!(LogEntry::parse("not a log line").is_none());
        assert!(LogEntry::parse("[31/12/2024:23:59:59] DEBUG hi").is_none());
        let entry = LogEntry::parse("[31/12/2024:23:59:59] WARNING path escape").unwrap();
        assert_eq!(entry.severity, Severity::Warning);
        assert_eq!(entry.message, "path escape");
        assert_eq!(entry.to_string(), "[31/12/2024:23:59:59] WARNING path escape");
    }
}
