//! 命令行参数与服务默认配置。

use clap::{Parser, ValueEnum};
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const UPLOAD_HEADER_NAME: &str = "filename";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_TEMP_TTL_SECS: u64 = 60 * 60;
pub const DEFAULT_LOCK_WAIT_TIMEOUT_SECS: u64 = 30;
pub const TEMP_CLEAN_INTERVAL_SECS: u64 = 900;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;
/// 外层超时在请求时限之外额外留出的秒数。
pub const TIMEOUT_BACKSTOP_SECS: u64 = 60;

/// 上传与抓取文件重名时的处理策略。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum CollisionPolicy {
    /// 在扩展名前追加递增序号：`name.1.ext`、`name.2.ext`……
    #[default]
    Rename,
    /// 直接覆盖已有文件。
    Overwrite,
    /// 拒绝写入，返回 409。
    Reject,
}

/// 控制台运行模式。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ConsoleMode {
    /// 持久交互式 shell。
    #[default]
    Shell,
    /// 编号菜单。
    Menu,
    /// 无控制台，仅等待终止信号。
    Headless,
}

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(
    name = "hermes-drop",
    version = VERSION_INFO,
    about = "File drop server for penetration testing"
)]
pub struct Args {
    #[arg(
        short = 'd',
        long,
        env = "HERMES_FILES_DIR",
        default_value = "files",
        help = "Directory served over GET"
    )]
    pub files_dir: String,
    #[arg(
        short = 'u',
        long,
        env = "HERMES_UPLOADS_DIR",
        default_value = "uploads",
        help = "Directory receiving POST uploads"
    )]
    pub uploads_dir: String,
    #[arg(
        short = 'l',
        long,
        env = "HERMES_LOGS_DIR",
        default_value = "logs",
        help = "Directory for per-run audit logs"
    )]
    pub logs_dir: String,
    #[arg(
        short = 'b',
        long,
        env = "HERMES_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub bind: String,
    #[arg(
        short = 'i',
        long,
        env = "HERMES_INTERFACE",
        conflicts_with = "bind",
        help = "Bind to the address of this network interface (e.g. tun0)"
    )]
    pub interface: Option<String>,
    #[arg(
        short = 'p',
        long,
        env = "HERMES_PORT",
        default_value_t = DEFAULT_PORT,
        help = "HTTP port"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "HERMES_ADVERTISE_HOST",
        help = "Host shown in generated URLs and client commands"
    )]
    pub advertise_host: Option<String>,
    #[arg(
        long,
        env = "HERMES_COLLISION",
        value_enum,
        default_value_t = CollisionPolicy::Rename,
        help = "What to do when a stored file name already exists"
    )]
    pub collision: CollisionPolicy,
    #[arg(
        long,
        env = "HERMES_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max upload size in bytes"
    )]
    pub upload_max_size: u64,
    #[arg(
        long,
        env = "HERMES_REQUEST_TIMEOUT_SECS",
        default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS,
        help = "Per-request timeout in seconds"
    )]
    pub request_timeout_secs: u64,
    #[arg(
        long,
        env = "HERMES_QUIET_ERRORS",
        help = "Hide internal error details from response bodies"
    )]
    pub quiet_errors: bool,
    #[arg(
        short = 'm',
        long,
        env = "HERMES_MODE",
        value_enum,
        default_value_t = ConsoleMode::Shell,
        help = "Operator console"
    )]
    pub mode: ConsoleMode,
    #[arg(
        long,
        env = "HERMES_TEMP_TTL_SECS",
        default_value_t = DEFAULT_TEMP_TTL_SECS,
        help = "Age after which orphaned temp files are removed (0 to disable)"
    )]
    pub temp_ttl_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let args = Args::try_parse_from(["hermes-drop"]).expect("parse");
        assert_eq!(args.files_dir, "files");
        assert_eq!(args.uploads_dir, "uploads");
        assert_eq!(args.port, DEFAULT_PORT);
        assert_eq!(args.collision, CollisionPolicy::Rename);
        assert_eq!(args.mode, ConsoleMode::Shell);
        assert!(!args.quiet_errors);
        assert_eq!(args.interface, None);
    }

    #[test]
    fn collision_policy_parses_from_cli() {
        let args = Args::try_parse_from(["hermes-drop", "--collision", "reject", "-m", "headless"])
            .expect("parse");
        assert_eq!(args.collision, CollisionPolicy::Reject);
        assert_eq!(args.mode, ConsoleMode::Headless);
    }

    #[test]
    fn interface_and_bind_are_exclusive() {
        let args = Args::try_parse_from(["hermes-drop", "-i", "tun0"]).expect("parse");
        assert_eq!(args.interface.as_deref(), Some("tun0"));
        assert!(Args::try_parse_from(["hermes-drop", "-i", "tun0", "-b", "10.0.0.1"]).is_err());
    }
}
