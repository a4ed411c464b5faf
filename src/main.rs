//! HermesDrop server binary.
//!
//! Serves a directory over HTTP, accepts raw-body uploads, records every
//! request in a per-run audit log, and hands the terminal to an operator
//! console while the listener runs in the background.

mod atomic;
mod audit;
mod background;
mod config;
mod console;
mod dispatch;
mod error;
mod fetch;
mod http;
mod interfaces;
mod listing;
mod locking;
mod logging;
mod naming;
mod storage;
mod upload;

use axum::extract::connect_info::ConnectInfo;
use axum::http::Request;
use axum_server::Handle;
use chrono::Local;
use clap::Parser;
use shadow_rs::shadow;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info, info_span};

use crate::audit::AuditLog;
use crate::background::spawn_background_tasks;
use crate::config::{Args, ConsoleMode, SHUTDOWN_GRACE_SECS};
use crate::console::Console;
use crate::dispatch::ResponseOptions;
use crate::storage::Storage;
use crate::upload::{FileStore, UploadConfig, audit_uploads_location};

shadow!(build);

/// Starts the server and blocks until the console exits or a signal arrives.
#[tokio::main]
async fn main() -> Result<(), io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let started = Local::now();

    let host = match args.interface.as_deref() {
        Some(name) => interfaces::resolve_interface(name)
            .map_err(|err| startup_error("cannot use interface", name, err))?,
        None => args.bind.parse::<IpAddr>().map_err(|err| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid bind address {}: {err}", args.bind),
            )
        })?,
    };
    let storage = Arc::new(
        Storage::open(&args.files_dir)
            .await
            .map_err(|err| {
                startup_error("cannot prepare serving directory", &args.files_dir, err)
            })?,
    );
    let uploads_dir = prepare_dir(&args.uploads_dir).await?;
    let audit = Arc::new(
        AuditLog::create(Path::new(&args.logs_dir), started)
            .await
            .map_err(|err| startup_error("cannot create audit log in", &args.logs_dir, err))?,
    );
    audit_uploads_location(&storage, &uploads_dir, &audit).await;

    let addr = SocketAddr::new(host, args.port);
    let listener = std::net::TcpListener::bind(addr)
        .and_then(|listener| listener.set_nonblocking(true).map(|_| listener))
        .map_err(|err| startup_error("cannot bind", &addr.to_string(), err))?;

    let store = Arc::new(FileStore::new(args.collision));
    let upload_config = Arc::new(UploadConfig {
        dir: uploads_dir.clone(),
        max_size: args.upload_max_size,
    });
    let options = ResponseOptions {
        verbose_errors: !args.quiet_errors,
        request_timeout: Duration::from_secs(args.request_timeout_secs),
    };

    let app = dispatch::router(
        storage.clone(),
        store.clone(),
        upload_config,
        audit.clone(),
        options,
    )
    .layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let client_addr = request
                    .extensions()
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.to_string())
                    .unwrap_or_else(|| "unknown".to_string());

                info_span!(
                    env!("CARGO_CRATE_NAME"),
                    client_addr,
                    method = ?request.method(),
                    path = ?request.uri().path(),
                )
            })
            .on_request(DefaultOnRequest::new().level(Level::DEBUG))
            .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
    );

    let base_url = http::base_url(
        &http::advertise_host(host, args.advertise_host.as_deref()),
        args.port,
    );
    let client = fetch::build_client().map_err(io::Error::other)?;
    let console = Console::new(
        storage.clone(),
        store,
        audit.clone(),
        client,
        base_url.clone(),
    );

    info!("🚀 Serving {:?} at {}", storage.root_path(), addr);
    info!("📥 Uploads go to {:?}", uploads_dir);
    info!("📝 Audit log {:?}", audit.path());
    audit
        .info(&format!("Server started on {addr} ({base_url})"))
        .await;

    let handle = Handle::new();
    let mut server = tokio::spawn(
        axum_server::from_tcp(listener)
            .handle(handle.clone())
            .serve(app.into_make_service_with_connect_info::<SocketAddr>()),
    );
    spawn_background_tasks(
        vec![uploads_dir, storage.root_path().to_path_buf()],
        Duration::from_secs(args.temp_ttl_secs),
    );

    tokio::select! {
        result = &mut server => {
            return result.map_err(io::Error::other)?;
        }
        result = run_console(args.mode, &console) => result?,
        _ = shutdown_signal() => {
            audit.info("Server exit").await;
        }
    }

    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
    server.await.map_err(io::Error::other)?
}

async fn run_console(mode: ConsoleMode, console: &Console) -> io::Result<()> {
    match mode {
        ConsoleMode::Shell => {
            console::run_shell(console, console::stdin_reader(), tokio::io::stdout()).await
        }
        ConsoleMode::Menu => {
            console::run_menu(console, console::stdin_reader(), tokio::io::stdout()).await
        }
        ConsoleMode::Headless => std::future::pending().await,
    }
}

async fn prepare_dir(dir: &str) -> io::Result<std::path::PathBuf> {
    fs::create_dir_all(dir)
        .await
        .map_err(|err| startup_error("cannot create directory", dir, err))?;
    fs::canonicalize(dir)
        .await
        .map_err(|err| startup_error("cannot resolve directory", dir, err))
}

fn startup_error(context: &str, subject: &str, err: io::Error) -> io::Error {
    error!(subject, error = %err, "{context}");
    io::Error::new(err.kind(), format!("{context} {subject}: {err}"))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
}
