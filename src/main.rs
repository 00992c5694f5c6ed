//! Chunkwell server binary.
//!
//! This crate wires together the resumable chunked-upload API: records and
//! blobs on the local filesystem, offset-checked chunk assembly, MD5
//! verification on completion, and an expiry sweep that runs both as a
//! background task and as a one-shot `sweep` subcommand.

mod assembler;
mod auth;
mod background;
mod blob;
mod config;
mod controller;
mod error;
mod http;
mod logging;
mod range;
mod record;
mod storage;
mod store;
mod upload;
mod version;

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span};

use crate::auth::AuthConfig;
use crate::background::spawn_background_tasks;
use crate::blob::FsBlobSink;
use crate::config::{Args, Command};
use crate::controller::{AppController, NoopHooks, UploadController};
use crate::http::build_cors_layer;
use crate::storage::Storage;
use crate::store::FsRecordStore;
use crate::upload::UploadConfig;

shadow!(build);

/// Starts the Chunkwell server (or runs a one-shot sweep) and blocks until
/// shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let storage = Storage::new(PathBuf::from(&args.storage_dir));
    storage.ensure_root().await?;

    let expiry_window = chrono::Duration::seconds(args.expiry_secs as i64);
    let controller = Arc::new(UploadController::new(
        FsRecordStore::new(storage.clone()),
        FsBlobSink::new(storage),
        NoopHooks,
        expiry_window,
    ));

    if let Some(Command::Sweep { pretend }) = args.command {
        return run_sweep(&controller, pretend).await;
    }

    let auth_config = Arc::new(AuthConfig {
        username: args.auth_user.clone(),
        password: args.auth_pass.clone(),
    });
    let upload_config = Arc::new(UploadConfig {
        field_name: args.field_name.clone(),
        max_chunk_size: args.max_chunk_size,
    });

    let mut app = Router::new()
        .route(
            "/api/upload/chunk",
            post(upload::upload_chunk).layer(DefaultBodyLimit::disable()),
        )
        .route("/api/upload/{upload_id}", get(upload::upload_offset))
        .route("/api/version", get(version::get_version_info))
        .layer(middleware::from_fn(auth::auth_middleware))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip());
                    let client_ip = http::resolve_client_ip(request.headers(), connect_ip)
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(controller.clone()))
        .layer(Extension(auth_config))
        .layer(Extension(upload_config));

    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let http_addr = SocketAddr::new(host, args.http_port);
    let handle = Handle::new();

    info!("🚀 Starting HTTP server at {}", http_addr);

    let server = axum_server::bind(http_addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    spawn_background_tasks(controller, args.sweep_interval_secs);
    tokio::select! {
        result = server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

/// 一次性清扫过期上传（`sweep` 子命令）。
async fn run_sweep(controller: &AppController, pretend: bool) -> Result<(), std::io::Error> {
    if pretend {
        info!("called with --pretend, nothing will be removed");
    }
    let stats = controller
        .sweep_expired(pretend)
        .await
        .map_err(|err| std::io::Error::other(format!("sweep failed: {err:?}")))?;
    info!(
        deleted = stats.expired,
        total = stats.total,
        pretend,
        "expired uploads swept"
    );
    Ok(())
}

async fn shutdown_signal(handle: Handle) {
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
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
