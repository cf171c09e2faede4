//! AxoUpload server binary.
//!
//! Accepts browser uploads, either one file streamed as the raw request body
//! or several files in a multipart form, checks them against an extension
//! whitelist and writes them into the storage directory. Every upload path
//! answers with a redirect to the upload form plus one-time notices.

mod atomic;
mod background;
mod chunked;
mod config;
mod error;
mod flash;
mod http;
mod logging;
mod multiple;
mod pages;
mod sanitize;
mod storage;
mod tls;
mod upload;
mod validate;

use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span};

use crate::background::spawn_background_tasks;
use crate::config::{Args, UploadConfig};
use crate::flash::FlashStore;
use crate::storage::Storage;

shadow!(build);

/// Starts the AxoUpload server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let upload_config = Arc::new(UploadConfig::from_args(&args)?);
    let storage = Arc::new(Storage::new(upload_config.storage_dir.clone()));
    let flash = Arc::new(FlashStore::new(upload_config.flash_ttl));
    storage.ensure_root().await?;
    info!(
        storage_dir = %storage.root_path().display(),
        chunk_size = upload_config.chunk_size,
        max_content_length = upload_config.max_content_length,
        atomic_writes = upload_config.atomic_writes,
        "upload storage ready"
    );

    let app = build_router(storage, upload_config, flash.clone());

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let http_addr = SocketAddr::new(host, args.http_port);
    let tls_config = tls::build_rustls_config(&args).await?;
    let handle = Handle::new();

    info!("🚀 Starting HTTP server at {}", http_addr);
    let http_server = axum_server::bind(http_addr)
        .handle(handle.clone())
        .serve(
            app.clone()
                .into_make_service_with_connect_info::<SocketAddr>(),
        );
    let https_server = async {
        match tls_config {
            Some(tls_config) => {
                let https_addr = SocketAddr::new(host, args.https_port);
                info!("🔒 Starting HTTPS server at {}", https_addr);
                axum_server::bind_rustls(https_addr, tls_config)
                    .handle(handle.clone())
                    .serve(app.into_make_service_with_connect_info::<SocketAddr>())
                    .await
            }
            None => std::future::pending().await,
        }
    };

    spawn_background_tasks(flash);
    tokio::select! {
        result = http_server => result?,
        result = https_server => result?,
        _ = shutdown_signal(handle.clone()) => {}
    }

    Ok(())
}

fn build_router(
    storage: Arc<Storage>,
    upload_config: Arc<UploadConfig>,
    flash: Arc<FlashStore>,
) -> Router {
    let body_limit = upload_config.body_limit();

    Router::new()
        .route("/", get(pages::index))
        .route("/upload_form", get(pages::upload_form))
        .route(
            "/singleuploadchunked/{filename}",
            post(chunked::single_upload_chunked).put(chunked::single_upload_chunked),
        )
        .route(
            "/multipleupload",
            get(multiple::multiple_upload)
                .post(multiple::multiple_upload)
                .put(multiple::multiple_upload),
        )
        .fallback(error::not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip = http::client_ip(request),
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(storage))
        .layer(Extension(upload_config))
        .layer(Extension(flash))
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
