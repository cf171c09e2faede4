//! 可选 HTTPS：加载 PEM 证书与私钥。

use axum_server::tls_rustls::RustlsConfig;
use std::path::PathBuf;
use tokio::fs;
use tracing::info;

use crate::config::Args;

/// 同时配置了证书与私钥时构建 Rustls 配置，否则返回 `None`。
pub async fn build_rustls_config(args: &Args) -> Result<Option<RustlsConfig>, std::io::Error> {
    let (cert_path, key_path) = match (&args.tls_cert, &args.tls_key) {
        (Some(cert), Some(key)) => (PathBuf::from(cert), PathBuf::from(key)),
        (None, None) => return Ok(None),
        _ => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "both --tls-cert and --tls-key are required for HTTPS",
            ));
        }
    };

    let cert = fs::read(&cert_path).await?;
    let key = fs::read(&key_path).await?;
    info!("loaded TLS cert: {:?}", cert_path);
    RustlsConfig::from_pem(cert, key).await.map(Some)
}
