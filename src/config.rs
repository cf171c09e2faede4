//! CLI 参数、默认值与运行期上传配置。

use clap::Parser;
use shadow_rs::formatcp;
use std::path::PathBuf;
use std::time::Duration;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_HTTPS_PORT: u16 = 8443;
pub const DEFAULT_MAX_CONTENT_LENGTH: u64 = 2 * 1024 * 1024 * 1024;
pub const DEFAULT_CHUNK_SIZE: u64 = 4096;
pub const DEFAULT_FLASH_TTL_SECS: u64 = 5 * 60;
pub const FLASH_PRUNE_INTERVAL_SECS: u64 = 60;
pub const FLASH_COOKIE_NAME: &str = "AXO_FLASH";
/// 旧部署沿用的存储目录环境变量。
pub const LEGACY_STORAGE_DIR_ENV: &str = "TEMP_DIR";

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "axo-upload", version = VERSION_INFO, about = "AxoUpload server")]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "AXO_STORAGE_DIR",
        help = "Directory uploaded files are written to (defaults to the system temp dir)"
    )]
    pub storage_dir: Option<String>,
    #[arg(
        short = 'b',
        long,
        env = "AXO_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP/HTTPS"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "AXO_HTTP_PORT",
        default_value_t = DEFAULT_HTTP_PORT,
        help = "HTTP port"
    )]
    pub http_port: u16,
    #[arg(
        short = 'P',
        long,
        env = "AXO_HTTPS_PORT",
        default_value_t = DEFAULT_HTTPS_PORT,
        help = "HTTPS port (only bound when a TLS cert and key are given)"
    )]
    pub https_port: u16,
    #[arg(short = 'c', long, env = "AXO_TLS_CERT", help = "TLS cert path")]
    pub tls_cert: Option<String>,
    #[arg(short = 'k', long, env = "AXO_TLS_KEY", help = "TLS key path")]
    pub tls_key: Option<String>,
    #[arg(
        long,
        env = "AXO_MAX_CONTENT_LENGTH",
        default_value_t = DEFAULT_MAX_CONTENT_LENGTH,
        help = "Max request body size in bytes"
    )]
    pub max_content_length: u64,
    #[arg(
        long,
        env = "AXO_CHUNK_SIZE",
        default_value_t = DEFAULT_CHUNK_SIZE,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Read size in bytes for streamed single uploads"
    )]
    pub chunk_size: u64,
    #[arg(
        long,
        env = "AXO_ATOMIC_WRITES",
        help = "Write into a sibling temp file and rename on success"
    )]
    pub atomic_writes: bool,
    #[arg(
        long,
        env = "AXO_FLASH_TTL_SECS",
        default_value_t = DEFAULT_FLASH_TTL_SECS,
        help = "Seconds an undisplayed notice is kept"
    )]
    pub flash_ttl_secs: u64,
}

/// 启动时构建、此后只读的上传配置。
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub storage_dir: PathBuf,
    pub max_content_length: u64,
    pub chunk_size: usize,
    pub atomic_writes: bool,
    pub flash_ttl: Duration,
}

impl UploadConfig {
    /// 由命令行参数解析出上传配置。
    pub fn from_args(args: &Args) -> Result<Self, std::io::Error> {
        let storage_dir = args
            .storage_dir
            .clone()
            .or_else(|| std::env::var(LEGACY_STORAGE_DIR_ENV).ok())
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);
        let chunk_size = usize::try_from(args.chunk_size).map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "chunk size does not fit in memory",
            )
        })?;

        Ok(Self {
            storage_dir,
            max_content_length: args.max_content_length,
            chunk_size,
            atomic_writes: args.atomic_writes,
            flash_ttl: Duration::from_secs(args.flash_ttl_secs),
        })
    }

    /// 请求体上限，超出 `usize` 时按 `usize::MAX` 处理。
    pub fn body_limit(&self) -> usize {
        usize::try_from(self.max_content_length).unwrap_or(usize::MAX)
    }
}
