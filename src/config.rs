//! CLI arguments and server configuration defaults.

use clap::{Parser, Subcommand};
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

pub const META_FILE_NAME: &str = "meta.json";
pub const BLOB_FILE_NAME: &str = "blob.bin";
pub const DEFAULT_AUTH_USER: &str = "chunkwell";
pub const DEFAULT_AUTH_PASS: &str = "chunkwell";
pub const DEFAULT_FIELD_NAME: &str = "file";
pub const DEFAULT_EXPIRY_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 900;
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 16 * 1024 * 1024;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "chunkwell", version = VERSION_INFO, about = "Chunkwell resumable upload server")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,
    #[arg(
        short = 's',
        long,
        env = "CHUNKWELL_STORAGE_DIR",
        default_value = ".chunkwell/storage",
        help = "Storage directory for upload records and blobs"
    )]
    pub storage_dir: String,
    #[arg(
        long,
        env = "CHUNKWELL_AUTH_USER",
        default_value = DEFAULT_AUTH_USER,
        help = "Auth username; doubles as the upload owner"
    )]
    pub auth_user: String,
    #[arg(
        long,
        env = "CHUNKWELL_AUTH_PASS",
        default_value = DEFAULT_AUTH_PASS,
        help = "Auth password"
    )]
    pub auth_pass: String,
    #[arg(
        short = 'b',
        long,
        env = "CHUNKWELL_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "CHUNKWELL_HTTP_PORT",
        default_value_t = 5015,
        help = "HTTP port"
    )]
    pub http_port: u16,
    #[arg(long, env = "CHUNKWELL_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "CHUNKWELL_EXPIRY_SECS",
        default_value_t = DEFAULT_EXPIRY_SECS,
        help = "Upload expiration window in seconds"
    )]
    pub expiry_secs: u64,
    #[arg(
        long,
        env = "CHUNKWELL_SWEEP_INTERVAL_SECS",
        default_value_t = DEFAULT_SWEEP_INTERVAL_SECS,
        help = "Background expiry sweep interval in seconds (0 to disable)"
    )]
    pub sweep_interval_secs: u64,
    #[arg(
        long,
        env = "CHUNKWELL_FIELD_NAME",
        default_value = DEFAULT_FIELD_NAME,
        help = "Multipart field carrying the chunk bytes"
    )]
    pub field_name: String,
    #[arg(
        long,
        env = "CHUNKWELL_MAX_CHUNK_SIZE",
        default_value_t = DEFAULT_MAX_CHUNK_SIZE,
        help = "Max bytes per chunk (0 to disable)"
    )]
    pub max_chunk_size: u64,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Delete uploads whose expiration window has passed, then exit.
    Sweep {
        #[arg(
            long,
            help = "Do not remove anything, just report how many would be removed"
        )]
        pretend: bool,
    },
}
