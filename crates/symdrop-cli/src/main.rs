//! symdrop - Upload Mach-O debug symbol files for a mobile release
//!
//! This tool finds the DWARF files inside `.dSYM` bundles, reads the build
//! identifier of every architecture slice, and uploads each slice together
//! with its metadata so crashes from that release can be symbolicated.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use symdrop_core::client::{StorageWebhook, DEFAULT_API_HOST};
use symdrop_core::collect::DEFAULT_PATTERN;
use symdrop_core::upload::DEFAULT_CHUNK_SIZE;
use symdrop_core::{ApiClient, ClientConfig, RetryPolicy, UploadOptions, UploadReport, Uploader};
use tracing::{debug, Level};
use tracing_subscriber::EnvFilter;

/// Upload iOS debug symbol files for a release
#[derive(Parser, Debug)]
#[command(name = "symdrop")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Files or directories to search for debug files
    #[arg(required = true, value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Release the debug files belong to
    #[arg(short, long)]
    release: String,

    /// API key of the form <org>:<app>:<key>
    #[arg(short = 'k', long = "apikey", env = "LOGROCKET_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Control-plane host
    #[arg(long = "apihost", env = "LOGROCKET_API_HOST", default_value = DEFAULT_API_HOST)]
    api_host: String,

    /// Retries for each storage upload after the first attempt
    #[arg(long, default_value = "0")]
    max_retries: u32,

    /// Cap on the exponential retry delay, in milliseconds
    #[arg(long, default_value = "30000", value_name = "MS")]
    max_retry_delay: u64,

    /// Number of architecture slices uploaded concurrently
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Glob selecting debug files inside directories
    #[arg(long, default_value = DEFAULT_PATTERN)]
    pattern: String,

    /// Storage notification channel token
    #[arg(long, hide = true, requires = "gcs_bucket")]
    gcs_token: Option<String>,

    /// Storage notification bucket
    #[arg(long, hide = true, requires = "gcs_token")]
    gcs_bucket: Option<String>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .max_retries(self.max_retries)
            .max_retry_delay(Duration::from_millis(self.max_retry_delay))
    }

    fn webhook(&self) -> Option<StorageWebhook> {
        match (&self.gcs_token, &self.gcs_bucket) {
            (Some(token), Some(bucket)) => Some(StorageWebhook {
                token: token.clone(),
                bucket: bucket.clone(),
            }),
            _ => None,
        }
    }

    fn upload_options(&self) -> UploadOptions {
        UploadOptions::new(self.release.as_str(), self.paths.clone())
            .retry(self.retry_policy())
            .chunk_size(self.chunk_size)
            .pattern(self.pattern.as_str())
            .verbose(self.verbose > 0)
    }
}

fn log_level(verbose: u8) -> Level {
    match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Exit status for a finished run.
///
/// The uploader has already logged every failure it returns, so nothing is
/// printed here beyond a debug summary.
fn exit_status(result: &symdrop_core::Result<UploadReport>) -> u8 {
    match result {
        Ok(report) => {
            debug!(
                "Uploaded {} of {} slice(s) from {} file(s)",
                report.uploaded, report.entries, report.files
            );
            0
        }
        Err(err) => {
            debug!("Upload did not complete: {}", err);
            1
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(log_level(cli.verbose).into()))
        .with_target(false)
        .init();

    let config = ClientConfig::new(cli.api_key.as_str()).api_host(cli.api_host.as_str());
    let mut client = ApiClient::new(config).context("Failed to create upload client")?;
    if let Some(webhook) = cli.webhook() {
        debug!("Storage notifications enabled for bucket {}", webhook.bucket);
        client = client.with_storage_webhook(webhook);
    }

    client
        .check_status()
        .await
        .context("CLI status check failed")?;

    let options = cli.upload_options();
    let result = Uploader::new(client).run(&options).await;
    Ok(ExitCode::from(exit_status(&result)))
}
