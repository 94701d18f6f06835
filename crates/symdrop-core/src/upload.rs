//! Debug file upload orchestration.
//!
//! A run moves through three stages:
//!
//! 1. **Collect** candidate files with [`FileCollector`]
//! 2. **Parse** every file into its [`ArchEntry`] slices
//! 3. **Upload** each slice as a debug binary followed by its metadata
//!
//! Failures are reported through `tracing` as they happen and the run ends
//! with an [`Error`] for the caller to turn into an exit code. Uploads that
//! already completed are never rolled back.

use crate::client::{describe_failure, ApiClient, Body, RetryPolicy, UploadRequest};
use crate::collect::{FileCollector, FileDescriptor, DEFAULT_PATTERN};
use crate::error::{Error, Result, VERBOSE_HINT};
use crate::macho::{self, Arch, ArchEntry};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info};

/// Control-plane resource debug artifacts are registered with
pub const ARTIFACTS_URL: &str = "release-artifacts";

/// Entries uploaded concurrently per batch
pub const DEFAULT_CHUNK_SIZE: usize = 1;

const DSYM_DOCS_LINK: &str = "https://developer.apple.com/documentation/xcode/building-your-app-to-include-debugging-information/";

/// Parameters of one upload run
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Files or directories to collect debug files from
    pub paths: Vec<PathBuf>,
    /// Release the files belong to
    pub release: String,
    /// Retry limits for each storage PUT
    pub retry: RetryPolicy,
    /// Entries uploaded concurrently; each batch finishes before the next starts.
    /// Also bounds how many files are parsed at once.
    pub chunk_size: usize,
    /// Glob selecting debug files inside directories
    pub pattern: String,
    /// Include raw traces and response bodies in reports
    pub verbose: bool,
}

impl UploadOptions {
    /// Creates options with default retry, batching and pattern
    pub fn new(release: impl Into<String>, paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            release: release.into(),
            retry: RetryPolicy::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            pattern: DEFAULT_PATTERN.to_string(),
            verbose: false,
        }
    }

    /// Sets the retry policy
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the batch size (0 is treated as 1)
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets the file pattern
    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    /// Sets verbose reporting
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// Totals of a successful run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// Debug files collected
    pub files: usize,
    /// Architecture slices parsed from them
    pub entries: usize,
    /// Slices whose binary and metadata were both uploaded
    pub uploaded: usize,
}

/// Storage directory for a build identifier: `<first byte pair>/<rest>`
pub fn container_directory(build_id: &str) -> String {
    let split = build_id
        .char_indices()
        .nth(2)
        .map_or(build_id.len(), |(index, _)| index);
    let (head, tail) = build_id.split_at(split);
    format!("{head}/{tail}")
}

#[derive(Serialize)]
struct DebugMeta<'a> {
    name: &'a str,
    arch: Arch,
    file_format: &'a str,
}

/// One slice waiting to be uploaded
#[derive(Debug, Clone)]
struct PendingUpload {
    file: FileDescriptor,
    entry: ArchEntry,
}

enum EntryOutcome {
    Uploaded,
    Rejected,
}

/// Drives collect, parse and upload for a set of input paths
#[derive(Debug, Clone)]
pub struct Uploader {
    client: ApiClient,
}

impl Uploader {
    /// Creates an uploader over an authenticated client
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Runs a full upload
    pub async fn run(&self, options: &UploadOptions) -> Result<UploadReport> {
        info!(
            "Preparing to upload debug file(s) for release {} ...",
            options.release
        );
        info!("Gathering file list...");

        let files = self.gather(options)?;
        let pending = self.parse_all(&files, options).await?;
        info!(
            "Parsed {} total build architecture mappings",
            pending.len()
        );

        let uploaded = self.upload_all(&pending, options).await?;
        info!("Success!");

        Ok(UploadReport {
            files: files.len(),
            entries: pending.len(),
            uploaded,
        })
    }

    fn gather(&self, options: &UploadOptions) -> Result<Vec<FileDescriptor>> {
        let files = FileCollector::new(&options.pattern)
            .and_then(|collector| collector.collect(&options.paths))
            .map_err(|err| {
                error!("{}", gather_failure_message(&err, options.verbose));
                err
            })?;

        if files.is_empty() {
            error!(
                "No debug information files found\nSee the Xcode documentation for building \
                 your app to include debug information: {}",
                DSYM_DOCS_LINK
            );
            return Err(Error::NoDebugFiles);
        }

        let plural = if files.len() == 1 { "" } else { "s" };
        info!("Found {} debug file{} ...", files.len(), plural);
        if options.verbose {
            for file in &files {
                info!("- {}", file.path.display());
            }
        } else {
            info!("Rerun command with --verbose to see debug file paths");
        }

        Ok(files)
    }

    /// Parses every file, at most `chunk_size` at a time; one file failing
    /// does not stop the others
    async fn parse_all(&self, files: &[FileDescriptor], options: &UploadOptions) -> Result<Vec<PendingUpload>> {
        let parses = files.iter().map(|file| {
            let path = file.path.clone();
            tokio::task::spawn_blocking(move || macho::parse_file(path))
        });
        let results: Vec<_> = stream::iter(parses)
            .buffered(options.chunk_size.max(1))
            .collect()
            .await;

        let mut pending = Vec::new();
        let mut failed = 0;
        for (file, joined) in files.iter().zip(results) {
            let parsed = joined.map_err(|e| {
                let err = Error::internal(format!("parse task failed: {e}"));
                error!("{}", err);
                err
            })?;
            match parsed {
                Ok(entries) => pending.extend(entries.into_iter().map(|entry| PendingUpload {
                    file: file.clone(),
                    entry,
                })),
                Err(err) => {
                    error!("{}", parse_failure_message(&err, file, options.verbose));
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(Error::ParseFailed { failed });
        }
        Ok(pending)
    }

    /// Uploads in batches of `chunk_size`, stopping after the first batch with a failure
    async fn upload_all(&self, pending: &[PendingUpload], options: &UploadOptions) -> Result<usize> {
        let mut uploaded = 0;

        for batch in pending.chunks(options.chunk_size.max(1)) {
            let outcomes = join_all(batch.iter().map(|p| self.upload_entry(p, options))).await;

            let mut rejected = 0;
            let mut fatal = None;
            for outcome in outcomes {
                match outcome {
                    Ok(EntryOutcome::Uploaded) => uploaded += 1,
                    Ok(EntryOutcome::Rejected) => rejected += 1,
                    Err(err) => {
                        error!("{}", err.report(options.verbose));
                        fatal.get_or_insert(err);
                    }
                }
            }

            if let Some(err) = fatal {
                return Err(err);
            }
            if rejected > 0 {
                return Err(Error::UploadFailed { failed: rejected });
            }
        }

        Ok(uploaded)
    }

    /// Uploads one slice: debug binary first, then its metadata
    async fn upload_entry(&self, pending: &PendingUpload, options: &UploadOptions) -> Result<EntryOutcome> {
        let PendingUpload { file, entry } = pending;
        info!("Uploading: {} {}", file.name, entry.arch);

        let directory = container_directory(&entry.build_id);
        let debug_file = UploadRequest::new(
            ARTIFACTS_URL,
            format!("{directory}/debuginfo"),
            options.release.as_str(),
            Body::file(&file.path),
        )
        .arch(entry.arch)
        .retry(options.retry);

        let response = self.client.upload_file(debug_file).await?;
        if !response.ok() {
            error!("Failed to upload: {} {}", file.name, entry.arch);
            error!("{}", describe_failure(&response, options.verbose));
            return Ok(EntryOutcome::Rejected);
        }

        let meta = serde_json::to_vec(&DebugMeta {
            name: &file.name,
            arch: entry.arch,
            file_format: entry.file_format,
        })?;
        let meta_file = UploadRequest::new(
            ARTIFACTS_URL,
            format!("{directory}/meta"),
            options.release.as_str(),
            meta,
        )
        .retry(options.retry);

        let response = self.client.upload_file(meta_file).await?;
        if !response.ok() {
            error!("Failed to upload metadata for {} {}", file.name, entry.arch);
            error!("{}", describe_failure(&response, options.verbose));
            return Ok(EntryOutcome::Rejected);
        }

        Ok(EntryOutcome::Uploaded)
    }
}

/// Report for a collection failure, naming the filesystem cause when there is one
fn gather_failure_message(err: &Error, verbose: bool) -> String {
    match err {
        Error::Wrapped(wrapped) if wrapped.kind().is_file_access() => {
            let summary = format!("{}: {}", wrapped.message(), wrapped.kind().user_message());
            if verbose {
                format!("{summary}\n{}", wrapped.trace())
            } else {
                format!("{summary}\n{VERBOSE_HINT}")
            }
        }
        other => other.report(verbose),
    }
}

/// One-line report for a file that could not be parsed
fn parse_failure_message(err: &Error, file: &FileDescriptor, verbose: bool) -> String {
    let summary = match err {
        Error::Wrapped(wrapped) => wrapped.kind().user_message(),
        _ => "An error occurred while parsing architecture details from debug file",
    };
    let mut message = format!("{summary} {}", file.path.display());

    match err {
        Error::Wrapped(wrapped) if verbose => {
            message.push('\n');
            message.push_str(&wrapped.trace());
        }
        _ if verbose => {
            message.push('\n');
            message.push_str(&err.to_string());
        }
        _ => {
            message.push('\n');
            message.push_str(VERBOSE_HINT);
        }
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::ScriptedTransport;
    use crate::client::ClientConfig;
    use crate::error::{ErrorKind, WrappedError};
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_container_directory() {
        assert_eq!(
            container_directory("123456789abcdef00fedcba987654321"),
            "12/3456789abcdef00fedcba987654321"
        );
        assert_eq!(container_directory("a"), "a/");
    }

    #[test]
    fn test_meta_body_shape() {
        let body = serde_json::to_string(&DebugMeta {
            name: "App.dSYM/Contents/Resources/DWARF/App",
            arch: Arch::ArmV7S,
            file_format: macho::FILE_FORMAT,
        })
        .unwrap();
        assert_eq!(
            body,
            r#"{"name":"App.dSYM/Contents/Resources/DWARF/App","arch":"armv7s","file_format":"macho"}"#
        );
    }

    #[test]
    fn test_options_builder() {
        let options = UploadOptions::new("1.2.3", vec![PathBuf::from("build")])
            .retry(RetryPolicy::new().max_retries(3))
            .chunk_size(4)
            .pattern("**/*.dwarf")
            .verbose(true);

        assert_eq!(options.release, "1.2.3");
        assert_eq!(options.retry.max_retries, 3);
        assert_eq!(options.chunk_size, 4);
        assert_eq!(options.pattern, "**/*.dwarf");
        assert!(options.verbose);
        assert_eq!(UploadOptions::new("r", Vec::new()).chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_parse_failure_message() {
        let file = FileDescriptor {
            path: PathBuf::from("/build/App.dSYM/Contents/Resources/DWARF/App"),
            name: "App.dSYM/Contents/Resources/DWARF/App".to_string(),
        };
        let err: Error = WrappedError::bare(ErrorKind::MissingUuid, "no LC_UUID among 3 load commands").into();

        let quiet = parse_failure_message(&err, &file, false);
        assert_eq!(
            quiet,
            format!(
                "No uuid found for debug file /build/App.dSYM/Contents/Resources/DWARF/App\n{VERBOSE_HINT}"
            )
        );

        let verbose = parse_failure_message(&err, &file, true);
        assert!(verbose.ends_with("MissingUUIDError: no LC_UUID among 3 load commands"));
    }

    #[test]
    fn test_gather_failure_names_the_cause() {
        let dir = TempDir::new().unwrap();
        let err = FileCollector::default()
            .collect_from(dir.path(), &["nope"])
            .unwrap_err();

        assert_eq!(
            gather_failure_message(&err, false),
            format!(
                "An error occurred while gathering debug files: No such file or directory\n{VERBOSE_HINT}"
            )
        );
        let verbose = gather_failure_message(&err, true);
        assert!(verbose.starts_with(
            "An error occurred while gathering debug files: No such file or directory\nFileNotFoundError: "
        ));
    }

    #[test]
    fn test_gather_failure_without_file_cause() {
        let err = FileCollector::new("[").unwrap_err();
        assert_eq!(gather_failure_message(&err, false), err.to_string());
    }

    /// Thin little-endian arm64 image whose build id is `byte` repeated
    fn arm64_image(byte: u8) -> Vec<u8> {
        let mut out = Vec::new();
        for field in [0xfeed_facf_u32, 0x0100_000c, 0, 0xa, 1, 24, 0, 0, 0x1b, 24] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        out.extend([byte; 16]);
        out
    }

    fn descriptor(root: &Path, name: &str, data: &[u8]) -> FileDescriptor {
        let path = root.join(name);
        fs::write(&path, data).unwrap();
        FileDescriptor {
            path,
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_bounded_parse_keeps_file_order() {
        let dir = TempDir::new().unwrap();
        let files: Vec<FileDescriptor> = (1..=5u8)
            .map(|byte| descriptor(dir.path(), &format!("lib{byte}"), &arm64_image(byte)))
            .collect();

        let transport = Arc::new(ScriptedTransport::default());
        let client = ApiClient::with_transport(ClientConfig::new("org:app:key"), transport).unwrap();
        let options = UploadOptions::new("1.0.0", Vec::new()).chunk_size(2);

        let pending = Uploader::new(client).parse_all(&files, &options).await.unwrap();

        let names: Vec<&str> = pending.iter().map(|p| p.file.name.as_str()).collect();
        assert_eq!(names, vec!["lib1", "lib2", "lib3", "lib4", "lib5"]);
        assert_eq!(pending[2].entry.build_id, "03".repeat(16));
        assert_eq!(pending[2].entry.arch, Arch::Arm64);
    }

    #[tokio::test]
    async fn test_parse_failures_are_counted() {
        let dir = TempDir::new().unwrap();
        let files = vec![
            descriptor(dir.path(), "good", &arm64_image(1)),
            descriptor(dir.path(), "bad", b"not a binary"),
            descriptor(dir.path(), "short", &[0xcf, 0xfa]),
        ];

        let transport = Arc::new(ScriptedTransport::default());
        let client = ApiClient::with_transport(ClientConfig::new("org:app:key"), transport).unwrap();
        let options = UploadOptions::new("1.0.0", Vec::new());

        let err = Uploader::new(client).parse_all(&files, &options).await.unwrap_err();
        assert!(matches!(err, Error::ParseFailed { failed: 2 }), "{err:?}");
    }

    #[tokio::test]
    async fn test_debug_binary_is_streamed_from_disk() {
        let dir = TempDir::new().unwrap();
        let file = descriptor(dir.path(), "App", &arm64_image(7));
        let pending = PendingUpload {
            entry: macho::parse_file(&file.path).unwrap().remove(0),
            file,
        };

        let transport = Arc::new(ScriptedTransport::default());
        let client =
            ApiClient::with_transport(ClientConfig::new("org:app:key"), transport.clone()).unwrap();
        let options = UploadOptions::new("1.0.0", Vec::new());

        let outcome = Uploader::new(client).upload_entry(&pending, &options).await.unwrap();
        assert!(matches!(outcome, EntryOutcome::Uploaded));

        let puts: Vec<(String, Body)> = transport
            .requests()
            .into_iter()
            .filter(|r| r.method == crate::client::Method::Put)
            .map(|r| (r.url, r.body))
            .collect();
        assert_eq!(puts.len(), 2);
        assert_eq!(puts[0].1, Body::file(&pending.file.path));
        assert!(puts[1].0.ends_with("/meta"));
        assert!(puts[1].1.as_bytes().is_some());
    }
}
