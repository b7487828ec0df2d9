//! Internal events for sluice metrics emission.
//!
//! Each event struct is one measurable occurrence. Events implement
//! `InternalEvent`, which records the matching Prometheus metric.
//!
//! Intake-side events carry a `target` label naming the configured intake
//! (for example `"hits"`), so several sluice processes can share a dashboard.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    fn emit(self);
}

// ============ Intake ============

/// A directory listing finished.
pub struct ScanCompleted {
    /// Files found in the intake directory.
    pub entries: u64,
    pub target: String,
}

impl InternalEvent for ScanCompleted {
    fn emit(self) {
        trace!(entries = self.entries, target = %self.target, "Scan completed");
        counter!("sluice_scans_total", "target" => self.target.clone()).increment(1);
        gauge!("sluice_pending_files", "target" => self.target).set(self.entries as f64);
    }
}

/// An intake file was fetched and its decompressor built.
pub struct FileOpened {
    pub bytes: u64,
    pub target: String,
}

impl InternalEvent for FileOpened {
    fn emit(self) {
        trace!(bytes = self.bytes, target = %self.target, "File opened");
        counter!("sluice_files_opened_total", "target" => self.target.clone()).increment(1);
        counter!("sluice_bytes_read_total", "target" => self.target).increment(self.bytes);
    }
}

/// Stage at which opening a file failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStage {
    Open,
    Decompress,
}

impl OpenStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenStage::Open => "open",
            OpenStage::Decompress => "decompress",
        }
    }
}

/// An intake file could not be opened and was skipped for this pass.
pub struct FileOpenFailed {
    pub stage: OpenStage,
    pub target: String,
}

impl InternalEvent for FileOpenFailed {
    fn emit(self) {
        trace!(stage = self.stage.as_str(), target = %self.target, "File open failed");
        counter!("sluice_file_open_failures_total", "stage" => self.stage.as_str(), "target" => self.target)
            .increment(1);
    }
}

/// How a file's row stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// Clean end of stream.
    Complete,
    /// Stream ended early on malformed data.
    Malformed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Complete => "complete",
            FileStatus::Malformed => "malformed",
        }
    }
}

/// A file's row stream ended.
pub struct FileFinished {
    pub status: FileStatus,
    /// Time from open to end of stream.
    pub duration: Duration,
    pub target: String,
}

impl InternalEvent for FileFinished {
    fn emit(self) {
        trace!(
            status = self.status.as_str(),
            duration_ms = self.duration.as_millis() as u64,
            target = %self.target,
            "File finished"
        );
        counter!("sluice_files_finished_total", "status" => self.status.as_str(), "target" => self.target.clone())
            .increment(1);
        histogram!("sluice_file_read_duration_seconds", "target" => self.target)
            .record(self.duration.as_secs_f64());
    }
}

/// Rows delivered from a single file.
pub struct RowsRead {
    pub count: u64,
    pub target: String,
}

impl InternalEvent for RowsRead {
    fn emit(self) {
        trace!(count = self.count, target = %self.target, "Rows read");
        counter!("sluice_rows_read_total", "target" => self.target).increment(self.count);
    }
}

/// A consumed file was moved to the ready directory.
pub struct FileArchived {
    pub target: String,
}

impl InternalEvent for FileArchived {
    fn emit(self) {
        trace!(target = %self.target, "File archived");
        counter!("sluice_files_archived_total", "target" => self.target).increment(1);
    }
}

/// Moving a consumed file to the ready directory failed.
pub struct ArchiveFailed {
    pub target: String,
}

impl InternalEvent for ArchiveFailed {
    fn emit(self) {
        trace!(target = %self.target, "Archive failed");
        counter!("sluice_archive_failures_total", "target" => self.target).increment(1);
    }
}

/// A file that repeatedly failed to open was moved to quarantine.
pub struct FileQuarantined {
    pub target: String,
}

impl InternalEvent for FileQuarantined {
    fn emit(self) {
        trace!(target = %self.target, "File quarantined");
        counter!("sluice_files_quarantined_total", "target" => self.target).increment(1);
    }
}

// ============ Publishing ============

/// Encoded rows handed to the broker.
pub struct RowsPublished {
    pub count: u64,
    pub target: String,
}

impl InternalEvent for RowsPublished {
    fn emit(self) {
        trace!(count = self.count, target = %self.target, "Rows published");
        counter!("sluice_rows_published_total", "target" => self.target).increment(self.count);
    }
}

/// The broker rejected a produce request.
pub struct PublishFailed {
    pub target: String,
}

impl InternalEvent for PublishFailed {
    fn emit(self) {
        trace!(target = %self.target, "Publish failed");
        counter!("sluice_publish_failures_total", "target" => self.target).increment(1);
    }
}

/// A field value failed to parse and was replaced by the type default.
pub struct RowMappingDefaulted {
    pub field: String,
}

impl InternalEvent for RowMappingDefaulted {
    fn emit(self) {
        trace!(field = %self.field, "Row field defaulted");
        counter!("sluice_row_fields_defaulted_total", "field" => self.field).increment(1);
    }
}

/// A mapped row could not be serialized.
pub struct RowEncodeFailed {
    pub target: String,
}

impl InternalEvent for RowEncodeFailed {
    fn emit(self) {
        trace!(target = %self.target, "Row encode failed");
        counter!("sluice_row_encode_failures_total", "target" => self.target).increment(1);
    }
}

/// Records replayed from the topic to stdout.
pub struct RecordsReplayed {
    pub count: u64,
}

impl InternalEvent for RecordsReplayed {
    fn emit(self) {
        trace!(count = self.count, "Records replayed");
        counter!("sluice_records_replayed_total").increment(self.count);
    }
}

// ============ Storage ============

/// Status of a storage request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Success,
    Error,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Success => "success",
            RequestStatus::Error => "error",
        }
    }
}

/// Storage operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOperation {
    List,
    Open,
    Rename,
}

impl StorageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageOperation::List => "list",
            StorageOperation::Open => "open",
            StorageOperation::Rename => "rename",
        }
    }
}

/// A storage request completed.
pub struct StorageRequest {
    pub operation: StorageOperation,
    pub status: RequestStatus,
    pub backend: &'static str,
}

impl InternalEvent for StorageRequest {
    fn emit(self) {
        trace!(
            operation = self.operation.as_str(),
            status = self.status.as_str(),
            backend = self.backend,
            "Storage request"
        );
        counter!(
            "sluice_storage_requests_total",
            "operation" => self.operation.as_str(),
            "status" => self.status.as_str(),
            "backend" => self.backend
        )
        .increment(1);
    }
}

/// Latency of a storage request.
pub struct StorageRequestDuration {
    pub operation: StorageOperation,
    pub backend: &'static str,
    pub duration: Duration,
}

impl InternalEvent for StorageRequestDuration {
    fn emit(self) {
        histogram!(
            "sluice_storage_request_duration_seconds",
            "operation" => self.operation.as_str(),
            "backend" => self.backend
        )
        .record(self.duration.as_secs_f64());
    }
}
