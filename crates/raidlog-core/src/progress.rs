/// Trait for reporting bulk import progress.
///
/// CLI implements with indicatif. All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_import_start(&self, _total_files: usize) {}
    fn on_file_complete(&self, _done: usize, _total_files: usize, _source_name: &str) {}
    fn on_import_complete(&self, _done: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
