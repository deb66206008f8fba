pub mod bulk;
pub mod catalog;
pub mod config;
pub mod detector;
pub mod error;
pub mod hasher;
pub mod importer;
pub mod invoker;
pub mod jobs;
pub mod lifecycle;
pub mod log_model;
pub mod pipeline;
pub mod pool;
pub mod progress;
pub mod queue;
pub mod storage;

pub use bulk::{bulk_import, collect_inputs, BulkSummary};
pub use config::{load_configuration, AppConfig};
pub use detector::{Detector, Notification};
pub use error::Error;
pub use importer::{ImportOutcome, Importer, SkipReason};
pub use invoker::{EliteInsightsInvoker, ParserInvoker, ParserOutput};
pub use lifecycle::{FileState, StorageLayout};
pub use pipeline::{FileOutcome, Pipeline};
pub use pool::{IngestService, ServiceControl, ServiceHandle, StatsSnapshot};
pub use progress::{ProgressReporter, SilentReporter};
