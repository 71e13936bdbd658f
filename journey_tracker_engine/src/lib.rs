use const_format::concatcp;
use thiserror::Error;

pub mod config;
pub mod export;
pub mod fanout;
pub mod geo;
pub mod logging;
pub mod milestone;
pub mod progress;
pub mod rate_limit;
pub mod sampler;
mod session;
pub mod store;

pub use session::*;

pub const DEFAULT_DATA_DIR: &str = "data/";
pub const SLOT_FILE_NAME: &str = "current_journey.json";
pub const DEFAULT_SLOT_PATH: &str = concatcp!(DEFAULT_DATA_DIR, SLOT_FILE_NAME);
pub const PATH_FILE_SUFFIX: &str = ".path";

#[derive(Debug, Error)]
pub enum TrackerError {
    /// The user declined a location permission. Recoverable: re-request and
    /// retry the operation.
    #[error("{scope} location permission denied")]
    PermissionDenied { scope: sampler::PermissionScope },

    /// No fix could be obtained within the provider timeout. Transient; the
    /// sampling loop retries with backoff.
    #[error("no position fix available: {0}")]
    ProviderUnavailable(String),

    /// A single sink rejected or timed out on a delivery. Isolated at the
    /// fanout boundary; the next tick supersedes the lost update.
    #[error("delivery to sink {sink} failed: {reason}")]
    SinkDelivery { sink: String, reason: String },

    /// Rejected before any sampler work begins.
    #[error("invalid route: {0}")]
    InvalidRoute(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
