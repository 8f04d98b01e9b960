pub mod types;
pub mod store;
pub mod config;

// Re-export commonly used types for convenience
pub use types::{ExecutionOutcome, ParsedOutput, RolloutRecord, RunSummary, SamplingParams, Split, Task};
pub use config::{Config, ConfigError};
pub use store::{RolloutSink, RolloutWriter, StoreError};
