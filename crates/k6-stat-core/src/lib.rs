pub mod config;
pub mod error;
pub mod report;
pub mod samples;
pub mod session;
pub mod store;

pub use config::StoreConfig;
pub use error::StatError;
pub use samples::{SortBy, Test, TestSamples, TestSamplesDiff};
pub use session::Session;
pub use store::{ClickhouseClient, SampleSource};
