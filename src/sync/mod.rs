pub mod coordinator;
pub mod fetcher;
pub mod timing;

pub use coordinator::{CycleError, CycleReport, SyncCoordinator, SyncPhase};
pub use fetcher::{FetchFailure, FetchOutcome, PageFetcher};
