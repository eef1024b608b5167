//! Remote data ingestion.
//!
//! - HTTP/timing seams (`transport`)
//! - retry/backoff state machine (`retry`)
//! - co2map API fetch protocol (`co2map`)
//! - resumable per-entity batch sync (`fetcher`)

pub mod co2map;
pub mod fetcher;
pub mod retry;
pub mod transport;

pub use co2map::{BatchResult, BatchStatus, DEFAULT_BASE_URL, IntensityClient};
pub use fetcher::{BatchFetcher, EntityOutcome, SyncReport};
pub use transport::{HttpReply, Pause, ReqwestTransport, ThreadPause, Transport, TransportError};
