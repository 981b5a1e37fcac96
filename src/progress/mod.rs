// Server-push progress channel for long-running analysis runs

pub mod events;
pub mod stream;

pub use events::{AnalysisStatus, DetailLine, ProgressEvent, ProgressSnapshot, StatusUpdate};
pub use stream::{ProgressCallbacks, ProgressStreamClient, StreamOptions, TRANSPORT_LOST};
