pub mod auth;
pub mod config;
pub mod progress;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use auth::{CallbackCoordinator, CallbackOutcome, RequestContext};
pub use config::Config;
pub use progress::{ProgressStreamClient, ProgressSnapshot};
pub use session::SessionStore;
pub use types::{SessionState, UserPatch, UserProfile};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
