// OAuth callback handling and its re-entrancy guard

pub mod coordinator;
pub mod guard;

pub use coordinator::{
    AuthError, CallbackCoordinator, CallbackOutcome, LoginStart, Phase, RequestContext,
};
pub use guard::ExchangeGuard;
