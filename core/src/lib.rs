//! Root of the `livesync-core` library.

// Prevent accidental direct writes to stdout/stderr in library code. All
// user-visible output must go through the tracing stack or a
// `NotificationSink`.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod cache;
pub mod clock;
pub mod config;
pub mod entities;
pub mod error;
pub mod notify;
pub mod panel;
pub mod panels;
pub mod reconcile;
pub mod request;
pub mod runtime;
pub mod stream;
pub mod timers;

pub use config::ConfigLoader;
pub use config::LiveSyncConfig;
pub use error::ConfigError;
pub use error::RequestError;
pub use error::RequestResult;
pub use error::RuntimeStopped;
pub use error::StreamError;
pub use panel::PanelLimits;
pub use panel::PanelState;
pub use request::RequestClient;
pub use runtime::PanelDeps;
pub use runtime::PanelHandle;
pub use runtime::PanelRuntime;
pub use stream::StreamClient;
