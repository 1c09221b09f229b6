//! The reconnecting event stream.

mod backoff;
mod client;
mod transport;

pub use backoff::ReconnectBackoff;
pub use client::StreamClient;
pub use client::StreamState;
pub use client::StreamUpdate;
pub use transport::DEFAULT_CHANNEL;
pub use transport::EventTransport;
pub use transport::FrameStream;
pub use transport::HttpEventTransport;
pub use transport::SseFrame;
