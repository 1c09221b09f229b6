// Aggregates all former standalone integration tests as modules.
mod request;
mod runtime;
mod sse_transport;
mod stream_client;
