//! Wire-level types shared by the sync core and its tools.
//!
//! The server pushes every domain change as a server-sent event whose
//! data line carries a JSON envelope. [`envelope::parse`] classifies a raw
//! data line, [`events`] names the known event families, and [`status`]
//! holds the lifecycle enums carried inside event payloads.

pub mod envelope;
pub mod events;
pub mod status;
pub mod value;

pub use envelope::CustomEvent;
pub use envelope::EnvelopeKind;
pub use envelope::EventEnvelope;
pub use events::EventName;
