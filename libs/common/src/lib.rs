pub mod envelope;
pub mod id;

pub use envelope::{ClientEnvelope, ServerEnvelope};
pub use id::prefixed_ulid;
