//! Production side of the engine
//!
//! [`Publisher`] routes each event kind to its registry topic, encodes it as
//! JSON, picks a partition key and hands it to that topic's batcher. Batches
//! are written with full replica acknowledgment.

mod batcher;
pub mod publisher;

pub use publisher::{partition_key, Publisher};
