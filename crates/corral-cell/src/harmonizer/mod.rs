//! The harmonizer: the two producers that feed the operation queue.
//!
//! The bulker snapshots authoritative state on a timer; the event consumer
//! reacts to executor push events. Neither mutates anything — both only
//! derive operations and push them into the per-key queue.

mod bulker;
mod events;

pub use bulker::Bulker;
pub use events::EventConsumer;
