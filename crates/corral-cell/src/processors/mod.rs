//! Operation handlers: the state-transition rules between BBS records and
//! executor containers.
//!
//! Each processor handles one container identity per invocation. It reads
//! both truths fresh (the BBS rows and the executor container), picks
//! exactly one action from its transition table, and issues mutating calls
//! through the container delegate and the BBS client. Every transition is
//! idempotent: running the same operation twice against unchanged state is
//! a no-op.

mod lrp;
mod task;

pub use lrp::LrpProcessor;
pub use task::TaskProcessor;
