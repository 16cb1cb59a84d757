//! Event-driven timer and I/O reactor.
//!
//! The reactor tracks armed watchers and notifies suspended tasks when they are ready to
//! progress.

pub mod reactor;
pub use reactor::Reactor;
pub(crate) use reactor::turn;
