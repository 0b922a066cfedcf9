//! Outbound transaction scheduling: priority classes, the transaction
//! comparator, the pending queue and the send loop that owns the single
//! transmission slot.

pub mod link;
pub mod queue;
pub mod service;
pub mod transaction;

pub use link::{AssumeListening, Link, OutcomeSink, TargetStateSource};
pub use queue::{QueueFull, TransactionQueue};
pub use service::{Scheduler, SchedulerError};
pub use transaction::{compare, MessagePriority, SortKey, Target, TargetState, Transaction};
