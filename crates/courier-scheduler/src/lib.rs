//! # Courier Scheduler
//!
//! The scheduled dispatch engine: accepts messages due in the future,
//! persists them, and delivers each one exactly when due through a channel
//! that may come and go underneath it.
//!
//! ## Architecture
//! ```text
//! DispatchEngine
//!   ├── MessageStore   — durable JSON snapshot, source of truth for pending work
//!   ├── TimerRegistry  — one armed tokio timer per pending message id
//!   └── Channel        — external adapter: is_ready / send / is_registered
//!
//! schedule → validate → persist (pending) → arm timer
//! fire     → re-check readiness → send (bounded retries) → sent | failed
//! cancel   → mark cancelled → disarm timer
//! restart  → reload pending records → re-arm (overdue fires immediately)
//! ```
//!
//! The registry holds no durable state; only the store survives restarts.

pub mod engine;
pub mod store;
pub mod timers;

pub use engine::{DispatchEngine, RetryPolicy};
pub use store::MessageStore;
pub use timers::TimerRegistry;
