//! # SnackBell Scheduler
//!
//! Weekly deadline reminder: once per configured weekday/time, find everyone
//! who hasn't picked a snack yet and push them a notification.
//!
//! ## Architecture
//! ```text
//! spawn_scheduler (tokio interval)
//!   └── on_tick → due_occurrence? ─ no ─→ idle
//!                      │ yes
//!                      ▼
//!        ReminderScheduler::run_reminders (RunGuard: one run at a time)
//!          ├── EligibilityQuery::find_unselected(today in schedule tz)
//!          ├── NotificationComposer::compose
//!          ├── PushDispatcher::dispatch_all (Semaphore + JoinSet)
//!          │     └── PushTransport (relay over HTTP / dry run)
//!          └── RunReport → history (last 20)
//! ```
//!
//! Persistence is SQLite via [`SubscriberDb`], which implements both the
//! eligibility query and the subscriber registry.

pub mod compose;
pub mod deadline;
pub mod dispatch;
pub mod persistence;
pub mod reminder;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use compose::NotificationComposer;
pub use deadline::{Schedule, due_occurrence, next_occurrence, selection_window};
pub use dispatch::{FanOut, PushDispatcher};
pub use persistence::{NotificationStatus, StoreStats, SubscriberDb};
pub use reminder::{ReminderScheduler, RunReport, RunTrigger, TickDecision, spawn_scheduler};
pub use transport::{DryRunTransport, RelayPushTransport, transport_from_config};
