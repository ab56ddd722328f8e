//! # SnackBell Core
//!
//! Shared building blocks for the SnackBell reminder service:
//! configuration, the error type, the domain data model, and the
//! capability traits the scheduler consumes (subscriber store, push transport).

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::SnackBellConfig;
pub use error::{Result, SnackBellError};
pub use traits::{EligibilityQuery, PushResponse, PushTransport, SubscriberRegistry};
pub use types::{
    DeliveryOutcome, DeliveryStatus, NotificationAction, NotificationData, NotificationPayload,
    PushEndpoint, SelectionRecord, Subscriber,
};
