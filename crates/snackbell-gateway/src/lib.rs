//! # SnackBell Gateway
//!
//! HTTP API in front of the reminder scheduler and subscriber store.
//! Public routes serve the PWA (VAPID key, notification preferences, health);
//! `/api/v1/*` is the admin surface (manual runs, schedule, history).

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
