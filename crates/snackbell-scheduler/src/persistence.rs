//! SQLite-backed subscriber store.
//!
//! Holds user profiles (with their push subscription and notification switch)
//! and the one-per-user snack selection. The scheduler only reads it through
//! [`EligibilityQuery`]; the gateway writes preferences through [`SubscriberRegistry`].

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use snackbell_core::error::{Result, SnackBellError};
use snackbell_core::traits::{EligibilityQuery, SubscriberRegistry};
use snackbell_core::types::{PushEndpoint, SelectionRecord, Subscriber};

/// Subscriber database.
pub struct SubscriberDb {
    conn: Mutex<Connection>,
}

/// Notification switch + whether a push subscription is on file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationStatus {
    pub enabled: bool,
    pub has_subscription: bool,
}

/// Row counts for the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_users: u64,
    pub subscribed_users: u64,
    pub total_selections: u64,
}

/// Timestamps are stored as fixed-width RFC 3339 UTC text so they compare lexically.
fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn store_err(e: rusqlite::Error) -> SnackBellError {
    SnackBellError::Store(e.to_string())
}

impl SubscriberDb {
    /// Open or create the database file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| SnackBellError::Store(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    /// Throwaway database, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SnackBellError::Store(format!("DB open: {e}")))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SnackBellError::Store(format!("DB lock poisoned: {e}")))
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn()?
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL DEFAULT '',
                notifications_enabled INTEGER NOT NULL DEFAULT 0,
                push_subscription TEXT,          -- opaque Web Push subscription JSON
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- One active choice per user; a new choice replaces the old row.
            CREATE TABLE IF NOT EXISTS user_selections (
                user_id TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                items TEXT NOT NULL,             -- JSON array of item ids
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_user_selections_timestamp ON user_selections(timestamp);
            ",
            )
            .map_err(|e| SnackBellError::Store(format!("Migration: {e}")))
    }

    // ─── Users ────────────────────────────────────────────────

    /// Create a user or refresh their name/email.
    pub fn upsert_user(&self, id: &str, name: &str, email: &str) -> Result<()> {
        let now = ts(Utc::now());
        self.conn()?
            .execute(
                "INSERT INTO users (id, name, email, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(id) DO UPDATE SET name = ?2, email = ?3, updated_at = ?4",
                params![id, name, email, now],
            )
            .map_err(store_err)?;
        Ok(())
    }

    /// Set the notification switch and push subscription (None clears it).
    /// Returns false for an unknown user.
    pub fn set_notification_preferences(
        &self,
        id: &str,
        enabled: bool,
        endpoint: Option<&PushEndpoint>,
    ) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE users SET notifications_enabled = ?2, push_subscription = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![id, enabled as i32, endpoint.map(|e| e.as_str()), ts(Utc::now())],
            )
            .map_err(store_err)?;
        Ok(changed > 0)
    }

    /// Forget a user's push subscription, keeping the notification switch as is.
    pub fn clear_endpoint(&self, id: &str) -> Result<bool> {
        let changed = self
            .conn()?
            .execute(
                "UPDATE users SET push_subscription = NULL, updated_at = ?2
                 WHERE id = ?1 AND push_subscription IS NOT NULL",
                params![id, ts(Utc::now())],
            )
            .map_err(store_err)?;
        Ok(changed > 0)
    }

    pub fn notification_status(&self, id: &str) -> Result<Option<NotificationStatus>> {
        self.conn()?
            .query_row(
                "SELECT notifications_enabled, push_subscription IS NOT NULL FROM users WHERE id = ?1",
                params![id],
                |row| {
                    Ok(NotificationStatus {
                        enabled: row.get::<_, i32>(0)? != 0,
                        has_subscription: row.get::<_, i32>(1)? != 0,
                    })
                },
            )
            .optional()
            .map_err(store_err)
    }

    // ─── Selections ───────────────────────────────────────────

    /// Record a user's snack choice, replacing any previous one.
    pub fn record_selection(
        &self,
        user_id: &str,
        items: &[String],
        at: DateTime<Utc>,
    ) -> Result<SelectionRecord> {
        let items: BTreeSet<String> = items.iter().cloned().collect();
        let json = serde_json::to_string(&items)?;
        self.conn()?
            .execute(
                "INSERT INTO user_selections (user_id, items, timestamp) VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id) DO UPDATE SET items = ?2, timestamp = ?3",
                params![user_id, json, ts(at)],
            )
            .map_err(store_err)?;
        Ok(SelectionRecord {
            subscriber_id: user_id.to_string(),
            items,
            updated_at: at,
        })
    }

    pub fn clear_selection(&self, user_id: &str) -> Result<bool> {
        let removed = self
            .conn()?
            .execute("DELETE FROM user_selections WHERE user_id = ?1", params![user_id])
            .map_err(store_err)?;
        Ok(removed > 0)
    }

    pub fn selection(&self, user_id: &str) -> Result<Option<SelectionRecord>> {
        let row: Option<(String, String)> = self
            .conn()?
            .query_row(
                "SELECT items, timestamp FROM user_selections WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(store_err)?;

        let Some((items, timestamp)) = row else {
            return Ok(None);
        };
        let updated_at = DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| SnackBellError::Store(format!("Bad selection timestamp '{timestamp}': {e}")))?
            .with_timezone(&Utc);
        Ok(Some(SelectionRecord {
            subscriber_id: user_id.to_string(),
            items: serde_json::from_str(&items)?,
            updated_at,
        }))
    }

    // ─── Queries ──────────────────────────────────────────────

    /// Users with notifications on, a subscription on file, and no selection
    /// timestamped inside `[start, end]`.
    pub fn users_without_selections(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Subscriber>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT u.id, u.name, u.email, u.push_subscription
                 FROM users u
                 WHERE u.notifications_enabled = 1
                   AND u.push_subscription IS NOT NULL
                   AND NOT EXISTS (
                       SELECT 1 FROM user_selections s
                       WHERE s.user_id = u.id AND s.timestamp >= ?1 AND s.timestamp <= ?2
                   )
                 ORDER BY u.name, u.id",
            )
            .map_err(store_err)?;

        let rows = stmt
            .query_map(params![ts(start), ts(end)], |row| {
                Ok(Subscriber {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    email: row.get(2)?,
                    endpoint: PushEndpoint::new(row.get::<_, String>(3)?),
                    enabled: true,
                })
            })
            .map_err(store_err)?;

        rows.collect::<std::result::Result<Vec<_>, _>>().map_err(store_err)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn()?;
        let count = |sql: &str| -> Result<u64> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
                .map_err(store_err)
        };
        Ok(StoreStats {
            total_users: count("SELECT COUNT(*) FROM users")?,
            subscribed_users: count(
                "SELECT COUNT(*) FROM users WHERE notifications_enabled = 1 AND push_subscription IS NOT NULL",
            )?,
            total_selections: count("SELECT COUNT(*) FROM user_selections")?,
        })
    }
}

#[async_trait]
impl EligibilityQuery for SubscriberDb {
    async fn find_unselected(
        &self,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<Vec<Subscriber>> {
        self.users_without_selections(period_start, period_end)
            .map_err(|e| SnackBellError::EligibilityQuery(e.to_string()))
    }
}

#[async_trait]
impl SubscriberRegistry for SubscriberDb {
    async fn update_notification_preferences(
        &self,
        subscriber_id: &str,
        enabled: bool,
        endpoint: Option<PushEndpoint>,
    ) -> Result<()> {
        if self.set_notification_preferences(subscriber_id, enabled, endpoint.as_ref())? {
            Ok(())
        } else {
            Err(SnackBellError::Store(format!("unknown subscriber '{subscriber_id}'")))
        }
    }

    async fn deregister_endpoint(&self, subscriber_id: &str) -> Result<bool> {
        self.clear_endpoint(subscriber_id)
    }
}
