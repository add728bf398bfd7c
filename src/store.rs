//! Durable per-user profile store.
//!
//! Backed by a single SQLite database file. Each user owns up to four field
//! groups (`birth`, `enrichment`, `profile`, `conversations`), stored as one
//! JSON payload per group with an independent sliding expiry. A group whose
//! expiry has passed reads as absent and is purged lazily; every successful
//! read of a present group pushes its expiry out by the full retention
//! window again, so active users never age out.
//!
//! Thread-safe via an internal `Mutex<Connection>`. Calls are short-lived
//! synchronous file IO and are invoked directly from async code.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::enrichment::ChartDocument;
use crate::error::{AgentError, Result};
use crate::profile::ProfileDocument;

/// Fully resolved birth details. Only ever persisted as a whole: partial
/// collection progress lives in session state and never touches the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BirthDetails {
    /// Date of birth as the user gave it (e.g. "March 15, 1990").
    pub date_of_birth: String,
    /// Time of birth as the user gave it (e.g. "3:30 PM", "morning").
    pub time_of_birth: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Offset in hours from UTC at the birth moment.
    #[serde(rename = "timezone")]
    pub utc_offset_hours: f64,
}

/// One archived conversation. Field names match the transcript format the
/// clients already exchange, hence the camelCase wire names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub conversation_id: String,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<ConversationMessage>,
}

impl Conversation {
    /// New empty conversation with a fresh id, created now.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            conversation_id: uuid::Uuid::new_v4().to_string(),
            created_at: now_epoch_millis(),
            title: title.into(),
            messages: Vec::new(),
        }
    }
}

/// One transcript entry inside a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// "user" or "assistant".
    #[serde(rename = "from")]
    pub sender: String,
    pub message: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
}

impl ConversationMessage {
    pub fn now(sender: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            message: message.into(),
            timestamp: now_epoch_millis(),
        }
    }
}

/// Everything known about a user, loaded in one logical read.
///
/// Absent means absent: a `None` here is the signal the stage resolver keys
/// off, so the store never substitutes defaults.
#[derive(Debug, Default)]
pub struct StoredProfile {
    pub birth: Option<BirthDetails>,
    pub chart: Option<ChartDocument>,
    pub profile: Option<ProfileDocument>,
}

/// Field groups to persist in one atomic write. Only provided groups are
/// touched; the others keep their payloads and expiries.
#[derive(Debug, Default)]
pub struct SavedFields<'a> {
    pub birth: Option<&'a BirthDetails>,
    pub chart: Option<&'a ChartDocument>,
    pub profile: Option<&'a ProfileDocument>,
}

const GROUP_BIRTH: &str = "birth";
const GROUP_ENRICHMENT: &str = "enrichment";
const GROUP_PROFILE: &str = "profile";
const GROUP_CONVERSATIONS: &str = "conversations";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS user_records (
    user_id     TEXT NOT NULL,
    field_group TEXT NOT NULL,
    payload     TEXT NOT NULL,
    expires_at  INTEGER NOT NULL,
    PRIMARY KEY (user_id, field_group)
)";

/// SQLite-backed user store with sliding-expiry field groups.
pub struct UserStore {
    db_path: PathBuf,
    conn: Mutex<Connection>,
    ttl_secs: i64,
    max_conversations: usize,
}

impl UserStore {
    /// Open (or create) the database at the configured path.
    ///
    /// # Errors
    ///
    /// Returns a persistence error when the parent directory cannot be
    /// created or the database cannot be opened.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let db_path = config.resolved_db_path();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&db_path).map_err(persist_err)?;
        conn.execute(SCHEMA, []).map_err(persist_err)?;
        Ok(Self {
            db_path,
            conn: Mutex::new(conn),
            ttl_secs: config.ttl_secs(),
            max_conversations: config.max_conversations,
        })
    }

    /// The database file path.
    pub fn db_path(&self) -> &std::path::Path {
        &self.db_path
    }

    /// Persist the provided field groups in one transaction, each with a
    /// fresh full-length expiry. Groups not provided are untouched.
    pub fn save(&self, user_id: &str, fields: &SavedFields<'_>) -> Result<()> {
        let conn = self.lock()?;
        let expires_at = now_epoch_secs() + self.ttl_secs;
        let tx = conn.unchecked_transaction().map_err(persist_err)?;
        if let Some(birth) = fields.birth {
            write_group(&tx, user_id, GROUP_BIRTH, &to_payload(birth)?, expires_at)?;
        }
        if let Some(chart) = fields.chart {
            write_group(
                &tx,
                user_id,
                GROUP_ENRICHMENT,
                &to_payload(chart)?,
                expires_at,
            )?;
        }
        if let Some(profile) = fields.profile {
            write_group(
                &tx,
                user_id,
                GROUP_PROFILE,
                &to_payload(profile)?,
                expires_at,
            )?;
        }
        tx.commit().map_err(persist_err)
    }

    /// Load birth, chart, and profile groups for a user.
    ///
    /// Refreshes the expiry of every group found; expired groups are purged
    /// and read as `None`.
    pub fn load(&self, user_id: &str) -> Result<StoredProfile> {
        let conn = self.lock()?;
        let now = now_epoch_secs();
        let birth = self.read_group(&conn, user_id, GROUP_BIRTH, now)?;
        let chart = self.read_group(&conn, user_id, GROUP_ENRICHMENT, now)?;
        let profile = self.read_group(&conn, user_id, GROUP_PROFILE, now)?;
        Ok(StoredProfile {
            birth: from_payload(birth.as_deref())?,
            chart: from_payload(chart.as_deref())?,
            profile: from_payload(profile.as_deref())?,
        })
    }

    /// Whether unexpired birth details exist for this user.
    ///
    /// This is the returning-user signal; it does not refresh expiry.
    pub fn exists(&self, user_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let now = now_epoch_secs();
        let row: Option<i64> = conn
            .query_row(
                "SELECT expires_at FROM user_records WHERE user_id = ?1 AND field_group = ?2",
                params![user_id, GROUP_BIRTH],
                |row| row.get(0),
            )
            .optional()
            .map_err(persist_err)?;
        match row {
            Some(expires_at) if expires_at > now => Ok(true),
            Some(_) => {
                purge_group(&conn, user_id, GROUP_BIRTH)?;
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Prepend a conversation to the user's archive, trimming to the
    /// configured cap (oldest dropped first) and refreshing expiry.
    pub fn append_conversation(&self, user_id: &str, conversation: &Conversation) -> Result<()> {
        let conn = self.lock()?;
        let now = now_epoch_secs();
        let mut conversations = self.read_conversations(&conn, user_id, now, false)?;
        conversations.insert(0, conversation.clone());
        conversations.truncate(self.max_conversations);
        write_group(
            &conn,
            user_id,
            GROUP_CONVERSATIONS,
            &to_payload(&conversations)?,
            now + self.ttl_secs,
        )
    }

    /// The user's archived conversations, most recent first.
    pub fn list_conversations(&self, user_id: &str, limit: usize) -> Result<Vec<Conversation>> {
        let conn = self.lock()?;
        let now = now_epoch_secs();
        let mut conversations = self.read_conversations(&conn, user_id, now, true)?;
        conversations.truncate(limit);
        Ok(conversations)
    }

    /// Append messages to an archived conversation in place.
    ///
    /// Returns `false` without side effects when no conversation with the
    /// given id exists.
    pub fn update_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        new_messages: &[ConversationMessage],
    ) -> Result<bool> {
        let conn = self.lock()?;
        let now = now_epoch_secs();
        let mut conversations = self.read_conversations(&conn, user_id, now, false)?;
        let Some(conversation) = conversations
            .iter_mut()
            .find(|c| c.conversation_id == conversation_id)
        else {
            return Ok(false);
        };
        conversation.messages.extend_from_slice(new_messages);
        write_group(
            &conn,
            user_id,
            GROUP_CONVERSATIONS,
            &to_payload(&conversations)?,
            now + self.ttl_secs,
        )?;
        Ok(true)
    }

    // ── internals ──────────────────────────────────────────────────────

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| AgentError::Persistence(format!("lock poisoned: {e}")))
    }

    /// Read one group's payload, purging if expired and refreshing expiry
    /// otherwise.
    fn read_group(
        &self,
        conn: &Connection,
        user_id: &str,
        group: &str,
        now: i64,
    ) -> Result<Option<String>> {
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT payload, expires_at FROM user_records \
                 WHERE user_id = ?1 AND field_group = ?2",
                params![user_id, group],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(persist_err)?;
        let Some((payload, expires_at)) = row else {
            return Ok(None);
        };
        if expires_at <= now {
            tracing::debug!(user_id, group, "purging expired field group");
            purge_group(conn, user_id, group)?;
            return Ok(None);
        }
        conn.execute(
            "UPDATE user_records SET expires_at = ?1 \
             WHERE user_id = ?2 AND field_group = ?3",
            params![now + self.ttl_secs, user_id, group],
        )
        .map_err(persist_err)?;
        Ok(Some(payload))
    }

    fn read_conversations(
        &self,
        conn: &Connection,
        user_id: &str,
        now: i64,
        refresh: bool,
    ) -> Result<Vec<Conversation>> {
        let payload = if refresh {
            self.read_group(conn, user_id, GROUP_CONVERSATIONS, now)?
        } else {
            // Writers stamp a fresh expiry themselves; only drop stale data.
            let row: Option<(String, i64)> = conn
                .query_row(
                    "SELECT payload, expires_at FROM user_records \
                     WHERE user_id = ?1 AND field_group = ?2",
                    params![user_id, GROUP_CONVERSATIONS],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(persist_err)?;
            match row {
                Some((_, expires_at)) if expires_at <= now => {
                    purge_group(conn, user_id, GROUP_CONVERSATIONS)?;
                    None
                }
                Some((payload, _)) => Some(payload),
                None => None,
            }
        };
        Ok(from_payload(payload.as_deref())?.unwrap_or_default())
    }
}

fn write_group(
    conn: &Connection,
    user_id: &str,
    group: &str,
    payload: &str,
    expires_at: i64,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO user_records (user_id, field_group, payload, expires_at) \
         VALUES (?1, ?2, ?3, ?4)",
        params![user_id, group, payload, expires_at],
    )
    .map_err(persist_err)?;
    Ok(())
}

fn purge_group(conn: &Connection, user_id: &str, group: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM user_records WHERE user_id = ?1 AND field_group = ?2",
        params![user_id, group],
    )
    .map_err(persist_err)?;
    Ok(())
}

fn to_payload<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(persist_err)
}

fn from_payload<T: serde::de::DeserializeOwned>(payload: Option<&str>) -> Result<Option<T>> {
    match payload {
        Some(raw) => serde_json::from_str(raw).map(Some).map_err(persist_err),
        None => Ok(None),
    }
}

fn persist_err(e: impl std::fmt::Display) -> AgentError {
    AgentError::Persistence(e.to_string())
}

fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn now_epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
