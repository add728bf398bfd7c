//! Session activity side channel.
//!
//! Observers (a voice frontend, the host bridge) watch what a session is
//! doing without touching the reply path: pipeline stage changes, model
//! reasoning diverted from the spoken stream, and profile summaries after
//! a synthesis. Delivery is best-effort over a broadcast channel; nothing
//! in the session ever blocks on a slow observer.

use serde::Serialize;
use tokio::sync::broadcast;

/// Buffered events per subscriber before the oldest are dropped.
const CHANNEL_CAPACITY: usize = 64;

/// One observable step of session activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActivityEvent {
    /// Pipeline stage change. `tool` and `detail` are empty when idle.
    Stage {
        /// Current stage name (`collecting`, `enriching`,
        /// `generating_xray`, `ready`).
        stage: String,
        /// Tool driving the stage, when one is.
        tool: String,
        /// Human-readable qualifier, e.g. `"General → Career"`.
        detail: String,
    },
    /// Model reasoning fragment, never part of the spoken reply.
    Reasoning {
        /// The reasoning text.
        text: String,
    },
    /// One-line profile summary published after a synthesis.
    ProfileSummary {
        /// The summary text.
        text: String,
    },
}

impl ActivityEvent {
    /// Convenience constructor for stage changes.
    pub fn stage(
        stage: impl Into<String>,
        tool: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::Stage {
            stage: stage.into(),
            tool: tool.into(),
            detail: detail.into(),
        }
    }

    /// Stage event marking the session idle and ready for the next turn.
    pub fn ready() -> Self {
        Self::stage("ready", "", "")
    }
}

/// Best-effort fan-out of [`ActivityEvent`]s.
///
/// Cloning shares the underlying channel. Publishing to a channel with no
/// subscribers drops the event silently; lagging subscribers lose the
/// oldest events and keep receiving.
#[derive(Debug, Clone)]
pub struct ActivityChannel {
    tx: broadcast::Sender<ActivityEvent>,
}

impl ActivityChannel {
    /// Create a channel with the default buffer size.
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ActivityEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: ActivityEvent) {
        // send only errs when there are no receivers; that is fine here.
        let _ = self.tx.send(event);
    }
}

impl Default for ActivityChannel {
    fn default() -> Self {
        Self::new()
    }
}
