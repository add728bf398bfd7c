//! Stdin/stdout JSON host for a single session.
//!
//! Reads newline-delimited JSON client messages from stdin, drives one
//! [`SessionOrchestrator`], and writes agent messages as newline-delimited
//! JSON to stdout. Activity events are forwarded on the same stream by a
//! background task.
//!
//! Stdout is exclusively reserved for the JSON protocol; all diagnostic
//! output (tracing, logs) must be routed to stderr.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::{AgentError, Result};
use crate::events::ActivityEvent;
use crate::session::{ConnectionParams, SeedMessage, SessionDeps, SessionOrchestrator, TurnOutcome};

/// Spoken instead of a reply when turn processing fails outright; the
/// session itself stays up.
const RETRY_LINE: &str = "I'm having a little trouble responding right now. Could you say \
    that again?";

/// One inbound message from the connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open the session. Must be the first message.
    Start {
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        conversation_history: Vec<SeedMessage>,
    },
    /// One finalized user utterance.
    Turn { text: String },
    /// Close the session and flush the transcript.
    End,
}

/// One outbound message to the connected client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    /// Normal spoken reply.
    Reply { text: String },
    /// Crisis interception replaced the reply.
    Override { text: String },
    /// Input screening refused the turn.
    Refused { text: String },
    /// Best-effort progress event.
    Activity { event: ActivityEvent },
    /// Protocol-level problem; the session stays usable.
    Error { message: String },
}

impl AgentMessage {
    fn from_outcome(outcome: TurnOutcome) -> Self {
        match outcome {
            TurnOutcome::CrisisOverride { response } => AgentMessage::Override { text: response },
            TurnOutcome::Refused { response } => AgentMessage::Refused { text: response },
            TurnOutcome::Reply { text } => AgentMessage::Reply { text },
        }
    }
}

/// Run the stdio host until stdin closes or an `end` message arrives.
///
/// Two tasks cooperate: the reader loop on the current task, and a
/// forwarder task that bridges activity events onto stdout. The
/// transcript is flushed on every exit path.
///
/// # Errors
///
/// Returns an error only when stdin or stdout themselves fail; session
/// level failures degrade into [`AgentMessage::Error`] lines instead.
pub async fn run_stdio_host(deps: SessionDeps) -> Result<()> {
    let reader = BufReader::new(tokio::io::stdin());
    let writer = Arc::new(Mutex::new(BufWriter::new(tokio::io::stdout())));
    run_host(deps, reader, writer).await
}

/// Host loop over arbitrary line-based transport halves.
async fn run_host<R, W>(deps: SessionDeps, reader: R, writer: Arc<Mutex<W>>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let event_writer = Arc::clone(&writer);
    let mut activity_rx = deps.activity.subscribe();
    let event_handle = tokio::spawn(async move {
        loop {
            match activity_rx.recv().await {
                Ok(event) => {
                    let message = AgentMessage::Activity { event };
                    match serde_json::to_string(&message) {
                        Ok(json) => {
                            let mut w = event_writer.lock().await;
                            if let Err(e) = write_line(&mut *w, &json).await {
                                warn!("failed to write activity event; stopping forwarder: {e}");
                                break;
                            }
                        }
                        Err(e) => error!("failed to serialize activity event; skipping: {e}"),
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged = n, "activity forwarder lagged; events dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let result = run_reader(deps, reader, Arc::clone(&writer)).await;

    event_handle.abort();
    let _ = event_handle.await;
    result
}

/// Read client lines and drive the session.
///
/// The archive flush runs on every exit, the error ones included: a
/// stdout pipe that breaks mid-session must not lose a transcript the
/// store can still keep.
async fn run_reader<R, W>(deps: SessionDeps, reader: R, writer: Arc<Mutex<W>>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut session: Option<SessionOrchestrator> = None;
    let result = read_loop(&deps, reader, &writer, &mut session).await;

    if let Some(mut orchestrator) = session.take() {
        if let Err(e) = orchestrator.finish() {
            error!("failed to archive conversation at teardown: {e}");
        }
    }
    result
}

async fn read_loop<R, W>(
    deps: &SessionDeps,
    mut reader: R,
    writer: &Arc<Mutex<W>>,
    session: &mut Option<SessionOrchestrator>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| AgentError::Channel(format!("failed to read from stdin: {e}")))?;
        if bytes_read == 0 {
            info!("stdin closed; shutting down host");
            return Ok(());
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let message: ClientMessage = match serde_json::from_str(trimmed) {
            Ok(message) => message,
            Err(e) => {
                warn!("unparseable client message: {e}");
                send(
                    writer,
                    &AgentMessage::Error {
                        message: format!("unparseable message: {e}"),
                    },
                )
                .await?;
                continue;
            }
        };

        match message {
            ClientMessage::Start {
                user_id,
                conversation_history,
            } => {
                if session.is_some() {
                    send(
                        writer,
                        &AgentMessage::Error {
                            message: "session already started".to_string(),
                        },
                    )
                    .await?;
                    continue;
                }
                let params = ConnectionParams {
                    user_id,
                    seed_history: conversation_history,
                };
                let mut orchestrator = SessionOrchestrator::start(deps.clone(), params).await;
                let greeting = orchestrator.greet().await;
                send(writer, &AgentMessage::Reply { text: greeting }).await?;
                *session = Some(orchestrator);
            }
            ClientMessage::Turn { text } => {
                let Some(orchestrator) = session.as_mut() else {
                    send(
                        writer,
                        &AgentMessage::Error {
                            message: "no active session; send start first".to_string(),
                        },
                    )
                    .await?;
                    continue;
                };
                let reply = match orchestrator.process_turn(&text).await {
                    Ok(outcome) => AgentMessage::from_outcome(outcome),
                    Err(e) => {
                        // The session survives a failed turn.
                        error!("turn processing failed: {e}");
                        AgentMessage::Reply {
                            text: RETRY_LINE.to_string(),
                        }
                    }
                };
                send(writer, &reply).await?;
            }
            ClientMessage::End => {
                info!("end received; shutting down host");
                return Ok(());
            }
        }
    }
}

async fn send<W>(writer: &Arc<Mutex<W>>, message: &AgentMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(message)
        .map_err(|e| AgentError::Channel(format!("failed to serialize agent message: {e}")))?;
    let mut w = writer.lock().await;
    write_line(&mut *w, &json).await
}

/// Write a single JSON line and flush.
async fn write_line<W>(writer: &mut W, json: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| AgentError::Channel(format!("failed to write to stdout: {e}")))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| AgentError::Channel(format!("failed to write newline to stdout: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| AgentError::Channel(format!("failed to flush stdout: {e}")))?;
    Ok(())
}
