//! Tracking and cancellation of in-flight tool executions
//!
//! Every running tool call is registered under its turn id and call id.
//! Provider call ids are only unique within a turn, so two turns may run
//! calls with the same id side by side. The tracker is the only place that
//! knows whether a call is still live, and the only way to cancel one. All
//! bookkeeping happens under a single mutex, so at most one execution per
//! key can exist at any instant.

use crate::config::OrchestratorConfig;
use crate::error::{ToolError, TrackerError};
use crate::tools::{ToolCallResult, ToolOutput};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Future produced by a tool invocation
pub type ToolTask = BoxFuture<'static, Result<ToolOutput, ToolError>>;

/// Time limits applied to each execution.
///
/// A detached task is given one more `timeout` to wind down before it is
/// aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// Hard ceiling after which the call is detached as timed out
    pub timeout: Duration,

    /// How long a cancelled call may keep running before it is detached
    pub cancel_grace: Duration,
}

type CallKey = (String, String);

fn key(turn_id: &str, call_id: &str) -> CallKey {
    (turn_id.to_string(), call_id.to_string())
}

impl From<&OrchestratorConfig> for ExecutionLimits {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            timeout: config.tool_timeout(),
            cancel_grace: config.cancel_grace(),
        }
    }
}

/// Terminal outcome of one execution
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed(ToolOutput),
    Failed(ToolError),
    Cancelled,
    TimedOut,
}

/// A settled execution, as delivered to the awaiting handle
#[derive(Debug, Clone)]
pub struct SettledExecution {
    pub tool_call_id: String,
    pub tool_name: String,
    pub outcome: ExecutionOutcome,
    pub duration: Duration,
}

impl SettledExecution {
    pub fn is_cancelled(&self) -> bool {
        matches!(self.outcome, ExecutionOutcome::Cancelled)
    }

    /// Convert into the result fed back to the model
    pub fn into_result(self) -> ToolCallResult {
        let duration_ms = self.duration.as_millis() as u64;
        let result = match self.outcome {
            ExecutionOutcome::Completed(output) => {
                ToolCallResult::success(self.tool_call_id, output)
            }
            ExecutionOutcome::Failed(error) => ToolCallResult::error(self.tool_call_id, &error),
            ExecutionOutcome::Cancelled => ToolCallResult::error(
                self.tool_call_id,
                &ToolError::Cancelled {
                    name: self.tool_name,
                },
            ),
            ExecutionOutcome::TimedOut => ToolCallResult::error(
                self.tool_call_id,
                &ToolError::Timeout {
                    name: self.tool_name,
                },
            ),
        };
        result.with_duration(duration_ms)
    }
}

/// Identifies one particular execution of a call id within a turn.
///
/// A call id can be reused once its previous execution has been removed, so
/// completions carry the generation they belong to; a stale completion never
/// touches a newer entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionTicket {
    turn_id: String,
    call_id: String,
    generation: u64,
}

impl ExecutionTicket {
    pub fn turn_id(&self) -> &str {
        &self.turn_id
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    fn key(&self) -> CallKey {
        key(&self.turn_id, &self.call_id)
    }
}

/// Awaitable side of a started execution
#[derive(Debug)]
pub struct ExecutionHandle {
    ticket: ExecutionTicket,
    tool_name: String,
    receiver: oneshot::Receiver<SettledExecution>,
}

impl ExecutionHandle {
    /// Wait until the execution settles
    pub async fn wait(self) -> SettledExecution {
        match self.receiver.await {
            Ok(settled) => settled,
            Err(_) => SettledExecution {
                tool_call_id: self.ticket.call_id,
                tool_name: self.tool_name.clone(),
                outcome: ExecutionOutcome::Failed(ToolError::failed(
                    self.tool_name,
                    "execution was dropped before it settled",
                )),
                duration: Duration::ZERO,
            },
        }
    }
}

struct InFlight {
    generation: u64,
    tool_name: String,
    cancel: CancellationToken,
    started_at: Instant,
    sender: oneshot::Sender<SettledExecution>,
}

/// Registry of running tool executions keyed by turn and call id
#[derive(Default)]
pub struct ToolExecutionTracker {
    entries: Mutex<HashMap<CallKey, InFlight>>,
    next_generation: AtomicU64,
}

impl ToolExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CallKey, InFlight>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking a call and spawn its task.
    ///
    /// The task receives a cancellation token that is a child of `parent`, so
    /// cancelling the parent cancels every call started under it. Returns
    /// immediately; the returned handle is what suspends. Fails only when the
    /// same call id is already live within `turn_id`.
    pub fn start<F>(
        self: &Arc<Self>,
        turn_id: &str,
        call_id: &str,
        tool_name: &str,
        parent: &CancellationToken,
        limits: ExecutionLimits,
        task: F,
    ) -> Result<ExecutionHandle, TrackerError>
    where
        F: FnOnce(CancellationToken) -> ToolTask,
    {
        let cancel = parent.child_token();
        let (sender, receiver) = oneshot::channel();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        {
            let mut entries = self.entries();
            let key = key(turn_id, call_id);
            if entries.contains_key(&key) {
                return Err(TrackerError::AlreadyRunning {
                    tool_call_id: call_id.to_string(),
                });
            }
            entries.insert(
                key,
                InFlight {
                    generation,
                    tool_name: tool_name.to_string(),
                    cancel: cancel.clone(),
                    started_at: Instant::now(),
                    sender,
                },
            );
        }

        let ticket = ExecutionTicket {
            turn_id: turn_id.to_string(),
            call_id: call_id.to_string(),
            generation,
        };
        tracing::debug!(turn_id = %turn_id, tool_call_id = %call_id, tool = %tool_name, "Tool execution started");

        let worker = tokio::spawn(task(cancel.clone()));
        let tracker = Arc::clone(self);
        let supervised = ticket.clone();
        let name = tool_name.to_string();
        tokio::spawn(async move {
            tracker
                .supervise(supervised, name, worker, cancel, limits)
                .await;
        });

        Ok(ExecutionHandle {
            ticket,
            tool_name: tool_name.to_string(),
            receiver,
        })
    }

    /// Request cancellation of a live call of `turn_id`.
    ///
    /// Returns `false` when the call is unknown, already settled, or already
    /// cancelled.
    pub fn cancel(&self, turn_id: &str, call_id: &str) -> bool {
        let entries = self.entries();
        match entries.get(&key(turn_id, call_id)) {
            Some(entry) if !entry.cancel.is_cancelled() => {
                entry.cancel.cancel();
                tracing::info!(turn_id = %turn_id, tool_call_id = %call_id, tool = %entry.tool_name, "Tool call cancellation requested");
                true
            }
            _ => false,
        }
    }

    /// Record the natural finish of an execution.
    ///
    /// Removes the entry and resolves its handle. A cancellation requested
    /// before this point wins over the tool's own result. Returns `false` if
    /// the execution had already been detached, in which case the result is
    /// discarded.
    pub fn complete(
        &self,
        ticket: &ExecutionTicket,
        result: Result<ToolOutput, ToolError>,
    ) -> bool {
        let Some(entry) = self.take(ticket) else {
            tracing::warn!(turn_id = %ticket.turn_id, tool_call_id = %ticket.call_id, "Discarding late tool result");
            return false;
        };

        let outcome = if entry.cancel.is_cancelled() {
            ExecutionOutcome::Cancelled
        } else {
            match result {
                Ok(output) => ExecutionOutcome::Completed(output),
                Err(ToolError::Cancelled { .. }) => ExecutionOutcome::Cancelled,
                Err(error) => ExecutionOutcome::Failed(error),
            }
        };

        Self::settle(&ticket.call_id, entry, outcome);
        true
    }

    /// Whether a call is tracked and has not been asked to stop
    pub fn is_running(&self, turn_id: &str, call_id: &str) -> bool {
        self.entries()
            .get(&key(turn_id, call_id))
            .map(|entry| !entry.cancel.is_cancelled())
            .unwrap_or(false)
    }

    /// Number of tracked executions, including ones winding down after cancel
    pub fn running_count(&self) -> usize {
        self.entries().len()
    }

    /// Remove the entry belonging to exactly this execution
    fn take(&self, ticket: &ExecutionTicket) -> Option<InFlight> {
        let mut entries = self.entries();
        let key = ticket.key();
        match entries.get(&key) {
            Some(entry) if entry.generation == ticket.generation => entries.remove(&key),
            _ => None,
        }
    }

    /// Force an execution out of the tracker without waiting for its task
    fn detach(&self, ticket: &ExecutionTicket, outcome: ExecutionOutcome) -> bool {
        match self.take(ticket) {
            Some(entry) => {
                entry.cancel.cancel();
                Self::settle(&ticket.call_id, entry, outcome);
                true
            }
            None => false,
        }
    }

    fn settle(call_id: &str, entry: InFlight, outcome: ExecutionOutcome) {
        let settled = SettledExecution {
            tool_call_id: call_id.to_string(),
            tool_name: entry.tool_name,
            outcome,
            duration: entry.started_at.elapsed(),
        };
        tracing::debug!(
            tool_call_id = %call_id,
            tool = %settled.tool_name,
            outcome = ?settled.outcome,
            duration_ms = settled.duration.as_millis() as u64,
            "Tool execution settled"
        );
        // The receiver may be gone if the turn stopped listening
        let _ = entry.sender.send(settled);
    }

    async fn supervise(
        self: Arc<Self>,
        ticket: ExecutionTicket,
        tool_name: String,
        mut worker: JoinHandle<Result<ToolOutput, ToolError>>,
        cancel: CancellationToken,
        limits: ExecutionLimits,
    ) {
        let deadline = Instant::now() + limits.timeout;

        tokio::select! {
            joined = &mut worker => {
                self.complete(&ticket, flatten(&tool_name, joined));
                return;
            }
            _ = tokio::time::sleep_until(deadline) => {
                tracing::warn!(
                    tool_call_id = %ticket.call_id,
                    tool = %tool_name,
                    timeout_ms = limits.timeout.as_millis() as u64,
                    "Tool call timed out, detaching"
                );
                self.detach(&ticket, ExecutionOutcome::TimedOut);
            }
            _ = cancel.cancelled() => {
                let grace_deadline = deadline.min(Instant::now() + limits.cancel_grace);
                tokio::select! {
                    joined = &mut worker => {
                        self.complete(&ticket, flatten(&tool_name, joined));
                        return;
                    }
                    _ = tokio::time::sleep_until(grace_deadline) => {
                        tracing::warn!(
                            tool_call_id = %ticket.call_id,
                            tool = %tool_name,
                            "Tool ignored cancellation, detaching"
                        );
                        self.detach(&ticket, ExecutionOutcome::Cancelled);
                    }
                }
            }
        }

        // Detached: give the task one more timeout to run out, then abort it
        match tokio::time::timeout(limits.timeout, &mut worker).await {
            Ok(joined) => {
                self.complete(&ticket, flatten(&tool_name, joined));
            }
            Err(_) => {
                worker.abort();
                tracing::warn!(
                    turn_id = %ticket.turn_id,
                    tool_call_id = %ticket.call_id,
                    tool = %tool_name,
                    "Detached tool never finished, aborted and result dropped"
                );
            }
        }
    }
}

fn flatten(
    tool_name: &str,
    joined: Result<Result<ToolOutput, ToolError>, JoinError>,
) -> Result<ToolOutput, ToolError> {
    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(ToolError::failed(tool_name, "tool panicked")),
        Err(_) => Err(ToolError::Cancelled {
            name: tool_name.to_string(),
        }),
    }
}
