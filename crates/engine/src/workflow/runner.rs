//! Asynchronous workflow runner that streams lifecycle events and responds to
//! cancel controls.
//!
//! This module drives the synchronous [`WorkflowEngine`] against an [`ExecutionClient`],
//! emitting [`RunEvent`]s over a Tokio channel. The caller owns the event receiver and
//! issues [`RunControl`] commands through the control channel. A cancel received while a
//! request is in flight drops the execution future and finalizes the run immediately.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::Utc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tracing::{debug, info, warn};
use weft_types::{RunControl, RunEvent, RunOrigin, RunReport, WorkflowHistoryEntry};
use weft_util::HistorySink;

use super::interpreter::{Directive, ResponseEvent, RunRequest, WorkflowEngine};
use crate::executor::ExecutionClient;
use crate::expr::ExpressionEvaluator;

/// Collaborators a run is driven with.
#[derive(Clone)]
pub struct RunServices {
    pub evaluator: Arc<dyn ExpressionEvaluator>,
    pub client: Arc<dyn ExecutionClient>,
    /// Receives one entry per finished declared-workflow run.
    pub history: Option<Arc<dyn HistorySink>>,
}

/// Drives a run to completion while emitting lifecycle events.
///
/// Validation failures are emitted as [`RunEvent::Error`] and returned; nothing is
/// dispatched in that case.
pub async fn drive_workflow_run(
    request: RunRequest,
    services: RunServices,
    mut control_rx: UnboundedReceiver<RunControl>,
    event_tx: UnboundedSender<RunEvent>,
) -> Result<RunReport> {
    let history_entry = HistoryTemplate::from_request(&request);
    let total_steps = request.workflow.steps.len();

    let mut engine = WorkflowEngine::new(services.evaluator.clone());
    let mut directive = match engine.start(request) {
        Ok(directive) => directive,
        Err(error) => {
            let _ = event_tx.send(RunEvent::Error { message: error.to_string() });
            return Err(anyhow!(error).context("workflow run could not start"));
        }
    };

    let _ = event_tx.send(RunEvent::RunStarted {
        run_id: engine.last_run_id(),
        workflow: history_entry.name.clone(),
        total_steps,
        at: Utc::now(),
    });

    let mut control_state = ControlState::default();
    let mut emitted = 0usize;

    let report = loop {
        emit_progress(&mut engine, &directive, &mut emitted, &event_tx);

        drain_pending_commands(&mut control_state, &mut control_rx);
        if control_state.cancel_requested && engine.is_active() {
            break cancel_run(&mut engine, &mut control_state)?;
        }

        let dispatch = match directive {
            Directive::Finished(report) => break *report,
            Directive::Dispatch(dispatch) => dispatch,
            Directive::Stale => {
                engine.cancel(Some("interpreter lost track of the in-flight request".into()));
                return Err(anyhow!("workflow run stalled without an in-flight request"));
            }
        };

        let _ = event_tx.send(RunEvent::StepStarted {
            token: dispatch.token,
            status_line: dispatch.status_line.clone(),
        });

        let token = dispatch.token;
        let mut execution = services.client.execute(dispatch.request, dispatch.options, dispatch.variables);
        let outcome = loop {
            tokio::select! {
                outcome = &mut execution => break Some(outcome),
                command = control_rx.recv(), if !control_state.closed => match command {
                    Some(command) => {
                        control_state.process_command(command);
                        if control_state.cancel_requested {
                            break None;
                        }
                    }
                    None => control_state.closed = true,
                },
            }
        };

        directive = match outcome {
            Some(outcome) => engine.handle_response(ResponseEvent { token, outcome }),
            None => {
                drop(execution);
                break cancel_run(&mut engine, &mut control_state)?;
            }
        };
    };

    emit_remaining(&report, &mut emitted, &event_tx);

    if report.origin == RunOrigin::Workflow
        && let Some(history) = &services.history
        && let Err(error) = history.append(history_entry.finish(&report))
    {
        warn!(workflow = %report.workflow, error = %error, "failed to append workflow history");
    }

    let _ = event_tx.send(RunEvent::RunCompleted { report: report.clone() });
    Ok(report)
}

fn cancel_run(engine: &mut WorkflowEngine, control_state: &mut ControlState) -> Result<RunReport> {
    engine
        .cancel(control_state.reason.take())
        .ok_or_else(|| anyhow!("cancel requested with no active run"))
}

/// Emits step results recorded since the last call plus any surfaced errors.
fn emit_progress(engine: &mut WorkflowEngine, directive: &Directive, emitted: &mut usize, event_tx: &UnboundedSender<RunEvent>) {
    for message in engine.drain_errors() {
        let _ = event_tx.send(RunEvent::Error { message });
    }
    let results = match directive {
        Directive::Finished(report) => report.results.as_slice(),
        _ => engine.results(),
    };
    for result in results.iter().skip(*emitted) {
        let _ = event_tx.send(RunEvent::StepFinished { result: result.clone() });
    }
    *emitted = (*emitted).max(results.len());
}

fn emit_remaining(report: &RunReport, emitted: &mut usize, event_tx: &UnboundedSender<RunEvent>) {
    for result in report.results.iter().skip(*emitted) {
        let _ = event_tx.send(RunEvent::StepFinished { result: result.clone() });
    }
    *emitted = report.results.len();
}

fn drain_pending_commands(control_state: &mut ControlState, control_rx: &mut UnboundedReceiver<RunControl>) {
    loop {
        match control_rx.try_recv() {
            Ok(command) => control_state.process_command(command),
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => {
                control_state.closed = true;
                break;
            }
        }
    }
}

#[derive(Default)]
struct ControlState {
    cancel_requested: bool,
    reason: Option<String>,
    /// The control channel has no senders left.
    closed: bool,
}

impl ControlState {
    fn process_command(&mut self, command: RunControl) {
        match command {
            RunControl::Cancel { reason } => {
                if !self.cancel_requested {
                    info!(reason = ?reason, "workflow run cancel requested");
                    self.cancel_requested = true;
                    self.reason = reason;
                }
            }
        }
    }
}

/// History fields captured before the request is consumed by the engine.
struct HistoryTemplate {
    name: String,
    definition_text: String,
    tags: Vec<String>,
    description: Option<String>,
}

impl HistoryTemplate {
    fn from_request(request: &RunRequest) -> Self {
        let definition_text = serde_yaml::to_string(&request.workflow).unwrap_or_else(|error| {
            debug!(error = %error, "workflow definition could not be serialized for history");
            String::new()
        });
        Self {
            name: request.workflow.name.clone(),
            definition_text,
            tags: request.workflow.tags.clone(),
            description: request.workflow.description.clone(),
        }
    }

    fn finish(&self, report: &RunReport) -> WorkflowHistoryEntry {
        WorkflowHistoryEntry {
            name: self.name.clone(),
            status_summary: report.summary.clone(),
            duration_ms: report.duration_ms(),
            definition_text: self.definition_text.clone(),
            tags: self.tags.clone(),
            description: self.description.clone(),
        }
    }
}
