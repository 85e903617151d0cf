//! Control-flow interpreter.
//!
//! [`WorkflowEngine`] owns at most one [`RunState`] and never blocks. Each call returns a
//! [`Directive`]: dispatch one request and report back with a [`ResponseEvent`] carrying
//! the same token, or take the finished [`RunReport`]. The interpreter is a flat loop over
//! declared steps; branches resolve to a concrete request step up front and loops are
//! driven by the active step's cursor, so nested constructs never need a call stack.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use weft_types::{
    DispatchToken, Document, ExecutionOptions, ExecutionOutcome, Iteration, OnFailure, RunOrigin, RunReport, RunStatus, StepKind,
    StepResult, StepStatus, WorkflowDefinition, WorkflowStep,
};

use super::definition::{ResolvedWorkflow, resolve_workflow};
use super::dispatch::{ActiveStep, NextAction, Progress, ResolveContext, evaluate_expression, expression_message};
use super::outcome::judge_response;
use super::recorder::{ResultRecorder, RunEnd, status_line, summarize};
use crate::error::EngineError;
use crate::executor::PreparedRequest;
use crate::expr::{ExpressionEvaluator, ExpressionRole};
use crate::resolve::render_request;
use crate::scope::{DispatchScope, LoopBinding, VariableScope, persist_workflow_scope, resolve_dispatch_scope, workflow_scope};

/// Everything needed to start a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub document: Document,
    pub workflow: WorkflowDefinition,
    pub origin: RunOrigin,
    /// Lowest-precedence variables: document variables, environment, caller overrides.
    pub ambient: VariableScope,
}

impl RunRequest {
    /// Runs the workflow named `name` declared in `document`.
    pub fn workflow(document: &Document, name: &str) -> Result<Self, EngineError> {
        let workflow = document
            .find_workflow(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownWorkflow(name.trim().to_string()))?;
        Ok(Self {
            ambient: document_scope(document),
            document: document.clone(),
            workflow,
            origin: RunOrigin::Workflow,
        })
    }

    /// Runs the request named `name` once per item of its own for-each declaration.
    ///
    /// Loop items stay request-scoped and the run is not written to workflow history.
    pub fn for_request(document: &Document, name: &str) -> Result<Self, EngineError> {
        let request = document
            .find_request(name)
            .ok_or_else(|| EngineError::UnknownRequest(name.trim().to_string()))?;
        if request.for_each.is_none() {
            return Err(EngineError::RequestWithoutLoop(request.name.clone()));
        }

        let workflow = WorkflowDefinition {
            name: request.name.clone(),
            description: None,
            tags: Vec::new(),
            on_failure: OnFailure::default(),
            options: ExecutionOptions::default(),
            vars: Default::default(),
            steps: vec![WorkflowStep {
                kind: StepKind::ForEach,
                using: Some(request.name.clone()),
                line: request.line,
                ..Default::default()
            }],
            line: request.line,
        };
        Ok(Self {
            ambient: document_scope(document),
            document: document.clone(),
            workflow,
            origin: RunOrigin::AdHocForEach,
        })
    }

    /// Overlays `overlay` on the ambient variables.
    pub fn with_ambient(mut self, overlay: &VariableScope) -> Self {
        self.ambient = self.ambient.merge(overlay);
        self
    }
}

fn document_scope(document: &Document) -> VariableScope {
    VariableScope::from_pairs(document.variables.iter().map(|(key, value)| (key.clone(), value.clone())))
}

/// Request the caller must execute and answer with a [`ResponseEvent`].
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub token: DispatchToken,
    /// 0-based declared step index.
    pub step_index: usize,
    /// `step X/Y: label` status for the caller.
    pub status_line: String,
    pub request: PreparedRequest,
    pub options: ExecutionOptions,
    pub variables: VariableScope,
}

/// Terminal event for a dispatched request.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEvent {
    pub token: DispatchToken,
    pub outcome: ExecutionOutcome,
}

/// What the caller should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Dispatch(Box<Dispatch>),
    Finished(Box<RunReport>),
    /// The event did not belong to the in-flight request and was ignored.
    Stale,
}

struct InFlight {
    token: DispatchToken,
    iteration: Option<Iteration>,
    variables: VariableScope,
    status_line: String,
}

/// Mutable state of one in-progress run.
struct RunState {
    run_id: u64,
    workflow: ResolvedWorkflow,
    origin: RunOrigin,
    ambient: VariableScope,
    workflow_scope: VariableScope,
    step_index: usize,
    recorder: ResultRecorder,
    active: Option<ActiveStep>,
    in_flight: Option<InFlight>,
    sequence: u64,
    started_at: DateTime<Utc>,
}

enum Progression {
    Dispatch(Box<Dispatch>),
    Finished(RunEnd),
}

enum ActiveProgress {
    Dispatch(Box<Dispatch>),
    Done,
    Halt,
}

/// Single-run workflow interpreter.
pub struct WorkflowEngine {
    evaluator: Arc<dyn ExpressionEvaluator>,
    state: Option<RunState>,
    last_run_id: u64,
    errors: Vec<String>,
}

impl WorkflowEngine {
    pub fn new(evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        Self {
            evaluator,
            state: None,
            last_run_id: 0,
            errors: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    /// Id of the active run, if any.
    pub fn run_id(&self) -> Option<u64> {
        self.state.as_ref().map(|state| state.run_id)
    }

    /// Id of the most recently started run, 0 before the first start.
    pub fn last_run_id(&self) -> u64 {
        self.last_run_id
    }

    /// Results recorded so far by the active run.
    pub fn results(&self) -> &[StepResult] {
        self.state.as_ref().map(|state| state.recorder.results()).unwrap_or_default()
    }

    /// Declared step count of the active run.
    pub fn total_steps(&self) -> Option<usize> {
        self.state.as_ref().map(|state| state.workflow.total_steps())
    }

    /// `step X/Y: label` for the request currently in flight.
    pub fn status_line(&self) -> Option<&str> {
        self.state
            .as_ref()
            .and_then(|state| state.in_flight.as_ref())
            .map(|in_flight| in_flight.status_line.as_str())
    }

    /// Takes the errors raised since the last call (expression failures).
    pub fn drain_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.errors)
    }

    /// Validates the request and dispatches the first step.
    ///
    /// Starting while a run is active is rejected; the active run is left untouched.
    pub fn start(&mut self, request: RunRequest) -> Result<Directive, EngineError> {
        if let Some(active) = &self.state {
            warn!(run_id = active.run_id, workflow = %request.workflow.name, "workflow run already in progress; ignoring start");
            return Err(EngineError::RunActive);
        }

        let workflow = resolve_workflow(&request.document, &request.workflow)?;
        self.last_run_id += 1;
        let run_id = self.last_run_id;
        info!(run_id, workflow = %workflow.name, steps = workflow.total_steps(), origin = ?request.origin, "workflow run started");

        self.state = Some(RunState {
            run_id,
            workflow_scope: workflow_scope(&workflow.vars),
            workflow,
            origin: request.origin,
            ambient: request.ambient,
            step_index: 0,
            recorder: ResultRecorder::new(),
            active: None,
            in_flight: None,
            sequence: 0,
            started_at: Utc::now(),
        });
        Ok(self.pump())
    }

    /// Feeds the outcome of the in-flight request back into the run.
    pub fn handle_response(&mut self, event: ResponseEvent) -> Directive {
        let Some(state) = self.state.as_mut() else {
            debug!(token = %event.token, "response received with no active run");
            return Directive::Stale;
        };
        if state.in_flight.as_ref().map(|in_flight| in_flight.token) != Some(event.token) {
            debug!(token = %event.token, "ignoring response for a request that is not in flight");
            return Directive::Stale;
        }
        let (Some(in_flight), Some(mut active)) = (state.in_flight.take(), state.active.take()) else {
            return Directive::Stale;
        };

        let result = match event.outcome {
            ExecutionOutcome::Canceled => return self.finish_canceled(Some("canceled by the execution client".into())),
            ExecutionOutcome::Skipped { reason } => active.result(StepStatus::Skipped, in_flight.iteration, Some(reason)),
            ExecutionOutcome::Completed(snapshot) => {
                let verdict = judge_response(&snapshot, &active.expect, &in_flight.variables);
                StepResult {
                    status: verdict.status,
                    status_text: snapshot.status.clone(),
                    duration_ms: snapshot.duration_ms,
                    message: verdict.message,
                    error: verdict.error,
                    response: Some(snapshot),
                    ..active.result(verdict.status, in_flight.iteration, None)
                }
            }
        };

        let halts = result.is_failure() && active.on_failure.halts();
        state.record(result);
        if let Progress::Looping(loop_state) = &mut active.progress {
            loop_state.advance();
        }
        if halts {
            return self.finish(RunEnd::Stopped);
        }
        state.active = Some(active);
        self.pump()
    }

    /// Cancels the active run. The in-flight request, if any, is dropped without a result.
    pub fn cancel(&mut self, reason: Option<String>) -> Option<RunReport> {
        match self.finish_canceled(reason) {
            Directive::Finished(report) => Some(*report),
            _ => None,
        }
    }

    fn finish_canceled(&mut self, reason: Option<String>) -> Directive {
        let Some(state) = self.state.take() else {
            return Directive::Stale;
        };
        info!(run_id = state.run_id, workflow = %state.workflow.name, reason = ?reason, "workflow run canceled");
        Directive::Finished(Box::new(state.finalize(RunEnd::Canceled, reason)))
    }

    fn finish(&mut self, end: RunEnd) -> Directive {
        match self.state.take() {
            Some(state) => Directive::Finished(Box::new(state.finalize(end, None))),
            None => Directive::Stale,
        }
    }

    fn pump(&mut self) -> Directive {
        let Some(state) = self.state.as_mut() else {
            return Directive::Stale;
        };
        match state.progress(self.evaluator.as_ref(), &mut self.errors) {
            Progression::Dispatch(dispatch) => Directive::Dispatch(dispatch),
            Progression::Finished(end) => self.finish(end),
        }
    }
}

impl RunState {
    fn record(&mut self, result: StepResult) {
        match result.status {
            StepStatus::Succeeded => info!(run_id = self.run_id, step = %result.display_label(), "step passed"),
            StepStatus::Failed => warn!(
                run_id = self.run_id,
                step = %result.display_label(),
                message = result.message.as_deref().unwrap_or_default(),
                "step failed"
            ),
            StepStatus::Skipped => debug!(
                run_id = self.run_id,
                step = %result.display_label(),
                reason = result.message.as_deref().unwrap_or_default(),
                "step skipped"
            ),
        }
        self.recorder.record(result);
    }

    /// Runs the flat interpreter loop until a request must be dispatched or the run ends.
    fn progress(&mut self, evaluator: &dyn ExpressionEvaluator, errors: &mut Vec<String>) -> Progression {
        loop {
            if let Some(mut active) = self.active.take() {
                match self.advance_active(&mut active, evaluator, errors) {
                    ActiveProgress::Dispatch(dispatch) => {
                        self.active = Some(active);
                        return Progression::Dispatch(dispatch);
                    }
                    ActiveProgress::Halt => return Progression::Finished(RunEnd::Stopped),
                    ActiveProgress::Done => {
                        self.step_index += 1;
                        continue;
                    }
                }
            }

            let Some(step) = self.workflow.steps.get(self.step_index) else {
                return Progression::Finished(RunEnd::Completed);
            };

            let scope = resolve_dispatch_scope(&self.ambient, &self.workflow_scope, &step.common().vars, None);
            let context = ResolveContext {
                workflow: &self.workflow,
                evaluator,
                scope: &scope,
                origin: self.origin,
            };
            match step.resolve_next(&context) {
                NextAction::Dispatch(active) => self.active = Some(*active),
                NextAction::Record { result, on_failure } => {
                    if let Some(error) = &result.error {
                        errors.push(format!("{}: {}", result.display_label(), error));
                    }
                    let halts = result.is_failure() && on_failure.halts();
                    self.record(*result);
                    if halts {
                        return Progression::Finished(RunEnd::Stopped);
                    }
                    self.step_index += 1;
                }
            }
        }
    }

    fn advance_active(&mut self, active: &mut ActiveStep, evaluator: &dyn ExpressionEvaluator, errors: &mut Vec<String>) -> ActiveProgress {
        let loop_state = match &mut active.progress {
            Progress::Single { dispatched: true } => return ActiveProgress::Done,
            Progress::Single { dispatched } => {
                *dispatched = true;
                let scope = resolve_dispatch_scope(&self.ambient, &self.workflow_scope, &active.vars, None);
                return ActiveProgress::Dispatch(self.dispatch(active, scope, None));
            }
            Progress::Looping(loop_state) => loop_state.clone(),
        };

        let mut loop_state = loop_state;
        let progress = loop {
            let Some(item) = loop_state.current().cloned() else {
                break ActiveProgress::Done;
            };
            let iteration = loop_state.iteration();

            let text = match item.to_text() {
                Ok(text) => text,
                Err(error) => {
                    let mut result = active.result(
                        StepStatus::Failed,
                        Some(iteration),
                        Some(format!("for-each item {iteration} cannot be bound to '{}': {error}", loop_state.var())),
                    );
                    result.error = Some(error.to_string());
                    errors.push(format!("{}: {error}", result.display_label()));
                    self.record(result);
                    loop_state.advance();
                    if active.on_failure.halts() {
                        break ActiveProgress::Halt;
                    }
                    continue;
                }
            };

            let binding = LoopBinding {
                var: loop_state.var(),
                keys: loop_state.scope_keys(),
                text: &text,
                raw: &item,
            };
            let scope = resolve_dispatch_scope(&self.ambient, &self.workflow_scope, &active.vars, Some(binding));

            if let Some(when) = &active.when {
                let evaluated = evaluate_expression(
                    evaluator,
                    &self.workflow.name,
                    active.step_index,
                    ExpressionRole::When,
                    when,
                    &scope.variables,
                    &scope.typed,
                );
                match evaluated {
                    Ok(value) if value.is_truthy() => {}
                    Ok(_) => {
                        self.record(active.result(StepStatus::Skipped, Some(iteration), Some("@when condition is false".into())));
                        loop_state.advance();
                        continue;
                    }
                    Err(error) => {
                        let mut result = active.result(
                            StepStatus::Failed,
                            Some(iteration),
                            Some(expression_message(ExpressionRole::When, &error)),
                        );
                        result.error = Some(error.to_string());
                        errors.push(format!("{}: {error}", result.display_label()));
                        self.record(result);
                        loop_state.advance();
                        if active.on_failure.halts() {
                            break ActiveProgress::Halt;
                        }
                        continue;
                    }
                }
            }

            break ActiveProgress::Dispatch(self.dispatch(active, scope, Some(iteration)));
        };

        active.progress = Progress::Looping(loop_state);
        progress
    }

    fn dispatch(&mut self, active: &ActiveStep, scope: DispatchScope, iteration: Option<Iteration>) -> Box<Dispatch> {
        self.sequence += 1;
        let token = DispatchToken {
            run_id: self.run_id,
            sequence: self.sequence,
        };
        let status_line = status_line(active.step_index, self.workflow.total_steps(), &active.display_label(iteration));
        let request = render_request(&active.template, &scope.variables);
        self.workflow_scope = persist_workflow_scope(&self.workflow_scope, &scope.variables, &active.vars);

        debug!(run_id = self.run_id, token = %token, request = %request.name, status = %status_line, "dispatching request");
        self.in_flight = Some(InFlight {
            token,
            iteration,
            variables: scope.variables.clone(),
            status_line: status_line.clone(),
        });

        Box::new(Dispatch {
            token,
            step_index: active.step_index,
            status_line,
            request,
            options: active.options.clone(),
            variables: scope.variables,
        })
    }

    fn finalize(self, end: RunEnd, canceled_reason: Option<String>) -> RunReport {
        let total_steps = self.workflow.total_steps();
        let results = self.recorder.into_results();
        let summary = summarize(&results, total_steps, end);
        let status = match end {
            RunEnd::Canceled => RunStatus::Canceled,
            _ if results.iter().any(StepResult::is_failure) => RunStatus::Failed,
            _ => RunStatus::Succeeded,
        };
        info!(run_id = self.run_id, workflow = %self.workflow.name, summary = %summary, "workflow run finished");

        RunReport {
            run_id: self.run_id,
            workflow: self.workflow.name,
            origin: self.origin,
            status,
            summary,
            results,
            total_steps,
            stopped: end == RunEnd::Stopped,
            canceled_reason,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::scripted::status;
    use crate::expr::{BuiltinEvaluator, EvalContext, ExprValue, ExpressionError, SourcePosition, TypedBindings};
    use weft_types::ResponseSnapshot;

    fn document(yaml: &str) -> Document {
        serde_yaml::from_str(yaml).expect("parse document")
    }

    fn engine() -> WorkflowEngine {
        WorkflowEngine::new(Arc::new(BuiltinEvaluator))
    }

    fn expect_dispatch(directive: Directive) -> Dispatch {
        match directive {
            Directive::Dispatch(dispatch) => *dispatch,
            other => panic!("expected dispatch, got {other:?}"),
        }
    }

    fn expect_finished(directive: Directive) -> RunReport {
        match directive {
            Directive::Finished(report) => *report,
            other => panic!("expected finished run, got {other:?}"),
        }
    }

    fn respond(engine: &mut WorkflowEngine, dispatch: &Dispatch, outcome: ExecutionOutcome) -> Directive {
        engine.handle_response(ResponseEvent {
            token: dispatch.token,
            outcome,
        })
    }

    const LOGIN_FETCH: &str = r#"
requests:
  - name: Login
    method: POST
    url: https://example.com/login
  - name: Fetch
    url: https://example.com/items/{{id}}
workflows:
  - name: sync
    vars:
      id: "42"
    steps:
      - using: Login
        expect:
          statuscode: "200"
      - using: Fetch
"#;

    #[test]
    fn runs_steps_in_order_one_at_a_time() {
        let document = document(LOGIN_FETCH);
        let mut engine = engine();

        let first = expect_dispatch(engine.start(RunRequest::workflow(&document, "sync").unwrap()).unwrap());
        assert_eq!(first.request.name, "Login");
        assert_eq!(first.status_line, "step 1/2: Login");
        assert_eq!(engine.status_line(), Some("step 1/2: Login"));

        let second = expect_dispatch(respond(&mut engine, &first, status(200)));
        assert_eq!(second.request.url, "https://example.com/items/42");
        assert_ne!(second.token, first.token);

        let report = expect_finished(respond(&mut engine, &second, status(200)));
        assert_eq!(report.summary, "2/2 steps passed");
        assert_eq!(report.status, RunStatus::Succeeded);
        assert!(!engine.is_active());
    }

    #[test]
    fn rejects_a_second_start_while_active() {
        let document = document(LOGIN_FETCH);
        let mut engine = engine();
        expect_dispatch(engine.start(RunRequest::workflow(&document, "sync").unwrap()).unwrap());

        let error = engine.start(RunRequest::workflow(&document, "sync").unwrap()).expect_err("run active");
        assert_eq!(error, EngineError::RunActive);
        assert_eq!(engine.run_id(), Some(1));
    }

    #[test]
    fn stale_tokens_are_ignored() {
        let document = document(LOGIN_FETCH);
        let mut engine = engine();
        let first = expect_dispatch(engine.start(RunRequest::workflow(&document, "sync").unwrap()).unwrap());

        let stale = engine.handle_response(ResponseEvent {
            token: DispatchToken {
                run_id: first.token.run_id,
                sequence: first.token.sequence + 7,
            },
            outcome: status(500),
        });
        assert_eq!(stale, Directive::Stale);
        assert_eq!(engine.status_line(), Some("step 1/2: Login"));
    }

    #[test]
    fn failing_expectation_stops_the_run() {
        let document = document(LOGIN_FETCH);
        let mut engine = engine();
        let first = expect_dispatch(engine.start(RunRequest::workflow(&document, "sync").unwrap()).unwrap());

        let report = expect_finished(respond(&mut engine, &first, status(500)));
        assert_eq!(report.results.len(), 1);
        assert!(report.stopped);
        assert_eq!(report.summary, "failed at step 1/2 (Login): expected status code 200, got 500");
    }

    #[test]
    fn cancel_drops_the_in_flight_request() {
        let document = document(LOGIN_FETCH);
        let mut engine = engine();
        let first = expect_dispatch(engine.start(RunRequest::workflow(&document, "sync").unwrap()).unwrap());
        let second = expect_dispatch(respond(&mut engine, &first, status(200)));

        let report = engine.cancel(Some("user".into())).expect("report");
        assert_eq!(report.summary, "canceled at step 2/2");
        assert_eq!(report.status, RunStatus::Canceled);
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.canceled_reason.as_deref(), Some("user"));

        assert_eq!(respond(&mut engine, &second, status(200)), Directive::Stale);
        assert!(engine.cancel(None).is_none());
    }

    #[test]
    fn transport_errors_become_failed_results() {
        let document = document(LOGIN_FETCH);
        let mut engine = engine();
        let first = expect_dispatch(engine.start(RunRequest::workflow(&document, "sync").unwrap()).unwrap());

        let report = expect_finished(respond(
            &mut engine,
            &first,
            ExecutionOutcome::Completed(ResponseSnapshot::transport_failure("connection refused")),
        ));
        assert_eq!(report.results[0].error.as_deref(), Some("connection refused"));
        assert_eq!(report.summary, "failed at step 1/2 (Login): connection refused");
    }

    #[test]
    fn loop_items_are_bound_per_dispatch() {
        let document = document(
            r#"
requests:
  - name: Ping
    url: https://{{region}}.example.com/ping
workflows:
  - name: regions
    steps:
      - kind: for_each
        using: Ping
        for_each:
          expr: '["eu", "us", "ap"]'
          as: region
        when: region != "us"
"#,
        );
        let mut engine = engine();

        let first = expect_dispatch(engine.start(RunRequest::workflow(&document, "regions").unwrap()).unwrap());
        assert_eq!(first.request.url, "https://eu.example.com/ping");
        assert_eq!(first.variables.get("vars.workflow.region"), Some("eu"));
        assert_eq!(first.status_line, "step 1/1: Ping (1/3)");

        let third = expect_dispatch(respond(&mut engine, &first, status(200)));
        assert_eq!(third.request.url, "https://ap.example.com/ping");

        let report = expect_finished(respond(&mut engine, &third, status(200)));
        let statuses: Vec<StepStatus> = report.results.iter().map(|result| result.status).collect();
        assert_eq!(statuses, vec![StepStatus::Succeeded, StepStatus::Skipped, StepStatus::Succeeded]);
        assert_eq!(report.summary, "2/3 steps passed, 1 skipped");
    }

    #[test]
    fn ad_hoc_loops_stay_request_scoped() {
        let document = document(
            r#"
requests:
  - name: Ping
    url: https://example.com/{{item}}
    for_each:
      expr: "[1, 2]"
"#,
        );
        let mut engine = engine();
        let request = RunRequest::for_request(&document, "ping").expect("ad-hoc run");
        assert_eq!(request.origin, RunOrigin::AdHocForEach);

        let first = expect_dispatch(engine.start(request).unwrap());
        assert_eq!(first.request.url, "https://example.com/1");
        assert!(!first.variables.contains_key("vars.workflow.item"));
    }

    #[test]
    fn for_request_requires_a_loop() {
        let document = document(LOGIN_FETCH);
        assert_eq!(
            RunRequest::for_request(&document, "login").expect_err("no loop"),
            EngineError::RequestWithoutLoop("Login".into())
        );
    }

    #[test]
    fn expression_errors_are_recorded_and_surfaced() {
        let document = document(
            r#"
requests:
  - name: Ping
    url: https://example.com
workflows:
  - name: broken
    on_failure: continue
    steps:
      - using: Ping
        when: missing == 1
      - using: Ping
"#,
        );
        let mut engine = engine();

        let dispatch = expect_dispatch(engine.start(RunRequest::workflow(&document, "broken").unwrap()).unwrap());
        assert_eq!(dispatch.step_index, 1);
        let errors = engine.drain_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("unknown variable 'missing'"));

        let report = expect_finished(respond(&mut engine, &dispatch, status(200)));
        assert!(report.results[0].is_failure());
        assert_eq!(report.summary, "1 of 2 steps failed");
    }

    #[test]
    fn workflow_scoped_step_vars_persist_to_later_steps() {
        let document = document(
            r#"
requests:
  - name: Login
    url: https://example.com/login
  - name: Me
    url: https://example.com/me
    headers:
      Authorization: "Bearer {{session}}"
workflows:
  - name: session
    steps:
      - using: Login
        vars:
          vars.workflow.session: abc
      - using: Me
"#,
        );
        let mut engine = engine();
        let first = expect_dispatch(engine.start(RunRequest::workflow(&document, "session").unwrap()).unwrap());
        let second = expect_dispatch(respond(&mut engine, &first, status(200)));
        assert_eq!(second.request.headers["Authorization"], "Bearer abc");
    }

    #[test]
    fn client_reported_cancellation_ends_the_run() {
        let document = document(LOGIN_FETCH);
        let mut engine = engine();
        let first = expect_dispatch(engine.start(RunRequest::workflow(&document, "sync").unwrap()).unwrap());

        let report = expect_finished(respond(&mut engine, &first, ExecutionOutcome::Canceled));
        assert_eq!(report.status, RunStatus::Canceled);
        assert_eq!(report.canceled_reason.as_deref(), Some("canceled by the execution client"));
        assert_eq!(report.summary, "canceled at step 1/2");
        assert!(report.results.is_empty());
        assert!(!engine.is_active());
    }

    /// Returns a host list for every for-each source and defers everything else.
    struct HostListEvaluator;

    impl ExpressionEvaluator for HostListEvaluator {
        fn evaluate(
            &self,
            context: &EvalContext,
            position: SourcePosition,
            expression: &str,
            bindings: &VariableScope,
            typed: &TypedBindings,
        ) -> Result<ExprValue, ExpressionError> {
            if context.role == ExpressionRole::ForEach {
                return Ok(ExprValue::List(vec![
                    ExprValue::string("eu"),
                    ExprValue::Opaque { type_name: "fn".into() },
                    ExprValue::string("ap"),
                ]));
            }
            BuiltinEvaluator.evaluate(context, position, expression, bindings, typed)
        }
    }

    const HOST_ITEMS: &str = r#"
requests:
  - name: Ping
    url: https://{{region}}.example.com/ping
workflows:
  - name: tolerant
    on_failure: continue
    steps:
      - kind: for_each
        using: Ping
        for_each:
          expr: regions()
          as: region
  - name: strict
    steps:
      - kind: for_each
        using: Ping
        for_each:
          expr: regions()
          as: region
"#;

    #[test]
    fn unconvertible_loop_items_fail_without_dispatch() {
        let document = document(HOST_ITEMS);
        let mut engine = WorkflowEngine::new(Arc::new(HostListEvaluator));

        let first = expect_dispatch(engine.start(RunRequest::workflow(&document, "tolerant").unwrap()).unwrap());
        assert_eq!(first.request.url, "https://eu.example.com/ping");
        let third = expect_dispatch(respond(&mut engine, &first, status(200)));
        assert_eq!(third.request.url, "https://ap.example.com/ping");
        assert_eq!(third.status_line, "step 1/1: Ping (3/3)");

        let errors = engine.drain_errors();
        assert_eq!(errors, vec!["Ping (2/3): cannot convert fn value to text".to_string()]);

        let report = expect_finished(respond(&mut engine, &third, status(200)));
        let statuses: Vec<StepStatus> = report.results.iter().map(|result| result.status).collect();
        assert_eq!(statuses, vec![StepStatus::Succeeded, StepStatus::Failed, StepStatus::Succeeded]);
        assert_eq!(
            report.results[1].message.as_deref(),
            Some("for-each item 2/3 cannot be bound to 'region': cannot convert fn value to text")
        );

        let mut engine = WorkflowEngine::new(Arc::new(HostListEvaluator));
        let first = expect_dispatch(engine.start(RunRequest::workflow(&document, "strict").unwrap()).unwrap());
        let report = expect_finished(respond(&mut engine, &first, status(200)));
        assert_eq!(report.results.len(), 2);
        assert!(report.stopped);
        assert_eq!(
            report.summary,
            "failed at step 1/1 (Ping (2/3)): for-each item 2/3 cannot be bound to 'region': cannot convert fn value to text"
        );
    }

    #[test]
    fn empty_workflow_finishes_immediately() {
        let document = document(
            r#"
workflows:
  - name: empty
"#,
        );
        let report = expect_finished(engine().start(RunRequest::workflow(&document, "empty").unwrap()).unwrap());
        assert_eq!(report.summary, "0/0 steps passed");
    }
}
