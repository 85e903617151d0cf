//! Step resolution.
//!
//! [`StepRuntime::resolve_next`] turns a declared step into either a concrete request to
//! dispatch ([`ActiveStep`]) or a result to record straight away (skip, branch `fail`,
//! expression failure). Branches are evaluated exactly once; the resulting active step is
//! reused for every loop item.

use indexmap::IndexMap;
use tracing::debug;
use weft_types::{ExecutionOptions, ForEachSpec, Iteration, OnFailure, RequestTemplate, RunOrigin, StepResult, StepStatus};

use super::definition::{BranchAction, BranchRuntime, ResolvedWorkflow, SourceExpression, StepCommon, StepRuntime};
use super::loop_state::LoopState;
use crate::expr::{EvalContext, ExprValue, ExpressionError, ExpressionEvaluator, ExpressionRole, SourcePosition, TypedBindings};
use crate::scope::{DispatchScope, VariableScope};

/// Everything a step needs to decide what happens next.
pub struct ResolveContext<'a> {
    pub workflow: &'a ResolvedWorkflow,
    pub evaluator: &'a dyn ExpressionEvaluator,
    /// Ambient, workflow, and step variables for the step being resolved.
    pub scope: &'a DispatchScope,
    pub origin: RunOrigin,
}

impl ResolveContext<'_> {
    pub fn evaluate(&self, common: &StepCommon, role: ExpressionRole, expression: &SourceExpression) -> Result<ExprValue, ExpressionError> {
        evaluate_expression(self.evaluator, &self.workflow.name, common.index, role, expression, &self.scope.variables, &self.scope.typed)
    }
}

/// Evaluates `expression` on behalf of the step at `step_index`.
pub fn evaluate_expression(
    evaluator: &dyn ExpressionEvaluator,
    workflow: &str,
    step_index: usize,
    role: ExpressionRole,
    expression: &SourceExpression,
    variables: &VariableScope,
    typed: &TypedBindings,
) -> Result<ExprValue, ExpressionError> {
    let context = EvalContext {
        workflow: workflow.to_string(),
        step: step_index + 1,
        role,
    };
    evaluator.evaluate(&context, SourcePosition::line(expression.line), &expression.text, variables, typed)
}

/// The next thing to do for a declared step.
#[derive(Debug, Clone, PartialEq)]
pub enum NextAction {
    /// Dispatch a concrete request (once, or once per loop item).
    Dispatch(Box<ActiveStep>),
    /// Record a result without dispatching.
    Record { result: Box<StepResult>, on_failure: OnFailure },
}

/// A concrete request step being executed, possibly looping.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveStep {
    pub step_index: usize,
    pub label: String,
    pub template: RequestTemplate,
    /// Matched branch target, for steps resolved through `@if`/`@switch`.
    pub branch: Option<String>,
    pub on_failure: OnFailure,
    /// Condition re-evaluated for every loop item; single dispatches evaluate it up front.
    pub when: Option<SourceExpression>,
    pub expect: IndexMap<String, String>,
    pub vars: IndexMap<String, String>,
    pub options: ExecutionOptions,
    pub progress: Progress,
}

/// Dispatch progress of an active step.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    Single { dispatched: bool },
    Looping(LoopState),
}

impl ActiveStep {
    /// Label including the branch target and iteration, e.g. `route → EuCheckout (2/5)`.
    pub fn display_label(&self, iteration: Option<Iteration>) -> String {
        let mut label = self.label.clone();
        if let Some(branch) = &self.branch {
            label.push_str(" → ");
            label.push_str(branch);
        }
        if let Some(iteration) = iteration {
            label.push_str(&format!(" ({iteration})"));
        }
        label
    }

    /// Builds a result for this step with no response attached.
    pub fn result(&self, status: StepStatus, iteration: Option<Iteration>, message: Option<String>) -> StepResult {
        StepResult {
            step_index: self.step_index,
            step_label: self.label.clone(),
            request: Some(self.template.name.clone()),
            branch: self.branch.clone(),
            status,
            status_text: String::new(),
            duration_ms: 0,
            message,
            response: None,
            iteration,
            error: None,
        }
    }
}

impl StepRuntime {
    /// Decides whether this step dispatches a request or records a result directly.
    pub fn resolve_next(&self, context: &ResolveContext<'_>) -> NextAction {
        match self {
            StepRuntime::Request(step) => {
                let Some(template) = context.workflow.request(&step.request) else {
                    let message = format!("unknown request '{}'", step.request);
                    return record(&step.common, Some(step.request.clone()), None, step.common.on_failure, StepStatus::Failed, message);
                };
                let when = step.common.when.clone().or_else(|| request_when(template));
                activate(context, &step.common, template, None, step.common.on_failure, when, step.for_each.as_ref())
            }
            StepRuntime::If(step) => {
                if let Some(action) = gate(context, &step.common) {
                    return action;
                }
                let mut matched = None;
                for arm in &step.arms {
                    let Some(condition) = &arm.condition else {
                        continue;
                    };
                    match context.evaluate(&step.common, arm.role, condition) {
                        Ok(value) if value.is_truthy() => {
                            matched = Some(arm);
                            break;
                        }
                        Ok(_) => {}
                        Err(error) => return expression_failure(&step.common, arm.role, &error),
                    }
                }
                match matched.or(step.otherwise.as_ref()) {
                    Some(branch) => take_branch(context, &step.common, branch),
                    None => record_skip(&step.common, "no @if branch matched"),
                }
            }
            StepRuntime::Switch(step) => {
                if let Some(action) = gate(context, &step.common) {
                    return action;
                }
                let subject = match context.evaluate(&step.common, ExpressionRole::Switch, &step.subject) {
                    Ok(value) => value,
                    Err(error) => return expression_failure(&step.common, ExpressionRole::Switch, &error),
                };
                let mut matched = None;
                for case in &step.cases {
                    let Some(condition) = &case.condition else {
                        continue;
                    };
                    match context.evaluate(&step.common, ExpressionRole::Case, condition) {
                        Ok(value) if value.equals(&subject) => {
                            matched = Some(case);
                            break;
                        }
                        Ok(_) => {}
                        Err(error) => return expression_failure(&step.common, ExpressionRole::Case, &error),
                    }
                }
                match matched.or(step.default.as_ref()) {
                    Some(branch) => take_branch(context, &step.common, branch),
                    None => record_skip(&step.common, "no @switch case matched"),
                }
            }
        }
    }
}

fn request_when(template: &RequestTemplate) -> Option<SourceExpression> {
    template.when.as_ref().map(|text| SourceExpression {
        text: text.clone(),
        line: template.line,
    })
}

/// Step-level `when` on a branching step gates the whole step.
fn gate(context: &ResolveContext<'_>, common: &StepCommon) -> Option<NextAction> {
    let when = common.when.as_ref()?;
    match context.evaluate(common, ExpressionRole::When, when) {
        Ok(value) if value.is_truthy() => None,
        Ok(_) => Some(record_skip(common, "@when condition is false")),
        Err(error) => Some(expression_failure(common, ExpressionRole::When, &error)),
    }
}

fn take_branch(context: &ResolveContext<'_>, common: &StepCommon, branch: &BranchRuntime) -> NextAction {
    match &branch.action {
        BranchAction::Fail { message } => {
            debug!(step = %common.label, "branch failed without dispatch");
            record(common, None, None, common.on_failure, StepStatus::Failed, message.clone())
        }
        BranchAction::Run { request, on_failure } => {
            let Some(template) = context.workflow.request(request) else {
                let message = format!("unknown request '{request}'");
                return record(common, Some(request.clone()), Some(request.clone()), *on_failure, StepStatus::Failed, message);
            };
            activate(
                context,
                common,
                template,
                Some(template.name.clone()),
                *on_failure,
                request_when(template),
                template.for_each.as_ref(),
            )
        }
    }
}

fn activate(
    context: &ResolveContext<'_>,
    common: &StepCommon,
    template: &RequestTemplate,
    branch: Option<String>,
    on_failure: OnFailure,
    when: Option<SourceExpression>,
    for_each: Option<&ForEachSpec>,
) -> NextAction {
    let request = Some(template.name.clone());

    let Some(for_each) = for_each else {
        if let Some(when) = &when {
            match context.evaluate(common, ExpressionRole::When, when) {
                Ok(value) if !value.is_truthy() => {
                    return record(common, request, branch, on_failure, StepStatus::Skipped, "@when condition is false".into());
                }
                Ok(_) => {}
                Err(error) => return expression_failure_under(common, request, branch, on_failure, ExpressionRole::When, &error),
            }
        }
        return dispatch(context, common, template, branch, on_failure, None, Progress::Single { dispatched: false });
    };

    let source = SourceExpression {
        text: for_each.expr.clone(),
        line: if for_each.line > 0 { for_each.line } else { common.line },
    };
    let items = match context.evaluate(common, ExpressionRole::ForEach, &source).and_then(ExprValue::into_list) {
        Ok(items) => items,
        Err(error) => return expression_failure_under(common, request, branch, on_failure, ExpressionRole::ForEach, &error),
    };

    match LoopState::new(items, for_each.var.clone(), context.origin.promotes_loop_scope()) {
        Some(loop_state) => {
            debug!(step = %common.label, items = loop_state.len(), var = %loop_state.var(), "for-each loop started");
            dispatch(context, common, template, branch, on_failure, when, Progress::Looping(loop_state))
        }
        None => record(common, request, branch, on_failure, StepStatus::Skipped, "produced no items".into()),
    }
}

fn dispatch(
    context: &ResolveContext<'_>,
    common: &StepCommon,
    template: &RequestTemplate,
    branch: Option<String>,
    on_failure: OnFailure,
    when: Option<SourceExpression>,
    progress: Progress,
) -> NextAction {
    NextAction::Dispatch(Box::new(ActiveStep {
        step_index: common.index,
        label: common.label.clone(),
        template: template.clone(),
        branch,
        on_failure,
        when,
        expect: common.expect.clone(),
        vars: common.vars.clone(),
        options: context.workflow.options.merge(&template.options).merge(&common.options),
        progress,
    }))
}

fn record(
    common: &StepCommon,
    request: Option<String>,
    branch: Option<String>,
    on_failure: OnFailure,
    status: StepStatus,
    message: String,
) -> NextAction {
    NextAction::Record {
        result: Box::new(StepResult {
            step_index: common.index,
            step_label: common.label.clone(),
            request,
            branch,
            status,
            status_text: String::new(),
            duration_ms: 0,
            message: Some(message),
            response: None,
            iteration: None,
            error: None,
        }),
        on_failure,
    }
}

fn record_skip(common: &StepCommon, message: &str) -> NextAction {
    record(common, None, None, common.on_failure, StepStatus::Skipped, message.to_string())
}

fn expression_failure(common: &StepCommon, role: ExpressionRole, error: &ExpressionError) -> NextAction {
    expression_failure_under(common, None, None, common.on_failure, role, error)
}

fn expression_failure_under(
    common: &StepCommon,
    request: Option<String>,
    branch: Option<String>,
    on_failure: OnFailure,
    role: ExpressionRole,
    error: &ExpressionError,
) -> NextAction {
    let mut action = record(common, request, branch, on_failure, StepStatus::Failed, expression_message(role, error));
    if let NextAction::Record { result, .. } = &mut action {
        result.error = Some(error.to_string());
    }
    action
}

/// Message recorded for a failed expression, e.g. `@for-each failed: expected a list, got string`.
pub fn expression_message(role: ExpressionRole, error: &ExpressionError) -> String {
    format!("{role} failed: {error}")
}
