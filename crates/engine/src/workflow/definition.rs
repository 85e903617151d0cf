//! Definition resolver.
//!
//! Validates a [`WorkflowDefinition`] against its [`Document`] once per run start and
//! produces kind-tagged [`StepRuntime`]s plus a case-insensitive name → request table.
//! The interpreter never re-validates; every reference it follows is known to resolve.

use indexmap::IndexMap;
use tracing::debug;
use weft_types::{
    Branch, Document, ExecutionOptions, ForEachSpec, OnFailure, RequestTemplate, StepKind, WorkflowDefinition, WorkflowStep,
};

use crate::error::EngineError;
use crate::expr::ExpressionRole;

/// A workflow whose references have all been resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedWorkflow {
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub vars: IndexMap<String, String>,
    /// Document options overlaid by workflow options.
    pub options: ExecutionOptions,
    pub steps: Vec<StepRuntime>,
    requests: IndexMap<String, RequestTemplate>,
}

impl ResolvedWorkflow {
    /// Looks up a request by name, ignoring ASCII case.
    pub fn request(&self, name: &str) -> Option<&RequestTemplate> {
        self.requests.get(&request_table_key(name))
    }

    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }
}

/// Attributes every step kind shares.
#[derive(Debug, Clone, PartialEq)]
pub struct StepCommon {
    /// 0-based declaration index.
    pub index: usize,
    pub label: String,
    /// Effective policy: the step's own, else the workflow default.
    pub on_failure: OnFailure,
    pub when: Option<SourceExpression>,
    pub expect: IndexMap<String, String>,
    pub vars: IndexMap<String, String>,
    pub options: ExecutionOptions,
    pub line: usize,
}

/// Expression text with the line it was declared on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceExpression {
    pub text: String,
    pub line: usize,
}

/// Kind-tagged runtime form of one declared step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepRuntime {
    Request(RequestStep),
    If(ConditionalStep),
    Switch(SwitchStep),
}

impl StepRuntime {
    pub fn common(&self) -> &StepCommon {
        match self {
            StepRuntime::Request(step) => &step.common,
            StepRuntime::If(step) => &step.common,
            StepRuntime::Switch(step) => &step.common,
        }
    }
}

/// A plain request (or for-each) step.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestStep {
    pub common: StepCommon,
    /// Canonical request name.
    pub request: String,
    /// Step-level loop, falling back to the request's own.
    pub for_each: Option<ForEachSpec>,
}

/// An `@if` step: the `then` arm, `elif` arms in order, and an optional `else`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalStep {
    pub common: StepCommon,
    pub arms: Vec<BranchRuntime>,
    pub otherwise: Option<BranchRuntime>,
}

/// A `@switch` step.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchStep {
    pub common: StepCommon,
    pub subject: SourceExpression,
    pub cases: Vec<BranchRuntime>,
    pub default: Option<BranchRuntime>,
}

/// One conditional alternative.
#[derive(Debug, Clone, PartialEq)]
pub struct BranchRuntime {
    pub role: ExpressionRole,
    /// Absent for `else` and `default`.
    pub condition: Option<SourceExpression>,
    pub action: BranchAction,
}

/// What a matched branch does.
#[derive(Debug, Clone, PartialEq)]
pub enum BranchAction {
    /// Dispatch the named request under `on_failure`.
    Run { request: String, on_failure: OnFailure },
    /// Record a failure immediately under the container's policy.
    Fail { message: String },
}

/// Validates `workflow` against `document`.
pub fn resolve_workflow(document: &Document, workflow: &WorkflowDefinition) -> Result<ResolvedWorkflow, EngineError> {
    let requests: IndexMap<String, RequestTemplate> = document
        .requests
        .iter()
        .map(|request| (request_table_key(&request.name), request.clone()))
        .collect();

    let resolver = Resolver {
        workflow,
        requests: &requests,
    };
    let steps = workflow
        .steps
        .iter()
        .enumerate()
        .map(|(index, step)| resolver.step(index, step))
        .collect::<Result<Vec<_>, _>>()?;

    debug!(workflow = %workflow.name, steps = steps.len(), "workflow definition resolved");

    Ok(ResolvedWorkflow {
        name: workflow.name.clone(),
        description: workflow.description.clone(),
        tags: workflow.tags.clone(),
        vars: workflow.vars.clone(),
        options: document.options.merge(&workflow.options),
        steps,
        requests,
    })
}

fn request_table_key(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

struct Resolver<'a> {
    workflow: &'a WorkflowDefinition,
    requests: &'a IndexMap<String, RequestTemplate>,
}

impl Resolver<'_> {
    fn step(&self, index: usize, step: &WorkflowStep) -> Result<StepRuntime, EngineError> {
        let number = index + 1;
        // `using` is optional on branch steps but must still resolve when present.
        let using = step.using.as_deref().map(|name| self.request(number, name)).transpose()?;

        let common = StepCommon {
            index,
            label: step_label(step, using.map(|request| request.name.as_str())),
            on_failure: step.on_failure.unwrap_or(self.workflow.on_failure),
            when: step.when.as_ref().map(|text| SourceExpression {
                text: text.clone(),
                line: if step.when_line > 0 { step.when_line } else { step.line },
            }),
            expect: step.expect.clone(),
            vars: step.vars.clone(),
            options: step.options.clone(),
            line: step.line,
        };

        match step.kind {
            StepKind::Request | StepKind::ForEach => {
                let Some(request) = using else {
                    return Err(EngineError::MissingUsing {
                        workflow: self.workflow.name.clone(),
                        step: number,
                        kind: step.kind,
                    });
                };
                let for_each = step.for_each.clone().or_else(|| request.for_each.clone());
                if step.kind == StepKind::ForEach && for_each.is_none() {
                    return Err(EngineError::MissingForEach {
                        workflow: self.workflow.name.clone(),
                        step: number,
                    });
                }
                Ok(StepRuntime::Request(RequestStep {
                    common,
                    request: request.name.clone(),
                    for_each,
                }))
            }
            StepKind::If => {
                let Some(block) = &step.if_block else {
                    return Err(self.missing_block(number, step.kind));
                };
                let mut arms = vec![self.branch(number, step.line, &block.then, ExpressionRole::If, true, common.on_failure)?];
                for elif in &block.elif {
                    arms.push(self.branch(number, step.line, elif, ExpressionRole::Elif, true, common.on_failure)?);
                }
                let otherwise = block
                    .otherwise
                    .as_ref()
                    .map(|branch| self.branch(number, step.line, branch, ExpressionRole::If, false, common.on_failure))
                    .transpose()?;
                Ok(StepRuntime::If(ConditionalStep { common, arms, otherwise }))
            }
            StepKind::Switch => {
                let Some(block) = &step.switch else {
                    return Err(self.missing_block(number, step.kind));
                };
                if block.expr.trim().is_empty() {
                    return Err(self.invalid_branch(number, "@switch expression cannot be empty"));
                }
                let cases = block
                    .cases
                    .iter()
                    .map(|case| self.branch(number, step.line, case, ExpressionRole::Case, true, common.on_failure))
                    .collect::<Result<Vec<_>, _>>()?;
                let default = block
                    .default
                    .as_ref()
                    .map(|branch| self.branch(number, step.line, branch, ExpressionRole::Case, false, common.on_failure))
                    .transpose()?;
                let subject = SourceExpression {
                    text: block.expr.clone(),
                    line: if block.line > 0 { block.line } else { step.line },
                };
                Ok(StepRuntime::Switch(SwitchStep {
                    common,
                    subject,
                    cases,
                    default,
                }))
            }
        }
    }

    fn branch(
        &self,
        number: usize,
        step_line: usize,
        branch: &Branch,
        role: ExpressionRole,
        needs_condition: bool,
        container_policy: OnFailure,
    ) -> Result<BranchRuntime, EngineError> {
        let condition = match (&branch.when, needs_condition) {
            (Some(text), true) if !text.trim().is_empty() => Some(SourceExpression {
                text: text.clone(),
                line: if branch.line > 0 { branch.line } else { step_line },
            }),
            (_, true) => return Err(self.invalid_branch(number, format!("{role} branch is missing its condition"))),
            (_, false) => None,
        };

        let action = match (&branch.run, &branch.fail) {
            (Some(run), None) => {
                let request = self.request(number, run)?;
                BranchAction::Run {
                    request: request.name.clone(),
                    on_failure: branch.on_failure.unwrap_or(container_policy),
                }
            }
            (None, Some(message)) => BranchAction::Fail { message: message.clone() },
            (Some(_), Some(_)) => return Err(self.invalid_branch(number, format!("{role} branch declares both `run` and `fail`"))),
            (None, None) => return Err(self.invalid_branch(number, format!("{role} branch needs either `run` or `fail`"))),
        };

        Ok(BranchRuntime { role, condition, action })
    }

    fn request(&self, number: usize, name: &str) -> Result<&RequestTemplate, EngineError> {
        self.requests.get(&request_table_key(name)).ok_or_else(|| EngineError::Reference {
            workflow: self.workflow.name.clone(),
            step: number,
            name: name.trim().to_string(),
        })
    }

    fn missing_block(&self, number: usize, kind: StepKind) -> EngineError {
        EngineError::MissingBranchBlock {
            workflow: self.workflow.name.clone(),
            step: number,
            kind,
        }
    }

    fn invalid_branch(&self, number: usize, reason: impl Into<String>) -> EngineError {
        EngineError::InvalidBranch {
            workflow: self.workflow.name.clone(),
            step: number,
            reason: reason.into(),
        }
    }
}

fn step_label(step: &WorkflowStep, request: Option<&str>) -> String {
    step.name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .or(request)
        .map(str::to_string)
        .unwrap_or_else(|| step.kind.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document(yaml: &str) -> Document {
        serde_yaml::from_str(yaml).expect("parse document")
    }

    const REQUESTS: &str = r#"
requests:
  - name: Login
    url: https://example.com/login
  - name: Fetch
    url: https://example.com/items
    for_each:
      expr: "[1, 2]"
"#;

    fn workflow(yaml: &str) -> WorkflowDefinition {
        serde_yaml::from_str(yaml).expect("parse workflow")
    }

    #[test]
    fn resolves_references_case_insensitively() {
        let document = document(REQUESTS);
        let workflow = workflow(
            r#"
name: demo
steps:
  - using: login
  - name: fetch all
    kind: for_each
    using: FETCH
"#,
        );

        let resolved = resolve_workflow(&document, &workflow).expect("resolve");
        assert_eq!(resolved.total_steps(), 2);
        let StepRuntime::Request(first) = &resolved.steps[0] else {
            panic!("expected request step");
        };
        assert_eq!(first.request, "Login");
        assert_eq!(first.common.label, "Login");
        let StepRuntime::Request(second) = &resolved.steps[1] else {
            panic!("expected request step");
        };
        assert_eq!(second.common.label, "fetch all");
        assert_eq!(second.for_each.as_ref().map(|spec| spec.expr.as_str()), Some("[1, 2]"));
        assert!(resolved.request("fetch").is_some());
    }

    #[test]
    fn unknown_reference_names_workflow_step_and_request() {
        let document = document(REQUESTS);
        let workflow = workflow(
            r#"
name: demo
steps:
  - using: Login
  - kind: if
    if:
      then: { when: "true", run: Missing }
"#,
        );

        let error = resolve_workflow(&document, &workflow).expect_err("unknown reference");
        assert_eq!(
            error,
            EngineError::Reference {
                workflow: "demo".into(),
                step: 2,
                name: "Missing".into()
            }
        );
        assert_eq!(error.to_string(), "workflow 'demo' step 2: unknown request 'Missing'");
    }

    #[test]
    fn for_each_kind_requires_a_loop() {
        let document = document(REQUESTS);
        let workflow = workflow(
            r#"
name: demo
steps:
  - kind: for_each
    using: Login
"#,
        );
        assert_eq!(
            resolve_workflow(&document, &workflow).expect_err("missing loop"),
            EngineError::MissingForEach {
                workflow: "demo".into(),
                step: 1
            }
        );
    }

    #[test]
    fn branch_steps_require_their_block() {
        let document = document(REQUESTS);
        let workflow = workflow(
            r#"
name: demo
steps:
  - kind: switch
"#,
        );
        assert!(matches!(
            resolve_workflow(&document, &workflow),
            Err(EngineError::MissingBranchBlock { step: 1, kind: StepKind::Switch, .. })
        ));
    }

    #[test]
    fn branch_policy_falls_back_to_container() {
        let document = document(REQUESTS);
        let workflow = workflow(
            r#"
name: demo
on_failure: continue
steps:
  - name: route
    kind: switch
    on_failure: stop
    switch:
      expr: region
      cases:
        - { when: "'eu'", run: Login }
        - { when: "'us'", run: Login, on_failure: continue }
      default: { fail: "unsupported region" }
"#,
        );
        let resolved = resolve_workflow(&document, &workflow).expect("resolve");
        let StepRuntime::Switch(step) = &resolved.steps[0] else {
            panic!("expected switch step");
        };
        assert_eq!(step.common.on_failure, OnFailure::Stop);
        assert_eq!(
            step.cases[0].action,
            BranchAction::Run {
                request: "Login".into(),
                on_failure: OnFailure::Stop
            }
        );
        assert_eq!(
            step.cases[1].action,
            BranchAction::Run {
                request: "Login".into(),
                on_failure: OnFailure::Continue
            }
        );
        assert_eq!(
            step.default.as_ref().map(|branch| &branch.action),
            Some(&BranchAction::Fail {
                message: "unsupported region".into()
            })
        );
    }

    #[test]
    fn branches_need_exactly_one_action() {
        let document = document(REQUESTS);
        let workflow = workflow(
            r#"
name: demo
steps:
  - kind: if
    if:
      then: { when: "true" }
"#,
        );
        assert!(matches!(
            resolve_workflow(&document, &workflow),
            Err(EngineError::InvalidBranch { step: 1, .. })
        ));
    }
}
