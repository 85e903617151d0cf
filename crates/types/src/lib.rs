//! Shared type definitions for Weft.
//!
//! - [`document`]: parsed documents and request templates
//! - [`workflow`]: declarative workflow definitions
//! - [`run`]: execution outcomes, step results, reports, and run lifecycle events

pub mod document;
pub mod run;
pub mod workflow;

pub use document::{Document, ExecutionOptions, Protocol, RequestTemplate};
pub use run::{
    DispatchToken, ExecutionOutcome, Iteration, ResponseSnapshot, RunControl, RunEvent, RunOrigin, RunReport, RunStatus, StepResult,
    StepStatus, TestResult, WorkflowHistoryEntry,
};
pub use workflow::{Branch, ForEachSpec, IfBlock, OnFailure, StepKind, SwitchBlock, WorkflowDefinition, WorkflowStep};
