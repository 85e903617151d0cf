//! Workflow interpretation.
//!
//! Resolution runs once per run start ([`definition`]); the [`interpreter`] then walks the
//! resolved steps one dispatch at a time, recording outcomes through the [`recorder`].
//! [`runner`] drives the interpreter asynchronously against an execution client.

pub mod definition;
pub mod dispatch;
pub mod interpreter;
pub mod loop_state;
pub mod outcome;
pub mod recorder;
pub mod runner;
