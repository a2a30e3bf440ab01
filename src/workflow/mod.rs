//! The workflow engine: data model, expression resolution, calldata
//! encoding, and the sequential interpreter.

pub mod abi;
pub mod engine;
pub mod expr;
pub mod model;

pub use engine::{WorkflowEngine, WorkflowError, WorkflowOutcome, WorkflowRunContext};
pub use model::{
    DynamicTarget, HttpStep, OnchainBatch, OnchainOperation, ScopeConfig, Step, StepKind,
    VariableDefinition, VariableType, WorkflowDefinition,
};
