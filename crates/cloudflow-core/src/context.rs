// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! Execution context: resolves a step's declared `inputs` (a mapping from
//! name to value or input-reference) against the workflow's own inputs and
//! the outputs already produced by completed steps.
//!
//! Inputs are the typed `StepInput` enum (`cloudflow_domain::StepInput`)
//! rather than a string templating language, resolved against an
//! `Arc<RwLock<HashMap<...>>>` shape that tolerates concurrent reads from
//! many in-flight step tasks.

use std::collections::HashMap;
use std::sync::Arc;

use cloudflow_domain::{StepDefinition, StepInput};
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{OrchestratorError, Result};

/// Shared, thread-safe view over one workflow run's inputs and the
/// outputs its steps have produced so far.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    inputs: Arc<RwLock<HashMap<String, Value>>>,
    /// Outputs keyed by `step_id` -> `output_name` -> value.
    step_outputs: Arc<RwLock<HashMap<String, HashMap<String, Value>>>>,
}

impl ExecutionContext {
    pub fn new(inputs: HashMap<String, Value>) -> Self {
        Self {
            inputs: Arc::new(RwLock::new(inputs)),
            step_outputs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn input(&self, name: &str) -> Option<Value> {
        self.inputs.read().get(name).cloned()
    }

    /// Records a step's outputs so later steps can reference them.
    pub fn record_outputs(&self, step_id: &str, outputs: HashMap<String, Value>) {
        self.step_outputs
            .write()
            .entry(step_id.to_string())
            .or_default()
            .extend(outputs);
    }

    fn step_output(&self, step_id: &str, output: &str) -> Option<Value> {
        self.step_outputs
            .read()
            .get(step_id)
            .and_then(|outputs| outputs.get(output))
            .cloned()
    }

    /// Resolves every declared input on `step` to a concrete JSON value.
    ///
    /// `StepInput::Literal` values pass through unchanged.
    /// `StepInput::Reference { step, output }` is looked up in the
    /// already-recorded outputs of `step`; a reference to a step that
    /// hasn't produced that output yet is an execution error — the ready-set
    /// algorithm (`dag::evaluate`) guarantees referenced predecessors have
    /// already reached a terminal status before this step becomes ready, so
    /// this should only trigger on a malformed blueprint reference.
    pub fn resolve_inputs(&self, step: &StepDefinition) -> Result<HashMap<String, Value>> {
        let mut resolved = HashMap::with_capacity(step.inputs.len());
        for (name, input) in &step.inputs {
            let value = match input {
                StepInput::Literal(v) => v.clone(),
                StepInput::Reference { step: src, output } => {
                    self.step_output(src, output).ok_or_else(|| {
                        OrchestratorError::Validation(format!(
                            "step '{}' references unresolved output '{}' on step '{}'",
                            step.id, output, src
                        ))
                    })?
                }
            };
            resolved.insert(name.clone(), value);
        }
        Ok(resolved)
    }
}
