// Copyright (c) 2025 LLM DevOps
// SPDX-License-Identifier: Apache-2.0

//! The immutable blueprint: [`WorkflowDefinition`] and its [`StepDefinition`]s.

use std::collections::{HashMap, HashSet};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DomainError;

/// The four step kinds the registry (C5) dispatches over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    NodeOperation,
    RelationshipOperation,
    CallOperation,
    Inline,
}

/// A step's input: either a literal value or a reference to a prior step's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepInput {
    Literal(Value),
    Reference {
        /// The step whose output is being referenced.
        step: String,
        /// The output key on that step.
        output: String,
    },
}

/// One node in the workflow DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Node or relationship the operation acts on. `None` for `INLINE`.
    #[serde(default)]
    pub target: Option<String>,
    /// Symbolic operation name. `None` for `INLINE`.
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub inputs: HashMap<String, StepInput>,
    #[serde(default)]
    pub on_success: Vec<String>,
    #[serde(default)]
    pub on_failure: Vec<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_max_retries() -> u32 {
    3
}

impl StepDefinition {
    pub fn new(id: impl Into<String>, step_type: StepType) -> Self {
        Self {
            id: id.into(),
            step_type,
            target: None,
            operation: None,
            inputs: HashMap::new(),
            on_success: Vec::new(),
            on_failure: Vec::new(),
            max_retries: default_max_retries(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn on_success(mut self, steps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.on_success = steps.into_iter().map(Into::into).collect();
        self
    }

    pub fn on_failure(mut self, steps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.on_failure = steps.into_iter().map(Into::into).collect();
        self
    }

    /// All step-ids this step may hand control to, regardless of edge kind.
    pub fn successors(&self) -> impl Iterator<Item = &String> {
        self.on_success.iter().chain(self.on_failure.iter())
    }
}

/// Declared input slot on a [`WorkflowDefinition`] (name -> type/default).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputDeclaration {
    #[serde(default)]
    pub declared_type: Option<String>,
    #[serde(default)]
    pub default: Option<Value>,
}

/// Immutable blueprint submitted to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub inputs: HashMap<String, InputDeclaration>,
    pub steps: HashMap<String, StepDefinition>,
    #[serde(default)]
    pub preconditions: Vec<String>,
    #[serde(default)]
    pub triggers: Vec<String>,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            inputs: HashMap::new(),
            steps: HashMap::new(),
            preconditions: Vec::new(),
            triggers: Vec::new(),
        }
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.insert(step.id.clone(), step);
        self
    }

    pub fn get_step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.get(id)
    }

    pub fn step_ids(&self) -> HashSet<&str> {
        self.steps.keys().map(String::as_str).collect()
    }

    /// Checks the §3 invariant: every successor id exists, and the induced
    /// graph is acyclic. One Kahn-style check (via petgraph) replaces the
    /// duplicated recursive-DFS cycle checks seen in the source material.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.steps.is_empty() {
            return Err(DomainError::EmptySteps);
        }

        let mut graph = DiGraph::<(), ()>::new();
        let mut node_of = HashMap::with_capacity(self.steps.len());
        for id in self.steps.keys() {
            node_of.insert(id.as_str(), graph.add_node(()));
        }

        for step in self.steps.values() {
            for succ in step.successors() {
                let Some(&target) = node_of.get(succ.as_str()) else {
                    return Err(DomainError::UnknownDependency(
                        step.id.clone(),
                        succ.clone(),
                    ));
                };
                let source = node_of[step.id.as_str()];
                graph.add_edge(source, target, ());
            }
        }

        if is_cyclic_directed(&graph) {
            return Err(DomainError::CyclicDependency(self.steps.keys().next().cloned().unwrap_or_default()));
        }

        Ok(())
    }
}
