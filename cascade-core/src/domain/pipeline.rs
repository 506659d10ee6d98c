//! Pipeline definition types and DAG construction
//!
//! A [`PipelineDefinition`] is the persisted, serializable description of a
//! pipeline: its steps, their environments, their parameters and the
//! connections between them. A [`Pipeline`] is the materialized value used by
//! the orchestrator: steps in a valid execution order, with the set of
//! environments the pipeline needs.

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use uuid::Uuid;

/// Persisted pipeline definition snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    /// Pipeline-level parameters, overlaid per run.
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    pub steps: HashMap<Uuid, StepDefinition>,
}

/// One step of a pipeline definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub title: String,
    /// Environment backing the step's container image.
    #[serde(default)]
    pub environment: Option<Uuid>,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
    /// Steps that must complete before this one starts.
    #[serde(default)]
    pub incoming_connections: Vec<Uuid>,
}

/// Errors raised while materializing a pipeline from its definition.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("step {0} has no environment assigned")]
    UndefinedEnvironment(Uuid),
    #[error("step {step} references unknown step {connection}")]
    UnknownConnection { step: Uuid, connection: Uuid },
    #[error("pipeline contains a dependency cycle")]
    CyclicDependency,
}

/// Materialized pipeline: steps in execution order.
#[derive(Debug, Clone)]
pub struct Pipeline {
    steps: Vec<PipelineStep>,
}

/// One materialized step.
#[derive(Debug, Clone)]
pub struct PipelineStep {
    pub uuid: Uuid,
    pub environment: Uuid,
    pub incoming_connections: Vec<Uuid>,
}

impl Pipeline {
    /// Steps in a valid execution order.
    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    /// The set of environments referenced by the pipeline's steps.
    pub fn environments(&self) -> HashSet<Uuid> {
        self.steps.iter().map(|s| s.environment).collect()
    }
}

/// Materialize a [`Pipeline`] from a definition.
///
/// Validates that every step has an environment, that all connections refer
/// to existing steps and that the step graph is acyclic.
pub fn construct_pipeline(definition: &PipelineDefinition) -> Result<Pipeline, PipelineError> {
    let mut graph = DiGraph::new();
    let mut indices = HashMap::new();
    let mut materialized = HashMap::new();

    for (step_uuid, step) in &definition.steps {
        let Some(environment) = step.environment else {
            return Err(PipelineError::UndefinedEnvironment(*step_uuid));
        };
        indices.insert(*step_uuid, graph.add_node(*step_uuid));
        materialized.insert(
            *step_uuid,
            PipelineStep {
                uuid: *step_uuid,
                environment,
                incoming_connections: step.incoming_connections.clone(),
            },
        );
    }

    for (step_uuid, step) in &definition.steps {
        for connection in &step.incoming_connections {
            let from = indices
                .get(connection)
                .ok_or(PipelineError::UnknownConnection {
                    step: *step_uuid,
                    connection: *connection,
                })?;
            graph.add_edge(*from, indices[step_uuid], ());
        }
    }

    let order = toposort(&graph, None).map_err(|_| PipelineError::CyclicDependency)?;

    let steps = order
        .into_iter()
        .filter_map(|index| materialized.remove(&graph[index]))
        .collect();

    Ok(Pipeline { steps })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(environment: Uuid, incoming: Vec<Uuid>) -> StepDefinition {
        StepDefinition {
            title: "step".to_string(),
            environment: Some(environment),
            parameters: serde_json::Map::new(),
            incoming_connections: incoming,
        }
    }

    #[test]
    fn test_construct_orders_steps() {
        let env = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        let definition = PipelineDefinition {
            name: "test".to_string(),
            parameters: serde_json::Map::new(),
            steps: HashMap::from([
                (c, step(env, vec![b])),
                (b, step(env, vec![a])),
                (a, step(env, vec![])),
            ]),
        };

        let pipeline = construct_pipeline(&definition).unwrap();
        let order: Vec<Uuid> = pipeline.steps().iter().map(|s| s.uuid).collect();
        assert_eq!(order, vec![a, b, c]);
    }

    #[test]
    fn test_construct_rejects_cycle() {
        let env = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let definition = PipelineDefinition {
            name: "test".to_string(),
            parameters: serde_json::Map::new(),
            steps: HashMap::from([(a, step(env, vec![b])), (b, step(env, vec![a]))]),
        };

        assert!(matches!(
            construct_pipeline(&definition),
            Err(PipelineError::CyclicDependency)
        ));
    }

    #[test]
    fn test_construct_rejects_missing_environment() {
        let a = Uuid::new_v4();
        let definition = PipelineDefinition {
            name: "test".to_string(),
            parameters: serde_json::Map::new(),
            steps: HashMap::from([(
                a,
                StepDefinition {
                    title: "step".to_string(),
                    environment: None,
                    parameters: serde_json::Map::new(),
                    incoming_connections: vec![],
                },
            )]),
        };

        assert!(matches!(
            construct_pipeline(&definition),
            Err(PipelineError::UndefinedEnvironment(uuid)) if uuid == a
        ));
    }

    #[test]
    fn test_construct_rejects_unknown_connection() {
        let env = Uuid::new_v4();
        let a = Uuid::new_v4();
        let missing = Uuid::new_v4();

        let definition = PipelineDefinition {
            name: "test".to_string(),
            parameters: serde_json::Map::new(),
            steps: HashMap::from([(a, step(env, vec![missing]))]),
        };

        assert!(matches!(
            construct_pipeline(&definition),
            Err(PipelineError::UnknownConnection { .. })
        ));
    }

    #[test]
    fn test_environments_deduplicates() {
        let env = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let definition = PipelineDefinition {
            name: "test".to_string(),
            parameters: serde_json::Map::new(),
            steps: HashMap::from([(a, step(env, vec![])), (b, step(env, vec![]))]),
        };

        let pipeline = construct_pipeline(&definition).unwrap();
        assert_eq!(pipeline.environments(), HashSet::from([env]));
    }
}
