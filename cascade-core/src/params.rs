//! Run parameter documents
//!
//! Jobs carry an ordered sequence of parameter documents, one per pipeline
//! run of a launch. Each document maps a reserved key to pipeline-level
//! parameters and step uuids to step-level parameters. The shape is validated
//! at the API boundary; the engine only overlays validated documents onto a
//! pipeline definition.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::pipeline::PipelineDefinition;

/// Reserved key holding pipeline-level parameters inside a run document.
pub const PIPELINE_PARAMETERS_KEY: &str = "pipeline_parameters";

/// One run's parameter document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunParameters(pub serde_json::Map<String, serde_json::Value>);

/// Shape errors of a run parameter document.
#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("parameter key '{0}' is neither '{PIPELINE_PARAMETERS_KEY}' nor a step uuid")]
    InvalidKey(String),
    #[error("parameters for '{0}' are not a JSON object")]
    NotAnObject(String),
    #[error("parameters reference unknown step {0}")]
    UnknownStep(Uuid),
}

impl RunParameters {
    pub fn new() -> Self {
        Self(serde_json::Map::new())
    }

    /// Pipeline-level parameters, if present.
    pub fn pipeline_parameters(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.0.get(PIPELINE_PARAMETERS_KEY).and_then(|v| v.as_object())
    }

    /// Validate the document shape: every key is either the reserved
    /// pipeline-parameters key or a step uuid, and every value is an object.
    pub fn validate(&self) -> Result<(), ParameterError> {
        for (key, value) in &self.0 {
            if key != PIPELINE_PARAMETERS_KEY && key.parse::<Uuid>().is_err() {
                return Err(ParameterError::InvalidKey(key.clone()));
            }
            if !value.is_object() {
                return Err(ParameterError::NotAnObject(key.clone()));
            }
        }
        Ok(())
    }

    /// Overlay this document onto a pipeline definition: the reserved key
    /// replaces the pipeline-level parameters (absent means empty), step keys
    /// replace the matching step's parameters.
    pub fn overlay(&self, definition: &mut PipelineDefinition) -> Result<(), ParameterError> {
        definition.parameters = self.pipeline_parameters().cloned().unwrap_or_default();

        for (key, value) in &self.0 {
            if key == PIPELINE_PARAMETERS_KEY {
                continue;
            }
            let step_uuid: Uuid = key
                .parse()
                .map_err(|_| ParameterError::InvalidKey(key.clone()))?;
            let parameters = value
                .as_object()
                .ok_or_else(|| ParameterError::NotAnObject(key.clone()))?;
            let step = definition
                .steps
                .get_mut(&step_uuid)
                .ok_or(ParameterError::UnknownStep(step_uuid))?;
            step.parameters = parameters.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pipeline::StepDefinition;
    use serde_json::json;
    use std::collections::HashMap;

    fn document(value: serde_json::Value) -> RunParameters {
        serde_json::from_value(value).unwrap()
    }

    fn definition_with_step(step_uuid: Uuid) -> PipelineDefinition {
        PipelineDefinition {
            name: "test".to_string(),
            parameters: serde_json::Map::new(),
            steps: HashMap::from([(
                step_uuid,
                StepDefinition {
                    title: "step".to_string(),
                    environment: Some(Uuid::new_v4()),
                    parameters: serde_json::Map::new(),
                    incoming_connections: vec![],
                },
            )]),
        }
    }

    #[test]
    fn test_validate_accepts_reserved_and_step_keys() {
        let step_uuid = Uuid::new_v4();
        let params = document(json!({
            PIPELINE_PARAMETERS_KEY: {"alpha": 1},
            step_uuid.to_string(): {"beta": 2},
        }));
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_arbitrary_keys() {
        let params = document(json!({"not-a-uuid": {}}));
        assert!(matches!(
            params.validate(),
            Err(ParameterError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_validate_rejects_non_object_values() {
        let params = document(json!({PIPELINE_PARAMETERS_KEY: 42}));
        assert!(matches!(
            params.validate(),
            Err(ParameterError::NotAnObject(_))
        ));
    }

    #[test]
    fn test_overlay_sets_pipeline_and_step_parameters() {
        let step_uuid = Uuid::new_v4();
        let mut definition = definition_with_step(step_uuid);
        let params = document(json!({
            PIPELINE_PARAMETERS_KEY: {"alpha": 1},
            step_uuid.to_string(): {"beta": 2},
        }));

        params.overlay(&mut definition).unwrap();

        assert_eq!(definition.parameters.get("alpha"), Some(&json!(1)));
        assert_eq!(
            definition.steps[&step_uuid].parameters.get("beta"),
            Some(&json!(2))
        );
    }

    #[test]
    fn test_overlay_clears_pipeline_parameters_when_absent() {
        let step_uuid = Uuid::new_v4();
        let mut definition = definition_with_step(step_uuid);
        definition
            .parameters
            .insert("stale".to_string(), json!(true));

        document(json!({})).overlay(&mut definition).unwrap();

        assert!(definition.parameters.is_empty());
    }

    #[test]
    fn test_overlay_rejects_unknown_step() {
        let step_uuid = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut definition = definition_with_step(step_uuid);
        let params = document(json!({other.to_string(): {"x": 1}}));

        assert!(matches!(
            params.overlay(&mut definition),
            Err(ParameterError::UnknownStep(uuid)) if uuid == other
        ));
    }
}
