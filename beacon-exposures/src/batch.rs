//! Outbound batch payloads.

use serde::{Deserialize, Serialize};

use crate::config::{DeliverySettings, SettingsField};
use crate::event::ExposureEvent;

/// Deployment context shared by every exposure in a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl BatchContext {
    /// Resolve each field once from the settings.
    #[must_use]
    pub fn from_settings(settings: &DeliverySettings) -> Self {
        Self {
            env: settings.resolve(SettingsField::Env),
            service: settings.resolve(SettingsField::Service),
            version: settings.resolve(SettingsField::Version),
        }
    }
}

/// `{context, exposures}` payload sent to the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureBatch {
    pub context: BatchContext,
    pub exposures: Vec<ExposureEvent>,
}

impl ExposureBatch {
    pub fn len(&self) -> usize {
        self.exposures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exposures.is_empty()
    }
}

/// Wraps drained events with the context captured at construction.
#[derive(Debug, Clone)]
pub struct BatchBuilder {
    context: BatchContext,
}

impl BatchBuilder {
    #[must_use]
    pub fn new(settings: &DeliverySettings) -> Self {
        Self {
            context: BatchContext::from_settings(settings),
        }
    }

    #[must_use]
    pub fn context(&self) -> &BatchContext {
        &self.context
    }

    #[must_use]
    pub fn payload_for(&self, events: Vec<ExposureEvent>) -> ExposureBatch {
        ExposureBatch {
            context: self.context.clone(),
            exposures: events,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::event::{EvaluationContext, EvaluationResult};

    fn event(flag: &str) -> ExposureEvent {
        ExposureEvent::build_at(
            &EvaluationResult::logged("alloc", "on"),
            flag,
            &EvaluationContext::new("u1"),
            10,
        )
        .unwrap()
    }

    #[test]
    fn context_is_captured_at_construction() {
        let mut settings = DeliverySettings::default()
            .with_env("prod")
            .with_tag("service", "checkout");
        let builder = BatchBuilder::new(&settings);
        settings.env = Some("changed".into());

        assert_eq!(builder.context().env.as_deref(), Some("prod"));
        assert_eq!(builder.context().service.as_deref(), Some("checkout"));
        assert_eq!(builder.context().version, None);
    }

    #[test]
    fn payload_wraps_events_and_omits_missing_context() {
        let builder = BatchBuilder::new(&DeliverySettings::default().with_env("qa"));
        let batch = builder.payload_for(vec![event("f1"), event("f2")]);

        assert_eq!(batch.len(), 2);
        let value = serde_json::to_value(&batch).unwrap();
        assert_eq!(value["context"], json!({"env": "qa"}));
        assert_eq!(value["exposures"][1]["flag"]["key"], "f2");
    }

    #[test]
    fn empty_settings_build_empty_context() {
        let builder = BatchBuilder::new(&DeliverySettings::default());
        let value = serde_json::to_value(builder.payload_for(Vec::new())).unwrap();

        assert_eq!(value, json!({"context": {}, "exposures": []}));
    }
}
