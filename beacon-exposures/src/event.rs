//! Exposure events and the inputs they are built from.
//!
//! An [`ExposureEvent`] is built once from an [`EvaluationResult`] and an
//! [`EvaluationContext`] and never mutated afterwards. The same inputs also
//! produce the dedup key (`"{flag}:{subject}"`) and value
//! (`"{allocation}:{variant}"`) consumed by the deduplicator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ExposureError, Result};

/// Context field holding the subject identifier.
pub const TARGETING_KEY_FIELD: &str = "targeting_key";

/// Outcome of a flag evaluation, as far as exposure reporting cares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Whether this evaluation should be reported at all.
    #[serde(default)]
    pub do_log: bool,
    #[serde(default)]
    pub allocation_key: Option<String>,
    #[serde(default)]
    pub variant: Option<String>,
}

impl EvaluationResult {
    /// A result that opts in to reporting.
    #[must_use]
    pub fn logged(allocation_key: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            do_log: true,
            allocation_key: Some(allocation_key.into()),
            variant: Some(variant.into()),
        }
    }

    fn allocation_key(&self) -> Result<&str> {
        self.allocation_key
            .as_deref()
            .ok_or(ExposureError::MissingField("allocation_key"))
    }

    fn variant(&self) -> Result<&str> {
        self.variant
            .as_deref()
            .ok_or(ExposureError::MissingField("variant"))
    }
}

/// Evaluation context: the targeting key plus arbitrary fields, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvaluationContext {
    fields: Map<String, Value>,
}

impl EvaluationContext {
    #[must_use]
    pub fn new(targeting_key: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(TARGETING_KEY_FIELD.to_string(), Value::String(targeting_key.into()));
        Self { fields }
    }

    #[must_use]
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// The subject identifier, if present and a string.
    #[must_use]
    pub fn targeting_key(&self) -> Option<&str> {
        self.fields.get(TARGETING_KEY_FIELD).and_then(Value::as_str)
    }

    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    fn require_targeting_key(&self) -> Result<&str> {
        self.targeting_key()
            .ok_or(ExposureError::MissingField(TARGETING_KEY_FIELD))
    }
}

/// A primitive attribute value carried on the subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Boolean(bool),
    Integer(i64),
    /// Integers above `i64::MAX`.
    Unsigned(u64),
    Float(f64),
    String(String),
}

impl AttributeValue {
    /// Convert a JSON value, or `None` for non-scalars.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Self::Boolean(*b)),
            Value::String(s) => Some(Self::String(s.clone())),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Integer)
                .or_else(|| n.as_u64().map(Self::Unsigned))
                .or_else(|| n.as_f64().map(Self::Float)),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }
}

/// `{"key": ...}` wrapper used for allocation, flag, and variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRef {
    pub key: String,
}

impl KeyRef {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
        }
    }
}

/// The evaluated subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub attributes: BTreeMap<String, AttributeValue>,
}

/// A single exposure, ready for batching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureEvent {
    /// Capture time in epoch milliseconds.
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,
    pub allocation: KeyRef,
    pub flag: KeyRef,
    pub variant: KeyRef,
    pub subject: Subject,
}

impl ExposureEvent {
    /// Build an event stamped with the current wall-clock time.
    pub fn build(
        result: &EvaluationResult,
        flag_key: &str,
        context: &EvaluationContext,
    ) -> Result<Self> {
        Self::build_at(
            result,
            flag_key,
            context,
            chrono::Utc::now().timestamp_millis(),
        )
    }

    /// Build an event with an explicit timestamp.
    pub fn build_at(
        result: &EvaluationResult,
        flag_key: &str,
        context: &EvaluationContext,
        timestamp_ms: i64,
    ) -> Result<Self> {
        let subject_id = context.require_targeting_key()?;

        Ok(Self {
            timestamp_ms,
            allocation: KeyRef::new(result.allocation_key()?),
            flag: KeyRef::new(flag_key),
            variant: KeyRef::new(result.variant()?),
            subject: Subject {
                id: subject_id.to_string(),
                attributes: subject_attributes(context),
            },
        })
    }
}

/// Dedup key: `"{flag_key}:{targeting_key}"`.
pub fn cache_key(
    _result: &EvaluationResult,
    flag_key: &str,
    context: &EvaluationContext,
) -> Result<String> {
    Ok(format!("{flag_key}:{}", context.require_targeting_key()?))
}

/// Dedup value: `"{allocation_key}:{variant}"`.
pub fn cache_value(
    result: &EvaluationResult,
    _flag_key: &str,
    _context: &EvaluationContext,
) -> Result<String> {
    Ok(format!("{}:{}", result.allocation_key()?, result.variant()?))
}

/// Every context field except the targeting key, keeping only scalars.
fn subject_attributes(context: &EvaluationContext) -> BTreeMap<String, AttributeValue> {
    context
        .fields()
        .iter()
        .filter(|(name, _)| name.as_str() != TARGETING_KEY_FIELD)
        .filter_map(|(name, value)| {
            AttributeValue::from_json(value).map(|attr| (name.clone(), attr))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn context() -> EvaluationContext {
        EvaluationContext::new("user-42")
            .with_field("country", "NZ")
            .with_field("age", 37)
            .with_field("score", 0.75)
            .with_field("beta", true)
            .with_field("tags", json!(["a", "b"]))
            .with_field("profile", json!({"plan": "pro"}))
            .with_field("nickname", Value::Null)
    }

    #[test]
    fn build_copies_keys_and_subject() {
        let result = EvaluationResult::logged("alloc-1", "treatment");
        let event = ExposureEvent::build_at(&result, "checkout-v2", &context(), 1_700_000_000_000)
            .unwrap();

        assert_eq!(event.timestamp_ms, 1_700_000_000_000);
        assert_eq!(event.allocation.key, "alloc-1");
        assert_eq!(event.flag.key, "checkout-v2");
        assert_eq!(event.variant.key, "treatment");
        assert_eq!(event.subject.id, "user-42");
    }

    #[test]
    fn attributes_keep_only_scalars_and_drop_targeting_key() {
        let result = EvaluationResult::logged("a", "v");
        let event = ExposureEvent::build(&result, "f", &context()).unwrap();
        let attrs = &event.subject.attributes;

        assert_eq!(attrs.len(), 4);
        assert_eq!(attrs["country"], AttributeValue::String("NZ".into()));
        assert_eq!(attrs["age"], AttributeValue::Integer(37));
        assert_eq!(attrs["score"], AttributeValue::Float(0.75));
        assert_eq!(attrs["beta"], AttributeValue::Boolean(true));
        assert!(!attrs.contains_key(TARGETING_KEY_FIELD));
    }

    #[test]
    fn large_integers_stay_exact() {
        let big = serde_json::json!(u64::MAX);
        assert_eq!(
            AttributeValue::from_json(&big),
            Some(AttributeValue::Unsigned(u64::MAX))
        );
        assert_eq!(
            AttributeValue::from_json(&serde_json::json!(-5)),
            Some(AttributeValue::Integer(-5))
        );

        let parsed: AttributeValue = serde_json::from_str("18446744073709551615").unwrap();
        assert_eq!(parsed, AttributeValue::Unsigned(u64::MAX));
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "18446744073709551615");
    }

    #[test]
    fn build_uses_current_time() {
        let before = chrono::Utc::now().timestamp_millis();
        let event =
            ExposureEvent::build(&EvaluationResult::logged("a", "v"), "f", &context()).unwrap();
        let after = chrono::Utc::now().timestamp_millis();

        assert!(event.timestamp_ms >= before && event.timestamp_ms <= after);
    }

    #[test]
    fn cache_key_and_value_formats() {
        let result = EvaluationResult::logged("alloc-1", "control");
        let ctx = context();

        assert_eq!(cache_key(&result, "flag-a", &ctx).unwrap(), "flag-a:user-42");
        assert_eq!(
            cache_value(&result, "flag-a", &ctx).unwrap(),
            "alloc-1:control"
        );
    }

    #[test]
    fn missing_fields_are_contract_errors() {
        let no_variant = EvaluationResult {
            do_log: true,
            allocation_key: Some("a".into()),
            variant: None,
        };
        let err = ExposureEvent::build(&no_variant, "f", &context()).unwrap_err();
        assert!(matches!(err, ExposureError::MissingField("variant")));

        let anonymous = EvaluationContext::default().with_field("country", "NZ");
        let err = cache_key(&EvaluationResult::logged("a", "v"), "f", &anonymous).unwrap_err();
        assert!(matches!(err, ExposureError::MissingField(TARGETING_KEY_FIELD)));
    }

    #[test]
    fn serializes_as_nested_field_hash() {
        let ctx = EvaluationContext::new("u1").with_field("plan", "free");
        let event =
            ExposureEvent::build_at(&EvaluationResult::logged("a1", "on"), "f1", &ctx, 5).unwrap();

        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "timestamp": 5,
                "allocation": {"key": "a1"},
                "flag": {"key": "f1"},
                "variant": {"key": "on"},
                "subject": {"id": "u1", "attributes": {"plan": "free"}}
            })
        );
    }

    #[test]
    fn context_deserializes_from_flat_object() {
        let ctx: EvaluationContext =
            serde_json::from_value(json!({"targeting_key": "u9", "tier": 3})).unwrap();

        assert_eq!(ctx.targeting_key(), Some("u9"));
        assert_eq!(ctx.fields().len(), 2);
    }
}
