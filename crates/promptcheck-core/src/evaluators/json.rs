use anyhow::Result;
use async_trait::async_trait;
use jsonschema::JSONSchema;
use serde_json::Value;

use crate::evaluator::Evaluator;

/// Requires the entire output to parse as JSON and validate against a
/// JSON-Schema document. Scores 1.0 on success, 0.0 otherwise.
pub struct JsonSchemaEvaluator {
	schema: JSONSchema,
}

impl JsonSchemaEvaluator {
	/// Compiles the schema; an invalid schema is an error here, not at
	/// evaluation time.
	pub fn new(schema: Value) -> Result<Self> {
		let schema = JSONSchema::compile(&schema)
			.map_err(|e| anyhow::anyhow!("invalid JSON schema: {}", e))?;
		Ok(Self { schema })
	}
}

#[async_trait]
impl Evaluator for JsonSchemaEvaluator {
	fn name(&self) -> &'static str {
		"json_schema"
	}

	async fn evaluate(&self, output: &str, _expected: Option<&Value>) -> Result<f64> {
		let parsed: Value = match serde_json::from_str(output) {
			Ok(parsed) => parsed,
			Err(_) => return Ok(0.0),
		};
		Ok(if self.schema.is_valid(&parsed) { 1.0 } else { 0.0 })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn event_schema() -> Value {
		json!({
			"type": "object",
			"properties": {
				"name": {"type": "string"},
				"event_type": {"type": "string"},
				"out_of_office": {"type": "boolean"}
			},
			"required": ["name", "event_type", "out_of_office"]
		})
	}

	#[tokio::test]
	async fn valid_output_scores_one() {
		let evaluator = JsonSchemaEvaluator::new(event_schema()).unwrap();
		let output = r#"{"name": "John Smith", "event_type": "vacation", "out_of_office": true}"#;
		assert_eq!(evaluator.evaluate(output, None).await.unwrap(), 1.0);
	}

	#[tokio::test]
	async fn missing_required_field_scores_zero() {
		let evaluator = JsonSchemaEvaluator::new(event_schema()).unwrap();
		let output = r#"{"name": "John Smith", "event_type": "vacation"}"#;
		assert_eq!(evaluator.evaluate(output, None).await.unwrap(), 0.0);
	}

	#[tokio::test]
	async fn non_json_output_scores_zero() {
		let evaluator = JsonSchemaEvaluator::new(event_schema()).unwrap();
		assert_eq!(evaluator.evaluate("Invalid JSON response", None).await.unwrap(), 0.0);
	}

	#[test]
	fn bad_schema_fails_construction() {
		assert!(JsonSchemaEvaluator::new(json!({"type": "no-such-type"})).is_err());
	}
}
