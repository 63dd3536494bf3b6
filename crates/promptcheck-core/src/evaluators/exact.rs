use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::evaluator::Evaluator;

/// Scores 1.0 iff the output equals the expected literal value verbatim.
///
/// A string expectation is compared against the raw output text; any other
/// JSON expectation is compared against the parsed output. The inline
/// assertion value wins over the test case's `expected` field when both are
/// present.
pub struct ExactMatchEvaluator {
	expected: Option<Value>,
}

impl ExactMatchEvaluator {
	pub fn new(expected: Option<Value>) -> Self {
		Self { expected }
	}
}

#[async_trait]
impl Evaluator for ExactMatchEvaluator {
	fn name(&self) -> &'static str {
		"exact"
	}

	async fn evaluate(&self, output: &str, expected: Option<&Value>) -> Result<f64> {
		let expected = self
			.expected
			.as_ref()
			.or(expected)
			.ok_or_else(|| anyhow::anyhow!("no expected value available"))?;

		let matched = match expected {
			Value::String(s) => output == s,
			other => match serde_json::from_str::<Value>(output) {
				Ok(parsed) => &parsed == other,
				Err(_) => false,
			},
		};
		Ok(if matched { 1.0 } else { 0.0 })
	}
}
