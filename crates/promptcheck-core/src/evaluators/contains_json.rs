use anyhow::Result;
use async_trait::async_trait;
use jsonschema::JSONSchema;
use regex::Regex;
use serde_json::Value;

use crate::evaluator::Evaluator;

/// Locates the first JSON object embedded in the output (a fenced code block
/// or a bare `{...}` span) and validates it against a JSON-Schema document.
/// Scores 1.0 iff a candidate is found, parses, and validates.
pub struct ContainsJsonEvaluator {
	schema: JSONSchema,
	labeled_fence: Regex,
	any_fence: Regex,
}

impl ContainsJsonEvaluator {
	pub fn new(schema: Value) -> Result<Self> {
		let schema = JSONSchema::compile(&schema)
			.map_err(|e| anyhow::anyhow!("invalid JSON schema: {}", e))?;
		let labeled_fence = Regex::new(r"```json\s*([\s\S]*?)```")?;
		let any_fence = Regex::new(r"```(?:\w+)?\s*([\s\S]*?)```")?;
		Ok(Self { schema, labeled_fence, any_fence })
	}

	/// First candidate that parses as JSON, trying a ```json-labeled fence
	/// anywhere in the output first, then any fenced block, then a bare
	/// `{...}` span. A fence holding unparseable content does not shadow a
	/// parseable object later in the output.
	fn extract(&self, output: &str) -> Option<Value> {
		let candidates = self
			.labeled_fence
			.captures_iter(output)
			.chain(self.any_fence.captures_iter(output))
			.map(|captures| captures[1].trim().to_string())
			.chain(first_object_span(output).map(str::to_string));
		for candidate in candidates {
			if let Ok(parsed) = serde_json::from_str(&candidate) {
				return Some(parsed);
			}
		}
		None
	}
}

#[async_trait]
impl Evaluator for ContainsJsonEvaluator {
	fn name(&self) -> &'static str {
		"contains_json"
	}

	async fn evaluate(&self, output: &str, _expected: Option<&Value>) -> Result<f64> {
		let parsed = match self.extract(output) {
			Some(parsed) => parsed,
			None => return Ok(0.0),
		};
		Ok(if self.schema.is_valid(&parsed) { 1.0 } else { 0.0 })
	}
}

/// First balanced `{...}` span, tracking string literals so braces inside
/// quoted values don't skew the depth count.
fn first_object_span(text: &str) -> Option<&str> {
	let start = text.find('{')?;
	let bytes = text.as_bytes();
	let mut depth = 0usize;
	let mut in_string = false;
	let mut escaped = false;

	for (offset, &byte) in bytes[start..].iter().enumerate() {
		if in_string {
			if escaped {
				escaped = false;
			} else if byte == b'\\' {
				escaped = true;
			} else if byte == b'"' {
				in_string = false;
			}
			continue;
		}
		match byte {
			b'"' => in_string = true,
			b'{' => depth += 1,
			b'}' => {
				depth -= 1;
				if depth == 0 {
					return Some(&text[start..=start + offset]);
				}
			}
			_ => {}
		}
	}
	None
}
