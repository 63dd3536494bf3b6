use std::path::Path;

use serde_json::{Map, Value};

use crate::config::{AssertionSpec, DefaultTest, TestSpec};
use crate::error::ConfigError;

/// One concrete unit of work: variable bindings plus the assertions the
/// provider's output must satisfy. Produced here, consumed read-only by the
/// runner.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: Option<String>,
    pub vars: Map<String, Value>,
    pub expected: Option<Value>,
    pub assertions: Vec<AssertionSpec>,
}

/// Expand the configured test specs into the full ordered test-case sequence.
///
/// File specs load a line-delimited JSON dataset; inline specs map one-to-one.
/// Output order equals declaration order, with file contents in line order.
/// That order is the contract the runner preserves end-to-end. Cases that
/// declare no assertions fall back to the run's default assertion set.
pub async fn expand_tests(
    specs: &[TestSpec],
    default_test: Option<&DefaultTest>,
) -> Result<Vec<TestCase>, ConfigError> {
    let mut cases = Vec::new();
    for spec in specs {
        match spec {
            TestSpec::Inline { name, vars, expected, assertions } => {
                cases.push(TestCase {
                    name: name.clone(),
                    vars: vars.clone(),
                    expected: expected.clone(),
                    assertions: assertions.clone(),
                });
            }
            TestSpec::File { file } => {
                cases.extend(load_jsonl(file).await?);
            }
        }
    }

    if let Some(default) = default_test {
        for case in &mut cases {
            if case.assertions.is_empty() {
                case.assertions = default.assertions.clone();
            }
        }
    }

    Ok(cases)
}

/// Read a JSONL dataset where each line is one object with at minimum a
/// `vars` mapping, optionally `name`, `expected`, and `assert`. A malformed
/// line fails the whole dataset; partial loading is not a useful recovery
/// mode for datasets this small.
async fn load_jsonl(file: &str) -> Result<Vec<TestCase>, ConfigError> {
    let path = file.strip_prefix("file://").unwrap_or(file);
    let dataset_err = |message: String| ConfigError::Dataset {
        path: path.to_string(),
        message,
    };

    let content = tokio::fs::read_to_string(Path::new(path))
        .await
        .map_err(|err| dataset_err(format!("failed to read: {}", err)))?;

    let mut cases = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line)
            .map_err(|err| dataset_err(format!("invalid JSON on line {}: {}", idx + 1, err)))?;
        let obj = value
            .as_object()
            .ok_or_else(|| dataset_err(format!("line {}: expected an object", idx + 1)))?;
        let vars = obj
            .get("vars")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| dataset_err(format!("line {}: missing 'vars' object", idx + 1)))?;
        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string);
        let expected = obj.get("expected").cloned();
        let assertions = match obj.get("assert") {
            Some(raw) => serde_json::from_value(raw.clone())
                .map_err(|err| dataset_err(format!("line {}: bad 'assert' list: {}", idx + 1, err)))?,
            None => Vec::new(),
        };
        cases.push(TestCase { name, vars, expected, assertions });
    }
    Ok(cases)
}
