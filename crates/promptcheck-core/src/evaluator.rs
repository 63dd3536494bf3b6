use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::config::{AssertionSpec, EvalConfig};
use crate::error::ConfigError;
use crate::evaluators::contains_json::ContainsJsonEvaluator;
use crate::evaluators::exact::ExactMatchEvaluator;
use crate::evaluators::json::JsonSchemaEvaluator;
use crate::evaluators::rubric::{GradedCriteriaEvaluator, LlmRubricEvaluator};

/// Executable form of an assertion: scores one output in [0.0, 1.0].
/// Pass is derived by the runner as score == 1.0.
#[async_trait]
pub trait Evaluator: Send + Sync {
    fn name(&self) -> &'static str;
    async fn evaluate(&self, output: &str, expected: Option<&Value>) -> Result<f64>;
}

/// External grading collaborator for rubric and graded-criteria assertions,
/// typically a second model call. Input is the rubric/criteria text plus the
/// output under judgment; result is a score in [0.0, 1.0].
#[async_trait]
pub trait Grader: Send + Sync {
    async fn grade(&self, instructions: &str, output: &str) -> Result<f64>;
}

/// The closed set of recognized assertion tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssertionKind {
    Exact,
    ContainsJson,
    JsonSchema,
    LlmRubric,
    GEval,
}

fn parse_kind(tag: &str) -> Result<AssertionKind, ConfigError> {
    match tag {
        "exact" | "exact-match" | "exact_match" => Ok(AssertionKind::Exact),
        "contains-json" | "contains_json" => Ok(AssertionKind::ContainsJson),
        "json-schema" | "json_schema" => Ok(AssertionKind::JsonSchema),
        "llm-rubric" | "llm_rubric" => Ok(AssertionKind::LlmRubric),
        "g-eval" | "g_eval" => Ok(AssertionKind::GEval),
        other => Err(ConfigError::UnknownAssertionType(other.to_string())),
    }
}

/// Resolve a list of assertion specs into executable evaluators.
///
/// References are inlined here, before any provider call: at most one hop
/// through the assertion-template table followed by at most one hop through
/// the schema table. Anything unresolvable is a fatal config error naming
/// the offending path.
pub fn resolve_assertions(
    specs: &[AssertionSpec],
    config: &EvalConfig,
    grader: Option<&Arc<dyn Grader>>,
) -> Result<Vec<Arc<dyn Evaluator>>, ConfigError> {
    specs
        .iter()
        .map(|spec| resolve_one(spec, config, grader))
        .collect()
}

fn resolve_one(
    spec: &AssertionSpec,
    config: &EvalConfig,
    grader: Option<&Arc<dyn Grader>>,
) -> Result<Arc<dyn Evaluator>, ConfigError> {
    // One template hop, if the spec carries a reference instead of a value.
    let spec = match (&spec.value, &spec.reference) {
        (None, Some(path)) => lookup_template(path, config)?.clone(),
        _ => spec.clone(),
    };

    // One schema hop, if the inlined value is itself a `$ref`.
    let value = match spec.value {
        Some(value) => Some(resolve_schema_ref(value, config)?),
        None => None,
    };

    let kind = parse_kind(&spec.kind)?;
    let missing = || ConfigError::MissingValue { kind: spec.kind.clone() };

    let evaluator: Arc<dyn Evaluator> = match kind {
        AssertionKind::Exact => Arc::new(ExactMatchEvaluator::new(value)),
        AssertionKind::JsonSchema => {
            let schema = value.ok_or_else(missing)?;
            Arc::new(
                JsonSchemaEvaluator::new(schema)
                    .map_err(|err| ConfigError::InvalidSchema(err.to_string()))?,
            )
        }
        AssertionKind::ContainsJson => {
            let schema = value.ok_or_else(missing)?;
            Arc::new(
                ContainsJsonEvaluator::new(schema)
                    .map_err(|err| ConfigError::InvalidSchema(err.to_string()))?,
            )
        }
        AssertionKind::LlmRubric => {
            let rubric = value
                .as_ref()
                .and_then(Value::as_str)
                .ok_or_else(missing)?
                .to_string();
            let grader = grader
                .cloned()
                .ok_or_else(|| ConfigError::GraderRequired(spec.kind.clone()))?;
            Arc::new(LlmRubricEvaluator::new(rubric, grader))
        }
        AssertionKind::GEval => {
            let criteria = value
                .as_ref()
                .and_then(Value::as_str)
                .ok_or_else(missing)?
                .to_string();
            let grader = grader
                .cloned()
                .ok_or_else(|| ConfigError::GraderRequired(spec.kind.clone()))?;
            Arc::new(GradedCriteriaEvaluator::new(criteria, grader))
        }
    };
    Ok(evaluator)
}

fn lookup_template<'a>(
    path: &str,
    config: &'a EvalConfig,
) -> Result<&'a AssertionSpec, ConfigError> {
    let unresolved = || ConfigError::UnresolvedReference(path.to_string());
    let name = path
        .strip_prefix("#/assertion_templates/")
        .or_else(|| path.strip_prefix("#/assertionTemplates/"))
        .ok_or_else(unresolved)?;
    let template = config
        .assertion_templates
        .get(name)
        .ok_or_else(unresolved)?;
    // A template that carries another template reference would need a second
    // hop; treat it as unresolvable rather than chasing cycles.
    if template.value.is_none() && template.reference.is_some() {
        return Err(unresolved());
    }
    Ok(template)
}

/// If `value` is `{"$ref": "#/schemas/<name>"}` (or the bare `#/<name>`
/// form), replace it with the named schema document. Any other value passes
/// through untouched.
fn resolve_schema_ref(value: Value, config: &EvalConfig) -> Result<Value, ConfigError> {
    let path = match value.as_object().and_then(|obj| obj.get("$ref")).and_then(Value::as_str) {
        Some(path) => path.to_string(),
        None => return Ok(value),
    };
    let unresolved = || ConfigError::UnresolvedReference(path.clone());
    let name = path
        .strip_prefix("#/schemas/")
        .or_else(|| path.strip_prefix("#/"))
        .ok_or_else(unresolved)?;
    if name.contains('/') {
        // Only the schema table is addressable from here; a nested template
        // path means a second level of indirection, which is out of contract.
        return Err(unresolved());
    }
    config.schemas.get(name).cloned().ok_or_else(unresolved)
}
