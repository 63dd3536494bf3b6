use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::evaluator::{Evaluator, Grader};

/// Delegates the judgment to the grading collaborator with a free-text
/// rubric. The grader's score is clamped into [0.0, 1.0].
pub struct LlmRubricEvaluator {
	rubric: String,
	grader: Arc<dyn Grader>,
}

impl LlmRubricEvaluator {
	pub fn new(rubric: String, grader: Arc<dyn Grader>) -> Self {
		Self { rubric, grader }
	}
}

#[async_trait]
impl Evaluator for LlmRubricEvaluator {
	fn name(&self) -> &'static str {
		"llm_rubric"
	}

	async fn evaluate(&self, output: &str, _expected: Option<&Value>) -> Result<f64> {
		let score = self.grader.grade(&self.rubric, output).await?;
		Ok(score.clamp(0.0, 1.0))
	}
}

/// Same contract as the rubric evaluator, keyed by "criteria" text instead.
pub struct GradedCriteriaEvaluator {
	criteria: String,
	grader: Arc<dyn Grader>,
}

impl GradedCriteriaEvaluator {
	pub fn new(criteria: String, grader: Arc<dyn Grader>) -> Self {
		Self { criteria, grader }
	}
}

#[async_trait]
impl Evaluator for GradedCriteriaEvaluator {
	fn name(&self) -> &'static str {
		"g_eval"
	}

	async fn evaluate(&self, output: &str, _expected: Option<&Value>) -> Result<f64> {
		let score = self.grader.grade(&self.criteria, output).await?;
		Ok(score.clamp(0.0, 1.0))
	}
}
