use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tabled::Tabled;

/// Outcome of one test case against one provider. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
	/// Variable bindings the unit ran with.
	pub variables: Map<String, Value>,
	/// Raw provider output; `None` when the provider call itself failed.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub output: Option<String>,
	/// Mean of the individual assertion scores, in [0.0, 1.0].
	pub score: f64,
	/// True iff every assertion scored exactly 1.0.
	pub passed: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	pub duration_ms: u64,
}

impl TestResult {
	/// A zero-score failure carrying the error description.
	pub fn failed(variables: Map<String, Value>, error: impl Into<String>, duration_ms: u64) -> Self {
		Self {
			variables,
			output: None,
			score: 0.0,
			passed: false,
			error: Some(error.into()),
			duration_ms,
		}
	}
}

/// All results for a single provider, in test-case submission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResult {
	pub provider_id: String,
	pub test_results: Vec<TestResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
	pub total: usize,
	pub passed: usize,
	pub pass_rate: f64,
	pub avg_score: f64,
}

/// Terminal artifact of a run: one `ProviderResult` per selected provider,
/// in provider-declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResults {
	pub provider_results: Vec<ProviderResult>,
}

#[derive(Debug, Clone, Tabled)]
struct SummaryRow {
	provider: String,
	case: usize,
	passed: String,
	score: f64,
	output: String,
	error: String,
}

impl EvaluationResults {
	pub fn summarize(&self) -> RunSummary {
		let mut total = 0usize;
		let mut passed = 0usize;
		let mut score_sum = 0.0f64;

		for pr in &self.provider_results {
			for tr in &pr.test_results {
				total += 1;
				if tr.passed {
					passed += 1;
				}
				score_sum += tr.score;
			}
		}

		let pass_rate = if total == 0 { 0.0 } else { passed as f64 / total as f64 };
		let avg_score = if total == 0 { 0.0 } else { score_sum / total as f64 };

		RunSummary { total, passed, pass_rate, avg_score }
	}

	pub fn all_passed(&self) -> bool {
		self.provider_results
			.iter()
			.flat_map(|pr| pr.test_results.iter())
			.all(|tr| tr.passed)
	}

	pub fn summary_table(&self) -> String {
		use tabled::Table;
		let mut rows = Vec::new();
		for pr in &self.provider_results {
			for (i, tr) in pr.test_results.iter().enumerate() {
				rows.push(SummaryRow {
					provider: pr.provider_id.clone(),
					case: i,
					passed: if tr.passed { "✓" } else { " " }.to_string(),
					score: tr.score,
					output: truncate(tr.output.clone().unwrap_or_default(), 64),
					error: truncate(tr.error.clone().unwrap_or_default(), 48),
				});
			}
		}

		let table = Table::new(rows);
		let summary = self.summarize();
		let summary_text = format!(
			"Total: {}  Passed: {}  Pass rate: {:.1}%  Avg score: {:.3}",
			summary.total,
			summary.passed,
			summary.pass_rate * 100.0,
			summary.avg_score
		);

		format!("{}\n\n{}\n", table, summary_text)
	}
}

fn truncate(s: String, max_len: usize) -> String {
	if s.len() <= max_len {
		return s;
	}
	let mut truncated = s.chars().take(max_len.saturating_sub(1)).collect::<String>();
	truncated.push('…');
	truncated
}

#[cfg(test)]
mod tests {
	use super::*;

	fn result(score: f64, passed: bool) -> TestResult {
		TestResult {
			variables: Map::new(),
			output: Some("out".to_string()),
			score,
			passed,
			error: None,
			duration_ms: 1,
		}
	}

	#[test]
	fn summarize_counts_across_providers() {
		let results = EvaluationResults {
			provider_results: vec![
				ProviderResult {
					provider_id: "p1".to_string(),
					test_results: vec![result(1.0, true), result(0.0, false)],
				},
				ProviderResult {
					provider_id: "p2".to_string(),
					test_results: vec![result(1.0, true), result(1.0, true)],
				},
			],
		};

		let summary = results.summarize();
		assert_eq!(summary.total, 4);
		assert_eq!(summary.passed, 3);
		assert!((summary.pass_rate - 0.75).abs() < 1e-9);
		assert!((summary.avg_score - 0.75).abs() < 1e-9);
		assert!(!results.all_passed());
	}

	#[test]
	fn empty_run_summarizes_to_zero() {
		let results = EvaluationResults { provider_results: vec![] };
		let summary = results.summarize();
		assert_eq!(summary.total, 0);
		assert_eq!(summary.pass_rate, 0.0);
		assert!(results.all_passed());
	}
}
