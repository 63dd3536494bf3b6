use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, info};

use crate::agent::Agent;
use crate::cache::{generate_cache_key, FileCache};
use crate::config::{EvalConfig, ProviderSpec};
use crate::dataset::{expand_tests, TestCase};
use crate::error::ConfigError;
use crate::evaluator::{resolve_assertions, Evaluator, Grader};
use promptcheck_types::{EvaluationResults, ProviderResult, TestResult};

pub struct RunnerBuilder {
	config: Option<EvalConfig>,
	agent: Option<Arc<dyn Agent>>,
	grader: Option<Arc<dyn Grader>>,
	cache: Option<FileCache>,
	verbose: bool,
	max_concurrent: Option<usize>,
}

impl RunnerBuilder {
	pub fn new() -> Self {
		Self {
			config: None,
			agent: None,
			grader: None,
			cache: None,
			verbose: false,
			max_concurrent: None,
		}
	}

	pub fn config(mut self, config: EvalConfig) -> Self {
		self.config = Some(config);
		self
	}

	pub fn agent(mut self, agent: Arc<dyn Agent>) -> Self {
		self.agent = Some(agent);
		self
	}

	pub fn grader(mut self, grader: Arc<dyn Grader>) -> Self {
		self.grader = Some(grader);
		self
	}

	/// Replace the cache built from the config's cache settings.
	pub fn cache(mut self, cache: FileCache) -> Self {
		self.cache = Some(cache);
		self
	}

	/// Verbose mode forces fully sequential execution.
	pub fn verbose(mut self, verbose: bool) -> Self {
		self.verbose = verbose;
		self
	}

	pub fn max_concurrent(mut self, n: usize) -> Self {
		self.max_concurrent = Some(n.max(1));
		self
	}

	pub fn build(self) -> Result<EvaluationRunner> {
		let config = self.config.ok_or_else(|| anyhow::anyhow!("config must be set"))?;
		let agent = self.agent.ok_or_else(|| anyhow::anyhow!("agent must be set"))?;
		let cache = self
			.cache
			.unwrap_or_else(|| FileCache::from_settings(&config.cache));
		let max_concurrent = self.max_concurrent.unwrap_or(config.max_concurrent).max(1);
		Ok(EvaluationRunner {
			config,
			agent,
			grader: self.grader,
			cache,
			verbose: self.verbose,
			max_concurrent,
		})
	}
}

impl Default for RunnerBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Orchestrates one evaluation run: expands datasets, resolves assertions
/// up front, memoizes provider calls through the cache, and fans test cases
/// out under bounded concurrency while keeping results in submission order.
pub struct EvaluationRunner {
	config: EvalConfig,
	agent: Arc<dyn Agent>,
	grader: Option<Arc<dyn Grader>>,
	cache: FileCache,
	verbose: bool,
	max_concurrent: usize,
}

impl EvaluationRunner {
	pub fn builder() -> RunnerBuilder {
		RunnerBuilder::new()
	}

	pub fn cache(&self) -> &FileCache {
		&self.cache
	}

	/// Run the full provider × test-case matrix.
	///
	/// Configuration errors (unknown provider, unresolvable assertion, bad
	/// dataset, a case with no assertions) abort here before any provider
	/// call. Provider and evaluator failures during execution never abort
	/// the run; they become zero-score results on the affected unit only.
	pub async fn run(&self, provider_override: Option<&str>) -> Result<EvaluationResults> {
		let providers = self.effective_providers(provider_override)?;
		let cases = expand_tests(&self.config.tests, self.config.default_test.as_ref()).await?;

		// Fail-fast point: every assertion for the whole run is resolved
		// before the first provider call.
		let mut evaluators: Vec<Vec<Arc<dyn Evaluator>>> = Vec::with_capacity(cases.len());
		for (index, case) in cases.iter().enumerate() {
			if case.assertions.is_empty() {
				return Err(ConfigError::NoAssertions { index }.into());
			}
			evaluators.push(resolve_assertions(&case.assertions, &self.config, self.grader.as_ref())?);
		}

		let prompt = self.config.prompts.join("\n");
		info!(
			providers = providers.len(),
			cases = cases.len(),
			max_concurrent = self.max_concurrent,
			"starting evaluation run"
		);

		let mut provider_results = Vec::with_capacity(providers.len());
		for provider in &providers {
			let test_results = if cases.len() <= 1 || self.verbose {
				self.run_provider_sequential(provider, &cases, &evaluators, &prompt).await
			} else {
				self.run_provider_concurrent(provider, &cases, &evaluators, &prompt).await
			};
			provider_results.push(ProviderResult {
				provider_id: provider.id.clone(),
				test_results,
			});
		}

		Ok(EvaluationResults { provider_results })
	}

	fn effective_providers<'a>(
		&'a self,
		provider_override: Option<&str>,
	) -> Result<Vec<&'a ProviderSpec>, ConfigError> {
		let mut seen = HashSet::new();
		for provider in &self.config.providers {
			if !seen.insert(provider.id.as_str()) {
				return Err(ConfigError::DuplicateProvider(provider.id.clone()));
			}
		}

		match provider_override {
			None => Ok(self.config.providers.iter().collect()),
			Some(id) => {
				let provider = self
					.config
					.providers
					.iter()
					.find(|p| p.id == id)
					.ok_or_else(|| ConfigError::ProviderNotFound(id.to_string()))?;
				Ok(vec![provider])
			}
		}
	}

	async fn run_provider_sequential(
		&self,
		provider: &ProviderSpec,
		cases: &[TestCase],
		evaluators: &[Vec<Arc<dyn Evaluator>>],
		prompt: &str,
	) -> Vec<TestResult> {
		let mut results = Vec::with_capacity(cases.len());
		for (case, evals) in cases.iter().zip(evaluators) {
			results.push(self.run_unit(provider, case, evals, prompt).await);
		}
		results
	}

	/// Bounded fan-out with index-addressed result slots: completion order
	/// never changes output order.
	async fn run_provider_concurrent(
		&self,
		provider: &ProviderSpec,
		cases: &[TestCase],
		evaluators: &[Vec<Arc<dyn Evaluator>>],
		prompt: &str,
	) -> Vec<TestResult> {
		let mut slots: Vec<Option<TestResult>> = cases.iter().map(|_| None).collect();
		let mut units = stream::iter(cases.iter().zip(evaluators).enumerate())
			.map(|(index, (case, evals))| async move {
				(index, self.run_unit(provider, case, evals, prompt).await)
			})
			.buffer_unordered(self.max_concurrent);

		while let Some((index, result)) = units.next().await {
			slots[index] = Some(result);
		}

		slots
			.into_iter()
			.map(|slot| slot.expect("every unit writes its result slot exactly once"))
			.collect()
	}

	/// One fully isolated unit of work. Provider and evaluator failures are
	/// converted into a failed `TestResult` here; they never escape.
	async fn run_unit(
		&self,
		provider: &ProviderSpec,
		case: &TestCase,
		evaluators: &[Arc<dyn Evaluator>],
		prompt: &str,
	) -> TestResult {
		let start = Instant::now();
		let key = generate_cache_key(&provider.model, prompt, &case.vars, &provider.config);

		let output = match self.cache.get(&key) {
			Some(cached) => {
				debug!(provider = %provider.id, "cache hit");
				Ok(match cached {
					Value::String(text) => text,
					other => other.to_string(),
				})
			}
			None => match self.agent.run_test(provider, &case.vars).await {
				Ok(output) => {
					self.cache.set(&key, Value::String(output.clone()), self.config.cache.ttl);
					Ok(output)
				}
				Err(err) => Err(err),
			},
		};

		let output = match output {
			Ok(output) => output,
			Err(err) => {
				let elapsed = start.elapsed().as_millis() as u64;
				return TestResult::failed(case.vars.clone(), err.to_string(), elapsed);
			}
		};

		let mut scores = Vec::with_capacity(evaluators.len());
		let mut error = None;
		for evaluator in evaluators {
			match evaluator.evaluate(&output, case.expected.as_ref()).await {
				Ok(score) => scores.push(score),
				Err(err) => {
					scores.push(0.0);
					if error.is_none() {
						error = Some(format!("{}: {}", evaluator.name(), err));
					}
				}
			}
		}

		// Overall score is the mean; the pass verdict is stricter and
		// requires every assertion to score exactly 1.0.
		let score = if scores.is_empty() {
			0.0
		} else {
			scores.iter().sum::<f64>() / scores.len() as f64
		};
		let passed = !scores.is_empty() && scores.iter().all(|s| *s >= 1.0);

		TestResult {
			variables: case.vars.clone(),
			output: Some(output),
			score,
			passed,
			error,
			duration_ms: start.elapsed().as_millis() as u64,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::agent::from_async_fn;
	use crate::config::AssertionSpec;
	use serde_json::json;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	/// Config with `n` inline cases; case `i` binds `input = test_input_i`
	/// and asserts exact output `output_for_test_input_i`.
	fn echo_config(n: usize) -> EvalConfig {
		let tests: Vec<crate::config::TestSpec> = (0..n)
			.map(|i| crate::config::TestSpec::Inline {
				name: None,
				vars: {
					let mut vars = serde_json::Map::new();
					vars.insert("input".to_string(), json!(format!("test_input_{}", i)));
					vars
				},
				expected: None,
				assertions: vec![AssertionSpec::inline(
					"exact",
					json!(format!("output_for_test_input_{}", i)),
				)],
			})
			.collect();

		EvalConfig {
			description: None,
			prompts: vec!["Process this: {input}".to_string()],
			providers: vec![ProviderSpec {
				id: "test-provider".to_string(),
				model: "test:model".to_string(),
				config: serde_json::Map::new(),
			}],
			tests,
			default_test: None,
			assertion_templates: Default::default(),
			schemas: Default::default(),
			cache: crate::config::CacheSettings {
				enabled: false,
				cache_dir: None,
				ttl: 0,
			},
			max_concurrent: 4,
		}
	}

	/// Echoes `output_for_<input>`, sleeping longer for earlier cases so
	/// completion order inverts submission order.
	fn echo_agent() -> Arc<dyn Agent> {
		from_async_fn(|_provider, vars| async move {
			let input = vars["input"].as_str().unwrap_or_default().to_string();
			let rank: u64 = input
				.rsplit('_')
				.next()
				.and_then(|s| s.parse().ok())
				.unwrap_or(0);
			tokio::time::sleep(Duration::from_millis((5u64.saturating_sub(rank)) * 10)).await;
			Ok(format!("output_for_{}", input))
		})
	}

	fn runner(config: EvalConfig) -> EvaluationRunner {
		EvaluationRunner::builder()
			.config(config)
			.agent(echo_agent())
			.build()
			.unwrap()
	}

	#[tokio::test]
	async fn concurrent_execution_preserves_order() {
		for max_concurrent in [1usize, 5, 10] {
			let runner = EvaluationRunner::builder()
				.config(echo_config(5))
				.agent(echo_agent())
				.max_concurrent(max_concurrent)
				.build()
				.unwrap();

			let results = runner.run(None).await.unwrap();
			assert_eq!(results.provider_results.len(), 1);
			let test_results = &results.provider_results[0].test_results;
			assert_eq!(test_results.len(), 5);

			for (i, tr) in test_results.iter().enumerate() {
				let expected_input = format!("test_input_{}", i);
				assert_eq!(tr.variables["input"], json!(expected_input));
				assert_eq!(tr.output.as_deref(), Some(format!("output_for_{}", expected_input).as_str()));
				assert!(tr.passed, "case {} failed under max_concurrent={}", i, max_concurrent);
				assert_eq!(tr.score, 1.0);
			}
		}
	}

	#[tokio::test]
	async fn verbose_sequential_matches_concurrent_shape() {
		let runner = EvaluationRunner::builder()
			.config(echo_config(3))
			.agent(echo_agent())
			.verbose(true)
			.build()
			.unwrap();

		let results = runner.run(None).await.unwrap();
		let test_results = &results.provider_results[0].test_results;
		assert_eq!(test_results.len(), 3);
		assert!(test_results.iter().all(|tr| tr.passed));
	}

	#[tokio::test]
	async fn failing_units_do_not_affect_siblings() {
		let agent = from_async_fn(|_provider, vars| async move {
			let input = vars["input"].as_str().unwrap_or_default().to_string();
			if input.ends_with('2') || input.ends_with('4') {
				anyhow::bail!("provider exploded for {}", input);
			}
			Ok(format!("output_for_{}", input))
		});
		let runner = EvaluationRunner::builder()
			.config(echo_config(5))
			.agent(agent)
			.max_concurrent(3)
			.build()
			.unwrap();

		let results = runner.run(None).await.unwrap();
		let test_results = &results.provider_results[0].test_results;
		assert_eq!(test_results.len(), 5);

		for (i, tr) in test_results.iter().enumerate() {
			if i == 2 || i == 4 {
				assert!(!tr.passed);
				assert_eq!(tr.score, 0.0);
				assert!(tr.output.is_none());
				let error = tr.error.as_deref().unwrap();
				assert!(error.contains(&format!("test_input_{}", i)));
			} else {
				assert!(tr.passed, "case {} should be unaffected", i);
				assert_eq!(tr.score, 1.0);
				assert!(tr.error.is_none());
			}
		}
	}

	#[tokio::test]
	async fn provider_override_selects_single_provider() {
		let mut config = echo_config(2);
		config.providers.push(ProviderSpec {
			id: "second-provider".to_string(),
			model: "test:model2".to_string(),
			config: serde_json::Map::new(),
		});

		let runner = runner(config);
		let results = runner.run(Some("test-provider")).await.unwrap();
		assert_eq!(results.provider_results.len(), 1);
		assert_eq!(results.provider_results[0].provider_id, "test-provider");
	}

	#[tokio::test]
	async fn unknown_provider_override_is_fatal() {
		let runner = runner(echo_config(2));
		let err = runner.run(Some("missing")).await.unwrap_err();
		let config_err = err.downcast_ref::<ConfigError>().unwrap();
		assert!(matches!(config_err, ConfigError::ProviderNotFound(id) if id == "missing"));
	}

	#[tokio::test]
	async fn duplicate_provider_id_is_fatal() {
		let mut config = echo_config(1);
		config.providers.push(config.providers[0].clone());
		let runner = runner(config);
		let err = runner.run(None).await.unwrap_err();
		assert!(matches!(
			err.downcast_ref::<ConfigError>().unwrap(),
			ConfigError::DuplicateProvider(_)
		));
	}

	#[tokio::test]
	async fn providers_report_in_declaration_order() {
		let mut config = echo_config(2);
		config.providers.push(ProviderSpec {
			id: "second-provider".to_string(),
			model: "test:model2".to_string(),
			config: serde_json::Map::new(),
		});

		let results = runner(config).run(None).await.unwrap();
		let ids: Vec<_> = results
			.provider_results
			.iter()
			.map(|pr| pr.provider_id.as_str())
			.collect();
		assert_eq!(ids, vec!["test-provider", "second-provider"]);
	}

	#[tokio::test]
	async fn case_without_assertions_is_fatal() {
		let mut config = echo_config(1);
		if let crate::config::TestSpec::Inline { assertions, .. } = &mut config.tests[0] {
			assertions.clear();
		}
		let err = runner(config).run(None).await.unwrap_err();
		assert!(matches!(
			err.downcast_ref::<ConfigError>().unwrap(),
			ConfigError::NoAssertions { index: 0 }
		));
	}

	#[tokio::test]
	async fn schema_assertion_end_to_end() {
		let schema = json!({
			"type": "object",
			"properties": {
				"name": {"type": "string"},
				"event_type": {"type": "string"},
				"out_of_office": {"type": "boolean"}
			},
			"required": ["name", "event_type", "out_of_office"]
		});
		let mut config = echo_config(2);
		for (i, test) in config.tests.iter_mut().enumerate() {
			if let crate::config::TestSpec::Inline { assertions, vars, .. } = test {
				*assertions = vec![AssertionSpec::inline("json_schema", schema.clone())];
				vars.insert("case".to_string(), json!(i));
			}
		}

		let agent = from_async_fn(|_provider, vars| async move {
			if vars["case"] == json!(0) {
				Ok(r#"{"name": "John Smith", "event_type": "vacation", "out_of_office": true}"#.to_string())
			} else {
				Ok("Invalid JSON response".to_string())
			}
		});
		let runner = EvaluationRunner::builder()
			.config(config)
			.agent(agent)
			.build()
			.unwrap();

		let results = runner.run(None).await.unwrap();
		let test_results = &results.provider_results[0].test_results;
		assert_eq!(test_results[0].score, 1.0);
		assert!(test_results[0].passed);
		assert_eq!(test_results[1].score, 0.0);
		assert!(!test_results[1].passed);
	}

	#[tokio::test]
	async fn mixed_assertions_mean_score_strict_pass() {
		let mut config = echo_config(1);
		if let crate::config::TestSpec::Inline { assertions, .. } = &mut config.tests[0] {
			*assertions = vec![
				AssertionSpec::inline("exact", json!("output_for_test_input_0")),
				AssertionSpec::inline("json_schema", json!({"type": "object"})),
			];
		}

		let results = runner(config).run(None).await.unwrap();
		let tr = &results.provider_results[0].test_results[0];
		// exact passes, schema fails on plain text: partial credit, no pass
		assert_eq!(tr.score, 0.5);
		assert!(!tr.passed);
	}

	#[tokio::test]
	async fn cache_memoizes_provider_calls() {
		let calls = Arc::new(AtomicUsize::new(0));
		let calls_seen = calls.clone();
		let agent = from_async_fn(move |_provider, vars| {
			let calls = calls_seen.clone();
			async move {
				calls.fetch_add(1, Ordering::SeqCst);
				Ok(format!("output_for_{}", vars["input"].as_str().unwrap_or_default()))
			}
		});

		let dir = tempfile::TempDir::new().unwrap();
		let cache = FileCache::new(dir.path(), true);
		let runner = EvaluationRunner::builder()
			.config(echo_config(3))
			.agent(agent)
			.cache(cache)
			.build()
			.unwrap();

		let first = runner.run(None).await.unwrap();
		assert_eq!(calls.load(Ordering::SeqCst), 3);

		let second = runner.run(None).await.unwrap();
		assert_eq!(calls.load(Ordering::SeqCst), 3, "second run must be served from cache");

		let outputs = |r: &EvaluationResults| -> Vec<Option<String>> {
			r.provider_results[0]
				.test_results
				.iter()
				.map(|tr| tr.output.clone())
				.collect()
		};
		assert_eq!(outputs(&first), outputs(&second));
		assert!(second.provider_results[0].test_results.iter().all(|tr| tr.passed));
	}

	#[tokio::test]
	async fn single_case_runs_sequentially_and_completes() {
		let results = runner(echo_config(1)).run(None).await.unwrap();
		let test_results = &results.provider_results[0].test_results;
		assert_eq!(test_results.len(), 1);
		assert_eq!(test_results[0].output.as_deref(), Some("output_for_test_input_0"));
	}
}
