//! promptcheck-core: evaluate prompts against language-model providers over a
//! matrix of test cases, score the responses, and aggregate ordered results.
//! Compose a config, an agent, and (optionally) a grader; run with concurrency.

pub mod agent;
pub mod cache;
pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluator;
pub mod runner;
pub mod testing;

pub mod evaluators {
    pub mod contains_json;
    pub mod exact;
    pub mod json;
    pub mod rubric;
}

pub use agent::{from_async_fn, Agent};
pub use cache::{generate_cache_key, CacheStats, FileCache};
pub use config::{
    load_config, AssertionSpec, CacheSettings, DefaultTest, EvalConfig, ProviderSpec, TestSpec,
};
pub use dataset::{expand_tests, TestCase};
pub use error::ConfigError;
pub use evaluator::{resolve_assertions, Evaluator, Grader};
pub use runner::{EvaluationRunner, RunnerBuilder};

pub use promptcheck_types::{EvaluationResults, ProviderResult, RunSummary, TestResult};
