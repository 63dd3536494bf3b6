use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::config::ProviderSpec;

/// External language-model collaborator: given a provider descriptor and a
/// flat variable-binding map, produce the model's textual output. Failures
/// surface as provider errors and are recorded per unit by the runner.
#[async_trait]
pub trait Agent: Send + Sync {
	async fn run_test(&self, provider: &ProviderSpec, variables: &Map<String, Value>) -> Result<String>;
}

/// Wrap an async closure as an `Agent`.
pub fn from_async_fn<F, Fut>(f: F) -> Arc<dyn Agent>
where
	F: Send + Sync + 'static + Fn(ProviderSpec, Map<String, Value>) -> Fut,
	Fut: Future<Output = Result<String>> + Send + 'static,
{
	struct ClosureAgent<F, Fut>
	where
		F: Send + Sync + 'static + Fn(ProviderSpec, Map<String, Value>) -> Fut,
		Fut: Future<Output = Result<String>> + Send + 'static,
	{
		f: F,
	}

	#[async_trait]
	impl<F, Fut> Agent for ClosureAgent<F, Fut>
	where
		F: Send + Sync + 'static + Fn(ProviderSpec, Map<String, Value>) -> Fut,
		Fut: Future<Output = Result<String>> + Send + 'static,
	{
		async fn run_test(&self, provider: &ProviderSpec, variables: &Map<String, Value>) -> Result<String> {
			(self.f)(provider.clone(), variables.clone()).await
		}
	}

	Arc::new(ClosureAgent { f })
}
