use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Full run specification. Built once per run and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    #[serde(default)]
    pub description: Option<String>,
    /// Prompt content in declaration order. Loading and templating happen
    /// upstream; the engine only digests this for cache keys.
    #[serde(default)]
    pub prompts: Vec<String>,
    pub providers: Vec<ProviderSpec>,
    #[serde(default)]
    pub tests: Vec<TestSpec>,
    /// Fallback assertion set for test cases that declare none.
    #[serde(default)]
    pub default_test: Option<DefaultTest>,
    /// Named assertion templates, addressed as `#/assertion_templates/<name>`.
    #[serde(default, alias = "assertionTemplates")]
    pub assertion_templates: HashMap<String, AssertionSpec>,
    /// Named JSON-Schema documents, addressed as `#/schemas/<name>` or `#/<name>`.
    #[serde(default)]
    pub schemas: HashMap<String, Value>,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

fn default_max_concurrent() -> usize {
    4
}

/// A named language-model endpoint. Identity is the `id`; two providers with
/// the same id are a configuration error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub id: String,
    pub model: String,
    /// Sampling parameters and other provider options, passed through opaquely.
    #[serde(default)]
    pub config: Map<String, Value>,
}

/// One entry of the `tests` list: either a reference to an external JSONL
/// dataset or an inline test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TestSpec {
    File {
        file: String,
    },
    Inline {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        vars: Map<String, Value>,
        #[serde(default)]
        expected: Option<Value>,
        #[serde(default, rename = "assert")]
        assertions: Vec<AssertionSpec>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultTest {
    #[serde(default, rename = "assert")]
    pub assertions: Vec<AssertionSpec>,
}

/// Declarative assertion: a type tag plus either an inline value or a
/// reference into the template table. Resolution into an executable evaluator
/// happens before the first provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
}

impl AssertionSpec {
    pub fn inline(kind: impl Into<String>, value: Value) -> Self {
        Self {
            kind: kind.into(),
            value: Some(value),
            reference: None,
        }
    }

    pub fn reference(kind: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: None,
            reference: Some(path.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Seconds until a cached entry expires; 0 means never.
    #[serde(default)]
    pub ttl: u64,
}

fn default_true() -> bool {
    true
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_dir: None,
            ttl: 0,
        }
    }
}

/// Load and parse a YAML evaluation config.
pub fn load_config(path: impl AsRef<Path>) -> Result<EvalConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
