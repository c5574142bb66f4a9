//! Declarative task catalog.
//!
//! ```json
//! [{
//!   "key": "process_transactions",
//!   "name": "Process transactions",
//!   "extract_provider": {"script": "pdf", "method": "extract", "args": {}},
//!   "steps": [{"type": "Transform", "name": "clean", "script": "transactions",
//!              "method": "clean_data", "args": {}}],
//!   "load_provider": {"script": "sql", "method": "save_to_sql",
//!                     "args": {"destination": "transactions"}},
//!   "post_load_provider": {"script": "post_load", "method": "move_processed_files", "args": {}}
//! }]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::args::StageArgs;
use super::types::ETLError;

/// Reference to a registered stage handler plus its static arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRef {
    pub script: String,
    pub method: String,
    #[serde(default)]
    pub args: StageArgs,
}

impl ProviderRef {
    /// Registry identifier, `"<module>::<method>"`.
    ///
    /// Directory prefixes and a source-file extension on `script` are
    /// ignored, so `"etls/steps/post_load.py"` names the `post_load` module.
    pub fn handler_id(&self) -> String {
        let file = self
            .script
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.script);
        let module = file
            .strip_suffix(".py")
            .or_else(|| file.strip_suffix(".rs"))
            .unwrap_or(file);
        format!("{}::{}", module, self.method)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageKind {
    Step,
    Transform,
    Load,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    #[serde(rename = "type")]
    pub kind: StageKind,
    pub name: String,
    #[serde(flatten)]
    pub provider: ProviderRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub key: String,
    pub name: String,
    pub extract_provider: ProviderRef,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
    pub load_provider: ProviderRef,
    #[serde(default)]
    pub post_load_provider: Option<ProviderRef>,
}

/// Every task known to a driver, in file order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskCatalog {
    tasks: Vec<TaskDefinition>,
}

impl TaskCatalog {
    pub fn new(tasks: Vec<TaskDefinition>) -> Self {
        TaskCatalog { tasks }
    }

    /// Reads a catalog file; `.yaml`/`.yml` are parsed as YAML, anything
    /// else as JSON.
    pub fn from_file(path: &Path) -> Result<Self, ETLError> {
        let content = std::fs::read_to_string(path).map_err(|e| ETLError::TaskCatalog {
            path: path.to_path_buf(),
            source: Box::new(e),
        })?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let parsed = if is_yaml {
            Self::from_yaml(&content)
        } else {
            Self::from_json(&content)
        };
        parsed.map_err(|source| ETLError::TaskCatalog {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(content: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_yaml(content: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// First task whose `key` matches.
    pub fn get(&self, key: &str) -> Option<&TaskDefinition> {
        self.tasks.iter().find(|t| t.key == key)
    }

    pub fn tasks(&self) -> &[TaskDefinition] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
