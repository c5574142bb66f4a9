//! Name → handler lookup used to turn catalog entries into stages.
//!
//! Handlers are registered once at startup under `"<module>::<method>"`.
//! Nothing is loaded from the filesystem at run time; a catalog can only
//! select among code linked into the binary.

use std::collections::HashMap;
use std::sync::Arc;

use super::stage::{ExtractHandler, StepHandler, TransformHandler};
use super::types::ETLError;

#[derive(Default, Clone)]
pub struct StageRegistry {
    extracts: HashMap<String, Arc<dyn ExtractHandler>>,
    steps: HashMap<String, Arc<dyn StepHandler>>,
    transforms: HashMap<String, Arc<dyn TransformHandler>>,
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_extract(&mut self, id: impl Into<String>, handler: Arc<dyn ExtractHandler>) -> &mut Self {
        self.extracts.insert(id.into(), handler);
        self
    }

    pub fn register_step(&mut self, id: impl Into<String>, handler: Arc<dyn StepHandler>) -> &mut Self {
        self.steps.insert(id.into(), handler);
        self
    }

    /// Registers a handler usable as both `Transform` and `Load`.
    pub fn register_transform(
        &mut self,
        id: impl Into<String>,
        handler: Arc<dyn TransformHandler>,
    ) -> &mut Self {
        self.transforms.insert(id.into(), handler);
        self
    }

    pub fn extract(&self, id: &str) -> Result<Arc<dyn ExtractHandler>, ETLError> {
        self.extracts
            .get(id)
            .cloned()
            .ok_or_else(|| unresolved("extract", id))
    }

    pub fn step(&self, id: &str) -> Result<Arc<dyn StepHandler>, ETLError> {
        self.steps.get(id).cloned().ok_or_else(|| unresolved("step", id))
    }

    pub fn transform(&self, id: &str) -> Result<Arc<dyn TransformHandler>, ETLError> {
        self.transforms
            .get(id)
            .cloned()
            .ok_or_else(|| unresolved("transform", id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.extracts.contains_key(id) || self.steps.contains_key(id) || self.transforms.contains_key(id)
    }

    /// Registered identifiers, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .extracts
            .keys()
            .chain(self.steps.keys())
            .chain(self.transforms.keys())
            .map(String::as_str)
            .collect();
        ids.sort_unstable();
        ids
    }
}

fn unresolved(kind: &str, id: &str) -> ETLError {
    ETLError::Configuration(format!("no {} handler registered as '{}'", kind, id))
}
