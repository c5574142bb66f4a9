use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span};

use crate::log::LogTable;
use crate::settings::Settings;

use super::args::StageArgs;
use super::pipeline::Pipeline;
use super::registry::StageRegistry;
use super::stage::{BoundExtract, BoundStep, BoundTransform, Load, Stage, StageContext};
use super::task::{ProviderRef, StageKind, TaskCatalog, TaskDefinition};
use super::types::ETLError;

/// Runs catalog tasks by key.
///
/// The catalog is read once at construction; edit the file and build a new
/// driver to pick up changes.
#[derive(Clone)]
pub struct EtlDriver {
    settings: Arc<Settings>,
    catalog: Arc<TaskCatalog>,
    registry: Arc<StageRegistry>,
}

impl EtlDriver {
    /// Loads the catalog from `settings.tasks_file`.
    pub fn new(settings: Settings, registry: StageRegistry) -> Result<Self, ETLError> {
        let catalog = TaskCatalog::from_file(&settings.tasks_file)?;
        tracing::debug!(
            tasks = catalog.len(),
            file = %settings.tasks_file.display(),
            "task catalog loaded"
        );
        Ok(Self::with_catalog(settings, catalog, registry))
    }

    pub fn with_catalog(settings: Settings, catalog: TaskCatalog, registry: StageRegistry) -> Self {
        EtlDriver {
            settings: Arc::new(settings),
            catalog: Arc::new(catalog),
            registry: Arc::new(registry),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn catalog(&self) -> &TaskCatalog {
        &self.catalog
    }

    /// Runs the task registered under `task_key` and returns its log.
    ///
    /// An unknown key is logged and yields an empty log. Binding problems
    /// (unknown handler, missing required argument, bad month/year) are
    /// returned as [`ETLError::Configuration`] before any stage runs.
    pub async fn run(
        &self,
        task_key: &str,
        params: StageArgs,
        cancel: &CancellationToken,
    ) -> Result<LogTable, ETLError> {
        let Some(task) = self.catalog.get(task_key) else {
            tracing::error!(task = task_key, "no task found with key");
            return Ok(LogTable::new());
        };

        let span = tracing::info_span!("etl", task = %task.key);
        let mut pipeline = self.build_pipeline(task, &params, &span)?;

        async move {
            tracing::info!("Executing {} task", task.name);
            let log = pipeline.run(cancel).await?;
            tracing::info!(rows = log.len(), errors = log.has_errors(), "task finished");
            Ok::<_, ETLError>(log)
        }
        .instrument(span)
        .await
    }

    /// Resolves and binds every stage of `task`.
    pub fn build_pipeline(
        &self,
        task: &TaskDefinition,
        params: &StageArgs,
        parent: &Span,
    ) -> Result<Pipeline, ETLError> {
        let extract = {
            let provider = &task.extract_provider;
            let handler = self.registry.extract(&provider.handler_id())?;
            BoundExtract::new(handler, self.context("extract", provider, params, parent)?)?
        };

        let steps = task
            .steps
            .iter()
            .map(|step| {
                let ctx = self.context(&step.name, &step.provider, params, parent)?;
                let id = step.provider.handler_id();
                Ok(match step.kind {
                    StageKind::Step => Stage::Step(BoundStep::new(self.registry.step(&id)?, ctx)?),
                    StageKind::Transform => {
                        Stage::Transform(BoundTransform::new(self.registry.transform(&id)?, ctx)?)
                    }
                    StageKind::Load => Stage::Load(Load::new(self.registry.transform(&id)?, ctx)?),
                })
            })
            .collect::<Result<Vec<_>, ETLError>>()?;

        let load = {
            let provider = &task.load_provider;
            let handler = self.registry.transform(&provider.handler_id())?;
            Load::new(handler, self.context("load", provider, params, parent)?)?
        };

        let post_load = task
            .post_load_provider
            .as_ref()
            .map(|provider| {
                let handler = self.registry.step(&provider.handler_id())?;
                BoundStep::new(handler, self.context("post_load", provider, params, parent)?)
            })
            .transpose()?;

        let mut builder = Pipeline::builder().extract(extract).steps(steps).load(load);
        if let Some(post_load) = post_load {
            builder = builder.post_load(post_load);
        }
        builder.build()
    }

    /// Merges task args < settings < caller params and opens the stage span.
    fn context(
        &self,
        name: &str,
        provider: &ProviderRef,
        params: &StageArgs,
        parent: &Span,
    ) -> Result<StageContext, ETLError> {
        let args = provider
            .args
            .clone()
            .merge(self.settings.stage_args())
            .merge(params.clone());
        args.validate()?;

        let span = tracing::info_span!(
            parent: parent,
            "stage",
            name = %name,
            handler = %provider.handler_id()
        );
        Ok(StageContext::new(name, args, span))
    }
}
