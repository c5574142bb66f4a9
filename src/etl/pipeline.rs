use derive_builder::Builder;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::dataset::Dataset;
use crate::log::{LogIdentifier, LogTable};

use super::stage::{BoundExtract, BoundStep, Load, Stage};
use super::types::{ETLError, StageError};

pub const EMPTY_EXTRACTION_MESSAGE: &str = "!!WARNING!! data extracted is empty";

/// Where a [`Pipeline`] is in its run.
///
/// `Created -> Extracted -> Step(i)* -> Loaded -> PostLoaded -> Done`, with
/// `Extracted -> Done` when extraction yields no rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Created,
    Extracted,
    /// The step at this index has finished.
    Step(usize),
    Loaded,
    PostLoaded,
    Done,
}

/// Extract, steps, load and post-load run strictly in sequence.
///
/// # Lifecycle
///
/// 1. `source` is used as is when set, otherwise `extract` runs
/// 2. an empty dataset ends the run with one `error` row
/// 3. `steps` run in declared order
/// 4. `load` receives the final dataset; only its log is kept
/// 5. `post_load` receives the log
///
/// Only the log is returned; the dataset never leaves the pipeline.
#[derive(Builder)]
#[builder(pattern = "owned", build_fn(error = "ETLError", validate = "Self::validate"))]
pub struct Pipeline {
    /// Materialized data that replaces extraction.
    #[builder(default, setter(strip_option))]
    source: Option<Dataset>,

    #[builder(default, setter(strip_option))]
    extract: Option<BoundExtract>,

    #[builder(default)]
    steps: Vec<Stage>,

    #[builder(default, setter(strip_option))]
    load: Option<Load>,

    #[builder(default, setter(strip_option))]
    post_load: Option<BoundStep>,

    #[builder(setter(skip))]
    log: LogTable,

    #[builder(setter(skip))]
    state: PipelineState,
}

impl From<derive_builder::UninitializedFieldError> for ETLError {
    fn from(e: derive_builder::UninitializedFieldError) -> Self {
        ETLError::BuildError(e.to_string())
    }
}

impl PipelineBuilder {
    fn validate(&self) -> Result<(), ETLError> {
        let has_source = matches!(self.source, Some(Some(_)));
        let has_extract = matches!(self.extract, Some(Some(_)));
        if !has_source && !has_extract {
            return Err(ETLError::Configuration(
                "pipeline needs either a source dataset or an extract stage".to_string(),
            ));
        }
        Ok(())
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn log(&self) -> &LogTable {
        &self.log
    }

    /// Runs the pipeline to completion and returns its log.
    ///
    /// A stage that fails, or a cancellation observed between stages, ends
    /// the run early with an `error` row; the log is still returned.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<LogTable, ETLError> {
        let data = match self.source.take() {
            Some(data) => data,
            None => {
                let Some(extract) = self.extract.clone() else {
                    return Err(ETLError::Configuration(
                        "no source dataset and no extract stage".to_string(),
                    ));
                };
                if self.cancelled(cancel, extract.name()) {
                    return Ok(self.finish());
                }
                let snapshot = self.log.clone();
                match extract
                    .run(std::mem::take(&mut self.log))
                    .instrument(extract.span().clone())
                    .await
                {
                    Ok((data, log)) => {
                        self.log = log;
                        data
                    }
                    Err(e) => {
                        self.fail(snapshot, extract.name(), e);
                        return Ok(self.finish());
                    }
                }
            }
        };
        self.state = PipelineState::Extracted;

        if data.is_empty() {
            tracing::warn!("extraction returned no rows, stopping run");
            self.log.push(LogIdentifier::Error, EMPTY_EXTRACTION_MESSAGE);
            return Ok(self.finish());
        }

        let Some(data) = self.run_steps(data, cancel).await else {
            return Ok(self.finish());
        };

        if let Some(load) = self.load.clone() {
            if self.cancelled(cancel, load.name()) {
                return Ok(self.finish());
            }
            let snapshot = self.log.clone();
            match load
                .run(data, std::mem::take(&mut self.log))
                .instrument(load.span().clone())
                .await
            {
                Ok((_, log)) => self.log = log,
                Err(e) => {
                    self.fail(snapshot, load.name(), e);
                    return Ok(self.finish());
                }
            }
        }
        self.state = PipelineState::Loaded;

        if let Some(post_load) = self.post_load.clone() {
            if self.cancelled(cancel, post_load.name()) {
                return Ok(self.finish());
            }
            let snapshot = self.log.clone();
            match post_load
                .run(std::mem::take(&mut self.log))
                .instrument(post_load.span().clone())
                .await
            {
                Ok(log) => self.log = log,
                Err(e) => {
                    self.fail(snapshot, post_load.name(), e);
                    return Ok(self.finish());
                }
            }
        }
        self.state = PipelineState::PostLoaded;

        Ok(self.finish())
    }

    /// Returns `None` when a step failed or the run was cancelled.
    async fn run_steps(&mut self, mut data: Dataset, cancel: &CancellationToken) -> Option<Dataset> {
        let steps = self.steps.clone();
        for (i, stage) in steps.iter().enumerate() {
            if self.cancelled(cancel, stage.name()) {
                return None;
            }
            let snapshot = self.log.clone();
            let log = std::mem::take(&mut self.log);
            let span = stage.span().clone();

            let result = match stage {
                // a load inside the step list only contributes its log
                Stage::Load(load) => load
                    .run(data.clone(), log)
                    .instrument(span)
                    .await
                    .map(|(_, log)| log),
                Stage::Transform(transform) => transform
                    .run(std::mem::take(&mut data), log)
                    .instrument(span)
                    .await
                    .map(|(next, log)| {
                        data = next;
                        log
                    }),
                Stage::Step(step) => step.run(log).instrument(span).await,
            };

            match result {
                Ok(log) => self.log = log,
                Err(e) => {
                    self.fail(snapshot, stage.name(), e);
                    return None;
                }
            }
            self.state = PipelineState::Step(i);
        }
        Some(data)
    }

    fn cancelled(&mut self, cancel: &CancellationToken, next: &str) -> bool {
        if cancel.is_cancelled() {
            tracing::warn!(stage = next, "run cancelled");
            self.log
                .push(LogIdentifier::Error, format!("run cancelled before stage '{}'", next));
            return true;
        }
        false
    }

    /// Rows the failing stage appended are dropped; one `error` row replaces them.
    fn fail(&mut self, snapshot: LogTable, stage: &str, error: StageError) {
        tracing::error!(stage, error = %error, "stage failed");
        self.log = snapshot.append(
            LogIdentifier::Error,
            format!("stage '{}' failed: {}", stage, error),
        );
    }

    fn finish(&mut self) -> LogTable {
        self.state = PipelineState::Done;
        self.log.clone()
    }
}
