//! Stage handlers and their bound forms.
//!
//! A handler is the code of a stage; binding attaches the merged
//! [`StageArgs`] and the tracing span the handler logs under. The three
//! pipeline capabilities are modeled by [`Stage`]:
//!
//! * `Step`: `(log) -> log`
//! * `Transform`: `(data, log) -> (data, log)`
//! * `Load`: a transform that must be bound with a `destination`
//!
//! Extraction is a step whose result also carries a dataset, see
//! [`ExtractHandler`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::Span;

use crate::dataset::Dataset;
use crate::log::LogTable;

use super::args::StageArgs;
use super::types::{ETLError, StageError};

/// What a bound stage knows about itself at run time.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub name: String,
    pub args: StageArgs,
    /// Span the handler logs under; child of the task's span.
    pub span: Span,
}

impl StageContext {
    pub fn new(name: impl Into<String>, args: StageArgs, span: Span) -> Self {
        StageContext {
            name: name.into(),
            args,
            span,
        }
    }
}

#[async_trait]
pub trait ExtractHandler: Send + Sync {
    /// Arguments that must be set when the stage is bound.
    fn required_args(&self) -> &'static [&'static str] {
        &[]
    }

    async fn extract(
        &self,
        ctx: &StageContext,
        log: LogTable,
    ) -> Result<(Dataset, LogTable), StageError>;
}

#[async_trait]
pub trait StepHandler: Send + Sync {
    fn required_args(&self) -> &'static [&'static str] {
        &[]
    }

    async fn run(&self, ctx: &StageContext, log: LogTable) -> Result<LogTable, StageError>;
}

#[async_trait]
pub trait TransformHandler: Send + Sync {
    fn required_args(&self) -> &'static [&'static str] {
        &[]
    }

    async fn transform(
        &self,
        ctx: &StageContext,
        data: Dataset,
        log: LogTable,
    ) -> Result<(Dataset, LogTable), StageError>;
}

#[async_trait]
impl<F> StepHandler for F
where
    F: Fn(&StageContext, LogTable) -> Result<LogTable, StageError> + Send + Sync,
{
    async fn run(&self, ctx: &StageContext, log: LogTable) -> Result<LogTable, StageError> {
        self(ctx, log)
    }
}

#[async_trait]
impl<F> TransformHandler for F
where
    F: Fn(&StageContext, Dataset, LogTable) -> (Dataset, LogTable) + Send + Sync,
{
    async fn transform(
        &self,
        ctx: &StageContext,
        data: Dataset,
        log: LogTable,
    ) -> Result<(Dataset, LogTable), StageError> {
        Ok(self(ctx, data, log))
    }
}

fn check_required(
    ctx: &StageContext,
    required: &[&str],
) -> Result<(), ETLError> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|name| !ctx.args.is_set(name))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ETLError::Configuration(format!(
            "stage '{}' is missing required argument(s): {}",
            ctx.name,
            missing.join(", ")
        )))
    }
}

/// Extract handler bound to its context.
#[derive(Clone)]
pub struct BoundExtract {
    ctx: StageContext,
    handler: Arc<dyn ExtractHandler>,
}

impl BoundExtract {
    pub fn new(handler: Arc<dyn ExtractHandler>, ctx: StageContext) -> Result<Self, ETLError> {
        check_required(&ctx, handler.required_args())?;
        Ok(BoundExtract { ctx, handler })
    }

    pub fn name(&self) -> &str {
        &self.ctx.name
    }

    pub fn span(&self) -> &Span {
        &self.ctx.span
    }

    pub async fn run(&self, log: LogTable) -> Result<(Dataset, LogTable), StageError> {
        self.handler.extract(&self.ctx, log).await
    }
}

/// Step handler bound to its context.
#[derive(Clone)]
pub struct BoundStep {
    ctx: StageContext,
    handler: Arc<dyn StepHandler>,
}

impl BoundStep {
    pub fn new(handler: Arc<dyn StepHandler>, ctx: StageContext) -> Result<Self, ETLError> {
        check_required(&ctx, handler.required_args())?;
        Ok(BoundStep { ctx, handler })
    }

    pub fn name(&self) -> &str {
        &self.ctx.name
    }

    pub fn span(&self) -> &Span {
        &self.ctx.span
    }

    pub async fn run(&self, log: LogTable) -> Result<LogTable, StageError> {
        self.handler.run(&self.ctx, log).await
    }
}

/// Transform handler bound to its context.
#[derive(Clone)]
pub struct BoundTransform {
    ctx: StageContext,
    handler: Arc<dyn TransformHandler>,
}

impl BoundTransform {
    pub fn new(handler: Arc<dyn TransformHandler>, ctx: StageContext) -> Result<Self, ETLError> {
        check_required(&ctx, handler.required_args())?;
        Ok(BoundTransform { ctx, handler })
    }

    pub fn name(&self) -> &str {
        &self.ctx.name
    }

    pub fn span(&self) -> &Span {
        &self.ctx.span
    }

    pub async fn run(
        &self,
        data: Dataset,
        log: LogTable,
    ) -> Result<(Dataset, LogTable), StageError> {
        self.handler.transform(&self.ctx, data, log).await
    }
}

/// A transform that writes the dataset somewhere.
///
/// Cannot be constructed without a non-empty `destination` argument.
#[derive(Clone)]
pub struct Load(BoundTransform);

impl Load {
    pub fn new(handler: Arc<dyn TransformHandler>, ctx: StageContext) -> Result<Self, ETLError> {
        if !ctx.args.is_set("destination") {
            return Err(ETLError::Configuration(format!(
                "No destination provided for Load '{}'",
                ctx.name
            )));
        }
        Ok(Load(BoundTransform::new(handler, ctx)?))
    }

    pub fn name(&self) -> &str {
        self.0.name()
    }

    pub fn span(&self) -> &Span {
        self.0.span()
    }

    pub fn destination(&self) -> &str {
        self.0.ctx.args.destination.as_deref().unwrap_or_default()
    }

    pub async fn run(
        &self,
        data: Dataset,
        log: LogTable,
    ) -> Result<(Dataset, LogTable), StageError> {
        self.0.run(data, log).await
    }
}

/// One entry of a pipeline's step list.
#[derive(Clone)]
pub enum Stage {
    Step(BoundStep),
    Transform(BoundTransform),
    Load(Load),
}

impl Stage {
    pub fn name(&self) -> &str {
        match self {
            Stage::Step(s) => s.name(),
            Stage::Transform(t) => t.name(),
            Stage::Load(l) => l.name(),
        }
    }

    pub fn span(&self) -> &Span {
        match self {
            Stage::Step(s) => s.span(),
            Stage::Transform(t) => t.span(),
            Stage::Load(l) => l.span(),
        }
    }
}
