//! # statement-etl
//!
//! Declarative ETL pipelines for bank statements, built on Tokio.
//!
//! A task catalog (JSON or YAML) names, for each task, an extract stage, an
//! ordered list of steps, a load and an optional post-load. The
//! [`etl::EtlDriver`] resolves those names against a
//! [`etl::StageRegistry`] and runs the resulting [`etl::Pipeline`],
//! returning a [`log::LogTable`] of what happened.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use statement_etl::etl::{EtlDriver, StageArgs, StageRegistry};
//! use statement_etl::settings::Settings;
//! use statement_etl::steps::{extract::MemoryExtractor, sql::MemoryDatabase};
//! use tokio_util::sync::CancellationToken;
//!
//! let settings = Settings::load(None)?;
//! let registry = StageRegistry::with_builtins(
//!     Arc::new(MemoryExtractor::new()),
//!     Arc::new(MemoryDatabase::new()),
//! );
//! let driver = EtlDriver::new(settings, registry)?;
//! let params = StageArgs::default().with_month_year(4, 2025);
//! let log = driver
//!     .run("process_transactions", params, &CancellationToken::new())
//!     .await?;
//! ```
//!
//! ## Modules
//!
//! - [`etl`] - task catalog, stage binding, pipeline and file processor
//! - [`steps`] - the built-in stage library
//! - [`dataset`] - the tabular value stages pass along
//! - [`log`] - the run log returned to callers

pub mod dataset;
pub mod etl;
pub mod log;
pub mod logging;
pub mod settings;
pub mod steps;
