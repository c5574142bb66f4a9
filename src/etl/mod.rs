pub mod args;
pub mod driver;
pub mod manager;
pub mod pipeline;
pub mod registry;
pub mod stage;
pub mod task;
pub mod types;

pub use args::{StageArgs, WriteMode};
pub use driver::EtlDriver;
pub use manager::{Config, FileProcessor};
pub use pipeline::{Pipeline, PipelineState};
pub use registry::StageRegistry;
pub use stage::{Stage, StageContext};
pub use task::{TaskCatalog, TaskDefinition};
pub use types::{ETLError, StageError};
