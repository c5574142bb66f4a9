use std::collections::BTreeMap;
use std::sync::Arc;

use derive_builder::Builder;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::log::LogTable;
use crate::settings::Settings;

use super::args::StageArgs;
use super::driver::EtlDriver;
use super::types::ETLError;

pub const PROCESS_BBVA_TRANSACTIONS_ETL: &str = "process_bbva_transactions";
pub const PROCESS_NEQUI_TRANSACTIONS_ETL: &str = "process_nequi_transactions";
pub const PROCESS_RESUME_ETL: &str = "process_resume";

fn default_banks() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([
        ("bbva".to_string(), vec![PROCESS_BBVA_TRANSACTIONS_ETL.to_string()]),
        ("nequi".to_string(), vec![PROCESS_NEQUI_TRANSACTIONS_ETL.to_string()]),
    ])
}

/// Configuration for processing one statement file.
#[derive(Clone, Builder)]
pub struct Config {
    /// Maximum number of tasks running at the same time
    #[builder(default = "4")]
    pub worker_num: usize,

    /// Lower-case bank name -> task keys, run in this order
    #[builder(default = "default_banks()")]
    pub banks: BTreeMap<String, Vec<String>>,
}

impl Config {
    /// Creates a new Config with the default bank table
    pub fn new(worker_num: usize) -> Self {
        Config {
            worker_num,
            banks: default_banks(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(4)
    }
}

impl From<&Settings> for Config {
    fn from(settings: &Settings) -> Self {
        Config::new(settings.worker_num)
    }
}

#[async_trait::async_trait]
pub trait ETLRunner: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, params: StageArgs, cancel: &CancellationToken) -> Result<LogTable, ETLError>;
}

/// Runs one catalog task through a shared driver.
pub struct TaskRunner {
    driver: EtlDriver,
    task_key: String,
}

impl TaskRunner {
    pub fn new(driver: EtlDriver, task_key: impl Into<String>) -> Self {
        TaskRunner {
            driver,
            task_key: task_key.into(),
        }
    }
}

#[async_trait::async_trait]
impl ETLRunner for TaskRunner {
    fn name(&self) -> &str {
        &self.task_key
    }

    async fn run(&self, params: StageArgs, cancel: &CancellationToken) -> Result<LogTable, ETLError> {
        self.driver.run(&self.task_key, params, cancel).await
    }
}

/// Routes a statement to the tasks registered for its bank.
pub struct FileProcessor {
    driver: EtlDriver,
    cfg: Config,
}

impl FileProcessor {
    pub fn new(driver: EtlDriver, cfg: &Config) -> Self {
        FileProcessor {
            driver,
            cfg: cfg.clone(),
        }
    }

    /// A processor limited to the driver's `Settings::worker_num`.
    pub fn from_driver(driver: EtlDriver) -> Self {
        let cfg = Config::from(driver.settings());
        FileProcessor { driver, cfg }
    }

    /// Task keys for `bank_name`, matched trimmed and case-insensitively.
    pub fn tasks_for(&self, bank_name: &str) -> Option<&[String]> {
        self.cfg
            .banks
            .get(&bank_name.trim().to_lowercase())
            .map(Vec::as_slice)
    }

    /// Runs every task of the bank and concatenates their logs in task order.
    ///
    /// An unknown bank yields an empty log.
    pub async fn process_file(
        &self,
        bank_name: &str,
        params: StageArgs,
        cancel: &CancellationToken,
    ) -> Result<LogTable, ETLError> {
        let Some(task_keys) = self.tasks_for(bank_name) else {
            tracing::warn!(bank = bank_name, "no tasks configured for bank");
            return Ok(LogTable::new());
        };

        let runners: Vec<Arc<dyn ETLRunner>> = task_keys
            .iter()
            .map(|key| Arc::new(TaskRunner::new(self.driver.clone(), key.clone())) as Arc<dyn ETLRunner>)
            .collect();

        run_all(&runners, self.cfg.worker_num, params, cancel).await
    }
}

/// Runs `runners` with at most `worker_num` in flight.
///
/// Logs are concatenated in runner order regardless of completion order;
/// the first error is returned after every runner has finished.
pub async fn run_all(
    runners: &[Arc<dyn ETLRunner>],
    worker_num: usize,
    params: StageArgs,
    cancel: &CancellationToken,
) -> Result<LogTable, ETLError> {
    let semaphore = Arc::new(Semaphore::new(worker_num.max(1)));
    let mut handles = Vec::with_capacity(runners.len());

    for runner in runners {
        let runner = Arc::clone(runner);
        let params = params.clone();
        let cancel = cancel.clone();
        let sem = Arc::clone(&semaphore);

        handles.push(tokio::spawn(async move {
            let _permit = sem
                .acquire_owned()
                .await
                .map_err(|e| ETLError::WorkerPool(e.to_string()))?;
            tracing::debug!(task = runner.name(), "runner started");
            runner.run(params, &cancel).await
        }));
    }

    let mut log = LogTable::new();
    let mut first_error = None;
    for joined in futures::future::join_all(handles).await {
        match joined {
            Ok(Ok(task_log)) => log.extend(task_log),
            Ok(Err(e)) => {
                first_error.get_or_insert(e);
            }
            Err(e) => {
                first_error.get_or_insert(ETLError::WorkerPool(e.to_string()));
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(log),
    }
}

#[cfg(test)]
#[path = "manager_test.rs"]
mod tests;
