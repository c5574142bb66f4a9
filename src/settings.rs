//! Process-wide settings, shared read-only by every run.

use std::path::{Path, PathBuf};

use derive_builder::Builder;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::etl::args::StageArgs;
use crate::etl::types::ETLError;

/// Environment variable prefix, e.g. `STATEMENT_ETL_TASKS_FILE`.
pub const ENV_PREFIX: &str = "STATEMENT_ETL_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(setter(into), default)]
#[serde(default)]
pub struct Settings {
    /// Task catalog file (JSON or YAML).
    pub tasks_file: PathBuf,

    /// Directory scanned for input files when no `filepath` is given.
    #[builder(setter(into, strip_option))]
    pub process_dir: Option<PathBuf>,

    /// Where post-load moves processed inputs.
    #[builder(setter(into, strip_option))]
    pub processed_dir: Option<PathBuf>,

    #[builder(setter(into, strip_option))]
    pub connection_string: Option<String>,

    /// Name of an environment variable holding the connection string.
    #[builder(setter(into, strip_option))]
    pub connection_string_env_var: Option<String>,

    pub log_dir: PathBuf,

    /// `EnvFilter` directive for the console layer.
    pub log_level: String,

    /// Maximum number of tasks a file processor runs at once; see
    /// [`FileProcessor::from_driver`](crate::etl::manager::FileProcessor::from_driver).
    pub worker_num: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            tasks_file: PathBuf::from("tasks.json"),
            process_dir: None,
            processed_dir: None,
            connection_string: None,
            connection_string_env_var: None,
            log_dir: PathBuf::from("logs"),
            log_level: "info".to_string(),
            worker_num: num_cpus::get(),
        }
    }
}

impl Settings {
    /// Defaults, then the TOML file if given, then `STATEMENT_ETL_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ETLError> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(|e| ETLError::Settings(Box::new(e)))
    }

    /// The settings layer of a stage's arguments.
    pub fn stage_args(&self) -> StageArgs {
        StageArgs {
            process_dir: self.process_dir.clone(),
            processed_dir: self.processed_dir.clone(),
            connection_string: self.connection_string.clone(),
            connection_string_env_var: self.connection_string_env_var.clone(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builder_defaults() {
        let settings = SettingsBuilder::default()
            .tasks_file("catalog.yaml")
            .processed_dir("/data/processed")
            .worker_num(2usize)
            .build()
            .unwrap();

        assert_eq!(settings.tasks_file, PathBuf::from("catalog.yaml"));
        assert_eq!(settings.processed_dir, Some(PathBuf::from("/data/processed")));
        assert_eq!(settings.worker_num, 2);
        assert_eq!(settings.log_level, "info");
        assert!(settings.process_dir.is_none());
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "tasks_file = \"etl/tasks.json\"\nconnection_string = \"mysql://etl@db/statements\"\nworker_num = 3"
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();

        assert_eq!(settings.tasks_file, PathBuf::from("etl/tasks.json"));
        assert_eq!(settings.worker_num, 3);
        assert_eq!(
            settings.stage_args().connection_string.as_deref(),
            Some("mysql://etl@db/statements")
        );
    }
}
