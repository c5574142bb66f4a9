//! Typed stage arguments and their merge order.
//!
//! Every stage receives one [`StageArgs`] built from three layers, lowest
//! precedence first:
//!
//! 1. the static `args` declared for the stage in the task catalog,
//! 2. the process-wide [`Settings`](crate::settings::Settings),
//! 3. the parameters supplied by the caller of the run.
//!
//! A field set in a higher layer replaces the lower one; unset fields fall
//! through.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::types::ETLError;

/// How a load writes into an existing destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    #[default]
    Replace,
    Append,
}

impl std::fmt::Display for WriteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteMode::Replace => f.write_str("replace"),
            WriteMode::Append => f.write_str("append"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageArgs {
    pub filepath: Option<PathBuf>,
    pub process_dir: Option<PathBuf>,
    pub processed_dir: Option<PathBuf>,
    pub password: Option<String>,
    /// Output column names, in order.
    pub column_mapping: Option<Vec<String>>,
    pub month: Option<u32>,
    pub year: Option<i32>,
    pub destination: Option<String>,
    pub connection_string: Option<String>,
    pub connection_string_env_var: Option<String>,
    pub operation: Option<WriteMode>,
    pub separator: Option<char>,
    pub stored_query: Option<String>,
    pub stored_procedure: Option<String>,
    pub procedure_params: Option<Vec<serde_json::Value>>,
    /// Skip the stage when the log already holds an `error` row.
    pub validate_error: Option<bool>,
    /// Stage-specific keys with no typed field.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

macro_rules! overlay {
    ($lower:ident, $higher:ident, $($field:ident),+ $(,)?) => {
        $( if $higher.$field.is_some() { $lower.$field = $higher.$field; } )+
    };
}

impl StageArgs {
    /// Returns `self` overlaid with every field `higher` sets.
    #[must_use]
    pub fn merge(mut self, higher: StageArgs) -> StageArgs {
        overlay!(
            self,
            higher,
            filepath,
            process_dir,
            processed_dir,
            password,
            column_mapping,
            month,
            year,
            destination,
            connection_string,
            connection_string_env_var,
            operation,
            separator,
            stored_query,
            stored_procedure,
            procedure_params,
            validate_error,
        );
        self.extra.extend(higher.extra);
        self
    }

    /// Checks value ranges of the recognized run parameters.
    pub fn validate(&self) -> Result<(), ETLError> {
        if let Some(month) = self.month {
            if !(1..=12).contains(&month) {
                return Err(ETLError::Configuration(format!(
                    "month must be between 1 and 12, got {}",
                    month
                )));
            }
        }
        if let Some(year) = self.year {
            if !(1900..=2100).contains(&year) {
                return Err(ETLError::Configuration(format!(
                    "year must be between 1900 and 2100, got {}",
                    year
                )));
            }
        }
        Ok(())
    }

    /// True when the named argument has a value.
    pub fn is_set(&self, name: &str) -> bool {
        match name {
            "filepath" => self.filepath.is_some(),
            "process_dir" => self.process_dir.is_some(),
            "processed_dir" => self.processed_dir.is_some(),
            "password" => self.password.is_some(),
            "column_mapping" => self.column_mapping.is_some(),
            "month" => self.month.is_some(),
            "year" => self.year.is_some(),
            "destination" => self.destination.as_deref().is_some_and(|d| !d.is_empty()),
            "connection_string" => self.connection_string.is_some(),
            "connection_string_env_var" => self.connection_string_env_var.is_some(),
            "operation" => self.operation.is_some(),
            "separator" => self.separator.is_some(),
            "stored_query" => self.stored_query.is_some(),
            "stored_procedure" => self.stored_procedure.is_some(),
            "procedure_params" => self.procedure_params.is_some(),
            "validate_error" => self.validate_error.is_some(),
            other => self.extra.get(other).is_some_and(|v| !v.is_null()),
        }
    }

    /// `"{month}/{year}"` provenance stamp; unset parts render as `None`.
    pub fn period(&self) -> String {
        let month = self.month.map_or_else(|| "None".to_string(), |m| m.to_string());
        let year = self.year.map_or_else(|| "None".to_string(), |y| y.to_string());
        format!("{}/{}", month, year)
    }

    pub fn with_month_year(mut self, month: u32, year: i32) -> Self {
        self.month = Some(month);
        self.year = Some(year);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_deserialize_catalog_args_with_extra_keys() {
        let args: StageArgs = serde_json::from_value(json!({
            "destination": "transactions",
            "operation": "append",
            "column_mapping": ["a", "b"],
            "chunk_size": 500
        }))
        .unwrap();

        assert_eq!(args.destination.as_deref(), Some("transactions"));
        assert_eq!(args.operation, Some(WriteMode::Append));
        assert_eq!(args.column_mapping, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(args.extra.get("chunk_size"), Some(&json!(500)));
    }

    #[test]
    fn test_merge_precedence() {
        let task = StageArgs {
            destination: Some("from_task".into()),
            connection_string: Some("sqlite://task".into()),
            month: Some(1),
            ..Default::default()
        };
        let settings = StageArgs {
            connection_string: Some("sqlite://settings".into()),
            ..Default::default()
        };
        let caller = StageArgs {
            month: Some(4),
            year: Some(2025),
            ..Default::default()
        };

        let merged = task.merge(settings).merge(caller);

        assert_eq!(merged.destination.as_deref(), Some("from_task"));
        assert_eq!(merged.connection_string.as_deref(), Some("sqlite://settings"));
        assert_eq!(merged.month, Some(4));
        assert_eq!(merged.period(), "4/2025");
    }

    #[test]
    fn test_validate_ranges() {
        assert!(StageArgs::default().with_month_year(12, 2100).validate().is_ok());
        assert!(StageArgs::default().with_month_year(13, 2025).validate().is_err());
        assert!(StageArgs::default().with_month_year(0, 2025).validate().is_err());
        assert!(StageArgs::default().with_month_year(4, 1899).validate().is_err());
    }

    #[test]
    fn test_empty_destination_is_not_set() {
        let args = StageArgs {
            destination: Some(String::new()),
            ..Default::default()
        };
        assert!(!args.is_set("destination"));
        assert!(!args.is_set("stored_procedure"));
    }
}
