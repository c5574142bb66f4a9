//! Helpers shared by the bank cleaning transforms.

use crate::dataset::Dataset;
use crate::etl::stage::StageContext;
use crate::etl::types::StageError;
use crate::log::{LogIdentifier, LogTable};

/// What to do with cells that do not parse as numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericPolicy {
    /// Keep the row, the cell becomes null.
    Coerce,
    /// Remove the row.
    DropRows,
}

/// Runs `work` on the dataset; on failure logs an `error` row and returns
/// an empty dataset with the columns the input had.
pub fn guarded<F>(
    ctx: &StageContext,
    what: &str,
    mut data: Dataset,
    mut log: LogTable,
    work: F,
) -> (Dataset, LogTable)
where
    F: FnOnce(&mut Dataset, &mut LogTable) -> Result<(), StageError>,
{
    let original = data.empty_like();
    match work(&mut data, &mut log) {
        Ok(()) => (data, log),
        Err(e) => {
            let message = format!("Error processing {} data: {}", what, e);
            tracing::error!(parent: &ctx.span, "{}", message);
            log.push(LogIdentifier::Error, message);
            (original, log)
        }
    }
}

/// Strips `patterns`, turns nulls into 0 and parses `column` as numbers.
///
/// Unparseable cells are handled per `policy` and reported with one
/// `error` row.
pub fn numeric_column(
    data: &mut Dataset,
    log: &mut LogTable,
    column: &str,
    patterns: &[&str],
    policy: NumericPolicy,
) -> Result<(), StageError> {
    data.strip(column, patterns)?;
    data.fill_null(column, 0.0.into())?;
    let failed = data.coerce_numeric(column)?;
    if failed == 0 {
        return Ok(());
    }
    match policy {
        NumericPolicy::Coerce => log.push(
            LogIdentifier::Error,
            format!(
                "{} value(s) in column '{}' are not numeric and were set to null",
                failed, column
            ),
        ),
        NumericPolicy::DropRows => {
            let dropped = data.retain_by(column, |v| !v.is_null())?;
            log.push(
                LogIdentifier::Error,
                format!(
                    "{} row(s) dropped: column '{}' is not numeric",
                    dropped, column
                ),
            );
        }
    }
    Ok(())
}
