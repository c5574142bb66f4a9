//! Monthly movement summaries.
//!
//! The source table carries two label/amount pairs per row:
//! `Resumen Movimientos`/`Valor` and `Descripcion`/`Valor1`, plus a running
//! `Nro`. [`transform_data`] folds them into a single pair of columns.

use crate::dataset::{Dataset, Value};
use crate::etl::stage::StageContext;
use crate::log::LogTable;

use super::cleaning::guarded;

pub const SUMMARY_COLUMN: &str = "Resumen Movimientos";
pub const AMOUNT_COLUMN: &str = "Valor";
pub const SECOND_SUMMARY_COLUMN: &str = "Descripcion";
pub const SECOND_AMOUNT_COLUMN: &str = "Valor1";

pub fn clean_data(ctx: &StageContext, data: Dataset, log: LogTable) -> (Dataset, LogTable) {
    tracing::info!(parent: &ctx.span, rows = data.len(), "cleaning movement summary");
    guarded(ctx, "movement summary", data, log, |data, _log| {
        data.drop_duplicates(SUMMARY_COLUMN)?;
        data.normalize_blanks();
        for column in [AMOUNT_COLUMN, SECOND_AMOUNT_COLUMN] {
            data.fill_null(column, 0.0.into())?;
        }
        data.drop_columns(&["Nro"])?;
        for column in [AMOUNT_COLUMN, SECOND_AMOUNT_COLUMN] {
            data.strip(column, &[","])?;
            data.coerce_numeric(column)?;
        }
        Ok(())
    })
}

pub fn transform_data(ctx: &StageContext, data: Dataset, log: LogTable) -> (Dataset, LogTable) {
    guarded(ctx, "movement summary", data, log, |data, _log| {
        let pairs: Vec<(Value, Value)> = data
            .column(SECOND_SUMMARY_COLUMN)?
            .cloned()
            .zip(data.column(SECOND_AMOUNT_COLUMN)?.cloned())
            .collect();

        data.drop_columns(&[SECOND_SUMMARY_COLUMN, SECOND_AMOUNT_COLUMN])?;
        let summary = data.column_index(SUMMARY_COLUMN)?;
        let amount = data.column_index(AMOUNT_COLUMN)?;
        for (label, value) in pairs {
            let mut row = vec![Value::Null; data.width()];
            row[summary] = label;
            row[amount] = value;
            data.push_row(row)?;
        }

        data.set_column("mes", Value::text(ctx.args.period()));
        Ok(())
    })
}
