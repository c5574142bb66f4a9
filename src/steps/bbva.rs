//! BBVA statement transactions.
//!
//! Input columns: `movement`, `operation_date`, `value_date`, `concept`,
//! `charges`, `credits`, `balance`.
//! Output columns: `operation_date`, `concept`, `charges`, `credits`,
//! `balance`, `month`, `extra_data`, `bank`.

use crate::dataset::{Dataset, Value};
use crate::etl::stage::StageContext;
use crate::log::LogTable;

use super::cleaning::{guarded, numeric_column, NumericPolicy};

pub const BANK: &str = "BBVA";

pub fn clean_data(ctx: &StageContext, data: Dataset, log: LogTable) -> (Dataset, LogTable) {
    tracing::info!(parent: &ctx.span, rows = data.len(), "cleaning BBVA transactions");
    guarded(ctx, "BBVA transactions", data, log, |data, log| {
        data.set_column("month", Value::text(ctx.args.period()));
        data.drop_duplicates("movement")?;
        data.derive_column("extra_data", "movement", Value::clone)?;
        data.drop_columns(&["movement", "value_date"])?;
        data.set_column("bank", Value::from(BANK));
        data.normalize_blanks();
        for column in ["charges", "credits", "balance"] {
            numeric_column(data, log, column, &[","], NumericPolicy::Coerce)?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::args::StageArgs;
    use crate::log::LogIdentifier;
    use pretty_assertions::assert_eq;
    use tracing::Span;

    fn input() -> Dataset {
        Dataset::from_text_rows(
            [
                "movement",
                "operation_date",
                "value_date",
                "concept",
                "charges",
                "credits",
                "balance",
            ],
            &[
                vec!["M1", "01/04", "02/04", "Grocery", "120,000.50", "", "880,000"],
                vec!["M1", "01/04", "02/04", "Grocery", "120,000.50", "", "880,000"],
                vec!["M2", "03/04", "03/04", "Payroll", "", "3,000,000", "abc"],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_clean_data_reshapes_columns() {
        let ctx = StageContext::new(
            "clean",
            StageArgs::default().with_month_year(4, 2025),
            Span::none(),
        );

        let (data, log) = clean_data(&ctx, input(), LogTable::new());

        assert_eq!(
            data.columns(),
            &[
                "operation_date",
                "concept",
                "charges",
                "credits",
                "balance",
                "month",
                "extra_data",
                "bank"
            ]
        );
        assert_eq!(data.len(), 2);
        assert_eq!(data.value(0, "extra_data").unwrap(), Some(&Value::from("M1")));
        assert_eq!(data.value(0, "charges").unwrap(), Some(&Value::Number(120_000.5)));
        assert_eq!(data.value(1, "charges").unwrap(), Some(&Value::Number(0.0)));
        assert_eq!(data.value(1, "balance").unwrap(), Some(&Value::Null));
        assert_eq!(data.value(1, "month").unwrap(), Some(&Value::from("4/2025")));
        assert_eq!(log.count(LogIdentifier::Error), 1);
    }

    #[test]
    fn test_clean_data_without_period_stamps_none() {
        let ctx = StageContext::new("clean", StageArgs::default(), Span::none());

        let (data, _) = clean_data(&ctx, input(), LogTable::new());

        assert_eq!(data.value(0, "month").unwrap(), Some(&Value::from("None/None")));
    }
}
