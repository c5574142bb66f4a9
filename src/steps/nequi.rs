//! Nequi statement transactions.
//!
//! Input columns: `operation_date`, `description`, `value`, `balance`.
//! After [`transform_transactions`]: `operation_date`, `balance`, `month`,
//! `concept`, `charges`, `credits`, `bank`, `extra_data`.

use crate::dataset::{Dataset, Value};
use crate::etl::stage::StageContext;
use crate::etl::types::StageError;
use crate::log::{LogIdentifier, LogTable};

use super::cleaning::{guarded, numeric_column, NumericPolicy};

pub const BANK: &str = "Nequi";

/// Each column is cleaned on its own: a failure on one is logged and the
/// others still run. Rows whose amounts do not parse are dropped.
pub fn clean_data(ctx: &StageContext, data: Dataset, log: LogTable) -> (Dataset, LogTable) {
    guarded(ctx, "Nequi transactions", data, log, |data, log| {
        data.set_column("month", Value::text(ctx.args.period()));
        data.normalize_blanks();

        for column in ["value", "balance"] {
            if let Err(e) = numeric_column(data, log, column, &[",", "$"], NumericPolicy::DropRows) {
                log_column_error(ctx, log, format!("Error processing numeric column {}: {}", column, e));
            }
        }

        let as_text = data.to_text("description");
        if let Err(e) = as_text.and(data.to_text("month")) {
            log_column_error(
                ctx,
                log,
                format!("Error converting description and month to text: {}", e),
            );
        }
        Ok(())
    })
}

fn log_column_error(ctx: &StageContext, log: &mut LogTable, message: String) {
    tracing::error!(parent: &ctx.span, "{}", message);
    log.push(LogIdentifier::Error, message);
}

/// Splits the signed `value` into `charges` and `credits`.
pub fn transform_transactions(
    ctx: &StageContext,
    data: Dataset,
    log: LogTable,
) -> (Dataset, LogTable) {
    guarded(ctx, "Nequi transactions", data, log, |data, _log| {
        data.derive_column("concept", "description", Value::clone)?;

        let mut bad = None;
        data.derive_column("charges", "value", |v| match split_amount(v) {
            Ok((charge, _)) => Value::Number(charge),
            Err(e) => {
                bad.get_or_insert(e);
                Value::Null
            }
        })?;
        data.derive_column("credits", "value", |v| match split_amount(v) {
            Ok((_, credit)) => Value::Number(credit),
            Err(e) => {
                bad.get_or_insert(e);
                Value::Null
            }
        })?;
        if let Some(e) = bad {
            return Err(e);
        }

        data.set_column("bank", Value::from(BANK));
        data.set_column("extra_data", Value::text(""));
        data.drop_columns(&["description", "value"])?;
        Ok(())
    })
}

/// `(charge, credit)`: a negative amount is a charge of its absolute value.
fn split_amount(value: &Value) -> Result<(f64, f64), StageError> {
    match value {
        Value::Null => Ok((0.0, 0.0)),
        Value::Number(n) if *n > 0.0 => Ok((0.0, *n)),
        Value::Number(n) => Ok((n.abs(), 0.0)),
        Value::Text(s) => Err(StageError::Message(format!(
            "value '{}' is not numeric",
            s
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::etl::args::StageArgs;
    use pretty_assertions::assert_eq;
    use tracing::Span;

    fn ctx() -> StageContext {
        StageContext::new(
            "nequi",
            StageArgs::default().with_month_year(11, 2024),
            Span::none(),
        )
    }

    fn input() -> Dataset {
        Dataset::from_text_rows(
            ["operation_date", "description", "value", "balance"],
            &[
                vec!["01/11/2024", "Transfer from Ana", "$50,000.00", "$150,000.00"],
                vec!["02/11/2024", "Store purchase", "-$20,000.00", "$130,000.00"],
                vec!["03/11/2024", "Garbled", "n/a", "$130,000.00"],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_clean_data_drops_unparseable_rows() {
        let (data, log) = clean_data(&ctx(), input(), LogTable::new());

        assert_eq!(data.len(), 2);
        assert_eq!(data.value(1, "value").unwrap(), Some(&Value::Number(-20_000.0)));
        assert_eq!(data.value(0, "month").unwrap(), Some(&Value::from("11/2024")));
        assert_eq!(log.count(LogIdentifier::Error), 1);
    }

    #[test]
    fn test_clean_then_transform() {
        let (data, log) = clean_data(&ctx(), input(), LogTable::new());
        let (data, log) = transform_transactions(&ctx(), data, log);

        assert_eq!(
            data.columns(),
            &[
                "operation_date",
                "balance",
                "month",
                "concept",
                "charges",
                "credits",
                "bank",
                "extra_data"
            ]
        );
        assert_eq!(data.value(0, "credits").unwrap(), Some(&Value::Number(50_000.0)));
        assert_eq!(data.value(0, "charges").unwrap(), Some(&Value::Number(0.0)));
        assert_eq!(data.value(1, "charges").unwrap(), Some(&Value::Number(20_000.0)));
        assert_eq!(data.value(1, "concept").unwrap(), Some(&Value::from("Store purchase")));
        assert_eq!(log.count(LogIdentifier::Error), 1);
    }

    #[test]
    fn test_transform_rejects_text_amounts() {
        let data = Dataset::from_text_rows(
            ["description", "value", "balance"],
            &[vec!["x", "12", "1"]],
        )
        .unwrap();

        let (data, log) = transform_transactions(&ctx(), data, LogTable::new());

        assert!(data.is_empty());
        assert_eq!(data.columns(), &["description", "value", "balance"]);
        assert_eq!(log.count(LogIdentifier::Error), 1);
    }
}
