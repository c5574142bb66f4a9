//! Generic statement transactions.
//!
//! Input columns: `Movimiento`, two date columns, `Concepto`, free columns,
//! `Cargos`, `Abonos`, `Saldo`. Adds `month`.

use crate::dataset::{Dataset, Value};
use crate::etl::stage::StageContext;
use crate::log::LogTable;

use super::cleaning::{guarded, numeric_column, NumericPolicy};

pub const KEY_COLUMN: &str = "Movimiento";
pub const NUMERIC_COLUMNS: [&str; 3] = ["Cargos", "Abonos", "Saldo"];

pub fn clean_data(ctx: &StageContext, data: Dataset, log: LogTable) -> (Dataset, LogTable) {
    tracing::info!(parent: &ctx.span, rows = data.len(), "cleaning transactions");
    guarded(ctx, "transactions", data, log, |data, log| {
        data.drop_duplicates(KEY_COLUMN)?;
        data.normalize_blanks();
        for column in NUMERIC_COLUMNS {
            numeric_column(data, log, column, &[",", "$"], NumericPolicy::Coerce)?;
        }
        data.set_column("month", Value::text(ctx.args.period()));
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

    const COLUMNS: [&str; 9] = [
        "Movimiento",
        "Fecha Operacion",
        "Fecha Valor",
        "Concepto",
        "Referencia",
        "Oficina",
        "Cargos",
        "Abonos",
        "Saldo",
    ];

    fn ctx() -> StageContext {
        StageContext::new(
            "clean",
            StageArgs::default().with_month_year(4, 2025),
            Span::none(),
        )
    }

    #[test]
    fn test_clean_data_normalizes_amounts() {
        let data = Dataset::from_text_rows(
            COLUMNS,
            &[
                vec!["1", "01/04", "01/04", "Coffee", "R1", "001", "$4,500.00", "", "1,000,000"],
                vec!["1", "01/04", "01/04", "Coffee", "R1", "001", "$4,500.00", "", "1,000,000"],
                vec!["2", "02/04", "02/04", "Salary", "R2", "001", " ", "2,000,000", "3,000,000"],
            ],
        )
        .unwrap();

        let (data, log) = clean_data(&ctx(), data, LogTable::new());

        assert!(log.is_empty());
        assert_eq!(data.len(), 2);
        assert_eq!(data.value(0, "Cargos").unwrap(), Some(&Value::Number(4500.0)));
        assert_eq!(data.value(1, "Cargos").unwrap(), Some(&Value::Number(0.0)));
        assert_eq!(data.value(1, "Abonos").unwrap(), Some(&Value::Number(2_000_000.0)));
        assert!(data.column("month").unwrap().all(|v| v == &Value::from("4/2025")));
    }

    #[test]
    fn test_clean_data_coerces_malformed_numbers_to_null() {
        let data = Dataset::from_text_rows(
            COLUMNS,
            &[vec!["1", "01/04", "01/04", "Fee", "R1", "001", "abc", "0", "10"]],
        )
        .unwrap();

        let (data, log) = clean_data(&ctx(), data, LogTable::new());

        assert_eq!(data.len(), 1);
        assert_eq!(data.value(0, "Cargos").unwrap(), Some(&Value::Null));
        assert_eq!(log.count(LogIdentifier::Error), 1);
    }

    #[test]
    fn test_clean_data_missing_column_degrades_to_empty() {
        let data = Dataset::from_text_rows(["Concepto"], &[vec!["x"]]).unwrap();

        let (data, log) = clean_data(&ctx(), data, LogTable::new());

        assert!(data.is_empty());
        assert_eq!(data.columns(), &["Concepto"]);
        assert_eq!(log.count(LogIdentifier::Error), 1);
    }
}
