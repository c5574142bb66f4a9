//! The built-in stage library.
//!
//! Identifiers follow `"<module>::<function>"`; those are the names task
//! catalogs refer to.

use std::sync::Arc;

use crate::etl::registry::StageRegistry;

pub mod bbva;
pub mod cleaning;
pub mod extract;
pub mod nequi;
pub mod post_load;
pub mod resume;
pub mod sql;
pub mod transactions;

use extract::{CsvExtract, PdfExtract, TableExtractor};
use sql::{SaveToSql, SqlConnector, StoredProcedure, StoredQuery};

impl StageRegistry {
    /// A registry holding every built-in stage, wired to the given
    /// collaborators.
    pub fn with_builtins(
        extractor: Arc<dyn TableExtractor>,
        connector: Arc<dyn SqlConnector>,
    ) -> Self {
        let mut registry = StageRegistry::new();
        registry
            .register_extract("pdf::extract", Arc::new(PdfExtract::new(extractor)))
            .register_extract("csv::extract", Arc::new(CsvExtract))
            .register_transform("transactions::clean_data", Arc::new(transactions::clean_data))
            .register_transform("bbva::clean_data", Arc::new(bbva::clean_data))
            .register_transform("nequi::clean_data", Arc::new(nequi::clean_data))
            .register_transform(
                "nequi::transform_transactions",
                Arc::new(nequi::transform_transactions),
            )
            .register_transform("resume::clean_data", Arc::new(resume::clean_data))
            .register_transform("resume::transform_data", Arc::new(resume::transform_data))
            .register_transform("sql::save_to_sql", Arc::new(SaveToSql::new(connector.clone())))
            .register_step(
                "sql::execute_stored_procedure",
                Arc::new(StoredProcedure::new(connector.clone())),
            )
            .register_step("sql::execute_stored_query", Arc::new(StoredQuery::new(connector)))
            .register_step(
                "post_load::move_processed_files",
                Arc::new(post_load::move_processed_files),
            )
            .register_step(
                "post_load::remove_processed_files",
                Arc::new(post_load::remove_processed_files),
            );
        registry
    }
}
