//! SQL persistence stages.
//!
//! The database itself sits behind [`SqlConnector`]; dialects and drivers
//! are the connector's business. Every stage here opens its own connection
//! and closes it before returning, whether or not its work succeeded.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::dataset::Dataset;
use crate::etl::args::{StageArgs, WriteMode};
use crate::etl::stage::{StageContext, StepHandler, TransformHandler};
use crate::etl::types::StageError;
use crate::log::{LogIdentifier, LogTable};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SqlError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("connection already closed")]
    Closed,
}

#[async_trait]
pub trait SqlConnector: Send + Sync {
    async fn connect(&self, connection_string: &str) -> Result<Box<dyn SqlConnection>, SqlError>;
}

#[async_trait]
pub trait SqlConnection: Send {
    /// Writes `data` into `destination`; returns the number of rows written.
    async fn write_table(
        &mut self,
        data: &Dataset,
        destination: &str,
        mode: WriteMode,
    ) -> Result<usize, SqlError>;

    async fn execute(&mut self, statement: &str) -> Result<(), SqlError>;

    /// Calls a stored procedure that reports `(identifier, message)` rows.
    async fn call_procedure(
        &mut self,
        name: &str,
        params: &[serde_json::Value],
    ) -> Result<Vec<(String, String)>, SqlError>;

    async fn commit(&mut self) -> Result<(), SqlError>;

    async fn close(&mut self) -> Result<(), SqlError>;
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<String, Dataset>,
    procedures: HashMap<String, Vec<(String, String)>>,
    failing: HashSet<String>,
    executed: Vec<String>,
    opened: usize,
    closed: usize,
}

/// In-process database for dry runs and tests.
///
/// Cloning shares the underlying state.
#[derive(Default, Clone)]
pub struct MemoryDatabase {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the rows `name` returns when called.
    pub async fn add_procedure(&self, name: &str, rows: Vec<(&str, &str)>) {
        let rows = rows
            .into_iter()
            .map(|(i, m)| (i.to_string(), m.to_string()))
            .collect();
        self.state.lock().await.procedures.insert(name.to_string(), rows);
    }

    /// Makes statements, procedures or destination tables named `name` fail.
    pub async fn fail_on(&self, name: &str) {
        self.state.lock().await.failing.insert(name.to_string());
    }

    pub async fn table(&self, name: &str) -> Option<Dataset> {
        self.state.lock().await.tables.get(name).cloned()
    }

    pub async fn executed(&self) -> Vec<String> {
        self.state.lock().await.executed.clone()
    }

    /// `(opened, closed)` connection counts.
    pub async fn connection_counts(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        (state.opened, state.closed)
    }
}

#[async_trait]
impl SqlConnector for MemoryDatabase {
    async fn connect(&self, connection_string: &str) -> Result<Box<dyn SqlConnection>, SqlError> {
        let mut state = self.state.lock().await;
        if state.failing.contains(connection_string) {
            return Err(SqlError::Connection(format!("cannot reach {}", connection_string)));
        }
        state.opened += 1;
        Ok(Box::new(MemoryConnection {
            state: Arc::clone(&self.state),
            open: true,
        }))
    }
}

struct MemoryConnection {
    state: Arc<Mutex<MemoryState>>,
    open: bool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<(), SqlError> {
        if self.open {
            Ok(())
        } else {
            Err(SqlError::Closed)
        }
    }
}

#[async_trait]
impl SqlConnection for MemoryConnection {
    async fn write_table(
        &mut self,
        data: &Dataset,
        destination: &str,
        mode: WriteMode,
    ) -> Result<usize, SqlError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        if state.failing.contains(destination) {
            return Err(SqlError::Query(format!("cannot write table {}", destination)));
        }
        if mode == WriteMode::Append {
            if let Some(existing) = state.tables.get_mut(destination) {
                existing
                    .append(data.clone())
                    .map_err(|e| SqlError::Query(e.to_string()))?;
                return Ok(data.len());
            }
        }
        state.tables.insert(destination.to_string(), data.clone());
        Ok(data.len())
    }

    async fn execute(&mut self, statement: &str) -> Result<(), SqlError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        if state.failing.contains(statement) {
            return Err(SqlError::Query(format!("statement failed: {}", statement)));
        }
        state.executed.push(statement.to_string());
        Ok(())
    }

    async fn call_procedure(
        &mut self,
        name: &str,
        params: &[serde_json::Value],
    ) -> Result<Vec<(String, String)>, SqlError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        if state.failing.contains(name) {
            return Err(SqlError::Query(format!("procedure {} failed", name)));
        }
        let rows = state
            .procedures
            .get(name)
            .cloned()
            .ok_or_else(|| SqlError::Query(format!("procedure {} does not exist", name)))?;
        let rendered: Vec<String> = params.iter().map(|p| p.to_string()).collect();
        state
            .executed
            .push(format!("CALL {}({})", name, rendered.join(", ")));
        Ok(rows)
    }

    async fn commit(&mut self) -> Result<(), SqlError> {
        self.ensure_open()
    }

    async fn close(&mut self) -> Result<(), SqlError> {
        self.ensure_open()?;
        self.open = false;
        self.state.lock().await.closed += 1;
        Ok(())
    }
}

/// Closes `conn`, recording a failure as an `error` row.
async fn close_connection(conn: &mut dyn SqlConnection, ctx: &StageContext, log: &mut LogTable) {
    if let Err(e) = conn.close().await {
        let message = format!("Error closing connection: {}", e);
        tracing::error!(parent: &ctx.span, "{}", message);
        log.push(LogIdentifier::Error, message);
    }
}

fn record_error(ctx: &StageContext, log: &mut LogTable, message: String) {
    tracing::error!(parent: &ctx.span, "{}", message);
    log.push(LogIdentifier::Error, message);
}

/// Connection string from the variable named by `connection_string_env_var`,
/// falling back to `connection_string`.
fn resolve_connection_string(args: &StageArgs) -> Result<String, String> {
    if let Some(var) = args.connection_string_env_var.as_deref() {
        return match std::env::var(var) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => Err(format!("Environment variable '{}' not set.", var)),
        };
    }
    args.connection_string.clone().ok_or_else(|| {
        "Either 'connection_string_env_var' or 'connection_string' argument is required.".to_string()
    })
}

/// Writes the dataset to the `destination` table.
pub struct SaveToSql {
    connector: Arc<dyn SqlConnector>,
}

impl SaveToSql {
    pub fn new(connector: Arc<dyn SqlConnector>) -> Self {
        SaveToSql { connector }
    }
}

#[async_trait]
impl TransformHandler for SaveToSql {
    fn required_args(&self) -> &'static [&'static str] {
        &["destination"]
    }

    async fn transform(
        &self,
        ctx: &StageContext,
        data: Dataset,
        mut log: LogTable,
    ) -> Result<(Dataset, LogTable), StageError> {
        let Some(destination) = ctx.args.destination.as_deref() else {
            record_error(ctx, &mut log, "The 'destination' argument is required.".to_string());
            return Ok((data, log));
        };
        let connection_string = match resolve_connection_string(&ctx.args) {
            Ok(cs) => cs,
            Err(message) => {
                record_error(ctx, &mut log, message);
                return Ok((data, log));
            }
        };
        let mode = ctx.args.operation.unwrap_or_default();

        let mut conn = match self.connector.connect(&connection_string).await {
            Ok(conn) => conn,
            Err(e) => {
                record_error(ctx, &mut log, format!("Error saving to SQL: {}", e));
                return Ok((data, log));
            }
        };

        tracing::info!(parent: &ctx.span, "Saving {} rows to {}", data.len(), destination);
        let written = match conn.write_table(&data, destination, mode).await {
            Ok(n) => conn.commit().await.map(|_| n),
            Err(e) => Err(e),
        };
        match written {
            Ok(n) => log.push(
                LogIdentifier::Success,
                format!("Saved {} rows to {}", n, destination),
            ),
            Err(e) => record_error(ctx, &mut log, format!("Error saving to SQL: {}", e)),
        }
        close_connection(conn.as_mut(), ctx, &mut log).await;

        Ok((data, log))
    }
}

/// Calls `stored_procedure` with `procedure_params`; the rows it returns
/// are appended to the log.
pub struct StoredProcedure {
    connector: Arc<dyn SqlConnector>,
}

impl StoredProcedure {
    pub fn new(connector: Arc<dyn SqlConnector>) -> Self {
        StoredProcedure { connector }
    }
}

#[async_trait]
impl StepHandler for StoredProcedure {
    fn required_args(&self) -> &'static [&'static str] {
        &["stored_procedure"]
    }

    async fn run(&self, ctx: &StageContext, mut log: LogTable) -> Result<LogTable, StageError> {
        if ctx.args.validate_error.unwrap_or(false) && log.has_errors() {
            tracing::error!(parent: &ctx.span, "Error in previous step.");
            return Ok(log);
        }
        let Some(procedure) = ctx.args.stored_procedure.as_deref() else {
            return Err(StageError::Message("'stored_procedure' is required".to_string()));
        };
        let connection_string = match resolve_connection_string(&ctx.args) {
            Ok(cs) => cs,
            Err(message) => {
                record_error(ctx, &mut log, message);
                return Ok(log);
            }
        };
        let params = ctx.args.procedure_params.clone().unwrap_or_default();

        let mut conn = match self.connector.connect(&connection_string).await {
            Ok(conn) => conn,
            Err(e) => {
                record_error(ctx, &mut log, format!("Error executing stored procedure: {}", e));
                return Ok(log);
            }
        };

        let outcome = match conn.call_procedure(procedure, &params).await {
            Ok(rows) => conn.commit().await.map(|_| rows),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(rows) => {
                for (identifier, message) in rows {
                    match identifier.parse::<LogIdentifier>() {
                        Ok(identifier) => log.push(identifier, message),
                        Err(e) => log.push(LogIdentifier::Warning, format!("{}: {}", e, message)),
                    }
                }
                tracing::info!(parent: &ctx.span, "Executed stored procedure {}", procedure);
            }
            Err(e) => record_error(ctx, &mut log, format!("Error executing stored procedure: {}", e)),
        }
        close_connection(conn.as_mut(), ctx, &mut log).await;

        Ok(log)
    }
}

/// Executes the single statement in `stored_query`.
pub struct StoredQuery {
    connector: Arc<dyn SqlConnector>,
}

impl StoredQuery {
    pub fn new(connector: Arc<dyn SqlConnector>) -> Self {
        StoredQuery { connector }
    }
}

#[async_trait]
impl StepHandler for StoredQuery {
    fn required_args(&self) -> &'static [&'static str] {
        &["stored_query"]
    }

    async fn run(&self, ctx: &StageContext, mut log: LogTable) -> Result<LogTable, StageError> {
        let Some(query) = ctx.args.stored_query.as_deref() else {
            return Err(StageError::Message("'stored_query' is required".to_string()));
        };
        let connection_string = match resolve_connection_string(&ctx.args) {
            Ok(cs) => cs,
            Err(message) => {
                record_error(ctx, &mut log, message);
                return Ok(log);
            }
        };

        let mut conn = match self.connector.connect(&connection_string).await {
            Ok(conn) => conn,
            Err(e) => {
                record_error(ctx, &mut log, format!("Error executing stored query: {}", e));
                return Ok(log);
            }
        };

        let outcome = match conn.execute(query).await {
            Ok(()) => conn.commit().await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => tracing::info!(parent: &ctx.span, "Executed stored query {}", query),
            Err(e) => record_error(ctx, &mut log, format!("Error executing stored query: {}", e)),
        }
        close_connection(conn.as_mut(), ctx, &mut log).await;

        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tracing::Span;

    fn ctx(args: StageArgs) -> StageContext {
        StageContext::new("sql", args, Span::none())
    }

    fn data() -> Dataset {
        Dataset::from_text_rows(["concept"], &[vec!["Coffee"], vec!["Rent"]]).unwrap()
    }

    #[tokio::test]
    async fn test_save_to_sql_writes_and_closes() {
        let db = MemoryDatabase::new();
        let args = StageArgs {
            destination: Some("transactions".into()),
            connection_string: Some("memory://".into()),
            ..Default::default()
        };

        let (_, log) = SaveToSql::new(Arc::new(db.clone()))
            .transform(&ctx(args), data(), LogTable::new())
            .await
            .unwrap();

        assert_eq!(log.messages(LogIdentifier::Success), vec!["Saved 2 rows to transactions"]);
        assert_eq!(db.table("transactions").await.unwrap().len(), 2);
        assert_eq!(db.connection_counts().await, (1, 1));
    }

    #[tokio::test]
    async fn test_save_to_sql_append_mode() {
        let db = MemoryDatabase::new();
        let handler = SaveToSql::new(Arc::new(db.clone()));
        let args = StageArgs {
            destination: Some("transactions".into()),
            connection_string: Some("memory://".into()),
            operation: Some(WriteMode::Append),
            ..Default::default()
        };

        for _ in 0..2 {
            handler
                .transform(&ctx(args.clone()), data(), LogTable::new())
                .await
                .unwrap();
        }

        assert_eq!(db.table("transactions").await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_save_to_sql_failure_is_logged_and_connection_closed() {
        let db = MemoryDatabase::new();
        db.fail_on("transactions").await;
        let args = StageArgs {
            destination: Some("transactions".into()),
            connection_string: Some("memory://".into()),
            ..Default::default()
        };

        let (_, log) = SaveToSql::new(Arc::new(db.clone()))
            .transform(&ctx(args), data(), LogTable::new())
            .await
            .unwrap();

        assert_eq!(log.count(LogIdentifier::Error), 1);
        assert!(log.rows()[0].message.starts_with("Error saving to SQL"));
        assert_eq!(db.connection_counts().await, (1, 1));
    }

    #[tokio::test]
    async fn test_save_to_sql_missing_env_var() {
        let args = StageArgs {
            destination: Some("transactions".into()),
            connection_string_env_var: Some("STATEMENT_ETL_TEST_UNSET_VAR".into()),
            ..Default::default()
        };

        let (_, log) = SaveToSql::new(Arc::new(MemoryDatabase::new()))
            .transform(&ctx(args), data(), LogTable::new())
            .await
            .unwrap();

        assert_eq!(
            log.messages(LogIdentifier::Error),
            vec!["Environment variable 'STATEMENT_ETL_TEST_UNSET_VAR' not set."]
        );
    }

    #[tokio::test]
    async fn test_stored_procedure_appends_returned_rows() {
        let db = MemoryDatabase::new();
        db.add_procedure(
            "sp_merge_transactions",
            vec![("success", "12 rows merged"), ("notice", "odd")],
        )
        .await;
        let args = StageArgs {
            connection_string: Some("memory://".into()),
            stored_procedure: Some("sp_merge_transactions".into()),
            procedure_params: Some(vec![json!(4), json!(2025)]),
            ..Default::default()
        };

        let log = StoredProcedure::new(Arc::new(db.clone()))
            .run(&ctx(args), LogTable::new())
            .await
            .unwrap();

        assert_eq!(log.rows()[0].identifier, LogIdentifier::Success);
        assert_eq!(log.rows()[1].identifier, LogIdentifier::Warning);
        assert_eq!(db.executed().await, vec!["CALL sp_merge_transactions(4, 2025)"]);
        assert_eq!(db.connection_counts().await, (1, 1));
    }

    #[tokio::test]
    async fn test_stored_procedure_skips_after_errors() {
        let db = MemoryDatabase::new();
        let args = StageArgs {
            connection_string: Some("memory://".into()),
            stored_procedure: Some("sp_merge_transactions".into()),
            validate_error: Some(true),
            ..Default::default()
        };
        let log = LogTable::new().append(LogIdentifier::Error, "clean failed");

        let log = StoredProcedure::new(Arc::new(db.clone()))
            .run(&ctx(args), log)
            .await
            .unwrap();

        assert_eq!(log.len(), 1);
        assert_eq!(db.connection_counts().await, (0, 0));
    }

    #[tokio::test]
    async fn test_stored_procedure_reads_connection_from_env_var() {
        std::env::set_var("STATEMENT_ETL_TEST_SP_URL", "memory://merge");
        let db = MemoryDatabase::new();
        db.add_procedure("sp_merge_transactions", vec![("success", "3 rows merged")])
            .await;
        let args = StageArgs {
            connection_string_env_var: Some("STATEMENT_ETL_TEST_SP_URL".into()),
            stored_procedure: Some("sp_merge_transactions".into()),
            ..Default::default()
        };
        let handler = StoredProcedure::new(Arc::new(db.clone()));

        assert_eq!(handler.required_args(), &["stored_procedure"]);
        let log = handler.run(&ctx(args), LogTable::new()).await.unwrap();

        assert_eq!(log.messages(LogIdentifier::Success), vec!["3 rows merged"]);
        assert_eq!(db.connection_counts().await, (1, 1));
    }

    #[tokio::test]
    async fn test_stored_procedure_without_connection_logs_error() {
        let db = MemoryDatabase::new();
        let args = StageArgs {
            stored_procedure: Some("sp_merge_transactions".into()),
            ..Default::default()
        };

        let log = StoredProcedure::new(Arc::new(db.clone()))
            .run(&ctx(args), LogTable::new())
            .await
            .unwrap();

        assert_eq!(
            log.messages(LogIdentifier::Error),
            vec!["Either 'connection_string_env_var' or 'connection_string' argument is required."]
        );
        assert_eq!(db.connection_counts().await, (0, 0));
    }

    #[tokio::test]
    async fn test_stored_query_missing_env_var_logs_error() {
        let db = MemoryDatabase::new();
        let args = StageArgs {
            connection_string_env_var: Some("STATEMENT_ETL_TEST_UNSET_QUERY_URL".into()),
            stored_query: Some("DELETE FROM staging".into()),
            ..Default::default()
        };
        let handler = StoredQuery::new(Arc::new(db.clone()));

        assert_eq!(handler.required_args(), &["stored_query"]);
        let log = handler.run(&ctx(args), LogTable::new()).await.unwrap();

        assert_eq!(
            log.messages(LogIdentifier::Error),
            vec!["Environment variable 'STATEMENT_ETL_TEST_UNSET_QUERY_URL' not set."]
        );
        assert!(db.executed().await.is_empty());
    }

    #[tokio::test]
    async fn test_stored_query_failure_still_closes() {
        let db = MemoryDatabase::new();
        db.fail_on("DELETE FROM staging").await;
        let args = StageArgs {
            connection_string: Some("memory://".into()),
            stored_query: Some("DELETE FROM staging".into()),
            ..Default::default()
        };

        let log = StoredQuery::new(Arc::new(db.clone()))
            .run(&ctx(args), LogTable::new())
            .await
            .unwrap();

        assert_eq!(log.count(LogIdentifier::Error), 1);
        assert_eq!(db.connection_counts().await, (1, 1));
    }
}
