//! Extraction stages: statement PDFs and delimited text files.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use csv::ReaderBuilder;
use walkdir::WalkDir;

use crate::dataset::{Dataset, Value};
use crate::etl::args::StageArgs;
use crate::etl::stage::{ExtractHandler, StageContext};
use crate::etl::types::StageError;
use crate::log::{LogIdentifier, LogTable};

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The document is encrypted and the password is missing or wrong.
    #[error("access denied: {0}")]
    Access(String),

    #[error("could not read '{path}': {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{0}")]
    Other(String),
}

/// Table-detection service for statement documents.
///
/// Returns every table found in the file, as text cells, in page order.
#[async_trait]
pub trait TableExtractor: Send + Sync {
    async fn extract_tables(
        &self,
        path: &Path,
        password: Option<&str>,
    ) -> Result<Vec<Dataset>, ExtractError>;
}

/// Extractor answering from tables registered per file name.
///
/// Used for dry runs and tests. Files that are not registered fail as
/// unreadable; a registered password must match.
#[derive(Default, Clone)]
pub struct MemoryExtractor {
    tables: HashMap<String, (Option<String>, Vec<Dataset>)>,
}

impl MemoryExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers tables for any path whose file name is `file_name`.
    pub fn with_tables(mut self, file_name: &str, password: Option<&str>, tables: Vec<Dataset>) -> Self {
        self.tables
            .insert(file_name.to_string(), (password.map(str::to_string), tables));
        self
    }
}

#[async_trait]
impl TableExtractor for MemoryExtractor {
    async fn extract_tables(
        &self,
        path: &Path,
        password: Option<&str>,
    ) -> Result<Vec<Dataset>, ExtractError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let Some((expected, tables)) = self.tables.get(name) else {
            return Err(ExtractError::Unreadable {
                path: path.to_path_buf(),
                source: "no tables registered for file".into(),
            });
        };
        if expected.is_some() && expected.as_deref() != password {
            return Err(ExtractError::Access(format!("wrong password for {}", name)));
        }
        Ok(tables.clone())
    }
}

/// Files a stage should read: `filepath` when it points at a file, else
/// every `*.<extension>` directly inside `process_dir`, sorted.
///
/// Returns `None` (after logging an `error` row) when neither is usable.
fn input_files(
    args: &StageArgs,
    extension: &str,
    log: &mut LogTable,
) -> Result<Option<Vec<PathBuf>>, StageError> {
    if let Some(filepath) = args.filepath.as_ref().filter(|p| p.is_file()) {
        return Ok(Some(vec![filepath.clone()]));
    }

    let Some(dir) = args.process_dir.as_ref() else {
        log.push(LogIdentifier::Error, "Missing parameter 'process_dir' in settings.");
        return Ok(None);
    };
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(extension))
        })
        .collect();
    files.sort();

    if files.is_empty() {
        log.push(
            LogIdentifier::Warning,
            format!(
                "No {} files found in directory {}.",
                extension.to_uppercase(),
                dir.display()
            ),
        );
    }
    Ok(Some(files))
}

/// Drops empty rows and columns; remaining blanks become empty text.
fn tidy_table(mut table: Dataset) -> Dataset {
    table.drop_blank_rows();
    table.drop_blank_columns();
    table.replace_blanks(Value::text(""));
    table
}

/// Reads statement tables whose width matches `column_mapping`.
pub struct PdfExtract {
    extractor: Arc<dyn TableExtractor>,
}

impl PdfExtract {
    pub fn new(extractor: Arc<dyn TableExtractor>) -> Self {
        PdfExtract { extractor }
    }
}

#[async_trait]
impl ExtractHandler for PdfExtract {
    async fn extract(
        &self,
        ctx: &StageContext,
        mut log: LogTable,
    ) -> Result<(Dataset, LogTable), StageError> {
        let args = &ctx.args;
        let Some(mapping) = args.column_mapping.clone().filter(|m| !m.is_empty()) else {
            tracing::error!(parent: &ctx.span, "missing required parameter 'column_mapping'");
            log.push(
                LogIdentifier::Error,
                "Missing required parameter 'column_mapping' or it is not a list.",
            );
            return Ok((Dataset::default(), log));
        };

        let Some(files) = input_files(args, "pdf", &mut log)? else {
            return Ok((Dataset::new(mapping), log));
        };

        let mut tables = Vec::new();
        for file in files {
            match self
                .extractor
                .extract_tables(&file, args.password.as_deref())
                .await
            {
                Ok(found) => {
                    let total = found.len();
                    tables.extend(
                        found
                            .into_iter()
                            .map(tidy_table)
                            .filter(|t| t.width() == mapping.len()),
                    );
                    tracing::info!(
                        parent: &ctx.span,
                        file = %file.display(),
                        tables = total,
                        "tables extracted"
                    );
                    log.push(LogIdentifier::FileProcessed, file.display().to_string());
                }
                Err(ExtractError::Access(reason)) => {
                    tracing::warn!(parent: &ctx.span, file = %file.display(), %reason, "access denied");
                    log.push(
                        LogIdentifier::Access,
                        format!("Could not access the file {}: {}", file.display(), reason),
                    );
                }
                Err(e) => {
                    tracing::warn!(parent: &ctx.span, file = %file.display(), error = %e, "extraction failed");
                    log.push(
                        LogIdentifier::Warning,
                        format!("Error extracting tables from file {}: {}", file.display(), e),
                    );
                }
            }
        }

        let data = Dataset::concat(tables)?.filter(|d| !d.is_empty());
        match data {
            Some(mut data) => {
                data.set_columns(mapping)?;
                Ok((data, log))
            }
            None => {
                log.push(LogIdentifier::Error, "No valid tables found in the PDF files.");
                Ok((Dataset::new(mapping), log))
            }
        }
    }
}

/// Reads every delimited text file in `process_dir` (or `filepath`).
///
/// Uses `separator` (default `,`); headers come from the first file and
/// `column_mapping`, when set, renames them.
pub struct CsvExtract;

impl CsvExtract {
    fn read_file(path: &Path, separator: u8) -> Result<Dataset, StageError> {
        let file = File::open(path)?;
        let mut rdr = ReaderBuilder::new()
            .delimiter(separator)
            .from_reader(BufReader::new(file));

        let headers = rdr
            .headers()
            .map_err(|e| StageError::Message(format!("{}: {}", path.display(), e)))?
            .clone();
        let mut data = Dataset::new(headers.iter());
        for record in rdr.records() {
            let record = record.map_err(|e| StageError::Message(format!("{}: {}", path.display(), e)))?;
            data.push_row(record.iter().map(Value::from).collect())?;
        }
        Ok(data)
    }
}

#[async_trait]
impl ExtractHandler for CsvExtract {
    async fn extract(
        &self,
        ctx: &StageContext,
        mut log: LogTable,
    ) -> Result<(Dataset, LogTable), StageError> {
        let separator = ctx.args.separator.unwrap_or(',');
        if !separator.is_ascii() {
            return Err(StageError::Message(format!(
                "separator '{}' is not a single-byte character",
                separator
            )));
        }

        let Some(files) = input_files(&ctx.args, "csv", &mut log)? else {
            return Ok((Dataset::default(), log));
        };

        let mut tables = Vec::with_capacity(files.len());
        for file in files {
            tables.push(Self::read_file(&file, separator as u8)?);
            tracing::info!(parent: &ctx.span, file = %file.display(), "csv file read");
            log.push(LogIdentifier::FileProcessed, file.display().to_string());
        }

        let mut data = Dataset::concat(tables)?.unwrap_or_default();
        if let Some(mapping) = ctx.args.column_mapping.clone() {
            data.set_columns(mapping)?;
        }
        Ok((data, log))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tracing::Span;

    fn ctx(args: StageArgs) -> StageContext {
        StageContext::new("extract", args, Span::none())
    }

    fn statement_table() -> Dataset {
        Dataset::from_text_rows(
            ["c0", "c1", "c2", "c3"],
            &[
                vec!["1", "01/04", "Coffee", ""],
                vec!["", " ", "", ""],
                vec!["2", "02/04", "Rent", ""],
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_pdf_extract_renames_matching_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("april.pdf");
        std::fs::write(&path, b"%PDF").unwrap();

        let noise = Dataset::from_text_rows(["x"], &[vec!["page 1"]]).unwrap();
        let extractor = MemoryExtractor::new().with_tables(
            "april.pdf",
            Some("x"),
            vec![noise, statement_table()],
        );
        let args = StageArgs {
            filepath: Some(path.clone()),
            password: Some("x".into()),
            column_mapping: Some(vec!["id".into(), "date".into(), "concept".into()]),
            ..Default::default()
        };

        let (data, log) = PdfExtract::new(Arc::new(extractor))
            .extract(&ctx(args), LogTable::new())
            .await
            .unwrap();

        assert_eq!(data.columns(), &["id", "date", "concept"]);
        assert_eq!(data.len(), 2);
        assert_eq!(
            log.messages(LogIdentifier::FileProcessed),
            vec![path.display().to_string().as_str()]
        );
        assert!(!log.has_errors());
    }

    #[tokio::test]
    async fn test_pdf_extract_wrong_password_logs_access() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("locked.pdf"), b"%PDF").unwrap();
        let extractor =
            MemoryExtractor::new().with_tables("locked.pdf", Some("secret"), vec![statement_table()]);
        let args = StageArgs {
            process_dir: Some(dir.path().to_path_buf()),
            password: Some("nope".into()),
            column_mapping: Some(vec!["a".into(), "b".into(), "c".into()]),
            ..Default::default()
        };

        let (data, log) = PdfExtract::new(Arc::new(extractor))
            .extract(&ctx(args), LogTable::new())
            .await
            .unwrap();

        assert!(data.is_empty());
        assert_eq!(data.width(), 3);
        assert_eq!(log.count(LogIdentifier::Access), 1);
        assert_eq!(log.count(LogIdentifier::FileProcessed), 0);
        assert_eq!(
            log.last().unwrap().message,
            "No valid tables found in the PDF files."
        );
    }

    #[tokio::test]
    async fn test_pdf_extract_requires_column_mapping() {
        let (data, log) = PdfExtract::new(Arc::new(MemoryExtractor::new()))
            .extract(&ctx(StageArgs::default()), LogTable::new())
            .await
            .unwrap();

        assert!(data.is_empty());
        assert_eq!(log.count(LogIdentifier::Error), 1);
    }

    #[tokio::test]
    async fn test_pdf_extract_empty_dir_warns() {
        let dir = tempfile::tempdir().unwrap();
        let inbox = dir.path().join("inbox");
        let args = StageArgs {
            process_dir: Some(inbox.clone()),
            column_mapping: Some(vec!["a".into()]),
            ..Default::default()
        };

        let (_, log) = PdfExtract::new(Arc::new(MemoryExtractor::new()))
            .extract(&ctx(args), LogTable::new())
            .await
            .unwrap();

        assert!(inbox.is_dir());
        assert_eq!(log.rows()[0].identifier, LogIdentifier::Warning);
        assert_eq!(log.rows()[1].identifier, LogIdentifier::Error);
    }

    #[tokio::test]
    async fn test_csv_extract_concatenates_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.csv"), "name;gender\nAna;F\n").unwrap();
        std::fs::write(dir.path().join("b.csv"), "name;gender\nLuis;M\nEva;F\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let args = StageArgs {
            process_dir: Some(dir.path().to_path_buf()),
            separator: Some(';'),
            ..Default::default()
        };

        let (data, log) = CsvExtract.extract(&ctx(args), LogTable::new()).await.unwrap();

        assert_eq!(data.columns(), &["name", "gender"]);
        assert_eq!(data.len(), 3);
        assert_eq!(log.count(LogIdentifier::FileProcessed), 2);
    }
}
