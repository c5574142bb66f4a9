//! Housekeeping after a successful load: the statements listed as
//! `file_processed` in the log are moved out of the intake directory or
//! deleted.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::etl::stage::StageContext;
use crate::etl::types::StageError;
use crate::log::{LogIdentifier, LogTable};

fn processed_files(log: &LogTable) -> Vec<PathBuf> {
    log.filter(LogIdentifier::FileProcessed)
        .map(|row| PathBuf::from(&row.message))
        .filter(|path| path.is_file())
        .collect()
}

/// Moves every processed file into `processed_dir`, creating it if needed.
///
/// Without a `processed_dir` the log is returned as is.
pub fn move_processed_files(ctx: &StageContext, mut log: LogTable) -> Result<LogTable, StageError> {
    let Some(processed_dir) = ctx.args.processed_dir.clone() else {
        tracing::info!(parent: &ctx.span, "no processed_dir, leaving files in place");
        return Ok(log);
    };
    fs::create_dir_all(&processed_dir)?;

    for path in processed_files(&log) {
        let Some(file_name) = path.file_name() else {
            continue;
        };
        let target = processed_dir.join(file_name);
        match move_file(&path, &target) {
            Ok(()) => {
                tracing::info!(parent: &ctx.span, from = %path.display(), to = %target.display(), "moved processed file");
            }
            Err(e) => {
                let message = format!("Error moving {}: {}", path.display(), e);
                tracing::warn!(parent: &ctx.span, "{}", message);
                log.push(LogIdentifier::Warning, message);
            }
        }
    }
    Ok(log)
}

/// Deletes every processed file.
pub fn remove_processed_files(ctx: &StageContext, mut log: LogTable) -> Result<LogTable, StageError> {
    for path in processed_files(&log) {
        match fs::remove_file(&path) {
            Ok(()) => tracing::info!(parent: &ctx.span, path = %path.display(), "removed processed file"),
            Err(e) => {
                let message = format!("Error removing {}: {}", path.display(), e);
                tracing::warn!(parent: &ctx.span, "{}", message);
                log.push(LogIdentifier::Warning, message);
            }
        }
    }
    Ok(log)
}

// rename fails across filesystems
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}
