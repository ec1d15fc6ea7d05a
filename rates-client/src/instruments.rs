use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::cli::Args;

#[derive(Debug, Error)]
pub(crate) enum InstrumentsError {
    #[error("instrument list is empty (file: {path:?})")]
    EmptyFromFile { path: PathBuf },

    #[error("instrument list is empty (--instruments value: {raw:?})")]
    EmptyFromArg { raw: String },

    #[error("failed to read instruments file: {path:?}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) type Result<T> = std::result::Result<T, InstrumentsError>;

/// Что просим у сервера
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Request {
    Subscribe(Vec<String>),
    SubscribeAll,
    /// getrateall с номером транзакции
    Snapshot(i64),
}

pub(crate) const SNAPSHOT_TXN: i64 = 1;

/// Собирает запрос из CLI:
/// - `--instruments-file` -> rates_core::instruments::read_instruments_from_path
/// - `--instruments`      -> rates_core::instruments::parse_instruments_csv
pub(crate) fn request_from_args(args: &Args) -> Result<Request> {
    if args.snapshot {
        Ok(Request::Snapshot(SNAPSHOT_TXN))
    } else if args.all {
        Ok(Request::SubscribeAll)
    } else if let Some(path) = &args.instruments_file {
        load_from_file(path).map(Request::Subscribe)
    } else {
        let raw = args.instruments.as_deref().unwrap_or_default();
        load_from_arg(raw).map(Request::Subscribe)
    }
}

fn load_from_file(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref().to_path_buf();

    let list = rates_core::instruments::read_instruments_from_path(&path).map_err(|e| {
        InstrumentsError::ReadFile {
            path: path.clone(),
            source: e,
        }
    })?;

    if list.is_empty() {
        return Err(InstrumentsError::EmptyFromFile { path });
    }
    Ok(list)
}

fn load_from_arg(raw: &str) -> Result<Vec<String>> {
    let list = rates_core::instruments::parse_instruments_csv(raw);

    if list.is_empty() {
        return Err(InstrumentsError::EmptyFromArg {
            raw: raw.to_string(),
        });
    }
    Ok(list)
}
