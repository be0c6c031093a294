use std::io::{self, Write};

use serde::Serialize;
use serde_json::Value;

use crate::domain::{PackageDescriptor, STAT_BYTES, STAT_COUNT_OF_ROWS, STAT_DATASET_NAME};
use crate::dump::PublicationLogEntry;

/// What the `dump` command reports once every stream has been drained.
#[derive(Debug, Clone, Serialize)]
pub struct PublicationSummary {
    pub dataset_name: Option<String>,
    pub count_of_rows: u64,
    pub bytes: u64,
    pub resources: usize,
    pub failures: usize,
    pub log: Vec<PublicationLogEntry>,
}

impl PublicationSummary {
    pub fn new(package: &PackageDescriptor, log: Vec<PublicationLogEntry>) -> Self {
        let counter = |key: &str| {
            package
                .properties
                .get(key)
                .and_then(Value::as_u64)
                .unwrap_or(0)
        };
        Self {
            dataset_name: package
                .properties
                .get(STAT_DATASET_NAME)
                .and_then(Value::as_str)
                .map(str::to_string),
            count_of_rows: counter(STAT_COUNT_OF_ROWS),
            bytes: counter(STAT_BYTES),
            resources: package.resources.len(),
            failures: log.iter().filter(|entry| entry.is_error()).count(),
            log,
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_package(package: &PackageDescriptor) -> io::Result<()> {
        Self::print_json(package)
    }

    pub fn print_summary(summary: &PublicationSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
