//! Temporary on-disk artifacts for streamed resources.
//!
//! Rows are appended while they flow through the pipeline; once the stream is
//! exhausted the artifact is finalized, measured and hashed, and handed to the
//! catalog as an upload. The underlying temp file is removed when the
//! artifact is dropped, whichever way the publication ends.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use serde_json::{Map, Value};
use tempfile::{Builder, NamedTempFile};

use crate::config::ArtifactFormat;
use crate::domain::Row;
use crate::error::CkanError;
use crate::pipeline::Rows;

enum Sink {
    Csv(csv::Writer<BufWriter<File>>),
    Json { writer: BufWriter<File>, first: bool },
}

pub struct ArtifactWriter {
    file: NamedTempFile,
    sink: Sink,
    format: ArtifactFormat,
    columns: Option<Vec<String>>,
    rows: u64,
}

impl ArtifactWriter {
    /// Creates an empty artifact. When `columns` is known up front the CSV
    /// header is written immediately, otherwise it is taken from the first row.
    pub fn create(
        name: &str,
        format: ArtifactFormat,
        columns: Option<Vec<String>>,
    ) -> Result<Self, CkanError> {
        let prefix = format!("{}-", name.replace(['/', '\\'], "_"));
        let file = Builder::new()
            .prefix(&prefix)
            .suffix(&format!(".{}", format.extension()))
            .tempfile()
            .map_err(|err| CkanError::Filesystem(format!("create artifact for {name}: {err}")))?;
        let handle = file
            .as_file()
            .try_clone()
            .map_err(|err| CkanError::Filesystem(err.to_string()))?;
        let writer = BufWriter::new(handle);

        let sink = match format {
            ArtifactFormat::Csv => Sink::Csv(csv::Writer::from_writer(writer)),
            ArtifactFormat::Json => Sink::Json {
                writer,
                first: true,
            },
        };
        let mut artifact = Self {
            file,
            sink,
            format,
            columns: None,
            rows: 0,
        };
        if let Some(columns) = columns.filter(|columns| !columns.is_empty()) {
            artifact.start(columns)?;
        }
        if let Sink::Json { writer, .. } = &mut artifact.sink {
            writer.write_all(b"[").map_err(io_error)?;
        }
        Ok(artifact)
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    fn start(&mut self, columns: Vec<String>) -> Result<(), CkanError> {
        if let Sink::Csv(writer) = &mut self.sink {
            writer.write_record(&columns).map_err(csv_error)?;
        }
        self.columns = Some(columns);
        Ok(())
    }

    pub fn write_row(&mut self, row: &Row) -> Result<(), CkanError> {
        if self.columns.is_none() {
            self.start(row.keys().cloned().collect())?;
        }
        match &mut self.sink {
            Sink::Csv(writer) => {
                let columns = self.columns.as_deref().unwrap_or_default();
                let record = columns
                    .iter()
                    .map(|column| cell_text(row.get(column).unwrap_or(&Value::Null)));
                writer.write_record(record).map_err(csv_error)?;
            }
            Sink::Json { writer, first } => {
                if !*first {
                    writer.write_all(b",").map_err(io_error)?;
                }
                *first = false;
                serde_json::to_writer(&mut *writer, row)
                    .map_err(|err| CkanError::Filesystem(err.to_string()))?;
            }
        }
        self.rows += 1;
        Ok(())
    }

    /// Flushes everything to disk and measures the result.
    pub fn finalize(self) -> Result<FinishedArtifact, CkanError> {
        match self.sink {
            Sink::Csv(writer) => {
                let mut inner = writer
                    .into_inner()
                    .map_err(|err| CkanError::Filesystem(err.to_string()))?;
                inner.flush().map_err(io_error)?;
            }
            Sink::Json { mut writer, .. } => {
                writer.write_all(b"]").map_err(io_error)?;
                writer.flush().map_err(io_error)?;
            }
        }
        let bytes = self
            .file
            .as_file()
            .metadata()
            .map_err(io_error)?
            .len();
        Ok(FinishedArtifact {
            file: self.file,
            format: self.format,
            rows: self.rows,
            bytes,
        })
    }
}

pub struct FinishedArtifact {
    file: NamedTempFile,
    pub format: ArtifactFormat,
    pub rows: u64,
    pub bytes: u64,
}

impl FinishedArtifact {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Streaming MD5 over the artifact's content.
    pub fn md5(&self) -> Result<String, CkanError> {
        file_md5(self.path())
    }

    /// Removes the temp file, surfacing any error. Dropping the artifact
    /// removes it too, silently.
    pub fn close(self) -> Result<(), CkanError> {
        self.file.close().map_err(io_error)
    }
}

pub fn file_md5(path: &Path) -> Result<String, CkanError> {
    let mut file = File::open(path)
        .map_err(|err| CkanError::Filesystem(format!("open {}: {err}", path.display())))?;
    let mut context = md5::Context::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer).map_err(io_error)?;
        if read == 0 {
            break;
        }
        context.consume(&buffer[..read]);
    }
    Ok(format!("{:x}", context.finalize()))
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Column names of an artifact: the CSV header, or the keys of the first JSON
/// row.
pub fn field_names(path: &Path, format: ArtifactFormat) -> Result<Vec<String>, CkanError> {
    match format {
        ArtifactFormat::Csv => {
            let mut reader = csv::Reader::from_path(path).map_err(csv_error)?;
            let headers = reader.headers().map_err(csv_error)?;
            Ok(headers.iter().map(str::to_string).collect())
        }
        ArtifactFormat::Json => Ok(read_json_rows(path)?
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default()),
    }
}

/// Reads rows back from a file. CSV cells come back as strings, with empty
/// cells as nulls.
pub fn read_rows(path: &Path, format: ArtifactFormat) -> Result<Rows, CkanError> {
    match format {
        ArtifactFormat::Csv => {
            let mut reader = csv::Reader::from_path(path).map_err(|err| {
                CkanError::Filesystem(format!("open {}: {err}", path.display()))
            })?;
            let headers = reader.headers().map_err(csv_error)?.clone();
            let rows = reader.into_records().map(move |record| {
                let record = record.map_err(csv_error)?;
                let mut row = Map::new();
                for (column, cell) in headers.iter().zip(record.iter()) {
                    let value = if cell.is_empty() {
                        Value::Null
                    } else {
                        Value::from(cell)
                    };
                    row.insert(column.to_string(), value);
                }
                Ok(row)
            });
            Ok(Box::new(rows))
        }
        ArtifactFormat::Json => Ok(Box::new(read_json_rows(path)?.into_iter().map(Ok))),
    }
}

fn read_json_rows(path: &Path) -> Result<Vec<Row>, CkanError> {
    let content = fs::read(path)
        .map_err(|err| CkanError::Filesystem(format!("read {}: {err}", path.display())))?;
    serde_json::from_slice(&content)
        .map_err(|err| CkanError::Filesystem(format!("parse {}: {err}", path.display())))
}

fn io_error(err: std::io::Error) -> CkanError {
    CkanError::Filesystem(err.to_string())
}

fn csv_error(err: csv::Error) -> CkanError {
    CkanError::Filesystem(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn csv_artifact_uses_declared_columns() {
        let mut writer = ArtifactWriter::create(
            "people",
            ArtifactFormat::Csv,
            Some(vec!["first".to_string(), "last".to_string()]),
        )
        .unwrap();
        writer
            .write_row(&row(json!({"last": "Smith", "first": "Fred", "extra": 1})))
            .unwrap();
        writer
            .write_row(&row(json!({"first": "Ann", "last": null})))
            .unwrap();
        let artifact = writer.finalize().unwrap();

        let content = fs::read_to_string(artifact.path()).unwrap();
        assert_eq!(content, "first,last\nFred,Smith\nAnn,\n");
        assert_eq!(artifact.rows, 2);
        assert_eq!(artifact.bytes, content.len() as u64);
        assert_eq!(artifact.md5().unwrap(), format!("{:x}", md5::compute(&content)));

        let back: Vec<Row> = read_rows(artifact.path(), ArtifactFormat::Csv)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(back[1]["last"], Value::Null);
    }

    #[test]
    fn json_artifact_is_an_array() {
        let mut writer = ArtifactWriter::create("items", ArtifactFormat::Json, None).unwrap();
        writer.write_row(&row(json!({"a": 1}))).unwrap();
        writer.write_row(&row(json!({"a": [2, 3]}))).unwrap();
        let artifact = writer.finalize().unwrap();

        let content = fs::read_to_string(artifact.path()).unwrap();
        assert_eq!(content, r#"[{"a":1},{"a":[2,3]}]"#);
        assert_eq!(
            field_names(artifact.path(), ArtifactFormat::Json).unwrap(),
            vec!["a".to_string()]
        );
    }

    #[test]
    fn dropping_an_artifact_removes_it() {
        let writer = ArtifactWriter::create("gone", ArtifactFormat::Csv, None).unwrap();
        let path = writer.path().to_path_buf();
        assert!(path.exists());
        drop(writer);
        assert!(!path.exists());
    }
}
