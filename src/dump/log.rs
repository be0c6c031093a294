use serde::Serialize;
use serde_json::{Map, Value};

use crate::domain::{ResourceDescriptor, Row, SchemaField, TableSchema};

pub const LOG_FIELDS: [&str; 7] = [
    "dataset_id",
    "dataset_name",
    "resource_id",
    "resource_name",
    "resource_url",
    "resource_file",
    "error",
];

/// Outcome of one dataset or resource creation attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublicationLogEntry {
    pub dataset_id: Option<String>,
    pub dataset_name: Option<String>,
    pub resource_id: Option<String>,
    pub resource_name: Option<String>,
    pub resource_url: Option<String>,
    pub resource_file: Option<String>,
    pub error: Option<String>,
}

impl PublicationLogEntry {
    pub fn for_dataset(name: &str) -> Self {
        Self {
            dataset_name: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn for_resource(
        dataset_name: Option<&str>,
        dataset_id: Option<&str>,
        resource_name: &str,
    ) -> Self {
        Self {
            dataset_id: dataset_id.map(str::to_string),
            dataset_name: dataset_name.map(str::to_string),
            resource_name: Some(resource_name.to_string()),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn to_row(&self) -> Row {
        let values = [
            &self.dataset_id,
            &self.dataset_name,
            &self.resource_id,
            &self.resource_name,
            &self.resource_url,
            &self.resource_file,
            &self.error,
        ];
        LOG_FIELDS
            .iter()
            .zip(values)
            .map(|(field, value)| {
                let value = value.as_deref().map(Value::from).unwrap_or(Value::Null);
                (field.to_string(), value)
            })
            .collect::<Map<String, Value>>()
    }
}

/// Append-only record of everything one publication attempted.
#[derive(Debug, Clone, Default)]
pub struct PublicationLog {
    entries: Vec<PublicationLogEntry>,
}

impl PublicationLog {
    pub fn push(&mut self, entry: PublicationLogEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[PublicationLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn rows(&self) -> Vec<Row> {
        self.entries.iter().map(PublicationLogEntry::to_row).collect()
    }
}

pub fn log_resource_descriptor(name: &str) -> ResourceDescriptor {
    let mut resource = ResourceDescriptor::new(name);
    resource.path = Some(format!("{name}.csv"));
    resource.streaming = true;
    resource.schema = Some(TableSchema {
        fields: LOG_FIELDS
            .iter()
            .map(|field| SchemaField::new(field, "string"))
            .collect(),
        ..TableSchema::default()
    });
    resource
}
