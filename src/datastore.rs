use std::path::Path;

use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::artifact;
use crate::ckan::{ACTION_DATASTORE_CREATE, ACTION_DATASTORE_UPSERT, CkanHttpClient};
use crate::config::{ArtifactFormat, DatastoreMethod};
use crate::domain::{Row, TableSchema};
use crate::error::CkanError;

pub const WRITE_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatastoreField {
    pub id: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

/// Tabular store attached to catalog resources.
pub trait DatastoreClient {
    fn datastore_create(
        &self,
        resource_id: &str,
        fields: &[DatastoreField],
        primary_key: &[String],
    ) -> Result<(), CkanError>;

    fn datastore_upsert(
        &self,
        resource_id: &str,
        records: &[Row],
        method: DatastoreMethod,
    ) -> Result<(), CkanError>;
}

impl DatastoreClient for CkanHttpClient {
    fn datastore_create(
        &self,
        resource_id: &str,
        fields: &[DatastoreField],
        primary_key: &[String],
    ) -> Result<(), CkanError> {
        let mut body = json!({
            "resource_id": resource_id,
            "force": true,
            "fields": fields,
        });
        if !primary_key.is_empty() {
            body["primary_key"] = json!(primary_key);
        }
        self.post_json(ACTION_DATASTORE_CREATE, &body)?
            .into_result(ACTION_DATASTORE_CREATE)
            .map(|_| ())
    }

    fn datastore_upsert(
        &self,
        resource_id: &str,
        records: &[Row],
        method: DatastoreMethod,
    ) -> Result<(), CkanError> {
        let body = json!({
            "resource_id": resource_id,
            "force": true,
            "method": method.as_str(),
            "records": records,
        });
        self.post_json(ACTION_DATASTORE_UPSERT, &body)?
            .into_result(ACTION_DATASTORE_UPSERT)
            .map(|_| ())
    }
}

/// Maps a Table Schema field type onto a DataStore column type.
pub fn datastore_type(field_type: &str) -> &'static str {
    match field_type {
        "integer" => "int",
        "number" => "numeric",
        "boolean" => "bool",
        "date" => "date",
        "datetime" => "timestamp",
        "time" => "time",
        "object" | "array" => "json",
        _ => "text",
    }
}

pub fn datastore_fields(schema: &TableSchema) -> Vec<DatastoreField> {
    schema
        .fields
        .iter()
        .map(|field| DatastoreField {
            id: field.name.clone(),
            field_type: datastore_type(&field.field_type).to_string(),
        })
        .collect()
}

/// Creates the DataStore table for `resource_id` and loads the artifact's rows
/// into it. Returns the number of rows written.
pub fn push_artifact<D>(
    client: &D,
    resource_id: &str,
    schema: Option<&TableSchema>,
    path: &Path,
    format: ArtifactFormat,
    method: DatastoreMethod,
) -> Result<u64, CkanError>
where
    D: DatastoreClient + ?Sized,
{
    let schema = match schema {
        Some(schema) if !schema.fields.is_empty() => schema.clone(),
        _ => TableSchema::from_field_names(artifact::field_names(path, format)?),
    };
    client.datastore_create(
        resource_id,
        &datastore_fields(&schema),
        &schema.primary_key_fields(),
    )?;

    let mut written = 0u64;
    let mut batch = Vec::with_capacity(WRITE_BATCH_SIZE);
    for row in artifact::read_rows(path, format)? {
        batch.push(row?);
        if batch.len() == WRITE_BATCH_SIZE {
            client.datastore_upsert(resource_id, &batch, method)?;
            written += batch.len() as u64;
            batch.clear();
        }
    }
    if !batch.is_empty() {
        client.datastore_upsert(resource_id, &batch, method)?;
        written += batch.len() as u64;
    }
    info!(resource_id, rows = written, %method, "pushed rows to datastore");
    Ok(written)
}
