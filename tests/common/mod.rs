#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use serde_json::{Map, Value, json};

use dpp_ckan::ckan::{
    ACTION_DATASTORE_CREATE, ACTION_DATASTORE_UPSERT, ACTION_PACKAGE_CREATE,
    ACTION_PACKAGE_UPDATE, ACTION_RESOURCE_CREATE, ACTION_RESOURCE_SHOW, ActionResponse,
    CkanClient, ResourceRequest,
};
use dpp_ckan::config::DatastoreMethod;
use dpp_ckan::datastore::{DatastoreClient, DatastoreField};
use dpp_ckan::domain::{ResourceDescriptor, Row};
use dpp_ckan::dump::Publication;
use dpp_ckan::error::CkanError;

#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub path: PathBuf,
    pub file_name: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub action: String,
    pub body: Value,
    pub upload: Option<Upload>,
}

/// In-memory catalog. Answers queued with `respond` are used first; otherwise
/// every action succeeds with an id numbered after the call position.
#[derive(Default)]
pub struct MockCkan {
    calls: Mutex<Vec<Call>>,
    responses: Mutex<HashMap<String, VecDeque<ActionResponse>>>,
}

impl MockCkan {
    pub fn respond(&self, action: &str, response: ActionResponse) {
        self.responses
            .lock()
            .unwrap()
            .entry(action.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.calls().into_iter().map(|call| call.action).collect()
    }

    pub fn calls_to(&self, action: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call.action == action)
            .collect()
    }

    fn record(&self, action: &str, body: Value, upload: Option<Upload>) -> ActionResponse {
        let position = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Call {
                action: action.to_string(),
                body: body.clone(),
                upload,
            });
            calls.len()
        };
        let queued = self
            .responses
            .lock()
            .unwrap()
            .get_mut(action)
            .and_then(VecDeque::pop_front);
        queued.unwrap_or_else(|| default_response(action, position, &body))
    }
}

fn default_response(action: &str, position: usize, body: &Value) -> ActionResponse {
    match action {
        ACTION_PACKAGE_CREATE | ACTION_PACKAGE_UPDATE => ActionResponse::ok(json!({
            "id": format!("dataset-{position}"),
            "name": body.get("name").cloned().unwrap_or(Value::Null),
        })),
        ACTION_RESOURCE_CREATE => ActionResponse::ok(json!({
            "id": format!("resource-{position}"),
            "url": format!("https://ckan.example.org/resource-{position}"),
        })),
        ACTION_RESOURCE_SHOW => ActionResponse::failed(not_found_error()),
        _ => ActionResponse::ok(json!({})),
    }
}

impl CkanClient for MockCkan {
    fn resource_show(&self, resource_id: &str) -> Result<ActionResponse, CkanError> {
        Ok(self.record(ACTION_RESOURCE_SHOW, json!({ "id": resource_id }), None))
    }

    fn package_create(&self, dataset: &Map<String, Value>) -> Result<ActionResponse, CkanError> {
        Ok(self.record(ACTION_PACKAGE_CREATE, Value::Object(dataset.clone()), None))
    }

    fn package_update(&self, dataset: &Map<String, Value>) -> Result<ActionResponse, CkanError> {
        Ok(self.record(ACTION_PACKAGE_UPDATE, Value::Object(dataset.clone()), None))
    }

    fn resource_create(&self, request: &ResourceRequest) -> Result<ActionResponse, CkanError> {
        let upload = match &request.upload {
            Some(file) => Some(Upload {
                path: file.path.clone(),
                file_name: file.file_name.clone(),
                content: fs::read_to_string(&file.path)
                    .map_err(|err| CkanError::Filesystem(err.to_string()))?,
            }),
            None => None,
        };
        Ok(self.record(
            ACTION_RESOURCE_CREATE,
            Value::Object(request.fields.clone()),
            upload,
        ))
    }
}

impl DatastoreClient for MockCkan {
    fn datastore_create(
        &self,
        resource_id: &str,
        fields: &[DatastoreField],
        primary_key: &[String],
    ) -> Result<(), CkanError> {
        let body = json!({
            "resource_id": resource_id,
            "fields": fields,
            "primary_key": primary_key,
        });
        self.record(ACTION_DATASTORE_CREATE, body, None)
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
            "records": records,
            "method": method.as_str(),
        });
        self.record(ACTION_DATASTORE_UPSERT, body, None)
            .into_result(ACTION_DATASTORE_UPSERT)
            .map(|_| ())
    }
}

pub fn duplicate_name_error() -> Value {
    json!({
        "__type": "Validation Error",
        "name": ["That URL is already in use."]
    })
}

pub fn not_found_error() -> Value {
    json!({
        "__type": "Not Found Error",
        "message": "Not found: Resource was not found."
    })
}

pub fn validation_error() -> Value {
    json!({
        "__type": "Validation Error",
        "url": ["Missing value"]
    })
}

pub fn map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other}"),
    }
}

pub fn row(value: Value) -> Row {
    map(value)
}

/// Pulls every output stream and its rows, stopping at the first error.
pub fn drain<C>(
    publication: &mut Publication<C>,
) -> Result<Vec<(ResourceDescriptor, Vec<Row>)>, CkanError>
where
    C: CkanClient + DatastoreClient + 'static,
{
    let mut drained = Vec::new();
    for stream in publication.by_ref() {
        let stream = stream?;
        let spec = stream.spec.clone();
        drained.push((spec, stream.collect_rows()?));
    }
    Ok(drained)
}
