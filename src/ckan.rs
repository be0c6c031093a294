use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::config::{CkanConnection, ValueResolver};
use crate::error::CkanError;

pub const ACTION_RESOURCE_SHOW: &str = "resource_show";
pub const ACTION_PACKAGE_CREATE: &str = "package_create";
pub const ACTION_PACKAGE_UPDATE: &str = "package_update";
pub const ACTION_RESOURCE_CREATE: &str = "resource_create";
pub const ACTION_DATASTORE_CREATE: &str = "datastore_create";
pub const ACTION_DATASTORE_UPSERT: &str = "datastore_upsert";

/// Value of the `url` field for resources whose content is uploaded.
pub const UPLOAD_MARKER: &str = "upload";

// Server-side error texts the catalog is matched against. These are coupled to
// CKAN's wording and must be updated together with it.
const DUPLICATE_NAME_MESSAGE: &str = "That URL is already in use.";
const NOT_FOUND_TYPE: &str = "Not Found Error";
const NOT_FOUND_MESSAGE: &str = "Not found";

/// The JSON envelope every CKAN action answers with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CkanFailure {
    DuplicateName,
    NotFound,
    Other,
}

impl ActionResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(error: Value) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error),
        }
    }

    pub fn failure(&self) -> Option<CkanFailure> {
        if self.success {
            return None;
        }
        Some(classify_failure(self.error.as_ref().unwrap_or(&Value::Null)))
    }

    pub fn into_result(self, action: &str) -> Result<Value, CkanError> {
        if self.success {
            return Ok(self.result.unwrap_or(Value::Null));
        }
        let message = match self.error {
            Some(error) => error.to_string(),
            None => "unknown error".to_string(),
        };
        Err(CkanError::catalog(action, message))
    }

    /// The `id` of the entity an action created or returned.
    pub fn into_id(self, action: &str) -> Result<String, CkanError> {
        let result = self.into_result(action)?;
        result
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| CkanError::MalformedResponse {
                url: action.to_string(),
                message: "result has no id".to_string(),
            })
    }
}

/// Single place where CKAN error payloads are recognised.
pub fn classify_failure(error: &Value) -> CkanFailure {
    let duplicate = error
        .get("name")
        .and_then(Value::as_array)
        .map(|messages| {
            messages
                .iter()
                .any(|message| message.as_str() == Some(DUPLICATE_NAME_MESSAGE))
        })
        .unwrap_or(false);
    if duplicate {
        return CkanFailure::DuplicateName;
    }

    let not_found_type = error.get("__type").and_then(Value::as_str) == Some(NOT_FOUND_TYPE);
    let not_found_message = error
        .get("message")
        .and_then(Value::as_str)
        .map(|message| message.contains(NOT_FOUND_MESSAGE))
        .unwrap_or(false);
    if not_found_type || not_found_message {
        return CkanFailure::NotFound;
    }
    CkanFailure::Other
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadFile {
    pub path: PathBuf,
    pub file_name: String,
}

/// Body of a `resource_create` call: JSON fields, plus a file when the
/// resource content is uploaded rather than referenced by URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRequest {
    pub fields: Map<String, Value>,
    pub upload: Option<UploadFile>,
}

impl ResourceRequest {
    pub fn by_reference(package_id: &str, url: &str, name: &str, format: Option<&str>) -> Self {
        let mut fields = Map::new();
        fields.insert("package_id".to_string(), Value::from(package_id));
        fields.insert("url".to_string(), Value::from(url));
        fields.insert("name".to_string(), Value::from(name));
        if let Some(format) = format {
            fields.insert("format".to_string(), Value::from(format));
        }
        Self {
            fields,
            upload: None,
        }
    }

    pub fn by_upload(package_id: &str, name: &str, upload: UploadFile) -> Self {
        let mut fields = Map::new();
        fields.insert("package_id".to_string(), Value::from(package_id));
        fields.insert("url".to_string(), Value::from(UPLOAD_MARKER));
        fields.insert("url_type".to_string(), Value::from(UPLOAD_MARKER));
        fields.insert("name".to_string(), Value::from(name));
        Self {
            fields,
            upload: Some(upload),
        }
    }

    pub fn with_field(mut self, key: &str, value: Option<&str>) -> Self {
        if let Some(value) = value {
            self.fields.insert(key.to_string(), Value::from(value));
        }
        self
    }
}

pub trait CkanClient {
    fn resource_show(&self, resource_id: &str) -> Result<ActionResponse, CkanError>;
    fn package_create(&self, dataset: &Map<String, Value>) -> Result<ActionResponse, CkanError>;
    fn package_update(&self, dataset: &Map<String, Value>) -> Result<ActionResponse, CkanError>;
    fn resource_create(&self, request: &ResourceRequest) -> Result<ActionResponse, CkanError>;
}

pub struct CkanHttpClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    resolver: Box<dyn ValueResolver>,
}

impl CkanHttpClient {
    pub fn new<R>(connection: &CkanConnection, resolver: R) -> Result<Self, CkanError>
    where
        R: ValueResolver + 'static,
    {
        let host = resolver.resolve(&connection.host)?;
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("dpp-ckan/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CkanError::Configuration(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| CkanError::Configuration(err.to_string()))?;

        Ok(Self {
            client,
            base_url: format!("{}/api/3/action", host.trim_end_matches('/')),
            api_key: connection.api_key.clone(),
            resolver: Box::new(resolver),
        })
    }

    pub fn action_url(&self, action: &str) -> String {
        format!("{}/{}", self.base_url, action)
    }

    fn authorize(&self, request: RequestBuilder) -> Result<RequestBuilder, CkanError> {
        match &self.api_key {
            Some(raw) => {
                let key = self.resolver.resolve(raw)?;
                Ok(request.header(AUTHORIZATION, key))
            }
            None => Ok(request),
        }
    }

    pub(crate) fn post_json(&self, action: &str, body: &Value) -> Result<ActionResponse, CkanError> {
        let url = self.action_url(action);
        debug!(action, %body, "calling CKAN");
        let request = self.authorize(self.client.post(&url).json(body))?;
        let response = request
            .send()
            .map_err(|err| CkanError::catalog(action, err.to_string()))?;
        Self::parse_envelope(action, response)
    }

    fn post_multipart(
        &self,
        action: &str,
        fields: &Map<String, Value>,
        upload: &UploadFile,
    ) -> Result<ActionResponse, CkanError> {
        let url = self.action_url(action);
        debug!(action, file = %upload.path.display(), "uploading to CKAN");
        let mut form = Form::new();
        for (key, value) in fields {
            match value {
                Value::Null => {}
                Value::String(text) => form = form.text(key.clone(), text.clone()),
                other => form = form.text(key.clone(), other.to_string()),
            }
        }
        let part = Part::file(&upload.path)
            .map_err(|err| {
                CkanError::Filesystem(format!("open upload {}: {err}", upload.path.display()))
            })?
            .file_name(upload.file_name.clone());
        form = form.part("upload", part);

        let request = self.authorize(self.client.post(&url).multipart(form))?;
        let response = request
            .send()
            .map_err(|err| CkanError::catalog(action, err.to_string()))?;
        Self::parse_envelope(action, response)
    }

    fn parse_envelope(action: &str, response: Response) -> Result<ActionResponse, CkanError> {
        let url = response.url().to_string();
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| CkanError::catalog(action, err.to_string()))?;
        parse_body(url, status, &body)
    }

    fn send_with_retries<F>(&self, action: &str, mut make_req: F) -> Result<Response, CkanError>
    where
        F: FnMut() -> Result<RequestBuilder, CkanError>,
    {
        const MAX_RETRIES: usize = 3;
        const BASE_DELAY_MS: u64 = 200;
        let mut attempt = 0usize;
        loop {
            let response = make_req()?.send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < MAX_RETRIES && is_retryable_status(status) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < MAX_RETRIES && is_retryable_error(&err) {
                        let delay = BASE_DELAY_MS * (attempt as u64 + 1);
                        thread::sleep(Duration::from_millis(delay));
                        attempt += 1;
                        continue;
                    }
                    return Err(CkanError::catalog(action, err.to_string()));
                }
            }
        }
    }
}

impl CkanClient for CkanHttpClient {
    fn resource_show(&self, resource_id: &str) -> Result<ActionResponse, CkanError> {
        let url = self.action_url(ACTION_RESOURCE_SHOW);
        let response = self.send_with_retries(ACTION_RESOURCE_SHOW, || {
            self.authorize(self.client.get(&url).query(&[("id", resource_id)]))
        })?;
        Self::parse_envelope(ACTION_RESOURCE_SHOW, response)
    }

    fn package_create(&self, dataset: &Map<String, Value>) -> Result<ActionResponse, CkanError> {
        self.post_json(ACTION_PACKAGE_CREATE, &Value::Object(dataset.clone()))
    }

    fn package_update(&self, dataset: &Map<String, Value>) -> Result<ActionResponse, CkanError> {
        self.post_json(ACTION_PACKAGE_UPDATE, &Value::Object(dataset.clone()))
    }

    fn resource_create(&self, request: &ResourceRequest) -> Result<ActionResponse, CkanError> {
        match &request.upload {
            Some(upload) => self.post_multipart(ACTION_RESOURCE_CREATE, &request.fields, upload),
            None => self.post_json(
                ACTION_RESOURCE_CREATE,
                &Value::Object(request.fields.clone()),
            ),
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Decodes an action envelope. Bodies that are not an envelope (proxy error
/// pages, truncated replies) are reported with the url and status they came with.
fn parse_body(url: String, status: u16, body: &str) -> Result<ActionResponse, CkanError> {
    serde_json::from_str(body).map_err(|err| {
        error!(%url, status, "expected JSON in response");
        CkanError::MalformedResponse {
            url,
            message: format!("status {status}: {err}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn duplicate_name_is_recognised() {
        let error = json!({"__type": "Validation Error", "name": ["That URL is already in use."]});
        assert_eq!(classify_failure(&error), CkanFailure::DuplicateName);
    }

    #[test]
    fn not_found_is_recognised() {
        let error = json!({"message": "Not found: Resource was not found.", "__type": "Not Found Error"});
        assert_eq!(classify_failure(&error), CkanFailure::NotFound);
    }

    #[test]
    fn other_errors_fall_through() {
        let error = json!({
            "message": "Access denied: User  not authorized to read resource 0d8b",
            "__type": "Authorization Error"
        });
        assert_eq!(classify_failure(&error), CkanFailure::Other);
        let error = json!({"__type": "Validation Error", "name": ["Some validation error."]});
        assert_eq!(classify_failure(&error), CkanFailure::Other);
    }

    #[test]
    fn failed_envelope_carries_serialized_error() {
        let response: ActionResponse = serde_json::from_value(json!({
            "success": false,
            "error": {"message": "boom"}
        }))
        .unwrap();
        let err = response.into_result(ACTION_PACKAGE_CREATE).unwrap_err();
        match err {
            CkanError::CatalogRequest { action, message } => {
                assert_eq!(action, "package_create");
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn envelope_requires_success_flag() {
        assert!(serde_json::from_str::<ActionResponse>("{}").is_err());
        assert!(serde_json::from_str::<ActionResponse>("nope").is_err());
    }

    #[test]
    fn html_body_is_malformed() {
        let url = "https://ckan.example.org/api/3/action/resource_show".to_string();
        let err = parse_body(url.clone(), 502, "<html><body>Bad Gateway</body></html>")
            .unwrap_err();
        match err {
            CkanError::MalformedResponse { url: reported, message } => {
                assert_eq!(reported, url);
                assert!(message.starts_with("status 502"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let parsed = parse_body(url, 200, r#"{"success": true, "result": {"id": "r"}}"#).unwrap();
        assert!(parsed.success);
    }

    #[test]
    fn upload_request_marks_url() {
        let request = ResourceRequest::by_upload(
            "pkg",
            "cities",
            UploadFile {
                path: PathBuf::from("/tmp/cities.csv"),
                file_name: "cities.csv".to_string(),
            },
        )
        .with_field("hash", Some("abc"))
        .with_field("encoding", None);
        assert_eq!(request.fields["url"], UPLOAD_MARKER);
        assert_eq!(request.fields["url_type"], UPLOAD_MARKER);
        assert_eq!(request.fields["hash"], "abc");
        assert!(!request.fields.contains_key("encoding"));
    }

    #[test]
    fn action_urls_are_built_from_host() {
        let connection = CkanConnection {
            host: "https://demo.ckan.org/".to_string(),
            api_key: None,
        };
        let resolver = |raw: &str| -> Result<String, CkanError> { Ok(raw.to_string()) };
        let client = CkanHttpClient::new(&connection, resolver).unwrap();
        assert_eq!(
            client.action_url(ACTION_PACKAGE_CREATE),
            "https://demo.ckan.org/api/3/action/package_create"
        );
    }
}
