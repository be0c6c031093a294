use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::CkanError;

/// Prefix marking a value to be looked up in the environment at use time.
pub const ENV_PREFIX: &str = "env:";

pub const PARAM_CKAN_HOST: &str = "ckan-host";
pub const PARAM_CKAN_API_KEY: &str = "ckan-api-key";
pub const PARAM_RESOURCE_ID: &str = "resource-id";

/// Resolves raw host / API key values, which may be literal or indirect.
pub trait ValueResolver {
    fn resolve(&self, raw: &str) -> Result<String, CkanError>;
}

impl<F> ValueResolver for F
where
    F: Fn(&str) -> Result<String, CkanError>,
{
    fn resolve(&self, raw: &str) -> Result<String, CkanError> {
        self(raw)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvResolver;

impl ValueResolver for EnvResolver {
    fn resolve(&self, raw: &str) -> Result<String, CkanError> {
        match raw.strip_prefix(ENV_PREFIX) {
            Some(name) => std::env::var(name).map_err(|_| {
                CkanError::Configuration(format!("environment variable {name} is not set"))
            }),
            None => Ok(raw.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatastoreMethod {
    #[default]
    Insert,
    Upsert,
    Update,
}

impl DatastoreMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatastoreMethod::Insert => "insert",
            DatastoreMethod::Upsert => "upsert",
            DatastoreMethod::Update => "update",
        }
    }
}

impl fmt::Display for DatastoreMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatastoreMethod {
    type Err = CkanError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "insert" => Ok(DatastoreMethod::Insert),
            "upsert" => Ok(DatastoreMethod::Upsert),
            "update" => Ok(DatastoreMethod::Update),
            other => Err(CkanError::Configuration(format!(
                "push_resources_to_datastore_method must be one of insert, upsert, update (got {other})"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    #[default]
    Csv,
    Json,
}

impl ArtifactFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArtifactFormat::Csv => "csv",
            ArtifactFormat::Json => "json",
        }
    }
}

impl fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ArtifactFormat {
    type Err = CkanError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "csv" => Ok(ArtifactFormat::Csv),
            "json" => Ok(ArtifactFormat::Json),
            other => Err(CkanError::Configuration(format!(
                "unsupported artifact format: {other}"
            ))),
        }
    }
}

/// Catalog connection settings shared by both processors, still unresolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CkanConnection {
    pub host: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnricherParameters {
    pub connection: CkanConnection,
    pub resource_id: String,
    /// Everything else the caller passed; overlaid onto the fetched resource.
    pub overrides: Map<String, Value>,
}

impl EnricherParameters {
    pub fn from_map(mut params: Map<String, Value>) -> Result<Self, CkanError> {
        let host = take_string(&mut params, PARAM_CKAN_HOST)?
            .ok_or_else(|| missing(PARAM_CKAN_HOST))?;
        let api_key = take_string(&mut params, PARAM_CKAN_API_KEY)?;
        let resource_id = take_string(&mut params, PARAM_RESOURCE_ID)?
            .ok_or_else(|| missing(PARAM_RESOURCE_ID))?;
        Ok(Self {
            connection: CkanConnection { host, api_key },
            resource_id,
            overrides: params,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawDumperParameters {
    #[serde(rename = "ckan-host")]
    ckan_host: String,
    #[serde(rename = "ckan-api-key", default)]
    ckan_api_key: Option<String>,
    #[serde(rename = "dataset-properties", default)]
    dataset_properties: Option<Map<String, Value>>,
    #[serde(default)]
    overwrite_existing: bool,
    #[serde(default)]
    push_resources_to_datastore: bool,
    #[serde(default)]
    push_resources_to_datastore_method: Option<String>,
    #[serde(rename = "log-resource", default)]
    log_resource: Option<String>,
    #[serde(default)]
    format: Option<String>,
    #[serde(rename = "force-format", default = "default_true")]
    force_format: bool,
    #[serde(rename = "resource-hash", default = "default_true")]
    resource_hash: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DumperParameters {
    pub connection: CkanConnection,
    pub dataset_properties: Map<String, Value>,
    pub overwrite_existing: bool,
    pub push_to_datastore: bool,
    pub datastore_method: DatastoreMethod,
    pub log_resource: Option<String>,
    pub format: ArtifactFormat,
    pub force_format: bool,
    pub resource_hash: bool,
}

impl DumperParameters {
    pub fn new(host: &str) -> Self {
        Self {
            connection: CkanConnection {
                host: host.to_string(),
                api_key: None,
            },
            dataset_properties: Map::new(),
            overwrite_existing: false,
            push_to_datastore: false,
            datastore_method: DatastoreMethod::Insert,
            log_resource: None,
            format: ArtifactFormat::Csv,
            force_format: true,
            resource_hash: true,
        }
    }

    pub fn from_map(params: Map<String, Value>) -> Result<Self, CkanError> {
        let raw: RawDumperParameters = serde_json::from_value(Value::Object(params))
            .map_err(|err| CkanError::Configuration(err.to_string()))?;
        let datastore_method = raw
            .push_resources_to_datastore_method
            .as_deref()
            .map(str::parse)
            .transpose()?
            .unwrap_or_default();
        let format = raw
            .format
            .as_deref()
            .map(str::parse)
            .transpose()?
            .unwrap_or_default();
        if let Some(name) = raw.log_resource.as_deref() {
            if name.trim().is_empty() {
                return Err(CkanError::Configuration(
                    "log-resource must not be empty".to_string(),
                ));
            }
        }

        Ok(Self {
            connection: CkanConnection {
                host: raw.ckan_host,
                api_key: raw.ckan_api_key,
            },
            dataset_properties: raw.dataset_properties.unwrap_or_default(),
            overwrite_existing: raw.overwrite_existing,
            push_to_datastore: raw.push_resources_to_datastore,
            datastore_method,
            log_resource: raw.log_resource,
            format,
            force_format: raw.force_format,
            resource_hash: raw.resource_hash,
        })
    }

    /// Format a resource's artifact is written in.
    pub fn artifact_format(&self, resource_format: Option<&str>) -> ArtifactFormat {
        if self.force_format {
            return self.format;
        }
        resource_format
            .and_then(|value| value.parse().ok())
            .unwrap_or(self.format)
    }
}

fn default_true() -> bool {
    true
}

fn missing(key: &str) -> CkanError {
    CkanError::Configuration(format!("missing required parameter {key}"))
}

fn take_string(params: &mut Map<String, Value>, key: &str) -> Result<Option<String>, CkanError> {
    match params.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value)),
        Some(other) => Err(CkanError::Configuration(format!(
            "parameter {key} must be a string, got {other}"
        ))),
    }
}

pub struct ParametersLoader;

impl ParametersLoader {
    pub fn load_map(path: &Path) -> Result<Map<String, Value>, CkanError> {
        Self::load(path)
    }

    pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T, CkanError> {
        let content = fs::read_to_string(path)
            .map_err(|_| CkanError::ParametersRead(PathBuf::from(path)))?;
        serde_json::from_str(&content).map_err(|err| CkanError::ParametersParse(err.to_string()))
    }
}
