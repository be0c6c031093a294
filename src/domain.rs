use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::CkanError;

/// Path given to resources whose data is not stored locally yet.
pub const PATH_PLACEHOLDER: &str = "_";
pub const PROP_STREAMED_FROM: &str = "dpp:streamedFrom";
pub const PROP_STREAMING: &str = "dpp:streaming";

pub const STAT_COUNT_OF_ROWS: &str = "count_of_rows";
pub const STAT_BYTES: &str = "bytes";
pub const STAT_HASH: &str = "hash";
pub const STAT_DATASET_NAME: &str = "dataset_name";

pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub resources: Vec<ResourceDescriptor>,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl PackageDescriptor {
    pub fn new(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn from_value(value: Value) -> Result<Self, CkanError> {
        serde_json::from_value(value).map_err(|err| CkanError::Descriptor(err.to_string()))
    }

    pub fn to_value(&self) -> Result<Value, CkanError> {
        serde_json::to_value(self).map_err(|err| CkanError::Descriptor(err.to_string()))
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceDescriptor> {
        self.resources.iter().find(|resource| resource.name == name)
    }

    pub fn resource_mut(&mut self, name: &str) -> Option<&mut ResourceDescriptor> {
        self.resources
            .iter_mut()
            .find(|resource| resource.name == name)
    }

    pub fn set_property(&mut self, key: &str, value: impl Into<Value>) {
        self.properties.insert(key.to_string(), value.into());
    }

    pub fn add_to_counter(&mut self, key: &str, amount: u64) {
        add_to_counter(&mut self.properties, key, amount);
    }

    /// MD5 of the descriptor's JSON form. Serialization order is deterministic,
    /// so equal descriptors give equal digests.
    pub fn content_hash(&self) -> Result<String, CkanError> {
        let bytes =
            serde_json::to_vec(self).map_err(|err| CkanError::Descriptor(err.to_string()))?;
        Ok(format!("{:x}", md5::compute(bytes)))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(
        rename = "dpp:streamedFrom",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub streamed_from: Option<String>,
    #[serde(rename = "dpp:streaming", default, skip_serializing_if = "is_false")]
    pub streaming: bool,
    #[serde(
        rename = "dataset-name",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub dataset_name: Option<String>,
    #[serde(
        rename = "dataset-resource-name",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub dataset_resource_name: Option<String>,
    #[serde(
        rename = "dataset-properties",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub dataset_properties: Option<Map<String, Value>>,
    #[serde(
        default,
        deserialize_with = "lenient_schema",
        skip_serializing_if = "Option::is_none"
    )]
    pub schema: Option<TableSchema>,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl ResourceDescriptor {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn from_map(map: Map<String, Value>) -> Result<Self, CkanError> {
        serde_json::from_value(Value::Object(map))
            .map_err(|err| CkanError::Descriptor(err.to_string()))
    }

    /// Name the resource carries on the catalog side.
    pub fn catalog_name(&self) -> &str {
        self.dataset_resource_name.as_deref().unwrap_or(&self.name)
    }

    /// Name of the catalog dataset this resource declares through its own
    /// `dataset-properties` block.
    pub fn declared_dataset(&self) -> Option<&str> {
        self.dataset_properties
            .as_ref()
            .and_then(|props| props.get("name"))
            .and_then(Value::as_str)
    }

    pub fn owning_dataset(&self) -> Option<&str> {
        self.dataset_name.as_deref().or_else(|| self.declared_dataset())
    }

    pub fn set_property(&mut self, key: &str, value: impl Into<Value>) {
        self.properties.insert(key.to_string(), value.into());
    }

    pub fn add_to_counter(&mut self, key: &str, amount: u64) {
        add_to_counter(&mut self.properties, key, amount);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    #[serde(default)]
    pub fields: Vec<SchemaField>,
    #[serde(rename = "primaryKey", default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<Value>,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl TableSchema {
    pub fn from_field_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: names
                .into_iter()
                .map(|name| SchemaField::new(&name.into(), "string"))
                .collect(),
            ..Self::default()
        }
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|field| field.name.clone()).collect()
    }

    /// `primaryKey` may be a single field name or a list of them.
    pub fn primary_key_fields(&self) -> Vec<String> {
        match &self.primary_key {
            Some(Value::String(name)) => vec![name.clone()],
            Some(Value::Array(names)) => names
                .iter()
                .filter_map(|name| name.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl SchemaField {
    pub fn new(name: &str, field_type: &str) -> Self {
        Self {
            name: name.to_string(),
            field_type: field_type.to_string(),
            properties: Map::new(),
        }
    }
}

/// Catalogs hand out `schema` as an object, as a JSON-encoded string, or as an
/// empty string. Anything that is not a usable object is treated as absent.
fn lenient_schema<'de, D>(deserializer: D) -> Result<Option<TableSchema>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = match Value::deserialize(deserializer)? {
        Value::String(text) => match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(_) => return Ok(None),
        },
        value => value,
    };
    match value {
        Value::Object(_) => serde_json::from_value(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

fn default_field_type() -> String {
    "string".to_string()
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn add_to_counter(properties: &mut Map<String, Value>, key: &str, amount: u64) {
    let current = properties.get(key).and_then(Value::as_u64).unwrap_or(0);
    properties.insert(key.to_string(), Value::from(current + amount));
}

static SLUG_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("slug pattern is valid"));

/// Lower-case, URL and filesystem safe form of `text`: runs of anything other
/// than ASCII letters and digits collapse into a single `-`.
pub fn slugify(text: &str) -> String {
    let lowered = text.to_lowercase();
    SLUG_SEPARATORS
        .replace_all(&lowered, "-")
        .trim_matches('-')
        .to_string()
}
