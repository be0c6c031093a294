//! Conversion of a datapackage descriptor into the fields of a CKAN dataset.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value, json};

use crate::domain::{
    PackageDescriptor, STAT_BYTES, STAT_COUNT_OF_ROWS, STAT_DATASET_NAME, STAT_HASH,
};
use crate::error::CkanError;

// Descriptor keys with a dedicated dataset field; every other top-level key
// ends up in `extras`.
const MAPPED_KEYS: &[&str] = &[
    "title",
    "description",
    "version",
    "homepage",
    "license",
    "licenses",
    "author",
    "maintainer",
    "contributors",
    "keywords",
];

// Publication statistics stay on the descriptor and never become extras.
const STAT_KEYS: &[&str] = &[STAT_HASH, STAT_COUNT_OF_ROWS, STAT_BYTES, STAT_DATASET_NAME];

static PERSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(.*?)\s*<([^>]+)>\s*$").expect("person pattern is valid"));

/// Dataset fields every dataset starts from.
pub fn default_dataset(name: &str) -> Map<String, Value> {
    let mut dataset = Map::new();
    dataset.insert("name".to_string(), json!(name));
    dataset.insert("title".to_string(), json!(""));
    dataset.insert("notes".to_string(), json!(""));
    dataset.insert("author".to_string(), json!(""));
    dataset.insert("state".to_string(), json!("active"));
    dataset.insert("private".to_string(), json!(false));
    dataset
}

pub fn package_to_dataset(package: &PackageDescriptor) -> Result<Map<String, Value>, CkanError> {
    let name = package
        .name
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| CkanError::Descriptor("datapackage has no name".to_string()))?;
    let props = &package.properties;
    let mut dataset = default_dataset(name);

    copy_string(props, "title", &mut dataset, "title");
    copy_string(props, "description", &mut dataset, "notes");
    copy_string(props, "version", &mut dataset, "version");
    copy_string(props, "homepage", &mut dataset, "url");

    let license = props
        .get("licenses")
        .and_then(Value::as_array)
        .and_then(|licenses| licenses.first())
        .or_else(|| props.get("license"));
    if let Some(license) = license {
        apply_license(license, &mut dataset);
    }

    if let Some(author) = props.get("author") {
        apply_person(author, "author", &mut dataset);
    }
    if let Some(maintainer) = props.get("maintainer") {
        apply_person(maintainer, "maintainer", &mut dataset);
    }
    if let Some(contributors) = props.get("contributors").and_then(Value::as_array) {
        for contributor in contributors {
            match contributor.get("role").and_then(Value::as_str) {
                Some("author") => apply_person(contributor, "author", &mut dataset),
                Some("maintainer") => apply_person(contributor, "maintainer", &mut dataset),
                _ => {}
            }
        }
    }

    if let Some(keywords) = props.get("keywords").and_then(Value::as_array) {
        let tags: Vec<Value> = keywords
            .iter()
            .filter_map(Value::as_str)
            .map(|keyword| json!({ "name": keyword }))
            .collect();
        if !tags.is_empty() {
            dataset.insert("tags".to_string(), Value::Array(tags));
        }
    }

    let extras: Vec<Value> = props
        .iter()
        .filter(|(key, _)| {
            !MAPPED_KEYS.contains(&key.as_str()) && !STAT_KEYS.contains(&key.as_str())
        })
        .map(|(key, value)| json!({ "key": key, "value": extra_value(value) }))
        .collect();
    if !extras.is_empty() {
        dataset.insert("extras".to_string(), Value::Array(extras));
    }

    Ok(dataset)
}

fn copy_string(from: &Map<String, Value>, key: &str, to: &mut Map<String, Value>, target: &str) {
    if let Some(value) = from.get(key).and_then(Value::as_str) {
        to.insert(target.to_string(), json!(value));
    }
}

fn apply_license(license: &Value, dataset: &mut Map<String, Value>) {
    match license {
        Value::String(id) => {
            dataset.insert("license_id".to_string(), json!(id));
        }
        Value::Object(fields) => {
            let id = fields
                .get("name")
                .or_else(|| fields.get("id"))
                .and_then(Value::as_str);
            if let Some(id) = id {
                dataset.insert("license_id".to_string(), json!(id));
            }
            if let Some(title) = fields.get("title").and_then(Value::as_str) {
                dataset.insert("license_title".to_string(), json!(title));
            }
        }
        _ => {}
    }
}

/// People are either `"Name <email>"` strings or objects with `name`/`title`
/// and `email`.
fn apply_person(person: &Value, role: &str, dataset: &mut Map<String, Value>) {
    let (name, email) = match person {
        Value::String(text) => match PERSON.captures(text) {
            Some(caps) => (
                caps.get(1).map(|m| m.as_str().to_string()),
                caps.get(2).map(|m| m.as_str().to_string()),
            ),
            None => (Some(text.trim().to_string()), None),
        },
        Value::Object(fields) => (
            fields
                .get("name")
                .or_else(|| fields.get("title"))
                .and_then(Value::as_str)
                .map(str::to_string),
            fields
                .get("email")
                .and_then(Value::as_str)
                .map(str::to_string),
        ),
        _ => (None, None),
    };
    if let Some(name) = name {
        dataset.insert(role.to_string(), json!(name));
    }
    if let Some(email) = email {
        dataset.insert(format!("{role}_email"), json!(email));
    }
}

fn extra_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_package_gets_defaults() {
        let mut package = PackageDescriptor::new("my-datapackage");
        package.set_property("project", "my-project");
        let dataset = package_to_dataset(&package).unwrap();

        assert_eq!(dataset["name"], "my-datapackage");
        assert_eq!(dataset["title"], "");
        assert_eq!(dataset["notes"], "");
        assert_eq!(dataset["author"], "");
        assert_eq!(dataset["state"], "active");
        assert_eq!(dataset["private"], false);
        assert_eq!(
            dataset["extras"],
            json!([{"key": "project", "value": "my-project"}])
        );
        assert!(dataset.get("resources").is_none());
    }

    #[test]
    fn descriptor_metadata_is_mapped() {
        let package = PackageDescriptor::from_value(json!({
            "name": "spend",
            "title": "Council spend",
            "description": "Monthly spend over 500",
            "homepage": "https://example.com",
            "version": "1.0",
            "licenses": [{"name": "odc-pddl", "title": "Open Data Commons"}],
            "author": "Jane Doe <jane@example.com>",
            "contributors": [{"title": "Ops", "email": "ops@example.com", "role": "maintainer"}],
            "keywords": ["finance", "council"],
            "resources": []
        }))
        .unwrap();
        let dataset = package_to_dataset(&package).unwrap();

        assert_eq!(dataset["title"], "Council spend");
        assert_eq!(dataset["notes"], "Monthly spend over 500");
        assert_eq!(dataset["url"], "https://example.com");
        assert_eq!(dataset["license_id"], "odc-pddl");
        assert_eq!(dataset["license_title"], "Open Data Commons");
        assert_eq!(dataset["author"], "Jane Doe");
        assert_eq!(dataset["author_email"], "jane@example.com");
        assert_eq!(dataset["maintainer"], "Ops");
        assert_eq!(dataset["maintainer_email"], "ops@example.com");
        assert_eq!(dataset["tags"], json!([{"name": "finance"}, {"name": "council"}]));
        assert!(dataset.get("extras").is_none());
    }

    #[test]
    fn statistics_are_not_extras() {
        let mut package = PackageDescriptor::new("spend");
        package.set_property(STAT_HASH, "0cc175b9c0f1b6a831c399e269772661");
        package.set_property(STAT_DATASET_NAME, "spend");
        package.add_to_counter(STAT_COUNT_OF_ROWS, 3);
        package.add_to_counter(STAT_BYTES, 120);
        package.set_property("project", "p");
        let dataset = package_to_dataset(&package).unwrap();

        assert_eq!(dataset["extras"], json!([{"key": "project", "value": "p"}]));
    }

    #[test]
    fn package_without_name_is_rejected() {
        let err = package_to_dataset(&PackageDescriptor::default()).unwrap_err();
        assert!(matches!(err, CkanError::Descriptor(_)));
    }
}
