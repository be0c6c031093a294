use std::path::Path;

use serde_json::Value;
use tracing::info;

use crate::ckan::{ACTION_RESOURCE_CREATE, CkanClient, ResourceRequest, UploadFile};
use crate::domain::ResourceDescriptor;
use crate::dump::log::PublicationLogEntry;
use crate::dump::session::Session;
use crate::error::CkanError;

pub(crate) fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Fills a log entry from a `resource_create` result.
pub(crate) fn record_created(entry: &mut PublicationLogEntry, result: &Value) {
    entry.resource_id = result.get("id").and_then(Value::as_str).map(str::to_string);
    if entry.resource_url.is_none() {
        entry.resource_url = result.get("url").and_then(Value::as_str).map(str::to_string);
    }
}

/// Publishes a resource that carries no rows: by URL when it points at a
/// remote location, otherwise by uploading the local file it names.
pub(crate) fn publish_reference<C: CkanClient>(
    session: &Session<C>,
    resource: &ResourceDescriptor,
) -> Result<(), CkanError> {
    let name = resource.catalog_name();
    let target = session.resolve_dataset(resource);
    let mut entry =
        PublicationLogEntry::for_resource(target.name.as_deref(), target.id.as_deref(), name);

    let Some(package_id) = target.id.as_deref() else {
        let missing: Result<(), _> = Err(CkanError::NoRelatedDataset {
            resource: resource.name.clone(),
        });
        session.settle(entry, missing, |_, _| {})?;
        return Ok(());
    };
    let source = resource.streamed_from.as_deref().ok_or_else(|| {
        CkanError::Descriptor(format!(
            "resource {} is not streamed and has no dpp:streamedFrom",
            resource.name
        ))
    })?;

    let request = if is_remote(source) {
        entry.resource_url = Some(source.to_string());
        ResourceRequest::by_reference(package_id, source, name, resource.format.as_deref())
    } else {
        let path = Path::new(source);
        let file_name = path
            .file_name()
            .map(|file_name| file_name.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());
        entry.resource_file = Some(file_name.clone());
        let upload = UploadFile {
            path: path.to_path_buf(),
            file_name,
        };
        ResourceRequest::by_upload(package_id, name, upload)
            .with_field("format", resource.format.as_deref())
    };

    let outcome = session
        .client
        .resource_create(&request)
        .and_then(|response| response.into_result(ACTION_RESOURCE_CREATE));
    if session.settle(entry, outcome, record_created)?.is_some() {
        info!(resource = name, dataset = package_id, "created resource");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_http_locations_are_remote() {
        assert!(is_remote("https://example.com/a.csv"));
        assert!(is_remote("http://example.com/a.csv"));
        assert!(!is_remote("/data/a.csv"));
        assert!(!is_remote("data/https.csv"));
    }

    #[test]
    fn created_resource_fills_entry() {
        let mut entry = PublicationLogEntry::for_resource(Some("ds"), Some("1"), "a");
        record_created(&mut entry, &json!({"id": "r1", "url": "https://ckan/a.csv"}));
        assert_eq!(entry.resource_id.as_deref(), Some("r1"));
        assert_eq!(entry.resource_url.as_deref(), Some("https://ckan/a.csv"));
    }
}
