//! Resource enricher: looks up an existing CKAN resource and appends it to the
//! in-flight datapackage as a resource streamed from the catalog's URL.

use serde_json::{Map, Value};
use tracing::{error, info};

use crate::ckan::{ACTION_RESOURCE_SHOW, CkanClient, CkanFailure};
use crate::config::EnricherParameters;
use crate::domain::{
    PATH_PLACEHOLDER, PROP_STREAMED_FROM, PackageDescriptor, ResourceDescriptor, slugify,
};
use crate::error::CkanError;
use crate::pipeline::{ProcessorOutput, ResourceStreams};

pub struct ResourceEnricher<C: CkanClient> {
    client: C,
}

impl<C: CkanClient> ResourceEnricher<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Appends the enriched resource to `package`; row streams pass through
    /// untouched.
    pub fn process(
        &self,
        params: &EnricherParameters,
        mut package: PackageDescriptor,
        resources: ResourceStreams,
    ) -> Result<ProcessorOutput, CkanError> {
        self.enrich(params, &mut package)?;
        Ok(ProcessorOutput { package, resources })
    }

    pub fn enrich(
        &self,
        params: &EnricherParameters,
        package: &mut PackageDescriptor,
    ) -> Result<(), CkanError> {
        let record = self.fetch_resource(&params.resource_id)?;
        let resource = normalize_resource(record, &params.overrides)?;
        info!(resource = %resource.name, id = %params.resource_id, "added CKAN resource");
        package.resources.push(resource);
        Ok(())
    }

    pub fn fetch_resource(&self, resource_id: &str) -> Result<Map<String, Value>, CkanError> {
        let response = self.client.resource_show(resource_id)?;
        match response.failure() {
            Some(CkanFailure::NotFound) => {
                error!(resource_id, "CKAN resource not found");
            }
            Some(_) => {
                let details = response.error.as_ref().map(Value::to_string);
                error!(resource_id, error = ?details, "CKAN returned an error");
            }
            None => {}
        }
        match response.into_result(ACTION_RESOURCE_SHOW)? {
            Value::Object(record) => Ok(record),
            other => Err(CkanError::MalformedResponse {
                url: ACTION_RESOURCE_SHOW.to_string(),
                message: format!("expected a resource object, got {other}"),
            }),
        }
    }
}

/// Turns a CKAN resource record into a pipeline resource descriptor and
/// overlays the caller's parameters on top.
pub fn normalize_resource(
    mut record: Map<String, Value>,
    overrides: &Map<String, Value>,
) -> Result<ResourceDescriptor, CkanError> {
    let name = match record.get("name") {
        Some(Value::String(name)) => Some(name.clone()),
        _ => record.get("id").and_then(Value::as_str).map(str::to_string),
    };
    if let Some(name) = name {
        if !record.get("title").is_some_and(Value::is_string) {
            record.insert("title".to_string(), Value::from(name.as_str()));
        }
        record.insert("name".to_string(), Value::from(slugify(&name)));
    }

    if let Some(Value::String(format)) = record.get("format") {
        let lowered = format.to_lowercase();
        record.insert("format".to_string(), Value::from(lowered));
    }

    if let Some(url) = record.remove("url") {
        record.insert("path".to_string(), Value::from(PATH_PLACEHOLDER));
        record.insert(PROP_STREAMED_FROM.to_string(), url);
    }

    // The catalog's hash describes its copy, not what the pipeline will stream.
    record.remove("hash");

    for (key, value) in overrides {
        record.insert(key.clone(), value.clone());
    }

    ResourceDescriptor::from_map(record)
}
