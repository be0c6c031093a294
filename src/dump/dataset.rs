use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::info;

use crate::ckan::{ACTION_PACKAGE_CREATE, ACTION_PACKAGE_UPDATE, CkanClient, CkanFailure};
use crate::config::DumperParameters;
use crate::convert::{default_dataset, package_to_dataset};
use crate::domain::{PackageDescriptor, ResourceDescriptor};
use crate::error::CkanError;

/// Fields of one catalog dataset about to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetPlan {
    pub name: String,
    pub fields: Map<String, Value>,
}

/// Where resources get attached once the dataset phase has run.
#[derive(Debug, Clone, PartialEq)]
pub enum DatasetTargets {
    Single { name: String, id: Option<String> },
    FanOut(HashMap<String, Option<String>>),
}

/// The dataset a resource resolved to. `id` is absent when the dataset does
/// not exist on the catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetRef {
    pub name: Option<String>,
    pub id: Option<String>,
}

impl DatasetTargets {
    pub fn is_fan_out(&self) -> bool {
        matches!(self, DatasetTargets::FanOut(_))
    }

    pub fn resolve(&self, resource: &ResourceDescriptor) -> DatasetRef {
        match self {
            DatasetTargets::Single { name, id } => DatasetRef {
                name: Some(name.clone()),
                id: id.clone(),
            },
            DatasetTargets::FanOut(ids) => match resource.owning_dataset() {
                Some(name) => DatasetRef {
                    name: Some(name.to_string()),
                    id: ids.get(name).cloned().flatten(),
                },
                None => DatasetRef::default(),
            },
        }
    }
}

/// Derives the datasets a package publishes to. A package whose resources
/// declare `dataset-properties.name` fans out into one dataset per distinct
/// name, in order of first appearance.
pub fn plan_datasets(
    package: &PackageDescriptor,
    params: &DumperParameters,
) -> Result<(Vec<DatasetPlan>, bool), CkanError> {
    let declared: Vec<(&str, &Map<String, Value>)> = package
        .resources
        .iter()
        .filter_map(|resource| {
            let name = resource.declared_dataset()?;
            Some((name, resource.dataset_properties.as_ref()?))
        })
        .collect();

    if declared.is_empty() {
        let mut fields = package_to_dataset(package)?;
        overlay(&mut fields, &params.dataset_properties);
        let name = dataset_name(&fields)?;
        return Ok((vec![DatasetPlan { name, fields }], false));
    }

    let mut plans: Vec<DatasetPlan> = Vec::new();
    for (name, block) in declared {
        match plans.iter_mut().find(|plan| plan.name == name) {
            Some(plan) => overlay(&mut plan.fields, block),
            None => {
                let mut fields = default_dataset(name);
                overlay(&mut fields, &params.dataset_properties);
                overlay(&mut fields, block);
                plans.push(DatasetPlan {
                    name: name.to_string(),
                    fields,
                });
            }
        }
    }
    Ok((plans, true))
}

/// Outcome of publishing one dataset. `superseded` holds the failed create
/// that an update replaced.
#[derive(Debug)]
pub struct DatasetOutcome {
    pub superseded: Option<CkanError>,
    pub result: Result<String, CkanError>,
}

/// Creates the dataset, falling back to an update with the same payload when
/// the name is taken and `overwrite` is set. The result carries the dataset id.
pub fn create_or_update<C>(
    client: &C,
    fields: &Map<String, Value>,
    overwrite: bool,
) -> DatasetOutcome
where
    C: CkanClient + ?Sized,
{
    let name = fields.get("name").and_then(Value::as_str).unwrap_or_default();
    let response = match client.package_create(fields) {
        Ok(response) => response,
        Err(err) => {
            return DatasetOutcome {
                superseded: None,
                result: Err(err),
            };
        }
    };
    if overwrite && response.failure() == Some(CkanFailure::DuplicateName) {
        info!(dataset = name, "dataset exists, updating");
        let superseded = response.into_result(ACTION_PACKAGE_CREATE).err();
        let result = client
            .package_update(fields)
            .and_then(|response| response.into_id(ACTION_PACKAGE_UPDATE));
        if let Ok(id) = &result {
            info!(dataset = name, id = %id, "updated dataset");
        }
        return DatasetOutcome { superseded, result };
    }
    let result = response.into_id(ACTION_PACKAGE_CREATE);
    if let Ok(id) = &result {
        info!(dataset = name, id = %id, "created dataset");
    }
    DatasetOutcome {
        superseded: None,
        result,
    }
}

fn overlay(fields: &mut Map<String, Value>, with: &Map<String, Value>) {
    for (key, value) in with {
        fields.insert(key.clone(), value.clone());
    }
}

fn dataset_name(fields: &Map<String, Value>) -> Result<String, CkanError> {
    fields
        .get("name")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CkanError::Descriptor("dataset has no name".to_string()))
}
