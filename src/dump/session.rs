use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{info, warn};

use crate::ckan::CkanClient;
use crate::config::DumperParameters;
use crate::domain::{
    PackageDescriptor, ResourceDescriptor, Row, STAT_BYTES, STAT_COUNT_OF_ROWS,
    STAT_DATASET_NAME, STAT_HASH,
};
use crate::dump::dataset::{DatasetRef, DatasetTargets, create_or_update, plan_datasets};
use crate::dump::log::{PublicationLog, PublicationLogEntry};
use crate::dump::resource::publish_reference;
use crate::error::CkanError;

struct State {
    package: PackageDescriptor,
    targets: Option<DatasetTargets>,
    log: PublicationLog,
}

/// Everything one publication shares between its phases and the row streams
/// it hands out.
pub(crate) struct Session<C> {
    pub(crate) client: Rc<C>,
    pub(crate) params: DumperParameters,
    state: RefCell<State>,
    aborted: Cell<bool>,
}

impl<C: CkanClient> Session<C> {
    pub(crate) fn new(client: Rc<C>, params: DumperParameters, package: PackageDescriptor) -> Self {
        Self {
            client,
            params,
            state: RefCell::new(State {
                package,
                targets: None,
                log: PublicationLog::default(),
            }),
            aborted: Cell::new(false),
        }
    }

    pub(crate) fn logging_enabled(&self) -> bool {
        self.params.log_resource.is_some()
    }

    /// Set once a failure has been returned to the consumer; nothing more is
    /// published after that.
    pub(crate) fn is_aborted(&self) -> bool {
        self.aborted.get()
    }

    pub(crate) fn abort(&self) {
        self.aborted.set(true);
    }

    pub(crate) fn package(&self) -> PackageDescriptor {
        self.state.borrow().package.clone()
    }

    pub(crate) fn log_entries(&self) -> Vec<PublicationLogEntry> {
        self.state.borrow().log.entries().to_vec()
    }

    pub(crate) fn log_rows(&self) -> Vec<Row> {
        self.state.borrow().log.rows()
    }

    pub(crate) fn resolve_dataset(&self, resource: &ResourceDescriptor) -> DatasetRef {
        self.state
            .borrow()
            .targets
            .as_ref()
            .map(|targets| targets.resolve(resource))
            .unwrap_or_default()
    }

    /// Applies the failure policy to one create attempt. Successes and, with
    /// logging enabled, recoverable failures are logged and yield `Ok`; every
    /// other failure is returned.
    pub(crate) fn settle<T>(
        &self,
        mut entry: PublicationLogEntry,
        outcome: Result<T, CkanError>,
        fill: impl FnOnce(&mut PublicationLogEntry, &T),
    ) -> Result<Option<T>, CkanError> {
        match outcome {
            Ok(value) => {
                fill(&mut entry, &value);
                self.state.borrow_mut().log.push(entry);
                Ok(Some(value))
            }
            Err(err) if err.is_recoverable() && self.logging_enabled() => {
                warn!(
                    dataset = ?entry.dataset_name,
                    resource = ?entry.resource_name,
                    error = %err,
                    "publication step failed, continuing"
                );
                entry.error = Some(err.to_string());
                self.state.borrow_mut().log.push(entry);
                Ok(None)
            }
            Err(err) => {
                self.abort();
                Err(err)
            }
        }
    }

    pub(crate) fn record_stats(&self, resource: &str, rows: u64, bytes: u64, hash: Option<&str>) {
        let mut state = self.state.borrow_mut();
        if let Some(spec) = state.package.resource_mut(resource) {
            spec.add_to_counter(STAT_COUNT_OF_ROWS, rows);
            spec.add_to_counter(STAT_BYTES, bytes);
            if let Some(hash) = hash {
                spec.set_property(STAT_HASH, hash);
            }
        }
        state.package.add_to_counter(STAT_COUNT_OF_ROWS, rows);
        state.package.add_to_counter(STAT_BYTES, bytes);
    }

    /// Dataset phase followed by the non-streaming resource phase.
    pub(crate) fn prepare(&self) -> Result<(), CkanError> {
        let package = {
            let mut state = self.state.borrow_mut();
            let hash = state.package.content_hash()?;
            state.package.set_property(STAT_HASH, hash);
            state.package.clone()
        };

        let (plans, fan_out) = plan_datasets(&package, &self.params)?;
        let mut ids = HashMap::new();
        for plan in &plans {
            let outcome =
                create_or_update(&*self.client, &plan.fields, self.params.overwrite_existing);
            if let Some(err) = outcome.superseded {
                let mut entry = PublicationLogEntry::for_dataset(&plan.name);
                entry.error = Some(err.to_string());
                self.state.borrow_mut().log.push(entry);
            }
            let id = self.settle(
                PublicationLogEntry::for_dataset(&plan.name),
                outcome.result,
                |entry, id| entry.dataset_id = Some(id.clone()),
            )?;
            ids.insert(plan.name.clone(), id);
        }

        let targets = match (fan_out, plans.first()) {
            (false, Some(plan)) => DatasetTargets::Single {
                name: plan.name.clone(),
                id: ids.remove(&plan.name).flatten(),
            },
            _ => DatasetTargets::FanOut(ids),
        };
        {
            let mut state = self.state.borrow_mut();
            if let DatasetTargets::Single { name, .. } = &targets {
                state.package.set_property(STAT_DATASET_NAME, name.as_str());
            }
            state.targets = Some(targets);
        }

        let references = package
            .resources
            .iter()
            .filter(|resource| !resource.streaming);
        for resource in references {
            publish_reference(self, resource)?;
        }
        info!(
            datasets = plans.len(),
            fan_out, "dataset and reference resources published"
        );
        Ok(())
    }
}
