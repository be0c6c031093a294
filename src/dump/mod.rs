//! Dataset publisher: pushes a datapackage to CKAN as one or more datasets.
//!
//! Publication is driven by the consumer. The first pull creates the datasets
//! and every resource that carries no rows; each streamed resource is uploaded
//! once its rows have been drained; the publication log, when configured,
//! comes last.

mod dataset;
mod log;
mod resource;
mod session;
mod stream;

use std::rc::Rc;

use tracing::debug;

pub use self::dataset::{
    DatasetOutcome, DatasetPlan, DatasetRef, DatasetTargets, create_or_update, plan_datasets,
};
pub use self::log::{LOG_FIELDS, PublicationLog, PublicationLogEntry, log_resource_descriptor};

use crate::ckan::CkanClient;
use crate::config::DumperParameters;
use crate::datastore::DatastoreClient;
use crate::domain::PackageDescriptor;
use crate::error::CkanError;
use crate::pipeline::ResourceStream;
use session::Session;
use stream::StreamingUpload;

pub struct CkanDumper<C> {
    client: Rc<C>,
    params: DumperParameters,
}

impl<C> CkanDumper<C>
where
    C: CkanClient + DatastoreClient + 'static,
{
    pub fn new(client: Rc<C>, params: DumperParameters) -> Self {
        Self { client, params }
    }

    pub fn params(&self) -> &DumperParameters {
        &self.params
    }

    /// Starts a publication. Nothing reaches the catalog until the returned
    /// iterator is pulled.
    pub fn dump<I>(&self, mut package: PackageDescriptor, inputs: I) -> Publication<C>
    where
        I: IntoIterator<Item = ResourceStream>,
        I::IntoIter: 'static,
    {
        if let Some(name) = self.params.log_resource.as_deref() {
            package.resources.push(log_resource_descriptor(name));
        }
        let session = Session::new(Rc::clone(&self.client), self.params.clone(), package);
        Publication {
            session: Rc::new(session),
            inputs: Box::new(inputs.into_iter()),
            stage: Stage::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Pending,
    Streaming,
    Log,
    Done,
}

/// Output resource streams of one publication, in order: the input streaming
/// resources, then the publication log. Once a failure has been handed to the
/// consumer, the publication yields nothing more.
pub struct Publication<C> {
    session: Rc<Session<C>>,
    inputs: Box<dyn Iterator<Item = ResourceStream>>,
    stage: Stage,
}

impl<C> Publication<C>
where
    C: CkanClient + DatastoreClient + 'static,
{
    /// The descriptor with the statistics gathered so far.
    pub fn package(&self) -> PackageDescriptor {
        self.session.package()
    }

    pub fn log(&self) -> Vec<PublicationLogEntry> {
        self.session.log_entries()
    }

    fn log_stream(&self) -> Option<ResourceStream> {
        let name = self.session.params.log_resource.as_deref()?;
        let spec = self
            .session
            .package()
            .resource(name)
            .cloned()
            .unwrap_or_else(|| log_resource_descriptor(name));

        // Snapshot on first pull so uploads of already drained streams are in.
        let session = Rc::clone(&self.session);
        let mut snapshot = None;
        let rows = std::iter::from_fn(move || {
            snapshot
                .get_or_insert_with(|| session.log_rows().into_iter())
                .next()
                .map(Ok)
        });
        Some(ResourceStream {
            spec,
            rows: Box::new(rows),
        })
    }
}

impl<C> Iterator for Publication<C>
where
    C: CkanClient + DatastoreClient + 'static,
{
    type Item = Result<ResourceStream, CkanError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.session.is_aborted() {
                self.stage = Stage::Done;
            }
            match self.stage {
                Stage::Pending => {
                    self.stage = Stage::Streaming;
                    if let Err(err) = self.session.prepare() {
                        self.stage = Stage::Done;
                        return Some(Err(err));
                    }
                }
                Stage::Streaming => match self.inputs.next() {
                    Some(stream) => {
                        debug!(resource = %stream.spec.name, "streaming resource");
                        let started = StreamingUpload::start(Rc::clone(&self.session), stream);
                        if started.is_err() {
                            self.stage = Stage::Done;
                        }
                        return Some(started);
                    }
                    None => self.stage = Stage::Log,
                },
                Stage::Log => {
                    self.stage = Stage::Done;
                    if let Some(stream) = self.log_stream() {
                        return Some(Ok(stream));
                    }
                }
                Stage::Done => return None,
            }
        }
    }
}
