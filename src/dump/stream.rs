use std::rc::Rc;

use serde_json::Value;
use tracing::{debug, info};

use crate::artifact::{ArtifactWriter, FinishedArtifact};
use crate::ckan::{ACTION_RESOURCE_CREATE, CkanClient, ResourceRequest, UploadFile};
use crate::datastore::{self, DatastoreClient};
use crate::domain::{ResourceDescriptor, Row, TableSchema};
use crate::dump::dataset::DatasetRef;
use crate::dump::log::PublicationLogEntry;
use crate::dump::resource::record_created;
use crate::dump::session::Session;
use crate::error::CkanError;
use crate::pipeline::{ResourceStream, Rows};

/// Tee over a streaming resource: rows are forwarded unchanged and copied into
/// a temporary artifact, which is uploaded once the stream runs dry.
pub(crate) struct StreamingUpload<C> {
    session: Rc<Session<C>>,
    spec: ResourceDescriptor,
    rows: Rows,
    target: DatasetRef,
    artifact: Option<ArtifactWriter>,
}

impl<C> StreamingUpload<C>
where
    C: CkanClient + DatastoreClient + 'static,
{
    pub(crate) fn start(
        session: Rc<Session<C>>,
        stream: ResourceStream,
    ) -> Result<ResourceStream, CkanError> {
        let ResourceStream { spec, rows } = stream;
        let target = session.resolve_dataset(&spec);
        if target.id.is_none() {
            let entry = PublicationLogEntry::for_resource(
                target.name.as_deref(),
                None,
                spec.catalog_name(),
            );
            let missing: Result<(), _> = Err(CkanError::NoRelatedDataset {
                resource: spec.name.clone(),
            });
            session.settle(entry, missing, |_, _| {})?;
        }

        let format = session.params.artifact_format(spec.format.as_deref());
        let columns = spec.schema.as_ref().map(TableSchema::field_names);
        let artifact = ArtifactWriter::create(&spec.name, format, columns)?;
        debug!(resource = %spec.name, path = %artifact.path().display(), "writing artifact");

        let upload = Self {
            session,
            spec: spec.clone(),
            rows,
            target,
            artifact: Some(artifact),
        };
        Ok(ResourceStream {
            spec,
            rows: Box::new(upload),
        })
    }

    fn finish(&mut self) -> Result<(), CkanError> {
        let Some(writer) = self.artifact.take() else {
            return Ok(());
        };
        let artifact = writer.finalize()?;
        let hash = if self.session.params.resource_hash {
            Some(artifact.md5()?)
        } else {
            None
        };
        self.session
            .record_stats(&self.spec.name, artifact.rows, artifact.bytes, hash.as_deref());

        if let Some(package_id) = self.target.id.as_deref() {
            self.publish(package_id, &artifact, hash.as_deref())?;
        }
        artifact.close()
    }

    fn publish(
        &self,
        package_id: &str,
        artifact: &FinishedArtifact,
        hash: Option<&str>,
    ) -> Result<(), CkanError> {
        let name = self.spec.catalog_name();
        let extension = artifact.format.extension();
        let file_name = format!("{}.{extension}", self.spec.name);
        let upload = UploadFile {
            path: artifact.path().to_path_buf(),
            file_name: file_name.clone(),
        };
        let request = ResourceRequest::by_upload(package_id, name, upload)
            .with_field("hash", hash)
            .with_field("encoding", self.spec.encoding.as_deref())
            .with_field("format", Some(extension));

        let mut entry = PublicationLogEntry::for_resource(
            self.target.name.as_deref(),
            Some(package_id),
            name,
        );
        entry.resource_file = Some(file_name);
        let outcome = self
            .session
            .client
            .resource_create(&request)
            .and_then(|response| response.into_result(ACTION_RESOURCE_CREATE));
        let Some(created) = self.session.settle(entry, outcome, record_created)? else {
            return Ok(());
        };
        info!(
            resource = name,
            rows = artifact.rows,
            bytes = artifact.bytes,
            "uploaded resource"
        );

        if self.session.params.push_to_datastore {
            let resource_id = created
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| CkanError::MalformedResponse {
                    url: ACTION_RESOURCE_CREATE.to_string(),
                    message: "result has no id".to_string(),
                })?;
            datastore::push_artifact(
                &*self.session.client,
                resource_id,
                self.spec.schema.as_ref(),
                artifact.path(),
                artifact.format,
                self.session.params.datastore_method,
            )?;
        }
        Ok(())
    }
}

impl<C> Iterator for StreamingUpload<C>
where
    C: CkanClient + DatastoreClient + 'static,
{
    type Item = Result<Row, CkanError>;

    fn next(&mut self) -> Option<Self::Item> {
        let artifact = self.artifact.as_mut()?;
        let failure = match self.rows.next() {
            Some(Ok(row)) => match artifact.write_row(&row) {
                Ok(()) => return Some(Ok(row)),
                Err(err) => err,
            },
            Some(Err(err)) => err,
            None => self.finish().err()?,
        };
        self.artifact = None;
        self.session.abort();
        Some(Err(failure))
    }
}
