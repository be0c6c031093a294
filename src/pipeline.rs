//! Contract with the pipeline runtime: a processor receives a package
//! descriptor and the row streams of its streaming resources, and hands back a
//! descriptor plus row streams. Streams are lazy; the runtime pulls them.

use crate::domain::{PackageDescriptor, ResourceDescriptor, Row};
use crate::error::CkanError;

pub type Rows = Box<dyn Iterator<Item = Result<Row, CkanError>>>;

pub type ResourceStreams = Box<dyn Iterator<Item = Result<ResourceStream, CkanError>>>;

pub struct ResourceStream {
    pub spec: ResourceDescriptor,
    pub rows: Rows,
}

impl ResourceStream {
    pub fn new<I>(spec: ResourceDescriptor, rows: I) -> Self
    where
        I: IntoIterator<Item = Row>,
        I::IntoIter: 'static,
    {
        Self {
            spec,
            rows: Box::new(rows.into_iter().map(Ok)),
        }
    }

    pub fn from_results<I>(spec: ResourceDescriptor, rows: I) -> Self
    where
        I: IntoIterator<Item = Result<Row, CkanError>>,
        I::IntoIter: 'static,
    {
        Self {
            spec,
            rows: Box::new(rows.into_iter()),
        }
    }

    /// Drains the stream, returning the rows or the first error.
    pub fn collect_rows(self) -> Result<Vec<Row>, CkanError> {
        self.rows.collect()
    }
}

impl std::fmt::Debug for ResourceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceStream")
            .field("spec", &self.spec.name)
            .finish_non_exhaustive()
    }
}

pub struct ProcessorOutput {
    pub package: PackageDescriptor,
    pub resources: ResourceStreams,
}
