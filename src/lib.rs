//! CKAN processors for datapackage pipelines: a resource enricher that pulls
//! resource metadata from a catalog, and a publisher that dumps a datapackage
//! and its streamed rows into one.

pub mod artifact;
pub mod ckan;
pub mod config;
pub mod convert;
pub mod datastore;
pub mod domain;
pub mod dump;
pub mod enrich;
pub mod error;
pub mod output;
pub mod pipeline;
