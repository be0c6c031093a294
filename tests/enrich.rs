mod common;

use assert_matches::assert_matches;
use serde_json::json;

use common::{MockCkan, map, not_found_error, row, validation_error};
use dpp_ckan::ckan::{ACTION_RESOURCE_SHOW, ActionResponse};
use dpp_ckan::config::EnricherParameters;
use dpp_ckan::domain::{PackageDescriptor, ResourceDescriptor};
use dpp_ckan::enrich::ResourceEnricher;
use dpp_ckan::error::CkanError;
use dpp_ckan::pipeline::ResourceStream;

fn parameters(extra: serde_json::Value) -> EnricherParameters {
    let mut params = map(json!({
        "ckan-host": "https://demo.ckan.org",
        "resource-id": "d51c9bd4-8256-4289-bdd7-962f8572efb0"
    }));
    params.extend(map(extra));
    EnricherParameters::from_map(params).unwrap()
}

fn catalog_record() -> serde_json::Value {
    json!({
        "id": "d51c9bd4-8256-4289-bdd7-962f8572efb0",
        "name": "Spend over £500 (January 2012)",
        "format": "CSV",
        "url": "https://demo.ckan.org/dataset/spend/resource/spend-jan-2012.csv",
        "hash": "d41d8cd98f00b204e9800998ecf8427e",
        "package_id": "spend",
        "size": 1024
    })
}

#[test]
fn enrich_appends_normalized_resource() {
    let mock = MockCkan::default();
    mock.respond(ACTION_RESOURCE_SHOW, ActionResponse::ok(catalog_record()));
    let enricher = ResourceEnricher::new(mock);
    let mut package = PackageDescriptor::new("my-datapackage");
    package.resources.push(ResourceDescriptor::new("existing"));

    enricher
        .enrich(&parameters(json!({})), &mut package)
        .unwrap();

    assert_eq!(package.resources.len(), 2);
    let resource = &package.resources[1];
    assert_eq!(resource.name, "spend-over-500-january-2012");
    assert_eq!(resource.title.as_deref(), Some("Spend over £500 (January 2012)"));
    assert_eq!(resource.format.as_deref(), Some("csv"));
    assert_eq!(resource.path.as_deref(), Some("_"));
    assert_eq!(
        resource.streamed_from.as_deref(),
        Some("https://demo.ckan.org/dataset/spend/resource/spend-jan-2012.csv")
    );
    assert!(!resource.properties.contains_key("hash"));
    assert!(!resource.properties.contains_key("url"));
    assert_eq!(resource.properties["size"], 1024);

    let calls = enricher.client().calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].body["id"],
        "d51c9bd4-8256-4289-bdd7-962f8572efb0"
    );
}

#[test]
fn caller_parameters_override_catalog_fields() {
    let mock = MockCkan::default();
    mock.respond(ACTION_RESOURCE_SHOW, ActionResponse::ok(catalog_record()));
    let enricher = ResourceEnricher::new(mock);
    let mut package = PackageDescriptor::new("my-datapackage");

    let params = parameters(json!({
        "name": "january",
        "format": "tsv",
        "dpp:streaming": true
    }));
    enricher.enrich(&params, &mut package).unwrap();

    let resource = &package.resources[0];
    assert_eq!(resource.name, "january");
    assert_eq!(resource.format.as_deref(), Some("tsv"));
    assert!(resource.streaming);
    assert!(!resource.properties.contains_key("resource-id"));
    assert!(!resource.properties.contains_key("ckan-host"));
}

#[test]
fn row_streams_pass_through() {
    let mock = MockCkan::default();
    mock.respond(ACTION_RESOURCE_SHOW, ActionResponse::ok(catalog_record()));
    let enricher = ResourceEnricher::new(mock);
    let rows = vec![row(json!({"a": 1})), row(json!({"a": 2}))];
    let inputs: Vec<Result<ResourceStream, CkanError>> = vec![Ok(ResourceStream::new(
        ResourceDescriptor::new("upstream"),
        rows.clone(),
    ))];

    let output = enricher
        .process(
            &parameters(json!({})),
            PackageDescriptor::new("my-datapackage"),
            Box::new(inputs.into_iter()),
        )
        .unwrap();

    assert_eq!(output.package.resources.len(), 1);
    let streams: Vec<_> = output.resources.collect::<Result<_, _>>().unwrap();
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].spec.name, "upstream");
    let drained = streams.into_iter().next().unwrap().collect_rows().unwrap();
    assert_eq!(drained, rows);
}

#[test]
fn missing_resource_is_fatal() {
    let mock = MockCkan::default();
    mock.respond(ACTION_RESOURCE_SHOW, ActionResponse::failed(not_found_error()));
    let enricher = ResourceEnricher::new(mock);
    let mut package = PackageDescriptor::new("my-datapackage");

    let err = enricher
        .enrich(&parameters(json!({})), &mut package)
        .unwrap_err();

    assert_matches!(err, CkanError::CatalogRequest { ref message, .. } if message.contains("Not found"));
    assert!(package.resources.is_empty());
}

#[test]
fn non_object_result_is_malformed() {
    let mock = MockCkan::default();
    mock.respond(ACTION_RESOURCE_SHOW, ActionResponse::ok(json!("surprise")));
    let enricher = ResourceEnricher::new(mock);
    let mut package = PackageDescriptor::new("my-datapackage");

    let err = enricher
        .enrich(&parameters(json!({})), &mut package)
        .unwrap_err();

    assert_matches!(err, CkanError::MalformedResponse { .. });
}

#[test]
fn other_catalog_errors_are_fatal() {
    let mock = MockCkan::default();
    mock.respond(ACTION_RESOURCE_SHOW, ActionResponse::failed(validation_error()));
    let enricher = ResourceEnricher::new(mock);
    let mut package = PackageDescriptor::new("my-datapackage");

    let err = enricher
        .enrich(&parameters(json!({})), &mut package)
        .unwrap_err();

    assert_matches!(
        err,
        CkanError::CatalogRequest { ref action, ref message }
            if action == ACTION_RESOURCE_SHOW && message.contains("Missing value")
    );
    assert!(package.resources.is_empty());
}

#[test]
fn blank_catalog_schema_is_ignored() {
    let mut record = catalog_record();
    record["schema"] = json!("");
    let mock = MockCkan::default();
    mock.respond(ACTION_RESOURCE_SHOW, ActionResponse::ok(record));
    let enricher = ResourceEnricher::new(mock);
    let mut package = PackageDescriptor::new("my-datapackage");

    enricher
        .enrich(&parameters(json!({})), &mut package)
        .unwrap();

    assert_eq!(package.resources.len(), 1);
    assert!(package.resources[0].schema.is_none());
}

#[test]
fn encoded_catalog_schema_is_decoded() {
    let mut record = catalog_record();
    record["schema"] = json!(r#"{"fields": [{"name": "amount", "type": "number"}]}"#);
    let mock = MockCkan::default();
    mock.respond(ACTION_RESOURCE_SHOW, ActionResponse::ok(record));
    let enricher = ResourceEnricher::new(mock);
    let mut package = PackageDescriptor::new("my-datapackage");

    enricher
        .enrich(&parameters(json!({})), &mut package)
        .unwrap();

    let schema = package.resources[0].schema.as_ref().unwrap();
    assert_eq!(schema.field_names(), vec!["amount".to_string()]);
}
