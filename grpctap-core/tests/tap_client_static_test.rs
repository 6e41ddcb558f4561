use echo_service::EchoServiceServer;
use echo_service_impl::EchoServiceImpl;
use grpctap_core::client::{CallOptions, ClientConfig, TapClient};
use grpctap_core::registry::SchemaSource;
use std::path::PathBuf;
use tonic::service::Routes;


/// An echo server with no reflection support; the schema must come from the
/// configured static source.
fn echo_only_routes() -> Routes {
    Routes::new(EchoServiceServer::new(EchoServiceImpl::default()))
}

fn proto_path(file: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/protos")
        .join(file)
}

#[tokio::test]
async fn descriptor_set_schema_supports_calls_without_reflection() {
    let client = TapClient::from_service(
        echo_only_routes(),
        ClientConfig::new().with_schema(SchemaSource::DescriptorSet(
            echo_service::encoded_file_descriptor_set(),
        )),
    )
    .unwrap();

    let envelope = client
        .call(
            "/echo.EchoService/UnaryEcho",
            serde_json::json!({ "message": "static" }),
            CallOptions::new(),
        )
        .await
        .unwrap();

    assert!(envelope.ok());
    assert_eq!(envelope.body().unwrap()["message"], "static");
}

#[tokio::test]
async fn bare_method_names_resolve_against_a_static_schema() {
    let client = TapClient::from_service(
        echo_only_routes(),
        ClientConfig::new().with_schema(SchemaSource::DescriptorSet(
            echo_service::encoded_file_descriptor_set(),
        )),
    )
    .unwrap();

    let envelope = client
        .call(
            "UnaryEcho",
            serde_json::json!({ "message": "bare" }),
            CallOptions::new(),
        )
        .await
        .unwrap();

    assert!(envelope.ok());
    assert_eq!(envelope.body().unwrap()["message"], "bare");
}

#[tokio::test]
async fn proto_sources_are_compiled_at_startup() {
    let client = TapClient::from_service(
        echo_only_routes(),
        ClientConfig::new().with_schema(SchemaSource::proto_files(vec![
            proto_path("echo.proto"),
            proto_path("echo_messages.proto"),
        ])),
    )
    .unwrap();

    let envelope = client
        .call(
            "/echo.EchoService/UnaryEcho",
            serde_json::json!({ "message": "compiled" }),
            CallOptions::new(),
        )
        .await
        .unwrap();

    assert!(envelope.ok());
    assert_eq!(envelope.body().unwrap()["message"], "compiled");
}

#[tokio::test]
async fn invalid_proto_sources_fail_at_construction() {
    let result = TapClient::from_service(
        echo_only_routes(),
        ClientConfig::new().with_schema(SchemaSource::proto_files(vec![proto_path(
            "does_not_exist.proto",
        )])),
    );

    assert!(result.is_err());
}

#[tokio::test]
async fn streaming_works_over_a_static_schema() {
    let client = TapClient::from_service(
        echo_only_routes(),
        ClientConfig::new().with_schema(SchemaSource::DescriptorSet(
            echo_service::encoded_file_descriptor_set(),
        )),
    )
    .unwrap();

    let mut stream = client
        .server_stream(
            "/echo.EchoService/ServerStreamingEcho",
            serde_json::json!({ "message": "s" }),
            CallOptions::new(),
        )
        .await
        .unwrap();

    let mut count = 0;
    while let Some(envelope) = stream.next().await {
        assert!(envelope.ok());
        count += 1;
    }
    assert_eq!(count, 3);
}
