use echo_service::EchoServiceServer;
use echo_service_impl::EchoServiceImpl;
use grpctap_core::ErrorClass;
use grpctap_core::client::{CallError, CallOptions, ClientConfig, TapClient};
use grpctap_core::reflection::ReflectionVersion;
use grpctap_core::registry::{RegistryError, SchemaSource};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tonic::Code;
use tonic::service::Routes;


/// Reflection-enabled client over an in-process echo server. Returns the
/// flag set when the server's endless response stream is dropped.
fn tap_client() -> (TapClient<Routes>, Arc<AtomicBool>) {
    let echo = EchoServiceImpl::default();
    let stream_dropped = Arc::clone(&echo.stream_dropped);

    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_file_descriptor_set(echo_service::file_descriptor_set())
        .build_v1()
        .expect("Failed to setup Reflection Service");

    let service = Routes::new(reflection_service).add_service(EchoServiceServer::new(echo));

    let client = TapClient::from_service(
        service,
        ClientConfig::new().with_schema(SchemaSource::reflection()),
    )
    .expect("Failed to build client");

    (client, stream_dropped)
}

#[tokio::test]
async fn unary_call_yields_an_ok_envelope() {
    let (client, _) = tap_client();

    let envelope = client
        .call(
            "/echo.EchoService/UnaryEcho",
            serde_json::json!({ "message": "hello" }),
            CallOptions::new(),
        )
        .await
        .unwrap();

    assert!(envelope.ok());
    assert_eq!(envelope.code(), Code::Ok);
    assert_eq!(envelope.body().unwrap()["message"], "hello");
    assert!(envelope.trailers().is_empty());
}

#[tokio::test]
async fn leading_slash_is_optional() {
    let (client, _) = tap_client();

    let envelope = client
        .call(
            "echo.EchoService/UnaryEcho",
            serde_json::json!({ "message": "hello" }),
            CallOptions::new(),
        )
        .await
        .unwrap();

    assert!(envelope.ok());
}

#[tokio::test]
async fn peer_status_becomes_a_failure_envelope() {
    let (client, _) = tap_client();

    let envelope = client
        .call(
            "/echo.EchoService/UnaryEcho",
            serde_json::json!({ "message": "boom" }),
            CallOptions::new(),
        )
        .await
        .unwrap();

    assert!(!envelope.ok());
    assert_eq!(envelope.code(), Code::NotFound);
    assert_eq!(i32::from(envelope.code()), 5);
    assert!(envelope.body().is_none());
    assert!(envelope.message().contains("boom"));
}

#[tokio::test]
async fn per_call_metadata_overrides_client_defaults() {
    let echo = EchoServiceImpl::default();
    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_file_descriptor_set(echo_service::file_descriptor_set())
        .build_v1()
        .unwrap();
    let service = Routes::new(reflection_service).add_service(EchoServiceServer::new(echo));

    let client = TapClient::from_service(
        service,
        ClientConfig::new()
            .with_schema(SchemaSource::reflection())
            .with_default_metadata(vec![
                ("x-tenant".to_string(), "default".to_string()),
                ("x-trace".to_string(), "abc".to_string()),
            ]),
    )
    .unwrap();

    let envelope = client
        .call(
            "/echo.EchoService/UnaryEcho",
            serde_json::json!({ "message": "hi" }),
            CallOptions::new()
                .with_metadata(vec![("x-tenant".to_string(), "override".to_string())]),
        )
        .await
        .unwrap();

    // The echo server copies x-* request metadata into the response headers.
    assert_eq!(envelope.headers().get("x-tenant").unwrap(), "override");
    assert_eq!(envelope.headers().get("x-trace").unwrap(), "abc");
}

#[tokio::test]
async fn server_streaming_yields_one_envelope_per_item_in_order() {
    let (client, _) = tap_client();

    let mut stream = client
        .server_stream(
            "/echo.EchoService/ServerStreamingEcho",
            serde_json::json!({ "message": "stream" }),
            CallOptions::new(),
        )
        .await
        .unwrap();

    for seq in 0..3 {
        let envelope = stream.next().await.expect("expected a streamed item");
        assert!(envelope.ok());
        assert_eq!(
            envelope.body().unwrap()["message"],
            format!("stream - seq {seq}")
        );
    }
    assert!(stream.next().await.is_none(), "clean end has no terminal item");
}

#[tokio::test]
async fn client_streaming_concatenates_the_input_sequence() {
    let (client, _) = tap_client();

    let payloads = tokio_stream::iter(vec![
        serde_json::json!({ "message": "A" }),
        serde_json::json!({ "message": "B" }),
        serde_json::json!({ "message": "C" }),
    ]);

    let mut stream = client
        .client_stream(
            "/echo.EchoService/ClientStreamingEcho",
            payloads,
            CallOptions::new(),
        )
        .await
        .unwrap();

    let envelope = stream.next().await.unwrap();
    assert!(envelope.ok());
    assert_eq!(envelope.body().unwrap()["message"], "ABC");
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn bidirectional_streaming_echoes_each_item() {
    let (client, _) = tap_client();

    let payloads = tokio_stream::iter(vec![
        serde_json::json!({ "message": "Ping" }),
        serde_json::json!({ "message": "Pong" }),
    ]);

    let mut stream = client
        .bidi_stream(
            "/echo.EchoService/BidirectionalEcho",
            payloads,
            CallOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        stream.next().await.unwrap().body().unwrap()["message"],
        "echo: Ping"
    );
    assert_eq!(
        stream.next().await.unwrap().body().unwrap()["message"],
        "echo: Pong"
    );
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn mid_stream_error_arrives_as_a_terminal_envelope() {
    let (client, _) = tap_client();

    let payloads = tokio_stream::iter(vec![
        serde_json::json!({ "message": "ok" }),
        serde_json::json!({ "message": "boom" }),
        serde_json::json!({ "message": "never delivered" }),
    ]);

    let mut stream = client
        .bidi_stream(
            "/echo.EchoService/BidirectionalEcho",
            payloads,
            CallOptions::new(),
        )
        .await
        .unwrap();

    let first = stream.next().await.unwrap();
    assert!(first.ok());
    assert_eq!(first.body().unwrap()["message"], "echo: ok");

    let terminal = stream.next().await.unwrap();
    assert!(!terminal.ok());
    assert_eq!(terminal.code(), Code::Internal);
    assert!(terminal.body().is_none());

    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn stream_setup_failure_arrives_inside_the_sequence() {
    let (client, _) = tap_client();

    let mut stream = client
        .server_stream(
            "/echo.EchoService/ServerStreamingEcho",
            serde_json::json!({ "message": "boom" }),
            CallOptions::new(),
        )
        .await
        .unwrap();

    let terminal = stream.next().await.unwrap();
    assert!(!terminal.ok());
    assert_eq!(terminal.code(), Code::NotFound);
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn cancelling_consumption_cancels_the_transport_stream() {
    let (client, stream_dropped) = tap_client();

    let mut stream = client
        .server_stream(
            "/echo.EchoService/ServerStreamingEcho",
            serde_json::json!({ "message": "endless" }),
            CallOptions::new(),
        )
        .await
        .unwrap();

    let first = stream.next().await.unwrap();
    assert_eq!(first.body().unwrap()["message"], "endless - seq 0");

    stream.cancel();

    tokio::time::timeout(Duration::from_secs(2), async {
        while !stream_dropped.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("the transport stream was never dropped");

    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn elapsed_deadline_is_a_timeout_fault() {
    let (client, _) = tap_client();

    let err = client
        .call(
            "/echo.EchoService/UnaryEcho",
            serde_json::json!({ "message": "slow" }),
            CallOptions::new().with_timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CallError::DeadlineElapsed { .. }));
    assert_eq!(err.class(), ErrorClass::Timeout);
}

#[tokio::test]
async fn wrong_call_shape_is_rejected_before_dispatch() {
    let (client, _) = tap_client();

    let err = client
        .call(
            "/echo.EchoService/ServerStreamingEcho",
            serde_json::json!({ "message": "hi" }),
            CallOptions::new(),
        )
        .await
        .unwrap_err();

    assert!(
        matches!(err, CallError::Shape { expected: "unary", .. }),
        "got: {err:?}"
    );
    assert_eq!(err.class(), ErrorClass::Configuration);
}

#[tokio::test]
async fn unknown_method_on_a_known_service_is_a_configuration_fault() {
    let (client, _) = tap_client();

    let err = client
        .call(
            "/echo.EchoService/Ghost",
            serde_json::json!({}),
            CallOptions::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CallError::Registry(RegistryError::MethodNotFound { .. })
    ));
    assert_eq!(err.class(), ErrorClass::Configuration);
}

#[tokio::test]
async fn unknown_service_surfaces_the_reflection_failure() {
    let (client, _) = tap_client();

    let err = client
        .call(
            "/ghost.Service/Method",
            serde_json::json!({}),
            CallOptions::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CallError::Registry(RegistryError::Reflection(_))
    ));
}

#[tokio::test]
async fn bare_method_names_are_rejected_with_reflection() {
    let (client, _) = tap_client();

    let err = client
        .call("UnaryEcho", serde_json::json!({}), CallOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CallError::Registry(RegistryError::UnqualifiedMethod(_))
    ));
}

#[tokio::test]
async fn call_without_schema_fails_before_any_network_attempt() {
    let service = Routes::new(EchoServiceServer::new(EchoServiceImpl::default()));
    let client = TapClient::from_service(service, ClientConfig::new()).unwrap();

    let err = client
        .call(
            "/nonexistent.Service/Method",
            serde_json::json!({}),
            CallOptions::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CallError::Registry(RegistryError::NoSchemaLoaded)
    ));
    assert!(err.to_string().contains("No schema loaded"));
    assert_eq!(err.class(), ErrorClass::Configuration);
}

#[tokio::test]
async fn close_is_idempotent_and_blocks_further_operations() {
    let (client, _) = tap_client();
    assert!(!client.is_closed());

    client.close();
    client.close();
    assert!(client.is_closed());

    let err = client
        .call(
            "/echo.EchoService/UnaryEcho",
            serde_json::json!({ "message": "hi" }),
            CallOptions::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, CallError::Closed));
    assert_eq!(err.to_string(), "client is closed");
    assert_eq!(err.class(), ErrorClass::Configuration);
}

#[tokio::test]
async fn reflection_version_becomes_active_after_first_use() {
    let (client, _) = tap_client();
    assert_eq!(client.active_reflection_version(), None);

    client
        .call(
            "/echo.EchoService/UnaryEcho",
            serde_json::json!({ "message": "hi" }),
            CallOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(
        client.active_reflection_version(),
        Some(ReflectionVersion::V1)
    );
}

#[tokio::test]
async fn lists_services_through_the_client() {
    let (client, _) = tap_client();

    let services = client.list_services().await.unwrap();
    assert!(services.contains(&"echo.EchoService".to_string()));
}
