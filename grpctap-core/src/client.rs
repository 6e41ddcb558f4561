//! # Tap Client
//!
//! The main entry point for issuing dynamic gRPC calls.
//!
//! A [`TapClient`] resolves methods through its [`SchemaRegistry`], dispatches
//! all four call shapes, and normalizes every outcome into
//! [`CallEnvelope`]s: unary calls return one envelope, streaming calls return
//! an [`EnvelopeStream`] yielding one envelope per received item. Peer status
//! errors land inside envelopes; local faults (no schema, unknown method, bad
//! metadata, elapsed deadline) are raised as [`CallError`] before or instead
//! of an envelope, classified so callers can route retry policy.
//!
//! ## Example
//!
//! ```rust,no_run
//! use grpctap_core::client::{CallOptions, ClientConfig, TapClient};
//! use grpctap_core::registry::SchemaSource;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfig::new().with_schema(SchemaSource::reflection());
//! let client = TapClient::connect("http://localhost:50051", config).await?;
//!
//! let envelope = client
//!     .call(
//!         "/my.package.Greeter/SayHello",
//!         serde_json::json!({"name": "world"}),
//!         CallOptions::new(),
//!     )
//!     .await?;
//! assert!(envelope.ok());
//! # Ok(())
//! # }
//! ```

mod types;

pub use types::*;

use crate::grpc::client::{GrpcClient, GrpcRequestError};
use crate::reflection::ReflectionVersion;
use crate::registry::{RegistryError, SchemaRegistry, ServiceHandle};
use crate::stream::StreamBridge;
use crate::{BoxError, ErrorClass};
use futures_util::Stream;
use http_body::Body as HttpBody;
use prost_reflect::MethodDescriptor;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tonic::client::GrpcService;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};

/// Errors that can occur when connecting to a gRPC server.
#[derive(Debug, thiserror::Error)]
pub enum ClientConnectError {
    #[error("Invalid URL '{0}': {1}")]
    InvalidUrl(String, #[source] tonic::transport::Error),
    #[error("Failed to connect to '{0}': {1}")]
    ConnectionFailed(String, #[source] tonic::transport::Error),
    #[error("Invalid TLS configuration: {0}")]
    InvalidTls(#[source] tonic::transport::Error),
    #[error("A client certificate requires a client key, and vice versa")]
    IncompleteIdentity,
    #[error(transparent)]
    Schema(#[from] RegistryError),
}

/// Local faults raised outside the envelope flow.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("client is closed")]
    Closed,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Request(#[from] GrpcRequestError),
    #[error("method '{method}' is a {actual} method, not {expected}")]
    Shape {
        method: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("call timed out after {timeout:?} before the peer responded")]
    DeadlineElapsed { timeout: Duration },
}

impl CallError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Closed | Self::Shape { .. } => ErrorClass::Configuration,
            Self::Registry(err) => err.class(),
            Self::Request(err) => err.class(),
            Self::DeadlineElapsed { .. } => ErrorClass::Timeout,
        }
    }
}

/// A dynamic gRPC testing client.
///
/// Cheap to share behind an `Arc`; all methods take `&self`. Closing the
/// client drops its cached service handles and reflection state, and every
/// later operation fails with [`CallError::Closed`].
pub struct TapClient<S = Channel> {
    registry: Mutex<Option<Arc<SchemaRegistry<S>>>>,
    default_metadata: Vec<(String, String)>,
}

impl TapClient<Channel> {
    /// Connects to `addr` and builds a client over the resulting channel,
    /// applying the TLS material from `config` (plaintext when `tls` is
    /// absent or marked insecure).
    pub async fn connect(addr: &str, config: ClientConfig) -> Result<Self, ClientConnectError> {
        let mut endpoint = Endpoint::new(addr.to_string())
            .map_err(|e| ClientConnectError::InvalidUrl(addr.to_string(), e))?;

        if let Some(tls) = &config.tls {
            if !tls.insecure {
                let mut tls_config = ClientTlsConfig::new();
                if let Some(ca) = &tls.ca_certificate {
                    tls_config = tls_config.ca_certificate(Certificate::from_pem(ca));
                }
                match (&tls.client_certificate, &tls.client_key) {
                    (Some(cert), Some(key)) => {
                        tls_config = tls_config.identity(Identity::from_pem(cert, key));
                    }
                    (None, None) => {}
                    _ => return Err(ClientConnectError::IncompleteIdentity),
                }
                endpoint = endpoint
                    .tls_config(tls_config)
                    .map_err(ClientConnectError::InvalidTls)?;
            }
        }

        let channel = endpoint
            .connect()
            .await
            .map_err(|e| ClientConnectError::ConnectionFailed(addr.to_string(), e))?;

        Ok(Self::from_service(channel, config)?)
    }
}

impl<S> TapClient<S>
where
    S: GrpcService<tonic::body::Body> + Clone + Send + Sync + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Builds a client from an existing Tonic service/channel. Static schema
    /// sources are compiled here; reflection defers to first use.
    pub fn from_service(service: S, config: ClientConfig) -> Result<Self, RegistryError> {
        let registry = SchemaRegistry::new(config.schema, service)?;
        Ok(Self {
            registry: Mutex::new(Some(Arc::new(registry))),
            default_metadata: config.default_metadata,
        })
    }

    /// Closes the client, releasing cached service handles and the
    /// reflection connection. Idempotent; there is no implicit reconnect.
    pub fn close(&self) {
        self.registry.lock().expect("registry lock poisoned").take();
    }

    pub fn is_closed(&self) -> bool {
        self.registry
            .lock()
            .expect("registry lock poisoned")
            .is_none()
    }

    /// The reflection version negotiated with the peer, if negotiation has
    /// happened.
    pub fn active_reflection_version(&self) -> Option<ReflectionVersion> {
        let registry = self.registry().ok()?;
        registry.reflection()?.active_version()
    }

    /// Lists the fully qualified names of all known services.
    pub async fn list_services(&self) -> Result<Vec<String>, CallError> {
        Ok(self.registry()?.list_services().await?)
    }

    /// Performs a unary call.
    ///
    /// Peer status errors become a not-ok envelope; only local faults return
    /// `Err`.
    pub async fn call(
        &self,
        method: &str,
        payload: serde_json::Value,
        options: CallOptions,
    ) -> Result<CallEnvelope, CallError> {
        let (descriptor, mut transport) = self.resolve(method, false, false, "unary").await?;
        let headers = self.merge_metadata(options.metadata);
        let dispatched = Instant::now();

        let outcome = with_deadline(
            options.timeout,
            transport.unary(descriptor, payload, headers, options.timeout),
        )
        .await??;

        Ok(match outcome {
            Ok(response) => {
                let (metadata, body, _) = response.into_parts();
                CallEnvelope::success(body, metadata, dispatched.elapsed())
            }
            Err(status) => CallEnvelope::failure(&status, dispatched.elapsed()),
        })
    }

    /// Performs a server-streaming call, yielding one envelope per received
    /// item.
    pub async fn server_stream(
        &self,
        method: &str,
        payload: serde_json::Value,
        options: CallOptions,
    ) -> Result<EnvelopeStream, CallError> {
        let (descriptor, mut transport) =
            self.resolve(method, false, true, "server streaming").await?;
        let headers = self.merge_metadata(options.metadata);
        let dispatched = Instant::now();

        let outcome = with_deadline(
            options.timeout,
            transport.server_streaming(descriptor, payload, headers, options.timeout),
        )
        .await??;

        Ok(match outcome {
            Ok(response) => {
                let (metadata, body, _) = response.into_parts();
                EnvelopeStream::open(StreamBridge::new(body), metadata, dispatched)
            }
            Err(status) => {
                EnvelopeStream::terminal(CallEnvelope::failure(&status, dispatched.elapsed()))
            }
        })
    }

    /// Performs a client-streaming call. The write side is closed after the
    /// last item of `payloads`; the single response arrives as a one-envelope
    /// sequence.
    pub async fn client_stream(
        &self,
        method: &str,
        payloads: impl Stream<Item = serde_json::Value> + Send + 'static,
        options: CallOptions,
    ) -> Result<EnvelopeStream, CallError> {
        let (descriptor, mut transport) =
            self.resolve(method, true, false, "client streaming").await?;
        let headers = self.merge_metadata(options.metadata);
        let dispatched = Instant::now();

        let outcome = with_deadline(
            options.timeout,
            transport.client_streaming(descriptor, payloads, headers, options.timeout),
        )
        .await??;

        Ok(match outcome {
            Ok(response) => {
                let (metadata, body, _) = response.into_parts();
                EnvelopeStream::terminal(CallEnvelope::success(
                    body,
                    metadata,
                    dispatched.elapsed(),
                ))
            }
            Err(status) => {
                EnvelopeStream::terminal(CallEnvelope::failure(&status, dispatched.elapsed()))
            }
        })
    }

    /// Performs a bidirectional-streaming call. The two directions run
    /// independently; neither blocks the other's pace.
    pub async fn bidi_stream(
        &self,
        method: &str,
        payloads: impl Stream<Item = serde_json::Value> + Send + 'static,
        options: CallOptions,
    ) -> Result<EnvelopeStream, CallError> {
        let (descriptor, mut transport) = self
            .resolve(method, true, true, "bidirectional streaming")
            .await?;
        let headers = self.merge_metadata(options.metadata);
        let dispatched = Instant::now();

        let outcome = with_deadline(
            options.timeout,
            transport.bidirectional_streaming(descriptor, payloads, headers, options.timeout),
        )
        .await??;

        Ok(match outcome {
            Ok(response) => {
                let (metadata, body, _) = response.into_parts();
                EnvelopeStream::open(StreamBridge::new(body), metadata, dispatched)
            }
            Err(status) => {
                EnvelopeStream::terminal(CallEnvelope::failure(&status, dispatched.elapsed()))
            }
        })
    }

    fn registry(&self) -> Result<Arc<SchemaRegistry<S>>, CallError> {
        self.registry
            .lock()
            .expect("registry lock poisoned")
            .clone()
            .ok_or(CallError::Closed)
    }

    /// Resolves `method` down to a descriptor and a transport handle,
    /// checking the call shape. All failures here happen before any call is
    /// dispatched.
    async fn resolve(
        &self,
        method: &str,
        client_streaming: bool,
        server_streaming: bool,
        expected: &'static str,
    ) -> Result<(MethodDescriptor, GrpcClient<S>), CallError> {
        let registry = self.registry()?;
        let path = registry.parse_method_path(method)?;
        let handle: Arc<ServiceHandle<S>> = registry.service_handle(path.service()).await?;

        let descriptor =
            handle
                .method(path.method())
                .ok_or_else(|| RegistryError::MethodNotFound {
                    service: path.service().to_string(),
                    method: path.method().to_string(),
                })?;

        if descriptor.is_client_streaming() != client_streaming
            || descriptor.is_server_streaming() != server_streaming
        {
            return Err(CallError::Shape {
                method: method.to_string(),
                expected,
                actual: shape_of(&descriptor),
            });
        }

        Ok((descriptor, handle.transport()))
    }

    /// Per-call entries override defaults on (case-insensitive) key
    /// collision.
    fn merge_metadata(&self, call_metadata: Vec<(String, String)>) -> Vec<(String, String)> {
        let mut merged: Vec<(String, String)> = self
            .default_metadata
            .iter()
            .filter(|(key, _)| {
                !call_metadata
                    .iter()
                    .any(|(k, _)| k.eq_ignore_ascii_case(key))
            })
            .cloned()
            .collect();
        merged.extend(call_metadata);
        merged
    }
}

impl<S> std::fmt::Debug for TapClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapClient")
            .field("closed", &self.is_closed_relaxed())
            .finish_non_exhaustive()
    }
}

impl<S> TapClient<S> {
    fn is_closed_relaxed(&self) -> bool {
        self.registry
            .lock()
            .map(|guard| guard.is_none())
            .unwrap_or(true)
    }
}

fn shape_of(method: &MethodDescriptor) -> &'static str {
    match (method.is_client_streaming(), method.is_server_streaming()) {
        (false, false) => "unary",
        (false, true) => "server streaming",
        (true, false) => "client streaming",
        (true, true) => "bidirectional streaming",
    }
}

/// Enforces the caller's deadline locally, on top of the `grpc-timeout`
/// already propagated to the peer. Local expiry is its own fault class.
async fn with_deadline<T>(
    timeout: Option<Duration>,
    future: impl Future<Output = T>,
) -> Result<T, CallError> {
    match timeout {
        None => Ok(future.await),
        Some(timeout) => tokio::time::timeout(timeout, future)
            .await
            .map_err(|_| CallError::DeadlineElapsed { timeout }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with_defaults(defaults: Vec<(String, String)>) -> TapClient<Channel> {
        TapClient {
            registry: Mutex::new(None),
            default_metadata: defaults,
        }
    }

    #[test]
    fn per_call_metadata_overrides_defaults() {
        let client = client_with_defaults(vec![
            ("x-tenant".to_string(), "default".to_string()),
            ("x-trace".to_string(), "keep".to_string()),
        ]);

        let merged = client.merge_metadata(vec![
            ("X-Tenant".to_string(), "override".to_string()),
            ("x-extra".to_string(), "new".to_string()),
        ]);

        assert_eq!(
            merged,
            vec![
                ("x-trace".to_string(), "keep".to_string()),
                ("X-Tenant".to_string(), "override".to_string()),
                ("x-extra".to_string(), "new".to_string()),
            ]
        );
    }

    #[test]
    fn error_classes_route_as_expected() {
        assert_eq!(CallError::Closed.class(), ErrorClass::Configuration);
        assert_eq!(
            CallError::DeadlineElapsed {
                timeout: Duration::from_millis(10)
            }
            .class(),
            ErrorClass::Timeout
        );
        assert_eq!(
            CallError::Registry(RegistryError::NoSchemaLoaded).class(),
            ErrorClass::Configuration
        );
    }
}
