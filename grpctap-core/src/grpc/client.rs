//! # Generic gRPC Client
//!
//! Wraps `tonic::client::Grpc` to provide one entry point per gRPC call
//! shape, agnostic of the specific Protobuf messages being exchanged: the
//! HTTP/2 path is built from the method descriptor at runtime and the
//! [`JsonCodec`](super::codec::JsonCodec) handles serialization.
//!
//! Responses are returned whole (`tonic::Response`), so callers keep access
//! to the metadata the peer attached. An optional per-call timeout is
//! propagated to the peer as a `grpc-timeout` deadline.

use super::codec::JsonCodec;
use crate::{BoxError, ErrorClass};
use futures_util::Stream;
use http_body::Body as HttpBody;
use prost_reflect::MethodDescriptor;
use std::str::FromStr;
use std::time::Duration;
use tonic::{
    Status, Streaming,
    client::GrpcService,
    metadata::{
        MetadataKey, MetadataValue,
        errors::{InvalidMetadataKey, InvalidMetadataValue},
    },
    transport::Channel,
};

#[derive(thiserror::Error, Debug)]
pub enum GrpcRequestError {
    #[error("internal error, the client was not ready: '{0}'")]
    ClientNotReady(#[source] BoxError),
    #[error("invalid metadata (header) key '{key}': '{source}'")]
    InvalidMetadataKey {
        key: String,
        source: InvalidMetadataKey,
    },
    #[error("invalid metadata (header) value for key '{key}': '{source}'")]
    InvalidMetadataValue {
        key: String,
        source: InvalidMetadataValue,
    },
}

impl GrpcRequestError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ClientNotReady(_) => ErrorClass::Transport,
            Self::InvalidMetadataKey { .. } | Self::InvalidMetadataValue { .. } => {
                ErrorClass::Configuration
            }
        }
    }
}

/// A dynamic gRPC transport handle. Cheap to clone; clones share the
/// underlying connection.
pub struct GrpcClient<S = Channel> {
    client: tonic::client::Grpc<S>,
}

impl<S: Clone> Clone for GrpcClient<S> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
        }
    }
}

impl<S> std::fmt::Debug for GrpcClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcClient").finish_non_exhaustive()
    }
}

impl<S> GrpcClient<S>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S) -> Self {
        let client = tonic::client::Grpc::new(service);
        Self { client }
    }

    /// Performs a Unary call (single request -> single response).
    ///
    /// # Returns
    /// * `Ok(Ok(response))` - Successful RPC execution.
    /// * `Ok(Err(status))` - RPC executed, but the server returned an error.
    /// * `Err(GrpcRequestError)` - Failed to build or send the request.
    pub async fn unary(
        &mut self,
        method: MethodDescriptor,
        payload: serde_json::Value,
        headers: Vec<(String, String)>,
        timeout: Option<Duration>,
    ) -> Result<Result<tonic::Response<serde_json::Value>, Status>, GrpcRequestError> {
        self.client
            .ready()
            .await
            .map_err(|e| GrpcRequestError::ClientNotReady(e.into()))?;

        let codec = JsonCodec::new(method.input(), method.output());
        let path = http_path(&method);
        let request = build_request(payload, headers, timeout)?;

        Ok(self.client.unary(request, path, codec).await)
    }

    /// Performs a Server Streaming call (single request -> response stream).
    pub async fn server_streaming(
        &mut self,
        method: MethodDescriptor,
        payload: serde_json::Value,
        headers: Vec<(String, String)>,
        timeout: Option<Duration>,
    ) -> Result<Result<tonic::Response<Streaming<serde_json::Value>>, Status>, GrpcRequestError>
    {
        self.client
            .ready()
            .await
            .map_err(|e| GrpcRequestError::ClientNotReady(e.into()))?;

        let codec = JsonCodec::new(method.input(), method.output());
        let path = http_path(&method);
        let request = build_request(payload, headers, timeout)?;

        Ok(self.client.server_streaming(request, path, codec).await)
    }

    /// Performs a Client Streaming call (request stream -> single response).
    ///
    /// The write side is closed after the last item of `payloads`.
    pub async fn client_streaming(
        &mut self,
        method: MethodDescriptor,
        payloads: impl Stream<Item = serde_json::Value> + Send + 'static,
        headers: Vec<(String, String)>,
        timeout: Option<Duration>,
    ) -> Result<Result<tonic::Response<serde_json::Value>, Status>, GrpcRequestError> {
        self.client
            .ready()
            .await
            .map_err(|e| GrpcRequestError::ClientNotReady(e.into()))?;

        let codec = JsonCodec::new(method.input(), method.output());
        let path = http_path(&method);
        let request = build_request(payloads, headers, timeout)?;

        Ok(self.client.client_streaming(request, path, codec).await)
    }

    /// Performs a Bidirectional Streaming call (request stream -> response
    /// stream). The two directions run independently.
    pub async fn bidirectional_streaming(
        &mut self,
        method: MethodDescriptor,
        payloads: impl Stream<Item = serde_json::Value> + Send + 'static,
        headers: Vec<(String, String)>,
        timeout: Option<Duration>,
    ) -> Result<Result<tonic::Response<Streaming<serde_json::Value>>, Status>, GrpcRequestError>
    {
        self.client
            .ready()
            .await
            .map_err(|e| GrpcRequestError::ClientNotReady(e.into()))?;

        let codec = JsonCodec::new(method.input(), method.output());
        let path = http_path(&method);
        let request = build_request(payloads, headers, timeout)?;

        Ok(self.client.streaming(request, path, codec).await)
    }
}

fn http_path(method: &MethodDescriptor) -> http::uri::PathAndQuery {
    let path = format!("/{}/{}", method.parent_service().full_name(), method.name());
    http::uri::PathAndQuery::from_str(&path).expect("valid gRPC path")
}

fn build_request<T>(
    payload: T,
    headers: Vec<(String, String)>,
    timeout: Option<Duration>,
) -> Result<tonic::Request<T>, GrpcRequestError> {
    let mut request = tonic::Request::new(payload);
    for (k, v) in headers {
        let key =
            MetadataKey::from_str(&k).map_err(|source| GrpcRequestError::InvalidMetadataKey {
                key: k.clone(),
                source,
            })?;
        let val = MetadataValue::from_str(&v)
            .map_err(|source| GrpcRequestError::InvalidMetadataValue { key: k, source })?;
        request.metadata_mut().insert(key, val);
    }
    if let Some(timeout) = timeout {
        request.set_timeout(timeout);
    }
    Ok(request)
}
