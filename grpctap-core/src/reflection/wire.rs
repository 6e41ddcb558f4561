//! Version-typed plumbing for single-exchange reflection requests.
//!
//! Every request holds its own bidirectional exchange: open the stream, write
//! one request, await one response, drop the stream. Responses from the
//! `v1alpha` variant are promoted into the `v1` message types so the rest of
//! the crate stays version-agnostic.

use super::{ReflectionError, ReflectionVersion};
use crate::BoxError;
use futures_util::stream::once;
use http_body::Body as HttpBody;
use tonic::client::GrpcService;
use tonic_reflection::pb::{v1, v1alpha};

// The host field of reflection requests is undocumented and servers ignore
// it, so we never ask the caller for one.
const EMPTY_HOST: &str = "";

/// The request variants this crate uses. `file_containing_extension` and
/// `all_extension_numbers_of_type` exist on the wire but have no caller here.
#[derive(Debug, Clone)]
pub(super) enum ReflectionRequest {
    ListServices,
    FileContainingSymbol(String),
    FileByFilename(String),
}

impl ReflectionRequest {
    fn into_v1(self) -> v1::ServerReflectionRequest {
        use v1::server_reflection_request::MessageRequest;
        let message_request = match self {
            Self::ListServices => MessageRequest::ListServices(String::new()),
            Self::FileContainingSymbol(symbol) => MessageRequest::FileContainingSymbol(symbol),
            Self::FileByFilename(filename) => MessageRequest::FileByFilename(filename),
        };
        v1::ServerReflectionRequest {
            host: EMPTY_HOST.to_string(),
            message_request: Some(message_request),
        }
    }

    fn into_v1alpha(self) -> v1alpha::ServerReflectionRequest {
        use v1alpha::server_reflection_request::MessageRequest;
        let message_request = match self {
            Self::ListServices => MessageRequest::ListServices(String::new()),
            Self::FileContainingSymbol(symbol) => MessageRequest::FileContainingSymbol(symbol),
            Self::FileByFilename(filename) => MessageRequest::FileByFilename(filename),
        };
        v1alpha::ServerReflectionRequest {
            host: EMPTY_HOST.to_string(),
            message_request: Some(message_request),
        }
    }
}

/// Opens a fresh exchange for `request` and returns the first event on it.
///
/// `Ok(None)` means the peer ended the stream cleanly without responding.
/// Whether that counts as success or failure is the caller's business: a
/// liveness probe accepts it, a descriptor fetch does not.
pub(super) async fn first_event<S>(
    service: S,
    version: ReflectionVersion,
    request: ReflectionRequest,
) -> Result<Option<v1::server_reflection_response::MessageResponse>, ReflectionError>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    match version {
        ReflectionVersion::V1 => {
            let mut client = v1::server_reflection_client::ServerReflectionClient::new(service);
            let req = request.into_v1();
            let mut stream = client
                .server_reflection_info(once(async move { req }))
                .await
                .map_err(|source| ReflectionError::StreamInit { version, source })?
                .into_inner();
            let response = stream.message().await.map_err(ReflectionError::Stream)?;
            Ok(response.and_then(|r| r.message_response))
        }
        ReflectionVersion::V1Alpha => {
            let mut client =
                v1alpha::server_reflection_client::ServerReflectionClient::new(service);
            let req = request.into_v1alpha();
            let mut stream = client
                .server_reflection_info(once(async move { req }))
                .await
                .map_err(|source| ReflectionError::StreamInit { version, source })?
                .into_inner();
            let response = stream.message().await.map_err(ReflectionError::Stream)?;
            Ok(response.and_then(|r| r.message_response).map(promote))
        }
    }
}

/// Like [`first_event`], but a silent end of stream is an error. Used for
/// every lookup after negotiation, where a response is mandatory.
pub(super) async fn request_once<S>(
    service: S,
    version: ReflectionVersion,
    request: ReflectionRequest,
) -> Result<v1::server_reflection_response::MessageResponse, ReflectionError>
where
    S: GrpcService<tonic::body::Body>,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    first_event(service, version, request)
        .await?
        .ok_or(ReflectionError::EndedWithoutData)
}

/// Maps a `v1alpha` response onto the identically shaped `v1` types.
fn promote(
    response: v1alpha::server_reflection_response::MessageResponse,
) -> v1::server_reflection_response::MessageResponse {
    use v1::server_reflection_response::MessageResponse as V1;
    use v1alpha::server_reflection_response::MessageResponse as Alpha;
    match response {
        Alpha::FileDescriptorResponse(r) => V1::FileDescriptorResponse(v1::FileDescriptorResponse {
            file_descriptor_proto: r.file_descriptor_proto,
        }),
        Alpha::AllExtensionNumbersResponse(r) => {
            V1::AllExtensionNumbersResponse(v1::ExtensionNumberResponse {
                base_type_name: r.base_type_name,
                extension_number: r.extension_number,
            })
        }
        Alpha::ListServicesResponse(r) => V1::ListServicesResponse(v1::ListServiceResponse {
            service: r
                .service
                .into_iter()
                .map(|s| v1::ServiceResponse { name: s.name })
                .collect(),
        }),
        Alpha::ErrorResponse(r) => V1::ErrorResponse(v1::ErrorResponse {
            error_code: r.error_code,
            error_message: r.error_message,
        }),
    }
}
