//! Reflection protocol version negotiation.
//!
//! Candidates are probed in preference order with a trivial `list_services`
//! request on a fresh exchange. A probe succeeds on any data event or a clean
//! end of stream: probing only needs liveness, not a payload. A probe that
//! fails with `UNIMPLEMENTED` or exceeds [`PROBE_TIMEOUT`] fails that
//! candidate and negotiation moves on; any other error aborts immediately.

use super::wire::{self, ReflectionRequest};
use super::{ReflectionError, ReflectionVersion};
use crate::BoxError;
use http_body::Body as HttpBody;
use std::time::Duration;
use tonic::Code;
use tonic::client::GrpcService;

/// How long a single version probe may take before the candidate is
/// considered dead.
pub(super) const PROBE_TIMEOUT: Duration = Duration::from_millis(5000);

pub(super) async fn negotiate<S>(
    service: &S,
    preferred: ReflectionVersion,
) -> Result<ReflectionVersion, ReflectionError>
where
    S: GrpcService<tonic::body::Body> + Clone,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    let mut last_error = None;

    for version in preferred.candidates() {
        let probe = wire::first_event(service.clone(), version, ReflectionRequest::ListServices);
        match tokio::time::timeout(PROBE_TIMEOUT, probe).await {
            Err(_) => {
                tracing::debug!(%version, "reflection probe timed out");
                last_error = Some(ReflectionError::ProbeTimeout { version });
            }
            // Data or a clean end both prove the version is served.
            Ok(Ok(_)) => {
                tracing::debug!(%version, "reflection version negotiated");
                return Ok(version);
            }
            Ok(Err(err)) if err.grpc_code() == Some(Code::Unimplemented) => {
                tracing::debug!(%version, "reflection version not implemented by peer");
                last_error = Some(err);
            }
            Ok(Err(err)) => return Err(err),
        }
    }

    Err(last_error.unwrap_or(ReflectionError::NegotiationExhausted))
}
