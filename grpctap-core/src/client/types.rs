use crate::registry::SchemaSource;
use crate::stream::StreamBridge;
use std::time::{Duration, Instant};
use tonic::{Code, Status, metadata::MetadataMap};

/// Configuration consumed by [`TapClient`](super::TapClient) at construction.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Where method and message definitions come from. `None` means no schema
    /// is loaded and every call fails with a configuration error.
    pub schema: Option<SchemaSource>,
    /// Metadata attached to every call. Per-call entries override these on
    /// key collision.
    pub default_metadata: Vec<(String, String)>,
    /// TLS material for `connect`. `None` means plaintext HTTP/2.
    pub tls: Option<TlsSettings>,
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, schema: SchemaSource) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_default_metadata(
        mut self,
        metadata: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        self.default_metadata.extend(metadata);
        self
    }

    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }
}

/// PEM material for the TLS handshake.
#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
    /// Root certificate used to verify the server. `None` falls back to the
    /// TLS backend's defaults.
    pub ca_certificate: Option<Vec<u8>>,
    /// Client certificate for mutual TLS. Requires `client_key`.
    pub client_certificate: Option<Vec<u8>>,
    /// Private key matching `client_certificate`.
    pub client_key: Option<Vec<u8>>,
    /// Skip TLS entirely and use plaintext, ignoring any material above.
    pub insecure: bool,
}

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Extra metadata (headers) for this call. Overrides the client's default
    /// metadata on key collision.
    pub metadata: Vec<(String, String)>,
    /// Deadline for the whole call. Propagated to the peer as `grpc-timeout`
    /// and enforced locally; local expiry is reported as a timeout error, not
    /// a transport fault.
    pub timeout: Option<Duration>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(mut self, metadata: impl IntoIterator<Item = (String, String)>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The normalized outcome of one call, or of one received item of a
/// streaming call.
///
/// `ok()` holds iff the code is `OK`, and `body()` is `Some` only when ok.
/// For failures the code comes from the peer's status (tonic defaults it to
/// `UNKNOWN` when the transport supplied none) and `trailers()` carries the
/// status metadata.
#[derive(Debug, Clone)]
pub struct CallEnvelope {
    code: Code,
    message: String,
    headers: MetadataMap,
    trailers: MetadataMap,
    body: Option<serde_json::Value>,
    duration: Duration,
}

impl CallEnvelope {
    pub(super) fn success(
        body: serde_json::Value,
        headers: MetadataMap,
        duration: Duration,
    ) -> Self {
        Self {
            code: Code::Ok,
            message: String::new(),
            headers,
            trailers: MetadataMap::new(),
            body: Some(body),
            duration,
        }
    }

    pub(super) fn failure(status: &Status, duration: Duration) -> Self {
        Self {
            code: status.code(),
            message: status.message().to_string(),
            headers: MetadataMap::new(),
            trailers: status.metadata().clone(),
            body: None,
            duration,
        }
    }

    pub fn ok(&self) -> bool {
        self.code == Code::Ok
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Response metadata the peer attached before the first message.
    pub fn headers(&self) -> &MetadataMap {
        &self.headers
    }

    /// Trailing metadata. For failures this is the status metadata.
    pub fn trailers(&self) -> &MetadataMap {
        &self.trailers
    }

    pub fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }

    /// Monotonic wall-clock time from dispatch to this outcome.
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// The response side of a streaming call: a pull-based sequence of
/// [`CallEnvelope`]s, one per received item.
///
/// A mid-stream error (or a failure to establish the stream at all) arrives
/// as a terminal failure envelope inside the sequence; a clean end yields
/// `None` with no terminal item. Each envelope's duration is measured
/// independently from dispatch to its delivery.
pub struct EnvelopeStream {
    state: StreamState,
    headers: MetadataMap,
    dispatched: Instant,
}

enum StreamState {
    /// Live response stream behind the bridge.
    Open(StreamBridge<serde_json::Value>),
    /// One pending terminal envelope, then the sequence ends.
    Terminal(Box<CallEnvelope>),
    Done,
}

impl EnvelopeStream {
    pub(super) fn open(
        bridge: StreamBridge<serde_json::Value>,
        headers: MetadataMap,
        dispatched: Instant,
    ) -> Self {
        Self {
            state: StreamState::Open(bridge),
            headers,
            dispatched,
        }
    }

    pub(super) fn terminal(envelope: CallEnvelope) -> Self {
        Self {
            state: StreamState::Terminal(Box::new(envelope)),
            headers: MetadataMap::new(),
            dispatched: Instant::now(),
        }
    }

    /// Metadata the peer attached when the stream was established.
    pub fn headers(&self) -> &MetadataMap {
        &self.headers
    }

    /// Pulls the next envelope. Returns `None` once the stream has ended
    /// cleanly, after a terminal failure envelope, or after `cancel`.
    pub async fn next(&mut self) -> Option<CallEnvelope> {
        match &mut self.state {
            StreamState::Done => None,
            StreamState::Terminal(_) => {
                let StreamState::Terminal(envelope) =
                    std::mem::replace(&mut self.state, StreamState::Done)
                else {
                    return None;
                };
                Some(*envelope)
            }
            StreamState::Open(bridge) => match bridge.next().await {
                Some(Ok(body)) => Some(CallEnvelope::success(
                    body,
                    self.headers.clone(),
                    self.dispatched.elapsed(),
                )),
                Some(Err(status)) => {
                    let envelope = CallEnvelope::failure(&status, self.dispatched.elapsed());
                    self.state = StreamState::Done;
                    Some(envelope)
                }
                None => {
                    self.state = StreamState::Done;
                    None
                }
            },
        }
    }

    /// Stops consumption and cancels the underlying transport stream.
    /// Dropping the sequence has the same effect.
    pub fn cancel(&mut self) {
        if let StreamState::Open(bridge) = &mut self.state {
            bridge.cancel();
        }
        self.state = StreamState::Done;
    }
}

impl std::fmt::Debug for EnvelopeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            StreamState::Open(_) => "open",
            StreamState::Terminal(_) => "terminal",
            StreamState::Done => "done",
        };
        f.debug_struct("EnvelopeStream").field("state", &state).finish()
    }
}
