//! # Reflection Client
//!
//! This client builds complete `FileDescriptorSet`s by querying a server that
//! supports reflection. It negotiates the protocol version on first use, then
//! resolves the transitive dependency closure of the descriptor files needed
//! to interpret a symbol: a breadth-first walk over declared dependency
//! names, backed by a per-filename cache that both terminates the walk and
//! makes repeat resolutions free.
//!
//! Every lookup runs on its own short-lived exchange; nothing here pipelines
//! requests on a shared stream.

use super::wire::{self, ReflectionRequest};
use super::{ReflectionError, ReflectionVersion, negotiate};
use crate::BoxError;
use http_body::Body as HttpBody;
use prost::Message;
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;
use tokio::sync::{Mutex, OnceCell};
use tonic::client::GrpcService;
use tonic::transport::Channel;
use tonic_reflection::pb::v1::server_reflection_response::MessageResponse;

/// One descriptor file fetched over reflection.
///
/// Immutable once created; owned by the resolver's cache, keyed by filename,
/// for the lifetime of the [`ReflectionClient`].
#[derive(Debug, Clone)]
pub struct DescriptorFile {
    raw: Vec<u8>,
    descriptor: FileDescriptorProto,
}

impl DescriptorFile {
    fn decode(raw: Vec<u8>) -> Result<Self, prost::DecodeError> {
        let descriptor = FileDescriptorProto::decode(raw.as_slice())?;
        Ok(Self { raw, descriptor })
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// The wire encoding this file arrived as.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Filenames this file declares as imports.
    pub fn dependencies(&self) -> &[String] {
        &self.descriptor.dependency
    }
}

#[derive(Default)]
struct DescriptorCache {
    /// Filename -> descriptor file, never evicted.
    files: HashMap<String, DescriptorFile>,
    /// Symbol -> closure filenames, so a fully cached symbol resolves with
    /// zero network requests.
    symbols: HashMap<String, Vec<String>>,
}

/// A generic client for the gRPC Server Reflection Protocol.
pub struct ReflectionClient<S = Channel> {
    service: S,
    preferred: ReflectionVersion,
    active: OnceCell<ReflectionVersion>,
    cache: Mutex<DescriptorCache>,
}

impl<S> ReflectionClient<S>
where
    S: GrpcService<tonic::body::Body> + Clone,
    S::Error: Into<BoxError>,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    pub fn new(service: S, preferred: ReflectionVersion) -> Self {
        Self {
            service,
            preferred,
            active: OnceCell::new(),
            cache: Mutex::new(DescriptorCache::default()),
        }
    }

    /// The version negotiation settled on, if it has run.
    pub fn active_version(&self) -> Option<ReflectionVersion> {
        self.active.get().copied()
    }

    /// Returns the negotiated version, probing the peer on first use.
    ///
    /// Concurrent first-time callers share a single in-flight negotiation.
    pub async fn negotiated_version(&self) -> Result<ReflectionVersion, ReflectionError> {
        self.active
            .get_or_try_init(|| negotiate::negotiate(&self.service, self.preferred))
            .await
            .copied()
    }

    /// Asks the reflection service for the file containing the requested
    /// symbol (e.g. `my.package.MyService`) and every file transitively
    /// reachable through declared dependencies.
    ///
    /// Each distinct filename appears exactly once in the returned set, no
    /// matter how many import paths reach it.
    pub async fn file_descriptor_set_by_symbol(
        &self,
        symbol: &str,
    ) -> Result<FileDescriptorSet, ReflectionError> {
        let version = self.negotiated_version().await?;
        let started = Instant::now();

        let mut cache = self.cache.lock().await;
        if let Some(closure) = cache.symbols.get(symbol) {
            tracing::debug!(symbol, files = closure.len(), "symbol served from cache");
            return Ok(assemble(closure, &cache));
        }

        let response = self
            .request(version, ReflectionRequest::FileContainingSymbol(symbol.to_string()))
            .await?;
        let blobs = expect_descriptors(response)?;
        if blobs.is_empty() {
            return Err(ReflectionError::MissingDescriptor(symbol.to_string()));
        }

        let mut closure = Vec::new();
        let mut seen = HashSet::new();
        let mut pending = VecDeque::new();

        for raw in blobs {
            admit(raw, &mut cache, &mut closure, &mut seen, &mut pending)?;
        }

        while let Some(filename) = pending.pop_front() {
            if seen.contains(&filename) {
                continue;
            }
            if cache.files.contains_key(&filename) {
                // Known from an earlier resolution; only its edges are new work.
                mark(&filename, &cache, &mut closure, &mut seen, &mut pending);
                continue;
            }
            let response = self
                .request(version, ReflectionRequest::FileByFilename(filename.clone()))
                .await?;
            for raw in expect_descriptors(response)? {
                admit(raw, &mut cache, &mut closure, &mut seen, &mut pending)?;
            }
            if !seen.contains(&filename) {
                return Err(ReflectionError::MissingDescriptor(filename));
            }
        }

        cache.symbols.insert(symbol.to_string(), closure.clone());
        tracing::debug!(
            symbol,
            files = closure.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "resolved symbol over reflection"
        );
        Ok(assemble(&closure, &cache))
    }

    /// Lists all services exposed by the server.
    pub async fn list_services(&self) -> Result<Vec<String>, ReflectionError> {
        let version = self.negotiated_version().await?;
        let response = self.request(version, ReflectionRequest::ListServices).await?;
        match response {
            MessageResponse::ListServicesResponse(resp) => {
                Ok(resp.service.into_iter().map(|s| s.name).collect())
            }
            MessageResponse::ErrorResponse(e) => Err(ReflectionError::Peer {
                code: e.error_code,
                message: e.error_message,
            }),
            other => Err(ReflectionError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    async fn request(
        &self,
        version: ReflectionVersion,
        request: ReflectionRequest,
    ) -> Result<MessageResponse, ReflectionError> {
        wire::request_once(self.service.clone(), version, request).await
    }
}

/// Unwraps a descriptor payload, surfacing peer-reported errors as such.
fn expect_descriptors(response: MessageResponse) -> Result<Vec<Vec<u8>>, ReflectionError> {
    match response {
        MessageResponse::FileDescriptorResponse(resp) => Ok(resp.file_descriptor_proto),
        MessageResponse::ErrorResponse(e) => Err(ReflectionError::Peer {
            code: e.error_code,
            message: e.error_message,
        }),
        other => Err(ReflectionError::UnexpectedResponse(format!("{other:?}"))),
    }
}

/// Records a freshly fetched blob in the cache and folds it into the closure
/// being built. Servers are free to return a file more than once or to
/// eagerly include dependencies; the `seen` set keeps the result exact.
fn admit(
    raw: Vec<u8>,
    cache: &mut DescriptorCache,
    closure: &mut Vec<String>,
    seen: &mut HashSet<String>,
    pending: &mut VecDeque<String>,
) -> Result<(), ReflectionError> {
    let file = DescriptorFile::decode(raw)?;
    let name = file.name().to_string();
    cache.files.entry(name.clone()).or_insert(file);
    mark(&name, cache, closure, seen, pending);
    Ok(())
}

fn mark(
    name: &str,
    cache: &DescriptorCache,
    closure: &mut Vec<String>,
    seen: &mut HashSet<String>,
    pending: &mut VecDeque<String>,
) {
    if !seen.insert(name.to_string()) {
        return;
    }
    closure.push(name.to_string());
    if let Some(file) = cache.files.get(name) {
        for dep in file.dependencies() {
            if !seen.contains(dep) {
                pending.push_back(dep.clone());
            }
        }
    }
}

fn assemble(closure: &[String], cache: &DescriptorCache) -> FileDescriptorSet {
    FileDescriptorSet {
        file: closure
            .iter()
            .filter_map(|name| cache.files.get(name))
            .map(|file| file.descriptor.clone())
            .collect(),
    }
}
