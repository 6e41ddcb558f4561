//! # Schema Registry
//!
//! Turns a schema source (server reflection, `.proto` sources, or a
//! precompiled binary descriptor set) into a callable method table.
//!
//! Static sources are materialized into a `DescriptorPool` up front.
//! Reflection is resolved lazily, one service at a time, and memoized: each
//! full service path maps to a single-assignment shared future, so N
//! concurrent first-time lookups collapse into exactly one resolution and
//! every caller observes the identical handle. Handles live until the owning
//! client is closed.

use crate::grpc::client::GrpcClient;
use crate::reflection::client::ReflectionClient;
use crate::reflection::{ReflectionError, ReflectionVersion};
use crate::{BoxError, ErrorClass};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use http_body::Body as HttpBody;
use prost_reflect::{DescriptorPool, MethodDescriptor, ServiceDescriptor};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tonic::client::GrpcService;
use tonic::transport::Channel;

/// Where the schema comes from.
#[derive(Debug, Clone)]
pub enum SchemaSource {
    /// Discover definitions from the peer via the reflection protocol.
    Reflection { preferred: ReflectionVersion },
    /// Compile `.proto` sources at startup (no external `protoc` involved).
    /// `includes` defaults to the parent directories of `files`.
    ProtoFiles {
        files: Vec<PathBuf>,
        includes: Vec<PathBuf>,
    },
    /// A binary `FileDescriptorSet`, e.g. produced by `protoc -o`.
    DescriptorSet(Vec<u8>),
}

impl SchemaSource {
    /// Reflection with the default version preference.
    pub fn reflection() -> Self {
        Self::Reflection {
            preferred: ReflectionVersion::default(),
        }
    }

    pub fn proto_files(files: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self::ProtoFiles {
            files: files.into_iter().map(Into::into).collect(),
            includes: Vec::new(),
        }
    }
}

/// A parsed method path. Both parts are guaranteed non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodPath {
    service: String,
    method: String,
}

impl MethodPath {
    /// Fully qualified service path, e.g. `my.package.MyService`.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Bare method name, e.g. `MyMethod`.
    pub fn method(&self) -> &str {
        &self.method
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("No schema loaded: configure proto files, a descriptor set, or reflection")]
    NoSchemaLoaded,

    #[error("invalid method path '{0}', expected '/package.Service/Method'")]
    InvalidMethodPath(String),

    #[error("method '{0}' does not match any loaded service")]
    UnknownMethod(String),

    #[error("method name '{0}' is ambiguous across loaded services, use a fully qualified path")]
    AmbiguousMethod(String),

    #[error(
        "bare method name '{0}' cannot be resolved against a reflection-backed schema, use a fully qualified '/package.Service/Method' path"
    )]
    UnqualifiedMethod(String),

    #[error("service '{0}' is not defined in the loaded schema")]
    ServiceNotFound(String),

    #[error("method '{method}' is not defined by service '{service}'")]
    MethodNotFound { service: String, method: String },

    #[error("failed to compile proto sources: '{0}'")]
    ProtoCompile(#[source] Arc<protox::Error>),

    #[error("invalid descriptor set: '{0}'")]
    InvalidDescriptorSet(#[source] Arc<prost_reflect::DescriptorError>),

    #[error("reflection returned an unusable descriptor set: '{0}'")]
    ResolvedDescriptor(#[source] Arc<prost_reflect::DescriptorError>),

    #[error("reflection resolution failed: '{0}'")]
    Reflection(#[source] Arc<ReflectionError>),
}

impl RegistryError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ResolvedDescriptor(_) => ErrorClass::Protocol,
            Self::Reflection(err) => err.class(),
            _ => ErrorClass::Configuration,
        }
    }
}

/// Per-service invocation handle: the service descriptor, its method table,
/// and one transport handle. Created lazily, cached by full service path.
pub struct ServiceHandle<S = Channel> {
    service: ServiceDescriptor,
    transport: GrpcClient<S>,
}

impl<S> std::fmt::Debug for ServiceHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("service", &self.service.full_name())
            .finish_non_exhaustive()
    }
}

impl<S> ServiceHandle<S> {
    pub fn service(&self) -> &ServiceDescriptor {
        &self.service
    }

    pub fn method(&self, name: &str) -> Option<MethodDescriptor> {
        self.service.methods().find(|m| m.name() == name)
    }

    pub fn transport(&self) -> GrpcClient<S>
    where
        S: Clone,
    {
        self.transport.clone()
    }
}

enum Schema<S> {
    None,
    Static(DescriptorPool),
    Reflection(Arc<ReflectionClient<S>>),
}

impl<S> Clone for Schema<S> {
    fn clone(&self) -> Self {
        match self {
            Self::None => Self::None,
            Self::Static(pool) => Self::Static(pool.clone()),
            Self::Reflection(client) => Self::Reflection(Arc::clone(client)),
        }
    }
}

type ServiceFuture<S> = Shared<BoxFuture<'static, Result<Arc<ServiceHandle<S>>, Arc<RegistryError>>>>;

pub struct SchemaRegistry<S = Channel> {
    schema: Schema<S>,
    transport: GrpcClient<S>,
    services: Mutex<HashMap<String, ServiceFuture<S>>>,
}

impl<S> SchemaRegistry<S>
where
    S: GrpcService<tonic::body::Body> + Clone + Send + Sync + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
    S::ResponseBody: HttpBody<Data = tonic::codegen::Bytes> + Send + 'static,
    <S::ResponseBody as HttpBody>::Error: Into<BoxError> + Send,
{
    /// Builds a registry over `service`. Static sources are loaded eagerly
    /// and fail here; reflection defers all network work to first use. With
    /// no source, every lookup fails with [`RegistryError::NoSchemaLoaded`].
    pub fn new(source: Option<SchemaSource>, service: S) -> Result<Self, RegistryError> {
        let schema = match source {
            None => Schema::None,
            Some(SchemaSource::Reflection { preferred }) => Schema::Reflection(Arc::new(
                ReflectionClient::new(service.clone(), preferred),
            )),
            Some(SchemaSource::ProtoFiles { files, includes }) => {
                Schema::Static(compile_protos(&files, &includes)?)
            }
            Some(SchemaSource::DescriptorSet(bytes)) => Schema::Static(
                DescriptorPool::decode(bytes.as_slice())
                    .map_err(|e| RegistryError::InvalidDescriptorSet(Arc::new(e)))?,
            ),
        };
        Ok(Self {
            schema,
            transport: GrpcClient::new(service),
            services: Mutex::new(HashMap::new()),
        })
    }

    /// The reflection client backing this registry, if any.
    pub fn reflection(&self) -> Option<&Arc<ReflectionClient<S>>> {
        match &self.schema {
            Schema::Reflection(client) => Some(client),
            _ => None,
        }
    }

    /// Lists the fully qualified names of all known services, from the
    /// static pool or from the peer via reflection.
    pub async fn list_services(&self) -> Result<Vec<String>, RegistryError> {
        match &self.schema {
            Schema::None => Err(RegistryError::NoSchemaLoaded),
            Schema::Static(pool) => Ok(pool
                .services()
                .map(|s| s.full_name().to_string())
                .collect()),
            Schema::Reflection(reflection) => reflection
                .list_services()
                .await
                .map_err(|e| RegistryError::Reflection(Arc::new(e))),
        }
    }

    /// Parses `/pkg.Service/Method`, `pkg.Service/Method`, or a bare
    /// `Method` name. The bare form is only valid when exactly one loaded
    /// service defines that method.
    pub fn parse_method_path(&self, method: &str) -> Result<MethodPath, RegistryError> {
        let trimmed = method.strip_prefix('/').unwrap_or(method);
        if let Some((service, name)) = trimmed.rsplit_once('/') {
            if service.is_empty() || name.is_empty() || service.contains('/') {
                return Err(RegistryError::InvalidMethodPath(method.to_string()));
            }
            return Ok(MethodPath {
                service: service.to_string(),
                method: name.to_string(),
            });
        }
        if trimmed.is_empty() {
            return Err(RegistryError::InvalidMethodPath(method.to_string()));
        }
        self.disambiguate(trimmed)
    }

    fn disambiguate(&self, name: &str) -> Result<MethodPath, RegistryError> {
        let pool = match &self.schema {
            Schema::None => return Err(RegistryError::NoSchemaLoaded),
            Schema::Reflection(_) => {
                return Err(RegistryError::UnqualifiedMethod(name.to_string()));
            }
            Schema::Static(pool) => pool,
        };
        let mut matches = pool
            .services()
            .filter(|s| s.methods().any(|m| m.name() == name));
        let Some(service) = matches.next() else {
            return Err(RegistryError::UnknownMethod(name.to_string()));
        };
        if matches.next().is_some() {
            return Err(RegistryError::AmbiguousMethod(name.to_string()));
        }
        Ok(MethodPath {
            service: service.full_name().to_string(),
            method: name.to_string(),
        })
    }

    /// Returns the invocation handle for `service_path`, resolving it on
    /// first access. Concurrent first-time callers attach to the same
    /// in-flight resolution and get the identical `Arc`.
    ///
    /// Only successful resolutions stay memoized. A failed one is evicted so
    /// the next call retries; a transient transport fault must not poison the
    /// service path for the lifetime of the client.
    pub async fn service_handle(
        &self,
        service_path: &str,
    ) -> Result<Arc<ServiceHandle<S>>, RegistryError> {
        let future = {
            let mut services = self.services.lock().expect("service cache lock poisoned");
            match services.get(service_path) {
                Some(future) => future.clone(),
                None => {
                    let future = self.resolve_future(service_path);
                    services.insert(service_path.to_string(), future.clone());
                    future
                }
            }
        };
        let result = future.clone().await;
        if result.is_err() {
            let mut services = self.services.lock().expect("service cache lock poisoned");
            // A concurrent caller may already have started a fresh attempt;
            // only evict the future that actually failed.
            if services.get(service_path).is_some_and(|f| f.ptr_eq(&future)) {
                services.remove(service_path);
            }
        }
        result.map_err(|e| (*e).clone())
    }

    fn resolve_future(&self, service_path: &str) -> ServiceFuture<S> {
        let path = service_path.to_string();
        let schema = self.schema.clone();
        let transport = self.transport.clone();
        async move {
            let pool = match schema {
                Schema::None => return Err(Arc::new(RegistryError::NoSchemaLoaded)),
                Schema::Static(pool) => pool,
                Schema::Reflection(reflection) => {
                    let fd_set = reflection
                        .file_descriptor_set_by_symbol(&path)
                        .await
                        .map_err(|e| Arc::new(RegistryError::Reflection(Arc::new(e))))?;
                    DescriptorPool::from_file_descriptor_set(fd_set)
                        .map_err(|e| Arc::new(RegistryError::ResolvedDescriptor(Arc::new(e))))?
                }
            };
            let service = pool
                .get_service_by_name(&path)
                .ok_or_else(|| Arc::new(RegistryError::ServiceNotFound(path.clone())))?;
            tracing::debug!(service = %path, "service handle resolved");
            Ok(Arc::new(ServiceHandle { service, transport }))
        }
        .boxed()
        .shared()
    }
}

fn compile_protos(files: &[PathBuf], includes: &[PathBuf]) -> Result<DescriptorPool, RegistryError> {
    let mut include_paths = includes.to_vec();
    if include_paths.is_empty() {
        for file in files {
            if let Some(parent) = file.parent() {
                if !include_paths.iter().any(|p| p == parent) {
                    include_paths.push(parent.to_path_buf());
                }
            }
        }
    }
    if include_paths.is_empty() {
        include_paths.push(PathBuf::from("."));
    }
    let fd_set =
        protox::compile(files, &include_paths).map_err(|e| RegistryError::ProtoCompile(Arc::new(e)))?;
    DescriptorPool::from_file_descriptor_set(fd_set)
        .map_err(|e| RegistryError::InvalidDescriptorSet(Arc::new(e)))
}
