//! # Grpctap Core
//!
//! `grpctap-core` is a dynamic gRPC testing client. It can call any gRPC
//! server without compile-time knowledge of the Protobuf schema: method and
//! message definitions are discovered at connection time through the gRPC
//! Server Reflection Protocol, or supplied statically as `.proto` sources or
//! a precompiled binary descriptor set.
//!
//! ## Key Components
//!
//! * **[`client::TapClient`]:** The main entry point. It resolves methods
//!   through the schema registry, dispatches all four gRPC call shapes, and
//!   normalizes every outcome into a [`client::CallEnvelope`].
//! * **[`registry::SchemaRegistry`]:** Turns a schema source into a callable
//!   method table, parsing method paths and memoizing one invocation handle
//!   per service.
//! * **[`reflection::client::ReflectionClient`]:** A reflection client that
//!   negotiates between `grpc.reflection.v1` and `grpc.reflection.v1alpha`
//!   and resolves the full descriptor dependency closure for a symbol.
//! * **[`stream::StreamBridge`]:** Adapts the event-driven response side of
//!   a streaming call into a pull-based, cancellable sequence.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, and `tonic` to ensure that
//! consumers use compatible versions of these underlying dependencies.

pub mod client;
pub mod grpc;
pub mod reflection;
pub mod registry;
pub mod stream;

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Coarse fault classes, so callers can route retry policy without
/// matching on concrete error enums.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Local setup fault (no schema, unknown method, bad metadata). Never
    /// worth retrying.
    Configuration,
    /// The peer answered the reflection protocol with an error, or sent a
    /// malformed descriptor stream.
    Protocol,
    /// Network-level fault; the code defaults to `UNKNOWN` when the
    /// transport supplied none.
    Transport,
    /// A deadline elapsed before the peer responded.
    Timeout,
}
