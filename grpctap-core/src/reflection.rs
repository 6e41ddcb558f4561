//! # Server Reflection
//!
//! This module contains the logic necessary to interact with the gRPC Server
//! Reflection Protocol, in either of its two functionally equivalent
//! versions (`grpc.reflection.v1` and `grpc.reflection.v1alpha`).
//!
//! It enables the client to query a server for its own Protobuf schema at
//! runtime, allowing `grpctap` to function without pre-compiled descriptors.
//!
//! ## References
//!
//! * [gRPC Server Reflection Protocol](https://github.com/grpc/grpc/blob/master/doc/server-reflection.md)

pub mod client;
mod negotiate;
mod wire;

use crate::ErrorClass;
use std::fmt;

/// A supported version of the reflection protocol.
///
/// The two versions are wire-identical apart from the message namespace; the
/// negotiator probes them in preference order and remembers the winner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReflectionVersion {
    V1,
    V1Alpha,
}

impl ReflectionVersion {
    /// The version to fall back to when this one is unimplemented.
    pub fn other(self) -> Self {
        match self {
            Self::V1 => Self::V1Alpha,
            Self::V1Alpha => Self::V1,
        }
    }

    /// Negotiation order starting from the preferred version.
    pub(crate) fn candidates(self) -> [Self; 2] {
        [self, self.other()]
    }

    /// Fully qualified name of the reflection service for this version.
    pub fn service_name(self) -> &'static str {
        match self {
            Self::V1 => "grpc.reflection.v1.ServerReflection",
            Self::V1Alpha => "grpc.reflection.v1alpha.ServerReflection",
        }
    }
}

impl Default for ReflectionVersion {
    fn default() -> Self {
        Self::V1
    }
}

impl fmt::Display for ReflectionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1 => write!(f, "grpc.reflection.v1"),
            Self::V1Alpha => write!(f, "grpc.reflection.v1alpha"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReflectionError {
    #[error(
        "failed to start a stream with the {version} service, reflection might not be supported: '{source}'"
    )]
    StreamInit {
        version: ReflectionVersion,
        #[source]
        source: tonic::Status,
    },

    #[error("the reflection stream returned an error status: '{0}'")]
    Stream(#[source] tonic::Status),

    #[error("reflection probe for {version} timed out after 5000ms")]
    ProbeTimeout { version: ReflectionVersion },

    #[error("failed to initialize reflection client")]
    NegotiationExhausted,

    #[error("server returned reflection error code {code}: {message}")]
    Peer { code: i32, message: String },

    #[error("no descriptor returned for symbol '{0}'")]
    MissingDescriptor(String),

    #[error("response ended without data")]
    EndedWithoutData,

    #[error("received unexpected response type: {0}")]
    UnexpectedResponse(String),

    #[error("failed to decode FileDescriptorProto: {0}")]
    Decode(#[from] prost::DecodeError),
}

impl ReflectionError {
    /// The gRPC status code carried by transport-level variants, if any.
    pub fn grpc_code(&self) -> Option<tonic::Code> {
        match self {
            Self::StreamInit { source, .. } => Some(source.code()),
            Self::Stream(source) => Some(source.code()),
            _ => None,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::StreamInit { .. } | Self::Stream(_) | Self::NegotiationExhausted => {
                ErrorClass::Transport
            }
            Self::ProbeTimeout { .. } => ErrorClass::Timeout,
            Self::Peer { .. }
            | Self::MissingDescriptor(_)
            | Self::EndedWithoutData
            | Self::UnexpectedResponse(_)
            | Self::Decode(_) => ErrorClass::Protocol,
        }
    }
}
