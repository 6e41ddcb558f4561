//! # Generic gRPC Transport
//!
//! Low-level building blocks for performing gRPC calls with dynamic message
//! types. Unlike standard `tonic` clients, which are strongly typed against
//! generated structs, everything here works with `serde_json::Value`
//! payloads, transcoded to the Protobuf binary format on the fly against
//! runtime-resolved message descriptors.

pub mod client;
pub mod codec;
