//! # Echo Service
//!
//! **INTERNAL USE ONLY**: This crate exists solely to provide a gRPC server
//! implementation and descriptor set for integration testing `grpctap-core`.
//! It is not intended for production use.
//!
//! Unlike a `tonic-prost-build` setup, everything here is written by hand so
//! the workspace builds and tests without `protoc` installed:
//!
//! * [`pb`] holds plain `prost`-derived message structs.
//! * [`EchoServiceServer`] is the service trait plus tower glue, in the shape
//!   the tonic code generator emits.
//! * [`file_descriptor_set`] assembles the matching descriptors with
//!   `prost-types`, split across two files (the service file imports the
//!   messages file) so schema resolution has a real dependency edge to chase.

pub mod pb {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct EchoRequest {
        #[prost(string, tag = "1")]
        pub message: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct EchoResponse {
        #[prost(string, tag = "1")]
        pub message: String,
    }
}

mod server;

pub use server::{EchoService, EchoServiceServer};

use prost::Message as _;
use prost_types::{
    DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet,
    MethodDescriptorProto, ServiceDescriptorProto, field_descriptor_proto,
};

/// Filename of the descriptor file declaring `echo.EchoService`.
pub const SERVICE_FILE: &str = "echo.proto";
/// Filename of the descriptor file declaring the echo messages, imported by
/// [`SERVICE_FILE`].
pub const MESSAGES_FILE: &str = "echo_messages.proto";

/// Descriptors for the echo service, equivalent to what `protoc` would emit
/// for the two proto files under `grpctap-core/tests/protos`.
pub fn file_descriptor_set() -> FileDescriptorSet {
    FileDescriptorSet {
        file: vec![messages_file(), service_file()],
    }
}

/// [`file_descriptor_set`] in the standard binary encoding.
pub fn encoded_file_descriptor_set() -> Vec<u8> {
    file_descriptor_set().encode_to_vec()
}

fn service_file() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(SERVICE_FILE.to_string()),
        package: Some("echo".to_string()),
        dependency: vec![MESSAGES_FILE.to_string()],
        syntax: Some("proto3".to_string()),
        service: vec![ServiceDescriptorProto {
            name: Some("EchoService".to_string()),
            method: vec![
                method("UnaryEcho", false, false),
                method("ServerStreamingEcho", false, true),
                method("ClientStreamingEcho", true, false),
                method("BidirectionalEcho", true, true),
            ],
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn messages_file() -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(MESSAGES_FILE.to_string()),
        package: Some("echo".to_string()),
        syntax: Some("proto3".to_string()),
        message_type: vec![message("EchoRequest"), message("EchoResponse")],
        ..Default::default()
    }
}

fn method(name: &str, client_streaming: bool, server_streaming: bool) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.to_string()),
        input_type: Some(".echo.EchoRequest".to_string()),
        output_type: Some(".echo.EchoResponse".to_string()),
        client_streaming: Some(client_streaming),
        server_streaming: Some(server_streaming),
        ..Default::default()
    }
}

fn message(name: &str) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        field: vec![FieldDescriptorProto {
            name: Some("message".to_string()),
            number: Some(1),
            label: Some(field_descriptor_proto::Label::Optional as i32),
            r#type: Some(field_descriptor_proto::Type::String as i32),
            json_name: Some("message".to_string()),
            ..Default::default()
        }],
        ..Default::default()
    }
}
