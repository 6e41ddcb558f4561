//! A `tonic::codec::Codec` bridging JSON values and Protobuf wire bytes.
//!
//! The codec carries the message descriptors for both call directions.
//! Outgoing values are validated against the input descriptor while being
//! deserialized into a `DynamicMessage`; incoming bytes are decoded with the
//! output descriptor and serialized back into a `serde_json::Value`. No
//! generated types are involved anywhere.

use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor};
use tonic::{
    Status,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
};

pub struct JsonCodec {
    input: MessageDescriptor,
    output: MessageDescriptor,
}

impl JsonCodec {
    /// `input` describes the request message type, `output` the response.
    pub fn new(input: MessageDescriptor, output: MessageDescriptor) -> Self {
        Self { input, output }
    }
}

impl Codec for JsonCodec {
    type Encode = serde_json::Value;
    type Decode = serde_json::Value;

    type Encoder = JsonEncoder;
    type Decoder = JsonDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        JsonEncoder {
            descriptor: self.input.clone(),
        }
    }

    fn decoder(&mut self) -> Self::Decoder {
        JsonDecoder {
            descriptor: self.output.clone(),
        }
    }
}

pub struct JsonEncoder {
    descriptor: MessageDescriptor,
}

impl Encoder for JsonEncoder {
    type Item = serde_json::Value;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        // serde_json::Value acts as its own Deserializer here, so validation
        // against the schema and conversion happen in one pass.
        let message = DynamicMessage::deserialize(self.descriptor.clone(), item).map_err(|e| {
            Status::invalid_argument(format!("JSON payload does not match the Protobuf schema: {e}"))
        })?;
        message.encode_raw(dst);
        Ok(())
    }
}

pub struct JsonDecoder {
    descriptor: MessageDescriptor,
}

impl Decoder for JsonDecoder {
    type Item = serde_json::Value;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let mut message = DynamicMessage::new(self.descriptor.clone());
        message
            .merge(src)
            .map_err(|e| Status::internal(format!("failed to decode Protobuf response: {e}")))?;
        let value = serde_json::to_value(&message)
            .map_err(|e| Status::internal(format!("failed to map response to JSON: {e}")))?;
        Ok(Some(value))
    }
}
