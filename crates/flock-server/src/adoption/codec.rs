//! Frame Codec

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::codec::LengthDelimitedCodec;

/// Largest frame either side will send or accept.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024;

/// 4-byte big-endian length prefix, bounded by [`MAX_FRAME_LENGTH`].
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

pub fn encode_frame<T: Serialize>(message: &T) -> Result<Bytes, serde_json::Error> {
    serde_json::to_vec(message).map(Bytes::from)
}

pub fn decode_frame<T: DeserializeOwned>(frame: &[u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use flock_core::{AdoptRequest, AdoptResponse, Role, RpcRequest, RpcResponse};
    use tokio_util::codec::{Decoder, Encoder};

    fn through_codec(payload: Bytes) -> BytesMut {
        let mut codec = frame_codec();
        let mut buf = BytesMut::new();
        codec.encode(payload, &mut buf).unwrap();
        assert_eq!(&buf[..4], &(buf.len() as u32 - 4).to_be_bytes());
        codec.decode(&mut buf).unwrap().unwrap()
    }

    #[test]
    fn test_adopt_request_preserves_empty_fields() {
        let request = RpcRequest::Adopt(AdoptRequest {
            cluster_token: String::new(),
            controller_address: String::new(),
            role: Role::Agent,
            bootstrap_secret: None,
        });
        let frame = through_codec(encode_frame(&request).unwrap());
        assert_eq!(decode_frame::<RpcRequest>(&frame).unwrap(), request);
    }

    #[test]
    fn test_adopt_response_preserves_false_and_empty_message() {
        let response = RpcResponse::Adopt(AdoptResponse {
            accepted: false,
            message: String::new(),
        });
        let frame = through_codec(encode_frame(&response).unwrap());
        assert_eq!(decode_frame::<RpcResponse>(&frame).unwrap(), response);
    }

    #[test]
    fn test_oversized_frame_is_refused() {
        let mut codec = frame_codec();
        let mut buf = BytesMut::new();
        let payload = Bytes::from(vec![b'x'; MAX_FRAME_LENGTH + 1]);
        assert!(codec.encode(payload, &mut buf).is_err());
    }
}
