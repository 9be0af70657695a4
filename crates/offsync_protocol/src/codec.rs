//! CBOR encoding helpers for protocol messages.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value to CBOR bytes.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes).map_err(ProtocolError::codec)?;
    Ok(bytes)
}

/// Decodes a value from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::de::from_reader(bytes).map_err(ProtocolError::codec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PushKind, PushRequest, RecordId, Revision};

    #[test]
    fn push_request_survives_cbor() {
        let request = PushRequest {
            id: RecordId::new("note-1"),
            kind: PushKind::Patch,
            body: Some(b"hello".to_vec()),
            base_revision: Some(Revision::new("3")),
        };

        let bytes = to_cbor(&request).unwrap();
        let decoded: PushRequest = from_cbor(&bytes).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let result: ProtocolResult<PushRequest> = from_cbor(&[0xFF, 0x00, 0x13]);
        assert!(matches!(result, Err(ProtocolError::Codec(_))));
    }
}
