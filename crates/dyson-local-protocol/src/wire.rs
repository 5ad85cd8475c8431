//! Wire format: status messages are UTF-8 JSON documents tagged by `msg`.

use dyson_local_types::InboundMessage;

use crate::error::{DecodeErrorKind, MessageDecodeError};

/// Largest payload decoded. Status documents are a few KiB at most.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Decode a status-topic payload.
///
/// An unknown `msg` value decodes to [`InboundMessage::Unknown`]; only
/// payloads that are not JSON objects with a `msg` field are errors.
pub fn decode_status(payload: &[u8]) -> Result<InboundMessage, MessageDecodeError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(MessageDecodeError {
            kind: DecodeErrorKind::TooLarge(payload.len()),
            payload: String::from_utf8_lossy(&payload[..256]).into_owned(),
        });
    }

    let text = std::str::from_utf8(payload).map_err(|_| MessageDecodeError {
        kind: DecodeErrorKind::Utf8,
        payload: String::from_utf8_lossy(payload).into_owned(),
    })?;

    serde_json::from_str(text).map_err(|e| MessageDecodeError {
        kind: e.into(),
        payload: text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_sensor_payload() {
        let payload = br#"{"msg":"ENVIRONMENTAL-CURRENT-SENSOR-DATA","data":{"p25r":"0003"}}"#;
        match decode_status(payload).unwrap() {
            InboundMessage::SensorReading(reading) => {
                assert!(reading.data.p25r.is_some());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_not_an_error() {
        let payload = br#"{"msg":"LOCATION","data":{}}"#;
        assert_eq!(decode_status(payload).unwrap(), InboundMessage::Unknown);
    }

    #[test]
    fn malformed_json_keeps_payload() {
        let err = decode_status(b"{\"msg\": ").unwrap_err();
        assert!(matches!(err.kind, DecodeErrorKind::Json(_)));
        assert_eq!(err.payload, "{\"msg\": ");
    }

    #[test]
    fn invalid_utf8_is_rejected() {
        let err = decode_status(&[0xff, 0xfe, b'{']).unwrap_err();
        assert!(matches!(err.kind, DecodeErrorKind::Utf8));
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let payload = vec![b' '; MAX_PAYLOAD_SIZE + 1];
        let err = decode_status(&payload).unwrap_err();
        assert!(matches!(err.kind, DecodeErrorKind::TooLarge(_)));
        assert_eq!(err.payload.len(), 256);
    }
}
