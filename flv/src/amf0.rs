//! AMF0 serialization.
//!
//! Two surfaces: cursor-style writers appending directly to a [`TagBuffer`]
//! (used by the muxer for the `onMetaData` script tag, where entry order is
//! fixed) and an [`Amf0Value`] tree with encode/decode (used for RTMP command
//! messages and their replies).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::tag::TagBuffer;

pub const NUMBER: u8 = 0x00;
pub const BOOLEAN: u8 = 0x01;
pub const STRING: u8 = 0x02;
pub const OBJECT: u8 = 0x03;
pub const NULL: u8 = 0x05;
pub const ECMA_ARRAY: u8 = 0x08;

const OBJECT_END_MARKER: [u8; 3] = [0x00, 0x00, 0x09];

#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("String too long: {0} bytes (max {})", u16::MAX)]
    StringTooLong(usize),
}

#[derive(Error, Debug)]
pub enum DecodingError {
    #[error("Unknown AMF0 type marker: {0}")]
    UnknownType(u8),

    #[error("Insufficient data")]
    InsufficientData,

    #[error("Invalid UTF-8 string")]
    InvalidUtf8,
}

/// AMF0 values. Objects and ECMA arrays keep their entries as ordered pairs
/// because FLV metadata consumers see the serialized order.
#[derive(Debug, Clone, PartialEq)]
pub enum Amf0Value {
    Number(f64),
    Boolean(bool),
    String(String),
    Object(Vec<(String, Amf0Value)>),
    Null,
    EcmaArray(Vec<(String, Amf0Value)>),
}

/// Writes a `number` value: marker 0x00 + 8-byte big-endian IEEE-754 double.
pub fn put_number(tag: &mut TagBuffer, value: f64) {
    tag.put_u8(NUMBER);
    tag.put_f64_be(value);
}

/// Writes a `boolean` value: marker 0x01 + one byte.
pub fn put_boolean(tag: &mut TagBuffer, value: bool) {
    tag.put_u8(BOOLEAN);
    tag.put_u8(value as u8);
}

/// Writes a u16-length-prefixed UTF-8 string without a type marker, as used
/// for object keys.
pub fn put_key(tag: &mut TagBuffer, key: &str) -> Result<(), EncodingError> {
    if key.len() > u16::MAX as usize {
        return Err(EncodingError::StringTooLong(key.len()));
    }
    tag.put_u16_be(key.len() as u16);
    tag.put_slice(key.as_bytes());
    Ok(())
}

/// Writes a `string` value: marker 0x02 + length-prefixed UTF-8.
pub fn put_string(tag: &mut TagBuffer, value: &str) -> Result<(), EncodingError> {
    if value.len() > u16::MAX as usize {
        return Err(EncodingError::StringTooLong(value.len()));
    }
    tag.put_u8(STRING);
    put_key(tag, value)
}

/// Opens an `ecma-array`: marker 0x08 + declared entry count. The caller
/// emits `count` entries and closes the array with [`put_object_end`].
pub fn put_ecma_array_header(tag: &mut TagBuffer, count: u32) {
    tag.put_u8(ECMA_ARRAY);
    tag.put_u32_be(count);
}

/// The object/array terminator sentinel: empty key + end marker.
pub fn put_object_end(tag: &mut TagBuffer) {
    tag.put_slice(&OBJECT_END_MARKER);
}

/// Convenience: a number-valued array entry (`key`, marker, double).
pub fn put_number_entry(tag: &mut TagBuffer, key: &str, value: f64) -> Result<(), EncodingError> {
    put_key(tag, key)?;
    put_number(tag, value);
    Ok(())
}

/// Convenience: a boolean-valued array entry.
pub fn put_boolean_entry(tag: &mut TagBuffer, key: &str, value: bool) -> Result<(), EncodingError> {
    put_key(tag, key)?;
    put_boolean(tag, value);
    Ok(())
}

pub fn encode_amf0_values(values: &[Amf0Value]) -> Result<Bytes, EncodingError> {
    let mut buf = BytesMut::new();
    for value in values {
        encode_value(&mut buf, value)?;
    }
    Ok(buf.freeze())
}

fn encode_value(buf: &mut BytesMut, value: &Amf0Value) -> Result<(), EncodingError> {
    match value {
        Amf0Value::Number(n) => {
            buf.put_u8(NUMBER);
            buf.put_f64(*n);
        }
        Amf0Value::Boolean(b) => {
            buf.put_u8(BOOLEAN);
            buf.put_u8(*b as u8);
        }
        Amf0Value::String(s) => {
            buf.put_u8(STRING);
            encode_key(buf, s)?;
        }
        Amf0Value::Object(pairs) => {
            buf.put_u8(OBJECT);
            encode_pairs(buf, pairs)?;
        }
        Amf0Value::Null => buf.put_u8(NULL),
        Amf0Value::EcmaArray(pairs) => {
            buf.put_u8(ECMA_ARRAY);
            buf.put_u32(pairs.len() as u32);
            encode_pairs(buf, pairs)?;
        }
    }
    Ok(())
}

fn encode_key(buf: &mut BytesMut, key: &str) -> Result<(), EncodingError> {
    if key.len() > u16::MAX as usize {
        return Err(EncodingError::StringTooLong(key.len()));
    }
    buf.put_u16(key.len() as u16);
    buf.put_slice(key.as_bytes());
    Ok(())
}

fn encode_pairs(buf: &mut BytesMut, pairs: &[(String, Amf0Value)]) -> Result<(), EncodingError> {
    for (key, value) in pairs {
        encode_key(buf, key)?;
        encode_value(buf, value)?;
    }
    buf.put_slice(&OBJECT_END_MARKER);
    Ok(())
}

pub fn decode_amf0_values(payload: &[u8]) -> Result<Vec<Amf0Value>, DecodingError> {
    let mut buf = Bytes::copy_from_slice(payload);
    let mut result = Vec::new();
    while buf.has_remaining() {
        result.push(decode_value(&mut buf)?);
    }
    Ok(result)
}

fn decode_value(buf: &mut Bytes) -> Result<Amf0Value, DecodingError> {
    if !buf.has_remaining() {
        return Err(DecodingError::InsufficientData);
    }
    let marker = buf.get_u8();
    let value = match marker {
        NUMBER => {
            if buf.remaining() < 8 {
                return Err(DecodingError::InsufficientData);
            }
            Amf0Value::Number(buf.get_f64())
        }
        BOOLEAN => {
            if buf.remaining() < 1 {
                return Err(DecodingError::InsufficientData);
            }
            Amf0Value::Boolean(buf.get_u8() != 0)
        }
        STRING => Amf0Value::String(decode_string(buf)?),
        OBJECT => Amf0Value::Object(decode_pairs(buf)?),
        NULL => Amf0Value::Null,
        ECMA_ARRAY => {
            if buf.remaining() < 4 {
                return Err(DecodingError::InsufficientData);
            }
            // The declared count is advisory; the terminator is load-bearing.
            let _declared = buf.get_u32();
            Amf0Value::EcmaArray(decode_pairs(buf)?)
        }
        other => return Err(DecodingError::UnknownType(other)),
    };
    Ok(value)
}

fn decode_string(buf: &mut Bytes) -> Result<String, DecodingError> {
    if buf.remaining() < 2 {
        return Err(DecodingError::InsufficientData);
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(DecodingError::InsufficientData);
    }
    let bytes = buf.copy_to_bytes(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| DecodingError::InvalidUtf8)
}

fn decode_pairs(buf: &mut Bytes) -> Result<Vec<(String, Amf0Value)>, DecodingError> {
    let mut pairs = Vec::new();
    loop {
        if buf.remaining() < 3 {
            return Err(DecodingError::InsufficientData);
        }
        if buf[..3] == OBJECT_END_MARKER {
            buf.advance(3);
            return Ok(pairs);
        }
        let key = {
            let len = buf.get_u16() as usize;
            if buf.remaining() < len {
                return Err(DecodingError::InsufficientData);
            }
            let bytes = buf.copy_to_bytes(len);
            String::from_utf8(bytes.to_vec()).map_err(|_| DecodingError::InvalidUtf8)?
        };
        let value = decode_value(buf)?;
        pairs.push((key, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tag::{TAG_HEADER_LEN, TagKind};

    #[test]
    fn round_trip_scalar_values() {
        let values = vec![
            Amf0Value::Number(30.0),
            Amf0Value::Number(-0.5),
            Amf0Value::Boolean(true),
            Amf0Value::Boolean(false),
            Amf0Value::String("onMetaData".into()),
            Amf0Value::Null,
        ];
        let encoded = encode_amf0_values(&values).unwrap();
        assert_eq!(decode_amf0_values(&encoded).unwrap(), values);
    }

    #[test]
    fn round_trip_ecma_array_preserves_order() {
        let values = vec![Amf0Value::EcmaArray(vec![
            ("width".into(), Amf0Value::Number(640.0)),
            ("height".into(), Amf0Value::Number(360.0)),
            ("stereo".into(), Amf0Value::Boolean(true)),
        ])];
        let encoded = encode_amf0_values(&values).unwrap();
        assert_eq!(decode_amf0_values(&encoded).unwrap(), values);
    }

    #[test]
    fn round_trip_nested_object() {
        let values = vec![
            Amf0Value::String("connect".into()),
            Amf0Value::Number(1.0),
            Amf0Value::Object(vec![
                ("app".into(), Amf0Value::String("live".into())),
                ("fpad".into(), Amf0Value::Boolean(false)),
            ]),
        ];
        let encoded = encode_amf0_values(&values).unwrap();
        assert_eq!(decode_amf0_values(&encoded).unwrap(), values);
    }

    #[test]
    fn number_serializes_as_big_endian_double() {
        let mut tag = TagBuffer::new();
        tag.start_tag(TagKind::ScriptData, 0);
        put_number(&mut tag, 1.0);
        let bytes = tag.finish_tag().unwrap();
        assert_eq!(
            &bytes[TAG_HEADER_LEN..TAG_HEADER_LEN + 9],
            &[0x00, 0x3F, 0xF0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );

        // Independent of host endianness for every finite value.
        for value in [0.0, -1.0, 640.0, 44100.0, f64::MIN_POSITIVE, 1e300] {
            assert_eq!(value.to_be_bytes(), value.to_bits().to_be_bytes());
        }
    }

    #[test]
    fn writer_output_matches_value_encoder() {
        let mut tag = TagBuffer::new();
        tag.start_tag(TagKind::ScriptData, 0);
        put_string(&mut tag, "onMetaData").unwrap();
        put_ecma_array_header(&mut tag, 2);
        put_number_entry(&mut tag, "framerate", 30.0).unwrap();
        put_boolean_entry(&mut tag, "stereo", true).unwrap();
        put_object_end(&mut tag);
        let bytes = tag.finish_tag().unwrap();
        let payload = &bytes[TAG_HEADER_LEN..bytes.len() - 4];

        let expected = encode_amf0_values(&[
            Amf0Value::String("onMetaData".into()),
            Amf0Value::EcmaArray(vec![
                ("framerate".into(), Amf0Value::Number(30.0)),
                ("stereo".into(), Amf0Value::Boolean(true)),
            ]),
        ])
        .unwrap();
        assert_eq!(payload, &expected[..]);
    }

    #[test]
    fn rejects_oversized_string() {
        let long = "x".repeat(u16::MAX as usize + 1);
        assert!(matches!(
            encode_amf0_values(&[Amf0Value::String(long)]),
            Err(EncodingError::StringTooLong(_))
        ));
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let encoded = encode_amf0_values(&[Amf0Value::Number(1.0)]).unwrap();
        assert!(matches!(
            decode_amf0_values(&encoded[..5]),
            Err(DecodingError::InsufficientData)
        ));
    }
}
