use bytes::{Buf, BufMut, Bytes, BytesMut};

use tokio::io::{self, AsyncRead, AsyncReadExt};

use crate::{
    err::{DecodeError, DecodeErrorKind, EncodeError, EncodeErrorKind},
    v3::{decode_packet, FixedHeader, MqttPacket},
};

/*
 * MQTT v3.1.1, the Remaining Length field of the fixed header is encoded
 * onto at most 4 bytes, bounding a packet body at 268,435,455 bytes.
 */

const MAX_LEN_BYTES: usize = 4;

const MAX_LEN: usize = (128 as u64).pow(4) as usize;

fn short_buffer(needed: usize, remaining: usize) -> DecodeError {
    return DecodeError::new(
        DecodeErrorKind::ShortBuffer,
        format!("Needed {needed} more bytes, but only {remaining} remain in the packet."),
    );
}

pub fn decode_u8(bytes: &mut Bytes) -> Result<u8, DecodeError> {
    if bytes.remaining() < 1 {
        return Err(short_buffer(1, 0));
    }
    return Ok(bytes.get_u8());
}

pub fn decode_u16(bytes: &mut Bytes) -> Result<u16, DecodeError> {
    if bytes.remaining() < 2 {
        return Err(short_buffer(2, bytes.remaining()));
    }
    return Ok(bytes.get_u16());
}

pub fn decode_u32(bytes: &mut Bytes) -> Result<u32, DecodeError> {
    if bytes.remaining() < 4 {
        return Err(short_buffer(4, bytes.remaining()));
    }
    return Ok(bytes.get_u32());
}

/// Decodes a two byte length prefix followed by that many bytes of UTF-8.
pub fn decode_utf8(bytes: &mut Bytes) -> Result<String, DecodeError> {
    let buf = decode_bytes(bytes)?;

    match String::from_utf8(buf.to_vec()) {
        Ok(string) => return Ok(string),
        Err(err) => {
            return Err(DecodeError::new(
                DecodeErrorKind::Utf8ParseError,
                err.to_string(),
            ))
        }
    }
}

/// Decodes a two byte length prefix followed by that many raw bytes.
pub fn decode_bytes(bytes: &mut Bytes) -> Result<Bytes, DecodeError> {
    let len = decode_u16(bytes)? as usize;

    if len > bytes.remaining() {
        return Err(short_buffer(len, bytes.remaining()));
    }

    let slice = bytes.slice(0..len);
    bytes.advance(len);
    return Ok(slice);
}

/// Two consecutive length-prefixed UTF-8 strings.
pub fn decode_string_pair(bytes: &mut Bytes) -> Result<(String, String), DecodeError> {
    let name = decode_utf8(bytes)?;
    let value = decode_utf8(bytes)?;
    return Ok((name, value));
}

pub fn encode_utf8(bytes: &mut BytesMut, val: &str) {
    encode_bytes(bytes, val.as_bytes());
}

pub fn encode_bytes(bytes: &mut BytesMut, val: &[u8]) {
    bytes.put_u16(val.len() as u16);
    bytes.put_slice(val);
}

pub fn encode_string_pair(bytes: &mut BytesMut, name: &str, value: &str) {
    encode_utf8(bytes, name);
    encode_utf8(bytes, value);
}

/// Encodes `len` as a variable byte integer, base 128 with the high bit of
/// each byte used as a continuation flag. Returns the number of bytes used.
pub fn encode_packet_length(bytes: &mut BytesMut, mut len: usize) -> Result<usize, EncodeError> {
    if len >= MAX_LEN {
        return Err(EncodeError::new(
            EncodeErrorKind::OversizedPayload,
            format!("Packet body exceeded the max encodable length, found length {len}"),
        ));
    }

    let mut num_bytes = 0;

    loop {
        let mut d: u8 = (len % 128) as u8;

        len /= 128;

        if len > 0 {
            d |= 128;
        }

        bytes.put_u8(d);
        num_bytes += 1;

        if len == 0 {
            break;
        }
    }

    return Ok(num_bytes);
}

/// Decodes the variable byte Remaining Length that starts at byte index 1,
/// after the type/flags byte. Does NOT advance the buffer; the caller is
/// responsible for stepping past the header.
///
/// ## Returns (header_len, rest_len)
/// where 'header_len' is the total fixed header size in bytes and
/// 'rest_len' is the length of the packet body that follows it.
pub fn decode_packet_length(bytes: &Bytes) -> Result<(usize, usize), DecodeError> {
    let mut mult: usize = 1;
    let mut len: usize = 0;

    for i in 1..=MAX_LEN_BYTES {
        if i >= bytes.len() {
            return Err(short_buffer(1, 0));
        }

        let c = bytes[i];

        // Add the 7 least significant bits of c to the value.
        len += (c as usize & 127) * mult;
        mult *= 128;

        // The most significant bit flags a continuation into the next byte.
        if (c & 128) == 0 {
            return Ok((i + 1, len));
        }
    }

    // A continuation flag on the 4th length byte would require a 5th byte,
    // which the protocol forbids.
    return Err(DecodeError::new(
        DecodeErrorKind::MalformedLength,
        String::from("Remaining Length encoding ran past the 4 byte maximum."),
    ));
}

/// Reads one framed packet from the stream: the type/flags byte, 1-4 length
/// bytes, then exactly the encoded body length, and dispatches the decode.
pub async fn read_packet<S, E>(stream: &mut S) -> Result<MqttPacket, E>
where
    S: AsyncRead + Unpin,
    E: From<io::Error> + From<DecodeError>,
{
    let mut header = [0u8; 5];
    header[0] = stream.read_u8().await?;

    let mut end = 1;
    loop {
        if end == 5 {
            return Err(DecodeError::new(
                DecodeErrorKind::MalformedLength,
                String::from("Remaining Length encoding ran past the 4 byte maximum."),
            )
            .into());
        }

        let byte = stream.read_u8().await?;
        header[end] = byte;
        end += 1;

        if byte & 128 == 0 {
            break;
        }
    }

    let mut header_buf = Bytes::copy_from_slice(&header[0..end]);
    let f_header = FixedHeader::decode(&mut header_buf)?;

    let mut buf = BytesMut::new();
    buf.resize(f_header.rest_len(), 0);
    stream.read_exact(&mut buf).await?;

    match decode_packet(f_header, &mut buf.into()) {
        Ok(packet) => return Ok(packet),
        Err(err) => return Err(err.into()),
    }
}



#[cfg(test)]
mod field_codecs {
    use bytes::{Bytes, BytesMut};

    use crate::{
        err::DecodeErrorKind,
        io::{
            decode_bytes, decode_string_pair, decode_u16, decode_utf8, encode_bytes,
            encode_string_pair, encode_utf8,
        },
    };

    #[test]
    fn utf8_round_trip() {
        let mut buf = BytesMut::new();
        encode_utf8(&mut buf, "hello/world");

        let mut bytes: Bytes = buf.into();
        assert_eq!(decode_utf8(&mut bytes).unwrap(), "hello/world");
        assert_eq!(bytes.len(), 0);
    }

    #[test]
    fn utf8_rejects_invalid_bytes() {
        let mut bytes = Bytes::from_static(&[0, 2, 0xC3, 0x28]);
        let err = decode_utf8(&mut bytes).unwrap_err();
        assert_eq!(err.kind(), DecodeErrorKind::Utf8ParseError);
    }

    #[test]
    fn binary_round_trip() {
        let mut buf = BytesMut::new();
        encode_bytes(&mut buf, &[2, 3, 4, 5]);

        let mut bytes: Bytes = buf.into();
        assert_eq!(decode_bytes(&mut bytes).unwrap(), Bytes::from_static(&[2, 3, 4, 5]));
    }

    #[test]
    fn string_pair_round_trip() {
        let mut buf = BytesMut::new();
        encode_string_pair(&mut buf, "name", "value");

        let mut bytes: Bytes = buf.into();
        let (name, value) = decode_string_pair(&mut bytes).unwrap();
        assert_eq!(name, "name");
        assert_eq!(value, "value");
    }

    #[test]
    fn short_buffer_errors() {
        let mut bytes = Bytes::from_static(&[0]);
        assert_eq!(
            decode_u16(&mut bytes).unwrap_err().kind(),
            DecodeErrorKind::ShortBuffer
        );

        // length prefix promises 4 bytes, only 2 present.
        let mut bytes = Bytes::from_static(&[0, 4, 1, 2]);
        assert_eq!(
            decode_bytes(&mut bytes).unwrap_err().kind(),
            DecodeErrorKind::ShortBuffer
        );
    }
}
