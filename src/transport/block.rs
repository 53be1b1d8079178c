//! IEEE 488.2 binary blocks.
//!
//! Definite-length blocks look like `#<n><length><payload>`, where `<n>` is a
//! single digit giving the number of digits in `<length>`. `#0` announces an
//! indefinite block that runs until the line terminator.

use super::TransportError;

/// Element type of a binary block payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericType {
    /// Signed 8-bit integer.
    I8,
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 16-bit integer.
    I16,
    /// Signed 32-bit integer.
    I32,
    /// IEEE 754 single precision.
    F32,
    /// IEEE 754 double precision.
    F64,
}

impl NumericType {
    /// Size of one element in bytes.
    pub fn size(self) -> usize {
        match self {
            NumericType::I8 | NumericType::U8 => 1,
            NumericType::I16 => 2,
            NumericType::I32 | NumericType::F32 => 4,
            NumericType::F64 => 8,
        }
    }
}

/// Byte order of multi-byte elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// Most significant byte first (SCPI `format:border norm`).
    #[default]
    Big,
    /// Least significant byte first (SCPI `format:border swap`).
    Little,
}

/// Parsed block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockHeader {
    /// Payload of known length starting at `offset`.
    Definite {
        /// Index of the first payload byte.
        offset: usize,
        /// Payload length in bytes.
        length: usize,
    },
    /// Payload starting at `offset` that ends at the line terminator.
    Indefinite {
        /// Index of the first payload byte.
        offset: usize,
    },
}

/// Parse a block header at the start of `buf` (leading whitespace is skipped).
///
/// Returns `Ok(None)` when more bytes are needed.
pub fn parse_header(buf: &[u8]) -> Result<Option<BlockHeader>, TransportError> {
    let start = match buf.iter().position(|b| !b.is_ascii_whitespace()) {
        Some(i) => i,
        None => return Ok(None),
    };
    if buf[start] != b'#' {
        return Err(TransportError::Protocol(format!(
            "binary block must start with '#', got {:?}",
            buf[start] as char
        )));
    }
    let Some(&digit) = buf.get(start + 1) else {
        return Ok(None);
    };
    if !digit.is_ascii_digit() {
        return Err(TransportError::Protocol(format!(
            "invalid block length digit {:?}",
            digit as char
        )));
    }
    let n_digits = usize::from(digit - b'0');
    if n_digits == 0 {
        return Ok(Some(BlockHeader::Indefinite { offset: start + 2 }));
    }
    let len_start = start + 2;
    let len_end = len_start + n_digits;
    if buf.len() < len_end {
        return Ok(None);
    }
    let length = std::str::from_utf8(&buf[len_start..len_end])
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| TransportError::Protocol("invalid block length field".into()))?;
    Ok(Some(BlockHeader::Definite {
        offset: len_end,
        length,
    }))
}

/// Frame a payload as a definite-length block.
pub fn encode_block(payload: &[u8]) -> Vec<u8> {
    let length = payload.len().to_string();
    let mut out = Vec::with_capacity(2 + length.len() + payload.len());
    out.push(b'#');
    out.extend_from_slice(length.len().to_string().as_bytes());
    out.extend_from_slice(length.as_bytes());
    out.extend_from_slice(payload);
    out
}

/// Decode a payload of fixed-size numbers into `f64` values.
pub fn decode_values(
    payload: &[u8],
    kind: NumericType,
    order: ByteOrder,
) -> Result<Vec<f64>, TransportError> {
    let size = kind.size();
    if payload.len() % size != 0 {
        return Err(TransportError::Protocol(format!(
            "block of {} bytes is not a whole number of {size}-byte elements",
            payload.len()
        )));
    }

    macro_rules! decode {
        ($ty:ty, $n:expr) => {
            payload
                .chunks_exact($n)
                .map(|chunk| {
                    let mut bytes = [0u8; $n];
                    bytes.copy_from_slice(chunk);
                    let value = match order {
                        ByteOrder::Big => <$ty>::from_be_bytes(bytes),
                        ByteOrder::Little => <$ty>::from_le_bytes(bytes),
                    };
                    f64::from(value)
                })
                .collect()
        };
    }

    let values: Vec<f64> = match kind {
        NumericType::I8 => decode!(i8, 1),
        NumericType::U8 => decode!(u8, 1),
        NumericType::I16 => decode!(i16, 2),
        NumericType::I32 => decode!(i32, 4),
        NumericType::F32 => decode!(f32, 4),
        NumericType::F64 => decode!(f64, 8),
    };
    Ok(values)
}

/// Encode `f64` values as big-endian doubles (what `format:data real,64` produces).
pub fn encode_f64_be(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definite_header_is_parsed() {
        let header = parse_header(b"#216abcdefghijklmnop").unwrap().unwrap();
        assert_eq!(
            header,
            BlockHeader::Definite {
                offset: 4,
                length: 16
            }
        );
    }

    #[test]
    fn partial_header_needs_more_bytes() {
        assert_eq!(parse_header(b"#").unwrap(), None);
        assert_eq!(parse_header(b"#41").unwrap(), None);
    }

    #[test]
    fn non_block_is_protocol_error() {
        assert!(matches!(
            parse_header(b"1.0,2.0"),
            Err(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn indefinite_header() {
        assert_eq!(
            parse_header(b"#0abc").unwrap(),
            Some(BlockHeader::Indefinite { offset: 2 })
        );
    }

    #[test]
    fn big_endian_doubles_decode() {
        let payload = encode_f64_be(&[1.5, -2.0]);
        let framed = encode_block(&payload);
        assert_eq!(&framed[..4], b"#216");
        let values = decode_values(&payload, NumericType::F64, ByteOrder::Big).unwrap();
        assert_eq!(values, vec![1.5, -2.0]);
    }

    #[test]
    fn little_endian_i16_decode() {
        let values = decode_values(&[0x01, 0x00, 0xff, 0xff], NumericType::I16, ByteOrder::Little)
            .unwrap();
        assert_eq!(values, vec![1.0, -1.0]);
    }

    #[test]
    fn ragged_payload_is_rejected() {
        assert!(decode_values(&[0, 0, 0], NumericType::F32, ByteOrder::Big).is_err());
    }
}
