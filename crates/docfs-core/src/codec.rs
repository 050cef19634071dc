//! Byte ↔ text codec for document-backed content
//!
//! Document bodies only hold text, and the backend mangles control
//! characters, so every byte is stored as its decimal value. Tokens are
//! joined with [`DELIMITER`]; a zero byte is the token `0`, which keeps an
//! empty document distinct from a document holding one zero byte.

use std::fmt::Write;

/// Separator between byte tokens. Never appears inside a token.
pub const DELIMITER: char = ',';

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("token {0:?} is not a byte value")]
    ByteOutOfRange(String),
}

/// Render bytes as delimited decimal tokens.
pub fn encode(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len() * 4);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            text.push(DELIMITER);
        }
        // Writing into a String cannot fail.
        let _ = write!(text, "{}", byte);
    }
    text
}

/// Parse text produced by [`encode`], tolerating backend line wrapping and
/// partial tokens.
pub fn decode(text: &str) -> Result<Vec<u8>, CodecError> {
    let unwrapped: String = text.chars().filter(|c| !matches!(c, '\n' | '\r')).collect();

    let mut bytes = Vec::with_capacity(unwrapped.len() / 2);
    for token in unwrapped.split(DELIMITER) {
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let value = token
            .parse::<u8>()
            .map_err(|_| CodecError::ByteOutOfRange(token.to_string()))?;
        bytes.push(value);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_joins_decimal_tokens() {
        assert_eq!(encode(b"hi"), "104,105");
        assert_eq!(encode(&[0, 255, 7]), "0,255,7");
        assert_eq!(encode(&[]), "");
    }

    #[test]
    fn test_zero_byte_is_not_an_empty_document() {
        assert_eq!(encode(&[0]), "0");
        assert_eq!(decode("0").unwrap(), vec![0]);
        assert_eq!(decode("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_decode_ignores_line_breaks() {
        assert_eq!(decode("104,1\n01,\r\n108\n").unwrap(), b"hel".to_vec());
    }

    #[test]
    fn test_decode_skips_malformed_tokens() {
        // Trailing delimiter from older writers, a half-written token and stray text
        assert_eq!(decode("104,105,").unwrap(), b"hi".to_vec());
        assert_eq!(decode("104,-3,x1,,105").unwrap(), b"hi".to_vec());
    }

    #[test]
    fn test_decode_rejects_out_of_range_values() {
        assert_eq!(
            decode("104,256"),
            Err(CodecError::ByteOutOfRange("256".to_string()))
        );
        assert!(decode("99999999999999999999999").is_err());
    }

    proptest! {
        #[test]
        fn prop_round_trip(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            prop_assert_eq!(decode(&encode(&bytes)).unwrap(), bytes);
        }

        #[test]
        fn prop_no_empty_tokens(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
            let text = encode(&bytes);
            prop_assert!(!text.contains(",,"));
            prop_assert!(!text.starts_with(DELIMITER));
            prop_assert!(!text.ends_with(DELIMITER));
        }
    }
}
