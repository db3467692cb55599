use ethers::types::U256;
use ethers::utils::keccak256;
use thiserror::Error;

pub const WORD_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("return buffer too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },

    #[error("value {0} does not fit in 64 bits")]
    Overflow(U256),
}

/// Decodes a returned `uint256[]` into its words.
///
/// Some deployed sale contracts return a length word that promises more
/// elements than the buffer carries. The declared length is clamped to the
/// whole words actually present instead of failing; only a buffer too short
/// to hold the offset and length words is rejected.
pub fn decode_uint_array(bytes: &[u8]) -> Result<Vec<U256>, DecodeError> {
    let min = 2 * WORD_SIZE;
    if bytes.len() < min {
        return Err(DecodeError::TooShort {
            len: bytes.len(),
            min,
        });
    }

    let length_at = head_offset(bytes).unwrap_or(WORD_SIZE);
    let declared = word_at(bytes, length_at);
    let data_start = length_at + WORD_SIZE;
    let available = (bytes.len() - data_start) / WORD_SIZE;

    let count = if declared > U256::from(available) {
        available
    } else {
        declared.as_usize()
    };

    Ok((0..count)
        .map(|i| word_at(bytes, data_start + i * WORD_SIZE))
        .collect())
}

/// Builds calldata: 4-byte selector of `signature` followed by each argument
/// as a big-endian 32-byte word.
pub fn encode_call(signature: &str, args: &[U256]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + args.len() * WORD_SIZE);
    out.extend_from_slice(&selector(signature));
    for arg in args {
        let mut word = [0u8; WORD_SIZE];
        arg.to_big_endian(&mut word);
        out.extend_from_slice(&word);
    }
    out
}

pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn u256_to_u64(value: U256) -> Result<u64, DecodeError> {
    if value > U256::from(u64::MAX) {
        return Err(DecodeError::Overflow(value));
    }
    Ok(value.as_u64())
}

// The head word is honoured only when it points at a word boundary that
// still leaves room for the length word.
fn head_offset(bytes: &[u8]) -> Option<usize> {
    let offset = word_at(bytes, 0);
    if offset > U256::from(bytes.len()) {
        return None;
    }
    let offset = offset.as_usize();
    if offset < WORD_SIZE || offset % WORD_SIZE != 0 || offset + WORD_SIZE > bytes.len() {
        return None;
    }
    Some(offset)
}

fn word_at(bytes: &[u8], at: usize) -> U256 {
    U256::from_big_endian(&bytes[at..at + WORD_SIZE])
}

#[cfg(test)]
pub(crate) fn encode_words(words: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(words.len() * WORD_SIZE);
    for value in words {
        let mut word = [0u8; WORD_SIZE];
        U256::from(*value).to_big_endian(&mut word);
        out.extend_from_slice(&word);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_standard_dynamic_array() {
        let bytes = encode_words(&[0x20, 3, 7, 8, 9]);
        let words = decode_uint_array(&bytes).expect("decodes");
        assert_eq!(words, vec![U256::from(7), U256::from(8), U256::from(9)]);
    }

    #[test]
    fn clamps_declared_length_to_words_present() {
        let bytes = encode_words(&[0x20, 10, 1, 2, 3, 4]);
        let words = decode_uint_array(&bytes).expect("clamped, not an error");
        assert_eq!(words.len(), 4);
        assert_eq!(words[3], U256::from(4));
    }

    #[test]
    fn ignores_trailing_partial_word() {
        let mut bytes = encode_words(&[0x20, 3, 1, 2]);
        bytes.extend_from_slice(&[0xff; 10]);
        let words = decode_uint_array(&bytes).expect("decodes");
        assert_eq!(words, vec![U256::from(1), U256::from(2)]);
    }

    #[test]
    fn rejects_buffers_under_two_words() {
        let err = decode_uint_array(&[0u8; 63]).unwrap_err();
        assert_eq!(err, DecodeError::TooShort { len: 63, min: 64 });
        assert!(decode_uint_array(&[]).is_err());
    }

    #[test]
    fn exactly_two_words_yields_empty_array() {
        let bytes = encode_words(&[0x20, 5]);
        assert!(decode_uint_array(&bytes).expect("decodes").is_empty());
    }

    #[test]
    fn bogus_head_offset_falls_back_to_second_word() {
        let bytes = encode_words(&[0xdead_beef, 2, 11, 12]);
        let words = decode_uint_array(&bytes).expect("decodes");
        assert_eq!(words, vec![U256::from(11), U256::from(12)]);
    }

    #[test]
    fn honours_non_default_head_offset() {
        let bytes = encode_words(&[0x40, 999, 2, 5, 6]);
        let words = decode_uint_array(&bytes).expect("decodes");
        assert_eq!(words, vec![U256::from(5), U256::from(6)]);
    }

    #[test]
    fn encode_call_prefixes_selector() {
        let data = encode_call("preview(uint256,uint256)", &[U256::from(101), U256::from(2)]);
        assert_eq!(data.len(), 4 + 64);
        assert_eq!(&data[..4], &selector("preview(uint256,uint256)"));
        assert_eq!(data[4 + 31], 101);
        assert_eq!(data[4 + 63], 2);
    }

    #[test]
    fn transfer_selector_matches_known_value() {
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
    }

    #[test]
    fn u256_to_u64_rejects_overflow() {
        assert_eq!(u256_to_u64(U256::from(42)).unwrap(), 42);
        assert!(u256_to_u64(U256::from(u64::MAX) + 1).is_err());
    }
}
