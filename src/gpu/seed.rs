// src/gpu/seed.rs - Argon2d initial seed construction
// Tree location: ./src/gpu/seed.rs

//! 256-byte initial seed uploaded by `Worker::setup`
//!
//! The `init_memory` kernel expects the Argon2 H0 input laid out as
//! little-endian u32 parameters followed by the block header and salt:
//!
//! | offset | field |
//! |---|---|
//! | 0 | lanes (1) |
//! | 4 | hash length (32) |
//! | 8 | memory cost (512) |
//! | 12 | iterations (1) |
//! | 16 | version (0x13) |
//! | 20 | type (0 = Argon2d) |
//! | 24 | header length |
//! | 28 | header bytes |
//! | 174 | salt length |
//! | 178 | salt |

use byteorder::{ByteOrder, LittleEndian};
use crate::{ClargonError, Result};
use super::{INITIAL_SEED_SIZE, MEMORY_COST};

const ARGON2_LANES: u32 = 1;
const ARGON2_HASH_LENGTH: u32 = 32;
const ARGON2_ITERATIONS: u32 = 1;
const ARGON2_VERSION: u32 = 0x13;
const ARGON2_TYPE_D: u32 = 0;
const ARGON2_SALT: &[u8] = b"nimiqrocks!";

const HEADER_OFFSET: usize = 28;
const SALT_LENGTH_OFFSET: usize = 174;
const SALT_OFFSET: usize = 178;

/// Longest block header that fits before the salt
pub const MAX_HEADER_LEN: usize = SALT_LENGTH_OFFSET - HEADER_OFFSET;

/// Initial seed for one mining round
#[derive(Clone, PartialEq, Eq)]
pub struct InitialSeed([u8; INITIAL_SEED_SIZE]);

impl InitialSeed {
    /// Build the seed for a serialized block header
    pub fn from_header(header: &[u8]) -> Result<Self> {
        if header.len() > MAX_HEADER_LEN {
            return Err(ClargonError::Seed(format!(
                "Block header is {} bytes, at most {} fit in the initial seed",
                header.len(), MAX_HEADER_LEN
            )));
        }

        let mut seed = [0u8; INITIAL_SEED_SIZE];
        LittleEndian::write_u32(&mut seed[0..], ARGON2_LANES);
        LittleEndian::write_u32(&mut seed[4..], ARGON2_HASH_LENGTH);
        LittleEndian::write_u32(&mut seed[8..], MEMORY_COST);
        LittleEndian::write_u32(&mut seed[12..], ARGON2_ITERATIONS);
        LittleEndian::write_u32(&mut seed[16..], ARGON2_VERSION);
        LittleEndian::write_u32(&mut seed[20..], ARGON2_TYPE_D);
        LittleEndian::write_u32(&mut seed[24..], header.len() as u32);
        seed[HEADER_OFFSET..HEADER_OFFSET + header.len()].copy_from_slice(header);
        LittleEndian::write_u32(&mut seed[SALT_LENGTH_OFFSET..], ARGON2_SALT.len() as u32);
        seed[SALT_OFFSET..SALT_OFFSET + ARGON2_SALT.len()].copy_from_slice(ARGON2_SALT);

        Ok(Self(seed))
    }

    /// Wrap an already laid out seed
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let seed: [u8; INITIAL_SEED_SIZE] = bytes.try_into().map_err(|_| {
            ClargonError::Seed(format!(
                "Initial seed must be {} bytes, got {}",
                INITIAL_SEED_SIZE, bytes.len()
            ))
        })?;
        Ok(Self(seed))
    }

    /// Decode a hex block header and build its seed
    pub fn from_header_hex(header_hex: &str) -> Result<Self> {
        let header = hex::decode(header_hex.trim())
            .map_err(|e| ClargonError::Seed(format!("Invalid header hex: {}", e)))?;
        Self::from_header(&header)
    }

    /// Raw seed bytes
    pub fn as_bytes(&self) -> &[u8; INITIAL_SEED_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for InitialSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let header_len = LittleEndian::read_u32(&self.0[24..]) as usize;
        write!(f, "InitialSeed(header_len={}, {}..)", header_len, hex::encode(&self.0[..8]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_layout() {
        let header = [0xabu8; 146];
        let seed = InitialSeed::from_header(&header).unwrap();
        let bytes = seed.as_bytes();

        assert_eq!(LittleEndian::read_u32(&bytes[0..]), 1);
        assert_eq!(LittleEndian::read_u32(&bytes[4..]), 32);
        assert_eq!(LittleEndian::read_u32(&bytes[8..]), 512);
        assert_eq!(LittleEndian::read_u32(&bytes[12..]), 1);
        assert_eq!(LittleEndian::read_u32(&bytes[16..]), 0x13);
        assert_eq!(LittleEndian::read_u32(&bytes[20..]), 0);
        assert_eq!(LittleEndian::read_u32(&bytes[24..]), 146);
        assert!(bytes[28..174].iter().all(|&b| b == 0xab));
        assert_eq!(LittleEndian::read_u32(&bytes[174..]), 11);
        assert_eq!(&bytes[178..189], b"nimiqrocks!");
        assert!(bytes[189..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_short_header_leaves_gap_zeroed() {
        let seed = InitialSeed::from_header(&[1, 2, 3]).unwrap();
        let bytes = seed.as_bytes();
        assert_eq!(LittleEndian::read_u32(&bytes[24..]), 3);
        assert_eq!(&bytes[28..31], &[1, 2, 3]);
        assert!(bytes[31..174].iter().all(|&b| b == 0));
        assert_eq!(&bytes[178..189], b"nimiqrocks!");
    }

    #[test]
    fn test_oversized_header_rejected() {
        let err = InitialSeed::from_header(&[0u8; 147]).unwrap_err();
        assert!(matches!(err, ClargonError::Seed(_)));
    }

    #[test]
    fn test_from_bytes_requires_exact_size() {
        assert!(InitialSeed::from_bytes(&[0u8; 255]).is_err());
        assert!(InitialSeed::from_bytes(&[0u8; 257]).is_err());
        let seed = InitialSeed::from_bytes(&[7u8; 256]).unwrap();
        assert_eq!(seed.as_bytes()[255], 7);
    }

    #[test]
    fn test_from_header_hex() {
        let seed = InitialSeed::from_header_hex("00ff10").unwrap();
        assert_eq!(&seed.as_bytes()[28..31], &[0x00, 0xff, 0x10]);
        assert!(InitialSeed::from_header_hex("zz").is_err());
    }
}
