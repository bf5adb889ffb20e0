//! # Additive Block Checksum
//!
//! Integrity check for decrypted Loko blocks.
//!
//! The last byte of a block equals the sum of all preceding bytes modulo 256.
//! A mismatch after decryption almost always means the node and the gateway
//! hold different pre-shared keys.

/// Calculate the additive checksum of `data`
///
/// # Arguments
///
/// * `data` - Bytes to sum (everything except the integrity byte)
///
/// # Returns
///
/// * `u8` - Sum of all bytes, modulo 256
///
/// # Examples
///
/// ```
/// use loko_gateway::packet::checksum::sum8;
///
/// assert_eq!(sum8(&[0x01, 0x02, 0x03]), 0x06);
/// assert_eq!(sum8(&[0xFF, 0x02]), 0x01);
/// ```
pub fn sum8(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &byte| acc.wrapping_add(byte))
}

/// Verify a decrypted block against its trailing integrity byte
///
/// Returns `false` for an empty block, since there is no integrity byte to
/// compare against.
pub fn verify(block: &[u8]) -> bool {
    match block.split_last() {
        Some((&integrity, body)) => sum8(body) == integrity,
        None => false,
    }
}

/// Overwrite the last byte of `block` with the checksum of the rest
///
/// Used when building sealed blocks (node simulators, test fixtures).
pub fn seal(block: &mut [u8]) {
    if let Some((last, body)) = block.split_last_mut() {
        *last = sum8(body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum8_empty() {
        assert_eq!(sum8(&[]), 0x00);
    }

    #[test]
    fn test_sum8_wraps() {
        assert_eq!(sum8(&[0xFF; 16]), 0xF0);
        assert_eq!(sum8(&[0x80, 0x80]), 0x00);
    }

    #[test]
    fn test_verify_accepts_sealed_block() {
        let mut block = [0x12, 0x34, 0x56, 0x78, 0x00];
        seal(&mut block);
        assert_eq!(block[4], 0x14);
        assert!(verify(&block));
    }

    #[test]
    fn test_verify_rejects_any_single_byte_change() {
        let mut block = [0u8; 16];
        for (i, byte) in block.iter_mut().enumerate() {
            *byte = (i as u8).wrapping_mul(37);
        }
        seal(&mut block);

        for i in 0..block.len() {
            let mut corrupted = block;
            corrupted[i] ^= 0x01;
            assert!(!verify(&corrupted), "Flipping byte {} should break the checksum", i);
        }
    }

    #[test]
    fn test_verify_empty_block() {
        assert!(!verify(&[]));
    }

    #[test]
    fn test_verify_single_byte_block() {
        // Nothing to sum, so the integrity byte must be zero
        assert!(verify(&[0x00]));
        assert!(!verify(&[0x01]));
    }
}
