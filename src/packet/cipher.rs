//! # Pre-shared Key Cipher
//!
//! AES-256 in ECB mode over the 32-byte key shared with every node.
//!
//! Nodes encrypt exactly one 16-byte block per packet, so there is no
//! chaining or padding to deal with. Inputs that are not a whole number of
//! blocks are rejected as malformed rather than guessed at.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;

use crate::error::{GatewayError, Result};

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// Pre-shared key length in bytes
pub const KEY_SIZE: usize = 32;

/// ECB block cipher keyed with the gateway's pre-shared key
#[derive(Clone)]
pub struct PresharedCipher {
    cipher: Aes256,
}

impl std::fmt::Debug for PresharedCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material
        f.debug_struct("PresharedCipher").finish_non_exhaustive()
    }
}

impl PresharedCipher {
    /// Create a cipher from the raw 32-byte key
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        Self {
            cipher: Aes256::new(GenericArray::from_slice(key)),
        }
    }

    /// Decrypt `ciphertext` block by block
    ///
    /// # Errors
    ///
    /// Returns `FrameMalformed` if the input is empty or not a multiple of
    /// [`BLOCK_SIZE`]. A wrong key is *not* detected here; that is the job of
    /// the checksum over the plaintext.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(GatewayError::FrameMalformed(format!(
                "ciphertext length {} is not a whole number of {}-byte blocks",
                ciphertext.len(),
                BLOCK_SIZE
            )));
        }

        let mut plaintext = ciphertext.to_vec();
        for chunk in plaintext.chunks_exact_mut(BLOCK_SIZE) {
            self.cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
        }
        Ok(plaintext)
    }

    /// Encrypt a single block in place (node simulators, test fixtures)
    pub fn encrypt_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        self.cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
        key
    }

    #[test]
    fn test_fips197_vector() {
        // FIPS-197 appendix C.3 (AES-256)
        let cipher = PresharedCipher::new(&test_key());
        let mut block: [u8; 16] = [
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77,
            0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF,
        ];
        cipher.encrypt_block(&mut block);
        assert_eq!(
            block,
            [
                0x8E, 0xA2, 0xB7, 0xCA, 0x51, 0x67, 0x45, 0xBF,
                0xEA, 0xFC, 0x49, 0x90, 0x4B, 0x49, 0x60, 0x89,
            ]
        );

        let plain = cipher.decrypt(&block).unwrap();
        assert_eq!(plain[0], 0x00);
        assert_eq!(plain[15], 0xFF);
    }

    #[test]
    fn test_decrypt_two_blocks_independently() {
        let cipher = PresharedCipher::new(&test_key());
        let mut block = [0x42u8; 16];
        cipher.encrypt_block(&mut block);

        // ECB: identical plaintext blocks give identical ciphertext blocks
        let mut two = block.to_vec();
        two.extend_from_slice(&block);
        let plain = cipher.decrypt(&two).unwrap();
        assert_eq!(plain, vec![0x42u8; 32]);
    }

    #[test]
    fn test_decrypt_rejects_partial_block() {
        let cipher = PresharedCipher::new(&test_key());
        assert!(matches!(
            cipher.decrypt(&[0u8; 15]),
            Err(GatewayError::FrameMalformed(_))
        ));
        assert!(matches!(
            cipher.decrypt(&[]),
            Err(GatewayError::FrameMalformed(_))
        ));
    }

    #[test]
    fn test_debug_hides_key() {
        let cipher = PresharedCipher::new(&[0xAB; KEY_SIZE]);
        let rendered = format!("{:?}", cipher);
        assert!(!rendered.contains("171"));
        assert!(!rendered.to_lowercase().contains("ab"));
    }
}
