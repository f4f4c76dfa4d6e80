//! Opaque lookup handles for stored secrets.
//!
//! A handle is the only credential a reader presents. The default is 64
//! symbols from a 62-letter alphabet, about 381 bits.

use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Bytes at or above this value are discarded so every symbol is equally likely.
const ACCEPT_BELOW: u8 = (256 / ALPHABET.len() * ALPHABET.len()) as u8;

pub const DEFAULT_HANDLE_LEN: usize = 64;
pub const MIN_HANDLE_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum HandleError {
    /// The OS random source could not be read. There is no weaker fallback.
    #[error("entropy source unavailable: {0}")]
    EntropyUnavailable(#[from] rand::Error),
}

/// Produces the external lookup key for a new secret.
pub trait HandleGenerator: Send + Sync {
    fn generate(&self) -> Result<String, HandleError>;
}

/// Draws handles from the operating system CSPRNG.
#[derive(Debug, Clone)]
pub struct RandomHandleGenerator {
    len: usize,
}

impl RandomHandleGenerator {
    pub fn new() -> Self {
        Self {
            len: DEFAULT_HANDLE_LEN,
        }
    }

    /// Lengths below `MIN_HANDLE_LEN` are raised to it.
    pub fn with_len(len: usize) -> Self {
        Self {
            len: len.max(MIN_HANDLE_LEN),
        }
    }
}

impl Default for RandomHandleGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleGenerator for RandomHandleGenerator {
    fn generate(&self) -> Result<String, HandleError> {
        let mut handle = String::with_capacity(self.len);
        let mut buf = [0u8; 96];
        while handle.len() < self.len {
            OsRng.try_fill_bytes(&mut buf)?;
            for &byte in buf.iter().filter(|&&b| b < ACCEPT_BELOW) {
                handle.push(ALPHABET[byte as usize % ALPHABET.len()] as char);
                if handle.len() == self.len {
                    break;
                }
            }
        }
        Ok(handle)
    }
}
