//! Entropy source for disk identifiers.

use rand::rngs::OsRng;
use rand::RngCore;
use std::io;

pub trait RandomSource {
    /// Fill `buf` completely or fail.
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<()>;
}

/// Operating system RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<()> {
        OsRng.try_fill_bytes(buf).map_err(io::Error::other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_random_fills_buffer() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        OsRandom.fill(&mut a).unwrap();
        OsRandom.fill(&mut b).unwrap();
        assert_ne!(a, b);
    }
}
