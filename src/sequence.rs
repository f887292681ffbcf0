// src/sequence.rs
//
// Deterministic pseudo-random fillers. These are not crypto-strong; they
// exist to produce filler bytes faster than any storage target can absorb
// them, so the generator never shows up in an I/O measurement.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::constants::{PATTERN_BLOCK_SIZE, PATTERN_BYTE};

// Algorithm and constants borrowed from Numerical Recipes in C (2nd ed),
// section 7.1.
const LCG_A: u64 = 1664525;
const LCG_C: u64 = 1013904223;

// A couple of rounds of the generator applied to zero.
const INITIAL_STATE: u64 = 0x490c734ad1ccf6e9;

/// Generator of not-crypto-strong random numbers.
#[derive(Debug, Clone)]
pub struct NumberSequence {
    next: u64,
}

impl NumberSequence {
    pub fn new() -> Self {
        NumberSequence {
            next: INITIAL_STATE,
        }
    }

    /// Returns the next number in the sequence, interpreted as signed so
    /// callers can use the sign bit as a coin flip.
    pub fn next(&mut self) -> i64 {
        self.next = self.next.wrapping_mul(LCG_A).wrapping_add(LCG_C);
        self.next as i64
    }

    /// Reseeds the sequence.
    pub fn set(&mut self, seed: u64) {
        self.next = seed;
    }
}

impl Default for NumberSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Generator of not-crypto-strong random bytes, usable as a sized stream
/// through the `Read`/`Seek`/`Write` impls.
#[derive(Debug, Clone)]
pub struct ByteSequence {
    size: u64,
    offset: u64,
    next: u64,
}

impl ByteSequence {
    /// Creates a generator that serves `size` bytes through `read` before
    /// reporting end-of-stream. `fill` and `pattern_fill` ignore the size.
    pub fn new(size: u64) -> Self {
        ByteSequence {
            size,
            offset: 0,
            next: INITIAL_STATE,
        }
    }

    /// Sets the generator state.
    pub fn seed(&mut self, seed: u64) {
        self.next = seed;
    }

    /// Fills the whole buffer, advancing the generator state. Bytes are
    /// produced eight at a time with a per-byte tail.
    pub fn fill(&mut self, buf: &mut [u8]) {
        let mut chunks = buf.chunks_exact_mut(8);

        for chunk in &mut chunks {
            self.next = self.next.wrapping_mul(LCG_A).wrapping_add(LCG_C);
            chunk.copy_from_slice(&self.next.to_ne_bytes());
        }

        for byte in chunks.into_remainder() {
            self.next = self.next.wrapping_mul(LCG_A).wrapping_add(LCG_C);
            *byte = self.next as u8;
        }
    }

    /// Fills the buffer with a controlled amount of compressibility, from 0
    /// (incompressible) to 100 (every 64 KiB block is the constant pattern).
    ///
    /// The buffer is split into 64 KiB blocks, with any trailing partial
    /// block counted as one more. `total * compressibility / 100` of them
    /// receive the pattern byte; the rest are generated. Which blocks get
    /// the pattern is decided by a secondary generator seeded from the
    /// current state, except that an exhausted quota leaves no choice.
    pub fn pattern_fill(&mut self, buf: &mut [u8], compressibility: u8) {
        if buf.is_empty() {
            return;
        }

        if compressibility == 0 {
            self.fill(buf);
            return;
        }

        let full_blocks = buf.len() / PATTERN_BLOCK_SIZE;
        let leftover = buf.len() % PATTERN_BLOCK_SIZE;
        let total = full_blocks + usize::from(leftover != 0);

        let mut pattern_left = total * compressibility as usize / 100;
        let mut random_left = total - pattern_left;

        let mut draw = NumberSequence::new();
        draw.set(self.next);

        for i in 0..total {
            let lo = i * PATTERN_BLOCK_SIZE;
            let hi = (lo + PATTERN_BLOCK_SIZE).min(buf.len());
            let block = &mut buf[lo..hi];

            let use_pattern = if random_left == 0 {
                true
            } else if pattern_left == 0 {
                false
            } else {
                draw.next() > 0
            };

            if use_pattern {
                block.fill(PATTERN_BYTE);
                pattern_left -= 1;
            } else {
                self.fill(block);
                random_left -= 1;
            }
        }
    }

    /// Remaining bytes the stream will serve through `read`.
    pub fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.offset)
    }

    /// Zeroes any remaining stream size. Provided for parity with
    /// close-on-drop stream types.
    pub fn close(&mut self) {
        self.size = 0;
    }
}

impl Read for ByteSequence {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.offset >= self.size {
            return Ok(0);
        }

        let n = ((self.size - self.offset) as usize).min(buf.len());
        self.fill(&mut buf[..n]);
        self.offset += n as u64;
        Ok(n)
    }
}

// Seek only changes the position within the stream, not the generator
// state. Reading, seeking to zero, and reading again yields different
// bytes.
impl Seek for ByteSequence {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::Current(delta) => self.offset as i64 + delta,
            SeekFrom::End(delta) => self.size as i64 + delta,
        };

        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("cannot seek to negative offset {target}"),
            ));
        }

        let target = target as u64;
        if target > self.size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "cannot seek past end of sequence to offset {target} (size {})",
                    self.size
                ),
            ));
        }

        self.offset = target;
        Ok(self.offset)
    }
}

/// Drops everything on the floor. Provided so a sequence can stand in for
/// an `io::Write` sink.
impl Write for ByteSequence {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_is_deterministic() {
        let mut a = ByteSequence::new(0);
        let mut b = ByteSequence::new(0);
        a.seed(42);
        b.seed(42);

        let mut buf_a = vec![0u8; 4096];
        let mut buf_b = vec![0u8; 4096];
        a.fill(&mut buf_a);
        b.fill(&mut buf_b);
        assert_eq!(buf_a, buf_b);

        // State advances, so a second fill differs from the first.
        a.fill(&mut buf_b);
        assert_ne!(buf_a, buf_b);
    }

    #[test]
    fn fill_differs_across_seeds() {
        let mut a = ByteSequence::new(0);
        let mut b = ByteSequence::new(0);
        a.seed(1);
        b.seed(2);

        let mut buf_a = vec![0u8; 1024];
        let mut buf_b = vec![0u8; 1024];
        a.fill(&mut buf_a);
        b.fill(&mut buf_b);
        assert_ne!(buf_a, buf_b);
    }

    #[test]
    fn pattern_fill_zero_equals_fill() {
        let mut a = ByteSequence::new(0);
        let mut b = ByteSequence::new(0);
        a.seed(7);
        b.seed(7);

        let mut buf_a = vec![0u8; 256 * 1024 + 100];
        let mut buf_b = vec![0u8; 256 * 1024 + 100];
        a.fill(&mut buf_a);
        b.pattern_fill(&mut buf_b, 0);
        assert_eq!(buf_a, buf_b);
    }

    #[test]
    fn pattern_fill_hundred_is_all_pattern() {
        let mut seq = ByteSequence::new(0);

        // Sizes with and without a partial trailing block.
        for len in [PATTERN_BLOCK_SIZE * 16, PATTERN_BLOCK_SIZE * 3 + 17] {
            let mut buf = vec![0u8; len];
            seq.pattern_fill(&mut buf, 100);
            assert!(buf.iter().all(|&b| b == PATTERN_BYTE));
        }
    }

    #[test]
    fn pattern_fill_ratio_tracks_compressibility() {
        let mut seq = ByteSequence::new(0);
        let blocks = 1000;
        let mut buf = vec![0u8; blocks * PATTERN_BLOCK_SIZE];

        for compressibility in [25u8, 50, 75] {
            seq.pattern_fill(&mut buf, compressibility);

            let pattern_blocks = buf
                .chunks(PATTERN_BLOCK_SIZE)
                .filter(|blk| blk.iter().all(|&b| b == PATTERN_BYTE))
                .count();

            let observed = pattern_blocks as f64 / blocks as f64;
            let expected = compressibility as f64 / 100.0;
            assert!(
                (observed - expected).abs() <= 0.02,
                "compressibility {compressibility}: observed {observed}, expected {expected}"
            );
        }
    }

    #[test]
    fn read_stops_at_size() {
        let mut seq = ByteSequence::new(100);
        let mut buf = [0u8; 64];

        assert_eq!(seq.read(&mut buf).unwrap(), 64);
        assert_eq!(seq.read(&mut buf).unwrap(), 36);
        assert_eq!(seq.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn seek_does_not_rewind_generator_state() {
        let mut seq = ByteSequence::new(64);
        let mut first = [0u8; 64];
        let mut second = [0u8; 64];

        seq.read(&mut first).unwrap();
        seq.seek(SeekFrom::Start(0)).unwrap();
        seq.read(&mut second).unwrap();

        // Position rewinds; the generator does not.
        assert_ne!(first, second);
    }

    #[test]
    fn seek_bounds() {
        let mut seq = ByteSequence::new(100);
        assert_eq!(seq.seek(SeekFrom::End(-10)).unwrap(), 90);
        assert_eq!(seq.seek(SeekFrom::Current(5)).unwrap(), 95);
        assert!(seq.seek(SeekFrom::Current(-200)).is_err());
        assert!(seq.seek(SeekFrom::Start(101)).is_err());
    }

    #[test]
    fn write_is_a_sink_and_close_exhausts() {
        let mut seq = ByteSequence::new(100);
        assert_eq!(seq.write(b"dropped").unwrap(), 7);

        seq.close();
        let mut buf = [0u8; 8];
        assert_eq!(seq.read(&mut buf).unwrap(), 0);
    }
}
