use rand_chacha::ChaCha8Rng;
use rand_core::{RngCore, SeedableRng};
use serde::Serialize;
use std::io::{self, Read};

const MIB: u64 = 1 << 20;
const KIB: u64 = 1 << 10;

/// A stream of pseudo-random bytes that stops after a fixed total.
///
/// Every read is clamped to what is left of the budget, and the running total
/// advances by the number of bytes actually handed out, never by the number
/// requested. Once the budget is spent all reads return zero bytes.
#[derive(Debug)]
pub struct BoundedRandomSource<R: RngCore = ChaCha8Rng> {
    rng: R,
    limit: u64,
    produced: u64,
}

impl BoundedRandomSource<ChaCha8Rng> {
    /// Creates a source of at most `limit` bytes from a seeded ChaCha8 stream.
    pub fn seeded(limit: u64, seed: u64) -> Self {
        Self::with_rng(limit, ChaCha8Rng::seed_from_u64(seed))
    }
}

impl<R: RngCore> BoundedRandomSource<R> {
    pub fn with_rng(limit: u64, rng: R) -> Self {
        Self {
            rng,
            limit,
            produced: 0,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn produced(&self) -> u64 {
        self.produced
    }

    pub fn remaining(&self) -> u64 {
        self.limit - self.produced
    }

    /// Returns up to `requested` fresh bytes, fewer once the budget runs low.
    pub fn read_chunk(&mut self, requested: usize) -> Vec<u8> {
        let len = self.clamp(requested);
        let mut chunk = vec![0u8; len];
        self.fill(&mut chunk);
        chunk
    }

    fn clamp(&self, requested: usize) -> usize {
        // A budget wider than usize never limits a single read.
        usize::try_from(self.remaining()).map_or(requested, |left| requested.min(left))
    }

    fn fill(&mut self, buf: &mut [u8]) {
        self.rng.fill_bytes(buf);
        self.produced += buf.len() as u64;
    }
}

impl<R: RngCore> Read for BoundedRandomSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.clamp(buf.len());
        self.fill(&mut buf[..len]);
        Ok(len)
    }
}

/// Payload sizes tried, in order, for every flash action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlashPayload {
    /// 20 MiB of noise.
    Oversized,
    /// 10 KiB of noise.
    Small,
    /// Zero bytes. Many bootloaders refuse this outright.
    Empty,
}

impl FlashPayload {
    pub const SEQUENCE: [FlashPayload; 3] =
        [FlashPayload::Oversized, FlashPayload::Small, FlashPayload::Empty];

    pub fn size(self) -> u64 {
        match self {
            FlashPayload::Oversized => 20 * MIB,
            FlashPayload::Small => 10 * KIB,
            FlashPayload::Empty => 0,
        }
    }

    /// Builds the byte source for this payload, drawing randomness from `rng`.
    pub fn source<R: RngCore>(self, rng: R) -> BoundedRandomSource<R> {
        BoundedRandomSource::with_rng(self.size(), rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_are_clamped_to_the_remaining_budget() {
        let mut source = BoundedRandomSource::seeded(100, 7);
        assert_eq!(source.read_chunk(60).len(), 60);
        assert_eq!(source.read_chunk(60).len(), 40);
        assert_eq!(source.read_chunk(60).len(), 0);
        assert_eq!(source.read_chunk(1).len(), 0);
        assert_eq!(source.produced(), 100);
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn zero_sized_requests_do_not_consume_budget() {
        let mut source = BoundedRandomSource::seeded(10, 1);
        assert!(source.read_chunk(0).is_empty());
        assert_eq!(source.remaining(), 10);
    }

    #[test]
    fn empty_source_never_yields_bytes() {
        let mut source = FlashPayload::Empty.source(ChaCha8Rng::seed_from_u64(3));
        let mut buf = [0u8; 16];
        assert_eq!(source.read(&mut buf).unwrap(), 0);
        assert_eq!(source.read_chunk(4096).len(), 0);
    }

    #[test]
    fn read_impl_drains_exactly_the_limit() {
        let mut source = FlashPayload::Small.source(ChaCha8Rng::seed_from_u64(9));
        let mut sink = Vec::new();
        let copied = source.read_to_end(&mut sink).unwrap();
        assert_eq!(copied as u64, FlashPayload::Small.size());
        assert_eq!(sink.len(), 10 * 1024);
    }

    #[test]
    fn same_seed_gives_same_bytes() {
        let a = BoundedRandomSource::seeded(32, 42).read_chunk(32);
        let b = BoundedRandomSource::seeded(32, 42).read_chunk(32);
        let c = BoundedRandomSource::seeded(32, 43).read_chunk(32);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn payload_sizes_match_the_flash_policy() {
        assert_eq!(FlashPayload::Oversized.size(), 20_971_520);
        assert_eq!(FlashPayload::Small.size(), 10_240);
        assert_eq!(FlashPayload::Empty.size(), 0);
        assert_eq!(
            FlashPayload::SEQUENCE,
            [FlashPayload::Oversized, FlashPayload::Small, FlashPayload::Empty]
        );
    }
}
