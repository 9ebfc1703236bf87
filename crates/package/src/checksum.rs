//! Digest and content-length observers.
//!
//! Observers are layered on the write side so the worker pays for each
//! byte exactly once: one pass over every chunk fans it out to all
//! registered observers.

use deposit_config::ChecksumAlgorithm;
use md5::{Digest as _, Md5};
use sha2::{Sha256, Sha512};

/// One computed digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    algorithm: ChecksumAlgorithm,
    value: Vec<u8>,
}

impl Checksum {
    pub fn new(algorithm: ChecksumAlgorithm, value: Vec<u8>) -> Self {
        Self { algorithm, value }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Lowercase hex rendering, as carried in manifests.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.value)
    }
}

enum Hasher {
    Md5(Md5),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Md5 => Hasher::Md5(Md5::new()),
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(chunk),
            Hasher::Sha256(h) => h.update(chunk),
            Hasher::Sha512(h) => h.update(chunk),
        }
    }

    fn finalize(self) -> Vec<u8> {
        match self {
            Hasher::Md5(h) => h.finalize().to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
            Hasher::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// Observes a byte stream, accumulating content length and one digest per
/// requested algorithm.
pub struct ObserverStack {
    length: u64,
    hashers: Vec<(ChecksumAlgorithm, Hasher)>,
}

impl std::fmt::Debug for ObserverStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverStack")
            .field("length", &self.length)
            .field("algorithms", &self.hashers.iter().map(|(a, _)| a).collect::<Vec<_>>())
            .finish()
    }
}

impl ObserverStack {
    /// A stack computing a digest for each of `algorithms`, deduplicated.
    pub fn new(algorithms: &[ChecksumAlgorithm]) -> Self {
        let mut seen = Vec::new();
        let mut hashers = Vec::new();
        for &algorithm in algorithms {
            if !seen.contains(&algorithm) {
                seen.push(algorithm);
                hashers.push((algorithm, Hasher::new(algorithm)));
            }
        }
        Self { length: 0, hashers }
    }

    /// Bytes observed so far.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Feeds one chunk to every observer.
    pub fn data(&mut self, chunk: &[u8]) {
        self.length += chunk.len() as u64;
        for (_, hasher) in &mut self.hashers {
            hasher.update(chunk);
        }
    }

    /// Finishes all observers, yielding the observed length and digests in
    /// registration order.
    pub fn finished(self) -> (u64, Vec<Checksum>) {
        let checksums = self
            .hashers
            .into_iter()
            .map(|(algorithm, hasher)| Checksum::new(algorithm, hasher.finalize()))
            .collect();
        (self.length, checksums)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observes_length_and_digests_in_one_pass() {
        let mut stack = ObserverStack::new(&[ChecksumAlgorithm::Md5, ChecksumAlgorithm::Sha256]);
        stack.data(b"hello ");
        stack.data(b"world");

        let (length, checksums) = stack.finished();
        assert_eq!(length, 11);
        assert_eq!(checksums.len(), 2);
        assert_eq!(checksums[0].algorithm(), ChecksumAlgorithm::Md5);
        // md5("hello world")
        assert_eq!(checksums[0].to_hex(), "5eb63bbbe01eeed093cb22bb8f5acdc3");
        // sha256("hello world")
        assert_eq!(
            checksums[1].to_hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn duplicate_algorithms_collapse() {
        let stack = ObserverStack::new(&[ChecksumAlgorithm::Md5, ChecksumAlgorithm::Md5]);
        let (_, checksums) = stack.finished();
        assert_eq!(checksums.len(), 1);
    }

    #[test]
    fn empty_input_digests_are_well_defined() {
        let stack = ObserverStack::new(&[ChecksumAlgorithm::Md5]);
        let (length, checksums) = stack.finished();
        assert_eq!(length, 0);
        assert_eq!(checksums[0].to_hex(), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
