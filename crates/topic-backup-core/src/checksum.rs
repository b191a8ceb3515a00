//! Checksum algorithms and the registry that resolves them by identifier.
//!
//! Backups record the identifier of the algorithm that produced their
//! digests. Identifiers this build does not know are carried around as opaque
//! strings; any attempt to compute with one yields
//! [`Error::UnsupportedAlgorithm`], which callers treat as "cannot verify".

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use xxhash_rust::xxh3::Xxh3;

use crate::{Error, Result};

/// Identifier of the XXH3 64-bit algorithm, digest rendered big-endian
pub const XXHASH3_64_BE: &str = "xxhash3_64_be";

/// Sentinel reported for identifiers this build does not recognize
pub const UNKNOWN_ALGORITHM: &str = "unknown";

/// Default algorithm for new backups
pub const DEFAULT_ALGORITHM: &str = XXHASH3_64_BE;

/// A checksum accumulator fed incrementally.
pub trait RunningChecksum: Send {
    /// Feed more bytes
    fn update(&mut self, data: &[u8]);

    /// Digest of everything fed so far; the accumulator stays usable.
    fn digest(&self) -> Vec<u8>;
}

/// A checksum algorithm that can be looked up by identifier.
pub trait ChecksumAlgorithm: Send + Sync {
    /// Stable identifier stored in backup metadata
    fn id(&self) -> &'static str;

    /// Start a fresh accumulator
    fn running(&self) -> Box<dyn RunningChecksum>;

    /// One-shot digest of `data`
    fn compute(&self, data: &[u8]) -> Vec<u8> {
        let mut running = self.running();
        running.update(data);
        running.digest()
    }
}

/// XXH3 64-bit with the digest serialized big-endian.
#[derive(Debug, Default, Clone, Copy)]
pub struct Xxh3_64Be;

struct Xxh3Running(Xxh3);

impl RunningChecksum for Xxh3Running {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn digest(&self) -> Vec<u8> {
        self.0.digest().to_be_bytes().to_vec()
    }
}

impl ChecksumAlgorithm for Xxh3_64Be {
    fn id(&self) -> &'static str {
        XXHASH3_64_BE
    }

    fn running(&self) -> Box<dyn RunningChecksum> {
        Box::new(Xxh3Running(Xxh3::new()))
    }
}

/// Maps algorithm identifiers to implementations.
///
/// Built once at start-up and passed by reference to the components that
/// need it.
#[derive(Clone)]
pub struct ChecksumRegistry {
    algorithms: HashMap<&'static str, Arc<dyn ChecksumAlgorithm>>,
}

impl ChecksumRegistry {
    /// Registry with no algorithms at all
    pub fn empty() -> Self {
        Self {
            algorithms: HashMap::new(),
        }
    }

    /// Registry holding every algorithm this build ships with
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.algorithms.insert(XXHASH3_64_BE, Arc::new(Xxh3_64Be));
        registry
    }

    /// Register an additional algorithm.
    ///
    /// The `"unknown"` sentinel can never be bound to an implementation.
    pub fn register(&mut self, algorithm: Arc<dyn ChecksumAlgorithm>) -> Result<()> {
        let id = algorithm.id();
        if id == UNKNOWN_ALGORITHM {
            return Err(Error::Config(format!(
                "checksum algorithm id {:?} is reserved",
                UNKNOWN_ALGORITHM
            )));
        }
        self.algorithms.insert(id, algorithm);
        Ok(())
    }

    /// True if `id` resolves to an implementation
    pub fn contains(&self, id: &str) -> bool {
        self.algorithms.contains_key(id)
    }

    /// Look up an algorithm by identifier
    pub fn get(&self, id: &str) -> Result<Arc<dyn ChecksumAlgorithm>> {
        self.algorithms
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnsupportedAlgorithm(id.to_string()))
    }

    /// Name to display for a stored identifier: itself if known, else `"unknown"`
    pub fn resolve_name<'a>(&self, id: &'a str) -> &'a str {
        if self.contains(id) {
            id
        } else {
            UNKNOWN_ALGORITHM
        }
    }

    /// Digest of `data` under algorithm `id`
    pub fn compute(&self, id: &str, data: &[u8]) -> Result<Vec<u8>> {
        Ok(self.get(id)?.compute(data))
    }

    /// Lower-case hex digest of `data` under algorithm `id`
    pub fn compute_hex(&self, id: &str, data: &[u8]) -> Result<String> {
        self.compute(id, data).map(hex::encode)
    }

    /// Compare the digest of `data` against `expected_hex` (either case)
    pub fn verify(&self, id: &str, data: &[u8], expected_hex: &str) -> Result<bool> {
        let expected = hex::decode(expected_hex)
            .map_err(|e| Error::format(format!("invalid hex digest {:?}: {}", expected_hex, e)))?;
        Ok(self.compute(id, data)? == expected)
    }

    /// Identifiers of every registered algorithm, sorted
    pub fn ids(&self) -> Vec<&'static str> {
        let mut ids: Vec<_> = self.algorithms.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

impl Default for ChecksumRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for ChecksumRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChecksumRegistry")
            .field("algorithms", &self.ids())
            .finish()
    }
}
