//! Block loader contract and volatile payloads.
//!
//! A [`BlockLoader`] is the narrow seam to bulk I/O: it produces the raw
//! samples of one block of one mipmap level. Loaders may block and may be
//! interrupted; the cache decides when and on which thread to call them.
//!
//! # Volatile payloads
//!
//! A [`Payload`] may be observed before it is populated. Its validity is
//! monotone: a block's payload transitions invalid -> valid at most once
//! and never back. Consumers that see `is_valid() == false` simply render
//! without the data and retry on a later frame.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::cache::BlockKey;
use crate::errors::Result;

/// Raw samples of one block, possibly not yet populated.
#[derive(Clone)]
pub struct Payload {
    data: Arc<[u16]>,
    valid: bool,
}

impl Payload {
    /// A populated payload.
    #[must_use]
    pub fn valid(data: Vec<u16>) -> Self {
        Self {
            data: data.into(),
            valid: true,
        }
    }

    /// An invalid placeholder backed by zeroed samples.
    #[must_use]
    pub fn empty(len: usize) -> Self {
        Self {
            data: vec![0; len].into(),
            valid: false,
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    #[must_use]
    pub fn samples(&self) -> &[u16] {
        &self.data
    }
}

/// A 3D tile of a mipmap level, the cache's unit of residency.
pub struct Block {
    dims: [u32; 3],
    origin: [i64; 3],
    payload: RwLock<Payload>,
}

impl Block {
    #[must_use]
    pub fn placeholder(dims: [u32; 3], origin: [i64; 3], payload: Payload) -> Self {
        Self {
            dims,
            origin,
            payload: RwLock::new(payload),
        }
    }

    #[must_use]
    pub fn dims(&self) -> [u32; 3] {
        self.dims
    }

    #[must_use]
    pub fn origin(&self) -> [i64; 3] {
        self.origin
    }

    #[must_use]
    pub fn num_elements(&self) -> usize {
        self.dims.iter().map(|&d| d as usize).product()
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.payload.read().is_valid()
    }

    /// Snapshot of the current payload (cheap; samples are shared).
    #[must_use]
    pub fn payload(&self) -> Payload {
        self.payload.read().clone()
    }

    /// Publishes loaded samples. Validity is monotone: once valid, later
    /// publishes are ignored.
    pub(crate) fn publish(&self, payload: Payload) {
        let mut slot = self.payload.write();
        if !slot.is_valid() {
            *slot = payload;
        }
    }
}

/// Narrow interface to bulk block I/O.
pub trait BlockLoader: Send + Sync {
    /// Size of one raw sample in bytes (used for I/O accounting and the
    /// cache's memory ceiling).
    fn bytes_per_element(&self) -> usize;

    /// Loads the samples of `key`'s block. May block; returns
    /// [`VolumaError::Interrupted`](crate::VolumaError::Interrupted) when
    /// asked to stop mid-load.
    fn load_block(&self, key: BlockKey, dims: [u32; 3], origin: [i64; 3]) -> Result<Payload>;

    /// An invalid placeholder payload for a block of `dims`.
    fn empty_block(&self, dims: [u32; 3]) -> Payload {
        Payload::empty(dims.iter().map(|&d| d as usize).product())
    }
}
