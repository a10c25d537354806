//! Payload storage for retransmittable messages
//!
//! Backup groups keep a copy of every sent payload until all active members
//! have acknowledged it. Copies are held in fixed-size blocks drawn from a
//! bounded free-list so steady-state sending does not allocate.

use multilink_protocol::MsgCtrl;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::Arc;

/// Maximum payload of a live-mode message, bytes.
pub const LIVE_MAX_PAYLOAD: usize = 1456;

/// Default payload size assumed before any packet has been received.
pub const LIVE_DEF_PAYLOAD: usize = 1316;

/// Blocks kept on the process-wide free-list.
const SHARED_CACHE_BLOCKS: usize = 128;

/// Shared handle to a storage pool.
pub type StorageHandle = Arc<Mutex<MessageStorage>>;

/// Bounded free-list of fixed-size payload blocks.
///
/// `get` never fails: an empty free-list falls back to allocation. `put`
/// beyond the cache cap simply frees the block.
pub struct MessageStorage {
    block_size: usize,
    max_cached: usize,
    freelist: Vec<Box<[u8]>>,
}

impl MessageStorage {
    pub fn new(block_size: usize, max_cached: usize) -> Self {
        MessageStorage {
            block_size,
            max_cached,
            freelist: Vec::new(),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn cached(&self) -> usize {
        self.freelist.len()
    }

    /// Take a writable block of exactly `block_size` bytes.
    pub fn get(&mut self) -> Box<[u8]> {
        match self.freelist.pop() {
            Some(block) => block,
            None => vec![0u8; self.block_size].into_boxed_slice(),
        }
    }

    /// Return a block. Cached while under the cap, freed otherwise. Blocks
    /// of a foreign size are never cached.
    pub fn put(&mut self, block: Box<[u8]>) {
        if self.freelist.len() < self.max_cached && block.len() == self.block_size {
            self.freelist.push(block);
        }
    }
}

/// Process-wide storage pool used by every group.
///
/// The free-list is unordered, so block identity is not stable across reuse.
/// Tests that need isolation construct their own pool via `private_storage`.
pub static SHARED_STORAGE: Lazy<StorageHandle> = Lazy::new(|| {
    Arc::new(Mutex::new(MessageStorage::new(
        LIVE_MAX_PAYLOAD,
        SHARED_CACHE_BLOCKS,
    )))
});

/// A storage pool private to the caller, for tests and tooling.
pub fn private_storage(block_size: usize, max_cached: usize) -> StorageHandle {
    Arc::new(Mutex::new(MessageStorage::new(block_size, max_cached)))
}

/// One retransmittable message: a payload copy plus its control header.
///
/// The payload block is acquired from storage at construction and returned
/// on drop. Moving a `BufferedMessage` transfers block ownership; there is
/// no way to end up with two owners.
pub struct BufferedMessage {
    ctrl: MsgCtrl,
    data: Option<Box<[u8]>>,
    len: usize,
    storage: StorageHandle,
}

impl BufferedMessage {
    /// Copy `payload` into a storage block, retaining `ctrl` verbatim.
    ///
    /// # Panics
    /// Panics if the payload exceeds the storage block size; callers check
    /// the length against the configured payload cap first.
    pub fn copy_from(storage: &StorageHandle, payload: &[u8], ctrl: MsgCtrl) -> Self {
        let mut block = {
            let mut pool = storage.lock();
            assert!(
                payload.len() <= pool.block_size(),
                "payload of {} bytes exceeds storage block size {}",
                payload.len(),
                pool.block_size()
            );
            pool.get()
        };
        block[..payload.len()].copy_from_slice(payload);
        BufferedMessage {
            ctrl,
            data: Some(block),
            len: payload.len(),
            storage: Arc::clone(storage),
        }
    }

    pub fn ctrl(&self) -> &MsgCtrl {
        &self.ctrl
    }

    pub fn payload(&self) -> &[u8] {
        match &self.data {
            Some(block) => &block[..self.len],
            None => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Transfer the payload out, leaving this message empty. The caller
    /// becomes responsible for the block.
    pub fn take_payload(&mut self) -> Option<Box<[u8]>> {
        self.len = 0;
        self.data.take()
    }
}

impl Drop for BufferedMessage {
    fn drop(&mut self) {
        if let Some(block) = self.data.take() {
            self.storage.lock().put(block);
        }
    }
}
