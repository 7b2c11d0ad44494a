//! Reusable buffer and struct pools.
//!
//! Pools bound allocation churn on hot marshal/unmarshal paths. They are
//! internally synchronized and may be shared across threads. Returned
//! objects above the oversize cap are dropped rather than retained, which
//! bounds the memory a pool can pin.

use std::sync::{Arc, Mutex};

use crate::mapping::Mapping;
use crate::structs::Struct;

/// The default cap above which a returned buffer is dropped.
pub const DEFAULT_MAX_BUFFER: usize = 10 << 20;

const DEFAULT_MAX_POOLED: usize = 64;

/// BufferPool hands out cleared byte buffers for marshal scratch space and
/// pack output.
pub struct BufferPool {
    inner: Mutex<Vec<Vec<u8>>>,
    max_pooled: usize,
    max_buffer: usize,
}

impl BufferPool {
    pub fn new(max_pooled: usize, max_buffer: usize) -> BufferPool {
        BufferPool {
            inner: Mutex::new(Vec::new()),
            max_pooled,
            max_buffer,
        }
    }

    pub fn get(&self) -> Vec<u8> {
        self.inner.lock().unwrap().pop().unwrap_or_default()
    }

    pub fn put(&self, mut buf: Vec<u8>) {
        if buf.capacity() > self.max_buffer {
            tracing::debug!(capacity = buf.capacity(), "dropping oversize pooled buffer");
            return;
        }
        buf.clear();
        let mut inner = self.inner.lock().unwrap();
        if inner.len() < self.max_pooled {
            inner.push(buf);
        }
    }
}

impl Default for BufferPool {
    fn default() -> BufferPool {
        BufferPool::new(DEFAULT_MAX_POOLED, DEFAULT_MAX_BUFFER)
    }
}

lazy_static::lazy_static! {
    static ref SCRATCH: BufferPool = BufferPool::default();
}

/// The process-wide scratch buffer pool used by packed marshaling.
pub fn scratch() -> &'static BufferPool {
    &SCRATCH
}

/// StructPool recycles Structs of one mapping. Released structs are reset
/// to the freshly-constructed state.
pub struct StructPool {
    mapping: Arc<Mapping>,
    inner: Mutex<Vec<Struct>>,
    max_pooled: usize,
}

impl StructPool {
    pub fn new(mapping: Arc<Mapping>) -> StructPool {
        StructPool {
            mapping,
            inner: Mutex::new(Vec::new()),
            max_pooled: DEFAULT_MAX_POOLED,
        }
    }

    pub fn mapping(&self) -> &Arc<Mapping> {
        &self.mapping
    }

    pub fn get(&self) -> Struct {
        self.inner
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Struct::new(self.mapping.clone()))
    }

    pub fn put(&self, mut s: Struct) {
        assert!(
            Arc::ptr_eq(s.mapping(), &self.mapping) || s.mapping().name() == self.mapping.name(),
            "released a {:?} into a pool of {:?}",
            s.mapping().name(),
            self.mapping.name(),
        );
        s.reset();
        let mut inner = self.inner.lock().unwrap();
        if inner.len() < self.max_pooled {
            inner.push(s);
        }
    }
}
