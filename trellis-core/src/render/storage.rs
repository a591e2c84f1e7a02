//! Port Storage
//!
//! Byte storage for ports and kernel buffers, and the ownership-tagged
//! pointer each input holds.
//!
//! # Alignment
//!
//! [`PortBuffer`] is backed by `u64` words, so its bytes are always 8-byte
//! aligned. Every patchable type must have an alignment of at most
//! [`MIN_ALIGNMENT`]; kernel layouts are validated against it.
//!
//! # Ownership
//!
//! An input either borrows another node's live output (or the shared blank
//! page) or owns a private value set while it was unconnected. Repointing an
//! input drops an owned value exactly once and only ever drops a reference to
//! a borrowed one, so an upstream output can never be freed through an alias.

use std::ops::Deref;
use std::sync::Arc;

use bytemuck::Pod;
use parking_lot::{RwLock, RwLockReadGuard};

/// Alignment guaranteed for every port and buffer.
pub const MIN_ALIGNMENT: usize = 8;

const WORD: usize = std::mem::size_of::<u64>();

static EMPTY: PortBuffer = PortBuffer::new();

/// A port's storage shared between its owner and any aliasing inputs.
pub type SharedPort = Arc<RwLock<PortBuffer>>;

/// Growable, zero-initialised, 8-byte aligned byte storage.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PortBuffer {
    words: Vec<u64>,
    len: usize,
}

impl PortBuffer {
    /// An empty buffer that owns no allocation.
    pub const fn new() -> Self {
        Self {
            words: Vec::new(),
            len: 0,
        }
    }

    /// A buffer of `len` zero bytes.
    pub fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(WORD)],
            len,
        }
    }

    /// A buffer holding a copy of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buffer = Self::zeroed(bytes.len());
        buffer.as_bytes_mut().copy_from_slice(bytes);
        buffer
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.words.capacity() * WORD
    }

    /// The stored bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    /// The stored bytes, mutably.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..len]
    }

    /// Read a value from the start of the buffer. Missing bytes read as zero.
    pub fn read<T: Pod>(&self) -> T {
        let mut value = T::zeroed();
        let target = bytemuck::bytes_of_mut(&mut value);
        let count = target.len().min(self.len);
        target[..count].copy_from_slice(&self.as_bytes()[..count]);
        value
    }

    /// Write a value at the start of the buffer.
    ///
    /// Returns false, leaving the buffer untouched, if the value does not fit.
    pub fn write<T: Pod>(&mut self, value: &T) -> bool {
        let source = bytemuck::bytes_of(value);
        if source.len() > self.len {
            return false;
        }
        self.as_bytes_mut()[..source.len()].copy_from_slice(source);
        true
    }

    /// View the buffer as a slice of `T`. Trailing bytes that do not form a
    /// whole element are ignored; over-aligned `T` yields an empty slice.
    pub fn as_slice<T: Pod>(&self) -> &[T] {
        let size = std::mem::size_of::<T>();
        if size == 0 {
            return &[];
        }
        let whole = self.len - self.len % size;
        bytemuck::try_cast_slice(&self.as_bytes()[..whole]).unwrap_or(&[])
    }

    /// Mutable counterpart of [`as_slice`](Self::as_slice).
    pub fn as_mut_slice<T: Pod>(&mut self) -> &mut [T] {
        let size = std::mem::size_of::<T>();
        if size == 0 {
            return &mut [];
        }
        let whole = self.len - self.len % size;
        bytemuck::try_cast_slice_mut(&mut self.as_bytes_mut()[..whole]).unwrap_or(&mut [])
    }

    /// Resize to `len` bytes. New bytes are zero.
    ///
    /// Shrinking keeps the allocation while the new size is at least half the
    /// current capacity, so repeated small resizes do not thrash the
    /// allocator. Returns true if a new allocation was made.
    pub fn resize(&mut self, len: usize) -> bool {
        let words = len.div_ceil(WORD);
        let capacity = self.words.capacity();

        let reallocated = if words > capacity {
            self.words.reserve_exact(words - self.words.len());
            self.words.resize(words, 0);
            true
        } else if words * 2 >= capacity {
            self.words.resize(words, 0);
            false
        } else {
            let mut fresh = Vec::with_capacity(words);
            fresh.extend_from_slice(&self.words[..words.min(self.words.len())]);
            fresh.resize(words, 0);
            self.words = fresh;
            true
        };

        self.len = len;
        // Bytes past `len` in the last word must stay zero for later growth.
        let tail = words * WORD - len;
        if tail > 0 {
            let bytes = bytemuck::cast_slice_mut::<u64, u8>(&mut self.words);
            let end = bytes.len();
            bytes[end - tail..].fill(0);
        }
        reallocated
    }
}

impl std::fmt::Debug for PortBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortBuffer")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Wrap a buffer for sharing.
pub fn shared(buffer: PortBuffer) -> SharedPort {
    Arc::new(RwLock::new(buffer))
}

/// Who is responsible for freeing the memory an input points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Points into someone else's storage. Never freed by the input.
    None,
    /// A private copy, freed when the input is repointed or destroyed.
    OwnedByPort,
}

/// The storage location an input reads from.
#[derive(Debug)]
pub enum PortPointer {
    /// Aliases a live output or the blank page.
    Borrowed(SharedPort),
    /// Private value owned by the input.
    Owned(Box<PortBuffer>),
}

impl PortPointer {
    /// Ownership tag of the pointer.
    pub fn ownership(&self) -> Ownership {
        match self {
            PortPointer::Borrowed(_) => Ownership::None,
            PortPointer::Owned(_) => Ownership::OwnedByPort,
        }
    }

    /// True if this pointer aliases exactly `port`.
    pub fn aliases(&self, port: &SharedPort) -> bool {
        match self {
            PortPointer::Borrowed(target) => Arc::ptr_eq(target, port),
            PortPointer::Owned(_) => false,
        }
    }

    /// Point at `target`, freeing an owned value first.
    ///
    /// Returns true if an owned value was freed.
    pub(crate) fn repoint(&mut self, target: &SharedPort) -> bool {
        if self.aliases(target) {
            return false;
        }
        let previous = std::mem::replace(self, PortPointer::Borrowed(Arc::clone(target)));
        matches!(previous, PortPointer::Owned(_))
    }

    /// Lock the pointed-to storage for reading.
    pub fn read(&self) -> PortRead<'_> {
        match self {
            PortPointer::Borrowed(port) => PortRead::Shared(port.read()),
            PortPointer::Owned(buffer) => PortRead::Owned(buffer),
        }
    }
}

/// Read access to an input's storage.
pub enum PortRead<'a> {
    /// Guard over shared storage.
    Shared(RwLockReadGuard<'a, PortBuffer>),
    /// Owned storage.
    Owned(&'a PortBuffer),
    /// No storage: an unconnected array-valued input.
    Empty,
}

impl Deref for PortRead<'_> {
    type Target = PortBuffer;

    fn deref(&self) -> &PortBuffer {
        match self {
            PortRead::Shared(guard) => &**guard,
            PortRead::Owned(buffer) => *buffer,
            PortRead::Empty => &EMPTY,
        }
    }
}

/// The shared zero-filled page unconnected inputs point at.
#[derive(Debug, Clone)]
pub struct BlankPage {
    page: SharedPort,
}

impl BlankPage {
    /// Create an empty blank page.
    pub fn new() -> Self {
        Self {
            page: shared(PortBuffer::new()),
        }
    }

    /// The page itself.
    pub fn port(&self) -> &SharedPort {
        &self.page
    }

    /// Grow the page so reads of `len` bytes stay inside it.
    pub fn ensure(&self, len: usize) {
        let mut page = self.page.write();
        if page.len() < len {
            page.resize(len);
        }
    }

    /// True if `pointer` points at this page.
    pub fn is_blank(&self, pointer: &PortPointer) -> bool {
        pointer.aliases(&self.page)
    }
}

impl Default for BlankPage {
    fn default() -> Self {
        Self::new()
    }
}
