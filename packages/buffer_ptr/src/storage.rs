use std::alloc::{self, Layout};
use std::mem;
use std::ptr::{self, NonNull};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::{Element, Error, ExportLease, Result};

const ERR_POISONED_LOCK: &str =
    "encountered poisoned lock - export bookkeeping can no longer be trusted";

/// Heap memory shared by every handle of a built-in source, together with the bookkeeping of the
/// views exported from it.
///
/// Export policy:
///
/// * Any number of read-only exports may be outstanding at the same time.
/// * A writable export is exclusive with respect to every other export.
/// * The memory is never moved or resized while any export is outstanding.
///
/// Each lease owns a strong reference to the storage, so the memory outlives every handle that
/// could still use its address.
#[derive(Clone, Debug)]
pub(crate) struct SharedStorage {
    state: Arc<Mutex<StorageState>>,
}

#[derive(Debug)]
struct StorageState {
    allocation: Allocation,
    shared_exports: usize,
    exclusive_exports: usize,
}

impl StorageState {
    fn outstanding_exports(&self) -> usize {
        self.shared_exports
            .checked_add(self.exclusive_exports)
            .expect("export counts are bounded by the number of live leases")
    }
}

impl SharedStorage {
    /// Allocates `size` zeroed bytes aligned to `align`.
    pub(crate) fn zeroed(size: usize, align: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(StorageState {
                allocation: Allocation::zeroed(size, align),
                shared_exports: 0,
                exclusive_exports: 0,
            })),
        }
    }

    /// Allocates a copy of `bytes` aligned to `align`.
    pub(crate) fn from_bytes(bytes: &[u8], align: usize) -> Self {
        let storage = Self::zeroed(bytes.len(), align);
        storage.write(0, bytes);
        storage
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().expect(ERR_POISONED_LOCK).allocation.size
    }

    pub(crate) fn outstanding_exports(&self) -> usize {
        self.state
            .lock()
            .expect(ERR_POISONED_LOCK)
            .outstanding_exports()
    }

    /// Registers an export and returns the base address of the memory.
    pub(crate) fn export(&self, writable: bool) -> Result<(*mut u8, StorageLease)> {
        let mut state = self.state.lock().expect(ERR_POISONED_LOCK);

        let conflicts = if writable {
            state.outstanding_exports() > 0
        } else {
            state.exclusive_exports > 0
        };

        if conflicts {
            return Err(Error::ExportConflict {
                shared: state.shared_exports,
                exclusive: state.exclusive_exports,
            });
        }

        let counter = if writable {
            &mut state.exclusive_exports
        } else {
            &mut state.shared_exports
        };
        *counter = counter
            .checked_add(1)
            .expect("cannot have more leases than addressable memory");

        log::trace!(
            "registered {} export of {} bytes at {:p}",
            if writable { "writable" } else { "read-only" },
            state.allocation.size,
            state.allocation.ptr
        );

        Ok((
            state.allocation.ptr.as_ptr(),
            StorageLease {
                storage: self.clone(),
                writable,
            },
        ))
    }

    /// Resizes the memory, zero-filling any added bytes.
    ///
    /// The memory may move, which is why this is refused while exports are outstanding.
    pub(crate) fn resize(&self, new_size: usize) -> Result<()> {
        let mut state = self.state.lock().expect(ERR_POISONED_LOCK);

        let outstanding = state.outstanding_exports();
        if outstanding > 0 {
            log::debug!("refused resize to {new_size} bytes with {outstanding} exports outstanding");
            return Err(Error::BufferExported { outstanding });
        }

        state.allocation.resize(new_size);
        Ok(())
    }

    /// Copies the whole memory.
    pub(crate) fn to_vec(&self) -> Vec<u8> {
        let state = self.state.lock().expect(ERR_POISONED_LOCK);
        let mut bytes = vec![0; state.allocation.size];

        // SAFETY: The allocation is exactly `bytes.len()` bytes long and the destination is a
        // distinct Rust allocation, so they cannot overlap.
        unsafe {
            ptr::copy_nonoverlapping(
                state.allocation.ptr.as_ptr(),
                bytes.as_mut_ptr(),
                bytes.len(),
            );
        }

        bytes
    }

    /// Copies bytes into the memory.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    pub(crate) fn write(&self, offset: usize, source: &[u8]) {
        let (_state, destination) = self.lock_range(offset, source.len());

        // SAFETY: The range is in bounds (checked by `lock_range`) and the source is a distinct
        // Rust allocation, so they cannot overlap.
        unsafe {
            ptr::copy_nonoverlapping(source.as_ptr(), destination, source.len());
        }
    }

    /// Reads one item at a byte offset.
    ///
    /// # Panics
    ///
    /// Panics if the item is out of bounds.
    pub(crate) fn read_item<T: Element>(&self, offset: usize) -> T {
        let (_state, source) = self.lock_range(offset, size_of::<T>());

        // SAFETY: The range is in bounds and `Element` guarantees every bit pattern is a valid T.
        unsafe { source.cast::<T>().read_unaligned() }
    }

    /// Writes one item at a byte offset.
    ///
    /// # Panics
    ///
    /// Panics if the item is out of bounds.
    pub(crate) fn write_item<T: Element>(&self, offset: usize, value: T) {
        let (_state, destination) = self.lock_range(offset, size_of::<T>());

        // SAFETY: The range is in bounds and writing a plain-old-data item has no side effects.
        unsafe {
            destination.cast::<T>().write_unaligned(value);
        }
    }

    /// Locks the memory and returns a pointer to the start of a range within it. The pointer is
    /// valid for as long as the guard is held.
    ///
    /// An out-of-bounds range panics only after the lock is released, leaving it unpoisoned.
    fn lock_range(&self, offset: usize, len: usize) -> (MutexGuard<'_, StorageState>, *mut u8) {
        let state = self.state.lock().expect(ERR_POISONED_LOCK);
        let range = state.allocation.range_ptr(offset, len);

        match range {
            Some(range) => (state, range),
            None => {
                let size = state.allocation.size;
                drop(state);
                panic!("range {offset}+{len} is out of bounds of {size} bytes");
            }
        }
    }
}

/// Releases one export of a [`SharedStorage`].
#[derive(Debug)]
pub(crate) struct StorageLease {
    storage: SharedStorage,
    writable: bool,
}

impl ExportLease for StorageLease {
    fn release(self: Box<Self>) {
        let mut state = self.storage.state.lock().expect(ERR_POISONED_LOCK);

        let counter = if self.writable {
            &mut state.exclusive_exports
        } else {
            &mut state.shared_exports
        };
        *counter = counter
            .checked_sub(1)
            .expect("each lease is released once and only after being registered");

        log::trace!(
            "released {} export, {} outstanding",
            if self.writable { "writable" } else { "read-only" },
            state.outstanding_exports()
        );
    }
}

/// A heap allocation of a fixed alignment. Zero-sized allocations use a dangling, aligned pointer.
#[derive(Debug)]
struct Allocation {
    ptr: NonNull<u8>,
    size: usize,
    align: usize,
}

// SAFETY: The allocation is uniquely owned and only accessed under the storage lock or by
// foreign code holding an export, whose exclusivity the storage enforces.
unsafe impl Send for Allocation {}

impl Allocation {
    fn zeroed(size: usize, align: usize) -> Self {
        if size == 0 {
            return Self::empty(align);
        }

        let layout = Self::layout(size, align);

        // SAFETY: The layout is not zero-sized (checked above).
        let ptr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
            .unwrap_or_else(|| alloc::handle_alloc_error(layout));

        Self { ptr, size, align }
    }

    fn empty(align: usize) -> Self {
        Self {
            ptr: NonNull::new(ptr::without_provenance_mut(align))
                .expect("alignment is never zero"),
            size: 0,
            align,
        }
    }

    fn layout(size: usize, align: usize) -> Layout {
        Layout::from_size_align(size, align)
            .expect("allocation size overflow or invalid alignment")
    }

    fn resize(&mut self, new_size: usize) {
        if new_size == self.size {
            return;
        }

        if self.size == 0 {
            *self = Self::zeroed(new_size, self.align);
            return;
        }

        if new_size == 0 {
            // Dropping the old allocation frees it.
            drop(mem::replace(self, Self::empty(self.align)));
            return;
        }

        let new_layout = Self::layout(new_size, self.align);

        // SAFETY: The pointer was allocated with the layout of the current size and alignment,
        // the new size is not zero and `new_layout` proves it does not overflow when aligned.
        let ptr = unsafe {
            alloc::realloc(
                self.ptr.as_ptr(),
                Self::layout(self.size, self.align),
                new_size,
            )
        };
        let ptr = NonNull::new(ptr).unwrap_or_else(|| alloc::handle_alloc_error(new_layout));

        if let Some(added) = new_size.checked_sub(self.size) {
            // SAFETY: The added tail lies within the new allocation.
            unsafe {
                ptr.add(self.size).write_bytes(0, added);
            }
        }

        self.ptr = ptr;
        self.size = new_size;
    }

    fn range_ptr(&self, offset: usize, len: usize) -> Option<*mut u8> {
        let end = offset.checked_add(len)?;
        if end > self.size {
            return None;
        }

        // SAFETY: The offset is within the allocation (checked above).
        Some(unsafe { self.ptr.add(offset).as_ptr() })
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        if self.size == 0 {
            return;
        }

        // SAFETY: The pointer was allocated with exactly this layout and is not used afterwards.
        unsafe {
            alloc::dealloc(self.ptr.as_ptr(), Self::layout(self.size, self.align));
        }
    }
}
