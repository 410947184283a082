use crate::{BufferSource, Contract, Error, Export, HostValue, RawLayout, Result, SharedStorage};

/// A heap buffer of bytes that exports views of itself.
///
/// Clones of a `ByteBuffer` are handles to the same memory. The buffer refuses to resize while
/// any view of it is exported, because resizing may move the memory.
///
/// A buffer created via [`frozen()`](ByteBuffer::frozen) is read-only: it only exports read-only
/// views and refuses writes and resizes.
///
/// # Examples
///
/// ```
/// use buffer_ptr::{ByteBuffer, Contract, make_ptr};
///
/// let buffer = ByteBuffer::zeroed(4);
///
/// let pointer = make_ptr(&buffer, Contract::WRITABLE).unwrap();
/// let bytes = pointer.as_mut_ptr::<u8>().unwrap();
///
/// // SAFETY: The pointer is acquired and the buffer is 4 bytes long.
/// unsafe { bytes.add(1).write(42) };
///
/// drop(pointer);
/// assert_eq!(buffer.to_vec(), [0, 42, 0, 0]);
/// ```
#[derive(Clone, Debug)]
pub struct ByteBuffer {
    storage: SharedStorage,
    read_only: bool,
}

impl ByteBuffer {
    /// Creates a writable buffer of `len` zero bytes.
    #[must_use]
    pub fn zeroed(len: usize) -> Self {
        Self {
            storage: SharedStorage::zeroed(len, 1),
            read_only: false,
        }
    }

    /// Creates a read-only buffer holding a copy of `bytes`.
    #[must_use]
    pub fn frozen(bytes: &[u8]) -> Self {
        Self {
            storage: SharedStorage::from_bytes(bytes, 1),
            read_only: true,
        }
    }

    /// Length of the buffer in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Whether the buffer is zero bytes long.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the buffer refuses writes.
    #[must_use]
    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Number of views of the buffer currently exported.
    #[must_use]
    pub fn outstanding_exports(&self) -> usize {
        self.storage.outstanding_exports()
    }

    /// Copies the contents of the buffer.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.storage.to_vec()
    }

    /// Copies `bytes` into the buffer starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadOnly`] if the buffer is frozen.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds.
    pub fn write(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }

        self.storage.write(offset, bytes);
        Ok(())
    }

    /// Resizes the buffer, zero-filling any added bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BufferExported`] if any view of the buffer is exported and
    /// [`Error::ReadOnly`] if the buffer is frozen.
    pub fn resize(&self, new_len: usize) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }

        self.storage.resize(new_len)
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(value: Vec<u8>) -> Self {
        Self::from(value.as_slice())
    }
}

impl From<&[u8]> for ByteBuffer {
    fn from(value: &[u8]) -> Self {
        Self {
            storage: SharedStorage::from_bytes(value, 1),
            read_only: false,
        }
    }
}

impl BufferSource for ByteBuffer {
    fn export(&self, contract: Contract) -> Result<Export> {
        if contract.is_writable() && self.read_only {
            return Err(Error::ReadOnly);
        }

        let (base, lease) = self.storage.export(contract.is_writable())?;

        let mut layout = RawLayout::bytes(base, self.len());
        if self.read_only {
            layout = layout.read_only();
        }

        Ok(Export::new(layout, lease))
    }
}

impl HostValue for ByteBuffer {
    fn buffer_source(&self) -> Option<&dyn BufferSource> {
        Some(self)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;
    use std::panic::{self, AssertUnwindSafe};

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::{acquire, make_ptr, ptr};

    assert_impl_all!(ByteBuffer: Send, Sync, Clone, Debug);

    #[test]
    fn simple_pointer_addresses_the_buffer() {
        let buffer = ByteBuffer::from((0..16).collect::<Vec<u8>>());

        let mut pointer = ptr(&buffer).unwrap();
        let address = pointer.address().unwrap();
        assert_ne!(address, 0);

        let view = pointer.view().unwrap();
        assert_eq!(view.len(), 16);
        assert_eq!(view.item_size(), 1);

        // SAFETY: The pointer is acquired and the buffer is 16 bytes long.
        let last = unsafe { pointer.as_ptr::<u8>().unwrap().add(15).read() };
        assert_eq!(last, 15);

        pointer.release();
        assert!(matches!(pointer.address(), Err(Error::UseAfterRelease)));
    }

    #[test]
    fn clones_share_memory() {
        let buffer = ByteBuffer::zeroed(4);
        let clone = buffer.clone();

        let first = ptr(&buffer).unwrap().address().unwrap();
        let second = ptr(&clone).unwrap().address().unwrap();
        assert_eq!(first, second);

        clone.write(0, &[5]).unwrap();
        assert_eq!(buffer.to_vec(), [5, 0, 0, 0]);
    }

    #[test]
    fn resize_blocked_exactly_while_exported() {
        let buffer = ByteBuffer::from(vec![1, 2, 3]);

        let mut pointer = ptr(&buffer).unwrap();
        assert_eq!(buffer.outstanding_exports(), 1);
        assert!(matches!(
            buffer.resize(10),
            Err(Error::BufferExported { outstanding: 1 })
        ));

        pointer.release();
        assert_eq!(buffer.outstanding_exports(), 0);
        buffer.resize(5).unwrap();
        assert_eq!(buffer.to_vec(), [1, 2, 3, 0, 0]);
    }

    #[test]
    fn dropping_pointer_unblocks_resize() {
        let buffer = ByteBuffer::zeroed(8);

        {
            let _pointer = ptr(&buffer).unwrap();
            assert!(buffer.resize(1).is_err());
        }

        buffer.resize(1).unwrap();
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn frozen_buffer_is_read_only() {
        let buffer = ByteBuffer::frozen(b"abc");
        assert!(buffer.is_read_only());

        assert!(matches!(
            make_ptr(&buffer, Contract::WRITABLE),
            Err(Error::ReadOnly)
        ));
        assert_eq!(buffer.outstanding_exports(), 0);

        assert!(matches!(buffer.write(0, b"x"), Err(Error::ReadOnly)));
        assert!(matches!(buffer.resize(1), Err(Error::ReadOnly)));

        let pointer = ptr(&buffer).unwrap();
        assert!(pointer.view().unwrap().is_read_only());
        assert!(matches!(pointer.as_mut_ptr::<u8>(), Err(Error::ReadOnly)));
    }

    #[test]
    fn writable_export_excludes_others() {
        let buffer = ByteBuffer::zeroed(8);

        let writer = make_ptr(&buffer, Contract::WRITABLE).unwrap();
        assert!(matches!(ptr(&buffer), Err(Error::ExportConflict { .. })));

        drop(writer);
        let _reader_a = ptr(&buffer).unwrap();
        let _reader_b = ptr(&buffer).unwrap();
        assert_eq!(buffer.outstanding_exports(), 2);
        assert!(matches!(
            make_ptr(&buffer, Contract::WRITABLE),
            Err(Error::ExportConflict { .. })
        ));
    }

    #[test]
    fn strided_view_of_bytes() {
        let buffer = ByteBuffer::zeroed(6);

        let view = acquire(&buffer, Contract::RECORDS_RO).unwrap();
        assert_eq!(view.shape(), Some([6].as_slice()));
        assert_eq!(view.strides(), Some([1].as_slice()));
        assert_eq!(view.format(), Some("B"));
    }

    #[test]
    fn empty_buffer_exports() {
        let buffer = ByteBuffer::zeroed(0);
        assert!(buffer.is_empty());

        let pointer = ptr(&buffer).unwrap();
        assert!(pointer.view().unwrap().is_empty());
    }

    #[test]
    fn pointer_releases_after_failed_write() {
        let buffer = ByteBuffer::from(vec![1, 2, 3]);
        let clone = buffer.clone();

        let pointer = ptr(&buffer).unwrap();

        let write = panic::catch_unwind(AssertUnwindSafe(|| clone.write(100, b"x")));
        assert!(write.is_err());

        drop(pointer);
        assert_eq!(buffer.outstanding_exports(), 0);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.to_vec(), [1, 2, 3]);
        buffer.resize(1).unwrap();
    }
}
