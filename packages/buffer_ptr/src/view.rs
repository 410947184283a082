use std::fmt;

use crate::layout::item_count;
use crate::{Shape, Strides};

/// The native layout of a region of memory, as reported by a [`BufferSource`][crate::BufferSource]
/// when it exports a view.
///
/// The source always reports its full layout; the negotiator decides whether that layout
/// satisfies the caller's [`Contract`][crate::Contract] and which parts of it end up in the
/// resulting [`MemoryView`].
///
/// The length in bytes is derived from the shape and item size, so it always equals
/// `product(shape) * item_size`.
#[derive(Clone, Debug)]
pub struct RawLayout {
    pub(crate) base: *mut u8,
    pub(crate) len: usize,
    pub(crate) item_size: usize,
    pub(crate) read_only: bool,
    pub(crate) format: &'static str,
    pub(crate) shape: Shape,
    pub(crate) strides: Strides,
    pub(crate) suboffsets: Option<Strides>,
}

// SAFETY: A layout only describes memory and never dereferences the base pointer.
unsafe impl Send for RawLayout {}
// SAFETY: See above - no interior mutability, no dereferencing.
unsafe impl Sync for RawLayout {}

impl RawLayout {
    /// Describes a flat, C-contiguous run of `len` bytes starting at `base`.
    #[must_use]
    pub fn bytes(base: *mut u8, len: usize) -> Self {
        Self::new(base, 1, &[len], &[1])
    }

    /// Describes an n-dimensional region of items of `item_size` bytes each.
    ///
    /// # Panics
    ///
    /// Panics if `shape` and `strides` differ in length or if the region described is larger
    /// than the address space.
    #[must_use]
    pub fn new(base: *mut u8, item_size: usize, shape: &[usize], strides: &[isize]) -> Self {
        assert_eq!(
            shape.len(),
            strides.len(),
            "every dimension must have both an extent and a stride"
        );

        let len = item_count(shape)
            .and_then(|count| count.checked_mul(item_size))
            .expect("a memory region cannot be larger than the address space");

        Self {
            base,
            len,
            item_size,
            read_only: false,
            format: "B",
            shape: Shape::from_slice(shape),
            strides: Strides::from_slice(strides),
            suboffsets: None,
        }
    }

    /// Marks the region as read-only.
    #[must_use]
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Sets the struct-module style format code of one item. The default is `"B"`.
    #[must_use]
    pub fn format(mut self, format: &'static str) -> Self {
        self.format = format;
        self
    }

    /// Declares that the region uses indirect addressing with the given per-dimension suboffsets.
    ///
    /// Such a region can only be exported under a contract that requests suboffsets.
    ///
    /// # Panics
    ///
    /// Panics if the number of suboffsets differs from the number of dimensions.
    #[must_use]
    pub fn suboffsets(mut self, suboffsets: &[isize]) -> Self {
        assert_eq!(
            suboffsets.len(),
            self.shape.len(),
            "every dimension must have a suboffset"
        );
        self.suboffsets = Some(Strides::from_slice(suboffsets));
        self
    }

    /// Length of the region in bytes.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the region is zero bytes long.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// The negotiated description of an exported region of memory.
///
/// All fields are snapshots taken at acquisition time and are never recomputed from the source.
/// A view is only meaningful while the export that produced it is outstanding, which is why
/// views are only ever handed out by reference from an [`ExportedView`][crate::ExportedView] or
/// a [`Pointer`][crate::Pointer].
///
/// Optional fields are present only if the contract asked for them.
pub struct MemoryView {
    pub(crate) base: *mut u8,
    pub(crate) len: usize,
    pub(crate) item_size: usize,
    pub(crate) ndim: usize,
    pub(crate) read_only: bool,
    pub(crate) format: Option<&'static str>,
    pub(crate) shape: Option<Shape>,
    pub(crate) strides: Option<Strides>,
    pub(crate) suboffsets: Option<Strides>,
}

// SAFETY: A view is an immutable description of memory. It never dereferences the base pointer
// itself and the memory is kept alive by the export lease owned next to the view.
unsafe impl Send for MemoryView {}
// SAFETY: See above - no interior mutability, no dereferencing.
unsafe impl Sync for MemoryView {}

impl MemoryView {
    /// The base address in the pointer-width unsigned integer form foreign calls expect.
    #[must_use]
    #[inline]
    pub fn address(&self) -> usize {
        self.base.expose_provenance()
    }

    /// The base address as a raw pointer.
    #[must_use]
    #[inline]
    pub fn base_ptr(&self) -> *mut u8 {
        self.base
    }

    /// Total length of the viewed items in bytes.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the view covers zero bytes.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of one item in bytes.
    #[must_use]
    #[inline]
    pub fn item_size(&self) -> usize {
        self.item_size
    }

    /// Number of dimensions of the source memory.
    #[must_use]
    #[inline]
    pub fn ndim(&self) -> usize {
        self.ndim
    }

    /// Whether writing through the view is forbidden.
    #[must_use]
    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Struct-module style format code of one item, if requested.
    #[must_use]
    #[inline]
    pub fn format(&self) -> Option<&'static str> {
        self.format
    }

    /// Extent of each dimension, if requested.
    #[must_use]
    #[inline]
    pub fn shape(&self) -> Option<&[usize]> {
        self.shape.as_deref()
    }

    /// Byte stride of each dimension, if requested.
    #[must_use]
    #[inline]
    pub fn strides(&self) -> Option<&[isize]> {
        self.strides.as_deref()
    }

    /// Suboffset of each dimension, if requested and used by the source.
    #[must_use]
    #[inline]
    pub fn suboffsets(&self) -> Option<&[isize]> {
        self.suboffsets.as_deref()
    }
}

impl fmt::Debug for MemoryView {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryView")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("len", &self.len)
            .field("item_size", &self.item_size)
            .field("ndim", &self.ndim)
            .field("read_only", &self.read_only)
            .field("format", &self.format)
            .field("shape", &self.shape)
            .field("strides", &self.strides)
            .field("suboffsets", &self.suboffsets)
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::ptr;

    use super::*;

    #[test]
    fn length_is_derived_from_shape() {
        let layout = RawLayout::new(ptr::null_mut(), 8, &[3, 4], &[32, 8]);
        assert_eq!(layout.len(), 96);
        assert!(!layout.is_empty());
        assert_eq!(layout.format, "B");
        assert!(!layout.read_only);
    }

    #[test]
    fn bytes_is_flat() {
        let layout = RawLayout::bytes(ptr::null_mut(), 16);
        assert_eq!(layout.len(), 16);
        assert_eq!(layout.item_size, 1);
        assert_eq!(layout.shape.as_slice(), &[16]);
        assert_eq!(layout.strides.as_slice(), &[1]);
    }

    #[test]
    fn modifiers_apply() {
        let layout = RawLayout::bytes(ptr::null_mut(), 4)
            .read_only()
            .format("b")
            .suboffsets(&[-1]);

        assert!(layout.read_only);
        assert_eq!(layout.format, "b");
        assert_eq!(layout.suboffsets.as_deref(), Some([-1].as_slice()));
    }

    #[test]
    #[should_panic]
    fn mismatched_strides_panic() {
        let _layout = RawLayout::new(ptr::null_mut(), 1, &[3, 4], &[4]);
    }

    #[test]
    #[should_panic]
    fn oversized_region_panics() {
        let _layout = RawLayout::new(ptr::null_mut(), 8, &[usize::MAX], &[8]);
    }
}
