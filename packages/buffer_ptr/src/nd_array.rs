use std::fmt;
use std::marker::PhantomData;
use std::slice;

use crate::layout::item_count;
use crate::{
    BufferSource, Contract, Element, Error, Export, HostValue, RawLayout, Result, Shape,
    SharedStorage, Strides, checked_c_strides, checked_f_strides, is_c_contiguous,
    is_f_contiguous,
};

/// Memory order of a newly created [`NdArray`].
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Order {
    /// Row-major: the last index varies fastest.
    #[default]
    C,

    /// Column-major: the first index varies fastest.
    Fortran,
}

/// An n-dimensional array of [`Element`] items that exports views of itself.
///
/// Clones, [`step()`](NdArray::step) views and [`transpose()`](NdArray::transpose) views are
/// handles to the same memory and share its export bookkeeping: a writable export of any of them
/// excludes all other exports of the memory.
///
/// # Examples
///
/// ```
/// use buffer_ptr::{Contract, NdArray, Order, make_ptr};
///
/// let array = NdArray::from_vec((0..12).map(f64::from).collect(), &[3, 4], Order::C);
///
/// let pointer = make_ptr(&array, Contract::STRIDED).unwrap();
/// let view = pointer.view().unwrap();
///
/// assert_eq!(view.shape(), Some([3, 4].as_slice()));
/// assert_eq!(view.strides(), Some([32, 8].as_slice()));
/// ```
pub struct NdArray<T> {
    storage: SharedStorage,
    shape: Shape,

    /// In bytes.
    strides: Strides,

    read_only: bool,

    _item: PhantomData<fn() -> T>,
}

impl<T: Element> NdArray<T> {
    /// Creates an array of zeros.
    ///
    /// # Panics
    ///
    /// Panics if the array would be larger than the address space or if its strides do not fit
    /// in an `isize`, which an empty shape with huge extents can cause.
    #[must_use]
    pub fn zeros(shape: &[usize], order: Order) -> Self {
        let size = item_count(shape)
            .and_then(|count| count.checked_mul(size_of::<T>()))
            .expect("array cannot be larger than the address space");

        Self::with_storage(SharedStorage::zeroed(size, align_of::<T>()), shape, order)
    }

    /// Creates an array that stores `data` as-is, indexed according to `order`.
    ///
    /// # Panics
    ///
    /// Panics if the number of items in `data` does not match `shape` or if the strides of the
    /// shape do not fit in an `isize`.
    #[must_use]
    pub fn from_vec(data: Vec<T>, shape: &[usize], order: Order) -> Self {
        assert_eq!(
            item_count(shape),
            Some(data.len()),
            "shape {shape:?} does not match {} items",
            data.len()
        );

        // SAFETY: `Element` guarantees the items are plain old data without padding, so viewing
        // them as bytes is valid.
        let bytes = unsafe {
            slice::from_raw_parts(data.as_ptr().cast::<u8>(), size_of_val(data.as_slice()))
        };

        Self::with_storage(SharedStorage::from_bytes(bytes, align_of::<T>()), shape, order)
    }

    fn with_storage(storage: SharedStorage, shape: &[usize], order: Order) -> Self {
        let strides = match order {
            Order::C => checked_c_strides(shape, size_of::<T>()),
            Order::Fortran => checked_f_strides(shape, size_of::<T>()),
        }
        .unwrap_or_else(|| panic!("strides of shape {shape:?} do not fit in an isize"));

        Self {
            storage,
            shape: Shape::from_slice(shape),
            strides,
            read_only: false,
            _item: PhantomData,
        }
    }

    /// Extent of each dimension.
    #[must_use]
    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Byte stride of each dimension.
    #[must_use]
    #[inline]
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    /// Number of dimensions.
    #[must_use]
    #[inline]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        item_count(&self.shape).expect("validated when the array was created")
    }

    /// Whether the array holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the items are laid out in C order without gaps.
    #[must_use]
    pub fn is_c_contiguous(&self) -> bool {
        is_c_contiguous(&self.shape, &self.strides, size_of::<T>())
    }

    /// Whether the items are laid out in Fortran order without gaps.
    #[must_use]
    pub fn is_f_contiguous(&self) -> bool {
        is_f_contiguous(&self.shape, &self.strides, size_of::<T>())
    }

    /// Whether this handle refuses writes.
    #[must_use]
    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// A read-only handle to the same memory.
    #[must_use]
    pub fn read_only(&self) -> Self {
        Self {
            read_only: true,
            ..self.clone()
        }
    }

    /// A view of every `step`-th index along `axis`, sharing memory with this array.
    ///
    /// # Panics
    ///
    /// Panics if `axis` is out of range or `step` is zero.
    #[must_use]
    pub fn step(&self, axis: usize, step: usize) -> Self {
        assert!(step > 0, "step must be positive");
        assert!(
            axis < self.ndim(),
            "axis {axis} out of range for {} dimensions",
            self.ndim()
        );

        let mut view = self.clone();

        if let (Some(extent), Some(stride)) = (view.shape.get_mut(axis), view.strides.get_mut(axis))
        {
            *extent = extent.div_ceil(step);
            *stride = stride
                .checked_mul(isize::try_from(step).expect("step larger than the address space"))
                .expect("stride overflow");
        }

        view
    }

    /// A view with the order of the axes reversed, sharing memory with this array.
    ///
    /// The transpose of a C-contiguous array is Fortran-contiguous and vice versa.
    #[must_use]
    pub fn transpose(&self) -> Self {
        let mut view = self.clone();
        view.shape.reverse();
        view.strides.reverse();
        view
    }

    /// Reads the item at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub fn get(&self, index: &[usize]) -> T {
        self.storage.read_item(self.byte_offset(index))
    }

    /// Writes the item at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ReadOnly`] if this handle is read-only.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn set(&self, index: &[usize], value: T) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }

        self.storage.write_item(self.byte_offset(index), value);
        Ok(())
    }

    /// Copies the items in C order, regardless of the memory layout.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.len());

        if self.is_empty() {
            return items;
        }

        let mut index = vec![0_usize; self.ndim()];

        'items: loop {
            items.push(self.get(&index));

            // Advance the index like an odometer, last axis fastest.
            for (position, extent) in index.iter_mut().zip(&self.shape).rev() {
                *position = position.checked_add(1).expect("bounded by extent");
                if *position < *extent {
                    continue 'items;
                }
                *position = 0;
            }

            return items;
        }
    }

    /// Number of views of the underlying memory currently exported, via any handle.
    #[must_use]
    pub fn outstanding_exports(&self) -> usize {
        self.storage.outstanding_exports()
    }

    fn byte_offset(&self, index: &[usize]) -> usize {
        assert_eq!(
            index.len(),
            self.ndim(),
            "index has {} positions but the array has {} dimensions",
            index.len(),
            self.ndim()
        );

        let offset = index
            .iter()
            .zip(&self.shape)
            .zip(&self.strides)
            .map(|((position, extent), stride)| {
                assert!(
                    position < extent,
                    "index {position} out of bounds for extent {extent}"
                );
                isize::try_from(*position)
                    .ok()
                    .and_then(|position| position.checked_mul(*stride))
                    .expect("offset within an allocated region")
            })
            .try_fold(0_isize, isize::checked_add)
            .expect("offset within an allocated region");

        usize::try_from(offset).expect("views never step before the start of their memory")
    }
}

impl<T> Clone for NdArray<T> {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            shape: self.shape.clone(),
            strides: self.strides.clone(),
            read_only: self.read_only,
            _item: PhantomData,
        }
    }
}

impl<T: Element> fmt::Debug for NdArray<T> {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NdArray")
            .field("format", &T::FORMAT)
            .field("shape", &self.shape)
            .field("strides", &self.strides)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl<T: Element> BufferSource for NdArray<T> {
    fn export(&self, contract: Contract) -> Result<Export> {
        if contract.is_writable() && self.read_only {
            return Err(Error::ReadOnly);
        }

        let (base, lease) = self.storage.export(contract.is_writable())?;

        let mut layout =
            RawLayout::new(base, size_of::<T>(), &self.shape, &self.strides).format(T::FORMAT);
        if self.read_only {
            layout = layout.read_only();
        }

        Ok(Export::new(layout, lease))
    }
}

impl<T: Element> HostValue for NdArray<T> {
    fn buffer_source(&self) -> Option<&dyn BufferSource> {
        Some(self)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;
    use crate::{acquire, make_ptr, nc_ptr, ptr};

    assert_impl_all!(NdArray<f64>: Send, Sync, Clone, fmt::Debug);

    fn counting(shape: &[usize], order: Order) -> NdArray<i32> {
        let count = i32::try_from(item_count(shape).unwrap()).unwrap();
        NdArray::from_vec((0..count).collect(), shape, order)
    }

    #[test]
    fn c_matrix_under_writable_strides() {
        let array = NdArray::<f64>::zeros(&[3, 4], Order::C);

        let pointer = make_ptr(&array, Contract::STRIDED).unwrap();
        let view = pointer.view().unwrap();

        assert_eq!(view.shape(), Some([3, 4].as_slice()));
        assert_eq!(view.strides(), Some([4 * 8, 8].as_slice()));
        assert_eq!(view.len(), 3 * 4 * 8);
        assert_eq!(view.item_size(), 8);
        assert!(!view.is_read_only());
    }

    #[test]
    fn writes_through_pointer_are_visible() {
        let array = NdArray::<f64>::zeros(&[3, 4], Order::C);

        let pointer = make_ptr(&array, Contract::C_CONTIGUOUS | Contract::WRITABLE).unwrap();
        let items = pointer.as_mut_ptr::<f64>().unwrap();

        // SAFETY: The pointer is acquired and item 1*4+2 is within the 12 items.
        unsafe { items.add(6).write(1.5) };

        drop(pointer);
        assert_eq!(array.get(&[1, 2]).to_bits(), 1.5_f64.to_bits());
    }

    #[test]
    fn address_matches_first_item() {
        let array = counting(&[10, 10], Order::C);

        let pointer = ptr(&array).unwrap();
        // SAFETY: The pointer is acquired and the array is not empty.
        let first = unsafe { pointer.as_ptr::<i32>().unwrap().read() };
        assert_eq!(first, 0);
    }

    #[test]
    fn stepped_view_requires_strides() {
        let array = counting(&[10, 10], Order::C);
        let address = ptr(&array).unwrap().address().unwrap();

        let stepped = array.step(0, 2);
        assert_eq!(stepped.shape(), &[5, 10]);
        assert!(!stepped.is_c_contiguous());

        let Err(error) = ptr(&stepped) else {
            panic!("stepped view is not contiguous");
        };
        assert!(matches!(error, Error::IncompatibleLayout { .. }));
        assert_eq!(array.outstanding_exports(), 0);

        let pointer = nc_ptr(&stepped).unwrap();
        assert_eq!(pointer.address().unwrap(), address);
        assert_eq!(
            pointer.view().unwrap().strides(),
            Some([80, 4].as_slice())
        );
    }

    #[test]
    fn c_contiguous_contract_refuses_non_c_sources() {
        let array = counting(&[3, 4], Order::C);

        for source in [array.step(1, 2), array.transpose()] {
            assert!(matches!(
                acquire(&source, Contract::C_CONTIGUOUS),
                Err(Error::IncompatibleLayout { .. })
            ));
        }

        assert_eq!(array.outstanding_exports(), 0);
    }

    #[test]
    fn fortran_array_exports_fortran_strides() {
        let array = NdArray::<f32>::zeros(&[3, 4], Order::Fortran);
        assert!(array.is_f_contiguous());
        assert!(!array.is_c_contiguous());

        let view = acquire(&array, Contract::F_CONTIGUOUS).unwrap();
        assert_eq!(view.strides(), Some([4, 12].as_slice()));

        let view = acquire(&array, Contract::ANY_CONTIGUOUS).unwrap();
        assert_eq!(view.strides(), Some([4, 12].as_slice()));
    }

    #[test]
    fn transpose_swaps_contiguity() {
        let array = counting(&[2, 3], Order::C);
        let transposed = array.transpose();

        assert_eq!(transposed.shape(), &[3, 2]);
        assert!(transposed.is_f_contiguous());
        assert_eq!(transposed.get(&[2, 1]), array.get(&[1, 2]));
        assert_eq!(transposed.to_vec(), [0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn from_vec_fortran_order_indexing() {
        let array = NdArray::from_vec(vec![1_u8, 2, 3, 4, 5, 6], &[2, 3], Order::Fortran);

        assert_eq!(array.get(&[0, 0]), 1);
        assert_eq!(array.get(&[1, 0]), 2);
        assert_eq!(array.get(&[0, 1]), 3);
        assert_eq!(array.to_vec(), [1, 3, 5, 2, 4, 6]);
    }

    #[test]
    fn format_reports_item_type() {
        let array = NdArray::<i64>::zeros(&[2], Order::C);

        let view = acquire(&array, Contract::RECORDS_RO).unwrap();
        assert_eq!(view.format(), Some("q"));
        assert_eq!(view.item_size(), 8);
    }

    #[test]
    fn views_share_export_bookkeeping() {
        let array = counting(&[4, 4], Order::C);
        let stepped = array.step(1, 2);

        let writer = make_ptr(&array, Contract::STRIDED).unwrap();
        assert!(matches!(
            nc_ptr(&stepped),
            Err(Error::ExportConflict { .. })
        ));
        drop(writer);

        let _reader = nc_ptr(&stepped).unwrap();
        let _other_reader = ptr(&array).unwrap();
        assert_eq!(array.outstanding_exports(), 2);
    }

    #[test]
    fn read_only_handle() {
        let array = counting(&[2, 2], Order::C);
        let frozen = array.read_only();

        assert!(matches!(frozen.set(&[0, 0], 9), Err(Error::ReadOnly)));
        assert!(matches!(
            make_ptr(&frozen, Contract::STRIDED),
            Err(Error::ReadOnly)
        ));

        array.set(&[0, 0], 9).unwrap();
        assert_eq!(frozen.get(&[0, 0]), 9);
    }

    #[test]
    fn empty_array() {
        let array = NdArray::<u16>::zeros(&[0, 5], Order::C);
        assert!(array.is_empty());
        assert!(array.to_vec().is_empty());

        let view = acquire(&array, Contract::C_CONTIGUOUS).unwrap();
        assert_eq!(view.len(), 0);
    }

    #[test]
    fn zero_dimensional_array_holds_one_item() {
        let array = NdArray::from_vec(vec![7_u32], &[], Order::C);
        assert_eq!(array.len(), 1);
        assert_eq!(array.get(&[]), 7);
        assert_eq!(array.to_vec(), [7]);
    }

    #[test]
    #[should_panic]
    fn from_vec_shape_mismatch_panics() {
        let _array = NdArray::from_vec(vec![1_u8, 2, 3], &[2, 2], Order::C);
    }

    #[test]
    #[should_panic(expected = "do not fit in an isize")]
    fn zeros_with_unrepresentable_strides_panics() {
        let _array = NdArray::<f64>::zeros(&[0, usize::MAX, 2], Order::C);
    }

    #[test]
    fn empty_array_with_huge_slowest_extent() {
        let array = NdArray::<f64>::zeros(&[usize::MAX, 0], Order::C);
        assert!(array.is_empty());
        assert_eq!(array.strides(), &[0, 8]);
        assert!(acquire(&array, Contract::C_CONTIGUOUS).is_ok());
    }

    #[test]
    #[should_panic]
    fn out_of_bounds_index_panics() {
        let array = NdArray::<u8>::zeros(&[2, 2], Order::C);
        let _item = array.get(&[2, 0]);
    }
}
