//! Stride and contiguity arithmetic shared by the negotiator and the built-in sources.

use smallvec::SmallVec;

/// Extent of each dimension.
pub type Shape = SmallVec<[usize; 4]>;

/// Byte stride of each dimension. Negative strides step backwards through memory.
pub type Strides = SmallVec<[isize; 4]>;

const ERR_STRIDE_OVERFLOW: &str = "canonical strides of the shape do not fit in an isize";

/// Canonical C-order (row-major) strides for `shape` and `item_size`.
///
/// # Panics
///
/// Panics if a stride does not fit in an `isize`. Only an empty shape with huge extents can get
/// there; see [`checked_c_strides()`] for the fallible form.
///
/// # Examples
///
/// ```
/// use buffer_ptr::c_strides;
///
/// assert_eq!(c_strides(&[3, 4], 8).as_slice(), &[32, 8]);
/// ```
#[must_use]
pub fn c_strides(shape: &[usize], item_size: usize) -> Strides {
    checked_c_strides(shape, item_size).expect(ERR_STRIDE_OVERFLOW)
}

/// Canonical Fortran-order (column-major) strides for `shape` and `item_size`.
///
/// # Panics
///
/// Panics if a stride does not fit in an `isize`. Only an empty shape with huge extents can get
/// there; see [`checked_f_strides()`] for the fallible form.
///
/// # Examples
///
/// ```
/// use buffer_ptr::f_strides;
///
/// assert_eq!(f_strides(&[3, 4], 8).as_slice(), &[8, 24]);
/// ```
#[must_use]
pub fn f_strides(shape: &[usize], item_size: usize) -> Strides {
    checked_f_strides(shape, item_size).expect(ERR_STRIDE_OVERFLOW)
}

/// Canonical C-order strides, or `None` if a stride does not fit in an `isize`.
#[must_use]
pub fn checked_c_strides(shape: &[usize], item_size: usize) -> Option<Strides> {
    let mut strides = Strides::from_elem(0, shape.len());
    fill_strides(strides.iter_mut().zip(shape).rev(), item_size)?;
    Some(strides)
}

/// Canonical Fortran-order strides, or `None` if a stride does not fit in an `isize`.
#[must_use]
pub fn checked_f_strides(shape: &[usize], item_size: usize) -> Option<Strides> {
    let mut strides = Strides::from_elem(0, shape.len());
    fill_strides(strides.iter_mut().zip(shape), item_size)?;
    Some(strides)
}

fn fill_strides<'a>(
    dimensions_fastest_first: impl Iterator<Item = (&'a mut isize, &'a usize)>,
    item_size: usize,
) -> Option<()> {
    let mut step = item_size;
    let mut dimensions = dimensions_fastest_first.peekable();

    while let Some((stride, extent)) = dimensions.next() {
        *stride = isize::try_from(step).ok()?;

        // The step past the slowest dimension is never stored.
        if dimensions.peek().is_some() {
            step = step.checked_mul(*extent)?;
        }
    }

    Some(())
}

/// Whether memory laid out with `shape` and `strides` is C-contiguous.
///
/// Dimensions of extent 1 may carry any stride; an empty region is contiguous in every order.
#[must_use]
pub fn is_c_contiguous(shape: &[usize], strides: &[isize], item_size: usize) -> bool {
    is_contiguous(shape.iter().zip(strides).rev(), item_size)
}

/// Whether memory laid out with `shape` and `strides` is Fortran-contiguous.
///
/// Dimensions of extent 1 may carry any stride; an empty region is contiguous in every order.
#[must_use]
pub fn is_f_contiguous(shape: &[usize], strides: &[isize], item_size: usize) -> bool {
    is_contiguous(shape.iter().zip(strides), item_size)
}

fn is_contiguous<'a>(
    dimensions_fastest_first: impl Iterator<Item = (&'a usize, &'a isize)> + Clone,
    item_size: usize,
) -> bool {
    if dimensions_fastest_first
        .clone()
        .any(|(extent, _)| *extent == 0)
    {
        return true;
    }

    let mut expected = item_size;

    for (extent, stride) in dimensions_fastest_first {
        if *extent > 1 && usize::try_from(*stride) != Ok(expected) {
            return false;
        }

        let Some(next) = expected.checked_mul(*extent) else {
            return false;
        };
        expected = next;
    }

    true
}

/// Number of items in a region of the given shape, or `None` on overflow.
#[must_use]
pub(crate) fn item_count(shape: &[usize]) -> Option<usize> {
    shape
        .iter()
        .try_fold(1_usize, |count, extent| count.checked_mul(*extent))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn c_strides_of_matrix() {
        assert_eq!(c_strides(&[3, 4], 8).as_slice(), &[32, 8]);
        assert_eq!(c_strides(&[2, 3, 4], 1).as_slice(), &[12, 4, 1]);
        assert!(c_strides(&[], 4).is_empty());
    }

    #[test]
    fn f_strides_of_matrix() {
        assert_eq!(f_strides(&[3, 4], 8).as_slice(), &[8, 24]);
        assert_eq!(f_strides(&[2, 3, 4], 1).as_slice(), &[1, 2, 6]);
    }

    #[test]
    fn canonical_strides_are_contiguous() {
        let shape = [3, 4, 5];
        assert!(is_c_contiguous(&shape, &c_strides(&shape, 4), 4));
        assert!(is_f_contiguous(&shape, &f_strides(&shape, 4), 4));
        assert!(!is_c_contiguous(&shape, &f_strides(&shape, 4), 4));
        assert!(!is_f_contiguous(&shape, &c_strides(&shape, 4), 4));
    }

    #[test]
    fn vector_is_contiguous_in_both_orders() {
        assert!(is_c_contiguous(&[7], &[2], 2));
        assert!(is_f_contiguous(&[7], &[2], 2));
    }

    #[test]
    fn unit_extent_ignores_stride() {
        assert!(is_c_contiguous(&[1, 4], &[999, 8], 8));
        assert!(is_f_contiguous(&[4, 1], &[8, -5], 8));
    }

    #[test]
    fn empty_region_is_contiguous() {
        assert!(is_c_contiguous(&[0, 4], &[64, 16], 8));
        assert!(is_f_contiguous(&[0, 4], &[64, 16], 8));
    }

    #[test]
    fn stepped_rows_are_not_contiguous() {
        // Every second row of a 10x10 matrix of i32.
        assert!(!is_c_contiguous(&[5, 10], &[80, 4], 4));
        assert!(!is_f_contiguous(&[5, 10], &[80, 4], 4));
    }

    #[test]
    fn negative_stride_is_not_contiguous() {
        assert!(!is_c_contiguous(&[4], &[-8], 8));
    }

    #[test]
    fn item_count_multiplies_extents() {
        assert_eq!(item_count(&[3, 4]), Some(12));
        assert_eq!(item_count(&[]), Some(1));
        assert_eq!(item_count(&[usize::MAX, 2]), None);
    }

    #[test]
    fn huge_empty_shape_has_no_canonical_strides() {
        assert_eq!(checked_c_strides(&[0, usize::MAX, 2], 8), None);
        assert_eq!(checked_f_strides(&[2, usize::MAX, 0], 8), None);

        // The slowest extent never feeds into a stride.
        assert_eq!(
            checked_c_strides(&[usize::MAX, 0], 8).unwrap().as_slice(),
            &[0, 8]
        );
    }

    #[test]
    #[should_panic]
    fn c_strides_panics_on_overflow() {
        let _strides = c_strides(&[0, usize::MAX, 2], 8);
    }
}
