use std::fmt;
use std::ops::Deref;

use crate::layout::{
    checked_c_strides, checked_f_strides, is_c_contiguous, is_f_contiguous, item_count,
};
use crate::{
    Contiguity, Contract, Error, ExportLease, HostValue, MemoryView, RawLayout, Result,
    ShapeMetadata,
};

/// Negotiates a memory view of `value` under `contract`.
///
/// On success the returned [`ExportedView`] holds the export open: the memory it describes stays
/// valid, fixed and of the declared size and shape until the view is released or dropped.
///
/// The export is released again on every failure path after the source agreed to it, so a failed
/// acquisition leaves no export behind.
///
/// # Errors
///
/// * [`Error::InvalidContract`] if `contract` is internally inconsistent.
/// * [`Error::UnsupportedSource`] if `value` cannot export memory at all.
/// * [`Error::IncompatibleLayout`] if the memory cannot satisfy the requested contiguity or shape.
/// * [`Error::ReadOnly`] if a writable view was requested from read-only memory.
/// * Any error the source itself reports, e.g. [`Error::ExportConflict`].
///
/// # Examples
///
/// ```
/// use buffer_ptr::{Contract, NdArray, Order, acquire};
///
/// let array = NdArray::<f64>::zeros(&[3, 4], Order::C);
/// let view = acquire(&array, Contract::STRIDED).unwrap();
///
/// assert_eq!(view.shape(), Some([3, 4].as_slice()));
/// assert_eq!(view.strides(), Some([32, 8].as_slice()));
/// ```
pub fn acquire(value: &dyn HostValue, contract: Contract) -> Result<ExportedView> {
    if let Err(error) = contract.validate() {
        log::debug!("rejected contract {contract}: {error}");
        return Err(error);
    }

    let Some(source) = value.buffer_source() else {
        log::debug!(
            "value of type {} has no bufferable capability",
            value.type_name()
        );
        return Err(Error::UnsupportedSource {
            type_name: value.type_name(),
        });
    };

    let (layout, lease) = source.export(contract)?.into_parts();

    // From here on the lease releases the export if we bail out.
    let lease = Lease::new(lease);

    let view = negotiate(&layout, contract).inspect_err(|error| {
        log::debug!("export of {} bytes rejected: {error}", layout.len());
    })?;

    log::trace!(
        "exported {} bytes at {:#x} under contract {contract}",
        view.len(),
        view.address()
    );

    Ok(ExportedView { view, lease })
}

fn negotiate(layout: &RawLayout, contract: Contract) -> Result<MemoryView> {
    if contract.is_writable() && layout.read_only {
        log::warn!("source exported read-only memory for a writable contract {contract}");
        return Err(Error::ReadOnly);
    }

    let incompatible = |problem: &str| Error::IncompatibleLayout {
        contract,
        problem: problem.to_string(),
    };

    if layout.shape.len() != layout.strides.len() {
        log::warn!("source reported a shape and strides of different dimensionality");
        return Err(incompatible("shape and strides differ in dimensionality"));
    }

    if item_count(&layout.shape).and_then(|count| count.checked_mul(layout.item_size))
        != Some(layout.len)
    {
        log::warn!("source reported a length that does not match its shape");
        return Err(incompatible("length does not match shape and item size"));
    }

    let shape_metadata = contract.shape_metadata();

    if layout.suboffsets.is_some() && shape_metadata != ShapeMetadata::Indirect {
        return Err(incompatible(
            "memory uses indirect addressing but suboffsets were not requested",
        ));
    }

    // Memory that needs suboffsets is not contiguous in any order.
    let direct = layout.suboffsets.is_none();
    let c_contiguous =
        direct && is_c_contiguous(&layout.shape, &layout.strides, layout.item_size);
    let f_contiguous =
        direct && is_f_contiguous(&layout.shape, &layout.strides, layout.item_size);

    if contract.requires_c_layout() && !c_contiguous {
        return Err(incompatible("memory is not C-contiguous"));
    }

    let strides = match contract.contiguity() {
        Contiguity::C => checked_c_strides(&layout.shape, layout.item_size),
        Contiguity::Fortran if f_contiguous => checked_f_strides(&layout.shape, layout.item_size),
        Contiguity::Fortran => return Err(incompatible("memory is not Fortran-contiguous")),
        Contiguity::Any if c_contiguous => checked_c_strides(&layout.shape, layout.item_size),
        Contiguity::Any if f_contiguous => checked_f_strides(&layout.shape, layout.item_size),
        Contiguity::Any => return Err(incompatible("memory is not contiguous in any order")),
        Contiguity::None => Some(layout.strides.clone()),
    }
    .ok_or_else(|| incompatible("canonical strides of the shape do not fit in an isize"))?;

    Ok(MemoryView {
        base: layout.base,
        len: layout.len,
        item_size: layout.item_size,
        ndim: layout.shape.len(),
        read_only: layout.read_only,
        format: contract.wants_format().then_some(layout.format),
        shape: (shape_metadata >= ShapeMetadata::Extents).then(|| layout.shape.clone()),
        strides: (shape_metadata >= ShapeMetadata::Strides).then_some(strides),
        suboffsets: if shape_metadata == ShapeMetadata::Indirect {
            layout.suboffsets.clone()
        } else {
            None
        },
    })
}

/// Releases its export exactly once: explicitly, or when dropped.
struct Lease(Option<Box<dyn ExportLease>>);

impl Lease {
    fn new(lease: Box<dyn ExportLease>) -> Self {
        Self(Some(lease))
    }

    fn release(&mut self) {
        if let Some(lease) = self.0.take() {
            lease.release();
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release();
    }
}

/// A negotiated [`MemoryView`] together with the export that keeps it valid.
///
/// Dereferences to the view. Dropping an `ExportedView` releases the export; so does
/// [`release()`](ExportedView::release), which makes the release point explicit.
#[must_use]
pub struct ExportedView {
    view: MemoryView,
    lease: Lease,
}

impl ExportedView {
    /// The negotiated view.
    #[must_use]
    #[inline]
    pub fn view(&self) -> &MemoryView {
        &self.view
    }

    /// Releases the export back to the source.
    pub fn release(mut self) {
        self.lease.release();
    }
}

impl Deref for ExportedView {
    type Target = MemoryView;

    #[inline]
    fn deref(&self) -> &MemoryView {
        &self.view
    }
}

impl fmt::Debug for ExportedView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedView")
            .field("view", &self.view)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::indexing_slicing,
    reason = "tests focus on succinct code and do not need to tick all the boxes"
)]
mod tests {
    use std::ptr;
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::test_utils::{CountingLease, fake_base, source_with_layout};
    use crate::{Export, MockBufferSource};

    assert_impl_all!(ExportedView: Send, Sync, fmt::Debug);

    fn matrix_c() -> RawLayout {
        RawLayout::new(fake_base(), 8, &[3, 4], &[32, 8]).format("d")
    }

    fn matrix_f() -> RawLayout {
        RawLayout::new(fake_base(), 8, &[3, 4], &[8, 24]).format("d")
    }

    fn stepped_rows() -> RawLayout {
        RawLayout::new(fake_base(), 4, &[5, 10], &[80, 4])
    }

    #[test]
    fn c_matrix_under_strided_contract() {
        let (source, releases) = source_with_layout(matrix_c);

        let view = acquire(&source, Contract::STRIDED).unwrap();
        assert_eq!(view.address(), 0x1000);
        assert_eq!(view.len(), 96);
        assert_eq!(view.item_size(), 8);
        assert_eq!(view.ndim(), 2);
        assert_eq!(view.shape(), Some([3, 4].as_slice()));
        assert_eq!(view.strides(), Some([32, 8].as_slice()));
        assert_eq!(view.format(), None);
        assert_eq!(view.suboffsets(), None);
        assert!(!view.is_read_only());

        assert_eq!(releases.load(Ordering::SeqCst), 0);
        view.release();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_view_releases_once() {
        let (source, releases) = source_with_layout(matrix_c);

        let view = acquire(&source, Contract::SIMPLE).unwrap();
        drop(view);

        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn simple_contract_omits_shape() {
        let (source, _releases) = source_with_layout(matrix_c);

        let view = acquire(&source, Contract::SIMPLE).unwrap();
        assert_eq!(view.shape(), None);
        assert_eq!(view.strides(), None);
        assert_eq!(view.format(), None);
        assert_eq!(view.len(), 96);
        assert_eq!(view.ndim(), 2);
    }

    #[test]
    fn extents_without_strides() {
        let (source, _releases) = source_with_layout(matrix_c);

        let view = acquire(&source, Contract::ND).unwrap();
        assert_eq!(view.shape(), Some([3, 4].as_slice()));
        assert_eq!(view.strides(), None);
    }

    #[test]
    fn format_only_when_requested() {
        let (source, _releases) = source_with_layout(matrix_c);

        let view = acquire(&source, Contract::RECORDS_RO).unwrap();
        assert_eq!(view.format(), Some("d"));
    }

    #[test]
    fn length_matches_shape_whenever_shape_is_requested() {
        for contract in [
            Contract::ND,
            Contract::STRIDED_RO,
            Contract::C_CONTIGUOUS,
            Contract::ANY_CONTIGUOUS,
            Contract::FULL,
        ] {
            let (source, _releases) = source_with_layout(matrix_c);
            let view = acquire(&source, contract).unwrap();

            let shape = view.shape().unwrap();
            assert_eq!(
                view.len(),
                shape.iter().product::<usize>() * view.item_size()
            );
        }
    }

    #[test]
    fn fortran_memory_fails_c_contract_and_releases() {
        for contract in [Contract::SIMPLE, Contract::ND, Contract::C_CONTIGUOUS] {
            let (source, releases) = source_with_layout(matrix_f);

            let result = acquire(&source, contract);
            assert!(matches!(result, Err(Error::IncompatibleLayout { .. })));
            assert_eq!(releases.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn fortran_memory_satisfies_fortran_and_any() {
        let (source, _releases) = source_with_layout(matrix_f);
        let view = acquire(&source, Contract::F_CONTIGUOUS).unwrap();
        assert_eq!(view.strides(), Some([8, 24].as_slice()));

        let (source, _releases) = source_with_layout(matrix_f);
        let view = acquire(&source, Contract::ANY_CONTIGUOUS).unwrap();
        assert_eq!(view.strides(), Some([8, 24].as_slice()));
    }

    #[test]
    fn c_memory_fails_fortran_contract() {
        let (source, releases) = source_with_layout(matrix_c);

        let result = acquire(&source, Contract::F_CONTIGUOUS);
        assert!(matches!(result, Err(Error::IncompatibleLayout { .. })));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stepped_memory_only_under_plain_strides() {
        for contract in [
            Contract::SIMPLE,
            Contract::C_CONTIGUOUS,
            Contract::F_CONTIGUOUS,
            Contract::ANY_CONTIGUOUS,
        ] {
            let (source, releases) = source_with_layout(stepped_rows);
            assert!(matches!(
                acquire(&source, contract),
                Err(Error::IncompatibleLayout { .. })
            ));
            assert_eq!(releases.load(Ordering::SeqCst), 1);
        }

        let (source, _releases) = source_with_layout(stepped_rows);
        let view = acquire(&source, Contract::STRIDED_RO).unwrap();
        assert_eq!(view.address(), 0x1000);
        assert_eq!(view.strides(), Some([80, 4].as_slice()));
    }

    #[test]
    fn c_contract_canonicalizes_unit_extent_strides() {
        let (source, _releases) =
            source_with_layout(|| RawLayout::new(fake_base(), 8, &[1, 4], &[999, 8]));

        let view = acquire(&source, Contract::C_CONTIGUOUS).unwrap();
        assert_eq!(view.strides(), Some([32, 8].as_slice()));
    }

    #[test]
    fn invalid_contract_never_reaches_source() {
        let mut source = MockBufferSource::new();
        source.expect_export().never();

        let result = acquire(&source, Contract::from_bits(0x100));
        assert!(matches!(result, Err(Error::InvalidContract { .. })));
    }

    #[test]
    fn invalid_contract_wins_over_unsupported_source() {
        let result = acquire(&"text", Contract::from_bits(0x100 | 0x008));
        assert!(matches!(result, Err(Error::InvalidContract { .. })));
    }

    #[test]
    fn unsupported_source_names_type() {
        let result = acquire(&42_i32, Contract::SIMPLE);
        assert!(matches!(
            result,
            Err(Error::UnsupportedSource { type_name: "i32" })
        ));
    }

    #[test]
    fn source_error_propagates() {
        let mut source = MockBufferSource::new();
        source.expect_export().times(1).returning(|_| {
            Err(Error::ExportConflict {
                shared: 0,
                exclusive: 1,
            })
        });

        let result = acquire(&source, Contract::SIMPLE);
        assert!(matches!(result, Err(Error::ExportConflict { .. })));
    }

    #[test]
    fn source_receives_requested_contract() {
        let mut source = MockBufferSource::new();
        source
            .expect_export()
            .withf(|contract| *contract == Contract::FULL_RO)
            .times(1)
            .returning(|_| Ok(Export::new(matrix_c(), CountingLease(Arc::default()))));

        let _view = acquire(&source, Contract::FULL_RO).unwrap();
    }

    #[test]
    fn read_only_memory_refuses_writable_contract() {
        let (source, releases) = source_with_layout(|| matrix_c().read_only());

        assert!(matches!(
            acquire(&source, Contract::STRIDED),
            Err(Error::ReadOnly)
        ));
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        let (source, _releases) = source_with_layout(|| matrix_c().read_only());
        let view = acquire(&source, Contract::STRIDED_RO).unwrap();
        assert!(view.is_read_only());
    }

    #[test]
    fn indirect_memory_requires_indirect_contract() {
        let indirect = || matrix_c().suboffsets(&[0, -1]);

        let (source, releases) = source_with_layout(indirect);
        assert!(matches!(
            acquire(&source, Contract::STRIDED),
            Err(Error::IncompatibleLayout { .. })
        ));
        assert_eq!(releases.load(Ordering::SeqCst), 1);

        let (source, _releases) = source_with_layout(indirect);
        let view = acquire(&source, Contract::INDIRECT).unwrap();
        assert_eq!(view.suboffsets(), Some([0, -1].as_slice()));
    }

    #[test]
    fn inconsistent_source_layout_is_rejected() {
        let (source, releases) = source_with_layout(|| {
            let mut layout = matrix_c();
            layout.len = 7;
            layout
        });

        assert!(matches!(
            acquire(&source, Contract::STRIDED),
            Err(Error::IncompatibleLayout { .. })
        ));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_layout_without_canonical_strides_is_rejected() {
        let (source, releases) = source_with_layout(|| {
            RawLayout::new(ptr::null_mut(), 8, &[0, usize::MAX, 2], &[8, 8, 8])
        });

        for contract in [Contract::C_CONTIGUOUS, Contract::ANY_CONTIGUOUS] {
            assert!(matches!(
                acquire(&source, contract),
                Err(Error::IncompatibleLayout { .. })
            ));
        }
        assert_eq!(releases.load(Ordering::SeqCst), 2);

        // Without a contiguity request the reported strides are passed through.
        let view = acquire(&source, Contract::STRIDED_RO).unwrap();
        assert_eq!(view.strides(), Some([8, 8, 8].as_slice()));
        assert!(view.is_empty());
    }

    #[test]
    fn null_base_is_not_special() {
        let (source, _releases) = source_with_layout(|| RawLayout::bytes(ptr::null_mut(), 0));

        let view = acquire(&source, Contract::SIMPLE).unwrap();
        assert_eq!(view.address(), 0);
        assert!(view.is_empty());
    }

    #[test]
    fn negotiation_is_deterministic() {
        let layout = matrix_c();
        let first = negotiate(&layout, Contract::RECORDS).unwrap();
        let second = negotiate(&layout, Contract::RECORDS).unwrap();

        assert_eq!(first.strides(), second.strides());
        assert_eq!(first.shape(), second.shape());
        assert_eq!(first.format(), second.format());
        assert_eq!(first.address(), second.address());
        assert_eq!(first.len(), second.len());
        assert_eq!(first.len(), 3 * 4 * 8);
        assert_eq!(first.strides().unwrap()[0], 4 * 8);
    }
}
