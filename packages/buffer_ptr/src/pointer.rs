use std::fmt;

use crate::{Contract, Error, ExportedView, HostValue, MemoryView, Result, acquire};

/// A raw pointer to exported memory, for passing to foreign functions.
///
/// A `Pointer` exclusively owns one negotiated view of a source's memory. While the pointer is
/// acquired, the source keeps that memory valid, unmoved and of the declared shape, and
/// [`address()`](Pointer::address) returns the base address in the pointer-width unsigned
/// integer form foreign calls expect. The address is captured once at acquisition and never
/// changes, even if it is zero.
///
/// Releasing the pointer hands the view back to the source. This happens either explicitly via
/// [`release()`](Pointer::release) or when the pointer is dropped - whichever comes first.
/// Releasing twice is a no-op. Asking for the address of a released pointer signals
/// [`Error::UseAfterRelease`] instead of handing out an address that may no longer be valid.
///
/// Pointers are created via [`make_ptr()`], [`ptr()`] or [`nc_ptr()`].
///
/// It is the caller's responsibility to keep the pointer acquired for the entire duration of any
/// foreign call that uses its address.
///
/// # Examples
///
/// ```
/// use buffer_ptr::{ByteBuffer, Error, ptr};
///
/// let buffer = ByteBuffer::from(vec![1_u8; 16]);
///
/// let mut pointer = ptr(&buffer).unwrap();
/// let address = pointer.address().unwrap();
/// assert_ne!(address, 0);
///
/// // The buffer cannot be resized while the pointer is acquired.
/// assert!(buffer.resize(32).is_err());
///
/// pointer.release();
/// assert!(matches!(pointer.address(), Err(Error::UseAfterRelease)));
/// buffer.resize(32).unwrap();
/// ```
pub struct Pointer {
    address: usize,

    /// `None` once released.
    view: Option<ExportedView>,
}

impl Pointer {
    fn new(view: ExportedView) -> Self {
        Self {
            address: view.address(),
            view: Some(view),
        }
    }

    /// The base address of the exported memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UseAfterRelease`] if the pointer has been released.
    #[inline]
    pub fn address(&self) -> Result<usize> {
        self.view()?;
        Ok(self.address)
    }

    /// The negotiated view of the exported memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UseAfterRelease`] if the pointer has been released.
    #[inline]
    pub fn view(&self) -> Result<&MemoryView> {
        self.view.as_deref().ok_or(Error::UseAfterRelease)
    }

    /// The base address as a typed raw pointer for reading.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UseAfterRelease`] if the pointer has been released.
    pub fn as_ptr<T>(&self) -> Result<*const T> {
        Ok(self.view()?.base_ptr().cast_const().cast::<T>())
    }

    /// The base address as a typed raw pointer for writing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UseAfterRelease`] if the pointer has been released and
    /// [`Error::ReadOnly`] if the view does not permit writing.
    pub fn as_mut_ptr<T>(&self) -> Result<*mut T> {
        let view = self.view()?;

        if view.is_read_only() {
            return Err(Error::ReadOnly);
        }

        Ok(view.base_ptr().cast::<T>())
    }

    /// Releases the view back to its source.
    ///
    /// Once this returns, the source may move or resize its memory again (if no other views of
    /// it are outstanding). Calling this on a released pointer does nothing.
    pub fn release(&mut self) {
        if let Some(view) = self.view.take() {
            view.release();
        }
    }

    /// Whether the view has been released.
    #[must_use]
    #[inline]
    pub fn is_released(&self) -> bool {
        self.view.is_none()
    }
}

impl Drop for Pointer {
    fn drop(&mut self) {
        self.release();
    }
}

impl TryFrom<&Pointer> for usize {
    type Error = Error;

    fn try_from(value: &Pointer) -> Result<Self> {
        value.address()
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_released() {
            write!(f, "<Void Pointer {} (released)>", self.address)
        } else {
            write!(f, "<Void Pointer {}>", self.address)
        }
    }
}

impl fmt::Debug for Pointer {
    #[cfg_attr(test, mutants::skip)] // No API contract.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pointer")
            .field("address", &format_args!("{:#x}", self.address))
            .field("view", &self.view.as_deref())
            .finish()
    }
}

/// Creates a pointer to the memory of `value` under `contract`.
///
/// This is the general entry point; [`ptr()`] and [`nc_ptr()`] cover the common cases.
///
/// # Errors
///
/// Construction is atomic: on error no pointer exists and no export is left outstanding.
/// See [`acquire()`] for the possible errors.
///
/// # Examples
///
/// ```
/// use buffer_ptr::{Contract, NdArray, Order, make_ptr};
///
/// let array = NdArray::<f64>::zeros(&[3, 4], Order::C);
/// let pointer = make_ptr(&array, Contract::STRIDED).unwrap();
///
/// let view = pointer.view().unwrap();
/// assert_eq!(view.shape(), Some([3, 4].as_slice()));
/// assert_eq!(view.strides(), Some([32, 8].as_slice()));
/// ```
pub fn make_ptr(value: &dyn HostValue, contract: Contract) -> Result<Pointer> {
    acquire(value, contract).map(Pointer::new)
}

/// Creates a read-only pointer to C-contiguous memory.
///
/// Non-contiguous memory is refused rather than copied because the pointer must address the
/// real backing memory. Either make a contiguous copy of the data first or, if the foreign
/// function explicitly supports strided memory, use [`nc_ptr()`].
///
/// # Errors
///
/// Returns [`Error::IncompatibleLayout`] for non-contiguous memory. See [`acquire()`] for other
/// possible errors.
///
/// # Examples
///
/// ```
/// use buffer_ptr::{ByteBuffer, ptr};
///
/// let buffer = ByteBuffer::from(b"buffer".as_slice());
/// let pointer = ptr(&buffer).unwrap();
///
/// assert_eq!(pointer.view().unwrap().len(), 6);
/// ```
pub fn ptr(value: &dyn HostValue) -> Result<Pointer> {
    make_ptr(value, Contract::SIMPLE).map_err(|error| match error {
        Error::IncompatibleLayout { contract, problem } => Error::IncompatibleLayout {
            contract,
            problem: format!(
                "{problem}; `ptr()` requires contiguous memory - pass a contiguous copy \
                 or use `nc_ptr()` if the foreign function supports strided memory"
            ),
        },
        other => other,
    })
}

/// Creates a read-only pointer to possibly non-contiguous memory.
///
/// The view carries the shape and strides needed to walk the memory. Use with care: a foreign
/// function that assumes contiguous memory will read garbage or fault if given strided memory.
///
/// # Errors
///
/// See [`acquire()`].
///
/// # Examples
///
/// ```
/// use buffer_ptr::{NdArray, Order, nc_ptr};
///
/// let array = NdArray::<i32>::zeros(&[10, 10], Order::C);
/// let every_second_row = array.step(0, 2);
///
/// let pointer = nc_ptr(&every_second_row).unwrap();
/// let view = pointer.view().unwrap();
/// assert_eq!(view.strides(), Some([80, 4].as_slice()));
/// ```
pub fn nc_ptr(value: &dyn HostValue) -> Result<Pointer> {
    make_ptr(value, Contract::STRIDED_RO)
}
