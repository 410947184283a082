use std::any::type_name;
use std::fmt;

#[cfg(test)]
use mockall::automock;

use crate::{Contract, RawLayout, Result};

/// Any value a host program may hand to the negotiator.
///
/// Whether a value is bufferable is a runtime property of the value: the negotiator asks
/// [`buffer_source()`](HostValue::buffer_source) and signals
/// [`Error::UnsupportedSource`][crate::Error::UnsupportedSource] if the answer is `None`. Values
/// that can export memory return themselves as a [`BufferSource`]; all other values keep the
/// default implementation.
///
/// # Examples
///
/// ```
/// use buffer_ptr::{ByteBuffer, Error, HostValue, ptr};
///
/// let text = String::from("not bytes-like");
/// assert!(matches!(ptr(&text), Err(Error::UnsupportedSource { .. })));
///
/// let buffer = ByteBuffer::from(b"bytes-like".as_slice());
/// assert!(buffer.buffer_source().is_some());
/// ```
pub trait HostValue {
    /// The bufferable capability of the value, if it has one.
    fn buffer_source(&self) -> Option<&dyn BufferSource> {
        None
    }

    /// Name of the type of the value, for diagnostics.
    fn type_name(&self) -> &'static str {
        type_name::<Self>()
    }
}

macro_rules! impl_unbufferable {
    ($($t:ty),* $(,)?) => {
        $(impl HostValue for $t {})*
    };
}

impl_unbufferable!(
    String, &str, bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize,
    f32, f64,
);

/// The bufferable capability: exports views of the memory backing a value.
///
/// An implementation decides on its own export policy. The built-in sources allow any number of
/// concurrent read-only exports but make a writable export exclusive, and they refuse to move or
/// resize memory while any export is outstanding.
///
/// Implementations report the full native layout of their memory. Checking that layout against
/// the caller's [`Contract`] is done by the negotiator, which releases the export again if the
/// layout does not satisfy the contract. An implementation may still refuse up front, e.g. with
/// [`Error::ReadOnly`][crate::Error::ReadOnly] or
/// [`Error::ExportConflict`][crate::Error::ExportConflict].
#[cfg_attr(test, automock)]
pub trait BufferSource {
    /// Registers an export and describes the exported memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot or will not export its memory under `contract`.
    fn export(&self, contract: Contract) -> Result<Export>;
}

/// Undoes one export. Consumed on release, so each export can be released only once.
pub trait ExportLease: Send + Sync {
    /// Releases the export, allowing the source to move or resize its memory again once no other
    /// exports are outstanding.
    fn release(self: Box<Self>);
}

/// The result of a successful [`BufferSource::export()`]: the native layout of the exported
/// memory and the lease that releases the export.
pub struct Export {
    layout: RawLayout,
    lease: Box<dyn ExportLease>,
}

impl Export {
    /// Pairs a layout with the lease that keeps it valid.
    #[must_use]
    pub fn new(layout: RawLayout, lease: impl ExportLease + 'static) -> Self {
        Self {
            layout,
            lease: Box::new(lease),
        }
    }

    pub(crate) fn into_parts(self) -> (RawLayout, Box<dyn ExportLease>) {
        (self.layout, self.lease)
    }
}

impl fmt::Debug for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Export")
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
impl HostValue for MockBufferSource {
    fn buffer_source(&self) -> Option<&dyn BufferSource> {
        Some(self)
    }
}
