use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use derive_more::Display;

use crate::{Error, Result};

const BIT_WRITABLE: u32 = 0x0001;
const BIT_FORMAT: u32 = 0x0004;
const BIT_ND: u32 = 0x0008;
const BIT_STRIDES: u32 = 0x0010;
const BIT_C: u32 = 0x0020;
const BIT_F: u32 = 0x0040;
const BIT_ANY: u32 = 0x0080;
const BIT_SUBOFFSETS: u32 = 0x0100;

const KNOWN_BITS: u32 = BIT_WRITABLE
    | BIT_FORMAT
    | BIT_ND
    | BIT_STRIDES
    | BIT_C
    | BIT_F
    | BIT_ANY
    | BIT_SUBOFFSETS;

const CONTIGUITY_BITS: u32 = BIT_C | BIT_F | BIT_ANY;

/// The access/layout contract a caller declares when requesting a memory view.
///
/// A contract is a bit-set over orthogonal axes:
///
/// * mutability - read-only or read-write ([`Contract::is_writable()`]);
/// * contiguity - none required, C order, Fortran order or either ([`Contiguity`]);
/// * shape metadata - none, extents, extents + strides or extents + strides + suboffsets
///   ([`ShapeMetadata`]);
/// * whether the item format code is wanted ([`Contract::wants_format()`]).
///
/// The numeric values of the named constants are stable across versions because foreign code and
/// cached artifacts may reference them. Use [`Contract::from_bits()`] to accept a raw value from
/// such a caller and [`Contract::builder()`] to compose one from the axes.
///
/// A contract obtained via `from_bits()` may be internally inconsistent. Inconsistency is detected
/// when the contract is used for negotiation, at which point [`Error::InvalidContract`] is
/// signaled.
///
/// # Examples
///
/// ```
/// use buffer_ptr::{Contiguity, Contract, ShapeMetadata};
///
/// let contract = Contract::builder()
///     .writable()
///     .contiguity(Contiguity::C)
///     .build();
///
/// assert!(contract.is_writable());
/// assert_eq!(contract.shape_metadata(), ShapeMetadata::Strides);
/// assert_eq!(contract.bits(), Contract::C_CONTIGUOUS.bits() | Contract::WRITABLE.bits());
/// ```
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
pub struct Contract(u32);

impl Contract {
    /// Read-only, no shape metadata, implicitly C-contiguous.
    pub const SIMPLE: Self = Self(0);

    /// Read-write access. Combine with other contracts via `|`.
    pub const WRITABLE: Self = Self(BIT_WRITABLE);

    /// Requests the item format code. Combine with other contracts via `|`.
    pub const FORMAT: Self = Self(BIT_FORMAT);

    /// Extents of each dimension, implicitly C-contiguous.
    pub const ND: Self = Self(BIT_ND);

    /// Extents and strides of each dimension.
    pub const STRIDES: Self = Self(BIT_STRIDES | BIT_ND);

    /// Strides, with the memory required to be C-contiguous.
    pub const C_CONTIGUOUS: Self = Self(BIT_C | BIT_STRIDES | BIT_ND);

    /// Strides, with the memory required to be Fortran-contiguous.
    pub const F_CONTIGUOUS: Self = Self(BIT_F | BIT_STRIDES | BIT_ND);

    /// Strides, with the memory required to be contiguous in either order.
    pub const ANY_CONTIGUOUS: Self = Self(BIT_ANY | BIT_STRIDES | BIT_ND);

    /// Strides and suboffsets (indirect addressing).
    pub const INDIRECT: Self = Self(BIT_SUBOFFSETS | BIT_STRIDES | BIT_ND);

    /// Read-write, extents only.
    pub const CONTIG: Self = Self(BIT_ND | BIT_WRITABLE);

    /// Read-only, extents only.
    pub const CONTIG_RO: Self = Self(BIT_ND);

    /// Read-write, extents and strides.
    pub const STRIDED: Self = Self(BIT_STRIDES | BIT_ND | BIT_WRITABLE);

    /// Read-only, extents and strides.
    pub const STRIDED_RO: Self = Self(BIT_STRIDES | BIT_ND);

    /// Read-write, extents, strides and format.
    pub const RECORDS: Self = Self(BIT_STRIDES | BIT_ND | BIT_WRITABLE | BIT_FORMAT);

    /// Read-only, extents, strides and format.
    pub const RECORDS_RO: Self = Self(BIT_STRIDES | BIT_ND | BIT_FORMAT);

    /// Read-write, extents, strides, suboffsets and format.
    pub const FULL: Self =
        Self(BIT_SUBOFFSETS | BIT_STRIDES | BIT_ND | BIT_WRITABLE | BIT_FORMAT);

    /// Read-only, extents, strides, suboffsets and format.
    pub const FULL_RO: Self = Self(BIT_SUBOFFSETS | BIT_STRIDES | BIT_ND | BIT_FORMAT);

    /// Creates a contract from its stable numeric representation.
    ///
    /// No validation is performed here; an inconsistent value is rejected when used.
    #[must_use]
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// The stable numeric representation of the contract.
    #[must_use]
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Starts composing a contract from its orthogonal axes.
    #[inline]
    pub fn builder() -> ContractBuilder {
        ContractBuilder::new()
    }

    /// Whether the caller intends to write through the exposed address.
    #[must_use]
    #[inline]
    pub const fn is_writable(self) -> bool {
        self.0 & BIT_WRITABLE != 0
    }

    /// Whether the caller wants the item format code.
    #[must_use]
    #[inline]
    pub const fn wants_format(self) -> bool {
        self.0 & BIT_FORMAT != 0
    }

    /// The contiguity guarantee the caller requires.
    ///
    /// Contracts without strides are implicitly C-contiguous but report [`Contiguity::None`]
    /// here because no explicit guarantee was requested; see
    /// [`Contract::requires_c_layout()`].
    #[must_use]
    pub const fn contiguity(self) -> Contiguity {
        if self.0 & BIT_C != 0 {
            Contiguity::C
        } else if self.0 & BIT_F != 0 {
            Contiguity::Fortran
        } else if self.0 & BIT_ANY != 0 {
            Contiguity::Any
        } else {
            Contiguity::None
        }
    }

    /// The shape metadata the caller wants in the view.
    #[must_use]
    pub const fn shape_metadata(self) -> ShapeMetadata {
        if self.0 & BIT_SUBOFFSETS != 0 {
            ShapeMetadata::Indirect
        } else if self.0 & BIT_STRIDES != 0 {
            ShapeMetadata::Strides
        } else if self.0 & BIT_ND != 0 {
            ShapeMetadata::Extents
        } else {
            ShapeMetadata::None
        }
    }

    /// Whether the caller will assume canonical C-order strides, either because it asked for C
    /// contiguity or because it did not ask for strides at all.
    #[must_use]
    #[inline]
    pub const fn requires_c_layout(self) -> bool {
        self.0 & BIT_STRIDES == 0 || self.0 & BIT_C != 0
    }

    /// Checks that the contract is internally consistent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContract`] if unknown bits are set, if strides are requested
    /// without extents, if suboffsets or a contiguity guarantee are requested without strides or
    /// if more than one contiguity guarantee is requested.
    pub fn validate(self) -> Result<()> {
        let problem = if self.0 & !KNOWN_BITS != 0 {
            Some("unknown flag bits are set")
        } else if self.0 & BIT_STRIDES != 0 && self.0 & BIT_ND == 0 {
            Some("strides requested without extents")
        } else if self.0 & BIT_SUBOFFSETS != 0 && self.0 & BIT_STRIDES == 0 {
            Some("suboffsets requested without strides")
        } else if self.0 & CONTIGUITY_BITS != 0 && self.0 & BIT_STRIDES == 0 {
            Some("contiguity requested without strides")
        } else if (self.0 & CONTIGUITY_BITS).count_ones() > 1 {
            Some("more than one contiguity order requested")
        } else {
            None
        };

        match problem {
            Some(problem) => Err(Error::InvalidContract {
                contract: self,
                problem,
            }),
            None => Ok(()),
        }
    }
}

impl BitOr for Contract {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Contract {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl From<Contract> for u32 {
    #[inline]
    fn from(value: Contract) -> Self {
        value.0
    }
}

impl fmt::Debug for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contract")
            .field("bits", &format_args!("{:#05x}", self.0))
            .field("writable", &self.is_writable())
            .field("contiguity", &self.contiguity())
            .field("shape_metadata", &self.shape_metadata())
            .field("format", &self.wants_format())
            .finish()
    }
}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#05x} ({}, contiguity: {}, shape: {})",
            self.0,
            if self.is_writable() { "read-write" } else { "read-only" },
            self.contiguity(),
            self.shape_metadata()
        )
    }
}

/// The contiguity axis of a [`Contract`].
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum Contiguity {
    /// No explicit contiguity guarantee.
    #[display("none")]
    None,

    /// Row-major: the last dimension varies fastest.
    #[display("C")]
    C,

    /// Column-major: the first dimension varies fastest.
    #[display("Fortran")]
    Fortran,

    /// Either C or Fortran order.
    #[display("any")]
    Any,
}

/// The shape-metadata axis of a [`Contract`]. Each level includes the ones before it.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum ShapeMetadata {
    /// No shape metadata; the view is a flat run of bytes.
    #[display("none")]
    None,

    /// Number of dimensions and the extent of each.
    #[display("extents")]
    Extents,

    /// Extents plus the byte stride of each dimension.
    #[display("strides")]
    Strides,

    /// Extents, strides and suboffsets for indirect addressing.
    #[display("indirect")]
    Indirect,
}

/// Composes a [`Contract`] from its orthogonal axes.
///
/// Every contract produced by the builder is internally consistent: requesting a contiguity
/// guarantee raises the shape metadata to at least [`ShapeMetadata::Strides`].
///
/// # Examples
///
/// ```
/// use buffer_ptr::{Contract, ShapeMetadata};
///
/// let contract = Contract::builder()
///     .shape_metadata(ShapeMetadata::Strides)
///     .format()
///     .build();
///
/// assert_eq!(contract, Contract::RECORDS_RO);
/// ```
#[derive(Debug)]
#[must_use]
pub struct ContractBuilder {
    writable: bool,
    format: bool,
    contiguity: Contiguity,
    shape_metadata: ShapeMetadata,
}

impl ContractBuilder {
    fn new() -> Self {
        Self {
            writable: false,
            format: false,
            contiguity: Contiguity::None,
            shape_metadata: ShapeMetadata::None,
        }
    }

    /// Requests read-write access.
    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    /// Requests the item format code.
    pub fn format(mut self) -> Self {
        self.format = true;
        self
    }

    /// Sets the required contiguity.
    pub fn contiguity(mut self, contiguity: Contiguity) -> Self {
        self.contiguity = contiguity;
        self
    }

    /// Sets the shape metadata to request.
    pub fn shape_metadata(mut self, shape_metadata: ShapeMetadata) -> Self {
        self.shape_metadata = shape_metadata;
        self
    }

    /// Builds the contract.
    #[must_use]
    pub fn build(self) -> Contract {
        let shape_metadata = if self.contiguity == Contiguity::None {
            self.shape_metadata
        } else {
            self.shape_metadata.max(ShapeMetadata::Strides)
        };

        let mut bits = match shape_metadata {
            ShapeMetadata::None => 0,
            ShapeMetadata::Extents => BIT_ND,
            ShapeMetadata::Strides => BIT_STRIDES | BIT_ND,
            ShapeMetadata::Indirect => BIT_SUBOFFSETS | BIT_STRIDES | BIT_ND,
        };

        bits |= match self.contiguity {
            Contiguity::None => 0,
            Contiguity::C => BIT_C,
            Contiguity::Fortran => BIT_F,
            Contiguity::Any => BIT_ANY,
        };

        if self.writable {
            bits |= BIT_WRITABLE;
        }

        if self.format {
            bits |= BIT_FORMAT;
        }

        Contract(bits)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Contract: Send, Sync, Copy, Debug);
    assert_impl_all!(ContractBuilder: Send, Sync, Debug);

    #[test]
    fn named_constants_have_stable_values() {
        assert_eq!(Contract::SIMPLE.bits(), 0x000);
        assert_eq!(Contract::WRITABLE.bits(), 0x001);
        assert_eq!(Contract::FORMAT.bits(), 0x004);
        assert_eq!(Contract::ND.bits(), 0x008);
        assert_eq!(Contract::STRIDES.bits(), 0x018);
        assert_eq!(Contract::C_CONTIGUOUS.bits(), 0x038);
        assert_eq!(Contract::F_CONTIGUOUS.bits(), 0x058);
        assert_eq!(Contract::ANY_CONTIGUOUS.bits(), 0x098);
        assert_eq!(Contract::INDIRECT.bits(), 0x118);
        assert_eq!(Contract::CONTIG.bits(), 0x009);
        assert_eq!(Contract::CONTIG_RO.bits(), 0x008);
        assert_eq!(Contract::STRIDED.bits(), 0x019);
        assert_eq!(Contract::STRIDED_RO.bits(), 0x018);
        assert_eq!(Contract::RECORDS.bits(), 0x01d);
        assert_eq!(Contract::RECORDS_RO.bits(), 0x01c);
        assert_eq!(Contract::FULL.bits(), 0x11d);
        assert_eq!(Contract::FULL_RO.bits(), 0x11c);
    }

    #[test]
    fn every_named_constant_is_consistent() {
        for contract in [
            Contract::SIMPLE,
            Contract::WRITABLE,
            Contract::FORMAT,
            Contract::ND,
            Contract::STRIDES,
            Contract::C_CONTIGUOUS,
            Contract::F_CONTIGUOUS,
            Contract::ANY_CONTIGUOUS,
            Contract::INDIRECT,
            Contract::CONTIG,
            Contract::CONTIG_RO,
            Contract::STRIDED,
            Contract::STRIDED_RO,
            Contract::RECORDS,
            Contract::RECORDS_RO,
            Contract::FULL,
            Contract::FULL_RO,
        ] {
            contract.validate().unwrap();
        }
    }

    #[test]
    fn axes_are_decoded() {
        let full = Contract::FULL;
        assert!(full.is_writable());
        assert!(full.wants_format());
        assert_eq!(full.shape_metadata(), ShapeMetadata::Indirect);
        assert_eq!(full.contiguity(), Contiguity::None);
        assert!(!full.requires_c_layout());

        let simple = Contract::SIMPLE;
        assert!(!simple.is_writable());
        assert_eq!(simple.shape_metadata(), ShapeMetadata::None);
        assert!(simple.requires_c_layout());

        assert_eq!(Contract::F_CONTIGUOUS.contiguity(), Contiguity::Fortran);
        assert_eq!(Contract::ANY_CONTIGUOUS.contiguity(), Contiguity::Any);
        assert!(Contract::C_CONTIGUOUS.requires_c_layout());
        assert!(Contract::ND.requires_c_layout());
    }

    #[test]
    fn suboffsets_without_strides_is_invalid() {
        let contract = Contract::from_bits(BIT_SUBOFFSETS);
        assert!(matches!(
            contract.validate(),
            Err(Error::InvalidContract { .. })
        ));

        let contract = Contract::from_bits(BIT_SUBOFFSETS | BIT_ND | BIT_WRITABLE);
        assert!(matches!(
            contract.validate(),
            Err(Error::InvalidContract { .. })
        ));
    }

    #[test]
    fn other_inconsistencies_are_invalid() {
        for bits in [
            0x200,
            BIT_STRIDES,
            BIT_C | BIT_ND,
            BIT_C | BIT_F | BIT_STRIDES | BIT_ND,
        ] {
            let contract = Contract::from_bits(bits);
            assert!(
                matches!(contract.validate(), Err(Error::InvalidContract { .. })),
                "{bits:#x} should be invalid"
            );
        }
    }

    #[test]
    fn builder_matches_named_constants() {
        assert_eq!(Contract::builder().build(), Contract::SIMPLE);
        assert_eq!(
            Contract::builder()
                .shape_metadata(ShapeMetadata::Extents)
                .writable()
                .build(),
            Contract::CONTIG
        );
        assert_eq!(
            Contract::builder().contiguity(Contiguity::Fortran).build(),
            Contract::F_CONTIGUOUS
        );
        assert_eq!(
            Contract::builder()
                .shape_metadata(ShapeMetadata::Indirect)
                .writable()
                .format()
                .build(),
            Contract::FULL
        );
    }

    #[test]
    fn builder_raises_shape_metadata_for_contiguity() {
        let contract = Contract::builder()
            .shape_metadata(ShapeMetadata::Extents)
            .contiguity(Contiguity::Any)
            .build();

        assert_eq!(contract, Contract::ANY_CONTIGUOUS);
        contract.validate().unwrap();
    }

    #[test]
    fn bitor_combines() {
        let mut contract = Contract::C_CONTIGUOUS | Contract::WRITABLE;
        assert!(contract.is_writable());
        assert_eq!(contract.contiguity(), Contiguity::C);

        contract |= Contract::FORMAT;
        assert!(contract.wants_format());
        assert_eq!(u32::from(contract), 0x03d);
    }

    #[test]
    fn display_names_axes() {
        let text = Contract::STRIDED.to_string();
        assert!(text.contains("0x019"));
        assert!(text.contains("read-write"));
        assert!(text.contains("strides"));
    }
}
