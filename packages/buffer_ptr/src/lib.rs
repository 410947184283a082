//! Hands the base address of a value's memory to foreign code, and keeps that memory exported
//! for exactly as long as the address is in use.
//!
//! A value that can expose its memory implements [`BufferSource`]. Exporting that memory is
//! negotiated through a [`Contract`], a set of flags describing the layout the caller is able to
//! handle and the metadata it wants back. The negotiated [`MemoryView`] describes the memory: its
//! base address, length, item size and (on request) format, shape, strides and suboffsets.
//!
//! A [`Pointer`] wraps a negotiated view and exposes its base address as a plain integer. The
//! export is released exactly once: explicitly via [`Pointer::release()`] or implicitly when the
//! pointer is dropped. After release the address is no longer available.
//!
//! # Key Features
//!
//! - **Contract validation**: inconsistent flag combinations are rejected before anything is
//!   exported
//! - **Layout negotiation**: non-contiguous memory is only handed out to callers that accept
//!   strides
//! - **Deterministic release**: every successful export is released exactly once, including on
//!   every failure path of the negotiation
//! - **Export bookkeeping**: the built-in [`ByteBuffer`] and [`NdArray`] refuse to resize or
//!   hand out conflicting writable views while exported
//!
//! # Entry points
//!
//! - [`ptr()`] - read-only, C-contiguous memory. The common case for passing a buffer to C.
//! - [`nc_ptr()`] - read-only memory of any strided layout, with shape and strides reported.
//! - [`make_ptr()`] - any [`Contract`].
//! - [`acquire()`] - the negotiated view without the pointer wrapper.
//!
//! # Examples
//!
//! ```rust
//! use buffer_ptr::{ByteBuffer, Error, ptr};
//!
//! let buffer = ByteBuffer::from(vec![1_u8; 16]);
//!
//! let mut pointer = ptr(&buffer).unwrap();
//! let address = pointer.address().unwrap();
//! assert_ne!(address, 0);
//!
//! // The buffer cannot move while its address is handed out.
//! assert!(buffer.resize(32).is_err());
//!
//! pointer.release();
//! assert!(matches!(pointer.address(), Err(Error::UseAfterRelease)));
//! buffer.resize(32).unwrap();
//! ```
//!
//! Values without an exportable memory region are refused:
//!
//! ```rust
//! use buffer_ptr::{Error, ptr};
//!
//! let result = ptr(&"not a buffer");
//! assert!(matches!(result, Err(Error::UnsupportedSource { .. })));
//! ```

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod byte_buffer;
mod contract;
mod element;
mod error;
mod layout;
mod nd_array;
mod negotiate;
mod pointer;
mod source;
mod storage;
#[cfg(test)]
mod test_utils;
mod view;

pub use byte_buffer::*;
pub use contract::*;
pub use element::*;
pub use error::*;
pub use layout::{
    Shape, Strides, c_strides, checked_c_strides, checked_f_strides, f_strides, is_c_contiguous,
    is_f_contiguous,
};
pub use nd_array::*;
pub use negotiate::*;
pub use pointer::*;
pub use source::*;
pub(crate) use storage::*;
pub use view::*;
