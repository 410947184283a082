//! Scripted sources shared by the unit tests of the negotiator and the pointer.

use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{Export, ExportLease, MockBufferSource, RawLayout};

/// Counts how many times exports were released.
pub(crate) struct CountingLease(pub(crate) Arc<AtomicUsize>);

impl ExportLease for CountingLease {
    fn release(self: Box<Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// A base address that is never dereferenced.
pub(crate) fn fake_base() -> *mut u8 {
    ptr::without_provenance_mut(0x1000)
}

/// A mock source that exports `layout()` any number of times, returning the shared release
/// counter of all its exports.
pub(crate) fn source_with_layout(
    layout: impl Fn() -> RawLayout + Send + 'static,
) -> (MockBufferSource, Arc<AtomicUsize>) {
    let releases = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&releases);

    let mut source = MockBufferSource::new();
    source
        .expect_export()
        .returning(move |_| Ok(Export::new(layout(), CountingLease(Arc::clone(&counter)))));

    (source, releases)
}
