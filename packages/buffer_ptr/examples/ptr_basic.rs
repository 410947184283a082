//! Basic usage example for `buffer_ptr`.
//!
//! This example hands the address of a buffer and of a strided array to a stand-in for a foreign
//! function, and shows how the export bookkeeping reacts while the pointers are held.

use std::ptr::with_exposed_provenance;
use std::slice;

use buffer_ptr::{ByteBuffer, Contract, Error, NdArray, Order, make_ptr, nc_ptr, ptr};

/// Stands in for a C function `uint64_t sum_bytes(const uint8_t* data, size_t len)`.
fn sum_bytes(address: usize, len: usize) -> u64 {
    let data = with_exposed_provenance::<u8>(address);

    // SAFETY: The caller holds an acquired pointer to `len` readable bytes at `address`.
    let bytes = unsafe { slice::from_raw_parts(data, len) };
    bytes.iter().copied().map(u64::from).sum()
}

fn main() {
    let buffer = ByteBuffer::from((1..=100).collect::<Vec<u8>>());

    let pointer = ptr(&buffer).expect("a byte buffer is contiguous");
    println!("Acquired {pointer}");

    let len = pointer.view().expect("pointer is acquired").len();
    let sum = sum_bytes(pointer.address().expect("pointer is acquired"), len);
    println!("Sum of {len} bytes: {sum}");

    match buffer.resize(200) {
        Err(Error::BufferExported { outstanding }) => {
            println!("Resize refused while {outstanding} export(s) are outstanding");
        }
        other => println!("Unexpected resize outcome: {other:?}"),
    }

    drop(pointer);
    buffer.resize(200).expect("no exports are outstanding");
    println!("Resized to {} bytes after release", buffer.len());

    println!();

    // Every second row of a 10x10 matrix is not contiguous.
    let matrix = NdArray::<i32>::zeros(&[10, 10], Order::C);
    let rows = matrix.step(0, 2);

    if let Err(error) = ptr(&rows) {
        println!("ptr() refused the stepped rows: {error}");
    }

    let pointer = nc_ptr(&rows).expect("strided memory is allowed");
    let view = pointer.view().expect("pointer is acquired");
    println!(
        "nc_ptr() acquired shape {:?} with strides {:?}",
        view.shape(),
        view.strides()
    );

    // A writable export excludes all others until released.
    let mut writer = make_ptr(&matrix, Contract::STRIDED);
    match &writer {
        Err(error) => println!("Writable pointer refused while read: {error}"),
        Ok(writer) => println!("Unexpectedly acquired {writer}"),
    }

    drop(pointer);
    writer = make_ptr(&matrix, Contract::STRIDED);
    println!(
        "Writable pointer after release: {}",
        writer.expect("no other exports are outstanding")
    );
}
