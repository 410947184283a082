/// A plain-old-data item type that an [`NdArray`][crate::NdArray] can hold.
///
/// Each element type carries the struct-module format code reported in views negotiated with
/// [`Contract::FORMAT`][crate::Contract::FORMAT].
///
/// # Safety
///
/// Every bit pattern of `size_of::<Self>()` bytes must be a valid value of the type, and the type
/// must not contain padding.
pub unsafe trait Element: Copy + Default + Send + Sync + 'static {
    /// Struct-module format code of one item, e.g. `"d"` for `f64`.
    const FORMAT: &'static str;
}

macro_rules! impl_element {
    ($($t:ty => $format:literal),* $(,)?) => {
        $(
            // SAFETY: Primitive numbers have no padding and no invalid bit patterns.
            unsafe impl Element for $t {
                const FORMAT: &'static str = $format;
            }
        )*
    };
}

impl_element!(
    u8 => "B",
    i8 => "b",
    u16 => "H",
    i16 => "h",
    u32 => "I",
    i32 => "i",
    u64 => "Q",
    i64 => "q",
    usize => "N",
    isize => "n",
    f32 => "f",
    f64 => "d",
);
