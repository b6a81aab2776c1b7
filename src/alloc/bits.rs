//! Bit tricks used to build the size-class table and to do address arithmetic.
//!
//! All of these are `const fn` so the table can be computed at compile time.

/// Number of bits in a machine word.
pub const BITS: usize = usize::BITS as usize;

/// `1 << shift`.
#[inline]
pub const fn one_at_bit(shift: usize) -> usize {
    1 << shift
}

/// Rounds `value` up to a multiple of `align` (a power of two).
#[inline]
pub const fn align_up(value: usize, align: usize) -> usize {
    if align == 0 {
        value
    } else {
        (value + (align - 1)) & !(align - 1)
    }
}

/// Rounds `value` down to a multiple of `align` (a power of two).
#[inline]
pub const fn align_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}

/// Checks whether `value` is a multiple of `align` (a power of two).
#[inline]
pub const fn is_aligned(value: usize, align: usize) -> bool {
    value & (align - 1) == 0
}

/// Decodes a size class index into a size.
///
/// The index is read as `exponent:mantissa`, with `MANTISSA_BITS` of mantissa.
/// Inside each power-of-two octave there are `1 << MANTISSA_BITS` evenly
/// spaced sizes; everything is scaled by `1 << LOW_BITS`.
///
/// With `MANTISSA_BITS = 2, LOW_BITS = 4` this gives
/// 16, 32, 48, 64, 80, 96, 112, 128, 160, 192, ...
pub const fn from_exp_mant<const MANTISSA_BITS: usize, const LOW_BITS: usize>(m_e: usize) -> usize {
    if MANTISSA_BITS > 0 {
        let m_e = m_e + 1;
        let mantissa_mask = one_at_bit(MANTISSA_BITS) - 1;
        let m = m_e & mantissa_mask;
        let e = m_e >> MANTISSA_BITS;
        let b = if e == 0 { 0 } else { 1 };
        let shifted_e = e - b;
        let extended_m = m + (b << MANTISSA_BITS);
        return extended_m << (shifted_e + LOW_BITS);
    }
    one_at_bit(m_e + LOW_BITS)
}

/// Inverse of [`from_exp_mant`], rounding up.
///
/// Returns the smallest index whose decoded size is at least `value`.
/// `value` must be non-zero.
pub const fn to_exp_mant_const<const MANTISSA_BITS: usize, const LOW_BITS: usize>(
    value: usize,
) -> usize {
    let leading_bit = one_at_bit(MANTISSA_BITS + LOW_BITS) >> 1;
    let mantissa_mask = one_at_bit(MANTISSA_BITS) - 1;

    let value = value - 1;

    let e = BITS - MANTISSA_BITS - LOW_BITS - (value | leading_bit).leading_zeros() as usize;
    let b = if e == 0 { 0 } else { 1 };
    let m = (value >> (LOW_BITS + e - b)) & mantissa_mask;

    (e << MANTISSA_BITS) + m
}
