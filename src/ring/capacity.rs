//! Pembulatan kapasitas ke power of 2
//!
//! Dengan kapasitas power of 2, wrap-around index cukup pakai `index & mask`.

/// Power of 2 terbesar yang muat di `usize`.
const MAX_POWER_OF_TWO: usize = 1 << (usize::BITS - 1);

/// Power of 2 terkecil yang `>= requested`, minimal 1.
///
/// `0` dinormalisasi ke `1` (bukan wrap-around ke `usize::MAX`).
/// Request di atas power of 2 terbesar milik `usize` di-saturate ke nilai itu.
#[inline]
pub const fn next_power_of_two(requested: usize) -> usize {
    if requested <= 1 {
        return 1;
    }
    if requested > MAX_POWER_OF_TWO {
        return MAX_POWER_OF_TWO;
    }
    requested.next_power_of_two()
}
