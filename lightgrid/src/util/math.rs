//! Math utilites.

use num_traits::PrimInt;

/// Rounds up `src` to the power of two `factor`.
pub fn round_up_pot<T: PrimInt>(src: T, factor: T) -> T {
    debug_assert_eq!(factor.count_ones(), 1); // .is_power_of_two()
    let minus1 = factor - T::one();
    (src + minus1) & !minus1
}

/// Performs integer division between a and b rounding up, instead of down
pub fn round_up_div<T: PrimInt>(a: T, b: T) -> T {
    (a + (b - T::one())) / b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(round_up_div(0u32, 256), 0);
        assert_eq!(round_up_div(1u32, 256), 1);
        assert_eq!(round_up_div(256u32, 256), 1);
        assert_eq!(round_up_div(257u32, 256), 2);
        assert_eq!(round_up_pot(13u64, 4), 16);
        assert_eq!(round_up_pot(16u64, 4), 16);
    }
}
