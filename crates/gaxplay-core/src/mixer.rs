const SIGNED_MIN: f64 = -128.0;
const SIGNED_MAX: f64 = 127.0;
const UNSIGNED_BIAS: i16 = 128;

/// Sums channel buffers into one unsigned 8-bit frame.
///
/// Every output sample is `round(sum * gain)` (ties to even), clamped to the
/// signed 8-bit range and biased by 128. Buffers shorter than `out` only
/// contribute to the samples they cover.
pub fn mix<B: AsRef<[f64]>>(buffers: &[B], gain: f64, out: &mut [u8]) {
    for (index, sample) in out.iter_mut().enumerate() {
        let sum: f64 = buffers
            .iter()
            .filter_map(|buffer| buffer.as_ref().get(index))
            .sum();
        *sample = to_unsigned(sum * gain);
    }
}

fn to_unsigned(value: f64) -> u8 {
    let clamped = value.round_ties_even().clamp(SIGNED_MIN, SIGNED_MAX);
    // clamped into -128..=127, so the biased value fits a byte
    (clamped as i16 + UNSIGNED_BIAS) as u8
}
