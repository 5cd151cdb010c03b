// Default sample rate (Hz) of the capture path. Phones reliably support
// 22.05 kHz, which puts the whole band of interest below Nyquist.
pub const DEFAULT_SAMPLE_RATE: f32 = 22_050.0;

// Samples per analysis frame unless the configuration says otherwise.
pub const DEFAULT_FRAME_SIZE: usize = 1024;

#[inline(always)]
pub fn normalize_sample(sample: i16) -> f32 {
    sample as f32 / i16::MAX as f32
}

#[inline(always)]
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

#[inline]
pub fn apply_window(buffer: &mut [f32], window: &[f32]) {
    debug_assert_eq!(buffer.len(), window.len());
    for (sample, coeff) in buffer.iter_mut().zip(window.iter()) {
        *sample *= *coeff;
    }
}

/// Copies `dst.len()` samples out of a rotating capture buffer whose logical
/// start is `rotation`, decimating by `src.len() / dst.len()`.
///
/// Returns `false` (leaving `dst` untouched) when the source is too short to
/// fill the destination or the rotation lies outside it.
pub fn decimate_rotating(dst: &mut [f32], src: &[i16], rotation: usize) -> bool {
    if dst.is_empty() || src.len() < dst.len() || rotation >= src.len() {
        return false;
    }

    let skip = src.len() / dst.len();
    let len = src.len();
    for (y, sample) in dst.iter_mut().enumerate() {
        *sample = normalize_sample(src[(rotation + y * skip) % len]);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimation_honours_rotation() {
        let src: Vec<i16> = (0..8).map(|v| v * 1000).collect();
        let mut dst = [0.0f32; 4];
        assert!(decimate_rotating(&mut dst, &src, 3));
        let expected: Vec<f32> = [3000, 5000, 7000, 1000]
            .iter()
            .map(|&v| normalize_sample(v))
            .collect();
        assert_eq!(dst.to_vec(), expected);
    }

    #[test]
    fn decimation_rejects_short_input() {
        let src = [1i16; 3];
        let mut dst = [0.5f32; 4];
        assert!(!decimate_rotating(&mut dst, &src, 0));
        assert!(dst.iter().all(|&v| v == 0.5));
        assert!(!decimate_rotating(&mut dst, &[0i16; 8], 8));
    }

    #[test]
    fn lerp_interpolates_linearly() {
        assert_eq!(lerp(100.0, 200.0, 0.25), 125.0);
        assert_eq!(lerp(100.0, 200.0, 0.0), 100.0);
    }
}
