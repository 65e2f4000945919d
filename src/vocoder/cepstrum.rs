use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::Fft;

/// Magnitude floor so silent bins keep a finite log.
const MAGNITUDE_FLOOR: f64 = 1e-10;

/// Periodic Hann window.
pub(crate) fn hann(len: usize) -> Vec<f64> {
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / len as f64).cos())
        .collect()
}

/// Windowed frame centred on `center`, zero outside the signal.
pub(crate) fn windowed_frame(samples: &[f32], center: usize, window: &[f64]) -> Vec<Complex<f64>> {
    let half = window.len() / 2;
    window
        .iter()
        .enumerate()
        .map(|(i, &w)| {
            let v = (center + i)
                .checked_sub(half)
                .and_then(|idx| samples.get(idx))
                .map_or(0.0, |&s| s as f64);
            Complex::new(v * w, 0.0)
        })
        .collect()
}

/// First `order` real-cepstrum coefficients of an already transformed frame.
pub(crate) fn real_cepstrum(
    spectrum: &[Complex<f64>],
    order: usize,
    inverse: &Arc<dyn Fft<f64>>,
) -> Vec<f64> {
    let n = spectrum.len();
    let mut buf: Vec<Complex<f64>> = spectrum
        .iter()
        .map(|x| Complex::new(x.norm().max(MAGNITUDE_FLOOR).ln(), 0.0))
        .collect();
    inverse.process(&mut buf);
    buf.iter().take(order).map(|c| c.re / n as f64).collect()
}

/// Log-magnitude envelope per FFT bin from low-quefrency cepstrum.
pub(crate) fn log_envelope(
    cepstrum: &[f64],
    fft_len: usize,
    forward: &Arc<dyn Fft<f64>>,
) -> Vec<f64> {
    let mut buf = vec![Complex::new(0.0, 0.0); fft_len];
    for (q, &c) in cepstrum.iter().enumerate().take(fft_len / 2 + 1) {
        buf[q].re = c;
        if q > 0 {
            buf[fft_len - q].re = c;
        }
    }
    forward.process(&mut buf);
    buf.iter().map(|x| x.re).collect()
}
