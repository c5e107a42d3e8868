/// Pedestal-corrected channel data
#[derive(Debug, Clone, PartialEq)]
pub struct PedestalCorrected {
    pub pedestal: f32,
    /// Raw samples, tail-padded with the pedestal
    pub raw: Vec<f32>,
    /// `raw - pedestal + target`, tail-padded with the target
    pub corrected: Vec<f32>,
}

/// Mean of the first `window` samples, clamped to the available length.
///
/// A window of zero is treated as one sample. Accumulates in f64 as the digitizer values
/// sit around a few thousand counts.
pub fn compute_pedestal(raw: &[f32], window: usize) -> f32 {
    let n_ped = raw.len().min(window.max(1));
    if n_ped == 0 {
        return 0.0;
    }
    let sum: f64 = raw[..n_ped].iter().map(|v| *v as f64).sum();
    (sum / n_ped as f64) as f32
}

/// Shift one channel onto the common target level and extend it to `n_samples`.
///
/// The padded region of `raw` holds the channel's own pedestal, so the padded region of
/// `corrected` is exactly `target`.
pub fn correct_channel(raw: Vec<f32>, n_samples: usize, window: usize, target: f32) -> PedestalCorrected {
    let pedestal = compute_pedestal(&raw, window);
    let n_real = raw.len().min(n_samples);

    let mut corrected = Vec::with_capacity(n_samples);
    corrected.extend(raw[..n_real].iter().map(|v| v - pedestal + target));
    corrected.resize(n_samples, target);

    let mut raw = raw;
    raw.resize(n_samples, pedestal);

    PedestalCorrected {
        pedestal,
        raw,
        corrected,
    }
}
