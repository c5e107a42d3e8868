use super::config::{AnalysisRegionConfig, ThresholdConfig};
use super::constants::*;
use super::waveform_math::{
    apply_baseline_and_polarity, baseline_and_noise, charge_fraction_times, crossing_backward,
    find_peak, integrate_charge, trailing_edge_forward, Crossing, IndexWindow,
};

/// Leading-edge discriminator result for one threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeadingEdge {
    pub time: f32,
    pub jitter: f32,
    /// Time over threshold, None if the pulse did not fall back below it in the charge window
    pub tot: Option<f32>,
}

/// Features of one channel in one event.
///
/// Threshold results are None when no crossing was found. The sentinel accessors produce the
/// legacy on-disk values (CFD 0, LE 20/-5/-5, charge fraction 10), which differ by method.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WaveformFeatures {
    pub baseline: f32,
    pub rms_noise: f32,
    pub noise_1point: f32,
    pub amp_min_before: f32,
    pub amp_max_before: f32,
    pub amp_max: f32,
    pub charge: f32,
    pub signal_over_noise: f32,
    pub peak_time: f32,
    pub rise_time: f32,
    pub slew_rate: f32,
    pub has_signal: bool,
    /// One per CFD percentage, in configuration order
    pub cfd: Vec<Option<Crossing>>,
    /// One per leading-edge level, in configuration order
    pub le: Vec<Option<LeadingEdge>>,
    /// One per charge percentage, in configuration order
    pub charge_times: Vec<Option<f32>>,
}

impl WaveformFeatures {
    /// Default features with every threshold slot empty, for channels that cannot be analyzed
    pub fn empty(thresholds: &ThresholdConfig) -> Self {
        Self {
            cfd: vec![None; thresholds.cfd_thresholds.len()],
            le: vec![None; thresholds.le_thresholds.len()],
            charge_times: vec![None; thresholds.charge_thresholds.len()],
            ..Default::default()
        }
    }

    pub fn time_cfd(&self) -> Vec<f32> {
        self.cfd
            .iter()
            .map(|c| c.map_or(CFD_TIME_SENTINEL, |c| c.time))
            .collect()
    }

    pub fn jitter_cfd(&self) -> Vec<f32> {
        self.cfd
            .iter()
            .map(|c| c.map_or(CFD_JITTER_SENTINEL, |c| c.jitter))
            .collect()
    }

    pub fn time_le(&self) -> Vec<f32> {
        self.le
            .iter()
            .map(|e| e.map_or(LE_TIME_SENTINEL, |e| e.time))
            .collect()
    }

    pub fn jitter_le(&self) -> Vec<f32> {
        self.le
            .iter()
            .map(|e| e.map_or(LE_JITTER_SENTINEL, |e| e.jitter))
            .collect()
    }

    pub fn tot_le(&self) -> Vec<f32> {
        self.le
            .iter()
            .map(|e| e.and_then(|e| e.tot).unwrap_or(LE_TOT_SENTINEL))
            .collect()
    }

    pub fn time_charge(&self) -> Vec<f32> {
        self.charge_times
            .iter()
            .map(|t| t.unwrap_or(CHARGE_TIME_SENTINEL))
            .collect()
    }
}

/// Extract the features of one pedestal-corrected waveform.
///
/// `amp` and `time` must have the same non-zero length, otherwise the empty feature set is
/// returned. The function has no state: the same inputs give bit-identical outputs.
pub fn analyze_waveform(
    amp: &[f32],
    time: &[f32],
    region: &AnalysisRegionConfig,
    thresholds: &ThresholdConfig,
) -> WaveformFeatures {
    let mut features = WaveformFeatures::empty(thresholds);
    let n_samples = amp.len();
    if n_samples == 0 || n_samples != time.len() {
        return features;
    }

    let dt = if n_samples > 1 {
        time[1] - time[0]
    } else {
        DEFAULT_SAMPLE_PERIOD_NS
    };

    let analysis_window = IndexWindow::analysis(time, &region.analysis);
    let baseline_window = IndexWindow::resolve(time, &region.baseline, &analysis_window);
    let signal_window = IndexWindow::resolve(time, &region.signal, &analysis_window);
    let charge_window = IndexWindow::resolve(time, &region.charge, &analysis_window);

    let stats = baseline_and_noise(amp, &baseline_window);
    features.baseline = stats.baseline;
    features.rms_noise = stats.rms_noise;
    features.noise_1point = stats.noise_1point;
    features.amp_min_before = stats.amp_min;
    features.amp_max_before = stats.amp_max;

    let amp_corr = apply_baseline_and_polarity(amp, stats.baseline, region.polarity);

    let peak = find_peak(&amp_corr, time, &signal_window);
    features.amp_max = peak.amplitude;
    features.peak_time = peak.time;

    if features.rms_noise > 0.0 {
        features.signal_over_noise = features.amp_max / features.rms_noise;
        features.has_signal = features.signal_over_noise >= thresholds.snr_threshold
            && features.amp_max >= region.cut_amp_max;
    }

    features.charge = integrate_charge(&amp_corr, &charge_window, dt, thresholds.impedance);
    features.charge_times = charge_fraction_times(
        &amp_corr,
        time,
        &charge_window,
        dt,
        thresholds.impedance,
        features.charge,
        &thresholds.charge_thresholds,
        &region.charge,
    );

    // Highest threshold first
    for (slot, pct) in thresholds.cfd_thresholds.iter().enumerate().rev() {
        let level = features.amp_max * (*pct as f32 / 100.0);
        features.cfd[slot] = crossing_backward(
            &amp_corr,
            time,
            peak.index,
            signal_window.start,
            level,
            features.rms_noise,
        );
    }

    for (slot, millivolts) in thresholds.le_thresholds.iter().enumerate().rev() {
        let level = millivolts / MILLIVOLTS_PER_VOLT;
        if features.amp_max <= level {
            continue;
        }
        features.le[slot] = crossing_backward(
            &amp_corr,
            time,
            peak.index,
            signal_window.start,
            level,
            features.rms_noise,
        )
        .map(|leading| LeadingEdge {
            time: leading.time,
            jitter: leading.jitter,
            tot: trailing_edge_forward(&amp_corr, time, peak.index, charge_window.end, level)
                .map(|trailing| trailing - leading.time),
        });
    }

    let amp_high = features.amp_max * thresholds.rise_time_high;
    let amp_low = features.amp_max * thresholds.rise_time_low;
    let time_at = |level: f32| {
        crossing_backward(
            &amp_corr,
            time,
            peak.index,
            signal_window.start,
            level,
            features.rms_noise,
        )
        .map_or(0.0, |c| c.time)
    };
    features.rise_time = time_at(amp_high) - time_at(amp_low);
    if features.rise_time > 0.0 {
        features.slew_rate = (amp_high - amp_low) / features.rise_time;
    }

    features
}

/// Feature extraction settings for every channel of a run
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    regions: Vec<AnalysisRegionConfig>,
    thresholds: ThresholdConfig,
}

impl FeatureExtractor {
    pub fn new(regions: Vec<AnalysisRegionConfig>, thresholds: ThresholdConfig) -> Self {
        Self {
            regions,
            thresholds,
        }
    }

    /// Channels without a region of their own use the default windows
    pub fn analyze_channel(&self, amp: &[f32], time: &[f32], channel: usize) -> WaveformFeatures {
        match self.regions.get(channel) {
            Some(region) => analyze_waveform(amp, time, region, &self.thresholds),
            None => analyze_waveform(amp, time, &AnalysisRegionConfig::default(), &self.thresholds),
        }
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.thresholds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeWindow;

    const BASELINE: f32 = 3500.0;

    fn time_axis(n: usize, t0: f32, dt: f32) -> Vec<f32> {
        (0..n).map(|i| t0 + i as f32 * dt).collect()
    }

    /// Gaussian pulse on a flat baseline, with a small deterministic noise pattern
    fn gaussian_waveform(time: &[f32], peak_time: f32, height: f32, noise: f32) -> Vec<f32> {
        let sigma = 2.0;
        time.iter()
            .enumerate()
            .map(|(i, t)| {
                let x = (t - peak_time) / sigma;
                let jitter = match i % 4 {
                    0 => noise,
                    1 => -noise,
                    2 => 0.5 * noise,
                    _ => -0.5 * noise,
                };
                BASELINE + height * (-0.5 * x * x).exp() + jitter
            })
            .collect()
    }

    fn region() -> AnalysisRegionConfig {
        AnalysisRegionConfig {
            analysis: TimeWindow::new(-100.0, 300.0),
            baseline: TimeWindow::new(-50.0, -10.0),
            signal: TimeWindow::new(0.0, 190.0),
            charge: TimeWindow::new(0.0, 190.0),
            polarity: 1,
            cut_amp_max: 1.0,
        }
    }

    #[test]
    fn test_gaussian_pulse_end_to_end() {
        // 0.2 ns steps covering the baseline window and the pulse
        let time = time_axis(1000, -60.0, 0.2);
        let amp = gaussian_waveform(&time, 50.0, 2000.0, 1.0);
        let thresholds = ThresholdConfig {
            snr_threshold: 5.0,
            ..Default::default()
        };
        let features = analyze_waveform(&amp, &time, &region(), &thresholds);

        assert!((features.baseline - BASELINE).abs() < 0.5);
        assert!((features.amp_max - 2000.0).abs() < 5.0);
        assert!((features.peak_time - 50.0).abs() < 0.5);
        assert!(features.has_signal);
        assert!(features.rms_noise > 0.0);
        let cfd50 = features.cfd[3].unwrap();
        assert!(cfd50.time < 50.0);
        assert!(cfd50.time > 45.0);
        assert!(features.rise_time > 0.0);
        assert!(features.slew_rate > 0.0);
        assert!(features.charge > 0.0);
        let tot = features.le[2].unwrap().tot.unwrap();
        assert!(tot > 0.0);
    }

    #[test]
    fn test_cfd_times_rise_with_threshold() {
        let time = time_axis(1000, -60.0, 0.2);
        let amp = gaussian_waveform(&time, 50.0, 2000.0, 0.0);
        let features = analyze_waveform(&amp, &time, &region(), &ThresholdConfig::default());
        let times = features.time_cfd();
        assert_eq!(times.len(), 4);
        assert!(features.cfd.iter().all(|c| c.is_some()));
        for pair in times.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        // a flat baseline has no noise, so no signal claim either
        assert!(!features.has_signal);
    }

    #[test]
    fn test_unreachable_charge_fraction_keeps_sentinel() {
        let time = time_axis(1000, -60.0, 0.2);
        let amp = gaussian_waveform(&time, 50.0, 2000.0, 1.0);
        let thresholds = ThresholdConfig {
            charge_thresholds: vec![50, 200],
            ..Default::default()
        };
        let features = analyze_waveform(&amp, &time, &region(), &thresholds);
        assert!(features.charge_times[0].is_some());
        assert!(features.charge_times[1].is_none());
        assert_eq!(features.time_charge()[1], CHARGE_TIME_SENTINEL);
        let t50 = features.time_charge()[0];
        assert!((t50 - 50.0).abs() < 1.0);
    }

    #[test]
    fn test_analysis_is_idempotent() {
        let time = time_axis(1000, -60.0, 0.2);
        let amp = gaussian_waveform(&time, 50.0, 2000.0, 3.0);
        let thresholds = ThresholdConfig::default();
        let first = analyze_waveform(&amp, &time, &region(), &thresholds);
        let second = analyze_waveform(&amp, &time, &region(), &thresholds);
        assert_eq!(first.amp_max.to_bits(), second.amp_max.to_bits());
        assert_eq!(first.time_cfd(), second.time_cfd());
        assert_eq!(first, second);
    }

    #[test]
    fn test_negative_polarity() {
        let time = time_axis(1000, -60.0, 0.2);
        let amp: Vec<f32> = gaussian_waveform(&time, 50.0, 2000.0, 1.0)
            .into_iter()
            .map(|v| 2.0 * BASELINE - v)
            .collect();
        let mut region = region();
        region.polarity = -1;
        let features = analyze_waveform(&amp, &time, &region, &ThresholdConfig::default());
        assert!((features.amp_max - 2000.0).abs() < 5.0);
        assert!(features.has_signal);
    }

    #[test]
    fn test_malformed_input_returns_defaults() {
        let thresholds = ThresholdConfig::default();
        let features = analyze_waveform(&[], &[], &region(), &thresholds);
        assert_eq!(features, WaveformFeatures::empty(&thresholds));
        let features = analyze_waveform(&[1.0, 2.0], &[0.0], &region(), &thresholds);
        assert!(!features.has_signal);
        assert_eq!(features.time_le(), vec![LE_TIME_SENTINEL; 3]);
        assert_eq!(features.jitter_le(), vec![LE_JITTER_SENTINEL; 3]);
        assert_eq!(features.tot_le(), vec![LE_TOT_SENTINEL; 3]);
        assert_eq!(features.time_cfd(), vec![CFD_TIME_SENTINEL; 4]);
        assert_eq!(features.jitter_cfd(), vec![CFD_JITTER_SENTINEL; 4]);
    }

    #[test]
    fn test_leading_edge_without_trailing_edge_keeps_tot_sentinel() {
        let time = time_axis(1000, -60.0, 0.2);
        // 0.1 V pulse, the charge window closes just after the peak
        let amp: Vec<f32> = time
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let x = (t - 50.0) / 2.0;
                0.1 * (-0.5 * x * x).exp() + if i % 2 == 0 { 1e-4 } else { -1e-4 }
            })
            .collect();
        let mut region = region();
        region.charge = TimeWindow::new(0.0, 50.5);
        let features = analyze_waveform(&amp, &time, &region, &ThresholdConfig::default());
        assert!(features.le.iter().all(|e| e.is_some()));
        assert!(features.le.iter().all(|e| e.unwrap().tot.is_none()));
        assert_eq!(features.tot_le(), vec![LE_TOT_SENTINEL; 3]);
        for (t, jitter) in features.time_le().iter().zip(features.jitter_le()) {
            assert!(*t > 40.0 && *t < 50.0);
            assert!(jitter >= 0.0);
        }
    }

    #[test]
    fn test_leading_edge_above_peak_is_skipped() {
        let time = time_axis(1000, -60.0, 0.2);
        // 0.03 V pulse; the 50 mV level is never reached
        let amp: Vec<f32> = time
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let x = (t - 50.0) / 2.0;
                0.03 * (-0.5 * x * x).exp() + if i % 2 == 0 { 1e-4 } else { -1e-4 }
            })
            .collect();
        let features = analyze_waveform(&amp, &time, &region(), &ThresholdConfig::default());
        assert!(features.le[0].is_some());
        assert!(features.le[1].is_some());
        assert!(features.le[2].is_none());
        assert_eq!(features.time_le()[2], LE_TIME_SENTINEL);
    }
}
