//! Numerical primitives of the feature extractor.
//!
//! Every function here is bounds checked and works on borrowed slices. None of them fail:
//! a search that finds nothing returns None.

use super::config::TimeWindow;
use super::constants::INTERPOLATION_EPSILON;

/// Two-point linear interpolation of x at y_target, degenerating to x1 on a flat segment
pub fn interpolate(x1: f32, y1: f32, x2: f32, y2: f32, y_target: f32) -> f32 {
    if (y2 - y1).abs() < INTERPOLATION_EPSILON {
        return x1;
    }
    x1 + (x2 - x1) / (y2 - y1) * (y_target - y1)
}

/// Inclusive sample index range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexWindow {
    pub start: usize,
    pub end: usize,
}

impl IndexWindow {
    /// The outer clip window. Defaults to the full array when a bound matches no sample.
    pub fn analysis(time: &[f32], window: &TimeWindow) -> Self {
        let n = time.len();
        if n == 0 {
            return Self::default();
        }
        let start = time.iter().position(|t| *t >= window.min).unwrap_or(0);
        let end = time.iter().rposition(|t| *t <= window.max).unwrap_or(n - 1);
        Self {
            start,
            end: end.max(start),
        }
    }

    /// Resolve a time window inside the outer window.
    ///
    /// Start is the first sample at or after window.min (the last sample if there is none),
    /// end is the last sample at or before window.max (the first sample if there is none).
    /// Both are clipped to the outer window and the array, and end never precedes start.
    pub fn resolve(time: &[f32], window: &TimeWindow, outer: &IndexWindow) -> Self {
        let n = time.len();
        if n == 0 {
            return Self::default();
        }
        let last = n - 1;
        let start_idx = time.iter().position(|t| *t >= window.min).unwrap_or(last);
        let end_idx = time.iter().rposition(|t| *t <= window.max).unwrap_or(0);

        let start = start_idx.max(outer.start).min(last);
        let end = end_idx.min(outer.end).min(last).max(start);
        Self { start, end }
    }
}

/// Statistics of the quiet region before the pulse
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineStats {
    pub baseline: f32,
    pub rms_noise: f32,
    pub noise_1point: f32,
    pub amp_min: f32,
    pub amp_max: f32,
}

impl Default for BaselineStats {
    fn default() -> Self {
        Self {
            baseline: 0.0,
            rms_noise: 0.0,
            noise_1point: 0.0,
            amp_min: 100000.0,
            amp_max: -100000.0,
        }
    }
}

/// Mean, RMS deviation, smoothed deviation and extrema over the window.
///
/// The smoothed deviation averages the 3-point moving average (2-point at the array
/// edges) minus the baseline.
pub fn baseline_and_noise(amp: &[f32], window: &IndexWindow) -> BaselineStats {
    let mut stats = BaselineStats::default();
    let n = amp.len();
    if n == 0 {
        return stats;
    }
    let end = window.end.min(n - 1);
    if window.start > end {
        return stats;
    }
    let region = &amp[window.start..=end];
    let n_points = region.len() as f32;

    let mut sum = 0.0;
    for value in region.iter() {
        sum += value;
        stats.amp_min = stats.amp_min.min(*value);
        stats.amp_max = stats.amp_max.max(*value);
    }
    stats.baseline = sum / n_points;

    let mut sum_sq = 0.0;
    let mut sum_smooth = 0.0;
    for i in window.start..=end {
        let deviation = amp[i] - stats.baseline;
        sum_sq += deviation * deviation;

        let lo = i.saturating_sub(1);
        let hi = (i + 1).min(n - 1);
        let neighbours = &amp[lo..=hi];
        let smoothed = neighbours.iter().sum::<f32>() / neighbours.len() as f32;
        sum_smooth += smoothed - stats.baseline;
    }
    stats.rms_noise = (sum_sq / n_points).sqrt();
    stats.noise_1point = sum_smooth / n_points;
    stats
}

/// Baseline subtraction and polarity flip, so pulses are positive going
pub fn apply_baseline_and_polarity(amp: &[f32], baseline: f32, polarity: i32) -> Vec<f32> {
    let sign = polarity as f32;
    amp.iter().map(|v| (v - baseline) * sign).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Peak {
    pub index: usize,
    pub amplitude: f32,
    pub time: f32,
}

/// Largest positive sample in the window. An all-negative window reports amplitude 0 at
/// the window start.
pub fn find_peak(amp_corr: &[f32], time: &[f32], window: &IndexWindow) -> Peak {
    let mut peak = Peak::default();
    if amp_corr.is_empty() || amp_corr.len() != time.len() {
        return peak;
    }
    let end = window.end.min(amp_corr.len() - 1);
    peak.index = window.start.min(end);
    for i in window.start..=end {
        if amp_corr[i] > peak.amplitude {
            peak.amplitude = amp_corr[i];
            peak.index = i;
        }
    }
    peak.time = time[peak.index];
    peak
}

/// Riemann sum over [start, end). The last sample of the window is excluded.
pub fn integrate_charge(amp_corr: &[f32], window: &IndexWindow, dt: f32, impedance: f32) -> f32 {
    if amp_corr.is_empty() {
        return 0.0;
    }
    let end = window.end.min(amp_corr.len() - 1);
    (window.start..end)
        .map(|i| amp_corr[i] * dt / impedance)
        .sum()
}

/// Times at which the running charge passes each fraction of the total charge.
///
/// `percents` may be given in any order. A crossing outside `bounds` (or at the first
/// sample, which has no predecessor) yields None, as does a fraction never reached.
#[allow(clippy::too_many_arguments)]
pub fn charge_fraction_times(
    amp_corr: &[f32],
    time: &[f32],
    window: &IndexWindow,
    dt: f32,
    impedance: f32,
    total_charge: f32,
    percents: &[i32],
    bounds: &TimeWindow,
) -> Vec<Option<f32>> {
    let mut times = vec![None; percents.len()];
    if amp_corr.is_empty() || amp_corr.len() != time.len() || percents.is_empty() {
        return times;
    }

    let mut order: Vec<usize> = (0..percents.len()).collect();
    order.sort_by_key(|k| percents[*k]);
    let levels: Vec<f32> = order
        .iter()
        .map(|k| total_charge * percents[*k] as f32 / 100.0)
        .collect();

    let end = window.end.min(amp_corr.len() - 1);
    let mut running = 0.0;
    let mut next = 0;
    for i in window.start..end {
        let step = amp_corr[i] * dt / impedance;
        running += step;
        if running > levels[next] {
            if i > 0 {
                let crossing =
                    interpolate(time[i - 1], running - step, time[i], running, levels[next]);
                if bounds.contains(crossing) {
                    times[order[next]] = Some(crossing);
                }
            }
            next += 1;
            if next == levels.len() {
                break;
            }
        }
    }
    times
}

/// A threshold crossing found on the rising edge
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossing {
    pub time: f32,
    /// Noise over local slope, 0 when the slope vanishes
    pub jitter: f32,
}

/// Walk backwards from `from` (exclusive of `stop`) for the first sample below threshold and
/// interpolate between it and its successor.
pub fn crossing_backward(
    amp_corr: &[f32],
    time: &[f32],
    from: usize,
    stop: usize,
    threshold: f32,
    rms_noise: f32,
) -> Option<Crossing> {
    let n = amp_corr.len();
    if n == 0 || n != time.len() {
        return None;
    }
    let start = from.min(n - 1);
    let i = ((stop + 1)..=start).rev().find(|i| amp_corr[*i] < threshold)?;
    if i + 1 >= n {
        return None;
    }
    let crossing_time = interpolate(time[i], amp_corr[i], time[i + 1], amp_corr[i + 1], threshold);
    let slew = (amp_corr[i + 1] - amp_corr[i]) / (time[i + 1] - time[i]);
    let jitter = if slew.abs() > INTERPOLATION_EPSILON {
        rms_noise / slew.abs()
    } else {
        0.0
    };
    Some(Crossing {
        time: crossing_time,
        jitter,
    })
}

/// Walk forwards from `from` up to (not including) `stop` for the first sample below
/// threshold, returning the interpolated falling-edge time.
pub fn trailing_edge_forward(
    amp_corr: &[f32],
    time: &[f32],
    from: usize,
    stop: usize,
    threshold: f32,
) -> Option<f32> {
    let n = amp_corr.len();
    if n == 0 || n != time.len() {
        return None;
    }
    let start = from.max(1);
    let stop = stop.min(n - 1);
    let i = (start..stop).find(|i| amp_corr[*i] < threshold)?;
    Some(interpolate(
        time[i - 1],
        amp_corr[i - 1],
        time[i],
        amp_corr[i],
        threshold,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(n: usize, t0: f32, dt: f32) -> Vec<f32> {
        (0..n).map(|i| t0 + i as f32 * dt).collect()
    }

    #[test]
    fn test_interpolate() {
        assert_eq!(interpolate(0.0, 0.0, 1.0, 10.0, 5.0), 0.5);
        assert_eq!(interpolate(2.0, 3.0, 4.0, 3.0, 7.0), 2.0);
    }

    #[test]
    fn test_window_resolution_clips_to_outer() {
        let time = axis(11, -5.0, 1.0); // -5..=5
        let outer = IndexWindow::analysis(&time, &TimeWindow::new(-3.0, 3.0));
        assert_eq!(outer, IndexWindow { start: 2, end: 8 });
        let w = IndexWindow::resolve(&time, &TimeWindow::new(-10.0, 1.5), &outer);
        assert_eq!(w, IndexWindow { start: 2, end: 6 });
        // a window past the end of the axis collapses onto the last usable sample
        let w = IndexWindow::resolve(&time, &TimeWindow::new(50.0, 60.0), &outer);
        assert_eq!(w.start, 10);
        assert_eq!(w.end, 10);
    }

    #[test]
    fn test_baseline_and_noise() {
        let amp = [1.0, 3.0, 1.0, 3.0, 100.0];
        let stats = baseline_and_noise(&amp, &IndexWindow { start: 0, end: 3 });
        assert_eq!(stats.baseline, 2.0);
        assert_eq!(stats.rms_noise, 1.0);
        assert_eq!(stats.amp_min, 1.0);
        assert_eq!(stats.amp_max, 3.0);
        // smoothed: 2, 5/3, 7/3, 104/3 minus the baseline
        let expected = ((2.0 - 2.0) + (5.0 / 3.0 - 2.0) + (7.0 / 3.0 - 2.0) + (104.0 / 3.0 - 2.0)) / 4.0;
        assert!((stats.noise_1point - expected).abs() < 1e-4);
    }

    #[test]
    fn test_peak_and_charge() {
        let time = axis(6, 0.0, 0.5);
        let amp = [0.0, 1.0, 4.0, 2.0, 1.0, 9.0];
        let window = IndexWindow { start: 0, end: 4 };
        let peak = find_peak(&amp, &time, &window);
        assert_eq!(peak.index, 2);
        assert_eq!(peak.time, 1.0);
        // samples 0..4 only
        let charge = integrate_charge(&amp, &window, 0.5, 1.0);
        assert_eq!(charge, 3.5);
    }

    #[test]
    fn test_negative_window_peak_stays_at_start() {
        let time = axis(4, 0.0, 1.0);
        let amp = [-1.0, -2.0, -0.5, -3.0];
        let peak = find_peak(&amp, &time, &IndexWindow { start: 1, end: 3 });
        assert_eq!(peak.index, 1);
        assert_eq!(peak.amplitude, 0.0);
    }

    #[test]
    fn test_crossings_on_triangle() {
        let time = axis(9, 0.0, 1.0);
        let amp = [0.0, 0.0, 2.0, 4.0, 6.0, 4.0, 2.0, 0.0, 0.0];
        let rising = crossing_backward(&amp, &time, 4, 0, 3.0, 0.5).unwrap();
        assert_eq!(rising.time, 2.5);
        assert_eq!(rising.jitter, 0.25);
        let falling = trailing_edge_forward(&amp, &time, 4, 8, 3.0).unwrap();
        assert_eq!(falling, 5.5);
        // nothing below threshold before the stop index
        assert!(crossing_backward(&amp, &time, 4, 3, 3.0, 0.5).is_none());
    }

    #[test]
    fn test_flat_crossing_has_zero_jitter() {
        let time = axis(6, 0.0, 1.0);
        let amp = [0.0, 0.0, 1.0, 1.0, 1.0, 0.0];
        // no slope between samples 3 and 4
        let crossing = crossing_backward(&amp, &time, 3, 0, 2.0, 0.5).unwrap();
        assert_eq!(crossing.time, 3.0);
        assert_eq!(crossing.jitter, 0.0);
        // a rising segment gives noise over slope
        let crossing = crossing_backward(&amp, &time, 2, 0, 0.5, 0.5).unwrap();
        assert_eq!(crossing.time, 1.5);
        assert_eq!(crossing.jitter, 0.5);
    }

    #[test]
    fn test_charge_fraction_out_of_order_percents() {
        let time = axis(10, 0.0, 1.0);
        let amp = [1.0; 10];
        let window = IndexWindow { start: 0, end: 9 };
        let total = integrate_charge(&amp, &window, 1.0, 1.0);
        assert_eq!(total, 9.0);
        let times = charge_fraction_times(
            &amp,
            &time,
            &window,
            1.0,
            1.0,
            total,
            &[50, 200, 20],
            &TimeWindow::new(0.0, 100.0),
        );
        assert!(times[0].is_some());
        assert!(times[1].is_none());
        assert!(times[2].is_some());
        assert!(times[2].unwrap() < times[0].unwrap());
    }
}
