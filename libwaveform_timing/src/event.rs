use ndarray::Array2;

/// Per-channel payload of a SynchronizedEvent
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelWaveform {
    pub pedestal: f32,
    pub board_id: u32,
    pub channel_id: u32,
    pub event_counter: u32,
    pub raw: Vec<f32>,
    pub corrected: Vec<f32>,
}

/// One trigger's worth of aligned, pedestal-corrected channel data.
///
/// `time_axis` has the length of the longest channel and every `corrected` array has that
/// same length. Never mutated once built.
#[derive(Debug, Clone, PartialEq)]
pub struct SynchronizedEvent {
    pub event_index: i32,
    pub effective_sample_counts: Vec<usize>,
    pub time_axis: Vec<f32>,
    pub channels: Vec<ChannelWaveform>,
}

/// Column-per-channel matrices, the layout used on disk
#[derive(Debug, Clone)]
pub struct EventMatrices {
    pub raw: Array2<f32>,
    pub corrected: Array2<f32>,
}

impl SynchronizedEvent {
    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn n_samples(&self) -> usize {
        self.time_axis.len()
    }

    /// The samples of a channel which came from the digitizer, with the matching time axis.
    ///
    /// Padding is excluded, and the slice never exceeds either array.
    pub fn effective_view(&self, channel: usize) -> (&[f32], &[f32]) {
        let Some(waveform) = self.channels.get(channel) else {
            return (&[], &[]);
        };
        let n = self
            .effective_sample_counts
            .get(channel)
            .copied()
            .unwrap_or(self.time_axis.len())
            .min(waveform.corrected.len())
            .min(self.time_axis.len());
        (&waveform.corrected[..n], &self.time_axis[..n])
    }

    pub fn pedestals(&self) -> Vec<f32> {
        self.channels.iter().map(|c| c.pedestal).collect()
    }

    pub fn board_ids(&self) -> Vec<u32> {
        self.channels.iter().map(|c| c.board_id).collect()
    }

    pub fn channel_ids(&self) -> Vec<u32> {
        self.channels.iter().map(|c| c.channel_id).collect()
    }

    pub fn event_counters(&self) -> Vec<u32> {
        self.channels.iter().map(|c| c.event_counter).collect()
    }

    /// Convert the waveforms into `[n_samples, n_channels]` matrices
    pub fn convert_to_data_matrices(&self) -> EventMatrices {
        let n_samples = self.n_samples();
        let n_channels = self.n_channels();
        let mut raw = Array2::<f32>::zeros([n_samples, n_channels]);
        let mut corrected = Array2::<f32>::zeros([n_samples, n_channels]);
        for (col, waveform) in self.channels.iter().enumerate() {
            for row in 0..n_samples.min(waveform.raw.len()) {
                raw[[row, col]] = waveform.raw[row];
            }
            for row in 0..n_samples.min(waveform.corrected.len()) {
                corrected[[row, col]] = waveform.corrected[row];
            }
        }
        EventMatrices { raw, corrected }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_channel_event() -> SynchronizedEvent {
        SynchronizedEvent {
            event_index: 4,
            effective_sample_counts: vec![3, 2],
            time_axis: vec![0.0, 0.2, 0.4],
            channels: vec![
                ChannelWaveform {
                    pedestal: 1.0,
                    board_id: 0,
                    channel_id: 0,
                    event_counter: 4,
                    raw: vec![1.0, 2.0, 3.0],
                    corrected: vec![10.0, 11.0, 12.0],
                },
                ChannelWaveform {
                    pedestal: 5.0,
                    board_id: 0,
                    channel_id: 1,
                    event_counter: 4,
                    raw: vec![5.0, 6.0, 5.0],
                    corrected: vec![10.0, 11.0, 10.0],
                },
            ],
        }
    }

    #[test]
    fn test_effective_view_excludes_padding() {
        let event = two_channel_event();
        let (amp, time) = event.effective_view(1);
        assert_eq!(amp, &[10.0, 11.0]);
        assert_eq!(time, &[0.0, 0.2]);
        let (amp, _) = event.effective_view(7);
        assert!(amp.is_empty());
    }

    #[test]
    fn test_matrix_layout() {
        let matrices = two_channel_event().convert_to_data_matrices();
        assert_eq!(matrices.raw.shape(), &[3, 2]);
        assert_eq!(matrices.raw[[1, 1]], 6.0);
        assert_eq!(matrices.corrected[[2, 0]], 12.0);
    }
}
