use hdf5::File;
use std::path::{Path, PathBuf};

use super::error::WaveformFileError;
use super::event::{ChannelWaveform, SynchronizedEvent};
use super::extract::EventProvider;
use super::hdf_writer::*;

/// Read access to a committed waveform file.
///
/// Events are addressed by their commit position (the `n` of `event_<n>`), which runs from 0
/// without gaps even when triggers were skipped during ingestion.
#[derive(Debug)]
pub struct WaveformFile {
    file_path: PathBuf,
    events_group: hdf5::Group,
    n_channels: usize,
    n_events: usize,
    _file_handle: File,
}

impl WaveformFile {
    pub fn open(path: &Path) -> Result<Self, WaveformFileError> {
        if !path.exists() {
            return Err(WaveformFileError::BadFilePath(path.to_path_buf()));
        }
        let file_handle = File::open(path)?;
        let events_group = file_handle.group(EVENTS_NAME)?;
        let n_channels = events_group.attr("n_channels")?.read_scalar::<u64>()? as usize;
        let n_events = events_group
            .member_names()?
            .iter()
            .filter(|name| name.starts_with("event_"))
            .count();
        Ok(Self {
            file_path: path.to_path_buf(),
            events_group,
            n_channels,
            n_events,
            _file_handle: file_handle,
        })
    }

    pub fn len(&self) -> usize {
        self.n_events
    }

    pub fn is_empty(&self) -> bool {
        self.n_events == 0
    }

    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    pub fn get_filename(&self) -> &Path {
        &self.file_path
    }

    /// Load the event committed at position n
    pub fn get_event(&self, n: usize) -> Result<SynchronizedEvent, WaveformFileError> {
        if n >= self.n_events {
            return Err(WaveformFileError::EventOutOfRange(n, self.n_events));
        }
        let group = self.events_group.group(&event_group_name(n))?;
        let event_index = group.attr("event")?.read_scalar::<i32>()?;

        let time_axis = group.dataset(TIME_NAME)?.read_raw::<f32>()?;
        let pedestals = group.dataset(PEDESTALS_NAME)?.read_raw::<f32>()?;
        let board_ids = group.dataset(BOARD_IDS_NAME)?.read_raw::<u32>()?;
        let channel_ids = group.dataset(CHANNEL_IDS_NAME)?.read_raw::<u32>()?;
        let event_counters = group.dataset(EVENT_COUNTERS_NAME)?.read_raw::<u32>()?;
        let nsamples = group.dataset(NSAMPLES_NAME)?.read_raw::<u64>()?;
        let raw = group.dataset(RAW_NAME)?.read_2d::<f32>()?;
        let corrected = group.dataset(CORRECTED_NAME)?.read_2d::<f32>()?;

        let n_channels = self.n_channels;
        let n_samples = time_axis.len();
        if raw.shape() != [n_samples, n_channels] {
            return Err(WaveformFileError::MalformedEvent(n, RAW_NAME));
        }
        if corrected.shape() != [n_samples, n_channels] {
            return Err(WaveformFileError::MalformedEvent(n, CORRECTED_NAME));
        }
        for (values, name) in [
            (pedestals.len(), PEDESTALS_NAME),
            (board_ids.len(), BOARD_IDS_NAME),
            (channel_ids.len(), CHANNEL_IDS_NAME),
            (event_counters.len(), EVENT_COUNTERS_NAME),
            (nsamples.len(), NSAMPLES_NAME),
        ] {
            if values != n_channels {
                return Err(WaveformFileError::MalformedEvent(n, name));
            }
        }

        let channels = (0..n_channels)
            .map(|ch| ChannelWaveform {
                pedestal: pedestals[ch],
                board_id: board_ids[ch],
                channel_id: channel_ids[ch],
                event_counter: event_counters[ch],
                raw: raw.column(ch).to_vec(),
                corrected: corrected.column(ch).to_vec(),
            })
            .collect();

        Ok(SynchronizedEvent {
            event_index,
            effective_sample_counts: nsamples.into_iter().map(|v| v as usize).collect(),
            time_axis,
            channels,
        })
    }
}

impl EventProvider for WaveformFile {
    fn n_events(&self) -> usize {
        self.len()
    }

    fn get_event(&self, index: usize) -> Result<SynchronizedEvent, WaveformFileError> {
        WaveformFile::get_event(self, index)
    }
}
