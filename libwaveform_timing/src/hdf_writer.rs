use hdf5::types::VarLenUnicode;
use hdf5::File;
use ndarray::Array2;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::config::ThresholdConfig;
use super::error::HDF5WriterError;
use super::event::SynchronizedEvent;
use super::event_aligner::AlignerSettings;
use super::extract::{EventFeatures, FeatureSink};
use super::feature_extractor::WaveformFeatures;
use super::ingest::EventSink;

pub const EVENTS_NAME: &str = "events";
pub const FEATURES_NAME: &str = "features";
pub const TIME_NAME: &str = "time_ns";
pub const PEDESTALS_NAME: &str = "pedestals";
pub const BOARD_IDS_NAME: &str = "board_ids";
pub const CHANNEL_IDS_NAME: &str = "channel_ids";
pub const EVENT_COUNTERS_NAME: &str = "event_counters";
pub const NSAMPLES_NAME: &str = "nsamples_per_channel";
pub const RAW_NAME: &str = "raw";
pub const CORRECTED_NAME: &str = "corrected";

/// This is the version of the output format
const FORMAT_VERSION: &str = "1.0";

pub fn event_group_name(n: usize) -> String {
    format!("event_{n}")
}

/// Files are written next to their final path and renamed into place on close
fn temporary_path(path: &Path) -> Result<PathBuf, HDF5WriterError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| HDF5WriterError::BadFilePath(path.to_path_buf()))?;
    Ok(path.with_file_name(format!("{}.tmp", file_name.to_string_lossy())))
}

fn write_version(group: &hdf5::Group) -> Result<(), HDF5WriterError> {
    let version = format!("{}:{}", env!("CARGO_PKG_NAME"), FORMAT_VERSION);
    group
        .new_attr::<VarLenUnicode>()
        .create("version")?
        .write_scalar(&VarLenUnicode::from_str(&version)?)?;
    Ok(())
}

/// Ownership of a temporary output file until it is committed or discarded
#[derive(Debug)]
struct PendingFile {
    tmp_path: PathBuf,
    final_path: PathBuf,
}

impl PendingFile {
    fn new(path: &Path) -> Result<Self, HDF5WriterError> {
        Ok(Self {
            tmp_path: temporary_path(path)?,
            final_path: path.to_path_buf(),
        })
    }

    fn commit(self) -> Result<PathBuf, HDF5WriterError> {
        std::fs::rename(&self.tmp_path, &self.final_path)?;
        Ok(self.final_path)
    }

    fn discard(self) {
        match std::fs::remove_file(&self.tmp_path) {
            Ok(()) => spdlog::warn!(
                "Discarded incomplete output {}",
                self.tmp_path.to_string_lossy()
            ),
            Err(e) => spdlog::error!(
                "Could not remove incomplete output {}: {e}",
                self.tmp_path.to_string_lossy()
            ),
        }
    }
}

/// Writes SynchronizedEvents to HDF5.
///
/// Each committed event becomes a group `event_<n>` (n counts committed events from 0) holding
/// the trigger index as attribute `event`, the time axis, the per-channel header fields and
/// pedestals, and `[nsamples, n_channels]` raw and corrected matrices.
#[derive(Debug)]
pub struct WaveformWriter {
    file_handle: File,
    pending: PendingFile,
    events_group: hdf5::Group,
    n_channels: usize,
    n_written: usize,
    first_event: Option<i32>,
    last_event: i32,
}
// Structure
// events - n_channels, sampling_ns, ped_target, pedestal_window, min_event, max_event, version
// |---- event_# - event
// |    |---- time_ns(dset)
// |    |---- pedestals, board_ids, channel_ids, event_counters, nsamples_per_channel(dset)
// |    |---- raw(dset)
// |    |---- corrected(dset)

impl WaveformWriter {
    /// Create the writer, opening the temporary file and creating the events group
    pub fn new(path: &Path, settings: &AlignerSettings) -> Result<Self, HDF5WriterError> {
        let pending = PendingFile::new(path)?;
        let file_handle = File::create(&pending.tmp_path)?;

        let events_group = file_handle.create_group(EVENTS_NAME)?;
        events_group
            .new_attr::<u64>()
            .create("n_channels")?
            .write_scalar(&(settings.n_channels as u64))?;
        events_group
            .new_attr::<f32>()
            .create("sampling_ns")?
            .write_scalar(&settings.tsample_ns)?;
        events_group
            .new_attr::<f32>()
            .create("ped_target")?
            .write_scalar(&settings.ped_target)?;
        events_group
            .new_attr::<u64>()
            .create("pedestal_window")?
            .write_scalar(&(settings.pedestal_window as u64))?;
        events_group.new_attr::<i32>().create("min_event")?;
        events_group.new_attr::<i32>().create("max_event")?;
        write_version(&events_group)?;

        Ok(Self {
            file_handle,
            pending,
            events_group,
            n_channels: settings.n_channels,
            n_written: 0,
            first_event: None,
            last_event: 0,
        })
    }

    pub fn write_event(&mut self, event: &SynchronizedEvent) -> Result<(), HDF5WriterError> {
        if event.n_channels() != self.n_channels {
            return Err(HDF5WriterError::ChannelCountMismatch(
                self.n_channels,
                event.n_channels(),
            ));
        }
        let event_group = self
            .events_group
            .create_group(&event_group_name(self.n_written))?;
        event_group
            .new_attr::<i32>()
            .create("event")?
            .write_scalar(&event.event_index)?;

        event_group
            .new_dataset_builder()
            .with_data(event.time_axis.as_slice())
            .create(TIME_NAME)?;
        event_group
            .new_dataset_builder()
            .with_data(event.pedestals().as_slice())
            .create(PEDESTALS_NAME)?;
        event_group
            .new_dataset_builder()
            .with_data(event.board_ids().as_slice())
            .create(BOARD_IDS_NAME)?;
        event_group
            .new_dataset_builder()
            .with_data(event.channel_ids().as_slice())
            .create(CHANNEL_IDS_NAME)?;
        event_group
            .new_dataset_builder()
            .with_data(event.event_counters().as_slice())
            .create(EVENT_COUNTERS_NAME)?;
        let nsamples: Vec<u64> = event
            .effective_sample_counts
            .iter()
            .map(|n| *n as u64)
            .collect();
        event_group
            .new_dataset_builder()
            .with_data(nsamples.as_slice())
            .create(NSAMPLES_NAME)?;

        let matrices = event.convert_to_data_matrices();
        event_group
            .new_dataset_builder()
            .with_data(&matrices.raw)
            .create(RAW_NAME)?;
        event_group
            .new_dataset_builder()
            .with_data(&matrices.corrected)
            .create(CORRECTED_NAME)?;

        if self.first_event.is_none() {
            self.first_event = Some(event.event_index);
        }
        self.last_event = event.event_index;
        self.n_written += 1;
        Ok(())
    }

    pub fn n_written(&self) -> usize {
        self.n_written
    }

    /// Write the event range, close the file and move it to its final path
    pub fn close(self) -> Result<PathBuf, HDF5WriterError> {
        self.events_group
            .attr("min_event")?
            .write_scalar(&self.first_event.unwrap_or(0))?;
        self.events_group
            .attr("max_event")?
            .write_scalar(&self.last_event)?;
        spdlog::info!("{} events written.", self.n_written);
        let Self {
            file_handle,
            pending,
            events_group,
            ..
        } = self;
        drop(events_group);
        drop(file_handle);
        pending.commit()
    }

    /// Close and delete the temporary file, committing nothing
    pub fn abort(self) {
        let Self {
            file_handle,
            pending,
            events_group,
            ..
        } = self;
        drop(events_group);
        drop(file_handle);
        pending.discard();
    }
}

impl EventSink for WaveformWriter {
    fn write_event(&mut self, event: &SynchronizedEvent) -> Result<(), HDF5WriterError> {
        WaveformWriter::write_event(self, event)
    }
}

/// `[n_channels, n_thresholds]` matrix of a materialized threshold result
fn threshold_matrix<F>(channels: &[WaveformFeatures], n_thresholds: usize, values: F) -> Array2<f32>
where
    F: Fn(&WaveformFeatures) -> Vec<f32>,
{
    let mut matrix = Array2::<f32>::zeros([channels.len(), n_thresholds]);
    for (row, features) in channels.iter().enumerate() {
        for (col, value) in values(features).into_iter().take(n_thresholds).enumerate() {
            matrix[[row, col]] = value;
        }
    }
    matrix
}

/// Writes EventFeatures to HDF5, one group per event with one entry per channel.
///
/// Missing threshold crossings are written as the legacy sentinel values.
#[derive(Debug)]
pub struct FeatureWriter {
    file_handle: File,
    pending: PendingFile,
    features_group: hdf5::Group,
    n_channels: usize,
    n_cfd: usize,
    n_le: usize,
    n_charge: usize,
    n_written: usize,
    first_event: Option<i32>,
    last_event: i32,
}
// Structure
// features - n_channels, cfd_thresholds, le_thresholds, charge_thresholds, min_event, max_event, version
// |---- event_# - event
// |    |---- baseline, rms_noise, ..., has_signal(dset) [n_channels]
// |    |---- time_cfd, jitter_cfd, time_le, jitter_le, tot_le, time_charge(dset) [n_channels, n_thresholds]

impl FeatureWriter {
    pub fn new(
        path: &Path,
        n_channels: usize,
        thresholds: &ThresholdConfig,
    ) -> Result<Self, HDF5WriterError> {
        let pending = PendingFile::new(path)?;
        let file_handle = File::create(&pending.tmp_path)?;

        let features_group = file_handle.create_group(FEATURES_NAME)?;
        features_group
            .new_attr::<u64>()
            .create("n_channels")?
            .write_scalar(&(n_channels as u64))?;
        features_group
            .new_attr_builder()
            .with_data(thresholds.cfd_thresholds.as_slice())
            .create("cfd_thresholds")?;
        features_group
            .new_attr_builder()
            .with_data(thresholds.le_thresholds.as_slice())
            .create("le_thresholds")?;
        features_group
            .new_attr_builder()
            .with_data(thresholds.charge_thresholds.as_slice())
            .create("charge_thresholds")?;
        features_group.new_attr::<i32>().create("min_event")?;
        features_group.new_attr::<i32>().create("max_event")?;
        write_version(&features_group)?;

        Ok(Self {
            file_handle,
            pending,
            features_group,
            n_channels,
            n_cfd: thresholds.cfd_thresholds.len(),
            n_le: thresholds.le_thresholds.len(),
            n_charge: thresholds.charge_thresholds.len(),
            n_written: 0,
            first_event: None,
            last_event: 0,
        })
    }

    fn write_column<F>(
        group: &hdf5::Group,
        name: &str,
        channels: &[WaveformFeatures],
        value: F,
    ) -> Result<(), HDF5WriterError>
    where
        F: Fn(&WaveformFeatures) -> f32,
    {
        let column: Vec<f32> = channels.iter().map(value).collect();
        group
            .new_dataset_builder()
            .with_data(column.as_slice())
            .create(name)?;
        Ok(())
    }

    pub fn write_features(&mut self, features: &EventFeatures) -> Result<(), HDF5WriterError> {
        let channels = &features.channels;
        if channels.len() != self.n_channels {
            return Err(HDF5WriterError::ChannelCountMismatch(
                self.n_channels,
                channels.len(),
            ));
        }
        let group = self
            .features_group
            .create_group(&event_group_name(self.n_written))?;
        group
            .new_attr::<i32>()
            .create("event")?
            .write_scalar(&features.event_index)?;

        Self::write_column(&group, "baseline", channels, |f| f.baseline)?;
        Self::write_column(&group, "rms_noise", channels, |f| f.rms_noise)?;
        Self::write_column(&group, "noise_1point", channels, |f| f.noise_1point)?;
        Self::write_column(&group, "amp_min_before", channels, |f| f.amp_min_before)?;
        Self::write_column(&group, "amp_max_before", channels, |f| f.amp_max_before)?;
        Self::write_column(&group, "amp_max", channels, |f| f.amp_max)?;
        Self::write_column(&group, "charge", channels, |f| f.charge)?;
        Self::write_column(&group, "signal_over_noise", channels, |f| f.signal_over_noise)?;
        Self::write_column(&group, "peak_time", channels, |f| f.peak_time)?;
        Self::write_column(&group, "rise_time", channels, |f| f.rise_time)?;
        Self::write_column(&group, "slew_rate", channels, |f| f.slew_rate)?;
        let has_signal: Vec<bool> = channels.iter().map(|f| f.has_signal).collect();
        group
            .new_dataset_builder()
            .with_data(has_signal.as_slice())
            .create("has_signal")?;

        let matrices = [
            ("time_cfd", threshold_matrix(channels, self.n_cfd, |f| f.time_cfd())),
            ("jitter_cfd", threshold_matrix(channels, self.n_cfd, |f| f.jitter_cfd())),
            ("time_le", threshold_matrix(channels, self.n_le, |f| f.time_le())),
            ("jitter_le", threshold_matrix(channels, self.n_le, |f| f.jitter_le())),
            ("tot_le", threshold_matrix(channels, self.n_le, |f| f.tot_le())),
            ("time_charge", threshold_matrix(channels, self.n_charge, |f| f.time_charge())),
        ];
        for (name, matrix) in matrices.iter() {
            group.new_dataset_builder().with_data(matrix).create(*name)?;
        }

        if self.first_event.is_none() {
            self.first_event = Some(features.event_index);
        }
        self.last_event = features.event_index;
        self.n_written += 1;
        Ok(())
    }

    pub fn close(self) -> Result<PathBuf, HDF5WriterError> {
        self.features_group
            .attr("min_event")?
            .write_scalar(&self.first_event.unwrap_or(0))?;
        self.features_group
            .attr("max_event")?
            .write_scalar(&self.last_event)?;
        spdlog::info!("Features of {} events written.", self.n_written);
        let Self {
            file_handle,
            pending,
            features_group,
            ..
        } = self;
        drop(features_group);
        drop(file_handle);
        pending.commit()
    }

    pub fn abort(self) {
        let Self {
            file_handle,
            pending,
            features_group,
            ..
        } = self;
        drop(features_group);
        drop(file_handle);
        pending.discard();
    }
}

impl FeatureSink for FeatureWriter {
    fn write_features(&mut self, features: &EventFeatures) -> Result<(), HDF5WriterError> {
        FeatureWriter::write_features(self, features)
    }
}
