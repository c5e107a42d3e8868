//! # libwaveform_timing
//!
//! libwaveform_timing is a timing pipeline for multi-channel digitizer waveforms, written in
//! Rust. It takes the per-channel record streams written by a waveform digitizer (one file per
//! channel, binary or ASCII), aligns them into synchronized events, corrects their pedestals,
//! and stores them in the HDF5 format. A second stage reads the stored events back and extracts
//! per-channel timing and amplitude features (baseline, noise, peak, charge, rise time,
//! constant fraction and leading edge crossings, charge fraction times) into a second HDF5 file.
//!
//! ## Installation
//!
//! The only method of install is from source.
//!
//! ### HDF5
//!
//! Before building, HDF5 must be installed. Typically this will be installed using a package
//! manager (homebrew, apt, etc), and the Rust libraries will auto detect the location of the
//! HDF install. If HDF5 lives in a custom location, write the following snippet into the file
//! `.cargo/config.toml` of the repository:
//!
//! ```toml
//! [env]
//! HDF5_DIR="/path/to/my/hdf5/install/"
//!
//! [build]
//! rustflags="-C link-args=-Wl,-rpath,/path/to/my/hdf5/install/lib"
//! ```
//!
//! ### Building & Install
//!
//! To build and install the command line tool use `cargo install --path ./waveform_timing_cli`
//! from the top level of the repository. See the `waveform_timing_cli` README for its use.
//!
//! ## Configuration
//!
//! Both stages are driven by a single YAML file. Any field left out takes its default, and the
//! per-channel region arrays are extended with defaults up to `n_channels`. A template can be
//! generated with `waveform_timing_cli -p config.yml new`.
//!
//! ```yml
//! output_dir: output
//! n_channels: 16
//! max_cores: 8
//! max_events: -1
//! chunk_size: 100
//! nsamples_policy: strict
//! waveforms_file: waveforms.h5
//! features_file: waveforms_analyzed.h5
//! converter:
//!   input_dir: .
//!   input_pattern: wave_%d.dat
//!   input_is_ascii: false
//!   special_channel_file: TR_0_0.dat
//!   enable_special_override: true
//!   special_channel_index: 3
//!   tsample_ns: 0.2
//!   pedestal_window: 100
//!   ped_target: 3500.0
//!   event_policy: error
//! analyzer:
//!   baseline_region_min: [-50.0, ...]
//!   baseline_region_max: [-10.0, ...]
//!   signal_polarity: [1, ...]
//!   snr_threshold: 3.0
//!   cfd_thresholds: [10, 20, 30, 50]
//!   le_thresholds: [10.0, 20.0, 50.0]
//!   charge_thresholds: [10, 20, 50]
//!   events_per_worker: 1000
//! ```
//!
//! - `max_events` of -1 converts every trigger.
//! - `max_cores` above 1 switches conversion to chunked reading with one thread per channel
//! file, and lets that many extraction workers run at once.
//! - `event_policy` decides what happens when the channel headers of a trigger disagree:
//! `error` aborts, `warn` keeps the event, `skip` drops it. Warnings are rate limited.
//! - `nsamples_policy` decides what happens when channels carry different sample counts:
//! `strict` aborts, `pad` extends the shorter channels with the pedestal target and remembers
//! the true counts.
//!
//! ## Logs
//!
//! The library logs through spdlog; the command line tool writes its log to
//! `waveform_timing.log` in the working directory.
//!
//! ### HDF5 Data Format
//!
//! The converted waveforms:
//!
//! ```text
//! waveforms.h5
//! events - n_channels, sampling_ns, ped_target, pedestal_window, min_event, max_event, version
//! |---- event_# - event
//! |    |---- time_ns(dset) [n_samples]
//! |    |---- pedestals, board_ids, channel_ids, event_counters, nsamples_per_channel(dset) [n_channels]
//! |    |---- raw(dset) [n_samples, n_channels]
//! |    |---- corrected(dset) [n_samples, n_channels]
//! ```
//!
//! The extracted features:
//!
//! ```text
//! waveforms_analyzed.h5
//! features - n_channels, cfd_thresholds, le_thresholds, charge_thresholds, min_event, max_event, version
//! |---- event_# - event
//! |    |---- baseline, rms_noise, noise_1point, amp_min_before, amp_max_before, amp_max,
//! |    |     charge, signal_over_noise, peak_time, rise_time, slew_rate, has_signal(dset) [n_channels]
//! |    |---- time_cfd, jitter_cfd(dset) [n_channels, n_cfd]
//! |    |---- time_le, jitter_le, tot_le(dset) [n_channels, n_le]
//! |    |---- time_charge(dset) [n_channels, n_charge]
//! ```
//!
//! `event_#` counts committed events from 0; the `event` attribute holds the trigger index,
//! which has gaps where triggers were skipped. Thresholds that were never crossed are stored as
//! sentinels: 0 for constant fraction time and jitter, 20 ns for leading edge time with -5 for
//! its jitter and time over threshold, and 10 ns for charge fraction times.
pub mod ascii_file;
pub mod channel_file;
pub mod channel_record;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod event_aligner;
pub mod extract;
pub mod feature_extractor;
pub mod hdf_writer;
pub mod ingest;
pub mod pedestal;
pub mod process;
pub mod record_source;
pub mod waveform_file;
pub mod waveform_math;
pub mod worker_status;
