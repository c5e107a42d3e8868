use std::ops::Range;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::Mutex;

use super::ascii_file::AsciiChannelFile;
use super::channel_file::BinaryChannelFile;
use super::config::Config;
use super::error::{ProcessorError, RecordSourceError};
use super::event_aligner::{AlignerSettings, EventAligner};
use super::extract::{extract_partitioned, resolve_event_range};
use super::feature_extractor::FeatureExtractor;
use super::hdf_writer::{FeatureWriter, WaveformWriter};
use super::ingest::{ingest_chunked, ingest_serial, IngestOptions, IngestSummary};
use super::record_source::RecordSource;
use super::waveform_file::WaveformFile;
use super::worker_status::WorkerStatus;

/// Open the record source of one channel in the configured format
fn open_channel(config: &Config, channel: usize) -> Result<Box<dyn RecordSource>, ProcessorError> {
    let path = config.get_channel_file_path(channel);
    let source: Result<Box<dyn RecordSource>, RecordSourceError> =
        if config.converter.input_is_ascii {
            match AsciiChannelFile::open(&path) {
                Ok(file) => Ok(Box::new(file)),
                Err(e) => Err(e.into()),
            }
        } else {
            match BinaryChannelFile::open(&path) {
                Ok(file) => Ok(Box::new(file)),
                Err(e) => Err(e.into()),
            }
        };
    source.map_err(|e| ProcessorError::ChannelOpenError(channel, e))
}

/// Size of every channel file, for the summary and progress
fn total_input_size(config: &Config) -> Result<u64, ProcessorError> {
    let mut total = 0;
    for channel in 0..config.n_channels {
        let path = config.get_channel_file_path(channel);
        let size = std::fs::metadata(&path)?.len();
        spdlog::info!(
            "ch{channel}: {} ({})",
            path.to_string_lossy(),
            human_bytes::human_bytes(size as f64)
        );
        total += size;
    }
    Ok(total)
}

/// Convert the raw channel files into a waveform file.
///
/// Runs serially when a single core is configured and chunked over threads otherwise.
/// Nothing is committed to the output path if ingestion fails.
pub fn process_conversion(
    config: &Config,
    tx: &Sender<WorkerStatus>,
) -> Result<IngestSummary, ProcessorError> {
    let mut sources = Vec::with_capacity(config.n_channels);
    for channel in 0..config.n_channels {
        sources.push(open_channel(config, channel)?);
    }
    let total_bytes = total_input_size(config)?;
    spdlog::info!(
        "Total input size: {}",
        human_bytes::human_bytes(total_bytes as f64)
    );

    let settings = AlignerSettings::from_config(config);
    if let Some(special) = settings.special_channel {
        spdlog::info!(
            "ch{special} reads {} and is exempt from the channelId check",
            config.converter.special_channel_file
        );
    }
    std::fs::create_dir_all(&config.output_dir)?;
    let output_path = config.get_waveforms_path();
    let mut writer = WaveformWriter::new(&output_path, &settings)?;
    let mut aligner = EventAligner::new(settings);

    let options = IngestOptions {
        event_limit: config.event_limit(),
        chunk_size: config.chunk_size,
        max_cores: config.max_cores,
        total_bytes,
    };
    let result = if config.is_parallel() {
        let sources: Vec<Mutex<Box<dyn RecordSource>>> =
            sources.into_iter().map(Mutex::new).collect();
        ingest_chunked(&sources, &mut aligner, &mut writer, &options, tx)
    } else {
        ingest_serial(&mut sources, &mut aligner, &mut writer, &options, tx)
    };

    match result {
        Ok(summary) => {
            let path = writer.close()?;
            spdlog::info!("Waveforms written to {}", path.to_string_lossy());
            Ok(summary)
        }
        Err(e) => {
            writer.abort();
            Err(e.into())
        }
    }
}

/// Extract the features of the events in a waveform file.
///
/// `range` limits the analysis to a slice of the committed events; when it is given the
/// feature file name is suffixed with the range so that several slices can be produced side by
/// side.
pub fn process_analysis(
    config: &Config,
    range: Option<Range<usize>>,
    tx: &Sender<WorkerStatus>,
) -> Result<usize, ProcessorError> {
    let input_path = config.get_waveforms_path();
    let input = WaveformFile::open(&input_path)?;
    let n_events = input.len();
    let n_channels = input.n_channels();
    spdlog::info!(
        "{} holds {n_events} events of {n_channels} channels",
        input.get_filename().to_string_lossy()
    );
    drop(input);
    if n_channels > config.n_channels {
        spdlog::warn!(
            "Waveform file has {n_channels} channels but n_channels is {}, ch{} and up use the default regions",
            config.n_channels,
            config.n_channels
        );
    }

    let output_path = match &range {
        Some(r) => ranged_path(config.get_features_path(), r),
        None => config.get_features_path(),
    };
    let range = resolve_event_range(range, n_events)?;
    let extractor =
        FeatureExtractor::new(config.region_configs(), config.analyzer.thresholds.clone());

    std::fs::create_dir_all(&config.output_dir)?;
    let mut writer = FeatureWriter::new(&output_path, n_channels, extractor.thresholds())?;
    let result = extract_partitioned(
        || Ok(WaveformFile::open(&input_path)?),
        range,
        config.analyzer.events_per_worker,
        config.max_cores,
        &extractor,
        config.nsamples_policy,
        &mut writer,
        tx,
    );

    match result {
        Ok(n_written) => {
            let path = writer.close()?;
            spdlog::info!("Features written to {}", path.to_string_lossy());
            Ok(n_written)
        }
        Err(e) => {
            writer.abort();
            Err(e.into())
        }
    }
}

/// `features.h5` with range 10..20 becomes `features_10_20.h5`
fn ranged_path(path: PathBuf, range: &Range<usize>) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let file_name = match path.extension() {
        Some(ext) => format!(
            "{stem}_{}_{}.{}",
            range.start,
            range.end,
            ext.to_string_lossy()
        ),
        None => format!("{stem}_{}_{}", range.start, range.end),
    };
    path.with_file_name(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_record::ChannelRecord;
    use crate::config::EventPolicy;
    use std::io::Write;
    use std::sync::mpsc;

    fn write_channel(path: &std::path::Path, records: &[ChannelRecord]) {
        let mut file = std::fs::File::create(path).unwrap();
        for record in records {
            file.write_all(&record.to_bytes()).unwrap();
        }
    }

    fn pulse(i: usize, n: usize) -> Vec<f32> {
        (0..n)
            .map(|s| {
                let t = s as f32 * 0.2;
                let x = (t - 30.0 - i as f32 * 0.1) / 1.5;
                1200.0 + 800.0 * (-0.5 * x * x).exp() + if s % 2 == 0 { 0.7 } else { -0.7 }
            })
            .collect()
    }

    fn test_config(dir: &std::path::Path, n_events: usize) -> Config {
        let mut config = Config::default();
        config.n_channels = 2;
        config.output_dir = dir.join("out");
        config.converter.input_dir = dir.to_path_buf();
        config.converter.enable_special_override = false;
        config.converter.pedestal_window = 50;
        config.analyzer.events_per_worker = 3;
        config.analyzer.baseline_region_min = vec![0.0; 2];
        config.analyzer.baseline_region_max = vec![15.0; 2];
        config.analyzer.signal_region_min = vec![20.0; 2];
        config.analyzer.signal_region_max = vec![60.0; 2];
        config.analyzer.charge_region_min = vec![20.0; 2];
        config.analyzer.charge_region_max = vec![60.0; 2];
        config.fill_channel_defaults();
        for ch in 0..2u32 {
            let records: Vec<ChannelRecord> = (0..n_events)
                .map(|i| ChannelRecord::from_samples(0, ch, i as u32, pulse(i, 400)))
                .collect();
            write_channel(&config.get_channel_file_path(ch as usize), &records);
        }
        config
    }

    #[test]
    fn test_ranged_path() {
        assert_eq!(
            ranged_path(PathBuf::from("out/features.h5"), &(10..20)),
            PathBuf::from("out/features_10_20.h5")
        );
    }

    #[test]
    fn test_convert_then_analyze() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), 8);
        let (tx, _rx) = mpsc::channel();

        config.max_cores = 1;
        let summary = process_conversion(&config, &tx).unwrap();
        assert_eq!(summary.n_written, 8);
        assert!(config.get_waveforms_path().exists());

        config.max_cores = 2;
        let n = process_analysis(&config, None, &tx).unwrap();
        assert_eq!(n, 8);
        assert!(config.get_features_path().exists());

        let n = process_analysis(&config, Some(2..5), &tx).unwrap();
        assert_eq!(n, 3);
        assert!(config.output_dir.join("waveforms_analyzed_2_5.h5").exists());
        assert!(process_analysis(&config, Some(5..50), &tx).is_err());
    }

    #[test]
    fn test_chunked_conversion() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), 7);
        config.max_cores = 4;
        config.chunk_size = 3;
        let (tx, _rx) = mpsc::channel();
        let summary = process_conversion(&config, &tx).unwrap();
        assert_eq!(summary.n_written, 7);
        let file = WaveformFile::open(&config.get_waveforms_path()).unwrap();
        assert_eq!(file.len(), 7);
        assert_eq!(file.get_event(6).unwrap().channels[1].event_counter, 6);
    }

    #[test]
    fn test_failed_conversion_commits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path(), 5);
        config.max_cores = 1;
        config.converter.event_policy = EventPolicy::Error;
        // swap the counters of two records on ch1
        let records: Vec<ChannelRecord> = (0..5u32)
            .map(|i| {
                let counter = match i {
                    1 => 2,
                    2 => 1,
                    _ => i,
                };
                ChannelRecord::from_samples(0, 1, counter, pulse(i as usize, 400))
            })
            .collect();
        write_channel(&config.get_channel_file_path(1), &records);

        let (tx, _rx) = mpsc::channel();
        assert!(process_conversion(&config, &tx).is_err());
        assert!(!config.get_waveforms_path().exists());
        assert!(!config.output_dir.join("waveforms.h5.tmp").exists());
    }

    #[test]
    fn test_missing_channel_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), 2);
        std::fs::remove_file(config.get_channel_file_path(1)).unwrap();
        let (tx, _rx) = mpsc::channel();
        assert!(matches!(
            process_conversion(&config, &tx),
            Err(ProcessorError::ChannelOpenError(1, _))
        ));
    }
}
