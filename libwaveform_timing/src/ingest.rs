use bitvec::prelude::*;
use std::sync::mpsc::Sender;
use std::sync::Mutex;

use super::channel_record::ChannelRecord;
use super::error::{HDF5WriterError, IngestError, RecordSourceError};
use super::event::SynchronizedEvent;
use super::event_aligner::{AlignOutcome, EventAligner};
use super::record_source::RecordSource;
use super::worker_status::{Stage, WorkerStatus};

/// Progress is reported in steps of this fraction of the input size
const FLUSH_FRAC: f32 = 0.01;

/// Destination of accepted events
pub trait EventSink {
    fn write_event(&mut self, event: &SynchronizedEvent) -> Result<(), HDF5WriterError>;
}

impl EventSink for Vec<SynchronizedEvent> {
    fn write_event(&mut self, event: &SynchronizedEvent) -> Result<(), HDF5WriterError> {
        self.push(event.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Stop after this many triggers
    pub event_limit: Option<usize>,
    /// Records read per channel per round (chunked mode)
    pub chunk_size: usize,
    pub max_cores: usize,
    /// Total size of the inputs, only used for progress
    pub total_bytes: u64,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            event_limit: None,
            chunk_size: 100,
            max_cores: 1,
            total_bytes: 0,
        }
    }
}

/// What happened during an ingestion
#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub n_triggers: usize,
    pub n_written: usize,
    pub n_skipped: usize,
    /// Channels whose stream ended
    pub eof: BitVec,
}

/// Sends a WorkerStatus whenever another FLUSH_FRAC of the input was consumed
struct ProgressTracker<'a> {
    tx: &'a Sender<WorkerStatus>,
    count: u64,
    flush_val: u64,
    progress: f32,
}

impl<'a> ProgressTracker<'a> {
    fn new(tx: &'a Sender<WorkerStatus>, total_bytes: u64) -> Result<Self, IngestError> {
        tx.send(WorkerStatus::new(0.0, Stage::Ingest, 0))?;
        Ok(Self {
            tx,
            count: 0,
            flush_val: (total_bytes as f64 * FLUSH_FRAC as f64) as u64,
            progress: 0.0,
        })
    }

    fn add(&mut self, records: &[ChannelRecord]) -> Result<(), IngestError> {
        self.count += records
            .iter()
            .map(|r| r.header.event_size as u64)
            .sum::<u64>();
        if self.flush_val > 0 && self.count > self.flush_val {
            self.count = 0;
            self.progress = (self.progress + FLUSH_FRAC).min(1.0);
            self.tx
                .send(WorkerStatus::new(self.progress, Stage::Ingest, 0))?;
        }
        Ok(())
    }

    fn finish(self) -> Result<(), IngestError> {
        self.tx.send(WorkerStatus::new(1.0, Stage::Ingest, 0))?;
        Ok(())
    }
}

fn limit_reached(aligner: &EventAligner, options: &IngestOptions) -> bool {
    match options.event_limit {
        Some(limit) if aligner.n_triggers() >= limit => {
            spdlog::info!("Reached max_events={limit}, stopping ingestion");
            true
        }
        _ => false,
    }
}

fn report_eof(event: usize, eof: &BitSlice) {
    let status: Vec<String> = eof
        .iter()
        .enumerate()
        .map(|(ch, flag)| format!("ch{ch}={}", if *flag { "EOF" } else { "ok" }))
        .collect();
    spdlog::info!(
        "Channel stream ended before event {event}, stopping: {}",
        status.join(" ")
    );
}

/// Hand one trigger to the aligner and the accepted event to the sink
fn align_and_write(
    records: Vec<ChannelRecord>,
    aligner: &mut EventAligner,
    sink: &mut dyn EventSink,
) -> Result<bool, IngestError> {
    match aligner.align(records)? {
        AlignOutcome::Accepted(event) => {
            sink.write_event(&event)?;
            Ok(true)
        }
        AlignOutcome::Skipped(_) => Ok(false),
    }
}

fn finish_summary(
    aligner: &EventAligner,
    n_written: usize,
    eof: BitVec,
) -> Result<IngestSummary, IngestError> {
    spdlog::info!(
        "Ingested {} triggers: {} written, {} skipped",
        aligner.n_triggers(),
        n_written,
        aligner.n_skipped()
    );
    if n_written == 0 {
        return Err(IngestError::NoEvents);
    }
    Ok(IngestSummary {
        n_triggers: aligner.n_triggers(),
        n_written,
        n_skipped: aligner.n_skipped(),
        eof,
    })
}

/// Read one record per channel per trigger until any channel runs out.
///
/// A record cut short at the end of a stream counts as the end of that stream. Any other
/// read failure aborts with the event index and channel.
pub fn ingest_serial(
    sources: &mut [Box<dyn RecordSource>],
    aligner: &mut EventAligner,
    sink: &mut dyn EventSink,
    options: &IngestOptions,
    tx: &Sender<WorkerStatus>,
) -> Result<IngestSummary, IngestError> {
    let n_channels = sources.len();
    let mut eof = bitvec![0; n_channels];
    let mut progress = ProgressTracker::new(tx, options.total_bytes)?;
    let mut n_written = 0;

    loop {
        if limit_reached(aligner, options) {
            break;
        }
        let event = aligner.n_triggers();
        let mut records = Vec::with_capacity(n_channels);
        for (channel, source) in sources.iter_mut().enumerate() {
            match source.next_record() {
                Ok(Some(record)) => records.push(record),
                Ok(None) => eof.set(channel, true),
                Err(e) if e.is_retryable() => {
                    spdlog::warn!("ch{channel} ends inside a record at event {event}: {e}");
                    eof.set(channel, true);
                }
                Err(source) => {
                    spdlog::error!("Failed to read ch{channel} at event {event}: {source}");
                    return Err(IngestError::Source {
                        event,
                        channel,
                        source,
                    });
                }
            }
        }
        if eof.any() {
            report_eof(event, &eof);
            break;
        }

        progress.add(&records)?;
        if align_and_write(records, aligner, sink)? {
            n_written += 1;
        }
    }

    progress.finish()?;
    finish_summary(aligner, n_written, eof)
}

type ChunkResult = Result<(Vec<ChannelRecord>, bool), RecordSourceError>;

fn read_channel_chunk(source: &Mutex<Box<dyn RecordSource>>, chunk_size: usize) -> ChunkResult {
    // A panicked reader has already failed the run, the guard content is still usable
    let mut guard = source.lock().unwrap_or_else(|e| e.into_inner());
    guard.read_chunk(chunk_size)
}

/// Read chunks of records from every channel on a bounded set of threads, then align them.
///
/// Each round reads up to chunk_size records per channel, with at most
/// min(max_cores, n_channels) reader threads alive at once. The round joins all readers
/// before the single threaded alignment. Only the smallest record count of the round is
/// aligned; the trailing records of longer channels are dropped with a warning.
pub fn ingest_chunked(
    sources: &[Mutex<Box<dyn RecordSource>>],
    aligner: &mut EventAligner,
    sink: &mut dyn EventSink,
    options: &IngestOptions,
    tx: &Sender<WorkerStatus>,
) -> Result<IngestSummary, IngestError> {
    let n_channels = sources.len();
    let max_threads = options.max_cores.min(n_channels).max(1);
    let mut eof = bitvec![0; n_channels];
    let mut progress = ProgressTracker::new(tx, options.total_bytes)?;
    let mut n_written = 0;
    spdlog::info!(
        "Chunked ingestion with {max_threads} reader threads, chunk size {}",
        options.chunk_size
    );

    'rounds: loop {
        let mut chunks: Vec<Vec<ChannelRecord>> = vec![Vec::new(); n_channels];
        for batch_start in (0..n_channels).step_by(max_threads) {
            let batch: Vec<usize> = (batch_start..(batch_start + max_threads).min(n_channels))
                .filter(|ch| !eof[*ch])
                .collect();
            let results: Vec<(usize, std::thread::Result<ChunkResult>)> =
                std::thread::scope(|s| {
                    let handles: Vec<_> = batch
                        .iter()
                        .map(|ch| {
                            let source = &sources[*ch];
                            let chunk_size = options.chunk_size;
                            (*ch, s.spawn(move || read_channel_chunk(source, chunk_size)))
                        })
                        .collect();
                    handles
                        .into_iter()
                        .map(|(ch, handle)| (ch, handle.join()))
                        .collect()
                });

            for (channel, result) in results {
                match result {
                    Ok(Ok((records, at_eof))) => {
                        chunks[channel] = records;
                        if at_eof {
                            eof.set(channel, true);
                        }
                    }
                    Ok(Err(source)) => {
                        let event = aligner.n_triggers();
                        spdlog::error!("Failed to read ch{channel} chunk at event {event}: {source}");
                        return Err(IngestError::Source {
                            event,
                            channel,
                            source,
                        });
                    }
                    Err(_) => return Err(IngestError::WorkerPanic(channel)),
                }
            }
        }

        if eof.all() && chunks.iter().all(|c| c.is_empty()) {
            report_eof(aligner.n_triggers(), &eof);
            break;
        }

        let counts: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        let n_events = counts.iter().copied().min().unwrap_or(0);
        if counts.iter().any(|c| *c != n_events) {
            let status: Vec<String> = counts
                .iter()
                .enumerate()
                .map(|(ch, n)| format!("ch{ch}={n}{}", if eof[ch] { "(EOF)" } else { "" }))
                .collect();
            spdlog::warn!(
                "Channel chunk sizes differ, aligning {n_events} events and dropping the rest: {}",
                status.join(" ")
            );
        }
        if n_events == 0 {
            report_eof(aligner.n_triggers(), &eof);
            break;
        }

        let mut iters: Vec<_> = chunks.into_iter().map(|c| c.into_iter()).collect();
        for _ in 0..n_events {
            if limit_reached(aligner, options) {
                break 'rounds;
            }
            let records: Vec<ChannelRecord> = iters.iter_mut().filter_map(|it| it.next()).collect();
            progress.add(&records)?;
            if align_and_write(records, aligner, sink)? {
                n_written += 1;
            }
        }
    }

    progress.finish()?;
    finish_summary(aligner, n_written, eof)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EventPolicy, NsamplesPolicy};
    use crate::event_aligner::AlignerSettings;
    use std::sync::mpsc;

    fn aligner(n_channels: usize, event_policy: EventPolicy) -> EventAligner {
        EventAligner::new(AlignerSettings {
            n_channels,
            event_policy,
            nsamples_policy: NsamplesPolicy::Strict,
            special_channel: None,
            pedestal_window: 4,
            ped_target: 3500.0,
            tsample_ns: 0.2,
        })
    }

    fn channel_stream(channel: u32, n_events: u32) -> Vec<ChannelRecord> {
        (0..n_events)
            .map(|i| ChannelRecord::from_samples(1, channel, i, vec![10.0 + i as f32; 8]))
            .collect()
    }

    fn boxed(streams: Vec<Vec<ChannelRecord>>) -> Vec<Box<dyn RecordSource>> {
        streams
            .into_iter()
            .map(|s| Box::new(s.into_iter()) as Box<dyn RecordSource>)
            .collect()
    }

    /// Two channels of five triggers, with the counters of triggers 2 and 3 swapped on ch1
    fn transposed_streams() -> Vec<Vec<ChannelRecord>> {
        let ch0 = channel_stream(0, 5);
        let mut ch1 = channel_stream(1, 5);
        ch1[2].header.event_counter = 3;
        ch1[3].header.event_counter = 2;
        vec![ch0, ch1]
    }

    #[test]
    fn test_serial_stops_at_shortest_channel() {
        let (tx, _rx) = mpsc::channel();
        let mut sources = boxed(vec![channel_stream(0, 4), channel_stream(1, 3)]);
        let mut aligner = aligner(2, EventPolicy::Error);
        let mut sink: Vec<SynchronizedEvent> = Vec::new();
        let summary = ingest_serial(
            &mut sources,
            &mut aligner,
            &mut sink,
            &IngestOptions::default(),
            &tx,
        )
        .unwrap();
        assert_eq!(summary.n_written, 3);
        assert_eq!(sink.len(), 3);
        assert!(!summary.eof[0]);
        assert!(summary.eof[1]);
    }

    #[test]
    fn test_transposed_counter_under_error_commits_nothing() {
        let (tx, _rx) = mpsc::channel();
        let mut sources = boxed(transposed_streams());
        let mut aligner = aligner(2, EventPolicy::Error);
        // A sink which is only kept on success, like the HDF5 writer's temporary file
        let mut sink: Vec<SynchronizedEvent> = Vec::new();
        let result = ingest_serial(
            &mut sources,
            &mut aligner,
            &mut sink,
            &IngestOptions::default(),
            &tx,
        );
        assert!(matches!(
            result,
            Err(IngestError::AlignerError(
                crate::error::AlignerError::Inconsistent(2, _)
            ))
        ));
    }

    #[test]
    fn test_transposed_counter_under_skip() {
        let (tx, _rx) = mpsc::channel();
        let mut sources = boxed(vec![channel_stream(0, 5), {
            let mut ch1 = channel_stream(1, 5);
            ch1[2].header.event_counter = 9;
            ch1
        }]);
        let mut aligner = aligner(2, EventPolicy::Skip);
        let mut sink: Vec<SynchronizedEvent> = Vec::new();
        let summary = ingest_serial(
            &mut sources,
            &mut aligner,
            &mut sink,
            &IngestOptions::default(),
            &tx,
        )
        .unwrap();
        assert_eq!(summary.n_written, 4);
        assert_eq!(summary.n_skipped, 1);
        let indices: Vec<i32> = sink.iter().map(|e| e.event_index).collect();
        assert_eq!(indices, vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_max_events_limit() {
        let (tx, _rx) = mpsc::channel();
        let mut sources = boxed(vec![channel_stream(0, 6), channel_stream(1, 6)]);
        let mut aligner = aligner(2, EventPolicy::Error);
        let mut sink: Vec<SynchronizedEvent> = Vec::new();
        let options = IngestOptions {
            event_limit: Some(2),
            ..Default::default()
        };
        let summary = ingest_serial(&mut sources, &mut aligner, &mut sink, &options, &tx).unwrap();
        assert_eq!(summary.n_written, 2);
    }

    #[test]
    fn test_no_events_is_an_error() {
        let (tx, _rx) = mpsc::channel();
        let mut sources = boxed(vec![Vec::new(), channel_stream(1, 2)]);
        let mut aligner = aligner(2, EventPolicy::Error);
        let mut sink: Vec<SynchronizedEvent> = Vec::new();
        let result = ingest_serial(
            &mut sources,
            &mut aligner,
            &mut sink,
            &IngestOptions::default(),
            &tx,
        );
        assert!(matches!(result, Err(IngestError::NoEvents)));
    }

    #[test]
    fn test_chunked_matches_serial_order() {
        let (tx, _rx) = mpsc::channel();
        let sources: Vec<Mutex<Box<dyn RecordSource>>> = boxed(vec![
            channel_stream(0, 7),
            channel_stream(1, 7),
            channel_stream(2, 7),
        ])
        .into_iter()
        .map(Mutex::new)
        .collect();
        let mut aligner = aligner(3, EventPolicy::Error);
        let mut sink: Vec<SynchronizedEvent> = Vec::new();
        let options = IngestOptions {
            chunk_size: 3,
            max_cores: 2,
            ..Default::default()
        };
        let summary = ingest_chunked(&sources, &mut aligner, &mut sink, &options, &tx).unwrap();
        assert_eq!(summary.n_written, 7);
        let counters: Vec<u32> = sink.iter().map(|e| e.channels[2].event_counter).collect();
        assert_eq!(counters, (0..7).collect::<Vec<u32>>());
        assert!(summary.eof.all());
    }

    #[test]
    fn test_chunked_drops_to_minimum_count() {
        let (tx, _rx) = mpsc::channel();
        // ch1 ends after 4 records, the second chunk only aligns one event
        let sources: Vec<Mutex<Box<dyn RecordSource>>> =
            boxed(vec![channel_stream(0, 6), channel_stream(1, 4)])
                .into_iter()
                .map(Mutex::new)
                .collect();
        let mut aligner = aligner(2, EventPolicy::Error);
        let mut sink: Vec<SynchronizedEvent> = Vec::new();
        let options = IngestOptions {
            chunk_size: 3,
            max_cores: 4,
            ..Default::default()
        };
        let summary = ingest_chunked(&sources, &mut aligner, &mut sink, &options, &tx).unwrap();
        assert_eq!(summary.n_written, 4);
        assert!(summary.eof[1]);
    }

    #[test]
    fn test_chunked_skip_policy() {
        let (tx, _rx) = mpsc::channel();
        let sources: Vec<Mutex<Box<dyn RecordSource>>> = boxed(transposed_streams())
            .into_iter()
            .map(Mutex::new)
            .collect();
        let mut aligner = aligner(2, EventPolicy::Skip);
        let mut sink: Vec<SynchronizedEvent> = Vec::new();
        let options = IngestOptions {
            chunk_size: 2,
            max_cores: 2,
            ..Default::default()
        };
        let summary = ingest_chunked(&sources, &mut aligner, &mut sink, &options, &tx).unwrap();
        assert_eq!(summary.n_written, 3);
        assert_eq!(summary.n_skipped, 2);
    }
}
