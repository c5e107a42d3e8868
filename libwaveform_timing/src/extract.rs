use std::ops::Range;
use std::sync::mpsc::Sender;

use super::config::NsamplesPolicy;
use super::error::{ExtractionError, HDF5WriterError, WaveformFileError};
use super::event::SynchronizedEvent;
use super::feature_extractor::{FeatureExtractor, WaveformFeatures};
use super::worker_status::{Stage, WorkerStatus};

/// Features of every channel of one event
#[derive(Debug, Clone, PartialEq)]
pub struct EventFeatures {
    pub event_index: i32,
    pub channels: Vec<WaveformFeatures>,
}

/// Random access to committed events
pub trait EventProvider {
    fn n_events(&self) -> usize;
    fn get_event(&self, index: usize) -> Result<SynchronizedEvent, WaveformFileError>;
}

impl EventProvider for [SynchronizedEvent] {
    fn n_events(&self) -> usize {
        self.len()
    }

    fn get_event(&self, index: usize) -> Result<SynchronizedEvent, WaveformFileError> {
        self.get(index)
            .cloned()
            .ok_or(WaveformFileError::EventOutOfRange(index, self.len()))
    }
}

impl<T: EventProvider + ?Sized> EventProvider for &T {
    fn n_events(&self) -> usize {
        (**self).n_events()
    }

    fn get_event(&self, index: usize) -> Result<SynchronizedEvent, WaveformFileError> {
        (**self).get_event(index)
    }
}

/// Destination of event features, in event order
pub trait FeatureSink {
    fn write_features(&mut self, features: &EventFeatures) -> Result<(), HDF5WriterError>;
}

impl FeatureSink for Vec<EventFeatures> {
    fn write_features(&mut self, features: &EventFeatures) -> Result<(), HDF5WriterError> {
        self.push(features.clone());
        Ok(())
    }
}

/// Analyze every channel of an event on its effective samples.
///
/// Under the strict policy all channels holding samples must agree on their count.
pub fn analyze_event(
    event: &SynchronizedEvent,
    extractor: &FeatureExtractor,
    policy: NsamplesPolicy,
) -> Result<EventFeatures, ExtractionError> {
    let views: Vec<(&[f32], &[f32])> = (0..event.n_channels())
        .map(|ch| event.effective_view(ch))
        .collect();

    if policy == NsamplesPolicy::Strict {
        let counts = views.iter().map(|(amp, _)| amp.len()).filter(|n| *n > 0);
        let min = counts.clone().min().unwrap_or(0);
        let max = counts.max().unwrap_or(0);
        if min != max {
            return Err(ExtractionError::SampleCountMismatch {
                event: event.event_index,
                min,
                max,
            });
        }
    }

    let channels = views
        .into_iter()
        .enumerate()
        .map(|(ch, (amp, time))| extractor.analyze_channel(amp, time, ch))
        .collect();
    Ok(EventFeatures {
        event_index: event.event_index,
        channels,
    })
}

/// Divide an event range into contiguous sub-ranges of at most `events_per_worker` events
pub fn create_subranges(range: Range<usize>, events_per_worker: usize) -> Vec<Range<usize>> {
    let step = events_per_worker.max(1);
    range
        .clone()
        .step_by(step)
        .map(|start| start..(start + step).min(range.end))
        .collect()
}

/// Check a requested range against the number of stored events. None selects all events.
pub fn resolve_event_range(
    requested: Option<Range<usize>>,
    n_events: usize,
) -> Result<Range<usize>, ExtractionError> {
    let range = requested.unwrap_or(0..n_events);
    if range.start >= range.end || range.end > n_events {
        return Err(ExtractionError::BadEventRange(range.start, range.end));
    }
    Ok(range)
}

/// Work through one sub-range with a private event source
fn process_subrange<S: EventProvider>(
    source: &S,
    subrange: Range<usize>,
    extractor: &FeatureExtractor,
    policy: NsamplesPolicy,
    tx: &Sender<WorkerStatus>,
    worker_id: usize,
) -> Result<Vec<EventFeatures>, ExtractionError> {
    let total = subrange.len();
    let flush_every = (total / 100).max(1);
    let mut results = Vec::with_capacity(total);
    tx.send(WorkerStatus::new(0.0, Stage::Extract, worker_id))?;
    for (done, index) in subrange.enumerate() {
        let event = source.get_event(index)?;
        results.push(analyze_event(&event, extractor, policy)?);
        if (done + 1) % flush_every == 0 {
            tx.send(WorkerStatus::new(
                (done + 1) as f32 / total as f32,
                Stage::Extract,
                worker_id,
            ))?;
        }
    }
    tx.send(WorkerStatus::new(1.0, Stage::Extract, worker_id))?;
    Ok(results)
}

/// Run extraction over `range`, split into sub-ranges processed by independent workers.
///
/// Every worker opens its own event source through `open_source` and returns its features to
/// the caller; nothing is shared between workers. At most `max_workers` run at once, and the
/// results of each round are written to the sink strictly in event order. Any worker failure
/// fails the whole run.
#[allow(clippy::too_many_arguments)]
pub fn extract_partitioned<S, F>(
    open_source: F,
    range: Range<usize>,
    events_per_worker: usize,
    max_workers: usize,
    extractor: &FeatureExtractor,
    policy: NsamplesPolicy,
    sink: &mut dyn FeatureSink,
    tx: &Sender<WorkerStatus>,
) -> Result<usize, ExtractionError>
where
    S: EventProvider,
    F: Fn() -> Result<S, ExtractionError> + Sync,
{
    let subranges = create_subranges(range, events_per_worker);
    let max_workers = max_workers.max(1);
    spdlog::info!(
        "Extracting with {} sub-ranges of up to {} events, {} at a time",
        subranges.len(),
        events_per_worker.max(1),
        max_workers.min(subranges.len())
    );

    let mut n_written = 0;
    for (round, batch) in subranges.chunks(max_workers).enumerate() {
        let results: Vec<std::thread::Result<Result<Vec<EventFeatures>, ExtractionError>>> =
            std::thread::scope(|s| {
                let handles: Vec<_> = batch
                    .iter()
                    .enumerate()
                    .map(|(worker_id, subrange)| {
                        let open_source = &open_source;
                        let tx = tx.clone();
                        let subrange = subrange.clone();
                        s.spawn(move || {
                            let source = open_source()?;
                            process_subrange(&source, subrange, extractor, policy, &tx, worker_id)
                        })
                    })
                    .collect();
                handles.into_iter().map(|h| h.join()).collect()
            });

        for (worker_id, result) in results.into_iter().enumerate() {
            let features = match result {
                Ok(r) => r?,
                Err(_) => return Err(ExtractionError::WorkerPanic(round * max_workers + worker_id)),
            };
            for event in features.iter() {
                sink.write_features(event)?;
            }
            n_written += features.len();
        }
    }
    spdlog::info!("Extracted features of {n_written} events");
    Ok(n_written)
}
