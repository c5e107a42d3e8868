use super::channel_record::ChannelRecord;
use super::config::{Config, EventPolicy, NsamplesPolicy};
use super::constants::CONSISTENCY_WARN_LIMIT;
use super::error::AlignerError;
use super::event::{ChannelWaveform, SynchronizedEvent};
use super::pedestal::correct_channel;

/// Ingestion settings the aligner needs, resolved from the Config once
#[derive(Debug, Clone)]
pub struct AlignerSettings {
    pub n_channels: usize,
    pub event_policy: EventPolicy,
    pub nsamples_policy: NsamplesPolicy,
    pub special_channel: Option<usize>,
    pub pedestal_window: usize,
    pub ped_target: f32,
    pub tsample_ns: f32,
}

impl AlignerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            n_channels: config.n_channels,
            event_policy: config.converter.event_policy,
            nsamples_policy: config.nsamples_policy,
            special_channel: config.special_override_channel(),
            pedestal_window: config.converter.pedestal_window,
            ped_target: config.converter.ped_target,
            tsample_ns: config.converter.tsample_ns,
        }
    }
}

/// Log suppression state of one aligner.
///
/// Counts the rate-limited consistency warnings and remembers which one-shot notices were
/// already printed.
#[derive(Debug, Default, Clone)]
pub struct ConsistencyLog {
    warnings_emitted: usize,
    suppressed: bool,
    special_noted: bool,
    padding_noted: bool,
    skip_noted: bool,
}

impl ConsistencyLog {
    /// Emit a consistency warning unless the limit was reached
    pub fn warn(&mut self, message: &str) {
        if self.warnings_emitted < CONSISTENCY_WARN_LIMIT {
            spdlog::warn!("{message}");
            self.warnings_emitted += 1;
        } else if !self.suppressed {
            spdlog::warn!("further consistency warnings suppressed");
            self.suppressed = true;
        }
    }

    pub fn note_special_channel(&mut self, channel: usize) {
        if !self.special_noted {
            spdlog::info!(
                "Special channel ch{channel} allows channelId mismatch (enable_special_override)"
            );
            self.special_noted = true;
        }
    }

    pub fn note_padding(&mut self, event: usize, n_samples: usize) {
        if !self.padding_noted {
            spdlog::info!(
                "nsamples_policy=pad: padding shorter channels to {n_samples} samples (first at event {event})"
            );
            self.padding_noted = true;
        }
    }

    pub fn note_skipping(&mut self) {
        if !self.skip_noted {
            spdlog::info!("Skipping inconsistent events per event_policy=skip");
            self.skip_noted = true;
        }
    }

    pub fn warnings_emitted(&self) -> usize {
        self.warnings_emitted
    }

    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }
}

/// Result of aligning one trigger
#[derive(Debug, Clone, PartialEq)]
pub enum AlignOutcome {
    Accepted(SynchronizedEvent),
    /// Dropped under event_policy=skip, holding the trigger index
    Skipped(usize),
}

/// EventAligner takes one ChannelRecord per channel and composes them into a
/// SynchronizedEvent.
///
/// Records are aligned by their position in the channel streams. The aligner verifies that
/// the headers agree (eventCounter, boardId, and channelId against the channel index) and
/// resolves violations according to the event_policy. Sample count differences are resolved
/// with the nsamples_policy. Triggers are numbered in stream order, so a skipped trigger still
/// consumes its index.
#[derive(Debug)]
pub struct EventAligner {
    settings: AlignerSettings,
    log: ConsistencyLog,
    n_triggers: usize,
    n_accepted: usize,
    n_skipped: usize,
}

impl EventAligner {
    pub fn new(settings: AlignerSettings) -> Self {
        Self {
            settings,
            log: ConsistencyLog::default(),
            n_triggers: 0,
            n_accepted: 0,
            n_skipped: 0,
        }
    }

    /// Align the records of the next trigger.
    ///
    /// `records` must hold exactly one record per channel, in channel order.
    pub fn align(&mut self, records: Vec<ChannelRecord>) -> Result<AlignOutcome, AlignerError> {
        if records.is_empty() || records.len() != self.settings.n_channels {
            return Err(AlignerError::WrongChannelCount(
                self.settings.n_channels,
                records.len(),
            ));
        }
        let event = self.n_triggers;
        self.n_triggers += 1;

        self.check_event_sizes(event, &records);

        let issues = self.consistency_issues(event, &records);
        let mut skip = false;
        if !issues.is_empty() {
            match self.settings.event_policy {
                EventPolicy::Error => {
                    for issue in issues.iter() {
                        spdlog::error!("{issue}");
                    }
                    return Err(AlignerError::Inconsistent(event, issues.join("; ")));
                }
                EventPolicy::Warn => {
                    for issue in issues.iter() {
                        self.log.warn(issue);
                    }
                }
                EventPolicy::Skip => {
                    self.log.note_skipping();
                    for issue in issues.iter() {
                        self.log.warn(issue);
                    }
                    skip = true;
                }
            }
        }

        let counts: Vec<usize> = records.iter().map(|r| r.n_samples()).collect();
        let n_max = counts.iter().copied().max().unwrap_or(0);
        let n_min = counts.iter().copied().min().unwrap_or(0);
        if n_min != n_max {
            match self.settings.nsamples_policy {
                NsamplesPolicy::Strict => {
                    spdlog::error!(
                        "nsamples mismatch at event {event} (min {n_min}, max {n_max}); rerun with nsamples_policy=pad to pad shorter channels"
                    );
                    return Err(AlignerError::SampleCountMismatch { event, counts });
                }
                NsamplesPolicy::Pad => self.log.note_padding(event, n_max),
            }
        }

        if skip {
            self.n_skipped += 1;
            return Ok(AlignOutcome::Skipped(event));
        }

        self.n_accepted += 1;
        Ok(AlignOutcome::Accepted(self.build_event(
            event,
            records,
            counts,
            n_max,
        )))
    }

    /// Event size differences are only informative, the sample count check handles them
    fn check_event_sizes(&self, event: usize, records: &[ChannelRecord]) {
        let reference = records[0].header.event_size;
        for (ch, record) in records.iter().enumerate().skip(1) {
            if record.header.event_size != reference {
                spdlog::warn!(
                    "Event size mismatch at event {event}: ch{ch}={} ch0={reference}",
                    record.header.event_size
                );
            }
        }
    }

    fn consistency_issues(&mut self, event: usize, records: &[ChannelRecord]) -> Vec<String> {
        let reference = &records[0].header;
        let mut issues = Vec::new();
        for (ch, record) in records.iter().enumerate() {
            let header = &record.header;
            if ch > 0 && header.event_counter != reference.event_counter {
                issues.push(format!(
                    "Event counter mismatch at event {event}: ch{ch}={} ch0={}",
                    header.event_counter, reference.event_counter
                ));
            }
            if ch > 0 && header.board_id != reference.board_id {
                issues.push(format!(
                    "Board ID mismatch at event {event}: ch{ch}={} ch0={}",
                    header.board_id, reference.board_id
                ));
            }
            if header.channel_id as usize != ch {
                if self.settings.special_channel == Some(ch) {
                    self.log.note_special_channel(ch);
                } else {
                    issues.push(format!(
                        "Channel ID mismatch at event {event}: ch{ch} header reports {}",
                        header.channel_id
                    ));
                }
            }
        }
        issues
    }

    fn build_event(
        &self,
        event: usize,
        records: Vec<ChannelRecord>,
        counts: Vec<usize>,
        n_samples: usize,
    ) -> SynchronizedEvent {
        let time_axis = (0..n_samples)
            .map(|i| i as f32 * self.settings.tsample_ns)
            .collect();
        let channels = records
            .into_iter()
            .map(|record| {
                let corrected = correct_channel(
                    record.samples,
                    n_samples,
                    self.settings.pedestal_window,
                    self.settings.ped_target,
                );
                ChannelWaveform {
                    pedestal: corrected.pedestal,
                    board_id: record.header.board_id,
                    channel_id: record.header.channel_id,
                    event_counter: record.header.event_counter,
                    raw: corrected.raw,
                    corrected: corrected.corrected,
                }
            })
            .collect();
        SynchronizedEvent {
            event_index: event as i32,
            effective_sample_counts: counts,
            time_axis,
            channels,
        }
    }

    pub fn log(&self) -> &ConsistencyLog {
        &self.log
    }

    /// Number of triggers seen, accepted or not
    pub fn n_triggers(&self) -> usize {
        self.n_triggers
    }

    pub fn n_accepted(&self) -> usize {
        self.n_accepted
    }

    pub fn n_skipped(&self) -> usize {
        self.n_skipped
    }
}
