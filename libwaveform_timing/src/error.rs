use std::path::PathBuf;
use thiserror::Error;

use super::constants::*;
use super::worker_status::WorkerStatus;

#[derive(Debug, Error)]
pub enum ChannelFileError {
    #[error("Could not open ChannelFile because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("ChannelFile record was truncated at the current end of file (needed {0} bytes, found {1}); stream rewound")]
    Truncated(usize, usize),
    #[error("ChannelFile record declared event size {0} which does not exceed the {size} byte header", size=HEADER_BYTES)]
    BadEventSize(u32),
    #[error("ChannelFile record payload of {0} bytes is not a multiple of {size} bytes", size=SAMPLE_BYTES)]
    BadPayloadSize(u32),
    #[error("ChannelFile failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

impl ChannelFileError {
    /// Truncation at the current end of file may resolve once the digitizer finishes writing.
    /// Every other failure is structural.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Truncated(_, _))
    }
}

#[derive(Debug, Error)]
pub enum AsciiFileError {
    #[error("Could not open AsciiFile because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("AsciiFile failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RecordSourceError {
    #[error("Binary channel source failed: {0}")]
    Binary(#[from] ChannelFileError),
    #[error("ASCII channel source failed: {0}")]
    Ascii(#[from] AsciiFileError),
}

impl RecordSourceError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Binary(e) => e.is_retryable(),
            Self::Ascii(_) => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum AlignerError {
    #[error("EventAligner expected {0} channel records but was given {1}")]
    WrongChannelCount(usize, usize),
    #[error("EventAligner found inconsistent channels at event {0} (event_policy=error): {1}")]
    Inconsistent(usize, String),
    #[error("EventAligner found nsamples mismatch at event {event} (nsamples_policy=strict): {counts:?}")]
    SampleCountMismatch { event: usize, counts: Vec<usize> },
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Ingestion failed due to channel source error at event {event} ch{channel}: {source}")]
    Source {
        event: usize,
        channel: usize,
        #[source]
        source: RecordSourceError,
    },
    #[error("Ingestion failed due to EventAligner error: {0}")]
    AlignerError(#[from] AlignerError),
    #[error("Ingestion failed due to event sink error: {0}")]
    SinkError(#[from] HDF5WriterError),
    #[error("Ingestion produced no events")]
    NoEvents,
    #[error("Ingestion worker thread for ch{0} panicked")]
    WorkerPanic(usize),
    #[error("Ingestion failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Extraction found nsamples mismatch at event {event} (min {min}, max {max}) with nsamples_policy=strict")]
    SampleCountMismatch { event: i32, min: usize, max: usize },
    #[error("Extraction was given an invalid event range [{0}, {1})")]
    BadEventRange(usize, usize),
    #[error("Extraction failed due to WaveformFile error: {0}")]
    WaveformFileError(#[from] WaveformFileError),
    #[error("Extraction failed due to feature sink error: {0}")]
    SinkError(#[from] HDF5WriterError),
    #[error("Extraction worker {0} panicked")]
    WorkerPanic(usize),
    #[error("Extraction failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
}

#[derive(Debug, Error)]
pub enum HDF5WriterError {
    #[error("HDF5Writer failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("HDF5Writer failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("HDF5Writer was given a path {0:?} with no file name")]
    BadFilePath(PathBuf),
    #[error("HDF5Writer was given {1} channels for a file holding {0}")]
    ChannelCountMismatch(usize, usize),
    #[error("HDF5Writer failed to encode a string attribute: {0}")]
    StringError(#[from] hdf5::types::StringError),
}

#[derive(Debug, Error)]
pub enum WaveformFileError {
    #[error("Could not open WaveformFile because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("WaveformFile failed due to HDF5 error: {0}")]
    HDF5Error(#[from] hdf5::Error),
    #[error("WaveformFile event {0} is out of range (file holds {1} events)")]
    EventOutOfRange(usize, usize),
    #[error("WaveformFile event {0} has malformed dataset {1}")]
    MalformedEvent(usize, &'static str),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config has invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Ingest error: {0}")]
    IngestError(#[from] IngestError),
    #[error("Processor failed due to Extraction error: {0}")]
    ExtractionError(#[from] ExtractionError),
    #[error("Processor failed due to HDF5Writer error: {0}")]
    HDFError(#[from] HDF5WriterError),
    #[error("Processor failed due to WaveformFile error: {0}")]
    WaveformFileError(#[from] WaveformFileError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed to open channel {0}: {1}")]
    ChannelOpenError(usize, RecordSourceError),
    #[error("Processor failed due to IO error: {0}")]
    IoError(#[from] std::io::Error),
}
