use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use super::channel_record::{ChannelHeader, ChannelRecord};
use super::constants::HEADER_BYTES;
use super::error::{ChannelFileError, RecordSourceError};
use super::record_source::RecordSource;

/// Read until the buffer is full or the stream ends. Returns the number of bytes read.
fn read_up_to<R: Read>(reader: &mut R, buffer: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// A single channel's binary digitizer stream.
///
/// Each record is an 8 word little-endian header followed by `event_size - 32` bytes of
/// little-endian f32 samples. A record cut short by the current end of the stream rewinds
/// the stream to the start of that record, so a caller following a file that is still being
/// written can retry on the next poll.
#[derive(Debug)]
pub struct BinaryChannelFile<R: Read + Seek> {
    reader: R,
    /// Known end of the stream, refreshed when a record claims to reach past it
    size_bytes: u64,
    records_read: u64,
}

impl BinaryChannelFile<BufReader<File>> {
    /// Open the channel file at path
    pub fn open(path: &Path) -> Result<Self, ChannelFileError> {
        if !path.exists() {
            return Err(ChannelFileError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let size_bytes = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            size_bytes,
            records_read: 0,
        })
    }
}

impl<R: Read + Seek> BinaryChannelFile<R> {
    /// Wrap an already open stream (used for in-memory data)
    pub fn from_reader(reader: R, size_bytes: u64) -> Self {
        Self {
            reader,
            size_bytes,
            records_read: 0,
        }
    }

    /// Decode the next record.
    ///
    /// Returns `Ok(None)` on a clean end of stream, `Err(Truncated)` (retryable) if the stream
    /// ends inside a record, and a fatal error for a malformed header.
    pub fn get_next_record(&mut self) -> Result<Option<ChannelRecord>, ChannelFileError> {
        let record_start = self.reader.stream_position()?;

        let mut header_buffer = [0u8; HEADER_BYTES];
        let n_header = read_up_to(&mut self.reader, &mut header_buffer)?;
        if n_header == 0 {
            return Ok(None);
        } else if n_header < HEADER_BYTES {
            self.reader.seek(SeekFrom::Start(record_start))?;
            return Err(ChannelFileError::Truncated(HEADER_BYTES, n_header));
        }

        let header = ChannelHeader::decode(&header_buffer);
        let payload_bytes = header.payload_bytes()?;

        // check the declared size against the stream before allocating for it
        let payload_start = record_start + HEADER_BYTES as u64;
        let payload_end = payload_start + payload_bytes as u64;
        if payload_end > self.size_bytes {
            self.size_bytes = self.reader.seek(SeekFrom::End(0))?;
            if payload_end > self.size_bytes {
                self.reader.seek(SeekFrom::Start(record_start))?;
                let available = self.size_bytes.saturating_sub(payload_start) as usize;
                return Err(ChannelFileError::Truncated(payload_bytes, available));
            }
            self.reader.seek(SeekFrom::Start(payload_start))?;
        }

        let mut payload = vec![0u8; payload_bytes];
        let n_payload = read_up_to(&mut self.reader, &mut payload)?;
        if n_payload < payload_bytes {
            self.reader.seek(SeekFrom::Start(record_start))?;
            return Err(ChannelFileError::Truncated(payload_bytes, n_payload));
        }

        self.records_read += 1;
        Ok(Some(ChannelRecord::new(
            header,
            ChannelRecord::decode_samples(&payload),
        )))
    }

    pub fn get_records_read(&self) -> u64 {
        self.records_read
    }
}

impl<R: Read + Seek + Send> RecordSource for BinaryChannelFile<R> {
    fn next_record(&mut self) -> Result<Option<ChannelRecord>, RecordSourceError> {
        Ok(self.get_next_record()?)
    }
}
