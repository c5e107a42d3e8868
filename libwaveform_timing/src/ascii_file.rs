use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use super::channel_record::ChannelRecord;
use super::constants::*;
use super::error::{AsciiFileError, RecordSourceError};
use super::record_source::RecordSource;

/// Metadata and samples of a record still being parsed
#[derive(Debug, Default)]
struct AsciiBlock {
    board_id: u32,
    channel_id: u32,
    event_counter: u32,
    record_length: Option<usize>,
    samples: Vec<f32>,
}

impl AsciiBlock {
    fn apply_metadata(&mut self, key: &str, value: &str) {
        match key {
            KEY_RECORD_LENGTH => {
                if let Some(v) = parse_uint(value) {
                    self.record_length = Some(v as usize);
                }
            }
            KEY_BOARD_ID => {
                if let Some(v) = parse_uint(value) {
                    self.board_id = v;
                }
            }
            KEY_CHANNEL => {
                if let Some(v) = parse_uint(value) {
                    self.channel_id = v;
                }
            }
            KEY_EVENT_NUMBER => {
                if let Some(v) = parse_uint(value) {
                    self.event_counter = v;
                }
            }
            _ => (),
        }
    }
}

/// Digitizer software writes decimal values, but hex is accepted as well
fn parse_uint(text: &str) -> Option<u32> {
    if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        u32::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

/// A single channel's ASCII digitizer dump.
///
/// Records are blocks of `Key: Value` lines (`Record Length`, `BoardID`, `Channel`,
/// `Event Number`) followed by one sample per line, ending at the next key line or the end
/// of the file. The parsed sample count always wins over a declared `Record Length`.
#[derive(Debug)]
pub struct AsciiChannelFile<R: BufRead> {
    reader: R,
    file_path: PathBuf,
    current: AsciiBlock,
    in_samples: bool,
    records_read: u64,
}

impl AsciiChannelFile<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, AsciiFileError> {
        if !path.exists() {
            return Err(AsciiFileError::BadFilePath(path.to_path_buf()));
        }
        let mut source = Self::from_reader(BufReader::new(File::open(path)?));
        source.file_path = path.to_path_buf();
        Ok(source)
    }
}

impl<R: BufRead> AsciiChannelFile<R> {
    pub fn from_reader(reader: R) -> Self {
        Self {
            reader,
            file_path: PathBuf::new(),
            current: AsciiBlock::default(),
            in_samples: false,
            records_read: 0,
        }
    }

    /// Parse the next record. Returns `Ok(None)` once the file is exhausted.
    pub fn get_next_record(&mut self) -> Result<Option<ChannelRecord>, AsciiFileError> {
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                self.in_samples = false;
                let block = std::mem::take(&mut self.current);
                return Ok(self.finalize_block(block));
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if let Some((key, value)) = trimmed.split_once(':') {
                // A key line after samples closes the record being built
                let finished = if self.in_samples {
                    self.in_samples = false;
                    Some(std::mem::take(&mut self.current))
                } else {
                    None
                };
                self.current.apply_metadata(key.trim(), value.trim());
                if let Some(record) = finished.and_then(|block| self.finalize_block(block)) {
                    return Ok(Some(record));
                }
                continue;
            }

            self.in_samples = true;
            match trimmed.parse::<f32>() {
                Ok(value) => self.current.samples.push(value),
                Err(_) => spdlog::warn!(
                    "Cannot parse sample \"{trimmed}\" in {:?}, skipping",
                    self.file_path
                ),
            }
        }
    }

    /// Blocks without samples are dropped
    fn finalize_block(&mut self, block: AsciiBlock) -> Option<ChannelRecord> {
        if block.samples.is_empty() {
            return None;
        }
        if let Some(declared) = block.record_length {
            if declared != block.samples.len() {
                spdlog::warn!(
                    "Record Length mismatch in {:?} event {} (declared {declared}, parsed {})",
                    self.file_path,
                    block.event_counter,
                    block.samples.len()
                );
            }
        }
        self.records_read += 1;
        Some(ChannelRecord::from_samples(
            block.board_id,
            block.channel_id,
            block.event_counter,
            block.samples,
        ))
    }

    pub fn get_filename(&self) -> &Path {
        &self.file_path
    }

    pub fn get_records_read(&self) -> u64 {
        self.records_read
    }
}

impl<R: BufRead + Send> RecordSource for AsciiChannelFile<R> {
    fn next_record(&mut self) -> Result<Option<ChannelRecord>, RecordSourceError> {
        Ok(self.get_next_record()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const TWO_RECORDS: &str = "Record Length: 3
BoardID: 1
Channel: 2
Event Number: 0
1.0
2.0
3.0
Record Length: 3
BoardID: 1
Channel: 2
Event Number: 1

4.5
5.5
6.5
";

    #[test]
    fn test_parses_blocks() {
        let mut file = AsciiChannelFile::from_reader(Cursor::new(TWO_RECORDS));
        let first = file.get_next_record().unwrap().unwrap();
        assert_eq!(first.samples, vec![1.0, 2.0, 3.0]);
        assert_eq!(first.header.board_id, 1);
        assert_eq!(first.header.channel_id, 2);
        assert_eq!(first.header.event_counter, 0);
        assert_eq!(first.header.event_size, (HEADER_BYTES + 12) as u32);
        let second = file.get_next_record().unwrap().unwrap();
        assert_eq!(second.header.event_counter, 1);
        assert_eq!(second.samples, vec![4.5, 5.5, 6.5]);
        assert!(file.get_next_record().unwrap().is_none());
        assert!(file.get_next_record().unwrap().is_none());
        assert_eq!(file.get_records_read(), 2);
    }

    #[test]
    fn test_record_length_mismatch_keeps_parsed_count() {
        let text = "Record Length: 5\nEvent Number: 3\n1\n2\nEvent Number: 4\n7\n";
        let mut file = AsciiChannelFile::from_reader(Cursor::new(text));
        let record = file.get_next_record().unwrap().unwrap();
        assert_eq!(record.n_samples(), 2);
        assert_eq!(record.header.event_counter, 3);
        let record = file.get_next_record().unwrap().unwrap();
        assert_eq!(record.samples, vec![7.0]);
        assert_eq!(record.header.event_counter, 4);
    }

    #[test]
    fn test_bad_sample_lines_are_skipped() {
        let text = "Event Number: 0\n1.0\nnot-a-number\n2.0\n";
        let mut file = AsciiChannelFile::from_reader(Cursor::new(text));
        let record = file.get_next_record().unwrap().unwrap();
        assert_eq!(record.samples, vec![1.0, 2.0]);
    }

    #[test]
    fn test_metadata_only_file_has_no_records() {
        let text = "Record Length: 3\nBoardID: 0x1F\n";
        let mut file = AsciiChannelFile::from_reader(Cursor::new(text));
        assert!(file.get_next_record().unwrap().is_none());
        assert_eq!(parse_uint("0x1F"), Some(31));
    }
}
