use byteorder::{ByteOrder, LittleEndian};

use super::constants::*;
use super::error::ChannelFileError;

/// ChannelHeader identifies one channel's record within one digitizer readout.
///
/// `event_size` counts the header itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelHeader {
    pub event_size: u32,
    pub board_id: u32,
    pub channel_id: u32,
    pub event_counter: u32,
}

impl ChannelHeader {
    /// Decode the eight little-endian header words
    pub fn decode(buffer: &[u8; HEADER_BYTES]) -> Self {
        let mut words = [0u32; HEADER_WORDS];
        LittleEndian::read_u32_into(buffer, &mut words);
        Self {
            event_size: words[WORD_EVENT_SIZE],
            board_id: words[WORD_BOARD_ID],
            channel_id: words[WORD_CHANNEL_ID],
            event_counter: words[WORD_EVENT_COUNTER],
        }
    }

    /// Encode back into the on-disk layout. Reserved words are written as zero.
    pub fn encode(&self) -> [u8; HEADER_BYTES] {
        let mut words = [0u32; HEADER_WORDS];
        words[WORD_EVENT_SIZE] = self.event_size;
        words[WORD_BOARD_ID] = self.board_id;
        words[WORD_CHANNEL_ID] = self.channel_id;
        words[WORD_EVENT_COUNTER] = self.event_counter;
        let mut buffer = [0u8; HEADER_BYTES];
        LittleEndian::write_u32_into(&words, &mut buffer);
        buffer
    }

    /// Number of payload bytes following the header.
    ///
    /// Fails if the declared size leaves no payload or a payload which is not a whole
    /// number of samples. Both are structural and not worth retrying.
    pub fn payload_bytes(&self) -> Result<usize, ChannelFileError> {
        if self.event_size as usize <= HEADER_BYTES {
            return Err(ChannelFileError::BadEventSize(self.event_size));
        }
        let payload = self.event_size - HEADER_BYTES as u32;
        if payload as usize % SAMPLE_BYTES != 0 {
            return Err(ChannelFileError::BadPayloadSize(payload));
        }
        Ok(payload as usize)
    }

    pub fn n_samples(&self) -> Result<usize, ChannelFileError> {
        Ok(self.payload_bytes()? / SAMPLE_BYTES)
    }
}

/// One channel's digitized waveform for one trigger
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelRecord {
    pub header: ChannelHeader,
    pub samples: Vec<f32>,
}

impl ChannelRecord {
    pub fn new(header: ChannelHeader, samples: Vec<f32>) -> Self {
        Self { header, samples }
    }

    /// Build a record with an event size consistent with the samples
    pub fn from_samples(board_id: u32, channel_id: u32, event_counter: u32, samples: Vec<f32>) -> Self {
        let header = ChannelHeader {
            event_size: (HEADER_BYTES + samples.len() * SAMPLE_BYTES) as u32,
            board_id,
            channel_id,
            event_counter,
        };
        Self { header, samples }
    }

    /// Decode a little-endian f32 payload
    pub fn decode_samples(payload: &[u8]) -> Vec<f32> {
        let mut samples = vec![0.0f32; payload.len() / SAMPLE_BYTES];
        LittleEndian::read_f32_into(&payload[..samples.len() * SAMPLE_BYTES], &mut samples);
        samples
    }

    /// Serialize into the binary digitizer layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_BYTES + self.samples.len() * SAMPLE_BYTES);
        bytes.extend_from_slice(&self.header.encode());
        let mut payload = vec![0u8; self.samples.len() * SAMPLE_BYTES];
        LittleEndian::write_f32_into(&self.samples, &mut payload);
        bytes.extend_from_slice(&payload);
        bytes
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_word_positions() {
        let mut buffer = [0u8; HEADER_BYTES];
        let words: [u32; HEADER_WORDS] = [40, 7, 99, 2, 1234, 5, 6, 8];
        LittleEndian::write_u32_into(&words, &mut buffer);
        let header = ChannelHeader::decode(&buffer);
        assert_eq!(header.event_size, 40);
        assert_eq!(header.board_id, 7);
        assert_eq!(header.channel_id, 2);
        assert_eq!(header.event_counter, 1234);
        assert_eq!(header.n_samples().unwrap(), 2);
    }

    #[test]
    fn test_bad_payload_sizes() {
        let header = ChannelHeader {
            event_size: HEADER_BYTES as u32 + 6,
            ..Default::default()
        };
        assert!(matches!(
            header.payload_bytes(),
            Err(ChannelFileError::BadPayloadSize(6))
        ));
        let header = ChannelHeader {
            event_size: HEADER_BYTES as u32,
            ..Default::default()
        };
        assert!(matches!(
            header.payload_bytes(),
            Err(ChannelFileError::BadEventSize(_))
        ));
        assert!(!header.payload_bytes().unwrap_err().is_retryable());
    }

    #[test]
    fn test_record_layout() {
        let record = ChannelRecord::from_samples(1, 0, 5, vec![1.5, -2.0, 3.25]);
        let bytes = record.to_bytes();
        assert_eq!(bytes.len(), HEADER_BYTES + 12);
        assert_eq!(LittleEndian::read_u32(&bytes[0..4]), 44);
        assert_eq!(LittleEndian::read_u32(&bytes[16..20]), 5);
        assert_eq!(ChannelRecord::decode_samples(&bytes[HEADER_BYTES..]), record.samples);
    }
}
