use super::channel_record::ChannelRecord;
use super::error::RecordSourceError;

/// A per-channel stream of digitizer records, in acquisition order.
///
/// Implemented by the binary and ASCII channel readers so the aligner does not care about
/// the on-disk format. `Ok(None)` means the stream has no more records.
pub trait RecordSource: Send {
    fn next_record(&mut self) -> Result<Option<ChannelRecord>, RecordSourceError>;

    /// Read up to chunk_size records. The flag is true if the stream ended before the chunk
    /// was filled; a record cut short at the end of the stream counts as the end.
    fn read_chunk(
        &mut self,
        chunk_size: usize,
    ) -> Result<(Vec<ChannelRecord>, bool), RecordSourceError> {
        let mut records = Vec::with_capacity(chunk_size);
        for _ in 0..chunk_size {
            match self.next_record() {
                Ok(Some(record)) => records.push(record),
                Ok(None) => return Ok((records, true)),
                Err(e) if e.is_retryable() => {
                    spdlog::warn!("Channel stream ends inside a record: {e}");
                    return Ok((records, true));
                }
                Err(e) => return Err(e),
            }
        }
        Ok((records, false))
    }
}

/// In-memory source, mostly useful for feeding prepared records to the aligner
impl RecordSource for std::vec::IntoIter<ChannelRecord> {
    fn next_record(&mut self) -> Result<Option<ChannelRecord>, RecordSourceError> {
        Ok(self.next())
    }
}
