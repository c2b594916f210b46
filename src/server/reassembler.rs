//! Newline-delimited record reassembly
//!
//! Clients write records in whatever segments the network hands us. The
//! reassembler buffers partial tails across receives and only yields a record
//! once its terminating newline has arrived.

use bytes::{Bytes, BytesMut};
use std::io;
use tokio_util::codec::Decoder;

const NEWLINE: u8 = b'\n';

/// Codec splitting a byte stream into newline-terminated records.
///
/// The terminator is kept as part of each record. Residue left at end of
/// stream is discarded, never turned into a record.
#[derive(Debug, Default, Clone)]
pub struct RecordCodec {
    // Bytes of the current buffer already known to contain no newline.
    next_index: usize,
}

impl RecordCodec {
    /// Create a new record codec
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for RecordCodec {
    type Item = Bytes;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        let unscanned = &src[self.next_index..];
        match unscanned.iter().position(|b| *b == NEWLINE) {
            Some(offset) => {
                let end = self.next_index + offset + 1;
                self.next_index = 0;
                Ok(Some(src.split_to(end).freeze()))
            }
            None => {
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, io::Error> {
        match self.decode(src)? {
            Some(record) => Ok(Some(record)),
            None => {
                src.clear();
                self.next_index = 0;
                Ok(None)
            }
        }
    }
}

/// Per-connection receive buffer yielding complete records
#[derive(Debug, Default)]
pub struct RecordReassembler {
    buffer: BytesMut,
    codec: RecordCodec,
}

impl RecordReassembler {
    /// Create an empty reassembler
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty reassembler with room for `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            codec: RecordCodec::new(),
        }
    }

    /// Append `chunk` and return every record it completes, in arrival order.
    /// Bytes after the last newline stay buffered.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);

        let mut records = Vec::new();
        // The codec never fails on in-memory input.
        while let Ok(Some(record)) = self.codec.decode(&mut self.buffer) {
            records.push(record);
        }
        records
    }

    /// Whether no unterminated residue is buffered
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Number of buffered bytes still waiting for a newline
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// End of stream: drop any residue and return how many bytes were lost.
    pub fn finish(&mut self) -> usize {
        let discarded = self.buffer.len();
        let _ = self.codec.decode_eof(&mut self.buffer);
        discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_record() {
        let mut reassembler = RecordReassembler::new();
        let records = reassembler.feed(b"hello\n");
        assert_eq!(records, vec![Bytes::from_static(b"hello\n")]);
        assert!(reassembler.is_empty());
    }

    #[test]
    fn test_record_split_across_chunks() {
        let mut reassembler = RecordReassembler::new();
        assert!(reassembler.feed(b"abc").is_empty());
        assert!(!reassembler.is_empty());
        assert_eq!(reassembler.pending(), 3);

        let records = reassembler.feed(b"def\n");
        assert_eq!(records, vec![Bytes::from_static(b"abcdef\n")]);
        assert!(reassembler.is_empty());
    }

    #[test]
    fn test_multiple_records_in_one_chunk() {
        let mut reassembler = RecordReassembler::new();
        let records = reassembler.feed(b"a\nb\nc");
        assert_eq!(
            records,
            vec![Bytes::from_static(b"a\n"), Bytes::from_static(b"b\n")]
        );
        assert_eq!(reassembler.pending(), 1);

        let records = reassembler.feed(b"\n");
        assert_eq!(records, vec![Bytes::from_static(b"c\n")]);
    }

    #[test]
    fn test_empty_chunk_yields_nothing() {
        let mut reassembler = RecordReassembler::new();
        assert!(reassembler.feed(b"").is_empty());
        assert!(reassembler.is_empty());
    }

    #[test]
    fn test_bare_newline_is_a_record() {
        let mut reassembler = RecordReassembler::new();
        assert_eq!(reassembler.feed(b"\n"), vec![Bytes::from_static(b"\n")]);
    }

    #[test]
    fn test_record_larger_than_chunk() {
        let mut reassembler = RecordReassembler::with_capacity(5120);
        let payload = vec![b'x'; 20_000];
        for chunk in payload.chunks(5120) {
            assert!(reassembler.feed(chunk).is_empty());
        }
        let records = reassembler.feed(b"\n");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].len(), 20_001);
        assert_eq!(records[0][20_000], b'\n');
    }

    #[test]
    fn test_finish_discards_residue() {
        let mut reassembler = RecordReassembler::new();
        reassembler.feed(b"done\npartial");
        assert_eq!(reassembler.finish(), 7);
        assert!(reassembler.is_empty());
        assert_eq!(reassembler.feed(b"\n"), vec![Bytes::from_static(b"\n")]);
    }

    #[test]
    fn test_codec_eof_drops_unterminated_tail() {
        let mut codec = RecordCodec::new();
        let mut src = BytesMut::from(&b"one\ntwo\nthree"[..]);

        assert_eq!(codec.decode_eof(&mut src).unwrap(), Some(Bytes::from_static(b"one\n")));
        assert_eq!(codec.decode_eof(&mut src).unwrap(), Some(Bytes::from_static(b"two\n")));
        assert_eq!(codec.decode_eof(&mut src).unwrap(), None);
        assert!(src.is_empty());
    }

    #[test]
    fn test_codec_resumes_scan_after_partial() {
        let mut codec = RecordCodec::new();
        let mut src = BytesMut::from(&b"abc"[..]);
        assert_eq!(codec.decode(&mut src).unwrap(), None);

        src.extend_from_slice(b"de\nf");
        assert_eq!(codec.decode(&mut src).unwrap(), Some(Bytes::from_static(b"abcde\n")));
        assert_eq!(&src[..], b"f");
    }
}
