use std::collections::BTreeMap;

use super::stream::ByteStream;

/// Assembles possibly out-of-order, possibly overlapping substrings of a
/// byte stream into an in-order [`ByteStream`].
///
/// Indices are absolute stream positions: index 0 is the first byte ever
/// written. The capacity of the output stream bounds both the assembled but
/// unread bytes and the pending ones; anything beyond it is dropped.
#[derive(Debug)]
pub struct StreamReassembler {
    output: ByteStream,
    /// Disjoint, non-touching ranges keyed by their first index.
    pending: BTreeMap<u64, Vec<u8>>,
    unassembled_bytes: usize,
    /// One past the last byte of the stream, once a final chunk was seen.
    eof_index: Option<u64>,
}

impl StreamReassembler {
    pub fn new(capacity: usize) -> Self {
        Self {
            output: ByteStream::new(capacity),
            pending: BTreeMap::new(),
            unassembled_bytes: 0,
            eof_index: None,
        }
    }

    /// Accepts `data` starting at stream position `index` and writes any
    /// bytes that became contiguous into the output stream. `eof` marks
    /// `data` as the tail of the whole stream.
    pub fn push_substring(&mut self, data: &[u8], index: u64, eof: bool) {
        if eof {
            self.eof_index = Some(index + data.len() as u64);
        }
        if !data.is_empty() {
            self.insert(data, index);
        }

        while let Some(entry) = self.pending.first_entry() {
            if *entry.key() != self.output.bytes_written() {
                break;
            }
            let bytes = entry.remove();
            self.unassembled_bytes -= bytes.len();
            self.output.write(&bytes);
        }

        if self.eof_index == Some(self.first_unassembled()) {
            self.output.end_input();
            self.pending.clear();
            self.unassembled_bytes = 0;
        }
    }

    fn insert(&mut self, data: &[u8], index: u64) {
        let first_unassembled = self.first_unassembled();
        let first_unacceptable = self.first_unacceptable();
        let end = index + data.len() as u64;
        if index >= first_unacceptable || end <= first_unassembled {
            return;
        }

        let mut start = std::cmp::max(index, first_unassembled);
        let stop = std::cmp::min(end, first_unacceptable);
        let mut chunk = data[(start - index) as usize..(stop - index) as usize].to_vec();

        // Ranges are disjoint and ordered, so their ends are ordered too:
        // walk backwards from the last range starting at or before `stop`
        // until one ends before `start`.
        let neighbours: Vec<u64> = self
            .pending
            .range(..=stop)
            .rev()
            .take_while(|(key, bytes)| **key + bytes.len() as u64 >= start)
            .map(|(key, _)| *key)
            .collect();

        for key in neighbours {
            let Some(existing) = self.pending.remove(&key) else {
                continue;
            };
            self.unassembled_bytes -= existing.len();

            if key < start {
                let mut merged = existing[..(start - key) as usize].to_vec();
                merged.extend_from_slice(&chunk);
                chunk = merged;
                start = key;
            }
            let chunk_end = start + chunk.len() as u64;
            let existing_end = key + existing.len() as u64;
            if existing_end > chunk_end {
                chunk.extend_from_slice(&existing[(chunk_end - key) as usize..]);
            }
        }

        self.unassembled_bytes += chunk.len();
        self.pending.insert(start, chunk);
    }

    pub fn stream_out(&self) -> &ByteStream {
        &self.output
    }

    pub fn stream_out_mut(&mut self) -> &mut ByteStream {
        &mut self.output
    }

    /// Bytes held but not yet assembled, each counted once.
    pub fn unassembled_bytes(&self) -> usize {
        self.unassembled_bytes
    }

    /// Whether there is nothing waiting to be assembled.
    pub fn empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn first_unread(&self) -> u64 {
        self.output.bytes_read()
    }

    pub fn first_unassembled(&self) -> u64 {
        self.output.bytes_written()
    }

    pub fn first_unacceptable(&self) -> u64 {
        self.first_unread() + self.output.capacity() as u64
    }
}
