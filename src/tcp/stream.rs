use std::collections::VecDeque;

/// An in-order byte stream with a fixed capacity.
///
/// Bytes are written on the input side and read from the output side. The
/// writer can end the input, after which no more bytes are accepted. Either
/// side can flag the stream as errored; the flag is never cleared.
#[derive(Debug)]
pub struct ByteStream {
    buffer: VecDeque<u8>,
    capacity: usize,
    bytes_written: u64,
    bytes_read: u64,
    input_ended: bool,
    error: bool,
}

impl ByteStream {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            bytes_written: 0,
            bytes_read: 0,
            input_ended: false,
            error: false,
        }
    }

    /// Writes as much of `data` as fits and returns the number of bytes
    /// accepted.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if self.input_ended {
            return 0;
        }
        let n = std::cmp::min(data.len(), self.remaining_capacity());
        self.buffer.extend(&data[..n]);
        self.bytes_written += n as u64;
        n
    }

    /// Copies out up to `len` bytes from the front of the buffer without
    /// consuming them.
    pub fn peek(&self, len: usize) -> Vec<u8> {
        let n = std::cmp::min(len, self.buffer.len());
        let (head, tail) = self.buffer.as_slices();
        let hlen = std::cmp::min(n, head.len());
        let mut out = Vec::with_capacity(n);
        out.extend_from_slice(&head[..hlen]);
        out.extend_from_slice(&tail[..n - hlen]);
        out
    }

    /// Discards up to `len` bytes from the front of the buffer.
    pub fn pop(&mut self, len: usize) {
        let n = std::cmp::min(len, self.buffer.len());
        drop(self.buffer.drain(..n));
        self.bytes_read += n as u64;
    }

    /// Reads (copies, then pops) up to `len` bytes.
    pub fn read(&mut self, len: usize) -> Vec<u8> {
        let out = self.peek(len);
        self.pop(out.len());
        out
    }

    pub fn end_input(&mut self) {
        self.input_ended = true;
    }

    pub fn set_error(&mut self) {
        self.error = true;
    }

    pub fn input_ended(&self) -> bool {
        self.input_ended
    }

    pub fn error(&self) -> bool {
        self.error
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes that can currently be read.
    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.buffer.len()
    }

    /// The input has ended and everything written has been read.
    pub fn eof(&self) -> bool {
        self.input_ended && self.buffer.is_empty()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}
