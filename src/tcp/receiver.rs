use super::reassembler::StreamReassembler;
use super::segment::Segment;
use super::sequence::{unwrap, wrap, SeqNo};
use super::stream::ByteStream;

/// The receiving half of a connection.
///
/// Feeds segment payloads into a [`StreamReassembler`] and derives the
/// acknowledgment number and window to report back to the peer.
#[derive(Debug)]
pub struct Receiver {
    reassembler: StreamReassembler,
    /// Initial sequence number of the peer, known once its SYN arrived.
    isn: Option<SeqNo>,
}

impl Receiver {
    pub fn new(capacity: usize) -> Self {
        Self {
            reassembler: StreamReassembler::new(capacity),
            isn: None,
        }
    }

    pub fn segment_received(&mut self, seg: &Segment) {
        let isn = match self.isn {
            Some(isn) => isn,
            None if seg.syn() => {
                self.isn = Some(seg.header.seqno);
                self.reassembler.push_substring(&seg.payload, 0, seg.fin());
                return;
            }
            None => return,
        };

        // absolute seqno of the next expected byte, one past the SYN
        let checkpoint = self.reassembler.first_unassembled() + 1;
        let seqno = unwrap(seg.header.seqno, isn, checkpoint);
        // the SYN occupies absolute index 0, payload starts right after it
        let Some(index) = (seqno + u64::from(seg.syn())).checked_sub(1) else {
            return;
        };
        self.reassembler.push_substring(&seg.payload, index, seg.fin());
    }

    /// The next sequence number expected from the peer, if its SYN has
    /// been seen.
    pub fn ackno(&self) -> Option<SeqNo> {
        let isn = self.isn?;
        let mut ackno = self.reassembler.first_unassembled() + 1;
        if self.reassembler.stream_out().input_ended() {
            ackno += 1;
        }
        Some(wrap(ackno, isn))
    }

    /// Distance between the first byte not yet assembled and the first byte
    /// that would not fit.
    pub fn window_size(&self) -> usize {
        (self.reassembler.first_unacceptable() - self.reassembler.first_unassembled()) as usize
    }

    pub fn unassembled_bytes(&self) -> usize {
        self.reassembler.unassembled_bytes()
    }

    pub fn stream_out(&self) -> &ByteStream {
        self.reassembler.stream_out()
    }

    pub fn stream_out_mut(&mut self) -> &mut ByteStream {
        self.reassembler.stream_out_mut()
    }
}
