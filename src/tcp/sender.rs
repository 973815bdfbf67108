use std::collections::VecDeque;

use tracing::trace;

use super::segment::{Flags, Segment};
use super::sequence::{unwrap, wrap, SeqNo};
use super::stream::ByteStream;
use super::timer::RetransmissionTimer;
use crate::config::Config;

/// The sending half of a connection.
///
/// Reads the outbound [`ByteStream`], cuts it into segments that fit the
/// peer's advertised window, keeps every segment until it is acknowledged,
/// and resends the oldest one whenever the retransmission timer fires.
#[derive(Debug)]
pub struct Sender {
    isn: SeqNo,
    stream: ByteStream,
    segments_out: VecDeque<Segment>,
    /// Sent but unacknowledged segments with their absolute seqno, oldest
    /// first.
    outstanding: VecDeque<(u64, Segment)>,
    next_seqno: u64,
    last_ackno: u64,
    /// Window last advertised by the peer. Starts at one so the SYN can go
    /// out before anything was heard.
    window: u16,
    initial_rto: u64,
    rto: u64,
    consecutive_retransmissions: u32,
    max_payload_size: usize,
    timer: RetransmissionTimer,
}

impl Sender {
    pub fn new(config: &Config, isn: SeqNo) -> Self {
        let rto = u64::from(config.rt_timeout);
        Self {
            isn,
            stream: ByteStream::new(config.send_capacity),
            segments_out: VecDeque::new(),
            outstanding: VecDeque::new(),
            next_seqno: 0,
            last_ackno: 0,
            window: 1,
            initial_rto: rto,
            rto,
            consecutive_retransmissions: 0,
            max_payload_size: config.max_payload_size,
            timer: RetransmissionTimer::default(),
        }
    }

    /// Sends as many segments as the window allows.
    ///
    /// The very first call only emits the SYN. Nothing else is sent until
    /// the SYN is acknowledged, and nothing at all after the FIN.
    pub fn fill_window(&mut self) {
        if self.next_seqno == 0 {
            let mut seg = Segment::default();
            seg.header.flags = Flags::SYN;
            self.send_segment(seg);
            return;
        }
        if self.last_ackno == 0 || self.fin_sent() {
            return;
        }

        // a closed window still lets a single probe byte through
        let window = u64::from(std::cmp::max(self.window, 1));
        while window > self.bytes_in_flight() && !self.fin_sent() {
            let remaining = window - self.bytes_in_flight();
            let len = std::cmp::min(self.max_payload_size as u64, remaining) as usize;
            let mut seg = Segment {
                payload: self.stream.read(len),
                ..Default::default()
            };
            if self.stream.eof() && (seg.length_in_sequence_space() as u64) < remaining {
                seg.header.flags |= Flags::FIN;
            }
            if seg.length_in_sequence_space() == 0 {
                return;
            }
            self.send_segment(seg);
        }
    }

    /// Handles an acknowledgment and window advertisement from the peer.
    pub fn ack_received(&mut self, ackno: SeqNo, window: u16) {
        let ackno = unwrap(ackno, self.isn, self.last_ackno);
        if ackno > self.next_seqno {
            // acknowledges bytes never sent
            return;
        }

        if ackno > self.last_ackno {
            self.last_ackno = ackno;
            while let Some((seqno, seg)) = self.outstanding.front() {
                if seqno + seg.length_in_sequence_space() as u64 > ackno {
                    break;
                }
                self.outstanding.pop_front();
            }
            self.rto = self.initial_rto;
            self.consecutive_retransmissions = 0;
            if self.outstanding.is_empty() {
                self.timer.stop();
            } else {
                self.timer.start(self.rto);
            }
        }

        self.window = window;
        self.fill_window();
    }

    /// Advances time by `ms_since_last_tick` milliseconds, retransmitting the
    /// oldest outstanding segment if the timer ran out.
    pub fn tick(&mut self, ms_since_last_tick: u64) {
        self.timer.tick(ms_since_last_tick);
        if self.timer.is_expired() {
            if let Some((seqno, seg)) = self.outstanding.front() {
                trace!(seqno, rto = self.rto, "retransmitting");
                self.segments_out.push_back(seg.clone());
                // a closed window is being probed, not congested
                if self.window > 0 {
                    self.consecutive_retransmissions += 1;
                    self.rto *= 2;
                }
                self.timer.start(self.rto);
            }
        }
        if self.outstanding.is_empty() {
            self.timer.stop();
        }
    }

    /// Queues a segment that occupies no sequence space, such as a bare ACK.
    /// It is never retransmitted.
    pub fn send_empty_segment(&mut self) {
        let mut seg = Segment::default();
        seg.header.seqno = self.next_seqno();
        self.segments_out.push_back(seg);
    }

    fn send_segment(&mut self, mut seg: Segment) {
        seg.header.seqno = self.next_seqno();
        let seqno = self.next_seqno;
        self.next_seqno += seg.length_in_sequence_space() as u64;
        self.segments_out.push_back(seg.clone());
        self.outstanding.push_back((seqno, seg));
        if !self.timer.is_running() {
            self.timer.start(self.rto);
        }
    }

    fn fin_sent(&self) -> bool {
        self.stream.eof() && self.next_seqno == self.stream.bytes_written() + 2
    }

    /// Sequence space units sent but not yet acknowledged, SYN and FIN
    /// included.
    pub fn bytes_in_flight(&self) -> u64 {
        self.next_seqno - self.last_ackno
    }

    pub fn consecutive_retransmissions(&self) -> u32 {
        self.consecutive_retransmissions
    }

    pub fn next_seqno_absolute(&self) -> u64 {
        self.next_seqno
    }

    pub fn next_seqno(&self) -> SeqNo {
        wrap(self.next_seqno, self.isn)
    }

    pub fn stream_in(&self) -> &ByteStream {
        &self.stream
    }

    pub fn stream_in_mut(&mut self) -> &mut ByteStream {
        &mut self.stream
    }

    pub fn segments_out(&self) -> &VecDeque<Segment> {
        &self.segments_out
    }

    pub fn segments_out_mut(&mut self) -> &mut VecDeque<Segment> {
        &mut self.segments_out
    }

    #[cfg(test)]
    pub(crate) fn rto(&self) -> u64 {
        self.rto
    }
}
