use std::collections::VecDeque;
use std::net::Ipv4Addr;

use rand::RngCore;
use tracing::{debug, warn};

use super::receiver::Receiver;
use super::segment::{Flags, Segment};
use super::sender::Sender;
use super::sequence::SeqNo;
use super::state::{Available, ReceiverState, SenderState, State};
use super::stream::ByteStream;
use crate::config::Config;

/// Both ends of a connection, seen from the local side: `src` is local,
/// `dst` is the peer.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub struct Tcp4Tuple {
    pub src: (Ipv4Addr, u16),
    pub dst: (Ipv4Addr, u16),
}

/// A full connection endpoint: one [`Sender`] and one [`Receiver`] plus the
/// rules for opening, acknowledging, and shutting down.
///
/// The owner feeds it segments with [`Connection::segment_received`] and the
/// passage of time with [`Connection::tick`], and drains
/// [`Connection::segments_out_mut`] onto the network.
#[derive(Debug)]
pub struct Connection {
    config: Config,
    sender: Sender,
    receiver: Receiver,
    segments_out: VecDeque<Segment>,
    active: bool,
    /// Stay around after both streams finished, to re-acknowledge a FIN the
    /// peer did not see acknowledged.
    linger: bool,
    time_since_last_segment_received: u64,
}

impl Connection {
    /// Creates a connection, drawing the initial sequence number from the
    /// thread-local generator unless the config fixes one.
    pub fn new(config: Config) -> Self {
        Self::with_rng(config, &mut rand::thread_rng())
    }

    pub fn with_rng<R: RngCore + ?Sized>(config: Config, rng: &mut R) -> Self {
        let isn = config
            .fixed_isn
            .unwrap_or_else(|| SeqNo::new(rng.next_u32()));
        Self {
            sender: Sender::new(&config, isn),
            receiver: Receiver::new(config.recv_capacity),
            config,
            segments_out: VecDeque::new(),
            active: true,
            linger: true,
            time_since_last_segment_received: 0,
        }
    }

    /// Starts an active open by sending a SYN.
    pub fn connect(&mut self) {
        self.sender.fill_window();
        self.send_segments();
    }

    /// Writes `data` to the outbound stream and sends what the window
    /// allows. Returns how many bytes were accepted.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if !self.active || data.is_empty() {
            return 0;
        }
        let written = self.sender.stream_in_mut().write(data);
        self.sender.fill_window();
        self.send_segments();
        written
    }

    /// Closes the outbound stream. Reading the inbound one is still allowed.
    pub fn end_input_stream(&mut self) {
        self.sender.stream_in_mut().end_input();
        if !self.active {
            return;
        }
        self.sender.fill_window();
        self.send_segments();
    }

    pub fn segment_received(&mut self, seg: &Segment) {
        if !self.active {
            return;
        }
        self.time_since_last_segment_received = 0;

        if seg.rst() {
            debug!("reset by peer");
            self.unclean_shutdown();
            return;
        }

        self.receiver.segment_received(seg);
        match (ReceiverState::of(&self.receiver), SenderState::of(&self.sender)) {
            (ReceiverState::Listen, SenderState::Closed) => return,
            (ReceiverState::SynRecv | ReceiverState::FinRecv, SenderState::Closed) => {
                debug!(isn = %seg.header.seqno, "passive open");
                self.connect();
                return;
            }
            _ => {}
        }

        if seg.ack() {
            self.sender.ack_received(seg.header.ackno, seg.header.win);
        }

        // anything occupying sequence space must be acknowledged
        if seg.length_in_sequence_space() > 0 && self.sender.segments_out().is_empty() {
            self.sender.send_empty_segment();
        }
        // keep-alive: a probe one below the ackno still gets an answer
        if let Some(ackno) = self.receiver.ackno() {
            if seg.length_in_sequence_space() == 0 && seg.header.seqno == ackno - 1u32 {
                self.sender.send_empty_segment();
            }
        }

        self.send_segments();
        self.clean_shutdown();
    }

    /// Advances time, retransmitting as needed and aborting once too many
    /// retransmissions happened in a row.
    pub fn tick(&mut self, ms_since_last_tick: u64) {
        if !self.active {
            return;
        }
        self.sender.tick(ms_since_last_tick);
        self.time_since_last_segment_received += ms_since_last_tick;

        if self.sender.consecutive_retransmissions() > self.config.max_retx_attempts {
            warn!(
                attempts = self.sender.consecutive_retransmissions(),
                "retransmission limit exceeded, aborting"
            );
            self.abort();
            return;
        }
        self.send_segments();
        self.clean_shutdown();
    }

    /// Sends an RST and deactivates the connection with both streams in the
    /// error state.
    pub fn abort(&mut self) {
        self.send_rst();
        self.unclean_shutdown();
    }

    fn send_segments(&mut self) {
        while let Some(mut seg) = self.sender.segments_out_mut().pop_front() {
            self.stamp(&mut seg);
            self.segments_out.push_back(seg);
        }
    }

    fn stamp(&self, seg: &mut Segment) {
        if let Some(ackno) = self.receiver.ackno() {
            seg.header.flags |= Flags::ACK;
            seg.header.ackno = ackno;
            seg.header.win = u16::try_from(self.receiver.window_size()).unwrap_or(u16::MAX);
        }
    }

    fn send_rst(&mut self) {
        self.sender.segments_out_mut().clear();
        self.sender.send_empty_segment();
        if let Some(mut seg) = self.sender.segments_out_mut().pop_front() {
            seg.header.flags |= Flags::RST;
            self.stamp(&mut seg);
            self.segments_out.push_back(seg);
        }
    }

    fn clean_shutdown(&mut self) {
        if self.receiver.stream_out().input_ended() && !self.sender.stream_in().eof() {
            // the peer finished first, nobody is left to need our lingering
            self.linger = false;
        } else if SenderState::of(&self.sender) == SenderState::FinAcked
            && ReceiverState::of(&self.receiver) == ReceiverState::FinRecv
        {
            let linger_for = 10 * u64::from(self.config.rt_timeout);
            if !self.linger || self.time_since_last_segment_received >= linger_for {
                debug!(linger = self.linger, "connection closed");
                self.active = false;
            }
        }
    }

    fn unclean_shutdown(&mut self) {
        self.sender.stream_in_mut().set_error();
        self.receiver.stream_out_mut().set_error();
        self.active = false;
    }

    pub fn active(&self) -> bool {
        self.active
    }

    pub fn state(&self) -> State {
        State::summarize(
            SenderState::of(&self.sender),
            ReceiverState::of(&self.receiver),
            self.active,
            self.linger,
        )
    }

    /// Whether a reader or writer waiting on this connection could proceed.
    pub fn availability(&self) -> Available {
        let mut avail = Available::empty();
        let inbound = self.receiver.stream_out();
        if !inbound.buffer_empty() || inbound.input_ended() || inbound.error() {
            avail |= Available::READ;
        }
        if self.remaining_outbound_capacity() > 0 || !self.active {
            avail |= Available::WRITE;
        }
        avail
    }

    /// Bytes that can be written right now.
    pub fn remaining_outbound_capacity(&self) -> usize {
        self.sender.stream_in().remaining_capacity()
    }

    pub fn bytes_in_flight(&self) -> u64 {
        self.sender.bytes_in_flight()
    }

    pub fn unassembled_bytes(&self) -> usize {
        self.receiver.unassembled_bytes()
    }

    pub fn time_since_last_segment_received(&self) -> u64 {
        self.time_since_last_segment_received
    }

    /// Bytes received from the peer, in order.
    pub fn inbound_stream(&self) -> &ByteStream {
        self.receiver.stream_out()
    }

    pub fn inbound_stream_mut(&mut self) -> &mut ByteStream {
        self.receiver.stream_out_mut()
    }

    pub fn outbound_stream(&self) -> &ByteStream {
        self.sender.stream_in()
    }

    /// Segments waiting to be put on the network, oldest first.
    pub fn segments_out_mut(&mut self) -> &mut VecDeque<Segment> {
        &mut self.segments_out
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.active {
            warn!("unclean shutdown of an active connection");
            self.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tcp::segment::Header;
    use crate::tcp::sequence::wrap;

    const ISN: SeqNo = SeqNo::new(1000);
    const PEER_ISN: SeqNo = SeqNo::new(5000);
    const RTO: u16 = 100;

    fn config() -> Config {
        Config {
            rt_timeout: RTO,
            fixed_isn: Some(ISN),
            ..Config::default()
        }
    }

    fn segment(seqno: SeqNo, flags: Flags, ackno: SeqNo, payload: &[u8]) -> Segment {
        Segment {
            header: Header {
                seqno,
                ackno,
                win: 1000,
                flags,
            },
            payload: payload.to_vec(),
        }
    }

    fn expect_one(conn: &mut Connection) -> Segment {
        let seg = conn
            .segments_out_mut()
            .pop_front()
            .expect("a segment should have been sent");
        assert!(conn.segments_out_mut().is_empty(), "more than one segment sent");
        seg
    }

    /// Active open up to `Established`.
    fn established() -> Connection {
        let mut conn = Connection::new(config());
        conn.connect();
        let syn = expect_one(&mut conn);
        assert!(syn.syn());
        assert!(!syn.ack());
        conn.segment_received(&segment(PEER_ISN, Flags::SYN | Flags::ACK, ISN + 1, b""));
        let ack = expect_one(&mut conn);
        assert!(ack.ack());
        assert_eq!(ack.header.ackno, PEER_ISN + 1);
        assert_eq!(conn.state(), State::Established);
        conn
    }

    #[test]
    fn passive_open_answers_with_syn_ack() {
        let mut conn = Connection::new(config());
        assert_eq!(conn.state(), State::Listen);
        conn.segment_received(&segment(PEER_ISN, Flags::SYN, SeqNo::new(0), b""));
        let syn_ack = expect_one(&mut conn);
        assert_eq!(syn_ack.header.flags, Flags::SYN | Flags::ACK);
        assert_eq!(syn_ack.header.seqno, ISN);
        assert_eq!(syn_ack.header.ackno, PEER_ISN + 1);
        assert_eq!(syn_ack.header.win, Config::DEFAULT_CAPACITY as u16);
        assert_eq!(conn.state(), State::SynReceived);

        conn.segment_received(&segment(PEER_ISN + 1, Flags::ACK, ISN + 1, b""));
        assert!(conn.segments_out_mut().is_empty());
        assert_eq!(conn.state(), State::Established);
    }

    #[test]
    fn listen_ignores_segments_without_syn() {
        let mut conn = Connection::new(config());
        conn.segment_received(&segment(PEER_ISN, Flags::ACK, SeqNo::new(0), b"data"));
        assert!(conn.segments_out_mut().is_empty());
        assert_eq!(conn.state(), State::Listen);
    }

    #[test]
    fn data_is_acknowledged() {
        let mut conn = established();
        conn.segment_received(&segment(PEER_ISN + 1, Flags::ACK, ISN + 1, b"hello"));
        let ack = expect_one(&mut conn);
        assert_eq!(ack.header.ackno, PEER_ISN + 6);
        assert_eq!(ack.length_in_sequence_space(), 0);
        assert_eq!(conn.inbound_stream_mut().read(5), b"hello");
    }

    #[test]
    fn keep_alive_gets_an_answer() {
        let mut conn = established();
        conn.segment_received(&segment(PEER_ISN, Flags::ACK, ISN + 1, b""));
        let ack = expect_one(&mut conn);
        assert_eq!(ack.header.ackno, PEER_ISN + 1);
    }

    #[test]
    fn bare_ack_gets_no_reply() {
        let mut conn = established();
        conn.segment_received(&segment(PEER_ISN + 1, Flags::ACK, ISN + 1, b""));
        assert!(conn.segments_out_mut().is_empty());
    }

    #[test]
    fn window_is_saturated_to_sixteen_bits() {
        let mut conn = Connection::new(Config {
            recv_capacity: 100_000,
            ..config()
        });
        conn.segment_received(&segment(PEER_ISN, Flags::SYN, SeqNo::new(0), b""));
        assert_eq!(expect_one(&mut conn).header.win, u16::MAX);
    }

    #[test]
    fn rst_aborts() {
        let mut conn = established();
        conn.segment_received(&segment(PEER_ISN + 1, Flags::RST, SeqNo::new(0), b""));
        assert!(!conn.active());
        assert!(conn.inbound_stream().error());
        assert!(conn.outbound_stream().error());
        assert_eq!(conn.state(), State::Reset);
        assert!(conn.segments_out_mut().is_empty());
        // an inactive connection ignores everything
        assert_eq!(conn.write(b"late"), 0);
        conn.tick(10_000);
        assert!(conn.segments_out_mut().is_empty());
    }

    #[test]
    fn too_many_retransmissions_abort_with_rst() {
        let mut conn = Connection::new(Config {
            max_retx_attempts: 2,
            ..config()
        });
        conn.connect();
        expect_one(&mut conn);

        let mut rto = u64::from(RTO);
        for _ in 0..2 {
            conn.tick(rto);
            assert!(expect_one(&mut conn).syn());
            rto *= 2;
        }
        assert!(conn.active());
        conn.tick(rto);
        let rst = expect_one(&mut conn);
        assert!(rst.rst());
        assert_eq!(rst.header.seqno, ISN + 1);
        assert!(!conn.active());
        assert_eq!(conn.state(), State::Reset);
    }

    #[test]
    fn active_close_lingers_in_time_wait() {
        let mut conn = established();
        conn.end_input_stream();
        let fin = expect_one(&mut conn);
        assert!(fin.fin());
        assert_eq!(conn.state(), State::FinWait1);

        conn.segment_received(&segment(PEER_ISN + 1, Flags::ACK, ISN + 2, b""));
        assert_eq!(conn.state(), State::FinWait2);

        conn.segment_received(&segment(PEER_ISN + 1, Flags::ACK | Flags::FIN, ISN + 2, b""));
        let ack = expect_one(&mut conn);
        assert_eq!(ack.header.ackno, PEER_ISN + 2);
        assert_eq!(conn.state(), State::TimeWait);

        conn.tick(10 * u64::from(RTO) - 1);
        assert!(conn.active());
        conn.tick(1);
        assert!(!conn.active());
        assert_eq!(conn.state(), State::Closed);
    }

    #[test]
    fn passive_close_does_not_linger() {
        let mut conn = established();
        conn.segment_received(&segment(PEER_ISN + 1, Flags::ACK | Flags::FIN, ISN + 1, b""));
        expect_one(&mut conn);
        assert_eq!(conn.state(), State::CloseWait);

        conn.end_input_stream();
        let fin = expect_one(&mut conn);
        assert!(fin.fin());
        assert_eq!(conn.state(), State::LastAck);

        conn.segment_received(&segment(PEER_ISN + 2, Flags::ACK, ISN + 2, b""));
        assert!(!conn.active());
        assert_eq!(conn.state(), State::Closed);
    }

    #[test]
    fn abort_sends_rst_at_next_seqno() {
        let mut conn = established();
        conn.write(b"unsent");
        conn.segments_out_mut().clear();

        conn.abort();
        let rst = expect_one(&mut conn);
        assert_eq!(rst.header.flags, Flags::RST | Flags::ACK);
        assert_eq!(rst.header.seqno, ISN + 7);
        assert_eq!(rst.header.ackno, PEER_ISN + 1);
        assert_eq!(rst.length_in_sequence_space(), 0);
        assert!(!conn.active());
        assert!(conn.inbound_stream().error());
        assert!(conn.outbound_stream().error());

        // already inactive, dropping it must not abort again
        drop(conn);
    }

    #[test]
    fn injected_rng_picks_the_isn() {
        struct Fixed;
        impl RngCore for Fixed {
            fn next_u32(&mut self) -> u32 {
                77
            }
            fn next_u64(&mut self) -> u64 {
                77
            }
            fn fill_bytes(&mut self, dest: &mut [u8]) {
                dest.fill(77);
            }
            fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
                dest.fill(77);
                Ok(())
            }
        }

        let mut conn = Connection::with_rng(
            Config {
                fixed_isn: None,
                ..config()
            },
            &mut Fixed,
        );
        conn.connect();
        assert_eq!(expect_one(&mut conn).header.seqno, wrap(0, SeqNo::new(77)));
    }
}
