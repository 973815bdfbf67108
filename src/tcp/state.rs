use bitflags::bitflags;

use super::receiver::Receiver;
use super::sender::Sender;

bitflags! {
    /// What a user of the connection could do right now without blocking.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Available: u8 {
        const READ = 0b0000_0001;
        const WRITE = 0b0000_0010;
    }
}

/// Where the sending half is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Error,
    /// Nothing sent yet.
    Closed,
    /// SYN sent, not yet acknowledged.
    SynSent,
    /// SYN acknowledged, FIN not sent.
    SynAcked,
    FinSent,
    FinAcked,
}

impl SenderState {
    pub fn of(sender: &Sender) -> Self {
        let stream = sender.stream_in();
        let next = sender.next_seqno_absolute();
        if stream.error() {
            Self::Error
        } else if next == 0 {
            Self::Closed
        } else if next == sender.bytes_in_flight() {
            Self::SynSent
        } else if !stream.eof() || next < stream.bytes_written() + 2 {
            Self::SynAcked
        } else if sender.bytes_in_flight() > 0 {
            Self::FinSent
        } else {
            Self::FinAcked
        }
    }
}

/// Where the receiving half is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Error,
    /// Waiting for the peer's SYN.
    Listen,
    SynRecv,
    FinRecv,
}

impl ReceiverState {
    pub fn of(receiver: &Receiver) -> Self {
        if receiver.stream_out().error() {
            Self::Error
        } else if receiver.ackno().is_none() {
            Self::Listen
        } else if receiver.stream_out().input_ended() {
            Self::FinRecv
        } else {
            Self::SynRecv
        }
    }
}

/// A connection progresses through a series of states during its lifetime.
/// The states are named after RFC 793 Section 3.2; here they are derived
/// from the state of the sending and receiving halves rather than stored.
///
/// - `Listen`: waiting for a connection request from the peer.
///
/// - `SynSent`: waiting for a matching connection request after having sent
///   one.
///
/// - `SynReceived`: waiting for a confirming acknowledgment after having
///   both received and sent a connection request.
///
/// - `Established`: the data transfer phase.
///
/// - `FinWait1`: our FIN is unacknowledged and the peer has not closed.
///
/// - `FinWait2`: our FIN is acknowledged, waiting for the peer's.
///
/// - `CloseWait`: the peer has closed, waiting for the local user.
///
/// - `Closing`: both sides closed, waiting for the ACK of our FIN.
///
/// - `LastAck`: like `Closing` after a passive close, no lingering needed.
///
/// - `TimeWait`: both sides closed and acknowledged, lingering to
///   re-acknowledge a retransmitted FIN.
///
/// - `Closed`: the connection ended cleanly.
///
/// - `Reset`: the connection was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
    Closed,
    Reset,
}

impl State {
    pub fn summarize(sender: SenderState, receiver: ReceiverState, active: bool, linger: bool) -> Self {
        use ReceiverState as R;
        use SenderState as S;

        match (receiver, sender) {
            (R::Error, _) | (_, S::Error) => Self::Reset,
            _ if !active => Self::Closed,
            (R::Listen, S::Closed) => Self::Listen,
            (R::Listen, _) => Self::SynSent,
            (R::SynRecv | R::FinRecv, S::Closed | S::SynSent) => Self::SynReceived,
            (R::SynRecv, S::SynAcked) => Self::Established,
            (R::SynRecv, S::FinSent) => Self::FinWait1,
            (R::SynRecv, S::FinAcked) => Self::FinWait2,
            (R::FinRecv, S::SynAcked) => Self::CloseWait,
            (R::FinRecv, S::FinSent) if linger => Self::Closing,
            (R::FinRecv, S::FinSent) => Self::LastAck,
            (R::FinRecv, S::FinAcked) if linger => Self::TimeWait,
            (R::FinRecv, S::FinAcked) => Self::Closed,
        }
    }

    /// Both directions are open for data.
    pub fn is_synchronized(&self) -> bool {
        !matches!(
            self,
            Self::Listen | Self::SynSent | Self::SynReceived | Self::Closed | Self::Reset
        )
    }
}
