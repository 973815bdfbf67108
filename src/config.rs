use crate::tcp::sequence::SeqNo;

/// Tunables for one connection endpoint.
///
/// Build one with struct-update syntax:
///
/// ```
/// use tcpengine::Config;
///
/// let config = Config {
///     rt_timeout: 200,
///     ..Config::default()
/// };
/// assert_eq!(config.max_retx_attempts, 8);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Capacity of the inbound byte stream, and so of the receive window.
    pub recv_capacity: usize,
    /// Capacity of the outbound byte stream.
    pub send_capacity: usize,
    /// Initial retransmission timeout in milliseconds.
    pub rt_timeout: u16,
    /// Initial sequence number to use instead of a random one.
    pub fixed_isn: Option<SeqNo>,
    /// Retransmissions in a row tolerated before the connection is aborted.
    pub max_retx_attempts: u32,
    /// Largest payload put into a single outbound segment.
    pub max_payload_size: usize,
}

impl Config {
    pub const DEFAULT_CAPACITY: usize = 64000;
    pub const MAX_PAYLOAD_SIZE: usize = 1000;
    pub const TIMEOUT_DFLT: u16 = 1000;
    pub const MAX_RETX_ATTEMPTS: u32 = 8;
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recv_capacity: Self::DEFAULT_CAPACITY,
            send_capacity: Self::DEFAULT_CAPACITY,
            rt_timeout: Self::TIMEOUT_DFLT,
            fixed_isn: None,
            max_retx_attempts: Self::MAX_RETX_ATTEMPTS,
            max_payload_size: Self::MAX_PAYLOAD_SIZE,
        }
    }
}
