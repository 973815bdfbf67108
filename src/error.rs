//! Errors raised by the wire codec and the TUN driver.
//!
//! The protocol engine itself never fails: aborts show up as stream error
//! flags and an inactive connection.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("poll failed: {0}")]
    Poll(#[from] nix::Error),

    /// etherparse refused to decode or encode a header
    #[error("malformed datagram: {0}")]
    Malformed(String),

    #[error("not a TCP datagram")]
    NotTcp,

    #[error("checksum mismatch: computed {expected:#06x}, carried {actual:#06x}")]
    Checksum { expected: u16, actual: u16 },

    #[error("interface state poisoned")]
    Poisoned,

    #[error("port {0} already bound")]
    AddrInUse(u16),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            Error::AddrInUse(_) => io::Error::new(io::ErrorKind::AddrInUse, err),
            Error::Malformed(_) | Error::NotTcp | Error::Checksum { .. } => {
                io::Error::new(io::ErrorKind::InvalidData, err)
            }
            Error::Poll(_) | Error::Poisoned => io::Error::new(io::ErrorKind::Other, err),
        }
    }
}
