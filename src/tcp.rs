//! The protocol engine. Nothing in here touches a device, a socket, or a
//! clock: segments and elapsed time come in, segments go out.

pub mod connection;
pub mod reassembler;
pub mod receiver;
pub mod segment;
pub mod sender;
pub mod sequence;
pub mod state;
pub mod stream;
pub mod timer;
