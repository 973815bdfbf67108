use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, Shutdown};

use tcpengine::{Config, Interface};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut iface = Interface::new("tun0", Ipv4Addr::new(192, 168, 0, 2), Config::default())?;
    let mut listener = iface.bind(6000)?;

    // echo every connection back to its peer, one at a time
    loop {
        let mut stream = listener.accept()?;
        info!("Connected");
        let mut buf = [0u8; 1024];
        loop {
            let n = stream.read(&mut buf)?;
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n])?;
        }
        stream.shutdown(Shutdown::Write)?;
        info!("Peer closed, state {:?}", stream.state()?);
    }
}
