use bitflags::bitflags;
use etherparse::{IpNumber, Ipv4Header, Ipv4HeaderSlice, TcpHeader, TcpHeaderSlice};

use super::connection::Tcp4Tuple;
use super::sequence::SeqNo;
use crate::error::{Error, Result};

const TTL: u8 = 64;

bitflags! {
    /// Control bits of a segment header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Flags: u8 {
        const FIN = 0b0000_0001;
        const SYN = 0b0000_0010;
        const RST = 0b0000_0100;
        const ACK = 0b0001_0000;
    }
}

/// The fields of a TCP header the protocol engine reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub seqno: SeqNo,
    /// Only meaningful when [`Flags::ACK`] is set.
    pub ackno: SeqNo,
    pub win: u16,
    pub flags: Flags,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            seqno: SeqNo::default(),
            ackno: SeqNo::default(),
            win: 0,
            flags: Flags::empty(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segment {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Segment {
    pub fn syn(&self) -> bool {
        self.header.flags.contains(Flags::SYN)
    }

    pub fn ack(&self) -> bool {
        self.header.flags.contains(Flags::ACK)
    }

    pub fn fin(&self) -> bool {
        self.header.flags.contains(Flags::FIN)
    }

    pub fn rst(&self) -> bool {
        self.header.flags.contains(Flags::RST)
    }

    /// Payload length plus one for each of SYN and FIN.
    pub fn length_in_sequence_space(&self) -> usize {
        self.payload.len() + usize::from(self.syn()) + usize::from(self.fin())
    }

    /// Decodes an IPv4 datagram carrying a TCP segment.
    ///
    /// The returned tuple is seen from the receiving side: `src` is the
    /// datagram's destination. The TCP checksum is verified against the IPv4
    /// pseudo-header.
    pub fn parse(datagram: &[u8]) -> Result<(Tcp4Tuple, Segment)> {
        let ip = Ipv4HeaderSlice::from_slice(datagram)
            .map_err(|e| Error::Malformed(e.to_string()))?;
        if ip.protocol() != IpNumber::TCP {
            return Err(Error::NotTcp);
        }
        let ip_len = ip.slice().len();
        let end = usize::from(ip.total_len()).clamp(ip_len, datagram.len());
        let tcp_raw = &datagram[ip_len..end];
        let tcp = TcpHeaderSlice::from_slice(tcp_raw).map_err(|e| Error::Malformed(e.to_string()))?;
        let payload = &tcp_raw[tcp.slice().len()..];

        let expected = tcp
            .calc_checksum_ipv4(&ip, payload)
            .map_err(|e| Error::Malformed(e.to_string()))?;
        if expected != tcp.checksum() {
            return Err(Error::Checksum {
                expected,
                actual: tcp.checksum(),
            });
        }

        let mut flags = Flags::empty();
        flags.set(Flags::SYN, tcp.syn());
        flags.set(Flags::ACK, tcp.ack());
        flags.set(Flags::FIN, tcp.fin());
        flags.set(Flags::RST, tcp.rst());

        let quad = Tcp4Tuple {
            src: (ip.destination_addr(), tcp.destination_port()),
            dst: (ip.source_addr(), tcp.source_port()),
        };
        let segment = Segment {
            header: Header {
                seqno: SeqNo::new(tcp.sequence_number()),
                ackno: SeqNo::new(tcp.acknowledgment_number()),
                win: tcp.window_size(),
                flags,
            },
            payload: payload.to_vec(),
        };
        Ok((quad, segment))
    }

    /// Encodes the segment as an IPv4 datagram travelling from `quad.src` to
    /// `quad.dst`, with a freshly computed checksum.
    pub fn serialize(&self, quad: &Tcp4Tuple) -> Result<Vec<u8>> {
        let mut tcp = TcpHeader::new(
            quad.src.1,
            quad.dst.1,
            self.header.seqno.raw(),
            self.header.win,
        );
        tcp.syn = self.syn();
        tcp.ack = self.ack();
        tcp.fin = self.fin();
        tcp.rst = self.rst();
        tcp.acknowledgment_number = self.header.ackno.raw();

        let tcp_len = tcp.header_len() as usize + self.payload.len();
        let payload_len = u16::try_from(tcp_len)
            .map_err(|_| Error::Malformed(format!("segment of {} bytes", tcp_len)))?;
        let ip = Ipv4Header::new(
            payload_len,
            TTL,
            IpNumber::TCP,
            quad.src.0.octets(),
            quad.dst.0.octets(),
        )
        .map_err(|e| Error::Malformed(e.to_string()))?;

        tcp.checksum = tcp
            .calc_checksum_ipv4(&ip, &self.payload)
            .map_err(|e| Error::Malformed(e.to_string()))?;

        let mut datagram = Vec::with_capacity(ip.header_len() as usize + tcp_len);
        ip.write(&mut datagram)?;
        tcp.write(&mut datagram)?;
        datagram.extend_from_slice(&self.payload);
        Ok(datagram)
    }
}
