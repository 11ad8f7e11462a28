//! Link/network/transport header decoding
//!
//! Turns a raw captured frame into a `TransportSegment` carrying the DNS
//! candidate payload and its 4-tuple. The link layer is not always Ethernet:
//! capturing on the Linux `any` pseudo-device yields cooked SLL/SLL2 headers,
//! and loopback captures carry a 4-byte address-family word, so the stripper
//! is selected by the datalink type the capture source reports.

use std::net::IpAddr;

use derive_more::{Display, Error};
use etherparse::{EtherType, NetSlice, SlicedPacket, TransportSlice};

/// Datalink framing reported by the capture source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    /// DLT_EN10MB
    Ethernet,
    /// DLT_LINUX_SLL, the 16-byte cooked header of the `any` device
    LinuxSll,
    /// DLT_LINUX_SLL2, the 20-byte v2 cooked header
    LinuxSll2,
    /// DLT_NULL / DLT_LOOP, a 4-byte address family word
    Loopback,
    /// DLT_RAW, bare IP with no link header
    RawIp,
    /// Any datalink without a stripper; every frame rejects as invalid
    Unknown(i32),
}

impl LinkLayer {
    /// Map a libpcap datalink id onto a stripper. Unrecognized ids still
    /// capture; their frames are rejected per-frame by `decode`.
    pub fn from_datalink(dlt: i32) -> LinkLayer {
        match dlt {
            0 | 108 => LinkLayer::Loopback,
            1 => LinkLayer::Ethernet,
            12 | 101 => LinkLayer::RawIp,
            113 => LinkLayer::LinuxSll,
            276 => LinkLayer::LinuxSll2,
            other => LinkLayer::Unknown(other),
        }
    }
}

const SLL_HEADER_LEN: usize = 16;
const SLL_PROTOCOL_OFFSET: usize = 14;
const SLL2_HEADER_LEN: usize = 20;
const LOOPBACK_HEADER_LEN: usize = 4;

#[derive(Debug, Display, Error, PartialEq, Eq)]
pub enum DecodeError {
    Truncated,
    UnsupportedLink,
    UnsupportedNetwork,
    UnsupportedTransport,
}

type Result<T> = std::result::Result<T, DecodeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

/// The output of the decoder: transport payload plus its 4-tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportSegment {
    pub proto: Transport,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub payload: Vec<u8>,
}

impl TransportSegment {
    pub fn involves_port(&self, port: u16) -> bool {
        self.src_port == port || self.dst_port == port
    }

    /// The bytes to hand the DNS parser.
    ///
    /// DNS over TCP prefixes each message with a 2-byte length. Segments are
    /// parsed standalone (no stream reassembly), so the prefix is stripped
    /// only when it matches the remaining payload exactly; anything else is
    /// left for the parser to reject.
    pub fn dns_payload(&self) -> &[u8] {
        if self.proto == Transport::Tcp && self.payload.len() >= 2 {
            let prefixed = ((self.payload[0] as usize) << 8) | self.payload[1] as usize;
            if prefixed == self.payload.len() - 2 {
                return &self.payload[2..];
            }
        }
        &self.payload
    }
}

/// Decode one captured frame down to its transport payload.
pub fn decode(link: LinkLayer, frame: &[u8]) -> Result<TransportSegment> {
    let sliced = match link {
        LinkLayer::Ethernet => SlicedPacket::from_ethernet(frame),
        LinkLayer::LinuxSll => {
            if frame.len() < SLL_HEADER_LEN {
                return Err(DecodeError::Truncated);
            }
            let ether_type = ((frame[SLL_PROTOCOL_OFFSET] as u16) << 8)
                | frame[SLL_PROTOCOL_OFFSET + 1] as u16;
            SlicedPacket::from_ether_type(EtherType(ether_type), &frame[SLL_HEADER_LEN..])
        }
        LinkLayer::LinuxSll2 => {
            if frame.len() < SLL2_HEADER_LEN {
                return Err(DecodeError::Truncated);
            }
            // SLL2 places the protocol in the first two bytes.
            let ether_type = ((frame[0] as u16) << 8) | frame[1] as u16;
            SlicedPacket::from_ether_type(EtherType(ether_type), &frame[SLL2_HEADER_LEN..])
        }
        LinkLayer::Loopback => {
            if frame.len() < LOOPBACK_HEADER_LEN {
                return Err(DecodeError::Truncated);
            }
            SlicedPacket::from_ip(&frame[LOOPBACK_HEADER_LEN..])
        }
        LinkLayer::RawIp => SlicedPacket::from_ip(frame),
        LinkLayer::Unknown(_) => return Err(DecodeError::UnsupportedLink),
    }
    .map_err(|_| DecodeError::Truncated)?;

    // etherparse resolves IPv6 extension header chains, so the transport
    // slice below is the real upper-layer header.
    let (src_ip, dst_ip) = match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => (
            IpAddr::V4(ipv4.header().source_addr()),
            IpAddr::V4(ipv4.header().destination_addr()),
        ),
        Some(NetSlice::Ipv6(ipv6)) => (
            IpAddr::V6(ipv6.header().source_addr()),
            IpAddr::V6(ipv6.header().destination_addr()),
        ),
        None => return Err(DecodeError::UnsupportedNetwork),
    };

    let (proto, src_port, dst_port, payload) = match &sliced.transport {
        Some(TransportSlice::Udp(udp)) => (
            Transport::Udp,
            udp.source_port(),
            udp.destination_port(),
            udp.payload(),
        ),
        Some(TransportSlice::Tcp(tcp)) => (
            Transport::Tcp,
            tcp.source_port(),
            tcp.destination_port(),
            tcp.payload(),
        ),
        _ => return Err(DecodeError::UnsupportedTransport),
    };

    Ok(TransportSegment {
        proto,
        src_ip,
        dst_ip,
        src_port,
        dst_port,
        payload: payload.to_vec(),
    })
}
