//! DNS protocol definitions and message parsing
//!
//! The observer side of the DNS wire format: anything a capture hands us is
//! decoded into a `DnsPacket` or rejected with an error, never a panic. The
//! header's QR bit (`DnsHeader::response`) decides which endpoint acted as
//! the server for an exchange; the rest of the message is carried through
//! to analyzers verbatim.
//!
//! Writing support covers only what is needed to synthesize messages for
//! tests and benches: the header, questions and raw names.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use derive_more::{Display, Error, From};
use serde::{Deserialize, Serialize};

use crate::sensor::buffer::{PacketBuffer, VectorPacketBuffer};

#[derive(Debug, Display, From, Error)]
pub enum ProtocolError {
    Buffer(crate::sensor::buffer::BufferError),
}

type Result<T> = std::result::Result<T, ProtocolError>;

/// `QueryType` represents the record type of a question or record
///
/// Unknown types keep their numeric id so that unrecognized records can be
/// carried through (and logged) without loss. Convert with `from_num` and
/// `to_num`.
#[derive(PartialEq, Eq, Debug, Clone, Hash, Copy, Serialize, Deserialize)]
pub enum QueryType {
    Unknown(u16),
    A,     // 1
    Ns,    // 2
    Cname, // 5
    Soa,   // 6
    Ptr,   // 12
    Mx,    // 15
    Txt,   // 16
    Aaaa,  // 28
    Srv,   // 33
    Opt,   // 41
}

impl QueryType {
    pub fn to_num(&self) -> u16 {
        match *self {
            QueryType::Unknown(x) => x,
            QueryType::A => 1,
            QueryType::Ns => 2,
            QueryType::Cname => 5,
            QueryType::Soa => 6,
            QueryType::Ptr => 12,
            QueryType::Mx => 15,
            QueryType::Txt => 16,
            QueryType::Aaaa => 28,
            QueryType::Srv => 33,
            QueryType::Opt => 41,
        }
    }

    pub fn from_num(num: u16) -> QueryType {
        match num {
            1 => QueryType::A,
            2 => QueryType::Ns,
            5 => QueryType::Cname,
            6 => QueryType::Soa,
            12 => QueryType::Ptr,
            15 => QueryType::Mx,
            16 => QueryType::Txt,
            28 => QueryType::Aaaa,
            33 => QueryType::Srv,
            41 => QueryType::Opt,
            _ => QueryType::Unknown(num),
        }
    }
}

/// `DnsRecord` is the representation of an observed resource record
///
/// Records appear in the answer, authority and additional sections of
/// captured messages. Types the monitor does not model are retained as
/// `Unknown` with their raw type id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DnsRecord {
    Unknown {
        domain: String,
        qtype: u16,
        data_len: u16,
        ttl: u32,
    }, // 0
    A {
        domain: String,
        addr: Ipv4Addr,
        ttl: u32,
    }, // 1
    Ns {
        domain: String,
        host: String,
        ttl: u32,
    }, // 2
    Cname {
        domain: String,
        host: String,
        ttl: u32,
    }, // 5
    Soa {
        domain: String,
        m_name: String,
        r_name: String,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
        ttl: u32,
    }, // 6
    Ptr {
        domain: String,
        host: String,
        ttl: u32,
    }, // 12
    Mx {
        domain: String,
        priority: u16,
        host: String,
        ttl: u32,
    }, // 15
    Txt {
        domain: String,
        data: String,
        ttl: u32,
    }, // 16
    Aaaa {
        domain: String,
        addr: Ipv6Addr,
        ttl: u32,
    }, // 28
    Srv {
        domain: String,
        priority: u16,
        weight: u16,
        port: u16,
        host: String,
        ttl: u32,
    }, // 33
    Opt {
        packet_len: u16,
        flags: u32,
        data_len: u16,
    }, // 41
}

impl DnsRecord {
    pub fn read<T: PacketBuffer>(buffer: &mut T) -> Result<DnsRecord> {
        let mut domain = String::new();
        buffer.read_qname(&mut domain)?;

        let qtype_num = buffer.read_u16()?;
        let qtype = QueryType::from_num(qtype_num);
        let class = buffer.read_u16()?;
        let ttl = buffer.read_u32()?;
        let data_len = buffer.read_u16()?;

        match qtype {
            QueryType::A => {
                let raw_addr = buffer.read_u32()?;
                let addr = Ipv4Addr::from(raw_addr);

                Ok(DnsRecord::A { domain, addr, ttl })
            }
            QueryType::Aaaa => {
                let mut octets = [0u8; 16];
                for octet in octets.iter_mut() {
                    *octet = buffer.read()?;
                }
                let addr = Ipv6Addr::from(octets);

                Ok(DnsRecord::Aaaa { domain, addr, ttl })
            }
            QueryType::Ns => {
                let mut ns = String::new();
                buffer.read_qname(&mut ns)?;

                Ok(DnsRecord::Ns {
                    domain,
                    host: ns,
                    ttl,
                })
            }
            QueryType::Cname => {
                let mut cname = String::new();
                buffer.read_qname(&mut cname)?;

                Ok(DnsRecord::Cname {
                    domain,
                    host: cname,
                    ttl,
                })
            }
            QueryType::Ptr => {
                let mut ptr = String::new();
                buffer.read_qname(&mut ptr)?;

                Ok(DnsRecord::Ptr {
                    domain,
                    host: ptr,
                    ttl,
                })
            }
            QueryType::Srv => {
                let priority = buffer.read_u16()?;
                let weight = buffer.read_u16()?;
                let port = buffer.read_u16()?;

                let mut srv = String::new();
                buffer.read_qname(&mut srv)?;

                Ok(DnsRecord::Srv {
                    domain,
                    priority,
                    weight,
                    port,
                    host: srv,
                    ttl,
                })
            }
            QueryType::Mx => {
                let priority = buffer.read_u16()?;
                let mut mx = String::new();
                buffer.read_qname(&mut mx)?;

                Ok(DnsRecord::Mx {
                    domain,
                    priority,
                    host: mx,
                    ttl,
                })
            }
            QueryType::Soa => {
                let mut m_name = String::new();
                buffer.read_qname(&mut m_name)?;

                let mut r_name = String::new();
                buffer.read_qname(&mut r_name)?;

                let serial = buffer.read_u32()?;
                let refresh = buffer.read_u32()?;
                let retry = buffer.read_u32()?;
                let expire = buffer.read_u32()?;
                let minimum = buffer.read_u32()?;

                Ok(DnsRecord::Soa {
                    domain,
                    m_name,
                    r_name,
                    serial,
                    refresh,
                    retry,
                    expire,
                    minimum,
                    ttl,
                })
            }
            QueryType::Txt => {
                let cur_pos = buffer.pos();
                let data = String::from_utf8_lossy(
                    buffer.get_range(cur_pos, data_len as usize)?,
                )
                .into_owned();

                buffer.step(data_len as usize)?;

                Ok(DnsRecord::Txt { domain, data, ttl })
            }
            QueryType::Opt => {
                // OPT pseudo-records overload class and ttl; the option data
                // itself is not interpreted by the monitor.
                buffer.step(data_len as usize)?;

                Ok(DnsRecord::Opt {
                    packet_len: class,
                    flags: ttl,
                    data_len,
                })
            }
            QueryType::Unknown(_) => {
                buffer.step(data_len as usize)?;

                Ok(DnsRecord::Unknown {
                    domain,
                    qtype: qtype_num,
                    data_len,
                    ttl,
                })
            }
        }
    }

    pub fn get_querytype(&self) -> QueryType {
        match *self {
            DnsRecord::A { .. } => QueryType::A,
            DnsRecord::Aaaa { .. } => QueryType::Aaaa,
            DnsRecord::Ns { .. } => QueryType::Ns,
            DnsRecord::Cname { .. } => QueryType::Cname,
            DnsRecord::Ptr { .. } => QueryType::Ptr,
            DnsRecord::Srv { .. } => QueryType::Srv,
            DnsRecord::Mx { .. } => QueryType::Mx,
            DnsRecord::Unknown { qtype, .. } => QueryType::Unknown(qtype),
            DnsRecord::Soa { .. } => QueryType::Soa,
            DnsRecord::Txt { .. } => QueryType::Txt,
            DnsRecord::Opt { .. } => QueryType::Opt,
        }
    }

    pub fn get_domain(&self) -> Option<String> {
        match *self {
            DnsRecord::A { ref domain, .. }
            | DnsRecord::Aaaa { ref domain, .. }
            | DnsRecord::Ns { ref domain, .. }
            | DnsRecord::Cname { ref domain, .. }
            | DnsRecord::Ptr { ref domain, .. }
            | DnsRecord::Srv { ref domain, .. }
            | DnsRecord::Mx { ref domain, .. }
            | DnsRecord::Unknown { ref domain, .. }
            | DnsRecord::Soa { ref domain, .. }
            | DnsRecord::Txt { ref domain, .. } => Some(domain.clone()),
            DnsRecord::Opt { .. } => None,
        }
    }

    /// Compact one-line rendering of the record data, for the packet log.
    pub fn rdata_summary(&self) -> String {
        match *self {
            DnsRecord::A { ref addr, .. } => addr.to_string(),
            DnsRecord::Aaaa { ref addr, .. } => addr.to_string(),
            DnsRecord::Ns { ref host, .. }
            | DnsRecord::Cname { ref host, .. }
            | DnsRecord::Ptr { ref host, .. } => host.clone(),
            DnsRecord::Mx {
                priority, ref host, ..
            } => format!("{} {}", priority, host),
            DnsRecord::Srv {
                priority,
                weight,
                port,
                ref host,
                ..
            } => format!("{} {} {} {}", priority, weight, port, host),
            DnsRecord::Soa {
                ref m_name, serial, ..
            } => format!("{} {}", m_name, serial),
            DnsRecord::Txt { ref data, .. } => data.clone(),
            DnsRecord::Opt { .. } => String::new(),
            DnsRecord::Unknown {
                qtype, data_len, ..
            } => format!("type{} len{}", qtype, data_len),
        }
    }
}

/// The result code of an observed response
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResultCode {
    #[default]
    NOERROR = 0,
    FORMERR = 1,
    SERVFAIL = 2,
    NXDOMAIN = 3,
    NOTIMP = 4,
    REFUSED = 5,
}

impl ResultCode {
    pub fn from_num(num: u8) -> ResultCode {
        match num {
            1 => ResultCode::FORMERR,
            2 => ResultCode::SERVFAIL,
            3 => ResultCode::NXDOMAIN,
            4 => ResultCode::NOTIMP,
            5 => ResultCode::REFUSED,
            _ => ResultCode::NOERROR,
        }
    }
}

/// Representation of a DNS header
///
/// `response` is the QR bit: false for questions, true for answers. It is
/// the one field the pipeline itself interprets; everything else is carried
/// for the analyzers.
#[derive(Clone, Debug, Default)]
pub struct DnsHeader {
    pub id: u16, // 16 bits

    pub recursion_desired: bool,    // 1 bit
    pub truncated_message: bool,    // 1 bit
    pub authoritative_answer: bool, // 1 bit
    pub opcode: u8,                 // 4 bits
    pub response: bool,             // 1 bit

    pub rescode: ResultCode,       // 4 bits
    pub checking_disabled: bool,   // 1 bit
    pub authed_data: bool,         // 1 bit
    pub z: bool,                   // 1 bit
    pub recursion_available: bool, // 1 bit

    pub questions: u16,             // 16 bits
    pub answers: u16,               // 16 bits
    pub authoritative_entries: u16, // 16 bits
    pub resource_entries: u16,      // 16 bits
}

impl DnsHeader {
    pub fn new() -> DnsHeader {
        DnsHeader::default()
    }

    pub fn read<T: PacketBuffer>(&mut self, buffer: &mut T) -> Result<()> {
        self.id = buffer.read_u16()?;

        let flags = buffer.read_u16()?;
        let a = (flags >> 8) as u8;
        let b = (flags & 0xFF) as u8;
        self.recursion_desired = (a & (1 << 0)) > 0;
        self.truncated_message = (a & (1 << 1)) > 0;
        self.authoritative_answer = (a & (1 << 2)) > 0;
        self.opcode = (a >> 3) & 0x0F;
        self.response = (a & (1 << 7)) > 0;

        self.rescode = ResultCode::from_num(b & 0x0F);
        self.checking_disabled = (b & (1 << 4)) > 0;
        self.authed_data = (b & (1 << 5)) > 0;
        self.z = (b & (1 << 6)) > 0;
        self.recursion_available = (b & (1 << 7)) > 0;

        self.questions = buffer.read_u16()?;
        self.answers = buffer.read_u16()?;
        self.authoritative_entries = buffer.read_u16()?;
        self.resource_entries = buffer.read_u16()?;

        Ok(())
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_u16(self.id)?;

        buffer.write_u8(
            (self.recursion_desired as u8)
                | ((self.truncated_message as u8) << 1)
                | ((self.authoritative_answer as u8) << 2)
                | (self.opcode << 3)
                | ((self.response as u8) << 7),
        )?;

        buffer.write_u8(
            (self.rescode as u8)
                | ((self.checking_disabled as u8) << 4)
                | ((self.authed_data as u8) << 5)
                | ((self.z as u8) << 6)
                | ((self.recursion_available as u8) << 7),
        )?;

        buffer.write_u16(self.questions)?;
        buffer.write_u16(self.answers)?;
        buffer.write_u16(self.authoritative_entries)?;
        buffer.write_u16(self.resource_entries)?;

        Ok(())
    }
}

impl fmt::Display for DnsHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id={} qr={} opcode={} rcode={:?} qd={} an={} ns={} ar={}",
            self.id,
            self.response as u8,
            self.opcode,
            self.rescode,
            self.questions,
            self.answers,
            self.authoritative_entries,
            self.resource_entries
        )
    }
}

/// Representation of a DNS question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: QueryType,
}

impl DnsQuestion {
    pub fn new(name: String, qtype: QueryType) -> DnsQuestion {
        DnsQuestion { name, qtype }
    }

    pub fn read<T: PacketBuffer>(&mut self, buffer: &mut T) -> Result<()> {
        buffer.read_qname(&mut self.name)?;
        self.qtype = QueryType::from_num(buffer.read_u16()?); // qtype
        let _ = buffer.read_u16()?; // class

        Ok(())
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_qname(&self.name)?;
        buffer.write_u16(self.qtype.to_num())?;
        buffer.write_u16(1)?;

        Ok(())
    }
}

/// A complete observed DNS message
///
/// Parsed in a single operation from a transport payload. The monitor never
/// mutates a parsed message; it travels to the analyzers as-is.
#[derive(Clone, Debug, Default)]
pub struct DnsPacket {
    pub header: DnsHeader,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
    pub authorities: Vec<DnsRecord>,
    pub resources: Vec<DnsRecord>,
}

impl DnsPacket {
    pub fn new() -> DnsPacket {
        DnsPacket::default()
    }

    pub fn from_buffer<T: PacketBuffer>(buffer: &mut T) -> Result<DnsPacket> {
        let mut result = DnsPacket::new();
        result.header.read(buffer)?;

        for _ in 0..result.header.questions {
            let mut question = DnsQuestion::new("".to_string(), QueryType::Unknown(0));
            question.read(buffer)?;
            result.questions.push(question);
        }

        for _ in 0..result.header.answers {
            let rec = DnsRecord::read(buffer)?;
            result.answers.push(rec);
        }
        for _ in 0..result.header.authoritative_entries {
            let rec = DnsRecord::read(buffer)?;
            result.authorities.push(rec);
        }
        for _ in 0..result.header.resource_entries {
            let rec = DnsRecord::read(buffer)?;
            result.resources.push(rec);
        }

        Ok(result)
    }

    /// True when the QR bit marks this message as a response.
    pub fn is_response(&self) -> bool {
        self.header.response
    }

    pub fn first_question(&self) -> Option<&DnsQuestion> {
        self.questions.first()
    }

    /// One summary string per answer record, for the packet log.
    pub fn answer_summaries(&self) -> Vec<String> {
        self.answers
            .iter()
            .map(|rec| {
                format!(
                    "{} {} {}",
                    rec.get_domain().unwrap_or_default(),
                    rec.get_querytype().to_num(),
                    rec.rdata_summary()
                )
            })
            .collect()
    }
}

/// Parse a transport payload as a DNS message.
///
/// This is the pipeline's entry point into the parser: malformed input of
/// any shape yields an `Err`, never a panic, and no partial message.
pub fn parse_message(payload: &[u8]) -> Result<DnsPacket> {
    let mut buffer = VectorPacketBuffer::from_slice(payload);
    DnsPacket::from_buffer(&mut buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question_message(qname: &str, response: bool) -> Vec<u8> {
        let mut buffer = VectorPacketBuffer::new();
        let mut header = DnsHeader::new();
        header.id = 1337;
        header.response = response;
        header.questions = 1;
        header.write(&mut buffer).unwrap();
        DnsQuestion::new(qname.to_string(), QueryType::A)
            .write(&mut buffer)
            .unwrap();
        buffer.buffer
    }

    #[test]
    fn test_parse_question() {
        let raw = question_message("example.com", false);
        let packet = parse_message(&raw).unwrap();

        assert!(!packet.is_response());
        assert_eq!(1, packet.questions.len());
        assert_eq!("example.com", packet.questions[0].name);
        assert_eq!(QueryType::A, packet.questions[0].qtype);
    }

    #[test]
    fn test_qr_bit() {
        let raw = question_message("example.com", true);
        let packet = parse_message(&raw).unwrap();
        assert!(packet.is_response());
    }

    #[test]
    fn test_parse_answer_record() {
        let mut buffer = VectorPacketBuffer::new();
        let mut header = DnsHeader::new();
        header.id = 42;
        header.response = true;
        header.questions = 1;
        header.answers = 1;
        header.write(&mut buffer).unwrap();
        DnsQuestion::new("example.com".to_string(), QueryType::A)
            .write(&mut buffer)
            .unwrap();

        // Hand-encoded A record answer reusing the question name.
        buffer.write_qname("example.com").unwrap();
        buffer.write_u16(QueryType::A.to_num()).unwrap();
        buffer.write_u16(1).unwrap();
        buffer.write_u32(3600).unwrap();
        buffer.write_u16(4).unwrap();
        buffer.write_u32(u32::from(Ipv4Addr::new(93, 184, 216, 34))).unwrap();

        let packet = parse_message(&buffer.buffer).unwrap();
        assert_eq!(1, packet.answers.len());
        assert_eq!(
            DnsRecord::A {
                domain: "example.com".to_string(),
                addr: Ipv4Addr::new(93, 184, 216, 34),
                ttl: 3600,
            },
            packet.answers[0]
        );
        assert_eq!(vec!["example.com 1 93.184.216.34"], packet.answer_summaries());
    }

    #[test]
    fn test_truncated_header_rejected() {
        assert!(parse_message(&[0x12, 0x34, 0x01]).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        // Claims one question but the name runs off the end of the buffer.
        let raw = [0u8, 1, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0xFF];
        assert!(parse_message(&raw).is_err());
    }

    #[test]
    fn test_empty_payload_rejected() {
        assert!(parse_message(&[]).is_err());
    }
}
