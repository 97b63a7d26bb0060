//! implements the DNS protocol in a transport agnostic fashion

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::dns::buffer::{BufferError, PacketBuffer, Result};

#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub enum QueryType {
    UNKNOWN(u16),
    A,     // 1
    NS,    // 2
    CNAME, // 5
    SOA,   // 6
    MX,    // 15
    TXT,   // 16
    AAAA,  // 28
}

impl QueryType {
    pub fn to_num(&self) -> u16 {
        match *self {
            QueryType::UNKNOWN(x) => x,
            QueryType::A => 1,
            QueryType::NS => 2,
            QueryType::CNAME => 5,
            QueryType::SOA => 6,
            QueryType::MX => 15,
            QueryType::TXT => 16,
            QueryType::AAAA => 28,
        }
    }

    pub fn from_num(num: u16) -> QueryType {
        match num {
            1 => QueryType::A,
            2 => QueryType::NS,
            5 => QueryType::CNAME,
            6 => QueryType::SOA,
            15 => QueryType::MX,
            16 => QueryType::TXT,
            28 => QueryType::AAAA,
            _ => QueryType::UNKNOWN(num),
        }
    }

    /// Look up a type by its mnemonic, e.g. "AAAA" or "mx".
    pub fn from_name(name: &str) -> Option<QueryType> {
        match name.to_uppercase().as_str() {
            "A" => Some(QueryType::A),
            "NS" => Some(QueryType::NS),
            "CNAME" => Some(QueryType::CNAME),
            "SOA" => Some(QueryType::SOA),
            "MX" => Some(QueryType::MX),
            "TXT" => Some(QueryType::TXT),
            "AAAA" => Some(QueryType::AAAA),
            _ => None,
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash)]
pub enum QueryClass {
    UNKNOWN(u16),
    IN, // 1
    CH, // 3
    HS, // 4
}

impl QueryClass {
    pub fn to_num(&self) -> u16 {
        match *self {
            QueryClass::UNKNOWN(x) => x,
            QueryClass::IN => 1,
            QueryClass::CH => 3,
            QueryClass::HS => 4,
        }
    }

    pub fn from_num(num: u16) -> QueryClass {
        match num {
            1 => QueryClass::IN,
            3 => QueryClass::CH,
            4 => QueryClass::HS,
            _ => QueryClass::UNKNOWN(num),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResultCode {
    UNKNOWN(u8),
    NOERROR,
    FORMERR,
    SERVFAIL,
    NXDOMAIN,
    NOTIMP,
    REFUSED,
}

impl Default for ResultCode {
    fn default() -> Self {
        ResultCode::NOERROR
    }
}

impl ResultCode {
    pub fn to_num(&self) -> u8 {
        match *self {
            ResultCode::UNKNOWN(x) => x,
            ResultCode::NOERROR => 0,
            ResultCode::FORMERR => 1,
            ResultCode::SERVFAIL => 2,
            ResultCode::NXDOMAIN => 3,
            ResultCode::NOTIMP => 4,
            ResultCode::REFUSED => 5,
        }
    }

    pub fn from_num(num: u8) -> ResultCode {
        match num {
            0 => ResultCode::NOERROR,
            1 => ResultCode::FORMERR,
            2 => ResultCode::SERVFAIL,
            3 => ResultCode::NXDOMAIN,
            4 => ResultCode::NOTIMP,
            5 => ResultCode::REFUSED,
            _ => ResultCode::UNKNOWN(num),
        }
    }
}

/// The type specific part of a resource record.
///
/// Only `A` and `NS` carry meaning for the resolver. The remaining known
/// types are decoded so that embedded names survive re-encoding, and
/// anything else is kept as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordData {
    UNKNOWN { qtype: u16, data: Vec<u8> },
    A(Ipv4Addr),
    NS(String),
    CNAME(String),
    SOA {
        mname: String,
        rname: String,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    MX { priority: u16, host: String },
    AAAA(Ipv6Addr),
}

impl RecordData {
    pub fn get_querytype(&self) -> QueryType {
        match *self {
            RecordData::UNKNOWN { qtype, .. } => QueryType::from_num(qtype),
            RecordData::A(_) => QueryType::A,
            RecordData::NS(_) => QueryType::NS,
            RecordData::CNAME(_) => QueryType::CNAME,
            RecordData::SOA { .. } => QueryType::SOA,
            RecordData::MX { .. } => QueryType::MX,
            RecordData::AAAA(_) => QueryType::AAAA,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DnsRecord {
    pub domain: String,
    pub class: QueryClass,
    pub ttl: u32,
    pub data: RecordData,
}

impl DnsRecord {
    pub fn new(domain: &str, ttl: u32, data: RecordData) -> DnsRecord {
        DnsRecord {
            domain: domain.to_string(),
            class: QueryClass::IN,
            ttl,
            data,
        }
    }

    pub fn read<T: PacketBuffer>(buffer: &mut T) -> Result<DnsRecord> {
        let mut domain = String::new();
        buffer.read_qname(&mut domain)?;

        let qtype_num = buffer.read_u16()?;
        let qtype = QueryType::from_num(qtype_num);
        let class = QueryClass::from_num(buffer.read_u16()?);
        let ttl = buffer.read_u32()?;
        let data_len = buffer.read_u16()? as usize;

        let data_start = buffer.pos();

        let data = match qtype {
            QueryType::A => {
                let raw_addr = buffer.read_u32()?;
                RecordData::A(Ipv4Addr::from(raw_addr))
            }
            QueryType::AAAA => {
                let mut segments = [0u16; 8];
                for segment in segments.iter_mut() {
                    *segment = buffer.read_u16()?;
                }
                RecordData::AAAA(Ipv6Addr::from(segments))
            }
            QueryType::NS => {
                let mut ns = String::new();
                buffer.read_qname(&mut ns)?;
                RecordData::NS(ns)
            }
            QueryType::CNAME => {
                let mut cname = String::new();
                buffer.read_qname(&mut cname)?;
                RecordData::CNAME(cname)
            }
            QueryType::MX => {
                let priority = buffer.read_u16()?;
                let mut host = String::new();
                buffer.read_qname(&mut host)?;
                RecordData::MX { priority, host }
            }
            QueryType::SOA => {
                let mut mname = String::new();
                buffer.read_qname(&mut mname)?;

                let mut rname = String::new();
                buffer.read_qname(&mut rname)?;

                RecordData::SOA {
                    mname,
                    rname,
                    serial: buffer.read_u32()?,
                    refresh: buffer.read_u32()?,
                    retry: buffer.read_u32()?,
                    expire: buffer.read_u32()?,
                    minimum: buffer.read_u32()?,
                }
            }
            QueryType::TXT | QueryType::UNKNOWN(_) => {
                let data = buffer.get_range(data_start, data_len)?.to_vec();
                RecordData::UNKNOWN {
                    qtype: qtype_num,
                    data,
                }
            }
        };

        // Whatever we parsed, the next record starts right after the rdata.
        buffer.seek(data_start + data_len)?;

        Ok(DnsRecord {
            domain,
            class,
            ttl,
            data,
        })
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<usize> {
        let start_pos = buffer.pos();

        buffer.write_qname(&self.domain)?;
        buffer.write_u16(self.data.get_querytype().to_num())?;
        buffer.write_u16(self.class.to_num())?;
        buffer.write_u32(self.ttl)?;

        // The length is patched in once the rdata is written
        let len_pos = buffer.pos();
        buffer.write_u16(0)?;

        match self.data {
            RecordData::A(ref addr) => {
                for octet in addr.octets().iter() {
                    buffer.write_u8(*octet)?;
                }
            }
            RecordData::AAAA(ref addr) => {
                for segment in addr.segments().iter() {
                    buffer.write_u16(*segment)?;
                }
            }
            RecordData::NS(ref host) | RecordData::CNAME(ref host) => {
                buffer.write_qname(host)?;
            }
            RecordData::MX { priority, ref host } => {
                buffer.write_u16(priority)?;
                buffer.write_qname(host)?;
            }
            RecordData::SOA {
                ref mname,
                ref rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                buffer.write_qname(mname)?;
                buffer.write_qname(rname)?;
                buffer.write_u32(serial)?;
                buffer.write_u32(refresh)?;
                buffer.write_u32(retry)?;
                buffer.write_u32(expire)?;
                buffer.write_u32(minimum)?;
            }
            RecordData::UNKNOWN { ref data, .. } => {
                for b in data {
                    buffer.write_u8(*b)?;
                }
            }
        }

        let size = buffer.pos() - (len_pos + 2);
        buffer.set_u16(len_pos, size as u16)?;

        Ok(buffer.pos() - start_pos)
    }
}

impl fmt::Display for DnsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{:?}\t", self.domain, self.ttl, self.class)?;

        match self.data {
            RecordData::A(ref addr) => write!(f, "A\t{}", addr),
            RecordData::AAAA(ref addr) => write!(f, "AAAA\t{}", addr),
            RecordData::NS(ref host) => write!(f, "NS\t{}", host),
            RecordData::CNAME(ref host) => write!(f, "CNAME\t{}", host),
            RecordData::MX { priority, ref host } => write!(f, "MX\t{} {}", priority, host),
            RecordData::SOA {
                ref mname,
                ref rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => write!(
                f,
                "SOA\t{} {} {} {} {} {} {}",
                mname, rname, serial, refresh, retry, expire, minimum
            ),
            RecordData::UNKNOWN { qtype, ref data } => {
                write!(f, "TYPE{}\t\\# {}", qtype, data.len())
            }
        }
    }
}

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

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_u16(self.id)?;

        buffer.write_u8(
            (self.recursion_desired as u8)
                | ((self.truncated_message as u8) << 1)
                | ((self.authoritative_answer as u8) << 2)
                | ((self.opcode & 0x0F) << 3)
                | ((self.response as u8) << 7),
        )?;

        buffer.write_u8(
            (self.rescode.to_num() & 0x0F)
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
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuestion {
    pub name: String,
    pub qtype: QueryType,
    pub qclass: QueryClass,
}

impl DnsQuestion {
    pub fn new(name: String, qtype: QueryType) -> DnsQuestion {
        DnsQuestion {
            name,
            qtype,
            qclass: QueryClass::IN,
        }
    }

    pub fn write<T: PacketBuffer>(&self, buffer: &mut T) -> Result<()> {
        buffer.write_qname(&self.name)?;
        buffer.write_u16(self.qtype.to_num())?;
        buffer.write_u16(self.qclass.to_num())?;

        Ok(())
    }

    pub fn read<T: PacketBuffer>(&mut self, buffer: &mut T) -> Result<()> {
        buffer.read_qname(&mut self.name)?;
        self.qtype = QueryType::from_num(buffer.read_u16()?);
        self.qclass = QueryClass::from_num(buffer.read_u16()?);

        Ok(())
    }
}

impl fmt::Display for DnsQuestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?} {:?}", self.name, self.qclass, self.qtype)
    }
}

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
            let mut question = DnsQuestion::new(String::new(), QueryType::UNKNOWN(0));
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

    /// Target hosts of the NS records in the authority section, in order and
    /// with duplicates retained.
    pub fn get_ns_hosts(&self) -> Vec<&str> {
        self.authorities
            .iter()
            .filter_map(|record| match record.data {
                RecordData::NS(ref host) => Some(host.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Glue: addresses of A records in the additional section whose owner is
    /// exactly one of `hosts`. An address is listed once per matching host.
    pub fn get_glue_addrs(&self, hosts: &[&str]) -> Vec<Ipv4Addr> {
        let mut addrs = Vec::new();
        for record in &self.resources {
            if let RecordData::A(addr) = record.data {
                for host in hosts {
                    if record.domain == *host {
                        addrs.push(addr);
                    }
                }
            }
        }

        addrs
    }

    pub fn get_answer_addrs(&self) -> Vec<Ipv4Addr> {
        self.answers
            .iter()
            .filter_map(|record| match record.data {
                RecordData::A(addr) => Some(addr),
                _ => None,
            })
            .collect()
    }

    /// Serialize the packet. Records that don't fit are left out, starting
    /// from the end, and the truncation flag is raised. Questions and the
    /// header must always fit.
    pub fn write<T: PacketBuffer>(&mut self, buffer: &mut T) -> Result<()> {
        let start_pos = buffer.pos();

        self.header.questions = self.questions.len() as u16;
        self.header.truncated_message = false;
        self.header.write(buffer)?;

        for question in &self.questions {
            question.write(buffer)?;
        }

        let mut truncated = false;
        let mut counts = [0u16; 3];
        let sections = [&self.answers, &self.authorities, &self.resources];
        for (count, section) in counts.iter_mut().zip(sections.iter()) {
            for rec in section.iter() {
                if truncated {
                    break;
                }

                let record_pos = buffer.pos();
                match rec.write(buffer) {
                    Ok(_) => *count += 1,
                    Err(BufferError::EndOfBuffer) => {
                        buffer.seek(record_pos)?;
                        truncated = true;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        self.header.answers = counts[0];
        self.header.authoritative_entries = counts[1];
        self.header.resource_entries = counts[2];
        self.header.truncated_message = truncated;

        // Rewrite the header now that the final counts are known
        let end_pos = buffer.pos();
        buffer.seek(start_pos)?;
        self.header.write(buffer)?;
        buffer.seek(end_pos)?;

        Ok(())
    }
}
