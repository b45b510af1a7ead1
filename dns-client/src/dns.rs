//! Wire codec: RFC 1035 message layout.
//!
//! The transport layer only needs `Message::encode`, `Message::decode` and
//! the header fields; the record types below are enough to make answers
//! readable without pulling in a full DNS library.

use std::collections::HashMap;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;

/// Length of the fixed message header.
pub const HEADER_SIZE: usize = 12;

const FLAG_QR: u16 = 0x8000;
const FLAG_AA: u16 = 0x0400;
const FLAG_TC: u16 = 0x0200;
const FLAG_RD: u16 = 0x0100;
const FLAG_RA: u16 = 0x0080;
const OPCODE_SHIFT: u16 = 11;
const OPCODE_MASK: u16 = 0x7800;
const RCODE_MASK: u16 = 0x000F;

/// Compression pointers can only address the first 16 KiB of a message.
const MAX_POINTER_OFFSET: usize = 0x3FFF;
const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("unexpected end of message while reading {0}")]
    UnexpectedEnd(&'static str),
    #[error("compression pointer {0} out of bounds")]
    BadPointer(usize),
    #[error("compression pointer loop")]
    PointerLoop,
    #[error("empty label in domain name")]
    EmptyLabel,
    #[error("label of {0} bytes exceeds 63")]
    LabelTooLong(usize),
    #[error("domain name exceeds 255 bytes")]
    NameTooLong,
    #[error("reserved label type {0:#04x}")]
    BadLabelType(u8),
    #[error("label is not valid UTF-8")]
    NameNotUtf8,
    #[error("bad {rtype} rdata: {reason}")]
    BadRdata {
        rtype: RecordType,
        reason: &'static str,
    },
    #[error("too many entries in {0} section")]
    SectionTooLarge(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::upper_case_acronyms)]
pub enum RecordType {
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    MX,
    TXT,
    AAAA,
    /// Any type this codec has no name for; rdata is kept raw.
    Unknown(u16),
}

impl From<u16> for RecordType {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordType::A,
            2 => RecordType::NS,
            5 => RecordType::CNAME,
            6 => RecordType::SOA,
            12 => RecordType::PTR,
            15 => RecordType::MX,
            16 => RecordType::TXT,
            28 => RecordType::AAAA,
            v => RecordType::Unknown(v),
        }
    }
}

impl From<RecordType> for u16 {
    fn from(value: RecordType) -> Self {
        match value {
            RecordType::A => 1,
            RecordType::NS => 2,
            RecordType::CNAME => 5,
            RecordType::SOA => 6,
            RecordType::PTR => 12,
            RecordType::MX => 15,
            RecordType::TXT => 16,
            RecordType::AAAA => 28,
            RecordType::Unknown(v) => v,
        }
    }
}

impl std::str::FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_uppercase();
        match upper.as_str() {
            "A" => Ok(RecordType::A),
            "NS" => Ok(RecordType::NS),
            "CNAME" => Ok(RecordType::CNAME),
            "SOA" => Ok(RecordType::SOA),
            "PTR" => Ok(RecordType::PTR),
            "MX" => Ok(RecordType::MX),
            "TXT" => Ok(RecordType::TXT),
            "AAAA" => Ok(RecordType::AAAA),
            _ => upper
                .strip_prefix("TYPE")
                .and_then(|n| n.parse::<u16>().ok())
                .map(RecordType::from)
                .ok_or_else(|| format!("Unknown record type: {}", s)),
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordType::Unknown(v) => write!(f, "TYPE{}", v),
            other => write!(f, "{:?}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordClass {
    IN,
    CH, // Chaos (historic)
    HS, // Hesiod (historic)
    Unknown(u16),
}

impl From<u16> for RecordClass {
    fn from(value: u16) -> Self {
        match value {
            1 => RecordClass::IN,
            3 => RecordClass::CH,
            4 => RecordClass::HS,
            v => RecordClass::Unknown(v),
        }
    }
}

impl From<RecordClass> for u16 {
    fn from(value: RecordClass) -> Self {
        match value {
            RecordClass::IN => 1,
            RecordClass::CH => 3,
            RecordClass::HS => 4,
            RecordClass::Unknown(v) => v,
        }
    }
}

impl fmt::Display for RecordClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordClass::IN => write!(f, "IN"),
            RecordClass::CH => write!(f, "CH"),
            RecordClass::HS => write!(f, "HS"),
            RecordClass::Unknown(v) => write!(f, "CLASS{}", v),
        }
    }
}

/// Kind of query carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Query,
    IQuery,
    Status,
    Notify,
    Update,
    Unknown(u8),
}

impl From<u8> for Opcode {
    fn from(value: u8) -> Self {
        match value {
            0 => Opcode::Query,
            1 => Opcode::IQuery,
            2 => Opcode::Status,
            4 => Opcode::Notify,
            5 => Opcode::Update,
            v => Opcode::Unknown(v),
        }
    }
}

impl From<Opcode> for u8 {
    fn from(value: Opcode) -> Self {
        match value {
            Opcode::Query => 0,
            Opcode::IQuery => 1,
            Opcode::Status => 2,
            Opcode::Notify => 4,
            Opcode::Update => 5,
            Opcode::Unknown(v) => v,
        }
    }
}

/// Outcome of query processing as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    NoError,
    FormErr,
    ServFail,
    NxDomain,
    NotImp,
    Refused,
    Unknown(u8),
}

impl From<u8> for ResponseCode {
    fn from(value: u8) -> Self {
        match value {
            0 => ResponseCode::NoError,
            1 => ResponseCode::FormErr,
            2 => ResponseCode::ServFail,
            3 => ResponseCode::NxDomain,
            4 => ResponseCode::NotImp,
            5 => ResponseCode::Refused,
            v => ResponseCode::Unknown(v),
        }
    }
}

impl From<ResponseCode> for u8 {
    fn from(value: ResponseCode) -> Self {
        match value {
            ResponseCode::NoError => 0,
            ResponseCode::FormErr => 1,
            ResponseCode::ServFail => 2,
            ResponseCode::NxDomain => 3,
            ResponseCode::NotImp => 4,
            ResponseCode::Refused => 5,
            ResponseCode::Unknown(v) => v,
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResponseCode::NoError => write!(f, "NOERROR"),
            ResponseCode::FormErr => write!(f, "FORMERR (format error)"),
            ResponseCode::ServFail => write!(f, "SERVFAIL (server failure)"),
            ResponseCode::NxDomain => write!(f, "NXDOMAIN (non-existent domain)"),
            ResponseCode::NotImp => write!(f, "NOTIMP (not implemented)"),
            ResponseCode::Refused => write!(f, "REFUSED (query refused)"),
            ResponseCode::Unknown(v) => write!(f, "RCODE{}", v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
pub enum RecordData {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    NS(String),
    CNAME(String),
    PTR(String),
    MX {
        priority: u16,
        exchange: String,
    },
    /// All character-strings joined, decoded lossily as UTF-8. Encoding
    /// splits into 255-byte chunks, so the original string boundaries
    /// and any invalid UTF-8 are not preserved.
    TXT(String),
    SOA {
        mname: String,
        rname: String,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    Unknown(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    pub name: String,
    pub record_type: RecordType,
    pub class: RecordClass,
    pub ttl: u32,
    pub data: RecordData,
}

impl fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} ",
            self.name, self.ttl, self.class, self.record_type
        )?;
        match &self.data {
            RecordData::A(a) => write!(f, "{a}"),
            RecordData::AAAA(a) => write!(f, "{a}"),
            RecordData::NS(n) | RecordData::CNAME(n) | RecordData::PTR(n) => write!(f, "{n}"),
            RecordData::MX { priority, exchange } => write!(f, "{} {}", priority, exchange),
            RecordData::TXT(t) => write!(f, "\"{t}\""),
            RecordData::SOA {
                mname,
                rname,
                serial,
                ..
            } => write!(f, "{} {} {}", mname, rname, serial),
            RecordData::Unknown(raw) => write!(f, "\\# {}", raw.len()),
        }
    }
}

/// Message id plus the flags word. Section counts are derived from the
/// message body when encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub id: u16,
    pub flags: u16,
}

impl Header {
    /// Id and flags of an encoded message, without decoding the body.
    pub fn peek(data: &[u8]) -> Option<Self> {
        match data {
            [i0, i1, f0, f1, ..] => Some(Self {
                id: u16::from_be_bytes([*i0, *i1]),
                flags: u16::from_be_bytes([*f0, *f1]),
            }),
            _ => None,
        }
    }

    fn flag(&self, mask: u16) -> bool {
        self.flags & mask != 0
    }

    fn set_flag(&mut self, mask: u16, on: bool) {
        if on {
            self.flags |= mask;
        } else {
            self.flags &= !mask;
        }
    }

    pub fn is_response(&self) -> bool {
        self.flag(FLAG_QR)
    }

    pub fn set_response(&mut self, on: bool) {
        self.set_flag(FLAG_QR, on)
    }

    pub fn opcode(&self) -> Opcode {
        Opcode::from(((self.flags & OPCODE_MASK) >> OPCODE_SHIFT) as u8)
    }

    pub fn set_opcode(&mut self, opcode: Opcode) {
        let bits = (u16::from(u8::from(opcode)) << OPCODE_SHIFT) & OPCODE_MASK;
        self.flags = (self.flags & !OPCODE_MASK) | bits;
    }

    pub fn authoritative(&self) -> bool {
        self.flag(FLAG_AA)
    }

    pub fn set_authoritative(&mut self, on: bool) {
        self.set_flag(FLAG_AA, on)
    }

    pub fn truncated(&self) -> bool {
        self.flag(FLAG_TC)
    }

    pub fn set_truncated(&mut self, on: bool) {
        self.set_flag(FLAG_TC, on)
    }

    pub fn recursion_desired(&self) -> bool {
        self.flag(FLAG_RD)
    }

    pub fn set_recursion_desired(&mut self, on: bool) {
        self.set_flag(FLAG_RD, on)
    }

    pub fn recursion_available(&self) -> bool {
        self.flag(FLAG_RA)
    }

    pub fn set_recursion_available(&mut self, on: bool) {
        self.set_flag(FLAG_RA, on)
    }

    pub fn response_code(&self) -> ResponseCode {
        ResponseCode::from((self.flags & RCODE_MASK) as u8)
    }

    pub fn set_response_code(&mut self, rcode: ResponseCode) {
        let bits = u16::from(u8::from(rcode)) & RCODE_MASK;
        self.flags = (self.flags & !RCODE_MASK) | bits;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub qtype: RecordType,
    pub qclass: RecordClass,
}

impl Question {
    pub fn new(name: impl Into<String>, qtype: RecordType) -> Self {
        Self {
            name: name.into(),
            qtype,
            qclass: RecordClass::IN,
        }
    }
}

/// A DNS message. Queries and answers share the layout.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authorities: Vec<ResourceRecord>,
    pub additionals: Vec<ResourceRecord>,
}

impl Message {
    /// Single-question query with the given id. Flags are all clear.
    pub fn query(id: u16, name: impl Into<String>, qtype: RecordType) -> Self {
        Self {
            header: Header { id, flags: 0 },
            questions: vec![Question::new(name, qtype)],
            ..Self::default()
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(HEADER_SIZE + 64);
        out.extend_from_slice(&self.header.id.to_be_bytes());
        out.extend_from_slice(&self.header.flags.to_be_bytes());
        for (section, len) in [
            ("question", self.questions.len()),
            ("answer", self.answers.len()),
            ("authority", self.authorities.len()),
            ("additional", self.additionals.len()),
        ] {
            let count = u16::try_from(len).map_err(|_| WireError::SectionTooLarge(section))?;
            out.extend_from_slice(&count.to_be_bytes());
        }

        let mut names = HashMap::new();
        for q in &self.questions {
            encode_name(&mut out, &q.name, &mut names)?;
            out.extend_from_slice(&u16::from(q.qtype).to_be_bytes());
            out.extend_from_slice(&u16::from(q.qclass).to_be_bytes());
        }
        for rr in self
            .answers
            .iter()
            .chain(&self.authorities)
            .chain(&self.additionals)
        {
            encode_record(&mut out, rr, &mut names)?;
        }
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(data);
        let id = reader.u16("header")?;
        let flags = reader.u16("header")?;
        let qdcount = reader.u16("header")?;
        let ancount = reader.u16("header")?;
        let nscount = reader.u16("header")?;
        let arcount = reader.u16("header")?;

        let mut questions = Vec::with_capacity(qdcount as usize);
        for _ in 0..qdcount {
            let name = reader.name()?;
            let qtype = RecordType::from(reader.u16("question")?);
            let qclass = RecordClass::from(reader.u16("question")?);
            questions.push(Question {
                name,
                qtype,
                qclass,
            });
        }

        Ok(Self {
            header: Header { id, flags },
            questions,
            answers: reader.records(ancount)?,
            authorities: reader.records(nscount)?,
            additionals: reader.records(arcount)?,
        })
    }
}

fn encode_name(
    out: &mut Vec<u8>,
    name: &str,
    names: &mut HashMap<String, usize>,
) -> Result<(), WireError> {
    let trimmed = name.trim_end_matches('.');
    if trimmed.is_empty() {
        out.push(0);
        return Ok(());
    }
    if trimmed.len() + 2 > MAX_NAME_LEN {
        return Err(WireError::NameTooLong);
    }

    let labels: Vec<&str> = trimmed.split('.').collect();
    for i in 0..labels.len() {
        let suffix = labels[i..].join(".").to_ascii_lowercase();
        if let Some(&offset) = names.get(&suffix) {
            out.extend_from_slice(&(0xC000u16 | offset as u16).to_be_bytes());
            return Ok(());
        }
        if out.len() <= MAX_POINTER_OFFSET {
            names.insert(suffix, out.len());
        }
        let label = labels[i];
        if label.is_empty() {
            return Err(WireError::EmptyLabel);
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(WireError::LabelTooLong(label.len()));
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    Ok(())
}

fn encode_record(
    out: &mut Vec<u8>,
    rr: &ResourceRecord,
    names: &mut HashMap<String, usize>,
) -> Result<(), WireError> {
    encode_name(out, &rr.name, names)?;
    out.extend_from_slice(&u16::from(rr.record_type).to_be_bytes());
    out.extend_from_slice(&u16::from(rr.class).to_be_bytes());
    out.extend_from_slice(&rr.ttl.to_be_bytes());
    let rdlen_pos = out.len();
    out.extend_from_slice(&[0, 0]);

    match &rr.data {
        RecordData::A(addr) => out.extend_from_slice(&addr.octets()),
        RecordData::AAAA(addr) => out.extend_from_slice(&addr.octets()),
        RecordData::NS(name) | RecordData::CNAME(name) | RecordData::PTR(name) => {
            encode_name(out, name, names)?
        }
        RecordData::MX { priority, exchange } => {
            out.extend_from_slice(&priority.to_be_bytes());
            encode_name(out, exchange, names)?;
        }
        RecordData::TXT(text) => {
            // one or more <character-string>s of at most 255 bytes
            for chunk in text.as_bytes().chunks(255) {
                out.push(chunk.len() as u8);
                out.extend_from_slice(chunk);
            }
        }
        RecordData::SOA {
            mname,
            rname,
            serial,
            refresh,
            retry,
            expire,
            minimum,
        } => {
            encode_name(out, mname, names)?;
            encode_name(out, rname, names)?;
            for n in [serial, refresh, retry, expire, minimum] {
                out.extend_from_slice(&n.to_be_bytes());
            }
        }
        RecordData::Unknown(raw) => out.extend_from_slice(raw),
    }

    let rdlen = u16::try_from(out.len() - rdlen_pos - 2).map_err(|_| WireError::BadRdata {
        rtype: rr.record_type,
        reason: "longer than 65535 bytes",
    })?;
    out[rdlen_pos..rdlen_pos + 2].copy_from_slice(&rdlen.to_be_bytes());
    Ok(())
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bytes(&mut self, len: usize, what: &'static str) -> Result<&'a [u8], WireError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(WireError::UnexpectedEnd(what))?;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or(WireError::UnexpectedEnd(what))?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self, what: &'static str) -> Result<u8, WireError> {
        Ok(self.bytes(1, what)?[0])
    }

    fn u16(&mut self, what: &'static str) -> Result<u16, WireError> {
        let b = self.bytes(2, what)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &'static str) -> Result<u32, WireError> {
        let b = self.bytes(4, what)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a possibly compressed name. The cursor ends up after the
    /// first pointer, or after the terminating zero if there was none.
    fn name(&mut self) -> Result<String, WireError> {
        let mut labels: Vec<String> = Vec::new();
        let mut cursor = self.pos;
        let mut resume = None;
        let mut wire_len = 1;
        let mut jumps = 0;

        loop {
            let len = *self
                .data
                .get(cursor)
                .ok_or(WireError::UnexpectedEnd("name"))?;
            match len & 0xC0 {
                0x00 if len == 0 => {
                    self.pos = resume.unwrap_or(cursor + 1);
                    return Ok(labels.join("."));
                }
                0x00 => {
                    let start = cursor + 1;
                    let end = start + len as usize;
                    let raw = self
                        .data
                        .get(start..end)
                        .ok_or(WireError::UnexpectedEnd("label"))?;
                    wire_len += 1 + raw.len();
                    if wire_len > MAX_NAME_LEN {
                        return Err(WireError::NameTooLong);
                    }
                    let label = std::str::from_utf8(raw).map_err(|_| WireError::NameNotUtf8)?;
                    labels.push(label.to_string());
                    cursor = end;
                }
                0xC0 => {
                    let low = *self
                        .data
                        .get(cursor + 1)
                        .ok_or(WireError::UnexpectedEnd("pointer"))?;
                    let target = (((len & 0x3F) as usize) << 8) | low as usize;
                    if target >= self.data.len() {
                        return Err(WireError::BadPointer(target));
                    }
                    resume.get_or_insert(cursor + 2);
                    jumps += 1;
                    if jumps > MAX_NAME_LEN / 2 {
                        return Err(WireError::PointerLoop);
                    }
                    cursor = target;
                }
                _ => return Err(WireError::BadLabelType(len)),
            }
        }
    }

    fn records(&mut self, count: u16) -> Result<Vec<ResourceRecord>, WireError> {
        (0..count).map(|_| self.record()).collect()
    }

    fn record(&mut self) -> Result<ResourceRecord, WireError> {
        let name = self.name()?;
        let record_type = RecordType::from(self.u16("record header")?);
        let class = RecordClass::from(self.u16("record header")?);
        let ttl = self.u32("record header")?;
        let rdlen = self.u16("record header")? as usize;
        let end = self.pos + rdlen;
        if end > self.data.len() {
            return Err(WireError::UnexpectedEnd("rdata"));
        }

        let data = self.rdata(record_type, end)?;
        if self.pos > end {
            return Err(WireError::BadRdata {
                rtype: record_type,
                reason: "runs past rdlength",
            });
        }
        self.pos = end;

        Ok(ResourceRecord {
            name,
            record_type,
            class,
            ttl,
            data,
        })
    }

    fn rdata(&mut self, rtype: RecordType, end: usize) -> Result<RecordData, WireError> {
        let len = end - self.pos;
        let bad = |reason| WireError::BadRdata { rtype, reason };
        Ok(match rtype {
            RecordType::A => {
                let octets: [u8; 4] = self
                    .bytes(len, "rdata")?
                    .try_into()
                    .map_err(|_| bad("expected 4 bytes"))?;
                RecordData::A(Ipv4Addr::from(octets))
            }
            RecordType::AAAA => {
                let octets: [u8; 16] = self
                    .bytes(len, "rdata")?
                    .try_into()
                    .map_err(|_| bad("expected 16 bytes"))?;
                RecordData::AAAA(Ipv6Addr::from(octets))
            }
            RecordType::NS => RecordData::NS(self.name()?),
            RecordType::CNAME => RecordData::CNAME(self.name()?),
            RecordType::PTR => RecordData::PTR(self.name()?),
            RecordType::MX => {
                if len < 3 {
                    return Err(bad("too short"));
                }
                RecordData::MX {
                    priority: self.u16("rdata")?,
                    exchange: self.name()?,
                }
            }
            RecordType::TXT => {
                let mut text = Vec::new();
                while self.pos < end {
                    let n = self.u8("rdata")? as usize;
                    if self.pos + n > end {
                        return Err(bad("character-string runs past rdlength"));
                    }
                    text.extend_from_slice(self.bytes(n, "rdata")?);
                }
                RecordData::TXT(String::from_utf8_lossy(&text).into_owned())
            }
            RecordType::SOA => RecordData::SOA {
                mname: self.name()?,
                rname: self.name()?,
                serial: self.u32("rdata")?,
                refresh: self.u32("rdata")?,
                retry: self.u32("rdata")?,
                expire: self.u32("rdata")?,
                minimum: self.u32("rdata")?,
            },
            RecordType::Unknown(_) => RecordData::Unknown(self.bytes(len, "rdata")?.to_vec()),
        })
    }
}
