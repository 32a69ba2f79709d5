//! Block headers, the only structure in a chunk stream.
//!
//! Every block is `BLOCK_SIZE` bytes and starts with a header.  A file is
//! written as one **master** block (identity and metadata, logical index 0)
//! followed by `N` **slave** blocks, each a 30-byte prefix and `DATA_SIZE`
//! bytes of payload.
//!
//! ```text
//! master: MAGIC(5) | 0u8 | ID(16) | CREATE_TICKS(i64) | CHANGE_TICKS(i64) | FILESIZE(u64) | NAME NUL | zero padding
//! slave:  MAGIC(5) | 1u8 | ID(16) | INDEX(u64) | PAYLOAD(DATA_SIZE)
//! ```
//!
//! All integers are little-endian.  The id is stored in the mixed-endian
//! GUID byte order (`Uuid::to_bytes_le`).

use std::ffi::OsStr;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::ticks;

/// Size of every block in a chunk stream.  512 divides the allocation unit
/// of practically every disk and filesystem.
pub const BLOCK_SIZE: usize = 512;
pub const MAGIC: &[u8; 5] = b"REFIS";
pub const MASTER_TAG: u8 = 0;
pub const SLAVE_TAG: u8 = 1;
/// MAGIC + tag + id + index.
pub const SLAVE_HEADER_SIZE: usize = 5 + 1 + 16 + 8;
/// MAGIC + tag + id + two timestamps + file size.
pub const MASTER_FIXED_SIZE: usize = 5 + 1 + 16 + 8 + 8 + 8;
/// Longest file name (UTF-8 bytes) that fits a master block with its NUL.
pub const MAX_NAME_LENGTH: usize = BLOCK_SIZE - MASTER_FIXED_SIZE - 1;
/// Payload bytes carried by one slave block.
pub const DATA_SIZE: usize = BLOCK_SIZE - SLAVE_HEADER_SIZE;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Block does not start with the REFIS magic")]
    InvalidMagic,
    #[error("Invalid header type tag: {0}")]
    InvalidType(u8),
    #[error("The nil id cannot identify a file")]
    NilId,
    #[error("File name cannot be empty")]
    EmptyName,
    #[error("File name cannot contain NUL bytes")]
    NameContainsNul,
    #[error("File name is {0} bytes; at most {MAX_NAME_LENGTH} fit a master header")]
    NameTooLong(usize),
    #[error("Invalid logical index {0} for a slave header")]
    InvalidIndex(u64),
    #[error("Corrupt or empty file name in master header")]
    CorruptName,
    #[error("Timestamp outside the representable range")]
    TimeOutOfRange,
    #[error("Expected at least {BLOCK_SIZE} bytes, got {0}")]
    ShortBlock(usize),
    #[error("Master header record lacks `{0}`")]
    MissingField(&'static str),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Number of slave blocks needed for `file_size` bytes of payload.
pub fn data_blocks_for(file_size: u64) -> u64 {
    file_size.div_ceil(DATA_SIZE as u64)
}

/// Cheap pre-check used by the scanner: exact block length, magic, and a
/// known type tag.  Does not decode.
pub fn is_header(block: &[u8]) -> bool {
    block.len() == BLOCK_SIZE
        && block.starts_with(MAGIC)
        && matches!(block[MAGIC.len()], MASTER_TAG | SLAVE_TAG)
}

fn validate_name(name: &str) -> Result<(), HeaderError> {
    if name.is_empty() {
        return Err(HeaderError::EmptyName);
    }
    if name.as_bytes().contains(&0) {
        return Err(HeaderError::NameContainsNul);
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(HeaderError::NameTooLong(name.len()));
    }
    Ok(())
}

fn encode_time(time: &DateTime<Utc>) -> Result<i64, HeaderError> {
    ticks::to_ticks(time).ok_or(HeaderError::TimeOutOfRange)
}

fn decode_time(raw: i64) -> Result<DateTime<Utc>, HeaderError> {
    ticks::from_ticks(raw).ok_or(HeaderError::TimeOutOfRange)
}

// ── Master ────────────────────────────────────────────────────────────────────

/// Identity and metadata of one encoded file.  Occupies a whole block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterHeader {
    pub id:          Uuid,
    pub create_time: DateTime<Utc>,
    pub change_time: DateTime<Utc>,
    pub file_size:   u64,
    pub file_name:   String,
}

impl MasterHeader {
    /// Build a master header.  Only the final path component of `file_name`
    /// is kept.  Timestamps are truncated to tick precision so the value
    /// compares equal to what a later decode produces.
    pub fn new(
        id:          Uuid,
        file_name:   &str,
        file_size:   u64,
        create_time: DateTime<Utc>,
        change_time: DateTime<Utc>,
    ) -> Result<Self, HeaderError> {
        let file_name = Path::new(file_name)
            .file_name()
            .and_then(OsStr::to_str)
            .ok_or(HeaderError::EmptyName)?
            .to_owned();
        let header = Self {
            id,
            create_time: ticks::truncate(&create_time).ok_or(HeaderError::TimeOutOfRange)?,
            change_time: ticks::truncate(&change_time).ok_or(HeaderError::TimeOutOfRange)?,
            file_size,
            file_name,
        };
        header.validate()?;
        Ok(header)
    }

    pub fn validate(&self) -> Result<(), HeaderError> {
        if self.id.is_nil() {
            return Err(HeaderError::NilId);
        }
        validate_name(&self.file_name)
    }

    /// Slave blocks that follow this master in an encoded stream.
    pub fn data_blocks(&self) -> u64 {
        data_blocks_for(self.file_size)
    }

    /// The slave header at logical `index` (>= 1) of this file.
    pub fn slave(&self, index: u64) -> Result<SlaveHeader, HeaderError> {
        SlaveHeader::new(self.id, index)
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<(), HeaderError> {
        self.validate()?;
        let create = encode_time(&self.create_time)?;
        let change = encode_time(&self.change_time)?;

        writer.write_all(MAGIC)?;
        writer.write_u8(MASTER_TAG)?;
        writer.write_all(&self.id.to_bytes_le())?;
        writer.write_i64::<LittleEndian>(create)?;
        writer.write_i64::<LittleEndian>(change)?;
        writer.write_u64::<LittleEndian>(self.file_size)?;
        writer.write_all(self.file_name.as_bytes())?;
        // Terminator plus zero padding up to BLOCK_SIZE.
        let pad = MAX_NAME_LENGTH - self.file_name.len() + 1;
        writer.write_all(&[0u8; MAX_NAME_LENGTH + 1][..pad])?;
        Ok(())
    }

    fn read_body<R: Read>(mut reader: R, id: Uuid) -> Result<Self, HeaderError> {
        let create_time = decode_time(reader.read_i64::<LittleEndian>()?)?;
        let change_time = decode_time(reader.read_i64::<LittleEndian>()?)?;
        let file_size   = reader.read_u64::<LittleEndian>()?;

        let mut name = [0u8; MAX_NAME_LENGTH + 1];
        reader.read_exact(&mut name)?;
        let len = match name.iter().position(|&b| b == 0) {
            Some(n) if n > 0 => n,
            _ => return Err(HeaderError::CorruptName),
        };
        let file_name = std::str::from_utf8(&name[..len])
            .map_err(|_| HeaderError::CorruptName)?
            .to_owned();

        Ok(Self { id, create_time, change_time, file_size, file_name })
    }
}

// ── Slave ─────────────────────────────────────────────────────────────────────

/// Position of one payload chunk within its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlaveHeader {
    pub id:    Uuid,
    pub index: u64,
}

impl SlaveHeader {
    pub fn new(id: Uuid, index: u64) -> Result<Self, HeaderError> {
        let header = Self { id, index };
        header.validate()?;
        Ok(header)
    }

    pub fn validate(&self) -> Result<(), HeaderError> {
        if self.id.is_nil() {
            return Err(HeaderError::NilId);
        }
        if self.index == 0 {
            return Err(HeaderError::InvalidIndex(self.index));
        }
        Ok(())
    }

    /// Writes the 30-byte prefix only; the payload is the caller's.
    pub fn write<W: Write>(&self, mut writer: W) -> Result<(), HeaderError> {
        self.validate()?;
        writer.write_all(MAGIC)?;
        writer.write_u8(SLAVE_TAG)?;
        writer.write_all(&self.id.to_bytes_le())?;
        writer.write_u64::<LittleEndian>(self.index)?;
        Ok(())
    }
}

// ── Header ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "HeaderRecord", into = "HeaderRecord")]
pub enum Header {
    Master(MasterHeader),
    Slave(SlaveHeader),
}

impl Header {
    pub fn id(&self) -> Uuid {
        match self {
            Header::Master(m) => m.id,
            Header::Slave(s)  => s.id,
        }
    }

    /// Logical index: 0 for the master, >= 1 for slaves.
    pub fn index(&self) -> u64 {
        match self {
            Header::Master(_) => 0,
            Header::Slave(s)  => s.index,
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self, Header::Master(_))
    }

    pub fn as_master(&self) -> Option<&MasterHeader> {
        match self {
            Header::Master(m) => Some(m),
            Header::Slave(_)  => None,
        }
    }

    /// Bytes this header occupies at the start of its block.
    pub fn encoded_len(&self) -> usize {
        match self {
            Header::Master(_) => BLOCK_SIZE,
            Header::Slave(_)  => SLAVE_HEADER_SIZE,
        }
    }

    pub fn write<W: Write>(&self, writer: W) -> Result<(), HeaderError> {
        match self {
            Header::Master(m) => m.write(writer),
            Header::Slave(s)  => s.write(writer),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, HeaderError> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.write(&mut buf)?;
        Ok(buf)
    }

    /// Parse a header from the start of a stream.  Magic and type tag are
    /// checked before anything else is read.
    pub fn read<R: Read>(mut reader: R) -> Result<Self, HeaderError> {
        let mut magic = [0u8; 5];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(HeaderError::InvalidMagic);
        }
        let tag = reader.read_u8()?;
        if tag != MASTER_TAG && tag != SLAVE_TAG {
            return Err(HeaderError::InvalidType(tag));
        }
        let mut id_bytes = [0u8; 16];
        reader.read_exact(&mut id_bytes)?;
        let id = Uuid::from_bytes_le(id_bytes);
        if id.is_nil() {
            return Err(HeaderError::NilId);
        }

        if tag == MASTER_TAG {
            Ok(Header::Master(MasterHeader::read_body(reader, id)?))
        } else {
            let index = reader.read_u64::<LittleEndian>()?;
            if index < 1 {
                return Err(HeaderError::InvalidIndex(index));
            }
            Ok(Header::Slave(SlaveHeader { id, index }))
        }
    }

    /// Decode the header at the start of a full block.
    pub fn decode(block: &[u8]) -> Result<Self, HeaderError> {
        if block.len() < BLOCK_SIZE {
            return Err(HeaderError::ShortBlock(block.len()));
        }
        Self::read(Cursor::new(block))
    }
}

impl From<MasterHeader> for Header {
    fn from(m: MasterHeader) -> Self {
        Header::Master(m)
    }
}

impl From<SlaveHeader> for Header {
    fn from(s: SlaveHeader) -> Self {
        Header::Slave(s)
    }
}

// ── Serde ─────────────────────────────────────────────────────────────────────

/// Flat persisted form: `{id, index}` plus the master-only fields.
#[derive(Serialize, Deserialize)]
struct HeaderRecord {
    id:    Uuid,
    index: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    change_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_size:   Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_name:   Option<String>,
}

impl From<Header> for HeaderRecord {
    fn from(h: Header) -> Self {
        match h {
            Header::Master(m) => HeaderRecord {
                id:          m.id,
                index:       0,
                create_time: Some(m.create_time),
                change_time: Some(m.change_time),
                file_size:   Some(m.file_size),
                file_name:   Some(m.file_name),
            },
            Header::Slave(s) => HeaderRecord {
                id:          s.id,
                index:       s.index,
                create_time: None,
                change_time: None,
                file_size:   None,
                file_name:   None,
            },
        }
    }
}

impl TryFrom<HeaderRecord> for Header {
    type Error = HeaderError;

    fn try_from(r: HeaderRecord) -> Result<Self, Self::Error> {
        if r.index > 0 {
            return Ok(Header::Slave(SlaveHeader::new(r.id, r.index)?));
        }
        let master = MasterHeader {
            id:          r.id,
            create_time: r.create_time.ok_or(HeaderError::MissingField("create_time"))?,
            change_time: r.change_time.ok_or(HeaderError::MissingField("change_time"))?,
            file_size:   r.file_size.ok_or(HeaderError::MissingField("file_size"))?,
            file_name:   r.file_name.ok_or(HeaderError::MissingField("file_name"))?,
        };
        master.validate()?;
        Ok(Header::Master(master))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn master(name: &str, size: u64) -> MasterHeader {
        let created = Utc.with_ymd_and_hms(2021, 3, 14, 15, 9, 26).unwrap();
        let changed = Utc.with_ymd_and_hms(2022, 6, 1, 8, 0, 0).unwrap();
        MasterHeader::new(Uuid::new_v4(), name, size, created, changed).unwrap()
    }

    #[test]
    fn layout_constants() {
        assert_eq!(SLAVE_HEADER_SIZE, 30);
        assert_eq!(DATA_SIZE, 482);
        assert_eq!(MAX_NAME_LENGTH, 465);
    }

    #[test]
    fn master_occupies_full_block() {
        let m = master("report.pdf", 1234);
        let bytes = Header::from(m.clone()).to_bytes().unwrap();
        assert_eq!(bytes.len(), BLOCK_SIZE);
        assert!(is_header(&bytes));
        assert_eq!(&bytes[..5], MAGIC);
        assert_eq!(bytes[5], MASTER_TAG);
        assert_eq!(&bytes[6..22], &m.id.to_bytes_le());
        assert_eq!(u64::from_le_bytes(bytes[38..46].try_into().unwrap()), 1234);
        assert_eq!(&bytes[46..56], b"report.pdf");
        assert!(bytes[56..].iter().all(|&b| b == 0));
    }

    #[test]
    fn master_round_trip() {
        let m = master("notes.txt", 99);
        let bytes = Header::from(m.clone()).to_bytes().unwrap();
        match Header::decode(&bytes).unwrap() {
            Header::Master(back) => assert_eq!(back, m),
            other => panic!("expected master, got {other:?}"),
        }
    }

    #[test]
    fn slave_prefix_layout_and_round_trip() {
        let m = master("a.bin", 5000);
        let s = m.slave(7).unwrap();
        let mut block = Header::from(s).to_bytes().unwrap();
        assert_eq!(block.len(), SLAVE_HEADER_SIZE);
        assert_eq!(block[5], SLAVE_TAG);
        assert_eq!(u64::from_le_bytes(block[22..30].try_into().unwrap()), 7);

        block.resize(BLOCK_SIZE, 0xAB);
        let back = Header::decode(&block).unwrap();
        assert_eq!(back, Header::Slave(s));
        assert_eq!(back.index(), 7);
        assert_eq!(back.id(), m.id);
    }

    #[test]
    fn name_boundary() {
        let exact = "n".repeat(MAX_NAME_LENGTH);
        let m = master(&exact, 1);
        let bytes = Header::from(m.clone()).to_bytes().unwrap();
        assert_eq!(bytes.len(), BLOCK_SIZE);
        assert_eq!(Header::decode(&bytes).unwrap(), Header::Master(m));

        let long = "n".repeat(MAX_NAME_LENGTH + 1);
        let created = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let err = MasterHeader::new(Uuid::new_v4(), &long, 1, created, created).unwrap_err();
        assert!(matches!(err, HeaderError::NameTooLong(n) if n == MAX_NAME_LENGTH + 1));
    }

    #[test]
    fn encode_rejects_bad_fields() {
        let mut m = master("ok.txt", 1);
        m.id = Uuid::nil();
        assert!(matches!(Header::from(m).to_bytes(), Err(HeaderError::NilId)));

        let mut m = master("ok.txt", 1);
        m.file_name = "a\0b".into();
        assert!(matches!(Header::from(m).to_bytes(), Err(HeaderError::NameContainsNul)));

        let mut m = master("ok.txt", 1);
        m.file_name.clear();
        assert!(matches!(Header::from(m).to_bytes(), Err(HeaderError::EmptyName)));

        let bad = Header::Slave(SlaveHeader { id: Uuid::new_v4(), index: 0 });
        assert!(matches!(bad.to_bytes(), Err(HeaderError::InvalidIndex(0))));
    }

    #[test]
    fn new_keeps_only_final_path_component() {
        let t = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let m = MasterHeader::new(Uuid::new_v4(), "some/dir/file.dat", 0, t, t).unwrap();
        assert_eq!(m.file_name, "file.dat");
    }

    #[test]
    fn decode_rejects_foreign_and_corrupt_blocks() {
        let zeros = [0u8; BLOCK_SIZE];
        assert!(!is_header(&zeros));
        assert!(matches!(Header::decode(&zeros), Err(HeaderError::InvalidMagic)));

        let mut bad_tag = Header::from(master("x", 1)).to_bytes().unwrap();
        bad_tag[5] = 2;
        assert!(!is_header(&bad_tag));
        assert!(matches!(Header::decode(&bad_tag), Err(HeaderError::InvalidType(2))));

        // Name starting with NUL.
        let mut empty_name = Header::from(master("x", 1)).to_bytes().unwrap();
        empty_name[MASTER_FIXED_SIZE] = 0;
        assert!(is_header(&empty_name));
        assert!(matches!(Header::decode(&empty_name), Err(HeaderError::CorruptName)));

        // Name field with no terminator at all.
        let mut unterminated = Header::from(master("x", 1)).to_bytes().unwrap();
        unterminated[MASTER_FIXED_SIZE..].fill(b'z');
        assert!(matches!(Header::decode(&unterminated), Err(HeaderError::CorruptName)));

        let mut slave_zero = Header::from(master("x", 1000).slave(1).unwrap()).to_bytes().unwrap();
        slave_zero[22..30].fill(0);
        slave_zero.resize(BLOCK_SIZE, 0);
        assert!(matches!(Header::decode(&slave_zero), Err(HeaderError::InvalidIndex(0))));
    }

    #[test]
    fn is_header_requires_exact_block_length() {
        let bytes = Header::from(master("x", 1)).to_bytes().unwrap();
        assert!(!is_header(&bytes[..BLOCK_SIZE - 1]));
        let mut longer = bytes.clone();
        longer.push(0);
        assert!(!is_header(&longer));
        assert!(matches!(Header::decode(&bytes[..100]), Err(HeaderError::ShortBlock(100))));
    }

    #[test]
    fn data_block_counts() {
        assert_eq!(data_blocks_for(0), 0);
        assert_eq!(data_blocks_for(1), 1);
        assert_eq!(data_blocks_for(DATA_SIZE as u64), 1);
        assert_eq!(data_blocks_for(DATA_SIZE as u64 + 1), 2);
    }

    #[test]
    fn json_record_round_trip() {
        let m = Header::from(master("doc.odt", 4096));
        let s = Header::from(SlaveHeader::new(m.id(), 3).unwrap());

        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["index"], 3);
        assert!(json.get("file_name").is_none());
        assert_eq!(serde_json::from_value::<Header>(json).unwrap(), s);

        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(serde_json::from_str::<Header>(&json).unwrap(), m);
    }

    #[test]
    fn json_master_without_metadata_is_rejected() {
        let json = format!(r#"{{"id":"{}","index":0}}"#, Uuid::new_v4());
        assert!(serde_json::from_str::<Header>(&json).is_err());
    }
}
