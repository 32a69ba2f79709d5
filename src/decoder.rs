//! Straight decode of a clean, ordered chunk stream.
//!
//! This path trusts its input: the first block must be a master header and
//! every following block must be the next slave of the same file.  Anything
//! else is fatal.  Damaged or shuffled dumps go through the scanner and the
//! restorer in [`crate::recovery`] instead.

use std::io::{Read, Write};

use tracing::{debug, info};

use crate::error::{Error, HeaderKind, Result};
use crate::fsutil::read_full;
use crate::header::{is_header, Header, MasterHeader, SlaveHeader, BLOCK_SIZE, DATA_SIZE, SLAVE_HEADER_SIZE};

/// Result of looking at the first block of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    /// Fewer than `BLOCK_SIZE` bytes available.
    TooShort,
    /// The first block is not a (decodable) header.
    NotAHeader,
    /// The stream starts mid-file.
    Slave(SlaveHeader),
    Master(MasterHeader),
}

/// Classify the first block of `reader`.  Never fails on content, only on I/O.
pub fn probe<R: Read>(mut reader: R) -> Result<Probe> {
    let mut block = [0u8; BLOCK_SIZE];
    if read_full(&mut reader, &mut block)? != BLOCK_SIZE {
        return Ok(Probe::TooShort);
    }
    if !is_header(&block) {
        return Ok(Probe::NotAHeader);
    }
    Ok(match Header::decode(&block) {
        Ok(Header::Master(m)) => Probe::Master(m),
        Ok(Header::Slave(s))  => Probe::Slave(s),
        Err(_)                => Probe::NotAHeader,
    })
}

/// A block that looks like a header but does not decode is corrupt data.
fn decode_block(block: &[u8]) -> Result<Header> {
    Header::decode(block).map_err(|e| Error::DataCorruption(e.to_string()))
}

pub struct SequentialDecoder<R: Read> {
    reader: R,
    master: MasterHeader,
}

impl<R: Read> SequentialDecoder<R> {
    /// Read and validate the master block.
    pub fn new(mut reader: R) -> Result<Self> {
        let mut block = [0u8; BLOCK_SIZE];
        if read_full(&mut reader, &mut block)? != BLOCK_SIZE || !is_header(&block) {
            return Err(Error::NoHeader);
        }
        match decode_block(&block)? {
            Header::Master(master) => Ok(Self { reader, master }),
            Header::Slave(_) => Err(Error::WrongHeaderKind {
                expected: HeaderKind::Master,
                found:    HeaderKind::Slave,
            }),
        }
    }

    pub fn master(&self) -> &MasterHeader {
        &self.master
    }

    /// Copy the file's content to `out`.  Returns the bytes written, which
    /// always equals the master's file size on success.
    pub fn decode_to<W: Write>(mut self, mut out: W) -> Result<u64> {
        let master   = &self.master;
        let expected = master.data_blocks();
        let mut block = vec![0u8; BLOCK_SIZE];
        let mut byte_count = 0u64;
        let mut next_index = 1u64;

        loop {
            let n = read_full(&mut self.reader, &mut block)?;
            if n == 0 {
                break;
            }
            if n != BLOCK_SIZE {
                return Err(Error::DataCorruption(format!(
                    "trailing partial block of {n} bytes"
                )));
            }
            if !is_header(&block) {
                return Err(Error::DataCorruption(format!(
                    "block {next_index} has no header"
                )));
            }
            let slave = match decode_block(&block)? {
                Header::Slave(s) => s,
                Header::Master(m) => {
                    return Err(Error::DataCorruption(format!(
                        "master header of {} inside the stream of {}",
                        m.id, master.id
                    )))
                }
            };
            if slave.id != master.id {
                return Err(Error::DataCorruption(format!(
                    "block {next_index} belongs to {}, expected {}",
                    slave.id, master.id
                )));
            }
            if slave.index != next_index {
                return Err(Error::DataCorruption(format!(
                    "expected block {next_index}, found block {}",
                    slave.index
                )));
            }
            if next_index > expected {
                return Err(Error::DataCorruption(format!(
                    "block {next_index} exceeds the {expected} blocks of a {}-byte file",
                    master.file_size
                )));
            }

            let take = (master.file_size - byte_count).min(DATA_SIZE as u64) as usize;
            out.write_all(&block[SLAVE_HEADER_SIZE..SLAVE_HEADER_SIZE + take])?;
            byte_count += take as u64;
            next_index += 1;
            debug!(id = %master.id, index = slave.index, "decoded data block");
        }

        if next_index - 1 != expected {
            return Err(Error::DataCorruption(format!(
                "stream ended after {} of {expected} data blocks",
                next_index - 1
            )));
        }
        out.flush()?;
        info!(id = %master.id, bytes = byte_count, "decoded file");
        Ok(byte_count)
    }
}

/// Decode a whole in-memory chunk stream.
pub fn decode_to_vec<R: Read>(reader: R) -> Result<(MasterHeader, Vec<u8>)> {
    let dec    = SequentialDecoder::new(reader)?;
    let master = dec.master().clone();
    let mut out = Vec::with_capacity(master.file_size.min(1 << 30) as usize);
    dec.decode_to(&mut out)?;
    Ok((master, out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode_to_vec;
    use chrono::Utc;
    use uuid::Uuid;

    fn master_for(len: usize) -> MasterHeader {
        let now = Utc::now();
        MasterHeader::new(Uuid::new_v4(), "f.dat", len as u64, now, now).unwrap()
    }

    fn encoded(len: usize) -> (MasterHeader, Vec<u8>, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
        let m = master_for(len);
        let stream = encode_to_vec(&m, &data).unwrap();
        (m, data, stream)
    }

    #[test]
    fn round_trip_sizes() {
        for len in [0, 1, DATA_SIZE - 1, DATA_SIZE, DATA_SIZE + 1, DATA_SIZE * 4 + 100] {
            let (m, data, stream) = encoded(len);
            let (back_master, back) = decode_to_vec(&stream[..]).unwrap();
            assert_eq!(back_master, m);
            assert_eq!(back, data, "length {len}");
        }
    }

    #[test]
    fn missing_or_foreign_first_block() {
        assert!(matches!(decode_to_vec(&[0u8; 0][..]), Err(Error::NoHeader)));
        assert!(matches!(decode_to_vec(&[0u8; 100][..]), Err(Error::NoHeader)));
        assert!(matches!(decode_to_vec(&[0u8; BLOCK_SIZE][..]), Err(Error::NoHeader)));
    }

    #[test]
    fn slave_first_is_wrong_kind() {
        let (_, _, stream) = encoded(1000);
        let err = decode_to_vec(&stream[BLOCK_SIZE..]).unwrap_err();
        assert!(matches!(
            err,
            Error::WrongHeaderKind { expected: HeaderKind::Master, found: HeaderKind::Slave }
        ));
    }

    #[test]
    fn gap_is_data_error() {
        let (_, _, stream) = encoded(DATA_SIZE * 3);
        let mut gapped = stream[..2 * BLOCK_SIZE].to_vec();
        gapped.extend_from_slice(&stream[3 * BLOCK_SIZE..]);
        assert!(matches!(decode_to_vec(&gapped[..]), Err(Error::DataCorruption(_))));
    }

    #[test]
    fn foreign_id_is_data_error() {
        let (_, _, a) = encoded(DATA_SIZE * 2);
        let (_, _, b) = encoded(DATA_SIZE * 2);
        let mut mixed = a[..2 * BLOCK_SIZE].to_vec();
        mixed.extend_from_slice(&b[2 * BLOCK_SIZE..]);
        assert!(matches!(decode_to_vec(&mixed[..]), Err(Error::DataCorruption(_))));
    }

    #[test]
    fn embedded_master_is_data_error() {
        let (_, _, a) = encoded(10);
        let (_, _, b) = encoded(10);
        let mut both = a.clone();
        both.extend_from_slice(&b);
        assert!(matches!(decode_to_vec(&both[..]), Err(Error::DataCorruption(_))));
    }

    #[test]
    fn undecodable_header_is_data_error() {
        let (_, _, stream) = encoded(DATA_SIZE * 2);

        // Data block 1 with logical index 0.
        let mut bad_slave = stream.clone();
        bad_slave[BLOCK_SIZE + 22..BLOCK_SIZE + SLAVE_HEADER_SIZE].fill(0);
        assert!(matches!(decode_to_vec(&bad_slave[..]), Err(Error::DataCorruption(_))));

        // Master with an empty name.
        let mut bad_master = stream.clone();
        bad_master[crate::header::MASTER_FIXED_SIZE] = 0;
        assert!(matches!(decode_to_vec(&bad_master[..]), Err(Error::DataCorruption(_))));
    }

    #[test]
    fn truncated_and_trailing_garbage() {
        let (_, _, stream) = encoded(DATA_SIZE * 3);
        let short = &stream[..3 * BLOCK_SIZE];
        assert!(matches!(decode_to_vec(short), Err(Error::DataCorruption(_))));

        let mut tail = stream.clone();
        tail.extend_from_slice(&[1, 2, 3]);
        assert!(matches!(decode_to_vec(&tail[..]), Err(Error::DataCorruption(_))));
    }

    #[test]
    fn probe_classifies_first_block() {
        let (m, _, stream) = encoded(700);
        assert_eq!(probe(&stream[..]).unwrap(), Probe::Master(m.clone()));
        assert!(matches!(probe(&stream[BLOCK_SIZE..]).unwrap(), Probe::Slave(s) if s.id == m.id));
        assert_eq!(probe(&stream[..10]).unwrap(), Probe::TooShort);
        assert_eq!(probe(&[9u8; BLOCK_SIZE][..]).unwrap(), Probe::NotAHeader);
    }
}
