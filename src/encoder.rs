//! Chunk-stream writer.
//!
//! [`Encoder`] turns a file into one master block followed by one slave
//! block per `DATA_SIZE` window of content.  Every block is written at full
//! `BLOCK_SIZE` width; the last window is zero-padded and its true length is
//! recovered from the master's file size.  Several files may be encoded into
//! the same writer back to back; the scanner separates them by id.

use std::io::{self, Read, Write};

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::Result;
use crate::fsutil::read_full;
use crate::header::{MasterHeader, DATA_SIZE, BLOCK_SIZE};

/// What one call to [`Encoder::encode`] produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeSummary {
    pub id:            Uuid,
    /// Slave blocks written (the master block is not counted).
    pub data_blocks:   u64,
    pub bytes_written: u64,
}

pub struct Encoder<W: Write> {
    writer:            W,
    buffer:            Box<[u8; DATA_SIZE]>,
    /// Total bytes emitted across all encoded files.
    pub bytes_written: u64,
}

impl<W: Write> Encoder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buffer:        Box::new([0u8; DATA_SIZE]),
            bytes_written: 0,
        }
    }

    /// Encode `master.file_size` bytes from `reader`.
    ///
    /// Exactly the recorded size is consumed; a source that ends early fails
    /// with `UnexpectedEof` because the stream would otherwise describe a
    /// file it does not contain.  On error nothing is cleaned up.
    pub fn encode<R: Read>(&mut self, master: &MasterHeader, reader: R) -> Result<EncodeSummary> {
        master.write(&mut self.writer)?;
        let mut written = BLOCK_SIZE as u64;

        let mut source   = reader.take(master.file_size);
        let mut consumed = 0u64;
        let mut index    = 0u64;
        loop {
            let n = read_full(&mut source, &mut self.buffer[..])?;
            if n == 0 {
                break;
            }
            self.buffer[n..].fill(0);
            index += 1;
            master.slave(index)?.write(&mut self.writer)?;
            self.writer.write_all(&self.buffer[..])?;
            consumed += n as u64;
            written  += BLOCK_SIZE as u64;
            debug!(id = %master.id, index, payload = n, "wrote data block");
        }

        if consumed != master.file_size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "source ended after {consumed} of {} bytes",
                    master.file_size
                ),
            )
            .into());
        }

        self.writer.flush()?;
        self.bytes_written += written;
        info!(id = %master.id, name = %master.file_name, blocks = index, "encoded file");
        Ok(EncodeSummary { id: master.id, data_blocks: index, bytes_written: written })
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Encode an in-memory buffer into a fresh chunk stream.
pub fn encode_to_vec(master: &MasterHeader, data: &[u8]) -> Result<Vec<u8>> {
    let mut enc = Encoder::new(Vec::new());
    enc.encode(master, data)?;
    Ok(enc.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::header::{is_header, Header, MAX_NAME_LENGTH, SLAVE_HEADER_SIZE};
    use chrono::Utc;

    fn master_for(len: usize) -> MasterHeader {
        let now = Utc::now();
        MasterHeader::new(Uuid::new_v4(), "payload.bin", len as u64, now, now).unwrap()
    }

    #[test]
    fn empty_file_is_a_single_master_block() {
        let m = master_for(0);
        let out = encode_to_vec(&m, &[]).unwrap();
        assert_eq!(out.len(), BLOCK_SIZE);
        assert!(Header::decode(&out).unwrap().is_master());
    }

    #[test]
    fn one_byte_file_is_master_plus_one_slave() {
        let m = master_for(1);
        let out = encode_to_vec(&m, &[0x5A]).unwrap();
        assert_eq!(out.len(), 2 * BLOCK_SIZE);

        let slave = &out[BLOCK_SIZE..];
        assert!(is_header(slave));
        assert_eq!(Header::decode(slave).unwrap().index(), 1);
        assert_eq!(slave[SLAVE_HEADER_SIZE], 0x5A);
        assert!(slave[SLAVE_HEADER_SIZE + 1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn exact_multiple_has_no_padding_block() {
        let data = vec![0xEEu8; DATA_SIZE * 3];
        let m = master_for(data.len());
        let out = encode_to_vec(&m, &data).unwrap();
        assert_eq!(out.len(), 4 * BLOCK_SIZE);
        let last = &out[3 * BLOCK_SIZE..];
        assert_eq!(Header::decode(last).unwrap().index(), 3);
        assert!(last[SLAVE_HEADER_SIZE..].iter().all(|&b| b == 0xEE));
    }

    #[test]
    fn indices_are_contiguous_and_ids_shared() {
        let data: Vec<u8> = (0..DATA_SIZE * 5 + 17).map(|i| i as u8).collect();
        let m = master_for(data.len());
        let out = encode_to_vec(&m, &data).unwrap();
        for (i, block) in out.chunks(BLOCK_SIZE).enumerate() {
            let h = Header::decode(block).unwrap();
            assert_eq!(h.index(), i as u64);
            assert_eq!(h.id(), m.id);
        }
    }

    #[test]
    fn short_source_is_an_error() {
        let m = master_for(DATA_SIZE + 10);
        let err = encode_to_vec(&m, &[1u8; 100]).unwrap_err();
        assert!(matches!(err, Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[test]
    fn long_source_is_cut_at_recorded_size() {
        let m = master_for(10);
        let out = encode_to_vec(&m, &[3u8; 2000]).unwrap();
        assert_eq!(out.len(), 2 * BLOCK_SIZE);
    }

    #[test]
    fn several_files_share_one_writer() {
        let a = master_for(600);
        let b = master_for(5);
        let mut enc = Encoder::new(Vec::new());
        let sa = enc.encode(&a, &[1u8; 600][..]).unwrap();
        let sb = enc.encode(&b, &[2u8; 5][..]).unwrap();
        assert_eq!(sa.data_blocks, 2);
        assert_eq!(sb.data_blocks, 1);
        assert_eq!(enc.bytes_written, (3 + 2) * BLOCK_SIZE as u64);
        assert_eq!(enc.get_ref().len(), 5 * BLOCK_SIZE);
    }

    #[test]
    fn invalid_master_writes_nothing() {
        let mut m = master_for(1);
        m.file_name = "x".repeat(MAX_NAME_LENGTH + 1);
        let mut enc = Encoder::new(Vec::new());
        assert!(enc.encode(&m, &[0u8][..]).is_err());
        assert!(enc.into_inner().is_empty());
    }
}
