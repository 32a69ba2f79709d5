//! Recovery path: scan a damaged dump into an [`Index`], then restore files
//! from it by seeking to each data block in logical order.

pub mod scanner;

pub use scanner::{scan, scan_file, scan_slice, ScanReport};

use std::io::{Read, Seek, SeekFrom, Write};

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::header::{Header, BLOCK_SIZE, DATA_SIZE, SLAVE_HEADER_SIZE};
use crate::index::{Index, IndexEntry};

/// Look up `id` and require its entry to be complete.  Restoration never
/// starts on anything less.
pub fn complete_entry<'a>(index: &'a Index, id: &Uuid) -> Result<&'a IndexEntry> {
    if id.is_nil() {
        return Err(Error::InvalidId);
    }
    let entry = index.get(id).ok_or(Error::UnknownId(*id))?;
    if !entry.is_complete() {
        return Err(Error::Incomplete { id: *id, found: entry.len() });
    }
    Ok(entry)
}

/// Reassemble file `id` from `dump` into `out`.  Returns the bytes written.
///
/// Each indexed block is re-read and its header compared with the index
/// before the payload is used, so an index applied to the wrong dump fails
/// instead of producing garbage.
pub fn restore<R, W>(index: &Index, dump: &mut R, id: &Uuid, mut out: W) -> Result<u64>
where
    R: Read + Seek,
    W: Write,
{
    let entry = complete_entry(index, id)?;
    let master = entry
        .master()
        .ok_or(Error::Incomplete { id: *id, found: entry.len() })?;

    let mut block   = [0u8; BLOCK_SIZE];
    let mut stride  = 0u64;
    let mut written = 0u64;
    for located in entry.data_blocks() {
        dump.seek(SeekFrom::Start(located.offset))?;
        dump.read_exact(&mut block)?;
        match Header::decode(&block) {
            Ok(h) if h == located.header => {}
            _ => {
                return Err(Error::DataCorruption(format!(
                    "dump does not hold block {} of {id} at offset {}",
                    located.header.index(),
                    located.offset
                )))
            }
        }

        // Only the final block is shortened; the stride stays DATA_SIZE.
        let take = master.file_size.saturating_sub(stride).min(DATA_SIZE as u64) as usize;
        out.write_all(&block[SLAVE_HEADER_SIZE..SLAVE_HEADER_SIZE + take])?;
        stride  += DATA_SIZE as u64;
        written += take as u64;
        debug!(%id, index = located.header.index(), offset = located.offset, "restored block");
    }

    out.flush()?;
    info!(%id, name = %master.file_name, bytes = written, "restored file");
    Ok(written)
}
