//! Dump scanner: build an [`Index`] from arbitrary bytes.
//!
//! # How it works
//!
//! The scanner walks the input in non-overlapping `BLOCK_SIZE` windows from
//! its starting position.  Every window that passes [`is_header`] is fully
//! decoded and filed under its id together with the window's offset.  The
//! input may be a raw disk image: windows holding foreign data simply fail
//! the pre-check.
//!
//! Only block-aligned windows are inspected.  Encoded streams are themselves
//! block-aligned, and without a payload checksum a byte-granular search would
//! mistake payload bytes that happen to spell the magic for headers.
//!
//! ## Outcomes per window
//!
//! | Outcome | Effect |
//! |---------|--------|
//! | not a header | ignored |
//! | header, decode fails | counted in `rejected`, skipped |
//! | header, index already seen for the id | counted in `duplicates`, dropped |
//! | header, new index | inserted |
//!
//! A final window shorter than `BLOCK_SIZE` is discarded; the scan is
//! best-effort and never fails on content, only on I/O.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use tracing::{debug, info, warn};

use crate::fsutil::read_full;
use crate::header::{is_header, Header, BLOCK_SIZE};
use crate::index::Index;

// ── Types ─────────────────────────────────────────────────────────────────────

/// Complete report produced by [`scan`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Bytes consumed from the input, trailing partial window included.
    pub bytes_scanned:  u64,
    /// Full `BLOCK_SIZE` windows inspected.
    pub blocks_scanned: u64,
    /// Windows that passed the magic/type pre-check.
    pub headers_found:  u64,
    /// Pre-checked windows whose header failed to decode.
    pub rejected:       u64,
    /// Valid headers dropped because their logical index was already filed.
    pub duplicates:     u64,
    /// Length of the discarded partial window at the end of the input.
    pub trailing_bytes: u64,
    pub index:          Index,
}

impl ScanReport {
    /// Headers that made it into the index.
    pub fn accepted(&self) -> u64 {
        self.headers_found - self.rejected - self.duplicates
    }

    pub fn summary(&self) -> String {
        let complete = self.index.entries().filter(|e| e.is_complete()).count();
        format!(
            "scanned {} block(s): {} header(s) indexed, {} rejected, {} duplicate(s); \
             {} file(s) found, {} complete",
            self.blocks_scanned,
            self.accepted(),
            self.rejected,
            self.duplicates,
            self.index.len(),
            complete,
        )
    }

    /// Apply one decoded window at `offset`.
    fn record(&mut self, offset: u64, decoded: Option<Header>) {
        let Some(header) = decoded else {
            self.rejected += 1;
            return;
        };
        let (id, index) = (header.id(), header.index());
        if self.index.insert(header, offset) {
            debug!(%id, index, offset, "indexed header");
        } else {
            self.duplicates += 1;
            debug!(%id, index, offset, "dropped duplicate header");
        }
    }
}

// ── Scanner ───────────────────────────────────────────────────────────────────

fn decode_window(offset: u64, block: &[u8]) -> Option<Option<Header>> {
    if !is_header(block) {
        return None;
    }
    match Header::decode(block) {
        Ok(h) => Some(Some(h)),
        Err(e) => {
            warn!(offset, error = %e, "skipping corrupt header");
            Some(None)
        }
    }
}

/// Scan a stream for chunk headers.
///
/// Offsets in the resulting index are relative to the reader's position when
/// the scan starts.  `progress`, if given, is called after every window with
/// the bytes consumed so far.
pub fn scan<R, F>(reader: R, mut progress: Option<&mut F>) -> io::Result<ScanReport>
where
    R: Read,
    F: FnMut(u64),
{
    let mut reader = reader;
    let mut report = ScanReport::default();
    let mut block  = [0u8; BLOCK_SIZE];

    loop {
        let n = read_full(&mut reader, &mut block)?;
        let offset = report.bytes_scanned;
        report.bytes_scanned += n as u64;
        if n < BLOCK_SIZE {
            report.trailing_bytes = n as u64;
            break;
        }
        report.blocks_scanned += 1;

        if let Some(decoded) = decode_window(offset, &block) {
            report.headers_found += 1;
            report.record(offset, decoded);
        }

        if let Some(ref mut cb) = progress {
            cb(report.bytes_scanned);
        }
    }

    info!(
        files = report.index.len(),
        headers = report.accepted(),
        rejected = report.rejected,
        duplicates = report.duplicates,
        "scan finished"
    );
    Ok(report)
}

/// Scan an in-memory dump.  Same result as [`scan`] over the same bytes.
///
/// With the `parallel` feature, windows are decoded on the rayon pool and
/// then filed in ascending offset order, so "first occurrence wins" holds
/// exactly as in the sequential scan.
pub fn scan_slice(data: &[u8]) -> ScanReport {
    let windows = data.chunks_exact(BLOCK_SIZE);
    let trailing = windows.remainder().len() as u64;

    #[cfg(feature = "parallel")]
    let decoded: Vec<(u64, Option<Header>)> = {
        use rayon::prelude::*;
        data.par_chunks_exact(BLOCK_SIZE)
            .enumerate()
            .filter_map(|(i, block)| {
                let offset = (i * BLOCK_SIZE) as u64;
                decode_window(offset, block).map(|d| (offset, d))
            })
            .collect()
    };
    #[cfg(not(feature = "parallel"))]
    let decoded: Vec<(u64, Option<Header>)> = windows
        .enumerate()
        .filter_map(|(i, block)| {
            let offset = (i * BLOCK_SIZE) as u64;
            decode_window(offset, block).map(|d| (offset, d))
        })
        .collect();

    let mut report = ScanReport {
        bytes_scanned:  data.len() as u64,
        blocks_scanned: (data.len() / BLOCK_SIZE) as u64,
        trailing_bytes: trailing,
        ..ScanReport::default()
    };
    for (offset, d) in decoded {
        report.headers_found += 1;
        report.record(offset, d);
    }
    report
}

/// Convenience: scan the file at `path` from its first byte.
pub fn scan_file(path: &Path) -> io::Result<ScanReport> {
    let f = BufReader::new(File::open(path)?);
    scan::<_, fn(u64)>(f, None)
}
