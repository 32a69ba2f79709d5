//! Path-level operations: the primary embedding surface.
//!
//! ```no_run
//! use std::path::Path;
//! use refis::ops::{self, ExtractOptions};
//!
//! // Protect a file.
//! let master = ops::encode_file(Path::new("photo.jpg"), Path::new("photo.refis"), false)?;
//!
//! // Later: find it again inside a disk image and restore it.
//! let report = ops::scan_to_index(Path::new("disk.img"), Path::new("disk.json"), false)?;
//! let restored = ops::restore_file(Path::new("disk.img"), &report.index, &master.id, &ExtractOptions::default())?;
//! assert_eq!(restored.bytes, master.file_size);
//! # Ok::<(), refis::Error>(())
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crate::decoder::{self, Probe, SequentialDecoder};
use crate::encoder::Encoder;
use crate::error::{Error, Result};
use crate::fsutil::{apply_times, create_file, resolve_destination};
use crate::header::MasterHeader;
use crate::index::{EntrySummary, Index};
use crate::recovery::{self, scanner, ScanReport};

// ── ExtractOptions ────────────────────────────────────────────────────────────

/// Configuration for [`decode_file`] and [`restore_file`].
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Output file, or a directory to place the stored name in.  `None`
    /// means the stored name in the default location of the operation.
    pub dest:          Option<PathBuf>,
    pub overwrite:     bool,
    /// Apply the stored creation/modification times to the output.
    pub restore_times: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            dest:          None,
            overwrite:     false,
            restore_times: true,
        }
    }
}

// ── Extracted ─────────────────────────────────────────────────────────────────

/// A file written by [`decode_file`] or [`restore_file`].
#[derive(Debug)]
pub struct Extracted {
    pub master: MasterHeader,
    pub path:   PathBuf,
    pub bytes:  u64,
    /// Set when the content was written but the timestamps could not be
    /// applied.  Always an [`Error::AttributeRestore`].
    pub attribute_error: Option<Error>,
}

/// Create `path` and fill it through `write`.  If anything fails after the
/// file was created it is removed again, so no partial output is left.
fn write_output<F>(path: &Path, overwrite: bool, write: F) -> Result<(File, u64)>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<u64>,
{
    let mut out = BufWriter::new(create_file(path, overwrite)?);
    let result = write(&mut out)
        .and_then(|bytes| Ok((out.into_inner().map_err(|e| e.into_error())?, bytes)));
    if let Err(e) = &result {
        warn!(path = %path.display(), error = %e, "removing incomplete output");
        if let Err(rm) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %rm, "could not remove incomplete output");
        }
    }
    result
}

fn finish(file: File, master: MasterHeader, path: PathBuf, bytes: u64, opts: &ExtractOptions) -> Result<Extracted> {
    let attribute_error = if opts.restore_times {
        apply_times(&file, &master).err().map(|e| {
            warn!(path = %path.display(), error = %e, "could not restore timestamps");
            Error::AttributeRestore(e)
        })
    } else {
        None
    };
    Ok(Extracted { master, path, bytes, attribute_error })
}

// ── Operations ────────────────────────────────────────────────────────────────

/// Encode `source` into a chunk stream at `dest`.
pub fn encode_file(source: &Path, dest: &Path, overwrite: bool) -> Result<MasterHeader> {
    let input = File::open(source)?;
    let meta  = input.metadata()?;
    let changed = meta.modified()?;
    let created = meta.created().unwrap_or(changed);

    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let master = MasterHeader::new(
        Uuid::new_v4(),
        &name,
        meta.len(),
        DateTime::<Utc>::from(created),
        DateTime::<Utc>::from(changed),
    )?;

    let output = create_file(dest, overwrite)?;
    let mut enc = Encoder::new(BufWriter::new(output));
    enc.encode(&master, BufReader::new(input))?;
    enc.into_inner().into_inner().map_err(|e| e.into_error())?;
    Ok(master)
}

/// Strictly decode a clean chunk stream.  Without a destination the stored
/// name is placed next to `source`.
pub fn decode_file(source: &Path, opts: &ExtractOptions) -> Result<Extracted> {
    let dec    = SequentialDecoder::new(BufReader::new(File::open(source)?))?;
    let master = dec.master().clone();
    let default_dir = source.parent().unwrap_or(Path::new(""));
    let path   = resolve_destination(opts.dest.as_deref(), default_dir, &master.file_name)?;

    let (file, bytes) = write_output(&path, opts.overwrite, |out| dec.decode_to(out))?;
    finish(file, master, path, bytes, opts)
}

/// Read the first block of `source` and classify it.
pub fn info_file(source: &Path) -> Result<Probe> {
    decoder::probe(BufReader::new(File::open(source)?))
}

/// Scan `source` and persist the resulting index at `index_path`.
pub fn scan_to_index(source: &Path, index_path: &Path, overwrite: bool) -> Result<ScanReport> {
    let report = scanner::scan_file(source)?;
    report.index.write_file(index_path, overwrite)?;
    Ok(report)
}

/// Summaries of every entry in a persisted index.
pub fn list_index_file(index_path: &Path) -> Result<Vec<EntrySummary>> {
    Ok(Index::read_file(index_path)?.list())
}

/// Restore file `id` from `dump` using a previously built `index`.  Without
/// a destination the stored name is used relative to the working directory.
pub fn restore_file(dump: &Path, index: &Index, id: &Uuid, opts: &ExtractOptions) -> Result<Extracted> {
    let entry  = recovery::complete_entry(index, id)?;
    let master = entry
        .master()
        .cloned()
        .ok_or(Error::Incomplete { id: *id, found: entry.len() })?;
    let path   = resolve_destination(opts.dest.as_deref(), Path::new(""), &master.file_name)?;

    let mut input = BufReader::new(File::open(dump)?);
    let (file, bytes) = write_output(&path, opts.overwrite, |out| {
        recovery::restore(index, &mut input, id, out)
    })?;
    finish(file, master, path, bytes, opts)
}
