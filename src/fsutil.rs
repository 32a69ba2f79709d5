//! Output-file plumbing shared by the path-level operations.

use std::ffi::OsStr;
use std::fs::{File, FileTimes, OpenOptions};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use crate::error::{Error, Result};
use crate::header::MasterHeader;

/// Read until `buf` is full or the stream ends.  Returns the bytes read;
/// fewer than `buf.len()` only at end of stream.
pub fn read_full<R: Read>(mut reader: R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Open `path` for exclusive writing.  Without `overwrite` the file must not
/// exist yet; the check and the creation are one atomic open.
pub fn create_file(path: &Path, overwrite: bool) -> Result<File> {
    let mut opts = OpenOptions::new();
    opts.write(true);
    if overwrite {
        opts.create(true).truncate(true);
    } else {
        opts.create_new(true);
    }
    opts.open(path).map_err(|e| match e.kind() {
        io::ErrorKind::AlreadyExists => Error::DestinationExists(path.to_path_buf()),
        _ => Error::Io(e),
    })
}

/// A stored name must be one ordinary path component before it is joined
/// onto a directory.  Names come from possibly foreign dumps.
pub fn plain_name(stored: &str) -> Result<&OsStr> {
    let mut parts = Path::new(stored).components();
    match (parts.next(), parts.next()) {
        (Some(Component::Normal(name)), None) if name == OsStr::new(stored) => Ok(name),
        _ => Err(Error::DataCorruption(format!(
            "stored file name {stored:?} is not a plain file name"
        ))),
    }
}

/// Where a decoded or restored file goes:
/// an explicit file path as given, an explicit directory plus the stored
/// name, or `default_dir` plus the stored name.
pub fn resolve_destination(
    dest:        Option<&Path>,
    default_dir: &Path,
    stored_name: &str,
) -> Result<PathBuf> {
    match dest {
        Some(p) if p.is_dir() => Ok(p.join(plain_name(stored_name)?)),
        Some(p) => Ok(p.to_path_buf()),
        None => Ok(default_dir.join(plain_name(stored_name)?)),
    }
}

/// Apply the master header's timestamps to an open output file.  Creation
/// time is only settable on Windows and macOS; elsewhere it is skipped.
pub fn apply_times(file: &File, master: &MasterHeader) -> io::Result<()> {
    let times = FileTimes::new().set_modified(SystemTime::from(master.change_time));
    #[cfg(windows)]
    let times = {
        use std::os::windows::fs::FileTimesExt;
        times.set_created(SystemTime::from(master.create_time))
    };
    #[cfg(target_os = "macos")]
    let times = {
        use std::os::macos::fs::FileTimesExt;
        times.set_created(SystemTime::from(master.create_time))
    };
    file.set_times(times)
}
