use serde::{Deserialize, Serialize};
use std::collections::btree_map::{BTreeMap, Entry};
use std::fs;
use std::io::Write;
use std::path::Path;
use uuid::Uuid;

use crate::error::Result;
use crate::fsutil::create_file;
use crate::header::{data_blocks_for, Header, MasterHeader};

/// A header and the byte offset of its block in the scanned dump.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Located {
    pub header: Header,
    pub offset: u64,
}

/// Every block found for one file id, keyed by logical index.
///
/// At most one block per index is kept; the first one inserted wins, which
/// also collapses a dump that holds the same stream more than once.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(try_from = "EntryRecord", into = "EntryRecord")]
pub struct IndexEntry {
    id:     Uuid,
    blocks: BTreeMap<u64, Located>,
}

impl IndexEntry {
    pub fn new(id: Uuid) -> Self {
        Self { id, blocks: BTreeMap::new() }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns `false` if a block with the same logical index is already
    /// present.  Only [`Index::insert`] calls this and it buckets by id, so a
    /// foreign id here is a bug in the caller.
    pub(crate) fn insert(&mut self, located: Located) -> bool {
        assert_eq!(
            located.header.id(),
            self.id,
            "header filed under a foreign id bucket"
        );
        match self.blocks.entry(located.header.index()) {
            Entry::Vacant(slot) => {
                slot.insert(located);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    pub fn master(&self) -> Option<&MasterHeader> {
        self.blocks.get(&0).and_then(|l| l.header.as_master())
    }

    pub fn get(&self, index: u64) -> Option<&Located> {
        self.blocks.get(&index)
    }

    /// Number of distinct blocks found, master included.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Blocks a complete entry holds (`N + 1`), known once the master is.
    pub fn expected_blocks(&self) -> Option<u64> {
        self.master().map(|m| data_blocks_for(m.file_size) + 1)
    }

    /// A master is present and every index `0..=N` has exactly one block.
    ///
    /// This checks block presence, not payload integrity: the format carries
    /// no checksum, so a damaged-but-present slave still counts.
    pub fn is_complete(&self) -> bool {
        let Some(expected) = self.expected_blocks() else {
            return false;
        };
        // Keys are distinct and start at 0, so count plus highest key pins
        // them to exactly 0..=N.
        self.blocks.len() as u64 == expected
            && self.blocks.keys().next_back() == Some(&(expected - 1))
    }

    /// All blocks in ascending logical order.
    pub fn blocks(&self) -> impl Iterator<Item = &Located> {
        self.blocks.values()
    }

    /// Slave blocks in ascending logical order.
    pub fn data_blocks(&self) -> impl Iterator<Item = &Located> {
        self.blocks.range(1..).map(|(_, l)| l)
    }

    /// Logical indices `1..=N` not yet found.  Empty without a master.
    pub fn missing_indices(&self) -> impl Iterator<Item = u64> + '_ {
        let last = self.expected_blocks().map_or(0, |n| n - 1);
        (1..=last).filter(move |i| !self.blocks.contains_key(i))
    }
}

#[derive(Serialize, Deserialize)]
struct EntryRecord {
    headers: Vec<Located>,
}

impl From<IndexEntry> for EntryRecord {
    fn from(e: IndexEntry) -> Self {
        EntryRecord { headers: e.blocks.into_values().collect() }
    }
}

impl TryFrom<EntryRecord> for IndexEntry {
    type Error = String;

    // Persisted input is untrusted, so a foreign id is an error here rather
    // than the assertion `insert` enforces.
    fn try_from(r: EntryRecord) -> std::result::Result<Self, Self::Error> {
        let first = r.headers.first().ok_or("index entry without headers")?;
        let mut entry = IndexEntry::new(first.header.id());
        for located in r.headers {
            if located.header.id() != entry.id {
                return Err(format!(
                    "header of {} listed under {}",
                    located.header.id(),
                    entry.id
                ));
            }
            entry.insert(located);
        }
        Ok(entry)
    }
}

/// Most missing indices an [`EntrySummary`] carries.  A corrupt master can
/// claim a size with billions of blocks.
pub const LISTED_GAPS: usize = 64;

/// One line of [`Index::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntrySummary {
    pub id:        Uuid,
    pub file_size: Option<u64>,
    pub file_name: Option<String>,
    pub found:     usize,
    pub expected:  Option<u64>,
    pub complete:  bool,
    /// The first [`LISTED_GAPS`] missing data-block indices, ascending.
    pub missing:   Vec<u64>,
    /// More indices are missing than `missing` holds.
    pub more_missing: bool,
}

/// File id → blocks found for it.  Built by one scanner pass, read-only after.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(try_from = "IndexRecord")]
pub struct Index {
    files: BTreeMap<Uuid, IndexEntry>,
}

#[derive(Deserialize)]
struct IndexRecord {
    files: BTreeMap<Uuid, IndexEntry>,
}

impl TryFrom<IndexRecord> for Index {
    type Error = String;

    fn try_from(r: IndexRecord) -> std::result::Result<Self, Self::Error> {
        if let Some((key, entry)) = r.files.iter().find(|(k, e)| **k != e.id) {
            return Err(format!("entry for {} filed under {key}", entry.id));
        }
        Ok(Index { files: r.files })
    }
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// File `header` found at `offset` under its own id.  Returns `false`
    /// when the block was dropped as a duplicate logical index.
    pub fn insert(&mut self, header: Header, offset: u64) -> bool {
        let id = header.id();
        self.files
            .entry(id)
            .or_insert_with(|| IndexEntry::new(id))
            .insert(Located { header, offset })
    }

    pub fn get(&self, id: &Uuid) -> Option<&IndexEntry> {
        self.files.get(id)
    }

    /// All file ids, complete or not.
    pub fn ids(&self) -> impl Iterator<Item = &Uuid> {
        self.files.keys()
    }

    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.files.values()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn list(&self) -> Vec<EntrySummary> {
        self.entries()
            .map(|e| {
                let mut missing: Vec<u64> = e.missing_indices().take(LISTED_GAPS + 1).collect();
                let more_missing = missing.len() > LISTED_GAPS;
                missing.truncate(LISTED_GAPS);
                EntrySummary {
                    id:        e.id(),
                    file_size: e.master().map(|m| m.file_size),
                    file_name: e.master().map(|m| m.file_name.clone()),
                    found:     e.len(),
                    expected:  e.expected_blocks(),
                    complete:  e.is_complete(),
                    missing,
                    more_missing,
                }
            })
            .collect()
    }

    pub fn to_bytes(&self) -> std::result::Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn write_file(&self, path: &Path, overwrite: bool) -> Result<()> {
        let bytes = self.to_bytes()?;
        let mut f = create_file(path, overwrite)?;
        f.write_all(&bytes)?;
        f.flush()?;
        Ok(())
    }

    pub fn read_file(path: &Path) -> Result<Self> {
        Ok(Self::from_bytes(&fs::read(path)?)?)
    }
}
