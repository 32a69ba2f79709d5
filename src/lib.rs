pub mod ticks;
pub mod header;
pub mod error;
pub mod fsutil;
pub mod encoder;
pub mod decoder;
pub mod index;
pub mod recovery;
pub mod ops;

pub use header::{Header, MasterHeader, SlaveHeader};
pub use error::{Error, Result};
pub use encoder::{Encoder, EncodeSummary, encode_to_vec};
pub use decoder::{Probe, SequentialDecoder, decode_to_vec};
pub use index::{Index, IndexEntry, EntrySummary};
pub use recovery::{restore, scan, scan_slice, ScanReport};
