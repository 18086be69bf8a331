//! iTunesDB binary codec
//!
//! Parses and emits the nested chunk format used by iPod Classic/Nano
//! firmware. Chunks carry child-inclusive length fields, so the writer emits
//! headers with zero placeholders and backpatches lengths and child counts
//! once the subtree is complete.

mod buffer;
mod reader;
mod records;
mod strings;
mod types;
mod writer;

pub use buffer::{ByteWriter, HeaderFix};
pub use reader::{parse_database, ReadError};
pub use records::{AlbumRecord, Database, PlaylistItem, PlaylistRecord, TrackRecord};
pub use types::{
    filetype_word, mac_to_unix, unix_to_mac, DatasetKind, MediaType, MhodType, MHBD_DBID_OFFSET,
    MHBD_HASH58_LEN, MHBD_HASH58_OFFSET, MHBD_HASH72_LEN, MHBD_HASH72_OFFSET, MHBD_HEADER_LEN,
    MHBD_SCHEME_OFFSET, MHBD_UNK_0X32_LEN, MHBD_UNK_0X32_OFFSET, MHOD_HEADER_LEN,
};
pub use writer::{emit_database, TrackAssignment};
