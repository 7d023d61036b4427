//! Byte layout of the structure, table and index files.
//!
//! All integers are stored little-endian.

/// Size of a cached page in the pager
pub const PAGE_SIZE: usize = 4096;

/*
 * Structure file
 */
pub const STRUCTURE_MAGIC: [u8; 3] = *b"FSD";
pub const STRUCTURE_MAGIC_OFFSET: usize = 0;
pub const STRUCTURE_MAGIC_SIZE: usize = STRUCTURE_MAGIC.len();
pub const STRUCTURE_VERSION: u8 = 1;
pub const STRUCTURE_VERSION_OFFSET: usize = STRUCTURE_MAGIC_OFFSET + STRUCTURE_MAGIC_SIZE;
pub const STRUCTURE_VERSION_SIZE: usize = 1;
pub const STRUCTURE_HEADER_SIZE: usize = STRUCTURE_VERSION_OFFSET + STRUCTURE_VERSION_SIZE;

/*
 * Table header
 */
pub const TABLE_MAGIC: [u8; 4] = *b"FTBL";
pub const TABLE_VERSION: u8 = 1;
pub const TABLE_MAGIC_OFFSET: usize = 0;
pub const TABLE_MAGIC_SIZE: usize = TABLE_MAGIC.len();
pub const TABLE_VERSION_OFFSET: usize = TABLE_MAGIC_OFFSET + TABLE_MAGIC_SIZE;
pub const TABLE_VERSION_SIZE: usize = 1;
pub const TABLE_RESERVED_SIZE: usize = 3;
pub const TABLE_LIVE_COUNT_OFFSET: usize =
    TABLE_VERSION_OFFSET + TABLE_VERSION_SIZE + TABLE_RESERVED_SIZE;
pub const TABLE_LIVE_COUNT_SIZE: usize = 4;
pub const TABLE_NEXT_ID_OFFSET: usize = TABLE_LIVE_COUNT_OFFSET + TABLE_LIVE_COUNT_SIZE;
pub const TABLE_NEXT_ID_SIZE: usize = 4;
pub const TABLE_COMMIT_SEQ_OFFSET: usize = TABLE_NEXT_ID_OFFSET + TABLE_NEXT_ID_SIZE;
pub const TABLE_COMMIT_SEQ_SIZE: usize = 4;
pub const TABLE_END_OFFSET_OFFSET: usize = TABLE_COMMIT_SEQ_OFFSET + TABLE_COMMIT_SEQ_SIZE;
pub const TABLE_END_OFFSET_SIZE: usize = 8;
pub const TABLE_HEADER_SIZE: usize = TABLE_END_OFFSET_OFFSET + TABLE_END_OFFSET_SIZE;

/*
 * Record slot
 */
pub const MARKER_LIVE: u8 = 0xA5;
pub const MARKER_DELETED: u8 = 0x5A;
pub const SLOT_MARKER_OFFSET: usize = 0;
pub const SLOT_MARKER_SIZE: usize = 1;
pub const SLOT_CAPACITY_OFFSET: usize = SLOT_MARKER_OFFSET + SLOT_MARKER_SIZE;
pub const SLOT_CAPACITY_SIZE: usize = 4;
pub const SLOT_HEADER_SIZE: usize = SLOT_CAPACITY_OFFSET + SLOT_CAPACITY_SIZE;
pub const SLOT_ID_SIZE: usize = 4;
pub const SLOT_SENTINEL: [u8; 2] = [0xE0, 0x5D];
pub const SLOT_SENTINEL_SIZE: usize = SLOT_SENTINEL.len();
/// Bytes a slot occupies beyond its body
pub const SLOT_OVERHEAD: usize = SLOT_HEADER_SIZE + SLOT_SENTINEL_SIZE;

/*
 * Column widths
 */
pub const INTEGER_SIZE: usize = 4;
pub const DATETIME_SIZE: usize = 8;
pub const STRING_LEN_SIZE: usize = 2;
pub const STRING_MAX_LEN: usize = u16::MAX as usize;

/*
 * Table footer (end-of-table sentinel)
 */
pub const FOOTER_MARKER: u8 = 0xF0;
pub const FOOTER_MAGIC: [u8; 4] = *b"FEND";
pub const FOOTER_MARKER_OFFSET: usize = 0;
pub const FOOTER_MARKER_SIZE: usize = 1;
pub const FOOTER_LIVE_COUNT_OFFSET: usize = FOOTER_MARKER_OFFSET + FOOTER_MARKER_SIZE;
pub const FOOTER_LIVE_COUNT_SIZE: usize = 4;
pub const FOOTER_MAGIC_OFFSET: usize = FOOTER_LIVE_COUNT_OFFSET + FOOTER_LIVE_COUNT_SIZE;
pub const FOOTER_MAGIC_SIZE: usize = FOOTER_MAGIC.len();
pub const FOOTER_SIZE: usize = FOOTER_MAGIC_OFFSET + FOOTER_MAGIC_SIZE;

/*
 * Index file
 */
pub const INDEX_MAGIC: [u8; 4] = *b"FIDX";
pub const INDEX_VERSION: u8 = 1;
