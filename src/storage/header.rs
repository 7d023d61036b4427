use crate::calculate_offsets;

use super::{
    error::StoreError,
    layout::{
        FOOTER_LIVE_COUNT_OFFSET, FOOTER_LIVE_COUNT_SIZE, FOOTER_MAGIC, FOOTER_MAGIC_OFFSET,
        FOOTER_MAGIC_SIZE, FOOTER_MARKER, FOOTER_MARKER_OFFSET, FOOTER_SIZE,
        TABLE_COMMIT_SEQ_OFFSET, TABLE_COMMIT_SEQ_SIZE, TABLE_END_OFFSET_OFFSET,
        TABLE_END_OFFSET_SIZE, TABLE_HEADER_SIZE, TABLE_LIVE_COUNT_OFFSET, TABLE_LIVE_COUNT_SIZE,
        TABLE_MAGIC, TABLE_MAGIC_OFFSET, TABLE_MAGIC_SIZE, TABLE_NEXT_ID_OFFSET,
        TABLE_NEXT_ID_SIZE, TABLE_VERSION, TABLE_VERSION_OFFSET,
    },
    Result,
};

/// Counters stored at the start of every table file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableHeader {
    pub live_count: u32,
    pub next_id: u32,
    pub commit_seq: u32,
    /// Offset of the footer; slots occupy `TABLE_HEADER_SIZE..end_offset`
    pub end_offset: u64,
}

impl Default for TableHeader {
    fn default() -> Self {
        Self {
            live_count: 0,
            next_id: 0,
            commit_seq: 0,
            end_offset: TABLE_HEADER_SIZE as u64,
        }
    }
}

impl TableHeader {
    pub fn to_bytes(&self) -> [u8; TABLE_HEADER_SIZE] {
        let mut out = [0u8; TABLE_HEADER_SIZE];

        let (start, end) = calculate_offsets!(TABLE_MAGIC_OFFSET, TABLE_MAGIC_SIZE);
        out[start..end].clone_from_slice(&TABLE_MAGIC);
        out[TABLE_VERSION_OFFSET] = TABLE_VERSION;

        let (start, end) = calculate_offsets!(TABLE_LIVE_COUNT_OFFSET, TABLE_LIVE_COUNT_SIZE);
        out[start..end].clone_from_slice(&self.live_count.to_le_bytes());

        let (start, end) = calculate_offsets!(TABLE_NEXT_ID_OFFSET, TABLE_NEXT_ID_SIZE);
        out[start..end].clone_from_slice(&self.next_id.to_le_bytes());

        let (start, end) = calculate_offsets!(TABLE_COMMIT_SEQ_OFFSET, TABLE_COMMIT_SEQ_SIZE);
        out[start..end].clone_from_slice(&self.commit_seq.to_le_bytes());

        let (start, end) = calculate_offsets!(TABLE_END_OFFSET_OFFSET, TABLE_END_OFFSET_SIZE);
        out[start..end].clone_from_slice(&self.end_offset.to_le_bytes());

        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < TABLE_HEADER_SIZE {
            return Err(StoreError::format("table header is truncated"));
        }

        let (start, end) = calculate_offsets!(TABLE_MAGIC_OFFSET, TABLE_MAGIC_SIZE);
        if bytes[start..end] != TABLE_MAGIC {
            return Err(StoreError::format("content is not a valid table file"));
        }
        if bytes[TABLE_VERSION_OFFSET] != TABLE_VERSION {
            return Err(StoreError::format(format!(
                "unsupported table format {:#x}",
                bytes[TABLE_VERSION_OFFSET]
            )));
        }

        let header = Self {
            live_count: read_u32(bytes, TABLE_LIVE_COUNT_OFFSET),
            next_id: read_u32(bytes, TABLE_NEXT_ID_OFFSET),
            commit_seq: read_u32(bytes, TABLE_COMMIT_SEQ_OFFSET),
            end_offset: read_u64(bytes, TABLE_END_OFFSET_OFFSET),
        };

        if header.end_offset < TABLE_HEADER_SIZE as u64 {
            return Err(StoreError::bad_indexes(format!(
                "end offset {} lies inside the header",
                header.end_offset
            )));
        }
        Ok(header)
    }
}

/// End-of-table sentinel written after the last slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub live_count: u32,
}

impl Footer {
    pub fn to_bytes(&self) -> [u8; FOOTER_SIZE] {
        let mut out = [0u8; FOOTER_SIZE];
        out[FOOTER_MARKER_OFFSET] = FOOTER_MARKER;

        let (start, end) = calculate_offsets!(FOOTER_LIVE_COUNT_OFFSET, FOOTER_LIVE_COUNT_SIZE);
        out[start..end].clone_from_slice(&self.live_count.to_le_bytes());

        let (start, end) = calculate_offsets!(FOOTER_MAGIC_OFFSET, FOOTER_MAGIC_SIZE);
        out[start..end].clone_from_slice(&FOOTER_MAGIC);

        out
    }

    /// Parses a footer; `None` when the bytes are not one
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < FOOTER_SIZE || bytes[FOOTER_MARKER_OFFSET] != FOOTER_MARKER {
            return None;
        }

        let (start, end) = calculate_offsets!(FOOTER_MAGIC_OFFSET, FOOTER_MAGIC_SIZE);
        if bytes[start..end] != FOOTER_MAGIC {
            return None;
        }

        Some(Self {
            live_count: read_u32(bytes, FOOTER_LIVE_COUNT_OFFSET),
        })
    }
}

fn read_u32(bytes: &[u8], start: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.clone_from_slice(&bytes[start..start + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8], start: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.clone_from_slice(&bytes[start..start + 8]);
    u64::from_le_bytes(buf)
}
