//! Scanning, repair and compaction of table files.

use log::{debug, info, warn};

use super::{
    codec::{decode_body, encode_body, encode_slot, salvage_body},
    error::StoreError,
    header::{Footer, TableHeader},
    index::{replace_file, IndexSet},
    layout::{
        FOOTER_MAGIC, FOOTER_MAGIC_OFFSET, FOOTER_MARKER, FOOTER_SIZE, MARKER_DELETED,
        MARKER_LIVE, SLOT_CAPACITY_OFFSET, SLOT_HEADER_SIZE, SLOT_OVERHEAD, SLOT_SENTINEL,
        SLOT_SENTINEL_SIZE, TABLE_HEADER_SIZE,
    },
    pager::Pager,
    schema::{Column, TableDef},
    slot::{SlotArena, SlotState},
    table::Table,
    value::Value,
    Result,
};

/// Slot frames found when a table is opened
pub(crate) struct FrameScan {
    pub arena: SlotArena,
    /// Offset just past the last complete slot
    pub end: u64,
    /// Last slot, cut short by the end of the file
    pub cut: Option<CutSlot>,
    /// Why the slot region cannot be walked
    pub broken: Option<String>,
}

pub(crate) struct CutSlot {
    offset: u64,
    marker: u8,
    capacity: u32,
}

/// Arena after a truncated tail was repaired
pub(crate) struct TailRepair {
    pub arena: SlotArena,
    pub end: u64,
    /// Slot index and values of a record rebuilt from a partial slot
    pub repaired: Option<(u32, Vec<Value>)>,
}

/// Totals of one rebuild or defragmentation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub live: usize,
    /// Records that could only be kept with some fields bounded or defaulted
    pub salvaged: usize,
    /// Records dropped because no valid boundary could be found for them
    pub lost: usize,
}

fn is_marker(byte: u8) -> bool {
    byte == MARKER_LIVE || byte == MARKER_DELETED
}

fn capacity_at(bytes: &[u8], pos: usize) -> Option<u32> {
    let raw = bytes.get(pos + SLOT_CAPACITY_OFFSET..pos + SLOT_HEADER_SIZE)?;
    Some(u32::from_le_bytes(raw.try_into().ok()?))
}

/// Walks slot headers from the table header to its recorded end.
///
/// Only markers, capacities and sentinels are read here; bodies are decoded
/// when a record is fetched.
pub(crate) fn scan_frames(pager: &Pager, header: &TableHeader) -> Result<FrameScan> {
    let mut arena = SlotArena::default();
    let file_len = pager.len();
    let mut pos = TABLE_HEADER_SIZE as u64;
    let mut cut = None;
    let mut broken = None;

    while pos < header.end_offset {
        let head = pager.read_available(pos, SLOT_HEADER_SIZE)?;
        if head.len() < SLOT_HEADER_SIZE {
            break;
        }

        let marker = head[0];
        let capacity = capacity_at(&head, 0).unwrap_or_default();
        let slot_end = pos + capacity as u64 + SLOT_OVERHEAD as u64;

        if slot_end > header.end_offset {
            broken = Some(format!(
                "slot at {pos} overruns the end of the table at {}",
                header.end_offset
            ));
            break;
        }
        if slot_end > file_len {
            if is_marker(marker) {
                cut = Some(CutSlot {
                    offset: pos,
                    marker,
                    capacity,
                });
            }
            break;
        }
        if pager.read(slot_end - SLOT_SENTINEL_SIZE as u64, SLOT_SENTINEL_SIZE)? != SLOT_SENTINEL
        {
            broken = Some(format!("slot at {pos} has no end-of-record sentinel"));
            break;
        }

        let state = match marker {
            MARKER_LIVE => SlotState::Live,
            MARKER_DELETED => SlotState::Free,
            other => {
                warn!("slot at {} has unknown marker {:#x}", pos, other);
                SlotState::Lost
            }
        };
        arena.push(pos, capacity, state);
        pos = slot_end;
    }

    Ok(FrameScan {
        arena,
        end: pos,
        cut,
        broken,
    })
}

/// Rebuilds the slot cut short by the end of the file, if enough of it survived.
///
/// Missing trailing fields take their defaults; a slot that lost part of its
/// identifier is dropped.
pub(crate) fn repair_tail(
    pager: &mut Pager,
    def: &TableDef,
    scan: FrameScan,
) -> Result<TailRepair> {
    let mut arena = scan.arena;
    let mut end = scan.end;
    let mut repaired = None;

    if let Some(cut) = scan.cut {
        let body_start = cut.offset + SLOT_HEADER_SIZE as u64;
        let available = pager.read_available(body_start, cut.capacity as usize)?;
        let span = cut.capacity as u64 + SLOT_OVERHEAD as u64;

        match (cut.marker, salvage_body(&available, def.columns())) {
            (MARKER_LIVE, Some(salvaged)) => {
                let body = encode_body(salvaged.id, &salvaged.values)?;
                if body.len() <= cut.capacity as usize {
                    let bytes = encode_slot(MARKER_LIVE, cut.capacity as usize, &body);
                    pager.write(cut.offset, &bytes)?;
                    let handle = arena.push(cut.offset, cut.capacity, SlotState::Live);
                    end = cut.offset + span;
                    warn!(
                        "recovered truncated record {} of {}; {} fields defaulted",
                        salvaged.id,
                        def.name(),
                        salvaged.repaired
                    );
                    repaired = Some((handle.index, salvaged.values));
                } else {
                    warn!("dropping truncated record {} of {}", salvaged.id, def.name());
                }
            }
            (MARKER_DELETED, _) => {
                let bytes = encode_slot(MARKER_DELETED, cut.capacity as usize, &[]);
                pager.write(cut.offset, &bytes)?;
                arena.push(cut.offset, cut.capacity, SlotState::Free);
                end = cut.offset + span;
            }
            _ => warn!("dropping partial slot at {} of {}", cut.offset, def.name()),
        }
    }

    Ok(TailRepair {
        arena,
        end,
        repaired,
    })
}

/// A slot found by a full scan
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Frame {
    Live {
        offset: u64,
        capacity: u32,
        id: u32,
        values: Vec<Value>,
        salvaged: bool,
    },
    Deleted {
        offset: u64,
        capacity: u32,
    },
}

/// Walks every slot up to the recorded end and decodes each live body.
///
/// Any damage fails the scan.
pub(crate) fn scan_strict(
    bytes: &[u8],
    header: &TableHeader,
    columns: &[Column],
) -> Result<Vec<Frame>> {
    let end = usize::try_from(header.end_offset)
        .map_err(|_| StoreError::bad_indexes("end offset out of range"))?;
    if end > bytes.len() {
        return Err(StoreError::bad_indexes(format!(
            "table ends at {end} but the file holds {} bytes",
            bytes.len()
        )));
    }

    let mut frames = Vec::new();
    let mut pos = TABLE_HEADER_SIZE;
    while pos < end {
        let slot_end = frame_end(bytes, pos)
            .filter(|e| *e <= end)
            .ok_or_else(|| StoreError::bad_indexes(format!("slot at {pos} is damaged")))?;
        let capacity = (slot_end - pos - SLOT_OVERHEAD) as u32;
        let offset = pos as u64;

        match bytes[pos] {
            MARKER_LIVE => {
                let body = &bytes[pos + SLOT_HEADER_SIZE..slot_end - SLOT_SENTINEL_SIZE];
                let (id, values) = decode_body(body, columns)
                    .map_err(|fault| StoreError::bad_indexes(format!("slot at {pos}: {fault}")))?;
                frames.push(Frame::Live {
                    offset,
                    capacity,
                    id,
                    values,
                    salvaged: false,
                });
            }
            MARKER_DELETED => frames.push(Frame::Deleted { offset, capacity }),
            other => {
                return Err(StoreError::bad_indexes(format!(
                    "slot at {pos} has unknown marker {other:#x}"
                )))
            }
        }
        pos = slot_end;
    }

    Ok(frames)
}

/// Recovers every record whose boundaries can still be found.
///
/// Slots with an unknown marker are skipped. After a damaged frame the scan
/// resumes at the next offset that follows a sentinel and starts a valid
/// frame or the end-of-table sentinel.
pub(crate) fn scan_salvage(bytes: &[u8], columns: &[Column]) -> (Vec<Frame>, usize) {
    let mut frames = Vec::new();
    let mut lost = 0;
    let mut pos = TABLE_HEADER_SIZE;

    while pos < bytes.len() && !footer_at(bytes, pos) {
        let Some(slot_end) = frame_end(bytes, pos) else {
            lost += 1;
            match resync(bytes, pos + 1) {
                Some(next) => {
                    warn!("skipped {} damaged bytes at {}", next - pos, pos);
                    pos = next;
                    continue;
                }
                None => {
                    warn!("discarding damaged tail at {}", pos);
                    break;
                }
            }
        };

        let capacity = (slot_end - pos - SLOT_OVERHEAD) as u32;
        let offset = pos as u64;
        let body = &bytes[pos + SLOT_HEADER_SIZE..slot_end - SLOT_SENTINEL_SIZE];

        match bytes[pos] {
            MARKER_LIVE => match decode_body(body, columns) {
                Ok((id, values)) => frames.push(Frame::Live {
                    offset,
                    capacity,
                    id,
                    values,
                    salvaged: false,
                }),
                Err(fault) => match salvage_body(body, columns) {
                    Some(salvaged) => {
                        warn!("salvaged record {} at {}; {}", salvaged.id, pos, fault);
                        frames.push(Frame::Live {
                            offset,
                            capacity,
                            id: salvaged.id,
                            values: salvaged.values,
                            salvaged: true,
                        });
                    }
                    None => {
                        warn!("record at {} is unrecoverable; {}", pos, fault);
                        lost += 1;
                    }
                },
            },
            MARKER_DELETED => frames.push(Frame::Deleted { offset, capacity }),
            other => {
                warn!("dropping slot at {} with unknown marker {:#x}", pos, other);
                lost += 1;
            }
        }
        pos = slot_end;
    }

    (frames, lost)
}

/// End of the slot starting at `pos`, if its capacity lands on a sentinel
fn frame_end(bytes: &[u8], pos: usize) -> Option<usize> {
    let capacity = capacity_at(bytes, pos)? as usize;
    let end = pos
        .checked_add(SLOT_OVERHEAD)?
        .checked_add(capacity)?;
    match bytes.get(end - SLOT_SENTINEL_SIZE..end)? == SLOT_SENTINEL {
        true => Some(end),
        false => None,
    }
}

fn footer_at(bytes: &[u8], pos: usize) -> bool {
    bytes.get(pos) == Some(&FOOTER_MARKER)
        && bytes.get(pos + FOOTER_MAGIC_OFFSET..pos + FOOTER_SIZE) == Some(&FOOTER_MAGIC[..])
}

fn resync(bytes: &[u8], from: usize) -> Option<usize> {
    (from.max(SLOT_SENTINEL_SIZE)..bytes.len()).find(|p| {
        bytes[p - SLOT_SENTINEL_SIZE..*p] == SLOT_SENTINEL
            && (footer_at(bytes, *p) || (is_marker(bytes[*p]) && frame_end(bytes, *p).is_some()))
    })
}

impl Table {
    /// Rebuilds indexes and counters from the data file.
    ///
    /// A plain rebuild fails on any damage. An aggressive one drops what it
    /// cannot recover and rewrites the file with the survivors.
    pub fn rebuild(&mut self, aggressive: bool) -> Result<RebuildReport> {
        let bytes = self.pager.read_available(0, self.pager.len() as usize)?;

        if aggressive {
            let (frames, lost) = scan_salvage(&bytes, self.def.columns());
            let mut report = self.compact(frames)?;
            report.lost = lost;
            info!(
                "rebuilt {}; {} live, {} salvaged, {} lost",
                self.def.name(),
                report.live,
                report.salvaged,
                report.lost
            );
            return Ok(report);
        }

        let frames = scan_strict(&bytes, &self.header, self.def.columns())?;
        let report = self.reindex(frames)?;
        info!("reindexed {}; {} live", self.def.name(), report.live);
        Ok(report)
    }

    /// Rewrites the data file without free space, keeping record identifiers
    pub fn defragment(&mut self) -> Result<RebuildReport> {
        let bytes = self.pager.read_available(0, self.pager.len() as usize)?;
        let frames = scan_strict(&bytes, &self.header, self.def.columns())?;

        let before = bytes.len();
        let report = self.compact(frames)?;
        info!(
            "defragmented {}; {} bytes down to {}",
            self.def.name(),
            before,
            self.pager.len()
        );
        Ok(report)
    }

    /// Rebuilds the arena and indexes over the existing file layout
    fn reindex(&mut self, frames: Vec<Frame>) -> Result<RebuildReport> {
        let mut arena = SlotArena::starting_at(self.arena.next_generation());
        let mut indexes = IndexSet::new(self.def.indexes());
        let mut max_id = None;
        let mut live = 0;

        for frame in frames {
            match frame {
                Frame::Live {
                    offset,
                    capacity,
                    id,
                    values,
                    ..
                } => {
                    let handle = arena.push(offset, capacity, SlotState::Live);
                    indexes.insert_record(handle.index, &values);
                    max_id = max_id.max(Some(id));
                    live += 1;
                }
                Frame::Deleted { offset, capacity } => {
                    arena.push(offset, capacity, SlotState::Free);
                }
            }
        }

        self.arena = arena;
        self.indexes = indexes;
        self.reset_counters(live, max_id);
        self.write_counters()?;
        self.stale = None;
        self.dirty = true;
        self.flush()?;

        Ok(RebuildReport {
            live: live as usize,
            ..Default::default()
        })
    }

    /// Writes the live frames to a fresh file and swaps it in
    fn compact(&mut self, frames: Vec<Frame>) -> Result<RebuildReport> {
        let mut out = vec![0u8; TABLE_HEADER_SIZE];
        let mut arena = SlotArena::starting_at(self.arena.next_generation());
        let mut indexes = IndexSet::new(self.def.indexes());
        let mut report = RebuildReport::default();
        let mut max_id = None;

        for frame in frames {
            let Frame::Live {
                id,
                values,
                salvaged,
                ..
            } = frame
            else {
                continue;
            };

            let body = encode_body(id, &values)?;
            let offset = out.len() as u64;
            out.extend_from_slice(&encode_slot(MARKER_LIVE, body.len(), &body));

            let handle = arena.push(offset, body.len() as u32, SlotState::Live);
            indexes.insert_record(handle.index, &values);
            max_id = max_id.max(Some(id));
            report.live += 1;
            report.salvaged += salvaged as usize;
        }

        self.reset_counters(report.live as u32, max_id);
        self.header.end_offset = out.len() as u64;
        out[..TABLE_HEADER_SIZE].copy_from_slice(&self.header.to_bytes());
        out.extend_from_slice(
            &Footer {
                live_count: self.header.live_count,
            }
            .to_bytes(),
        );

        replace_file(&self.data_path, &out, self.sync)?;
        debug!("replaced {:?} with {} bytes", self.data_path, out.len());

        self.pager = Pager::open(&self.data_path, self.sync)?;
        self.arena = arena;
        self.indexes = indexes;
        self.stale = None;
        self.indexes.save(&self.index_path, self.stamp(), self.sync)?;
        self.dirty = false;

        Ok(report)
    }

    fn reset_counters(&mut self, live: u32, max_id: Option<u32>) {
        let next_id = max_id.map_or(0, |id| id.saturating_add(1));
        self.header.live_count = live;
        self.header.next_id = self.header.next_id.max(next_id);
        self.reserved_id = self.reserved_id.max(self.header.next_id);
        self.header.commit_seq = self.header.commit_seq.wrapping_add(1);
    }
}
