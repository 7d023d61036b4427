use std::collections::BTreeSet;

use super::{error::StoreError, layout::SLOT_OVERHEAD, Result};

/// State of a slot as known to the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Live,
    /// Deleted on disk and available for reuse
    Free,
    /// Unrecognized marker; excluded from reuse until the table is rebuilt
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub offset: u64,
    pub capacity: u32,
    pub state: SlotState,
    pub generation: u32,
}

impl Slot {
    /// Total bytes the slot occupies in the file
    pub fn span(&self) -> u64 {
        self.capacity as u64 + SLOT_OVERHEAD as u64
    }
}

/// Reference to an occupied slot.
///
/// The generation changes whenever the slot is freed, reused or remapped,
/// so a handle kept across those operations is detected as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    pub index: u32,
    pub generation: u32,
}

/// Slots of one table file in file order, with a free list ordered by capacity
#[derive(Debug, Default)]
pub struct SlotArena {
    slots: Vec<Slot>,
    free: BTreeSet<(u32, u32)>,
    next_generation: u32,
}

impl SlotArena {
    /// Creates an empty arena whose generations continue after `generation`
    pub fn starting_at(generation: u32) -> Self {
        Self {
            slots: Vec::new(),
            free: BTreeSet::new(),
            next_generation: generation,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn next_generation(&self) -> u32 {
        self.next_generation
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Slot)> {
        self.slots.iter().enumerate().map(|(i, s)| (i as u32, s))
    }

    /// Number of slots whose marker could not be recognized
    pub fn lost(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state == SlotState::Lost)
            .count()
    }

    /// Appends a slot and returns its handle
    pub fn push(&mut self, offset: u64, capacity: u32, state: SlotState) -> SlotHandle {
        let index = self.slots.len() as u32;
        let generation = self.bump();
        self.slots.push(Slot {
            offset,
            capacity,
            state,
            generation,
        });
        if state == SlotState::Free {
            self.free.insert((capacity, index));
        }

        SlotHandle { index, generation }
    }

    /// Takes the smallest free slot that holds `capacity` body bytes
    pub fn allocate(&mut self, capacity: usize) -> Option<SlotHandle> {
        let needed = u32::try_from(capacity).ok()?;
        let (cap, index) = *self.free.range((needed, 0)..).next()?;
        self.free.remove(&(cap, index));

        let generation = self.bump();
        let slot = &mut self.slots[index as usize];
        slot.state = SlotState::Live;
        slot.generation = generation;

        Some(SlotHandle { index, generation })
    }

    /// Resolves a handle, failing if its slot was freed or reused since
    pub fn resolve(&self, handle: SlotHandle) -> Result<&Slot> {
        match self.slots.get(handle.index as usize) {
            Some(slot) if slot.generation == handle.generation && slot.state == SlotState::Live => {
                Ok(slot)
            }
            _ => Err(StoreError::StaleRecord(handle.index)),
        }
    }

    /// Resolves a slot index coming from an index entry
    pub fn live(&self, index: u32) -> Result<(SlotHandle, &Slot)> {
        match self.slots.get(index as usize) {
            Some(slot) if slot.state == SlotState::Live => Ok((
                SlotHandle {
                    index,
                    generation: slot.generation,
                },
                slot,
            )),
            Some(slot) => Err(StoreError::bad_indexes(format!(
                "index entry points at slot {index} in state {:?}",
                slot.state
            ))),
            None => Err(StoreError::bad_indexes(format!(
                "index entry points at slot {index} past the last slot {}",
                self.slots.len()
            ))),
        }
    }

    /// Returns the slot to the free list
    pub fn free(&mut self, index: u32) {
        let generation = self.bump();
        if let Some(slot) = self.slots.get_mut(index as usize) {
            slot.state = SlotState::Free;
            slot.generation = generation;
            self.free.insert((slot.capacity, index));
        }
    }

    fn bump(&mut self) -> u32 {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        generation
    }
}
