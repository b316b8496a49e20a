//! Generational slot arena backing the per-call state machines.
//!
//! Every in-flight call lives in one slot. The slot index and its generation
//! form the [`Tag`] that travels through the completion queue, so resolving a
//! ready event back to its state machine is an index lookup. Releasing a slot
//! bumps its generation and pushes it on a free list: a tag that outlives its
//! call resolves to nothing instead of to whichever call reuses the slot.

use core::fmt;

/// Opaque token correlating a completion-queue event with the call awaiting
/// it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag {
    index: u32,
    generation: u32,
}

impl Tag {
    /// Slot index within the owning arena.
    #[cfg(test)]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot when the tag was issued.
    #[cfg(test)]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({}v{})", self.index, self.generation)
    }
}

enum Slot<T> {
    Vacant { next_free: Option<u32> },
    Occupied(T),
    CheckedOut,
}

struct Entry<T> {
    generation: u32,
    slot: Slot<T>,
}

/// Slab of call slots with a free list and per-slot generations.
///
/// A value is either stored in its slot or checked out by the dispatch loop
/// for the duration of one advance. A checked-out slot stays reserved: it is
/// neither reused nor resolvable until it is checked back in or released.
pub struct CallArena<T> {
    entries: Vec<Entry<T>>,
    free_head: Option<u32>,
    live: usize,
}

impl<T> Default for CallArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CallArena<T> {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_head: None,
            live: 0,
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free_head: None,
            live: 0,
        }
    }

    /// Number of live values, stored or checked out.
    pub const fn len(&self) -> usize {
        self.live
    }

    pub const fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Stores `value` in a free slot and returns its tag.
    ///
    /// # Panics
    ///
    /// Panics if more than `u32::MAX` slots would be allocated.
    pub fn insert(&mut self, value: T) -> Tag {
        self.live += 1;
        if let Some(index) = self.free_head {
            let entry = &mut self.entries[index as usize];
            let Slot::Vacant { next_free } = entry.slot else {
                unreachable!("free list points at an occupied slot");
            };
            self.free_head = next_free;
            entry.slot = Slot::Occupied(value);
            return Tag {
                index,
                generation: entry.generation,
            };
        }

        let index = u32::try_from(self.entries.len()).expect("call arena exhausted");
        self.entries.push(Entry {
            generation: 0,
            slot: Slot::Occupied(value),
        });
        Tag {
            index,
            generation: 0,
        }
    }

    /// Returns `true` if `tag` refers to a live value.
    #[cfg(test)]
    pub fn contains(&self, tag: Tag) -> bool {
        self.entry(tag)
            .is_some_and(|entry| !matches!(entry.slot, Slot::Vacant { .. }))
    }

    /// Takes the value out of its slot, leaving the slot reserved.
    ///
    /// Returns `None` for stale tags and for values that are already checked
    /// out.
    pub fn checkout(&mut self, tag: Tag) -> Option<T> {
        let entry = self.entry_mut(tag)?;
        match core::mem::replace(&mut entry.slot, Slot::CheckedOut) {
            Slot::Occupied(value) => Some(value),
            other => {
                entry.slot = other;
                None
            }
        }
    }

    /// Puts a checked-out value back under the same tag.
    ///
    /// Returns the value back if `tag` does not refer to a checked-out slot.
    pub fn checkin(&mut self, tag: Tag, value: T) -> Result<(), T> {
        match self.entry_mut(tag) {
            Some(entry) if matches!(entry.slot, Slot::CheckedOut) => {
                entry.slot = Slot::Occupied(value);
                Ok(())
            }
            _ => Err(value),
        }
    }

    /// Frees the slot behind `tag`, dropping any stored value.
    ///
    /// The slot's generation is bumped so `tag` never resolves again. Returns
    /// `false` if the tag was already stale.
    pub fn release(&mut self, tag: Tag) -> bool {
        let free_head = self.free_head;
        let Some(entry) = self.entry_mut(tag) else {
            return false;
        };
        if matches!(entry.slot, Slot::Vacant { .. }) {
            return false;
        }
        entry.slot = Slot::Vacant {
            next_free: free_head,
        };
        entry.generation = entry.generation.wrapping_add(1);
        self.free_head = Some(tag.index);
        self.live -= 1;
        true
    }

    #[cfg(test)]
    fn entry(&self, tag: Tag) -> Option<&Entry<T>> {
        self.entries
            .get(tag.index as usize)
            .filter(|entry| entry.generation == tag.generation)
    }

    fn entry_mut(&mut self, tag: Tag) -> Option<&mut Entry<T>> {
        self.entries
            .get_mut(tag.index as usize)
            .filter(|entry| entry.generation == tag.generation)
    }
}
