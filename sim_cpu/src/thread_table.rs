//! Chunked thread table
//!
//! Maps thread indices to logical thread slots. The table grows by whole
//! chunks and never moves or shrinks existing chunks, so a `ThreadId`
//! stays valid for the whole life of its emulator.

use crate::config::ThreadTableConfig;
use crate::error::fatal;
use core_types::{ThreadId, ThreadState};
use std::thread::JoinHandle;

/// One logical thread slot
#[derive(Debug, Default)]
pub(crate) struct ThreadSlot {
    pub(crate) state: ThreadState,
    /// True while this thread is the one executing embedded code
    pub(crate) running: bool,
    /// Creation counter value, never reused
    pub(crate) debug_id: u64,
    pub(crate) name: Option<String>,
    pub(crate) handle: Option<JoinHandle<()>>,
}

/// Growable table of logical thread slots
#[derive(Debug)]
pub(crate) struct ThreadTable {
    chunks: Vec<Box<[ThreadSlot]>>,
    chunk_size: usize,
    reuse_aborted: bool,
    created: u64,
    /// Handles of exited threads whose slot was handed out again
    retired: Vec<JoinHandle<()>>,
}

impl ThreadTable {
    /// Creates a table with one empty chunk
    pub(crate) fn new(config: &ThreadTableConfig) -> Self {
        let mut table = Self {
            chunks: Vec::new(),
            chunk_size: config.chunk_size.max(1),
            reuse_aborted: config.reuse_aborted,
            created: 0,
            retired: Vec::new(),
        };
        table.grow();
        table
    }

    fn grow(&mut self) {
        let chunk: Vec<ThreadSlot> = (0..self.chunk_size).map(|_| ThreadSlot::default()).collect();
        self.chunks.push(chunk.into_boxed_slice());
    }

    fn is_free(&self, slot: &ThreadSlot) -> bool {
        slot.state == ThreadState::Unused
            || (self.reuse_aborted && slot.state == ThreadState::Aborted)
    }

    /// Allocates a slot for a new thread and marks it `Runnable`
    ///
    /// Returns the first free slot, or the first slot of a new chunk when
    /// the table is full.
    pub(crate) fn allocate(&mut self) -> ThreadId {
        let free = self
            .chunks
            .iter()
            .flat_map(|chunk| chunk.iter())
            .position(|slot| self.is_free(slot));

        let index = match free {
            Some(index) => index,
            None => {
                let index = self.capacity();
                self.grow();
                index
            }
        };

        let id = ThreadId::new(index);
        let debug_id = self.created;
        self.created += 1;

        let slot = self.get_mut(id);
        let previous = slot.handle.take();
        slot.state = ThreadState::Runnable;
        slot.running = false;
        slot.debug_id = debug_id;
        slot.name = None;

        if let Some(handle) = previous {
            self.retired.push(handle);
        }
        id
    }

    fn locate(&self, id: ThreadId) -> (usize, usize) {
        let index = id.index();
        if index >= self.capacity() {
            fatal!(
                "attempted out of bound thread index {} (table size {})",
                index,
                self.capacity()
            );
        }
        (index / self.chunk_size, index % self.chunk_size)
    }

    /// Returns a slot; an index never handed out is fatal
    pub(crate) fn get(&self, id: ThreadId) -> &ThreadSlot {
        let (chunk, offset) = self.locate(id);
        &self.chunks[chunk][offset]
    }

    /// Returns a slot mutably; an index never handed out is fatal
    pub(crate) fn get_mut(&mut self, id: ThreadId) -> &mut ThreadSlot {
        let (chunk, offset) = self.locate(id);
        &mut self.chunks[chunk][offset]
    }

    /// Total number of slots
    pub(crate) fn capacity(&self) -> usize {
        self.chunks.len() * self.chunk_size
    }

    /// Number of threads ever created
    pub(crate) fn created(&self) -> u64 {
        self.created
    }

    /// Iterates over every slot with its id
    pub(crate) fn iter(&self) -> impl Iterator<Item = (ThreadId, &ThreadSlot)> {
        self.chunks
            .iter()
            .flat_map(|chunk| chunk.iter())
            .enumerate()
            .map(|(index, slot)| (ThreadId::new(index), slot))
    }

    /// Takes every OS thread handle out of the table
    pub(crate) fn take_handles(&mut self) -> Vec<JoinHandle<()>> {
        let mut handles: Vec<JoinHandle<()>> = self.retired.drain(..).collect();
        for chunk in &mut self.chunks {
            handles.extend(chunk.iter_mut().filter_map(|slot| slot.handle.take()));
        }
        handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk_size: usize, reuse_aborted: bool) -> ThreadTableConfig {
        ThreadTableConfig {
            chunk_size,
            reuse_aborted,
        }
    }

    #[test]
    fn test_sequential_allocation() {
        let mut table = ThreadTable::new(&config(4, false));
        let ids: Vec<usize> = (0..3).map(|_| table.allocate().index()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(table.get(ThreadId::new(1)).state, ThreadState::Runnable);
        assert_eq!(table.get(ThreadId::new(3)).state, ThreadState::Unused);
    }

    #[test]
    fn test_grows_by_whole_chunks() {
        let mut table = ThreadTable::new(&config(2, false));
        assert_eq!(table.capacity(), 2);
        table.allocate();
        table.allocate();
        let third = table.allocate();
        assert_eq!(third.index(), 2);
        assert_eq!(table.capacity(), 4);
    }

    #[test]
    fn test_ids_stay_valid_across_growth() {
        let mut table = ThreadTable::new(&config(2, false));
        let first = table.allocate();
        table.get_mut(first).name = Some("first".into());
        for _ in 0..10 {
            table.allocate();
        }
        assert_eq!(table.get(first).name.as_deref(), Some("first"));
        assert_eq!(table.get(first).debug_id, 0);
    }

    #[test]
    fn test_aborted_slots_not_reused_by_default() {
        let mut table = ThreadTable::new(&config(4, false));
        let first = table.allocate();
        table.get_mut(first).state = ThreadState::Aborted;
        let second = table.allocate();
        assert_ne!(first, second);
        assert_eq!(table.get(first).state, ThreadState::Aborted);
    }

    #[test]
    fn test_aborted_slots_reused_when_enabled() {
        let mut table = ThreadTable::new(&config(4, true));
        let first = table.allocate();
        table.get_mut(first).state = ThreadState::Aborted;
        let second = table.allocate();
        assert_eq!(first, second);
        assert_eq!(table.get(second).state, ThreadState::Runnable);
        // The debug id still tells the two apart
        assert_eq!(table.get(second).debug_id, 1);
    }

    #[test]
    fn test_failed_slots_never_reused() {
        let mut table = ThreadTable::new(&config(4, true));
        let first = table.allocate();
        table.get_mut(first).state = ThreadState::Failed;
        assert_ne!(table.allocate(), first);
    }

    #[test]
    fn test_created_counter() {
        let mut table = ThreadTable::new(&config(4, false));
        assert_eq!(table.created(), 0);
        table.allocate();
        table.allocate();
        assert_eq!(table.created(), 2);
    }

    #[test]
    #[should_panic(expected = "out of bound thread index")]
    fn test_out_of_range_is_fatal() {
        let table = ThreadTable::new(&config(4, false));
        table.get(ThreadId::new(4));
    }

    #[test]
    fn test_iter_covers_every_slot() {
        let table = ThreadTable::new(&config(3, false));
        let ids: Vec<usize> = table.iter().map(|(id, _)| id.index()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }
}
