//! Dense path -> location index with copy-on-write pages.
//!
//! The index is a flat array keyed by tree path, chunked into fixed-size
//! pages that sit behind `Arc`. Cloning the index clones page pointers
//! only, so taking a generation copy is O(pages); the first write a copy
//! makes to a page materializes a private page via `Arc::make_mut`.

use std::sync::Arc;

use crate::datafile::DataLocation;

pub const PAGE_SIZE: usize = 4096;

/// Slot value meaning "no flushed record for this path".
const EMPTY: u64 = u64::MAX;

#[derive(Debug, Clone, Default)]
pub struct PathIndex {
    pages: Vec<Arc<Vec<u64>>>,
}

impl PathIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: u64) -> Option<DataLocation> {
        let page = (path / PAGE_SIZE as u64) as usize;
        let slot = (path % PAGE_SIZE as u64) as usize;
        match self.pages.get(page) {
            Some(p) if p[slot] != EMPTY => Some(DataLocation::from_u64(p[slot])),
            _ => None,
        }
    }

    pub fn set(&mut self, path: u64, location: DataLocation) {
        let page = (path / PAGE_SIZE as u64) as usize;
        let slot = (path % PAGE_SIZE as u64) as usize;
        while self.pages.len() <= page {
            self.pages.push(Arc::new(vec![EMPTY; PAGE_SIZE]));
        }
        Arc::make_mut(&mut self.pages[page])[slot] = location.as_u64();
    }

    pub fn clear(&mut self, path: u64) {
        let page = (path / PAGE_SIZE as u64) as usize;
        let slot = (path % PAGE_SIZE as u64) as usize;
        if let Some(p) = self.pages.get_mut(page) {
            if p[slot] != EMPTY {
                Arc::make_mut(p)[slot] = EMPTY;
            }
        }
    }

    /// Iterates over `(path, location)` for every occupied slot.
    pub fn iter(&self) -> impl Iterator<Item = (u64, DataLocation)> + '_ {
        self.pages.iter().enumerate().flat_map(|(page_no, page)| {
            page.iter().enumerate().filter_map(move |(slot, &raw)| {
                if raw == EMPTY {
                    None
                } else {
                    let path = page_no as u64 * PAGE_SIZE as u64 + slot as u64;
                    Some((path, DataLocation::from_u64(raw)))
                }
            })
        })
    }
}
