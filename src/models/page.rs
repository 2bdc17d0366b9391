//! Response containers: single items, collections and pages.

use serde::{Deserialize, Serialize};

/// Item container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item<T> {
    pub data: T,
}

/// Collection container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection<T> {
    pub data: Vec<T>,
}

/// Meta information on current page and collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// Current page offset
    pub offset: u64,
    /// Total number of items in the collection
    pub total_items: u64,
    /// Total number of pages in the collection
    pub total_pages: u64,
    /// Current page number. Starts at 1.
    pub page_number: u64,
}

impl Meta {
    /// Compute page metadata. `limit` must be at least 1.
    pub fn new(offset: u64, limit: u64, total_items: u64) -> Self {
        let limit = limit.max(1);
        Self {
            offset,
            total_items,
            total_pages: total_items.div_ceil(limit),
            page_number: offset / limit + 1,
        }
    }
}

/// A page of the collection with info on current page and total items in meta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub meta: Meta,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, meta: Meta) -> Self {
        Self { data, meta }
    }

    pub fn has_next(&self) -> bool {
        self.meta.page_number < self.meta.total_pages
    }

    /// Map the rows of this page, keeping its metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            data: self.data.into_iter().map(f).collect(),
            meta: self.meta,
        }
    }
}
