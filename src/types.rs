use core::fmt;
use std::sync::{Arc, RwLock};

pub type PageId = u32;
pub type FrameId = usize;
pub type TxnId = u64;
pub type TableOid = u32;
pub type IndexOid = u32;

/// Size of a disk page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// The header page is always the first page of the database file. It keeps
/// the `index name -> root page id` records for every tree in the file.
pub const HEADER_PAGE_ID: PageId = 0;

pub const INVALID_PAGE_ID: PageId = PageId::MAX;

/// Default bucket capacity of the buffer pool's page table.
pub const BUCKET_SIZE: usize = 4;

// Type alias, not a new type, cannot define methods on it
pub type Pod<T> = Arc<RwLock<T>>;

/// Identifier of a row inside a table heap.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub const INVALID: Rid = Rid {
        page_id: INVALID_PAGE_ID,
        slot: u32::MAX,
    };

    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "rid_{}_{}", self.page_id, self.slot)
    }
}

impl fmt::Debug for Rid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
