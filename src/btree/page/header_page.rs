use super::{read_u32, write_u32};
use crate::types::{PageId, PAGE_SIZE};

const RECORD_COUNT_OFFSET: usize = 0;
const RECORD_START: usize = 4;
const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;

/// View of the header page (page 0): a flat table of
/// `index name -> root page id` records, so trees can be reopened after a
/// restart.
pub struct HeaderView<'a> {
    data: &'a mut [u8; PAGE_SIZE],
}

impl<'a> HeaderView<'a> {
    pub fn new(data: &'a mut [u8; PAGE_SIZE]) -> Self {
        Self { data }
    }

    pub fn capacity() -> usize {
        (PAGE_SIZE - RECORD_START) / RECORD_SIZE
    }

    pub fn record_count(&self) -> usize {
        read_u32(self.data, RECORD_COUNT_OFFSET) as usize
    }

    fn set_record_count(&mut self, count: usize) {
        write_u32(self.data, RECORD_COUNT_OFFSET, count as u32);
    }

    fn name_at(&self, index: usize) -> &[u8] {
        let off = RECORD_START + index * RECORD_SIZE;
        let raw = &self.data[off..off + NAME_SIZE];
        let end = raw.iter().position(|b| *b == 0).unwrap_or(NAME_SIZE);
        &raw[..end]
    }

    fn find(&self, name: &str) -> Option<usize> {
        (0..self.record_count()).find(|i| self.name_at(*i) == name.as_bytes())
    }

    pub fn get_root(&self, name: &str) -> Option<PageId> {
        self.find(name).map(|i| {
            read_u32(
                self.data,
                RECORD_START + i * RECORD_SIZE + NAME_SIZE,
            )
        })
    }

    /// Add a record. Fails when the name exists, is too long, or the page
    /// is full.
    pub fn insert_record(&mut self, name: &str, root: PageId) -> bool {
        if name.len() >= NAME_SIZE || name.is_empty() {
            return false;
        }
        if self.find(name).is_some() {
            return false;
        }
        let count = self.record_count();
        if count >= Self::capacity() {
            return false;
        }

        let off = RECORD_START + count * RECORD_SIZE;
        self.data[off..off + NAME_SIZE].fill(0);
        self.data[off..off + name.len()].copy_from_slice(name.as_bytes());
        write_u32(self.data, off + NAME_SIZE, root);
        self.set_record_count(count + 1);
        true
    }

    /// Overwrite an existing record's root page id.
    pub fn update_record(&mut self, name: &str, root: PageId) -> bool {
        match self.find(name) {
            Some(i) => {
                write_u32(self.data, RECORD_START + i * RECORD_SIZE + NAME_SIZE, root);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderView::new(&mut data);

        assert_eq!(header.record_count(), 0);
        assert_eq!(header.get_root("orders_pk"), None);

        assert!(header.insert_record("orders_pk", 7));
        assert!(header.insert_record("users_pk", 12));
        assert!(!header.insert_record("orders_pk", 9));

        assert_eq!(header.get_root("orders_pk"), Some(7));
        assert_eq!(header.get_root("users_pk"), Some(12));

        assert!(header.update_record("orders_pk", 21));
        assert_eq!(header.get_root("orders_pk"), Some(21));
        assert!(!header.update_record("missing", 1));
    }
}
