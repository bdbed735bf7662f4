use std::{
    fs::{File, OpenOptions},
    io::{prelude::*, Seek, SeekFrom},
    path::Path,
    sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    },
};

use log::debug;

use crate::{
    error::Result,
    types::{PageId, PAGE_SIZE},
};

/// File-backed block device. One page-sized slot per page id, page 0
/// included (it belongs to the header page).
pub struct DiskManager {
    file: Mutex<File>,
    next_page_id: AtomicU32,
}

impl DiskManager {
    pub fn new(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        // Page 0 is reserved for the header page, so allocation starts at 1
        // even on a fresh file.
        let len = file.metadata()?.len() as usize;
        let pages = (len + PAGE_SIZE - 1) / PAGE_SIZE;
        let next_page_id = pages.max(1) as PageId;

        Ok(Self {
            file: Mutex::new(file),
            next_page_id: AtomicU32::new(next_page_id),
        })
    }

    /// Read a page into `buf`. Reading a page that was never written yields
    /// a zeroed buffer.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        assert_eq!(buf.len(), PAGE_SIZE);

        let mut file = self.file.lock().unwrap();
        let start_pos = page_id as u64 * PAGE_SIZE as u64;
        let len = file.metadata()?.len();

        if start_pos + PAGE_SIZE as u64 > len {
            debug!("read of unwritten page {}, zero-filling", page_id);
            buf.fill(0);
            return Ok(());
        }

        file.seek(SeekFrom::Start(start_pos))?;
        file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<()> {
        assert_eq!(buf.len(), PAGE_SIZE);

        let mut file = self.file.lock().unwrap();
        let start_pos = page_id as u64 * PAGE_SIZE as u64;
        file.seek(SeekFrom::Start(start_pos))?;
        file.write_all(buf)?;
        file.flush()?;

        debug!("wrote page {} to disk", page_id);
        Ok(())
    }

    /// Hand out the next page id. Ids increase monotonically and are never
    /// reused within a process.
    pub fn allocate_page(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn deallocate_page(&self, page_id: PageId) {
        // The on-disk slot is left in place; the id simply goes out of use.
        debug!("deallocated page {}", page_id);
    }
}
