use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PAGE_SIZE};

// Directory of (index_name -> root_page_id) records, persisted at
// HEADER_PAGE_ID. Layout: record_count (u32) then fixed 36-byte records of a
// zero-padded 32-byte name followed by the root page id (i32).
const COUNT_SIZE: usize = 4;
const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;
const MAX_RECORDS: usize = (PAGE_SIZE - COUNT_SIZE) / RECORD_SIZE;

/// Typed view over the header directory page
pub struct HeaderPage;

impl HeaderPage {
    pub fn init(page: &mut Page) {
        page.data.fill(0);
        LittleEndian::write_u32(&mut page.data[0..COUNT_SIZE], 0);
    }

    pub fn record_count(page: &Page) -> usize {
        LittleEndian::read_u32(&page.data[0..COUNT_SIZE]) as usize
    }

    /// Register a new index name. Returns false when the name already
    /// exists, is too long, or the directory is full.
    pub fn insert_record(page: &mut Page, name: &str, root_page_id: PageId) -> bool {
        if name.len() > NAME_SIZE || Self::find_record(page, name).is_some() {
            return false;
        }
        let count = Self::record_count(page);
        if count >= MAX_RECORDS {
            return false;
        }
        Self::write_record(page, count, name, root_page_id);
        LittleEndian::write_u32(&mut page.data[0..COUNT_SIZE], (count + 1) as u32);
        true
    }

    /// Update the root page id of an existing record; false if absent
    pub fn update_record(page: &mut Page, name: &str, root_page_id: PageId) -> bool {
        match Self::find_record(page, name) {
            Some(index) => {
                let offset = Self::record_offset(index);
                LittleEndian::write_i32(
                    &mut page.data[offset + NAME_SIZE..offset + RECORD_SIZE],
                    root_page_id,
                );
                true
            }
            None => false,
        }
    }

    /// Remove a record, compacting the tail over it; false if absent
    pub fn delete_record(page: &mut Page, name: &str) -> bool {
        let Some(index) = Self::find_record(page, name) else {
            return false;
        };
        let count = Self::record_count(page);
        for i in index + 1..count {
            let src = Self::record_offset(i);
            let dst = Self::record_offset(i - 1);
            let record: [u8; RECORD_SIZE] = page.data[src..src + RECORD_SIZE].try_into().unwrap();
            page.data[dst..dst + RECORD_SIZE].copy_from_slice(&record);
        }
        let last = Self::record_offset(count - 1);
        page.data[last..last + RECORD_SIZE].fill(0);
        LittleEndian::write_u32(&mut page.data[0..COUNT_SIZE], (count - 1) as u32);
        true
    }

    /// Look up the root page id registered under `name`
    pub fn get_root_id(page: &Page, name: &str) -> Option<PageId> {
        let index = Self::find_record(page, name)?;
        let offset = Self::record_offset(index);
        Some(LittleEndian::read_i32(
            &page.data[offset + NAME_SIZE..offset + RECORD_SIZE],
        ))
    }

    fn find_record(page: &Page, name: &str) -> Option<usize> {
        let count = Self::record_count(page);
        (0..count).find(|&i| Self::record_name(page, i) == name)
    }

    fn record_name(page: &Page, index: usize) -> &str {
        let offset = Self::record_offset(index);
        let raw = &page.data[offset..offset + NAME_SIZE];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
        std::str::from_utf8(&raw[..end]).unwrap_or("")
    }

    fn write_record(page: &mut Page, index: usize, name: &str, root_page_id: PageId) {
        let offset = Self::record_offset(index);
        page.data[offset..offset + NAME_SIZE].fill(0);
        page.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        LittleEndian::write_i32(
            &mut page.data[offset + NAME_SIZE..offset + RECORD_SIZE],
            root_page_id,
        );
    }

    fn record_offset(index: usize) -> usize {
        COUNT_SIZE + index * RECORD_SIZE
    }
}
