use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::common::types::{Lsn, Page, PageId, INVALID_LSN, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::table::Tuple;

// Header layout (little-endian):
//   0..8   lsn (i64)
//   8..12  prev_page_id (i32)
//   12..16 next_page_id (i32)
//   16..20 free_space_offset (u32, next tuple write position)
//   20..24 free_space_size (u32)
//   24..28 tuple_count (u32, slots in the slot array including empty ones)
// Slot entries of (offset u32, size u32) grow backward from the page end;
// tuple bytes grow forward from the header. The high bit of a slot's size
// word is the delete mark; offset == 0 && size == 0 is an empty slot.
pub const TABLE_PAGE_HEADER_SIZE: usize = 28;
pub const SLOT_SIZE: usize = 8;

const DELETE_MASK: u32 = 0x8000_0000;

#[derive(Error, Debug)]
pub enum TablePageError {
    #[error("Not enough free space in page")]
    InsufficientSpace,

    #[error("Invalid slot number: {0}")]
    InvalidSlot(u32),

    #[error("No tuple at slot {0}")]
    TupleNotFound(u32),

    #[error("Slot {0} is already occupied")]
    SlotOccupied(u32),
}

pub type Result<T> = std::result::Result<T, TablePageError>;

/// Typed view over a tuple-bearing page. Stateless: every method reads or
/// rewrites the header and slot array in place, like the rest of the page
/// codecs in this crate.
pub struct TablePage;

impl TablePage {
    /// Initialize a zeroed page as an empty table page linked after
    /// `prev_page_id`
    pub fn init(page: &mut Page, prev_page_id: PageId) {
        page.data.fill(0);
        LittleEndian::write_i64(&mut page.data[0..8], INVALID_LSN);
        LittleEndian::write_i32(&mut page.data[8..12], prev_page_id);
        LittleEndian::write_i32(&mut page.data[12..16], INVALID_PAGE_ID);
        LittleEndian::write_u32(&mut page.data[16..20], TABLE_PAGE_HEADER_SIZE as u32);
        LittleEndian::write_u32(
            &mut page.data[20..24],
            (PAGE_SIZE - TABLE_PAGE_HEADER_SIZE) as u32,
        );
        LittleEndian::write_u32(&mut page.data[24..28], 0);
        page.lsn = INVALID_LSN;
    }

    /// A zeroed page has a free-space offset of 0; any initialized table
    /// page points it past the header. Recovery uses this to recognize pages
    /// fetched from past the end of the database file.
    pub fn is_initialized(page: &Page) -> bool {
        LittleEndian::read_u32(&page.data[16..20]) >= TABLE_PAGE_HEADER_SIZE as u32
    }

    pub fn get_lsn(page: &Page) -> Lsn {
        LittleEndian::read_i64(&page.data[0..8])
    }

    /// Stamp the page LSN both on disk and in the in-memory metadata the
    /// buffer pool consults for write-ahead ordering
    pub fn set_lsn(page: &mut Page, lsn: Lsn) {
        LittleEndian::write_i64(&mut page.data[0..8], lsn);
        page.lsn = lsn;
    }

    pub fn get_prev_page_id(page: &Page) -> PageId {
        LittleEndian::read_i32(&page.data[8..12])
    }

    pub fn set_prev_page_id(page: &mut Page, prev: PageId) {
        LittleEndian::write_i32(&mut page.data[8..12], prev);
    }

    pub fn get_next_page_id(page: &Page) -> PageId {
        LittleEndian::read_i32(&page.data[12..16])
    }

    pub fn set_next_page_id(page: &mut Page, next: PageId) {
        LittleEndian::write_i32(&mut page.data[12..16], next);
    }

    pub fn tuple_count(page: &Page) -> u32 {
        LittleEndian::read_u32(&page.data[24..28])
    }

    pub fn free_space(page: &Page) -> u32 {
        LittleEndian::read_u32(&page.data[20..24])
    }

    /// Insert a tuple into the first empty slot, or a fresh one. Returns the
    /// slot number.
    pub fn insert_tuple(page: &mut Page, tuple: &Tuple) -> Result<u32> {
        let count = Self::tuple_count(page);
        for slot in 0..count {
            let (offset, size) = Self::read_slot(page, slot);
            if offset == 0 && size == 0 {
                Self::place_tuple(page, slot, tuple, false)?;
                return Ok(slot);
            }
        }
        Self::place_tuple(page, count, tuple, true)?;
        Ok(count)
    }

    /// Place a tuple at an exact slot, extending the slot array with empty
    /// slots if needed. Used by recovery to restore a tuple to its RID.
    pub fn insert_tuple_at(page: &mut Page, slot: u32, tuple: &Tuple) -> Result<()> {
        let count = Self::tuple_count(page);
        if slot < count {
            let (offset, size) = Self::read_slot(page, slot);
            if offset != 0 || size != 0 {
                return Err(TablePageError::SlotOccupied(slot));
            }
            return Self::place_tuple(page, slot, tuple, false);
        }

        // grow the slot array up to and including `slot`
        let new_slots = slot - count + 1;
        let slot_space = new_slots as usize * SLOT_SIZE;
        if (Self::free_space(page) as usize) < slot_space {
            return Err(TablePageError::InsufficientSpace);
        }
        for s in count..=slot {
            Self::write_slot(page, s, 0, 0);
        }
        Self::set_tuple_count(page, slot + 1);
        Self::set_free_space(page, Self::free_space(page) - slot_space as u32);
        Self::place_tuple(page, slot, tuple, false)
    }

    /// Read the tuple at `slot`; None for empty or delete-marked slots
    pub fn get_tuple(page: &Page, slot: u32) -> Option<Tuple> {
        if slot >= Self::tuple_count(page) {
            return None;
        }
        let (offset, size) = Self::read_slot(page, slot);
        if (offset == 0 && size == 0) || size & DELETE_MASK != 0 {
            return None;
        }
        let start = offset as usize;
        let len = (size & !DELETE_MASK) as usize;
        Some(Tuple::new(page.data[start..start + len].to_vec()))
    }

    /// Overwrite the tuple at `slot`, returning the old contents
    pub fn update_tuple(page: &mut Page, slot: u32, tuple: &Tuple) -> Result<Tuple> {
        if slot >= Self::tuple_count(page) {
            return Err(TablePageError::InvalidSlot(slot));
        }
        let (offset, size) = Self::read_slot(page, slot);
        if offset == 0 && size == 0 {
            return Err(TablePageError::TupleNotFound(slot));
        }
        let old_len = (size & !DELETE_MASK) as usize;
        let old = Tuple::new(page.data[offset as usize..offset as usize + old_len].to_vec());
        let mark = size & DELETE_MASK;

        let new_len = tuple.len();
        if new_len <= old_len {
            let start = offset as usize;
            page.data[start..start + new_len].copy_from_slice(tuple.data());
            Self::write_slot(page, slot, offset, new_len as u32 | mark);
        } else {
            // relocate to the end of the data area; the old bytes are
            // stranded, so the whole new length must fit in the gap
            if (Self::free_space(page) as usize) < new_len {
                return Err(TablePageError::InsufficientSpace);
            }
            let new_offset = Self::free_space_offset(page);
            let start = new_offset as usize;
            page.data[start..start + new_len].copy_from_slice(tuple.data());
            Self::write_slot(page, slot, new_offset, new_len as u32 | mark);
            Self::set_free_space_offset(page, new_offset + new_len as u32);
            Self::set_free_space(page, Self::free_space(page) - new_len as u32);
        }
        Ok(old)
    }

    /// Set the delete mark on a tuple without removing it
    pub fn mark_delete(page: &mut Page, slot: u32) -> Result<()> {
        let (offset, size) = Self::occupied_slot(page, slot)?;
        Self::write_slot(page, slot, offset, size | DELETE_MASK);
        Ok(())
    }

    /// Clear the delete mark
    pub fn rollback_delete(page: &mut Page, slot: u32) -> Result<()> {
        let (offset, size) = Self::occupied_slot(page, slot)?;
        Self::write_slot(page, slot, offset, size & !DELETE_MASK);
        Ok(())
    }

    /// Physically remove the tuple at `slot`, returning its contents. The
    /// freed bytes are not reclaimed. Removing an already-empty slot is a
    /// no-op so a re-run of recovery undo stays harmless.
    pub fn apply_delete(page: &mut Page, slot: u32) -> Result<Option<Tuple>> {
        if slot >= Self::tuple_count(page) {
            return Err(TablePageError::InvalidSlot(slot));
        }
        let (offset, size) = Self::read_slot(page, slot);
        if offset == 0 && size == 0 {
            return Ok(None);
        }
        let len = (size & !DELETE_MASK) as usize;
        let old = Tuple::new(page.data[offset as usize..offset as usize + len].to_vec());
        Self::write_slot(page, slot, 0, 0);
        Ok(Some(old))
    }

    fn place_tuple(page: &mut Page, slot: u32, tuple: &Tuple, new_slot: bool) -> Result<()> {
        let needed = tuple.len() + if new_slot { SLOT_SIZE } else { 0 };
        if (Self::free_space(page) as usize) < needed {
            return Err(TablePageError::InsufficientSpace);
        }

        let offset = Self::free_space_offset(page);
        let start = offset as usize;
        page.data[start..start + tuple.len()].copy_from_slice(tuple.data());

        if new_slot {
            Self::set_tuple_count(page, slot + 1);
        }
        Self::write_slot(page, slot, offset, tuple.len() as u32);
        Self::set_free_space_offset(page, offset + tuple.len() as u32);
        Self::set_free_space(page, Self::free_space(page) - needed as u32);
        Ok(())
    }

    fn occupied_slot(page: &Page, slot: u32) -> Result<(u32, u32)> {
        if slot >= Self::tuple_count(page) {
            return Err(TablePageError::InvalidSlot(slot));
        }
        let (offset, size) = Self::read_slot(page, slot);
        if offset == 0 && size == 0 {
            return Err(TablePageError::TupleNotFound(slot));
        }
        Ok((offset, size))
    }

    fn slot_position(slot: u32) -> usize {
        PAGE_SIZE - SLOT_SIZE * (slot as usize + 1)
    }

    fn read_slot(page: &Page, slot: u32) -> (u32, u32) {
        let pos = Self::slot_position(slot);
        (
            LittleEndian::read_u32(&page.data[pos..pos + 4]),
            LittleEndian::read_u32(&page.data[pos + 4..pos + 8]),
        )
    }

    fn write_slot(page: &mut Page, slot: u32, offset: u32, size: u32) {
        let pos = Self::slot_position(slot);
        LittleEndian::write_u32(&mut page.data[pos..pos + 4], offset);
        LittleEndian::write_u32(&mut page.data[pos + 4..pos + 8], size);
    }

    fn free_space_offset(page: &Page) -> u32 {
        LittleEndian::read_u32(&page.data[16..20])
    }

    fn set_free_space_offset(page: &mut Page, offset: u32) {
        LittleEndian::write_u32(&mut page.data[16..20], offset);
    }

    fn set_free_space(page: &mut Page, size: u32) {
        LittleEndian::write_u32(&mut page.data[20..24], size);
    }

    fn set_tuple_count(page: &mut Page, count: u32) {
        LittleEndian::write_u32(&mut page.data[24..28], count);
    }
}
