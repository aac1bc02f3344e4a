use anyhow::Result;

use granitedb::common::types::{INVALID_PAGE_ID, PAGE_SIZE};
use granitedb::storage::buffer::BufferPoolError;

mod common;
use common::create_test_buffer_pool;

#[test]
fn test_new_page() -> Result<()> {
    let (buffer_pool, _dir) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;
    assert!(page_id > 0, "page 0 is reserved for the header directory");
    {
        let page_guard = page.read();
        assert_eq!(page_guard.page_id, page_id);
        assert!(page_guard.data.iter().all(|&b| b == 0));
    }

    buffer_pool.unpin_page(page_id, false)?;
    Ok(())
}

#[test]
fn test_write_survives_eviction() -> Result<()> {
    let (buffer_pool, _dir) = create_test_buffer_pool(3)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        page_guard.data[0] = 0xAB;
        page_guard.data[PAGE_SIZE - 1] = 0xCD;
    }
    buffer_pool.unpin_page(page_id, true)?;

    // churn enough pages through the tiny pool to evict the first one
    for _ in 0..6 {
        let (_, pid) = buffer_pool.new_page()?;
        buffer_pool.unpin_page(pid, false)?;
    }

    let fetched = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched.read();
        assert_eq!(page_guard.data[0], 0xAB);
        assert_eq!(page_guard.data[PAGE_SIZE - 1], 0xCD);
    }
    buffer_pool.unpin_page(page_id, false)?;
    Ok(())
}

#[test]
fn test_all_pinned_exhausts_pool() -> Result<()> {
    let (buffer_pool, _dir) = create_test_buffer_pool(4)?;

    let mut pinned = Vec::new();
    for _ in 0..4 {
        let (_, page_id) = buffer_pool.new_page()?;
        pinned.push(page_id);
    }

    // every frame is pinned: no frame can be obtained
    assert!(matches!(
        buffer_pool.new_page(),
        Err(BufferPoolError::BufferPoolFull)
    ));
    assert!(matches!(
        buffer_pool.fetch_page(999),
        Err(BufferPoolError::BufferPoolFull)
    ));

    // releasing one pin makes a frame available again
    buffer_pool.unpin_page(pinned[0], false)?;
    let (_, page_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(page_id, false)?;
    Ok(())
}

#[test]
fn test_fetch_pins_one_frame_per_page() -> Result<()> {
    let (buffer_pool, _dir) = create_test_buffer_pool(4)?;

    let (_, page_id) = buffer_pool.new_page()?;
    // fetch the same page again: same frame, pin count 2
    let first = buffer_pool.fetch_page(page_id)?;
    let second = buffer_pool.fetch_page(page_id)?;
    assert!(std::sync::Arc::ptr_eq(&first, &second));

    buffer_pool.unpin_page(page_id, false)?;
    buffer_pool.unpin_page(page_id, false)?;
    buffer_pool.unpin_page(page_id, false)?;
    Ok(())
}

#[test]
fn test_pinned_page_is_not_evicted() -> Result<()> {
    let (buffer_pool, _dir) = create_test_buffer_pool(2)?;

    let (page, pinned_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        page_guard.data[7] = 77;
    }

    // only the other frame can be recycled
    for _ in 0..4 {
        let (_, page_id) = buffer_pool.new_page()?;
        buffer_pool.unpin_page(page_id, false)?;
    }

    // still resident and intact
    let again = buffer_pool.fetch_page(pinned_id)?;
    assert_eq!(again.read().data[7], 77);
    buffer_pool.unpin_page(pinned_id, false)?;
    buffer_pool.unpin_page(pinned_id, true)?;
    Ok(())
}

#[test]
fn test_flush_page() -> Result<()> {
    let (buffer_pool, _dir) = create_test_buffer_pool(4)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        page_guard.data[10] = 42;
    }
    buffer_pool.unpin_page(page_id, true)?;

    assert!(buffer_pool.flush_page(page_id)?);
    // absent pages report false rather than an error
    assert!(!buffer_pool.flush_page(12345)?);
    Ok(())
}

#[test]
fn test_delete_page() -> Result<()> {
    let (buffer_pool, _dir) = create_test_buffer_pool(4)?;

    let (_, page_id) = buffer_pool.new_page()?;

    // pinned pages cannot be deleted
    assert!(matches!(
        buffer_pool.delete_page(page_id),
        Err(BufferPoolError::PagePinned(_))
    ));

    buffer_pool.unpin_page(page_id, false)?;
    buffer_pool.delete_page(page_id)?;

    // the id goes back to the disk manager's free list
    let (_, reused) = buffer_pool.new_page()?;
    assert_eq!(reused, page_id);
    buffer_pool.unpin_page(reused, false)?;
    Ok(())
}

#[test]
fn test_invalid_page_operations() -> Result<()> {
    let (buffer_pool, _dir) = create_test_buffer_pool(4)?;
    assert!(buffer_pool.fetch_page(INVALID_PAGE_ID).is_err());
    assert!(buffer_pool.unpin_page(999, false).is_err());
    Ok(())
}
