//! Portable page backend using the global allocator

use core::ptr::NonNull;
use std::alloc::{alloc_zeroed, dealloc, Layout};

use descring_core::constants::PAGE_SIZE;
use descring_core::error::MemoryError;

fn page_layout() -> Result<Layout, MemoryError> {
    Layout::from_size_align(PAGE_SIZE, PAGE_SIZE).map_err(|_| MemoryError::AllocationFailed)
}

pub(super) fn alloc_page() -> Result<NonNull<u8>, MemoryError> {
    let layout = page_layout()?;
    // Safety: layout has non-zero size
    let ptr = unsafe { alloc_zeroed(layout) };
    NonNull::new(ptr).ok_or(MemoryError::AllocationFailed)
}

pub(super) fn free_page(ptr: NonNull<u8>) -> Result<(), MemoryError> {
    let layout = page_layout()?;
    // Safety: ptr came from alloc_page with the same layout
    unsafe { dealloc(ptr.as_ptr(), layout) };
    Ok(())
}
