//! Unix page backend using mmap

use core::ptr::NonNull;

use descring_core::constants::PAGE_SIZE;
use descring_core::error::MemoryError;

/// Map one private anonymous page (zero-filled by the kernel)
pub(super) fn alloc_page() -> Result<NonNull<u8>, MemoryError> {
    let base = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            PAGE_SIZE,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if base == libc::MAP_FAILED {
        return Err(MemoryError::AllocationFailed);
    }

    NonNull::new(base as *mut u8).ok_or(MemoryError::AllocationFailed)
}

/// Unmap a page returned by `alloc_page`
pub(super) fn free_page(ptr: NonNull<u8>) -> Result<(), MemoryError> {
    let ret = unsafe { libc::munmap(ptr.as_ptr() as *mut libc::c_void, PAGE_SIZE) };
    if ret != 0 {
        return Err(MemoryError::ReleaseFailed);
    }
    Ok(())
}
