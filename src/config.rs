//! The reinit-free global entry point (spec §6, "automatic-initialization
//! mode"), gated behind the `static-buffer` feature.
//!
//! Embeds a fixed, page-aligned buffer and lazily mounts it as a
//! [`PageAllocator`] on first use, so a caller who only ever wants one
//! process-wide arena never has to find or allocate the backing buffer
//! themselves.

use crate::hint::Hint;
use crate::page::PageAllocator;
use core::ptr::NonNull;
use std::sync::{Mutex, OnceLock};

/// Size of the embedded static buffer. Comfortably inside the
/// `[128 KiB, 4 GiB]` legal window.
pub const STATIC_BUFFER_SIZE: usize = 640 * 1024;

#[repr(align(4096))]
struct AlignedBuffer([u8; STATIC_BUFFER_SIZE]);

static mut STORAGE: AlignedBuffer = AlignedBuffer([0; STATIC_BUFFER_SIZE]);
static GLOBAL: OnceLock<Mutex<PageAllocator<'static>>> = OnceLock::new();

fn global() -> &'static Mutex<PageAllocator<'static>> {
    GLOBAL.get_or_init(|| {
        // SAFETY: `OnceLock::get_or_init` runs this closure at most once,
        // so this is the only place that ever borrows `STORAGE`, and the
        // resulting borrow is handed to a single `PageAllocator` that lives
        // for the rest of the process.
        let buf: &'static mut [u8] = unsafe { &mut *core::ptr::addr_of_mut!(STORAGE.0) };
        let allocator = PageAllocator::reinit(buf, false)
            .expect("embedded static buffer is page-aligned and within the legal size window by construction");
        Mutex::new(allocator)
    })
}

/// Allocates from the process-wide static arena. See [`PageAllocator::malloc`].
pub fn malloc(n_bytes: usize, hint: Hint) -> Option<NonNull<u8>> {
    global().lock().expect("static allocator mutex poisoned").malloc(n_bytes, hint)
}

/// Frees into the process-wide static arena. See [`PageAllocator::free`].
pub fn free(ptr: NonNull<u8>) {
    global().lock().expect("static allocator mutex poisoned").free(ptr)
}

/// Reallocates within the process-wide static arena. See [`PageAllocator::realloc`].
pub fn realloc(ptr: Option<NonNull<u8>>, n_bytes: usize, hint: Hint) -> Option<NonNull<u8>> {
    global().lock().expect("static allocator mutex poisoned").realloc(ptr, n_bytes, hint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_arena_serves_a_request() {
        let p = malloc(64, Hint::Transient).unwrap();
        free(p);
    }
}
