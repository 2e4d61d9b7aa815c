//! Result buffers handed to the host. They come from the C allocator so
//! that the host can only release them through `free_result`.

use std::ffi::{c_char, c_void};
use std::ptr;

/// Copy `bytes` into a NUL-terminated `malloc` buffer. Null when the bytes
/// contain a NUL or allocation fails.
pub(crate) fn copy_out(bytes: &[u8]) -> *mut c_char {
    if bytes.contains(&0) {
        return ptr::null_mut();
    }
    // Safety: the buffer is len + 1 bytes and written exactly once.
    unsafe {
        let buffer = libc::malloc(bytes.len() + 1) as *mut u8;
        if buffer.is_null() {
            return ptr::null_mut();
        }
        ptr::copy_nonoverlapping(bytes.as_ptr(), buffer, bytes.len());
        *buffer.add(bytes.len()) = 0;
        buffer as *mut c_char
    }
}

/// # Safety
///
/// `buffer` must come from [`copy_out`] and not have been released.
pub(crate) unsafe fn release(buffer: *mut c_char) {
    libc::free(buffer as *mut c_void);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn copy_out_terminates() {
        let buffer = copy_out(br#"{"rendered_chats":["HI"]}"#);
        assert!(!buffer.is_null());
        unsafe {
            assert_eq!(
                CStr::from_ptr(buffer).to_bytes(),
                br#"{"rendered_chats":["HI"]}"#
            );
            release(buffer);
        }
    }

    #[test]
    fn copy_out_empty() {
        let buffer = copy_out(b"");
        assert!(!buffer.is_null());
        unsafe {
            assert!(CStr::from_ptr(buffer).to_bytes().is_empty());
            release(buffer);
        }
    }

    #[test]
    fn interior_nul_is_refused() {
        assert!(copy_out(b"a\0b").is_null());
    }
}
