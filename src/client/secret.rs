//! Password storage that is guaranteed to be wiped before release
//!
//! The wipe goes through a volatile pointer so the optimizer cannot
//! treat it as a dead store, and a compiler fence pins the ordering.

use std::fmt;
use std::ptr;
use std::str;
use std::sync::atomic::{compiler_fence, Ordering};

/// Overwrite the bytes in place: 0x00, then 0xff, then 0x00
pub fn scrub(data: &mut [u8]) {
    for &pass in &[0x00u8, 0xff, 0x00] {
        for byte in data.iter_mut() {
            unsafe { ptr::write_volatile(byte, pass) }
        }
        compiler_fence(Ordering::SeqCst);
    }
}

/// An owned secret that scrubs its storage on every release path
pub struct Secret {
    data: Vec<u8>,
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

impl Secret {
    pub fn new() -> Secret {
        Secret { data: Vec::new() }
    }

    /// Replace the stored value, scrubbing the previous one
    pub fn set(&mut self, value: &str) {
        self.clear();
        self.data.extend_from_slice(value.as_bytes());
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_str(&self) -> &str {
        // the value is only ever set from `&str`
        str::from_utf8(&self.data).unwrap_or("")
    }

    /// Scrub and discard the stored value
    pub fn clear(&mut self) {
        scrub(&mut self.data);
        self.data.clear();
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        scrub(&mut self.data);
    }
}

#[cfg(test)]
mod test {
    use super::{scrub, Secret};

    #[test]
    fn scrub_zeroes_storage() {
        let mut data = b"Circle Of Life".to_vec();
        scrub(&mut data);
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn replace_scrubs_old_value() {
        let mut secret = Secret::new();
        secret.set("first");
        secret.set("second");
        assert_eq!(secret.as_str(), "second");
    }

    #[test]
    fn clear_leaves_no_value() {
        let mut secret = Secret::new();
        secret.set("hunter2");
        assert!(!secret.is_empty());
        secret.clear();
        assert!(secret.is_empty());
        assert_eq!(secret.as_str(), "");
    }
}
