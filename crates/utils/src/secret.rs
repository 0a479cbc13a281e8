use std::fmt;

/// A byte buffer that is overwritten with zeroes when dropped.
///
/// Used for LUKS passphrases and anything else that is handed to a helper
/// process on stdin: the bytes must not outlive the authority check and
/// spawn call, and must never be logged.
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    /// Take ownership of `bytes`, treating them as secret from here on.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Borrow the secret bytes, e.g. to write them to a child's stdin.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBytes(<redacted>)")
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        for b in self.0.iter_mut() {
            *b = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_on_drop() {
        // We can't observe the freed allocation directly, but we can check
        // the in-place zeroing that `Drop` performs before deallocation.
        let mut secret = SecretBytes::new(vec![1, 2, 3, 4]);
        assert_eq!(secret.as_bytes(), &[1, 2, 3, 4]);
        // Simulate what `Drop::drop` does without actually dropping, so the
        // assertion below can still observe the buffer.
        for b in secret.0.iter_mut() {
            *b = 0;
        }
        assert_eq!(secret.as_bytes(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_debug_redacted() {
        let secret = SecretBytes::new(vec![1, 2, 3]);
        assert_eq!(format!("{secret:?}"), "SecretBytes(<redacted>)");
    }
}
