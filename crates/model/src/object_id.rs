use std::fmt;

/// An opaque, stable per-entity identifier (§3, glossary "Object
/// identifier"): the last segment of the entity's kernel `native-path`,
/// with every byte outside `[A-Za-z0-9]` percent-hex-escaped.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct ObjectId(String);

impl ObjectId {
    /// Derive an object id from a kernel `native-path` by taking its last
    /// `/`-separated segment and percent-hex-escaping non-alphanumerics.
    pub fn from_native_path(native_path: &str) -> Self {
        let last = native_path.rsplit('/').next().unwrap_or(native_path);
        Self::escape(last)
    }

    /// Percent-hex-escape a raw string directly (used for identifiers that
    /// aren't derived from a path segment, e.g. a UUID-qualified name).
    pub fn escape(raw: &str) -> Self {
        let mut out = String::with_capacity(raw.len());
        for b in raw.bytes() {
            let c = b as char;
            if c.is_ascii_alphanumeric() {
                out.push(c);
            } else {
                out.push_str(&format!("_{b:02x}"));
            }
        }
        Self(out)
    }

    /// The escaped string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_alnum_unchanged() {
        assert_eq!(ObjectId::from_native_path("/sys/block/sda").as_str(), "sda");
    }

    #[test]
    fn test_escapes_non_alnum() {
        let id = ObjectId::from_native_path("/sys/devices/pci0000:00/0000:00:1f.2");
        assert_eq!(id.as_str(), "0000_3a00_3a1f_2e2");
    }

    #[test]
    fn test_last_segment_only() {
        let a = ObjectId::from_native_path("/sys/block/sda/sda1");
        assert_eq!(a.as_str(), "sda1");
    }
}
