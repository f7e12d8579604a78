//! Time-ordered document identifiers
//!
//! An [`ObjectId`] is 12 bytes rendered as 24 lowercase hex characters.
//! Bytes 0-3 hold the big-endian Unix creation second, bytes 4-8 are random
//! per process and bytes 9-11 are a wrapping counter. The embedded creation
//! time is what routes time-partitioned documents to their index.

use chrono::{DateTime, TimeZone, Utc};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

static COUNTER: AtomicU32 = AtomicU32::new(0);
static PROCESS_BYTES: OnceLock<[u8; 5]> = OnceLock::new();

/// 12-byte identifier carrying its creation second
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Generate an id stamped with the current time
    pub fn new() -> Self {
        Self::with_time(Utc::now())
    }

    /// Generate an id stamped with `created`.
    ///
    /// Times outside the representable range (before 1970 or after 2106)
    /// are clamped.
    pub fn with_time(created: DateTime<Utc>) -> Self {
        let secs = created.timestamp().clamp(0, u32::MAX as i64) as u32;
        let process = PROCESS_BYTES.get_or_init(rand::random::<[u8; 5]>);
        let counter = COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF;

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(process);
        bytes[9..12].copy_from_slice(&counter.to_be_bytes()[1..4]);
        Self(bytes)
    }

    /// Parse a 24-character hex string
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 24 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }

        let mut bytes = [0u8; 12];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }

    /// The creation time embedded in the first four bytes
    pub fn creation_time(&self) -> DateTime<Utc> {
        let secs = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        Utc.timestamp_opt(secs as i64, 0)
            .single()
            .unwrap_or(DateTime::UNIX_EPOCH)
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_24_hex_chars() {
        let id = ObjectId::new().to_string();
        assert_eq!(id.len(), 24);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_creation_time_roundtrip() {
        let created = Utc.with_ymd_and_hms(2020, 1, 15, 8, 30, 0).unwrap();
        let id = ObjectId::with_time(created);
        assert_eq!(id.creation_time(), created);

        let parsed = ObjectId::parse(&id.to_string()).expect("valid id");
        assert_eq!(parsed, id);
        assert_eq!(parsed.creation_time(), created);
    }

    #[test]
    fn test_ids_are_unique_within_a_second() {
        let created = Utc::now();
        let a = ObjectId::with_time(created);
        let b = ObjectId::with_time(created);
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ObjectId::parse("").is_none());
        assert!(ObjectId::parse("not-an-object-id").is_none());
        assert!(ObjectId::parse("zzzzzzzzzzzzzzzzzzzzzzzz").is_none());
        assert!(ObjectId::parse("5e1ecc00000000000000000").is_none());
    }

    #[test]
    fn test_parse_rejects_signed_pairs() {
        assert!(ObjectId::parse("+a+b+c+d+e+f+1+2+3+4+5+6").is_none());
        assert!(ObjectId::parse("+e1e56000000000000000001").is_none());
    }

    #[test]
    fn test_known_id() {
        // 0x5e1e5600 = 2020-01-15T00:00:00Z
        let id = ObjectId::parse("5e1e56000000000000000001").expect("valid id");
        assert_eq!(
            id.creation_time(),
            Utc.with_ymd_and_hms(2020, 1, 15, 0, 0, 0).unwrap()
        );
    }
}
