//! Kiosk Keys - MIFARE Classic key dictionary
//!
//! This crate provides the authentication keys the reader tries when a
//! sector's key is not known in advance, loaded from the embedded
//! `mifare-keys.txt` table in file order.

use std::fmt;

/// A 6-byte MIFARE Classic sector key
pub type MifareKey = [u8; 6];

/// Which of the two sector keys an authentication targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeySlot {
    A,
    B,
}

impl KeySlot {
    /// Both slots in the order they are tried
    pub const ALL: [KeySlot; 2] = [KeySlot::A, KeySlot::B];

    /// MIFARE authentication command byte for this slot
    pub fn auth_command(self) -> u8 {
        match self {
            KeySlot::A => 0x60,
            KeySlot::B => 0x61,
        }
    }
}

impl fmt::Display for KeySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySlot::A => f.write_str("A"),
            KeySlot::B => f.write_str("B"),
        }
    }
}

/// A key paired with the slot it is presented for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyCandidate {
    pub key: MifareKey,
    pub slot: KeySlot,
}

impl KeyCandidate {
    pub const fn new(key: MifareKey, slot: KeySlot) -> Self {
        Self { key, slot }
    }
}

impl fmt::Display for KeyCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", hex::encode_upper(self.key), self.slot)
    }
}

/// An entry of the key dictionary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownKey {
    pub name: String,
    pub key: MifareKey,
    pub description: String,
}

/// Standard keys every card reader tries first
pub mod keys {
    use super::MifareKey;

    /// Factory default key
    pub const FACTORY_DEFAULT: MifareKey = [0xFF; 6];

    /// All-zero key
    pub const NULL: MifareKey = [0x00; 6];

    /// MIFARE Application Directory key A
    pub const MAD_A: MifareKey = [0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5];

    /// MAD / NFC Forum key B
    pub const MAD_B: MifareKey = [0xD3, 0xF7, 0xD3, 0xF7, 0xD3, 0xF7];

    /// The standard keys in the order they are tried
    pub const STANDARD: [MifareKey; 4] = [FACTORY_DEFAULT, NULL, MAD_A, MAD_B];
}

/// Parse a key from 12 hex digits (':', '-' and spaces are ignored)
pub fn parse_key(text: &str) -> Option<MifareKey> {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, ':' | ' ' | '-'))
        .collect();
    let bytes = hex::decode(cleaned).ok()?;
    bytes.try_into().ok()
}

/// Get every key of the embedded dictionary, in file order
///
/// # Example
/// ```
/// use kiosk_keys::{known_keys, keys};
///
/// let dictionary = known_keys();
/// assert_eq!(dictionary[0].key, keys::FACTORY_DEFAULT);
/// ```
pub fn known_keys() -> Vec<KnownKey> {
    let key_data = include_str!("../../../mifare-keys.txt");
    let mut entries = Vec::new();

    for line in key_data.lines() {
        // Skip empty lines and comments
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 2 {
            continue;
        }

        let key = match parse_key(parts[1]) {
            Some(key) => key,
            None => continue,
        };

        entries.push(KnownKey {
            name: parts[0].to_string(),
            key,
            description: parts.get(2).unwrap_or(&"").to_string(),
        });
    }

    entries
}

/// Look up a dictionary key by name
pub fn find_key(name: &str) -> Option<KnownKey> {
    known_keys().into_iter().find(|k| k.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dictionary_starts_with_standard_keys() {
        let dictionary = known_keys();
        let head: Vec<MifareKey> = dictionary.iter().take(4).map(|k| k.key).collect();
        assert_eq!(head, keys::STANDARD.to_vec());
    }

    #[test]
    fn test_dictionary_has_no_duplicates() {
        let dictionary = known_keys();
        for (i, entry) in dictionary.iter().enumerate() {
            assert!(
                dictionary[i + 1..].iter().all(|other| other.key != entry.key),
                "duplicate key {}",
                entry.name
            );
        }
    }

    #[test]
    fn test_find_key() {
        let mad = find_key("mad-a").expect("MAD key should be in the dictionary");
        assert_eq!(mad.key, keys::MAD_A);
        assert!(find_key("does-not-exist").is_none());
    }

    #[test]
    fn test_parse_key() {
        assert_eq!(parse_key("FFFFFFFFFFFF"), Some(keys::FACTORY_DEFAULT));
        assert_eq!(parse_key("a0:a1:a2:a3:a4:a5"), Some(keys::MAD_A));
        assert_eq!(parse_key("FFFF"), None);
        assert_eq!(parse_key("not a key"), None);
    }

    #[test]
    fn test_slot_commands() {
        assert_eq!(KeySlot::A.auth_command(), 0x60);
        assert_eq!(KeySlot::B.auth_command(), 0x61);
        let candidate = KeyCandidate::new(keys::FACTORY_DEFAULT, KeySlot::B);
        assert_eq!(candidate.to_string(), "FFFFFFFFFFFF/B");
    }
}
