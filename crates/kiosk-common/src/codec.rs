//! Text <-> block conversion for the token and CVC blocks

use crate::{Block, BLOCK_SIZE};

/// Longest prefix of `text` that fits in `max` bytes without splitting a character
pub fn truncate_utf8(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }

    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Encode text into a zero-padded block
///
/// Text longer than a block is truncated silently; callers that cannot
/// accept truncation must check the length first.
pub fn encode_text(text: &str) -> Block {
    let mut block = [0u8; BLOCK_SIZE];
    let bytes = truncate_utf8(text, BLOCK_SIZE).as_bytes();
    block[..bytes.len()].copy_from_slice(bytes);
    block
}

/// Decode a block back into text
///
/// Trailing zero bytes are padding. Invalid UTF-8 is replaced rather than
/// rejected, and an all-zero block decodes to an empty string.
pub fn decode_text(block: &Block) -> String {
    let end = block
        .iter()
        .rposition(|&b| b != 0x00)
        .map_or(0, |last| last + 1);

    String::from_utf8_lossy(&block[..end]).into_owned()
}
