//! Reversible mapping between raw bytes and printable unicode characters.
//!
//! Byte-level BPE vocabularies never contain whitespace or control
//! characters. Printable latin-1 bytes map to themselves and the remaining
//! 68 bytes are shifted to code points from U+0100 upwards, so a space
//! becomes `Ġ` and a newline `Ċ`.

use std::collections::HashMap;

fn is_printable(b: u8) -> bool {
    matches!(b, b'!'..=b'~' | 0xA1..=0xAC | 0xAE..=0xFF)
}

pub(crate) fn byte_encoder() -> [char; 256] {
    let mut table = ['\0'; 256];
    let mut shift = 0u32;
    for b in 0..=255u8 {
        table[b as usize] = if is_printable(b) {
            char::from(b)
        } else {
            let c = char::from_u32(256 + shift).unwrap_or(char::REPLACEMENT_CHARACTER);
            shift += 1;
            c
        };
    }
    table
}

pub(crate) fn byte_decoder(encoder: &[char; 256]) -> HashMap<char, u8> {
    encoder
        .iter()
        .enumerate()
        .map(|(b, &c)| (c, b as u8))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_mappings() {
        let enc = byte_encoder();
        assert_eq!(enc[b' ' as usize], 'Ġ');
        assert_eq!(enc[b'\n' as usize], 'Ċ');
        assert_eq!(enc[b'a' as usize], 'a');
        assert_eq!(enc[0xAD], 'Ń');
    }

    #[test]
    fn test_mapping_is_bijective() {
        let enc = byte_encoder();
        let dec = byte_decoder(&enc);
        assert_eq!(dec.len(), 256);
        for b in 0..=255u8 {
            assert_eq!(dec[&enc[b as usize]], b);
        }
    }
}
