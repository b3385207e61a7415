//! Entry name and comment encodings.
//!
//! Names flagged with general-purpose bit 11 are UTF-8; everything else is
//! decoded with the legacy charset, IBM code page 437 unless the caller says
//! otherwise.

use crate::error::{ZipError, ZipResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    #[default]
    Utf8,
    Cp437,
}

/// Upper half of code page 437; the lower half is plain ASCII.
const CP437_HIGH: [char; 128] = [
    'Ç', 'ü', 'é', 'â', 'ä', 'à', 'å', 'ç', 'ê', 'ë', 'è', 'ï', 'î', 'ì', 'Ä', 'Å', //
    'É', 'æ', 'Æ', 'ô', 'ö', 'ò', 'û', 'ù', 'ÿ', 'Ö', 'Ü', '¢', '£', '¥', '₧', 'ƒ', //
    'á', 'í', 'ó', 'ú', 'ñ', 'Ñ', 'ª', 'º', '¿', '⌐', '¬', '½', '¼', '¡', '«', '»', //
    '░', '▒', '▓', '│', '┤', '╡', '╢', '╖', '╕', '╣', '║', '╗', '╝', '╜', '╛', '┐', //
    '└', '┴', '┬', '├', '─', '┼', '╞', '╟', '╚', '╔', '╩', '╦', '╠', '═', '╬', '╧', //
    '╨', '╤', '╥', '╙', '╘', '╒', '╓', '╫', '╪', '┘', '┌', '█', '▄', '▌', '▐', '▀', //
    'α', 'ß', 'Γ', 'π', 'Σ', 'σ', 'µ', 'τ', 'Φ', 'Θ', 'Ω', 'δ', '∞', 'φ', 'ε', '∩', //
    '≡', '±', '≥', '≤', '⌠', '⌡', '÷', '≈', '°', '∙', '·', '√', 'ⁿ', '²', '■', '\u{a0}',
];

impl Charset {
    pub fn is_utf8(&self) -> bool {
        matches!(self, Charset::Utf8)
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            Charset::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            Charset::Cp437 => bytes
                .iter()
                .map(|&b| {
                    if b < 0x80 {
                        b as char
                    } else {
                        CP437_HIGH[(b - 0x80) as usize]
                    }
                })
                .collect(),
        }
    }

    pub fn encode(&self, text: &str) -> ZipResult<Vec<u8>> {
        match self {
            Charset::Utf8 => Ok(text.as_bytes().to_vec()),
            Charset::Cp437 => text
                .chars()
                .map(|c| {
                    if c.is_ascii() {
                        return Ok(c as u8);
                    }
                    CP437_HIGH
                        .iter()
                        .position(|&h| h == c)
                        .map(|i| 0x80 + i as u8)
                        .ok_or_else(|| {
                            ZipError::Format(format!("{c:?} cannot be encoded in code page 437"))
                        })
                })
                .collect(),
        }
    }

    /// Charset to decode a header with, given its UTF-8 flag.
    pub(crate) fn for_flag(utf8_flag: bool, legacy: Charset) -> Charset {
        if utf8_flag { Charset::Utf8 } else { legacy }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cp437_round_trip() {
        let name = "Übersicht ½ Θ.txt";
        let raw = Charset::Cp437.encode(name).unwrap();
        assert_eq!(raw.len(), name.chars().count());
        assert_eq!(raw[0], 0x9A);
        assert_eq!(Charset::Cp437.decode(&raw), name);
    }

    #[test]
    fn cp437_rejects_unmappable() {
        assert!(Charset::Cp437.encode("日本").is_err());
    }

    #[test]
    fn utf8_is_lossless() {
        let name = "日本/ファイル.txt";
        let raw = Charset::Utf8.encode(name).unwrap();
        assert_eq!(Charset::Utf8.decode(&raw), name);
    }
}
