//! ITA2 (Baudot) character set with LTRS/FIGS shift handling.

/// Shift to figures
pub const FIGS: u8 = 0x1B;
/// Shift to letters
pub const LTRS: u8 = 0x1F;

const NUL: char = '\0';

/// Letters table, indexed by the 5-bit code
pub const LTRS_TABLE: [char; 32] = [
    NUL, 'E', '\n', 'A', ' ', 'S', 'I', 'U', //
    '\r', 'D', 'R', 'J', 'N', 'F', 'C', 'K', //
    'T', 'Z', 'L', 'W', 'H', 'Y', 'P', 'Q', //
    'O', 'B', 'G', NUL, 'M', 'X', 'V', NUL, //
];

/// Figures table, indexed by the 5-bit code
pub const FIGS_TABLE: [char; 32] = [
    NUL, '3', '\n', '-', ' ', '\'', '8', '7', //
    '\r', '$', '4', '\u{7}', ',', '!', ':', '(', //
    '5', '+', ')', '2', '#', '6', '0', '1', //
    '9', '?', '&', NUL, '.', '/', ';', NUL, //
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shift {
    #[default]
    Letters,
    Figures,
}

/// Stateful ITA2 decoder
#[derive(Debug, Clone, Default)]
pub struct BaudotDecoder {
    shift: Shift,
}

impl BaudotDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shift(&self) -> Shift {
        self.shift
    }

    pub fn reset(&mut self) {
        self.shift = Shift::Letters;
    }

    /// Decode one 5-bit code. Shift codes and unmapped codes yield `None`.
    pub fn decode(&mut self, code: u8) -> Option<char> {
        match code {
            FIGS => {
                self.shift = Shift::Figures;
                None
            }
            LTRS => {
                self.shift = Shift::Letters;
                None
            }
            c if c < 32 => {
                let table = match self.shift {
                    Shift::Letters => &LTRS_TABLE,
                    Shift::Figures => &FIGS_TABLE,
                };
                Some(table[c as usize]).filter(|&ch| ch != NUL)
            }
            _ => None,
        }
    }
}

/// Look up the code for `ch`, preferring the current shift.
///
/// Returns the code and the shift it belongs to; `None` if ITA2 has no
/// representation for the character.
pub fn encode_char(ch: char, current: Shift) -> Option<(u8, Shift)> {
    let ch = ch.to_ascii_uppercase();
    if ch == NUL {
        return None;
    }
    let find = |table: &[char; 32]| {
        table
            .iter()
            .enumerate()
            .find(|&(code, &c)| c == ch && code as u8 != FIGS && code as u8 != LTRS)
            .map(|(code, _)| code as u8)
    };
    let (first, second) = match current {
        Shift::Letters => ((Shift::Letters, &LTRS_TABLE), (Shift::Figures, &FIGS_TABLE)),
        Shift::Figures => ((Shift::Figures, &FIGS_TABLE), (Shift::Letters, &LTRS_TABLE)),
    };
    find(first.1)
        .map(|code| (code, first.0))
        .or_else(|| find(second.1).map(|code| (code, second.0)))
}

/// Encode text as a code stream starting in LTRS, inserting shifts as needed.
/// Characters with no ITA2 representation are skipped.
pub fn encode(text: &str) -> Vec<u8> {
    let mut shift = Shift::Letters;
    let mut codes = vec![LTRS];
    for ch in text.chars() {
        if let Some((code, needed)) = encode_char(ch, shift) {
            if needed != shift {
                codes.push(match needed {
                    Shift::Letters => LTRS,
                    Shift::Figures => FIGS,
                });
                shift = needed;
            }
            codes.push(code);
        }
    }
    codes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letters_lookup() {
        let mut decoder = BaudotDecoder::new();
        assert_eq!(decoder.decode(0x03), Some('A'));
        assert_eq!(decoder.decode(0x01), Some('E'));
        assert_eq!(decoder.decode(0x18), Some('O'));
    }

    #[test]
    fn test_figs_shift_changes_table() {
        let mut decoder = BaudotDecoder::new();
        assert_eq!(decoder.decode(FIGS), None);
        assert_eq!(decoder.shift(), Shift::Figures);
        assert_eq!(decoder.decode(0x03), Some('-'));
        assert_eq!(decoder.decode(0x17), Some('1'));
        assert_eq!(decoder.decode(LTRS), None);
        assert_eq!(decoder.decode(0x03), Some('A'));
    }

    #[test]
    fn test_unmapped_codes_emit_nothing() {
        let mut decoder = BaudotDecoder::new();
        assert_eq!(decoder.decode(0x00), None);
        assert_eq!(decoder.decode(0x20), None);
        assert_eq!(decoder.shift(), Shift::Letters);
    }

    #[test]
    fn test_encode_inserts_shifts() {
        let codes = encode("A1 B");
        // LTRS, A, FIGS, 1, space (available in FIGS), LTRS, B
        assert_eq!(codes, vec![LTRS, 0x03, FIGS, 0x17, 0x04, LTRS, 0x19]);
    }

    #[test]
    fn test_encode_skips_unrepresentable() {
        assert_eq!(encode("A%A"), vec![LTRS, 0x03, 0x03]);
    }

    #[test]
    fn test_decode_of_encoded_text() {
        let text = "CQ CQ DE HA5XYZ 599";
        let mut decoder = BaudotDecoder::new();
        let decoded: String = encode(text).into_iter().filter_map(|c| decoder.decode(c)).collect();
        assert_eq!(decoded, text);
    }
}
