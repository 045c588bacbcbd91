//! Morse code as a binary tree flattened into a 128-entry table.
//!
//! The cursor starts at index 63 with step 32; a dit subtracts the step, a
//! dah adds it, and the step halves after every element. Blank entries are
//! sequences with no character.

const BLANK: char = ' ';

#[rustfmt::skip]
const TREE: [char; 128] = [
    ' ', '5', ' ', 'H', ' ', '4', ' ', 'S', ' ', ' ', ' ', 'V', ' ', '3', ' ', 'I',
    ' ', ' ', ' ', 'F', ' ', ' ', ' ', 'U', '?', ' ', '_', ' ', ' ', '2', ' ', 'E',
    ' ', '&', ' ', 'L', '"', ' ', ' ', 'R', ' ', '+', '.', ' ', ' ', ' ', ' ', 'A',
    ' ', ' ', ' ', 'P', '@', ' ', ' ', 'W', ' ', ' ', ' ', 'J', '\'', '1', ' ', ' ',
    ' ', '6', '-', 'B', ' ', '=', ' ', 'D', ' ', '/', ' ', 'X', ' ', ' ', ' ', 'N',
    ' ', ' ', ' ', 'C', ';', ' ', '!', 'K', ' ', '(', ')', 'Y', ' ', ' ', ' ', 'T',
    ' ', '7', ' ', 'Z', ' ', ' ', ',', 'G', ' ', ' ', ' ', 'Q', ' ', ' ', ' ', 'M',
    ':', '8', ' ', ' ', ' ', ' ', ' ', 'O', ' ', '9', ' ', ' ', ' ', '0', ' ', ' ',
];

/// Longest element sequence the tree can hold
pub const MAX_ELEMENTS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element {
    Dit,
    Dah,
}

/// Walks the tree one element at a time
#[derive(Debug, Clone, Copy)]
pub struct MorseCursor {
    index: usize,
    step: usize,
    depth: usize,
    units: u32,
}

impl MorseCursor {
    pub fn new() -> Self {
        Self { index: 63, step: 32, depth: 0, units: 0 }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Advance by one element; `false` once the tree depth is exhausted
    pub fn push(&mut self, element: Element) -> bool {
        if self.depth >= MAX_ELEMENTS {
            return false;
        }
        match element {
            Element::Dit => {
                self.index -= self.step;
                self.units += 2;
            }
            Element::Dah => {
                self.index += self.step;
                self.units += 4;
            }
        }
        self.step /= 2;
        self.depth += 1;
        true
    }

    /// Character at the cursor, if the sequence is a valid code
    pub fn symbol(&self) -> Option<char> {
        if self.depth == 0 {
            return None;
        }
        TREE.get(self.index).copied().filter(|&c| c != BLANK)
    }

    /// Elements pushed so far
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Length in dit units, each element counted with its trailing gap
    pub fn units(&self) -> u32 {
        self.units
    }
}

impl Default for MorseCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// Element sequence for `ch`, found by searching the tree
pub fn encode_char(ch: char) -> Option<Vec<Element>> {
    let ch = ch.to_ascii_uppercase();
    if ch == BLANK {
        return None;
    }
    let target = TREE.iter().position(|&c| c == ch)?;

    let mut index = 63usize;
    let mut step = 32usize;
    let mut elements = Vec::new();
    while index != target && step > 0 {
        if target < index {
            index -= step;
            elements.push(Element::Dit);
        } else {
            index += step;
            elements.push(Element::Dah);
        }
        step /= 2;
    }
    (index == target).then_some(elements)
}
