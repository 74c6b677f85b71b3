//! Table-driven bit-pattern decoder:
//! each architectural sub-domain is a list of (bit-pattern, visitor)
//! entries matched in order, first match wins. A pattern character is
//! `'0'`/`'1'` (a fixed bit) or any other ASCII letter, which both matches
//! any bit value and collects it into a named field; repeated occurrences
//! of the same letter form one multi-bit field, most-significant-first.

use std::collections::BTreeMap;

/// One decode-table row: a fixed-width bit pattern over `WIDTH` bits,
/// represented as a string using `0`/`1`/letters the same way reference
/// decoder tables are written in the source they're drawn from.
#[derive(Debug, Clone, Copy)]
pub struct Pattern<'a> {
    pub bits: &'a str,
}

/// The named fields captured out of an instruction word during a single
/// successful match, keyed by the pattern letter they were bound to.
pub type Fields = BTreeMap<char, u32>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecoderTableError {
    #[error("pattern {0:?} has length {1}, expected {2}")]
    WrongWidth(String, usize, usize),
    #[error("patterns {0:?} and {1:?} both match word {2:#010x}; decoder construction requires disjoint or strictly ordered patterns")]
    AmbiguousOverlap(String, String, u32),
}

impl<'a> Pattern<'a> {
    /// Test whether `word`'s low `WIDTH` bits match the fixed `0`/`1`
    /// positions of this pattern, and if so extract every named field.
    pub fn try_match(&self, word: u32, width: usize) -> Option<Fields> {
        let mut fields: BTreeMap<char, (u32, usize)> = BTreeMap::new();
        let chars: Vec<char> = self.bits.chars().collect();
        for (i, c) in chars.iter().enumerate() {
            let bit_pos = width - 1 - i;
            let bit = (word >> bit_pos) & 1;
            match c {
                '0' => {
                    if bit != 0 {
                        return None;
                    }
                }
                '1' => {
                    if bit != 1 {
                        return None;
                    }
                }
                letter => {
                    let entry = fields.entry(*letter).or_insert((0, 0));
                    entry.0 = (entry.0 << 1) | bit;
                    entry.1 += 1;
                }
            }
        }
        Some(fields.into_iter().map(|(k, (v, _))| (k, v)).collect())
    }
}

/// A table of (pattern, decoded-instruction) pairs for one fixed
/// instruction width, searched in declaration order. `T` is typically an
/// enum identifying which visitor method to dispatch to.
pub struct DecodeTable<'a, T> {
    width: usize,
    rows: Vec<(Pattern<'a>, T)>,
}

impl<'a, T: Copy> DecodeTable<'a, T> {
    /// Builds the table, rejecting any pattern of the wrong width outright.
    /// Ambiguity between rows is intentionally *not* checked here — real
    /// ARM encoding tables rely on declaration order to disambiguate
    /// deliberately overlapping rows (a specific encoding listed before a
    /// more general one it is a special case of), so full ambiguity
    /// detection is offered separately via [`DecodeTable::check_disjoint_or_ordered`]
    /// for tables that are supposed to have no such overlap.
    pub fn new(width: usize, rows: Vec<(Pattern<'a>, T)>) -> Result<Self, DecoderTableError> {
        for (pat, _) in &rows {
            if pat.bits.len() != width {
                return Err(DecoderTableError::WrongWidth(pat.bits.to_string(), pat.bits.len(), width));
            }
        }
        Ok(DecodeTable { width, rows })
    }

    /// First-match lookup: returns the row's payload and the fields bound
    /// by its pattern, or `None` if no row matches (an undefined encoding).
    pub fn decode(&self, word: u32) -> Option<(T, Fields)> {
        for (pat, payload) in &self.rows {
            if let Some(fields) = pat.try_match(word, self.width) {
                return Some((*payload, fields));
            }
        }
        None
    }

    /// Rejects genuinely ambiguous overlap between rows: two patterns whose
    /// match sets intersect without either containing the other. A specific
    /// encoding listed before the more general pattern it specializes is
    /// *not* ambiguous — its match set is a subset of the general row's,
    /// so declaration order alone decides the outcome, exactly as real ARM
    /// decode tables rely on (a concrete opcode before `UDF`'s catch-all).
    pub fn check_disjoint_or_ordered(&self) -> Result<(), DecoderTableError> {
        for i in 0..self.rows.len() {
            for j in (i + 1)..self.rows.len() {
                let a = &self.rows[i].0;
                let b = &self.rows[j].0;
                if !self.overlaps(a, b) {
                    continue;
                }
                if self.is_subset(a, b) || self.is_subset(b, a) {
                    continue;
                }
                return Err(DecoderTableError::AmbiguousOverlap(
                    a.bits.to_string(),
                    b.bits.to_string(),
                    self.example_overlap_word(a, b),
                ));
            }
        }
        Ok(())
    }

    fn fixed_bit(pattern: &Pattern, pos: usize) -> Option<u8> {
        match pattern.bits.as_bytes()[pos] {
            b'0' => Some(0),
            b'1' => Some(1),
            _ => None,
        }
    }

    fn overlaps(&self, a: &Pattern, b: &Pattern) -> bool {
        (0..self.width).all(|i| match (Self::fixed_bit(a, i), Self::fixed_bit(b, i)) {
            (Some(x), Some(y)) => x == y,
            _ => true,
        })
    }

    /// True iff every word matching `a` also matches `b`.
    fn is_subset(&self, a: &Pattern, b: &Pattern) -> bool {
        (0..self.width).all(|i| match Self::fixed_bit(b, i) {
            None => true,
            Some(y) => Self::fixed_bit(a, i) == Some(y),
        })
    }

    fn example_overlap_word(&self, a: &Pattern, b: &Pattern) -> u32 {
        let mut word = 0u32;
        for i in 0..self.width {
            let bit = Self::fixed_bit(a, i).or(Self::fixed_bit(b, i)).unwrap_or(0);
            word = (word << 1) | bit as u32;
        }
        word
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_bits_must_match_exactly() {
        let p = Pattern { bits: "101" };
        assert!(p.try_match(0b101, 3).is_some());
        assert!(p.try_match(0b100, 3).is_none());
    }

    #[test]
    fn named_field_is_extracted_msb_first() {
        let p = Pattern { bits: "1dddd0" };
        let fields = p.try_match(0b1_1010_0, 6).unwrap();
        assert_eq!(fields[&'d'], 0b1010);
    }

    #[test]
    fn first_match_wins_over_a_more_general_later_row() {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        enum Op {
            Specific,
            General,
        }
        let table = DecodeTable::new(
            4,
            vec![
                (Pattern { bits: "1010" }, Op::Specific),
                (Pattern { bits: "dddd" }, Op::General),
            ],
        )
        .unwrap();
        let (op, _) = table.decode(0b1010).unwrap();
        assert_eq!(op, Op::Specific);
        let (op, _) = table.decode(0b0110).unwrap();
        assert_eq!(op, Op::General);
    }

    #[test]
    fn no_row_matches_is_an_undefined_encoding() {
        let table: DecodeTable<()> = DecodeTable::new(2, vec![(Pattern { bits: "00" }, ())]).unwrap();
        assert!(table.decode(0b11).is_none());
    }

    #[test]
    fn a_specific_row_before_its_generalization_is_not_ambiguous() {
        let table: DecodeTable<()> =
            DecodeTable::new(4, vec![(Pattern { bits: "1010" }, ()), (Pattern { bits: "dddd" }, ())]).unwrap();
        assert!(table.check_disjoint_or_ordered().is_ok());
    }

    #[test]
    fn two_equally_specific_overlapping_rows_are_ambiguous() {
        let table: DecodeTable<()> =
            DecodeTable::new(4, vec![(Pattern { bits: "1dd0" }, ()), (Pattern { bits: "dd00" }, ())]).unwrap();
        assert_eq!(
            table.check_disjoint_or_ordered(),
            Err(DecoderTableError::AmbiguousOverlap("1dd0".into(), "dd00".into(), 0b1000))
        );
    }
}
