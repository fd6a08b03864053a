//! Letter/digit confusion tables
//!
//! Fixed heuristic pairs of glyphs OCR engines mix up on plates. The two
//! directions are not inverses of each other: `L` reads as `1`, but `1` is
//! only ever corrected to `I`.

/// Letters commonly read where a digit was printed
pub const LETTER_TO_DIGIT: [(char, char); 7] = [
    ('O', '0'),
    ('I', '1'),
    ('L', '1'),
    ('S', '5'),
    ('B', '8'),
    ('Z', '2'),
    ('G', '6'),
];

/// Digits commonly read where a letter was printed
pub const DIGIT_TO_LETTER: [(char, char); 6] = [
    ('0', 'O'),
    ('1', 'I'),
    ('5', 'S'),
    ('8', 'B'),
    ('2', 'Z'),
    ('6', 'G'),
];

pub fn letter_to_digit(c: char) -> Option<char> {
    LETTER_TO_DIGIT.iter().find(|(from, _)| *from == c).map(|&(_, to)| to)
}

pub fn digit_to_letter(c: char) -> Option<char> {
    DIGIT_TO_LETTER.iter().find(|(from, _)| *from == c).map(|&(_, to)| to)
}

/// Both directions, letter-to-digit first
pub fn all_pairs() -> impl Iterator<Item = (char, char)> {
    LETTER_TO_DIGIT.iter().chain(DIGIT_TO_LETTER.iter()).copied()
}

/// Every confusion substitute for `c`
pub fn alternatives(c: char) -> impl Iterator<Item = char> {
    letter_to_digit(c).into_iter().chain(digit_to_letter(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(letter_to_digit('O'), Some('0'));
        assert_eq!(letter_to_digit('L'), Some('1'));
        assert_eq!(letter_to_digit('A'), None);
        assert_eq!(digit_to_letter('8'), Some('B'));
        assert_eq!(digit_to_letter('3'), None);
    }

    #[test]
    fn test_tables_are_asymmetric() {
        // L -> 1 exists but 1 -> L does not
        assert_eq!(digit_to_letter('1'), Some('I'));
        assert_eq!(alternatives('L').collect::<Vec<_>>(), vec!['1']);
    }

    #[test]
    fn test_all_pairs_order() {
        let pairs: Vec<_> = all_pairs().collect();
        assert_eq!(pairs.len(), 13);
        assert_eq!(pairs[0], ('O', '0'));
        assert_eq!(pairs[7], ('0', 'O'));
    }
}
