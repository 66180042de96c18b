//! Sequential short-name allocation.

use std::collections::HashMap;

const LETTERS: &[u8; 26] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8; 10] = b"0123456789";

/// Hands out `a0, a1, .., a9, b0, ..` names, optionally behind a watermark prefix.
///
/// The letter/digit space holds 260 names; allocation number 261 starts over at `a0`.
#[derive(Debug, Clone, Default)]
pub struct NamePool {
    watermark: String,
    letter_index: usize,
    digit_index: usize,
    memo: HashMap<String, String>,
}

impl NamePool {
    /// A pool whose names all start with `watermark`.
    pub fn new(watermark: impl Into<String>) -> Self {
        Self {
            watermark: watermark.into(),
            ..Self::default()
        }
    }

    pub fn watermark(&self) -> &str {
        &self.watermark
    }

    /// A fresh name, ignoring the memo table.
    pub fn allocate(&mut self) -> String {
        let letter = LETTERS[self.letter_index % LETTERS.len()] as char;
        let digit = DIGITS[self.digit_index % DIGITS.len()] as char;
        self.digit_index += 1;
        if self.digit_index >= DIGITS.len() {
            self.digit_index = 0;
            self.letter_index += 1;
        }
        format!("{}{letter}{digit}", self.watermark)
    }

    /// The name previously handed out for `key`, or a fresh one remembered under it.
    pub fn get_or_allocate(&mut self, key: &str) -> String {
        if let Some(name) = self.memo.get(key) {
            return name.clone();
        }
        let name = self.allocate();
        self.memo.insert(key.to_string(), name.clone());
        name
    }

    /// The name already allocated for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.memo.get(key).map(String::as_str)
    }

    /// True if `name` has the exact shape this pool produces.
    pub fn looks_generated(&self, name: &str) -> bool {
        let Some(rest) = name.strip_prefix(self.watermark.as_str()) else {
            return false;
        };
        let bytes = rest.as_bytes();
        bytes.len() == 2 && LETTERS.contains(&bytes[0]) && DIGITS.contains(&bytes[1])
    }

    /// Forgets every memoized name and restarts the sequence.
    pub fn clear(&mut self) {
        self.memo.clear();
        self.letter_index = 0;
        self.digit_index = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_in_sequence() {
        let mut pool = NamePool::default();
        let names: Vec<_> = (0..12).map(|_| pool.allocate()).collect();
        assert_eq!(names[0], "a0");
        assert_eq!(names[9], "a9");
        assert_eq!(names[10], "b0");
        assert_eq!(names[11], "b1");
    }

    #[test]
    fn memoizes_by_key() {
        let mut pool = NamePool::new("LPX_");
        let first = pool.get_or_allocate("cls.Foo");
        let other = pool.get_or_allocate("cls.Bar");
        assert_eq!(first, "LPX_a0");
        assert_eq!(pool.get_or_allocate("cls.Foo"), first);
        assert_ne!(first, other);
        assert_eq!(pool.get("cls.Bar"), Some("LPX_a1"));
    }

    #[test]
    fn recognizes_generated_names() {
        let plain = NamePool::default();
        assert!(plain.looks_generated("z9"));
        assert!(!plain.looks_generated("Z9"));
        assert!(!plain.looks_generated("a10"));
        assert!(!plain.looks_generated("count"));

        let marked = NamePool::new("W_");
        assert!(marked.looks_generated("W_c3"));
        assert!(!marked.looks_generated("c3"));
    }

    #[test]
    fn clear_restarts_sequence() {
        let mut pool = NamePool::default();
        pool.get_or_allocate("x");
        pool.get_or_allocate("y");
        pool.clear();
        assert_eq!(pool.get("x"), None);
        assert_eq!(pool.get_or_allocate("y"), "a0");
    }

    #[test]
    fn name_space_wraps_after_260_allocations() {
        let mut pool = NamePool::default();
        let names: Vec<_> = (0..300).map(|i| pool.get_or_allocate(&format!("k{i}"))).collect();
        assert_eq!(names[259], "z9");
        // distinct keys collide once the space is exhausted
        assert_eq!(names[260], names[0]);
    }
}
