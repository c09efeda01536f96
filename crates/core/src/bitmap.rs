//! Word-packed bitmap
//!
//! Growable set of bit positions stored in 64-bit words. Trailing zero words
//! carry no meaning: two bitmaps with the same set bits compare equal even if
//! one has more words.

use std::fmt;
use std::hash::{Hash, Hasher};

const WORD_BITS: usize = 64;

#[inline]
fn word_index(bit: usize) -> usize {
    bit / WORD_BITS
}

#[inline]
fn bit_mask(bit: usize) -> u64 {
    1u64 << (bit % WORD_BITS)
}

/// Mutable bitmap used for hit sets and as the storage of [`ContextSet`](crate::ContextSet).
#[derive(Clone, Default)]
pub struct Bitmap {
    words: Vec<u64>,
}

impl Bitmap {
    /// Empty bitmap.
    pub fn new() -> Self {
        Bitmap { words: Vec::new() }
    }

    /// Empty bitmap with room for `nbits` bits.
    pub fn with_capacity(nbits: usize) -> Self {
        Bitmap {
            words: vec![0; (nbits + WORD_BITS - 1) / WORD_BITS],
        }
    }

    /// Build from raw words, lowest bits first.
    pub fn from_words(words: Vec<u64>) -> Self {
        Bitmap { words }
    }

    /// Bitmap with one bit per non-zero hit count.
    pub fn for_hits(hits: &[u32]) -> Self {
        let mut bitmap = Bitmap::with_capacity(hits.len());
        for (slot, count) in hits.iter().enumerate() {
            if *count != 0 {
                bitmap.insert(slot);
            }
        }
        bitmap
    }

    /// Raw words, including any trailing zero words.
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Words up to and including the last non-zero one.
    pub fn significant_words(&self) -> &[u64] {
        let len = self
            .words
            .iter()
            .rposition(|w| *w != 0)
            .map_or(0, |i| i + 1);
        &self.words[..len]
    }

    /// Returns `true` if `bit` is set.
    pub fn contains(&self, bit: usize) -> bool {
        self.words
            .get(word_index(bit))
            .map_or(false, |w| w & bit_mask(bit) != 0)
    }

    /// Set `bit`, growing as needed.
    pub fn insert(&mut self, bit: usize) {
        let idx = word_index(bit);
        if idx >= self.words.len() {
            self.words.resize(idx + 1, 0);
        }
        self.words[idx] |= bit_mask(bit);
    }

    /// Clear `bit`.
    pub fn remove(&mut self, bit: usize) {
        if let Some(w) = self.words.get_mut(word_index(bit)) {
            *w &= !bit_mask(bit);
        }
    }

    /// Toggle every bit in `[start, end)`.
    pub fn toggle_range(&mut self, start: usize, end: usize) {
        if start >= end {
            return;
        }
        let last = word_index(end - 1);
        if last >= self.words.len() {
            self.words.resize(last + 1, 0);
        }
        for bit in start..end {
            self.words[word_index(bit)] ^= bit_mask(bit);
        }
    }

    /// In-place intersection.
    pub fn intersect_with(&mut self, other: &Bitmap) {
        for (i, w) in self.words.iter_mut().enumerate() {
            *w &= other.words.get(i).copied().unwrap_or(0);
        }
    }

    /// In-place union.
    pub fn union_with(&mut self, other: &Bitmap) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w |= o;
        }
    }

    /// Returns `true` if the two bitmaps share any bit.
    pub fn intersects(&self, other: &Bitmap) -> bool {
        self.words
            .iter()
            .zip(&other.words)
            .any(|(a, b)| a & b != 0)
    }

    /// First set bit at or after `from`.
    pub fn next_set_bit(&self, from: usize) -> Option<usize> {
        let mut idx = word_index(from);
        if idx >= self.words.len() {
            return None;
        }
        let mut word = self.words[idx] & (!0u64 << (from % WORD_BITS));
        loop {
            if word != 0 {
                return Some(idx * WORD_BITS + word.trailing_zeros() as usize);
            }
            idx += 1;
            if idx >= self.words.len() {
                return None;
            }
            word = self.words[idx];
        }
    }

    /// Iterate over set bits in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let mut next = self.next_set_bit(0);
        std::iter::from_fn(move || {
            let bit = next?;
            next = self.next_set_bit(bit + 1);
            Some(bit)
        })
    }

    /// One past the highest set bit, 0 when empty.
    pub fn len(&self) -> usize {
        let words = self.significant_words();
        match words.last() {
            Some(last) => (words.len() - 1) * WORD_BITS + (WORD_BITS - last.leading_zeros() as usize),
            None => 0,
        }
    }

    /// Returns `true` if no bit is set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Serialized size in bytes.
    pub fn size_in_bytes(&self) -> usize {
        self.words.len() * 8
    }
}

impl PartialEq for Bitmap {
    fn eq(&self, other: &Self) -> bool {
        self.significant_words() == other.significant_words()
    }
}

impl Eq for Bitmap {}

impl Hash for Bitmap {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant_words().hash(state);
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<usize> for Bitmap {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut bitmap = Bitmap::new();
        for bit in iter {
            bitmap.insert(bit);
        }
        bitmap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_contains_remove() {
        let mut b = Bitmap::new();
        b.insert(3);
        b.insert(130);
        assert!(b.contains(3));
        assert!(b.contains(130));
        assert!(!b.contains(4));
        assert_eq!(b.words().len(), 3);
        b.remove(130);
        assert!(!b.contains(130));
        assert_eq!(b.len(), 4);
    }

    #[test]
    fn trailing_zero_words_do_not_affect_equality() {
        let a = Bitmap::from_words(vec![0b101]);
        let b = Bitmap::from_words(vec![0b101, 0, 0]);
        assert_eq!(a, b);
        assert_eq!(Bitmap::new(), Bitmap::from_words(vec![0, 0]));
    }

    #[test]
    fn next_set_bit_crosses_words() {
        let b: Bitmap = [1, 64, 200].into_iter().collect();
        assert_eq!(b.next_set_bit(0), Some(1));
        assert_eq!(b.next_set_bit(2), Some(64));
        assert_eq!(b.next_set_bit(65), Some(200));
        assert_eq!(b.next_set_bit(201), None);
        assert_eq!(b.iter().collect::<Vec<_>>(), vec![1, 64, 200]);
    }

    #[test]
    fn toggle_range_grows() {
        let mut b = Bitmap::new();
        b.toggle_range(62, 66);
        assert_eq!(b.iter().collect::<Vec<_>>(), vec![62, 63, 64, 65]);
        b.toggle_range(63, 65);
        assert_eq!(b.iter().collect::<Vec<_>>(), vec![62, 65]);
        b.toggle_range(5, 5);
        assert_eq!(b.count_ones(), 2);
    }

    #[test]
    fn for_hits_marks_non_zero_slots() {
        let b = Bitmap::for_hits(&[0, 3, 0, 1]);
        assert_eq!(b.iter().collect::<Vec<_>>(), vec![1, 3]);
        assert!(b.intersects(&Bitmap::from_iter([3])));
        assert!(!b.intersects(&Bitmap::from_iter([0, 2])));
    }
}
