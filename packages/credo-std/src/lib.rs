use serde::{Deserialize, Serialize};

/// Number of 64-bit words backing a [`LessonBitmap`].
pub const BITMAP_WORDS: usize = 4;

/// Lesson ceiling. Courses are bounded to this width at configuration
/// time; growing it is a breaking change to the on-chain layout.
pub const MAX_LESSONS: usize = BITMAP_WORDS * 64;

/// Fixed-width completion bitmap: bit `i` means "lesson `i` completed".
///
/// Bits are only ever set, never cleared, so every operation on a record's
/// bitmap is monotonic. Setting a bit that is already set is a no-op.
#[derive(Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct LessonBitmap([u64; BITMAP_WORDS]);

impl LessonBitmap {
    pub const fn new() -> Self {
        Self([0; BITMAP_WORDS])
    }

    pub const fn from_words(words: [u64; BITMAP_WORDS]) -> Self {
        Self(words)
    }

    pub const fn words(&self) -> &[u64; BITMAP_WORDS] {
        &self.0
    }

    /// Sets bit `index`. An index at or past [`MAX_LESSONS`] is a
    /// programming-contract violation, not a recoverable error.
    pub fn set(&mut self, index: usize) {
        assert!(index < MAX_LESSONS, "lesson index {index} out of range");
        self.0[index / 64] |= 1 << (index % 64);
    }

    pub fn is_set(&self, index: usize) -> bool {
        assert!(index < MAX_LESSONS, "lesson index {index} out of range");
        self.0[index / 64] & (1 << (index % 64)) != 0
    }

    /// Population count across all words.
    pub fn count(&self) -> u32 {
        self.0.iter().map(|word| word.count_ones()).sum()
    }

    /// Sorted indices of all set bits.
    pub fn indices(&self) -> Vec<usize> {
        (0..MAX_LESSONS).filter(|&i| self.is_set(i)).collect()
    }

    /// Bitwise union, used when merging a mirror record with another copy.
    pub fn union(&self, other: &Self) -> Self {
        let mut words = [0u64; BITMAP_WORDS];
        for (i, word) in words.iter_mut().enumerate() {
            *word = self.0[i] | other.0[i];
        }
        Self(words)
    }

    /// True when every bit set in `other` is also set in `self`.
    pub fn covers(&self, other: &Self) -> bool {
        self.union(other) == *self
    }
}
