//! Dense fixed-size bit vectors.
//!
//! [`BitMap`] backs the per-block dataflow sets (gen, kill, live-in, live-out) of the
//! register allocator: one bit per operand number, set operations word at a time.
//! [`BitMap2D`] is a row-major matrix of bits, used to record which operands occur in
//! which loops.

use std::fmt;

/// Bits per storage word.
const BITS_PER_WORD: usize = 64;

/// Log2 of bits per word, for shift-based division.
const LOG2_BITS_PER_WORD: u32 = 6;

/// Mask for extracting the bit index within a word.
const BIT_INDEX_MASK: usize = BITS_PER_WORD - 1;

#[inline(always)]
const fn word_count(bits: usize) -> usize {
    (bits + BIT_INDEX_MASK) >> LOG2_BITS_PER_WORD
}

// =============================================================================
// BitMap
// =============================================================================

/// A fixed-size bit vector.
///
/// Two maps compare equal when they have the same size and the same bits set.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct BitMap {
    words: Vec<u64>,
    len: usize,
}

impl BitMap {
    /// Create a map of `len` cleared bits.
    #[must_use]
    pub fn new(len: usize) -> Self {
        BitMap {
            words: vec![0; word_count(len)],
            len,
        }
    }

    /// Number of bits in the map.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the map has zero size.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether no bit is set.
    #[must_use]
    pub fn is_clear(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Test a bit. Indices past the end read as cleared.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> bool {
        if index >= self.len {
            return false;
        }
        (self.words[index >> LOG2_BITS_PER_WORD] >> (index & BIT_INDEX_MASK)) & 1 != 0
    }

    /// Set a bit.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn set(&mut self, index: usize) {
        assert!(index < self.len, "bit {index} out of bounds ({})", self.len);
        self.words[index >> LOG2_BITS_PER_WORD] |= 1 << (index & BIT_INDEX_MASK);
    }

    /// Clear a bit.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn clear(&mut self, index: usize) {
        assert!(index < self.len, "bit {index} out of bounds ({})", self.len);
        self.words[index >> LOG2_BITS_PER_WORD] &= !(1 << (index & BIT_INDEX_MASK));
    }

    /// Clear every bit.
    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    /// Copy the bits of `other` into `self`. Both maps must have the same size.
    pub fn set_from(&mut self, other: &BitMap) {
        debug_assert_eq!(self.len, other.len, "bit map sizes differ");
        self.words.copy_from_slice(&other.words);
    }

    /// `self |= other`. Returns `true` if any bit changed.
    pub fn set_union(&mut self, other: &BitMap) -> bool {
        debug_assert_eq!(self.len, other.len, "bit map sizes differ");
        let mut changed = false;
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            let next = *w | *o;
            changed |= next != *w;
            *w = next;
        }
        changed
    }

    /// `self &= !other`.
    pub fn set_difference(&mut self, other: &BitMap) {
        debug_assert_eq!(self.len, other.len, "bit map sizes differ");
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w &= !*o;
        }
    }

    /// Number of set bits.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Index of the first set bit at or after `from`.
    #[must_use]
    pub fn next_set_bit(&self, from: usize) -> Option<usize> {
        if from >= self.len {
            return None;
        }
        let mut word_index = from >> LOG2_BITS_PER_WORD;
        let mut word = self.words[word_index] & (!0u64 << (from & BIT_INDEX_MASK));
        loop {
            if word != 0 {
                let index = (word_index << LOG2_BITS_PER_WORD) + word.trailing_zeros() as usize;
                return (index < self.len).then_some(index);
            }
            word_index += 1;
            if word_index >= self.words.len() {
                return None;
            }
            word = self.words[word_index];
        }
    }

    /// Iterate the indices of set bits in ascending order.
    pub fn iter(&self) -> SetBits<'_> {
        SetBits { map: self, next: 0 }
    }
}

impl fmt::Debug for BitMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for BitMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Iterator over the set bits of a [`BitMap`].
pub struct SetBits<'a> {
    map: &'a BitMap,
    next: usize,
}

impl Iterator for SetBits<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let index = self.map.next_set_bit(self.next)?;
        self.next = index + 1;
        Some(index)
    }
}

impl<'a> IntoIterator for &'a BitMap {
    type Item = usize;
    type IntoIter = SetBits<'a>;

    fn into_iter(self) -> SetBits<'a> {
        self.iter()
    }
}

// =============================================================================
// BitMap2D
// =============================================================================

/// A `rows x cols` matrix of bits stored row-major in a single [`BitMap`].
#[derive(Clone, Debug, Default)]
pub struct BitMap2D {
    bits: BitMap,
    rows: usize,
    cols: usize,
}

impl BitMap2D {
    /// Create a cleared matrix.
    #[must_use]
    pub fn new(rows: usize, cols: usize) -> Self {
        BitMap2D {
            bits: BitMap::new(rows * cols),
            rows,
            cols,
        }
    }

    /// Number of rows.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Test a bit. Out-of-range coordinates read as cleared.
    #[must_use]
    pub fn at(&self, row: usize, col: usize) -> bool {
        row < self.rows && col < self.cols && self.bits.get(row * self.cols + col)
    }

    /// Set a bit.
    ///
    /// # Panics
    ///
    /// Panics if the coordinates are out of range.
    pub fn set(&mut self, row: usize, col: usize) {
        assert!(row < self.rows && col < self.cols, "({row}, {col}) out of range");
        self.bits.set(row * self.cols + col);
    }
}
