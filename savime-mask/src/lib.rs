//! A bit mask over the positions of a dataset, as produced by comparisons and consumed by filters.
#![deny(missing_docs)]
mod fill;
mod iter;
mod logic;

use std::fmt::{Debug, Formatter};
use std::ops::Range;

use arrow_buffer::{BooleanBuffer, Buffer};
use itertools::Itertools;
use rayon::prelude::*;
use savime_error::{SavimeResult, savime_bail};

pub use iter::*;

/// Number of bits held by one backing word.
pub const WORD_BITS: usize = u64::BITS as usize;

/// A fixed length vector of bits stored in whole `u64` words.
///
/// Storage is always a word aligned [`Buffer`] starting at bit zero, and bits past `len` in the
/// last word are kept clear, so word level operations never need to special case the tail. The
/// buffer is reference counted, which makes clones cheap.
#[derive(Clone)]
pub struct BitMask {
    buffer: BooleanBuffer,
}

impl BitMask {
    /// Create a mask where no bits are set.
    pub fn new_false(len: usize) -> Self {
        Self::from_words(vec![0; len.div_ceil(WORD_BITS)], len)
    }

    /// Create a mask where every bit is set.
    pub fn new_true(len: usize) -> Self {
        let mut words = vec![u64::MAX; len.div_ceil(WORD_BITS)];
        clear_tail(&mut words, len);
        Self::from_words(words, len)
    }

    /// Create a mask from a sorted or unsorted list of set positions.
    pub fn from_indices(len: usize, indices: impl IntoIterator<Item = usize>) -> SavimeResult<Self> {
        let mut words = vec![0u64; len.div_ceil(WORD_BITS)];
        for idx in indices {
            if idx >= len {
                savime_bail!(OutOfBounds: idx, 0, len);
            }
            words[idx / WORD_BITS] |= 1 << (idx % WORD_BITS);
        }
        Ok(Self::from_words(words, len))
    }

    /// Evaluate `f` for every position in parallel, splitting the words into `chunks` contiguous
    /// ranges so that each word is written by exactly one task.
    pub fn from_fn<F>(len: usize, chunks: usize, f: F) -> Self
    where
        F: Fn(usize) -> bool + Sync,
    {
        let mut words = vec![0u64; len.div_ceil(WORD_BITS)];
        let per_chunk = words_per_chunk(words.len(), chunks);
        words
            .par_chunks_mut(per_chunk)
            .enumerate()
            .for_each(|(chunk_idx, chunk)| {
                let first_word = chunk_idx * per_chunk;
                for (offset, word) in chunk.iter_mut().enumerate() {
                    let base = (first_word + offset) * WORD_BITS;
                    let end = (base + WORD_BITS).min(len);
                    let mut packed = 0u64;
                    for (bit, pos) in (base..end).enumerate() {
                        packed |= u64::from(f(pos)) << bit;
                    }
                    *word = packed;
                }
            });
        Self::from_words(words, len)
    }

    /// Wrap already packed words. Bits past `len` are cleared.
    pub fn from_words(mut words: Vec<u64>, len: usize) -> Self {
        words.resize(len.div_ceil(WORD_BITS), 0);
        clear_tail(&mut words, len);
        Self {
            buffer: BooleanBuffer::new(Buffer::from_vec(words), 0, len),
        }
    }

    /// Number of positions covered by the mask.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the mask covers no positions.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns the bit at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn value(&self, index: usize) -> bool {
        self.buffer.value(index)
    }

    /// The backing words, least significant bit first.
    #[inline]
    pub fn words(&self) -> &[u64] {
        self.buffer.inner().typed_data::<u64>()
    }

    /// Number of backing words.
    #[inline]
    pub fn word_count(&self) -> usize {
        self.len().div_ceil(WORD_BITS)
    }

    /// Number of set bits.
    pub fn true_count(&self) -> usize {
        self.buffer.count_set_bits()
    }

    /// Number of set bits within a range of words.
    pub fn true_count_in(&self, words: Range<usize>) -> usize {
        self.words()[words]
            .iter()
            .map(|w| w.count_ones() as usize)
            .sum()
    }

    /// The Arrow view of the mask.
    pub fn boolean_buffer(&self) -> &BooleanBuffer {
        &self.buffer
    }

    /// Collect the set positions into a vector.
    pub fn indices(&self) -> Vec<usize> {
        self.buffer.set_indices().collect_vec()
    }
}

impl From<BooleanBuffer> for BitMask {
    fn from(value: BooleanBuffer) -> Self {
        let len = value.len();
        let words = value
            .inner()
            .bit_chunks(value.offset(), len)
            .iter_padded()
            .collect_vec();
        Self::from_words(words, len)
    }
}

impl PartialEq for BitMask {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.words() == other.words()
    }
}

impl Eq for BitMask {}

impl Debug for BitMask {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitMask")
            .field("len", &self.len())
            .field("true_count", &self.true_count())
            .finish()
    }
}

/// Words handed to each task when `word_count` words are split into `chunks` contiguous runs.
pub fn words_per_chunk(word_count: usize, chunks: usize) -> usize {
    word_count.div_ceil(chunks.max(1)).max(1)
}

fn clear_tail(words: &mut [u64], len: usize) {
    let tail = len % WORD_BITS;
    if tail != 0 {
        if let Some(last) = words.last_mut() {
            *last &= (1u64 << tail) - 1;
        }
    }
}
