use std::ops::Range;

use crate::{BitMask, WORD_BITS};

/// Iterator over the set positions of a range of words of a [`BitMask`].
pub struct SetBits<'a> {
    words: &'a [u64],
    word_idx: usize,
    current: u64,
}

impl Iterator for SetBits<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        while self.current == 0 {
            self.word_idx += 1;
            self.current = *self.words.get(self.word_idx)?;
        }
        let bit = self.current.trailing_zeros() as usize;
        self.current &= self.current - 1;
        Some(self.word_idx * WORD_BITS + bit)
    }
}

impl BitMask {
    /// Iterate the absolute set positions inside the given words.
    ///
    /// Used to scatter the set positions of disjoint word ranges in parallel.
    pub fn set_indices_in(&self, words: Range<usize>) -> SetBits<'_> {
        let all = &self.words()[..words.end];
        SetBits {
            words: all,
            word_idx: words.start,
            current: all.get(words.start).copied().unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;

    #[test]
    fn iterates_word_ranges() {
        let mask = BitMask::from_indices(300, [0, 5, 63, 64, 190, 299]).unwrap();
        assert_eq!(mask.set_indices_in(0..1).collect_vec(), vec![0, 5, 63]);
        assert_eq!(mask.set_indices_in(1..3).collect_vec(), vec![64, 190]);
        assert_eq!(mask.set_indices_in(4..5).collect_vec(), vec![299]);
        assert_eq!(
            mask.set_indices_in(0..mask.word_count()).collect_vec(),
            mask.indices()
        );
        assert_eq!(mask.set_indices_in(2..2).count(), 0);
    }
}
