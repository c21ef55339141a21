use rayon::prelude::*;
use savime_error::{SavimeResult, savime_bail};

use crate::{BitMask, words_per_chunk};

impl BitMask {
    /// Bitwise AND of two masks of equal length.
    pub fn and(&self, other: &Self, chunks: usize) -> SavimeResult<Self> {
        self.zip_words(other, chunks, |l, r| l & r)
    }

    /// Bitwise OR of two masks of equal length.
    pub fn or(&self, other: &Self, chunks: usize) -> SavimeResult<Self> {
        self.zip_words(other, chunks, |l, r| l | r)
    }

    /// Bitwise complement.
    pub fn not(&self, chunks: usize) -> Self {
        let src = self.words();
        let mut words = vec![0u64; src.len()];
        let per_chunk = words_per_chunk(words.len(), chunks);
        words
            .par_chunks_mut(per_chunk)
            .zip(src.par_chunks(per_chunk))
            .for_each(|(out, input)| {
                out.iter_mut().zip(input).for_each(|(o, i)| *o = !i);
            });
        Self::from_words(words, self.len())
    }

    fn zip_words<F>(&self, other: &Self, chunks: usize, op: F) -> SavimeResult<Self>
    where
        F: Fn(u64, u64) -> u64 + Sync,
    {
        if self.len() != other.len() {
            savime_bail!(
                "bitmasks must have the same length, got {} and {}",
                self.len(),
                other.len()
            );
        }

        let (lhs, rhs) = (self.words(), other.words());
        let mut words = vec![0u64; lhs.len()];
        let per_chunk = words_per_chunk(words.len(), chunks);
        words
            .par_chunks_mut(per_chunk)
            .zip(lhs.par_chunks(per_chunk).zip(rhs.par_chunks(per_chunk)))
            .for_each(|(out, (l, r))| {
                for (o, (a, b)) in out.iter_mut().zip(l.iter().zip(r)) {
                    *o = op(*a, *b);
                }
            });
        Ok(Self::from_words(words, self.len()))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(1)]
    #[case(4)]
    fn logic_matches_elementwise(#[case] chunks: usize) {
        let a = BitMask::from_fn(500, 1, |i| i % 2 == 0);
        let b = BitMask::from_fn(500, 1, |i| i % 3 == 0);

        let and = a.and(&b, chunks).unwrap();
        let or = a.or(&b, chunks).unwrap();
        let not = a.not(chunks);

        for i in 0..500 {
            assert_eq!(and.value(i), i % 6 == 0);
            assert_eq!(or.value(i), i % 2 == 0 || i % 3 == 0);
            assert_eq!(not.value(i), i % 2 != 0);
        }
        assert_eq!(not.true_count(), 250);
    }

    #[test]
    fn length_mismatch() {
        let a = BitMask::new_true(10);
        let b = BitMask::new_true(11);
        assert!(a.and(&b, 1).is_err());
        assert!(a.or(&b, 1).is_err());
    }
}
