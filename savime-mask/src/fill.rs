use std::ops::Range;

use rayon::prelude::*;
use savime_error::{SavimeResult, savime_bail};

use crate::{BitMask, WORD_BITS, words_per_chunk};

impl BitMask {
    /// Build a mask whose bits repeat with a fixed period.
    ///
    /// A position `p` takes the value `inside` when `p % period` falls in `run` and `!inside`
    /// otherwise. Each task fills its own contiguous words with the background value and then
    /// writes only the runs that intersect them, so the work is proportional to the number of
    /// words plus the number of periods rather than to `len`.
    pub fn from_periodic_run(
        len: usize,
        period: usize,
        run: Range<usize>,
        inside: bool,
        chunks: usize,
    ) -> SavimeResult<Self> {
        if period == 0 {
            savime_bail!("periodic mask requires a non-zero period");
        }
        if run.end > period || run.start > run.end {
            savime_bail!(
                "run {}..{} does not fit in a period of {}",
                run.start,
                run.end,
                period
            );
        }

        let background = if inside { 0 } else { u64::MAX };
        let mut words = vec![background; len.div_ceil(WORD_BITS)];
        let per_chunk = words_per_chunk(words.len(), chunks);
        if !run.is_empty() {
            words
                .par_chunks_mut(per_chunk)
                .enumerate()
                .for_each(|(chunk_idx, chunk)| {
                    let base = chunk_idx * per_chunk * WORD_BITS;
                    let end = (base + chunk.len() * WORD_BITS).min(len);
                    let first_copy = base / period;
                    let last_copy = end.saturating_sub(1) / period;
                    for copy in first_copy..=last_copy {
                        let offset = copy * period;
                        fill_range(
                            chunk,
                            base,
                            offset + run.start..(offset + run.end).min(len),
                            inside,
                        );
                    }
                });
        }
        Ok(Self::from_words(words, len))
    }

    /// Return a copy of this mask with the positions in `range` set to `value`.
    pub fn with_range(&self, range: Range<usize>, value: bool) -> SavimeResult<Self> {
        if range.end > self.len() {
            savime_bail!(OutOfBounds: range.end, 0, self.len());
        }
        let mut words = self.words().to_vec();
        fill_range(&mut words, 0, range, value);
        Ok(Self::from_words(words, self.len()))
    }
}

/// Set or clear the absolute bit range `bits` within `words`, where `words[0]` holds bit
/// `base`. Parts of the range outside the slice are ignored.
pub(crate) fn fill_range(words: &mut [u64], base: usize, bits: Range<usize>, value: bool) {
    let lo = bits.start.max(base);
    let hi = bits.end.min(base + words.len() * WORD_BITS);
    if lo >= hi {
        return;
    }
    let (lo, hi) = (lo - base, hi - base);
    let first_word = lo / WORD_BITS;
    let last_word = (hi - 1) / WORD_BITS;
    for (idx, word) in words[first_word..=last_word].iter_mut().enumerate() {
        let w = first_word + idx;
        let from = if w == first_word { lo % WORD_BITS } else { 0 };
        let to = if w == last_word {
            (hi - 1) % WORD_BITS + 1
        } else {
            WORD_BITS
        };
        let mask = if to - from == WORD_BITS {
            u64::MAX
        } else {
            ((1u64 << (to - from)) - 1) << from
        };
        if value {
            *word |= mask;
        } else {
            *word &= !mask;
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn naive(len: usize, period: usize, run: Range<usize>, inside: bool) -> BitMask {
        BitMask::from_fn(len, 1, |p| run.contains(&(p % period)) == inside)
    }

    #[rstest]
    #[case(20, 10, 0..2, true)]
    #[case(20, 10, 4..6, false)]
    #[case(1000, 100, 0..37, true)]
    #[case(1000, 7, 3..4, true)]
    #[case(4096, 128, 64..128, false)]
    #[case(130, 130, 0..130, true)]
    #[case(90, 30, 5..5, true)]
    fn periodic_matches_naive(
        #[case] len: usize,
        #[case] period: usize,
        #[case] run: Range<usize>,
        #[case] inside: bool,
        #[values(1, 2, 5)] chunks: usize,
    ) {
        let mask = BitMask::from_periodic_run(len, period, run.clone(), inside, chunks).unwrap();
        assert_eq!(mask, naive(len, period, run, inside));
    }

    #[test]
    fn periodic_rejects_bad_run() {
        assert!(BitMask::from_periodic_run(10, 0, 0..0, true, 1).is_err());
        assert!(BitMask::from_periodic_run(10, 5, 3..7, true, 1).is_err());
    }

    #[test]
    fn with_range_sets_bits() {
        let mask = BitMask::new_false(200).with_range(60..140, true).unwrap();
        assert_eq!(mask.true_count(), 80);
        assert!(!mask.value(59));
        assert!(mask.value(60));
        assert!(mask.value(139));
        assert!(!mask.value(140));
        let cleared = mask.with_range(64..128, false).unwrap();
        assert_eq!(cleared.true_count(), 16);
    }
}
