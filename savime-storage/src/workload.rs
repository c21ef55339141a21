use std::ops::Range;

use rayon::prelude::*;
use savime_error::{SavimeResult, savime_bail};

/// A static partition of `[0, len)` into contiguous ranges, one per worker.
///
/// With `threads` workers the range is cut into `threads` equal pieces, the last one taking the
/// remainder. When a piece would hold no more than `min_work` elements the whole range is handled
/// by a single worker instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    len: usize,
    ranges: Vec<Range<usize>>,
}

impl Workload {
    /// Partition `len` elements between at most `threads` workers.
    pub fn new(len: usize, threads: usize, min_work: usize) -> Self {
        Self::aligned(len, threads, min_work, 1)
    }

    /// Like [`Workload::new`], but every boundary except the end is a multiple of `alignment`.
    ///
    /// Kernels writing packed bits use this so that no two workers share a word.
    pub fn aligned(len: usize, threads: usize, min_work: usize, alignment: usize) -> Self {
        if len == 0 {
            return Self {
                len,
                ranges: Vec::new(),
            };
        }
        let threads = threads.max(1);
        let alignment = alignment.max(1);
        let chunk = ((len / alignment) / threads) * alignment;
        if threads == 1 || chunk <= min_work || chunk == 0 {
            return Self {
                len,
                ranges: vec![0..len],
            };
        }

        let ranges = (0..threads)
            .map(|t| {
                let start = t * chunk;
                let end = if t + 1 == threads { len } else { start + chunk };
                start..end
            })
            .collect();
        Self { len, ranges }
    }

    /// Total number of elements covered.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether there is nothing to do.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The ranges, in order.
    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    /// Number of workers the partition uses.
    pub fn threads(&self) -> usize {
        self.ranges.len().max(1)
    }

    /// Run `f` over every range in parallel.
    pub fn for_each<F>(&self, f: F) -> SavimeResult<()>
    where
        F: Fn(Range<usize>) -> SavimeResult<()> + Sync + Send,
    {
        self.ranges.par_iter().cloned().try_for_each(f)
    }

    /// Run `f` over every range in parallel and collect the results in range order.
    pub fn map<F, R>(&self, f: F) -> Vec<R>
    where
        F: Fn(Range<usize>) -> R + Sync + Send,
        R: Send,
    {
        self.ranges.par_iter().cloned().map(f).collect()
    }

    /// Cut `data` into the pieces matching each range, where every element of the partition
    /// covers `unit` consecutive elements of `data`. The last piece takes the rest of `data`,
    /// so its final unit may be partial.
    pub fn split_mut<'a, T>(
        &self,
        data: &'a mut [T],
        unit: usize,
    ) -> SavimeResult<Vec<(Range<usize>, &'a mut [T])>> {
        let required = self.len.checked_sub(1).map_or(0, |last| last * unit + 1);
        if data.len() < required {
            savime_bail!(
                "buffer of {} elements cannot hold {} units of {}",
                data.len(),
                self.len,
                unit
            );
        }
        let mut rest = data;
        let mut pieces = Vec::with_capacity(self.ranges.len());
        for (idx, range) in self.ranges.iter().enumerate() {
            let take = if idx + 1 == self.ranges.len() {
                rest.len()
            } else {
                range.len() * unit
            };
            let (head, tail) = rest.split_at_mut(take);
            pieces.push((range.clone(), head));
            rest = tail;
        }
        Ok(pieces)
    }
}

/// Split `range` between `threads` workers and run `f` on each piece in parallel.
pub fn parallel_for<F>(range: Range<usize>, threads: usize, min_work: usize, f: F) -> SavimeResult<()>
where
    F: Fn(Range<usize>) -> SavimeResult<()> + Sync + Send,
{
    let offset = range.start;
    Workload::new(range.len(), threads, min_work)
        .for_each(|r| f(r.start + offset..r.end + offset))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rstest::rstest;

    use super::*;

    fn assert_covers(workload: &Workload, len: usize) {
        let mut next = 0;
        for range in workload.ranges() {
            assert_eq!(range.start, next);
            assert!(range.end > range.start);
            next = range.end;
        }
        assert_eq!(next, len);
    }

    #[rstest]
    #[case(1000, 4, 100, 4)]
    #[case(1000, 4, 250, 1)]
    #[case(1003, 4, 10, 4)]
    #[case(50, 8, 100, 1)]
    #[case(7, 16, 0, 1)]
    #[case(1, 1, 0, 1)]
    fn partitions(
        #[case] len: usize,
        #[case] threads: usize,
        #[case] min_work: usize,
        #[case] expected: usize,
    ) {
        let workload = Workload::new(len, threads, min_work);
        assert_eq!(workload.ranges().len(), expected);
        assert_covers(&workload, len);
    }

    #[test]
    fn last_range_takes_remainder() {
        let workload = Workload::new(1003, 4, 10);
        assert_eq!(workload.ranges()[3], 750..1003);
    }

    #[test]
    fn empty_workload() {
        let workload = Workload::new(0, 4, 10);
        assert!(workload.ranges().is_empty());
        assert!(workload.for_each(|_| unreachable!()).is_ok());
    }

    #[rstest]
    #[case(10_000, 3)]
    #[case(640, 4)]
    #[case(6400, 7)]
    fn aligned_boundaries(#[case] len: usize, #[case] threads: usize) {
        let workload = Workload::aligned(len, threads, 0, 64);
        assert_covers(&workload, len);
        for range in &workload.ranges()[1..] {
            assert_eq!(range.start % 64, 0);
        }
    }

    #[test]
    fn split_mut_writes_each_position_once() {
        let mut data = vec![0usize; 2000];
        let workload = Workload::new(1000, 3, 10);
        workload
            .split_mut(&mut data, 2)
            .unwrap()
            .into_par_iter()
            .for_each(|(range, piece)| {
                for (i, slot) in piece.iter_mut().enumerate() {
                    *slot = range.start * 2 + i;
                }
            });
        assert!(data.iter().enumerate().all(|(i, v)| i == *v));
        assert!(workload.split_mut(&mut data[..10], 2).is_err());
    }

    #[test]
    fn parallel_for_offsets_ranges() {
        let seen = AtomicUsize::new(0);
        parallel_for(100..1100, 4, 10, |r| {
            assert!(r.start >= 100 && r.end <= 1100);
            seen.fetch_add(r.len(), Ordering::Relaxed);
            Ok(())
        })
        .unwrap();
        assert_eq!(seen.load(Ordering::Relaxed), 1000);
    }
}
