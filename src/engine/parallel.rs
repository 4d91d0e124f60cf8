use crate::engine::Engine;
use rayon::{
    iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator},
    slice::{ParallelSlice, ParallelSliceMut},
};

/// Chunk length of the two-phase parallel prefix sum.
const SCAN_CHUNK: usize = 1 << 13;

/// [`Engine`] distributing passes over the
/// [rayon](https://github.com/rayon-rs/rayon) thread pool.
#[derive(Clone, Copy, Default, Debug)]
pub struct Parallel;

impl Engine for Parallel {
    #[inline]
    fn parallel_for<F>(&self, len: usize, body: F)
    where
        F: Fn(usize) + Sync + Send,
    {
        (0..len).into_par_iter().for_each(body);
    }

    #[inline]
    fn map<R, F>(&self, len: usize, body: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Sync + Send,
    {
        (0..len).into_par_iter().map(body).collect()
    }

    #[inline]
    fn for_each<T, F>(&self, items: Vec<T>, body: F)
    where
        T: Send,
        F: Fn(usize, T) + Sync,
    {
        items
            .into_par_iter()
            .enumerate()
            .for_each(|(i, item)| body(i, item));
    }

    #[inline]
    fn reduce<T, R, M, C>(&self, view: &[T], identity: R, map: M, combine: C) -> R
    where
        T: Sync,
        R: Copy + Send + Sync,
        M: Fn(&T) -> R + Sync,
        C: Fn(R, R) -> R + Sync,
    {
        view.into_par_iter()
            .fold(|| identity, |folded, element| combine(folded, map(element)))
            .reduce(|| identity, &combine)
    }

    #[inline]
    fn fill<T>(&self, view: &mut [T], value: T)
    where
        T: Copy + Send + Sync,
    {
        view.into_par_iter().for_each(|element| *element = value);
    }

    #[inline]
    fn sort_by_key<T, K, F>(&self, view: &mut [T], key: F)
    where
        T: Send,
        K: Ord + Send,
        F: Fn(&T) -> K + Sync,
    {
        // `par_sort_by_key` is rayon's stable sort.
        view.par_sort_by_key(key);
    }

    fn exclusive_prefix_sum(&self, view: &mut [u32]) {
        // Two-phase chunked scan: per-chunk totals, a host scan of the
        // totals, then a rescan of each chunk from its base.
        let mut bases: Vec<u32> = view
            .par_chunks(SCAN_CHUNK)
            .map(|chunk| chunk.iter().sum())
            .collect();

        let mut total = 0;
        for base in bases.iter_mut() {
            let current = *base;
            *base = total;
            total += current;
        }

        view.par_chunks_mut(SCAN_CHUNK)
            .zip(bases)
            .for_each(|(chunk, base)| {
                let mut running = base;
                for value in chunk {
                    let current = *value;
                    *value = running;
                    running += current;
                }
            });
    }
}
