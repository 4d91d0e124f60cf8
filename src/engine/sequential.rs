use crate::engine::Engine;

/// [`Engine`] running every pass on the calling thread.
///
/// This is the reference backend: every other engine must produce the same
/// results for the same inputs.
#[derive(Clone, Copy, Default, Debug)]
pub struct Sequential;

impl Engine for Sequential {
    #[inline]
    fn parallel_for<F>(&self, len: usize, body: F)
    where
        F: Fn(usize) + Sync,
    {
        for i in 0..len {
            body(i);
        }
    }

    #[inline]
    fn map<R, F>(&self, len: usize, body: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Sync,
    {
        (0..len).map(body).collect()
    }

    #[inline]
    fn for_each<T, F>(&self, items: Vec<T>, body: F)
    where
        T: Send,
        F: Fn(usize, T) + Sync,
    {
        for (i, item) in items.into_iter().enumerate() {
            body(i, item);
        }
    }

    #[inline]
    fn reduce<T, R, M, C>(&self, view: &[T], identity: R, map: M, combine: C) -> R
    where
        T: Sync,
        R: Copy + Send + Sync,
        M: Fn(&T) -> R + Sync,
        C: Fn(R, R) -> R + Sync,
    {
        view.iter().map(map).fold(identity, combine)
    }

    #[inline]
    fn fill<T>(&self, view: &mut [T], value: T)
    where
        T: Copy + Send + Sync,
    {
        view.fill(value);
    }

    #[inline]
    fn sort_by_key<T, K, F>(&self, view: &mut [T], key: F)
    where
        T: Send,
        K: Ord + Send,
        F: Fn(&T) -> K + Sync,
    {
        view.sort_by_key(key);
    }

    #[inline]
    fn exclusive_prefix_sum(&self, view: &mut [u32]) {
        let mut total = 0;
        for value in view.iter_mut() {
            let current = *value;
            *value = total;
            total += current;
        }
    }
}
