/// Engine running every pass on the calling thread.
pub mod sequential;

/// Engine distributing passes over the [rayon](https://github.com/rayon-rs/rayon)
/// thread pool.
#[cfg(feature = "parallel")]
pub mod parallel;

pub use sequential::Sequential;

#[cfg(feature = "parallel")]
pub use parallel::Parallel;

/// Bulk-parallel execution capability used by the construction passes and
/// batched queries.
///
/// Every pass of the hierarchy build and of the two-pass query protocol is
/// expressed through these primitives, so swapping the engine swaps the
/// execution backend without touching the algorithms. The two provided
/// engines are [`Sequential`] and, behind the `parallel` feature,
/// [`Parallel`].
///
/// Implementations may run `body` on any thread and in any order, but every
/// method completes all of its work before returning.
pub trait Engine: Sync {
    /// Runs `body` for every index in `0..len`.
    ///
    /// The body has no write access to shared data; passes that scatter use
    /// atomics or [`Engine::for_each`] instead.
    fn parallel_for<F>(&self, len: usize, body: F)
    where
        F: Fn(usize) + Sync + Send;

    /// Collects `body(i)` for every index in `0..len`.
    fn map<R, F>(&self, len: usize, body: F) -> Vec<R>
    where
        R: Send,
        F: Fn(usize) -> R + Sync + Send;

    /// Distributes the owned items to tasks, running `body` on each item
    /// with its index.
    fn for_each<T, F>(&self, items: Vec<T>, body: F)
    where
        T: Send,
        F: Fn(usize, T) + Sync;

    /// Folds `map(element)` over the view with `combine`, starting from
    /// `identity`.
    ///
    /// `combine` must be associative and commutative with `identity` as its
    /// identity element; the combination order is unspecified.
    fn reduce<T, R, M, C>(&self, view: &[T], identity: R, map: M, combine: C) -> R
    where
        T: Sync,
        R: Copy + Send + Sync,
        M: Fn(&T) -> R + Sync,
        C: Fn(R, R) -> R + Sync;

    /// Sets every element of the view to `value`.
    fn fill<T>(&self, view: &mut [T], value: T)
    where
        T: Copy + Send + Sync;

    /// Stable sort of the view by the given key. Elements with equal keys
    /// keep their relative order.
    fn sort_by_key<T, K, F>(&self, view: &mut [T], key: F)
    where
        T: Send,
        K: Ord + Send,
        F: Fn(&T) -> K + Sync;

    /// In-place exclusive prefix sum: `view[i]` becomes the sum of the
    /// elements that preceded it, so the last element ends up holding the
    /// total of all elements but the original last.
    fn exclusive_prefix_sum(&self, view: &mut [u32]);

    /// Synchronization point between passes.
    ///
    /// The CPU engines complete each pass before returning, so this is a
    /// no-op; an accelerator engine would wait for outstanding device work
    /// here.
    #[inline]
    fn fence(&self) {}
}

/// Returns the last element of the view, if any.
#[inline]
pub fn last_element<T: Copy>(view: &[T]) -> Option<T> {
    view.last().copied()
}
