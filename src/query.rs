use crate::{
    engine::{last_element, Engine},
    geometry::{BoundingBox, DVec3},
    tree::{traversal, Bvh},
};

/// Region test of a spatial query against a bounding box.
///
/// A predicate is evaluated against both internal-node and leaf boxes
/// during traversal, so it must be conservative: if any point of a box
/// region matches, the box matches.
pub trait Spatial {
    /// Returns true if the query region overlaps the given box.
    fn overlaps(&self, bounds: &BoundingBox) -> bool;
}

/// Spatial predicate matching the indexed boxes that overlap the target
/// box, shared boundaries included.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Intersects(pub BoundingBox);

impl Spatial for Intersects {
    #[inline]
    fn overlaps(&self, bounds: &BoundingBox) -> bool {
        self.0.intersects(bounds)
    }
}

/// Spatial predicate matching the indexed boxes that contain the target
/// point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Contains(pub DVec3);

impl Spatial for Contains {
    #[inline]
    fn overlaps(&self, bounds: &BoundingBox) -> bool {
        bounds.contains(self.0)
    }
}

/// Spatial predicate matching the indexed boxes that lie within `radius`
/// of `point`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Within {
    /// Center of the search ball.
    pub point: DVec3,
    /// Radius of the search ball.
    pub radius: f64,
}

impl Spatial for Within {
    #[inline]
    fn overlaps(&self, bounds: &BoundingBox) -> bool {
        bounds.distance(self.point) <= self.radius
    }
}

/// Nearest query: the `k` indexed boxes closest to `point` by
/// point-to-box distance.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Nearest {
    /// Query point.
    pub point: DVec3,
    /// Number of neighbours requested. May exceed the number of indexed
    /// boxes, in which case the surplus result slots keep their sentinels.
    pub k: usize,
}

impl Nearest {
    /// Creates a new [`Nearest`] query.
    #[inline]
    pub const fn new(point: DVec3, k: usize) -> Self {
        Self { point, k }
    }
}

impl Bvh {
    /// Answers a batch of spatial queries, one result segment per query in
    /// CSR layout.
    ///
    /// `offset` is rewritten to length `Q + 1`: query `i` owns the result
    /// slots `offset[i]..offset[i + 1]` of `indices` and `offset[Q]` is the
    /// grand total. `indices` holds original input indices. Both passes of
    /// the protocol traverse on `engine`, one query per task.
    pub fn query<E, P>(
        &self,
        engine: &E,
        queries: &[P],
        indices: &mut Vec<i32>,
        offset: &mut Vec<u32>,
    ) where
        E: Engine,
        P: Spatial + Sync,
    {
        let n_queries = queries.len();
        offset.clear();
        indices.clear();
        if self.is_empty() {
            offset.resize(n_queries + 1, 0);
            return;
        }

        // First pass counts the hits of every query.
        offset.extend(engine.map(n_queries, |i| traversal::spatial(self, &queries[i], |_| {})));
        offset.push(0);
        engine.fence();

        engine.exclusive_prefix_sum(offset);
        let n_results = last_element(offset).unwrap_or(0) as usize;

        // Second pass re-traverses and writes each query's hits into its
        // segment.
        indices.resize(n_results, 0);
        engine.for_each(segments(indices, offset), |i, segment| {
            let mut cursor = 0;
            traversal::spatial(self, &queries[i], |index| {
                segment[cursor] = index;
                cursor += 1;
            });
            debug_assert_eq!(cursor, segment.len());
        });
        engine.fence();
    }

    /// Answers a batch of nearest queries in CSR layout.
    ///
    /// Query `i` owns `queries[i].k` slots; hits are written in ascending
    /// distance order (ties broken by ascending original index) and slots
    /// beyond the number of found neighbours keep the `-1` sentinel. Use
    /// [`compact`] to drop the sentinels afterwards if needed.
    pub fn query_nearest<E>(
        &self,
        engine: &E,
        queries: &[Nearest],
        indices: &mut Vec<i32>,
        offset: &mut Vec<u32>,
    ) where
        E: Engine,
    {
        let Some(n_results) = self.nearest_offsets(engine, queries, offset) else {
            indices.clear();
            return;
        };

        indices.resize(n_results, 0);
        engine.fill(indices, -1);
        engine.for_each(segments(indices, offset), |i, segment| {
            let mut cursor = 0;
            traversal::nearest(self, queries[i].point, queries[i].k, |index, _| {
                segment[cursor] = index;
                cursor += 1;
            });
        });
        engine.fence();
    }

    /// Same as [`Bvh::query_nearest`], additionally returning the distance
    /// of every hit. Sentinel slots hold `+∞`.
    pub fn query_nearest_with_distances<E>(
        &self,
        engine: &E,
        queries: &[Nearest],
        indices: &mut Vec<i32>,
        offset: &mut Vec<u32>,
        distances: &mut Vec<f64>,
    ) where
        E: Engine,
    {
        let Some(n_results) = self.nearest_offsets(engine, queries, offset) else {
            indices.clear();
            distances.clear();
            return;
        };

        indices.resize(n_results, 0);
        distances.resize(n_results, 0.0);
        engine.fill(indices, -1);
        engine.fill(distances, f64::INFINITY);

        let items: Vec<_> = segments(indices, offset)
            .into_iter()
            .zip(segments(distances, offset))
            .collect();
        engine.for_each(items, |i, (index_segment, distance_segment)| {
            let mut cursor = 0;
            traversal::nearest(self, queries[i].point, queries[i].k, |index, distance| {
                index_segment[cursor] = index;
                distance_segment[cursor] = distance;
                cursor += 1;
            });
        });
        engine.fence();
    }

    /// Offsets of a nearest batch: `k` slots per query, prefix-summed.
    /// Returns the total, or `None` for the empty hierarchy whose every
    /// query has an empty result set.
    fn nearest_offsets<E: Engine>(
        &self,
        engine: &E,
        queries: &[Nearest],
        offset: &mut Vec<u32>,
    ) -> Option<usize> {
        let n_queries = queries.len();
        offset.clear();
        if self.is_empty() {
            offset.resize(n_queries + 1, 0);
            return None;
        }

        offset.extend(engine.map(n_queries, |i| queries[i].k as u32));
        offset.push(0);
        engine.fence();

        engine.exclusive_prefix_sum(offset);
        Some(last_element(offset).unwrap_or(0) as usize)
    }
}

/// Splits the view into the per-query segments delimited by the offsets.
fn segments<'a, T>(mut view: &'a mut [T], offset: &[u32]) -> Vec<&'a mut [T]> {
    let mut result = Vec::with_capacity(offset.len().saturating_sub(1));
    for window in offset.windows(2) {
        let (segment, rest) = view.split_at_mut((window[1] - window[0]) as usize);
        result.push(segment);
        view = rest;
    }
    result
}

/// Removes the `-1` sentinel slots left by nearest queries that found
/// fewer than `k` neighbours, rewriting the offsets to match.
pub fn compact(indices: &mut Vec<i32>, offset: &mut [u32]) {
    let mut write = 0;
    for i in 0..offset.len().saturating_sub(1) {
        let (begin, end) = (offset[i] as usize, offset[i + 1] as usize);
        offset[i] = write as u32;
        for slot in begin..end {
            let index = indices[slot];
            if index != -1 {
                indices[write] = index;
                write += 1;
            }
        }
    }
    if let Some(total) = offset.last_mut() {
        *total = write as u32;
    }
    indices.truncate(write);
}

/// Same as [`compact`], keeping the distances aligned with the indices.
pub fn compact_with_distances(
    indices: &mut Vec<i32>,
    offset: &mut [u32],
    distances: &mut Vec<f64>,
) {
    let mut write = 0;
    for i in 0..offset.len().saturating_sub(1) {
        let (begin, end) = (offset[i] as usize, offset[i + 1] as usize);
        offset[i] = write as u32;
        for slot in begin..end {
            let index = indices[slot];
            if index != -1 {
                indices[write] = index;
                distances[write] = distances[slot];
                write += 1;
            }
        }
    }
    if let Some(total) = offset.last_mut() {
        *total = write as u32;
    }
    indices.truncate(write);
    distances.truncate(write);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::Sequential;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_boxes(rng: &mut StdRng, n: usize) -> Vec<BoundingBox> {
        (0..n)
            .map(|_| {
                let min = DVec3::new(
                    rng.gen_range(-50.0..50.0),
                    rng.gen_range(-50.0..50.0),
                    rng.gen_range(-50.0..50.0),
                );
                let size = DVec3::new(
                    rng.gen_range(0.0..8.0),
                    rng.gen_range(0.0..8.0),
                    rng.gen_range(0.0..8.0),
                );
                BoundingBox::new(min, min + size)
            })
            .collect()
    }

    fn random_point(rng: &mut StdRng) -> DVec3 {
        DVec3::new(
            rng.gen_range(-60.0..60.0),
            rng.gen_range(-60.0..60.0),
            rng.gen_range(-60.0..60.0),
        )
    }

    fn brute_force_spatial<P: Spatial>(boxes: &[BoundingBox], predicate: &P) -> Vec<i32> {
        boxes
            .iter()
            .enumerate()
            .filter(|(_, b)| predicate.overlaps(b))
            .map(|(i, _)| i as i32)
            .collect()
    }

    fn brute_force_nearest(boxes: &[BoundingBox], point: DVec3, k: usize) -> Vec<(i32, f64)> {
        let mut candidates: Vec<(i32, f64)> = boxes
            .iter()
            .enumerate()
            .map(|(i, b)| (i as i32, b.distance(point)))
            .collect();
        candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        candidates.truncate(k);
        candidates
    }

    fn sorted(mut values: Vec<i32>) -> Vec<i32> {
        values.sort_unstable();
        values
    }

    pub fn spatial_matches_brute_force<E: Engine>(engine: &E) {
        let mut rng = StdRng::seed_from_u64(1808);

        for n in [1, 2, 7, 64, 500] {
            let boxes = random_boxes(&mut rng, n);
            let bvh = Bvh::new(engine, &boxes);

            let targets: Vec<Intersects> = (0..20)
                .map(|_| {
                    let b = random_boxes(&mut rng, 1)[0];
                    Intersects(BoundingBox::new(b.min, b.max + DVec3::broadcast(10.0)))
                })
                .collect();

            let (mut indices, mut offset) = (Vec::new(), Vec::new());
            bvh.query(engine, &targets, &mut indices, &mut offset);

            assert_eq!(offset.len(), targets.len() + 1);
            for (i, target) in targets.iter().enumerate() {
                let segment = &indices[offset[i] as usize..offset[i + 1] as usize];
                assert_eq!(sorted(segment.to_vec()), brute_force_spatial(&boxes, target));
            }

            // Point containment and ball search against the same oracle.
            let contains: Vec<Contains> =
                (0..20).map(|_| Contains(random_point(&mut rng))).collect();
            bvh.query(engine, &contains, &mut indices, &mut offset);
            for (i, target) in contains.iter().enumerate() {
                let segment = &indices[offset[i] as usize..offset[i + 1] as usize];
                assert_eq!(sorted(segment.to_vec()), brute_force_spatial(&boxes, target));
            }

            let within: Vec<Within> = (0..20)
                .map(|_| Within {
                    point: random_point(&mut rng),
                    radius: rng.gen_range(0.0..40.0),
                })
                .collect();
            bvh.query(engine, &within, &mut indices, &mut offset);
            for (i, target) in within.iter().enumerate() {
                let segment = &indices[offset[i] as usize..offset[i + 1] as usize];
                assert_eq!(sorted(segment.to_vec()), brute_force_spatial(&boxes, target));
            }
        }
    }

    pub fn nearest_matches_brute_force<E: Engine>(engine: &E) {
        let mut rng = StdRng::seed_from_u64(42);

        for n in [1, 2, 7, 64, 500] {
            let boxes = random_boxes(&mut rng, n);
            let bvh = Bvh::new(engine, &boxes);

            let queries: Vec<Nearest> = (0..20)
                .map(|_| Nearest::new(random_point(&mut rng), rng.gen_range(0..12)))
                .collect();

            let (mut indices, mut offset, mut distances) = (Vec::new(), Vec::new(), Vec::new());
            bvh.query_nearest_with_distances(
                engine,
                &queries,
                &mut indices,
                &mut offset,
                &mut distances,
            );

            assert_eq!(offset.len(), queries.len() + 1);
            for (i, query) in queries.iter().enumerate() {
                let (begin, end) = (offset[i] as usize, offset[i + 1] as usize);
                assert_eq!(end - begin, query.k);

                let expected = brute_force_nearest(&boxes, query.point, query.k);
                for slot in 0..query.k {
                    if slot < expected.len() {
                        assert_eq!(indices[begin + slot], expected[slot].0);
                        assert_eq!(distances[begin + slot], expected[slot].1);
                    } else {
                        assert_eq!(indices[begin + slot], -1);
                        assert_eq!(distances[begin + slot], f64::INFINITY);
                    }
                }
            }
        }
    }

    pub fn matches_sequential<E: Engine>(engine: &E) {
        let mut rng = StdRng::seed_from_u64(7);
        let boxes = random_boxes(&mut rng, 300);

        let bvh = Bvh::new(engine, &boxes);
        let reference = Bvh::new(&Sequential, &boxes);

        let targets: Vec<Within> = (0..50)
            .map(|_| Within {
                point: random_point(&mut rng),
                radius: rng.gen_range(0.0..50.0),
            })
            .collect();

        let (mut indices, mut offset) = (Vec::new(), Vec::new());
        let (mut reference_indices, mut reference_offset) = (Vec::new(), Vec::new());
        bvh.query(engine, &targets, &mut indices, &mut offset);
        reference.query(
            &Sequential,
            &targets,
            &mut reference_indices,
            &mut reference_offset,
        );

        assert_eq!(offset, reference_offset);
        assert_eq!(indices, reference_indices);

        let queries: Vec<Nearest> = (0..50)
            .map(|_| Nearest::new(random_point(&mut rng), rng.gen_range(0..8)))
            .collect();

        bvh.query_nearest(engine, &queries, &mut indices, &mut offset);
        reference.query_nearest(
            &Sequential,
            &queries,
            &mut reference_indices,
            &mut reference_offset,
        );

        assert_eq!(offset, reference_offset);
        assert_eq!(indices, reference_indices);
    }

    #[test]
    fn spatial_queries_match_brute_force() {
        spatial_matches_brute_force(&Sequential);
    }

    #[test]
    fn nearest_queries_match_brute_force() {
        nearest_matches_brute_force(&Sequential);
    }

    #[test]
    fn batched_queries_are_idempotent() {
        let mut rng = StdRng::seed_from_u64(99);
        let boxes = random_boxes(&mut rng, 200);
        let bvh = Bvh::new(&Sequential, &boxes);

        let targets: Vec<Intersects> = boxes[..40].iter().copied().map(Intersects).collect();

        let (mut indices, mut offset) = (Vec::new(), Vec::new());
        bvh.query(&Sequential, &targets, &mut indices, &mut offset);
        let (first_indices, first_offset) = (indices.clone(), offset.clone());

        bvh.query(&Sequential, &targets, &mut indices, &mut offset);
        assert_eq!(indices, first_indices);
        assert_eq!(offset, first_offset);
    }

    #[test]
    fn offsets_sum_the_counts() {
        let mut rng = StdRng::seed_from_u64(5);
        let boxes = random_boxes(&mut rng, 128);
        let bvh = Bvh::new(&Sequential, &boxes);

        let targets: Vec<Within> = (0..30)
            .map(|_| Within {
                point: random_point(&mut rng),
                radius: rng.gen_range(0.0..60.0),
            })
            .collect();

        let (mut indices, mut offset) = (Vec::new(), Vec::new());
        bvh.query(&Sequential, &targets, &mut indices, &mut offset);

        let counts: u32 = targets
            .iter()
            .map(|t| brute_force_spatial(&boxes, t).len() as u32)
            .sum();
        assert_eq!(offset[targets.len()], counts);
        assert_eq!(indices.len() as u32, counts);
        assert!(offset.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn single_box_scenarios() {
        let bvh = Bvh::new(
            &Sequential,
            &[BoundingBox::new(DVec3::broadcast(0.0), DVec3::broadcast(1.0))],
        );

        let (mut indices, mut offset) = (Vec::new(), Vec::new());

        let inside = Intersects(BoundingBox::new(
            DVec3::broadcast(0.5),
            DVec3::broadcast(0.6),
        ));
        bvh.query(&Sequential, &[inside], &mut indices, &mut offset);
        assert_eq!(offset, [0, 1]);
        assert_eq!(indices, [0]);

        let outside = Intersects(BoundingBox::new(
            DVec3::broadcast(2.0),
            DVec3::broadcast(3.0),
        ));
        bvh.query(&Sequential, &[outside], &mut indices, &mut offset);
        assert_eq!(offset, [0, 0]);
        assert!(indices.is_empty());
    }

    #[test]
    fn empty_hierarchy_yields_empty_results() {
        let bvh = Bvh::new(&Sequential, &[]);
        let (mut indices, mut offset, mut distances) = (Vec::new(), Vec::new(), Vec::new());

        let targets = [Contains(DVec3::broadcast(0.0)); 3];
        bvh.query(&Sequential, &targets, &mut indices, &mut offset);
        assert_eq!(offset, [0, 0, 0, 0]);
        assert!(indices.is_empty());

        let queries = [Nearest::new(DVec3::broadcast(0.0), 5); 2];
        bvh.query_nearest_with_distances(
            &Sequential,
            &queries,
            &mut indices,
            &mut offset,
            &mut distances,
        );
        assert_eq!(offset, [0, 0, 0]);
        assert!(indices.is_empty());
        assert!(distances.is_empty());
    }

    #[test]
    fn four_corner_grid_nearest() {
        let half = DVec3::broadcast(0.1);
        let centers = [
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
            DVec3::new(1.0, 1.0, 0.0),
        ];
        let boxes: Vec<BoundingBox> = centers
            .iter()
            .map(|&c| BoundingBox::new(c - half, c + half))
            .collect();
        let bvh = Bvh::new(&Sequential, &boxes);

        let (mut indices, mut offset) = (Vec::new(), Vec::new());

        bvh.query_nearest(
            &Sequential,
            &[Nearest::new(DVec3::new(0.9, 0.1, 0.0), 1)],
            &mut indices,
            &mut offset,
        );
        assert_eq!(offset, [0, 1]);
        assert_eq!(indices, [1]);

        // All four corners are equidistant from the center; the two
        // smallest original indices win.
        bvh.query_nearest(
            &Sequential,
            &[Nearest::new(DVec3::new(0.5, 0.5, 0.0), 2)],
            &mut indices,
            &mut offset,
        );
        assert_eq!(offset, [0, 2]);
        assert_eq!(indices, [0, 1]);
    }

    #[test]
    fn overlapping_identical_boxes() {
        let b = BoundingBox::new(DVec3::broadcast(0.0), DVec3::broadcast(1.0));
        let bvh = Bvh::new(&Sequential, &[b; 3]);

        let (mut indices, mut offset) = (Vec::new(), Vec::new());
        bvh.query(&Sequential, &[Intersects(b)], &mut indices, &mut offset);

        assert_eq!(offset, [0, 3]);
        assert_eq!(sorted(indices), [0, 1, 2]);
    }

    #[test]
    fn co_located_boxes_all_found() {
        let b = BoundingBox::new(DVec3::broadcast(0.0), DVec3::broadcast(1.0));
        let bvh = Bvh::new(&Sequential, &[b; 8]);

        let (mut indices, mut offset) = (Vec::new(), Vec::new());
        bvh.query(
            &Sequential,
            &[Contains(DVec3::broadcast(0.5))],
            &mut indices,
            &mut offset,
        );

        assert_eq!(offset, [0, 8]);
        assert_eq!(sorted(indices), (0..8).collect::<Vec<i32>>());
    }

    #[test]
    fn k_larger_than_the_hierarchy() {
        let boxes: Vec<BoundingBox> = (0..3)
            .map(|i| {
                let x = 3.0 * f64::from(i);
                BoundingBox::new(DVec3::new(x, 0.0, 0.0), DVec3::new(x + 1.0, 1.0, 1.0))
            })
            .collect();
        let bvh = Bvh::new(&Sequential, &boxes);

        let (mut indices, mut offset, mut distances) = (Vec::new(), Vec::new(), Vec::new());
        bvh.query_nearest_with_distances(
            &Sequential,
            &[Nearest::new(DVec3::broadcast(0.0), 5)],
            &mut indices,
            &mut offset,
            &mut distances,
        );

        assert_eq!(offset, [0, 5]);
        assert_eq!(indices[..3], [0, 1, 2]);
        assert_eq!(indices[3..], [-1, -1]);
        assert!(distances[..3].windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(distances[3..], [f64::INFINITY, f64::INFINITY]);
    }

    #[test]
    fn compaction_drops_sentinels() {
        let boxes: Vec<BoundingBox> = (0..3)
            .map(|i| {
                let x = 3.0 * f64::from(i);
                BoundingBox::new(DVec3::new(x, 0.0, 0.0), DVec3::new(x + 1.0, 1.0, 1.0))
            })
            .collect();
        let bvh = Bvh::new(&Sequential, &boxes);

        let queries = [
            Nearest::new(DVec3::broadcast(0.0), 5),
            Nearest::new(DVec3::new(7.0, 0.0, 0.0), 2),
        ];
        let (mut indices, mut offset, mut distances) = (Vec::new(), Vec::new(), Vec::new());
        bvh.query_nearest_with_distances(
            &Sequential,
            &queries,
            &mut indices,
            &mut offset,
            &mut distances,
        );
        assert_eq!(offset, [0, 5, 7]);

        compact_with_distances(&mut indices, &mut offset, &mut distances);

        assert_eq!(offset, [0, 3, 5]);
        assert_eq!(indices.len(), 5);
        assert_eq!(distances.len(), 5);
        assert!(indices.iter().all(|&index| index != -1));
        assert!(distances.iter().all(|&distance| distance.is_finite()));
        assert_eq!(indices[..3], [0, 1, 2]);
    }
}
