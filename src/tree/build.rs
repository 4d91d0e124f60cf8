use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::{
    engine::Engine,
    geometry::BoundingBox,
    morton,
    tree::{Bvh, Node},
};

/// Builds the hierarchy in five bulk passes: scene bound, Morton codes,
/// sort permutation, internal-node linking and bottom-up box aggregation.
pub(crate) fn build<E: Engine>(engine: &E, boxes: &[BoundingBox]) -> Bvh {
    let n = boxes.len();
    if n == 0 {
        return Bvh {
            leaf_nodes: Vec::new(),
            internal_nodes: Vec::new(),
            indices: Vec::new(),
        };
    }

    // Scene bound of the whole input.
    let scene = engine.reduce(boxes, BoundingBox::default(), |b| *b, BoundingBox::union);
    engine.fence();

    // Morton code of every box centroid within the scene bound.
    let codes = engine.map(n, |i| morton::code(&scene, boxes[i].centroid()));
    engine.fence();

    // Permutation stably sorting the leaves by code; equal codes keep their
    // input order.
    let mut indices: Vec<i32> = (0..n as i32).collect();
    engine.sort_by_key(&mut indices, |&index| codes[index as usize]);
    engine.fence();

    let sorted_codes = engine.map(n, |i| codes[indices[i] as usize]);
    let leaf_nodes = engine.map(n, |i| Node::leaf(boxes[indices[i] as usize]));
    engine.fence();

    if n == 1 {
        return Bvh {
            leaf_nodes,
            internal_nodes: Vec::new(),
            indices,
        };
    }

    // Karras linking: every internal node finds its children independently,
    // recording parent pointers for the aggregation pass.
    let parents: Vec<AtomicU32> = engine.map(2 * n - 1, |_| AtomicU32::new(0));
    let mut internal_nodes = engine.map(n - 1, |i| link_node(&sorted_codes, &parents, i as i32));
    engine.fence();

    // Bottom-up box aggregation: each leaf ascends through the parent
    // pointers; at every internal node the first arrival parks and the
    // second, which sees both children final, unions them and continues.
    // Exactly one ascent reaches the root.
    let counters: Vec<AtomicU32> = engine.map(n - 1, |_| AtomicU32::new(0));
    {
        let shared = SharedNodes::new(&mut internal_nodes);
        let leaf_offset = n - 1;

        engine.parallel_for(n, |leaf| {
            let mut node = parents[leaf_offset + leaf].load(Ordering::Relaxed) as usize;
            loop {
                if counters[node].fetch_add(1, Ordering::AcqRel) == 0 {
                    return;
                }

                // SAFETY: the counter handshake above makes this thread the
                // only one reaching `node`; the acquire on the second
                // arrival orders both child boxes before this read.
                let (left, right) = unsafe { shared.read(node) }.children;
                let bounding_box = child_box(&shared, &leaf_nodes, leaf_offset, left)
                    .union(child_box(&shared, &leaf_nodes, leaf_offset, right));
                // SAFETY: same exclusive access as above.
                unsafe { shared.write_bounding_box(node, bounding_box) };

                if node == 0 {
                    return;
                }
                node = parents[node].load(Ordering::Relaxed) as usize;
            }
        });
    }
    engine.fence();

    Bvh {
        leaf_nodes,
        internal_nodes,
        indices,
    }
}

/// Bounding box of a child in the combined node address space.
#[inline]
fn child_box(shared: &SharedNodes, leaves: &[Node], leaf_offset: usize, child: i32) -> BoundingBox {
    let child = child as usize;
    if child >= leaf_offset {
        leaves[child - leaf_offset].bounding_box
    } else {
        // SAFETY: an internal child's box is written before its writer
        // releases the counter of the node currently held by this thread.
        unsafe { shared.read(child) }.bounding_box
    }
}

/// Length of the common prefix of the Morton codes at leaf positions `a`
/// and `b`, or -1 when `b` is out of range.
///
/// Equal codes fall back to the positions themselves so that duplicate
/// codes still split into a proper tree.
#[inline]
fn common_prefix(codes: &[u32], a: i32, b: i32) -> i32 {
    if b < 0 || b >= codes.len() as i32 {
        return -1;
    }

    let (code_a, code_b) = (codes[a as usize], codes[b as usize]);
    if code_a == code_b {
        32 + ((a ^ b) as u32).leading_zeros() as i32
    } else {
        (code_a ^ code_b).leading_zeros() as i32
    }
}

/// Determines the children of internal node `i` from the sorted Morton
/// codes and records `i` as the parent of both.
///
/// The bounding box is left empty; the aggregation pass fills it in.
fn link_node(codes: &[u32], parents: &[AtomicU32], i: i32) -> Node {
    let leaf_offset = codes.len() as i32 - 1;
    debug_assert!(0 <= i && i < leaf_offset);

    // Direction of the covered range: towards the neighbour sharing the
    // longer prefix.
    let d = if common_prefix(codes, i, i + 1) > common_prefix(codes, i, i - 1) {
        1
    } else {
        -1
    };
    let delta_min = common_prefix(codes, i, i - d);

    // Exponential probe for an upper bound on the range length, then a
    // binary search for the exact length.
    let mut length_max = 2;
    while common_prefix(codes, i, i + length_max * d) > delta_min {
        length_max <<= 1;
    }

    let mut length = 0;
    let mut step = length_max >> 1;
    while step > 0 {
        if common_prefix(codes, i, i + (length + step) * d) > delta_min {
            length += step;
        }
        step >>= 1;
    }
    let j = i + length * d;

    // Binary search for the split position: the last leaf of the left
    // subrange, where the prefix grows past the range's own.
    let delta_node = common_prefix(codes, i, j);
    let mut split = 0;
    let mut step = length;
    loop {
        step = (step + 1) >> 1;
        if common_prefix(codes, i, i + (split + step) * d) > delta_node {
            split += step;
        }
        if step <= 1 {
            break;
        }
    }
    let pivot = i + split * d + d.min(0);

    // A subrange of one leaf is a leaf child, offset into the combined
    // address space; anything longer is the internal node at the boundary.
    let left = if i.min(j) == pivot {
        pivot + leaf_offset
    } else {
        pivot
    };
    let right = if i.max(j) == pivot + 1 {
        pivot + 1 + leaf_offset
    } else {
        pivot + 1
    };

    parents[left as usize].store(i as u32, Ordering::Relaxed);
    parents[right as usize].store(i as u32, Ordering::Relaxed);

    Node {
        bounding_box: BoundingBox::default(),
        children: (left, right),
    }
}

/// Mutable view of the internal nodes shared across the aggregation pass.
///
/// The per-node counters hand each internal node to exactly one thread
/// after both of its children are final, so the unsafe accessors are never
/// called concurrently for the same node.
struct SharedNodes<'a> {
    ptr: *mut Node,
    len: usize,
    _marker: PhantomData<&'a mut [Node]>,
}

// SAFETY: every access goes through the meeting-point counters; see above.
unsafe impl Sync for SharedNodes<'_> {}

impl<'a> SharedNodes<'a> {
    fn new(nodes: &'a mut [Node]) -> Self {
        Self {
            ptr: nodes.as_mut_ptr(),
            len: nodes.len(),
            _marker: PhantomData,
        }
    }

    /// SAFETY: the caller must hold `index` exclusively.
    unsafe fn read(&self, index: usize) -> Node {
        debug_assert!(index < self.len);
        *self.ptr.add(index)
    }

    /// SAFETY: the caller must hold `index` exclusively.
    unsafe fn write_bounding_box(&self, index: usize, bounding_box: BoundingBox) {
        debug_assert!(index < self.len);
        (*self.ptr.add(index)).bounding_box = bounding_box;
    }
}
