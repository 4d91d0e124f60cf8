pub use ultraviolet::DVec3;

/// An axis-aligned bounding box with `f64` corners.
///
/// The [`Default`] value is the *empty* box, whose minimum corner is `+∞` and
/// maximum corner is `−∞`. The empty box is the identity of [`union`], so
/// reductions over arbitrary collections of boxes can start from it without
/// special-casing the first element.
///
/// [`union`]: BoundingBox::union
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    /// Minimum corner of the box.
    pub min: DVec3,
    /// Maximum corner of the box.
    pub max: DVec3,
}

impl Default for BoundingBox {
    #[inline]
    fn default() -> Self {
        Self::new(
            DVec3::broadcast(f64::INFINITY),
            DVec3::broadcast(f64::NEG_INFINITY),
        )
    }
}

impl BoundingBox {
    /// Creates a new [`BoundingBox`] with the given min and max corners.
    #[inline]
    pub const fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// Creates a new [`BoundingBox`] covering a single point.
    #[inline]
    pub const fn from_point(point: DVec3) -> Self {
        Self::new(point, point)
    }

    /// Returns the smallest box containing both `self` and `rhs`.
    #[inline]
    pub fn union(self, rhs: Self) -> Self {
        Self::new(
            self.min.min_by_component(rhs.min),
            self.max.max_by_component(rhs.max),
        )
    }

    /// Extends the box so that it contains `rhs`.
    #[inline]
    pub fn expand(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }

    /// Returns the center of the box.
    #[inline]
    pub fn centroid(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    /// Returns true if the point lies inside the box, boundary included.
    #[inline]
    pub fn contains(&self, point: DVec3) -> bool {
        self.min.x <= point.x
            && point.x <= self.max.x
            && self.min.y <= point.y
            && point.y <= self.max.y
            && self.min.z <= point.z
            && point.z <= self.max.z
    }

    /// Returns true if the two boxes overlap, shared boundaries included.
    #[inline]
    pub fn intersects(&self, rhs: &Self) -> bool {
        self.min.x <= rhs.max.x
            && rhs.min.x <= self.max.x
            && self.min.y <= rhs.max.y
            && rhs.min.y <= self.max.y
            && self.min.z <= rhs.max.z
            && rhs.min.z <= self.max.z
    }

    /// Returns the Euclidean distance from the point to the nearest face of
    /// the box, or zero if the point lies inside it.
    #[inline]
    pub fn distance(&self, point: DVec3) -> f64 {
        let clamped = point.max_by_component(self.min).min_by_component(self.max);
        (point - clamped).mag()
    }
}
