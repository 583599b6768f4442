use glam::DVec3;

/// Axis-aligned box. Containment is inclusive at the low faces and exclusive
/// at the high faces, matching tile volumes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    pub fn new(a: DVec3, b: DVec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Smallest box around the points, or `None` when there are none.
    pub fn from_points<I: IntoIterator<Item = DVec3>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;

        Some(iter.fold(Self { min: first, max: first }, |acc, p| Self {
            min: acc.min.min(p),
            max: acc.max.max(p),
        }))
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    /// Centre of the bottom face (UTM altitude is z).
    pub fn bottom_center(&self) -> DVec3 {
        let c = self.center();
        DVec3::new(c.x, c.y, self.min.z)
    }

    pub fn contains(&self, p: DVec3) -> bool {
        p.cmpge(self.min).all() && p.cmplt(self.max).all()
    }

    /// Moves the upper corner by `offset` on every axis.
    pub fn offset_max(&self, offset: f64) -> Aabb {
        Aabb {
            min: self.min,
            max: self.max + DVec3::splat(offset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_points_and_union() {
        assert!(Aabb::from_points(std::iter::empty()).is_none());

        let a = Aabb::from_points([DVec3::new(1.0, 5.0, 2.0), DVec3::new(3.0, 0.0, 4.0)]).unwrap();
        assert_eq!(a.min, DVec3::new(1.0, 0.0, 2.0));
        assert_eq!(a.max, DVec3::new(3.0, 5.0, 4.0));

        let b = Aabb::new(DVec3::splat(10.0), DVec3::splat(8.0));
        let u = a.union(&b);
        assert_eq!(u.min, DVec3::new(1.0, 0.0, 2.0));
        assert_eq!(u.max, DVec3::splat(10.0));
        assert_eq!(u.bottom_center(), DVec3::new(5.5, 5.0, 2.0));
    }

    #[test]
    fn test_contains_is_half_open() {
        let b = Aabb::new(DVec3::ZERO, DVec3::splat(10.0));
        assert!(b.contains(DVec3::ZERO));
        assert!(!b.contains(DVec3::new(10.0, 1.0, 1.0)));
    }
}
