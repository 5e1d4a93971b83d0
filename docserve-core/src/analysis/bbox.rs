use glam::Vec2;

/// A 2D axis-aligned bounding box in image pixel space, top-left origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bbox {
    /// The top-left corner.
    pub min: Vec2,
    /// The bottom-right corner.
    pub max: Vec2,
}

impl Bbox {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// Creates a bounding box from left/top/right/bottom coordinates.
    ///
    /// # Example
    /// ```
    /// use docserve_core::analysis::bbox::Bbox;
    /// let bbox = Bbox::from_ltrb(1.0, 2.0, 5.0, 6.0);
    /// assert_eq!(bbox.area(), 16.0);
    /// ```
    pub fn from_ltrb(l: f32, t: f32, r: f32, b: f32) -> Self {
        Self {
            min: Vec2::new(l, t),
            max: Vec2::new(r, b),
        }
    }

    /// Creates a new bounding box from a center point and size vector.
    ///
    /// This constructor is commonly used with YOLO-style detection outputs where
    /// bounding boxes are represented as (center_x, center_y, width, height).
    ///
    /// # Example
    /// ```
    /// use glam::Vec2;
    /// use docserve_core::analysis::bbox::Bbox;
    /// // Create a bbox centered at (100, 200) with size 50x80
    /// let bbox = Bbox::from_center_size(Vec2::new(100.0, 200.0), Vec2::new(50.0, 80.0));
    /// // Results in bbox from (75, 160) to (125, 240)
    /// assert_eq!(bbox.min, Vec2::new(75.0, 160.0));
    /// ```
    pub fn from_center_size(center: Vec2, size: Vec2) -> Self {
        let half_size = size / 2.0;
        Self {
            min: center - half_size,
            max: center + half_size,
        }
    }

    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    /// Area of the box; degenerate boxes have zero area.
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center(&self) -> Vec2 {
        (self.min + self.max) / 2.0
    }

    /// Calculates the area of intersection between this bounding box and another.
    ///
    /// If the boxes don't overlap, it returns 0.0.
    ///
    /// # Example
    /// ```
    /// use glam::Vec2;
    /// use docserve_core::analysis::bbox::Bbox;
    /// let bbox1 = Bbox::new(Vec2::new(0.0, 0.0), Vec2::new(4.0, 4.0));
    /// let bbox2 = Bbox::new(Vec2::new(2.0, 2.0), Vec2::new(6.0, 6.0));
    /// assert_eq!(bbox1.intersection(&bbox2), 4.0); // 2x2 intersection area
    /// ```
    pub fn intersection(&self, other: &Self) -> f32 {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);

        if max.x > min.x && max.y > min.y {
            (max.x - min.x) * (max.y - min.y)
        } else {
            0.
        }
    }

    /// Clamps the bounding box coordinates to stay within the specified bounds.
    pub fn clamp(&self, min_bounds: Vec2, max_bounds: Vec2) -> Self {
        Self {
            min: self.min.max(min_bounds),
            max: self.max.min(max_bounds),
        }
    }

    /// Scales both corners by `factor`.
    pub fn scale(&self, factor: f32) -> Self {
        Self {
            min: self.min * factor,
            max: self.max * factor,
        }
    }

    pub fn contains_point(&self, point: Vec2) -> bool {
        point.x >= self.min.x && point.x <= self.max.x && point.y >= self.min.y && point.y <= self.max.y
    }

    /// Smallest box enclosing both boxes.
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Calculates the overlap ratio between this bounding box and another using the smaller area as denominator.
    ///
    /// # Example
    /// ```
    /// use glam::Vec2;
    /// use docserve_core::analysis::bbox::Bbox;
    ///
    /// let large = Bbox::new(Vec2::new(0.0, 0.0), Vec2::new(100.0, 100.0));
    /// let small = Bbox::new(Vec2::new(10.0, 10.0), Vec2::new(30.0, 30.0));
    ///
    /// assert_eq!(large.overlap_ratio(&small), 1.0);
    /// ```
    pub fn overlap_ratio(&self, other: &Self) -> f32 {
        let intersection_area = self.intersection(other);
        let min_area = self.area().min(other.area());

        if min_area > 0.0 {
            intersection_area / min_area
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_area() {
        let bbox = Bbox::from_ltrb(0.0, 0.0, 2.0, 3.0);
        assert_eq!(bbox.area(), 6.0);

        // Zero area (degenerate case)
        let line = Bbox::new(Vec2::ZERO, Vec2::new(5.0, 0.0));
        assert_eq!(line.area(), 0.0);

        // Inverted boxes never report negative area
        let inverted = Bbox::from_ltrb(5.0, 5.0, 1.0, 1.0);
        assert_eq!(inverted.area(), 0.0);
    }

    #[test]
    fn test_bbox_from_center_size() {
        let bbox = Bbox::from_center_size(Vec2::new(100.0, 200.0), Vec2::new(50.0, 80.0));
        assert_eq!(bbox.min, Vec2::new(75.0, 160.0));
        assert_eq!(bbox.max, Vec2::new(125.0, 240.0));
        assert_eq!(bbox.center(), Vec2::new(100.0, 200.0));
        assert_eq!(bbox.area(), 4000.0);
    }

    #[test]
    fn test_bbox_overlap_ratio() {
        let a = Bbox::from_ltrb(0.0, 0.0, 2.0, 2.0);
        assert_eq!(a.overlap_ratio(&a), 1.0);

        // intersection 2, smaller area 4
        let b = Bbox::from_ltrb(1.0, 0.0, 3.0, 2.0);
        assert_eq!(a.overlap_ratio(&b), 0.5);

        let far = Bbox::from_ltrb(10.0, 10.0, 12.0, 12.0);
        assert_eq!(a.overlap_ratio(&far), 0.0);
    }

    #[test]
    fn test_bbox_clamp_and_scale() {
        let bbox = Bbox::from_ltrb(-10.0, -5.0, 1030.0, 1030.0);
        let clamped = bbox.clamp(Vec2::ZERO, Vec2::new(1023.0, 1023.0));
        assert_eq!(clamped, Bbox::from_ltrb(0.0, 0.0, 1023.0, 1023.0));

        let scaled = Bbox::from_ltrb(2.0, 4.0, 6.0, 8.0).scale(0.5);
        assert_eq!(scaled, Bbox::from_ltrb(1.0, 2.0, 3.0, 4.0));
    }

    #[test]
    fn test_bbox_contains_point_and_union() {
        let bbox = Bbox::from_ltrb(0.0, 0.0, 10.0, 10.0);
        assert!(bbox.contains_point(Vec2::new(5.0, 5.0)));
        assert!(bbox.contains_point(Vec2::new(10.0, 0.0)));
        assert!(!bbox.contains_point(Vec2::new(10.5, 5.0)));

        let other = Bbox::from_ltrb(8.0, 8.0, 12.0, 14.0);
        assert_eq!(bbox.union(&other), Bbox::from_ltrb(0.0, 0.0, 12.0, 14.0));
    }
}
