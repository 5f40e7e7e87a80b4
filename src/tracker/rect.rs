/// Bounding box representation with format conversion utilities.
///
/// Coordinates are normalized to the frame, so a box spanning the whole
/// image is `Rect::new(0.0, 0.0, 1.0, 1.0)`. Supported formats:
/// - TLWH: Top-Left X, Top-Left Y, Width, Height
/// - TLBR: Top-Left X, Top-Left Y, Bottom-Right X, Bottom-Right Y
/// - XYAH: Center X, Center Y, Aspect Ratio (w/h), Height
/// - XYSR: Center X, Center Y, Scale (area), Aspect Ratio (w/h)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rect {
    /// Top-left x coordinate
    pub x: f32,
    /// Top-left y coordinate
    pub y: f32,
    /// Width of the bounding box
    pub width: f32,
    /// Height of the bounding box
    pub height: f32,
}

impl Rect {
    /// Create a new Rect from top-left coordinates and dimensions (TLWH format).
    #[inline]
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Create a Rect from TLBR format (top-left x, top-left y, bottom-right x, bottom-right y).
    #[inline]
    pub fn from_tlbr(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
        }
    }

    /// Create a Rect from XYAH format (center x, center y, aspect ratio, height).
    #[inline]
    pub fn from_xyah(cx: f32, cy: f32, aspect_ratio: f32, height: f32) -> Self {
        let width = aspect_ratio * height;
        Self {
            x: cx - width / 2.0,
            y: cy - height / 2.0,
            width,
            height,
        }
    }

    /// Create a Rect from XYSR format (center x, center y, area, aspect ratio).
    ///
    /// A non-positive area or aspect ratio yields a zero-sized box at the center.
    pub fn from_xysr(cx: f32, cy: f32, scale: f32, aspect_ratio: f32) -> Self {
        let width_sq = (scale * aspect_ratio).max(0.0);
        let width = width_sq.sqrt();
        let height = if width > 0.0 { scale / width } else { 0.0 };
        Self {
            x: cx - width / 2.0,
            y: cy - height / 2.0,
            width,
            height,
        }
    }

    /// Create a Rect of the given size centered on `(cx, cy)`.
    #[inline]
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
    }

    /// Convert to TLBR format: (x1, y1, x2, y2).
    #[inline]
    pub fn to_tlbr(&self) -> [f32; 4] {
        [self.x, self.y, self.x + self.width, self.y + self.height]
    }

    /// Convert to TLWH format: (x, y, width, height).
    #[inline]
    pub fn to_tlwh(&self) -> [f32; 4] {
        [self.x, self.y, self.width, self.height]
    }

    /// Convert to XYAH format: (center_x, center_y, aspect_ratio, height).
    #[inline]
    pub fn to_xyah(&self) -> [f32; 4] {
        let (cx, cy) = self.center();
        let aspect_ratio = if self.height > 0.0 {
            self.width / self.height
        } else {
            0.0
        };
        [cx, cy, aspect_ratio, self.height]
    }

    /// Convert to XYSR format: (center_x, center_y, area, aspect_ratio).
    #[inline]
    pub fn to_xysr(&self) -> [f32; 4] {
        let (cx, cy) = self.center();
        let aspect_ratio = if self.height > 0.0 {
            self.width / self.height
        } else {
            0.0
        };
        [cx, cy, self.area(), aspect_ratio]
    }

    /// Get the center point of the bounding box.
    #[inline]
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Get the area of the bounding box.
    #[inline]
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }

    /// Same size, moved so that its center is `(cx, cy)`.
    #[inline]
    pub fn recentered(&self, cx: f32, cy: f32) -> Self {
        Self::from_center(cx, cy, self.width, self.height)
    }

    /// Squared distance between the two centers.
    #[inline]
    pub fn center_distance_sq(&self, other: &Rect) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        (ax - bx).powi(2) + (ay - by).powi(2)
    }

    fn intersection(&self, other: &Rect) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);
        (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
    }

    /// Smallest box containing both boxes.
    fn enclosing(&self, other: &Rect) -> Rect {
        let x1 = self.x.min(other.x);
        let y1 = self.y.min(other.y);
        let x2 = (self.x + self.width).max(other.x + other.width);
        let y2 = (self.y + self.height).max(other.y + other.height);
        Rect::from_tlbr(x1, y1, x2, y2)
    }

    /// Calculate Intersection over Union (IoU) with another bounding box.
    pub fn iou(&self, other: &Rect) -> f32 {
        let inter_area = self.intersection(other);
        let union_area = self.area() + other.area() - inter_area;

        if union_area > 0.0 {
            inter_area / union_area
        } else {
            0.0
        }
    }

    /// Generalized IoU in `[-1, 1]`: IoU minus the share of the enclosing box
    /// not covered by the union.
    pub fn giou(&self, other: &Rect) -> f32 {
        let inter_area = self.intersection(other);
        let union_area = self.area() + other.area() - inter_area;
        if union_area <= 0.0 {
            return 0.0;
        }
        let iou = inter_area / union_area;
        let enclose_area = self.enclosing(other).area();
        if enclose_area <= 0.0 {
            return iou;
        }
        iou - (enclose_area - union_area) / enclose_area
    }

    /// Distance IoU in `[-1, 1]`: IoU minus the squared center distance over
    /// the squared diagonal of the enclosing box.
    pub fn diou(&self, other: &Rect) -> f32 {
        let iou = self.iou(other);
        let enclose = self.enclosing(other);
        let diagonal_sq = enclose.width.powi(2) + enclose.height.powi(2);
        if diagonal_sq <= 0.0 {
            return iou;
        }
        iou - self.center_distance_sq(other) / diagonal_sq
    }

    /// Complete IoU: DIoU with an additional aspect-ratio consistency penalty.
    pub fn ciou(&self, other: &Rect) -> f32 {
        let iou = self.iou(other);
        let diou = self.diou(other);
        if self.height <= 0.0 || other.height <= 0.0 {
            return diou;
        }
        let arctan_diff = (other.width / other.height).atan() - (self.width / self.height).atan();
        let v = 4.0 / (std::f32::consts::PI * std::f32::consts::PI) * arctan_diff * arctan_diff;
        let denom = 1.0 - iou + v;
        let alpha = if denom > 0.0 { v / denom } else { 0.0 };
        diou - alpha * v
    }
}

use ndarray::Array2;

/// Calculate IoU matrix between two sets of bounding boxes.
///
/// Returns a matrix of shape (M, N) where M is the length of `boxes_a`
/// and N is the length of `boxes_b`.
pub fn iou_batch(boxes_a: &[Rect], boxes_b: &[Rect]) -> Array2<f32> {
    let mut ious = Array2::zeros((boxes_a.len(), boxes_b.len()));
    for (i, a) in boxes_a.iter().enumerate() {
        for (j, b) in boxes_b.iter().enumerate() {
            ious[[i, j]] = a.iou(b);
        }
    }
    ious
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_rect_conversions() {
        let rect = Rect::new(0.1, 0.2, 0.3, 0.4);

        let tlbr = rect.to_tlbr();
        assert_abs_diff_eq!(tlbr[2], 0.4, epsilon = 1e-6);
        assert_abs_diff_eq!(tlbr[3], 0.6, epsilon = 1e-6);

        let xyah = rect.to_xyah();
        assert_abs_diff_eq!(xyah[0], 0.25, epsilon = 1e-6);
        assert_abs_diff_eq!(xyah[1], 0.4, epsilon = 1e-6);
        assert_abs_diff_eq!(xyah[2], 0.75, epsilon = 1e-6);
        assert_abs_diff_eq!(xyah[3], 0.4, epsilon = 1e-6);
    }

    #[test]
    fn test_from_xyah() {
        let rect = Rect::from_xyah(0.25, 0.4, 0.75, 0.4);
        assert_abs_diff_eq!(rect.x, 0.1, epsilon = 1e-6);
        assert_abs_diff_eq!(rect.y, 0.2, epsilon = 1e-6);
        assert_abs_diff_eq!(rect.width, 0.3, epsilon = 1e-6);
        assert_abs_diff_eq!(rect.height, 0.4, epsilon = 1e-6);
    }

    #[test]
    fn test_xysr_roundtrip_recovers_box() {
        let rect = Rect::new(0.2, 0.3, 0.1, 0.05);
        let [cx, cy, s, r] = rect.to_xysr();
        let back = Rect::from_xysr(cx, cy, s, r);
        assert_abs_diff_eq!(back.x, rect.x, epsilon = 1e-5);
        assert_abs_diff_eq!(back.width, rect.width, epsilon = 1e-5);
        assert_abs_diff_eq!(back.height, rect.height, epsilon = 1e-5);
    }

    #[test]
    fn test_from_xysr_degenerate_scale() {
        let rect = Rect::from_xysr(0.5, 0.5, -1.0, 1.0);
        assert_eq!(rect.area(), 0.0);
        assert!(rect.is_finite());
    }

    #[test]
    fn test_iou() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 5.0, 10.0, 10.0);

        // Intersection 25, union 175
        assert_abs_diff_eq!(a.iou(&b), 25.0 / 175.0, epsilon = 1e-6);
        assert_abs_diff_eq!(a.iou(&a), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_iou_no_overlap() {
        let a = Rect::new(0.0, 0.0, 0.1, 0.1);
        let b = Rect::new(0.5, 0.5, 0.1, 0.1);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_giou_penalizes_gap() {
        let a = Rect::new(0.0, 0.0, 0.1, 0.1);
        let near = Rect::new(0.15, 0.0, 0.1, 0.1);
        let far = Rect::new(0.6, 0.0, 0.1, 0.1);
        assert!(a.giou(&near) < 0.0);
        assert!(a.giou(&far) < a.giou(&near));
        assert_abs_diff_eq!(a.giou(&a), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_diou_and_ciou() {
        let a = Rect::new(0.0, 0.0, 0.2, 0.2);
        let shifted = Rect::new(0.05, 0.05, 0.2, 0.2);
        let stretched = Rect::new(0.05, 0.05, 0.4, 0.1);

        assert!(a.diou(&shifted) < a.iou(&shifted));
        // Same aspect ratio: no extra penalty
        assert_abs_diff_eq!(a.ciou(&shifted), a.diou(&shifted), epsilon = 1e-6);
        assert!(a.ciou(&stretched) < a.diou(&stretched));
    }

    #[test]
    fn test_zero_area_boxes_do_not_produce_nan() {
        let a = Rect::new(0.5, 0.5, 0.0, 0.0);
        assert_eq!(a.iou(&a), 0.0);
        assert!(a.giou(&a).is_finite());
        assert!(a.diou(&a).is_finite());
        assert!(a.ciou(&a).is_finite());
    }
}
