use image::GrayImage;
use imageproc::contours::{BorderType, find_contours};

use crate::models::Point;

/// Which borders to keep from a binary mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retrieval {
    /// Outermost borders only; holes and anything nested inside them are dropped.
    External,
    /// Every outer border at any nesting depth. Hole borders are skipped because they
    /// trace the inner side of a region whose outer side is already reported.
    AllOuter,
}

/// Trace the borders of the non-zero regions of `mask`.
///
/// Points are returned in tracing order with collinear runs collapsed to their end
/// points, so straight edges cost two points.
pub fn find_contours_in(mask: &GrayImage, retrieval: Retrieval) -> Vec<Vec<Point>> {
    trace_borders(mask, retrieval).into_iter().map(compress).collect()
}

/// Like [`find_contours_in`] but keeps every border pixel.
pub fn trace_borders(mask: &GrayImage, retrieval: Retrieval) -> Vec<Vec<Point>> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .filter(|c| match retrieval {
            Retrieval::External => c.parent.is_none(),
            Retrieval::AllOuter => true,
        })
        .map(|c| c.points.into_iter().map(Point::from).collect::<Vec<_>>())
        .filter(|points| !points.is_empty())
        .collect()
}

pub fn find_external_contours(mask: &GrayImage) -> Vec<Vec<Point>> {
    find_contours_in(mask, Retrieval::External)
}

/// Drop points that continue the previous step in the same direction.
fn compress(points: Vec<Point>) -> Vec<Point> {
    let n = points.len();
    if n < 3 {
        return points;
    }
    let step = |a: Point, b: Point| (b.x - a.x, b.y - a.y);
    (0..n)
        .filter(|&i| {
            let prev = points[(i + n - 1) % n];
            let next = points[(i + 1) % n];
            step(prev, points[i]) != step(points[i], next)
        })
        .map(|i| points[i])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn square_mask() -> GrayImage {
        let mut mask = GrayImage::new(20, 20);
        for y in 5..15 {
            for x in 5..15 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        mask
    }

    #[test]
    fn filled_square_compresses_to_corners() {
        let contours = find_external_contours(&square_mask());
        assert_eq!(contours.len(), 1);
        let mut corners = contours[0].clone();
        corners.sort_by_key(|p| (p.y, p.x));
        assert_eq!(
            corners,
            vec![Point::new(5, 5), Point::new(14, 5), Point::new(5, 14), Point::new(14, 14)]
        );
    }

    #[test]
    fn external_retrieval_ignores_nested_regions() {
        let mut mask = GrayImage::new(40, 40);
        for y in 5..35 {
            for x in 5..35 {
                let ring = x < 8 || x >= 32 || y < 8 || y >= 32;
                let inner = (15..25).contains(&x) && (15..25).contains(&y);
                if ring || inner {
                    mask.put_pixel(x, y, Luma([255]));
                }
            }
        }
        assert_eq!(find_contours_in(&mask, Retrieval::External).len(), 1);
        assert_eq!(find_contours_in(&mask, Retrieval::AllOuter).len(), 2);
    }

    #[test]
    fn empty_mask_has_no_contours() {
        assert!(find_external_contours(&GrayImage::new(8, 8)).is_empty());
    }
}
