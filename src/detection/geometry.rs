//! Shape measurements on traced contours.

use imageproc::geometry::{arc_length as imageproc_arc_length, convex_hull};
use imageproc::point::Point as IpPoint;

use crate::models::Point;

fn to_imageproc(points: &[Point]) -> Vec<IpPoint<i32>> {
    points.iter().map(|p| IpPoint::new(p.x, p.y)).collect()
}

/// Enclosed polygon area (shoelace), always non-negative.
pub fn contour_area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let n = points.len();
    let twice: i64 = (0..n)
        .map(|i| {
            let a = points[i];
            let b = points[(i + 1) % n];
            a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64
        })
        .sum();
    twice.abs() as f64 / 2.0
}

pub fn arc_length(points: &[Point], closed: bool) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    imageproc_arc_length(&to_imageproc(points), closed)
}

/// `4πA / P²`, clamped to `[0, 1]`. Degenerate contours score 0.
pub fn circularity(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let perimeter = arc_length(points, true);
    if perimeter <= 0.0 {
        return 0.0;
    }
    let c = 4.0 * std::f64::consts::PI * contour_area(points) / (perimeter * perimeter);
    c.clamp(0.0, 1.0)
}

pub fn hull(points: &[Point]) -> Vec<Point> {
    if points.len() < 3 {
        return points.to_vec();
    }
    convex_hull(to_imageproc(points).as_slice())
        .into_iter()
        .map(Point::from)
        .collect()
}

pub fn hull_area(points: &[Point]) -> f64 {
    contour_area(&hull(points))
}

/// Raw and central second-order moments of a polygon.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
    pub mu20: f64,
    pub mu11: f64,
    pub mu02: f64,
}

impl Moments {
    pub fn centroid(&self) -> Option<(f64, f64)> {
        (self.m00.abs() > f64::EPSILON).then(|| (self.m10 / self.m00, self.m01 / self.m00))
    }

    /// Ratio of minor to major axis of the equivalent ellipse, in `[0, 1]`.
    pub fn inertia_ratio(&self) -> f64 {
        let den = self.mu20 + self.mu02;
        let num = ((self.mu20 - self.mu02).powi(2) + 4.0 * self.mu11 * self.mu11).sqrt();
        if den <= f64::EPSILON {
            return 1.0;
        }
        ((den - num) / (den + num)).clamp(0.0, 1.0)
    }
}

/// Moments of the polygon outlined by `points` (Green's theorem).
pub fn polygon_moments(points: &[Point]) -> Moments {
    let n = points.len();
    if n < 3 {
        return Moments::default();
    }
    let (mut a00, mut a10, mut a01, mut a20, mut a11, mut a02) = (0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
    for i in 0..n {
        let (xp, yp) = (points[(i + n - 1) % n].x as f64, points[(i + n - 1) % n].y as f64);
        let (x, y) = (points[i].x as f64, points[i].y as f64);
        let cross = xp * y - x * yp;
        a00 += cross;
        a10 += cross * (xp + x);
        a01 += cross * (yp + y);
        a20 += cross * (xp * xp + xp * x + x * x);
        a11 += cross * (xp * (2.0 * yp + y) + x * (yp + 2.0 * y));
        a02 += cross * (yp * yp + yp * y + y * y);
    }
    let sign = if a00 < 0.0 { -1.0 } else { 1.0 };
    let m00 = sign * a00 / 2.0;
    let m10 = sign * a10 / 6.0;
    let m01 = sign * a01 / 6.0;
    let m20 = sign * a20 / 12.0;
    let m11 = sign * a11 / 24.0;
    let m02 = sign * a02 / 12.0;
    if m00.abs() <= f64::EPSILON {
        return Moments { m00, m10, m01, ..Default::default() };
    }
    let (cx, cy) = (m10 / m00, m01 / m00);
    Moments {
        m00,
        m10,
        m01,
        mu20: m20 - cx * m10,
        mu11: m11 - cx * m01,
        mu02: m02 - cy * m01,
    }
}

/// Least-squares line through a point set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FittedLine {
    /// Unit direction.
    pub vx: f64,
    pub vy: f64,
    /// A point on the line (the centroid).
    pub x0: f64,
    pub y0: f64,
}

impl FittedLine {
    /// Orientation in degrees, folded into `[0, 180)`.
    pub fn angle_degrees(&self) -> f64 {
        let angle = self.vy.atan2(self.vx).to_degrees();
        let folded = angle.rem_euclid(180.0);
        if folded >= 180.0 { 0.0 } else { folded }
    }

    pub fn distance(&self, p: Point) -> f64 {
        ((p.x as f64 - self.x0) * self.vy - (p.y as f64 - self.y0) * self.vx).abs()
    }
}

/// Orthogonal regression: the principal axis of the point scatter.
pub fn fit_line(points: &[Point]) -> Option<FittedLine> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let x0 = points.iter().map(|p| p.x as f64).sum::<f64>() / n;
    let y0 = points.iter().map(|p| p.y as f64).sum::<f64>() / n;
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in points {
        let dx = p.x as f64 - x0;
        let dy = p.y as f64 - y0;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }
    let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    Some(FittedLine {
        vx: theta.cos(),
        vy: theta.sin(),
        x0,
        y0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(w: i32, h: i32) -> Vec<Point> {
        vec![Point::new(0, 0), Point::new(w, 0), Point::new(w, h), Point::new(0, h)]
    }

    #[test]
    fn area_and_perimeter_of_rectangle() {
        let r = rect(10, 4);
        assert_eq!(contour_area(&r), 40.0);
        assert!((arc_length(&r, true) - 28.0).abs() < 1e-9);
        assert!((arc_length(&r, false) - 24.0).abs() < 1e-9);
    }

    #[test]
    fn circularity_of_square_is_pi_over_four() {
        let c = circularity(&rect(10, 10));
        assert!((c - std::f64::consts::FRAC_PI_4).abs() < 1e-9);
        assert_eq!(circularity(&rect(10, 10)[..2]), 0.0);
    }

    #[test]
    fn hull_area_covers_concave_shape() {
        let l_shape = vec![
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(10, 2),
            Point::new(2, 2),
            Point::new(2, 10),
            Point::new(0, 10),
        ];
        assert_eq!(contour_area(&l_shape), 36.0);
        assert!((hull_area(&l_shape) - 68.0).abs() < 1e-9);
    }

    #[test]
    fn moments_of_rectangle() {
        let m = polygon_moments(&rect(10, 4));
        assert!((m.m00 - 40.0).abs() < 1e-9);
        let (cx, cy) = m.centroid().unwrap();
        assert!((cx - 5.0).abs() < 1e-9 && (cy - 2.0).abs() < 1e-9);
        // 10x4: inertia ratio is (h/w)^2
        assert!((m.inertia_ratio() - 0.16).abs() < 1e-9);
        assert!((polygon_moments(&rect(6, 6)).inertia_ratio() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn fitted_line_angle_and_distance() {
        let horizontal: Vec<Point> = (0..20).map(|x| Point::new(x, 5)).collect();
        let line = fit_line(&horizontal).unwrap();
        assert!(line.angle_degrees().abs() < 1e-6);
        assert!((line.distance(Point::new(3, 9)) - 4.0).abs() < 1e-9);

        let vertical: Vec<Point> = (0..20).map(|y| Point::new(7, y)).collect();
        let angle = fit_line(&vertical).unwrap().angle_degrees();
        assert!((angle - 90.0).abs() < 1e-6);
        assert!(fit_line(&horizontal[..1]).is_none());
    }
}
