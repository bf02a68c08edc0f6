// Copyright 2025 the Bioregion Binner Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

use kurbo::{Line, Point};

/// `2^exp` as an exact `f64`, without needing `std` or `libm`.
pub(crate) fn pow2(exp: i32) -> f64 {
    let mut value = 1.0_f64;
    if exp >= 0 {
        for _ in 0..exp {
            value *= 2.0;
        }
    } else {
        for _ in 0..exp.unsigned_abs() {
            value *= 0.5;
        }
    }
    value
}

/// Signed area of the triangle `a b c`, doubled. Positive when counter-clockwise.
#[inline]
fn orient(a: Point, b: Point, c: Point) -> f64 {
    (b - a).cross(c - a)
}

/// Whether `p`, known to be collinear with `a b`, lies within the segment's bounds.
#[inline]
fn within(a: Point, b: Point, p: Point) -> bool {
    a.x.min(b.x) <= p.x && p.x <= a.x.max(b.x) && a.y.min(b.y) <= p.y && p.y <= a.y.max(b.y)
}

/// Closed segment intersection: touching endpoints and collinear overlap both count.
pub(crate) fn segments_intersect(a: Line, b: Line) -> bool {
    let d1 = orient(b.p0, b.p1, a.p0);
    let d2 = orient(b.p0, b.p1, a.p1);
    let d3 = orient(a.p0, a.p1, b.p0);
    let d4 = orient(a.p0, a.p1, b.p1);
    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    (d1 == 0.0 && within(b.p0, b.p1, a.p0))
        || (d2 == 0.0 && within(b.p0, b.p1, a.p1))
        || (d3 == 0.0 && within(a.p0, a.p1, b.p0))
        || (d4 == 0.0 && within(a.p0, a.p1, b.p1))
}
