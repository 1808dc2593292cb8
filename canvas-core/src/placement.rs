//! Free-space placement for newly inserted elements.
//!
//! Candidates sit on a fixed grid centered on the anchor and are tried in
//! ascending distance from it; the first one clear of every existing box
//! (with padding) wins.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::geometry::{Point, Rect};

/// Grid step between candidate positions, in world units.
pub const GRID_STEP: f64 = 48.0;
/// Clearance required around existing elements.
pub const PLACEMENT_PADDING: f64 = 18.0;
/// Lower bound on the number of rings searched.
pub const MIN_RINGS: usize = 26;
/// Upper bound on the number of rings searched, whatever the scene holds.
pub const MAX_RINGS: usize = 256;

/// Search bounds for [`find_nearest_free_slot`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchExtent {
    /// Visible world width.
    pub view_w: f64,
    /// Visible world height.
    pub view_h: f64,
}

impl SearchExtent {
    /// Number of rings to search for an element of `w`×`h` among `existing`.
    #[must_use]
    pub fn rings(&self, existing: &[Rect], w: f64, h: f64) -> usize {
        let largest = existing.iter().map(|r| r.w.max(r.h)).fold(0.0_f64, f64::max);
        let span = self.view_w.max(self.view_h) + largest + w.max(h);
        let rings = (span / GRID_STEP).ceil();
        if rings.is_finite() && rings > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let rings = rings as usize;
            rings.clamp(MIN_RINGS, MAX_RINGS)
        } else {
            MIN_RINGS
        }
    }
}

/// Find the top-left position closest to centering a `w`×`h` box on `anchor`
/// that does not overlap any of `existing`.
///
/// Falls back to the anchor-centered position when the bounded search finds
/// nothing.
#[must_use]
pub fn find_nearest_free_slot(existing: &[Rect], w: f64, h: f64, anchor: Point, extent: SearchExtent) -> Point {
    let origin = Point::new(anchor.x - w / 2.0, anchor.y - h / 2.0);
    let rings = extent.rings(existing, w, h);
    let fits = |offset: Point| {
        let pos = origin.add(offset);
        let candidate = Rect::new(pos.x, pos.y, w, h);
        existing
            .iter()
            .all(|r| !candidate.overlaps_padded(r, PLACEMENT_PADDING))
            .then_some(pos)
    };

    // Rings are generated lazily. Every candidate of ring `k + 1` or beyond is
    // at least `k + 1` steps away, so once ring `k` is in, anything pending
    // closer than that can be tried in final order.
    let mut pending = BinaryHeap::new();
    for ring in 0..=rings {
        push_ring(&mut pending, ring);
        #[allow(clippy::cast_precision_loss)]
        let settled = if ring == rings {
            f64::INFINITY
        } else {
            (ring + 1) as f64 * GRID_STEP
        };
        while pending.peek().is_some_and(|Reverse(c)| c.distance < settled) {
            if let Some(pos) = pending.pop().and_then(|Reverse(c)| fits(c.offset)) {
                return pos;
            }
        }
    }

    tracing::warn!("No free slot within {rings} rings; placing at anchor");
    origin
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance: f64,
    ring: i64,
    gy: i64,
    gx: i64,
    offset: Point,
}

// Ties broken by ring, then row, then column for deterministic output.
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.ring.cmp(&other.ring))
            .then(self.gy.cmp(&other.gy))
            .then(self.gx.cmp(&other.gx))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

fn push_ring(pending: &mut BinaryHeap<Reverse<Candidate>>, ring: usize) {
    #[allow(clippy::cast_possible_wrap)]
    let r = ring as i64;
    let mut push = |gx: i64, gy: i64| {
        #[allow(clippy::cast_precision_loss)]
        let offset = Point::new(gx as f64 * GRID_STEP, gy as f64 * GRID_STEP);
        pending.push(Reverse(Candidate {
            distance: offset.length(),
            ring: r,
            gy,
            gx,
            offset,
        }));
    };
    if r == 0 {
        push(0, 0);
        return;
    }
    for g in -r..=r {
        push(g, -r);
        push(g, r);
    }
    for g in (-r + 1)..r {
        push(-r, g);
        push(r, g);
    }
}
