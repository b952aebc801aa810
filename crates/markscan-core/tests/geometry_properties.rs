#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use markscan_core::homography::{Homography, rectify, sheet_corners};
use markscan_core::quad::{Point, Quad, order_corners};
use markscan_core::test_utils::{SheetSpec, render_photo, render_sheet};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

/// A rectangle of at least 100x100 px with every corner jittered by up to 15 px,
/// returned in TL, TR, BR, BL order.
fn jittered_rect_strategy() -> impl Strategy<Value = [Point; 4]> {
    (
        (0.0..500.0f64, 0.0..500.0f64),
        (100.0..800.0f64, 100.0..800.0f64),
        prop::array::uniform8(-15.0..15.0f64),
    )
        .prop_map(|((x, y), (w, h), j)| {
            [
                Point::new(x + j[0], y + j[1]),
                Point::new(x + w + j[2], y + j[3]),
                Point::new(x + w + j[4], y + h + j[5]),
                Point::new(x + j[6], y + h + j[7]),
            ]
        })
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_order_corners_ignores_input_order(
        corners in jittered_rect_strategy(),
        order in Just(vec![0usize, 1, 2, 3]).prop_shuffle(),
    ) {
        let shuffled = [corners[order[0]], corners[order[1]], corners[order[2]], corners[order[3]]];
        prop_assert_eq!(order_corners(shuffled), corners);
        prop_assert!(Quad::from_unordered(shuffled).is_convex());
    }

    #[test]
    fn prop_homography_round_trip(corners in jittered_rect_strategy()) {
        let target = sheet_corners(400, 560);
        let h = Homography::from_pairs(&corners, &target).unwrap();
        let inv = h.inverse().unwrap();
        for (c, t) in corners.iter().zip(&target) {
            prop_assert!(h.project(*c).distance(*t) < 1e-6);
            prop_assert!(inv.project(*t).distance(*c) < 1e-6);
        }
        let inner = Point::new(200.0, 280.0);
        prop_assert!(h.project(inv.project(inner)).distance(inner) < 1e-6);
    }
}

#[test]
fn test_rectify_undoes_photo_warp() {
    let spec = SheetSpec::default();
    let sheet = render_sheet(&spec, &spec.sample_answers());
    let corners = [
        Point::new(70.0, 50.0),
        Point::new(500.0, 72.0),
        Point::new(488.0, 668.0),
        Point::new(55.0, 640.0),
    ];
    let frame = render_photo(&sheet, 560, 720, corners, 0.0, 0);
    let quad = Quad::from_unordered(corners);
    let rect = rectify(&frame.view(), &quad, spec.width, spec.height).unwrap();

    let (w, h) = (spec.width, spec.height);
    let mut diff = 0u64;
    let mut n = 0u64;
    for y in 2..h - 2 {
        let a = rect.image.view().get_row(y);
        let b = sheet.view().get_row(y);
        for x in 2..w - 2 {
            diff += u64::from(a[x].abs_diff(b[x]));
            n += 1;
        }
    }
    let mean = diff as f64 / n as f64;
    assert!(mean < 4.0, "mean absolute difference {mean:.2}");

    // Sheet points survive the trip through the frame
    for c in spec.marker_centers() {
        let back = rect.frame_to_sheet.project(rect.sheet_to_frame.project(c));
        assert!(back.distance(c) < 1e-6);
    }
}
