#![allow(dead_code)]

use markscan_core::image::ImageBuf;
use markscan_core::quad::Point;
use markscan_core::test_utils::{FilledBubble, SheetSpec, render_photo, render_sheet};

/// Frame size used by the synthetic photo tests.
pub const FRAME_WIDTH: usize = 560;
/// Frame size used by the synthetic photo tests.
pub const FRAME_HEIGHT: usize = 720;

/// A mildly tilted placement of the default sheet inside the frame.
pub fn tilted_corners() -> [Point; 4] {
    [
        Point::new(78.0, 60.0),
        Point::new(492.0, 82.0),
        Point::new(480.0, 668.0),
        Point::new(62.0, 650.0),
    ]
}

/// Render `marks` on the default sheet and photograph it.
pub fn photo_of(spec: &SheetSpec, marks: &[FilledBubble], corners: [Point; 4], seed: u64) -> ImageBuf {
    let sheet = render_sheet(spec, marks);
    render_photo(&sheet, FRAME_WIDTH, FRAME_HEIGHT, corners, 2.0, seed)
}

/// Blank out a corner marker of a rectified sheet with paper.
pub fn erase_marker(sheet: &mut ImageBuf, center: Point, side: usize) {
    let half = side as isize / 2 + 1;
    for dy in -half..=half {
        for dx in -half..=half {
            sheet.put(center.x as isize + dx, center.y as isize + dy, markscan_core::test_utils::PAPER);
        }
    }
}
