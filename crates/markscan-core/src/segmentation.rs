//! Connected components of ink pixels.
//!
//! Ink is any non-zero pixel. Components are 8-connected: two runs on
//! consecutive rows belong together when they overlap or touch diagonally.
//! Labeling works on horizontal runs, merged with a union-find over run ids.

use bumpalo::Bump;
use bumpalo::collections::Vec as BumpVec;

/// Disjoint sets over `0..size`, stored in the arena.
pub struct UnionFind<'a> {
    parent: &'a mut [u32],
    rank: &'a mut [u8],
}

impl<'a> UnionFind<'a> {
    /// Every element starts in its own set.
    pub fn new_in(arena: &'a Bump, size: usize) -> Self {
        Self {
            parent: arena.alloc_slice_fill_with(size, |i| i as u32),
            rank: arena.alloc_slice_fill_copy(size, 0u8),
        }
    }

    /// Representative of the set holding `i`. Halves the path on the way up.
    #[inline]
    pub fn find(&mut self, i: u32) -> u32 {
        let mut x = i as usize;
        while self.parent[x] as usize != x {
            let grandparent = self.parent[self.parent[x] as usize];
            self.parent[x] = grandparent;
            x = grandparent as usize;
        }
        x as u32
    }

    /// Merge the sets holding `i` and `j`, hanging the shallower tree below.
    #[inline]
    pub fn union(&mut self, i: u32, j: u32) {
        let (a, b) = (self.find(i) as usize, self.find(j) as usize);
        if a == b {
            return;
        }
        let (low, high) = if self.rank[a] < self.rank[b] { (a, b) } else { (b, a) };
        self.parent[low] = high as u32;
        if self.rank[low] == self.rank[high] {
            self.rank[high] += 1;
        }
    }
}

/// Extent and size of one component.
#[derive(Clone, Copy, Debug)]
pub struct ComponentStats {
    /// Leftmost column.
    pub min_x: u16,
    /// Rightmost column.
    pub max_x: u16,
    /// Top row.
    pub min_y: u16,
    /// Bottom row.
    pub max_y: u16,
    /// Number of ink pixels.
    pub pixel_count: u32,
    /// Column of the first pixel in raster order.
    pub first_x: u16,
    /// Row of the first pixel in raster order.
    pub first_y: u16,
}

impl ComponentStats {
    fn starting_at(run: &Run) -> Self {
        Self {
            min_x: run.x_start as u16,
            max_x: run.x_end as u16,
            min_y: run.y as u16,
            max_y: run.y as u16,
            pixel_count: 0,
            first_x: run.x_start as u16,
            first_y: run.y as u16,
        }
    }

    fn add(&mut self, run: &Run) {
        self.min_x = self.min_x.min(run.x_start as u16);
        self.max_x = self.max_x.max(run.x_end as u16);
        self.max_y = self.max_y.max(run.y as u16);
        self.pixel_count += run.x_end - run.x_start + 1;
    }

    /// Bounding-box width in pixels.
    #[must_use]
    pub fn width(&self) -> usize {
        usize::from(self.max_x - self.min_x) + 1
    }

    /// Bounding-box height in pixels.
    #[must_use]
    pub fn height(&self) -> usize {
        usize::from(self.max_y - self.min_y) + 1
    }
}

/// Labels and per-component statistics.
pub struct LabelResult<'a> {
    /// One label per pixel, row-major; 0 is background, components start at 1.
    pub labels: &'a [u32],
    /// Statistics of label `l` at index `l - 1`.
    pub component_stats: Vec<ComponentStats>,
}

#[derive(Clone, Copy, Debug)]
struct Run {
    y: u32,
    x_start: u32,
    /// Inclusive.
    x_end: u32,
}

impl Run {
    /// 8-connectivity between runs on consecutive rows.
    fn touches(&self, below: &Run) -> bool {
        self.x_start <= below.x_end + 1 && below.x_start <= self.x_end + 1
    }
}

#[allow(clippy::cast_possible_truncation)]
fn collect_runs<'a>(arena: &'a Bump, binary: &[u8], width: usize, height: usize) -> BumpVec<'a, Run> {
    let mut runs = BumpVec::new_in(arena);
    for (y, row) in binary.chunks_exact(width.max(1)).take(height).enumerate() {
        let mut x = 0;
        while x < width {
            if row[x] == 0 {
                x += 1;
                continue;
            }
            let start = x;
            while x < width && row[x] != 0 {
                x += 1;
            }
            runs.push(Run {
                y: y as u32,
                x_start: start as u32,
                x_end: (x - 1) as u32,
            });
        }
    }
    runs
}

/// Label 8-connected ink components and measure each one.
///
/// Labels are numbered in raster order of each component's first pixel.
#[allow(clippy::cast_possible_truncation)]
pub fn label_components_with_stats<'a>(
    arena: &'a Bump,
    binary: &[u8],
    width: usize,
    height: usize,
) -> LabelResult<'a> {
    let labels = arena.alloc_slice_fill_copy(width * height, 0u32);
    let runs = collect_runs(arena, binary, width, height);
    if runs.is_empty() {
        return LabelResult {
            labels,
            component_stats: Vec::new(),
        };
    }

    // Runs are sorted by row, so each row's runs form one contiguous slice.
    let mut uf = UnionFind::new_in(arena, runs.len());
    let mut prev = 0..0;
    let mut start = 0;
    while start < runs.len() {
        let y = runs[start].y;
        let end = start + runs[start..].iter().take_while(|r| r.y == y).count();
        if y > 0 && !prev.is_empty() && runs[prev.start].y + 1 == y {
            let mut p = prev.start;
            for c in start..end {
                while p < prev.end && runs[p].x_end + 1 < runs[c].x_start {
                    p += 1;
                }
                for q in p..prev.end {
                    if !runs[q].touches(&runs[c]) {
                        break;
                    }
                    uf.union(c as u32, q as u32);
                }
            }
        }
        prev = start..end;
        start = end;
    }

    let mut label_of_root = vec![0u32; runs.len()];
    let mut component_stats: Vec<ComponentStats> = Vec::new();
    for (id, run) in runs.iter().enumerate() {
        let root = uf.find(id as u32) as usize;
        if label_of_root[root] == 0 {
            component_stats.push(ComponentStats::starting_at(run));
            label_of_root[root] = component_stats.len() as u32;
        }
        let label = label_of_root[root];
        component_stats[label as usize - 1].add(run);
        let row = run.y as usize * width;
        labels[row + run.x_start as usize..=row + run.x_end as usize].fill(label);
    }

    LabelResult {
        labels,
        component_stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bumpalo::Bump;
    use proptest::prelude::*;

    #[test]
    fn test_union_find() {
        let arena = Bump::new();
        let mut uf = UnionFind::new_in(&arena, 10);

        uf.union(1, 2);
        uf.union(2, 3);
        uf.union(5, 6);

        assert_eq!(uf.find(1), uf.find(3));
        assert_eq!(uf.find(1), uf.find(2));
        assert_ne!(uf.find(1), uf.find(5));

        uf.union(3, 5);
        assert_eq!(uf.find(1), uf.find(6));
    }

    #[test]
    fn test_label_components_simple() {
        let arena = Bump::new();
        let binary = [
            255, 255, 0, 0, 0, //
            255, 255, 0, 0, 0, //
            0, 0, 0, 255, 255, //
            0, 0, 0, 255, 255,
        ];
        let width = 5;
        let height = 4;

        let result = label_components_with_stats(&arena, &binary, width, height);

        assert_eq!(result.component_stats.len(), 2);

        let s1 = result.component_stats[0];
        assert_eq!(s1.pixel_count, 4);
        assert_eq!(s1.min_x, 0);
        assert_eq!(s1.max_x, 1);
        assert_eq!(s1.min_y, 0);
        assert_eq!(s1.max_y, 1);

        let s2 = result.component_stats[1];
        assert_eq!(s2.pixel_count, 4);
        assert_eq!(s2.min_x, 3);
        assert_eq!(s2.max_x, 4);
        assert_eq!(s2.min_y, 2);
        assert_eq!(s2.max_y, 3);
        assert_eq!((s2.first_x, s2.first_y), (3, 2));
        assert_eq!(result.labels[2 * width + 2], 0);
    }

    #[test]
    fn test_diagonal_pixels_are_connected() {
        let arena = Bump::new();
        let binary = [
            255, 0, 0, //
            0, 255, 0, //
            0, 0, 255,
        ];
        let result = label_components_with_stats(&arena, &binary, 3, 3);
        assert_eq!(result.component_stats.len(), 1);
        assert_eq!(result.component_stats[0].pixel_count, 3);
    }

    #[test]
    fn test_first_pixel_is_topmost_leftmost() {
        let arena = Bump::new();
        // A "U" shape: the first pixel is the top of the left arm.
        let binary = [
            0, 255, 0, 255, //
            0, 255, 0, 255, //
            0, 255, 255, 255,
        ];
        let result = label_components_with_stats(&arena, &binary, 4, 3);
        assert_eq!(result.component_stats.len(), 1);
        let s = result.component_stats[0];
        assert_eq!((s.first_x, s.first_y), (1, 0));
        assert_eq!((s.width(), s.height()), (3, 3));
    }

    proptest! {
        #[test]
        fn prop_union_find_reflexivity(size in 1..1000usize) {
            let arena = Bump::new();
            let mut uf = UnionFind::new_in(&arena, size);
            for i in 0..size as u32 {
                assert_eq!(uf.find(i), i);
            }
        }

        #[test]
        fn prop_union_find_transitivity(size in 1..1000usize, pairs in prop::collection::vec((0..1000u32, 0..1000u32), 0..100)) {
            let arena = Bump::new();
            let real_size = size.max(1001);
            let mut uf = UnionFind::new_in(&arena, real_size);

            for (a, b) in pairs {
                let a = a % real_size as u32;
                let b = b % real_size as u32;
                uf.union(a, b);
                assert_eq!(uf.find(a), uf.find(b));
            }
        }

        #[test]
        fn prop_label_components_no_panic(
            width in 1..64usize,
            height in 1..64usize,
            data in prop::collection::vec(0..=1u8, 64 * 64)
        ) {
            let arena = Bump::new();
            let binary: Vec<u8> = data.iter().map(|&b| if b == 0 { 0 } else { 255 }).collect();
            let real_width = width.min(64);
            let real_height = height.min(64);
            let slice = &binary[..real_width * real_height];

            let result = label_components_with_stats(&arena, slice, real_width, real_height);

            for stat in result.component_stats {
                assert!(stat.pixel_count > 0);
                assert!(stat.max_x < real_width as u16);
                assert!(stat.max_y < real_height as u16);
                assert!(stat.min_x <= stat.max_x);
                assert!(stat.min_y <= stat.max_y);
            }
        }
    }
}
