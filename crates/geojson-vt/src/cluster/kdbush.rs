//! Static KD-tree over 2D points
//!
//! Points are added once, then [`KdBush::finish`] sorts them into an implicit tree laid
//! out in flat arrays. Coordinates are stored at single precision.

/// A static spatial index answering range and radius queries
#[derive(Debug, Clone, Default)]
pub struct KdBush {
    ids: Vec<usize>,
    coords: Vec<f64>,
    node_size: usize,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl KdBush {
    /// An empty index with room for `num_items` points
    pub fn with_capacity(num_items: usize, node_size: usize) -> Self {
        Self {
            ids: Vec::with_capacity(num_items),
            coords: Vec::with_capacity(num_items * 2),
            node_size: node_size.max(1),
        }
    }

    /// Add a point, returning its index
    pub fn add(&mut self, x: f64, y: f64) -> usize {
        let index = self.ids.len();
        self.ids.push(index);
        self.coords.push(x as f32 as f64);
        self.coords.push(y as f32 as f64);
        index
    }

    /// Build the tree, must be called once after all points were added
    pub fn finish(&mut self) {
        let last = self.ids.len() as isize - 1;
        self.sort(0, last, 0);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Indices of the points inside the given box, edges included
    pub fn range(&self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Vec<usize> {
        let inside = |x: f64, y: f64| x >= min_x && x <= max_x && y >= min_y && y <= max_y;
        self.search(
            inside,
            |axis, v| if axis == 0 { min_x <= v } else { min_y <= v },
            |axis, v| if axis == 0 { max_x >= v } else { max_y >= v },
        )
    }

    /// Indices of the points within distance `r` of `(qx, qy)`
    pub fn within(&self, qx: f64, qy: f64, r: f64) -> Vec<usize> {
        let r2 = r * r;
        let inside = |x: f64, y: f64| sq_dist(x, y, qx, qy) <= r2;
        self.search(
            inside,
            |axis, v| if axis == 0 { qx - r <= v } else { qy - r <= v },
            |axis, v| if axis == 0 { qx + r >= v } else { qy + r >= v },
        )
    }

    /// Walk the tree, visiting the lower half of a node when `go_left` holds for its
    /// median coordinate and the upper half when `go_right` does
    fn search(
        &self,
        inside: impl Fn(f64, f64) -> bool,
        go_left: impl Fn(usize, f64) -> bool,
        go_right: impl Fn(usize, f64) -> bool,
    ) -> Vec<usize> {
        let node_size = self.node_size as isize;
        let mut stack: Vec<(isize, isize, usize)> = vec![(0, self.ids.len() as isize - 1, 0)];
        let mut result = Vec::new();

        while let Some((left, right, axis)) = stack.pop() {
            // Search linearly in small nodes
            if right - left <= node_size {
                if left <= right {
                    for i in left as usize..=right as usize {
                        if inside(self.coords[2 * i], self.coords[2 * i + 1]) {
                            result.push(self.ids[i]);
                        }
                    }
                }
                continue;
            }

            let m = ((left + right) >> 1) as usize;
            let (x, y) = (self.coords[2 * m], self.coords[2 * m + 1]);
            if inside(x, y) {
                result.push(self.ids[m]);
            }

            let median = if axis == 0 { x } else { y };
            if go_left(axis, median) {
                stack.push((left, m as isize - 1, 1 - axis));
            }
            if go_right(axis, median) {
                stack.push((m as isize + 1, right, 1 - axis));
            }
        }
        result
    }

    fn sort(&mut self, left: isize, right: isize, axis: usize) {
        if right - left <= self.node_size as isize {
            return;
        }
        let m = (left + right) >> 1;
        self.select(m, left, right, axis);
        self.sort(left, m - 1, 1 - axis);
        self.sort(m + 1, right, 1 - axis);
    }

    /// Floyd-Rivest selection: partially sort so that item `k` is in its sorted position
    /// along `axis`, with smaller items to its left and larger ones to its right
    fn select(&mut self, k: isize, mut left: isize, mut right: isize, axis: usize) {
        while right > left {
            if right - left > 600 {
                let n = (right - left + 1) as f64;
                let m = (k - left + 1) as f64;
                let z = n.ln();
                let s = 0.5 * (2.0 * z / 3.0).exp();
                let sign = if m - n / 2.0 < 0.0 { -1.0 } else { 1.0 };
                let sd = 0.5 * (z * s * (n - s) / n).sqrt() * sign;
                let new_left = left.max((k as f64 - m * s / n + sd).floor() as isize);
                let new_right = right.min((k as f64 + (n - m) * s / n + sd).floor() as isize);
                self.select(k, new_left, new_right, axis);
            }

            let t = self.coord(k, axis);
            let mut i = left;
            let mut j = right;

            self.swap_item(left, k);
            if self.coord(right, axis) > t {
                self.swap_item(left, right);
            }

            while i < j {
                self.swap_item(i, j);
                i += 1;
                j -= 1;
                while self.coord(i, axis) < t {
                    i += 1;
                }
                while self.coord(j, axis) > t {
                    j -= 1;
                }
            }

            if self.coord(left, axis) == t {
                self.swap_item(left, j);
            } else {
                j += 1;
                self.swap_item(j, right);
            }

            if j <= k {
                left = j + 1;
            }
            if k <= j {
                right = j - 1;
            }
        }
    }

    #[inline(always)]
    fn coord(&self, i: isize, axis: usize) -> f64 {
        self.coords[2 * i as usize + axis]
    }

    #[inline(always)]
    fn swap_item(&mut self, i: isize, j: isize) {
        let (i, j) = (i as usize, j as usize);
        self.ids.swap(i, j);
        self.coords.swap(2 * i, 2 * j);
        self.coords.swap(2 * i + 1, 2 * j + 1);
    }
}

#[inline(always)]
fn sq_dist(ax: f64, ay: f64, bx: f64, by: f64) -> f64 {
    let dx = ax - bx;
    let dy = ay - by;
    dx * dx + dy * dy
}
