//! Quadtree tile cache with lazy drill-down
//!
//! The index is built eagerly down to `index_max_zoom` (or until tiles get small enough),
//! every leaf of that initial pass keeps its clipped source features. Deeper tiles are
//! sliced on request from the nearest cached ancestor that still holds a source.

use crate::clip::{Axis, clip};
use crate::tile::create_tile;
use crate::transform::transform_tile;
use crate::{Feature, MAX_TILE_ZOOM, Options, Tile};

use geo::{Coord, Rect};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

/// Tile coordinates as `(z, x, y)`
pub type TileCoord = (u8, u32, u32);

/// Pack tile coordinates into a single cache key
#[inline]
pub fn to_id(z: u8, x: u32, y: u32) -> u64 {
    (((1u64 << z) * y as u64 + x as u64) << 5) + z as u64
}

/// A tile held by the cache
#[derive(Debug, Clone)]
pub struct CachedTile {
    /// Tile in normalized coordinates. Its features move to `transformed` on first read.
    tile: Tile<f64>,
    /// Clipped features kept for slicing children later, if this tile is a leaf of the index
    source: Option<Vec<Arc<Feature>>>,
    transformed: Option<Arc<Tile>>,
}

impl CachedTile {
    fn new(tile: Tile<f64>) -> Self {
        Self {
            tile,
            source: None,
            transformed: None,
        }
    }

    /// The tile in normalized coordinates
    ///
    /// Its feature list is empty once the tile has been read through the index.
    #[inline]
    pub fn projected(&self) -> &Tile<f64> {
        &self.tile
    }

    #[inline]
    pub fn source(&self) -> Option<&[Arc<Feature>]> {
        self.source.as_deref()
    }

    #[inline]
    pub fn is_transformed(&self) -> bool {
        self.transformed.is_some()
    }

    fn transformed(&mut self, extent: u32) -> Arc<Tile> {
        if let Some(tile) = &self.transformed {
            return tile.clone();
        }
        let projected = Tile {
            features: std::mem::take(&mut self.tile.features),
            ..self.tile.clone()
        };
        let tile = Arc::new(transform_tile(projected, extent));
        self.transformed = Some(tile.clone());
        tile
    }
}

/// Tile cache over a set of projected features
#[derive(Debug, Clone)]
pub struct TileIndex {
    options: Options,
    tiles: HashMap<u64, CachedTile>,
    tile_coords: Vec<TileCoord>,
    /// Number of cached tiles per zoom level
    stats: BTreeMap<u8, usize>,
    total: usize,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl TileIndex {
    /// Build the initial index over `features`
    pub fn new(features: Vec<Arc<Feature>>, options: Options) -> Self {
        #[cfg(feature = "profiling")]
        profiling::scope!("tile_index::new");

        let mut index = Self {
            options,
            tiles: HashMap::new(),
            tile_coords: Vec::new(),
            stats: BTreeMap::new(),
            total: 0,
        };

        let start = Instant::now();
        index.split_tile(features, 0, 0, 0, None);

        if index.options.debug > 0 {
            if let Some(root) = index.tiles.get(&to_id(0, 0, 0)) {
                tracing::info!(
                    "features: {}, points: {}",
                    root.tile.num_features,
                    root.tile.num_points
                );
            }
            tracing::info!("generate tiles took {:?}", start.elapsed());
            tracing::info!("tiles generated: {} {:?}", index.total, index.stats);
        }
        index
    }

    /// Get a tile in tile-local coordinates, slicing it from an ancestor if needed
    ///
    /// `x` wraps around the world. Returns `None` past [`MAX_TILE_ZOOM`], past the index
    /// `max_zoom`, or where there is no data.
    pub fn get_tile(&mut self, z: u8, x: u32, y: u32) -> Option<Arc<Tile>> {
        if z > MAX_TILE_ZOOM {
            return None;
        }
        let extent = self.options.extent;
        let x = x & ((1u32 << z) - 1);
        let id = to_id(z, x, y);

        if let Some(tile) = self.tiles.get_mut(&id) {
            return Some(tile.transformed(extent));
        }

        if self.options.debug > 1 {
            tracing::debug!("drilling down to z{}-{}-{}", z, x, y);
        }

        let (mut z0, mut x0, mut y0) = (z, x, y);
        let mut found = false;
        while !found && z0 > 0 {
            z0 -= 1;
            x0 >>= 1;
            y0 >>= 1;
            found = self.tiles.contains_key(&to_id(z0, x0, y0));
        }
        if !found {
            return None;
        }

        // If we found a parent tile containing the original geometry, we can drill down from it
        let source = self.tiles.get_mut(&to_id(z0, x0, y0))?.source.take()?;

        if self.options.debug > 1 {
            tracing::debug!("found parent tile z{}-{}-{}", z0, x0, y0);
        }

        let start = Instant::now();
        self.split_tile(source, z0, x0, y0, Some((z, x, y)));
        if self.options.debug > 1 {
            tracing::debug!("drilling down took {:?}", start.elapsed());
        }

        self.tiles.get_mut(&id).map(|tile| tile.transformed(extent))
    }

    /// Slice `features` into tiles starting at `(z, x, y)`
    ///
    /// Without a target this is the initial pass, which stops at `index_max_zoom` or once
    /// a tile holds at most `index_max_points` points. With a target it only descends
    /// along the target's ancestors.
    fn split_tile(
        &mut self,
        features: Vec<Arc<Feature>>,
        z: u8,
        x: u32,
        y: u32,
        target: Option<TileCoord>,
    ) {
        let Self {
            options,
            tiles,
            tile_coords,
            stats,
            total,
        } = self;
        let options = &*options;
        let buffer = options.buffer_ratio();
        let line_metrics = options.line_metrics;

        let mut stack = vec![(features, z, x, y)];

        while let Some((features, z, x, y)) = stack.pop() {
            let z2 = (1u64 << z) as f64;
            let cached = tiles.entry(to_id(z, x, y)).or_insert_with(|| {
                let start = Instant::now();
                let tile = create_tile(&features, z, x, y, options);
                if options.debug > 1 {
                    tracing::debug!(
                        "tile z{}-{}-{} (features: {}, points: {}, simplified: {}) took {:?}",
                        z,
                        x,
                        y,
                        tile.num_features,
                        tile.num_points,
                        tile.num_simplified,
                        start.elapsed()
                    );
                }
                tile_coords.push((z, x, y));
                *stats.entry(z).or_default() += 1;
                *total += 1;
                CachedTile::new(tile)
            });

            let stop = match target {
                // Stop tiling at max index zoom or if the tile has few enough points
                None => {
                    z == options.index_max_zoom
                        || z >= options.max_zoom
                        || cached.tile.num_points <= options.index_max_points
                }
                // Stop at max zoom, at the target, or off the target's branch
                Some((cz, cx, cy)) => {
                    z >= options.max_zoom || z >= cz || {
                        let steps = cz - z;
                        x != cx >> steps || y != cy >> steps
                    }
                }
            };

            if stop {
                // Keep the source geometry for drilling down later
                cached.source = Some(features);
                continue;
            }

            cached.source = None;
            if features.is_empty() {
                continue;
            }

            let tile = &cached.tile;
            let (min_x, min_y, max_x, max_y) = (tile.min_x, tile.min_y, tile.max_x, tile.max_y);

            let k1 = 0.5 * buffer;
            let k2 = 0.5 - k1;
            let k3 = 0.5 + k1;
            let k4 = 1.0 + k1;
            let (xf, yf) = (x as f64, y as f64);

            let split_y = |half: Option<Vec<Arc<Feature>>>| match half {
                Some(half) => (
                    clip(&half, z2, yf - k1, yf + k3, Axis::Y, min_y, max_y, line_metrics),
                    clip(&half, z2, yf + k2, yf + k4, Axis::Y, min_y, max_y, line_metrics),
                ),
                None => (None, None),
            };

            let left = clip(&features, z2, xf - k1, xf + k3, Axis::X, min_x, max_x, line_metrics);
            let right = clip(&features, z2, xf + k2, xf + k4, Axis::X, min_x, max_x, line_metrics);
            drop(features);

            let (tl, bl) = split_y(left);
            let (tr, br) = split_y(right);

            let (cz, cx, cy) = (z + 1, x * 2, y * 2);
            stack.push((tl.unwrap_or_default(), cz, cx, cy));
            stack.push((bl.unwrap_or_default(), cz, cx, cy + 1));
            stack.push((tr.unwrap_or_default(), cz, cx + 1, cy));
            stack.push((br.unwrap_or_default(), cz, cx + 1, cy + 1));
        }
    }

    /// Drop the cached tiles touched by `affected` and rebuild the root from `source`
    pub fn update_index(&mut self, source: &[Arc<Feature>], affected: &[Arc<Feature>]) {
        #[cfg(feature = "profiling")]
        profiling::scope!("tile_index::update_index");

        self.invalidate_tiles(affected);

        let root = create_tile(source, 0, 0, 0, &self.options);
        let mut cached = CachedTile::new(root);
        cached.source = Some(source.to_vec());

        if self.tiles.insert(to_id(0, 0, 0), cached).is_none() {
            self.tile_coords.push((0, 0, 0));
            *self.stats.entry(0).or_default() += 1;
            self.total += 1;
        }
    }

    /// Evict every tile whose buffered bounds overlap an affected feature
    fn invalidate_tiles(&mut self, affected: &[Arc<Feature>]) {
        let bboxes: Vec<Rect<f64>> = affected.iter().filter_map(|f| f.bbox()).collect();
        let Some(union) = bboxes.iter().copied().reduce(|a, b| {
            Rect::new(
                Coord {
                    x: a.min().x.min(b.min().x),
                    y: a.min().y.min(b.min().y),
                },
                Coord {
                    x: a.max().x.max(b.max().x),
                    y: a.max().y.max(b.max().y),
                },
            )
        }) else {
            return;
        };

        let buffer = self.options.buffer_ratio();
        let debug = self.options.debug;
        let Self {
            tiles,
            tile_coords,
            stats,
            total,
            ..
        } = self;

        tiles.retain(|_, cached| {
            let tile = &cached.tile;
            let bounds = tile_bounds(tile.z, tile.x, tile.y, buffer);

            // Fast rejection against the union of all affected features
            if !overlaps(&union, &bounds) || !bboxes.iter().any(|b| overlaps(b, &bounds)) {
                return true;
            }

            if debug > 1 {
                tracing::debug!(
                    "invalidate tile z{}-{}-{} (features: {}, points: {}, simplified: {})",
                    tile.z,
                    tile.x,
                    tile.y,
                    tile.num_features,
                    tile.num_points,
                    tile.num_simplified
                );
            }
            if let Some(count) = stats.get_mut(&tile.z) {
                *count = count.saturating_sub(1);
            }
            *total = total.saturating_sub(1);
            false
        });
        tile_coords.retain(|&(z, x, y)| tiles.contains_key(&to_id(z, x, y)));
    }

    /// A cached tile, without building or transforming it
    #[inline]
    pub fn tile(&self, z: u8, x: u32, y: u32) -> Option<&CachedTile> {
        self.tiles.get(&to_id(z, x, y))
    }

    /// Coordinates of all cached tiles, in creation order
    #[inline]
    pub fn tile_coords(&self) -> &[TileCoord] {
        &self.tile_coords
    }

    /// Number of cached tiles per zoom level
    #[inline]
    pub fn stats(&self) -> &BTreeMap<u8, usize> {
        &self.stats
    }

    /// Total number of cached tiles
    #[inline]
    pub fn total(&self) -> usize {
        self.total
    }

    #[inline]
    pub fn options(&self) -> &Options {
        &self.options
    }
}

/// Bounds of a tile in normalized coordinates, grown by the buffer
fn tile_bounds(z: u8, x: u32, y: u32, buffer: f64) -> Rect<f64> {
    let z2 = (1u64 << z) as f64;
    Rect::new(
        Coord {
            x: (x as f64 - buffer) / z2,
            y: (y as f64 - buffer) / z2,
        },
        Coord {
            x: (x as f64 + 1.0 + buffer) / z2,
            y: (y as f64 + 1.0 + buffer) / z2,
        },
    )
}

/// Whether a feature bbox overlaps tile bounds, the tile's max edges being exclusive
#[inline]
fn overlaps(bbox: &Rect<f64>, tile: &Rect<f64>) -> bool {
    bbox.max().x >= tile.min().x
        && bbox.min().x < tile.max().x
        && bbox.max().y >= tile.min().y
        && bbox.min().y < tile.max().y
}
