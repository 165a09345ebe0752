//! The tile index over a GeoJSON source
//!
//! [`GeoJsonVt`] converts and wraps the input once, then routes tile queries either to a
//! [`TileIndex`] or, when clustering is enabled, to a [`Supercluster`]. Updateable indices
//! keep the converted source so diffs can be applied later.

use crate::convert::convert;
use crate::deconvert::{convert_to_geojson, feature_to_geojson};
use crate::difference::{SourceDiff, apply_source_diff};
use crate::wrap::wrap;
use crate::{
    ClusterOptions, Feature, FeatureId, MAX_TILE_ZOOM, Options, Result, Supercluster, Tile,
    TileIndex, VtError,
};

use geojson::GeoJson;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

/// Where tiles come from
#[derive(Debug, Clone)]
enum DataHandler {
    Tiles(TileIndex),
    Clusters(Supercluster),
}

impl DataHandler {
    fn build(features: Vec<Arc<Feature>>, options: &Options) -> Result<Self> {
        if options.cluster {
            let mut index = Supercluster::new(options.cluster_options.clone())?;
            index.load_internal(&features)?;
            Ok(Self::Clusters(index))
        } else {
            Ok(Self::Tiles(TileIndex::new(features, options.clone())))
        }
    }

    fn update_index(&mut self, source: &[Arc<Feature>], affected: &[Arc<Feature>]) -> Result<()> {
        match self {
            Self::Tiles(index) => index.update_index(source, affected),
            Self::Clusters(index) => {
                index.load_internal(source)?;
            }
        }
        Ok(())
    }
}

/// Vector tile index over GeoJSON data
#[derive(Debug, Clone)]
pub struct GeoJsonVt {
    options: Options,
    /// Converted features, kept only for updateable indices
    source: Option<Vec<Arc<Feature>>>,
    handler: DataHandler,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl GeoJsonVt {
    /// Build an index over any GeoJSON object
    ///
    /// # Arguments
    ///
    /// * `data` - Feature, feature collection or bare geometry
    /// * `options` - Index configuration, validated once here
    ///
    /// # Returns
    ///
    /// The index, or an error for invalid options or malformed coordinates
    pub fn new(data: &GeoJson, options: Options) -> Result<Self> {
        #[cfg(feature = "profiling")]
        profiling::scope!("GeoJsonVt::new");

        options.validate()?;

        let start = Instant::now();
        let features = convert(data, &options)?;

        if options.debug > 0 {
            tracing::info!("preprocess data took {:?}", start.elapsed());
            tracing::info!(
                "index: maxZoom: {}, maxPoints: {}",
                options.index_max_zoom,
                options.index_max_points
            );
        }

        // Wrap features crossing the antimeridian
        let features = wrap(features.into_iter().map(Arc::new).collect(), &options);

        // Updateable indices keep a copy of the simplified features
        let source = options.updateable.then(|| features.clone());
        let handler = DataHandler::build(features, &options)?;

        Ok(Self {
            options,
            source,
            handler,
        })
    }

    /// Parse GeoJSON text and build an index over it
    pub fn parse(text: &str, options: Options) -> Result<Self> {
        let data: GeoJson = text.parse()?;
        Self::new(&data, options)
    }

    /// A tile in tile-local integer coordinates
    ///
    /// Returns `None` for zoom levels above 24 or where there is no data. Returned tiles
    /// are snapshots and are not affected by later updates.
    pub fn get_tile(&mut self, z: u8, x: u32, y: u32) -> Option<Arc<Tile>> {
        if z > MAX_TILE_ZOOM {
            return None;
        }
        match &mut self.handler {
            DataHandler::Tiles(index) => index.get_tile(z, x, y),
            DataHandler::Clusters(index) => Some(Arc::new(index.get_tile(z, x, y))),
        }
    }

    /// Apply a diff to the source data and invalidate the affected tiles
    pub fn update_data(&mut self, diff: &SourceDiff) -> Result<()> {
        self.apply_update(diff, None)
    }

    /// Apply a diff, then drop every feature with an id that fails `filter`
    ///
    /// The filter sees features in their GeoJSON form.
    pub fn update_data_with_filter(
        &mut self,
        diff: &SourceDiff,
        filter: impl Fn(&geojson::Feature) -> bool,
    ) -> Result<()> {
        self.apply_update(diff, Some(&filter))
    }

    fn apply_update(
        &mut self,
        diff: &SourceDiff,
        filter: Option<&dyn Fn(&geojson::Feature) -> bool>,
    ) -> Result<()> {
        #[cfg(feature = "profiling")]
        profiling::scope!("GeoJsonVt::update_data");

        let source = self.source.as_deref().ok_or(VtError::NotUpdateable {
            operation: "update data",
        })?;

        let (mut source, mut affected) = apply_source_diff(source, diff, &self.options)?;
        if let Some(filter) = filter {
            filter_update(&mut source, &mut affected, filter);
        }

        // Nothing has changed
        if affected.is_empty() {
            return Ok(());
        }

        if self.options.debug > 0 {
            tracing::info!(
                "update: {} features affected, {} in source",
                affected.len(),
                source.len()
            );
        }

        self.handler.update_index(&source, &affected)?;
        self.source = Some(source);
        Ok(())
    }

    /// Switch clustering on or off, or change its options, and rebuild from the source
    pub fn update_cluster_options(
        &mut self,
        cluster: bool,
        cluster_options: ClusterOptions,
    ) -> Result<()> {
        let source = self.source.as_deref().ok_or(VtError::NotUpdateable {
            operation: "update cluster options",
        })?;

        let options = Options {
            cluster,
            cluster_options,
            ..self.options.clone()
        };
        options.validate()?;

        match &mut self.handler {
            DataHandler::Tiles(index) if !cluster => index.update_index(source, &[]),
            handler => *handler = DataHandler::build(source.to_vec(), &options)?,
        }
        self.options = options;
        Ok(())
    }

    /// The source data as a GeoJSON feature collection
    pub fn get_data(&self) -> Result<GeoJson> {
        let source = self.source.as_deref().ok_or(VtError::NotUpdateable {
            operation: "retrieve data",
        })?;
        Ok(convert_to_geojson(source))
    }

    /// The first source feature with the given id, as GeoJSON
    ///
    /// Geometry collections are stored as one feature per member sharing the same id,
    /// only the first member is returned.
    pub fn get_feature_by_id(&self, id: &FeatureId) -> Result<Option<geojson::Feature>> {
        let source = self.source.as_deref().ok_or(VtError::NotUpdateable {
            operation: "retrieve data",
        })?;
        Ok(source
            .iter()
            .find(|f| f.id.as_ref() == Some(id))
            .map(|f| feature_to_geojson(f)))
    }

    /// Zoom at which a cluster breaks up, `None` without clustering or for unknown ids
    pub fn get_cluster_expansion_zoom(&self, cluster_id: u64) -> Option<u8> {
        self.cluster_index()?
            .get_cluster_expansion_zoom(cluster_id)
            .ok()
    }

    /// Immediate children of a cluster, `None` without clustering or for unknown ids
    pub fn get_cluster_children(&self, cluster_id: u64) -> Option<Vec<geojson::Feature>> {
        self.cluster_index()?.get_children(cluster_id).ok()
    }

    /// Points under a cluster, `None` without clustering or for unknown ids
    pub fn get_cluster_leaves(
        &self,
        cluster_id: u64,
        limit: usize,
        offset: usize,
    ) -> Option<Vec<geojson::Feature>> {
        self.cluster_index()?
            .get_leaves(cluster_id, limit, offset)
            .ok()
    }

    #[inline]
    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Converted source features, if the index is updateable
    #[inline]
    pub fn source(&self) -> Option<&[Arc<Feature>]> {
        self.source.as_deref()
    }

    /// The tile cache, unless clustering is enabled
    #[inline]
    pub fn tile_index(&self) -> Option<&TileIndex> {
        match &self.handler {
            DataHandler::Tiles(index) => Some(index),
            DataHandler::Clusters(_) => None,
        }
    }

    /// The cluster index, if clustering is enabled
    #[inline]
    pub fn cluster_index(&self) -> Option<&Supercluster> {
        match &self.handler {
            DataHandler::Clusters(index) => Some(index),
            DataHandler::Tiles(_) => None,
        }
    }
}

/// Remove every feature with an id rejected by `predicate`, marking it affected
fn filter_update(
    source: &mut Vec<Arc<Feature>>,
    affected: &mut Vec<Arc<Feature>>,
    predicate: &dyn Fn(&geojson::Feature) -> bool,
) {
    let mut remove = HashSet::new();
    for feature in source.iter() {
        let Some(id) = &feature.id else {
            continue;
        };
        if predicate(&feature_to_geojson(feature)) {
            continue;
        }
        affected.push(feature.clone());
        remove.insert(id.clone());
    }
    if !remove.is_empty() {
        source.retain(|f| f.id.as_ref().is_none_or(|id| !remove.contains(id)));
    }
}
