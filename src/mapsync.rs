use crate::colour::Rgb;
use crate::types::Tier;
use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::contains::Contains;
use geo::{MultiPolygon, Point};
use geojson::{Feature, FeatureCollection};
use rstar::{Envelope, RTree, RTreeObject, AABB};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

// Wrapper for RTree indexing
struct FeatureEnvelope {
    id: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for FeatureEnvelope {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

/// Reads a join property the way the boundary files carry it: string or number.
pub fn property_string(feature: &Feature, property: &str) -> Option<String> {
    match feature.properties.as_ref()?.get(property)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn polygon_geometry(feature: &Feature) -> Option<MultiPolygon<f64>> {
    let geometry = feature.geometry.as_ref()?;
    let geo_geom: geo::Geometry<f64> = geometry.value.clone().try_into().ok()?;
    match geo_geom {
        geo::Geometry::MultiPolygon(mp) => Some(mp),
        geo::Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p])),
        _ => None,
    }
}

/// Outcome of pushing area colours onto a boundary layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JoinReport {
    pub matched: usize,
    /// Features with no scored area; they keep the empty fill.
    pub unmatched_features: usize,
    /// Scored areas with no feature on this layer.
    pub unmatched_areas: Vec<String>,
}

/// One tier's boundary features with their live colours and hover state.
pub struct BoundaryLayer {
    pub tier: Tier,
    collection: FeatureCollection,
    join_property: String,
    name_property: String,
    by_key: HashMap<String, usize>,
    geometries: Vec<Option<MultiPolygon<f64>>>,
    tree: RTree<FeatureEnvelope>,
    hovered: HashSet<usize>,
    pub visible: bool,
}

impl BoundaryLayer {
    pub fn new(tier: Tier, collection: FeatureCollection, join_property: &str, name_property: &str) -> Self {
        let mut by_key = HashMap::new();
        let mut duplicates = 0usize;
        for (id, feature) in collection.features.iter().enumerate() {
            match property_string(feature, join_property) {
                Some(key) => {
                    if by_key.contains_key(&key) {
                        duplicates += 1;
                        debug!(tier = %tier, key = %key, "duplicate join key, keeping first feature");
                    } else {
                        by_key.insert(key, id);
                    }
                }
                None => debug!(tier = %tier, feature = id, "feature has no '{}' property", join_property),
            }
        }
        if duplicates > 0 {
            warn!(tier = %tier, duplicates, "boundary layer has duplicate join keys");
        }

        let geometries: Vec<Option<MultiPolygon<f64>>> = collection.features.iter().map(polygon_geometry).collect();
        let envelopes = geometries
            .iter()
            .enumerate()
            .filter_map(|(id, geometry)| {
                let rect = geometry.as_ref()?.bounding_rect()?;
                Some(FeatureEnvelope {
                    id,
                    aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
                })
            })
            .collect();

        Self {
            tier,
            collection,
            join_property: join_property.to_string(),
            name_property: name_property.to_string(),
            by_key,
            geometries,
            tree: RTree::bulk_load(envelopes),
            hovered: HashSet::new(),
            visible: false,
        }
    }

    pub fn collection(&self) -> &FeatureCollection {
        &self.collection
    }

    pub fn len(&self) -> usize {
        self.collection.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.features.is_empty()
    }

    /// Feature id for an area code.
    pub fn feature_id(&self, key: &str) -> Option<usize> {
        self.by_key.get(key).copied()
    }

    pub fn join_key(&self, feature_id: usize) -> Option<String> {
        property_string(self.collection.features.get(feature_id)?, &self.join_property)
    }

    pub fn feature_name(&self, feature_id: usize) -> Option<String> {
        property_string(self.collection.features.get(feature_id)?, &self.name_property)
    }

    pub fn colour(&self, feature_id: usize) -> Option<Rgb> {
        let feature = self.collection.features.get(feature_id)?;
        match feature.properties.as_ref()?.get("colour")? {
            serde_json::Value::String(hex) => Rgb::from_hex(hex),
            _ => None,
        }
    }

    fn set_colour(feature: &mut Feature, colour: Rgb) {
        feature.set_property("colour", colour.to_hex());
    }

    /// Writes each area's colour onto its feature; everything else gets `empty`.
    pub fn apply_colours(&mut self, colours: &HashMap<String, Rgb>, empty: Rgb) -> JoinReport {
        let mut report = JoinReport::default();
        for feature in self.collection.features.iter_mut() {
            let colour = property_string(feature, &self.join_property).and_then(|key| colours.get(&key).copied());
            match colour {
                Some(colour) => {
                    report.matched += 1;
                    Self::set_colour(feature, colour);
                }
                None => {
                    report.unmatched_features += 1;
                    Self::set_colour(feature, empty);
                }
            }
        }
        report.unmatched_areas = colours
            .keys()
            .filter(|key| !self.by_key.contains_key(*key))
            .cloned()
            .collect();
        report.unmatched_areas.sort();

        if report.unmatched_features > 0 || !report.unmatched_areas.is_empty() {
            warn!(
                tier = %self.tier,
                matched = report.matched,
                unmatched_features = report.unmatched_features,
                unmatched_areas = report.unmatched_areas.len(),
                "areas and boundary features did not join one-to-one"
            );
        }
        report
    }

    pub fn fill(&mut self, colour: Rgb) {
        for feature in self.collection.features.iter_mut() {
            Self::set_colour(feature, colour);
        }
    }

    /// Sets or clears hover on a feature; `false` if the id is unknown.
    pub fn set_hover(&mut self, feature_id: usize, hover: bool) -> bool {
        if feature_id >= self.len() {
            return false;
        }
        if hover {
            self.hovered.insert(feature_id);
        } else {
            self.hovered.remove(&feature_id);
        }
        true
    }

    pub fn is_hovered(&self, feature_id: usize) -> bool {
        self.hovered.contains(&feature_id)
    }

    pub fn hovered(&self) -> impl Iterator<Item = usize> + '_ {
        self.hovered.iter().copied()
    }

    pub fn clear_hover(&mut self) {
        self.hovered.clear();
    }

    /// Feature containing the point, if any.
    pub fn feature_at(&self, lon: f64, lat: f64) -> Option<usize> {
        let point = Point::new(lon, lat);
        let envelope = AABB::from_point([lon, lat]);
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .map(|candidate| candidate.id)
            .filter(|id| matches!(&self.geometries[*id], Some(geometry) if geometry.contains(&point)))
            .min()
    }

    /// Extent of all polygon geometry as `(min_lon, min_lat, max_lon, max_lat)`.
    pub fn bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let envelope = self.tree.iter().map(|e| e.aabb).reduce(|a, b| a.merged(&b))?;
        let (lo, hi) = (envelope.lower(), envelope.upper());
        Some((lo[0], lo[1], hi[0], hi[1]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerVisibility {
    pub layer: &'static str,
    pub visible: bool,
}

/// Both tiers' boundary layers.
pub struct MapSync {
    pub la: BoundaryLayer,
    pub lsoa: BoundaryLayer,
}

impl MapSync {
    pub fn new(la: BoundaryLayer, lsoa: BoundaryLayer) -> Self {
        Self { la, lsoa }
    }

    pub fn layer(&self, tier: Tier) -> &BoundaryLayer {
        match tier {
            Tier::La => &self.la,
            Tier::Lsoa => &self.lsoa,
        }
    }

    pub fn layer_mut(&mut self, tier: Tier) -> &mut BoundaryLayer {
        match tier {
            Tier::La => &mut self.la,
            Tier::Lsoa => &mut self.lsoa,
        }
    }

    /// Shows the fill and border layers of `active` and hides the rest.
    pub fn show_only(&mut self, active: Option<Tier>) {
        for tier in Tier::ALL {
            self.layer_mut(tier).visible = Some(tier) == active;
        }
    }

    pub fn visibility(&self) -> Vec<LayerVisibility> {
        Tier::ALL
            .iter()
            .flat_map(|&tier| {
                let visible = self.layer(tier).visible;
                [
                    LayerVisibility {
                        layer: tier.fill_layer(),
                        visible,
                    },
                    LayerVisibility {
                        layer: tier.border_layer(),
                        visible,
                    },
                ]
            })
            .collect()
    }

    /// Pushes colours to `tier`, shows it, and hides the other tier.
    pub fn synchronise(&mut self, tier: Tier, colours: &HashMap<String, Rgb>, empty: Rgb) -> JoinReport {
        self.clear_hover();
        self.show_only(Some(tier));
        self.layer_mut(tier).apply_colours(colours, empty)
    }

    /// Neutral fill everywhere and both tiers hidden.
    pub fn clear(&mut self, empty: Rgb) {
        self.clear_hover();
        for tier in Tier::ALL {
            self.layer_mut(tier).fill(empty);
        }
        self.show_only(None);
    }

    pub fn clear_hover(&mut self) {
        self.la.clear_hover();
        self.lsoa.clear_hover();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use geojson::{Geometry, JsonObject, Value};

    pub(crate) fn square_feature(key: &str, name: &str, x: f64, y: f64) -> Feature {
        let ring = vec![
            vec![x, y],
            vec![x + 1.0, y],
            vec![x + 1.0, y + 1.0],
            vec![x, y + 1.0],
            vec![x, y],
        ];
        let mut properties = JsonObject::new();
        properties.insert("code".to_string(), serde_json::Value::String(key.to_string()));
        properties.insert("name".to_string(), serde_json::Value::String(name.to_string()));
        Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::Polygon(vec![ring]))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }
    }

    pub(crate) fn layer(tier: Tier, keys: &[&str]) -> BoundaryLayer {
        let features = keys
            .iter()
            .enumerate()
            .map(|(i, key)| square_feature(key, &format!("Area {}", key), i as f64 * 2.0, 0.0))
            .collect();
        let collection = FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        };
        BoundaryLayer::new(tier, collection, "code", "name")
    }

    #[test]
    fn colours_join_by_key_and_report_mismatches() {
        let mut la = layer(Tier::La, &["W1", "W2", "W3"]);
        let red = Rgb::new(255, 0, 0);
        let grey = Rgb::new(200, 200, 200);
        let colours: HashMap<String, Rgb> = [("W1".to_string(), red), ("W9".to_string(), red)].into_iter().collect();
        let report = la.apply_colours(&colours, grey);
        assert_eq!(report.matched, 1);
        assert_eq!(report.unmatched_features, 2);
        assert_eq!(report.unmatched_areas, vec!["W9".to_string()]);
        assert_eq!(la.colour(0), Some(red));
        assert_eq!(la.colour(1), Some(grey));
    }

    #[test]
    fn lookup_both_directions() {
        let la = layer(Tier::La, &["W1", "W2"]);
        assert_eq!(la.feature_id("W2"), Some(1));
        assert_eq!(la.join_key(1).as_deref(), Some("W2"));
        assert_eq!(la.feature_name(0).as_deref(), Some("Area W1"));
        assert_eq!(la.feature_id("nope"), None);
    }

    #[test]
    fn duplicate_keys_keep_first() {
        let la = layer(Tier::La, &["W1", "W1", "W2"]);
        assert_eq!(la.feature_id("W1"), Some(0));
        assert_eq!(la.feature_id("W2"), Some(2));
    }

    #[test]
    fn hover_state_toggles() {
        let mut la = layer(Tier::La, &["W1", "W2"]);
        assert!(la.set_hover(1, true));
        assert!(la.is_hovered(1));
        assert!(la.set_hover(1, false));
        assert!(!la.is_hovered(1));
        assert!(!la.set_hover(7, true));
    }

    #[test]
    fn point_query_finds_containing_feature() {
        let la = layer(Tier::La, &["W1", "W2"]);
        assert_eq!(la.feature_at(0.5, 0.5), Some(0));
        assert_eq!(la.feature_at(2.5, 0.5), Some(1));
        assert_eq!(la.feature_at(1.5, 0.5), None);
        assert_eq!(la.bounds(), Some((0.0, 0.0, 3.0, 1.0)));
    }

    #[test]
    fn visibility_follows_active_tier() {
        let mut sync = MapSync::new(layer(Tier::La, &["W1"]), layer(Tier::Lsoa, &["L1"]));
        sync.show_only(Some(Tier::Lsoa));
        let vis = sync.visibility();
        assert_eq!(vis.len(), 4);
        let shown: Vec<&str> = vis.iter().filter(|v| v.visible).map(|v| v.layer).collect();
        assert_eq!(shown, vec!["lower_super_output_areas", "LSOA_borders"]);
        sync.clear(Rgb::new(1, 2, 3));
        assert!(sync.visibility().iter().all(|v| !v.visible));
        assert_eq!(sync.lsoa.colour(0), Some(Rgb::new(1, 2, 3)));
    }
}
