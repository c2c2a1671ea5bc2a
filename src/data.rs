use crate::config::{AppConfig, InputConfig, TierConfig};
use crate::types::{AreaRecord, DataBundle, VariableDescriptor};
use anyhow::{anyhow, Context, Result};
use geo::MultiPolygon;
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject};
use serde::Deserialize;
use serde_json::Value;
use shapefile::Reader;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Everything the dashboard needs before it can draw.
#[derive(Debug, Clone)]
pub struct Assets {
    pub bundle: DataBundle,
    pub la: FeatureCollection,
    pub lsoa: FeatureCollection,
    pub groups: FeatureCollection,
}

/// Whether the dashboard finished loading.
#[derive(Debug, Clone)]
pub enum LoadState {
    Ready(Box<Assets>),
    /// A required asset failed to load; the dashboard stays uninitialised.
    Unavailable(String),
}

impl LoadState {
    pub fn from_result(result: Result<Assets>) -> Self {
        match result {
            Ok(assets) => LoadState::Ready(Box::new(assets)),
            Err(e) => {
                error!("data unavailable: {:#}", e);
                LoadState::Unavailable(format!("{:#}", e))
            }
        }
    }
}

#[derive(Deserialize)]
struct RawBundle {
    variables: Vec<VariableDescriptor>,
    #[serde(rename = "LAs")]
    las: RawRecords,
    #[serde(rename = "LSOAs")]
    lsoas: RawRecords,
}

// The bundle generator writes each tier as a JSON string holding the records.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawRecords {
    Rows(Vec<JsonObject>),
    Encoded(String),
}

impl RawRecords {
    fn into_rows(self) -> Result<Vec<JsonObject>> {
        match self {
            RawRecords::Rows(rows) => Ok(rows),
            RawRecords::Encoded(text) => {
                serde_json::from_str(&text).context("Failed to parse encoded area records")
            }
        }
    }
}

fn id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn to_records(rows: Vec<JsonObject>, input: &InputConfig, tier: &str) -> Vec<AreaRecord> {
    let mut skipped = 0usize;
    let records: Vec<AreaRecord> = rows
        .into_iter()
        .filter_map(|row| {
            let id = match id_string(row.get(&input.id_field)) {
                Some(id) => id,
                None => {
                    skipped += 1;
                    return None;
                }
            };
            let name = match row.get(&input.name_field) {
                Some(Value::String(s)) => s.clone(),
                _ => id.clone(),
            };
            let values: HashMap<String, Option<f64>> = row
                .into_iter()
                .filter(|(key, _)| key != &input.id_field && key != &input.name_field)
                .filter_map(|(key, value)| match value {
                    Value::Number(n) => Some((key, n.as_f64())),
                    Value::Null => Some((key, None)),
                    _ => None,
                })
                .collect();
            Some(AreaRecord { id, name, values })
        })
        .collect();
    if skipped > 0 {
        warn!(tier, skipped, "area records without '{}' were dropped", input.id_field);
    }
    records
}

pub fn parse_bundle(text: &str, input: &InputConfig) -> Result<DataBundle> {
    let raw: RawBundle = serde_json::from_str(text).context("Failed to parse data bundle")?;
    let las = to_records(raw.las.into_rows()?, input, "LA");
    let lsoas = to_records(raw.lsoas.into_rows()?, input, "LSOA");
    Ok(DataBundle {
        variables: raw.variables,
        las,
        lsoas,
    })
}

pub fn load_bundle(input: &InputConfig) -> Result<DataBundle> {
    let text = std::fs::read_to_string(&input.bundle)
        .with_context(|| format!("Failed to read data bundle: {:?}", input.bundle))?;
    let bundle = parse_bundle(&text, input)?;
    info!(
        variables = bundle.variables.len(),
        las = bundle.las.len(),
        lsoas = bundle.lsoas.len(),
        "loaded data bundle"
    );
    Ok(bundle)
}

/// Reads a GeoJSON FeatureCollection.
pub fn load_feature_collection(path: &Path) -> Result<FeatureCollection> {
    let file = File::open(path).with_context(|| format!("Failed to open GeoJSON file: {:?}", path))?;
    let reader = BufReader::new(file);
    // loads the whole file into memory
    let geojson = GeoJson::from_reader(reader).with_context(|| format!("Failed to parse GeoJSON: {:?}", path))?;
    match geojson {
        GeoJson::FeatureCollection(fc) => Ok(fc),
        _ => Err(anyhow!("GeoJSON must be a FeatureCollection: {:?}", path)),
    }
}

/// Boundary layer for one tier, from GeoJSON or a Shapefile.
pub fn load_boundaries(tier: &TierConfig) -> Result<FeatureCollection> {
    let extension = tier
        .boundaries
        .extension()
        .and_then(|e| e.to_str())
        .map(|s: &str| s.to_lowercase())
        .ok_or_else(|| anyhow!("Boundary file has no extension: {:?}", tier.boundaries))?;

    let collection = match extension.as_str() {
        "shp" => load_shapefile(tier)?,
        "json" | "geojson" => load_feature_collection(&tier.boundaries)?,
        _ => return Err(anyhow!("Unsupported geometry format: {}", extension)),
    };
    info!(path = ?tier.boundaries, features = collection.features.len(), "loaded boundaries");
    Ok(collection)
}

fn dbase_to_json(value: &shapefile::dbase::FieldValue) -> Option<Value> {
    use shapefile::dbase::FieldValue;
    match value {
        FieldValue::Character(Some(s)) => Some(Value::String(s.trim().to_string())),
        FieldValue::Numeric(Some(n)) => serde_json::Number::from_f64(*n).map(Value::Number),
        _ => None,
    }
}

fn load_shapefile(tier: &TierConfig) -> Result<FeatureCollection> {
    let mut reader = Reader::from_path(&tier.boundaries)
        .with_context(|| format!("Failed to open Shapefile: {:?}", tier.boundaries))?;

    let mut features = Vec::new();
    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result?;

        let geometry: MultiPolygon<f64> = match shape {
            shapefile::Shape::Polygon(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygon: {:?}", e))?,
            shapefile::Shape::PolygonM(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygonM: {:?}", e))?,
            shapefile::Shape::PolygonZ(polygon) => polygon
                .try_into()
                .map_err(|e| anyhow!("Failed to convert polygonZ: {:?}", e))?,
            _ => continue, // Skip non-polygon shapes
        };

        let mut properties = JsonObject::new();
        for column in [&tier.join_property, &tier.name_property] {
            if let Some(value) = record.get(column).and_then(dbase_to_json) {
                properties.insert(column.clone(), value);
            }
        }
        if !properties.contains_key(&tier.join_property) {
            debug!("shape without '{}' skipped", tier.join_property);
            continue;
        }

        features.push(Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(&geometry))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        });
    }

    Ok(FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
}

pub fn load_all_blocking(config: &AppConfig) -> Result<Assets> {
    Ok(Assets {
        bundle: load_bundle(&config.input)?,
        la: load_boundaries(&config.input.la)?,
        lsoa: load_boundaries(&config.input.lsoa)?,
        groups: load_feature_collection(&config.input.groups)?,
    })
}

async fn joined<T>(handle: JoinHandle<Result<T>>) -> Result<T> {
    handle.await.context("Loader task failed")?
}

/// Loads all assets concurrently; the dashboard starts only once every one has arrived.
pub async fn load_all(config: &AppConfig) -> LoadState {
    let input = config.input.clone();
    let bundle = tokio::task::spawn_blocking({
        let input = input.clone();
        move || load_bundle(&input)
    });
    let la = tokio::task::spawn_blocking({
        let tier = input.la.clone();
        move || load_boundaries(&tier)
    });
    let lsoa = tokio::task::spawn_blocking({
        let tier = input.lsoa.clone();
        move || load_boundaries(&tier)
    });
    let groups = tokio::task::spawn_blocking({
        let path = input.groups.clone();
        move || load_feature_collection(&path)
    });

    let result = tokio::try_join!(joined(bundle), joined(la), joined(lsoa), joined(groups))
        .map(|(bundle, la, lsoa, groups)| Assets { bundle, la, lsoa, groups });
    LoadState::from_result(result)
}
