use crate::colour::ColourScale;
use crate::config::{AppConfig, Palette};
use crate::dashboard::{Dashboard, Event};
use crate::data;
use crate::mapsync::BoundaryLayer;
use crate::svg;
use crate::types::Tier;
use anyhow::{Context, Result};
use image::{ImageOutputFormat, Rgba, RgbaImage};
use rayon::prelude::*;
use std::f64::consts::PI;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use tracing::{info, warn};

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Horizontal diverging ramp, low on the left and high on the right.
pub fn legend(palette: &Palette, width: u32, height: u32) -> RgbaImage {
    let ramp = ColourScale::diverging(&[0.0, 1.0], palette).ramp(width as usize);
    RgbaImage::from_fn(width, height, |x, _| ramp[x as usize].to_rgba())
}

pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .context("Failed to encode PNG")?;
    Ok(bytes)
}

// Web Mercator, normalised to [0, 1] on both axes
fn lat_lon_to_world(lat: f64, lon: f64) -> (f64, f64) {
    let x = (lon + 180.0) / 360.0;
    let lat_rad = lat.to_radians();
    let y = (1.0 - (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() / PI) / 2.0;
    (x, y)
}

fn world_to_lat_lon(x: f64, y: f64) -> (f64, f64) {
    let lon = x * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * y)).sinh().atan().to_degrees();
    (lat, lon)
}

/// Rasterises a layer's current fill over its own extent. `None` for a layer
/// without polygon geometry.
pub fn snapshot(layer: &BoundaryLayer, width: u32) -> Option<RgbaImage> {
    let (min_lon, min_lat, max_lon, max_lat) = layer.bounds()?;
    let (x0, y0) = lat_lon_to_world(max_lat, min_lon);
    let (x1, y1) = lat_lon_to_world(min_lat, max_lon);
    if width == 0 || x1 <= x0 || y1 <= y0 {
        return None;
    }
    let scale = width as f64 / (x1 - x0);
    let height = ((y1 - y0) * scale).ceil().max(1.0) as u32;

    let mut img = RgbaImage::new(width, height);
    let row_len = width as usize * 4;
    img.par_chunks_mut(row_len).enumerate().for_each(|(row, pixels)| {
        let wy = y0 + (row as f64 + 0.5) / scale;
        for (col, pixel) in pixels.chunks_mut(4).enumerate() {
            let wx = x0 + (col as f64 + 0.5) / scale;
            let (lat, lon) = world_to_lat_lon(wx, wy);
            let colour = layer
                .feature_at(lon, lat)
                .and_then(|id| layer.colour(id))
                .map(|c| c.to_rgba())
                .unwrap_or(TRANSPARENT);
            pixel.copy_from_slice(&colour.0);
        }
    });
    Some(img)
}

/// Writes the plot, boundaries with colours, view, legend and snapshot for the
/// dashboard's current selection.
pub fn write_outputs(config: &AppConfig, dashboard: &Dashboard, dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create output directory {:?}", dir))?;

    match &dashboard.current().plot {
        Some(layout) => {
            let path = dir.join("plot.svg");
            fs::write(&path, svg::render_svg(layout)).with_context(|| format!("Failed to write {:?}", path))?;
        }
        None => info!("Nothing selected, skipping plot"),
    }

    for tier in Tier::ALL {
        let path = dir.join(format!("boundaries_{}.geojson", tier.to_string().to_lowercase()));
        let text = serde_json::to_string(dashboard.map().layer(tier).collection())?;
        fs::write(&path, text).with_context(|| format!("Failed to write {:?}", path))?;
    }

    let path = dir.join("view.json");
    fs::write(&path, serde_json::to_string_pretty(&dashboard.view())?)
        .with_context(|| format!("Failed to write {:?}", path))?;

    let path = dir.join("legend.png");
    legend(dashboard.palette(), config.output.legend_width, config.output.legend_height)
        .save(&path)
        .with_context(|| format!("Failed to save {:?}", path))?;

    let tier = dashboard.current().tier.unwrap_or(Tier::La);
    match snapshot(dashboard.map().layer(tier), config.output.snapshot_width) {
        Some(img) => {
            let path = dir.join("snapshot.png");
            img.save(&path).with_context(|| format!("Failed to save {:?}", path))?;
        }
        None => warn!(tier = %tier, "No polygon geometry to rasterise"),
    }

    info!(dir = ?dir, "outputs written");
    Ok(())
}

/// Loads everything, applies the requested selection (or the default one) and writes outputs.
pub fn run(config: &AppConfig, selection: Option<(Vec<String>, Vec<String>)>) -> Result<()> {
    let assets = data::load_all_blocking(config)?;
    let mut dashboard = Dashboard::new(assets, config)?;
    if let Some((supports, needs)) = selection {
        dashboard
            .dispatch(Event::SelectionChanged { supports, needs })
            .context("Failed to draw the requested selection")?;
    }
    write_outputs(config, &dashboard, &config.output.dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colour::Rgb;
    use crate::mapsync::tests::layer;

    #[test]
    fn legend_runs_low_to_high() {
        let palette = Palette::default();
        let img = legend(&palette, 380, 10);
        assert_eq!(img.dimensions(), (380, 10));
        assert_eq!(*img.get_pixel(0, 5), palette.low.to_rgba());
        assert_eq!(*img.get_pixel(379, 0), palette.high.to_rgba());
        assert!(encode_png(&img).unwrap().starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[test]
    fn mercator_round_trip() {
        for (lat, lon) in [(52.4, -3.9), (0.0, 0.0), (-33.9, 151.2)] {
            let (x, y) = lat_lon_to_world(lat, lon);
            let (lat2, lon2) = world_to_lat_lon(x, y);
            assert!((lat - lat2).abs() < 1e-9);
            assert!((lon - lon2).abs() < 1e-9);
        }
    }

    #[test]
    fn snapshot_paints_features_and_leaves_gaps() {
        let mut la = layer(Tier::La, &["W1", "W2"]);
        let red = Rgb::new(255, 0, 0);
        la.fill(red);
        let img = snapshot(&la, 30).unwrap();
        assert_eq!(img.width(), 30);
        let mid = img.height() / 2;
        assert_eq!(*img.get_pixel(5, mid), red.to_rgba());
        assert_eq!(*img.get_pixel(15, mid), TRANSPARENT);
        assert_eq!(*img.get_pixel(25, mid), red.to_rgba());
    }
}
