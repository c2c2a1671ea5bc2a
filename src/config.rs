use crate::colour::Rgb;
use crate::types::{Tier, VariableClass};
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub plot: PlotConfig,
    #[serde(default)]
    pub palette: PaletteConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub server: ServerConfig,
    pub prepare: Option<PrepareConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub bundle: PathBuf,
    pub groups: PathBuf,
    pub la: TierConfig,
    pub lsoa: TierConfig,
    /// Bundle field holding the area code.
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default = "default_name_field")]
    pub name_field: String,
}

/// Boundary layer and mark settings for one resolution tier.
#[derive(Debug, Deserialize, Clone)]
pub struct TierConfig {
    /// GeoJSON (`.json`/`.geojson`) or Shapefile (`.shp`).
    pub boundaries: PathBuf,
    pub join_property: String,
    pub name_property: String,
    pub mark_radius: f64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct Margin {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PlotConfig {
    pub width: f64,
    pub height: f64,
    pub margin: Margin,
    /// Datasets smaller than this get the force-relaxed beeswarm; larger ones get random jitter.
    pub beeswarm_threshold: usize,
    pub simulation_ticks: usize,
    pub hover_radius: f64,
    pub seed: Option<u64>,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            width: 400.0,
            height: 365.0,
            margin: Margin {
                top: 10.0,
                right: 22.0,
                bottom: 25.0,
                left: 48.0,
            },
            beeswarm_threshold: 100,
            simulation_ticks: 120,
            hover_radius: 12.0,
            seed: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PaletteConfig {
    pub low: String,
    pub neutral: String,
    pub high: String,
    /// Fill for features with no score.
    pub empty: String,
}

impl Default for PaletteConfig {
    fn default() -> Self {
        Self {
            low: "#225fb3".to_string(),
            neutral: "#ffffef".to_string(),
            high: "#dd1661".to_string(),
            empty: "#d9d9d9".to_string(),
        }
    }
}

/// Parsed palette colours.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Palette {
    pub low: Rgb,
    pub neutral: Rgb,
    pub high: Rgb,
    pub empty: Rgb,
}

impl PaletteConfig {
    pub fn parse(&self) -> Result<Palette> {
        let colour = |name: &str, hex: &str| {
            Rgb::from_hex(hex).ok_or_else(|| anyhow!("Invalid {} colour in palette: {:?}", name, hex))
        };
        Ok(Palette {
            low: colour("low", &self.low)?,
            neutral: colour("neutral", &self.neutral)?,
            high: colour("high", &self.high)?,
            empty: colour("empty", &self.empty)?,
        })
    }
}

impl Default for Palette {
    fn default() -> Self {
        PaletteConfig::default()
            .parse()
            .unwrap_or(Palette {
                low: Rgb::new(0x22, 0x5f, 0xb3),
                neutral: Rgb::new(0xff, 0xff, 0xef),
                high: Rgb::new(0xdd, 0x16, 0x61),
                empty: Rgb::new(0xd9, 0xd9, 0xd9),
            })
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub legend_width: u32,
    pub legend_height: u32,
    /// Width in pixels of the choropleth snapshot; height follows the boundary extent.
    pub snapshot_width: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            legend_width: 380,
            legend_height: 10,
            snapshot_width: 800,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            static_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PrepareConfig {
    pub la: MasterTableConfig,
    pub lsoa: MasterTableConfig,
    pub variables: Vec<VariableSpec>,
}

/// One per-tier CSV master table.
#[derive(Debug, Deserialize, Clone)]
pub struct MasterTableConfig {
    pub csv: PathBuf,
    pub id_column: String,
    pub name_column: String,
    pub population_column: String,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Percentage,
    Count,
    Density,
    Rank,
    Per100k,
}

/// Catalogue entry for the bundle builder.
#[derive(Debug, Deserialize, Clone)]
pub struct VariableSpec {
    /// Column name in the master tables and key in the bundle.
    pub name: String,
    pub label: String,
    pub class: VariableClass,
    pub data_type: DataType,
    #[serde(default)]
    pub invert: bool,
    /// Whether the column is also present in the LSOA master table.
    #[serde(default)]
    pub lsoa: bool,
}

fn default_id_field() -> String {
    "area_code".to_string()
}

fn default_name_field() -> String {
    "area_name".to_string()
}

impl InputConfig {
    pub fn tier(&self, tier: Tier) -> &TierConfig {
        match tier {
            Tier::La => &self.la,
            Tier::Lsoa => &self.lsoa,
        }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects geometry and palette settings that would make every redraw fail.
    pub fn validate(&self) -> Result<()> {
        let plot = &self.plot;
        if plot.width <= plot.margin.left + plot.margin.right {
            bail!("Plot width {} leaves no room inside the margins", plot.width);
        }
        if plot.height <= plot.margin.top + plot.margin.bottom {
            bail!("Plot height {} leaves no room inside the margins", plot.height);
        }
        for tier in Tier::ALL {
            let tier_config = self.input.tier(tier);
            if !(tier_config.mark_radius > 0.0) {
                bail!("Mark radius for tier {} must be positive", tier);
            }
            if tier_config.join_property.is_empty() {
                bail!("Join property for tier {} is empty", tier);
            }
        }
        self.palette.parse()?;
        if self.output.legend_width < 2 || self.output.legend_height == 0 {
            bail!("Legend must be at least 2x1 pixels");
        }
        Ok(())
    }
}
