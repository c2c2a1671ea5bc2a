//! Scatterplot and beeswarm layouts.
//!
//! Layouts are plain data: mark positions and colours, axes, grid and
//! reference lines. `svg` turns them into a document and `mapsync` reuses the
//! mark colours for the choropleth.

use crate::colour::{ColourScale, Rgb};
use crate::config::{Margin, Palette, PlotConfig};
use crate::scale::{format_si, LinearScale};
use crate::scoring::{mean, standardise_for_colour};
use crate::swarm::{self, SwarmForces};
use crate::types::VariableClass;
use rand::Rng;
use serde::Serialize;

const GRID_TICKS: usize = 10;
const TICK_SPACING: f64 = 80.0;

/// One area's plotted values.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotInput {
    pub id: String,
    pub name: String,
    pub x: Option<f64>,
    pub y: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlotKind {
    Scatter,
    Beeswarm,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mark {
    pub area_id: String,
    pub area_name: String,
    pub cx: f64,
    pub cy: f64,
    pub r: f64,
    pub stroke_width: f64,
    pub colour: Rgb,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Line {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tick {
    pub value: f64,
    pub position: f64,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Axis {
    pub scale: LinearScale,
    pub ticks: Vec<Tick>,
}

impl Axis {
    fn new(scale: LinearScale, count: usize) -> Self {
        let ticks = scale
            .ticks(count)
            .into_iter()
            .map(|value| Tick {
                value,
                position: scale.apply(value),
                label: format_si(value),
            })
            .collect();
        Self { scale, ticks }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotLayout {
    pub kind: PlotKind,
    pub width: f64,
    pub height: f64,
    #[serde(skip)]
    pub margin: Margin,
    pub x_axis: Axis,
    pub y_axis: Option<Axis>,
    pub grid: Vec<Line>,
    pub mean_lines: Vec<Line>,
    pub regression: Option<Line>,
    pub marks: Vec<Mark>,
    /// Areas left off the plot for lack of a value.
    pub skipped: usize,
    /// Whether the force relaxation placed the marks (as opposed to random jitter).
    pub relaxed: bool,
}

impl PlotLayout {
    pub fn mark(&self, area_id: &str) -> Option<&Mark> {
        self.marks.iter().find(|m| m.area_id == area_id)
    }
}

/// Tooltip anchored up and to the left of a mark.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tooltip {
    pub text: String,
    pub width: f64,
    pub left: f64,
    pub top: f64,
}

impl Tooltip {
    pub fn at(text: &str, cx: f64, cy: f64, rise: f64) -> Self {
        let width = text.chars().count() as f64 * 8.0 + 14.0;
        Self {
            text: text.to_string(),
            width,
            left: cx - width + 15.0,
            top: cy - rise,
        }
    }
}

/// Radius and stroke of the marks for one redraw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkStyle {
    pub radius: f64,
    pub stroke_width: f64,
}

impl MarkStyle {
    /// `plotted` counts the areas that actually get a mark, so the stroke
    /// switches at the same point as the beeswarm layout.
    pub fn for_dataset(radius: f64, plotted: usize, config: &PlotConfig) -> Self {
        let stroke_width = if plotted < config.beeswarm_threshold { 1.5 } else { 0.25 };
        Self { radius, stroke_width }
    }
}

fn x_range(config: &PlotConfig) -> (f64, f64) {
    (config.margin.left, config.width - config.margin.right)
}

fn y_range(config: &PlotConfig) -> (f64, f64) {
    (config.height - config.margin.bottom, config.margin.top)
}

fn vertical_grid(x: &LinearScale, config: &PlotConfig) -> Vec<Line> {
    x.ticks(GRID_TICKS)
        .into_iter()
        .map(|t| Line {
            x1: 0.5 + x.apply(t),
            x2: 0.5 + x.apply(t),
            y1: config.margin.top,
            y2: config.height - config.margin.bottom,
        })
        .collect()
}

fn horizontal_grid(y: &LinearScale, config: &PlotConfig) -> Vec<Line> {
    y.ticks(GRID_TICKS)
        .into_iter()
        .map(|t| Line {
            y1: 0.5 + y.apply(t),
            y2: 0.5 + y.apply(t),
            x1: config.margin.left,
            x2: config.width - config.margin.right,
        })
        .collect()
}

fn vertical_mean(x: &LinearScale, mean_x: f64, config: &PlotConfig) -> Line {
    let place = x.apply(mean_x);
    Line {
        x1: place,
        x2: place,
        y1: config.margin.top,
        y2: config.height - config.margin.bottom,
    }
}

/// Least-squares fit drawn across the x extent.
fn regression(points: &[(f64, f64)]) -> Option<((f64, f64), (f64, f64))> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let my = points.iter().map(|p| p.1).sum::<f64>() / n;
    let (sxy, sxx) = points.iter().fold((0.0, 0.0), |(sxy, sxx), (x, y)| {
        (sxy + (x - mx) * (y - my), sxx + (x - mx) * (x - mx))
    });
    if sxx == 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    let intercept = my - slope * mx;
    let lo = points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let hi = points.iter().map(|p| p.0).fold(f64::NEG_INFINITY, f64::max);
    Some(((lo, intercept + slope * lo), (hi, intercept + slope * hi)))
}

/// Need on x, support on y, coloured by the difference of their z-scores.
pub fn scatterplot(inputs: &[PlotInput], radius: f64, config: &PlotConfig, palette: &Palette) -> PlotLayout {
    let complete: Vec<(&PlotInput, f64, f64)> = inputs
        .iter()
        .filter_map(|p| Some((p, p.x?, p.y?)))
        .collect();
    let skipped = inputs.len() - complete.len();
    let style = MarkStyle::for_dataset(radius, complete.len(), config);

    let x = LinearScale::from_extent(complete.iter().map(|c| c.1), x_range(config)).nice(GRID_TICKS);
    let y = LinearScale::from_extent(complete.iter().map(|c| c.2), y_range(config)).nice(GRID_TICKS);

    let xs: Vec<Option<f64>> = complete.iter().map(|c| Some(c.1)).collect();
    let ys: Vec<Option<f64>> = complete.iter().map(|c| Some(c.2)).collect();
    let difference: Vec<f64> = standardise_for_colour(&xs)
        .into_iter()
        .zip(standardise_for_colour(&ys))
        .map(|(zx, zy)| zx.unwrap_or(0.0) - zy.unwrap_or(0.0))
        .collect();
    let colours = ColourScale::diverging(&difference, palette);

    let mean_x = mean(xs.iter().copied()).unwrap_or(0.0);
    let mean_y = mean(ys.iter().copied()).unwrap_or(0.0);
    let mean_place = y.apply(mean_y);
    let mean_lines = vec![
        vertical_mean(&x, mean_x, config),
        Line {
            x1: config.margin.left,
            x2: config.width - config.margin.right,
            y1: mean_place,
            y2: mean_place,
        },
    ];

    let pairs: Vec<(f64, f64)> = complete.iter().map(|c| (c.1, c.2)).collect();
    let regression = regression(&pairs).map(|((x0, y0), (x1, y1))| Line {
        x1: x.apply(x0),
        y1: y.apply(y0),
        x2: x.apply(x1),
        y2: y.apply(y1),
    });

    let mut grid = vertical_grid(&x, config);
    grid.extend(horizontal_grid(&y, config));

    let marks = complete
        .iter()
        .zip(&difference)
        .map(|((input, vx, vy), d)| Mark {
            area_id: input.id.clone(),
            area_name: input.name.clone(),
            cx: x.apply(*vx),
            cy: y.apply(*vy),
            r: style.radius,
            stroke_width: style.stroke_width,
            colour: colours.colour(*d),
        })
        .collect();

    PlotLayout {
        kind: PlotKind::Scatter,
        width: config.width,
        height: config.height,
        margin: config.margin,
        x_axis: Axis::new(x, (config.width / TICK_SPACING) as usize),
        y_axis: Some(Axis::new(y, GRID_TICKS)),
        grid,
        mean_lines,
        regression,
        marks,
        skipped,
        relaxed: false,
    }
}

/// One-axis layout, coloured by the sequential ramp of `class`, or the diverging ramp when `None`.
pub fn beeswarm<R: Rng>(
    inputs: &[PlotInput],
    class: Option<VariableClass>,
    radius: f64,
    config: &PlotConfig,
    palette: &Palette,
    rng: &mut R,
) -> PlotLayout {
    let complete: Vec<(&PlotInput, f64)> = inputs.iter().filter_map(|p| Some((p, p.x?))).collect();
    let skipped = inputs.len() - complete.len();
    let style = MarkStyle::for_dataset(radius, complete.len(), config);

    let x = LinearScale::from_extent(complete.iter().map(|c| c.1), x_range(config)).nice(GRID_TICKS);

    let xs: Vec<Option<f64>> = complete.iter().map(|c| Some(c.1)).collect();
    let z: Vec<f64> = standardise_for_colour(&xs)
        .into_iter()
        .map(|v| v.unwrap_or(0.0))
        .collect();
    let colours = match class {
        Some(VariableClass::Support) => ColourScale::support(&z, palette),
        Some(VariableClass::Challenge) => ColourScale::need(&z, palette),
        None => ColourScale::diverging(&z, palette),
    };

    let relaxed = complete.len() < config.beeswarm_threshold;
    let positions: Vec<(f64, f64)> = if relaxed {
        let targets: Vec<f64> = complete.iter().map(|c| x.apply(c.1)).collect();
        let forces = SwarmForces {
            x_strength: 5.0,
            y_strength: 0.1,
            y_target: config.height / 2.0,
            collide_radius: style.radius * 1.5,
            ticks: config.simulation_ticks,
        };
        swarm::relax(&targets, &forces, rng)
    } else {
        let y = LinearScale::new((-3.0, 3.0), y_range(config)).nice(GRID_TICKS);
        complete
            .iter()
            .map(|c| (x.apply(c.1), y.apply(swarm::jitter(rng))))
            .collect()
    };

    let mean_x = mean(xs.iter().copied()).unwrap_or(0.0);

    let marks = complete
        .iter()
        .zip(&z)
        .zip(positions)
        .map(|(((input, _), z), (cx, cy))| Mark {
            area_id: input.id.clone(),
            area_name: input.name.clone(),
            cx,
            cy,
            r: style.radius,
            stroke_width: style.stroke_width,
            colour: colours.colour(*z),
        })
        .collect();

    PlotLayout {
        kind: PlotKind::Beeswarm,
        width: config.width,
        height: config.height,
        margin: config.margin,
        x_axis: Axis::new(x, (config.width / TICK_SPACING) as usize),
        y_axis: None,
        grid: vertical_grid(&x, config),
        mean_lines: vec![vertical_mean(&x, mean_x, config)],
        regression: None,
        marks,
        skipped,
        relaxed,
    }
}
