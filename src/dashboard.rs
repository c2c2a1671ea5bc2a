//! Selection controller and event dispatcher.
//!
//! [`redraw`] is a pure function from loaded data and a selection to a plot
//! plus per-area colours. [`Dashboard`] owns the live state (map layers, hover,
//! current view) and turns each [`Event`] into a list of [`Effect`]s for
//! whatever front end is drawing.

use crate::colour::Rgb;
use crate::config::{AppConfig, Palette, PlotConfig};
use crate::data::Assets;
use crate::groups::{groups_from_features, CommunityGroup, Popup};
use crate::mapsync::{BoundaryLayer, JoinReport, LayerVisibility, MapSync};
use crate::plot::{self, PlotInput, PlotLayout, Tooltip};
use crate::scoring::{self, ScoreError};
use crate::types::{DataBundle, Tier, VariableClass, VariableDescriptor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

const OVERLAY_RADIUS: f64 = 6.0;
const HOVER_STROKE: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DashboardError {
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("no {0} areas loaded")]
    NoAreas(Tier),
    #[error(transparent)]
    Score(#[from] ScoreError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    #[serde(default)]
    pub supports: Vec<String>,
    #[serde(default)]
    pub needs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionState {
    NoSelection,
    SupportOnly,
    NeedOnly,
    Both,
}

impl Selection {
    pub fn new(supports: Vec<String>, needs: Vec<String>) -> Self {
        Self { supports, needs }
    }

    pub fn state(&self) -> SelectionState {
        match (self.supports.is_empty(), self.needs.is_empty()) {
            (true, true) => SelectionState::NoSelection,
            (false, true) => SelectionState::SupportOnly,
            (true, false) => SelectionState::NeedOnly,
            (false, false) => SelectionState::Both,
        }
    }

    pub fn variables(&self) -> impl Iterator<Item = &String> {
        self.supports.iter().chain(self.needs.iter())
    }
}

/// LSOA only when every selected variable exists at LSOA; `None` for an empty selection.
pub fn active_tier(variables: &[VariableDescriptor], selection: &Selection) -> Result<Option<Tier>, DashboardError> {
    let mut fine = true;
    let mut any = false;
    for name in selection.variables() {
        let descriptor = variables
            .iter()
            .find(|v| &v.name == name)
            .ok_or_else(|| DashboardError::UnknownVariable(name.clone()))?;
        any = true;
        fine &= descriptor.lsoa;
    }
    Ok(any.then_some(if fine { Tier::Lsoa } else { Tier::La }))
}

/// Plot, radius and palette settings a redraw needs.
#[derive(Debug, Clone)]
pub struct Settings {
    pub plot: PlotConfig,
    pub palette: Palette,
    pub la_radius: f64,
    pub lsoa_radius: f64,
}

impl Settings {
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        Ok(Self {
            plot: config.plot.clone(),
            palette: config.palette.parse()?,
            la_radius: config.input.la.mark_radius,
            lsoa_radius: config.input.lsoa.mark_radius,
        })
    }

    pub fn radius(&self, tier: Tier) -> f64 {
        match tier {
            Tier::La => self.la_radius,
            Tier::Lsoa => self.lsoa_radius,
        }
    }
}

/// Axis captions shown beside the plot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Captions {
    pub x: Option<&'static str>,
    pub y: Option<&'static str>,
}

/// Result of one redraw, before it is pushed to the map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Redraw {
    pub tier: Option<Tier>,
    pub x_variable: Option<String>,
    pub y_variable: Option<String>,
    pub plot: Option<PlotLayout>,
    pub captions: Captions,
    #[serde(skip)]
    pub colours: HashMap<String, Rgb>,
}

impl Redraw {
    fn cleared() -> Self {
        Self {
            tier: None,
            x_variable: None,
            y_variable: None,
            plot: None,
            captions: Captions::default(),
            colours: HashMap::new(),
        }
    }
}

fn axis_name(selected: &[String], composite: &str) -> String {
    match selected {
        [single] => single.clone(),
        _ => composite.to_string(),
    }
}

/// Scores the selection, lays out the plot and derives one colour per area.
pub fn redraw<R: Rng>(
    bundle: &DataBundle,
    selection: &Selection,
    settings: &Settings,
    rng: &mut R,
) -> Result<Redraw, DashboardError> {
    let tier = match active_tier(&bundle.variables, selection)? {
        Some(tier) => tier,
        None => return Ok(Redraw::cleared()),
    };
    let records = bundle.records(tier);
    if records.is_empty() {
        return Err(DashboardError::NoAreas(tier));
    }

    let supports = if selection.supports.is_empty() {
        None
    } else {
        Some(scoring::composite(&selection.supports, records)?)
    };
    let needs = if selection.needs.is_empty() {
        None
    } else {
        Some(scoring::composite(&selection.needs, records)?)
    };

    let radius = settings.radius(tier);
    let inputs_for = |x: &[Option<f64>], y: Option<&[Option<f64>]>| -> Vec<PlotInput> {
        records
            .iter()
            .enumerate()
            .map(|(i, record)| PlotInput {
                id: record.id.clone(),
                name: record.name.clone(),
                x: x[i],
                y: y.and_then(|y| y[i]),
            })
            .collect()
    };

    let supports_name = axis_name(&selection.supports, "supports_composite");
    let needs_name = axis_name(&selection.needs, "needs_composite");

    let (layout, x_variable, y_variable, captions) = match (&needs, &supports) {
        (Some(needs), Some(supports)) => (
            plot::scatterplot(
                &inputs_for(needs.as_slice(), Some(supports.as_slice())),
                radius,
                &settings.plot,
                &settings.palette,
            ),
            needs_name,
            Some(supports_name),
            Captions {
                x: Some("Community need →"),
                y: Some("↑ Community support"),
            },
        ),
        (Some(needs), None) => (
            plot::beeswarm(
                &inputs_for(needs.as_slice(), None),
                Some(VariableClass::Challenge),
                radius,
                &settings.plot,
                &settings.palette,
                rng,
            ),
            needs_name,
            None,
            Captions {
                x: Some("Community need →"),
                y: None,
            },
        ),
        (None, Some(supports)) => (
            plot::beeswarm(
                &inputs_for(supports.as_slice(), None),
                Some(VariableClass::Support),
                radius,
                &settings.plot,
                &settings.palette,
                rng,
            ),
            supports_name,
            None,
            Captions {
                x: Some("Community support →"),
                y: None,
            },
        ),
        (None, None) => return Ok(Redraw::cleared()),
    };

    if layout.skipped > 0 {
        warn!(tier = %tier, skipped = layout.skipped, "areas without a score left off the plot");
    }

    let colours = layout
        .marks
        .iter()
        .map(|m| (m.area_id.clone(), m.colour))
        .collect();

    Ok(Redraw {
        tier: Some(tier),
        x_variable: Some(x_variable),
        y_variable,
        plot: Some(layout),
        captions,
        colours,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    SelectionChanged {
        #[serde(default)]
        supports: Vec<String>,
        #[serde(default)]
        needs: Vec<String>,
    },
    PlotHover {
        area_id: String,
    },
    PlotHoverOut,
    MapHover {
        feature_id: usize,
    },
    MapLeave,
    GroupClick {
        index: usize,
        click_lng: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    Redrawn {
        tier: Option<Tier>,
        state: SelectionState,
        join: Option<JoinReport>,
    },
    LayerVisibility {
        layers: Vec<LayerVisibility>,
    },
    FeatureHover {
        tier: Tier,
        feature_id: usize,
        hover: bool,
    },
    MarkHighlight {
        area_id: String,
        r: f64,
        stroke_width: f64,
    },
    MarkRestore {
        area_id: String,
        r: f64,
        stroke_width: f64,
    },
    OverlayShow {
        cx: f64,
        cy: f64,
        r: f64,
        fill: Rgb,
    },
    OverlayRemove,
    TooltipShow(Tooltip),
    TooltipHide,
    PopupOpen(Popup),
}

/// Snapshot of the current dashboard for clients.
#[derive(Debug, Clone, Serialize)]
pub struct View<'a> {
    pub selection: &'a Selection,
    pub state: SelectionState,
    #[serde(flatten)]
    pub redraw: &'a Redraw,
    pub layers: Vec<LayerVisibility>,
    pub join: Option<&'a JoinReport>,
}

/// Live dashboard state.
pub struct Dashboard {
    bundle: DataBundle,
    map: MapSync,
    groups: Vec<CommunityGroup>,
    settings: Settings,
    selection: Selection,
    current: Redraw,
    join: Option<JoinReport>,
    hovered_mark: Option<String>,
    hovered_feature: Option<usize>,
    rng: StdRng,
}

impl Dashboard {
    pub fn new(assets: Assets, config: &AppConfig) -> anyhow::Result<Self> {
        let settings = Settings::from_config(config)?;
        let map = MapSync::new(
            BoundaryLayer::new(Tier::La, assets.la, &config.input.la.join_property, &config.input.la.name_property),
            BoundaryLayer::new(
                Tier::Lsoa,
                assets.lsoa,
                &config.input.lsoa.join_property,
                &config.input.lsoa.name_property,
            ),
        );
        let groups = groups_from_features(&assets.groups);
        let rng = match config.plot.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        // page load starts with the first support and the first need
        let initial = Selection::new(
            assets.bundle.variables_of(VariableClass::Support).take(1).map(|v| v.name.clone()).collect(),
            assets.bundle.variables_of(VariableClass::Challenge).take(1).map(|v| v.name.clone()).collect(),
        );

        let mut dashboard = Self {
            bundle: assets.bundle,
            map,
            groups,
            settings,
            selection: Selection::default(),
            current: Redraw::cleared(),
            join: None,
            hovered_mark: None,
            hovered_feature: None,
            rng,
        };
        dashboard.map.clear(dashboard.settings.palette.empty);
        // a page-load selection that cannot be drawn leaves the dashboard empty but usable
        if let Err(e) = dashboard.select(initial) {
            warn!(error = %e, "initial selection could not be drawn, starting with nothing selected");
        }
        Ok(dashboard)
    }

    pub fn bundle(&self) -> &DataBundle {
        &self.bundle
    }

    pub fn map(&self) -> &MapSync {
        &self.map
    }

    pub fn groups(&self) -> &[CommunityGroup] {
        &self.groups
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn current(&self) -> &Redraw {
        &self.current
    }

    pub fn palette(&self) -> &Palette {
        &self.settings.palette
    }

    pub fn view(&self) -> View<'_> {
        View {
            selection: &self.selection,
            state: self.selection.state(),
            redraw: &self.current,
            layers: self.map.visibility(),
            join: self.join.as_ref(),
        }
    }

    /// Applies one event. On error the previous view stays in place.
    pub fn dispatch(&mut self, event: Event) -> Result<Vec<Effect>, DashboardError> {
        match event {
            Event::SelectionChanged { supports, needs } => self.select(Selection::new(supports, needs)),
            Event::PlotHover { area_id } => Ok(self.plot_hover(&area_id)),
            Event::PlotHoverOut => Ok(self.plot_hover_out()),
            Event::MapHover { feature_id } => Ok(self.map_hover(feature_id)),
            Event::MapLeave => Ok(self.map_leave()),
            Event::GroupClick { index, click_lng } => Ok(match self.groups.get(index) {
                Some(group) => vec![Effect::PopupOpen(group.popup(click_lng))],
                None => {
                    debug!(index, "click on unknown group");
                    Vec::new()
                }
            }),
        }
    }

    fn select(&mut self, selection: Selection) -> Result<Vec<Effect>, DashboardError> {
        let next = redraw(&self.bundle, &selection, &self.settings, &mut self.rng)?;

        let mut effects = Vec::new();
        if self.hovered_mark.is_some() || self.hovered_feature.is_some() {
            effects.push(Effect::TooltipHide);
            effects.push(Effect::OverlayRemove);
        }
        self.hovered_mark = None;
        self.hovered_feature = None;

        self.join = match next.tier {
            Some(tier) => Some(self.map.synchronise(tier, &next.colours, self.settings.palette.empty)),
            None => {
                self.map.clear(self.settings.palette.empty);
                None
            }
        };
        info!(
            state = ?selection.state(),
            tier = ?next.tier,
            marks = next.plot.as_ref().map_or(0, |p| p.marks.len()),
            "redrawn"
        );

        self.selection = selection;
        self.current = next;
        effects.push(Effect::Redrawn {
            tier: self.current.tier,
            state: self.selection.state(),
            join: self.join.clone(),
        });
        effects.push(Effect::LayerVisibility {
            layers: self.map.visibility(),
        });
        Ok(effects)
    }

    fn mark_style(&self, area_id: &str) -> Option<(f64, f64, f64, f64, Rgb, String)> {
        let mark = self.current.plot.as_ref()?.mark(area_id)?;
        Some((mark.cx, mark.cy, mark.r, mark.stroke_width, mark.colour, mark.area_name.clone()))
    }

    fn plot_hover(&mut self, area_id: &str) -> Vec<Effect> {
        let Some(tier) = self.current.tier else {
            return Vec::new();
        };
        let Some((cx, cy, _, _, _, name)) = self.mark_style(area_id) else {
            debug!(area_id, "hover on unknown mark");
            return Vec::new();
        };

        let mut effects = if self.hovered_mark.as_deref() == Some(area_id) {
            Vec::new()
        } else {
            self.plot_hover_out()
        };

        effects.push(Effect::MarkHighlight {
            area_id: area_id.to_string(),
            r: self.settings.plot.hover_radius,
            stroke_width: HOVER_STROKE,
        });
        effects.push(Effect::TooltipShow(Tooltip::at(&name, cx, cy, 45.0)));

        match self.map.layer(tier).feature_id(area_id) {
            Some(feature_id) => {
                self.map.layer_mut(tier).set_hover(feature_id, true);
                effects.push(Effect::FeatureHover {
                    tier,
                    feature_id,
                    hover: true,
                });
            }
            None => debug!(area_id, "no boundary feature for hovered mark"),
        }
        self.hovered_mark = Some(area_id.to_string());
        effects
    }

    fn plot_hover_out(&mut self) -> Vec<Effect> {
        let Some(area_id) = self.hovered_mark.take() else {
            return Vec::new();
        };
        let mut effects = Vec::new();
        if let Some((_, _, r, stroke_width, _, _)) = self.mark_style(&area_id) {
            effects.push(Effect::MarkRestore {
                area_id: area_id.clone(),
                r,
                stroke_width,
            });
        }
        if let Some(tier) = self.current.tier {
            if let Some(feature_id) = self.map.layer(tier).feature_id(&area_id) {
                self.map.layer_mut(tier).set_hover(feature_id, false);
                effects.push(Effect::FeatureHover {
                    tier,
                    feature_id,
                    hover: false,
                });
            }
        }
        effects.push(Effect::TooltipHide);
        effects
    }

    /// Undoes the highlight left by the previous map hover.
    fn release_feature(&mut self, tier: Tier, feature_id: usize) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.map.layer_mut(tier).set_hover(feature_id, false);
        effects.push(Effect::FeatureHover {
            tier,
            feature_id,
            hover: false,
        });
        match tier {
            Tier::La => {
                if let Some(key) = self.map.layer(tier).join_key(feature_id) {
                    if let Some((_, _, r, stroke_width, _, _)) = self.mark_style(&key) {
                        effects.push(Effect::MarkRestore {
                            area_id: key,
                            r,
                            stroke_width,
                        });
                    }
                }
            }
            Tier::Lsoa => effects.push(Effect::OverlayRemove),
        }
        effects
    }

    fn map_hover(&mut self, feature_id: usize) -> Vec<Effect> {
        let Some(tier) = self.current.tier else {
            return Vec::new();
        };
        if feature_id >= self.map.layer(tier).len() {
            debug!(feature_id, "hover on unknown feature");
            return Vec::new();
        }

        let mut effects = match self.hovered_feature.take() {
            Some(previous) => self.release_feature(tier, previous),
            None => Vec::new(),
        };

        self.map.layer_mut(tier).set_hover(feature_id, true);
        self.hovered_feature = Some(feature_id);
        effects.push(Effect::FeatureHover {
            tier,
            feature_id,
            hover: true,
        });

        let layer = self.map.layer(tier);
        let key = layer.join_key(feature_id);
        let feature_name = layer.feature_name(feature_id);
        let mark = key.as_deref().and_then(|key| self.mark_style(key));
        if let (Some(key), Some((cx, cy, _, _, fill, mark_name))) = (key, mark) {
            let rise = match tier {
                Tier::La => {
                    effects.push(Effect::MarkHighlight {
                        area_id: key,
                        r: self.settings.plot.hover_radius,
                        stroke_width: HOVER_STROKE,
                    });
                    45.0
                }
                Tier::Lsoa => {
                    effects.push(Effect::OverlayShow {
                        cx,
                        cy,
                        r: OVERLAY_RADIUS,
                        fill,
                    });
                    39.0
                }
            };
            let name = feature_name.unwrap_or(mark_name);
            effects.push(Effect::TooltipShow(Tooltip::at(&name, cx, cy, rise)));
        }
        effects
    }

    fn map_leave(&mut self) -> Vec<Effect> {
        let mut effects = match (self.current.tier, self.hovered_feature.take()) {
            (Some(tier), Some(previous)) => self.release_feature(tier, previous),
            _ => Vec::new(),
        };
        effects.push(Effect::TooltipHide);
        effects
    }
}
