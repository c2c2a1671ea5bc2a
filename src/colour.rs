//! Colour ramps interpolated in CIELAB.
//!
//! The Lab conversion follows d3-color (D50 white point, sRGB companding) so a
//! ramp rendered here matches one drawn in the browser.

use crate::config::Palette;
use image::Rgba;
use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parses `#rrggbb` or `rrggbb`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn to_hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    pub fn to_rgba(self) -> Rgba<u8> {
        Rgba([self.r, self.g, self.b, 255])
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Rgb {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

const XN: f64 = 0.96422;
const YN: f64 = 1.0;
const ZN: f64 = 0.82521;
const T0: f64 = 4.0 / 29.0;
const T1: f64 = 6.0 / 29.0;
const T2: f64 = 3.0 * T1 * T1;
const T3: f64 = T1 * T1 * T1;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lab {
    pub l: f64,
    pub a: f64,
    pub b: f64,
}

fn rgb_to_linear(channel: u8) -> f64 {
    let x = channel as f64 / 255.0;
    if x <= 0.04045 {
        x / 12.92
    } else {
        ((x + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_rgb(x: f64) -> u8 {
    let v = 255.0
        * if x <= 0.0031308 {
            12.92 * x
        } else {
            1.055 * x.powf(1.0 / 2.4) - 0.055
        };
    v.round().clamp(0.0, 255.0) as u8
}

fn xyz_to_lab(t: f64) -> f64 {
    if t > T3 {
        t.cbrt()
    } else {
        t / T2 + T0
    }
}

fn lab_to_xyz(t: f64) -> f64 {
    if t > T1 {
        t * t * t
    } else {
        T2 * (t - T0)
    }
}

impl From<Rgb> for Lab {
    fn from(c: Rgb) -> Self {
        let r = rgb_to_linear(c.r);
        let g = rgb_to_linear(c.g);
        let b = rgb_to_linear(c.b);
        let y = xyz_to_lab((0.2225045 * r + 0.7168786 * g + 0.0606169 * b) / YN);
        let (x, z) = if c.r == c.g && c.g == c.b {
            (y, y)
        } else {
            (
                xyz_to_lab((0.4360747 * r + 0.3850649 * g + 0.1430804 * b) / XN),
                xyz_to_lab((0.0139322 * r + 0.0971045 * g + 0.7141733 * b) / ZN),
            )
        };
        Lab {
            l: 116.0 * y - 16.0,
            a: 500.0 * (x - y),
            b: 200.0 * (y - z),
        }
    }
}

impl From<Lab> for Rgb {
    fn from(c: Lab) -> Self {
        let y = (c.l + 16.0) / 116.0;
        let x = XN * lab_to_xyz(y + c.a / 500.0);
        let z = ZN * lab_to_xyz(y - c.b / 200.0);
        let y = YN * lab_to_xyz(y);
        Rgb::new(
            linear_to_rgb(3.1338561 * x - 1.6168667 * y - 0.4906146 * z),
            linear_to_rgb(-0.9787684 * x + 1.9161415 * y + 0.0334540 * z),
            linear_to_rgb(0.0719453 * x - 0.2289914 * y + 1.4052427 * z),
        )
    }
}

/// Interpolates between two colours in Lab space.
pub fn interpolate_lab(from: Rgb, to: Rgb, t: f64) -> Rgb {
    if t <= 0.0 {
        return from;
    }
    if t >= 1.0 {
        return to;
    }
    let a = Lab::from(from);
    let b = Lab::from(to);
    Rgb::from(Lab {
        l: a.l + (b.l - a.l) * t,
        a: a.a + (b.a - a.a) * t,
        b: a.b + (b.b - a.b) * t,
    })
}

/// Piecewise-linear colour scale over ascending stops.
#[derive(Debug, Clone, PartialEq)]
pub struct ColourScale {
    stops: Vec<(f64, Rgb)>,
    /// Returned for every input when the domain collapsed.
    constant: Option<Rgb>,
}

fn extent(values: &[f64]) -> Option<(f64, f64)> {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

impl ColourScale {
    /// Three stops at `[min, mean, max]` running low -> neutral -> high.
    pub fn diverging(values: &[f64], palette: &Palette) -> Self {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        match extent(&finite) {
            Some((lo, hi)) if lo < hi => {
                let mean = finite.iter().sum::<f64>() / finite.len() as f64;
                Self {
                    stops: vec![(lo, palette.low), (mean, palette.neutral), (hi, palette.high)],
                    constant: None,
                }
            }
            _ => Self::constant(palette.neutral),
        }
    }

    /// Two stops at `[min, max]`.
    pub fn sequential(values: &[f64], from: Rgb, to: Rgb) -> Self {
        match extent(values) {
            Some((lo, hi)) if lo < hi => Self {
                stops: vec![(lo, from), (hi, to)],
                constant: None,
            },
            _ => Self::constant(interpolate_lab(from, to, 0.5)),
        }
    }

    /// Neutral to high.
    pub fn need(values: &[f64], palette: &Palette) -> Self {
        Self::sequential(values, palette.neutral, palette.high)
    }

    /// Neutral to low.
    pub fn support(values: &[f64], palette: &Palette) -> Self {
        Self::sequential(values, palette.neutral, palette.low)
    }

    pub fn constant(colour: Rgb) -> Self {
        Self {
            stops: Vec::new(),
            constant: Some(colour),
        }
    }

    pub fn is_constant(&self) -> bool {
        self.constant.is_some()
    }

    pub fn domain(&self) -> Vec<f64> {
        self.stops.iter().map(|(v, _)| *v).collect()
    }

    pub fn colour(&self, value: f64) -> Rgb {
        if let Some(c) = self.constant {
            return c;
        }
        let first = self.stops[0];
        let last = self.stops[self.stops.len() - 1];
        if !value.is_finite() || value <= first.0 {
            return first.1;
        }
        if value >= last.0 {
            return last.1;
        }
        for pair in self.stops.windows(2) {
            let (d0, c0) = pair[0];
            let (d1, c1) = pair[1];
            if value <= d1 {
                if d1 == d0 {
                    return c1;
                }
                return interpolate_lab(c0, c1, (value - d0) / (d1 - d0));
            }
        }
        last.1
    }

    /// `n` evenly spaced samples of the scale across its domain.
    pub fn ramp(&self, n: usize) -> Vec<Rgb> {
        let domain = self.domain();
        let (lo, hi) = match (domain.first(), domain.last()) {
            (Some(lo), Some(hi)) => (*lo, *hi),
            _ => (0.0, 1.0),
        };
        (0..n)
            .map(|i| {
                let t = if n > 1 { i as f64 / (n - 1) as f64 } else { 0.0 };
                self.colour(lo + (hi - lo) * t)
            })
            .collect()
    }
}
