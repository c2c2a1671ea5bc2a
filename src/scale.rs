//! Linear position scales with d3-style nice domains and ticks.

use serde::Serialize;

const E10: f64 = 7.0710678118654755; // sqrt(50)
const E5: f64 = 3.1622776601683795; // sqrt(10)
const E2: f64 = std::f64::consts::SQRT_2;

/// Step between ticks; negative values encode the reciprocal of a fractional step.
pub fn tick_increment(start: f64, stop: f64, count: usize) -> f64 {
    let step = (stop - start) / count.max(1) as f64;
    let power = step.log10().floor();
    let error = step / 10f64.powf(power);
    let factor = if error >= E10 {
        10.0
    } else if error >= E5 {
        5.0
    } else if error >= E2 {
        2.0
    } else {
        1.0
    };
    if power >= 0.0 {
        factor * 10f64.powf(power)
    } else {
        -(10f64.powf(-power)) / factor
    }
}

pub fn ticks(start: f64, stop: f64, count: usize) -> Vec<f64> {
    if start == stop && count > 0 {
        return vec![start];
    }
    let reverse = stop < start;
    let (start, stop) = if reverse { (stop, start) } else { (start, stop) };
    let step = tick_increment(start, stop, count);
    if step == 0.0 || !step.is_finite() {
        return Vec::new();
    }
    let mut out: Vec<f64> = if step > 0.0 {
        let lo = (start / step).ceil() as i64;
        let hi = (stop / step).floor() as i64;
        (lo..=hi).map(|i| i as f64 * step).collect()
    } else {
        let step = -step;
        let lo = (start * step).ceil() as i64;
        let hi = (stop * step).floor() as i64;
        (lo..=hi).map(|i| i as f64 / step).collect()
    };
    if reverse {
        out.reverse();
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LinearScale {
    pub domain: (f64, f64),
    pub range: (f64, f64),
}

impl LinearScale {
    pub fn new(domain: (f64, f64), range: (f64, f64)) -> Self {
        Self { domain, range }
    }

    /// Scale fitted to the extent of the finite values; `[0, 1]` when there are none.
    pub fn from_extent<I: IntoIterator<Item = f64>>(values: I, range: (f64, f64)) -> Self {
        let domain = values
            .into_iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc: Option<(f64, f64)>, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
            .unwrap_or((0.0, 1.0));
        Self::new(domain, range)
    }

    /// Extends the domain to round tick boundaries.
    pub fn nice(mut self, count: usize) -> Self {
        let (mut start, mut stop) = self.domain;
        if start == stop || !start.is_finite() || !stop.is_finite() {
            return self;
        }
        let reverse = stop < start;
        if reverse {
            std::mem::swap(&mut start, &mut stop);
        }
        let mut previous: Option<f64> = None;
        for _ in 0..10 {
            let step = tick_increment(start, stop, count);
            if Some(step) == previous || !step.is_finite() {
                break;
            } else if step > 0.0 {
                start = (start / step).floor() * step;
                stop = (stop / step).ceil() * step;
            } else if step < 0.0 {
                start = (start * step).ceil() / step;
                stop = (stop * step).floor() / step;
            } else {
                break;
            }
            previous = Some(step);
        }
        self.domain = if reverse { (stop, start) } else { (start, stop) };
        self
    }

    pub fn apply(&self, value: f64) -> f64 {
        let (d0, d1) = self.domain;
        let (r0, r1) = self.range;
        if d1 == d0 || !(d1 - d0).is_finite() {
            return (r0 + r1) / 2.0;
        }
        r0 + (value - d0) / (d1 - d0) * (r1 - r0)
    }

    pub fn ticks(&self, count: usize) -> Vec<f64> {
        ticks(self.domain.0, self.domain.1, count)
    }
}

const PREFIXES: [&str; 17] = [
    "y", "z", "a", "f", "p", "n", "µ", "m", "", "k", "M", "G", "T", "P", "E", "Z", "Y",
];

/// SI-prefixed label with two significant digits, like d3-format's `.2s`.
pub fn format_si(value: f64) -> String {
    if value == 0.0 || !value.is_finite() {
        return "0.0".to_string();
    }
    let magnitude = |v: f64| v.abs().log10().floor() as i32;
    // round to two significant digits first so 999 becomes 1.0k
    let exponent = magnitude(value);
    let factor = 10f64.powi(exponent - 1);
    let rounded = (value / factor).round() * factor;
    let exponent = magnitude(rounded);
    let group = (exponent.div_euclid(3)).clamp(-8, 8);
    let scaled = rounded / 10f64.powi(group * 3);
    let decimals = (1 - (exponent - group * 3)).max(0) as usize;
    format!("{:.*}{}", decimals, scaled, PREFIXES[(group + 8) as usize])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    #[test]
    fn nice_rounds_outwards() {
        let scale = LinearScale::new((0.13, 9.87), (0.0, 1.0)).nice(10);
        assert_eq!(scale.domain, (0.0, 10.0));
        let scale = LinearScale::new((-2.37, 3.81), (0.0, 1.0)).nice(10);
        assert!(close(&[scale.domain.0, scale.domain.1], &[-2.5, 4.0]));
        let scale = LinearScale::new((1234.0, 98765.0), (0.0, 1.0)).nice(10);
        assert_eq!(scale.domain, (0.0, 100000.0));
        let scale = LinearScale::new((-3.0, 3.0), (0.0, 1.0)).nice(10);
        assert_eq!(scale.domain, (-3.0, 3.0));
    }

    #[test]
    fn ticks_follow_d3() {
        assert!(close(&ticks(0.0, 10.0, 5), &[0.0, 2.0, 4.0, 6.0, 8.0, 10.0]));
        assert!(close(&ticks(0.0, 1.0, 10), &[0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0]));
        assert!(close(&ticks(-1.0, 1.0, 4), &[-1.0, -0.5, 0.0, 0.5, 1.0]));
        assert!(close(&ticks(10.0, 0.0, 5), &[10.0, 8.0, 6.0, 4.0, 2.0, 0.0]));
        assert_eq!(ticks(3.0, 3.0, 10), vec![3.0]);
    }

    #[test]
    fn apply_maps_domain_to_range() {
        let scale = LinearScale::new((0.0, 10.0), (48.0, 378.0));
        assert_eq!(scale.apply(0.0), 48.0);
        assert_eq!(scale.apply(10.0), 378.0);
        assert_eq!(scale.apply(5.0), 213.0);
        let inverted = LinearScale::new((0.0, 10.0), (340.0, 10.0));
        assert_eq!(inverted.apply(10.0), 10.0);
        let flat = LinearScale::new((2.0, 2.0), (0.0, 100.0));
        assert_eq!(flat.apply(2.0), 50.0);
    }

    #[test]
    fn collapsed_domain_stays_put() {
        let scale = LinearScale::new((7.0, 7.0), (48.0, 378.0)).nice(10);
        assert_eq!(scale.domain, (7.0, 7.0));
        assert_eq!(scale.apply(7.0), 213.0);
        assert_eq!(scale.ticks(10), vec![7.0]);
        let broken = LinearScale::new((f64::NAN, f64::NAN), (0.0, 10.0));
        assert_eq!(broken.apply(1.0), 5.0);
    }

    #[test]
    fn si_labels() {
        assert_eq!(format_si(0.0), "0.0");
        assert_eq!(format_si(1500.0), "1.5k");
        assert_eq!(format_si(20000.0), "20k");
        assert_eq!(format_si(0.5), "500m");
        assert_eq!(format_si(-2.0), "-2.0");
        assert_eq!(format_si(999.0), "1.0k");
        assert_eq!(format_si(2.5e6), "2.5M");
    }
}
