//! Beeswarm placement.
//!
//! Small datasets are relaxed with a fixed number of force-simulation steps
//! (x pull, y pull, collision) using d3-force's decay constants. Large ones
//! get a cheap bounded random jitter instead.

use rand::Rng;

const ALPHA_MIN: f64 = 0.001;
const VELOCITY_DECAY: f64 = 0.4;
const INITIAL_RADIUS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Body {
    x: f64,
    y: f64,
    vx: f64,
    vy: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct SwarmForces {
    pub x_strength: f64,
    pub y_strength: f64,
    pub y_target: f64,
    pub collide_radius: f64,
    pub ticks: usize,
}

/// Relaxes bodies towards `targets` on a shared horizontal axis and returns their `(x, y)` positions.
pub fn relax<R: Rng>(targets: &[f64], forces: &SwarmForces, rng: &mut R) -> Vec<(f64, f64)> {
    // phyllotaxis start, as d3 places nodes without a position
    let initial_angle = std::f64::consts::PI * (3.0 - 5f64.sqrt());
    let mut bodies: Vec<Body> = (0..targets.len())
        .map(|i| {
            let radius = INITIAL_RADIUS * (0.5 + i as f64).sqrt();
            let angle = i as f64 * initial_angle;
            Body {
                x: radius * angle.cos(),
                y: radius * angle.sin(),
                vx: 0.0,
                vy: 0.0,
            }
        })
        .collect();

    let alpha_decay = 1.0 - ALPHA_MIN.powf(1.0 / 300.0);
    let mut alpha = 1.0;

    for _ in 0..forces.ticks {
        alpha += (0.0 - alpha) * alpha_decay;

        for (body, target) in bodies.iter_mut().zip(targets) {
            body.vx += (target - body.x) * forces.x_strength * alpha;
            body.vy += (forces.y_target - body.y) * forces.y_strength * alpha;
        }

        collide(&mut bodies, forces.collide_radius, rng);

        for body in &mut bodies {
            body.vx *= 1.0 - VELOCITY_DECAY;
            body.vy *= 1.0 - VELOCITY_DECAY;
            body.x += body.vx;
            body.y += body.vy;
        }
    }

    bodies.iter().map(|b| (b.x, b.y)).collect()
}

fn jiggle<R: Rng>(rng: &mut R) -> f64 {
    (rng.gen::<f64>() - 0.5) * 1e-6
}

/// One pass of pairwise collision resolution on predicted positions.
fn collide<R: Rng>(bodies: &mut [Body], radius: f64, rng: &mut R) {
    let r = radius * 2.0;
    // equal radii split the correction evenly
    let share = 0.5;
    for i in 0..bodies.len() {
        let xi = bodies[i].x + bodies[i].vx;
        let yi = bodies[i].y + bodies[i].vy;
        for j in (i + 1)..bodies.len() {
            let other = bodies[j];
            let mut dx = xi - other.x - other.vx;
            let mut dy = yi - other.y - other.vy;
            let mut l = dx * dx + dy * dy;
            if l >= r * r {
                continue;
            }
            if dx == 0.0 {
                dx = jiggle(rng);
                l += dx * dx;
            }
            if dy == 0.0 {
                dy = jiggle(rng);
                l += dy * dy;
            }
            let len = l.sqrt();
            let k = (r - len) / len;
            dx *= k;
            dy *= k;
            bodies[i].vx += dx * share;
            bodies[i].vy += dy * share;
            bodies[j].vx -= dx * (1.0 - share);
            bodies[j].vy -= dy * (1.0 - share);
        }
    }
}

/// Bates-distributed sample: the mean of `n` uniform draws.
pub fn bates<R: Rng>(n: usize, rng: &mut R) -> f64 {
    let n = n.max(1);
    (0..n).map(|_| rng.gen::<f64>()).sum::<f64>() / n as f64
}

/// Jitter value in `[-3, 3]` centred on zero.
pub fn jitter<R: Rng>(rng: &mut R) -> f64 {
    (bates(7, rng) - 0.5) * 6.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn forces() -> SwarmForces {
        SwarmForces {
            x_strength: 5.0,
            y_strength: 0.1,
            y_target: 182.5,
            collide_radius: 9.0,
            ticks: 120,
        }
    }

    #[test]
    fn distinct_targets_settle_on_target_x() {
        let targets: Vec<f64> = (0..10).map(|i| 60.0 + i as f64 * 30.0).collect();
        let mut rng = StdRng::seed_from_u64(7);
        let out = relax(&targets, &forces(), &mut rng);
        for ((x, y), target) in out.iter().zip(&targets) {
            assert!((x - target).abs() < 1.0, "x {} target {}", x, target);
            assert!((y - 182.5).abs() < 1.0);
        }
    }

    #[test]
    fn shared_target_spreads_vertically() {
        let targets = vec![200.0; 8];
        let mut rng = StdRng::seed_from_u64(1);
        let out = relax(&targets, &forces(), &mut rng);
        let ys: Vec<f64> = out.iter().map(|p| p.1).collect();
        let spread = ys.iter().cloned().fold(f64::MIN, f64::max) - ys.iter().cloned().fold(f64::MAX, f64::min);
        assert!(spread > 20.0, "spread {}", spread);
        assert!(out.iter().all(|(x, y)| x.is_finite() && y.is_finite()));
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let targets = vec![100.0, 100.0, 101.0, 150.0];
        let a = relax(&targets, &forces(), &mut StdRng::seed_from_u64(3));
        let b = relax(&targets, &forces(), &mut StdRng::seed_from_u64(3));
        assert_eq!(a, b);
    }

    #[test]
    fn jitter_is_bounded() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..1000 {
            let v = jitter(&mut rng);
            assert!((-3.0..=3.0).contains(&v));
        }
    }
}
