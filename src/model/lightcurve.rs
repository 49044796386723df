//! Analytic circular-orbit transit/eclipse light curve with quadratic limb darkening
//!
//! The occulted stellar flux is computed by radial quadrature of the circle-overlap
//! half-angle weighted by the quadratic limb-darkening profile
//! `I(r) = 1 - u1 (1 - mu) - u2 (1 - mu)^2`, `mu = sqrt(1 - r^2)`. The fully covered
//! inner annulus integrates in closed form; only the partially covered ring is done
//! numerically. Out-of-transit flux is exactly 1.

use ndarray::{Array1, ArrayView1};

/// Simpson intervals over the partially covered ring
const N_QUAD: usize = 100;

/// Circular orbit in units of the stellar radius
#[derive(Clone, Copy, Debug)]
pub struct Orbit {
    pub period: f64,
    /// Center of the modeled event (transit or eclipse)
    pub t_center: f64,
    /// Scaled semi-major axis a/R*
    pub a_rs: f64,
    /// Impact parameter b = (a/R*) cos i
    pub b: f64,
}

impl Orbit {
    /// Sky-projected star-planet separation in stellar radii, `None` on the far side
    /// of the orbit (no occultation there)
    pub fn projected_separation(&self, t: f64) -> Option<f64> {
        let theta = std::f64::consts::TAU * (t - self.t_center) / self.period;
        let (sin_t, cos_t) = theta.sin_cos();
        if cos_t <= 0.0 {
            return None;
        }
        let cos_i = self.b / self.a_rs;
        Some(self.a_rs * (sin_t.powi(2) + cos_t.powi(2) * cos_i.powi(2)).sqrt())
    }
}

/// Kipping (2013) triangular reparameterization of quadratic limb darkening
///
/// Uniform (q1, q2) on the unit square maps onto the physically allowed (u1, u2)
/// region.
pub fn q_to_u(q1: f64, q2: f64) -> [f64; 2] {
    let sqrt_q1 = q1.max(0.0).sqrt();
    [2.0 * sqrt_q1 * q2, sqrt_q1 * (1.0 - 2.0 * q2)]
}

/// Cumulative flux of the limb-darkened disk inside radius `r`, unnormalized
///
/// `F(1)` equals the total flux `1 - u1/3 - u2/6`.
fn cumulative_flux(r: f64, u1: f64, u2: f64) -> f64 {
    let r = r.clamp(0.0, 1.0);
    let r2 = r * r;
    let shell = 1.0 - (1.0 - r2).max(0.0).powf(1.5);
    r2 - u1 * (r2 - 2.0 / 3.0 * shell) - u2 * (2.0 * r2 - 0.5 * r2 * r2 - 4.0 / 3.0 * shell)
}

/// Surface brightness at radius `r`
fn intensity(r: f64, u1: f64, u2: f64) -> f64 {
    let mu = (1.0 - r * r).max(0.0).sqrt();
    1.0 - u1 * (1.0 - mu) - u2 * (1.0 - mu).powi(2)
}

/// Fraction of the total stellar flux blocked by a planet of radius ratio `p` at
/// projected separation `z`
pub fn occulted_fraction(p: f64, z: f64, u1: f64, u2: f64) -> f64 {
    if p <= 0.0 || z >= 1.0 + p {
        return 0.0;
    }
    let total = cumulative_flux(1.0, u1, u2);
    if z + 1.0 <= p {
        // planet covers the whole star
        return 1.0;
    }
    if z < 1e-12 {
        return cumulative_flux(p.min(1.0), u1, u2) / total;
    }

    // rings with r <= p - z are fully inside the planet disk
    let fully_covered = if z < p {
        cumulative_flux(p - z, u1, u2)
    } else {
        0.0
    };

    let r_lo = (z - p).abs();
    let r_hi = (z + p).min(1.0);
    if r_lo >= r_hi {
        return fully_covered / total;
    }

    // half-angle of the circle of radius r lying inside the planet disk
    let half_angle = |r: f64| -> f64 {
        let cos_phi = ((z * z + r * r - p * p) / (2.0 * z * r)).clamp(-1.0, 1.0);
        cos_phi.acos()
    };
    let integrand =
        |r: f64| -> f64 { 2.0 * r * intensity(r, u1, u2) * half_angle(r) / std::f64::consts::PI };

    // Simpson over the partially covered ring
    let h = (r_hi - r_lo) / N_QUAD as f64;
    let mut acc = integrand(r_lo) + integrand(r_hi);
    for i in 1..N_QUAD {
        let r = r_lo + h * i as f64;
        acc += integrand(r) * if i % 2 == 1 { 4.0 } else { 2.0 };
    }
    let partial = acc * h / 3.0;

    ((fully_covered + partial) / total).clamp(0.0, 1.0)
}

/// Model flux at a single instant, normalized to 1 out of transit
pub fn flux_at(t: f64, orbit: &Orbit, ror: f64, u: [f64; 2]) -> f64 {
    match orbit.projected_separation(t) {
        Some(z) => 1.0 - occulted_fraction(ror, z, u[0], u[1]),
        None => 1.0,
    }
}

/// Evaluate the light curve over the observation times
///
/// Finite exposure is handled by averaging `oversample` sub-samples spanning `texp`
/// around each timestamp; `oversample <= 1` or `texp <= 0` evaluates instantaneously.
pub fn light_curve(
    times: ArrayView1<f64>,
    orbit: &Orbit,
    ror: f64,
    u: [f64; 2],
    texp: f64,
    oversample: usize,
) -> Array1<f64> {
    if texp <= 0.0 || oversample <= 1 {
        return times.iter().map(|&t| flux_at(t, orbit, ror, u)).collect();
    }
    times
        .iter()
        .map(|&t| {
            let mean: f64 = (0..oversample)
                .map(|j| {
                    let dt = texp * ((j as f64 + 0.5) / oversample as f64 - 0.5);
                    flux_at(t + dt, orbit, ror, u)
                })
                .sum::<f64>()
                / oversample as f64;
            mean
        })
        .collect()
}
