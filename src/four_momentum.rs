use nalgebra::Vector2;
use std::f64::consts::PI;
use std::ops::{Add, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FourMomentum {
    pub e: f64,
    pub px: f64,
    pub py: f64,
    pub pz: f64,
}

impl FourMomentum {
    //! A four-momentum structure with the collider coordinates used by the skimmer.
    //!
    //! This is the basic structure of a Lorentz four-vector
    //! of the form $`(E, \overrightarrow{p})`$ where $E$ is the energy and $`\overrightarrow{p}`$ is the
    //! momentum. Reconstructed objects arrive as $`(p_T, \eta, \phi, m)`$ and are converted with
    //! [`FourMomentum::from_pt_eta_phi_m`].
    //!
    //! # Examples
    //! ```
    //! use skimmer::prelude::*;
    //!
    //! let jet = FourMomentum::from_pt_eta_phi_m(50.0, 0.3, 1.2, 8.0);
    //! assert!((jet.pt() - 50.0).abs() < 1e-9);
    //! ```

    pub fn new(e: f64, px: f64, py: f64, pz: f64) -> Self {
        //! Create a new [`FourMomentum`] from energy and momentum components.
        //!
        //! Components are listed in the order $` (E, p_x, p_y, p_z) `$
        Self { e, px, py, pz }
    }

    pub fn from_pt_eta_phi_m(pt: f64, eta: f64, phi: f64, m: f64) -> Self {
        //! Create a new [`FourMomentum`] from transverse momentum, pseudorapidity, azimuth and mass.
        let px = pt * phi.cos();
        let py = pt * phi.sin();
        let pz = pt * eta.sinh();
        let e = (px * px + py * py + pz * pz + m * m).sqrt();
        Self { e, px, py, pz }
    }

    pub fn transverse(&self) -> Vector2<f64> {
        //! Extract the transverse momentum as a [`nalgebra::Vector2<f64>`]
        Vector2::new(self.px, self.py)
    }

    pub fn m2(&self) -> f64 {
        //! Calculate the invariant $ m^2 $ for this [`FourMomentum`] instance.
        //!
        //! Calculates $` m^2 = E^2 - \overrightarrow{p}^2 `$
        self.e.powi(2) - self.px.powi(2) - self.py.powi(2) - self.pz.powi(2)
    }

    pub fn m(&self) -> f64 {
        //! Calculate the invariant $ m $ for this [`FourMomentum`] instance.
        //!
        //! Small negative $`m^2`$ from rounding is clamped to zero.
        //!
        //! # See Also:
        //!
        //! [`FourMomentum::m2`]
        self.m2().max(0.0).sqrt()
    }

    pub fn pt(&self) -> f64 {
        self.transverse().norm()
    }

    pub fn phi(&self) -> f64 {
        self.py.atan2(self.px)
    }

    pub fn eta(&self) -> f64 {
        //! Pseudorapidity $`\eta = \sinh^{-1}(p_z / p_T)`$, zero for a vanishing $`p_T`$.
        let pt = self.pt();
        if pt == 0.0 {
            return 0.0;
        }
        (self.pz / pt).asinh()
    }
}

/// Azimuthal difference wrapped into $`[-\pi, \pi)`$, `NaN` for non-finite input.
pub fn delta_phi(phi1: f64, phi2: f64) -> f64 {
    let dphi = phi1 - phi2;
    if !dphi.is_finite() {
        return f64::NAN;
    }
    (dphi + PI).rem_euclid(2.0 * PI) - PI
}

/// Angular distance $`\Delta R = \sqrt{\Delta\eta^2 + \Delta\phi^2}`$.
pub fn delta_r(eta1: f64, phi1: f64, eta2: f64, phi2: f64) -> f64 {
    (eta1 - eta2).hypot(delta_phi(phi1, phi2))
}

impl Add for FourMomentum {
    type Output = FourMomentum;
    fn add(self, rhs: Self) -> Self::Output {
        Self {
            e: self.e + rhs.e,
            px: self.px + rhs.px,
            py: self.py + rhs.py,
            pz: self.pz + rhs.pz,
        }
    }
}

impl Sub for FourMomentum {
    type Output = FourMomentum;
    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            e: self.e - rhs.e,
            px: self.px - rhs.px,
            py: self.py - rhs.py,
            pz: self.pz - rhs.pz,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn collider_coordinates_round_trip() {
        let p4 = FourMomentum::from_pt_eta_phi_m(45.0, -1.3, 2.9, 4.2);
        assert_relative_eq!(p4.pt(), 45.0, epsilon = 1e-9);
        assert_relative_eq!(p4.eta(), -1.3, epsilon = 1e-9);
        assert_relative_eq!(p4.phi(), 2.9, epsilon = 1e-9);
        assert_relative_eq!(p4.m(), 4.2, epsilon = 1e-6);
    }

    #[test]
    fn delta_phi_wraps_around() {
        assert_relative_eq!(delta_phi(3.0, -3.0), 6.0 - 2.0 * PI, epsilon = 1e-12);
        assert_relative_eq!(delta_r(0.0, 3.1, 0.0, -3.1), 2.0 * PI - 6.2, epsilon = 1e-12);
    }

    #[test]
    fn corrupt_angles_do_not_match_anything() {
        assert!(delta_phi(f64::INFINITY, 0.0).is_nan());
        assert!(delta_r(0.0, f64::NAN, 0.0, 0.0).is_nan());
        assert!(delta_r(0.0, f64::NEG_INFINITY, 0.0, 0.0).is_nan());
        let huge = delta_phi(1e20, 0.0);
        assert!((-PI..=PI).contains(&huge));
    }

    #[test]
    fn sums_add_components() {
        let a = FourMomentum::new(10.0, 1.0, 2.0, 3.0);
        let b = FourMomentum::new(5.0, -1.0, 1.0, 0.0);
        assert_eq!(a + b, FourMomentum::new(15.0, 0.0, 3.0, 3.0));
        assert_eq!((a + b) - b, a);
    }
}
