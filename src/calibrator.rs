use rand::distributions::Distribution;
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;

use crate::calibration::JetCalibration;
use crate::object::{GenJet, Kinematics, RawJet};
use crate::variation::{Shift, Variation};

/// Smallest transverse momentum a smeared jet may end up with.
pub const MIN_SMEARED_PT: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JetCone {
    /// Radius 0.4 jets.
    Ak4,
    /// Radius 0.8 jets.
    Ak8,
}

impl JetCone {
    pub fn match_radius(&self) -> f64 {
        //! Maximum angular distance to a generator jet, half the cone size.
        match self {
            JetCone::Ak4 => 0.2,
            JetCone::Ak8 => 0.4,
        }
    }
}

/// Correction factors and the resulting kinematics of one jet.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibratedJet {
    pub jec: f64,
    pub smear: f64,
    pub kinematics: Kinematics,
}

/// Applies energy corrections and resolution smearing to jets of one cone size.
pub struct JetCalibrator<'a> {
    calibration: &'a JetCalibration,
    cone: JetCone,
    is_data: bool,
}

impl<'a> JetCalibrator<'a> {
    pub fn new(calibration: &'a JetCalibration, cone: JetCone, is_data: bool) -> Self {
        Self {
            calibration,
            cone,
            is_data,
        }
    }

    pub fn jec_factor(&self, jet: &impl RawJet, rho: f64, variation: &Variation) -> f64 {
        //! Energy correction of `jet`, shifted by the uncertainty source `variation` names.
        //!
        //! The uncertainty is evaluated at the corrected $`p_T`$, not the raw one.
        let raw_pt = jet.raw_pt();
        let k = jet.kinematics();
        let mut jec = self
            .calibration
            .corrector
            .correction(raw_pt, k.eta, k.phi, jet.area(), rho);
        for (source, uncertainty) in &self.calibration.uncertainties {
            let shift = variation.jec_shift(source);
            if shift != Shift::Nominal {
                jec *= 1.0 + shift.sign() * uncertainty.uncertainty(jec * raw_pt, k.eta);
            }
        }
        jec
    }

    pub fn match_gen_jet(
        &self,
        pt: f64,
        eta: f64,
        phi: f64,
        resolution: f64,
        gen_jets: &[GenJet],
    ) -> Option<f64> {
        //! Transverse momentum of the closest generator jet within the cone's match radius whose
        //! $`p_T`$ differs by less than three resolutions.
        //!
        //! Candidates passing both requirements are ranked by angular distance alone.
        let mut best: Option<f64> = None;
        let mut delta_r_min = f64::INFINITY;
        for gen_jet in gen_jets {
            let g = gen_jet.kinematics;
            let delta_r = crate::four_momentum::delta_r(eta, phi, g.eta, g.phi);
            if delta_r > delta_r_min {
                continue;
            }
            if delta_r < self.cone.match_radius() && (pt - g.pt).abs() < 3.0 * resolution * pt {
                delta_r_min = delta_r;
                best = Some(g.pt);
            }
        }
        best
    }

    #[allow(clippy::too_many_arguments)]
    pub fn smear_factor<R: Rng>(
        &self,
        pt: f64,
        eta: f64,
        phi: f64,
        rho: f64,
        variation: &Variation,
        gen_jets: Option<&[GenJet]>,
        rng: &mut R,
    ) -> f64 {
        //! Resolution smearing for a jet with corrected transverse momentum `pt`.
        //!
        //! Matched jets are scaled towards their generator jet. Unmatched jets are smeared
        //! stochastically when the scale factor exceeds one, drawing a single sample from `rng`.
        //! Data, and simulation without generator jets or resolution tables, get a factor of one.
        if self.is_data {
            return 1.0;
        }
        let (Some(resolution), Some(scale_factor), Some(gen_jets)) = (
            self.calibration.resolution.as_ref(),
            self.calibration.resolution_sf.as_ref(),
            gen_jets,
        ) else {
            return 1.0;
        };
        let reso = resolution.resolution(pt, eta, rho);
        let sf = scale_factor.scale_factor(pt, eta, rho, variation.jer_shift());
        let mut smear = match self.match_gen_jet(pt, eta, phi, reso, gen_jets) {
            Some(gen_pt) => 1.0 + (sf - 1.0) * (pt - gen_pt) / pt,
            None if sf > 1.0 => match Normal::new(0.0, reso * (sf * sf - 1.0).sqrt()) {
                Ok(normal) => 1.0 + normal.sample(rng),
                Err(_) => 1.0,
            },
            None => 1.0,
        };
        if pt > 0.0 && pt * smear < MIN_SMEARED_PT {
            smear = MIN_SMEARED_PT / pt;
        }
        smear
    }

    pub fn calibrate<J: RawJet, R: Rng>(
        &self,
        jet: &J,
        rho: f64,
        variation: &Variation,
        gen_jets: Option<&[GenJet]>,
        rng: &mut R,
    ) -> CalibratedJet {
        //! Correct and smear `jet`. Transverse momentum and mass are rescaled from their raw
        //! values; $`\eta`$ and $`\phi`$ are kept.
        let k = jet.kinematics();
        let jec = self.jec_factor(jet, rho, variation);
        let corrected_pt = jet.raw_pt() * jec;
        let smear = self.smear_factor(corrected_pt, k.eta, k.phi, rho, variation, gen_jets, rng);
        CalibratedJet {
            jec,
            smear,
            kinematics: Kinematics::new(
                corrected_pt * smear,
                k.eta,
                k.phi,
                jet.raw_mass() * jec * smear,
            ),
        }
    }
}
