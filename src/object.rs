use serde::{Deserialize, Serialize};

use crate::four_momentum::FourMomentum;

/// The per-event collections an [`crate::source::ObjectSource`] can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    Electron,
    Muon,
    Jet,
    FatJet,
    IsoTrack,
    GenParticle,
    GenJet,
    GenFatJet,
}

impl Collection {
    pub const ALL: [Collection; 8] = [
        Collection::Electron,
        Collection::Muon,
        Collection::Jet,
        Collection::FatJet,
        Collection::IsoTrack,
        Collection::GenParticle,
        Collection::GenJet,
        Collection::GenFatJet,
    ];

    pub fn prefix(&self) -> &'static str {
        //! Branch prefix used by NanoAOD-style flat tables.
        match self {
            Collection::Electron => "Electron",
            Collection::Muon => "Muon",
            Collection::Jet => "Jet",
            Collection::FatJet => "FatJet",
            Collection::IsoTrack => "IsoTrack",
            Collection::GenParticle => "GenPart",
            Collection::GenJet => "GenJet",
            Collection::GenFatJet => "GenJetAK8",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Kinematics {
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
    pub mass: f64,
}

impl Kinematics {
    pub fn new(pt: f64, eta: f64, phi: f64, mass: f64) -> Self {
        Self { pt, eta, phi, mass }
    }

    pub fn p4(&self) -> FourMomentum {
        FourMomentum::from_pt_eta_phi_m(self.pt, self.eta, self.phi, self.mass)
    }

    pub fn delta_r(&self, other: &Kinematics) -> f64 {
        crate::four_momentum::delta_r(self.eta, self.phi, other.eta, other.phi)
    }
}

/// Electron energy-shifted transverse momenta, only present in simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyShifts {
    pub scale_up: f64,
    pub scale_down: f64,
    pub sigma_up: f64,
    pub sigma_down: f64,
}

impl EnergyShifts {
    pub fn from_energy_deltas(
        pt: f64,
        e_corr: f64,
        scale_up: f64,
        scale_down: f64,
        sigma_up: f64,
        sigma_down: f64,
    ) -> Self {
        //! Build shifted momenta from the relative energy corrections stored next to each
        //! electron. `pt` already includes `e_corr`, so the uncorrected momentum is
        //! `pt / e_corr` and each shift is applied on top of the nominal correction.
        let uncorrected = if e_corr != 0.0 { pt / e_corr } else { pt };
        Self {
            scale_up: (e_corr + scale_up) * uncorrected,
            scale_down: (e_corr - scale_down) * uncorrected,
            sigma_up: (e_corr + sigma_up) * uncorrected,
            sigma_down: (e_corr - sigma_down) * uncorrected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Electron {
    pub kinematics: Kinematics,
    pub charge: i32,
    pub dxy: f64,
    pub dz: f64,
    pub iso03: f64,
    pub mini_iso: f64,
    pub rel_jet_iso: f64,
    pub cut_id: i32,
    pub mva_id: i32,
    pub conversion_veto: bool,
    pub energy_shifts: Option<EnergyShifts>,
}

impl Electron {
    pub fn candidate_pts(&self) -> Vec<f64> {
        //! Nominal transverse momentum followed by every available energy-shifted variant.
        let mut pts = vec![self.kinematics.pt];
        if let Some(shifts) = self.energy_shifts {
            pts.extend([
                shifts.scale_down,
                shifts.sigma_down,
                shifts.scale_up,
                shifts.sigma_up,
            ]);
        }
        pts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Muon {
    pub kinematics: Kinematics,
    pub charge: i32,
    pub dxy: f64,
    pub dz: f64,
    pub iso03: f64,
    pub iso04: f64,
    pub mini_iso: f64,
    pub rel_jet_iso: f64,
    /// 0 = none, 1 = loose, 2 = medium, 3 = tight
    pub cut_id: i32,
    pub mva_id: i32,
    pub n_tracker_layers: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jet {
    /// Kinematics as stored in the input, with the producer's corrections applied.
    pub kinematics: Kinematics,
    pub raw_factor: f64,
    pub area: f64,
    pub deep_jet: f64,
    pub deep_csv: f64,
    pub parton_flavour: Option<i32>,
    pub jet_id: i32,
    pub pu_id: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FatJet {
    pub kinematics: Kinematics,
    pub raw_factor: f64,
    pub area: f64,
    pub tau1: f64,
    pub tau2: f64,
    pub tau3: f64,
    /// Index of the most probable DeepAK8 class: QCD, W, top, Z, Higgs.
    pub deep_ak8_class: i32,
}

impl FatJet {
    pub fn deep_ak8_class(higgs: f64, qcd: f64, t_vs_qcd: f64, z_vs_qcd: f64, w_vs_qcd: f64) -> i32 {
        //! Recover raw class scores from the binary `X vs QCD` discriminants and return the
        //! index of the largest one.
        fn demangle(a_vs_b: f64, b: f64) -> f64 {
            if a_vs_b != 1.0 && b != 0.0 {
                -(a_vs_b * b) / (a_vs_b - 1.0)
            } else {
                a_vs_b
            }
        }
        let scores = [
            qcd,
            demangle(w_vs_qcd, qcd),
            demangle(t_vs_qcd, qcd),
            demangle(z_vs_qcd, qcd),
            higgs,
        ];
        scores
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, s)| {
                if *s > best.1 {
                    (i, *s)
                } else {
                    best
                }
            })
            .0 as i32
    }
}

/// Shared view of jets of either cone size, used by the calibrator.
pub trait RawJet {
    fn kinematics(&self) -> Kinematics;
    fn raw_factor(&self) -> f64;
    fn area(&self) -> f64;

    fn raw_pt(&self) -> f64 {
        self.kinematics().pt * (1.0 - self.raw_factor())
    }
    fn raw_mass(&self) -> f64 {
        self.kinematics().mass * (1.0 - self.raw_factor())
    }
}

impl RawJet for Jet {
    fn kinematics(&self) -> Kinematics {
        self.kinematics
    }
    fn raw_factor(&self) -> f64 {
        self.raw_factor
    }
    fn area(&self) -> f64 {
        self.area
    }
}

impl RawJet for FatJet {
    fn kinematics(&self) -> Kinematics {
        self.kinematics
    }
    fn raw_factor(&self) -> f64 {
        self.raw_factor
    }
    fn area(&self) -> f64 {
        self.area
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsoTrack {
    pub kinematics: Kinematics,
    pub dxy: f64,
    pub dz: f64,
    pub pdg_id: i32,
    pub iso03: f64,
    pub mini_iso: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenParticle {
    pub pdg_id: i32,
    pub kinematics: Kinematics,
    /// Index of the parent in the same collection, `None` for a root particle.
    pub mother: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenJet {
    pub kinematics: Kinematics,
}

/// One object from any collection, as handed out by an [`crate::source::ObjectSource`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PhysicsObject {
    Electron(Electron),
    Muon(Muon),
    Jet(Jet),
    FatJet(FatJet),
    IsoTrack(IsoTrack),
    GenParticle(GenParticle),
    GenJet(GenJet),
}

impl PhysicsObject {
    pub fn kinematics(&self) -> Kinematics {
        match self {
            PhysicsObject::Electron(o) => o.kinematics,
            PhysicsObject::Muon(o) => o.kinematics,
            PhysicsObject::Jet(o) => o.kinematics,
            PhysicsObject::FatJet(o) => o.kinematics,
            PhysicsObject::IsoTrack(o) => o.kinematics,
            PhysicsObject::GenParticle(o) => o.kinematics,
            PhysicsObject::GenJet(o) => o.kinematics,
        }
    }
}

/// Implements conversions between a concrete object type and its [`PhysicsObject`] variant.
#[macro_export]
macro_rules! physics_object {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for $crate::object::PhysicsObject {
                fn from(value: $variant) -> Self {
                    $crate::object::PhysicsObject::$variant(value)
                }
            }

            impl TryFrom<$crate::object::PhysicsObject> for $variant {
                type Error = $crate::object::PhysicsObject;
                fn try_from(value: $crate::object::PhysicsObject) -> Result<Self, Self::Error> {
                    match value {
                        $crate::object::PhysicsObject::$variant(inner) => Ok(inner),
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

physics_object!(Electron, Muon, Jet, FatJet, IsoTrack, GenParticle, GenJet);
