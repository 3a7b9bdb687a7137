use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::object::{GenParticle, Kinematics};

/// Value stored in integer truth fields of unmatched objects.
pub const SENTINEL: i32 = -999;
/// Value stored in floating-point truth fields of unmatched objects.
pub const SENTINEL_F: f64 = -999.0;

/// Requirements for associating a reconstructed object with a generator particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchCriteria {
    /// Absolute PDG ID a candidate must carry.
    pub pdg_id: i32,
    pub max_delta_r: f64,
    /// Maximum $`|p_T^{reco} - p_T^{gen}| / p_T^{reco}`$.
    pub max_rel_delta_pt: f64,
}

impl MatchCriteria {
    pub const ELECTRON: MatchCriteria = MatchCriteria {
        pdg_id: 11,
        max_delta_r: 0.4,
        max_rel_delta_pt: 0.4,
    };
    pub const MUON: MatchCriteria = MatchCriteria {
        pdg_id: 13,
        max_delta_r: 0.4,
        max_rel_delta_pt: 0.4,
    };
    pub const JET: MatchCriteria = MatchCriteria {
        pdg_id: 5,
        max_delta_r: 0.4,
        max_rel_delta_pt: 3.0,
    };
}

/// Generator-particle indices already assigned to a reconstructed object this event.
#[derive(Debug, Clone, Default)]
pub struct ClaimSet(IndexSet<usize>);

impl ClaimSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.0.contains(&index)
    }

    pub fn claim(&mut self, index: usize) -> bool {
        //! Returns `false` if `index` was already claimed.
        self.0.insert(index)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &usize> {
        self.0.iter()
    }
}

pub fn first_copy(gen: &[GenParticle], index: usize) -> usize {
    //! Walk up the mother chain while the mother has the same PDG ID and return the earliest
    //! such ancestor. The walk is bounded by the collection size, so malformed cyclic
    //! mother links terminate.
    let mut current = index;
    for _ in 0..gen.len() {
        match gen[current].mother {
            Some(mother) if mother < gen.len() && gen[mother].pdg_id == gen[current].pdg_id => {
                current = mother
            }
            _ => break,
        }
    }
    current
}

pub fn find_match(
    gen: &[GenParticle],
    reco: &Kinematics,
    criteria: &MatchCriteria,
    claims: &ClaimSet,
) -> Option<usize> {
    //! Find the generator particle matching `reco`, resolved to its first copy.
    //!
    //! A candidate replaces the current best only if it improves both $`\Delta R`$ and the
    //! relative $`p_T`$ difference. Candidates whose resolved index is already claimed are
    //! skipped and the search continues.
    let mut best = None;
    let mut delta_r_min = f64::INFINITY;
    let mut delta_pt_min = f64::INFINITY;
    for (i, particle) in gen.iter().enumerate() {
        let delta_r = reco.delta_r(&particle.kinematics);
        let delta_pt = (reco.pt - particle.kinematics.pt).abs() / reco.pt;
        if delta_r > criteria.max_delta_r || delta_pt > criteria.max_rel_delta_pt {
            continue;
        }
        if delta_r < delta_r_min
            && delta_pt < delta_pt_min
            && particle.pdg_id.abs() == criteria.pdg_id
        {
            let resolved = first_copy(gen, i);
            if claims.contains(resolved) {
                continue;
            }
            best = Some(resolved);
            delta_r_min = delta_r;
            delta_pt_min = delta_pt;
        }
    }
    best
}

/// Generator-level identity of a reconstructed object; every field is a sentinel when
/// unmatched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TruthInfo {
    pub index: i32,
    pub pdg_id: i32,
    pub mother_id: i32,
    pub grandmother_id: i32,
    pub pt: f64,
    pub eta: f64,
    pub phi: f64,
}

impl Default for TruthInfo {
    fn default() -> Self {
        Self {
            index: SENTINEL,
            pdg_id: SENTINEL,
            mother_id: SENTINEL,
            grandmother_id: SENTINEL,
            pt: SENTINEL_F,
            eta: SENTINEL_F,
            phi: SENTINEL_F,
        }
    }
}

impl TruthInfo {
    pub fn is_matched(&self) -> bool {
        self.index != SENTINEL
    }
}

pub fn truth_info(gen: &[GenParticle], index: usize) -> TruthInfo {
    //! Identity of generator particle `index` with its mother and grandmother PDG IDs.
    //!
    //! The grandmother is the mother of the mother's first copy, skipping same-ID
    //! self-transitions.
    let Some(particle) = gen.get(index) else {
        return TruthInfo::default();
    };
    let mother = particle.mother.filter(|m| *m < gen.len());
    let grandmother = mother
        .and_then(|m| gen[first_copy(gen, m)].mother)
        .filter(|g| *g < gen.len());
    TruthInfo {
        index: index as i32,
        pdg_id: particle.pdg_id,
        mother_id: mother.map_or(SENTINEL, |m| gen[m].pdg_id),
        grandmother_id: grandmother.map_or(SENTINEL, |g| gen[g].pdg_id),
        pt: particle.kinematics.pt,
        eta: particle.kinematics.eta,
        phi: particle.kinematics.phi,
    }
}

pub fn match_and_claim(
    gen: &[GenParticle],
    reco: &Kinematics,
    criteria: &MatchCriteria,
    claims: &mut ClaimSet,
) -> TruthInfo {
    match find_match(gen, reco, criteria, claims) {
        Some(index) => {
            claims.claim(index);
            truth_info(gen, index)
        }
        None => TruthInfo::default(),
    }
}

/// A selected object that can carry a truth match.
pub trait TruthMatchable {
    const CRITERIA: MatchCriteria;

    fn match_kinematics(&self) -> Kinematics;
    fn truth_mut(&mut self) -> &mut TruthInfo;
}

pub fn match_all<T: TruthMatchable>(objects: &mut [T], gen: &[GenParticle], claims: &mut ClaimSet) {
    //! Match every object in `objects`, in order, sharing `claims`.
    for object in objects.iter_mut() {
        let reco = object.match_kinematics();
        *object.truth_mut() = match_and_claim(gen, &reco, &T::CRITERIA, claims);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn particle(pdg_id: i32, pt: f64, mother: Option<usize>) -> GenParticle {
        GenParticle {
            pdg_id,
            kinematics: Kinematics::new(pt, 0.5, 1.0, 0.0),
            mother,
        }
    }

    #[test]
    fn copies_follow_same_id_links() {
        // 0: W, 1: e (from W), 2: e (copy of 1), 3: e (copy of 2)
        let gen = vec![
            particle(24, 80.0, None),
            particle(11, 40.0, Some(0)),
            particle(11, 40.0, Some(1)),
            particle(11, 40.0, Some(2)),
        ];
        assert_eq!(first_copy(&gen, 3), 1);
        assert_eq!(first_copy(&gen, 0), 0);
    }

    #[test]
    fn cyclic_mothers_terminate() {
        let gen = vec![particle(11, 40.0, Some(1)), particle(11, 40.0, Some(0))];
        let root = first_copy(&gen, 0);
        assert!(root < 2);
    }
}
