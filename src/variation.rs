use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Direction of a systematic shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Shift {
    #[default]
    Nominal,
    Up,
    Down,
}

impl Shift {
    pub fn sign(&self) -> f64 {
        match self {
            Shift::Nominal => 0.0,
            Shift::Up => 1.0,
            Shift::Down => -1.0,
        }
    }
}

impl Display for Shift {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Shift::Nominal => write!(f, ""),
            Shift::Up => write!(f, "Up"),
            Shift::Down => write!(f, "Down"),
        }
    }
}

/// The quantity shifted by a [`Variation`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Systematic {
    Nominal,
    /// Jet energy correction uncertainty source, by name.
    Jec(String),
    /// Jet energy resolution scale factor.
    Jer,
    ElectronScale,
    ElectronSigma,
}

/// One processing copy of every event: nominal, or a single systematic shifted up or down.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variation {
    pub systematic: Systematic,
    pub shift: Shift,
}

impl Default for Variation {
    fn default() -> Self {
        Self::nominal()
    }
}

impl Variation {
    pub fn nominal() -> Self {
        Self {
            systematic: Systematic::Nominal,
            shift: Shift::Nominal,
        }
    }

    pub fn is_nominal(&self) -> bool {
        self.systematic == Systematic::Nominal
    }

    pub fn parse(name: &str, jec_sources: &[String]) -> Result<Vec<Variation>, ConfigError> {
        //! Expand a systematic name from the configuration into its up and down copies.
        //!
        //! The empty name is the nominal variation. `JER`, `EleScale` and `EleSigma` name the
        //! resolution and electron energy systematics, `JEC_<source>` one of the configured
        //! jet energy correction uncertainty sources.
        let systematic = match name {
            "" | "Nominal" => return Ok(vec![Variation::nominal()]),
            "JER" => Systematic::Jer,
            "EleScale" => Systematic::ElectronScale,
            "EleSigma" => Systematic::ElectronSigma,
            other => match other.strip_prefix("JEC_") {
                Some(source) if jec_sources.iter().any(|s| s == source) => {
                    Systematic::Jec(source.to_string())
                }
                _ => {
                    return Err(ConfigError::UnknownSystematic {
                        name: name.to_string(),
                    })
                }
            },
        };
        Ok(vec![
            Variation {
                systematic: systematic.clone(),
                shift: Shift::Up,
            },
            Variation {
                systematic,
                shift: Shift::Down,
            },
        ])
    }

    pub fn label(&self) -> String {
        //! Name used to key outputs; the nominal copy is `"Nominal"`.
        if self.is_nominal() {
            "Nominal".to_string()
        } else {
            self.to_string()
        }
    }

    pub fn jec_shift(&self, source: &str) -> Shift {
        match &self.systematic {
            Systematic::Jec(s) if s == source => self.shift,
            _ => Shift::Nominal,
        }
    }

    pub fn jer_shift(&self) -> Shift {
        match self.systematic {
            Systematic::Jer => self.shift,
            _ => Shift::Nominal,
        }
    }
}

impl Display for Variation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.systematic {
            Systematic::Nominal => write!(f, ""),
            Systematic::Jec(source) => write!(f, "JEC_{}{}", source, self.shift),
            Systematic::Jer => write!(f, "JER{}", self.shift),
            Systematic::ElectronScale => write!(f, "EleScale{}", self.shift),
            Systematic::ElectronSigma => write!(f, "EleSigma{}", self.shift),
        }
    }
}
