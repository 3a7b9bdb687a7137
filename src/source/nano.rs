use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use oxyroot::{Branch, Named, RootFile, Slice};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;
use tracing::{debug, info};

use super::{EventInfo, ObjectSource, SourceError};
use crate::event::ScaleFactor;
use crate::object::{
    Collection, Electron, EnergyShifts, FatJet, GenJet, GenParticle, IsoTrack, Jet, Kinematics,
    Muon, PhysicsObject,
};

const EVENT_BRANCHES: [&str; 17] = [
    "event",
    "fixedGridRhoFastjetAll",
    "MET_pt",
    "MET_phi",
    "MET_MetUnclustEnUpDeltaX",
    "MET_MetUnclustEnUpDeltaY",
    "genWeight",
    "Pileup_nTrueInt",
    "LHEPdfWeight",
    "LHEScaleWeight",
    "L1PreFiringWeight_Nom",
    "L1PreFiringWeight_Up",
    "L1PreFiringWeight_Dn",
    "LHE_Njets",
    "run",
    "luminosityBlock",
    "nJet",
];

const JAGGED_EVENT_BRANCHES: [&str; 2] = ["LHEPdfWeight", "LHEScaleWeight"];

const INDEX_BRANCHES: [&str; 3] = ["event", "run", "luminosityBlock"];

const REQUIRED: [&str; 4] = ["event", "fixedGridRhoFastjetAll", "MET_pt", "MET_phi"];

/// One input branch, widened to `f64`.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    /// One value per event.
    Scalar(Vec<f64>),
    /// A variable-length array per event.
    Jagged(Vec<Vec<f64>>),
    /// One unsigned integer per event, kept exact (event numbers exceed `f64` precision).
    Index(Vec<u64>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Scalar(v) => v.len(),
            Column::Jagged(v) => v.len(),
            Column::Index(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn collection_of(branch: &str) -> Option<Collection> {
    let (prefix, _) = branch.split_once('_')?;
    Collection::ALL
        .into_iter()
        .find(|collection| collection.prefix() == prefix)
}

fn is_jagged(branch: &str) -> bool {
    collection_of(branch).is_some() || JAGGED_EVENT_BRANCHES.contains(&branch)
}

fn is_wanted(branch: &str) -> bool {
    is_jagged(branch)
        || EVENT_BRANCHES.contains(&branch)
        || branch.starts_with("HLT_")
        || branch.starts_with("Flag_")
}

trait ToF64 {
    fn to_f64(self) -> f64;
}

macro_rules! to_f64_as {
    ($($ty:ty),*) => {
        $(impl ToF64 for $ty {
            fn to_f64(self) -> f64 {
                self as f64
            }
        })*
    };
}

to_f64_as!(f32, f64, i8, u8, i16, u16, i32, u32, i64, u64);

impl ToF64 for bool {
    fn to_f64(self) -> f64 {
        if self {
            1.0
        } else {
            0.0
        }
    }
}

fn map_root_error<E: std::fmt::Display>(context: &str, err: E) -> SourceError {
    SourceError::Root {
        reason: format!("{context}: {err}"), // the oxyroot error type is not public
    }
}

macro_rules! read_branch {
    ($branch:expr, $name:expr, $ty:ty, $jagged:expr) => {
        if $jagged {
            Column::Jagged(
                $branch
                    .as_iter::<Slice<$ty>>()
                    .map_err(|err| map_root_error(&format!("Failed to read branch '{}'", $name), err))?
                    .map(|row| row.into_vec().into_iter().map(ToF64::to_f64).collect())
                    .collect(),
            )
        } else {
            Column::Scalar(
                $branch
                    .as_iter::<$ty>()
                    .map_err(|err| map_root_error(&format!("Failed to read branch '{}'", $name), err))?
                    .map(ToF64::to_f64)
                    .collect(),
            )
        }
    };
}

macro_rules! read_index_branch {
    ($branch:expr, $name:expr, $ty:ty) => {
        Column::Index(
            $branch
                .as_iter::<$ty>()
                .map_err(|err| map_root_error(&format!("Failed to read branch '{}'", $name), err))?
                .map(|v| v as u64)
                .collect(),
        )
    };
}

fn read_root_branch(branch: &Branch, name: &str) -> Result<Option<Column>, SourceError> {
    let type_name = branch.item_type_name().to_ascii_lowercase();
    let base = type_name.trim_end_matches("[]").trim_end_matches("_t");
    if INDEX_BRANCHES.contains(&name) {
        let column = match base {
            "ulong" | "ulong64" | "unsigned long" | "uint64" => Some(read_index_branch!(branch, name, u64)),
            "long" | "long64" | "int64" => Some(read_index_branch!(branch, name, i64)),
            "uint" | "unsigned int" | "uint32" => Some(read_index_branch!(branch, name, u32)),
            "int" | "int32" => Some(read_index_branch!(branch, name, i32)),
            _ => None,
        };
        if column.is_some() {
            return Ok(column);
        }
    }
    let jagged = is_jagged(name);
    let column = match base {
        "float" | "float32" => read_branch!(branch, name, f32, jagged),
        "double" | "double32" => read_branch!(branch, name, f64, jagged),
        "int" | "int32" => read_branch!(branch, name, i32, jagged),
        "uint" | "unsigned int" | "uint32" => read_branch!(branch, name, u32, jagged),
        "short" | "int16" => read_branch!(branch, name, i16, jagged),
        "ushort" | "unsigned short" | "uint16" => read_branch!(branch, name, u16, jagged),
        "char" | "int8" => read_branch!(branch, name, i8, jagged),
        "uchar" | "unsigned char" | "uint8" => read_branch!(branch, name, u8, jagged),
        "bool" => read_branch!(branch, name, bool, jagged),
        "long" | "long64" | "int64" => read_branch!(branch, name, i64, jagged),
        "ulong" | "ulong64" | "unsigned long" | "uint64" => read_branch!(branch, name, u64, jagged),
        _ => {
            debug!("Skipping branch {} of unsupported type {}", name, type_name);
            return Ok(None);
        }
    };
    Ok(Some(column))
}

fn read_root(path: &Path, tree_name: &str) -> Result<IndexMap<String, Column>, SourceError> {
    let mut file = RootFile::open(path)
        .map_err(|err| map_root_error(&format!("Failed to open ROOT file {path:?}"), err))?;
    let tree = file
        .get_tree(tree_name)
        .map_err(|err| map_root_error(&format!("Failed to open ROOT tree '{tree_name}'"), err))?;
    let mut columns = IndexMap::new();
    for branch in tree.branches() {
        let name = branch.name();
        if !is_wanted(name) {
            continue;
        }
        if let Some(column) = read_root_branch(branch, name)? {
            columns.insert(name.to_string(), column);
        }
    }
    Ok(columns)
}

fn field_to_f64(field: &Field) -> Option<f64> {
    match field {
        Field::Bool(v) => Some(v.to_f64()),
        Field::Byte(v) => Some(v.to_f64()),
        Field::Short(v) => Some(v.to_f64()),
        Field::Int(v) => Some(v.to_f64()),
        Field::Long(v) => Some(v.to_f64()),
        Field::UByte(v) => Some(v.to_f64()),
        Field::UShort(v) => Some(v.to_f64()),
        Field::UInt(v) => Some(v.to_f64()),
        Field::ULong(v) => Some(v.to_f64()),
        Field::Float(v) => Some(v.to_f64()),
        Field::Double(v) => Some(*v),
        _ => None,
    }
}

fn field_to_u64(field: &Field) -> Option<u64> {
    match field {
        Field::ULong(v) => Some(*v),
        Field::Long(v) => Some(*v as u64),
        Field::UInt(v) => Some(u64::from(*v)),
        Field::Int(v) => Some(*v as u64),
        other => field_to_f64(other).map(|v| v as u64),
    }
}

fn read_parquet(path: &Path) -> Result<IndexMap<String, Column>, SourceError> {
    let file = File::open(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let reader = SerializedFileReader::new(file)?;
    let mut columns: IndexMap<String, Column> = IndexMap::new();
    for row in reader.get_row_iter(None)? {
        let row = row?;
        for (name, field) in row.get_column_iter() {
            if !is_wanted(name) {
                continue;
            }
            let column = columns.entry(name.clone()).or_insert_with(|| {
                if INDEX_BRANCHES.contains(&name.as_str()) {
                    Column::Index(Vec::new())
                } else if is_jagged(name) {
                    Column::Jagged(Vec::new())
                } else {
                    Column::Scalar(Vec::new())
                }
            });
            match column {
                Column::Jagged(rows) => rows.push(match field {
                    Field::ListInternal(list) => {
                        list.elements().iter().filter_map(field_to_f64).collect()
                    }
                    _ => Vec::new(),
                }),
                Column::Scalar(values) => values.push(field_to_f64(field).unwrap_or(f64::NAN)),
                Column::Index(values) => values.push(field_to_u64(field).unwrap_or(0)),
            }
        }
    }
    Ok(columns)
}

/// An [`ObjectSource`] over NanoAOD-style flat columns (`Jet_pt`, `GenPart_pdgId`, `HLT_*`,
/// ...) held in memory.
///
/// Columns can come from a ROOT tree or a Parquet file with one row per event. Cloning
/// shares the column store.
#[derive(Debug, Clone)]
pub struct NanoSource {
    columns: Arc<IndexMap<String, Column>>,
    n_events: usize,
    current: usize,
    is_data: bool,
}

impl NanoSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        //! Open a `.root` file (tree `Events`) or a `.parquet` file.
        //!
        //! # Errors
        //! Fails on unreadable files, unknown extensions, and inputs lacking a required
        //! kinematic branch.
        let path = path.as_ref();
        let columns = match path.extension().and_then(|ext| ext.to_str()) {
            Some("root") => read_root(path, "Events")?,
            Some("parquet") => read_parquet(path)?,
            _ => {
                return Err(SourceError::UnsupportedFormat {
                    path: path.to_path_buf(),
                })
            }
        };
        let source = Self::from_columns(columns)?;
        info!(
            "Opened {:?}: {} events, {} columns, {}",
            path,
            source.n_events,
            source.columns.len(),
            if source.is_data { "data" } else { "simulation" }
        );
        Ok(source)
    }

    pub fn from_columns(columns: IndexMap<String, Column>) -> Result<Self, SourceError> {
        //! Build a source from already loaded columns. Inputs without `genWeight` are data.
        let mut required: Vec<String> = REQUIRED.iter().map(|s| s.to_string()).collect();
        for collection in [
            Collection::Electron,
            Collection::Muon,
            Collection::Jet,
            Collection::FatJet,
            Collection::IsoTrack,
        ] {
            for field in ["pt", "eta", "phi"] {
                required.push(format!("{}_{}", collection.prefix(), field));
            }
        }
        if let Some(name) = required.iter().find(|name| !columns.contains_key(*name)) {
            return Err(SourceError::MissingColumn { name: name.clone() });
        }
        let n_events = columns.get("event").map_or(0, Column::len);
        for (name, column) in &columns {
            if column.len() != n_events {
                return Err(SourceError::LengthMismatch {
                    name: name.clone(),
                    expected: n_events,
                    found: column.len(),
                });
            }
        }
        let is_data = !columns.contains_key("genWeight");
        Ok(Self {
            columns: Arc::new(columns),
            n_events,
            current: 0,
            is_data,
        })
    }

    fn scalar(&self, name: &str) -> Option<f64> {
        match self.columns.get(name)? {
            Column::Scalar(values) => values.get(self.current).copied(),
            Column::Index(values) => values.get(self.current).map(|v| *v as f64),
            Column::Jagged(_) => None,
        }
    }

    fn index(&self, name: &str) -> Option<u64> {
        match self.columns.get(name)? {
            Column::Index(values) => values.get(self.current).copied(),
            Column::Scalar(values) => values.get(self.current).map(|v| *v as u64),
            Column::Jagged(_) => None,
        }
    }

    fn row(&self, name: &str) -> Option<&[f64]> {
        match self.columns.get(name)? {
            Column::Jagged(rows) => rows.get(self.current).map(Vec::as_slice),
            Column::Scalar(_) | Column::Index(_) => None,
        }
    }

    fn element(&self, collection: Collection, field: &str, index: usize) -> Option<f64> {
        self.row(&format!("{}_{}", collection.prefix(), field))?
            .get(index)
            .copied()
    }

    fn kinematics(&self, collection: Collection, index: usize, mass: f64) -> Option<Kinematics> {
        Some(Kinematics::new(
            self.element(collection, "pt", index)?,
            self.element(collection, "eta", index)?,
            self.element(collection, "phi", index)?,
            self.element(collection, "mass", index).unwrap_or(mass),
        ))
    }

    fn build(&self, collection: Collection, i: usize) -> Option<PhysicsObject> {
        let value = |field: &str| self.element(collection, field, i);
        let or_zero = |field: &str| value(field).unwrap_or(0.0);
        let flag = |field: &str| value(field).map_or(false, |v| v != 0.0);
        let object: PhysicsObject = match collection {
            Collection::Electron => {
                let kinematics = self.kinematics(collection, i, 0.000511)?;
                let energy_shifts = match (
                    value("dEscaleUp"),
                    value("dEscaleDown"),
                    value("dEsigmaUp"),
                    value("dEsigmaDown"),
                ) {
                    (Some(su), Some(sd), Some(gu), Some(gd)) => Some(EnergyShifts::from_energy_deltas(
                        kinematics.pt,
                        value("eCorr").unwrap_or(1.0),
                        su,
                        sd,
                        gu,
                        gd,
                    )),
                    _ => None,
                };
                Electron {
                    kinematics,
                    charge: or_zero("charge") as i32,
                    dxy: or_zero("dxy"),
                    dz: or_zero("dz"),
                    iso03: or_zero("pfRelIso03_all"),
                    mini_iso: or_zero("miniPFRelIso_all"),
                    rel_jet_iso: or_zero("jetRelIso"),
                    cut_id: or_zero("cutBased") as i32,
                    mva_id: ["mvaFall17V2Iso_WPL", "mvaFall17V2Iso_WP90", "mvaFall17V2Iso_WP80"]
                        .iter()
                        .filter(|wp| flag(**wp))
                        .count() as i32,
                    conversion_veto: flag("convVeto"),
                    energy_shifts,
                }
                .into()
            }
            Collection::Muon => Muon {
                kinematics: self.kinematics(collection, i, 0.105658)?,
                charge: or_zero("charge") as i32,
                dxy: or_zero("dxy"),
                dz: or_zero("dz"),
                iso03: or_zero("pfRelIso03_all"),
                iso04: or_zero("pfRelIso04_all"),
                mini_iso: or_zero("miniPFRelIso_all"),
                rel_jet_iso: or_zero("jetRelIso"),
                cut_id: if flag("tightId") {
                    3
                } else if flag("mediumId") {
                    2
                } else if flag("looseId") {
                    1
                } else {
                    0
                },
                mva_id: or_zero("mvaId") as i32,
                n_tracker_layers: or_zero("nTrackerLayers") as i32,
            }
            .into(),
            Collection::Jet => Jet {
                kinematics: self.kinematics(collection, i, 0.0)?,
                raw_factor: or_zero("rawFactor"),
                area: or_zero("area"),
                deep_jet: or_zero("btagDeepFlavB"),
                deep_csv: or_zero("btagDeepB"),
                parton_flavour: value("partonFlavour").map(|v| v as i32),
                jet_id: or_zero("jetId") as i32,
                pu_id: or_zero("puId") as i32,
            }
            .into(),
            Collection::FatJet => FatJet {
                kinematics: self.kinematics(collection, i, 0.0)?,
                raw_factor: or_zero("rawFactor"),
                area: or_zero("area"),
                tau1: or_zero("tau1"),
                tau2: or_zero("tau2"),
                tau3: or_zero("tau3"),
                deep_ak8_class: FatJet::deep_ak8_class(
                    or_zero("deepTag_H"),
                    or_zero("deepTag_QCD"),
                    or_zero("deepTag_TvsQCD"),
                    or_zero("deepTag_ZvsQCD"),
                    or_zero("deepTag_WvsQCD"),
                ),
            }
            .into(),
            Collection::IsoTrack => IsoTrack {
                kinematics: self.kinematics(collection, i, 0.0)?,
                dxy: or_zero("dxy"),
                dz: or_zero("dz"),
                pdg_id: or_zero("pdgId") as i32,
                iso03: or_zero("pfRelIso03_all"),
                mini_iso: or_zero("miniPFRelIso_all"),
            }
            .into(),
            Collection::GenParticle => GenParticle {
                pdg_id: value("pdgId")? as i32,
                kinematics: self.kinematics(collection, i, 0.0)?,
                mother: value("genPartIdxMother")
                    .filter(|m| *m >= 0.0)
                    .map(|m| m as usize),
            }
            .into(),
            Collection::GenJet | Collection::GenFatJet => GenJet {
                kinematics: self.kinematics(collection, i, 0.0)?,
            }
            .into(),
        };
        Some(object)
    }
}

impl ObjectSource for NanoSource {
    fn n_events(&self) -> usize {
        self.n_events
    }

    fn load(&mut self, index: usize) -> Result<(), SourceError> {
        if index >= self.n_events {
            return Err(SourceError::OutOfRange {
                index,
                n_events: self.n_events,
            });
        }
        self.current = index;
        Ok(())
    }

    fn collection_size(&self, collection: Collection) -> usize {
        self.row(&format!("{}_pt", collection.prefix()))
            .map_or(0, <[f64]>::len)
    }

    fn get(&self, collection: Collection, index: usize) -> Option<PhysicsObject> {
        if index >= self.collection_size(collection) {
            return None;
        }
        self.build(collection, index)
    }

    fn event_info(&self) -> EventInfo {
        let unclustered = self
            .scalar("MET_MetUnclustEnUpDeltaX")
            .zip(self.scalar("MET_MetUnclustEnUpDeltaY"));
        let prefire = match (
            self.scalar("L1PreFiringWeight_Nom"),
            self.scalar("L1PreFiringWeight_Up"),
            self.scalar("L1PreFiringWeight_Dn"),
        ) {
            (Some(nominal), Some(up), Some(down)) => Some(ScaleFactor::new(nominal, up, down)),
            _ => None,
        };
        EventInfo {
            event_number: self.index("event").unwrap_or(0),
            rho: self.scalar("fixedGridRhoFastjetAll").unwrap_or(0.0),
            met_pt: self.scalar("MET_pt").unwrap_or(0.0),
            met_phi: self.scalar("MET_phi").unwrap_or(0.0),
            met_unclustered_delta: unclustered,
            gen_weight: self.scalar("genWeight"),
            n_true_int: self.scalar("Pileup_nTrueInt"),
            pdf_weights: self.row("LHEPdfWeight").map(<[f64]>::to_vec),
            scale_weights: self.row("LHEScaleWeight").map(<[f64]>::to_vec),
            prefire,
            n_parton: self.scalar("LHE_Njets").map(|n| n as i32),
        }
    }

    fn flag(&self, name: &str) -> Option<bool> {
        self.scalar(name).map(|v| v != 0.0)
    }

    fn is_data(&self) -> bool {
        self.is_data
    }
}
