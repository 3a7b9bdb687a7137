use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A histogram whose bins are named rather than ranged, filled in registration order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LabelledHistogram {
    pub name: String,
    pub bins: IndexMap<String, f64>,
}

impl LabelledHistogram {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            bins: IndexMap::new(),
        }
    }

    pub fn register(&mut self, label: &str) {
        self.bins.entry(label.to_string()).or_insert(0.0);
    }

    pub fn insert_at(&mut self, index: usize, label: &str) {
        //! Register `label` at bin position `index`, keeping the relative order of the rest.
        if self.bins.contains_key(label) {
            return;
        }
        let index = index.min(self.bins.len());
        self.bins.shift_insert(index, label.to_string(), 0.0);
    }

    pub fn fill(&mut self, label: &str, weight: f64) {
        *self.bins.entry(label.to_string()).or_insert(0.0) += weight;
    }

    pub fn get(&self, label: &str) -> f64 {
        self.bins.get(label).copied().unwrap_or(0.0)
    }

    pub fn values(&self) -> Vec<f64> {
        self.bins.values().copied().collect()
    }

    pub fn merge(&mut self, other: &Self) {
        for (label, value) in &other.bins {
            *self.bins.entry(label.clone()).or_insert(0.0) += value;
        }
    }
}

fn find_bin(edges: &[f64], x: f64) -> Option<usize> {
    if edges.len() < 2 || x.is_nan() || x < edges[0] || x >= edges[edges.len() - 1] {
        return None;
    }
    Some(edges.partition_point(|edge| *edge <= x) - 1)
}

/// A one-dimensional histogram with arbitrary bin edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram1D {
    pub name: String,
    pub edges: Vec<f64>,
    pub counts: Vec<f64>,
    pub underflow: f64,
    pub overflow: f64,
}

impl Histogram1D {
    pub fn new(name: &str, edges: Vec<f64>) -> Self {
        let n = edges.len().saturating_sub(1);
        Self {
            name: name.to_string(),
            edges,
            counts: vec![0.0; n],
            underflow: 0.0,
            overflow: 0.0,
        }
    }

    pub fn uniform(name: &str, bins: usize, low: f64, high: f64) -> Self {
        let width = (high - low) / bins as f64;
        let edges = (0..=bins).map(|i| low + width * i as f64).collect();
        Self::new(name, edges)
    }

    pub fn fill(&mut self, x: f64, weight: f64) {
        match find_bin(&self.edges, x) {
            Some(i) => self.counts[i] += weight,
            None if x < self.edges.first().copied().unwrap_or(0.0) => self.underflow += weight,
            None => self.overflow += weight,
        }
    }

    pub fn entries(&self) -> f64 {
        self.counts.iter().sum::<f64>() + self.underflow + self.overflow
    }

    pub fn merge(&mut self, other: &Self) {
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
        self.underflow += other.underflow;
        self.overflow += other.overflow;
    }
}

/// A two-dimensional histogram; entries outside the edges are only counted in `outside`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram2D {
    pub name: String,
    pub x_edges: Vec<f64>,
    pub y_edges: Vec<f64>,
    /// Row-major in `x`: `counts[ix * ny + iy]`.
    pub counts: Vec<f64>,
    pub outside: f64,
}

impl Histogram2D {
    pub fn new(name: &str, x_edges: Vec<f64>, y_edges: Vec<f64>) -> Self {
        let n = x_edges.len().saturating_sub(1) * y_edges.len().saturating_sub(1);
        Self {
            name: name.to_string(),
            x_edges,
            y_edges,
            counts: vec![0.0; n],
            outside: 0.0,
        }
    }

    fn ny(&self) -> usize {
        self.y_edges.len().saturating_sub(1)
    }

    pub fn fill(&mut self, x: f64, y: f64, weight: f64) {
        match (find_bin(&self.x_edges, x), find_bin(&self.y_edges, y)) {
            (Some(ix), Some(iy)) => {
                let ny = self.ny();
                self.counts[ix * ny + iy] += weight
            }
            _ => self.outside += weight,
        }
    }

    pub fn bin(&self, ix: usize, iy: usize) -> f64 {
        self.counts.get(ix * self.ny() + iy).copied().unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.counts.iter().sum()
    }

    pub fn merge(&mut self, other: &Self) {
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
        self.outside += other.outside;
    }
}

/// Any histogram a pipeline stage can hand to the job output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Histogram {
    Labelled(LabelledHistogram),
    OneD(Histogram1D),
    TwoD(Histogram2D),
}

impl Histogram {
    pub fn name(&self) -> &str {
        match self {
            Histogram::Labelled(h) => &h.name,
            Histogram::OneD(h) => &h.name,
            Histogram::TwoD(h) => &h.name,
        }
    }

    pub fn merge(&mut self, other: &Self) {
        match (self, other) {
            (Histogram::Labelled(a), Histogram::Labelled(b)) => a.merge(b),
            (Histogram::OneD(a), Histogram::OneD(b)) => a.merge(b),
            (Histogram::TwoD(a), Histogram::TwoD(b)) => a.merge(b),
            _ => {}
        }
    }
}

impl From<LabelledHistogram> for Histogram {
    fn from(value: LabelledHistogram) -> Self {
        Histogram::Labelled(value)
    }
}

impl From<Histogram1D> for Histogram {
    fn from(value: Histogram1D) -> Self {
        Histogram::OneD(value)
    }
}

impl From<Histogram2D> for Histogram {
    fn from(value: Histogram2D) -> Self {
        Histogram::TwoD(value)
    }
}
