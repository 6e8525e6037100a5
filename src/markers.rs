use indexmap::IndexMap;
use log::debug;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::data::{ClusterLabel, RankedGenes};
use crate::error::MarkerError;

const SEED_TABLE: &[(&str, &[&str])] = &[
    ("T cells", &["CD3D", "CD3E", "IL7R"]),
    ("NK cells", &["GNLY", "NKG7"]),
    ("B cells", &["MS4A1", "CD79A"]),
    ("CD14+ Monocytes", &["CD14", "LYZ"]),
    ("FCGR3A+ Monocytes", &["FCGR3A", "MS4A7"]),
    ("Dendritic cells", &["FCER1A", "CST3"]),
    ("Platelets", &["PPBP"]),
];

/// Cell type to its marker genes, in table order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerAssignment {
    table: IndexMap<String, Vec<String>>,
}

impl MarkerAssignment {
    pub fn new(table: IndexMap<String, Vec<String>>) -> Self {
        Self { table }
    }

    /// The built-in PBMC marker table.
    pub fn seed() -> Self {
        let table = SEED_TABLE
            .iter()
            .map(|(cell_type, genes)| {
                (
                    cell_type.to_string(),
                    genes.iter().map(|g| g.to_string()).collect(),
                )
            })
            .collect();
        Self { table }
    }

    pub fn cell_types(&self) -> impl Iterator<Item = &str> {
        self.table.keys().map(String::as_str)
    }

    pub fn markers(&self, cell_type: &str) -> Option<&[String]> {
        self.table.get(cell_type).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.table.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// The live, user-editable marker text fields; one comma-separated field
/// per cell type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerInputs {
    fields: IndexMap<String, String>,
}

impl MarkerInputs {
    pub fn from_assignment(assignment: &MarkerAssignment) -> Self {
        let fields = assignment
            .iter()
            .map(|(cell_type, genes)| (cell_type.to_string(), genes.join(", ")))
            .collect();
        Self { fields }
    }

    /// Replace the text of an existing field. Unknown cell types have no
    /// field and are ignored.
    pub fn set(&mut self, cell_type: &str, text: impl Into<String>) -> bool {
        match self.fields.get_mut(cell_type) {
            Some(field) => {
                *field = text.into();
                true
            }
            None => false,
        }
    }

    pub fn text(&self, cell_type: &str) -> Option<&str> {
        self.fields.get(cell_type).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Read every field: split on commas, trim, drop empty entries.
    pub fn parse(&self) -> MarkerAssignment {
        let table = self
            .fields
            .iter()
            .map(|(cell_type, text)| {
                let genes = text
                    .split(',')
                    .map(str::trim)
                    .filter(|g| !g.is_empty())
                    .map(str::to_string)
                    .collect();
                (cell_type.clone(), genes)
            })
            .collect();
        MarkerAssignment::new(table)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerHit {
    pub cluster: ClusterLabel,
    pub score: f64,
    /// 1-based position in the cluster's ranked list.
    pub rank: usize,
    pub pval_adj: f64,
}

/// Every cluster whose ranked list contains `gene` (exact, case-sensitive),
/// in ranked-list document order.
pub fn find_marker_gene_in_clusters(gene: &str, ranked: &RankedGenes) -> Vec<MarkerHit> {
    ranked
        .iter()
        .flat_map(move |(cluster, entries)| {
            entries
                .iter()
                .enumerate()
                .filter(move |(_, e)| e.gene_name == gene)
                .map(move |(i, e)| MarkerHit {
                    cluster: cluster.clone(),
                    score: e.score,
                    rank: i + 1,
                    pval_adj: e.pval_adj,
                })
        })
        .collect()
}

/// Lookup result for one (cell type, marker gene) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerHitRecord {
    pub cell_type: String,
    pub marker_gene: String,
    pub hits: Vec<MarkerHit>,
}

pub fn annotate_markers(assignment: &MarkerAssignment, ranked: &RankedGenes) -> Vec<MarkerHitRecord> {
    let mut out = Vec::new();
    for (cell_type, genes) in assignment.iter() {
        for gene in genes {
            out.push(MarkerHitRecord {
                cell_type: cell_type.to_string(),
                marker_gene: gene.clone(),
                hits: find_marker_gene_in_clusters(gene, ranked),
            });
        }
    }
    debug!("markers: {} (cell type, gene) pairs looked up", out.len());
    out
}

/// Gene-centric row. `cell_type` is set on the first row of its group only;
/// a marker with no hits gets one row with the `-1` cluster and no values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellTypeRow {
    pub cell_type: Option<String>,
    pub marker_gene: String,
    pub cluster: ClusterLabel,
    pub score: Option<f64>,
    pub rank: Option<usize>,
    pub pval_adj: Option<f64>,
}

pub fn cell_type_rows(records: &[MarkerHitRecord]) -> Vec<CellTypeRow> {
    let mut rows = Vec::new();
    let mut previous: Option<&str> = None;
    for record in records {
        let cell_type = record.cell_type.as_str();
        let mut label = (previous != Some(cell_type)).then(|| record.cell_type.clone());
        previous = Some(cell_type);
        if record.hits.is_empty() {
            rows.push(CellTypeRow {
                cell_type: label.take(),
                marker_gene: record.marker_gene.clone(),
                cluster: ClusterLabel::not_found(),
                score: None,
                rank: None,
                pval_adj: None,
            });
            continue;
        }
        for hit in &record.hits {
            rows.push(CellTypeRow {
                cell_type: label.take(),
                marker_gene: record.marker_gene.clone(),
                cluster: hit.cluster.clone(),
                score: Some(hit.score),
                rank: Some(hit.rank),
                pval_adj: Some(hit.pval_adj),
            });
        }
    }
    rows
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterHit {
    pub cell_type: String,
    pub marker_gene: String,
    pub score: f64,
    pub rank: usize,
    pub pval_adj: f64,
}

/// Regroup the per-marker lookups by the cluster they hit, clusters in
/// ascending label order.
pub fn invert_by_cluster(records: &[MarkerHitRecord]) -> BTreeMap<ClusterLabel, Vec<ClusterHit>> {
    let mut out: BTreeMap<ClusterLabel, Vec<ClusterHit>> = BTreeMap::new();
    for record in records {
        for hit in &record.hits {
            out.entry(hit.cluster.clone()).or_default().push(ClusterHit {
                cell_type: record.cell_type.clone(),
                marker_gene: record.marker_gene.clone(),
                score: hit.score,
                rank: hit.rank,
                pval_adj: hit.pval_adj,
            });
        }
    }
    out
}

/// Cluster-centric row; `cluster` is set on the first row of its group only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterRow {
    pub cluster: Option<ClusterLabel>,
    pub cell_type: String,
    pub marker_gene: String,
    pub score: f64,
    pub rank: usize,
    pub pval_adj: f64,
}

pub fn cluster_rows(by_cluster: &BTreeMap<ClusterLabel, Vec<ClusterHit>>) -> Vec<ClusterRow> {
    let mut rows = Vec::new();
    for (cluster, hits) in by_cluster {
        for (i, hit) in hits.iter().enumerate() {
            rows.push(ClusterRow {
                cluster: (i == 0).then(|| cluster.clone()),
                cell_type: hit.cell_type.clone(),
                marker_gene: hit.marker_gene.clone(),
                score: hit.score,
                rank: hit.rank,
                pval_adj: hit.pval_adj,
            });
        }
    }
    rows
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MarkerStage {
    MarkerInput,
    CellTypeView,
    ClusterView,
}

impl MarkerStage {
    pub fn next(self) -> Option<Self> {
        match self {
            MarkerStage::MarkerInput => Some(MarkerStage::CellTypeView),
            MarkerStage::CellTypeView => Some(MarkerStage::ClusterView),
            MarkerStage::ClusterView => None,
        }
    }

    pub fn back(self) -> Option<Self> {
        match self {
            MarkerStage::MarkerInput => None,
            MarkerStage::CellTypeView => Some(MarkerStage::MarkerInput),
            MarkerStage::ClusterView => Some(MarkerStage::CellTypeView),
        }
    }
}

/// Only adjacent stages connect, in either direction.
pub fn validate_transition(from: MarkerStage, to: MarkerStage) -> Result<(), MarkerError> {
    if from.next() == Some(to) || from.back() == Some(to) {
        Ok(())
    } else {
        Err(MarkerError::InvalidTransition { from, to })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerField {
    pub cell_type: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "view", content = "rows", rename_all = "snake_case")]
pub enum MarkerPanel {
    Inputs(Vec<MarkerField>),
    CellTypes(Vec<CellTypeRow>),
    Clusters(Vec<ClusterRow>),
}

/// Marker input -> cell type view -> cluster view, with back navigation.
/// Every view is derived from the live input fields when it is entered.
#[derive(Debug, Clone)]
pub struct MarkerWorkflow {
    stage: MarkerStage,
    seed: MarkerAssignment,
    inputs: MarkerInputs,
}

impl MarkerWorkflow {
    pub fn new(seed: MarkerAssignment) -> Self {
        let inputs = MarkerInputs::from_assignment(&seed);
        Self {
            stage: MarkerStage::MarkerInput,
            seed,
            inputs,
        }
    }

    pub fn stage(&self) -> MarkerStage {
        self.stage
    }

    pub fn inputs(&self) -> &MarkerInputs {
        &self.inputs
    }

    pub fn edit(&mut self, cell_type: &str, text: impl Into<String>) -> bool {
        self.inputs.set(cell_type, text)
    }

    /// Drop all edits and return to the input stage.
    pub fn reseed(&mut self) {
        self.inputs = MarkerInputs::from_assignment(&self.seed);
        self.stage = MarkerStage::MarkerInput;
    }

    pub fn panel(&self, ranked: &RankedGenes) -> MarkerPanel {
        match self.stage {
            MarkerStage::MarkerInput => MarkerPanel::Inputs(
                self.inputs
                    .fields()
                    .map(|(cell_type, text)| MarkerField {
                        cell_type: cell_type.to_string(),
                        text: text.to_string(),
                    })
                    .collect(),
            ),
            MarkerStage::CellTypeView => {
                let records = annotate_markers(&self.inputs.parse(), ranked);
                MarkerPanel::CellTypes(cell_type_rows(&records))
            }
            MarkerStage::ClusterView => {
                let records = annotate_markers(&self.inputs.parse(), ranked);
                MarkerPanel::Clusters(cluster_rows(&invert_by_cluster(&records)))
            }
        }
    }

    pub fn go_to(&mut self, to: MarkerStage, ranked: &RankedGenes) -> Result<MarkerPanel, MarkerError> {
        validate_transition(self.stage, to)?;
        self.stage = to;
        Ok(self.panel(ranked))
    }

    pub fn next(&mut self, ranked: &RankedGenes) -> Result<MarkerPanel, MarkerError> {
        let to = self.stage.next().ok_or(MarkerError::NoTransition {
            stage: self.stage,
            direction: "forward",
        })?;
        self.go_to(to, ranked)
    }

    pub fn back(&mut self, ranked: &RankedGenes) -> Result<MarkerPanel, MarkerError> {
        let to = self.stage.back().ok_or(MarkerError::NoTransition {
            stage: self.stage,
            direction: "back",
        })?;
        self.go_to(to, ranked)
    }
}
