use indexmap::IndexMap;
use log::warn;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::{fmt, str::FromStr};

use crate::error::SampleKeyError;

/// Cell identifier. Upstream documents use both JSON numbers (expression
/// triples) and strings (object keys); both land in the same canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(String);

impl CellId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_number(&self) -> Option<i64> {
        self.0.parse().ok()
    }
}

impl From<i64> for CellId {
    fn from(v: i64) -> Self {
        Self(v.to_string())
    }
}

impl From<&str> for CellId {
    fn from(v: &str) -> Self {
        Self(v.to_string())
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for CellId {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

struct CellIdVisitor;

impl<'de> Visitor<'de> for CellIdVisitor {
    type Value = CellId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a cell id (number or string)")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<CellId, E> {
        Ok(CellId::from(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<CellId, E> {
        Ok(CellId(v.to_string()))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<CellId, E> {
        if v.fract() == 0.0 && v.abs() < 9.0e15 {
            Ok(CellId::from(v as i64))
        } else {
            Ok(CellId(v.to_string()))
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<CellId, E> {
        Ok(CellId(v.to_string()))
    }
}

impl<'de> Deserialize<'de> for CellId {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        d.deserialize_any(CellIdVisitor)
    }
}

/// Cluster label. Integer-looking strings are canonicalised to numbers so a
/// cluster spelled `3` in one document and `"3"` in another is one cluster.
/// Orders numbers first (numerically), then text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClusterLabel {
    Number(i64),
    Text(String),
}

impl ClusterLabel {
    pub fn parse(s: &str) -> Self {
        match s.trim().parse::<i64>() {
            Ok(n) => ClusterLabel::Number(n),
            Err(_) => ClusterLabel::Text(s.to_string()),
        }
    }

    /// Placeholder cluster for marker genes that hit nothing.
    pub fn not_found() -> Self {
        ClusterLabel::Number(-1)
    }

    pub fn is_not_found(&self) -> bool {
        *self == ClusterLabel::Number(-1)
    }
}

impl From<i64> for ClusterLabel {
    fn from(v: i64) -> Self {
        ClusterLabel::Number(v)
    }
}

impl From<&str> for ClusterLabel {
    fn from(v: &str) -> Self {
        ClusterLabel::parse(v)
    }
}

impl fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterLabel::Number(n) => write!(f, "{n}"),
            ClusterLabel::Text(s) => f.write_str(s),
        }
    }
}

impl Serialize for ClusterLabel {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            ClusterLabel::Number(n) => s.serialize_i64(*n),
            ClusterLabel::Text(t) => s.serialize_str(t),
        }
    }
}

struct ClusterLabelVisitor;

impl<'de> Visitor<'de> for ClusterLabelVisitor {
    type Value = ClusterLabel;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a cluster label (number or string)")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<ClusterLabel, E> {
        Ok(ClusterLabel::Number(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<ClusterLabel, E> {
        i64::try_from(v)
            .map(ClusterLabel::Number)
            .map_err(|_| E::custom(format!("cluster label {v} out of range")))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<ClusterLabel, E> {
        if v.fract() == 0.0 && v.abs() < 9.0e15 {
            Ok(ClusterLabel::Number(v as i64))
        } else {
            Ok(ClusterLabel::Text(v.to_string()))
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<ClusterLabel, E> {
        Ok(ClusterLabel::parse(v))
    }
}

impl<'de> Deserialize<'de> for ClusterLabel {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        d.deserialize_any(ClusterLabelVisitor)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct UmapCoord {
    #[serde(rename = "UMAP1")]
    pub x: f64,
    #[serde(rename = "UMAP2")]
    pub y: f64,
}

/// One row of a cluster's ranked differential-expression list. The rank is
/// the position in the list and is never stored.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ClusterGeneEntry {
    pub gene_name: String,
    pub score: f64,
    #[serde(rename = "log2_FC")]
    pub log2_fc: f64,
    pub pct1: f64,
    pub pct2: f64,
    pub pval_adj: f64,
}

pub type Embedding = IndexMap<CellId, UmapCoord>;
pub type ClusterAssignments = IndexMap<CellId, ClusterLabel>;
pub type RankedGenes = IndexMap<ClusterLabel, Vec<ClusterGeneEntry>>;
pub type GeneMetadata = IndexMap<String, GeneInfo>;

/// Sparse per-cell expression: gene name to relative expression.
pub type CellExpression = IndexMap<String, f64>;

/// Either accepted per-cell shape before normalisation.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CellGenesDoc {
    Map(IndexMap<String, f64>),
    Pairs(Vec<(String, f64)>),
}

impl From<CellGenesDoc> for CellExpression {
    fn from(doc: CellGenesDoc) -> Self {
        match doc {
            CellGenesDoc::Map(m) => m,
            CellGenesDoc::Pairs(pairs) => pairs.into_iter().collect(),
        }
    }
}

/// Cell to gene expression, accepting both the mapping shape and the older
/// `[[gene, score], ...]` list shape.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(from = "IndexMap<CellId, CellGenesDoc>")]
pub struct CellGeneExpression(IndexMap<CellId, CellExpression>);

impl From<IndexMap<CellId, CellGenesDoc>> for CellGeneExpression {
    fn from(raw: IndexMap<CellId, CellGenesDoc>) -> Self {
        Self(raw.into_iter().map(|(id, doc)| (id, doc.into())).collect())
    }
}

impl CellGeneExpression {
    pub fn get(&self, id: &CellId) -> Option<&CellExpression> {
        self.0.get(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(from = "(CellId, ClusterLabel, f64)")]
pub struct GeneCellHit {
    pub cell_id: CellId,
    pub cluster: ClusterLabel,
    pub expression: f64,
}

impl From<(CellId, ClusterLabel, f64)> for GeneCellHit {
    fn from((cell_id, cluster, expression): (CellId, ClusterLabel, f64)) -> Self {
        Self {
            cell_id,
            cluster,
            expression,
        }
    }
}

/// Gene to ranked cells. Keys are always stored upper-case; lookups
/// normalise their input the same way.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(from = "IndexMap<String, Vec<GeneCellHit>>")]
pub struct GeneCellExpression(IndexMap<String, Vec<GeneCellHit>>);

impl From<IndexMap<String, Vec<GeneCellHit>>> for GeneCellExpression {
    fn from(raw: IndexMap<String, Vec<GeneCellHit>>) -> Self {
        let mut out = IndexMap::with_capacity(raw.len());
        for (gene, hits) in raw {
            let key = normalize_gene_name(&gene);
            if out.contains_key(&key) {
                warn!("gene '{gene}' collides with '{key}' after upper-casing; keeping the first");
                continue;
            }
            out.insert(key, hits);
        }
        Self(out)
    }
}

impl GeneCellExpression {
    pub fn get(&self, gene: &str) -> Option<&[GeneCellHit]> {
        self.0.get(&normalize_gene_name(gene)).map(Vec::as_slice)
    }

    pub fn genes(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub fn normalize_gene_name(name: &str) -> String {
    name.trim().to_uppercase()
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
#[serde(from = "(Option<String>, Option<String>)")]
pub struct GeneInfo {
    pub location: Option<String>,
    pub functional_group: Option<String>,
}

impl From<(Option<String>, Option<String>)> for GeneInfo {
    fn from((location, functional_group): (Option<String>, Option<String>)) -> Self {
        Self {
            location,
            functional_group,
        }
    }
}

/// Record shape of the single-file standalone view: an array of points.
#[derive(Debug, Deserialize, Clone)]
pub struct LegacyPoint {
    #[serde(rename = "UMAP1")]
    pub x: f64,
    #[serde(rename = "UMAP2")]
    pub y: f64,
    #[serde(rename = "Cluster")]
    pub cluster: ClusterLabel,
}

/// Split the standalone array into an embedding and a cluster mapping keyed
/// by array position.
pub fn split_legacy_points(points: Vec<LegacyPoint>) -> (Embedding, ClusterAssignments) {
    let mut embedding = Embedding::with_capacity(points.len());
    let mut clusters = ClusterAssignments::with_capacity(points.len());
    for (i, p) in points.into_iter().enumerate() {
        let id = CellId::from(i as i64);
        embedding.insert(id.clone(), UmapCoord { x: p.x, y: p.y });
        clusters.insert(id, p.cluster);
    }
    (embedding, clusters)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SampleKey {
    Numbered(u32),
    All,
    Combined,
}

impl SampleKey {
    pub fn addressing(&self) -> CellAddressing {
        match self {
            SampleKey::Combined => CellAddressing::Decimated { factor: 10 },
            _ => CellAddressing::Direct,
        }
    }
}

impl fmt::Display for SampleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleKey::Numbered(n) => write!(f, "{n}"),
            SampleKey::All => f.write_str("All"),
            SampleKey::Combined => f.write_str("Combined"),
        }
    }
}

impl FromStr for SampleKey {
    type Err = SampleKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        match t.to_ascii_lowercase().as_str() {
            "all" => Ok(SampleKey::All),
            "combined" => Ok(SampleKey::Combined),
            _ => t
                .parse::<u32>()
                .map(SampleKey::Numbered)
                .map_err(|_| SampleKeyError::Invalid(s.to_string())),
        }
    }
}

/// How user-facing cell indices map onto dataset cell ids.
///
/// The Combined sample keeps every tenth cell of the full dataset, so its
/// dataset ids are multiples of ten. Users address those cells by the
/// compacted index (`id / 10`), and every table and tooltip shows that index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellAddressing {
    Direct,
    Decimated { factor: u32 },
}

impl CellAddressing {
    /// Map text typed by the user to a dataset id. `None` means the input
    /// cannot address any cell under this scheme.
    pub fn to_dataset_id(&self, input: &str) -> Option<CellId> {
        let t = input.trim();
        if t.is_empty() {
            return None;
        }
        match self {
            CellAddressing::Direct => Some(CellId::new(t)),
            CellAddressing::Decimated { factor } => {
                let idx: i64 = t.parse().ok()?;
                idx.checked_mul(i64::from(*factor)).map(CellId::from)
            }
        }
    }

    pub fn display(&self, id: &CellId) -> String {
        match self {
            CellAddressing::Direct => id.to_string(),
            CellAddressing::Decimated { factor } => match id.as_number() {
                Some(n) if n % i64::from(*factor) == 0 => (n / i64::from(*factor)).to_string(),
                _ => id.to_string(),
            },
        }
    }
}

/// The six per-sample documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatasetKind {
    Embedding,
    ClusterMapping,
    RankedGenes,
    CellGenes,
    GeneCells,
    GeneInfo,
}

impl DatasetKind {
    pub const ALL: [DatasetKind; 6] = [
        DatasetKind::Embedding,
        DatasetKind::ClusterMapping,
        DatasetKind::RankedGenes,
        DatasetKind::CellGenes,
        DatasetKind::GeneCells,
        DatasetKind::GeneInfo,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DatasetKind::Embedding => "umap",
            DatasetKind::ClusterMapping => "cell_cluster_mapping",
            DatasetKind::RankedGenes => "top_genes_per_cluster",
            DatasetKind::CellGenes => "cell_gene_expression",
            DatasetKind::GeneCells => "gene_cell_expression",
            DatasetKind::GeneInfo => "gene_info",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything loaded for one sample. Immutable once built; a sample switch
/// replaces the whole value.
#[derive(Debug, Clone)]
pub struct SampleData {
    pub sample: SampleKey,
    pub embedding: Embedding,
    pub clusters: ClusterAssignments,
    pub ranked_genes: RankedGenes,
    pub cell_genes: CellGeneExpression,
    pub gene_cells: GeneCellExpression,
    pub gene_info: GeneMetadata,
}

impl SampleData {
    pub fn new(
        sample: SampleKey,
        embedding: Embedding,
        clusters: ClusterAssignments,
        ranked_genes: RankedGenes,
        cell_genes: CellGeneExpression,
        gene_cells: GeneCellExpression,
        gene_info: GeneMetadata,
    ) -> Self {
        if embedding.len() != clusters.len() {
            warn!(
                "sample {sample}: embedding has {} cells but cluster mapping has {}",
                embedding.len(),
                clusters.len()
            );
        }
        Self {
            sample,
            embedding,
            clusters,
            ranked_genes,
            cell_genes,
            gene_cells,
            gene_info,
        }
    }

    /// Cell ids in embedding document order.
    pub fn cell_ids(&self) -> impl Iterator<Item = &CellId> {
        self.embedding.keys()
    }

    pub fn cluster_of(&self, id: &CellId) -> Option<&ClusterLabel> {
        self.clusters.get(id)
    }

    pub fn addressing(&self) -> CellAddressing {
        self.sample.addressing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_keeps_document_order() {
        let e: Embedding = serde_json::from_str(
            r#"{"7":{"UMAP1":0.5,"UMAP2":1.2},"2":{"UMAP1":-0.3,"UMAP2":0.1}}"#,
        )
        .unwrap();
        let ids: Vec<&str> = e.keys().map(CellId::as_str).collect();
        assert_eq!(ids, vec!["7", "2"]);
        assert_eq!(e[&CellId::from(2)], UmapCoord { x: -0.3, y: 0.1 });
    }

    #[test]
    fn test_cluster_labels_canonicalise() {
        let c: ClusterAssignments =
            serde_json::from_str(r#"{"1":3,"2":"3","3":"B","4":" 12 "}"#).unwrap();
        assert_eq!(c[&CellId::from(1)], ClusterLabel::Number(3));
        assert_eq!(c[&CellId::from(2)], ClusterLabel::Number(3));
        assert_eq!(c[&CellId::from(3)], ClusterLabel::Text("B".into()));
        assert_eq!(c[&CellId::from(4)], ClusterLabel::Number(12));
    }

    #[test]
    fn test_cluster_label_order_numbers_before_text() {
        let mut labels = vec![
            ClusterLabel::from("B"),
            ClusterLabel::from(10),
            ClusterLabel::from("A"),
            ClusterLabel::from(2),
        ];
        labels.sort();
        let shown: Vec<String> = labels.iter().map(ToString::to_string).collect();
        assert_eq!(shown, vec!["2", "10", "A", "B"]);
    }

    #[test]
    fn test_ranked_genes_keyed_by_cluster() {
        let r: RankedGenes = serde_json::from_str(
            r#"{"0":[{"gene_name":"CD14","score":12.5,"log2_FC":3.1,"pct1":0.9,"pct2":0.1,"pval_adj":1e-20}]}"#,
        )
        .unwrap();
        let genes = &r[&ClusterLabel::Number(0)];
        assert_eq!(genes[0].gene_name, "CD14");
        assert_eq!(genes[0].log2_fc, 3.1);
    }

    #[test]
    fn test_cell_genes_accepts_both_shapes() {
        let c: CellGeneExpression = serde_json::from_str(
            r#"{"1":{"CD3D":2.5,"LTB":1.0},"2":[["LYZ",4.0],["S100A9",3.5]]}"#,
        )
        .unwrap();
        let first = c.get(&CellId::from(1)).unwrap();
        assert_eq!(first["CD3D"], 2.5);
        let second = c.get(&CellId::from(2)).unwrap();
        let genes: Vec<&str> = second.keys().map(String::as_str).collect();
        assert_eq!(genes, vec!["LYZ", "S100A9"]);
    }

    #[test]
    fn test_gene_cells_uppercase_keys_and_triples() {
        let g: GeneCellExpression =
            serde_json::from_str(r#"{"cd14":[[10,"3",5.5],[20,4,1.5]],"CD14":[[1,1,1.0]]}"#).unwrap();
        assert_eq!(g.len(), 1);
        let hits = g.get("Cd14").unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].cell_id, CellId::from(10));
        assert_eq!(hits[0].cluster, ClusterLabel::Number(3));
        assert_eq!(hits[1].expression, 1.5);
    }

    #[test]
    fn test_gene_info_nullable_pair() {
        let m: GeneMetadata =
            serde_json::from_str(r#"{"CD14":["5q31.3","immune"],"XIST":[null,null]}"#).unwrap();
        assert_eq!(m["CD14"].location.as_deref(), Some("5q31.3"));
        assert_eq!(m["XIST"], GeneInfo::default());
    }

    #[test]
    fn test_legacy_points_split_by_position() {
        let pts: Vec<LegacyPoint> = serde_json::from_str(
            r#"[{"UMAP1":1.0,"UMAP2":2.0,"Cluster":0},{"UMAP1":3.0,"UMAP2":4.0,"Cluster":1}]"#,
        )
        .unwrap();
        let (e, c) = split_legacy_points(pts);
        assert_eq!(e.len(), 2);
        assert_eq!(c[&CellId::from(1)], ClusterLabel::Number(1));
        assert_eq!(e[&CellId::from(1)].y, 4.0);
    }

    #[test]
    fn test_sample_key_parse() {
        assert_eq!("3".parse::<SampleKey>().unwrap(), SampleKey::Numbered(3));
        assert_eq!("combined".parse::<SampleKey>().unwrap(), SampleKey::Combined);
        assert_eq!("All".parse::<SampleKey>().unwrap(), SampleKey::All);
        assert!("x".parse::<SampleKey>().is_err());
        assert_eq!(SampleKey::Combined.to_string(), "Combined");
    }

    #[test]
    fn test_decimated_addressing() {
        let a = SampleKey::Combined.addressing();
        assert_eq!(a.to_dataset_id(" 4 "), Some(CellId::from(40)));
        assert_eq!(a.to_dataset_id("abc"), None);
        assert_eq!(a.display(&CellId::from(40)), "4");
        assert_eq!(a.display(&CellId::from(41)), "41");

        let d = SampleKey::Numbered(1).addressing();
        assert_eq!(d.to_dataset_id("abc"), Some(CellId::new("abc")));
        assert_eq!(d.display(&CellId::from(40)), "40");
        assert_eq!(d.to_dataset_id("   "), None);
    }
}
