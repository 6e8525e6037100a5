//! Render-ready records: scatter series and table rows. Nothing here knows
//! how they are painted.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::color::{cluster_hues, expression_colors};
use crate::data::{
    CellAddressing, CellGeneExpression, CellId, ClusterAssignments, ClusterGeneEntry, ClusterLabel,
    Embedding, GeneCellExpression, GeneInfo, GeneMetadata, RankedGenes, SampleData,
};
use crate::index::{compute_downsampled_selection, DownsamplePolicy};

pub const GENE_NOT_FOUND: &str = "Gene not found";

/// Expression per cell for the selected gene.
pub type ExpressionOverlay = IndexMap<CellId, f64>;

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ScatterStyle {
    pub saturation: f32,
    pub lightness: f32,
    pub marker_size: f32,
    /// Opacity of the cluster series while an overlay is shown.
    pub dimmed_opacity: f32,
}

impl Default for ScatterStyle {
    fn default() -> Self {
        Self {
            saturation: 70.0,
            lightness: 50.0,
            marker_size: 6.0,
            dimmed_opacity: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScatterPoint {
    pub cell_id: CellId,
    pub x: f64,
    pub y: f64,
    pub tooltip: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SeriesColor {
    Uniform {
        css: String,
        rgba: u32,
    },
    /// Per-point colours on a continuous scale.
    Scale {
        rgba: Vec<u32>,
        values: Vec<f32>,
        min: f32,
        max: f32,
        label: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub name: String,
    /// `None` for the expression overlay.
    pub cluster: Option<ClusterLabel>,
    pub points: Vec<ScatterPoint>,
    pub color: SeriesColor,
    pub marker_size: f32,
    pub opacity: f32,
    pub show_legend: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScatterProjection {
    pub series: Vec<Series>,
}

impl ScatterProjection {
    pub fn cluster_series(&self) -> impl Iterator<Item = &Series> {
        self.series.iter().filter(|s| s.cluster.is_some())
    }

    pub fn overlay(&self) -> Option<&Series> {
        self.series.iter().find(|s| s.cluster.is_none())
    }

    pub fn has_overlay(&self) -> bool {
        self.overlay().is_some()
    }

    /// Points across the cluster series (the overlay repeats some of them).
    pub fn point_count(&self) -> usize {
        self.cluster_series().map(|s| s.points.len()).sum()
    }
}

/// One series per cluster (ascending label order, evenly spaced hues), plus
/// an expression series when `overlay` is non-empty. With an overlay the
/// cluster series are dimmed and left out of the legend; the overlay holds
/// only cells with positive expression, coloured by `log2(expr + 1)`.
///
/// Cells missing from the embedding or the cluster mapping are not drawn.
pub fn project_scatter<'a>(
    cell_ids: impl IntoIterator<Item = &'a CellId>,
    embedding: &Embedding,
    clusters: &ClusterAssignments,
    overlay: Option<&ExpressionOverlay>,
    addressing: CellAddressing,
    style: &ScatterStyle,
) -> ScatterProjection {
    let ids: Vec<&CellId> = cell_ids.into_iter().collect();
    let overlay = overlay.filter(|o| !o.is_empty());

    let mut groups: BTreeMap<&ClusterLabel, Vec<ScatterPoint>> = BTreeMap::new();
    for id in ids.iter().copied() {
        let (Some(coord), Some(label)) = (embedding.get(id), clusters.get(id)) else {
            continue;
        };
        groups.entry(label).or_default().push(ScatterPoint {
            cell_id: id.clone(),
            x: coord.x,
            y: coord.y,
            tooltip: format!("Cell: {}<br>Cluster: {label}", addressing.display(id)),
        });
    }

    let (opacity, show_legend) = match overlay {
        Some(_) => (style.dimmed_opacity, false),
        None => (1.0, true),
    };
    let hues = cluster_hues(groups.len(), style.saturation, style.lightness);
    let mut series: Vec<Series> = groups
        .into_iter()
        .zip(hues)
        .map(|((label, points), hsl)| Series {
            name: format!("Cluster {label}"),
            cluster: Some(label.clone()),
            points,
            color: SeriesColor::Uniform {
                css: hsl.to_css(),
                rgba: hsl.to_rgba8(),
            },
            marker_size: style.marker_size,
            opacity,
            show_legend,
        })
        .collect();

    if let Some(overlay) = overlay {
        let mut points = Vec::new();
        let mut values = Vec::new();
        for id in ids.iter().copied() {
            let Some(&expr) = overlay.get(id) else {
                continue;
            };
            if expr <= 0.0 {
                continue;
            }
            let Some(coord) = embedding.get(id) else {
                continue;
            };
            points.push(ScatterPoint {
                cell_id: id.clone(),
                x: coord.x,
                y: coord.y,
                tooltip: format!(
                    "Cell: {}<br>{}<br>Expression: {expr:.3}",
                    addressing.display(id),
                    cluster_status(clusters.get(id))
                ),
            });
            values.push((expr + 1.0).log2() as f32);
        }
        let (rgba, max) = expression_colors(&values);
        series.push(Series {
            name: "Expression".into(),
            cluster: None,
            points,
            color: SeriesColor::Scale {
                rgba,
                values,
                min: 0.0,
                max,
                label: "log2(expr + 1)".into(),
            },
            marker_size: style.marker_size,
            opacity: 1.0,
            show_legend: false,
        });
    }

    ScatterProjection { series }
}

/// Cells with positive expression; these must survive downsampling.
pub fn highlighted_cells(overlay: &ExpressionOverlay) -> HashSet<CellId> {
    overlay
        .iter()
        .filter(|(_, v)| **v > 0.0)
        .map(|(id, _)| id.clone())
        .collect()
}

/// The default view of a sample: downsampled cluster scatter, with the
/// overlay's expressing cells always drawn.
pub fn scatter_for_sample(
    data: &SampleData,
    overlay: Option<&ExpressionOverlay>,
    policy: DownsamplePolicy,
    style: &ScatterStyle,
) -> ScatterProjection {
    let highlighted = overlay.map(highlighted_cells).unwrap_or_default();
    let selection = compute_downsampled_selection(data.cell_ids(), &data.clusters, &highlighted, policy);
    project_scatter(
        selection.iter(),
        &data.embedding,
        &data.clusters,
        overlay,
        data.addressing(),
        style,
    )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeneRow {
    Hit {
        rank: usize,
        cell_id: CellId,
        display_id: String,
        cluster: ClusterLabel,
        expression: f64,
    },
    NotFound {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneTable {
    /// Normalised (upper-case) gene name.
    pub gene: String,
    pub rows: Vec<GeneRow>,
    /// Present on a hit; feeds the scatter overlay.
    #[serde(skip)]
    pub overlay: Option<ExpressionOverlay>,
}

pub fn project_gene_table(
    gene: &str,
    gene_cells: &GeneCellExpression,
    addressing: CellAddressing,
) -> GeneTable {
    let name = crate::data::normalize_gene_name(gene);
    let Some(hits) = gene_cells.get(&name) else {
        return GeneTable {
            gene: name,
            rows: vec![GeneRow::NotFound {
                message: GENE_NOT_FOUND.into(),
            }],
            overlay: None,
        };
    };
    let rows = hits
        .iter()
        .enumerate()
        .map(|(i, hit)| GeneRow::Hit {
            rank: i + 1,
            cell_id: hit.cell_id.clone(),
            display_id: addressing.display(&hit.cell_id),
            cluster: hit.cluster.clone(),
            expression: hit.expression,
        })
        .collect();
    let overlay = hits
        .iter()
        .map(|hit| (hit.cell_id.clone(), hit.expression))
        .collect();
    GeneTable {
        gene: name,
        rows,
        overlay: Some(overlay),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellGeneRow {
    pub gene: String,
    pub expression: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellTable {
    pub cell_id: CellId,
    pub display_id: String,
    pub cluster: Option<ClusterLabel>,
    pub cluster_status: String,
    pub rows: Vec<CellGeneRow>,
}

/// Expression and cluster of one cell. The two lookups are independent: a
/// cell may have genes but no cluster, or the reverse.
pub fn project_cell_table(
    cell_id: &CellId,
    cell_genes: &CellGeneExpression,
    clusters: &ClusterAssignments,
    addressing: CellAddressing,
) -> CellTable {
    let rows = cell_genes
        .get(cell_id)
        .map(|genes| {
            genes
                .iter()
                .map(|(gene, expression)| CellGeneRow {
                    gene: gene.clone(),
                    expression: *expression,
                })
                .collect()
        })
        .unwrap_or_default();
    let cluster = clusters.get(cell_id).cloned();
    CellTable {
        cell_id: cell_id.clone(),
        display_id: addressing.display(cell_id),
        cluster_status: cluster_status(cluster.as_ref()),
        cluster,
        rows,
    }
}

pub fn cluster_status(cluster: Option<&ClusterLabel>) -> String {
    match cluster {
        Some(label) => format!("Cluster: {label}"),
        None => "Cluster: Not found".to_string(),
    }
}

pub fn population_status(count: usize) -> String {
    format!("Number of cells in cluster: {count}")
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GeneColumn {
    Rank,
    GeneName,
    Score,
    Log2Fc,
    Pct1,
    Pct2,
    PvalAdj,
    Location,
    FunctionalGroup,
}

impl GeneColumn {
    pub const DEFAULT: [GeneColumn; 6] = [
        GeneColumn::GeneName,
        GeneColumn::Score,
        GeneColumn::Log2Fc,
        GeneColumn::Pct1,
        GeneColumn::Pct2,
        GeneColumn::PvalAdj,
    ];

    pub fn header(self) -> &'static str {
        match self {
            GeneColumn::Rank => "Rank",
            GeneColumn::GeneName => "Gene",
            GeneColumn::Score => "Score",
            GeneColumn::Log2Fc => "log2FC",
            GeneColumn::Pct1 => "% in cluster",
            GeneColumn::Pct2 => "% outside",
            GeneColumn::PvalAdj => "Adj. p-value",
            GeneColumn::Location => "Location",
            GeneColumn::FunctionalGroup => "Functional group",
        }
    }

    fn format(self, rank: usize, entry: &ClusterGeneEntry, info: Option<&GeneInfo>) -> String {
        match self {
            GeneColumn::Rank => rank.to_string(),
            GeneColumn::GeneName => entry.gene_name.clone(),
            GeneColumn::Score => format!("{:.2}", entry.score),
            GeneColumn::Log2Fc => format!("{:.2}", entry.log2_fc),
            GeneColumn::Pct1 => format!("{:.2}%", entry.pct1 * 100.0),
            GeneColumn::Pct2 => format!("{:.2}%", entry.pct2 * 100.0),
            GeneColumn::PvalAdj => format!("{:.2e}", entry.pval_adj),
            GeneColumn::Location => info.and_then(|i| i.location.clone()).unwrap_or_default(),
            GeneColumn::FunctionalGroup => info
                .and_then(|i| i.functional_group.clone())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    pub headers: Vec<&'static str>,
    pub rows: Vec<Vec<String>>,
}

/// Ranked genes of one cluster with the requested columns. An unknown
/// cluster yields a table with headers and no rows.
pub fn project_cluster_genes(
    cluster: &ClusterLabel,
    ranked: &RankedGenes,
    gene_info: &GeneMetadata,
    columns: &[GeneColumn],
) -> Table {
    let headers = columns.iter().map(|c| c.header()).collect();
    let rows = ranked
        .get(cluster)
        .map(|entries| {
            entries
                .iter()
                .enumerate()
                .map(|(i, entry)| {
                    let info = gene_info.get(&entry.gene_name);
                    columns.iter().map(|c| c.format(i + 1, entry, info)).collect()
                })
                .collect()
        })
        .unwrap_or_default();
    Table { headers, rows }
}

/// Clusters offered by the cluster dropdown, in document order.
pub fn cluster_options(ranked: &RankedGenes) -> Vec<ClusterLabel> {
    ranked.keys().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::tiny_sample;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_two_cell_scenario() {
        let embedding: Embedding = serde_json::from_str(
            r#"{"1":{"UMAP1":0.5,"UMAP2":1.2},"2":{"UMAP1":-0.3,"UMAP2":0.1}}"#,
        )
        .unwrap();
        let clusters: ClusterAssignments = serde_json::from_str(r#"{"1":"A","2":"B"}"#).unwrap();
        let proj = project_scatter(
            embedding.keys(),
            &embedding,
            &clusters,
            None,
            CellAddressing::Direct,
            &ScatterStyle::default(),
        );
        let names: Vec<&str> = proj.series.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Cluster A", "Cluster B"]);
        assert!(proj.series.iter().all(|s| s.points.len() == 1));
        assert!(proj.series.iter().all(|s| s.show_legend && s.opacity == 1.0));
        assert_eq!(proj.series[0].points[0].x, 0.5);
        assert!(!proj.has_overlay());
    }

    #[test]
    fn test_every_cell_in_exactly_one_series() {
        let data = tiny_sample();
        let proj = project_scatter(
            data.cell_ids(),
            &data.embedding,
            &data.clusters,
            None,
            data.addressing(),
            &ScatterStyle::default(),
        );
        assert_eq!(proj.point_count(), data.embedding.len());
        let mut seen = HashSet::new();
        for s in &proj.series {
            for p in &s.points {
                assert!(seen.insert(p.cell_id.clone()));
                assert_eq!(s.cluster.as_ref(), data.cluster_of(&p.cell_id));
            }
        }
        let hues: Vec<String> = proj
            .series
            .iter()
            .map(|s| match &s.color {
                SeriesColor::Uniform { css, .. } => css.clone(),
                SeriesColor::Scale { .. } => unreachable!(),
            })
            .collect();
        assert_eq!(hues, vec!["hsl(0, 70%, 50%)", "hsl(120, 70%, 50%)", "hsl(240, 70%, 50%)"]);
    }

    #[test]
    fn test_cells_without_cluster_are_skipped() {
        let data = tiny_sample();
        let mut clusters = data.clusters.clone();
        clusters.shift_remove(&CellId::from(6));
        let proj = project_scatter(
            data.cell_ids(),
            &data.embedding,
            &clusters,
            None,
            data.addressing(),
            &ScatterStyle::default(),
        );
        assert_eq!(proj.point_count(), 5);
    }

    #[test]
    fn test_overlay_dims_background_and_keeps_positive_cells() {
        let data = tiny_sample();
        let table = project_gene_table("cd14", &data.gene_cells, data.addressing());
        let overlay = table.overlay.unwrap();
        let style = ScatterStyle::default();
        let proj = project_scatter(
            data.cell_ids(),
            &data.embedding,
            &data.clusters,
            Some(&overlay),
            data.addressing(),
            &style,
        );
        for s in proj.cluster_series() {
            assert_eq!(s.opacity, style.dimmed_opacity);
            assert!(!s.show_legend);
        }
        let ov = proj.overlay().unwrap();
        let ids: Vec<&str> = ov.points.iter().map(|p| p.cell_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "5"]);
        let SeriesColor::Scale { values, max, .. } = &ov.color else {
            panic!("overlay should use a continuous scale");
        };
        assert_eq!(values[0], (3.5f64).log2() as f32);
        assert_eq!(*max, values[0]);
    }

    #[test]
    fn test_scatter_for_sample_keeps_highlighted() {
        let data = tiny_sample();
        let overlay: ExpressionOverlay = [(CellId::from(6), 4.0)].into_iter().collect();
        let policy = DownsamplePolicy {
            stride: 100,
            min_threshold: 0,
        };
        let proj = scatter_for_sample(&data, Some(&overlay), policy, &ScatterStyle::default());
        // first cell of each of the three clusters plus the highlighted one
        assert_eq!(proj.point_count(), 4);
        assert_eq!(proj.overlay().unwrap().points.len(), 1);
    }

    #[test]
    fn test_gene_lookup_is_case_insensitive() {
        let data = tiny_sample();
        let lower = project_gene_table("cd14", &data.gene_cells, data.addressing());
        let upper = project_gene_table("CD14", &data.gene_cells, data.addressing());
        assert_eq!(lower, upper);
        assert_eq!(lower.gene, "CD14");
        assert_eq!(lower.rows.len(), 3);
        assert_eq!(
            lower.rows[0],
            GeneRow::Hit {
                rank: 1,
                cell_id: CellId::from(2),
                display_id: "2".into(),
                cluster: ClusterLabel::from(1),
                expression: 2.5,
            }
        );
    }

    #[test]
    fn test_gene_not_found_sentinel() {
        let data = tiny_sample();
        let t = project_gene_table("XYZ1", &data.gene_cells, data.addressing());
        assert_eq!(
            t.rows,
            vec![GeneRow::NotFound {
                message: "Gene not found".into()
            }]
        );
        assert!(t.overlay.is_none());
    }

    #[test]
    fn test_cell_table_lookups_are_independent() {
        let data = tiny_sample();
        let found = project_cell_table(&CellId::from(2), &data.cell_genes, &data.clusters, data.addressing());
        assert_eq!(found.cluster_status, "Cluster: 1");
        let genes: Vec<&str> = found.rows.iter().map(|r| r.gene.as_str()).collect();
        assert_eq!(genes, vec!["LYZ", "CD14"]);

        // cell 6 has a cluster but no expression entry
        let no_genes = project_cell_table(&CellId::from(6), &data.cell_genes, &data.clusters, data.addressing());
        assert!(no_genes.rows.is_empty());
        assert_eq!(no_genes.cluster, Some(ClusterLabel::from(0)));

        let missing = project_cell_table(&CellId::from(99), &data.cell_genes, &data.clusters, data.addressing());
        assert!(missing.rows.is_empty());
        assert_eq!(missing.cluster_status, "Cluster: Not found");
    }

    #[test]
    fn test_cluster_gene_table_formatting() {
        let data = tiny_sample();
        let t = project_cluster_genes(
            &ClusterLabel::from(1),
            &data.ranked_genes,
            &data.gene_info,
            &GeneColumn::DEFAULT,
        );
        assert_eq!(t.headers.len(), 6);
        assert_eq!(t.rows[0], vec!["LYZ", "15.00", "3.00", "95.00%", "10.00%", "1.00e-20"]);

        let cols = [GeneColumn::Rank, GeneColumn::GeneName, GeneColumn::Location, GeneColumn::FunctionalGroup];
        let t = project_cluster_genes(&ClusterLabel::from(1), &data.ranked_genes, &data.gene_info, &cols);
        assert_eq!(t.rows[1], vec!["2", "CD14", "5q31.3", "monocyte"]);
        assert_eq!(t.rows[2], vec!["3", "S100A9", "", ""]);

        let empty = project_cluster_genes(&ClusterLabel::from(42), &data.ranked_genes, &data.gene_info, &cols);
        assert!(empty.rows.is_empty());
        assert_eq!(empty.headers, vec!["Rank", "Gene", "Location", "Functional group"]);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(population_status(12), "Number of cells in cluster: 12");
        assert_eq!(cluster_status(None), "Cluster: Not found");
        assert_eq!(cluster_status(Some(&ClusterLabel::from("B"))), "Cluster: B");
    }

    #[test]
    fn test_cluster_options_follow_document_order() {
        let data = tiny_sample();
        let opts: Vec<String> = cluster_options(&data.ranked_genes).iter().map(ToString::to_string).collect();
        assert_eq!(opts, vec!["0", "1", "2"]);
    }
}
