//! Small hand-written sample shared by the unit tests.

use crate::data::{
    CellGeneExpression, ClusterAssignments, Embedding, GeneCellExpression, GeneMetadata,
    RankedGenes, SampleData, SampleKey,
};
use crate::registry::SampleDocs;

pub(crate) fn tiny_docs() -> SampleDocs {
    SampleDocs {
        embedding: r#"{
            "1": {"UMAP1": 0.5, "UMAP2": 1.2},
            "2": {"UMAP1": -0.3, "UMAP2": 0.1},
            "3": {"UMAP1": 1.0, "UMAP2": 1.0},
            "4": {"UMAP1": 2.0, "UMAP2": -1.0},
            "5": {"UMAP1": 0.0, "UMAP2": 0.0},
            "6": {"UMAP1": 3.0, "UMAP2": 3.0}
        }"#
        .into(),
        cluster_mapping: r#"{"1": 0, "2": 1, "3": 0, "4": 2, "5": 1, "6": 0}"#.into(),
        ranked_genes: r#"{
            "0": [
                {"gene_name": "CD3D", "score": 10.0, "log2_FC": 2.0, "pct1": 0.9, "pct2": 0.2, "pval_adj": 1e-10},
                {"gene_name": "LTB", "score": 8.0, "log2_FC": 1.5, "pct1": 0.8, "pct2": 0.3, "pval_adj": 1e-8},
                {"gene_name": "CD14", "score": 3.0, "log2_FC": 0.5, "pct1": 0.4, "pct2": 0.3, "pval_adj": 0.01}
            ],
            "1": [
                {"gene_name": "LYZ", "score": 15.0, "log2_FC": 3.0, "pct1": 0.95, "pct2": 0.1, "pval_adj": 1e-20},
                {"gene_name": "CD14", "score": 12.0, "log2_FC": 2.8, "pct1": 0.85, "pct2": 0.05, "pval_adj": 1e-15},
                {"gene_name": "S100A9", "score": 9.0, "log2_FC": 2.2, "pct1": 0.9, "pct2": 0.2, "pval_adj": 1e-9}
            ],
            "2": [
                {"gene_name": "MS4A1", "score": 11.0, "log2_FC": 3.5, "pct1": 0.7, "pct2": 0.02, "pval_adj": 1e-12},
                {"gene_name": "CD79A", "score": 7.0, "log2_FC": 3.1, "pct1": 0.75, "pct2": 0.03, "pval_adj": 1e-7}
            ]
        }"#
        .into(),
        cell_genes: r#"{
            "1": {"CD3D": 2.0, "LTB": 1.0},
            "2": [["LYZ", 3.0], ["CD14", 2.5]],
            "3": {"CD3D": 1.0},
            "4": {"MS4A1": 2.2},
            "5": {"LYZ": 2.0, "CD14": 1.5}
        }"#
        .into(),
        gene_cells: r#"{
            "CD14": [[2, 1, 2.5], [5, 1, 1.5], [1, 0, 0.0]],
            "LYZ": [[2, 1, 3.0], [5, 1, 2.0]],
            "CD3D": [[1, 0, 2.0], [3, 0, 1.0]],
            "MS4A1": [[4, 2, 2.2]]
        }"#
        .into(),
        gene_info: r#"{"CD14": ["5q31.3", "monocyte"], "CD3D": ["11q23.3", null]}"#.into(),
    }
}

pub(crate) fn tiny_sample() -> SampleData {
    let docs = tiny_docs();
    let embedding: Embedding = serde_json::from_str(&docs.embedding).unwrap();
    let clusters: ClusterAssignments = serde_json::from_str(&docs.cluster_mapping).unwrap();
    let ranked: RankedGenes = serde_json::from_str(&docs.ranked_genes).unwrap();
    let cell_genes: CellGeneExpression = serde_json::from_str(&docs.cell_genes).unwrap();
    let gene_cells: GeneCellExpression = serde_json::from_str(&docs.gene_cells).unwrap();
    let gene_info: GeneMetadata = serde_json::from_str(&docs.gene_info).unwrap();
    SampleData::new(
        SampleKey::Numbered(1),
        embedding,
        clusters,
        ranked,
        cell_genes,
        gene_cells,
        gene_info,
    )
}
