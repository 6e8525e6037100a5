//! Synthetic samples for demos and tests: one Gaussian-ish blob per cluster
//! and a handful of marker genes expressed mostly inside their cluster.

use anyhow::{ensure, Result};
use indexmap::{IndexMap, IndexSet};
use log::info;
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use std::f64::consts::TAU;

use crate::data::{CellId, ClusterGeneEntry, ClusterLabel, UmapCoord};
use crate::markers::MarkerAssignment;
use crate::registry::SampleDocs;

const GENES_PER_CLUSTER: usize = 8;
const BLOB_RADIUS: f64 = 6.0;
const BLOB_SPREAD: f64 = 0.6;
const FUNCTIONAL_GROUPS: &[&str] = &["immune", "signalling", "metabolism", "structural"];

fn round4(v: f64) -> f64 {
    (v * 1e4).round() / 1e4
}

/// Marker genes first, padded with generic names.
fn gene_pool(min: usize) -> Vec<String> {
    let mut pool: IndexSet<String> = MarkerAssignment::seed()
        .iter()
        .flat_map(|(_, genes)| genes.iter().cloned())
        .collect();
    let mut n = 1;
    while pool.len() < min {
        pool.insert(format!("GENE{n}"));
        n += 1;
    }
    pool.into_iter().collect()
}

/// Build the six documents of a synthetic sample. Same arguments, same
/// documents.
pub fn generate(cells: usize, clusters: usize, seed: u64) -> Result<SampleDocs> {
    ensure!(clusters > 0, "need at least one cluster");
    let mut rng = StdRng::seed_from_u64(seed);
    let pool = gene_pool(clusters * GENES_PER_CLUSTER / 2 + GENES_PER_CLUSTER);
    let cluster_genes: Vec<Vec<&String>> = (0..clusters)
        .map(|k| {
            (0..GENES_PER_CLUSTER)
                .map(|j| &pool[(k * GENES_PER_CLUSTER / 2 + j) % pool.len()])
                .collect()
        })
        .collect();

    let mut embedding: IndexMap<CellId, UmapCoord> = IndexMap::with_capacity(cells);
    let mut mapping: IndexMap<CellId, ClusterLabel> = IndexMap::with_capacity(cells);
    let mut cell_genes: IndexMap<CellId, IndexMap<String, f64>> = IndexMap::new();
    let mut gene_cells: IndexMap<String, Vec<(CellId, ClusterLabel, f64)>> = IndexMap::new();

    for i in 0..cells {
        let k = rng.gen_range(0..clusters);
        let id = CellId::from(i as i64);
        let label = ClusterLabel::from(k as i64);

        let angle = TAU * k as f64 / clusters as f64;
        let mut jitter = || (0..3).map(|_| rng.gen_range(-1.0..1.0)).sum::<f64>() * BLOB_SPREAD;
        let x = BLOB_RADIUS * angle.cos() + jitter();
        let y = BLOB_RADIUS * angle.sin() + jitter();
        embedding.insert(id.clone(), UmapCoord { x: round4(x), y: round4(y) });
        mapping.insert(id.clone(), label.clone());

        let mut expressed: IndexMap<String, f64> = IndexMap::new();
        for (j, gene) in cluster_genes[k].iter().enumerate() {
            let p = 0.9 - 0.08 * j as f64;
            if rng.gen_bool(p.clamp(0.05, 1.0)) {
                expressed.insert((*gene).clone(), round4(rng.gen_range(0.5..4.0)));
            }
        }
        if let Some(gene) = pool.choose(&mut rng) {
            if rng.gen_bool(0.1) && !expressed.contains_key(gene) {
                expressed.insert(gene.clone(), round4(rng.gen_range(0.1..1.0)));
            }
        }
        for (gene, value) in &expressed {
            gene_cells
                .entry(gene.clone())
                .or_default()
                .push((id.clone(), label.clone(), *value));
        }
        if !expressed.is_empty() {
            cell_genes.insert(id, expressed);
        }
    }

    for hits in gene_cells.values_mut() {
        hits.sort_by(|a, b| b.2.total_cmp(&a.2));
    }

    let ranked: IndexMap<ClusterLabel, Vec<ClusterGeneEntry>> = cluster_genes
        .iter()
        .enumerate()
        .map(|(k, genes)| {
            let entries = genes
                .iter()
                .enumerate()
                .map(|(j, gene)| {
                    let score = round4(20.0 - 2.0 * j as f64 + rng.gen_range(0.0..1.0));
                    ClusterGeneEntry {
                        gene_name: (*gene).clone(),
                        score,
                        log2_fc: round4(score / 5.0),
                        pct1: round4(rng.gen_range(0.6..0.95)),
                        pct2: round4(rng.gen_range(0.02..0.3)),
                        pval_adj: 10f64.powf(-score),
                    }
                })
                .collect();
            (ClusterLabel::from(k as i64), entries)
        })
        .collect();

    let gene_info: IndexMap<&String, (Option<String>, Option<String>)> = pool
        .iter()
        .map(|gene| {
            let location = rng
                .gen_bool(0.8)
                .then(|| format!("{}q{}.{}", rng.gen_range(1..23), rng.gen_range(11..35), rng.gen_range(1..4)));
            let group = FUNCTIONAL_GROUPS
                .choose(&mut rng)
                .filter(|_| rng.gen_bool(0.7))
                .map(|g| g.to_string());
            (gene, (location, group))
        })
        .collect();

    info!(
        "mock sample: {cells} cells, {clusters} clusters, {} genes (seed {seed})",
        pool.len()
    );
    Ok(SampleDocs {
        embedding: serde_json::to_string(&embedding)?,
        cluster_mapping: serde_json::to_string(&mapping)?,
        ranked_genes: serde_json::to_string(&ranked)?,
        cell_genes: serde_json::to_string(&cell_genes)?,
        gene_cells: serde_json::to_string(&gene_cells)?,
        gene_info: serde_json::to_string(&gene_info)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SampleKey;
    use crate::registry::{fetch_sample, MemorySource};

    #[test]
    fn test_same_seed_same_documents() {
        let a = generate(50, 4, 7).unwrap();
        let b = generate(50, 4, 7).unwrap();
        assert_eq!(a.embedding, b.embedding);
        assert_eq!(a.gene_cells, b.gene_cells);
        let c = generate(50, 4, 8).unwrap();
        assert_ne!(a.embedding, c.embedding);
    }

    #[test]
    fn test_zero_clusters_is_rejected() {
        assert!(generate(10, 0, 1).is_err());
    }

    #[tokio::test]
    async fn test_generated_sample_loads() {
        let key = SampleKey::Numbered(3);
        let mut src = MemorySource::new();
        src.insert_docs(key.clone(), &generate(200, 5, 42).unwrap());
        let data = fetch_sample(&src, &key).await.unwrap();

        assert_eq!(data.embedding.len(), 200);
        assert_eq!(data.clusters.len(), 200);
        assert_eq!(data.ranked_genes.len(), 5);
        assert!(data.ranked_genes.values().all(|g| g.len() == GENES_PER_CLUSTER));
        assert!(data.gene_info.contains_key("CD14"));

        for gene in data.gene_cells.genes() {
            let hits = data.gene_cells.get(gene).unwrap();
            assert!(hits.windows(2).all(|w| w[0].expression >= w[1].expression));
            for hit in hits {
                assert_eq!(data.cluster_of(&hit.cell_id), Some(&hit.cluster));
            }
        }
    }
}
