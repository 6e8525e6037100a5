use futures::try_join;
use log::{debug, info};
use memmap2::Mmap;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::{
    collections::HashMap,
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::data::{
    CellGeneExpression, ClusterAssignments, DatasetKind, Embedding, GeneCellExpression,
    GeneMetadata, RankedGenes, SampleData, SampleKey,
};
use crate::error::LoadError;

/// Where each dataset lives under the data directory. `{sample}` in a
/// template is replaced by the sample key.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DataLayout {
    pub embedding: String,
    pub cluster_mapping: String,
    pub ranked_genes: String,
    pub cell_genes: String,
    pub gene_cells: String,
    pub gene_info: String,
}

impl Default for DataLayout {
    fn default() -> Self {
        Self {
            embedding: "umap/umap_{sample}.json".into(),
            cluster_mapping: "cell_cluster_mapping/cell_cluster_mapping_sample{sample}.json".into(),
            ranked_genes: "top_genes_per_cluster/top_genes_per_cluster_{sample}.json".into(),
            cell_genes: "cell_gene_expression/cell_gene_expression_{sample}.json".into(),
            gene_cells: "gene_cell_expression/gene_cell_expression_{sample}.json".into(),
            gene_info: "gene_info/gene_info_{sample}.json".into(),
        }
    }
}

impl DataLayout {
    pub fn template(&self, kind: DatasetKind) -> &str {
        match kind {
            DatasetKind::Embedding => &self.embedding,
            DatasetKind::ClusterMapping => &self.cluster_mapping,
            DatasetKind::RankedGenes => &self.ranked_genes,
            DatasetKind::CellGenes => &self.cell_genes,
            DatasetKind::GeneCells => &self.gene_cells,
            DatasetKind::GeneInfo => &self.gene_info,
        }
    }

    pub fn path_for(&self, root: &Path, kind: DatasetKind, sample: &SampleKey) -> PathBuf {
        root.join(self.template(kind).replace("{sample}", &sample.to_string()))
    }
}

/// Fetches and parses one dataset of one sample.
#[allow(async_fn_in_trait)]
pub trait DatasetSource {
    async fn fetch<T: DeserializeOwned + Send + 'static>(
        &self,
        sample: &SampleKey,
        kind: DatasetKind,
    ) -> Result<T, LoadError>;
}

/// Reads datasets from disk. Files are memory-mapped and parsed on the
/// blocking pool, so this needs a tokio runtime.
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
    layout: DataLayout,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>, layout: DataLayout) -> Self {
        Self {
            root: root.into(),
            layout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl DatasetSource for FileSource {
    async fn fetch<T: DeserializeOwned + Send + 'static>(
        &self,
        sample: &SampleKey,
        kind: DatasetKind,
    ) -> Result<T, LoadError> {
        let path = self.layout.path_for(&self.root, kind, sample);
        let task_sample = sample.clone();
        tokio::task::spawn_blocking(move || read_json::<T>(&path, &task_sample, kind))
            .await
            .map_err(|source| LoadError::Task {
                sample: sample.clone(),
                kind,
                source,
            })?
    }
}

fn read_json<T: DeserializeOwned>(
    path: &Path,
    sample: &SampleKey,
    kind: DatasetKind,
) -> Result<T, LoadError> {
    let io_err = |source| LoadError::Io {
        sample: sample.clone(),
        kind,
        path: path.to_path_buf(),
        source,
    };
    let parse_err = |source| LoadError::Parse {
        sample: sample.clone(),
        kind,
        source,
    };

    let file = File::open(path).map_err(io_err)?;
    if file.metadata().map_err(io_err)?.len() == 0 {
        // zero-length maps are rejected on some platforms
        return serde_json::from_slice(&[]).map_err(parse_err);
    }
    // SAFETY: the map is read-only and dropped before this function returns.
    let mmap = unsafe { Mmap::map(&file) }.map_err(io_err)?;
    let value = serde_json::from_slice(&mmap).map_err(parse_err)?;
    debug!("parsed {kind} ({} bytes) from {}", mmap.len(), path.display());
    Ok(value)
}

/// The six raw JSON documents of one sample.
#[derive(Debug, Clone, Default)]
pub struct SampleDocs {
    pub embedding: String,
    pub cluster_mapping: String,
    pub ranked_genes: String,
    pub cell_genes: String,
    pub gene_cells: String,
    pub gene_info: String,
}

impl SampleDocs {
    pub fn get(&self, kind: DatasetKind) -> &str {
        match kind {
            DatasetKind::Embedding => &self.embedding,
            DatasetKind::ClusterMapping => &self.cluster_mapping,
            DatasetKind::RankedGenes => &self.ranked_genes,
            DatasetKind::CellGenes => &self.cell_genes,
            DatasetKind::GeneCells => &self.gene_cells,
            DatasetKind::GeneInfo => &self.gene_info,
        }
    }

    /// Write every document under `root` following `layout`.
    pub fn write_to(&self, root: &Path, layout: &DataLayout, sample: &SampleKey) -> anyhow::Result<()> {
        use anyhow::Context as _;
        for kind in DatasetKind::ALL {
            let path = layout.path_for(root, kind, sample);
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir).with_context(|| format!("create dir: {}", dir.display()))?;
            }
            std::fs::write(&path, self.get(kind)).with_context(|| format!("write: {}", path.display()))?;
        }
        Ok(())
    }
}

/// Serves datasets from in-memory JSON. Per-sample latency (counted in
/// scheduler yields) lets callers stage out-of-order completions.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    docs: HashMap<(SampleKey, DatasetKind), Arc<str>>,
    latency: HashMap<SampleKey, usize>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sample: SampleKey, kind: DatasetKind, json: impl Into<String>) {
        let json: String = json.into();
        self.docs.insert((sample, kind), Arc::from(json));
    }

    pub fn insert_docs(&mut self, sample: SampleKey, docs: &SampleDocs) {
        for kind in DatasetKind::ALL {
            self.insert(sample.clone(), kind, docs.get(kind));
        }
    }

    pub fn remove(&mut self, sample: &SampleKey, kind: DatasetKind) {
        self.docs.remove(&(sample.clone(), kind));
    }

    pub fn set_latency(&mut self, sample: SampleKey, yields: usize) {
        self.latency.insert(sample, yields);
    }
}

impl DatasetSource for MemorySource {
    async fn fetch<T: DeserializeOwned + Send + 'static>(
        &self,
        sample: &SampleKey,
        kind: DatasetKind,
    ) -> Result<T, LoadError> {
        let yields = self.latency.get(sample).copied().unwrap_or(0);
        for _ in 0..yields {
            tokio::task::yield_now().await;
        }
        let doc = self
            .docs
            .get(&(sample.clone(), kind))
            .ok_or_else(|| LoadError::Missing {
                sample: sample.clone(),
                kind,
            })?;
        serde_json::from_str(doc).map_err(|source| LoadError::Parse {
            sample: sample.clone(),
            kind,
            source,
        })
    }
}

/// Fetch all six datasets concurrently. The first failure fails the whole
/// sample; nothing partial is returned.
pub async fn fetch_sample<S: DatasetSource>(
    source: &S,
    sample: &SampleKey,
) -> Result<SampleData, LoadError> {
    let (embedding, clusters, ranked_genes, cell_genes, gene_cells, gene_info) = try_join!(
        source.fetch::<Embedding>(sample, DatasetKind::Embedding),
        source.fetch::<ClusterAssignments>(sample, DatasetKind::ClusterMapping),
        source.fetch::<RankedGenes>(sample, DatasetKind::RankedGenes),
        source.fetch::<CellGeneExpression>(sample, DatasetKind::CellGenes),
        source.fetch::<GeneCellExpression>(sample, DatasetKind::GeneCells),
        source.fetch::<GeneMetadata>(sample, DatasetKind::GeneInfo),
    )?;
    info!(
        "sample {sample}: {} cells, {} clusters, {} genes indexed",
        embedding.len(),
        ranked_genes.len(),
        gene_cells.len()
    );
    Ok(SampleData::new(
        sample.clone(),
        embedding,
        clusters,
        ranked_genes,
        cell_genes,
        gene_cells,
        gene_info,
    ))
}

/// Holds the currently loaded sample. The datasets are committed together
/// as one immutable value, so readers see either a whole sample or nothing.
#[derive(Debug, Default)]
pub struct DatasetRegistry {
    current: Option<Arc<SampleData>>,
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        if let Some(old) = self.current.take() {
            debug!("registry: discarded sample {}", old.sample);
        }
    }

    pub fn commit(&mut self, data: Arc<SampleData>) {
        debug!("registry: committed sample {}", data.sample);
        self.current = Some(data);
    }

    pub fn current(&self) -> Option<&Arc<SampleData>> {
        self.current.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.current.is_some()
    }

    /// Reset, fetch, then commit. On failure the registry stays empty.
    pub async fn load<S: DatasetSource>(
        &mut self,
        source: &S,
        sample: &SampleKey,
    ) -> Result<Arc<SampleData>, LoadError> {
        self.reset();
        let data = Arc::new(fetch_sample(source, sample).await?);
        self.commit(data.clone());
        Ok(data)
    }
}
