use indexmap::IndexSet;
use log::debug;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::data::{CellId, ClusterAssignments, ClusterLabel};

/// Which cells to draw by default.
///
/// Within each cluster (taken in natural cell order) every `stride`-th cell
/// is kept, starting at the first. Clusters of `min_threshold` cells or fewer
/// are kept whole so rare populations stay visible.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct DownsamplePolicy {
    pub stride: usize,
    pub min_threshold: usize,
}

impl Default for DownsamplePolicy {
    fn default() -> Self {
        Self {
            stride: 5,
            min_threshold: 10,
        }
    }
}

impl DownsamplePolicy {
    /// Policy of the single-file standalone view.
    pub fn legacy() -> Self {
        Self {
            stride: 10,
            min_threshold: 10,
        }
    }
}

/// Cells per cluster, clusters in ascending label order.
#[derive(Debug, Default, Clone)]
pub struct ClusterMembership {
    members: BTreeMap<ClusterLabel, IndexSet<CellId>>,
}

impl ClusterMembership {
    pub fn count(&self, label: &ClusterLabel) -> usize {
        self.members.get(label).map_or(0, IndexSet::len)
    }

    pub fn members(&self, label: &ClusterLabel) -> Option<&IndexSet<CellId>> {
        self.members.get(label)
    }

    pub fn counts(&self) -> impl Iterator<Item = (&ClusterLabel, usize)> {
        self.members.iter().map(|(label, ids)| (label, ids.len()))
    }

    pub fn labels(&self) -> impl Iterator<Item = &ClusterLabel> {
        self.members.keys()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn total(&self) -> usize {
        self.members.values().map(IndexSet::len).sum()
    }
}

pub fn compute_cluster_membership(clusters: &ClusterAssignments) -> ClusterMembership {
    let mut members: BTreeMap<ClusterLabel, IndexSet<CellId>> = BTreeMap::new();
    for (id, label) in clusters {
        members.entry(label.clone()).or_default().insert(id.clone());
    }
    debug!("membership: {} cells in {} clusters", clusters.len(), members.len());
    ClusterMembership { members }
}

/// Cells picked for drawing, in natural order. Only a rendering aid: counts
/// and lookups always go to the full datasets.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DownsampledSelection {
    ids: IndexSet<CellId>,
}

impl DownsampledSelection {
    pub fn contains(&self, id: &CellId) -> bool {
        self.ids.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CellId> {
        self.ids.iter()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Pick the cells to draw. `highlighted` cells (for instance those
/// expressing the selected gene) are always kept. Cells with no cluster
/// entry are downsampled as a group of their own.
pub fn compute_downsampled_selection<'a>(
    cell_ids: impl IntoIterator<Item = &'a CellId>,
    clusters: &ClusterAssignments,
    highlighted: &HashSet<CellId>,
    policy: DownsamplePolicy,
) -> DownsampledSelection {
    let ids: Vec<&CellId> = cell_ids.into_iter().collect();
    let stride = policy.stride.max(1);

    let mut population: HashMap<Option<&ClusterLabel>, usize> = HashMap::new();
    for id in &ids {
        *population.entry(clusters.get(*id)).or_default() += 1;
    }

    let mut position: HashMap<Option<&ClusterLabel>, usize> = HashMap::new();
    let mut out = IndexSet::with_capacity(ids.len() / stride + highlighted.len());
    for id in ids.iter().copied() {
        let group = clusters.get(id);
        let slot = position.entry(group).or_default();
        let i = *slot;
        *slot += 1;

        let small = population.get(&group).copied().unwrap_or(0) <= policy.min_threshold;
        if small || i % stride == 0 || highlighted.contains(id) {
            out.insert(id.clone());
        }
    }
    debug!(
        "downsample: kept {} of {} cells (stride {stride}, {} highlighted)",
        out.len(),
        ids.len(),
        highlighted.len()
    );
    DownsampledSelection { ids: out }
}
