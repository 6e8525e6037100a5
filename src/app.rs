use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

use crate::{
    config::Config,
    data::{CellId, ClusterLabel, SampleData, SampleKey},
    error::{LoadError, MarkerError},
    index::{compute_cluster_membership, DownsamplePolicy},
    markers::{MarkerAssignment, MarkerInputs, MarkerPanel, MarkerStage, MarkerWorkflow},
    project::{
        cluster_options, population_status, project_cell_table, project_cluster_genes,
        project_gene_table, scatter_for_sample, CellTable, GeneColumn, GeneTable, ScatterProjection,
        ScatterStyle, Table,
    },
    registry::{fetch_sample, DatasetRegistry, DatasetSource},
};

/// Interactive controls that carry a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Element {
    ClusterSelect,
    CellIdInput,
    GeneInput,
    ViewSwitch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    ClusterGenes,
    CellLookup,
    GeneHighlight,
    MarkerAnnotation,
}

/// Raw input from the UI. Text is passed through untrimmed.
#[derive(Clone, Debug, PartialEq)]
pub enum UiEvent {
    SelectCluster(String),
    CellIdEntered(String),
    GeneEntered(String),
    SwitchView(ViewMode),
}

impl UiEvent {
    pub fn element(&self) -> Element {
        match self {
            UiEvent::SelectCluster(_) => Element::ClusterSelect,
            UiEvent::CellIdEntered(_) => Element::CellIdInput,
            UiEvent::GeneEntered(_) => Element::GeneInput,
            UiEvent::SwitchView(_) => Element::ViewSwitch,
        }
    }
}

/// What the render layer should redraw after an event.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "update", rename_all = "snake_case")]
pub enum ViewUpdate {
    ClusterGenes {
        sample: String,
        cluster: ClusterLabel,
        status: String,
        table: Table,
    },
    CellLookup {
        sample: String,
        table: CellTable,
    },
    GeneHighlight {
        sample: String,
        table: GeneTable,
        /// Scatter with the expression overlay on a hit. An unknown gene that
        /// clears an earlier overlay carries the plain scatter; otherwise absent.
        scatter: Option<ScatterProjection>,
    },
    ViewChanged {
        mode: ViewMode,
        /// Plain scatter, emitted when an overlay was cleared.
        scatter: Option<ScatterProjection>,
        markers: Option<MarkerPanel>,
    },
}

/// Per-session view state that listeners may change.
#[derive(Debug)]
pub struct ViewState {
    pub mode: ViewMode,
    /// Gene whose overlay is currently drawn.
    pub overlay_gene: Option<String>,
    pub markers: MarkerWorkflow,
}

impl ViewState {
    fn new(seed: MarkerAssignment) -> Self {
        Self {
            mode: ViewMode::ClusterGenes,
            overlay_gene: None,
            markers: MarkerWorkflow::new(seed),
        }
    }

    fn reset(&mut self) {
        self.mode = ViewMode::ClusterGenes;
        self.overlay_gene = None;
        self.markers.reseed();
    }
}

pub type Listener = Box<dyn FnMut(&UiEvent, &mut ViewState) -> Option<ViewUpdate> + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    element: Element,
    id: u64,
}

impl ListenerHandle {
    pub fn element(&self) -> Element {
        self.element
    }
}

/// Attached listeners, at most one per element. Detaching is explicit; a
/// handle detaches exactly the closure it was returned for.
#[derive(Default)]
pub struct ListenerSet {
    next_id: u64,
    listeners: Vec<(ListenerHandle, Listener)>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `listener` to `element`, replacing any listener already there.
    pub fn attach(&mut self, element: Element, listener: Listener) -> ListenerHandle {
        let before = self.listeners.len();
        self.listeners.retain(|(h, _)| h.element != element);
        if self.listeners.len() != before {
            warn!("{element:?} already had a listener attached; replaced it");
        }
        self.next_id += 1;
        let handle = ListenerHandle {
            element,
            id: self.next_id,
        };
        self.listeners.push((handle, listener));
        handle
    }

    pub fn detach(&mut self, handle: ListenerHandle) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(h, _)| *h != handle);
        self.listeners.len() != before
    }

    pub fn detach_all(&mut self) -> usize {
        let n = self.listeners.len();
        self.listeners.clear();
        n
    }

    pub fn count(&self, element: Element) -> usize {
        self.listeners
            .iter()
            .filter(|(h, _)| h.element == element)
            .count()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Run every listener attached to the event's element.
    pub fn dispatch(&mut self, event: &UiEvent, view: &mut ViewState) -> Vec<ViewUpdate> {
        let element = event.element();
        self.listeners
            .iter_mut()
            .filter(|(h, _)| h.element == element)
            .filter_map(|(_, listener)| listener(event, view))
            .collect()
    }
}

/// Presentation settings shared by every listener of a session.
#[derive(Debug, Clone)]
pub struct ViewSettings {
    pub downsample: DownsamplePolicy,
    pub scatter: ScatterStyle,
    pub cluster_gene_columns: Vec<GeneColumn>,
}

impl ViewSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            downsample: cfg.downsample,
            scatter: cfg.scatter.clone(),
            cluster_gene_columns: cfg.cluster_gene_columns.clone(),
        }
    }
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct LoadTag {
    sample: SampleKey,
    generation: u64,
}

#[derive(Debug)]
pub enum SwitchOutcome {
    Loaded {
        scatter: ScatterProjection,
        /// Entries of the cluster dropdown.
        clusters: Vec<ClusterLabel>,
    },
    /// A later switch was requested while this one was loading.
    Superseded,
}

struct Session {
    generation: u64,
    requested: Option<LoadTag>,
    registry: DatasetRegistry,
    listeners: ListenerSet,
    view: ViewState,
}

/// Owns the session: the selected sample, its datasets, the attached
/// listeners and the view state.
pub struct DashApp<S> {
    source: S,
    settings: Arc<ViewSettings>,
    session: Mutex<Session>,
}

impl<S: DatasetSource> DashApp<S> {
    pub fn new(source: S, settings: ViewSettings, seed: MarkerAssignment) -> Self {
        Self {
            source,
            settings: Arc::new(settings),
            session: Mutex::new(Session {
                generation: 0,
                requested: None,
                registry: DatasetRegistry::new(),
                listeners: ListenerSet::new(),
                view: ViewState::new(seed),
            }),
        }
    }

    pub fn from_config(source: S, cfg: &Config) -> Self {
        Self::new(source, ViewSettings::from_config(cfg), cfg.seed_markers())
    }

    /// Select a sample and load it. Listeners of the previous sample are
    /// detached before the fetch starts; new ones are attached only if this
    /// is still the most recent request when the fetch completes.
    pub async fn switch_sample(&self, sample: SampleKey) -> Result<SwitchOutcome, LoadError> {
        let tag = {
            let mut s = self.session.lock();
            s.generation += 1;
            let tag = LoadTag {
                sample: sample.clone(),
                generation: s.generation,
            };
            s.requested = Some(tag.clone());
            s.registry.reset();
            let detached = s.listeners.detach_all();
            debug!("switch to sample {sample}: detached {detached} listeners");
            tag
        };

        let result = fetch_sample(&self.source, &sample).await;

        let mut s = self.session.lock();
        if s.requested.as_ref() != Some(&tag) {
            info!(
                "sample {sample} (request {}) superseded, discarding",
                tag.generation
            );
            return Ok(SwitchOutcome::Superseded);
        }
        let data = match result {
            Ok(data) => Arc::new(data),
            Err(e) => {
                error!("failed to load sample {sample}: {e}");
                return Err(e);
            }
        };

        s.registry.commit(data.clone());
        s.view.reset();
        bind_listeners(&mut s.listeners, &data, &self.settings);
        let scatter = scatter_for_sample(&data, None, self.settings.downsample, &self.settings.scatter);
        Ok(SwitchOutcome::Loaded {
            scatter,
            clusters: cluster_options(&data.ranked_genes),
        })
    }

    pub fn dispatch(&self, event: UiEvent) -> Vec<ViewUpdate> {
        let mut guard = self.session.lock();
        let Session {
            listeners, view, ..
        } = &mut *guard;
        let updates = listeners.dispatch(&event, view);
        if updates.is_empty() {
            debug!("{:?}: no update", event.element());
        }
        updates
    }

    pub fn current(&self) -> Option<Arc<SampleData>> {
        self.session.lock().registry.current().cloned()
    }

    pub fn selected_sample(&self) -> Option<SampleKey> {
        self.session.lock().requested.as_ref().map(|t| t.sample.clone())
    }

    pub fn listener_count(&self, element: Element) -> usize {
        self.session.lock().listeners.count(element)
    }

    pub fn view_mode(&self) -> ViewMode {
        self.session.lock().view.mode
    }

    pub fn overlay_gene(&self) -> Option<String> {
        self.session.lock().view.overlay_gene.clone()
    }

    pub fn marker_stage(&self) -> MarkerStage {
        self.session.lock().view.markers.stage()
    }

    pub fn marker_inputs(&self) -> MarkerInputs {
        self.session.lock().view.markers.inputs().clone()
    }

    /// Replace the text of one cell type's marker field.
    pub fn edit_marker(&self, cell_type: &str, text: &str) -> bool {
        self.session.lock().view.markers.edit(cell_type, text)
    }

    pub fn marker_panel(&self) -> Result<MarkerPanel, MarkerError> {
        let s = self.session.lock();
        let data = s.registry.current().ok_or(MarkerError::NoSample)?;
        Ok(s.view.markers.panel(&data.ranked_genes))
    }

    pub fn marker_next(&self) -> Result<MarkerPanel, MarkerError> {
        self.with_markers(|wf, data| wf.next(&data.ranked_genes))
    }

    pub fn marker_back(&self) -> Result<MarkerPanel, MarkerError> {
        self.with_markers(|wf, data| wf.back(&data.ranked_genes))
    }

    fn with_markers(
        &self,
        f: impl FnOnce(&mut MarkerWorkflow, &SampleData) -> Result<MarkerPanel, MarkerError>,
    ) -> Result<MarkerPanel, MarkerError> {
        let mut guard = self.session.lock();
        let Session { registry, view, .. } = &mut *guard;
        let data = registry.current().ok_or(MarkerError::NoSample)?;
        f(&mut view.markers, data)
    }
}

/// Attach one listener per element, each bound to `data`.
fn bind_listeners(listeners: &mut ListenerSet, data: &Arc<SampleData>, settings: &Arc<ViewSettings>) {
    let sample = data.sample.to_string();

    {
        let data = Arc::clone(data);
        let settings = Arc::clone(settings);
        let sample = sample.clone();
        let membership = compute_cluster_membership(&data.clusters);
        listeners.attach(
            Element::ClusterSelect,
            Box::new(move |event: &UiEvent, _view: &mut ViewState| {
                let UiEvent::SelectCluster(text) = event else {
                    return None;
                };
                let text = text.trim();
                if text.is_empty() {
                    return None;
                }
                let cluster = ClusterLabel::parse(text);
                let table = project_cluster_genes(
                    &cluster,
                    &data.ranked_genes,
                    &data.gene_info,
                    &settings.cluster_gene_columns,
                );
                Some(ViewUpdate::ClusterGenes {
                    sample: sample.clone(),
                    status: population_status(membership.count(&cluster)),
                    cluster,
                    table,
                })
            }),
        );
    }

    {
        let data = Arc::clone(data);
        let sample = sample.clone();
        listeners.attach(
            Element::CellIdInput,
            Box::new(move |event: &UiEvent, _view: &mut ViewState| {
                let UiEvent::CellIdEntered(text) = event else {
                    return None;
                };
                let text = text.trim();
                if text.is_empty() {
                    return None;
                }
                let addressing = data.addressing();
                let id = addressing
                    .to_dataset_id(text)
                    .unwrap_or_else(|| CellId::new(text));
                let table = project_cell_table(&id, &data.cell_genes, &data.clusters, addressing);
                Some(ViewUpdate::CellLookup {
                    sample: sample.clone(),
                    table,
                })
            }),
        );
    }

    {
        let data = Arc::clone(data);
        let settings = Arc::clone(settings);
        let sample = sample.clone();
        listeners.attach(
            Element::GeneInput,
            Box::new(move |event: &UiEvent, view: &mut ViewState| {
                let UiEvent::GeneEntered(text) = event else {
                    return None;
                };
                if text.trim().is_empty() {
                    return None;
                }
                let table = project_gene_table(text, &data.gene_cells, data.addressing());
                let scatter = match &table.overlay {
                    Some(overlay) => {
                        view.overlay_gene = Some(table.gene.clone());
                        Some(scatter_for_sample(&data, Some(overlay), settings.downsample, &settings.scatter))
                    }
                    None => view.overlay_gene.take().map(|gene| {
                        debug!("{} not found, clearing {gene} overlay", table.gene);
                        scatter_for_sample(&data, None, settings.downsample, &settings.scatter)
                    }),
                };
                Some(ViewUpdate::GeneHighlight {
                    sample: sample.clone(),
                    table,
                    scatter,
                })
            }),
        );
    }

    {
        let data = Arc::clone(data);
        let settings = Arc::clone(settings);
        listeners.attach(
            Element::ViewSwitch,
            Box::new(move |event: &UiEvent, view: &mut ViewState| {
                let UiEvent::SwitchView(mode) = event else {
                    return None;
                };
                view.mode = *mode;
                let scatter = if *mode != ViewMode::GeneHighlight {
                    view.overlay_gene.take().map(|gene| {
                        debug!("{mode:?} view, clearing {gene} overlay");
                        scatter_for_sample(&data, None, settings.downsample, &settings.scatter)
                    })
                } else {
                    None
                };
                let markers = (*mode == ViewMode::MarkerAnnotation)
                    .then(|| view.markers.panel(&data.ranked_genes));
                Some(ViewUpdate::ViewChanged {
                    mode: *mode,
                    scatter,
                    markers,
                })
            }),
        );
    }
}
