use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use serde::Serialize;

use stviz_dash::app::{DashApp, SwitchOutcome, UiEvent, ViewMode, ViewUpdate};
use stviz_dash::config::Config;
use stviz_dash::data::{split_legacy_points, CellAddressing, LegacyPoint, SampleKey};
use stviz_dash::index::{compute_downsampled_selection, DownsamplePolicy};
use stviz_dash::mock;
use stviz_dash::project::{project_scatter, scatter_for_sample};
use stviz_dash::registry::FileSource;

#[derive(Parser)]
#[command(
    name = "stviz-dash",
    about = "Query single-cell UMAP samples the way the dashboard shows them",
    version
)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Overrides the configured data directory
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the default scatter of a sample, optionally with a gene overlay
    Scatter {
        /// Sample number, "All" or "Combined"
        #[arg(short, long, default_value = "1")]
        sample: SampleKey,

        /// Gene whose expression is overlaid
        #[arg(short, long)]
        gene: Option<String>,

        /// Read a single-file array of {UMAP1, UMAP2, Cluster} records instead
        #[arg(long, conflicts_with = "gene")]
        points: Option<PathBuf>,
    },

    /// Print the ranked gene table of one cluster
    Cluster {
        #[arg(short, long, default_value = "1")]
        sample: SampleKey,

        cluster: String,
    },

    /// Print the expression and cluster of one cell
    Cell {
        #[arg(short, long, default_value = "1")]
        sample: SampleKey,

        id: String,
    },

    /// Print the cells expressing a gene, highest first
    Gene {
        #[arg(short, long, default_value = "1")]
        sample: SampleKey,

        name: String,
    },

    /// Annotate clusters from marker genes
    Markers {
        #[arg(short, long, default_value = "1")]
        sample: SampleKey,

        /// Which table to print
        #[arg(short, long, value_enum, default_value_t = MarkerView::CellTypes)]
        view: MarkerView,

        /// Replace a cell type's markers, e.g. "B cells=MS4A1,CD79A"
        #[arg(long = "set", value_name = "TYPE=GENES")]
        overrides: Vec<String>,
    },

    /// Write a synthetic sample under the data directory
    Mock {
        #[arg(short, long, default_value = "1")]
        sample: SampleKey,

        #[arg(long, default_value = "2000")]
        cells: usize,

        #[arg(long, default_value = "8")]
        clusters: usize,

        #[arg(long, default_value = "0")]
        seed: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum MarkerView {
    Inputs,
    CellTypes,
    Clusters,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open(cfg: &Config, sample: SampleKey) -> Result<DashApp<FileSource>> {
    let source = FileSource::new(&cfg.data_dir, cfg.layout.clone());
    let app = DashApp::from_config(source, cfg);
    match app
        .switch_sample(sample.clone())
        .await
        .with_context(|| format!("load sample {sample} from {}", cfg.data_dir.display()))?
    {
        SwitchOutcome::Loaded { .. } => Ok(app),
        SwitchOutcome::Superseded => bail!("load of sample {sample} was superseded"),
    }
}

fn single(updates: Vec<ViewUpdate>) -> Result<ViewUpdate> {
    let mut it = updates.into_iter();
    match (it.next(), it.next()) {
        (Some(update), None) => Ok(update),
        (None, _) => bail!("input produced no update"),
        (Some(_), Some(_)) => bail!("input reached more than one listener"),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(dir) = cli.data_dir {
        cfg.data_dir = dir;
    }

    match cli.command {
        Commands::Scatter {
            points: Some(path), ..
        } => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("read points: {}", path.display()))?;
            let points: Vec<LegacyPoint> = serde_json::from_str(&text)
                .with_context(|| format!("parse points: {}", path.display()))?;
            let (embedding, clusters) = split_legacy_points(points);
            let selection = compute_downsampled_selection(
                embedding.keys(),
                &clusters,
                &HashSet::new(),
                DownsamplePolicy::legacy(),
            );
            print_json(&project_scatter(
                selection.iter(),
                &embedding,
                &clusters,
                None,
                CellAddressing::Direct,
                &cfg.scatter,
            ))?;
        }
        Commands::Scatter { sample, gene, .. } => {
            let app = open(&cfg, sample).await?;
            match gene {
                Some(gene) => {
                    app.dispatch(UiEvent::SwitchView(ViewMode::GeneHighlight));
                    match single(app.dispatch(UiEvent::GeneEntered(gene.clone())))? {
                        ViewUpdate::GeneHighlight {
                            table,
                            scatter: Some(scatter),
                            ..
                        } if table.overlay.is_some() => print_json(&scatter)?,
                        _ => bail!("gene {gene} not found"),
                    }
                }
                None => {
                    let data = app.current().context("no sample loaded")?;
                    let scatter = scatter_for_sample(
                        &data,
                        None,
                        cfg.downsample,
                        &cfg.scatter,
                    );
                    print_json(&scatter)?;
                }
            }
        }
        Commands::Cluster { sample, cluster } => {
            let app = open(&cfg, sample).await?;
            print_json(&single(app.dispatch(UiEvent::SelectCluster(cluster)))?)?;
        }
        Commands::Cell { sample, id } => {
            let app = open(&cfg, sample).await?;
            print_json(&single(app.dispatch(UiEvent::CellIdEntered(id)))?)?;
        }
        Commands::Gene { sample, name } => {
            let app = open(&cfg, sample).await?;
            print_json(&single(app.dispatch(UiEvent::GeneEntered(name)))?)?;
        }
        Commands::Markers {
            sample,
            view,
            overrides,
        } => {
            let app = open(&cfg, sample).await?;
            for o in &overrides {
                let (cell_type, genes) = o
                    .split_once('=')
                    .with_context(|| format!("expected TYPE=GENES, got '{o}'"))?;
                if !app.edit_marker(cell_type.trim(), genes) {
                    bail!("unknown cell type '{}'", cell_type.trim());
                }
            }
            let panel = match view {
                MarkerView::Inputs => app.marker_panel()?,
                MarkerView::CellTypes => app.marker_next()?,
                MarkerView::Clusters => {
                    app.marker_next()?;
                    app.marker_next()?
                }
            };
            print_json(&panel)?;
        }
        Commands::Mock {
            sample,
            cells,
            clusters,
            seed,
        } => {
            let docs = mock::generate(cells, clusters, seed)?;
            docs.write_to(&cfg.data_dir, &cfg.layout, &sample)?;
            info!("wrote sample {sample} under {}", cfg.data_dir.display());
        }
    }
    Ok(())
}
