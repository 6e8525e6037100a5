use pretty_assertions::assert_eq;

use stviz_dash::app::{DashApp, Element, SwitchOutcome, UiEvent, ViewSettings, ViewUpdate};
use stviz_dash::config::Config;
use stviz_dash::data::{CellId, ClusterLabel, DatasetKind, SampleKey};
use stviz_dash::markers::MarkerAssignment;
use stviz_dash::mock;
use stviz_dash::registry::{FileSource, MemorySource};

const ELEMENTS: [Element; 4] = [
    Element::ClusterSelect,
    Element::CellIdInput,
    Element::GeneInput,
    Element::ViewSwitch,
];

fn source() -> MemorySource {
    let mut src = MemorySource::new();
    src.insert_docs(SampleKey::Numbered(1), &mock::generate(40, 3, 1).unwrap());
    src.insert_docs(SampleKey::Numbered(2), &mock::generate(60, 4, 2).unwrap());
    src
}

fn dash(src: MemorySource) -> DashApp<MemorySource> {
    DashApp::new(src, ViewSettings::default(), MarkerAssignment::seed())
}

#[tokio::test]
async fn cell_lookup_after_switch_reaches_only_new_sample() {
    let app = dash(source());
    app.switch_sample(SampleKey::Numbered(1)).await.unwrap();
    assert_eq!(app.dispatch(UiEvent::CellIdEntered("3".into())).len(), 1);

    app.switch_sample(SampleKey::Numbered(2)).await.unwrap();
    for el in ELEMENTS {
        assert_eq!(app.listener_count(el), 1, "{el:?}");
    }
    let updates = app.dispatch(UiEvent::CellIdEntered("3".into()));
    assert_eq!(updates.len(), 1);
    let ViewUpdate::CellLookup { sample, table } = &updates[0] else {
        panic!("expected a cell lookup, got {updates:?}");
    };
    assert_eq!(sample, "2");
    let data = app.current().unwrap();
    assert_eq!(table.cluster.as_ref(), data.cluster_of(&CellId::from(3)));
}

#[tokio::test]
async fn slow_stale_load_does_not_clobber_newer_one() {
    let mut src = source();
    src.set_latency(SampleKey::Numbered(1), 50);
    let app = dash(src);

    let (first, second) = tokio::join!(
        app.switch_sample(SampleKey::Numbered(1)),
        app.switch_sample(SampleKey::Numbered(2)),
    );
    assert!(matches!(first.unwrap(), SwitchOutcome::Superseded));
    assert!(matches!(second.unwrap(), SwitchOutcome::Loaded { .. }));

    assert_eq!(app.selected_sample(), Some(SampleKey::Numbered(2)));
    assert_eq!(app.current().unwrap().sample, SampleKey::Numbered(2));
    assert_eq!(app.current().unwrap().embedding.len(), 60);
    assert_eq!(app.listener_count(Element::GeneInput), 1);
}

#[tokio::test]
async fn stale_failure_is_discarded_too() {
    let mut src = source();
    src.remove(&SampleKey::Numbered(1), DatasetKind::GeneInfo);
    src.set_latency(SampleKey::Numbered(1), 20);
    let app = dash(src);

    let (first, second) = tokio::join!(
        app.switch_sample(SampleKey::Numbered(1)),
        app.switch_sample(SampleKey::Numbered(2)),
    );
    assert!(matches!(first.unwrap(), SwitchOutcome::Superseded));
    assert!(second.is_ok());
    assert_eq!(app.current().unwrap().sample, SampleKey::Numbered(2));
}

#[tokio::test]
async fn failed_load_leaves_nothing_attached() {
    let mut src = source();
    src.remove(&SampleKey::Numbered(2), DatasetKind::RankedGenes);
    let app = dash(src);
    app.switch_sample(SampleKey::Numbered(1)).await.unwrap();

    let err = app.switch_sample(SampleKey::Numbered(2)).await.unwrap_err();
    assert_eq!(err.kind(), DatasetKind::RankedGenes);
    assert!(app.current().is_none());
    for el in ELEMENTS {
        assert_eq!(app.listener_count(el), 0);
    }
    assert!(app.dispatch(UiEvent::GeneEntered("CD14".into())).is_empty());

    // re-selecting a good sample recovers
    app.switch_sample(SampleKey::Numbered(1)).await.unwrap();
    assert!(app.current().is_some());
}

#[tokio::test]
async fn combined_sample_from_disk_uses_compacted_ids() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = Config::default();
    cfg.data_dir = dir.path().to_path_buf();
    mock::generate(100, 5, 9)
        .unwrap()
        .write_to(&cfg.data_dir, &cfg.layout, &SampleKey::Combined)
        .unwrap();

    let app = DashApp::from_config(FileSource::new(&cfg.data_dir, cfg.layout.clone()), &cfg);
    app.switch_sample(SampleKey::Combined).await.unwrap();

    let updates = app.dispatch(UiEvent::CellIdEntered(" 2 ".into()));
    let [ViewUpdate::CellLookup { table, .. }] = updates.as_slice() else {
        panic!("expected one cell lookup, got {updates:?}");
    };
    assert_eq!(table.cell_id, CellId::from(20));
    assert_eq!(table.display_id, "2");
    assert!(table.cluster.is_some());

    let updates = app.dispatch(UiEvent::SelectCluster("0".into()));
    let [ViewUpdate::ClusterGenes { cluster, table, .. }] = updates.as_slice() else {
        panic!("expected one cluster table, got {updates:?}");
    };
    assert_eq!(*cluster, ClusterLabel::from(0));
    assert_eq!(table.rows.len(), 8);
}
