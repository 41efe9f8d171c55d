use std::collections::{BTreeSet, HashSet};

use oxigraph::model::{NamedNode, Term};
use quadstore::storage::util::{CONFIG_FILE, QUADS_DIR, STATS_FILE, TRIPLES_DIR};
use quadstore::{BulkLoader, Dataset, LoadTarget, LoaderOptions, StoreConfig, StoreError, Triple};

fn iri(value: &str) -> Term {
    NamedNode::new_unchecked(format!("http://example.org/{value}")).into()
}

fn triple(s: &str, p: &str, o: &str) -> Triple {
    Triple::new(iri(s), iri(p), iri(o))
}

fn snapshot(dataset: &Dataset) -> BTreeSet<String> {
    dataset
        .find_quads(None, None, None, None)
        .unwrap()
        .map(|quad| quad.unwrap().to_string())
        .collect()
}

#[test]
fn test_reopen_keeps_every_graph() {
    let dir = tempfile::tempdir().unwrap();
    let before = {
        let dataset = Dataset::open(StoreConfig::at(dir.path())).unwrap();
        for i in 0..25 {
            dataset
                .default_graph()
                .add(&triple(&format!("s{i}"), "p", "o"))
                .unwrap();
            dataset
                .graph(&iri(&format!("g{}", i % 3)))
                .add(&triple("s", "q", &format!("o{i}")))
                .unwrap();
        }
        assert!(dataset.is_dirty());
        dataset.close().unwrap();
        let reopened = Dataset::open(StoreConfig::at(dir.path())).unwrap();
        let before = snapshot(&reopened);
        reopened.close().unwrap();
        before
    };
    assert_eq!(before.len(), 50);

    for file in [CONFIG_FILE, "nodes.dat", "node2id.idn"] {
        assert!(dir.path().join(file).exists(), "{file} missing");
    }
    for name in ["SPO", "POS", "OSP"] {
        assert!(dir
            .path()
            .join(TRIPLES_DIR)
            .join(format!("{name}.idx"))
            .exists());
    }
    for name in ["GSPO", "GPOS", "GOSP", "SPOG", "POSG", "OSPG"] {
        assert!(dir
            .path()
            .join(QUADS_DIR)
            .join(format!("{name}.idx"))
            .exists());
    }

    let dataset = Dataset::open(StoreConfig::at(dir.path())).unwrap();
    assert!(!dataset.is_dirty());
    dataset.verify().unwrap();
    assert_eq!(snapshot(&dataset), before);
    assert_eq!(dataset.graph(&iri("g1")).len().unwrap(), 8);
}

#[test]
fn test_updates_after_reopen_are_persisted() {
    let dir = tempfile::tempdir().unwrap();
    {
        let dataset = Dataset::open(StoreConfig::at(dir.path())).unwrap();
        dataset.default_graph().add(&triple("a", "p", "b")).unwrap();
        dataset.default_graph().add(&triple("a", "p", "c")).unwrap();
        dataset.close().unwrap();
    }
    {
        let dataset = Dataset::open(StoreConfig::at(dir.path())).unwrap();
        assert!(dataset
            .default_graph()
            .delete(&triple("a", "p", "b"))
            .unwrap());
        assert!(dataset.default_graph().add(&triple("a", "p", "d")).unwrap());
        dataset.sync(false).unwrap();
        assert!(!dataset.is_dirty());
        dataset.close().unwrap();
    }

    let dataset = Dataset::open(StoreConfig::at(dir.path())).unwrap();
    let objects: HashSet<Term> = dataset
        .default_graph()
        .find(None, None, None)
        .unwrap()
        .map(|t| t.unwrap().object)
        .collect();
    assert_eq!(objects, [iri("c"), iri("d")].into_iter().collect());
    dataset.verify().unwrap();
}

#[test]
fn test_stored_index_layout_wins() {
    let dir = tempfile::tempdir().unwrap();
    let custom = StoreConfig {
        triple_indexes: vec!["POS".to_string(), "SPO".to_string()],
        ..StoreConfig::at(dir.path())
    };
    {
        let dataset = Dataset::open(custom).unwrap();
        dataset.default_graph().add(&triple("a", "p", "b")).unwrap();
        dataset.close().unwrap();
    }

    let dataset = Dataset::open(StoreConfig::at(dir.path())).unwrap();
    assert_eq!(
        dataset.config().triple_indexes,
        vec!["POS".to_string(), "SPO".to_string()]
    );
    assert!(!dir.path().join(TRIPLES_DIR).join("OSP.idx").exists());
    assert!(dataset
        .default_graph()
        .contains(&triple("a", "p", "b"))
        .unwrap());
    dataset.verify().unwrap();
}

#[test]
fn test_missing_secondary_index_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    {
        let dataset = Dataset::open(StoreConfig::at(dir.path())).unwrap();
        dataset.default_graph().add(&triple("a", "p", "b")).unwrap();
        dataset.close().unwrap();
    }
    std::fs::remove_file(dir.path().join(TRIPLES_DIR).join("OSP.idx")).unwrap();

    let dataset = Dataset::open(StoreConfig::at(dir.path())).unwrap();
    assert!(matches!(dataset.verify(), Err(StoreError::Inconsistent(_))));
    // The primary still answers
    assert_eq!(
        dataset
            .default_graph()
            .find(None, None, Some(&iri("b")))
            .unwrap()
            .count(),
        1
    );
}

#[test]
fn test_statistics_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let dataset = Dataset::open(StoreConfig::at(dir.path())).unwrap();
        let mut loader = BulkLoader::new(
            dataset.clone(),
            LoaderOptions {
                tick: 0,
                ..LoaderOptions::default()
            },
        );
        let triples = vec![
            Ok(triple("a", "p", "b")),
            Ok(triple("a", "p", "c")),
            Ok(triple("d", "q", "a")),
        ];
        loader
            .load_triples(LoadTarget::DefaultGraph, triples)
            .unwrap();
        dataset.close().unwrap();
    }
    let text = std::fs::read_to_string(dir.path().join(STATS_FILE)).unwrap();
    assert!(text.starts_with("(stats"));
    assert!(text.contains("(count 3))"));
    assert!(text.contains("(<http://example.org/p> 2)"));

    let dataset = Dataset::open(StoreConfig::at(dir.path())).unwrap();
    let stats = dataset.statistics().expect("statistics reloaded");
    assert_eq!(stats.total(), 3);
    assert_eq!(stats.count(&iri("q")), 1);
    assert_eq!(dataset.reorder_transformation().name(), "weighted");
}

#[test]
fn test_malformed_statistics_are_skipped_at_open() {
    let dir = tempfile::tempdir().unwrap();
    Dataset::open(StoreConfig::at(dir.path()))
        .unwrap()
        .close()
        .unwrap();
    std::fs::write(
        dir.path().join(STATS_FILE),
        "(stats\n  (<http://example.org/p> two)\n)\n",
    )
    .unwrap();

    let dataset = Dataset::open(StoreConfig::at(dir.path())).unwrap();
    assert!(dataset.statistics().is_none());
    assert_eq!(dataset.reorder_transformation().name(), "identity");
    assert!(matches!(
        quadstore::Statistics::load(&dir.path().join(STATS_FILE)),
        Err(StoreError::Config(_))
    ));
}

#[test]
fn test_failed_sync_keeps_store_dirty_and_usable() {
    let dir = tempfile::tempdir().unwrap();
    let triples_dir = dir.path().join(TRIPLES_DIR);
    let dataset = Dataset::open(StoreConfig::at(dir.path())).unwrap();
    dataset.default_graph().add(&triple("a", "p", "b")).unwrap();

    // A plain file where the triple index directory should be
    std::fs::remove_dir_all(&triples_dir).unwrap();
    std::fs::write(&triples_dir, b"not a directory").unwrap();

    assert!(matches!(dataset.sync(true), Err(StoreError::Io(_))));
    assert!(dataset.is_dirty());
    assert!(dataset.default_graph().add(&triple("a", "p", "c")).unwrap());
    assert_eq!(
        dataset
            .default_graph()
            .find(Some(&iri("a")), None, None)
            .unwrap()
            .count(),
        2
    );

    std::fs::remove_file(&triples_dir).unwrap();
    std::fs::create_dir(&triples_dir).unwrap();
    dataset.sync(false).unwrap();
    assert!(!dataset.is_dirty());
    dataset.close().unwrap();

    let reopened = Dataset::open(StoreConfig::at(dir.path())).unwrap();
    reopened.verify().unwrap();
    assert_eq!(reopened.default_graph().len().unwrap(), 2);
    assert!(reopened
        .default_graph()
        .contains(&triple("a", "p", "c"))
        .unwrap());
}
