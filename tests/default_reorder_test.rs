//! Kept in its own test binary: the default reorder is process-wide.

use quadstore::reorder::{default_reorder, set_default_reorder, ReorderKind};
use quadstore::{Dataset, StoreConfig};

#[test]
fn test_process_default_applies_without_configuration() {
    assert_eq!(default_reorder(), None);
    assert_eq!(
        Dataset::in_memory()
            .unwrap()
            .reorder_transformation()
            .name(),
        "identity"
    );

    set_default_reorder(Some(ReorderKind::Fixed));
    assert_eq!(
        Dataset::in_memory()
            .unwrap()
            .reorder_transformation()
            .name(),
        "fixed"
    );

    // An explicit strategy still wins over the process default
    let configured = Dataset::open(StoreConfig::default().with_reorder("none")).unwrap();
    assert_eq!(configured.reorder_transformation().name(), "identity");

    set_default_reorder(None);
    assert_eq!(
        Dataset::in_memory()
            .unwrap()
            .reorder_transformation()
            .name(),
        "identity"
    );
}
