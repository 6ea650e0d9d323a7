//! The shipped tree file loads and drives a full engine.

use progression_engine::{Engagement, Engine, EngineConfig, ManualClock, MemoryStore};
use progression_tree::load_tree_file;
use std::path::PathBuf;
use std::sync::Arc;

fn sample_tree() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/progression_tree.json")
}

#[test]
fn sample_tree_is_valid() {
    let catalog = load_tree_file(sample_tree()).unwrap();
    assert_eq!(catalog.auto_unlock_nodes().count(), 1);
    assert_eq!(catalog.gating_nodes("feature_compost").len(), 1);
    assert_eq!(catalog.get_by_key("lucky_charm").unwrap().costs.len(), 5);
}

#[tokio::test]
async fn sample_tree_boots_into_a_vote() {
    let catalog = Arc::new(load_tree_file(sample_tree()).unwrap());
    let engine = Engine::open(
        catalog,
        Arc::new(MemoryStore::new()),
        Arc::new(ManualClock::new(0)),
        EngineConfig::default(),
    )
    .await
    .unwrap();

    assert!(engine.is_feature_unlocked("feature_progression").await.unwrap());
    assert!(!engine.is_feature_unlocked("feature_duel").await.unwrap());

    // economy and forge_1 are the only eligible nodes after auto-unlock.
    let session = engine.active_session().await.unwrap();
    let keys: Vec<_> = session.options.iter().map(|o| o.node_key.as_str()).collect();
    assert_eq!(keys, vec!["economy", "forge_1"]);

    engine.cast_vote(session.id, "u1", 1).await.unwrap();
    let resolution = engine.close_session(session.id).await.unwrap();
    let target = resolution.target.unwrap();
    assert_eq!(target.node_key, "forge_1");

    engine
        .record_engagement(Engagement::new("u1", "item_crafted", target.cost))
        .await
        .unwrap();
    assert!(engine.is_feature_unlocked("feature_forge").await.unwrap());
}
