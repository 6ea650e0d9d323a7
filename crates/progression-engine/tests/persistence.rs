//! Restart and storage-failure behaviour.

use std::sync::Arc;

use progression_engine::{
    Engagement, Engine, EngineConfig, ManualClock, MemoryStore, RetargetPolicy, Store,
    UnlockSource,
};
use progression_tree::{load_tree_str, Catalog};
use proptest::prelude::*;

const TREE: &str = r#"{ "nodes": [
    { "key": "node_a", "name": "A", "costs": [100] },
    { "key": "node_b", "name": "B", "costs": [100] }
] }"#;

fn catalog(tree: &str) -> Arc<Catalog> {
    Arc::new(load_tree_str(tree).unwrap())
}

async fn open(catalog: Arc<Catalog>, store: Arc<MemoryStore>, config: EngineConfig) -> Engine {
    Engine::open(catalog, store, Arc::new(ManualClock::new(1_000)), config)
        .await
        .unwrap()
}

#[tokio::test]
async fn state_survives_restart() {
    let catalog = catalog(TREE);
    let store = Arc::new(MemoryStore::new());

    let first = open(catalog.clone(), store.clone(), EngineConfig::default()).await;
    let session = first.active_session().await.unwrap();
    first.cast_vote(session.id, "u1", 1).await.unwrap();
    first
        .record_engagement(Engagement::new("u1", "message", 30).with_event_id("evt-1"))
        .await
        .unwrap();
    drop(first);

    let second = open(catalog, store, EngineConfig::default()).await;
    let restored = second.active_session().await.unwrap();
    assert_eq!(restored.id, session.id);
    assert_eq!(restored.total_votes, 1);
    assert_eq!(second.engagement_score().await, 30);

    // Dedupe memory is rebuilt from the metric log.
    let again = second
        .record_engagement(Engagement::new("u1", "message", 30).with_event_id("evt-1"))
        .await
        .unwrap();
    assert!(again.duplicate);

    // The restored session still rejects the earlier voter.
    assert!(second.cast_vote(session.id, "u1", 0).await.is_err());
    let resolution = second.close_session(session.id).await.unwrap();
    assert_eq!(resolution.target.unwrap().node_key, "node_b");
}

#[tokio::test]
async fn auto_unlock_runs_only_on_first_boot() {
    let tree = r#"{ "nodes": [
        { "key": "chat", "name": "Chat", "costs": [10], "auto_unlock": true },
        { "key": "bank", "name": "Bank", "costs": [10] }
    ] }"#;
    let catalog = catalog(tree);
    let store = Arc::new(MemoryStore::new());

    let first = open(catalog.clone(), store.clone(), EngineConfig::default()).await;
    first.admin_relock("chat", 1).await.unwrap();
    drop(first);

    let second = open(catalog, store, EngineConfig::default()).await;
    assert!(!second.is_node_unlocked("chat", 1).await.unwrap());
}

#[tokio::test]
async fn unavailable_store_rejects_without_side_effects() {
    let catalog = catalog(TREE);
    let store = Arc::new(MemoryStore::new());
    let engine = open(catalog, store.clone(), EngineConfig::default()).await;
    let session = engine.active_session().await.unwrap();

    store.set_unavailable(true);
    assert!(engine.cast_vote(session.id, "u1", 0).await.is_err());
    assert!(engine
        .record_engagement(Engagement::new("u1", "message", 5))
        .await
        .is_err());
    store.set_unavailable(false);

    assert_eq!(engine.active_session().await.unwrap().total_votes, 0);
    assert_eq!(engine.engagement_score().await, 0);
    // Retrying the same vote now succeeds.
    engine.cast_vote(session.id, "u1", 0).await.unwrap();
    assert_eq!(store.load().unwrap().metrics.len(), 0);
}

/// Count thresholds crossed by feeding `weights` into counters of cost `cost`.
fn expected_commits(weights: &[u64], cost: u64) -> (usize, u64) {
    let mut acc = 0;
    let mut commits = 0;
    for w in weights {
        acc += w;
        if acc >= cost {
            commits += 1;
            acc = 0;
        }
    }
    (commits, acc)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn commits_match_thresholds_crossed(weights in prop::collection::vec(1u64..50, 1..60)) {
        let tree = r#"{ "nodes": [
            { "key": "grind", "name": "Grind", "max_level": 40, "costs": [
                100,100,100,100,100,100,100,100,100,100,
                100,100,100,100,100,100,100,100,100,100,
                100,100,100,100,100,100,100,100,100,100,
                100,100,100,100,100,100,100,100,100,100 ] }
        ] }"#;
        let config = EngineConfig::default().with_retarget_policy(RetargetPolicy::SameNodeUntilMax);
        let (commits, remainder) = expected_commits(&weights, 100);

        let (history, score) = tokio_test::block_on(async {
            let engine = open(catalog(tree), Arc::new(MemoryStore::new()), config).await;
            for w in &weights {
                engine
                    .record_engagement(Engagement::new("u", "message", *w))
                    .await
                    .unwrap();
            }
            (engine.unlock_history().await, engine.engagement_score().await)
        });

        let contributed = history
            .iter()
            .filter(|r| r.source == UnlockSource::Contribution)
            .count();
        prop_assert_eq!(contributed, commits);
        prop_assert_eq!(score, remainder);
        prop_assert!(history.iter().all(|r| r.contributions >= 100));
    }
}
