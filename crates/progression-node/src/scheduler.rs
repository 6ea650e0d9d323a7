//! Background session closing.

use progression_engine::Engine;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Close expired voting sessions every `every`.
///
/// Also makes sure a target or vote exists, so a tree that gained eligible
/// nodes (after a relock, say) does not sit idle.
pub fn spawn_session_closer(engine: Arc<Engine>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            tick(&engine).await;
        }
    })
}

async fn tick(engine: &Engine) {
    match engine.close_expired_session().await {
        Ok(Some(resolution)) => tracing::info!(
            session_id = %resolution.session.id,
            winner = ?resolution.target.as_ref().map(|t| t.node_key.as_str()),
            "Voting session expired"
        ),
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "Failed to close expired session"),
    }
    if let Err(e) = engine.ensure_progress().await {
        tracing::warn!(error = %e, "Failed to ensure active progress");
    }
}
