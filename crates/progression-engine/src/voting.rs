//! Voting rules.
//!
//! Session lifecycle: `Open` until closed by time or an operator, then
//! `Closed` with a winner (or none when every option became ineligible).
//! Winners are the highest vote count; ties and zero-vote sessions fall to
//! the option with the lowest node id.

use progression_tree::NodeId;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::model::{SessionId, SessionStatus, Target, VotingOption, VotingSession};

/// A counted vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoteReceipt {
    pub session_id: SessionId,
    pub voter: String,
    pub option_index: usize,
    pub node_key: String,
    /// Votes on that option after this one.
    pub votes: u64,
}

/// Outcome of closing a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionResolution {
    pub session: SessionView,
    /// Target set from the winner, `None` when no option was still eligible.
    pub target: Option<Target>,
}

/// Public view of a session (voter identities are not exposed).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub id: SessionId,
    pub status: SessionStatus,
    pub options: Vec<VotingOption>,
    pub opened_at: u64,
    pub closes_at: u64,
    pub closed_at: Option<u64>,
    pub total_votes: u64,
    pub voter_count: usize,
    pub winner: Option<usize>,
}

impl From<&VotingSession> for SessionView {
    fn from(session: &VotingSession) -> Self {
        Self {
            id: session.id,
            status: session.status,
            options: session.options.clone(),
            opened_at: session.opened_at,
            closes_at: session.closes_at,
            closed_at: session.closed_at,
            total_votes: session.total_votes(),
            voter_count: session.voters.len(),
            winner: session.winner,
        }
    }
}

/// Index of the winning option among those `eligible` accepts.
///
/// Options are expected in catalog order, but the tie-break compares node
/// ids directly so the result does not depend on it.
pub fn resolve_winner(
    options: &[VotingOption],
    mut eligible: impl FnMut(&VotingOption) -> bool,
) -> Option<usize> {
    let mut best: Option<(usize, &VotingOption)> = None;
    for (index, option) in options.iter().enumerate() {
        if !eligible(option) {
            continue;
        }
        let better = match best {
            None => true,
            Some((_, current)) => {
                option.votes > current.votes
                    || (option.votes == current.votes && option.node_id < current.node_id)
            }
        };
        if better {
            best = Some((index, option));
        }
    }
    best.map(|(index, _)| index)
}

/// Pick at most `max` candidates at random, returned in catalog order.
pub fn sample_candidates<R: Rng + ?Sized>(
    mut eligible: Vec<NodeId>,
    max: usize,
    rng: &mut R,
) -> Vec<NodeId> {
    if eligible.len() > max {
        eligible.shuffle(rng);
        eligible.truncate(max);
    }
    eligible.sort_unstable();
    eligible
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn option(id: u32, votes: u64) -> VotingOption {
        VotingOption {
            node_id: NodeId(id),
            node_key: format!("node_{id}"),
            node_name: format!("Node {id}"),
            target_level: 1,
            votes,
            estimated_unlock_at: None,
        }
    }

    #[test]
    fn tie_goes_to_lowest_node_id() {
        let options = vec![option(1, 5), option(2, 5), option(3, 3)];
        assert_eq!(resolve_winner(&options, |_| true), Some(0));

        let reversed = vec![option(2, 5), option(1, 5), option(3, 3)];
        assert_eq!(resolve_winner(&reversed, |_| true), Some(1));
    }

    #[test]
    fn highest_count_wins() {
        let options = vec![option(1, 1), option(2, 4), option(3, 3)];
        assert_eq!(resolve_winner(&options, |_| true), Some(1));
    }

    #[test]
    fn zero_votes_selects_first_in_catalog_order() {
        let options = vec![option(4, 0), option(7, 0)];
        assert_eq!(resolve_winner(&options, |_| true), Some(0));
    }

    #[test]
    fn ineligible_options_are_skipped() {
        let options = vec![option(1, 9), option(2, 1)];
        assert_eq!(
            resolve_winner(&options, |o| o.node_id != NodeId(1)),
            Some(1)
        );
        assert_eq!(resolve_winner(&options, |_| false), None);
    }

    #[test]
    fn sampling_bounds_and_sorts() {
        let mut rng = StdRng::seed_from_u64(7);
        let eligible: Vec<_> = (1..=10).map(NodeId).collect();
        let picked = sample_candidates(eligible, 4, &mut rng);
        assert_eq!(picked.len(), 4);
        assert!(picked.windows(2).all(|w| w[0] < w[1]));

        let few = sample_candidates(vec![NodeId(3), NodeId(1)], 4, &mut rng);
        assert_eq!(few, vec![NodeId(1), NodeId(3)]);
    }
}
