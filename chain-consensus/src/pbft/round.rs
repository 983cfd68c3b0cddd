//! Per-sequence round state

use chain_core::{Hash, NodeId, PbftRequest};
use std::collections::{BTreeSet, HashMap};

/// Progress of one sequence id on this node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum RoundPhase {
    /// Votes or an adopted proposal may be cached, nothing accepted yet
    #[default]
    Pending,
    /// Proposal accepted (leader: proposed, replica: prepare sent)
    Proposed,
    /// Prepare quorum reached, commit sent
    Prepared,
    /// Commit quorum reached, sequence advanced
    Committed,
    /// Leader collected enough replies
    Replied,
}

/// Votes and proposal of a single sequence id
#[derive(Debug, Clone, Default)]
pub struct ConsensusRound {
    pub(crate) digest: Option<Hash>,
    pub(crate) request: Option<PbftRequest>,
    pub(crate) phase: RoundPhase,
    prepares: HashMap<Hash, BTreeSet<NodeId>>,
    commits: HashMap<Hash, BTreeSet<NodeId>>,
    replies: BTreeSet<NodeId>,
}

impl ConsensusRound {
    pub fn digest(&self) -> Option<Hash> {
        self.digest
    }

    pub fn request(&self) -> Option<&PbftRequest> {
        self.request.as_ref()
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub(crate) fn set_proposal(&mut self, request: PbftRequest, digest: Hash) {
        self.digest = Some(digest);
        self.request = Some(request);
    }

    /// Record a prepare, returning the votes now held for that digest
    pub(crate) fn add_prepare(&mut self, digest: Hash, node: NodeId) -> usize {
        let votes = self.prepares.entry(digest).or_default();
        votes.insert(node);
        votes.len()
    }

    /// Record a commit, returning the votes now held for that digest
    pub(crate) fn add_commit(&mut self, digest: Hash, node: NodeId) -> usize {
        let votes = self.commits.entry(digest).or_default();
        votes.insert(node);
        votes.len()
    }

    pub(crate) fn add_reply(&mut self, node: NodeId) -> usize {
        self.replies.insert(node);
        self.replies.len()
    }

    pub fn prepare_count(&self, digest: &Hash) -> usize {
        self.prepares.get(digest).map_or(0, BTreeSet::len)
    }

    pub fn commit_count(&self, digest: &Hash) -> usize {
        self.commits.get(digest).map_or(0, BTreeSet::len)
    }

    /// Digest that gathered at least `quorum` commits
    pub fn quorum_digest(&self, quorum: usize) -> Option<Hash> {
        self.commits
            .iter()
            .find(|(_, votes)| votes.len() >= quorum)
            .map(|(digest, _)| *digest)
    }

    pub fn reply_count(&self) -> usize {
        self.replies.len()
    }
}
