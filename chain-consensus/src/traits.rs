//! Round handler hooks

use chain_core::{PbftRequest, SeqId};

/// Per-node callbacks invoked by the engine as a round moves through its
/// phases. The engine holds its lock while calling them, so they must not
/// call back into the engine.
pub trait RoundHandler: Send + Sync {
    /// Leader stored and broadcast a proposal
    fn on_propose(&self, _seq_id: SeqId, _request: &PbftRequest) {}

    /// Validate a proposal before voting for it. `false` withholds the vote.
    fn on_pre_prepare(&self, _seq_id: SeqId, _request: &PbftRequest) -> bool {
        true
    }

    /// Prepare quorum reached
    fn on_prepare(&self, _seq_id: SeqId, _request: &PbftRequest) {}

    /// Commit quorum reached; the request is final
    fn on_commit(&self, _seq_id: SeqId, _request: &PbftRequest) {}

    /// Leader is serving a catch-up range
    fn on_old_request(&self, _from_seq: SeqId, _to_seq: SeqId) {}

    /// Request replayed from a catch-up answer
    fn on_catch_up(&self, _seq_id: SeqId, _request: &PbftRequest) {}
}

/// Accepts every proposal and ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRoundHandler;

impl RoundHandler for NoopRoundHandler {}
