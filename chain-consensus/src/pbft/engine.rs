//! PBFT engine implementation
//!
//! The engine is a synchronous state machine. Every entry point takes the
//! current state plus one input and returns the messages to send; the
//! caller owns locking and transport. Sequence ids track block heights.

use crate::pbft::{ConsensusRound, Outbound, PbftConfig, RoundPhase};
use crate::traits::RoundHandler;
use crate::{ConsensusError, ConsensusResult};
use chain_core::{
    NodeId, PbftMessage, PbftRequest, PrePrepare, Reply, RequestOldMessage, SendOldMessage,
    SeqId, ShardId, Vote,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// PBFT consensus engine of one committee member
pub struct PbftEngine {
    shard_id: ShardId,
    node_id: NodeId,
    config: PbftConfig,
    /// Next sequence id this node expects to finalize
    seq_id: SeqId,
    rounds: BTreeMap<SeqId, ConsensusRound>,
    /// Leader only: proposal waiting for its replies
    in_flight: Option<SeqId>,
    /// Furthest target of an outstanding catch-up request
    catch_up: Option<SeqId>,
    /// Highest commit seen from each member beyond the lookahead window
    far_commits: BTreeMap<NodeId, SeqId>,
    /// Leader only: rounds that reached Replied since the last drain
    replied: Vec<SeqId>,
    handler: Arc<dyn RoundHandler>,
}

impl std::fmt::Debug for PbftEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PbftEngine")
            .field("shard_id", &self.shard_id)
            .field("node_id", &self.node_id)
            .field("seq_id", &self.seq_id)
            .field("in_flight", &self.in_flight)
            .field("catch_up", &self.catch_up)
            .field("rounds", &self.rounds.len())
            .finish()
    }
}

impl PbftEngine {
    /// Create a new engine, starting at sequence 1
    pub fn new(
        shard_id: ShardId,
        node_id: NodeId,
        config: PbftConfig,
        handler: Arc<dyn RoundHandler>,
    ) -> ConsensusResult<Self> {
        config.validate()?;
        if node_id as usize >= config.node_count {
            return Err(ConsensusError::Config(format!(
                "Node {} is outside a committee of {} nodes",
                node_id, config.node_count
            )));
        }

        Ok(Self {
            shard_id,
            node_id,
            config,
            seq_id: 1,
            rounds: BTreeMap::new(),
            in_flight: None,
            catch_up: None,
            far_commits: BTreeMap::new(),
            replied: Vec::new(),
            handler,
        })
    }

    pub fn shard_id(&self) -> ShardId {
        self.shard_id
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn config(&self) -> &PbftConfig {
        &self.config
    }

    pub fn sequence_id(&self) -> SeqId {
        self.seq_id
    }

    pub fn leader(&self) -> NodeId {
        self.config.leader()
    }

    pub fn is_leader(&self) -> bool {
        self.node_id == self.leader()
    }

    pub fn in_flight(&self) -> Option<SeqId> {
        self.in_flight
    }

    pub fn round(&self, seq_id: SeqId) -> Option<&ConsensusRound> {
        self.rounds.get(&seq_id)
    }

    pub fn phase(&self, seq_id: SeqId) -> Option<RoundPhase> {
        self.rounds.get(&seq_id).map(ConsensusRound::phase)
    }

    /// Move the local sequence, e.g. to the next height after a restart
    pub fn set_sequence_id(&mut self, seq_id: SeqId) {
        if seq_id != self.seq_id {
            debug!("S{}N{} sequence {} -> {}", self.shard_id, self.node_id, self.seq_id, seq_id);
        }
        self.seq_id = seq_id;
    }

    /// Drop every cached round, vote and pending request
    pub fn reset(&mut self) {
        info!(
            "S{}N{} consensus reset at seq {} ({} rounds dropped)",
            self.shard_id,
            self.node_id,
            self.seq_id,
            self.rounds.len()
        );
        self.rounds.clear();
        self.in_flight = None;
        self.catch_up = None;
        self.far_commits.clear();
        self.replied.clear();
    }

    /// Rounds that reached Replied since the last call
    pub fn take_replied(&mut self) -> Vec<SeqId> {
        std::mem::take(&mut self.replied)
    }

    /// Start a round for the current sequence. Leader only, one at a time.
    pub fn propose(&mut self, request: PbftRequest) -> ConsensusResult<Vec<Outbound>> {
        if !self.is_leader() {
            return Err(ConsensusError::NotLeader {
                node_id: self.node_id,
                leader: self.leader(),
            });
        }
        if let Some(seq_id) = self.in_flight {
            return Err(ConsensusError::RoundInFlight { seq_id });
        }

        let seq_id = self.seq_id;
        let digest = request.digest();
        let round = self.rounds.entry(seq_id).or_default();
        if round.phase >= RoundPhase::Committed {
            return Err(ConsensusError::ConflictingProposal { seq_id });
        }

        // Anything cached for an abandoned proposal at this sequence is stale
        *round = ConsensusRound::default();
        round.set_proposal(request.clone(), digest);
        round.phase = RoundPhase::Proposed;
        self.in_flight = Some(seq_id);
        self.handler.on_propose(seq_id, &request);

        info!(
            "S{}N{} proposing seq {} digest {}",
            self.shard_id,
            self.node_id,
            seq_id,
            digest.short()
        );
        Ok(vec![Outbound::broadcast(PbftMessage::PrePrepare(
            PrePrepare {
                request,
                digest,
                seq_id,
            },
        ))])
    }

    /// Process one message from committee member `from`
    pub fn handle_message(
        &mut self,
        from: NodeId,
        message: PbftMessage,
    ) -> ConsensusResult<Vec<Outbound>> {
        let result = match message {
            PbftMessage::PrePrepare(msg) => self.on_pre_prepare(from, msg),
            PbftMessage::Prepare(vote) => {
                Self::check_sender(vote.sender, from)?;
                self.on_prepare(vote)
            }
            PbftMessage::Commit(vote) => {
                Self::check_sender(vote.sender, from)?;
                self.on_commit(vote)
            }
            PbftMessage::Reply(reply) => {
                Self::check_sender(reply.sender, from)?;
                self.on_reply(reply)
            }
            PbftMessage::RequestOldMessage(msg) => {
                Self::check_sender(msg.asker, from)?;
                self.on_request_old(msg)
            }
            PbftMessage::SendOldMessage(msg) => self.on_send_old(from, msg),
        };
        self.prune();
        result
    }

    /// Forget rounds below the retention horizon and far commits the
    /// window has caught up with
    fn prune(&mut self) {
        let horizon = self.seq_id.saturating_sub(self.config.retained_rounds);
        if self.rounds.first_key_value().is_some_and(|(seq_id, _)| *seq_id < horizon) {
            self.rounds = self.rounds.split_off(&horizon);
            debug!(
                "S{}N{} pruned rounds below seq {}",
                self.shard_id, self.node_id, horizon
            );
        }
        let limit = self.window_end();
        self.far_commits.retain(|_, seq_id| *seq_id > limit);
    }

    /// Highest sequence whose messages are buffered
    fn window_end(&self) -> SeqId {
        self.seq_id.saturating_add(self.config.lookahead)
    }

    fn check_window(&self, seq_id: SeqId) -> ConsensusResult<()> {
        if seq_id > self.window_end() {
            return Err(ConsensusError::SequenceOutOfWindow {
                local: self.seq_id,
                received: seq_id,
            });
        }
        Ok(())
    }

    fn check_sender(claimed: NodeId, from: NodeId) -> ConsensusResult<()> {
        if claimed != from {
            return Err(ConsensusError::UnexpectedSender {
                expected: from,
                actual: claimed,
            });
        }
        Ok(())
    }

    fn on_pre_prepare(&mut self, from: NodeId, msg: PrePrepare) -> ConsensusResult<Vec<Outbound>> {
        let leader = self.leader();
        if from != leader {
            return Err(ConsensusError::UnexpectedSender {
                expected: leader,
                actual: from,
            });
        }

        let seq_id = msg.seq_id;
        if msg.request.digest() != msg.digest {
            return Err(ConsensusError::DigestMismatch { seq_id });
        }
        if seq_id < self.seq_id {
            return Err(ConsensusError::StaleSequence {
                local: self.seq_id,
                received: seq_id,
            });
        }
        self.check_window(seq_id)?;

        let round = self.rounds.entry(seq_id).or_default();
        if round.digest.is_some_and(|digest| digest != msg.digest) {
            return Err(ConsensusError::ConflictingProposal { seq_id });
        }
        round.set_proposal(msg.request, msg.digest);

        if seq_id > self.seq_id {
            debug!(
                "S{}N{} adopted pre-prepare for seq {} while at {}",
                self.shard_id, self.node_id, seq_id, self.seq_id
            );
            return Ok(Vec::new());
        }
        self.advance()
    }

    fn on_prepare(&mut self, vote: Vote) -> ConsensusResult<Vec<Outbound>> {
        let seq_id = vote.seq_id;
        if seq_id < self.seq_id {
            return Err(ConsensusError::StaleSequence {
                local: self.seq_id,
                received: seq_id,
            });
        }
        self.check_window(seq_id)?;

        // Votes that arrive ahead of their pre-prepare are kept per digest
        let round = self.rounds.entry(seq_id).or_default();
        if round.digest.is_some_and(|digest| digest != vote.digest) {
            return Err(ConsensusError::UnknownDigest {
                seq_id,
                digest: vote.digest,
            });
        }
        round.add_prepare(vote.digest, vote.sender);

        if seq_id == self.seq_id {
            self.advance()
        } else {
            Ok(Vec::new())
        }
    }

    fn on_commit(&mut self, vote: Vote) -> ConsensusResult<Vec<Outbound>> {
        let seq_id = vote.seq_id;
        if seq_id < self.seq_id {
            return Err(ConsensusError::StaleSequence {
                local: self.seq_id,
                received: seq_id,
            });
        }
        if seq_id > self.window_end() {
            return self.on_far_commit(vote.sender, seq_id);
        }

        let round = self.rounds.entry(seq_id).or_default();
        let count = round.add_commit(vote.digest, vote.sender);
        let known = round.digest == Some(vote.digest) && round.request.is_some();

        if seq_id == self.seq_id && known {
            return self.advance();
        }
        if count >= self.config.commit_quorum() {
            // The committee finalized something this node cannot apply yet
            return self.request_catch_up(seq_id);
        }
        Ok(Vec::new())
    }

    /// Commits beyond the window are not buffered. Once `f + 1` members
    /// report commits that far ahead, catch up to the lowest sequence
    /// among the `f + 1` highest reports.
    fn on_far_commit(&mut self, sender: NodeId, seq_id: SeqId) -> ConsensusResult<Vec<Outbound>> {
        let highest = self.far_commits.entry(sender).or_insert(seq_id);
        *highest = (*highest).max(seq_id);

        let faulty = self.config.faulty();
        let mut reported: Vec<SeqId> = self.far_commits.values().copied().collect();
        if reported.len() <= faulty {
            return Err(ConsensusError::SequenceOutOfWindow {
                local: self.seq_id,
                received: seq_id,
            });
        }
        reported.sort_unstable_by(|a, b| b.cmp(a));
        self.request_catch_up(reported[faulty])
    }

    fn on_reply(&mut self, reply: Reply) -> ConsensusResult<Vec<Outbound>> {
        if !self.is_leader() {
            return Err(ConsensusError::NotLeader {
                node_id: self.node_id,
                leader: self.leader(),
            });
        }

        let seq_id = reply.seq_id;
        let quorum = self.config.reply_quorum();
        let Some(round) = self.rounds.get_mut(&seq_id) else {
            debug!("S{}N{} reply for unknown seq {}", self.shard_id, self.node_id, seq_id);
            return Ok(Vec::new());
        };
        if round.phase == RoundPhase::Replied {
            return Ok(Vec::new());
        }
        if !reply.result {
            warn!(
                "S{}N{} node {} reported failure for seq {}",
                self.shard_id, self.node_id, reply.sender, seq_id
            );
            return Ok(Vec::new());
        }

        if round.add_reply(reply.sender) >= quorum {
            round.phase = RoundPhase::Replied;
            if self.in_flight == Some(seq_id) {
                self.in_flight = None;
            }
            self.seq_id = self.seq_id.max(seq_id + 1);
            self.replied.push(seq_id);
            info!("S{}N{} seq {} replied", self.shard_id, self.node_id, seq_id);
        }
        Ok(Vec::new())
    }

    fn on_request_old(&mut self, msg: RequestOldMessage) -> ConsensusResult<Vec<Outbound>> {
        if !self.is_leader() {
            return Err(ConsensusError::NotLeader {
                node_id: self.node_id,
                leader: self.leader(),
            });
        }
        self.handler.on_old_request(msg.from_seq, msg.to_seq);

        // Only finalized requests are served, up to the first gap
        let mut requests = Vec::new();
        for seq_id in msg.from_seq..=msg.to_seq {
            let finalized = self.rounds.get(&seq_id).and_then(|round| {
                let done = round.phase >= RoundPhase::Committed || seq_id < self.seq_id;
                round.request.as_ref().filter(|_| done)
            });
            match finalized {
                Some(request) => requests.push(request.clone()),
                None => break,
            }
        }

        let to_seq = (msg.from_seq + requests.len() as SeqId).saturating_sub(1);
        info!(
            "S{}N{} serving catch-up {}..={} to node {} ({} requests)",
            self.shard_id,
            self.node_id,
            msg.from_seq,
            msg.to_seq,
            msg.asker,
            requests.len()
        );
        Ok(vec![Outbound::to_node(
            msg.asker,
            PbftMessage::SendOldMessage(SendOldMessage {
                from_seq: msg.from_seq,
                to_seq: to_seq.max(msg.from_seq),
                requests,
            }),
        )])
    }

    fn on_send_old(&mut self, from: NodeId, msg: SendOldMessage) -> ConsensusResult<Vec<Outbound>> {
        let leader = self.leader();
        if from != leader {
            return Err(ConsensusError::UnexpectedSender {
                expected: leader,
                actual: from,
            });
        }
        self.catch_up = None;

        if msg.requests.is_empty() {
            debug!("S{}N{} empty catch-up answer", self.shard_id, self.node_id);
            return Ok(Vec::new());
        }
        if msg.from_seq > self.seq_id {
            return Err(ConsensusError::BehindSequence {
                local: self.seq_id,
                received: msg.from_seq,
            });
        }

        let commit_quorum = self.config.commit_quorum();
        let mut out = Vec::new();
        let mut conflict = None;
        for (offset, request) in msg.requests.into_iter().enumerate() {
            let seq_id = msg.from_seq + offset as SeqId;
            if seq_id < self.seq_id {
                continue;
            }

            // A commit quorum, or else a prepared proposal, binds the sequence
            let digest = request.digest();
            let bound = self.rounds.get(&seq_id).and_then(|round| {
                round.quorum_digest(commit_quorum).or(round
                    .digest
                    .filter(|_| round.phase >= RoundPhase::Prepared))
            });
            if let Some(expected) = bound.filter(|expected| *expected != digest) {
                warn!(
                    "S{}N{} catch-up for seq {} carries digest {}, expected {}",
                    self.shard_id,
                    self.node_id,
                    seq_id,
                    digest.short(),
                    expected.short()
                );
                conflict = Some(seq_id);
                break;
            }

            self.handler.on_catch_up(seq_id, &request);
            let round = self.rounds.entry(seq_id).or_default();
            round.set_proposal(request, digest);
            round.phase = RoundPhase::Committed;
            out.push(Outbound::to_node(
                leader,
                PbftMessage::Reply(Reply {
                    seq_id,
                    sender: self.node_id,
                    result: true,
                }),
            ));
            self.seq_id = seq_id + 1;
        }
        if let Some(seq_id) = conflict {
            if out.is_empty() {
                return Err(ConsensusError::ConflictingProposal { seq_id });
            }
        }
        info!("S{}N{} caught up to seq {}", self.shard_id, self.node_id, self.seq_id);

        match self.advance() {
            Ok(more) => out.extend(more),
            Err(err) => warn!(
                "S{}N{} after catch-up, seq {}: {}",
                self.shard_id, self.node_id, self.seq_id, err
            ),
        }
        Ok(out)
    }

    fn request_catch_up(&mut self, target: SeqId) -> ConsensusResult<Vec<Outbound>> {
        // A lost answer is superseded by the next, further target
        if self.is_leader() || self.catch_up.is_some_and(|pending| target <= pending) {
            return Err(ConsensusError::BehindSequence {
                local: self.seq_id,
                received: target,
            });
        }

        self.catch_up = Some(target);
        info!(
            "S{}N{} behind at seq {}, requesting {}..={} from leader",
            self.shard_id, self.node_id, self.seq_id, self.seq_id, target
        );
        Ok(vec![Outbound::to_node(
            self.leader(),
            PbftMessage::RequestOldMessage(RequestOldMessage {
                from_seq: self.seq_id,
                to_seq: target,
                asker: self.node_id,
            }),
        )])
    }

    /// Drive the current sequence as far as cached state allows, cascading
    /// into following sequences that were already adopted.
    fn advance(&mut self) -> ConsensusResult<Vec<Outbound>> {
        let mut out = Vec::new();
        loop {
            match self.step(&mut out) {
                Ok(true) => continue,
                Ok(false) => return Ok(out),
                Err(err) if out.is_empty() => return Err(err),
                Err(err) => {
                    warn!("S{}N{} seq {}: {}", self.shard_id, self.node_id, self.seq_id, err);
                    return Ok(out);
                }
            }
        }
    }

    /// One pass over the current round; `true` once it committed
    fn step(&mut self, out: &mut Vec<Outbound>) -> ConsensusResult<bool> {
        let seq_id = self.seq_id;
        let node_id = self.node_id;
        let leader = self.leader();
        let prepare_quorum = self.config.prepare_quorum();
        let commit_quorum = self.config.commit_quorum();
        let handler = Arc::clone(&self.handler);

        let Some(round) = self.rounds.get_mut(&seq_id) else {
            return Ok(false);
        };
        let Some(digest) = round.digest else {
            return Ok(false);
        };

        if round.phase == RoundPhase::Pending {
            if node_id == leader {
                return Ok(false);
            }
            let Some(request) = round.request.as_ref() else {
                return Ok(false);
            };
            if !handler.on_pre_prepare(seq_id, request) {
                return Err(ConsensusError::ProposalRejected { seq_id });
            }
            round.phase = RoundPhase::Proposed;
            round.add_prepare(digest, node_id);
            out.push(Outbound::broadcast(PbftMessage::Prepare(Vote {
                digest,
                seq_id,
                sender: node_id,
            })));
            debug!("S{}N{} prepared vote for seq {}", self.shard_id, node_id, seq_id);
        }

        if round.phase == RoundPhase::Proposed && round.prepare_count(&digest) >= prepare_quorum {
            if let Some(request) = round.request.as_ref() {
                handler.on_prepare(seq_id, request);
            }
            round.phase = RoundPhase::Prepared;
            round.add_commit(digest, node_id);
            out.push(Outbound::broadcast(PbftMessage::Commit(Vote {
                digest,
                seq_id,
                sender: node_id,
            })));
            debug!("S{}N{} seq {} prepared", self.shard_id, node_id, seq_id);
        }

        if round.phase < RoundPhase::Committed && round.commit_count(&digest) >= commit_quorum {
            let Some(request) = round.request.as_ref() else {
                return Ok(false);
            };
            handler.on_commit(seq_id, request);
            round.phase = RoundPhase::Committed;
            if node_id != leader {
                out.push(Outbound::to_node(
                    leader,
                    PbftMessage::Reply(Reply {
                        seq_id,
                        sender: node_id,
                        result: true,
                    }),
                ));
            }
            self.seq_id = seq_id + 1;
            info!(
                "S{}N{} seq {} committed digest {}",
                self.shard_id,
                node_id,
                seq_id,
                digest.short()
            );
            return Ok(true);
        }

        Ok(false)
    }
}
