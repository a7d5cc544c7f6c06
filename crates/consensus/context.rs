//! Per-height consensus state.

use std::collections::HashMap;

use neorex_common::types::{
    multi_sig_script, Block, Header, Transaction, UInt160, UInt256, ValidatorSet, Witness,
};
use neorex_crypto::PublicKeyBytes;
use neorex_io::NeoEncode;
use neorex_p2p::payloads::ExtensiblePayload;

use crate::error::ConsensusError;

/// Where the engine stands for the current `(block_index, view)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Initial,
    RequestSent,
    RequestReceived,
    ResponseSent,
    CommitSent,
    BlockSent,
    ViewChanging,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Initial => "Initial",
            Phase::RequestSent => "RequestSent",
            Phase::RequestReceived => "RequestReceived",
            Phase::ResponseSent => "ResponseSent",
            Phase::CommitSent => "CommitSent",
            Phase::BlockSent => "BlockSent",
            Phase::ViewChanging => "ViewChanging",
        }
    }
}

/// A received commit: the validator's block signature plus its envelope.
#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub signature: [u8; 64],
    pub payload: ExtensiblePayload,
}

/// Cap on preparation payloads retained from future views for recovery.
pub const MAX_FUTURE_PAYLOADS: usize = 64;

/// The dBFT engine's working state for one height. Reset on every persist,
/// view-bumped on timeout agreement. All mutation happens on the single
/// consensus task.
#[derive(Debug)]
pub struct ConsensusContext {
    pub block_index: u32,
    pub view_number: u8,
    pub validators: ValidatorSet,
    pub my_index: Option<u8>,
    pub prev_hash: UInt256,
    pub prev_timestamp: u64,
    /// Proposal fields, fixed by the primary's PrepareRequest.
    pub timestamp: u64,
    pub nonce: u64,
    pub tx_hashes: Vec<UInt256>,
    pub transactions: HashMap<UInt256, Transaction>,
    /// Slot per validator: the PrepareRequest (primary slot) or
    /// PrepareResponse payload observed from them this view.
    pub preparations: Vec<Option<ExtensiblePayload>>,
    /// Hash of the accepted PrepareRequest envelope.
    pub preparation_hash: Option<UInt256>,
    pub commits: Vec<Option<CommitRecord>>,
    /// Target view each validator asked to change to, with its payload.
    pub change_views: Vec<Option<(u8, ExtensiblePayload)>>,
    pub phase: Phase,
    /// Payloads for views ahead of ours, bounded; replayed on view change
    /// and bundled into recovery responses.
    pub future_payloads: Vec<ExtensiblePayload>,
    pub discarded_future_payloads: u64,
}

impl ConsensusContext {
    pub fn new(validators: ValidatorSet, my_key: Option<PublicKeyBytes>) -> Self {
        let my_index = my_key.and_then(|key| validators.index_of(&key));
        let slots = validators.len();
        Self {
            block_index: 0,
            view_number: 0,
            validators,
            my_index,
            prev_hash: UInt256::zero(),
            prev_timestamp: 0,
            timestamp: 0,
            nonce: 0,
            tx_hashes: Vec::new(),
            transactions: HashMap::new(),
            preparations: vec![None; slots],
            preparation_hash: None,
            commits: vec![None; slots],
            change_views: vec![None; slots],
            phase: Phase::Initial,
            future_payloads: Vec::new(),
            discarded_future_payloads: 0,
        }
    }

    /// Resets for a new height on top of the given chain tip.
    pub fn reset(&mut self, tip: &Header) {
        self.block_index = tip.index + 1;
        self.view_number = 0;
        self.prev_hash = tip.hash();
        self.prev_timestamp = tip.timestamp;
        self.clear_round();
        self.change_views = vec![None; self.validators.len()];
        self.future_payloads.clear();
        self.phase = Phase::Initial;
    }

    /// Advances to `view` at the same height. Commits are retained: a
    /// commit at a lower view is never retracted and the block can still
    /// assemble if the old quorum completes.
    pub fn advance_view(&mut self, view: u8) {
        self.view_number = view;
        self.clear_round();
        self.phase = Phase::Initial;
    }

    fn clear_round(&mut self) {
        let slots = self.validators.len();
        self.timestamp = 0;
        self.nonce = 0;
        self.tx_hashes.clear();
        self.transactions.clear();
        self.preparations = vec![None; slots];
        self.preparation_hash = None;
        if self.phase != Phase::CommitSent {
            self.commits = vec![None; slots];
        }
    }

    pub fn quorum(&self) -> usize {
        self.validators.quorum()
    }

    pub fn fault_tolerance(&self) -> usize {
        self.validators.fault_tolerance()
    }

    pub fn primary_index(&self) -> u8 {
        self.validators
            .primary_index(self.block_index, self.view_number)
    }

    pub fn is_primary(&self) -> bool {
        self.my_index == Some(self.primary_index())
    }

    pub fn is_backup(&self) -> bool {
        self.my_index.is_some() && !self.is_primary()
    }

    pub fn watch_only(&self) -> bool {
        self.my_index.is_none()
    }

    pub fn request_sent_or_received(&self) -> bool {
        self.preparation_hash.is_some()
    }

    pub fn count_preparations(&self) -> usize {
        self.preparations.iter().filter(|p| p.is_some()).count()
    }

    pub fn count_commits(&self) -> usize {
        self.commits.iter().filter(|c| c.is_some()).count()
    }

    pub fn commit_sent(&self) -> bool {
        matches!(self.phase, Phase::CommitSent | Phase::BlockSent)
    }

    /// Validators asking for a view strictly greater than ours.
    pub fn count_change_views(&self, target_view: u8) -> usize {
        self.change_views
            .iter()
            .flatten()
            .filter(|(view, _)| *view >= target_view)
            .count()
    }

    /// Transaction hashes from the proposal we still have not seen.
    pub fn missing_transactions(&self) -> Vec<UInt256> {
        self.tx_hashes
            .iter()
            .filter(|hash| !self.transactions.contains_key(hash))
            .copied()
            .collect()
    }

    pub fn stash_future_payload(&mut self, payload: ExtensiblePayload) {
        if self.future_payloads.len() >= MAX_FUTURE_PAYLOADS {
            self.discarded_future_payloads += 1;
            tracing::debug!(
                discarded = self.discarded_future_payloads,
                "future consensus payload cache full, discarding"
            );
            return;
        }
        self.future_payloads.push(payload);
    }

    /// The account of a validator, used to check envelope senders.
    pub fn validator_account(&self, index: u8) -> Option<UInt160> {
        self.validators.get(index).map(|key| {
            UInt160::hash160_of(&neorex_common::types::single_sig_script(key))
        })
    }

    /// The header this round is trying to sign, buildable once a
    /// PrepareRequest fixed the proposal fields.
    pub fn proposed_header(&self) -> Result<Header, ConsensusError> {
        if !self.request_sent_or_received() {
            return Err(ConsensusError::MissingProposal);
        }
        let next_consensus = self
            .validators
            .next_consensus()
            .ok_or(ConsensusError::MissingProposal)?;
        let mut header = Header {
            version: 0,
            prev_hash: self.prev_hash,
            merkle_root: UInt256::zero(),
            timestamp: self.timestamp,
            nonce: self.nonce,
            index: self.block_index,
            primary_index: self.primary_index(),
            next_consensus,
            witness: Witness::default(),
        };
        header.merkle_root = self.proposal_merkle_root();
        Ok(header)
    }

    fn proposal_merkle_root(&self) -> UInt256 {
        let hashes: Vec<[u8; 32]> = self.tx_hashes.iter().map(|h| *h.as_bytes()).collect();
        match neorex_crypto::MerkleTree::compute_root(&hashes) {
            Some(root) => UInt256::from_bytes(root),
            None => UInt256::zero(),
        }
    }

    /// Assembles the block once at least `M` commits are collected: the
    /// witness is the `M`-of-`N` multi-sig with signatures in key order.
    pub fn make_block(&self) -> Result<Block, ConsensusError> {
        let mut header = self.proposed_header()?;
        let quorum = self.quorum();

        // (key, signature) pairs in validator order, then sorted by key to
        // match the multi-sig script's key ordering.
        let mut pairs: Vec<(PublicKeyBytes, [u8; 64])> = self
            .commits
            .iter()
            .enumerate()
            .filter_map(|(index, record)| {
                let record = record.as_ref()?;
                let key = self.validators.get(index as u8)?;
                Some((*key, record.signature))
            })
            .collect();
        if pairs.len() < quorum {
            return Err(ConsensusError::IncompleteQuorum);
        }
        pairs.sort_by_key(|(key, _)| *key);
        let signatures: Vec<[u8; 64]> = pairs
            .iter()
            .take(quorum)
            .map(|(_, signature)| *signature)
            .collect();

        let verification = multi_sig_script(quorum, self.validators.keys())
            .ok_or(ConsensusError::IncompleteQuorum)?;
        header.witness = Witness::new(
            neorex_blockchain::vm::signature_invocation(&signatures),
            verification,
        );

        let transactions = self
            .tx_hashes
            .iter()
            .map(|hash| {
                self.transactions
                    .get(hash)
                    .cloned()
                    .ok_or(ConsensusError::MissingTransaction(*hash))
            })
            .collect::<Result<Vec<Transaction>, _>>()?;

        Ok(Block {
            header,
            transactions,
        })
    }

    /// Serialized commit decision persisted before broadcasting a commit.
    pub fn encode_commit_decision(&self, block_hash: &UInt256, signature: &[u8; 64]) -> Vec<u8> {
        let mut out = self.block_index.encode_to_vec();
        out.push(self.view_number);
        block_hash.encode(&mut out);
        signature.encode(&mut out);
        out
    }
}

/// A commit decision reloaded from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitDecision {
    pub block_index: u32,
    pub view_number: u8,
    pub block_hash: UInt256,
    pub signature: [u8; 64],
}

impl CommitDecision {
    pub fn decode(bytes: &[u8]) -> Result<Self, ConsensusError> {
        use neorex_io::NeoDecode;
        let (block_index, rest) = u32::decode_unfinished(bytes)?;
        let (view_number, rest) = u8::decode_unfinished(rest)?;
        let (block_hash, rest) = UInt256::decode_unfinished(rest)?;
        let signature = <[u8; 64]>::decode(rest)?;
        Ok(Self {
            block_index,
            view_number,
            block_hash,
            signature,
        })
    }
}
