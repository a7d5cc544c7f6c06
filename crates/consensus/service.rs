//! The dBFT engine: one logical task per node.
//!
//! Inbound envelopes arrive through an mpsc queue filled by the network
//! plane and are processed in arrival order; every piece of consensus state
//! lives on this task. Timers drive proposals and view changes; block
//! persistence events reset the context for the next height.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use neorex_blockchain::error::ChainError;
use neorex_blockchain::events::NodeEvent;
use neorex_blockchain::{BlockOrigin, Blockchain};
use neorex_common::config::ProtocolConfig;
use neorex_common::signing::signing_data;
use neorex_common::types::{single_sig_script, Transaction, UInt160, UInt256};
use neorex_crypto::{verify_signature, KeyPair};
use neorex_io::NeoDecode;
use neorex_p2p::payloads::{ExtensiblePayload, InventoryType};
use neorex_p2p::LocalNode;

use crate::context::{CommitDecision, CommitRecord, ConsensusContext, Phase};
use crate::error::ConsensusError;
use crate::messages::{ConsensusMessage, ConsensusMessageBody, ViewChangeReason};
use crate::recovery::build_recovery_message;

/// How the engine reaches its peers. The network plane implements this;
/// tests plug in buses.
pub trait ConsensusNetwork: Send + Sync {
    fn broadcast(&self, payload: ExtensiblePayload);
    fn request_transactions(&self, hashes: Vec<UInt256>);
}

impl ConsensusNetwork for LocalNode {
    fn broadcast(&self, payload: ExtensiblePayload) {
        self.broadcast_extensible(payload);
    }

    fn request_transactions(&self, hashes: Vec<UInt256>) {
        self.request_inventory(InventoryType::Transaction, hashes);
    }
}

/// The per-node dBFT service.
pub struct DbftService {
    chain: Arc<Blockchain>,
    config: Arc<ProtocolConfig>,
    keypair: Option<KeyPair>,
    network: Arc<dyn ConsensusNetwork>,
    context: ConsensusContext,
    timer: Instant,
    cancel: CancellationToken,
}

impl DbftService {
    pub fn new(
        chain: Arc<Blockchain>,
        keypair: Option<KeyPair>,
        network: Arc<dyn ConsensusNetwork>,
        cancel: CancellationToken,
    ) -> Result<Self, ConsensusError> {
        let config = chain.config().clone();
        let context = ConsensusContext::new(
            config.validator_set(),
            keypair.as_ref().map(KeyPair::public_key),
        );
        let mut service = Self {
            chain,
            config,
            keypair,
            network,
            context,
            timer: Instant::now(),
            cancel,
        };
        service.reset_from_tip()?;
        Ok(service)
    }

    /// Runs until cancelled. `inbox` is filled by the network plane.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<ExtensiblePayload>) {
        let cancel = self.cancel.clone();
        let mut events = self.chain.events().subscribe();
        loop {
            let deadline = self.timer;
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("consensus service stopping");
                    return;
                }
                payload = inbox.recv() => match payload {
                    Some(payload) => {
                        if let Err(error) = self.handle_envelope(payload) {
                            debug!(%error, "consensus envelope dropped");
                        }
                    }
                    None => {
                        info!("consensus inbox closed, stopping");
                        return;
                    }
                },
                event = events.recv() => match event {
                    Ok(NodeEvent::BlockPersisted { height, .. }) => {
                        debug!(height, "resetting consensus for next height");
                        if let Err(error) = self.reset_from_tip() {
                            warn!(%error, "consensus reset failed");
                        }
                    }
                    Ok(NodeEvent::TxAdded { hash }) => self.on_transaction_available(hash),
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                        // Catch up from the chain tip rather than replaying.
                        if let Err(error) = self.reset_from_tip() {
                            warn!(%error, "consensus reset failed");
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    if let Err(error) = self.on_timeout() {
                        warn!(%error, "consensus timeout handling failed");
                    }
                }
            }
        }
    }

    pub fn context(&self) -> &ConsensusContext {
        &self.context
    }

    // ---- lifecycle --------------------------------------------------------

    fn reset_from_tip(&mut self) -> Result<(), ConsensusError> {
        let tip = self.chain.tip_header()?;
        self.context.reset(&tip);
        self.emit_phase();
        self.schedule_timer_for_view();
        debug!(
            height = self.context.block_index,
            primary = self.context.primary_index(),
            me = ?self.context.my_index,
            "consensus round initialized"
        );
        Ok(())
    }

    /// Primary waits out the block cadence; backups arm the view-change
    /// timeout. A watch-only node keeps a long idle timer.
    fn schedule_timer_for_view(&mut self) {
        let block_time = Duration::from_millis(self.config.milliseconds_per_block);
        if self.context.watch_only() {
            self.timer = Instant::now() + block_time * 16;
            return;
        }
        if self.context.is_primary() && self.context.view_number == 0 {
            let now = now_ms();
            let target = self.context.prev_timestamp + self.config.milliseconds_per_block;
            let wait = Duration::from_millis(target.saturating_sub(now));
            self.timer = Instant::now() + wait;
        } else {
            self.timer = Instant::now() + self.view_timeout(self.context.view_number);
        }
    }

    /// `T_v = block_time << min(v, 6)`, plus an index-proportional jitter
    /// so backups do not stampede.
    fn view_timeout(&self, view: u8) -> Duration {
        let base = self.config.milliseconds_per_block;
        let shifted = base << u64::from(view.min(6));
        let jitter = u64::from(self.context.my_index.unwrap_or(0)) * (base / 16).max(1);
        Duration::from_millis(shifted + jitter)
    }

    fn on_timeout(&mut self) -> Result<(), ConsensusError> {
        if self.context.watch_only() {
            self.schedule_timer_for_view();
            return Ok(());
        }
        match self.context.phase {
            Phase::Initial if self.context.is_primary() => self.send_prepare_request(),
            Phase::CommitSent | Phase::BlockSent => {
                // Never retract a commit; ask the committee to fill in the
                // missing pieces instead.
                self.broadcast_body(ConsensusMessageBody::RecoveryRequest {
                    timestamp: now_ms(),
                });
                self.timer = Instant::now() + self.view_timeout(self.context.view_number);
                Ok(())
            }
            _ => self.request_view_change(ViewChangeReason::Timeout),
        }
    }

    fn emit_phase(&self) {
        self.chain.events().emit(NodeEvent::ConsensusPhase {
            height: self.context.block_index,
            view: self.context.view_number,
            phase: self.context.phase.name(),
        });
    }

    fn set_phase(&mut self, phase: Phase) {
        self.context.phase = phase;
        self.emit_phase();
    }

    // ---- outbound ---------------------------------------------------------

    fn broadcast_body(&mut self, body: ConsensusMessageBody) -> Option<ExtensiblePayload> {
        let keypair = self.keypair.as_ref()?;
        let my_index = self.context.my_index?;
        let message = ConsensusMessage {
            block_index: self.context.block_index,
            validator_index: my_index,
            view_number: self.context.view_number,
            body,
        };
        let envelope = message.into_envelope(self.config.network_magic, keypair);
        self.network.broadcast(envelope.clone());
        Some(envelope)
    }

    fn send_prepare_request(&mut self) -> Result<(), ConsensusError> {
        let height = self.context.block_index.saturating_sub(1);
        let transactions = self.chain.mempool().get_sorted(
            self.config.max_transactions_per_block as usize,
            self.config.max_block_size as usize / 2,
            self.config.max_block_system_fee,
            height,
        );
        self.context.timestamp = now_ms().max(self.context.prev_timestamp + 1);
        self.context.nonce = rand::thread_rng().gen();
        self.context.tx_hashes = transactions.iter().map(|tx| tx.hash()).collect();
        self.context.transactions = transactions
            .iter()
            .map(|tx| (tx.hash(), tx.as_ref().clone()))
            .collect();

        let body = ConsensusMessageBody::PrepareRequest {
            version: 0,
            prev_hash: self.context.prev_hash,
            timestamp: self.context.timestamp,
            nonce: self.context.nonce,
            tx_hashes: self.context.tx_hashes.clone(),
        };
        let envelope = match self.broadcast_body(body) {
            Some(envelope) => envelope,
            None => return Ok(()), // watch-only
        };
        info!(
            height = self.context.block_index,
            txs = self.context.tx_hashes.len(),
            "prepare request sent"
        );
        let my_index = usize::from(self.context.primary_index());
        self.context.preparation_hash = Some(envelope.hash());
        self.context.preparations[my_index] = Some(envelope);
        self.set_phase(Phase::RequestSent);
        self.timer = Instant::now() + self.view_timeout(self.context.view_number);
        self.check_preparations()
    }

    fn send_prepare_response(&mut self) -> Result<(), ConsensusError> {
        let Some(preparation_hash) = self.context.preparation_hash else {
            return Ok(());
        };
        let body = ConsensusMessageBody::PrepareResponse { preparation_hash };
        if let Some(envelope) = self.broadcast_body(body) {
            if let Some(my_index) = self.context.my_index {
                self.context.preparations[usize::from(my_index)] = Some(envelope);
            }
            self.set_phase(Phase::ResponseSent);
        }
        self.check_preparations()
    }

    fn send_commit(&mut self) -> Result<(), ConsensusError> {
        let Some(my_index) = self.context.my_index else {
            return Ok(());
        };
        let Some(keypair) = self.keypair.clone() else {
            return Ok(());
        };
        let header = self.context.proposed_header()?;
        let block_hash = header.hash();
        let my_account = UInt160::hash160_of(&single_sig_script(&keypair.public_key()));

        // Double-sign guard: the last commit decision is durable before any
        // commit leaves this node, and is never contradicted.
        let signature = match self.chain.store().get_consensus_state(&my_account)? {
            Some(bytes) => {
                let decision = CommitDecision::decode(&bytes)?;
                if decision.block_index == self.context.block_index
                    && decision.view_number == self.context.view_number
                {
                    if decision.block_hash != block_hash {
                        warn!(
                            height = self.context.block_index,
                            view = self.context.view_number,
                            "refusing conflicting commit"
                        );
                        return Err(ConsensusError::ConflictingCommit);
                    }
                    decision.signature
                } else {
                    self.persist_commit_decision(&keypair, &my_account, &block_hash)?
                }
            }
            None => self.persist_commit_decision(&keypair, &my_account, &block_hash)?,
        };

        let envelope = self.broadcast_body(ConsensusMessageBody::Commit { signature });
        if let Some(envelope) = envelope {
            self.context.commits[usize::from(my_index)] = Some(CommitRecord {
                signature,
                payload: envelope,
            });
        }
        info!(
            height = self.context.block_index,
            view = self.context.view_number,
            "commit sent"
        );
        self.set_phase(Phase::CommitSent);
        self.check_commits()
    }

    fn persist_commit_decision(
        &self,
        keypair: &KeyPair,
        my_account: &UInt160,
        block_hash: &UInt256,
    ) -> Result<[u8; 64], ConsensusError> {
        let signature = keypair.sign(&signing_data(self.config.network_magic, block_hash));
        let record = self.context.encode_commit_decision(block_hash, &signature);
        self.chain
            .store()
            .put_consensus_state(my_account, record)?;
        Ok(signature)
    }

    fn request_view_change(&mut self, reason: ViewChangeReason) -> Result<(), ConsensusError> {
        let new_view = self.context.view_number.saturating_add(1);
        self.set_phase(Phase::ViewChanging);
        let body = ConsensusMessageBody::ChangeView {
            new_view,
            timestamp: now_ms(),
            reason,
        };
        if let Some(envelope) = self.broadcast_body(body) {
            if let Some(my_index) = self.context.my_index {
                self.context.change_views[usize::from(my_index)] = Some((new_view, envelope));
            }
        }
        info!(
            height = self.context.block_index,
            from = self.context.view_number,
            to = new_view,
            ?reason,
            "view change requested"
        );
        self.timer = Instant::now() + self.view_timeout(new_view);
        self.try_advance_view(new_view)
    }

    fn try_advance_view(&mut self, target_view: u8) -> Result<(), ConsensusError> {
        if self.context.count_change_views(target_view) < self.context.quorum() {
            return Ok(());
        }
        info!(
            height = self.context.block_index,
            view = target_view,
            "view change quorum reached"
        );
        self.context.advance_view(target_view);
        self.emit_phase();
        self.schedule_timer_for_view();
        if self.context.is_primary() {
            // New primary proposes right away.
            self.timer = Instant::now();
        }
        // Replay stashed payloads that were ahead of us.
        let stashed = std::mem::take(&mut self.context.future_payloads);
        for payload in stashed {
            if let Err(error) = self.handle_envelope(payload) {
                debug!(%error, "stashed payload dropped on replay");
            }
        }
        Ok(())
    }

    // ---- inbound ----------------------------------------------------------

    /// Validates the envelope (sender binding and witness signature over
    /// the magic-bound hash) and dispatches the message. Failures drop the
    /// envelope; the network layer scores the peer.
    pub fn handle_envelope(&mut self, payload: ExtensiblePayload) -> Result<(), ConsensusError> {
        let message = ConsensusMessage::decode(&payload.data)?;

        if message.block_index != self.context.block_index {
            // Behind us: useless. Ahead of us: we are the ones behind.
            if message.block_index > self.context.block_index {
                self.broadcast_body(ConsensusMessageBody::RecoveryRequest {
                    timestamp: now_ms(),
                });
            }
            return Err(ConsensusError::WrongHeight {
                expected: self.context.block_index,
                got: message.block_index,
            });
        }
        let validator_count = self.context.validators.len() as u8;
        if message.validator_index >= validator_count {
            return Err(ConsensusError::InvalidValidatorIndex(
                message.validator_index,
            ));
        }
        let expected_sender = self
            .context
            .validator_account(message.validator_index)
            .ok_or(ConsensusError::InvalidValidatorIndex(message.validator_index))?;
        if payload.sender != expected_sender {
            return Err(ConsensusError::SenderMismatch(message.validator_index));
        }
        if !self.chain.runtime().verify_witness(
            self.config.network_magic,
            &payload.hash(),
            &expected_sender,
            &payload.witness,
        ) {
            return Err(ConsensusError::InvalidEnvelopeSignature);
        }

        let validator_index = message.validator_index;
        let view_number = message.view_number;
        match message.body {
            ConsensusMessageBody::ChangeView { new_view, .. } => {
                if new_view > self.context.view_number {
                    self.context.change_views[usize::from(validator_index)] =
                        Some((new_view, payload));
                    return self.try_advance_view(new_view);
                }
                Ok(())
            }
            _ if view_number > self.context.view_number => {
                self.context.stash_future_payload(payload);
                Ok(())
            }
            _ if view_number < self.context.view_number => Ok(()),
            ConsensusMessageBody::PrepareRequest {
                prev_hash,
                timestamp,
                nonce,
                tx_hashes,
                ..
            } => self.on_prepare_request(
                validator_index,
                prev_hash,
                timestamp,
                nonce,
                tx_hashes,
                payload,
            ),
            ConsensusMessageBody::PrepareResponse { preparation_hash } => {
                self.on_prepare_response(validator_index, preparation_hash, payload)
            }
            ConsensusMessageBody::Commit { signature } => {
                self.on_commit(validator_index, signature, payload)
            }
            ConsensusMessageBody::RecoveryRequest { .. } => {
                if let Some(body) = build_recovery_message(&self.context) {
                    self.broadcast_body(body);
                }
                Ok(())
            }
            ConsensusMessageBody::RecoveryMessage { payloads } => {
                for inner in payloads {
                    if let Err(error) = self.handle_envelope(inner) {
                        debug!(%error, "recovery payload dropped");
                    }
                }
                Ok(())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn on_prepare_request(
        &mut self,
        validator_index: u8,
        prev_hash: UInt256,
        timestamp: u64,
        nonce: u64,
        tx_hashes: Vec<UInt256>,
        payload: ExtensiblePayload,
    ) -> Result<(), ConsensusError> {
        if validator_index != self.context.primary_index() {
            return Err(ConsensusError::NotFromPrimary(validator_index));
        }
        if self.context.request_sent_or_received() || self.context.commit_sent() {
            return Ok(());
        }
        if prev_hash != self.context.prev_hash
            || timestamp <= self.context.prev_timestamp
            || tx_hashes.len() > self.config.max_transactions_per_block as usize
        {
            debug!("rejecting malformed prepare request, moving to change view");
            return self.request_view_change(ViewChangeReason::BlockRejectedByPolicy);
        }

        self.context.timestamp = timestamp;
        self.context.nonce = nonce;
        self.context.tx_hashes = tx_hashes;
        self.context.preparation_hash = Some(payload.hash());
        self.context.preparations[usize::from(validator_index)] = Some(payload);
        self.set_phase(Phase::RequestReceived);

        // Pull the referenced transactions out of the pool; fetch the rest.
        for hash in self.context.tx_hashes.clone() {
            if let Some(tx) = self.chain.mempool().get(&hash) {
                self.context
                    .transactions
                    .insert(hash, tx.as_ref().clone());
            }
        }
        let missing = self.context.missing_transactions();
        if missing.is_empty() {
            self.send_prepare_response()
        } else {
            debug!(missing = missing.len(), "requesting proposal transactions");
            self.network.request_transactions(missing);
            Ok(())
        }
    }

    fn on_prepare_response(
        &mut self,
        validator_index: u8,
        preparation_hash: UInt256,
        payload: ExtensiblePayload,
    ) -> Result<(), ConsensusError> {
        // Responses must reference the request we accepted.
        if self.context.preparation_hash != Some(preparation_hash) {
            return Ok(());
        }
        let slot = usize::from(validator_index);
        if self.context.preparations[slot].is_none() {
            self.context.preparations[slot] = Some(payload);
        }
        self.check_preparations()
    }

    fn on_commit(
        &mut self,
        validator_index: u8,
        signature: [u8; 64],
        payload: ExtensiblePayload,
    ) -> Result<(), ConsensusError> {
        if !self.context.request_sent_or_received() {
            // Cannot check the signature without the proposal; keep it for
            // later replay.
            self.context.stash_future_payload(payload);
            return Ok(());
        }
        let header = self.context.proposed_header()?;
        let block_hash = header.hash();
        let key = self
            .context
            .validators
            .get(validator_index)
            .ok_or(ConsensusError::InvalidValidatorIndex(validator_index))?;
        let message = signing_data(self.config.network_magic, &block_hash);
        if !verify_signature(&message, &signature, key) {
            return Err(ConsensusError::InvalidCommitSignature(validator_index));
        }
        let slot = usize::from(validator_index);
        if self.context.commits[slot].is_none() {
            self.context.commits[slot] = Some(CommitRecord { signature, payload });
        }
        self.check_commits()
    }

    // ---- quorum checks ----------------------------------------------------

    fn check_preparations(&mut self) -> Result<(), ConsensusError> {
        if !self.context.request_sent_or_received() || self.context.commit_sent() {
            return Ok(());
        }
        if !self.context.missing_transactions().is_empty() {
            return Ok(());
        }
        if self.context.count_preparations() >= self.context.quorum() {
            return self.send_commit();
        }
        Ok(())
    }

    fn check_commits(&mut self) -> Result<(), ConsensusError> {
        if self.context.phase == Phase::BlockSent {
            return Ok(());
        }
        if self.context.count_commits() < self.context.quorum() {
            return Ok(());
        }
        let block = self.context.make_block()?;
        let hash = block.hash();
        info!(
            height = block.index(),
            %hash,
            commits = self.context.count_commits(),
            "commit quorum reached, handing block to the executor"
        );
        match self.chain.add_block(block, BlockOrigin::Consensus) {
            Ok(()) | Err(ChainError::AlreadyPersisted(_)) => {
                self.set_phase(Phase::BlockSent);
                Ok(())
            }
            Err(error) if error.is_fatal() => {
                // A locally assembled block failing to commit means the
                // replica is corrupt; do not keep signing on top of it.
                tracing::error!(%error, "fatal error persisting consensus block, exiting");
                std::process::exit(2);
            }
            Err(error) => Err(error.into()),
        }
    }

    fn on_transaction_available(&mut self, hash: UInt256) {
        if self.context.phase != Phase::RequestReceived {
            return;
        }
        if !self.context.tx_hashes.contains(&hash) {
            return;
        }
        if let Some(tx) = self.chain.mempool().get(&hash) {
            self.context
                .transactions
                .insert(hash, tx.as_ref().clone());
        }
        if self.context.missing_transactions().is_empty() {
            if let Err(error) = self.send_prepare_response() {
                warn!(%error, "prepare response failed");
            }
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
