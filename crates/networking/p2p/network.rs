//! The local node's network plane: listener, dialer, peer registry,
//! message routing, inventory relay, and the sync driver.
//!
//! There are no singletons here; the node is an explicit aggregate handed
//! to whoever needs it, and each peer runs as its own task that never
//! touches another peer's state.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use neorex_blockchain::error::{ChainError, MempoolError};
use neorex_blockchain::events::NodeEvent;
use neorex_blockchain::{BlockOrigin, Blockchain};
use neorex_common::config::ProtocolConfig;
use neorex_common::types::UInt256;

use crate::error::NetworkError;
use crate::message::{Message, MessageCommand};
use crate::payloads::{
    AddrPayload, ExtensiblePayload, GetBlockByIndexPayload, HeadersPayload, InvPayload,
    InventoryType, NetworkAddress, PingPayload, RejectPayload,
};
use crate::peer::{
    handshake, local_version, read_frame, writer_loop, Direction, PeerHandle, SEND_QUEUE_CAPACITY,
};
use crate::peer_scoring::{BanList, Offence, PeerScore};
use crate::sync::{SyncRequest, SyncTracker};

const EXTENSIBLE_CACHE_CAPACITY: usize = 1_000;
const SYNC_TICK: Duration = Duration::from_secs(5);
const MAX_INV_BATCH: usize = 500;

/// Consensus categories routed to the consensus inbox.
const CONSENSUS_CATEGORY: &str = "dBFT";

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Listen endpoint; `None` runs dial-only.
    pub bind: Option<SocketAddr>,
    pub seeds: Vec<SocketAddr>,
    pub user_agent: String,
    pub max_peers: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: None,
            seeds: Vec::new(),
            user_agent: "/neorex:0.1.0/".into(),
            max_peers: 16,
        }
    }
}

struct ConnectedPeer {
    handle: Arc<PeerHandle>,
    cancel: CancellationToken,
}

/// The network-facing node aggregate.
pub struct LocalNode {
    protocol: Arc<ProtocolConfig>,
    config: NetworkConfig,
    chain: Arc<Blockchain>,
    /// Random per-process nonce for self-connection detection.
    nonce: u32,
    peers: Mutex<HashMap<SocketAddr, ConnectedPeer>>,
    scores: Mutex<HashMap<SocketAddr, PeerScore>>,
    bans: Mutex<BanList>,
    consensus_inbox: Mutex<Option<mpsc::Sender<ExtensiblePayload>>>,
    /// Extensible payloads we can still serve on `getdata`.
    extensible_cache: Mutex<LruCache<UInt256, ExtensiblePayload>>,
    sync: Mutex<SyncTracker>,
    cancel: CancellationToken,
}

impl LocalNode {
    pub fn new(
        protocol: Arc<ProtocolConfig>,
        config: NetworkConfig,
        chain: Arc<Blockchain>,
    ) -> Arc<Self> {
        #[allow(clippy::unwrap_used)]
        let cache_capacity = NonZeroUsize::new(EXTENSIBLE_CACHE_CAPACITY).unwrap();
        Arc::new(Self {
            protocol,
            config,
            chain,
            nonce: rand::thread_rng().gen(),
            peers: Mutex::new(HashMap::new()),
            scores: Mutex::new(HashMap::new()),
            bans: Mutex::new(BanList::new()),
            consensus_inbox: Mutex::new(None),
            extensible_cache: Mutex::new(LruCache::new(cache_capacity)),
            sync: Mutex::new(SyncTracker::new()),
            cancel: CancellationToken::new(),
        })
    }

    // Lock helpers. A poisoned mutex means a peer task panicked mid-update;
    // nothing here is recoverable past that point.
    #[allow(clippy::unwrap_used)]
    fn peers_lock(&self) -> std::sync::MutexGuard<'_, HashMap<SocketAddr, ConnectedPeer>> {
        self.peers.lock().unwrap()
    }

    #[allow(clippy::unwrap_used)]
    fn scores_lock(&self) -> std::sync::MutexGuard<'_, HashMap<SocketAddr, PeerScore>> {
        self.scores.lock().unwrap()
    }

    #[allow(clippy::unwrap_used)]
    fn bans_lock(&self) -> std::sync::MutexGuard<'_, BanList> {
        self.bans.lock().unwrap()
    }

    #[allow(clippy::unwrap_used)]
    fn sync_lock(&self) -> std::sync::MutexGuard<'_, SyncTracker> {
        self.sync.lock().unwrap()
    }

    #[allow(clippy::unwrap_used)]
    fn extensible_cache_lock(
        &self,
    ) -> std::sync::MutexGuard<'_, LruCache<UInt256, ExtensiblePayload>> {
        self.extensible_cache.lock().unwrap()
    }

    #[allow(clippy::unwrap_used)]
    fn consensus_inbox_lock(
        &self,
    ) -> std::sync::MutexGuard<'_, Option<mpsc::Sender<ExtensiblePayload>>> {
        self.consensus_inbox.lock().unwrap()
    }

    /// Wires the consensus engine's inbound queue. Consensus messages
    /// arriving before this are dropped at the envelope level.
    pub fn register_consensus_inbox(&self, sender: mpsc::Sender<ExtensiblePayload>) {
        let mut inbox = self.consensus_inbox_lock();
        *inbox = Some(sender);
    }

    pub fn chain(&self) -> &Arc<Blockchain> {
        &self.chain
    }

    pub fn peer_count(&self) -> usize {
        let peers = self.peers_lock();
        peers.len()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Starts the listener, seed dialing, the sync ticker, and the event
    /// relay. Returns once the background tasks are spawned.
    pub async fn start(self: &Arc<Self>) -> Result<(), NetworkError> {
        if let Some(bind) = self.config.bind {
            let listener = TcpListener::bind(bind).await?;
            info!(%bind, "p2p listener up");
            let node = self.clone();
            tokio::spawn(async move { node.accept_loop(listener).await });
        }

        for seed in self.config.seeds.clone() {
            let node = self.clone();
            tokio::spawn(async move {
                if let Err(error) = node.connect(seed).await {
                    debug!(%seed, %error, "seed dial failed");
                }
            });
        }

        let node = self.clone();
        tokio::spawn(async move { node.sync_loop().await });
        let node = self.clone();
        tokio::spawn(async move { node.event_loop().await });
        Ok(())
    }

    /// Stops ingress first; peer tasks observe the token and drain out.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            let accepted = tokio::select! {
                _ = self.cancel.cancelled() => return,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, addr)) => {
                    if self.refuse_connection(&addr) {
                        continue;
                    }
                    let node = self.clone();
                    tokio::spawn(async move {
                        if let Err(error) = node.spawn_peer(stream, Direction::Inbound).await {
                            debug!(%addr, %error, "inbound peer failed");
                        }
                    });
                }
                Err(error) => {
                    warn!(%error, "accept failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    pub async fn connect(self: &Arc<Self>, addr: SocketAddr) -> Result<(), NetworkError> {
        if self.refuse_connection(&addr) {
            return Err(NetworkError::Handshake("peer refused by policy".into()));
        }
        let stream = TcpStream::connect(addr).await?;
        self.clone().spawn_peer(stream, Direction::Outbound).await
    }

    fn refuse_connection(&self, addr: &SocketAddr) -> bool {
        let mut bans = self.bans_lock();
        if bans.is_banned(&addr.ip()) {
            return true;
        }
        drop(bans);
        let peers = self.peers_lock();
        peers.len() >= self.config.max_peers || peers.contains_key(addr)
    }

    fn spawn_peer(
        self: Arc<Self>,
        mut stream: TcpStream,
        direction: Direction,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), NetworkError>> + Send>>
    {
        Box::pin(async move {
        let addr = stream.peer_addr()?;
        let start_height = self.chain.height().unwrap_or(0);
        let version = local_version(
            self.protocol.network_magic,
            self.nonce,
            &self.config.user_agent,
            self.config.bind.map(|b| b.port()),
            start_height,
        );
        let remote = handshake(&mut stream, &version).await?;

        let (sender, receiver) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let handle = Arc::new(PeerHandle::new(addr, direction, &remote, sender));
        let peer_cancel = self.cancel.child_token();
        {
            let mut peers = self.peers_lock();
            if peers.len() >= self.config.max_peers || peers.contains_key(&addr) {
                return Err(NetworkError::Handshake("peer table full".into()));
            }
            peers.insert(
                addr,
                ConnectedPeer {
                    handle: handle.clone(),
                    cancel: peer_cancel.clone(),
                },
            );
        }
        info!(%addr, ?direction, agent = %handle.user_agent, "peer connected");

        let (read_half, write_half) = stream.into_split();
        let allow_compression = !handle.compression_disabled;
        tokio::spawn(writer_loop(write_half, receiver, allow_compression));

        let node = self.clone();
        let peer = handle.clone();
        tokio::spawn(async move {
            let mut read_half = read_half;
            let reason = loop {
                let frame = tokio::select! {
                    _ = peer_cancel.cancelled() => break "shutdown".to_string(),
                    frame = read_frame(&mut read_half) => frame,
                };
                let outcome = match frame {
                    Ok(raw) => match Message::from_parts(raw.flags, raw.command, raw.payload) {
                        Ok(message) => node.handle_message(&peer, message).await,
                        Err(error) => Err(error),
                    },
                    Err(error) => {
                        // Oversize frames are hostile; charge before the
                        // connection goes.
                        node.charge_for_error(&peer, &error);
                        break error.to_string();
                    }
                };
                if let Err(error) = outcome {
                    if node.charge_for_error(&peer, &error) {
                        break format!("misbehaviour: {error}");
                    }
                }
            };
            debug!(%addr, %reason, "peer disconnected");
            node.remove_peer(&addr);
        });
        Ok(())
        })
    }

    fn remove_peer(&self, addr: &SocketAddr) {
        let removed = self.peers_lock().remove(addr);
        if let Some(peer) = removed {
            peer.cancel.cancel();
        }
        self.scores_lock().remove(addr);
        self.sync_lock().on_peer_dropped(addr);
    }

    /// Disconnects with a `reject` so the peer knows why.
    fn disconnect_with_reject(&self, peer: &PeerHandle, command: MessageCommand, reason: &str) {
        let _ = peer.try_send(Message::Reject(RejectPayload::new(command as u8, reason)));
        self.remove_peer(&peer.addr);
    }

    /// Charges the peer for an error; true means it crossed the threshold
    /// and was banned.
    fn charge_for_error(&self, peer: &PeerHandle, error: &NetworkError) -> bool {
        let offence = match error {
            NetworkError::Decode(_) => Offence::MalformedPayload,
            NetworkError::OversizeFrame { .. } => Offence::OversizeFrame,
            NetworkError::Decompression => Offence::MalformedPayload,
            NetworkError::Handshake(_) => Offence::MalformedPayload,
            NetworkError::Chain(ChainError::InvalidBlock(_)) => Offence::InvalidSignature,
            NetworkError::Chain(ChainError::AlreadyPersisted(_)) => Offence::StaleOrDuplicateData,
            NetworkError::SendQueueFull => {
                self.disconnect_with_reject(peer, MessageCommand::Reject, "send queue overflow");
                return true;
            }
            _ => return false,
        };
        let threshold_crossed = {
            let mut scores = self.scores_lock();
            scores.entry(peer.addr).or_default().charge(offence)
        };
        if threshold_crossed {
            warn!(addr = %peer.addr, ?offence, "peer banned for misbehaviour");
            self.bans_lock().ban(peer.addr.ip());
            self.disconnect_with_reject(peer, MessageCommand::Reject, "misbehaviour");
        }
        threshold_crossed
    }

    /// Announces an inventory item to every peer that has not seen it.
    pub fn relay_inventory(&self, inventory_type: InventoryType, hash: UInt256) {
        let peers: Vec<Arc<PeerHandle>> = {
            let peers = self.peers_lock();
            peers.values().map(|p| p.handle.clone()).collect()
        };
        for peer in peers {
            if !peer.mark_known(hash) {
                continue;
            }
            let message = Message::Inv(InvPayload::single(inventory_type, hash));
            if peer.try_send(message).is_err() {
                self.disconnect_with_reject(&peer, MessageCommand::Inv, "send queue overflow");
            }
        }
    }

    /// Requests inventory items from every connected peer; used by the
    /// consensus engine to pull proposal transactions it has not seen.
    pub fn request_inventory(&self, inventory_type: InventoryType, hashes: Vec<UInt256>) {
        if hashes.is_empty() {
            return;
        }
        let peers: Vec<Arc<PeerHandle>> = {
            let peers = self.peers_lock();
            peers.values().map(|p| p.handle.clone()).collect()
        };
        for peer in peers {
            let _ = peer.try_send(Message::GetData(InvPayload {
                inventory_type,
                hashes: hashes.clone(),
            }));
        }
    }

    /// Broadcasts a consensus payload directly (not via inv) for latency,
    /// and caches it for `getdata` stragglers.
    pub fn broadcast_extensible(&self, payload: ExtensiblePayload) {
        let hash = payload.hash();
        {
            let mut cache = self.extensible_cache_lock();
            cache.put(hash, payload.clone());
        }
        let peers: Vec<Arc<PeerHandle>> = {
            let peers = self.peers_lock();
            peers.values().map(|p| p.handle.clone()).collect()
        };
        for peer in peers {
            peer.mark_known(hash);
            if peer.try_send(Message::Extensible(payload.clone())).is_err() {
                self.disconnect_with_reject(&peer, MessageCommand::Extensible, "send queue overflow");
            }
        }
    }

    async fn handle_message(
        self: &Arc<Self>,
        peer: &Arc<PeerHandle>,
        message: Message,
    ) -> Result<(), NetworkError> {
        match message {
            Message::Version(_) | Message::Verack => Err(NetworkError::Handshake(
                "handshake message after handshake".into(),
            )),
            Message::Ping(ping) => {
                peer.update_height(ping.last_block_index);
                let pong = PingPayload {
                    last_block_index: self.chain.height().unwrap_or(0),
                    timestamp: ping.timestamp,
                    nonce: ping.nonce,
                };
                let _ = peer.try_send(Message::Pong(pong));
                Ok(())
            }
            Message::Pong(pong) => {
                peer.update_height(pong.last_block_index);
                Ok(())
            }
            Message::GetAddr => {
                // The address book is the live peer table.
                let addresses: Vec<NetworkAddress> = {
                    let peers = self.peers_lock();
                    peers
                        .values()
                        .filter(|p| p.handle.addr != peer.addr)
                        .map(|p| NetworkAddress {
                            timestamp: 0,
                            address: p.handle.addr.ip(),
                            capabilities: vec![
                                crate::payloads::NodeCapability::TcpServer {
                                    port: p.handle.addr.port(),
                                },
                                crate::payloads::NodeCapability::FullNode {
                                    start_height: p.handle.last_known_height(),
                                },
                            ],
                        })
                        .collect()
                };
                if !addresses.is_empty() {
                    let _ = peer.try_send(Message::Addr(AddrPayload { addresses }));
                }
                Ok(())
            }
            Message::Addr(addr_payload) => {
                for address in addr_payload.addresses.iter().take(16) {
                    if let Some(port) = address.port() {
                        let candidate = SocketAddr::new(address.address, port);
                        if !self.refuse_connection(&candidate) {
                            let node = self.clone();
                            tokio::spawn(async move {
                                let _ = node.connect(candidate).await;
                            });
                        }
                    }
                }
                Ok(())
            }
            Message::GetHeaders(request) => self.serve_headers(peer, request),
            Message::Headers(headers) => {
                let count = self.chain.add_headers(headers.headers)?;
                self.sync_lock().on_headers();
                debug!(count, from = %peer.addr, "headers ingested");
                Ok(())
            }
            Message::GetBlocks(request) => {
                let start = self
                    .chain
                    .store()
                    .get_block(&request.hash_start)?
                    .map(|block| block.index());
                if let Some(start) = start {
                    self.serve_blocks(peer, start.saturating_add(1), request.count)?;
                }
                Ok(())
            }
            Message::GetBlockByIndex(request) => {
                self.serve_blocks(peer, request.index_start, request.count)
            }
            Message::Mempool => {
                // Announce everything currently pooled.
                let pooled = self.chain.mempool();
                let mut batch = Vec::new();
                for hash in pooled.sorted_hashes() {
                    batch.push(hash);
                    if batch.len() == MAX_INV_BATCH {
                        let _ = peer.try_send(Message::Inv(InvPayload {
                            inventory_type: InventoryType::Transaction,
                            hashes: std::mem::take(&mut batch),
                        }));
                    }
                }
                if !batch.is_empty() {
                    let _ = peer.try_send(Message::Inv(InvPayload {
                        inventory_type: InventoryType::Transaction,
                        hashes: batch,
                    }));
                }
                Ok(())
            }
            Message::Inv(inv) => {
                for hash in &inv.hashes {
                    peer.mark_known(*hash);
                }
                let unknown = match inv.inventory_type {
                    InventoryType::Transaction => self.chain.mempool().filter_unknown(&inv.hashes),
                    InventoryType::Block => {
                        let mut unknown = Vec::new();
                        for hash in &inv.hashes {
                            if !self.chain.store().contains_block(hash)? {
                                unknown.push(*hash);
                            }
                        }
                        unknown
                    }
                    InventoryType::Extensible => {
                        let mut cache = self.extensible_cache_lock();
                        inv.hashes
                            .iter()
                            .filter(|hash| cache.get(*hash).is_none())
                            .copied()
                            .collect()
                    }
                };
                if !unknown.is_empty() {
                    let _ = peer.try_send(Message::GetData(InvPayload {
                        inventory_type: inv.inventory_type,
                        hashes: unknown,
                    }));
                }
                Ok(())
            }
            Message::GetData(request) => self.serve_data(peer, request),
            Message::NotFound(_) => Ok(()),
            Message::Transaction(tx) => {
                let hash = tx.hash();
                peer.mark_known(hash);
                match self.chain.add_transaction(tx) {
                    Ok(_) => {
                        self.relay_inventory(InventoryType::Transaction, hash);
                        Ok(())
                    }
                    // Duplicates and pool-full are normal gossip noise.
                    Err(MempoolError::Conflict | MempoolError::PoolFull) => Ok(()),
                    Err(MempoolError::InsufficientFee) => Ok(()),
                    Err(MempoolError::Invalid(_)) => {
                        let banned = self
                            .scores_lock()
                            .entry(peer.addr)
                            .or_default()
                            .charge(Offence::InvalidSignature);
                        if banned {
                            self.bans_lock().ban(peer.addr.ip());
                            self.disconnect_with_reject(
                                peer,
                                MessageCommand::Transaction,
                                "invalid transactions",
                            );
                        }
                        Ok(())
                    }
                }
            }
            Message::Block(block) => {
                let hash = block.hash();
                let index = block.index();
                peer.mark_known(hash);
                peer.update_height(index);
                match self.chain.add_block(block, BlockOrigin::Network) {
                    Ok(()) => {
                        self.sync_lock().on_block(index);
                        Ok(())
                    }
                    Err(ChainError::ParentNotFound) => Ok(()), // orphan held, sync will fill
                    Err(ChainError::AlreadyPersisted(_)) => Ok(()),
                    Err(error) if error.is_fatal() => {
                        // Store corruption or a broken local invariant:
                        // stop rather than propagate it to the network.
                        tracing::error!(%error, "fatal chain error, exiting");
                        std::process::exit(2);
                    }
                    Err(error) => Err(error.into()),
                }
            }
            Message::Extensible(payload) => self.handle_extensible(peer, payload).await,
            Message::Reject(reject) => {
                debug!(from = %peer.addr, reason = %reject.reason, "peer rejected us");
                Ok(())
            }
        }
    }

    async fn handle_extensible(
        self: &Arc<Self>,
        peer: &Arc<PeerHandle>,
        payload: ExtensiblePayload,
    ) -> Result<(), NetworkError> {
        let hash = payload.hash();
        peer.mark_known(hash);

        let height = self.chain.height().unwrap_or(0);
        if !payload.is_valid_at(height) {
            // Stale or premature: drop at the envelope, mildly scored.
            self.scores_lock()
                .entry(peer.addr)
                .or_default()
                .charge(Offence::StaleOrDuplicateData);
            return Ok(());
        }
        {
            let mut cache = self.extensible_cache_lock();
            if cache.put(hash, payload.clone()).is_some() {
                return Ok(()); // seen already
            }
        }

        if payload.category == CONSENSUS_CATEGORY {
            let inbox = {
                let guard = self.consensus_inbox_lock();
                guard.clone()
            };
            if let Some(inbox) = inbox {
                if inbox.send(payload.clone()).await.is_err() {
                    debug!("consensus inbox closed, dropping payload");
                }
            }
        }
        self.relay_inventory(InventoryType::Extensible, hash);
        Ok(())
    }

    fn serve_headers(
        &self,
        peer: &PeerHandle,
        request: GetBlockByIndexPayload,
    ) -> Result<(), NetworkError> {
        let count = request.effective_count(crate::sync::HEADER_BATCH as usize);
        let mut headers = Vec::new();
        for index in request.index_start..request.index_start.saturating_add(count as u32) {
            match self.chain.store().get_header_by_index(index)? {
                Some(header) => headers.push(header),
                None => break,
            }
        }
        if !headers.is_empty() {
            let _ = peer.try_send(Message::Headers(HeadersPayload { headers }));
        }
        Ok(())
    }

    fn serve_blocks(
        &self,
        peer: &PeerHandle,
        index_start: u32,
        count: i16,
    ) -> Result<(), NetworkError> {
        let count = GetBlockByIndexPayload {
            index_start,
            count,
        }
        .effective_count(crate::sync::BODY_WINDOW as usize);
        for index in index_start..index_start.saturating_add(count as u32) {
            match self.chain.store().get_block_by_index(index)? {
                Some(block) => {
                    if peer.try_send(Message::Block(block)).is_err() {
                        return Err(NetworkError::SendQueueFull);
                    }
                }
                None => break,
            }
        }
        Ok(())
    }

    fn serve_data(&self, peer: &PeerHandle, request: InvPayload) -> Result<(), NetworkError> {
        let mut missing = Vec::new();
        for hash in &request.hashes {
            let served = match request.inventory_type {
                // The pool is the only transaction source served here: a
                // transaction drained by a persisted block is no longer
                // announced, so it is no longer served.
                InventoryType::Transaction => match self.chain.mempool().get(hash) {
                    Some(tx) => {
                        let tx = tx.as_ref().clone();
                        peer.try_send(Message::Transaction(tx)).is_ok()
                    }
                    None => false,
                },
                InventoryType::Block => match self.chain.store().get_block(hash)? {
                    Some(block) => peer.try_send(Message::Block(block)).is_ok(),
                    None => false,
                },
                InventoryType::Extensible => {
                    let cached = self.extensible_cache_lock().get(hash).cloned();
                    match cached {
                        Some(payload) => peer.try_send(Message::Extensible(payload)).is_ok(),
                        None => false,
                    }
                }
            };
            if !served {
                missing.push(*hash);
            }
        }
        if !missing.is_empty() {
            let _ = peer.try_send(Message::NotFound(InvPayload {
                inventory_type: request.inventory_type,
                hashes: missing,
            }));
        }
        Ok(())
    }

    /// Periodic sync driver.
    async fn sync_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(SYNC_TICK);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = interval.tick() => {}
            }
            let (height, header_height) = match (
                self.chain.height(),
                self.chain.store().header_height(),
            ) {
                (Ok(height), Ok(Some(header_height))) => (height, header_height),
                _ => continue,
            };
            let peer_heights: Vec<(SocketAddr, u32)> = {
                let peers = self.peers_lock();
                peers
                    .values()
                    .map(|p| (p.handle.addr, p.handle.last_known_height()))
                    .collect()
            };
            let requests = {
                let mut sync = self.sync_lock();
                sync.plan(height, header_height, &peer_heights, std::time::Instant::now())
            };
            for request in requests {
                let (addr, message) = match request {
                    SyncRequest::Headers { peer, payload } => {
                        (peer, Message::GetHeaders(payload))
                    }
                    SyncRequest::Bodies { peer, payload } => {
                        (peer, Message::GetBlockByIndex(payload))
                    }
                };
                let handle = {
                    let peers = self.peers_lock();
                    peers.get(&addr).map(|p| p.handle.clone())
                };
                if let Some(handle) = handle {
                    let _ = handle.try_send(message);
                }
            }
        }
    }

    /// Relays chain events to peers: new blocks and admitted transactions
    /// become inventory announcements.
    async fn event_loop(self: Arc<Self>) {
        let mut events = self.chain.events().subscribe();
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => return,
                event = events.recv() => event,
            };
            match event {
                Ok(NodeEvent::BlockPersisted { height, hash }) => {
                    self.relay_inventory(InventoryType::Block, hash);
                    self.sync_lock().on_block(height);
                }
                Ok(NodeEvent::TxAdded { hash }) => {
                    self.relay_inventory(InventoryType::Transaction, hash);
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "event relay lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}

impl std::fmt::Debug for LocalNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNode")
            .field("peers", &self.peer_count())
            .field("magic", &self.protocol.network_magic)
            .finish_non_exhaustive()
    }
}
