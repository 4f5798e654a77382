//! Peer session negotiation
//!
//! One [`PeerSession`] per remote user, driven through
//! `Idle -> Negotiating -> Connecting -> Connected -> Closed`, with
//! `Failed` reachable from any negotiation step.
//!
//! Glare (both sides offering at once) is settled by user id: the side
//! with the smaller id keeps its offer, the other side drops its own
//! session and answers.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::invariants::assert_session_invariants;
use crate::protocol::{IceCandidate, Route, SessionDescription, SignalEvent};
use crate::signaling::SignalingChannel;

/// Negotiation state of a peer session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    /// Local offer sent, waiting for the answer
    Negotiating,
    /// Descriptions exchanged, waiting for the channel to open
    Connecting,
    Connected,
    Closed,
    Failed,
}

impl NegotiationState {
    /// Live sessions block creation of a second session for the same peer
    pub fn is_live(self) -> bool {
        matches!(
            self,
            NegotiationState::Negotiating | NegotiationState::Connecting | NegotiationState::Connected
        )
    }
}

/// State of the direct data channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Pending,
    Open,
    Closed,
}

/// Which side produced the offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Offerer,
    Answerer,
}

/// The underlying peer connection.
///
/// Implementations push their asynchronous events (channel open/close,
/// inbound text, local candidates) into the node's event queue.
pub trait PeerTransport {
    fn create_offer(&mut self) -> Result<SessionDescription>;

    /// Apply a remote offer and produce the local answer
    fn accept_offer(&mut self, offer: &SessionDescription) -> Result<SessionDescription>;

    fn apply_answer(&mut self, answer: &SessionDescription) -> Result<()>;

    fn add_candidate(&mut self, candidate: &IceCandidate) -> Result<()>;

    /// Write text to the open data channel
    fn send(&mut self, text: &str) -> Result<()>;

    fn close(&mut self);
}

/// Creates one transport per session
pub trait TransportFactory {
    type Transport: PeerTransport;

    fn create(&mut self, peer_id: Uuid) -> Self::Transport;
}

/// Transport for environments without direct connectivity.
///
/// Every negotiation attempt fails, so sessions end up `Failed` and all
/// traffic takes the relay path.
#[derive(Debug, Default, Clone, Copy)]
pub struct RelayOnly;

#[derive(Debug)]
pub struct RelayOnlyTransport;

impl TransportFactory for RelayOnly {
    type Transport = RelayOnlyTransport;

    fn create(&mut self, _peer_id: Uuid) -> Self::Transport {
        RelayOnlyTransport
    }
}

impl PeerTransport for RelayOnlyTransport {
    fn create_offer(&mut self) -> Result<SessionDescription> {
        Err(Error::Channel("direct channels unavailable".into()))
    }

    fn accept_offer(&mut self, _offer: &SessionDescription) -> Result<SessionDescription> {
        Err(Error::Channel("direct channels unavailable".into()))
    }

    fn apply_answer(&mut self, _answer: &SessionDescription) -> Result<()> {
        Err(Error::Channel("direct channels unavailable".into()))
    }

    fn add_candidate(&mut self, _candidate: &IceCandidate) -> Result<()> {
        Ok(())
    }

    fn send(&mut self, _text: &str) -> Result<()> {
        Err(Error::Channel("direct channels unavailable".into()))
    }

    fn close(&mut self) {}
}

/// Session with one remote peer
pub struct PeerSession<T> {
    peer_id: Uuid,
    /// Distinguishes this session from earlier ones with the same peer
    generation: u64,
    state: NegotiationState,
    channel: ChannelState,
    role: SessionRole,
    transport: T,
    remote_description_set: bool,
    /// Remote candidates waiting for the remote description
    pending_candidates: Vec<IceCandidate>,
    /// Set after glare was won: remote candidates arriving before the
    /// answer belong to the peer's dropped offer
    ignore_until_answer: bool,
}

impl<T: PeerTransport> PeerSession<T> {
    fn new(peer_id: Uuid, generation: u64, role: SessionRole, transport: T) -> Self {
        Self {
            peer_id,
            generation,
            state: NegotiationState::Idle,
            channel: ChannelState::Pending,
            role,
            transport,
            remote_description_set: false,
            pending_candidates: Vec::new(),
            ignore_until_answer: false,
        }
    }

    pub fn peer_id(&self) -> Uuid {
        self.peer_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn remote_description_set(&self) -> bool {
        self.remote_description_set
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    fn fail(&mut self, reason: &str) -> Error {
        warn!(peer_id = %self.peer_id, reason = %reason, "Session failed");
        self.state = NegotiationState::Failed;
        self.channel = ChannelState::Closed;
        self.pending_candidates.clear();
        self.transport.close();
        Error::Negotiation {
            peer_id: self.peer_id,
            reason: reason.to_string(),
        }
    }

    /// Apply buffered candidates once the remote description is set
    fn flush_candidates(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending_candidates);
        if !pending.is_empty() {
            debug!(peer_id = %self.peer_id, count = pending.len(), "Flushing buffered candidates");
        }
        for candidate in &pending {
            if let Err(e) = self.transport.add_candidate(candidate) {
                return Err(self.fail(&e.to_string()));
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.state.is_live() {
            self.transport.close();
        }
        self.state = NegotiationState::Closed;
        self.channel = ChannelState::Closed;
        self.pending_candidates.clear();
    }
}

/// Result of [`PeerSessionManager::open`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// A new session was created and an offer emitted
    Created,
    /// A live session already existed; nothing was sent
    Existing(NegotiationState),
}

/// Result of [`PeerSessionManager::on_remote_offer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    /// Offer applied, answer emitted
    Answered,
    /// Glare: our own offer takes precedence, the remote one was dropped
    KeptLocalOffer,
}

/// Owns every peer session and its transport
pub struct PeerSessionManager<F: TransportFactory> {
    local_id: Uuid,
    factory: F,
    sessions: HashMap<Uuid, PeerSession<F::Transport>>,
    /// Candidates from peers we have no session with yet
    early_candidates: HashMap<Uuid, Vec<IceCandidate>>,
    max_buffered_candidates: usize,
    next_generation: u64,
}

impl<F: TransportFactory> PeerSessionManager<F> {
    pub fn new(local_id: Uuid, factory: F, max_buffered_candidates: usize) -> Self {
        Self {
            local_id,
            factory,
            sessions: HashMap::new(),
            early_candidates: HashMap::new(),
            max_buffered_candidates,
            next_generation: 0,
        }
    }

    pub fn local_id(&self) -> Uuid {
        self.local_id
    }

    /// Set once the relay has assigned our id
    pub fn set_local_id(&mut self, local_id: Uuid) {
        self.local_id = local_id;
    }

    /// Start negotiating with `peer_id` unless a live session exists
    pub fn open(
        &mut self,
        peer_id: Uuid,
        signaling: &mut impl SignalingChannel,
    ) -> Result<OpenOutcome> {
        if peer_id == self.local_id {
            return Err(Error::InvalidOperation(
                "Cannot open a session with yourself".into(),
            ));
        }

        if let Some(existing) = self.sessions.get(&peer_id) {
            if existing.state.is_live() {
                debug!(peer_id = %peer_id, state = ?existing.state, "Session already live");
                return Ok(OpenOutcome::Existing(existing.state));
            }
        }

        // Closed or failed sessions are torn down before a new one exists
        self.teardown(peer_id);

        let mut session = self.create_session(peer_id, SessionRole::Offerer);
        session.pending_candidates = self.early_candidates.remove(&peer_id).unwrap_or_default();

        let offer = match session.transport.create_offer() {
            Ok(offer) => offer,
            Err(e) => {
                let err = session.fail(&e.to_string());
                self.sessions.insert(peer_id, session);
                return Err(err);
            }
        };

        session.state = NegotiationState::Negotiating;
        self.sessions.insert(peer_id, session);

        info!(peer_id = %peer_id, "Sending session offer");
        signaling.send(SignalEvent::Offer {
            route: Route::to(peer_id),
            offer,
        });

        Ok(OpenOutcome::Created)
    }

    /// Handle an offer from a remote peer
    pub fn on_remote_offer(
        &mut self,
        from: Uuid,
        offer: SessionDescription,
        signaling: &mut impl SignalingChannel,
    ) -> Result<OfferOutcome> {
        if let Some(existing) = self.sessions.get(&from) {
            match (existing.state, existing.role) {
                (NegotiationState::Negotiating, SessionRole::Offerer) => {
                    if self.local_id < from {
                        info!(peer_id = %from, "Glare: keeping local offer");
                        if let Some(session) = self.sessions.get_mut(&from) {
                            session.pending_candidates.clear();
                            session.ignore_until_answer = true;
                        }
                        return Ok(OfferOutcome::KeptLocalOffer);
                    }
                    info!(peer_id = %from, "Glare: yielding to remote offer");
                }
                (state, _) if state.is_live() => {
                    warn!(peer_id = %from, state = ?state, "Offer for live session ignored");
                    return Err(Error::ProtocolConflict {
                        peer_id: from,
                        reason: format!("offer received while {:?}", state),
                    });
                }
                _ => {}
            }
        }

        // Candidates buffered by a yielded offer belong to the remote offer
        let mut carried = self
            .sessions
            .get_mut(&from)
            .map(|s| std::mem::take(&mut s.pending_candidates))
            .unwrap_or_default();
        self.teardown(from);

        let mut session = self.create_session(from, SessionRole::Answerer);
        carried.extend(self.early_candidates.remove(&from).unwrap_or_default());
        carried.truncate(self.max_buffered_candidates);
        session.pending_candidates = carried;

        let answer = match session.transport.accept_offer(&offer) {
            Ok(answer) => answer,
            Err(e) => {
                let err = session.fail(&e.to_string());
                self.sessions.insert(from, session);
                return Err(err);
            }
        };

        session.remote_description_set = true;
        session.state = NegotiationState::Connecting;

        info!(peer_id = %from, "Answering session offer");
        signaling.send(SignalEvent::Answer {
            route: Route::to(from),
            answer,
        });

        let flushed = session.flush_candidates();
        assert_session_invariants(&session);
        self.sessions.insert(from, session);
        flushed.map(|_| OfferOutcome::Answered)
    }

    /// Handle the answer to our offer
    pub fn on_remote_answer(&mut self, from: Uuid, answer: SessionDescription) -> Result<()> {
        let session = self.sessions.get_mut(&from).ok_or_else(|| Error::ProtocolConflict {
            peer_id: from,
            reason: "answer without a session".into(),
        })?;

        if session.state != NegotiationState::Negotiating || session.role != SessionRole::Offerer {
            debug!(peer_id = %from, state = ?session.state, "Stale answer ignored");
            return Err(Error::ProtocolConflict {
                peer_id: from,
                reason: format!("answer received while {:?}", session.state),
            });
        }

        if let Err(e) = session.transport.apply_answer(&answer) {
            return Err(session.fail(&e.to_string()));
        }

        session.remote_description_set = true;
        session.ignore_until_answer = false;
        session.state = NegotiationState::Connecting;
        debug!(peer_id = %from, "Answer applied");

        session.flush_candidates()?;
        assert_session_invariants(session);
        Ok(())
    }

    /// Handle a remote candidate, buffering it until it can be applied
    pub fn on_remote_candidate(&mut self, from: Uuid, candidate: IceCandidate) -> Result<()> {
        let limit = self.max_buffered_candidates;

        let buffer = match self.sessions.get_mut(&from) {
            Some(session) if session.state.is_live() => {
                if session.remote_description_set {
                    if let Err(e) = session.transport.add_candidate(&candidate) {
                        return Err(session.fail(&e.to_string()));
                    }
                    return Ok(());
                }
                if session.ignore_until_answer {
                    debug!(peer_id = %from, "Candidate for dropped remote offer discarded");
                    return Ok(());
                }
                &mut session.pending_candidates
            }
            _ => self.early_candidates.entry(from).or_default(),
        };

        if buffer.len() >= limit {
            warn!(peer_id = %from, limit = limit, "Candidate buffer full, dropping candidate");
            return Ok(());
        }

        buffer.push(candidate);
        debug!(peer_id = %from, buffered = buffer.len(), "Candidate buffered");
        Ok(())
    }

    /// Forward a candidate gathered by our transport
    pub fn on_local_candidate(
        &mut self,
        peer_id: Uuid,
        candidate: IceCandidate,
        signaling: &mut impl SignalingChannel,
    ) {
        match self.sessions.get(&peer_id) {
            Some(session) if session.state.is_live() => {
                signaling.send(SignalEvent::Ice {
                    route: Route::to(peer_id),
                    candidate,
                });
            }
            _ => debug!(peer_id = %peer_id, "Local candidate for inactive session dropped"),
        }
    }

    /// Direct channel opened. Returns true on a state change.
    pub fn on_channel_open(&mut self, peer_id: Uuid) -> bool {
        match self.sessions.get_mut(&peer_id) {
            Some(session) if session.state == NegotiationState::Connecting => {
                session.state = NegotiationState::Connected;
                session.channel = ChannelState::Open;
                assert_session_invariants(session);
                info!(peer_id = %peer_id, "Direct channel open");
                true
            }
            Some(session) => {
                debug!(peer_id = %peer_id, state = ?session.state, "Channel open ignored");
                false
            }
            None => false,
        }
    }

    /// Direct channel closed. Returns true on a state change.
    pub fn on_channel_close(&mut self, peer_id: Uuid) -> bool {
        match self.sessions.get_mut(&peer_id) {
            Some(session) if session.state.is_live() => {
                session.shutdown();
                info!(peer_id = %peer_id, "Direct channel closed");
                true
            }
            _ => false,
        }
    }

    /// Transport reported an unrecoverable error
    pub fn on_transport_failed(&mut self, peer_id: Uuid, reason: &str) -> bool {
        match self.sessions.get_mut(&peer_id) {
            Some(session) if session.state.is_live() => {
                session.fail(reason);
                true
            }
            _ => false,
        }
    }

    /// Write text to the direct channel of a connected session
    pub fn send(&mut self, peer_id: Uuid, text: &str) -> Result<()> {
        let session = self
            .sessions
            .get_mut(&peer_id)
            .filter(|s| s.state == NegotiationState::Connected)
            .ok_or_else(|| Error::Channel(format!("no open channel to {}", peer_id)))?;

        if let Err(e) = session.transport.send(text) {
            warn!(peer_id = %peer_id, error = %e, "Direct send failed, closing session");
            session.shutdown();
            return Err(e);
        }
        Ok(())
    }

    /// Close a session locally
    pub fn close(&mut self, peer_id: Uuid) {
        if let Some(session) = self.sessions.get_mut(&peer_id) {
            session.shutdown();
            debug!(peer_id = %peer_id, "Session closed locally");
        }
    }

    /// Drop every session whose peer is not in `present`
    pub fn retain_peers(&mut self, present: &HashSet<Uuid>) -> Vec<Uuid> {
        let gone: Vec<Uuid> = self
            .sessions
            .keys()
            .filter(|id| !present.contains(id))
            .copied()
            .collect();

        for peer_id in &gone {
            self.teardown(*peer_id);
            debug!(peer_id = %peer_id, "Peer left relay, session removed");
        }
        self.early_candidates.retain(|id, _| present.contains(id));

        gone
    }

    pub fn session(&self, peer_id: Uuid) -> Option<&PeerSession<F::Transport>> {
        self.sessions.get(&peer_id)
    }

    pub fn state(&self, peer_id: Uuid) -> NegotiationState {
        self.sessions
            .get(&peer_id)
            .map(|s| s.state)
            .unwrap_or(NegotiationState::Idle)
    }

    pub fn is_connected(&self, peer_id: Uuid) -> bool {
        self.state(peer_id) == NegotiationState::Connected
    }

    /// Generation of the connected session with `peer_id`, if any
    pub fn connected_generation(&self, peer_id: Uuid) -> Option<u64> {
        self.sessions
            .get(&peer_id)
            .filter(|s| s.state == NegotiationState::Connected)
            .map(|s| s.generation)
    }

    /// Number of live sessions across all peers
    pub fn live_count(&self) -> usize {
        self.sessions.values().filter(|s| s.state.is_live()).count()
    }

    /// Number of candidates buffered for a peer without a session
    pub fn early_candidates(&self, peer_id: Uuid) -> usize {
        self.early_candidates.get(&peer_id).map_or(0, Vec::len)
    }

    fn create_session(&mut self, peer_id: Uuid, role: SessionRole) -> PeerSession<F::Transport> {
        self.next_generation += 1;
        let transport = self.factory.create(peer_id);
        PeerSession::new(peer_id, self.next_generation, role, transport)
    }

    fn teardown(&mut self, peer_id: Uuid) {
        if let Some(mut previous) = self.sessions.remove(&peer_id) {
            previous.shutdown();
        }
    }
}
