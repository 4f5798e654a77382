//! In-memory transport and sink used by unit tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{ChatId, ChatMessage};
use crate::protocol::{IceCandidate, SessionDescription};
use crate::session::{PeerTransport, TransportFactory};
use crate::sink::{ChatSink, Notice, ReceivedFile};

/// Everything a mock transport saw
#[derive(Debug, Default)]
pub struct MockLink {
    pub candidates: Vec<IceCandidate>,
    pub sent: Vec<String>,
    pub closed: bool,
}

/// Failure switches shared by every transport of a factory
#[derive(Debug, Default)]
pub struct MockBehavior {
    pub fail_offer: bool,
    pub fail_accept: bool,
    pub fail_answer: bool,
    pub fail_send: bool,
}

#[derive(Clone, Default)]
pub struct MockFactory {
    links: Arc<Mutex<HashMap<Uuid, Arc<Mutex<MockLink>>>>>,
    created: Arc<Mutex<HashMap<Uuid, usize>>>,
    behavior: Arc<Mutex<MockBehavior>>,
}

impl MockFactory {
    pub fn behavior(&self) -> MutexGuard<'_, MockBehavior> {
        self.behavior.lock().unwrap()
    }

    /// Link of the most recent transport created for a peer
    pub fn link(&self, peer_id: Uuid) -> Arc<Mutex<MockLink>> {
        self.links.lock().unwrap()[&peer_id].clone()
    }

    pub fn created(&self, peer_id: Uuid) -> usize {
        self.created.lock().unwrap().get(&peer_id).copied().unwrap_or(0)
    }

    pub fn sent(&self, peer_id: Uuid) -> Vec<String> {
        self.link(peer_id).lock().unwrap().sent.clone()
    }
}

impl TransportFactory for MockFactory {
    type Transport = MockTransport;

    fn create(&mut self, peer_id: Uuid) -> MockTransport {
        let link = Arc::new(Mutex::new(MockLink::default()));
        self.links.lock().unwrap().insert(peer_id, link.clone());
        *self.created.lock().unwrap().entry(peer_id).or_default() += 1;
        MockTransport {
            link,
            behavior: self.behavior.clone(),
        }
    }
}

pub struct MockTransport {
    link: Arc<Mutex<MockLink>>,
    behavior: Arc<Mutex<MockBehavior>>,
}

impl PeerTransport for MockTransport {
    fn create_offer(&mut self) -> Result<SessionDescription> {
        if self.behavior.lock().unwrap().fail_offer {
            return Err(Error::Channel("offer refused".into()));
        }
        Ok(SessionDescription::offer("v=0 mock-offer"))
    }

    fn accept_offer(&mut self, _offer: &SessionDescription) -> Result<SessionDescription> {
        if self.behavior.lock().unwrap().fail_accept {
            return Err(Error::Channel("offer rejected".into()));
        }
        Ok(SessionDescription::answer("v=0 mock-answer"))
    }

    fn apply_answer(&mut self, _answer: &SessionDescription) -> Result<()> {
        if self.behavior.lock().unwrap().fail_answer {
            return Err(Error::Channel("answer rejected".into()));
        }
        Ok(())
    }

    fn add_candidate(&mut self, candidate: &IceCandidate) -> Result<()> {
        self.link.lock().unwrap().candidates.push(candidate.clone());
        Ok(())
    }

    fn send(&mut self, text: &str) -> Result<()> {
        if self.behavior.lock().unwrap().fail_send {
            return Err(Error::Channel("channel write failed".into()));
        }
        self.link.lock().unwrap().sent.push(text.to_string());
        Ok(())
    }

    fn close(&mut self) {
        self.link.lock().unwrap().closed = true;
    }
}

/// Sink that records every callback
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub displayed: Vec<(ChatId, ChatMessage, bool)>,
    pub persisted: Vec<(ChatId, ChatMessage)>,
    pub files: Vec<ReceivedFile>,
    pub progress: Vec<(Uuid, f32)>,
    pub notices: Vec<Notice>,
}

impl ChatSink for RecordingSink {
    fn display(&mut self, chat: ChatId, message: &ChatMessage, outgoing: bool) {
        self.displayed.push((chat, message.clone(), outgoing));
    }

    fn persist(&mut self, chat: ChatId, message: &ChatMessage) {
        self.persisted.push((chat, message.clone()));
    }

    fn file_received(&mut self, file: ReceivedFile) {
        self.files.push(file);
    }

    fn transfer_progress(&mut self, id: Uuid, percent: f32) {
        self.progress.push((id, percent));
    }

    fn notify(&mut self, notice: Notice) {
        self.notices.push(notice);
    }
}
