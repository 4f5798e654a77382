//! File transfers
//!
//! Outgoing files are split into fixed-size chunks and emitted one frame
//! at a time, paced per delivery path. Incoming chunks are buffered by
//! index and reassembled once `file-end` arrives with every chunk present.

use std::collections::{BTreeMap, HashMap};

use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{NodeConfig, CHUNK_SIZE};
use crate::error::{Error, Result};
use crate::models::ChatId;
use crate::protocol::{DirectPayload, FileChunk, FileEnd, FileStart};
use crate::router::{deliver, DeliveryPath};
use crate::session::{PeerSessionManager, TransportFactory};
use crate::signaling::SignalingChannel;
use crate::sink::{ChatSink, Notice, ReceivedFile};

/// Number of chunks for a file of `size` bytes
pub fn chunk_count(size: usize) -> u32 {
    size.div_ceil(CHUNK_SIZE) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Sending,
    Receiving,
}

/// A file being sent
#[derive(Debug)]
struct OutgoingTransfer {
    id: Uuid,
    peer_id: Uuid,
    data: Vec<u8>,
    total_chunks: u32,
    next_index: u32,
    path: DeliveryPath,
    /// Session generation a direct transfer is bound to
    session: Option<u64>,
    next_at: Instant,
}

impl OutgoingTransfer {
    fn chunk(&self, index: u32) -> &[u8] {
        let start = index as usize * CHUNK_SIZE;
        let end = (start + CHUNK_SIZE).min(self.data.len());
        &self.data[start..end]
    }
}

/// A file being received
#[derive(Debug)]
struct IncomingTransfer {
    from: Uuid,
    name: String,
    size: u64,
    total_chunks: u32,
    chunks: BTreeMap<u32, Vec<u8>>,
}

impl IncomingTransfer {
    fn progress(&self) -> f32 {
        if self.total_chunks == 0 {
            return 100.0;
        }
        self.chunks.len() as f32 / self.total_chunks as f32 * 100.0
    }
}

/// Owns every transfer buffer, in both directions
#[derive(Debug)]
pub struct FileTransferEngine {
    config: NodeConfig,
    /// Outgoing transfers in start order
    outgoing: Vec<OutgoingTransfer>,
    incoming: HashMap<Uuid, IncomingTransfer>,
}

impl FileTransferEngine {
    pub fn new(config: NodeConfig) -> Self {
        Self {
            config,
            outgoing: Vec::new(),
            incoming: HashMap::new(),
        }
    }

    /// Start sending `data` to the peer of a 1:1 chat.
    ///
    /// The path is chosen by the caller once and kept for every frame of
    /// the transfer. `file-start` goes out immediately; chunks follow on
    /// [`pump`](Self::pump).
    #[allow(clippy::too_many_arguments)]
    pub fn start_send<F: TransportFactory>(
        &mut self,
        sessions: &mut PeerSessionManager<F>,
        signaling: &mut impl SignalingChannel,
        chat: ChatId,
        name: &str,
        data: Vec<u8>,
        path: DeliveryPath,
        now: Instant,
    ) -> Result<Uuid> {
        let peer_id = match chat {
            ChatId::Peer(peer_id) => peer_id,
            ChatId::Room(_) => {
                return Err(Error::InvalidOperation(
                    "Files can only be sent in 1:1 chats".into(),
                ))
            }
        };

        if name.trim().is_empty() {
            return Err(Error::InvalidOperation("File name must not be empty".into()));
        }

        let id = Uuid::new_v4();
        let total_chunks = chunk_count(data.len());
        let start = FileStart {
            id,
            name: name.to_string(),
            size: data.len() as u64,
            total_chunks,
        };

        let session = match path {
            DeliveryPath::Direct => sessions.connected_generation(peer_id),
            DeliveryPath::Relay => None,
        };
        deliver(sessions, signaling, path, peer_id, DirectPayload::FileStart(start))?;

        info!(
            transfer_id = %id,
            peer_id = %peer_id,
            size = data.len(),
            chunks = total_chunks,
            path = ?path,
            "File transfer started"
        );

        self.outgoing.push(OutgoingTransfer {
            id,
            peer_id,
            data,
            total_chunks,
            next_index: 0,
            path,
            session,
            next_at: now,
        });

        Ok(id)
    }

    /// Earliest instant at which an outgoing frame is due
    pub fn next_due(&self) -> Option<Instant> {
        self.outgoing.iter().map(|t| t.next_at).min()
    }

    /// Emit at most one frame for every transfer that is due at `now`.
    ///
    /// Chunks go out in index order, then `file-end`, after which the
    /// transfer is freed. A direct transfer is abandoned without switching
    /// paths once the session it started on is no longer connected, even
    /// if a newer session with the same peer has connected since.
    pub fn pump<F: TransportFactory>(
        &mut self,
        sessions: &mut PeerSessionManager<F>,
        signaling: &mut impl SignalingChannel,
        sink: &mut impl ChatSink,
        now: Instant,
    ) {
        let mut finished = Vec::new();

        for transfer in self.outgoing.iter_mut().filter(|t| t.next_at <= now) {
            if transfer.path == DeliveryPath::Direct
                && sessions.connected_generation(transfer.peer_id) != transfer.session
            {
                warn!(
                    transfer_id = %transfer.id,
                    peer_id = %transfer.peer_id,
                    sent = transfer.next_index,
                    total = transfer.total_chunks,
                    "Direct channel gone, abandoning transfer"
                );
                finished.push(transfer.id);
                continue;
            }

            let payload = if transfer.next_index < transfer.total_chunks {
                let index = transfer.next_index;
                DirectPayload::FileChunk(FileChunk::new(transfer.id, index, transfer.chunk(index)))
            } else {
                DirectPayload::FileEnd(FileEnd { id: transfer.id })
            };
            let is_end = matches!(payload, DirectPayload::FileEnd(_));

            if let Err(e) = deliver(sessions, signaling, transfer.path, transfer.peer_id, payload) {
                warn!(transfer_id = %transfer.id, error = %e, "Frame write failed, abandoning transfer");
                finished.push(transfer.id);
                continue;
            }

            if is_end {
                debug!(transfer_id = %transfer.id, "File transfer sent");
                sink.transfer_progress(transfer.id, 100.0);
                finished.push(transfer.id);
                continue;
            }

            transfer.next_index += 1;
            transfer.next_at = now + self.config.pacing(transfer.path);
            sink.transfer_progress(
                transfer.id,
                transfer.next_index as f32 / transfer.total_chunks as f32 * 100.0,
            );
        }

        self.outgoing.retain(|t| !finished.contains(&t.id));
    }

    /// `file-start`: allocate the receive buffer
    pub fn on_start(&mut self, from: Uuid, meta: FileStart) -> Result<()> {
        let expected = chunk_count(meta.size as usize);
        if meta.total_chunks != expected {
            return Err(Error::MalformedPayload(format!(
                "file {} declares {} chunks for {} bytes",
                meta.id, meta.total_chunks, meta.size
            )));
        }

        if let Some(existing) = self.incoming.get(&meta.id) {
            if existing.from == from
                && existing.size == meta.size
                && existing.total_chunks == meta.total_chunks
            {
                debug!(transfer_id = %meta.id, received = existing.chunks.len(), "Duplicate file-start, keeping buffer");
                return Ok(());
            }
            return Err(Error::MalformedPayload(format!(
                "file-start for {} conflicts with the transfer in progress",
                meta.id
            )));
        }

        debug!(transfer_id = %meta.id, peer_id = %from, name = %meta.name, chunks = meta.total_chunks, "Receiving file");
        self.incoming.insert(
            meta.id,
            IncomingTransfer {
                from,
                name: meta.name,
                size: meta.size,
                total_chunks: meta.total_chunks,
                chunks: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// `file-chunk`: store bytes at their index, in any order
    pub fn on_chunk(&mut self, from: Uuid, chunk: FileChunk, sink: &mut impl ChatSink) -> Result<()> {
        let transfer = self.incoming_from(from, chunk.id)?;

        if chunk.index >= transfer.total_chunks {
            return Err(Error::MalformedPayload(format!(
                "chunk {} of {} out of range ({} chunks)",
                chunk.index, chunk.id, transfer.total_chunks
            )));
        }

        let bytes = chunk.decode_bytes()?;
        if transfer.chunks.insert(chunk.index, bytes).is_some() {
            debug!(transfer_id = %chunk.id, index = chunk.index, "Duplicate chunk overwritten");
        }

        sink.transfer_progress(chunk.id, transfer.progress());
        Ok(())
    }

    /// `file-end`: reassemble when complete, otherwise leave pending
    pub fn on_end(&mut self, from: Uuid, end: FileEnd, sink: &mut impl ChatSink) -> Result<()> {
        let transfer = self.incoming_from(from, end.id)?;

        let received = transfer.chunks.len() as u32;
        let total = transfer.total_chunks;
        if received != total {
            sink.notify(Notice::TransferStalled {
                id: end.id,
                received,
                total,
            });
            return Err(Error::TransferIncomplete {
                id: end.id,
                received,
                total,
            });
        }

        let transfer = match self.incoming.remove(&end.id) {
            Some(transfer) => transfer,
            None => return Err(Error::NotFound(format!("transfer {}", end.id))),
        };

        let data: Vec<u8> = transfer.chunks.into_values().flatten().collect();
        if data.len() as u64 != transfer.size {
            warn!(transfer_id = %end.id, expected = transfer.size, actual = data.len(), "Reassembled size mismatch");
        }

        info!(transfer_id = %end.id, peer_id = %from, size = data.len(), "File received");
        sink.file_received(ReceivedFile {
            id: end.id,
            from: transfer.from,
            name: transfer.name,
            data,
        });
        Ok(())
    }

    /// Direction of a known transfer
    pub fn direction(&self, id: Uuid) -> Option<TransferDirection> {
        if self.outgoing.iter().any(|t| t.id == id) {
            Some(TransferDirection::Sending)
        } else if self.incoming.contains_key(&id) {
            Some(TransferDirection::Receiving)
        } else {
            None
        }
    }

    pub fn outgoing_count(&self) -> usize {
        self.outgoing.len()
    }

    pub fn pending_incoming(&self) -> usize {
        self.incoming.len()
    }

    fn incoming_from(&mut self, from: Uuid, id: Uuid) -> Result<&mut IncomingTransfer> {
        match self.incoming.get_mut(&id) {
            Some(transfer) if transfer.from == from => Ok(transfer),
            Some(_) => Err(Error::MalformedPayload(format!(
                "transfer {} does not belong to {}",
                id, from
            ))),
            None => Err(Error::NotFound(format!("transfer {}", id))),
        }
    }
}
