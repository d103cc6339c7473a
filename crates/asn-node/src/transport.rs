//! The secure segment transport.
//!
//! One transport wraps one full-duplex stream and owns one box. Two
//! independent pumps run as background tasks:
//!
//! - the **rx pump** reads `[header][ciphertext]` segments, opens each with
//!   the current box, reassembles PDUs (spilling oversize ones to a temp
//!   file), and pushes completed PDUs onto the bounded inbound queue;
//! - the **tx pump** dequeues `(PDU, box)` pairs, chunks each PDU into
//!   segments, seals with the *pair's* box, and writes framed segments.
//!
//! The box is captured at enqueue time: a login ack queued under the
//! pre-login box is transmitted under it even if the box is swapped before
//! the tx pump drains the queue. Enqueues after the swap see the new box.
//!
//! States move forward only: `Opened → Provisional → Established → Closed`.
//! Any I/O or crypto error drives the transport to `Closed`, which surfaces
//! exactly once as the closure of the inbound queue.

use std::sync::{
    Arc, Mutex as StdMutex, MutexGuard, PoisonError,
    atomic::{AtomicU8, Ordering},
};
use std::time::Duration;

use asn_crypto::{BOX_OVERHEAD, CryptoBox};
use asn_proto::{MAX_SEG_SZ, Pdu, PubEncr, SEG_HDR_LEN, SecEncr, SegHeader, Version, max_chunk};
use asn_repo::TmpStore;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::{Mutex as AsyncMutex, Notify, mpsc},
};

use crate::error::TransportError;

/// Depth of the inbound and outbound queues; backpressure past this.
pub const QUEUE_DEPTH: usize = 4;

/// Per-read/write deadline when deadlines are enabled.
pub const CONN_TIMEOUT: Duration = Duration::from_millis(200);

/// In-memory reassembly budget; a PDU that outgrows it spills to disk.
const SPILL_THRESHOLD: usize = MAX_SEG_SZ;

/// Transport lifecycle states; transitions are forward-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum State {
    /// Stream attached, no login yet
    Opened = 0,
    /// Login sent, awaiting the peer's ack
    Provisional = 1,
    /// Peer acked the login
    Established = 2,
    /// Terminal; reuse requires reset and reattachment
    Closed = 3,
}

impl State {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Opened,
            1 => Self::Provisional,
            2 => Self::Established,
            _ => Self::Closed,
        }
    }
}

type SharedBox = Arc<StdMutex<CryptoBox>>;

/// An outbound PDU paired with the box it was enqueued under.
struct PduBox {
    pdu: Pdu,
    seal_box: SharedBox,
}

/// State shared between the handle and both pumps.
struct Shared {
    state: AtomicU8,
    version: AtomicU8,
    box_slot: StdMutex<SharedBox>,
    peer_name: StdMutex<String>,
    rx_err: StdMutex<Option<String>>,
    tx_err: StdMutex<Option<String>>,
    shutdown: Notify,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == State::Closed as u8
    }

    fn close(&self) {
        self.state.fetch_max(State::Closed as u8, Ordering::AcqRel);
        self.shutdown.notify_waiters();
    }

    fn current_box(&self) -> SharedBox {
        Arc::clone(&lock(&self.box_slot))
    }
}

fn lock<T>(m: &StdMutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builder for a transport; see [`Transport::builder`].
///
/// Replaces an untyped dynamic setter with methods checked at compile time:
/// the box is mandatory, everything else has defaults.
pub struct TransportBuilder {
    seal_box: Option<CryptoBox>,
    tmp: Option<TmpStore>,
    peer_name: String,
    max_version: Version,
    with_deadline: bool,
}

impl TransportBuilder {
    /// Install the pre-login box. Mandatory.
    #[must_use]
    pub fn with_box(mut self, b: CryptoBox) -> Self {
        self.seal_box = Some(b);
        self
    }

    /// Attach a temp store for PDU spill. Without one, oversize PDUs stay
    /// in memory.
    #[must_use]
    pub fn with_tmp(mut self, tmp: TmpStore) -> Self {
        self.tmp = Some(tmp);
        self
    }

    /// Name the peer for diagnostics.
    #[must_use]
    pub fn with_peer_name(mut self, name: impl Into<String>) -> Self {
        self.peer_name = name.into();
        self
    }

    /// Cap the local protocol version (down-negotiation starts here).
    #[must_use]
    pub fn with_max_version(mut self, v: Version) -> Self {
        self.max_version = v;
        self
    }

    /// Enable the per-read/write deadline with transparent retry.
    #[must_use]
    pub fn with_deadline(mut self, enabled: bool) -> Self {
        self.with_deadline = enabled;
        self
    }

    /// Attach the stream and start both pumps.
    ///
    /// # Errors
    ///
    /// [`TransportError::NoBox`] if no box was installed.
    pub fn attach<S>(self, stream: S) -> Result<Transport, TransportError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let seal_box = self.seal_box.ok_or(TransportError::NoBox)?;

        let shared = Arc::new(Shared {
            state: AtomicU8::new(State::Opened as u8),
            version: AtomicU8::new(self.max_version.0),
            box_slot: StdMutex::new(Arc::new(StdMutex::new(seal_box))),
            peer_name: StdMutex::new(self.peer_name),
            rx_err: StdMutex::new(None),
            tx_err: StdMutex::new(None),
            shutdown: Notify::new(),
        });

        let (in_tx, in_rx) = mpsc::channel(QUEUE_DEPTH);
        let (out_tx, out_rx) = mpsc::channel(QUEUE_DEPTH);

        let (r, w) = tokio::io::split(stream);
        tokio::spawn(rx_pump(r, Arc::clone(&shared), self.tmp, in_tx, self.with_deadline));
        tokio::spawn(tx_pump(w, Arc::clone(&shared), out_rx, self.with_deadline));

        Ok(Transport { shared, inbound: AsyncMutex::new(in_rx), outbound: out_tx })
    }
}

/// Handle to one secure segment transport.
pub struct Transport {
    shared: Arc<Shared>,
    inbound: AsyncMutex<mpsc::Receiver<Pdu>>,
    outbound: mpsc::Sender<PduBox>,
}

impl Transport {
    /// Start building a transport.
    #[must_use]
    pub fn builder() -> TransportBuilder {
        TransportBuilder {
            seal_box: None,
            tmp: None,
            peer_name: String::new(),
            max_version: Version::LATEST,
            with_deadline: false,
        }
    }

    /// Receive the next reassembled PDU. `None` once the transport closed
    /// and the queue drained.
    pub async fn recv(&self) -> Option<Pdu> {
        self.inbound.lock().await.recv().await
    }

    /// Queue a PDU for segmentation, sealing, and transmission.
    ///
    /// The current box is captured now; a later [`Transport::rekey_login`]
    /// does not re-encrypt PDUs already queued.
    pub async fn send(&self, pdu: Pdu) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let seal_box = self.shared.current_box();
        self.outbound
            .send(PduBox { pdu, seal_box })
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Non-blocking enqueue for sync contexts (replication dispatch).
    /// A full queue drops the PDU with a diagnostic.
    pub fn try_send(&self, pdu: Pdu) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let seal_box = self.shared.current_box();
        self.outbound
            .try_send(PduBox { pdu, seal_box })
            .map_err(|_| TransportError::Closed)
    }

    /// Swap in the post-login box.
    ///
    /// The old box stays paired with PDUs already queued; the swap only
    /// affects later enqueues and the rx pump's next segment.
    pub fn rekey_login(&self, our_sec: &SecEncr, peer_pub: &PubEncr) {
        let mut slot = lock(&self.shared.box_slot);
        let next = lock(&slot).login_rekey(our_sec, peer_pub);
        *slot = Arc::new(StdMutex::new(next));
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> State {
        State::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Whether the transport reached its terminal state.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Advance to `Provisional` (login sent). No-op if already past it.
    pub fn set_provisional(&self) {
        self.shared.state.fetch_max(State::Provisional as u8, Ordering::AcqRel);
    }

    /// Advance to `Established` (peer acked). No-op if already closed.
    pub fn set_established(&self) {
        self.shared.state.fetch_max(State::Established as u8, Ordering::AcqRel);
    }

    /// Effective protocol version: `min(local, all peer announcements)`.
    #[must_use]
    pub fn version(&self) -> Version {
        Version(self.shared.version.load(Ordering::Acquire))
    }

    /// Fold a peer version announcement into the effective version.
    /// Announcements can only lower it.
    pub fn set_version(&self, peer: Version) {
        self.shared.version.fetch_min(peer.0, Ordering::AcqRel);
    }

    /// Peer name for diagnostics.
    #[must_use]
    pub fn peer_name(&self) -> String {
        lock(&self.shared.peer_name).clone()
    }

    /// Rename the peer (post-login identity).
    pub fn set_peer_name(&self, name: impl Into<String>) {
        *lock(&self.shared.peer_name) = name.into();
    }

    /// First rx pump error, if any.
    #[must_use]
    pub fn rx_error(&self) -> Option<String> {
        lock(&self.shared.rx_err).clone()
    }

    /// First tx pump error, if any.
    #[must_use]
    pub fn tx_error(&self) -> Option<String> {
        lock(&self.shared.tx_err).clone()
    }

    /// Release the stream and restore the pre-connected state: both pumps
    /// are told to exit, the peer name clears, and the state is terminal.
    /// Idempotent.
    pub fn reset(&self) {
        tracing::debug!(peer = %self.peer_name(), "transport reset");
        self.shared.close();
        *lock(&self.shared.peer_name) = String::new();
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("state", &self.state())
            .field("version", &self.version())
            .field("peer", &self.peer_name())
            .finish_non_exhaustive()
    }
}

/// Read until `buf` is full. Deadline expiry retries; closure or EOF
/// reports end-of-stream.
async fn read_full<R: AsyncRead + Unpin>(
    r: &mut R,
    buf: &mut [u8],
    shared: &Shared,
    deadline: bool,
) -> Result<(), TransportError> {
    let mut n = 0;
    while n < buf.len() {
        if shared.is_closed() {
            return Err(TransportError::Eof);
        }
        let read = async {
            if deadline {
                match tokio::time::timeout(CONN_TIMEOUT, r.read(&mut buf[n..])).await {
                    Ok(res) => Some(res),
                    Err(_) => None, // timer expiry, retried transparently
                }
            } else {
                Some(r.read(&mut buf[n..]).await)
            }
        };
        tokio::select! {
            () = shared.shutdown.notified() => return Err(TransportError::Eof),
            res = read => match res {
                None => {},
                Some(Ok(0)) => return Err(TransportError::Eof),
                Some(Ok(i)) => n += i,
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }
    Ok(())
}

/// Write all of `buf`, with the same deadline-retry semantics as
/// [`read_full`].
async fn write_full<W: AsyncWrite + Unpin>(
    w: &mut W,
    buf: &[u8],
    shared: &Shared,
    deadline: bool,
) -> Result<(), TransportError> {
    let mut n = 0;
    while n < buf.len() {
        if shared.is_closed() {
            return Err(TransportError::Eof);
        }
        let res = if deadline {
            match tokio::time::timeout(CONN_TIMEOUT, w.write(&buf[n..])).await {
                Ok(res) => res,
                Err(_) => continue,
            }
        } else {
            w.write(&buf[n..]).await
        };
        match res {
            Ok(0) => return Err(TransportError::Eof),
            Ok(i) => n += i,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Receive, open, and reassemble segmented PDUs onto the inbound queue
/// until error or EOF; then record the error, close the queue, and mark the
/// transport closed.
async fn rx_pump<R: AsyncRead + Unpin>(
    mut r: R,
    shared: Arc<Shared>,
    tmp: Option<TmpStore>,
    queue: mpsc::Sender<Pdu>,
    deadline: bool,
) {
    let result = rx_loop(&mut r, &shared, tmp.as_ref(), &queue, deadline).await;
    if let Err(e) = result {
        if !matches!(e, TransportError::Eof | TransportError::Closed) {
            tracing::debug!(peer = %lock(&shared.peer_name), "rx: {e}");
        }
        *lock(&shared.rx_err) = Some(e.to_string());
    }
    shared.close();
    // dropping `queue` closes the inbound side
}

async fn rx_loop<R: AsyncRead + Unpin>(
    r: &mut R,
    shared: &Shared,
    tmp: Option<&TmpStore>,
    queue: &mpsc::Sender<Pdu>,
    deadline: bool,
) -> Result<(), TransportError> {
    let mut pdu = Pdu::new();
    let mut red = Vec::with_capacity(MAX_SEG_SZ);
    loop {
        let mut raw = [0u8; SEG_HDR_LEN];
        read_full(r, &mut raw, shared, deadline).await?;
        let hdr = SegHeader::decode(raw)?;

        red.resize(hdr.len as usize, 0);
        read_full(r, &mut red, shared, deadline).await?;

        let mut black = Vec::with_capacity(red.len());
        {
            let seal_box = shared.current_box();
            let mut guard = lock(&seal_box);
            guard.open(&red, &mut black)?;
        }
        std::io::Write::write_all(&mut pdu, &black)?;

        if hdr.more {
            // Oversize reassembly moves onto a temp file exactly once.
            if let Some(tmp) = tmp {
                if !pdu.is_spilled() && pdu.len() >= SPILL_THRESHOLD {
                    pdu.spill_into(tmp.create()?)?;
                }
            }
        } else {
            tokio::select! {
                () = shared.shutdown.notified() => return Err(TransportError::Eof),
                res = queue.send(pdu) => {
                    if res.is_err() {
                        return Err(TransportError::Closed);
                    }
                },
            }
            pdu = Pdu::new();
        }
    }
}

/// Pull `(PDU, box)` pairs from the outbound queue, segment, seal, and
/// send. Stops and shuts the stream down on error or a closed queue.
async fn tx_pump<W: AsyncWrite + Unpin>(
    mut w: W,
    shared: Arc<Shared>,
    mut queue: mpsc::Receiver<PduBox>,
    deadline: bool,
) {
    let result = tx_loop(&mut w, &shared, &mut queue, deadline).await;
    if let Err(e) = result {
        if !matches!(e, TransportError::Eof | TransportError::Closed) {
            tracing::debug!(peer = %lock(&shared.peer_name), "tx: {e}");
        }
        *lock(&shared.tx_err) = Some(e.to_string());
    }
    shared.close();
    let _ = w.shutdown().await;
}

async fn tx_loop<W: AsyncWrite + Unpin>(
    w: &mut W,
    shared: &Shared,
    queue: &mut mpsc::Receiver<PduBox>,
    deadline: bool,
) -> Result<(), TransportError> {
    let max_black = max_chunk(BOX_OVERHEAD);
    loop {
        if shared.is_closed() {
            return Err(TransportError::Eof);
        }
        let mut pb = tokio::select! {
            () = shared.shutdown.notified() => return Err(TransportError::Eof),
            next = queue.recv() => match next {
                Some(pb) => pb,
                None => break,
            },
        };
        let mut black = vec![0u8; max_black];
        while !pb.pdu.is_empty() {
            let n = pb.pdu.len().min(max_black);
            std::io::Read::read_exact(&mut pb.pdu, &mut black[..n]).map_err(TransportError::Io)?;
            let more = !pb.pdu.is_empty();

            let mut red = Vec::with_capacity(SEG_HDR_LEN + n + BOX_OVERHEAD);
            SegHeader::new(more, n + BOX_OVERHEAD)?.put(&mut red);
            {
                let mut guard = lock(&pb.seal_box);
                guard.seal(&black[..n], &mut red)?;
            }
            write_full(w, &red, shared, deadline).await?;
        }
    }
    tracing::debug!("tx queue closed");
    Ok(())
}
