//! Duplex forwarding between two legs of a relay pair.
//!
//! A leg is either plaintext or an encrypted link with its own [`Session`]. Each
//! direction runs as its own task; the first task to finish (peer close or error)
//! ends the pump, and the sibling is aborted so that both connections are dropped.
//!
//! Steady-state reads carry no deadline of their own. The idle timeout covers the
//! whole pair: it fires only once neither direction has moved data for that long.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use bytes::Bytes;
use futures::FutureExt;
use tokio::{
    io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    task::{JoinError, JoinSet},
    time::{self, Instant},
};
use tracing::{debug, trace, Instrument};

use crate::{
    consts::{Error, RELAY_BUFFER_SIZE},
    crypto::Session,
    frame::{Deadlines, FrameReader, FrameWriter},
};

/// One side of a relay pair.
pub enum Leg<S> {
    Plain(S),
    Framed(S, Arc<Session>),
}

impl<S> Leg<S>
where
    S: AsyncRead + AsyncWrite,
{
    fn split(self) -> (Source<ReadHalf<S>>, Sink<WriteHalf<S>>) {
        match self {
            Leg::Plain(stream) => {
                let (r, w) = split(stream);
                (
                    Source::Plain(r, vec![0u8; RELAY_BUFFER_SIZE]),
                    Sink::Plain(w),
                )
            }
            Leg::Framed(stream, session) => {
                let (r, w) = split(stream);
                (
                    Source::Framed(FrameReader::new(r, session.clone(), Deadlines::NONE)),
                    Sink::Framed(FrameWriter::new(w, session)),
                )
            }
        }
    }
}

enum Source<R> {
    Plain(R, Vec<u8>),
    Framed(FrameReader<R>),
}

impl<R> Source<R>
where
    R: AsyncRead + Unpin,
{
    /// Next chunk of plaintext, `None` once the peer closed.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, Error> {
        match self {
            Source::Plain(reader, buf) => {
                let n = reader.read(buf).await?;
                if n == 0 {
                    return Ok(None);
                }
                Ok(Some(Bytes::copy_from_slice(&buf[..n])))
            }
            Source::Framed(reader) => Ok(reader.read_frame().await?.map(Bytes::from)),
        }
    }
}

enum Sink<W> {
    Plain(W),
    Framed(FrameWriter<W>),
}

impl<W> Sink<W>
where
    W: AsyncWrite + Unpin,
{
    async fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        match self {
            Sink::Plain(writer) => {
                writer.write_all(data).await?;
                writer.flush().await?;
                Ok(())
            }
            Sink::Framed(writer) => writer.write_frame(data).await,
        }
    }

    async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            Sink::Plain(writer) => writer.shutdown().await,
            Sink::Framed(writer) => writer.shutdown().await,
        }
    }
}

/// Last time either direction of a pair moved data.
struct Activity {
    origin: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Activity {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let ms = self.origin.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(ms, Ordering::Relaxed);
    }

    fn last(&self) -> Instant {
        self.origin + Duration::from_millis(self.last_ms.load(Ordering::Relaxed))
    }
}

/// Ends the pair once it has been quiet in both directions for `idle`.
async fn watch_idle(activity: Arc<Activity>, idle: Duration) -> Result<(), Error> {
    loop {
        time::sleep_until(activity.last() + idle).await;
        if activity.last().elapsed() >= idle {
            return Err(Error::timeout("relay idle", idle));
        }
    }
}

/// Bytes moved in each direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transfer {
    pub a_to_b: u64,
    pub b_to_a: u64,
}

async fn forward<R, W>(
    mut src: Source<R>,
    mut dst: Sink<W>,
    activity: Arc<Activity>,
    counter: Arc<AtomicU64>,
) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = src.next_chunk().await? {
        activity.touch();
        dst.send(&chunk).await?;
        activity.touch();
        counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
    }
    if let Err(e) = dst.shutdown().await {
        debug!("shutdown after peer close: {}", e);
    }
    Ok(())
}

/// Relays between `a` and `b` until either side closes or fails.
///
/// `idle` ends the relay once neither direction has moved data for that long;
/// `None` disables it. A clean close on either side yields the transfer counts;
/// otherwise the first error wins.
pub async fn pump<A, B>(a: Leg<A>, b: Leg<B>, idle: Option<Duration>) -> Result<Transfer, Error>
where
    A: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (a_src, a_sink) = a.split();
    let (b_src, b_sink) = b.split();
    let activity = Arc::new(Activity::new());

    let a_to_b = Arc::new(AtomicU64::new(0));
    let b_to_a = Arc::new(AtomicU64::new(0));

    let mut tasks = JoinSet::new();
    tasks.spawn(
        forward(a_src, b_sink, activity.clone(), a_to_b.clone())
            .map(|r| {
                r.map_err(|e| Error::RelayError {
                    direction: "a -> b",
                    source: Box::new(e),
                })
            })
            .in_current_span(),
    );
    tasks.spawn(
        forward(b_src, a_sink, activity.clone(), b_to_a.clone())
            .map(|r| {
                r.map_err(|e| Error::RelayError {
                    direction: "b -> a",
                    source: Box::new(e),
                })
            })
            .in_current_span(),
    );
    if let Some(idle) = idle {
        tasks.spawn(watch_idle(activity, idle).in_current_span());
    }

    let first = tasks.join_next().await;
    // dropping the sibling's halves closes both connections
    tasks.shutdown().await;

    let transfer = Transfer {
        a_to_b: a_to_b.load(Ordering::Relaxed),
        b_to_a: b_to_a.load(Ordering::Relaxed),
    };

    settle(first, transfer)
}

/// Turns the first finished task into the pump's result. A task that panicked
/// while decrypting or forwarding becomes [`Error::TaskFault`].
fn settle(
    first: Option<Result<Result<(), Error>, JoinError>>,
    transfer: Transfer,
) -> Result<Transfer, Error> {
    match first {
        Some(Ok(Ok(()))) | None => {
            trace!("relay closed, {:?}", transfer);
            Ok(transfer)
        }
        Some(Ok(Err(e))) => {
            debug!(
                "relay interrupted, a -> b {} bytes, b -> a {} bytes: {}",
                transfer.a_to_b, transfer.b_to_a, e
            );
            Err(e)
        }
        Some(Err(join_err)) => Err(Error::TaskFault(join_err.to_string())),
    }
}
