//! Length-prefixed AEAD frames.
//!
//! An encrypted link starts with the initiator's bare salt, followed by any number of frames:
//!
//! [nonce][length][ciphertext + tag]
//!
//! The nonce is random per frame and authenticated but not encrypted. `length` is a
//! big-endian u16 counting the ciphertext including its tag, so it is never zero.

use std::{future::Future, io, sync::Arc, time::Duration};

use bytes::{BufMut, BytesMut};
use ring::aead::NONCE_LEN;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::{
    consts::{Error, HANDSHAKE_BODY_TIMEOUT, HANDSHAKE_HEADER_TIMEOUT, MAX_FRAME_LEN, SALT_LEN},
    crypto::{CipherKind, Session},
};

/// Per-phase read deadlines. `None` waits forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    /// Salt, nonce and length fields.
    pub header: Option<Duration>,
    /// Ciphertext.
    pub body: Option<Duration>,
}

impl Deadlines {
    pub const HANDSHAKE: Deadlines = Deadlines {
        header: Some(HANDSHAKE_HEADER_TIMEOUT),
        body: Some(HANDSHAKE_BODY_TIMEOUT),
    };

    pub const NONE: Deadlines = Deadlines {
        header: None,
        body: None,
    };
}

pub(crate) async fn with_deadline<T, F>(
    deadline: Option<Duration>,
    phase: &'static str,
    fut: F,
) -> Result<T, Error>
where
    F: Future<Output = io::Result<T>>,
{
    match deadline {
        Some(after) => match tokio::time::timeout(after, fut).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(Error::timeout(phase, after)),
        },
        None => Ok(fut.await?),
    }
}

/// Fills `buf` completely. Returns `false` if the stream ended before the first byte.
async fn read_exact_or_eof<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        filled += n;
    }
    Ok(true)
}

pub async fn read_salt<R>(reader: &mut R, deadline: Option<Duration>) -> Result<[u8; SALT_LEN], Error>
where
    R: AsyncRead + Unpin,
{
    let mut salt = [0u8; SALT_LEN];
    with_deadline(deadline, "read salt", reader.read_exact(&mut salt)).await?;
    Ok(salt)
}

/// Reads one frame and returns its plaintext, or `None` if the peer closed the
/// stream on a frame boundary.
pub async fn read_frame<R>(
    reader: &mut R,
    session: &Session,
    deadlines: Deadlines,
) -> Result<Option<Vec<u8>>, Error>
where
    R: AsyncRead + Unpin,
{
    let nonce_len = session.nonce_len();
    let mut header = [0u8; NONCE_LEN + 2];
    let header = &mut header[..nonce_len + 2];

    if !with_deadline(
        deadlines.header,
        "read frame header",
        read_exact_or_eof(reader, header),
    )
    .await?
    {
        return Ok(None);
    }

    let (nonce, length) = header.split_at(nonce_len);
    let length = check_length(session, length)?;

    let mut ciphertext = vec![0u8; length];
    with_deadline(
        deadlines.body,
        "read frame body",
        reader.read_exact(&mut ciphertext),
    )
    .await?;

    let plaintext = session.open(nonce, &ciphertext)?;
    trace!("read frame: {} bytes ciphertext, {} bytes plaintext", length, plaintext.len());
    Ok(Some(plaintext))
}

fn check_length(session: &Session, field: &[u8]) -> Result<usize, Error> {
    let length = u16::from_be_bytes([field[0], field[1]]) as usize;
    if length == 0 || length > MAX_FRAME_LEN {
        return Err(Error::InvalidFrameLength(length));
    }
    if length < session.overhead() {
        return Err(Error::CiphertextTooShort {
            len: length,
            min: session.overhead(),
        });
    }
    Ok(length)
}

/// Fills `buf`, tolerating up to `attempts - 1` expiries of `deadline`. Bytes read
/// before an expiry are kept, so the next attempt resumes where the last one stopped.
pub async fn read_exact_retrying<R>(
    reader: &mut R,
    buf: &mut [u8],
    deadline: Option<Duration>,
    attempts: usize,
    phase: &'static str,
) -> Result<(), Error>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    let mut attempt = 1;
    loop {
        let fill = async {
            while filled < buf.len() {
                let n = reader.read(&mut buf[filled..]).await?;
                if n == 0 {
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
                filled += n;
            }
            Ok::<(), io::Error>(())
        };
        let res = with_deadline(deadline, phase, fill).await;
        match res {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempt < attempts => {
                debug!("{} (attempt {}/{}), {} bytes so far, retrying", e, attempt, attempts, filled);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Responder side of session bootstrap: reads the peer's salt, derives the session and
/// returns it with the plaintext of the first frame. Each read gets the handshake
/// deadlines and up to `attempts` tries.
pub async fn read_handshake<R>(
    reader: &mut R,
    password: &str,
    method: CipherKind,
    attempts: usize,
) -> Result<(Session, Vec<u8>), Error>
where
    R: AsyncRead + Unpin,
{
    let deadlines = Deadlines::HANDSHAKE;
    let mut salt = [0u8; SALT_LEN];
    read_exact_retrying(reader, &mut salt, deadlines.header, attempts, "read salt").await?;
    let session = Session::from_salt(password, method, &salt)?;

    let nonce_len = session.nonce_len();
    let mut header = [0u8; NONCE_LEN + 2];
    let header = &mut header[..nonce_len + 2];
    read_exact_retrying(reader, header, deadlines.header, attempts, "read frame header")
        .await?;
    let (nonce, length) = header.split_at(nonce_len);
    let length = check_length(&session, length)?;

    let mut ciphertext = vec![0u8; length];
    read_exact_retrying(reader, &mut ciphertext, deadlines.body, attempts, "read frame body")
        .await?;
    let first = session.open(nonce, &ciphertext)?;
    Ok((session, first))
}

/// Appends the frames carrying `plaintext` to `buf`, splitting it when a single
/// frame would overflow the length field. Empty input still yields one frame.
pub fn encode_frames(session: &Session, plaintext: &[u8], buf: &mut BytesMut) -> Result<(), Error> {
    let max = session.kind().max_payload_size();
    let mut chunks = plaintext.chunks(max);
    let first = chunks.next().unwrap_or(&[]);

    for chunk in std::iter::once(first).chain(chunks) {
        let nonce = session.random_nonce();
        let ciphertext = session.seal(&nonce, chunk)?;
        buf.reserve(nonce.len() + 2 + ciphertext.len());
        buf.put_slice(&nonce);
        buf.put_u16(ciphertext.len() as u16);
        buf.put_slice(&ciphertext);
    }
    Ok(())
}

pub async fn write_frame<W>(writer: &mut W, session: &Session, plaintext: &[u8]) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::new();
    encode_frames(session, plaintext, &mut buf)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Read half of an encrypted link.
pub struct FrameReader<R> {
    inner: R,
    session: Arc<Session>,
    deadlines: Deadlines,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R, session: Arc<Session>, deadlines: Deadlines) -> Self {
        FrameReader {
            inner,
            session,
            deadlines,
        }
    }

    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, Error> {
        read_frame(&mut self.inner, &self.session, self.deadlines).await
    }
}

/// Write half of an encrypted link.
pub struct FrameWriter<W> {
    inner: W,
    session: Arc<Session>,
    buf: BytesMut,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(inner: W, session: Arc<Session>) -> Self {
        FrameWriter {
            inner,
            session,
            buf: BytesMut::new(),
        }
    }

    pub async fn write_frame(&mut self, plaintext: &[u8]) -> Result<(), Error> {
        self.buf.clear();
        encode_frames(&self.session, plaintext, &mut self.buf)?;
        self.inner.write_all(&self.buf).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}
