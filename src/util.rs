use std::{io, time::Duration};

use socket2::{SockRef, TcpKeepalive};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    net::TcpStream,
    time,
};
use tracing::{debug, warn};

pub use crate::crypto::util::*;
use crate::{
    consts::{Error, TCP_KEEPALIVE},
    Address,
};

/// Enables `TCP_NODELAY` and keep-alive probes on a proxied socket.
pub fn tune_socket(stream: &TcpStream) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let keepalive = TcpKeepalive::new().with_time(TCP_KEEPALIVE);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

/// Dials `addr`, giving each attempt `timeout`. Only timeouts and I/O errors are
/// retried, up to `attempts` in total.
pub async fn connect_with_retry(
    addr: &Address,
    timeout: Duration,
    attempts: usize,
) -> Result<TcpStream, Error> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        let err = match time::timeout(timeout, addr.connect()).await {
            Ok(Ok(stream)) => {
                if let Err(e) = tune_socket(&stream) {
                    debug!("tune socket for {} error: {}", addr, e);
                }
                return Ok(stream);
            }
            Ok(Err(e)) => Error::from(e),
            Err(_) => Error::Timeout {
                phase: "connect",
                after: timeout,
            },
        };

        if attempt >= attempts {
            return Err(err);
        }
        warn!(
            "connect {} error (attempt {}/{}): {}, retrying",
            addr, attempt, attempts, err
        );
        attempt += 1;
    }
}

/// Reads and discards until the peer closes.
pub async fn read_forever<R>(reader: &mut R) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 1024];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        total += n as u64;
    }
    Ok(total)
}
