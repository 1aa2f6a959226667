//! SOCKS5 ingress for the local client, the RFC 1928 subset needed for CONNECT.
//!
//! Greeting:
//! ```txt
//! +-----+----------+----------+
//! | VER | NMETHODS | METHODS  |
//! +-----+----------+----------+
//! |  1  |    1     | 1 to 255 |
//! +-----+----------+----------+
//! ```
//!
//! Request, whose address part is exactly the relay's own address encoding:
//! ```txt
//! +-----+-----+-------+------+----------+----------+
//! | VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
//! +-----+-----+-------+------+----------+----------+
//! |  1  |  1  | X'00' |  1   | Variable |    2     |
//! +-----+-----+-------+------+----------+----------+
//! ```

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::{consts::Error, frame::with_deadline, Address};

pub const SOCKS5_VERSION: u8 = 0x05;

pub const SOCKS5_AUTH_METHOD_NONE: u8 = 0x00;
pub const SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE: u8 = 0xFF;

pub const SOCKS5_CMD_TCP_CONNECT: u8 = 0x01;
pub const SOCKS5_CMD_TCP_BIND: u8 = 0x02;
pub const SOCKS5_CMD_UDP_ASSOCIATE: u8 = 0x03;

pub const SOCKS5_REPLY_SUCCEEDED: u8 = 0x00;
pub const SOCKS5_REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Success reply with a zeroed IPv4 bound address.
pub const SOCKS5_CONNECT_REPLY: [u8; 10] = [
    SOCKS5_VERSION,
    SOCKS5_REPLY_SUCCEEDED,
    0x00,
    0x01,
    0,
    0,
    0,
    0,
    0,
    0,
];

/// Runs the greeting and request exchange and returns the CONNECT target.
///
/// Each read is bounded by `deadline` when given.
pub async fn handshake<S>(stream: &mut S, deadline: Option<Duration>) -> Result<Address, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    greet(stream, deadline).await?;
    let target = read_request(stream, deadline).await?;
    Ok(target)
}

/// Greeting state: only the no-authentication method is accepted.
pub async fn greet<S>(stream: &mut S, deadline: Option<Duration>) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 2];
    with_deadline(deadline, "read socks greeting", stream.read_exact(&mut buf)).await?;
    if buf[0] != SOCKS5_VERSION {
        return Err(Error::UnsupportedSocksVersion(buf[0]));
    }

    let mut methods = vec![0u8; buf[1] as usize];
    with_deadline(deadline, "read socks methods", stream.read_exact(&mut methods)).await?;
    trace!("socks5 greeting offers methods {:?}", methods);

    if !methods.contains(&SOCKS5_AUTH_METHOD_NONE) {
        stream
            .write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NOT_ACCEPTABLE])
            .await?;
        return Err(Error::NoAcceptableAuthMethod);
    }

    stream
        .write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_METHOD_NONE])
        .await?;
    Ok(())
}

/// Request state: reads a CONNECT request and answers with the fixed success reply.
pub async fn read_request<S>(stream: &mut S, deadline: Option<Duration>) -> Result<Address, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = [0u8; 4];
    with_deadline(deadline, "read socks request", stream.read_exact(&mut buf)).await?;
    let [version, cmd, _rsv, addr_type] = buf;

    if version != SOCKS5_VERSION {
        return Err(Error::UnsupportedSocksVersion(version));
    }
    if cmd != SOCKS5_CMD_TCP_CONNECT {
        debug!("socks5 command {:#x} not supported", cmd);
        write_reply(stream, SOCKS5_REPLY_COMMAND_NOT_SUPPORTED).await?;
        return Err(Error::UnsupportedCommand(cmd));
    }

    let read = Address::read_body(addr_type, stream);
    let result = match deadline {
        Some(after) => tokio::time::timeout(after, read)
            .await
            .map_err(|_| Error::timeout("read socks address", after))?,
        None => read.await,
    };
    let target = match result {
        Ok(addr) => addr,
        Err(Error::UnsupportedAddressType(t)) => {
            write_reply(stream, SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED).await?;
            return Err(Error::UnsupportedAddressType(t));
        }
        Err(e) => return Err(e),
    };

    stream.write_all(&SOCKS5_CONNECT_REPLY).await?;
    Ok(target)
}

async fn write_reply<S>(stream: &mut S, reply: u8) -> Result<(), Error>
where
    S: AsyncWrite + Unpin,
{
    let mut resp = SOCKS5_CONNECT_REPLY;
    resp[1] = reply;
    stream.write_all(&resp).await?;
    Ok(())
}
