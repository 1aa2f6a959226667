//! Local SOCKS5 client.
//!
//! Each accepted application connection goes through the SOCKS5 handshake, then a
//! fresh session is bootstrapped towards the relay server with the target as the
//! first frame.

use std::{io, net::SocketAddr, sync::Arc};

use bytes::BytesMut;
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, Instrument};

use crate::{
    config::ClientConfig,
    consts::{
        log_failure, Error, CONNECT_MAX_ATTEMPTS, CONNECT_TIMEOUT, HANDSHAKE_HEADER_TIMEOUT,
    },
    crypto::Session,
    frame::encode_frames,
    relay::{pump, Leg, Transfer},
    socks5, util, Address,
};

pub struct Client {
    listener: TcpListener,
    config: Arc<ClientConfig>,
}

impl Client {
    pub async fn bind(config: ClientConfig) -> Result<Client, Error> {
        config.validate()?;
        let listener = TcpListener::bind(config.listen_addr()).await?;
        info!(
            "socks5 listening on {}, relay server {}",
            listener.local_addr()?,
            config.server_address()
        );
        Ok(Client {
            listener,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self, shutdown: CancellationToken) -> Result<(), Error> {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("client on {} shutting down", self.listener.local_addr()?);
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted,
            };

            let (socket, peer) = match accepted {
                Ok(v) => v,
                Err(e) => {
                    error!("accept error: {}", e);
                    continue;
                }
            };
            trace!("new socks5 connection from {}", peer);

            let config = self.config.clone();
            tokio::spawn(
                async move {
                    match process(socket, &config).await {
                        Ok(transfer) => debug!(
                            "complete, L2R {} bytes, R2L {} bytes",
                            transfer.b_to_a, transfer.a_to_b
                        ),
                        Err(e) => log_failure(&e, format_args!("socks5 relay")),
                    }
                }
                .instrument(info_span!("socks5", %peer)),
            );
        }
    }
}

async fn process(mut local: TcpStream, config: &ClientConfig) -> Result<Transfer, Error> {
    if let Err(e) = util::tune_socket(&local) {
        debug!("tune socket error: {}", e);
    }
    let target = socks5::handshake(&mut local, Some(HANDSHAKE_HEADER_TIMEOUT)).await?;
    trace!("socks5 target {}", target);

    let server = open_link(config, &target).await?;
    pump(server, Leg::Plain(local), config.idle_timeout()).await
}

/// Dials the relay server and sends the salt followed by the target frame.
async fn open_link(config: &ClientConfig, target: &Address) -> Result<Leg<TcpStream>, Error> {
    let server_addr = config.server_address();
    let mut server =
        util::connect_with_retry(&server_addr, CONNECT_TIMEOUT, CONNECT_MAX_ATTEMPTS).await?;

    let (session, salt) = Session::new(&config.password, config.method)?;
    let mut buf = BytesMut::from(&salt[..]);
    encode_frames(&session, &target.encode()?, &mut buf)?;
    server.write_all(&buf).await?;
    debug!("relay {} via {} with {:?}", target, server_addr, config.method);

    Ok(Leg::Framed(server, Arc::new(session)))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        time,
    };

    use super::*;
    use crate::{
        crypto::CipherKind,
        server::{
            tests::{server_config, spawn_echo, spawn_server},
            Server,
        },
        socks5::SOCKS5_CONNECT_REPLY,
    };

    fn client_config(server_port: u16, password: &str, method: CipherKind) -> ClientConfig {
        ClientConfig {
            server_host: "127.0.0.1".into(),
            server_port,
            local_addr: "127.0.0.1".into(),
            local_port: 0,
            password: password.into(),
            method,
            timeout: 300,
        }
    }

    async fn socks_connect(proxy: SocketAddr, target: Address) -> TcpStream {
        let mut stream = TcpStream::connect(proxy).await.unwrap();
        stream.write_all(&[5, 1, 0]).await.unwrap();
        let mut reply = [0u8; 2];
        stream.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [5, 0]);

        let mut req = vec![5u8, 1, 0];
        target.write_to_buf(&mut req).unwrap();
        stream.write_all(&req).await.unwrap();
        let mut reply = [0u8; 10];
        stream.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, SOCKS5_CONNECT_REPLY);
        stream
    }

    #[tokio::test]
    async fn test_end_to_end() {
        let echo = spawn_echo().await;
        let server = Server::bind(server_config("pwd", CipherKind::CHACHA20_POLY1305))
            .await
            .unwrap();
        let (server_addr, _st, _sh) = spawn_server(server).await;

        let client = Client::bind(client_config(
            server_addr.port(),
            "pwd",
            CipherKind::CHACHA20_POLY1305,
        ))
        .await
        .unwrap();
        let proxy = client.local_addr().unwrap();
        let token = CancellationToken::new();
        let handle = tokio::spawn(client.run(token.clone()));

        let mut stream = socks_connect(proxy, echo.into()).await;
        let payload: Vec<u8> = (0..50_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let (mut r, mut w) = stream.split();
        let send = async {
            w.write_all(&payload).await.unwrap();
        };
        let mut echoed = vec![0u8; payload.len()];
        let recv = r.read_exact(&mut echoed);
        let (_, res) = tokio::join!(send, recv);
        res.unwrap();
        assert_eq!(echoed, payload);

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_mismatched_password_closes_tunnel() {
        let echo = spawn_echo().await;
        let server = Server::bind(server_config("server-pwd", CipherKind::AES_256_GCM))
            .await
            .unwrap();
        let (server_addr, _st, _sh) = spawn_server(server).await;

        let client = Client::bind(client_config(
            server_addr.port(),
            "client-pwd",
            CipherKind::AES_256_GCM,
        ))
        .await
        .unwrap();
        let proxy = client.local_addr().unwrap();
        let _handle = tokio::spawn(client.run(CancellationToken::new()));

        let mut stream = socks_connect(proxy, echo.into()).await;
        stream.write_all(b"ping").await.unwrap();
        let mut buf = Vec::new();
        let res = time::timeout(Duration::from_secs(5), stream.read_to_end(&mut buf))
            .await
            .unwrap();
        assert!(res.is_err() || buf.is_empty());
    }

    #[tokio::test]
    async fn test_domain_name_target() {
        let echo = spawn_echo().await;
        let server = Server::bind(server_config("pwd", CipherKind::AES_256_GCM))
            .await
            .unwrap();
        let (server_addr, _st, _sh) = spawn_server(server).await;

        let client = Client::bind(client_config(
            server_addr.port(),
            "pwd",
            CipherKind::AES_256_GCM,
        ))
        .await
        .unwrap();
        let proxy = client.local_addr().unwrap();
        let _handle = tokio::spawn(client.run(CancellationToken::new()));

        let target = Address::DomainNameAddress("localhost".into(), echo.port());
        let mut req = Vec::new();
        target.write_to_buf(&mut req).unwrap();
        assert_eq!(req[0], 3);

        let mut stream = socks_connect(proxy, target).await;
        stream.write_all(b"hi").await.unwrap();
        let mut reply = [0u8; 2];
        time::timeout(Duration::from_secs(10), stream.read_exact(&mut reply))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&reply, b"hi");
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let mut cfg = client_config(8388, "pwd", CipherKind::AES_256_GCM);
        cfg.server_host = String::new();
        assert!(matches!(Client::bind(cfg).await, Err(Error::InvalidConfig(_))));
    }
}
