//! Relay server.
//!
//! Accepts encrypted links, bootstraps a session from the peer's salt, decodes the
//! target from the first frame and relays to it, either directly or through the
//! configured second hop.

use std::{io, net::SocketAddr, sync::Arc};

use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::{
    audit::{AuditSink, NoopAudit},
    chain::SecondHop,
    config::ServerConfig,
    consts::{
        log_failure, Error, ErrorKind, CONNECT_MAX_ATTEMPTS, CONNECT_TIMEOUT,
        HANDSHAKE_MAX_ATTEMPTS,
    },
    frame,
    relay::{pump, Leg},
    util, Address,
};

pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    audit: Arc<dyn AuditSink>,
}

impl Server {
    /// Validates `config` and binds the listener.
    pub async fn bind(config: ServerConfig) -> Result<Server, Error> {
        config.validate()?;
        let listener = TcpListener::bind(config.listen_addr()).await?;
        info!("tcp server listening on {}", listener.local_addr()?);
        if let Some(hop) = config.active_second_hop() {
            info!("forwarding through second hop {}", hop.address());
        }

        Ok(Server {
            listener,
            config: Arc::new(config),
            audit: Arc::new(NoopAudit),
        })
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until `shutdown` is cancelled. Accept errors are logged
    /// and do not stop the loop.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), Error> {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("server on {} shutting down", self.listener.local_addr()?);
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
            trace!("new connection from {}", peer);

            let config = self.config.clone();
            let audit = self.audit.clone();
            tokio::spawn(
                process(socket, peer, config, audit).instrument(info_span!("conn", %peer)),
            );
        }
    }
}

async fn process(
    mut socket: TcpStream,
    peer: SocketAddr,
    config: Arc<ServerConfig>,
    audit: Arc<dyn AuditSink>,
) {
    if let Err(e) = util::tune_socket(&socket) {
        debug!("tune socket error: {}", e);
    }

    let handshake = frame::read_handshake(
        &mut socket,
        &config.password,
        config.method,
        HANDSHAKE_MAX_ATTEMPTS,
    )
    .await
    .and_then(|(session, first)| {
        let (target, consumed) = Address::decode(&first)?;
        Ok((session, target, first[consumed..].to_vec()))
    });

    let (session, target, payload) = match handshake {
        Ok(v) => v,
        Err(e) if e.is_unexpected_eof() => {
            debug!("handshake: unexpected eof");
            return;
        }
        Err(e) => {
            reject(socket, peer, &config, audit.as_ref(), e).await;
            return;
        }
    };
    trace!("read target {}, {} bytes leading payload", target, payload.len());

    let remote = match dial(&config, &target, &payload).await {
        Ok(leg) => leg,
        Err(e) => {
            warn!("connect target {} error: {}", target, e);
            return;
        }
    };
    audit.session_started(peer, &target, config.method);
    debug!("established tcp proxy {} <-> {}", peer, target);

    let session = Arc::new(session);
    match pump(Leg::Framed(socket, session), remote, config.idle_timeout()).await {
        Ok(transfer) => debug!(
            "complete tcp proxy {} <-> {}, L2R {} bytes, R2L {} bytes",
            peer, target, transfer.a_to_b, transfer.b_to_a
        ),
        Err(e) => log_failure(
            &e,
            format_args!("interrupt tcp proxy {} <-> {}", peer, target),
        ),
    }
}

/// Opens the egress leg: the second hop when one is active, the target otherwise.
async fn dial(
    config: &ServerConfig,
    target: &Address,
    payload: &[u8],
) -> Result<Leg<TcpStream>, Error> {
    if let Some(hop) = config.active_second_hop() {
        return Ok(SecondHop::open(hop, target, payload).await?.into_leg());
    }

    let mut remote = util::connect_with_retry(target, CONNECT_TIMEOUT, CONNECT_MAX_ATTEMPTS).await?;
    if !payload.is_empty() {
        remote.write_all(payload).await?;
    }
    Ok(Leg::Plain(remote))
}

async fn reject(
    mut socket: TcpStream,
    peer: SocketAddr,
    config: &ServerConfig,
    audit: &dyn AuditSink,
    err: Error,
) {
    log_failure(&err, format_args!("handshake"));
    let activity = match err.kind() {
        ErrorKind::Timeout => "handshake_timeout",
        ErrorKind::Crypto => "authentication_failure",
        ErrorKind::Protocol | ErrorKind::Io => "handshake_error",
    };
    audit.suspicious_activity(peer, activity, &err.to_string());

    if config.defend_probing && err.kind() != ErrorKind::Timeout {
        let res = util::read_forever(&mut socket).await;
        trace!("read forever closing with {:?}", res);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use bytes::BytesMut;
    use tokio::{io::AsyncReadExt, task::JoinHandle};

    use super::*;
    use crate::{
        audit::tests::RecordingAudit,
        config::SecondHopConfig,
        crypto::{CipherKind, Session},
        frame::{encode_frames, read_frame, write_frame, Deadlines},
    };

    pub(crate) fn server_config(password: &str, method: CipherKind) -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1".into(),
            bind_port: 0,
            password: password.into(),
            method,
            timeout: 300,
            second_hop: None,
            defend_probing: false,
        }
    }

    pub(crate) async fn spawn_echo() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let (mut r, mut w) = socket.split();
                    let _ = tokio::io::copy(&mut r, &mut w).await;
                });
            }
        });
        addr
    }

    pub(crate) async fn spawn_server(
        server: Server,
    ) -> (SocketAddr, CancellationToken, JoinHandle<Result<(), Error>>) {
        let addr = server.local_addr().unwrap();
        let token = CancellationToken::new();
        let handle = tokio::spawn(server.run(token.clone()));
        (addr, token, handle)
    }

    async fn open_tunnel(
        server: SocketAddr,
        password: &str,
        method: CipherKind,
        target: &Address,
        payload: &[u8],
    ) -> (TcpStream, Session) {
        let mut stream = TcpStream::connect(server).await.unwrap();
        let (session, salt) = Session::new(password, method).unwrap();
        let mut first = BytesMut::new();
        target.write_to_buf(&mut first).unwrap();
        first.extend_from_slice(payload);

        let mut buf = BytesMut::from(&salt[..]);
        encode_frames(&session, &first, &mut buf).unwrap();
        stream.write_all(&buf).await.unwrap();
        (stream, session)
    }

    async fn read_reply(stream: &mut TcpStream, session: &Session, len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        while out.len() < len {
            let deadlines = Deadlines {
                header: Some(Duration::from_secs(5)),
                body: Some(Duration::from_secs(5)),
            };
            let chunk = read_frame(stream, session, deadlines)
                .await
                .unwrap()
                .unwrap();
            out.extend_from_slice(&chunk);
        }
        out
    }

    #[tokio::test]
    async fn test_direct_relay() {
        let echo = spawn_echo().await;
        let audit = Arc::new(RecordingAudit::default());
        let server = Server::bind(server_config("pwd", CipherKind::AES_256_GCM))
            .await
            .unwrap()
            .with_audit(audit.clone());
        let (addr, token, handle) = spawn_server(server).await;

        let target = Address::from(echo);
        let (mut stream, session) =
            open_tunnel(addr, "pwd", CipherKind::AES_256_GCM, &target, b"hello").await;
        assert_eq!(read_reply(&mut stream, &session, 5).await, b"hello");

        let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 256) as u8).collect();
        write_frame(&mut stream, &session, &payload).await.unwrap();
        assert_eq!(read_reply(&mut stream, &session, payload.len()).await, payload);

        assert_eq!(
            *audit.events.lock().unwrap(),
            vec![format!("start {}", target)]
        );

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_chained_relay() {
        let echo = spawn_echo().await;
        let hop2 = Server::bind(server_config("hop-two", CipherKind::CHACHA20_POLY1305))
            .await
            .unwrap();
        let (hop2_addr, _t2, _h2) = spawn_server(hop2).await;

        let mut cfg = server_config("hop-one", CipherKind::AES_256_GCM);
        cfg.second_hop = Some(SecondHopConfig {
            enabled: true,
            host: "127.0.0.1".into(),
            port: hop2_addr.port(),
            method: CipherKind::CHACHA20_POLY1305,
            password: "hop-two".into(),
            timeout: 5,
        });
        let hop1 = Server::bind(cfg).await.unwrap();
        let (hop1_addr, _t1, _h1) = spawn_server(hop1).await;

        let target = Address::from(echo);
        let (mut stream, session) =
            open_tunnel(hop1_addr, "hop-one", CipherKind::AES_256_GCM, &target, b"").await;
        write_frame(&mut stream, &session, b"through two hops").await.unwrap();
        assert_eq!(read_reply(&mut stream, &session, 16).await, b"through two hops");
    }

    #[tokio::test]
    async fn test_wrong_password_is_rejected() {
        let echo = spawn_echo().await;
        let audit = Arc::new(RecordingAudit::default());
        let server = Server::bind(server_config("right", CipherKind::AES_256_GCM))
            .await
            .unwrap()
            .with_audit(audit.clone());
        let (addr, _token, _handle) = spawn_server(server).await;

        let (mut stream, _) = open_tunnel(
            addr,
            "wrong",
            CipherKind::AES_256_GCM,
            &Address::from(echo),
            b"hello",
        )
        .await;

        let mut buf = Vec::new();
        let res = stream.read_to_end(&mut buf).await;
        assert!(res.is_err() || buf.is_empty());
        assert_eq!(
            *audit.events.lock().unwrap(),
            vec!["suspicious authentication_failure"]
        );
    }

    #[tokio::test]
    async fn test_unsupported_address_type_is_rejected() {
        let audit = Arc::new(RecordingAudit::default());
        let server = Server::bind(server_config("pwd", CipherKind::AES_256_GCM))
            .await
            .unwrap()
            .with_audit(audit.clone());
        let (addr, _token, _handle) = spawn_server(server).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let (session, salt) = Session::new("pwd", CipherKind::AES_256_GCM).unwrap();
        let mut buf = BytesMut::from(&salt[..]);
        encode_frames(&session, &[0x09, 1, 2, 3, 4, 0, 80], &mut buf).unwrap();
        stream.write_all(&buf).await.unwrap();

        let mut out = Vec::new();
        let _ = stream.read_to_end(&mut out).await;
        assert!(out.is_empty());
        assert_eq!(*audit.events.lock().unwrap(), vec!["suspicious handshake_error"]);
    }

    #[tokio::test]
    async fn test_concurrent_sessions_are_independent() {
        let echo = spawn_echo().await;
        let server = Server::bind(server_config("pwd", CipherKind::CHACHA20_POLY1305))
            .await
            .unwrap();
        let (addr, _token, _handle) = spawn_server(server).await;
        let target = Address::from(echo);

        let (mut a, sa) = open_tunnel(addr, "pwd", CipherKind::CHACHA20_POLY1305, &target, b"").await;
        let (mut b, sb) = open_tunnel(addr, "pwd", CipherKind::CHACHA20_POLY1305, &target, b"").await;

        write_frame(&mut a, &sa, b"from a").await.unwrap();
        write_frame(&mut b, &sb, b"from b").await.unwrap();
        assert_eq!(read_reply(&mut b, &sb, 6).await, b"from b");
        assert_eq!(read_reply(&mut a, &sa, 6).await, b"from a");

        // each link has its own key: a's reply is not readable with b's session
        write_frame(&mut a, &sa, b"again").await.unwrap();
        assert!(matches!(
            read_frame(&mut a, &sb, Deadlines::NONE).await,
            Err(Error::AuthenticationFailed)
        ));
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let cfg = server_config("", CipherKind::AES_256_GCM);
        assert!(matches!(
            Server::bind(cfg).await,
            Err(Error::InvalidConfig(_))
        ));
    }
}
