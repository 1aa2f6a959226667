//! Second-hop forwarding.
//!
//! With a second hop configured, the first server does not dial the target itself.
//! It opens a link to the downstream node with a fresh salt and that node's own
//! password and method, sends the target as the first frame, and relays decrypted
//! plaintext between the two independent sessions.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::{io::AsyncWriteExt, net::TcpStream};
use tracing::{debug, info};

use crate::{
    config::SecondHopConfig,
    consts::{Error, CONNECT_MAX_ATTEMPTS},
    crypto::Session,
    frame::encode_frames,
    relay::Leg,
    util, Address,
};

/// An established link to the downstream node, ready to be used as a relay leg.
pub struct SecondHop {
    stream: TcpStream,
    session: Arc<Session>,
}

impl SecondHop {
    /// Dials the downstream node and sends the salt followed by the target frame.
    ///
    /// `initial_payload` is appended to the target frame, the same way a client
    /// may carry leading data after the address.
    pub async fn open(
        cfg: &SecondHopConfig,
        target: &Address,
        initial_payload: &[u8],
    ) -> Result<SecondHop, Error> {
        let hop_addr = cfg.address();
        let mut stream =
            util::connect_with_retry(&hop_addr, cfg.connect_timeout(), CONNECT_MAX_ATTEMPTS)
                .await?;
        info!("connected to second hop {}, forwarding target {}", hop_addr, target);

        let (session, salt) = Session::new(&cfg.password, cfg.method)?;
        let mut first = BytesMut::with_capacity(target.serialized_len() + initial_payload.len());
        target.write_to_buf(&mut first)?;
        first.extend_from_slice(initial_payload);

        let mut buf = BytesMut::from(&salt[..]);
        encode_frames(&session, &first, &mut buf)?;
        stream.write_all(&buf).await?;
        debug!(
            "second hop {} session started with {:?}, {} bytes bootstrap",
            hop_addr,
            cfg.method,
            buf.len()
        );

        Ok(SecondHop {
            stream,
            session: Arc::new(session),
        })
    }

    pub fn into_leg(self) -> Leg<TcpStream> {
        Leg::Framed(self.stream, self.session)
    }
}
