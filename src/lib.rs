//! An encrypted TCP tunnelling proxy with optional two-hop chaining.
//!
//! A local SOCKS5 [`Client`] wraps each application connection in an AEAD link to a
//! relay [`Server`], which dials the target directly or forwards through a second
//! relay under a separate key.
//!
//! # Examples
//! relay server with aes-256-gcm:
//! ```no_run
//! use ss_chain::*;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let config = ServerConfig {
//!         bind_addr: "127.0.0.1".into(),
//!         bind_port: 8388,
//!         password: "123456".into(),
//!         method: CipherKind::AES_256_GCM,
//!         timeout: 300,
//!         second_hop: None,
//!         defend_probing: false,
//!     };
//!
//!     let server = Server::bind(config).await?;
//!     server.run(CancellationToken::new()).await
//! }
//! ```
//!
//! encrypted link by hand:
//! ```no_run
//! use ss_chain::*;
//! use tokio::{io::AsyncWriteExt, net::TcpStream};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let mut conn = TcpStream::connect("127.0.0.1:8388").await?;
//!     let (session, salt) = Session::new("123456", CipherKind::AES_256_GCM)?;
//!     conn.write_all(&salt).await?;
//!
//!     let target: Address = "example.com:80".parse()?;
//!     frame::write_frame(&mut conn, &session, &target.encode()?).await?;
//!     frame::write_frame(&mut conn, &session, b"GET / HTTP/1.0\r\n\r\n").await?;
//!     Ok(())
//! }
//! ```

pub mod address;
pub use address::Address;
pub mod audit;
pub mod chain;
pub mod client;
pub use client::Client;
pub mod config;
pub use config::{ClientConfig, SecondHopConfig, ServerConfig};
pub mod consts;
pub use consts::{Error, ErrorKind};
pub mod crypto;
pub use crypto::{CipherKind, Session};
pub mod frame;
pub mod logging;
pub mod relay;
pub mod server;
pub use server::Server;
pub mod socks5;
pub mod util;
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
