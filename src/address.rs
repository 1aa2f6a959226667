use std::{
    fmt::{self, Formatter},
    io,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6},
    str::FromStr,
};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    net::TcpStream,
};

use crate::consts::*;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Address {
    SocketAddress(SocketAddr),
    DomainNameAddress(String, u16), // domain name, port
}

impl Address {
    /// Reads `[atyp][addr][port]` straight off a stream, the layout used by SOCKS5 requests.
    pub async fn read_from<R>(stream: &mut R) -> Result<Address, Error>
    where
        R: AsyncRead + Unpin,
    {
        let mut addr_type_buf = [0u8; 1];
        stream.read_exact(&mut addr_type_buf).await?;
        Self::read_body(addr_type_buf[0], stream).await
    }

    /// Reads the address once its type byte has already been consumed.
    pub async fn read_body<R>(addr_type: u8, stream: &mut R) -> Result<Address, Error>
    where
        R: AsyncRead + Unpin,
    {
        match addr_type {
            SOCKS5_ADDR_TYPE_IPV4 => {
                let mut buf = [0u8; 6];
                stream.read_exact(&mut buf).await?;
                let (addr, _) = Self::decode_ipv4(&buf)?;
                Ok(addr)
            }
            SOCKS5_ADDR_TYPE_IPV6 => {
                let mut buf = [0u8; 18];
                stream.read_exact(&mut buf).await?;
                let (addr, _) = Self::decode_ipv6(&buf)?;
                Ok(addr)
            }
            SOCKS5_ADDR_TYPE_DOMAIN_NAME => {
                let mut length_buf = [0u8; 1];
                stream.read_exact(&mut length_buf).await?;
                let length = length_buf[0] as usize;

                let buf_length = length + 2; // domain + port
                let mut buf = vec![0u8; buf_length];
                stream.read_exact(&mut buf).await?;

                let port = u16::from_be_bytes([buf[length], buf[length + 1]]);
                buf.truncate(length);
                let addr = String::from_utf8(buf)?;

                Ok(Address::DomainNameAddress(addr, port))
            }
            _ => Err(Error::UnsupportedAddressType(addr_type)),
        }
    }

    /// Decodes an address from the front of `buf`, returning it with the number of bytes used.
    pub fn decode(buf: &[u8]) -> Result<(Address, usize), Error> {
        let (&addr_type, rest) = buf
            .split_first()
            .ok_or(Error::MalformedAddress("empty buffer"))?;

        let (addr, n) = match addr_type {
            SOCKS5_ADDR_TYPE_IPV4 => Self::decode_ipv4(rest)?,
            SOCKS5_ADDR_TYPE_IPV6 => Self::decode_ipv6(rest)?,
            SOCKS5_ADDR_TYPE_DOMAIN_NAME => {
                let (&length, rest) = rest
                    .split_first()
                    .ok_or(Error::MalformedAddress("missing domain length"))?;
                let length = length as usize;
                if rest.len() < length + 2 {
                    return Err(Error::MalformedAddress("domain address too short"));
                }
                let domain = String::from_utf8(rest[..length].to_vec())?;
                let port = u16::from_be_bytes([rest[length], rest[length + 1]]);
                (Address::DomainNameAddress(domain, port), 1 + length + 2)
            }
            _ => return Err(Error::UnsupportedAddressType(addr_type)),
        };

        Ok((addr, 1 + n))
    }

    fn decode_ipv4(buf: &[u8]) -> Result<(Address, usize), Error> {
        if buf.len() < 6 {
            return Err(Error::MalformedAddress("ipv4 address too short"));
        }
        let ip = Ipv4Addr::new(buf[0], buf[1], buf[2], buf[3]);
        let port = u16::from_be_bytes([buf[4], buf[5]]);
        Ok((
            Address::SocketAddress(SocketAddr::V4(SocketAddrV4::new(ip, port))),
            6,
        ))
    }

    fn decode_ipv6(buf: &[u8]) -> Result<(Address, usize), Error> {
        if buf.len() < 18 {
            return Err(Error::MalformedAddress("ipv6 address too short"));
        }
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&buf[..16]);
        let ip = Ipv6Addr::from(octets);
        let port = u16::from_be_bytes([buf[16], buf[17]]);
        Ok((
            Address::SocketAddress(SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0))),
            18,
        ))
    }

    pub fn encode(&self) -> Result<Bytes, Error> {
        let mut buf = BytesMut::with_capacity(self.serialized_len());
        self.write_to_buf(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Fails only for a domain longer than 255 bytes, which the length byte cannot carry.
    pub fn write_to_buf<B: BufMut>(&self, buf: &mut B) -> Result<(), Error> {
        match self {
            Address::SocketAddress(addr) => Self::write_socket_addr_to_buf(addr, buf),
            Address::DomainNameAddress(domain, port) => {
                if domain.len() > MAX_DOMAIN_LEN {
                    return Err(Error::MalformedAddress("domain longer than 255 bytes"));
                }
                buf.put_u8(SOCKS5_ADDR_TYPE_DOMAIN_NAME);
                buf.put_u8(domain.len() as u8);
                buf.put_slice(domain.as_bytes());
                buf.put_u16(*port);
            }
        }
        Ok(())
    }

    pub fn write_socket_addr_to_buf<B: BufMut>(addr: &SocketAddr, buf: &mut B) {
        match *addr {
            SocketAddr::V4(ref addr) => {
                buf.put_u8(SOCKS5_ADDR_TYPE_IPV4);
                buf.put_slice(&addr.ip().octets());
                buf.put_u16(addr.port());
            }
            SocketAddr::V6(ref addr) => {
                buf.put_u8(SOCKS5_ADDR_TYPE_IPV6);
                for seg in &addr.ip().segments() {
                    buf.put_u16(*seg);
                }
                buf.put_u16(addr.port());
            }
        }
    }

    pub fn serialized_len(&self) -> usize {
        match self {
            Address::SocketAddress(SocketAddr::V4(..)) => 1 + 4 + 2,
            Address::SocketAddress(SocketAddr::V6(..)) => 1 + 16 + 2,
            Address::DomainNameAddress(domain, _) => 1 + 1 + domain.len() + 2,
        }
    }

    /// An IP literal becomes a socket address, anything else a domain name.
    pub fn from_host_port(host: &str, port: u16) -> Address {
        match host.parse::<IpAddr>() {
            Ok(ip) => Address::SocketAddress(SocketAddr::new(ip, port)),
            Err(_) => Address::DomainNameAddress(host.to_owned(), port),
        }
    }

    pub fn port(&self) -> u16 {
        match *self {
            Address::SocketAddress(addr) => addr.port(),
            Address::DomainNameAddress(.., port) => port,
        }
    }

    pub async fn connect(&self) -> io::Result<TcpStream> {
        let stream = match *self {
            Address::SocketAddress(ref sa) => TcpStream::connect(sa).await?,
            Address::DomainNameAddress(ref dname, port) => {
                TcpStream::connect((dname.as_str(), port)).await?
            }
        };
        Ok(stream)
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::SocketAddress(addr)
    }
}

/// Parses `host:port`, `[v6]:port` or `ip:port`.
impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(Address::SocketAddress(addr));
        }
        let (host, port) = s
            .rsplit_once(':')
            .ok_or(Error::MalformedAddress("missing port"))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| Error::MalformedAddress("invalid port"))?;
        if host.is_empty() {
            return Err(Error::MalformedAddress("empty host"));
        }
        if host.len() > MAX_DOMAIN_LEN {
            return Err(Error::MalformedAddress("domain longer than 255 bytes"));
        }
        Ok(Address::from_host_port(host, port))
    }
}

impl fmt::Display for Address {
    #[inline]
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match *self {
            Address::SocketAddress(ref addr) => write!(f, "{}", addr),
            Address::DomainNameAddress(ref addr, ref port) => write!(f, "{}:{}", addr, port),
        }
    }
}
