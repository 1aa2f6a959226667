use std::time::Duration;

use derivative::Derivative;
use serde::{Deserialize, Serialize};

use crate::{
    consts::{Error, MAX_DOMAIN_LEN},
    Address, CipherKind,
};

fn default_timeout() -> u64 {
    300
}

fn default_local_addr() -> String {
    "127.0.0.1".into()
}

fn idle_timeout(secs: u64) -> Option<Duration> {
    match secs {
        0 => None,
        s => Some(Duration::from_secs(s)),
    }
}

fn check_password(what: &str, password: &str) -> Result<(), Error> {
    if password.is_empty() {
        return Err(Error::InvalidConfig(format!("{} password is empty", what)));
    }
    Ok(())
}

fn check_host(what: &str, host: &str) -> Result<(), Error> {
    if host.is_empty() || host.len() > MAX_DOMAIN_LEN {
        return Err(Error::InvalidConfig(format!("invalid {} host {:?}", what, host)));
    }
    Ok(())
}

/// Relay server settings. Built once and shared read-only by every connection.
#[derive(Derivative, Deserialize, Serialize, Clone)]
#[derivative(Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub bind_port: u16,
    #[derivative(Debug = "ignore")]
    pub password: String,
    pub method: CipherKind,
    /// Idle timeout in seconds for established relays, 0 disables it.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub second_hop: Option<SecondHopConfig>,
    /// Keep draining peers that fail the handshake instead of closing on them.
    #[serde(default)]
    pub defend_probing: bool,
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.bind_port)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        idle_timeout(self.timeout)
    }

    /// The configured second hop, if present and enabled.
    pub fn active_second_hop(&self) -> Option<&SecondHopConfig> {
        self.second_hop.as_ref().filter(|hop| hop.enabled)
    }

    pub fn validate(&self) -> Result<(), Error> {
        check_password("server", &self.password)?;
        if let Some(hop) = self.active_second_hop() {
            hop.validate()?;
        }
        Ok(())
    }
}

/// Downstream relay the server forwards through when enabled.
#[derive(Derivative, Deserialize, Serialize, Clone)]
#[derivative(Debug)]
pub struct SecondHopConfig {
    #[serde(default)]
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub method: CipherKind,
    #[derivative(Debug = "ignore")]
    pub password: String,
    /// Dial timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl SecondHopConfig {
    pub fn address(&self) -> Address {
        Address::from_host_port(&self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1))
    }

    pub fn validate(&self) -> Result<(), Error> {
        check_password("second hop", &self.password)?;
        check_host("second hop", &self.host)?;
        if self.port == 0 {
            return Err(Error::InvalidConfig("second hop port is 0".into()));
        }
        Ok(())
    }
}

/// Local SOCKS5 client settings.
#[derive(Derivative, Deserialize, Serialize, Clone)]
#[derivative(Debug)]
pub struct ClientConfig {
    pub server_host: String,
    pub server_port: u16,
    #[serde(default = "default_local_addr")]
    pub local_addr: String,
    pub local_port: u16,
    #[derivative(Debug = "ignore")]
    pub password: String,
    pub method: CipherKind,
    /// Idle timeout in seconds for established relays, 0 disables it.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl ClientConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.local_addr, self.local_port)
    }

    pub fn server_address(&self) -> Address {
        Address::from_host_port(&self.server_host, self.server_port)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        idle_timeout(self.timeout)
    }

    pub fn validate(&self) -> Result<(), Error> {
        check_password("client", &self.password)?;
        check_host("server", &self.server_host)?;
        if self.server_port == 0 {
            return Err(Error::InvalidConfig("server port is 0".into()));
        }
        Ok(())
    }
}
