use anyhow::Context;
use clap::{Arg, ArgMatches, Command};

use serde::{Deserialize, Serialize};

use derivative::Derivative;
use ss_chain::{logging::LogOptions, ClientConfig};

#[derive(Derivative, Deserialize, Serialize)]
#[derivative(Debug)]
pub struct Config {
    #[serde(flatten)]
    pub client: ClientConfig,
    #[serde(default = "default_level")]
    pub log_level: String,
    #[serde(default)]
    pub console_log: bool,
    pub file_log_dir: Option<String>,
}

fn default_level() -> String {
    "info".into()
}

impl Config {
    pub fn load_from_file(file_name: &str) -> anyhow::Result<Config> {
        let s = std::fs::read_to_string(file_name)
            .with_context(|| format!("read config file {}", file_name))?;
        let c: Config =
            toml::from_str(&s).with_context(|| format!("parse config file {}", file_name))?;
        Ok(c)
    }

    pub fn merge_args(&mut self, matches: &ArgMatches) -> anyhow::Result<()> {
        if let Some(passwd) = matches.value_of("passwd") {
            self.client.password = passwd.into();
        }
        if let Some(host) = matches.value_of("server-host") {
            self.client.server_host = host.into();
        }
        if let Some(port) = matches.value_of("server-port") {
            self.client.server_port = port.parse().with_context(|| format!("server port {}", port))?;
        }
        if let Some(port) = matches.value_of("local-port") {
            self.client.local_port = port.parse().with_context(|| format!("local port {}", port))?;
        }
        if let Some(log_level) = matches.value_of("log-level") {
            self.log_level = log_level.into();
        }
        Ok(())
    }

    pub fn log_options(&self) -> LogOptions {
        LogOptions {
            level: self.log_level.clone(),
            console: self.console_log,
            file_dir: self.file_log_dir.clone(),
            file_name: "ss-chain-local.log".into(),
            bin_target: "ss_chain_local",
        }
    }
}

pub fn add_command_line_args(mut app: Command) -> Command {
    app = app
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .takes_value(true)
                .default_value("local.toml")
                .help("client config path"),
        )
        .arg(
            Arg::new("passwd")
                .short('k')
                .long("passwd")
                .takes_value(true)
                .help("override password in config file"),
        )
        .arg(
            Arg::new("server-host")
                .short('s')
                .long("server-host")
                .takes_value(true)
                .help("override server_host in config file"),
        )
        .arg(
            Arg::new("server-port")
                .short('p')
                .long("server-port")
                .takes_value(true)
                .help("override server_port in config file"),
        )
        .arg(
            Arg::new("local-port")
                .short('l')
                .long("local-port")
                .takes_value(true)
                .help("override local_port in config file"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .takes_value(true)
                .possible_values(["error", "warn", "info", "debug", "trace"])
                .help("override log_level in config file"),
        );

    app
}
