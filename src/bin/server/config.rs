use anyhow::Context;
use clap::{Arg, ArgMatches, Command};

use serde::{Deserialize, Serialize};

use derivative::Derivative;
use ss_chain::{logging::LogOptions, ServerConfig};

#[derive(Derivative, Deserialize, Serialize)]
#[derivative(Debug)]
pub struct Config {
    #[serde(flatten)]
    pub server: ServerConfig,
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

    /// Applies command line overrides on top of the file.
    pub fn merge_args(&mut self, matches: &ArgMatches) -> anyhow::Result<()> {
        if let Some(passwd) = matches.value_of("passwd") {
            self.server.password = passwd.into();
        }
        if let Some(listen) = matches.value_of("listen") {
            self.server.bind_addr = listen.into();
        }
        if let Some(port) = matches.value_of("port") {
            self.server.bind_port = port.parse().with_context(|| format!("port {}", port))?;
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
            file_name: "ss-chain-server.log".into(),
            bin_target: "ss_chain_server",
        }
    }
}

/// A starting config with a freshly generated password.
pub fn sample_config() -> String {
    format!(
        r#"bind_addr = "0.0.0.0"
bind_port = 8388
password = "{}"
method = "chacha20-poly1305"
# idle timeout in seconds, 0 disables it
timeout = 300
defend_probing = false
log_level = "info"
console_log = true
# file_log_dir = "logs"

# [second_hop]
# enabled = true
# host = "10.0.0.2"
# port = 8388
# method = "aes-256-gcm"
# password = "downstream password"
# timeout = 10
"#,
        ss_chain::util::generate_password(32)
    )
}

pub fn add_command_line_args(mut app: Command) -> Command {
    app = app
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .takes_value(true)
                .default_value("config.toml")
                .help("server config path"),
        )
        .arg(
            Arg::new("passwd")
                .short('k')
                .long("passwd")
                .takes_value(true)
                .help("override password in config file"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .takes_value(true)
                .help("override bind_port in config file"),
        )
        .arg(
            Arg::new("listen")
                .short('l')
                .long("listen")
                .takes_value(true)
                .help("override bind_addr in config file"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .takes_value(true)
                .possible_values(["error", "warn", "info", "debug", "trace"])
                .help("override log_level in config file"),
        )
        .arg(
            Arg::new("gen-config")
                .long("gen-config")
                .help("print a sample config with a random password and exit"),
        );

    app
}
