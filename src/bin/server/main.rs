use std::sync::Arc;

use clap::Command;
use config::Config;
use ss_chain::{audit::TracingAudit, logging, Server};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod config;

fn main() -> anyhow::Result<()> {
    let mut app = Command::new("ss-chain-server")
        .version(ss_chain::VERSION)
        .about("Encrypted relay server with optional second-hop chaining.");
    app = config::add_command_line_args(app);

    let matches = app.get_matches();
    if matches.is_present("gen-config") {
        print!("{}", config::sample_config());
        return Ok(());
    }

    let mut config = Config::load_from_file(matches.value_of("config").unwrap_or("config.toml"))?;
    config.merge_args(&matches)?;
    logging::init(&config.log_options());
    info!("start with {:#?}", config);

    tokio::runtime::Runtime::new()?.block_on(async move {
        let server = Server::bind(config.server)
            .await?
            .with_audit(Arc::new(TracingAudit));

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("receive exit signal");
                    token.cancel();
                }
                Err(e) => error!("listen for exit signal error: {}", e),
            }
        });

        server.run(shutdown).await?;
        Ok(())
    })
}
