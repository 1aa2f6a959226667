use clap::Command;
use config::Config;
use ss_chain::{logging, Client};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod config;

fn main() -> anyhow::Result<()> {
    let mut app = Command::new("ss-chain-local")
        .version(ss_chain::VERSION)
        .about("Local SOCKS5 entry point for an ss-chain relay.");
    app = config::add_command_line_args(app);

    let matches = app.get_matches();
    let mut config = Config::load_from_file(matches.value_of("config").unwrap_or("local.toml"))?;
    config.merge_args(&matches)?;
    logging::init(&config.log_options());
    info!("start with {:#?}", config);

    tokio::runtime::Runtime::new()?.block_on(async move {
        let client = Client::bind(config.client).await?;

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

        client.run(shutdown).await?;
        Ok(())
    })
}
