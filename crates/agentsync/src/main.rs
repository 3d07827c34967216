use std::process;

use agentsync::cli::{build_cli, handlers};
use tracing_subscriber::EnvFilter;

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() {
    let matches = build_cli().get_matches();

    let result = match handlers::load_config(&matches) {
        Ok(config) => {
            init_tracing(&config.log_level);
            handlers::dispatch(&matches, config).await
        }
        Err(err) => Err(err),
    };

    match result {
        Ok(0) => {}
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            let code = err
                .downcast_ref::<agentsync_core::Error>()
                .map_or(1, agentsync_core::Error::exit_code);
            process::exit(code);
        }
    }
}
