mod app;
mod cli;

use tracing_subscriber::EnvFilter;

fn init_logging(verbose: bool) {
    let default = if verbose { "ffbatch=debug" } else { "ffbatch=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = cli::parse();
    init_logging(cli.verbose);
    app::run(cli);
}
