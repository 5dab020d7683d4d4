use clap::Parser;
use habit_app::{
    app::{run, AppConfig},
    cli::Cli,
};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().unwrap_or_default().with_overrides(&cli);
    if let Err(err) = run(config, cli.command, cli.json) {
        eprintln!("habits: {err:#}");
        std::process::exit(1);
    }
}
