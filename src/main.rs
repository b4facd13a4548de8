use clap::Parser;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    // Session cookies and the API key usually live in a local .env file.
    dotenv::dotenv().ok();
    init_tracing();

    let cli = yeoshin_scrape::cli::Cli::parse();
    match yeoshin_scrape::cli::run(cli).await {
        Ok(output) => {
            println!("{output}");
            std::process::ExitCode::SUCCESS
        }
        Err(err) => {
            if let Some(err) = err.downcast_ref::<yeoshin_scrape::error::YeoshinError>() {
                eprintln!("Error: {err}");
            } else {
                eprintln!("Error: {err:#}");
            }
            std::process::ExitCode::from(1)
        }
    }
}
