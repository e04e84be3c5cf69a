// src/main.rs

use jobdag::{cli, logging, run};

#[tokio::main]
async fn main() {
    match run_main().await {
        Ok(failed) if failed => std::process::exit(1),
        Ok(_) => {}
        Err(err) => {
            eprintln!("jobdag error: {err:?}");
            std::process::exit(1);
        }
    }
}

/// Returns whether any job failed.
async fn run_main() -> anyhow::Result<bool> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    let summary = run(args).await?;
    Ok(summary.has_failures())
}
