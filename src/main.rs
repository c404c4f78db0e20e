use anyhow::Context;
use chrono::Local;
use clap::Parser;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use realtor_agent_scraper::config::{ConfigManager, FileConfigManager};
use realtor_agent_scraper::orchestrator::until_interrupted;
use realtor_agent_scraper::{ChromeSessionFactory, CsvSnapshotWriter, RunOrchestrator};

#[derive(Parser, Debug)]
#[command(name = "realtor-agent-scraper", version, about = "Scrape agent listings from the realtor.ca map search")]
struct Cli {
    /// Configuration file, created with defaults when missing
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Comma-separated town names (default: the configured selection)
    #[arg(short, long, value_delimiter = ',')]
    towns: Vec<String>,

    /// Results pages to walk per town (1-50)
    #[arg(short, long)]
    pages: Option<u32>,

    /// Print the town catalog and exit
    #[arg(long)]
    list_towns: bool,

    /// Set up a search by hand in the browser, then scrape its results
    #[arg(long)]
    manual: bool,

    /// Show the browser window even if the config says headless
    #[arg(long)]
    headful: bool,

    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config_manager = FileConfigManager::new(cli.config.clone());
    let mut config = config_manager
        .load_config()
        .await
        .with_context(|| format!("loading {}", cli.config.display()))?;

    if !cli.towns.is_empty() {
        config.run.towns = cli.towns.clone();
    }
    if let Some(pages) = cli.pages {
        config.run.pages_per_town = pages;
    }
    if cli.headful {
        config.browser.headless = false;
    }
    if let Some(dir) = cli.output_dir {
        config.output.directory = dir;
    }
    config_manager.validate_config(&config)?;

    if cli.list_towns {
        for (index, town) in config.catalog().iter().enumerate() {
            println!("{:>2}. {}", index + 1, town.geo_name());
        }
        return Ok(());
    }

    let towns = config.selected_towns()?;
    let factory = Arc::new(ChromeSessionFactory::new(config.browser.clone()));
    let sink = CsvSnapshotWriter::new(
        &config.output.directory,
        config.output.schema,
        Local::now().naive_local(),
    );
    let mut orchestrator = RunOrchestrator::new(config, factory, Box::new(sink))?;

    let outcome = if cli.manual {
        info!("Starting manual search session");
        until_interrupted(async {
            orchestrator.open_site().await?;
            wait_for_enter().await?;
            orchestrator.run_current_results().await
        })
        .await
    } else {
        let names: Vec<&str> = towns.iter().map(|town| town.name.as_str()).collect();
        info!("Starting run over {}", names.join(", "));
        until_interrupted(orchestrator.run(&towns)).await
    };

    if let Err(e) = outcome {
        error!("Run stopped early: {}", e);
    }

    let summary = orchestrator.finish().await;
    println!("{}", summary);
    Ok(())
}

async fn wait_for_enter() -> realtor_agent_scraper::Result<()> {
    println!("Set up your search in the browser window, then press Enter to start scraping...");
    read_line_in_background(io::BufReader::new(io::stdin())).await.map_err(|_| {
        io::Error::new(io::ErrorKind::BrokenPipe, "stdin reader stopped without a line")
    })??;
    Ok(())
}

/// Read one line on a detached thread. The thread is never joined: after
/// Ctrl+C drops the receiver it stays blocked on input while the runtime exits.
fn read_line_in_background<R>(mut reader: R) -> oneshot::Receiver<io::Result<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    thread::spawn(move || {
        let mut line = String::new();
        let result = reader.read_line(&mut line).map(|_| line);
        let _ = tx.send(result);
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    #[tokio::test]
    async fn test_reads_first_line_off_the_runtime() {
        let line = read_line_in_background(Cursor::new("go\nignored\n")).await.unwrap().unwrap();
        assert_eq!(line, "go\n");
    }

    #[tokio::test]
    async fn test_closed_input_reads_empty_line() {
        let line = read_line_in_background(Cursor::new("")).await.unwrap().unwrap();
        assert!(line.is_empty());
    }

    /// Blocks until the test releases it, like a terminal nobody types into.
    struct Stalled(std::sync::mpsc::Receiver<()>);

    impl io::Read for Stalled {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    #[test]
    fn test_abandoned_read_does_not_block_runtime_shutdown() {
        let (release, stalled) = std::sync::mpsc::channel();
        let runtime = tokio::runtime::Runtime::new().unwrap();

        let waited = runtime.block_on(async {
            let pending = read_line_in_background(io::BufReader::new(Stalled(stalled)));
            tokio::time::timeout(Duration::from_millis(20), pending).await
        });
        assert!(waited.is_err());

        let started = std::time::Instant::now();
        runtime.shutdown_timeout(Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(1));
        drop(release);
    }
}
