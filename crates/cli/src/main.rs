use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "wabot")]
#[command(about = "Command-triggered WhatsApp bot", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, a default config file and the downloads directory.
    Init {
        /// Config file path (default: WABOT_CONFIG_PATH or ~/.wabot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the bot: start the WhatsApp bridge and answer !ping, !hello, !time, !help and !download.
    Run {
        /// Config file path (default: WABOT_CONFIG_PATH or ~/.wabot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Downloads directory (default from config or ./downloads)
        #[arg(long, value_name = "DIR")]
        downloads_dir: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("wabot {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run {
            config,
            downloads_dir,
        }) => {
            if let Err(e) = run_bot(config, downloads_dir).await {
                log::error!("bot failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let downloads = lib::init::init_config_dir(&path)?;
    println!(
        "initialized configuration at {}; downloads go to {}",
        lib::config::config_dir(&path).display(),
        downloads.display()
    );
    Ok(())
}

async fn run_bot(
    config_path: Option<std::path::PathBuf>,
    downloads_dir: Option<std::path::PathBuf>,
) -> anyhow::Result<()> {
    let (mut config, path) = lib::config::load_config(config_path)?;
    if let Some(dir) = downloads_dir {
        config.downloads.directory = dir;
    }
    log::info!("starting wabot with config {}", path.display());
    lib::bot::run_bot(config, path).await
}
