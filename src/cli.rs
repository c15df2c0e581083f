//! Command-line interface.

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "voice-bridge")]
#[command(about = "Realtime voice bridge between Twilio Media Streams and the OpenAI Realtime API", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP/WebSocket server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Enable HTTPS
        #[arg(long)]
        https: bool,
        /// Path to TLS certificate (required with --https)
        #[arg(long)]
        cert: Option<String>,
        /// Path to TLS private key (required with --https)
        #[arg(long)]
        key: Option<String>,
    },
    /// Print the resolved configuration
    Config {
        /// Print the config file path instead of its contents
        #[arg(long)]
        path: bool,
    },
    /// Check that the process is ready to serve calls
    Doctor,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve { host, port, https, cert, key }) => {
            if https && (cert.is_none() || key.is_none()) {
                anyhow::bail!("--https requires both --cert and --key");
            }
            crate::server::start(&host, port, https, cert, key).await
        }
        Some(Commands::Config { path }) => {
            if path {
                println!("{}", crate::config::config_path()?.display());
            } else {
                let config = Config::load()?;
                println!("{}", toml::to_string_pretty(&config)?);
            }
            Ok(())
        }
        Some(Commands::Doctor) => run_doctor(),
        None => {
            let config = Config::load()?;
            println!("voice-bridge {}", env!("CARGO_PKG_VERSION"));
            println!("listening address: {}:{}", config.http.host, config.http.port);
            println!("run `voice-bridge serve` to start the server");
            Ok(())
        }
    }
}

/// Quick sanity check of the things the server needs before it can take
/// a call: a loadable config and a set `OPENAI_API_KEY`.
fn run_doctor() -> Result<()> {
    let config = Config::load()?;
    println!("config: ok ({})", crate::config::config_path()?.display());

    match config.openai_api_key() {
        Ok(_) => println!("OPENAI_API_KEY: set"),
        Err(e) => println!("OPENAI_API_KEY: MISSING ({e})"),
    }

    if !crate::config::SUPPORTED_OPENAI_VOICES.contains(&config.bridge.audio.voice.as_str()) {
        println!(
            "warning: configured voice {:?} is not in the known-supported list {:?}",
            config.bridge.audio.voice,
            crate::config::SUPPORTED_OPENAI_VOICES
        );
    }

    Ok(())
}
