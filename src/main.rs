use anyhow::Result;
use chrono::Local;
use log::{error, info, warn};
use std::env;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use automod::prelude::*;

/// Log sink that writes every line to stderr and appends it to the log file
struct TeeWriter {
    file: Option<File>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        if let Some(file) = self.file.as_mut() {
            // stop teeing once the log file fails
            if file.write_all(buf).is_err() {
                self.file = None;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

fn init_logging(log_path: &Path) {
    let file = match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(file) => Some(file),
        Err(e) => {
            eprintln!("Cannot open log file {}: {}", log_path.display(), e);
            None
        }
    };

    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(TeeWriter { file })))
        .init();
}

/// Read operator commands from stdin and forward them to the engine
fn spawn_console(commands: mpsc::Sender<OperatorCommand>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match OperatorCommand::parse(&line) {
                        Ok(command) => {
                            if commands.send(command).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => println!("{}", e),
                    }
                }
                Ok(None) => {
                    info!("Console input closed");
                    break;
                }
                Err(e) => {
                    error!("Failed to read console input: {}", e);
                    break;
                }
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let config_path =
        PathBuf::from(env::var("AUTOMOD_CONFIG").unwrap_or_else(|_| "automod.toml".to_string()));
    let config = AppConfig::load(&config_path).await?;

    let files = config.data_files();
    std::fs::create_dir_all(&files.dir)?;
    init_logging(&files.log);

    info!("Starting AutoMod v{}", automod::VERSION);
    info!("Config: {} | data directory: {}", config_path.display(), files.dir.display());

    let options = EngineOptions {
        kick_delay: config.kick_delay(),
        reconcile_interval: config.unban_check_interval(),
    };
    let connection = IrcConnection::new(config.irc_config());
    let automod = AutoMod::new(files.clone(), options, config.whitelist.clone(), Box::new(connection));

    automod.load_state().await;
    automod.connection().write().await.connect().await?;

    let (commands_tx, commands_rx) = mpsc::channel(32);
    spawn_console(commands_tx);

    let (reload_tx, reload_rx) = mpsc::channel(8);
    let _watcher = if config.watch_rule_files {
        match watch_data_files(&files, reload_tx) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("Rule file watching disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    if let Err(e) = automod.run(commands_rx, reload_rx).await {
        error!("AutoMod stopped with error: {}", e);
    }

    automod.shutdown().await?;
    Ok(())
}
