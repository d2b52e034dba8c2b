use clap::Parser;
use remote_heap::{ServerConfig, ServerHandle};
use std::path::PathBuf;
use std::process::ExitCode;

/// Memory manager server: one reference-counted arena shared by every client.
///
/// Flags override the `MEMMGR_*` environment variables.
#[derive(Parser, Debug)]
#[command(name = "memory_manager")]
#[command(version, about, long_about = None)]
struct Cli {
    /// TCP port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Arena size in megabytes
    #[arg(long)]
    memsize: Option<usize>,

    /// Folder for memory dumps; an empty value disables dumps
    #[arg(long = "dumpFolder")]
    dump_folder: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(memsize) = self.memsize {
            config.arena_size_mb = memsize;
            config.arena_size_bytes = None;
        }
        if let Some(folder) = self.dump_folder {
            let folder = folder.trim();
            config.dump_folder = if folder.is_empty() {
                None
            } else {
                Some(PathBuf::from(folder))
            };
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    #[cfg(feature = "dotenv")]
    {
        let _ = dotenvy::dotenv();
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = ServerConfig::from_env();
    cli.apply(&mut config);
    log::info!(
        "Starting memory manager: port={}, memsize={}MB, dump_folder={}",
        config.port,
        config.arena_size_mb,
        config
            .dump_folder
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<disabled>".to_string())
    );

    let server = match ServerHandle::from_config(&config) {
        Ok(server) => server,
        Err(e) => {
            log::error!("Failed to start memory manager: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.wait_for_ctrl_c() {
        log::error!("{}", e);
    }
    log::info!("Shutting down");
    server.shutdown();
    ExitCode::SUCCESS
}
