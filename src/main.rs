mod cli;

use clap::Parser;
use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vm_rental_portal::ControlPanel;
use vm_rental_portal::client::HttpBackend;
use vm_rental_portal::config::PanelConfig;
use vm_rental_portal::controls::ControlPolicy;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "vmctl")]
#[command(about = "Interactive control surface for rented virtual machines")]
struct Cli {
    /// Portal base URL
    #[arg(short, long, default_value = "http://localhost:8069")]
    server: String,

    /// Portal session id, sent as the `session_id` cookie
    #[arg(long)]
    session: Option<String>,

    /// Seconds between status polls of each mounted VM (0 disables polling)
    #[arg(long, default_value_t = 30)]
    poll_interval: u64,

    /// Seconds before the follow-up status poll after an action (0 disables it)
    #[arg(long, default_value_t = 2)]
    reconcile_delay: u64,

    /// Request timeout in seconds (0 waits indefinitely)
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Disable snapshot operations while a VM is stopped or suspended
    #[arg(long)]
    no_snapshot_when_stopped: bool,

    /// VM to mount at startup; may be repeated
    #[arg(long = "vm")]
    vms: Vec<String>,
}

impl Cli {
    fn panel_config(&self) -> PanelConfig {
        let seconds = |s: u64| (s > 0).then(|| Duration::from_secs(s));
        PanelConfig {
            poll_interval: Duration::from_secs(self.poll_interval),
            reconcile_delay: seconds(self.reconcile_delay),
            request_timeout: seconds(self.timeout),
            controls: ControlPolicy {
                snapshot_when_stopped: !self.no_snapshot_when_stopped,
            },
            ..PanelConfig::default()
        }
    }
}

fn history_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vmctl_history")
}

fn print_banner(server: &str) {
    println!();
    println!("  ╔═══════════════════════════════════════════╗");
    println!("  ║           VM Rental Control Panel         ║");
    println!("  ╚═══════════════════════════════════════════╝");
    println!();
    println!("  Version:   {}", VERSION);
    println!("  Portal:    {}", server.yellow());
    println!();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vm_rental_portal=info,vmctl=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    print_banner(&cli.server);

    let backend = match HttpBackend::new(&cli.server, cli.session.as_deref()) {
        Ok(backend) => backend,
        Err(e) => {
            eprintln!("{} Failed to create portal client: {}", "Error:".red(), e);
            std::process::exit(1);
        }
    };

    let panel = ControlPanel::new(
        cli.panel_config(),
        Arc::new(backend),
        Arc::new(cli::ConsoleNotifier),
        Arc::new(cli::PromptConfirm),
    );

    for vm_id in &cli.vms {
        match panel.mount_remote(vm_id).await {
            Ok(view) => println!("  Mounted VM {} ({})", view.id.yellow(), view.label()),
            Err(e) => println!("  {} could not mount VM {}: {}", "Warning:".yellow(), vm_id, e),
        }
    }

    println!("Type {} for available commands\n", "help".cyan());

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("{} Failed to initialize readline: {}", "Error:".red(), e);
            std::process::exit(1);
        }
    };
    let history = history_path();
    let _ = rl.load_history(&history);

    loop {
        match rl.readline("vmctl> ") {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(&line);
                if !cli::handle_command(&line, &panel).await {
                    println!("Goodbye!");
                    break;
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("Use 'exit' to quit");
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history);
    for vm_id in panel.board().ids() {
        panel.unmount(&vm_id);
    }
}
