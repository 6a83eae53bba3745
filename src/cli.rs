use async_trait::async_trait;
use colored::Colorize;
use std::io::{self, Write};
use tabled::{Table, Tabled};

use vm_rental_portal::board::VmView;
use vm_rental_portal::confirm::ConfirmGate;
use vm_rental_portal::controls::Controls;
use vm_rental_portal::models::{VmAction, VmState};
use vm_rental_portal::notify::{Notifier, Severity};
use vm_rental_portal::poller::PollResult;
use vm_rental_portal::{ActionOutcome, ControlPanel};

/// Prints notifications the way the rest of the CLI reports results.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, severity: Severity, title: &str, message: &str) {
        let prefix = format!("{}:", title);
        let prefix = match severity {
            Severity::Success => prefix.green(),
            Severity::Info => prefix.cyan(),
            Severity::Warning => prefix.yellow(),
            Severity::Error => prefix.red(),
        };
        println!("{} {}", prefix, message);
    }
}

/// Asks on the terminal; anything but `y` declines.
pub struct PromptConfirm;

#[async_trait]
impl ConfirmGate for PromptConfirm {
    async fn confirm(&self, title: &str, message: &str) -> bool {
        let question = format!("{}\n{} [y/N]: ", title.bold(), message);
        tokio::task::spawn_blocking(move || prompt(&question).eq_ignore_ascii_case("y"))
            .await
            .unwrap_or(false)
    }
}

fn prompt(msg: &str) -> String {
    print!("{}", msg);
    let _ = io::stdout().flush();
    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        return String::new();
    }
    input.trim().to_string()
}

#[derive(Tabled)]
struct VmRow {
    id: String,
    name: String,
    state: String,
    uptime: String,
    controls: String,
}

impl VmRow {
    fn new(view: &VmView, controls: Controls) -> Self {
        let controls = match view.pending_message() {
            Some(pending) => pending.to_string(),
            None => {
                let names = controls.enabled_names();
                if names.is_empty() { "-".to_string() } else { names.join(" ") }
            }
        };
        Self {
            id: view.id.clone(),
            name: view.name.clone(),
            state: view.label().to_string(),
            uptime: view.uptime.clone().unwrap_or_else(|| "-".to_string()),
            controls,
        }
    }
}

#[derive(Tabled)]
struct SnapshotRow {
    reference: String,
    name: String,
    description: String,
}

pub fn print_help() {
    println!("{}", "Available commands:".bold());
    println!("  {}                    - List mounted VMs", "list".cyan());
    println!("  {}              - Mount a VM and start polling it", "watch <id>".cyan());
    println!("  {}            - Unmount a VM and stop polling it", "unwatch <id>".cyan());
    println!("  {}             - Show VM details and controls", "show <id>".cyan());
    println!("  {}          - Refresh VM status now", "refresh <id>".cyan());
    println!("  {}            - Start a VM", "start <id>".cyan());
    println!("  {}             - Stop a VM", "stop <id>".cyan());
    println!("  {}          - Restart a VM", "restart <id>".cyan());
    println!("  {}          - Print the console URL", "console <id>".cyan());
    println!("  {}        - List snapshots", "snapshots <id>".cyan());
    println!(
        "  {} - Create a snapshot",
        "snapshot <id> [name] [description]".cyan()
    );
    println!("  {} - Roll back to a snapshot", "rollback <id> <snapshot>".cyan());
    println!("  {}   - Delete a snapshot", "delete <id> <snapshot>".cyan());
    println!(
        "  {} - Apply an action to several VMs",
        "bulk <start|stop|restart> <id>...".cyan()
    );
    println!("  {}                    - Show this help", "help".cyan());
    println!("  {}                    - Exit the CLI", "exit".cyan());
}

fn format_state(view: &VmView) -> String {
    let label = view.label();
    match view.state {
        VmState::Active | VmState::Running => label.green().to_string(),
        VmState::Stopped => label.red().to_string(),
        VmState::Suspended => label.yellow().to_string(),
        VmState::Pending | VmState::Provisioning => label.blue().to_string(),
        _ => label.dimmed().to_string(),
    }
}

fn print_view(panel: &ControlPanel, view: &VmView) {
    let controls = view.controls(panel.board().policy());
    println!("{}", "VM Details".bold());
    println!("{}", "-".repeat(40));
    println!("  ID:        {}", view.id.yellow());
    println!("  Name:      {}", view.name);
    println!("  State:     {}", format_state(view));
    if let Some(uptime) = &view.uptime {
        println!("  Uptime:    {}", uptime);
    }
    if let Some(pending) = view.pending_message() {
        println!("  Pending:   {}", pending.yellow());
    }
    let names = controls.enabled_names();
    println!(
        "  Controls:  {}",
        if names.is_empty() { "none".dimmed().to_string() } else { names.join(", ") }
    );
    println!("  Snapshots: {}", view.snapshots.len());
}

fn print_snapshots(view: &VmView) {
    if view.snapshots.is_empty() {
        println!("{}", "No snapshots".yellow());
        return;
    }
    let rows: Vec<SnapshotRow> = view
        .snapshots
        .iter()
        .map(|s| SnapshotRow {
            reference: s.proxmox_name.clone(),
            name: s.name.clone(),
            description: s.description.clone(),
        })
        .collect();
    println!("{}", Table::new(&rows));
}

fn report(outcome: &ActionOutcome) {
    match outcome {
        ActionOutcome::Declined => println!("Cancelled"),
        ActionOutcome::NotTracked => println!(
            "{} VM is not mounted. Use {} first.",
            "Error:".red(),
            "watch <id>".cyan()
        ),
        // Everything else has already been surfaced through the notifier.
        _ => {}
    }
}

fn default_snapshot_name() -> String {
    format!("Snapshot_{}", chrono::Local::now().format("%Y-%m-%d"))
}

/// Run one REPL line. Returns `false` when the user asked to exit.
pub async fn handle_command(line: &str, panel: &ControlPanel) -> bool {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some((&command, args)) = parts.split_first() else {
        return true;
    };

    match command {
        "help" | "?" => print_help(),

        "exit" | "quit" | "q" => return false,

        "list" | "ls" => {
            let views = panel.views();
            if views.is_empty() {
                println!("{}", "No VMs mounted".yellow());
            } else {
                let policy = panel.board().policy();
                let rows: Vec<VmRow> = views
                    .iter()
                    .map(|view| VmRow::new(view, view.controls(policy)))
                    .collect();
                println!("{}", Table::new(&rows));
            }
        }

        "watch" | "mount" => {
            let Some(vm_id) = args.first() else {
                println!("{}", "Usage: watch <id>".yellow());
                return true;
            };
            match panel.mount_remote(vm_id).await {
                Ok(view) => print_view(panel, &view),
                Err(e) => println!("{} {}", "Error:".red(), e),
            }
        }

        "unwatch" | "unmount" => {
            let Some(vm_id) = args.first() else {
                println!("{}", "Usage: unwatch <id>".yellow());
                return true;
            };
            if panel.unmount(vm_id) {
                println!("{} VM {} unmounted", "Success:".green(), vm_id);
            } else {
                println!("{} VM {} is not mounted", "Error:".red(), vm_id);
            }
        }

        "show" | "get" => {
            let Some(vm_id) = args.first() else {
                println!("{}", "Usage: show <id>".yellow());
                return true;
            };
            match panel.view(vm_id) {
                Some(view) => print_view(panel, &view),
                None => report(&ActionOutcome::NotTracked),
            }
        }

        "refresh" => {
            let Some(vm_id) = args.first() else {
                println!("{}", "Usage: refresh <id>".yellow());
                return true;
            };
            match panel.refresh(vm_id).await {
                PollResult::Applied(_) => {
                    if let Some(view) = panel.view(vm_id) {
                        print_view(panel, &view);
                    }
                }
                PollResult::SkippedLocked => println!(
                    "{} An operation is in progress; status will update when it completes.",
                    "Info:".cyan()
                ),
                PollResult::Failed(e) => println!("{} {}", "Error:".red(), e),
                PollResult::NotTracked => report(&ActionOutcome::NotTracked),
            }
        }

        "start" | "stop" | "restart" | "reboot" => {
            let Some(vm_id) = args.first() else {
                println!("{}", format!("Usage: {} <id>", command).yellow());
                return true;
            };
            let action: VmAction = match command.parse() {
                Ok(action) => action,
                Err(e) => {
                    println!("{} {}", "Error:".red(), e);
                    return true;
                }
            };
            if let Some(controls) = panel.controls(vm_id) {
                if !controls.allows(action) {
                    println!(
                        "{} {} is not available in the current state",
                        "Error:".red(),
                        action
                    );
                    return true;
                }
            }
            let outcome = panel.dispatcher().invoke(vm_id, action).await;
            report(&outcome);
            if outcome.is_success() {
                if let Some(view) = panel.view(vm_id) {
                    println!("  VM {} is now {}", view.name, format_state(&view));
                }
            }
        }

        "console" | "connect" => {
            let Some(vm_id) = args.first() else {
                println!("{}", "Usage: console <id>".yellow());
                return true;
            };
            match panel.console_url(vm_id) {
                Ok(url) => println!("{} Open the console at {}", "Info:".cyan(), url.bold()),
                Err(e) => println!("{} {}", "Error:".red(), e),
            }
        }

        "snapshots" => {
            let Some(vm_id) = args.first() else {
                println!("{}", "Usage: snapshots <id>".yellow());
                return true;
            };
            if panel.view(vm_id).is_none() {
                report(&ActionOutcome::NotTracked);
                return true;
            }
            panel.snapshots().refresh(vm_id).await;
            if let Some(view) = panel.view(vm_id) {
                print_snapshots(&view);
            }
        }

        "snapshot" => {
            let Some(vm_id) = args.first() else {
                println!("{}", "Usage: snapshot <id> [name] [description]".yellow());
                return true;
            };
            if panel.controls(vm_id).is_some_and(|c| !c.snapshot) {
                println!(
                    "{} snapshots are not available in the current state",
                    "Error:".red()
                );
                return true;
            }
            let name = match args.get(1) {
                Some(name) => name.to_string(),
                None => {
                    let default = default_snapshot_name();
                    let input = prompt(&format!("Snapshot name [{}]: ", default));
                    if input.is_empty() { default } else { input }
                }
            };
            let description = args.get(2..).map(|rest| rest.join(" ")).unwrap_or_default();
            let outcome = panel.snapshots().create(vm_id, &name, &description).await;
            report(&outcome);
            if outcome.is_success() {
                if let Some(view) = panel.view(vm_id) {
                    print_snapshots(&view);
                }
            }
        }

        "rollback" | "restore" => {
            let (Some(vm_id), Some(snapshot)) = (args.first(), args.get(1)) else {
                println!("{}", "Usage: rollback <id> <snapshot>".yellow());
                return true;
            };
            report(&panel.snapshots().rollback(vm_id, snapshot).await);
        }

        "delete" | "rm" => {
            let (Some(vm_id), Some(snapshot)) = (args.first(), args.get(1)) else {
                println!("{}", "Usage: delete <id> <snapshot>".yellow());
                return true;
            };
            report(&panel.snapshots().delete(vm_id, snapshot).await);
        }

        "bulk" => {
            let Some((action, ids)) = args.split_first() else {
                println!("{}", "Usage: bulk <start|stop|restart> <id>...".yellow());
                return true;
            };
            let action: VmAction = match action.parse() {
                Ok(action) => action,
                Err(e) => {
                    println!("{} {}", "Error:".red(), e);
                    return true;
                }
            };
            let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
            report(&panel.bulk().apply(action, &ids).await);
        }

        _ => println!(
            "{} Unknown command: {}. Type 'help' for available commands.",
            "Error:".red(),
            command
        ),
    }

    true
}
