use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use ghost_controller::{Controller, FilesystemTrash, InitOptions, RunState, VMError};
use ghost_session::{HypervisorAdapter, InMemoryAdapter};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

#[derive(Parser)]
#[command(name = "vmctl", version, about = "GhostVM lifecycle control")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new bundle.
    Init {
        bundle: PathBuf,
        #[arg(long, default_value_t = 2)]
        cpus: u32,
        #[arg(long, default_value_t = 4)]
        memory_gib: u64,
        #[arg(long, default_value_t = 64)]
        disk_gib: u64,
        #[arg(long)]
        linux: bool,
    },
    /// Run the installer against a bundle.
    Install {
        bundle: PathBuf,
        #[arg(long, default_value = "unknown")]
        build: String,
        #[arg(long, default_value = "0.0.0")]
        version: String,
    },
    /// Start a VM.
    Start { bundle: PathBuf },
    /// Stop a VM.
    Stop {
        bundle: PathBuf,
        #[arg(long)]
        force: bool,
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
    /// Suspend a running VM to disk.
    Suspend { bundle: PathBuf },
    /// Resume a suspended VM.
    Resume { bundle: PathBuf },
    /// Manage snapshots.
    Snapshot {
        #[command(subcommand)]
        action: SnapshotCommand,
    },
    /// Clone a bundle.
    Clone { bundle: PathBuf, new_name: String },
    /// Rename a bundle.
    Rename { bundle: PathBuf, new_name: String },
    /// Report a bundle's current status.
    Status { bundle: PathBuf },
    /// Discard suspended state.
    DiscardSuspend { bundle: PathBuf },
    /// Detach an attached installer ISO.
    DetachIso { bundle: PathBuf },
    /// List bundles in a directory.
    List { directory: PathBuf },
}

#[derive(Subcommand)]
enum SnapshotCommand {
    Create { bundle: PathBuf, name: String },
    Revert { bundle: PathBuf, name: String },
    Delete { bundle: PathBuf, name: String },
}

fn controller() -> Controller {
    Controller::new(
        Arc::new(|| Arc::new(InMemoryAdapter::new()) as Arc<dyn HypervisorAdapter>),
        Arc::new(FilesystemTrash),
    )
}

fn run(command: Command) -> anyhow::Result<()> {
    let ctl = controller();
    match command {
        Command::Init {
            bundle,
            cpus,
            memory_gib,
            disk_gib,
            linux,
        } => {
            let config = ctl.init(
                &bundle,
                InitOptions {
                    cpus,
                    memory_bytes: memory_gib * 1024 * 1024 * 1024,
                    disk_bytes: disk_gib * 1024 * 1024 * 1024,
                    guest_os_type: linux.then(|| "Linux".to_string()),
                    restore_image_path: None,
                    installer_iso_path: None,
                },
            )?;
            println!("created {} ({} cpus, {} bytes disk)", bundle.display(), config.cpus, config.disk_bytes);
        }
        Command::Install { bundle, build, version } => {
            ctl.install(&bundle, &build, &version)?;
            println!("installed {}", bundle.display());
        }
        Command::Start { bundle } => {
            let session = ctl.make_session(&bundle)?;
            let (config, _) = ghost_bundle::config::load(&bundle)?;
            let spec = ctl.machine_spec(&bundle, &config);
            session.start(spec).map_err(VMError::from)?;
            println!("started {}", bundle.display());
        }
        Command::Stop {
            bundle,
            force,
            timeout_secs,
        } => {
            stop_external_owner(&ctl, &bundle, force, Duration::from_secs(timeout_secs))?;
            println!("stopped {}", bundle.display());
        }
        Command::Suspend { bundle } => {
            let session = ctl.make_session(&bundle)?;
            let (config, _) = ghost_bundle::config::load(&bundle)?;
            let spec = ctl.machine_spec(&bundle, &config);
            session.start(spec).map_err(VMError::from)?;
            session.suspend().map_err(VMError::from)?;
            println!("suspended {}", bundle.display());
        }
        Command::Resume { bundle } => {
            let session = ctl.make_session(&bundle)?;
            let (config, _) = ghost_bundle::config::load(&bundle)?;
            let spec = ctl.machine_spec(&bundle, &config);
            session.resume(spec).map_err(VMError::from)?;
            println!("resumed {}", bundle.display());
        }
        Command::Snapshot { action } => match action {
            SnapshotCommand::Create { bundle, name } => {
                ctl.snapshot_create(&bundle, &name)?;
                println!("created snapshot {name}");
            }
            SnapshotCommand::Revert { bundle, name } => {
                ctl.snapshot_revert(&bundle, &name)?;
                println!("reverted to snapshot {name}");
            }
            SnapshotCommand::Delete { bundle, name } => {
                ctl.snapshot_delete(&bundle, &name)?;
                println!("deleted snapshot {name}");
            }
        },
        Command::Clone { bundle, new_name } => {
            let dest = sibling_bundle(&bundle, &new_name)?;
            ctl.clone_bundle(&bundle, &dest)?;
            println!("cloned {} -> {}", bundle.display(), dest.display());
        }
        Command::Rename { bundle, new_name } => {
            let dest = ctl.rename(&bundle, &new_name)?;
            println!("renamed {} -> {}", bundle.display(), dest.display());
        }
        Command::Status { bundle } => {
            let status = ctl.status(&bundle)?;
            let state = match status.state {
                RunState::Stopped => "stopped".to_string(),
                RunState::Suspended => "suspended".to_string(),
                RunState::Running { owner, pid } => format!("running ({owner:?}, pid {pid})"),
            };
            println!(
                "{}: {} | cpus={} memoryBytes={} diskBytes={}",
                bundle.display(),
                state,
                status.cpus,
                status.memory_bytes,
                status.disk_bytes
            );
        }
        Command::DiscardSuspend { bundle } => {
            ctl.discard_suspend(&bundle)?;
            println!("discarded suspend state for {}", bundle.display());
        }
        Command::DetachIso { bundle } => {
            ctl.detach_iso(&bundle)?;
            println!("detached ISO from {}", bundle.display());
        }
        Command::List { directory } => {
            for (path, config) in ctl.list(&directory)? {
                println!("{}\tcpus={}\tinstalled={}", path.display(), config.cpus, config.installed);
            }
        }
    }
    Ok(())
}

fn sibling_bundle(reference: &std::path::Path, new_name: &str) -> anyhow::Result<PathBuf> {
    let extension = reference
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| anyhow!("bundle path has no extension"))?;
    Ok(reference
        .parent()
        .unwrap_or_else(|| std::path::Path::new("."))
        .join(format!("{new_name}.{extension}")))
}

/// Escalates SIGTERM to SIGKILL for an externally (CLI-)owned VM process,
/// mirroring the lock-holder shape of spec.md §4.6's force-stop contract.
fn stop_external_owner(
    ctl: &Controller,
    bundle: &std::path::Path,
    force: bool,
    timeout: Duration,
) -> anyhow::Result<()> {
    let status = ctl.status(bundle)?;
    let RunState::Running { pid, .. } = status.state else {
        return Ok(());
    };
    let pid = Pid::from_raw(pid as i32);

    signal::kill(pid, Signal::SIGTERM).context("sending SIGTERM")?;
    if !force {
        return Ok(());
    }

    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if signal::kill(pid, None).is_err() {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    signal::kill(pid, Signal::SIGKILL).context("sending SIGKILL")?;
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            if let Some(vm_err) = e.downcast_ref::<VMError>() {
                eprintln!("{vm_err}");
            } else {
                eprintln!("{e}");
            }
            std::process::exit(1);
        }
    }
}
