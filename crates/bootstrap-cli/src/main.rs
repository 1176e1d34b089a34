//! Command-line driver for the node bootstrap orchestrator
//!
//! # Usage
//!
//! `start` stays in the foreground while it owns a launched node and stops
//! the node on Ctrl-C. An attached or external node is left alone.
//!
//! ```bash
//! # Bring the node up from the stored config, or from flags when none is usable
//! node-bootstrap start
//! node-bootstrap start --dir ~/.quorum --password hunter2 --save-password
//! node-bootstrap start --host node.lan --port 8002 --token $JWT --cert node.pem
//! node-bootstrap start --history 0
//!
//! # Inspect or clear what is remembered
//! node-bootstrap show
//! node-bootstrap history
//! node-bootstrap forget 1
//! node-bootstrap reset
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use node_bootstrap::{
    select_folder, BootstrapOrchestrator, BootstrapOutcome, BootstrapSession, BootstrapSettings,
    ExternalDraft, InternalIntent, NodeConfig, NodeMode, ProcessLauncher, SelectionKind,
};
use tokio_util::sync::CancellationToken;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Node config file (overrides the platform config dir)
    #[arg(long, env = "NODE_BOOTSTRAP_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Node binary launched in internal mode
    #[arg(long, env = "NODE_BOOTSTRAP_NODE_BIN", default_value = "quorum-node", global = true)]
    node_bin: PathBuf,

    /// Local API port of a launched node
    #[arg(long, env = "NODE_BOOTSTRAP_API_PORT", default_value_t = 8002, global = true)]
    api_port: u16,

    /// Exit code the node uses for a wrong keystore password
    #[arg(long, global = true)]
    bad_password_exit_code: Option<i32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bring the node to a ready state
    Start(StartArgs),
    /// Print the stored node config as JSON
    Show,
    /// List remembered external endpoints
    History,
    /// Delete a remembered external endpoint
    Forget {
        /// Index as printed by `history`
        index: usize,
    },
    /// Clear the stored node config
    Reset,
}

/// Input used when the stored config cannot start the node on its own
#[derive(Args, Debug, Default)]
struct StartArgs {
    /// Node data directory (internal mode)
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Keystore password (internal mode)
    #[arg(long, env = "NODE_KEYSTORE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Remember the password for unattended starts
    #[arg(long, default_value_t = false)]
    save_password: bool,

    /// Create the data directory for a new node
    #[arg(long, default_value_t = false)]
    new: bool,

    /// External node host (blank means 127.0.0.1)
    #[arg(long)]
    host: Option<String>,

    /// External node port
    #[arg(long)]
    port: Option<String>,

    /// Bearer token for the external node
    #[arg(long)]
    token: Option<String>,

    /// PEM certificate file to trust for the external node
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Reconnect to the remembered endpoint at this index
    #[arg(long, conflicts_with_all = ["host", "port", "token", "cert"])]
    history: Option<usize>,
}

impl StartArgs {
    /// Which selection screen the flags fill in, if any
    fn selection(&self) -> Option<SelectionKind> {
        if self.history.is_some()
            || self.host.is_some()
            || self.port.is_some()
            || self.token.is_some()
            || self.cert.is_some()
        {
            Some(SelectionKind::External)
        } else if self.dir.is_some() || self.password.is_some() {
            Some(SelectionKind::Internal)
        } else {
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut settings = BootstrapSettings::default();
    if let Some(path) = &cli.config {
        settings = settings.with_config_path(path);
    }

    let mut launcher = ProcessLauncher::new(&cli.node_bin, cli.api_port)?;
    if let Some(code) = cli.bad_password_exit_code {
        launcher = launcher.with_bad_password_exit_code(code);
    }
    let launcher = Arc::new(launcher);
    let orchestrator = BootstrapOrchestrator::from_settings(&settings, launcher.clone());

    match cli.command {
        Command::Start(args) => run_start(&orchestrator, &launcher, args).await,
        Command::Show => {
            let json = serde_json::to_string_pretty(&redacted(orchestrator.config()))?;
            println!("{}", json);
            Ok(())
        }
        Command::History => {
            for (index, entry) in orchestrator.history().iter().enumerate() {
                let tls = if entry.certificate.is_some() { " (tls)" } else { "" };
                println!("{}: {}{}", index, entry.label(), tls);
            }
            Ok(())
        }
        Command::Forget { index } => {
            let entry = orchestrator.delete_history(index)?;
            println!("forgot {}", entry.label());
            Ok(())
        }
        Command::Reset => {
            orchestrator.reset(&mut orchestrator.new_session())?;
            println!("node config cleared");
            Ok(())
        }
    }
}

async fn run_start(
    orchestrator: &BootstrapOrchestrator,
    launcher: &ProcessLauncher,
    args: StartArgs,
) -> Result<()> {
    let mut session = orchestrator.new_session();

    let cancel = session.cancellation_token();
    let shutdown = CancellationToken::new();
    let interrupted = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling bootstrap");
            cancel.cancel();
            interrupted.cancel();
        }
    });

    let mut steps = session.subscribe();
    tokio::spawn(async move {
        while steps.changed().await.is_ok() {
            let step = *steps.borrow_and_update();
            tracing::debug!(%step, "Bootstrap step");
        }
    });

    let mut outcome = orchestrator.start(&mut session).await?;
    if let BootstrapOutcome::NeedsInput { selection } = outcome {
        let Some(chosen) = args.selection() else {
            bail!(
                "no usable {} node config; pass --dir/--password or --host/--port/--token",
                selection
            );
        };
        outcome = submit(orchestrator, &mut session, chosen, args).await?;
    }

    match outcome {
        BootstrapOutcome::Ready { mode } => {
            println!("node ready ({})", mode);
            if mode == NodeMode::Internal && launcher.owns_child().await {
                eprintln!("node running in the foreground; press Ctrl-C to stop it");
                if let Some(status) = launcher.supervise(&shutdown).await? {
                    if !status.success() {
                        bail!("node exited with {}", status);
                    }
                }
            }
            Ok(())
        }
        BootstrapOutcome::Failed { reason } => {
            if session.took_too_long() {
                eprintln!("hint: `node-bootstrap reset` clears the stored config");
            }
            bail!("{} ({})", reason.message(), reason)
        }
        BootstrapOutcome::NeedsInput { selection } => {
            bail!("{} node selection still required", selection)
        }
    }
}

async fn submit(
    orchestrator: &BootstrapOrchestrator,
    session: &mut BootstrapSession,
    selection: SelectionKind,
    args: StartArgs,
) -> Result<BootstrapOutcome> {
    orchestrator.switch_selection(session, selection)?;

    match selection {
        SelectionKind::External => {
            if let Some(index) = args.history {
                return Ok(orchestrator.connect_history(session, index).await?);
            }
            let draft = external_draft(session.external_form().clone(), &args)?;
            Ok(orchestrator.submit_external(session, draft).await?)
        }
        SelectionKind::Internal => {
            if let Some(dir) = &args.dir {
                let intent = if args.new {
                    InternalIntent::CreateNew
                } else {
                    InternalIntent::OpenExisting
                };
                session.apply_folder_selection(select_folder(Some(dir.as_path()), intent));
                if let Some(notice) = session.notice() {
                    bail!("{}", notice);
                }
            }

            let mut draft = session.internal_form().clone();
            draft.intent = if args.new {
                InternalIntent::CreateNew
            } else {
                InternalIntent::OpenExisting
            };
            if let Some(password) = args.password {
                draft.password = password;
            }
            draft.save_password |= args.save_password;
            Ok(orchestrator.submit_internal(session, draft).await?)
        }
    }
}

/// Overlay the flags onto the pre-filled external draft
fn external_draft(mut draft: ExternalDraft, args: &StartArgs) -> Result<ExternalDraft> {
    if let Some(host) = &args.host {
        draft.host = host.clone();
    }
    if let Some(port) = &args.port {
        draft.port = port.clone();
    }
    if let Some(token) = &args.token {
        draft.token = token.clone();
    }
    if let Some(path) = &args.cert {
        draft.certificate = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read certificate {}", path.display()))?;
    }
    Ok(draft)
}

/// Copy of `config` safe to print
fn redacted(mut config: NodeConfig) -> NodeConfig {
    const MASK: &str = "********";
    if let Some(internal) = config.internal.as_mut() {
        if !internal.password.is_empty() {
            internal.password = MASK.to_string();
        }
    }
    for endpoint in config.external.iter_mut().chain(config.external_history.iter_mut()) {
        if !endpoint.token.is_empty() {
            endpoint.token = MASK.to_string();
        }
    }
    config
}
