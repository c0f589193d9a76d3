use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use opsbox_core::{
    paths, platform, ComposeRequest, ConfigOverrides, Context, HostInfo, ProviderFactory, RunConfig,
};
use std::path::{Path, PathBuf};

mod commands;

#[derive(Parser)]
#[command(name = "opsbox")]
#[command(about = "Unikernel compose and instance management", long_about = None, version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Flags layered over the persisted configuration and the compose file.
#[derive(Args)]
struct GlobalArgs {
    /// Provider target (onprem, digitalocean)
    #[arg(short, long, global = true)]
    target: Option<String>,

    /// Kernel image path (defaults to the current toolchain's kernel)
    #[arg(long, global = true)]
    kernel: Option<String>,

    /// Memory in MB for each instance
    #[arg(long, global = true)]
    memory: Option<u32>,

    /// Number of CPUs for each instance
    #[arg(long, global = true)]
    cpus: Option<u32>,

    /// Make `compose down` delete every instance the provider reports
    #[arg(long, global = true)]
    all_instances: bool,
}

impl GlobalArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            target: self.target.clone(),
            kernel: self.kernel.clone(),
            memory: self.memory,
            cpus: self.cpus,
            all_instances: self.all_instances,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Bring compose sets up or down
    #[command(subcommand)]
    Compose(ComposeCommands),

    /// Manage instances on the active provider
    #[command(subcommand)]
    Instance(InstanceCommands),

    /// Manage volumes on the active provider
    #[command(subcommand)]
    Volume(VolumeCommands),
}

#[derive(Subcommand)]
enum ComposeCommands {
    /// Boot every service of a compose file
    Up {
        /// Compose file (defaults to compose.yaml, then compose.yml)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Tear down the instances and bridge of a compose file
    Down {
        /// Compose file; must be byte-identical to the one used for `up`
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum InstanceCommands {
    /// List instances
    Ls,

    /// Delete an instance
    Rm {
        /// Instance name
        name: String,
    },
}

#[derive(Subcommand)]
enum VolumeCommands {
    /// Create a volume
    Create {
        /// Volume name
        name: String,

        /// Size in MB
        #[arg(short, long)]
        size: u64,

        /// File to seed the volume with
        #[arg(short, long)]
        data: Option<String>,

        /// Filesystem label
        #[arg(short, long)]
        label: Option<String>,
    },

    /// List volumes
    Ls,

    /// Delete a volume
    Rm {
        /// Volume name
        name: String,
    },

    /// Attach a volume to an instance
    Attach {
        /// Instance name
        instance: String,

        /// Volume name
        volume: String,

        /// Attachment slot
        #[arg(long, default_value = "0")]
        slot: u32,
    },

    /// Detach a volume from an instance
    Detach {
        /// Instance name
        instance: String,

        /// Volume name
        volume: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli, HostInfo::current(), &paths::home_dir()).await {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, host: HostInfo, home: &Path) -> Result<()> {
    // Compose is gated before the configuration or any other file is read.
    if matches!(cli.command, Commands::Compose(_)) {
        platform::check_available(host.platform, host.components)?;
    }

    let base = RunConfig::load(home)?;
    opsbox_core::init_observability(&base.log_level);

    let flags = cli.global.overrides();

    match cli.command {
        Commands::Compose(cmd) => {
            let request = ComposeRequest::new(base).with_flags(flags);
            match cmd {
                ComposeCommands::Up { file } => {
                    let request = ComposeRequest { compose_file: file, ..request };
                    commands::compose::up(request, host).await?
                }
                ComposeCommands::Down { file } => {
                    let request = ComposeRequest { compose_file: file, ..request };
                    commands::compose::down(request, host).await?
                }
            }
        }
        Commands::Instance(cmd) => {
            let config = base.merge(&flags);
            let provider = ProviderFactory::create(&config)?;
            let ctx = Context::new(config);
            match cmd {
                InstanceCommands::Ls => commands::instance::ls(provider.as_ref(), &ctx).await?,
                InstanceCommands::Rm { name } => {
                    commands::instance::rm(provider.as_ref(), &ctx, &name).await?
                }
            }
        }
        Commands::Volume(cmd) => {
            let config = base.merge(&flags);
            let provider = ProviderFactory::create(&config)?;
            let ctx = Context::new(config);
            let provider = provider.as_ref();
            match cmd {
                VolumeCommands::Create { name, size, data, label } => {
                    commands::volume::create(provider, &ctx, name, size, data, label).await?
                }
                VolumeCommands::Ls => commands::volume::ls(provider, &ctx).await?,
                VolumeCommands::Rm { name } => commands::volume::rm(provider, &ctx, &name).await?,
                VolumeCommands::Attach { instance, volume, slot } => {
                    commands::volume::attach(provider, &ctx, &instance, &volume, slot).await?
                }
                VolumeCommands::Detach { instance, volume } => {
                    commands::volume::detach(provider, &ctx, &instance, &volume).await?
                }
            }
        }
    }

    Ok(())
}
