use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use tunnelpx::config::Config;

#[derive(Parser, Debug, Clone)]
#[command(name = "tunnelpx", about, author, version, long_about = None, propagate_version = true)]
pub struct TunnelpxArguments {
    #[arg(short = 'c', long = "config", help = "Path to the configuration file")]
    pub(crate) config_path: Option<String>,
    #[arg(short = 'v', long = "verbose", help = "Enable verbose logging")]
    pub(crate) verbose: bool,
    #[arg(short = 'w', long = "watch", help = "Watch the configuration file for changes")]
    pub(crate) watch_config: bool,
    #[arg(short = 'l', long = "listen", help = "Address to listen on (e.g. 0.0.0.0:8080), overrides the config file")]
    pub(crate) listen: Option<String>,
    #[arg(short = 'r', long = "remote", help = "Backend URL (e.g. http://127.0.0.1:3000), overrides the config file")]
    pub(crate) remote: Option<String>,
    #[command(subcommand)]
    pub(crate) command: Option<TunnelpxCommands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum TunnelpxCommands {
    #[clap(name = "config", about = "Manage the configuration file")]
    Config {
        #[clap(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    #[clap(name = "show", about = "Show the current configuration")]
    Show,
    #[clap(name = "show-path", about = "Show the path to the configuration file")]
    ShowPath,
    #[clap(name = "init", about = "Write a configuration file, applying --listen and --remote if given")]
    Init,
}

impl TunnelpxArguments {
    pub fn effective_config_path(&self) -> String {
        Config::resolve_config_path(self.config_path.clone())
    }

    /// Apply --listen and --remote on top of a loaded config. Returns true if anything changed.
    pub fn apply_overrides(&self, config: &mut Config) -> bool {
        let mut changed = false;
        if let Some(listen) = &self.listen {
            config.set_listen(listen.clone());
            changed = true;
        }
        if let Some(remote) = &self.remote {
            config.set_remote(remote.clone());
            changed = true;
        }
        changed
    }

    pub async fn handle_arguments(&self) -> Result<()> {
        if let Some(command) = &self.command {
            let mut config = Config::try_load(self.effective_config_path()).await?;
            match command {
                TunnelpxCommands::Config { command } => match command {
                    ConfigCommands::Show => {
                        println!("{}", config);
                    }
                    ConfigCommands::ShowPath => {
                        println!("{}", config.get_path().to_string_lossy())
                    }
                    ConfigCommands::Init => {
                        self.apply_overrides(&mut config);
                        config.validate()?;
                        config.save().await?;
                        info!("Wrote configuration to {}", config.get_path().display());
                    }
                },
            }
            // Exit after the command has been executed
            std::process::exit(0);
        }
        Ok(())
    }
}
