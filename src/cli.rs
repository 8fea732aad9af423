use clap::{Parser, Subcommand};

/// TapCanvas token router - credential resolution and shared-pool circuit breaker
#[derive(Debug, Parser)]
#[command(name = "tapcanvas-router", version, about)]
pub struct Cli {
    /// Use an in-process store instead of PostgreSQL (data is lost on exit)
    #[arg(long, global = true)]
    pub memory: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to ROUTER_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Manage vendor credentials
    Credential {
        #[command(subcommand)]
        command: CredentialCommands,
    },

    /// Resolve the credential a user would get for a vendor
    Resolve {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        vendor: String,
        #[arg(long)]
        token_id: Option<String>,
    },

    /// Report an upstream failure against a credential
    Fail {
        #[arg(long)]
        token_id: String,
    },

    /// Manage task bindings
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },

    /// Delete expired task bindings now
    Sweep,
}

#[derive(Debug, Subcommand)]
pub enum CredentialCommands {
    /// Store a new vendor credential
    Add {
        #[arg(long)]
        owner_id: String,
        #[arg(long)]
        vendor: String,
        #[arg(long)]
        secret: String,
        /// Add the credential to the vendor's shared fallback pool
        #[arg(long)]
        shared: bool,
    },
    /// List a user's credentials (secrets masked)
    List {
        #[arg(long)]
        owner_id: String,
    },
    /// Re-enable a credential
    Enable {
        #[arg(long)]
        id: String,
    },
    /// Disable a credential
    Disable {
        #[arg(long)]
        id: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum TaskCommands {
    /// Bind a vendor task to the credential that created it
    Bind {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        token_id: String,
        #[arg(long)]
        task_id: String,
        #[arg(long)]
        vendor: String,
    },
    /// Show the credential bound to a task
    Lookup {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        task_id: String,
        #[arg(long)]
        vendor: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_help_parses_without_environment() {
        let err = Cli::try_parse_from(["tapcanvas-router", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_memory_flag_is_global() {
        let cli = Cli::try_parse_from(["tapcanvas-router", "sweep", "--memory"]).unwrap();
        assert!(cli.memory);
        assert!(matches!(cli.command, Some(Commands::Sweep)));
    }
}
