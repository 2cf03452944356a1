use clap::{Parser, Subcommand};

/// Kaizen Studio governance core.
#[derive(Parser)]
#[command(name = "kaizend", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the governance API server
    Serve {
        #[arg(short, long, default_value = "8443")]
        port: u16,
    },

    /// Materialize the in-memory RBAC matrix into permissions/role_permissions
    SeedRbac,

    /// Manage org API keys
    ApiKey {
        #[command(subcommand)]
        command: ApiKeyCommands,
    },

    /// Manage ABAC policies
    Policy {
        #[command(subcommand)]
        command: PolicyCommands,
    },

    /// Decide a pending approval request
    Approval {
        #[command(subcommand)]
        command: ApprovalCommands,
    },
}

#[derive(Subcommand)]
pub enum ApiKeyCommands {
    /// Issue a new API key for an organization
    Issue {
        #[arg(long)]
        org_id: String,
        #[arg(long)]
        name: String,
        #[arg(long, value_delimiter = ',')]
        scopes: Vec<String>,
        #[arg(long, default_value = "600")]
        rate_limit: i64,
    },
    /// List API keys for an organization (metadata only, never the secret)
    List {
        #[arg(long)]
        org_id: String,
    },
    /// Revoke an API key
    Revoke {
        #[arg(long)]
        org_id: String,
        #[arg(long)]
        id: String,
    },
}

#[derive(Subcommand)]
pub enum PolicyCommands {
    /// Create an ABAC policy
    Create {
        #[arg(long)]
        org_id: String,
        #[arg(long)]
        resource_type: String,
        #[arg(long)]
        action: String,
        /// "allow" or "deny"
        #[arg(long, default_value = "allow")]
        effect: String,
        /// JSON condition tree; defaults to an unconditional match
        #[arg(long, default_value = "{\"all\":[]}")]
        conditions: String,
        #[arg(long, default_value = "0")]
        priority: i32,
    },
    /// List policies for an organization
    List {
        #[arg(long)]
        org_id: String,
    },
    /// Delete a policy
    Delete {
        #[arg(long)]
        org_id: String,
        #[arg(long)]
        id: String,
    },
}

#[derive(Subcommand)]
pub enum ApprovalCommands {
    /// Approve or reject a pending approval request
    Decide {
        #[arg(long)]
        org_id: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        reviewer_id: String,
        #[arg(long)]
        approve: bool,
    },
}
