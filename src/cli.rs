use clap::{Parser, Subcommand};

/// gi: invoke remote webservices from stored GenericInterface configs
#[derive(Parser)]
#[command(name = "gi", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Call an invoker and print the response as JSON
    Invoke {
        webservice: String,
        invoker: String,
        /// Request payload as a JSON object
        #[arg(long, default_value = "{}")]
        data: String,
        /// Explicit path, may contain :name placeholders
        #[arg(long)]
        path: Option<String>,
        /// Explicit HTTP method
        #[arg(long)]
        method: Option<String>,
        /// Give up after this many seconds
        #[arg(long)]
        deadline: Option<u64>,
    },

    /// List webservices
    List {
        /// Only active webservices
        #[arg(long)]
        valid: bool,
    },

    /// Print a webservice config as YAML
    Show { name: String },

    /// Create or update webservices from a YAML definition list
    Import { file: String },

    /// Delete a webservice and its history
    Delete { id: i32 },

    /// List config snapshots of a webservice
    History { id: i32 },

    /// Restore a webservice config from a history snapshot
    Restore { history_id: i64 },

    /// Check that a webservice's remote host answers
    TestConnection { name: String },

    /// Print the SOAP envelope an invocation would send
    Envelope {
        webservice: String,
        invoker: String,
        #[arg(long, default_value = "{}")]
        data: String,
    },

    /// Run an autocomplete search the way a webservice dropdown field would
    FieldSearch {
        webservice: String,
        /// Search invoker
        invoker: String,
        term: String,
        /// Response key holding the stored value
        #[arg(long, default_value = "ID")]
        stored_value: String,
        /// Comma-separated response keys to display
        #[arg(long, default_value = "Name")]
        display: String,
        #[arg(long)]
        limit: Option<u64>,
    },
}
