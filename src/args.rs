use clap::{Parser, Subcommand};

/// Vote casting service for a single capped election.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serves the HTTP interface.
    Serve {
        /// (file path) The file containing the election description, in JSON format.
        #[clap(short, long, value_parser)]
        config: String,
        /// (address, optional) Overrides the bind address of the configuration.
        #[clap(long, value_parser)]
        bind: Option<String>,
    },
    /// Casts a single vote.
    Cast {
        #[clap(short, long, value_parser)]
        config: String,
        #[clap(long, value_parser)]
        name: String,
        #[clap(long, value_parser)]
        email: String,
        #[clap(long, value_parser)]
        phone: Option<String>,
        /// The id of the nominee, as given in the configuration.
        #[clap(long, value_parser)]
        nominee: String,
        /// (default unknown) The network origin recorded with the vote.
        #[clap(long, value_parser)]
        origin: Option<String>,
    },
    /// Closes the election.
    Close {
        #[clap(short, long, value_parser)]
        config: String,
    },
    /// Removes every vote and reopens the election.
    Reset {
        #[clap(short, long, value_parser)]
        config: String,
    },
    /// Prints the current results in JSON format.
    Results {
        #[clap(short, long, value_parser)]
        config: String,
        /// (file path) A reference file containing the expected results in JSON format. If provided,
        /// ballotbox will check that the current results match the reference.
        #[clap(short, long, value_parser)]
        reference: Option<String>,
    },
    /// Writes the voters as CSV.
    Export {
        #[clap(short, long, value_parser)]
        config: String,
        /// (file path, 'stdout' or empty) Where to write the CSV.
        #[clap(short, long, value_parser)]
        out: Option<String>,
        /// Only keeps the voters whose name, email or phone contains this text.
        #[clap(long, value_parser)]
        search: Option<String>,
    },
    /// Compares the vote counters with the recorded votes.
    Audit {
        #[clap(short, long, value_parser)]
        config: String,
        /// Recounts the counters that drifted.
        #[clap(long, takes_value = false)]
        repair: bool,
    },
}

impl Command {
    pub fn config(&self) -> &str {
        match self {
            Command::Serve { config, .. }
            | Command::Cast { config, .. }
            | Command::Close { config }
            | Command::Reset { config }
            | Command::Results { config, .. }
            | Command::Export { config, .. }
            | Command::Audit { config, .. } => config.as_str(),
        }
    }
}
