pub mod config_reader;
pub mod export;
pub mod http;

use log::{info, warn};

use election_core::*;
use snafu::{prelude::*, Snafu};

use std::fs;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::Value as JSValue;
use text_diff::print_diff;

use crate::args::{Args, Command};
use crate::service::config_reader::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ServiceError {
    #[snafu(display("Error opening file {path}"))]
    OpeningFile { source: io::Error, path: String },
    #[snafu(display("Error writing to {path}"))]
    WritingFile { source: io::Error, path: String },
    #[snafu(display("Error parsing JSON"))]
    ParsingJson { source: serde_json::Error },
    #[snafu(display("Invalid configuration: {reason}"))]
    InvalidConfig { reason: String },
    #[snafu(display("Error accessing the vote store"))]
    Store { source: StoreError },
    #[snafu(display("{source}"))]
    Rejected { source: VoteRejection },
    #[snafu(display("Error writing CSV"))]
    WritingCsv { source: csv::Error },
    #[snafu(display("Invalid bind address {bind}"))]
    InvalidBind {
        source: std::net::AddrParseError,
        bind: String,
    },
    #[snafu(display("Error running the HTTP server"))]
    Serving { source: io::Error },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Opens the store described by the configuration and checks its counters.
pub fn open_core(config: &BallotConfig) -> ServiceResult<ElectionCore<MemoryStore>> {
    let store = match &config.storage.snapshot_path {
        Some(p) => MemoryStore::open(p, config.nominees(), config.settings())
            .context(StoreSnafu {})?,
        None => {
            warn!("open_core: no snapshot path configured, votes will not survive a restart");
            MemoryStore::new(config.nominees(), config.settings())
        }
    };
    let core = ElectionCore::new(store.with_lock_timeout(config.lock_timeout()))
        .with_limits(config.limits());
    let drift = core.audit().context(RejectedSnafu {})?;
    if !drift.is_empty() {
        warn!("open_core: {} counters disagree with the recorded votes", drift.len());
    }
    Ok(core)
}

fn to_pretty_json<T: serde::Serialize>(value: &T) -> ServiceResult<String> {
    serde_json::to_string_pretty(value).context(ParsingJsonSnafu {})
}

fn read_reference(path: &str) -> ServiceResult<JSValue> {
    let contents = fs::read_to_string(path).context(OpeningFileSnafu { path })?;
    serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu {})
}

fn run_results(core: &ElectionCore<MemoryStore>, reference: Option<&str>) -> ServiceResult<()> {
    let results = core.results().context(RejectedSnafu {})?;
    let pretty_results = to_pretty_json(&results)?;
    println!("{}", pretty_results);

    // The reference results, if provided for comparison
    if let Some(reference_p) = reference {
        let reference_js = read_reference(reference_p)?;
        let pretty_reference = to_pretty_json(&reference_js)?;
        if pretty_reference != pretty_results {
            warn!("Found differences with the reference results");
            print_diff(pretty_reference.as_str(), pretty_results.as_str(), "\n");
            whatever!("Difference detected between current results and reference results")
        }
    }
    Ok(())
}

fn run_export(
    core: &ElectionCore<MemoryStore>,
    out: Option<&str>,
    search: Option<&str>,
) -> ServiceResult<()> {
    let voters = export::filter_voters(core.voters().context(RejectedSnafu {})?, search);
    let nominees = core.store().nominees().context(StoreSnafu {})?;
    match out {
        None | Some("stdout") => {
            export::write_voters_csv(io::stdout(), &voters, &nominees)
                .context(WritingCsvSnafu {})?;
        }
        Some(path) => {
            let file = fs::File::create(path).context(WritingFileSnafu { path })?;
            export::write_voters_csv(file, &voters, &nominees).context(WritingCsvSnafu {})?;
            info!("run_export: wrote {} voters to {}", voters.len(), path);
        }
    }
    Ok(())
}

fn run_audit(core: &ElectionCore<MemoryStore>, repair: bool) -> ServiceResult<()> {
    let drift = if repair {
        core.repair()
    } else {
        core.audit()
    }
    .context(RejectedSnafu {})?;
    if drift.is_empty() {
        println!("All counters match the recorded votes.");
    } else {
        println!("{}", to_pretty_json(&drift)?);
        if !repair {
            whatever!("{} counters disagree with the recorded votes", drift.len())
        }
    }
    Ok(())
}

fn run_serve(
    core: ElectionCore<MemoryStore>,
    config: &BallotConfig,
    bind: Option<&str>,
) -> ServiceResult<()> {
    let bind = bind.unwrap_or(config.server.bind.as_str()).to_string();
    let addr: SocketAddr = bind.parse().context(InvalidBindSnafu { bind })?;
    if config.server.admin_token.is_none() {
        warn!("run_serve: no admin token configured, administration is disabled");
    }
    let state = http::AppState {
        core: Arc::new(core),
        admin_token: config.server.admin_token.clone(),
    };
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context(ServingSnafu {})?;
    runtime
        .block_on(http::serve(addr, state))
        .context(ServingSnafu {})
}

pub fn run(args: &Args) -> ServiceResult<()> {
    let config = read_config(args.command.config())?;
    info!(
        "run: election {:?} with {} nominees, cap {}",
        config.election.title.as_deref().unwrap_or(""),
        config.nominees.len(),
        config.settings().max_votes
    );
    let core = open_core(&config)?;

    match &args.command {
        Command::Serve { bind, .. } => run_serve(core, &config, bind.as_deref()),
        Command::Cast {
            name,
            email,
            phone,
            nominee,
            origin,
            ..
        } => {
            let submission = VoteSubmission {
                name: name.clone(),
                email: email.clone(),
                phone: phone.clone(),
                nominee_id: NomineeId::new(nominee.as_str()),
            };
            let origin = resolve_origin(None, origin.as_deref());
            let receipt = core
                .cast_vote(&submission, &origin)
                .context(RejectedSnafu {})?;
            println!("{}", to_pretty_json(&receipt)?);
            Ok(())
        }
        Command::Close { .. } => {
            match core.close().context(RejectedSnafu {})? {
                CloseOutcome::Closed => println!("The election is now closed."),
                CloseOutcome::AlreadyClosed => println!("The election was already closed."),
            }
            Ok(())
        }
        Command::Reset { .. } => {
            core.reset().context(RejectedSnafu {})?;
            println!("All votes removed, the election is open.");
            Ok(())
        }
        Command::Results { reference, .. } => run_results(&core, reference.as_deref()),
        Command::Export { out, search, .. } => run_export(&core, out.as_deref(), search.as_deref()),
        Command::Audit { repair, .. } => run_audit(&core, *repair),
    }
}
