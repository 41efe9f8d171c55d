//! Quadstore - command-line tool for loading, inspecting and checking a store
//!
//! Usage:
//!   quadstore load --loc DB data/people.nt data/places.nq
//!   quadstore load --loc DB --graph http://example.org/g --strategy parallel data.ttl
//!   quadstore stats --loc DB --write
//!   quadstore dump --loc DB
//!   quadstore verify --loc DB

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use oxigraph::io::{RdfFormat, RdfParser};
use oxigraph::model::NamedNode;
use quadstore::storage::util::STATS_FILE;
use quadstore::{
    BulkLoader, Dataset, IndexBuild, LoadTarget, LoaderOptions, Quad, StoreConfig, StoreError,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "quadstore")]
#[command(about = "Persistent RDF triple and quad store")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bulk load RDF files into a store
    Load {
        /// Store directory
        #[arg(long)]
        loc: PathBuf,

        /// Load every file into this named graph
        #[arg(long)]
        graph: Option<String>,

        /// Index build strategy: sequential, interleaved or parallel
        #[arg(long, default_value = "interleaved")]
        strategy: String,

        /// Collect predicate statistics
        #[arg(long)]
        stats: bool,

        /// Tuples between progress lines
        #[arg(long, default_value = "50000")]
        tick: u64,

        /// Input files; "-" reads N-Quads from standard input
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Compute predicate statistics for a store
    Stats {
        #[arg(long)]
        loc: PathBuf,

        /// Also replace the store's statistics file
        #[arg(long)]
        write: bool,
    },
    /// Print every quad as N-Quads
    Dump {
        #[arg(long)]
        loc: PathBuf,
    },
    /// Check that every index agrees with its primary
    Verify {
        #[arg(long)]
        loc: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    match args.command {
        Command::Load {
            loc,
            graph,
            strategy,
            stats,
            tick,
            files,
        } => load(&loc, graph, &strategy, stats, tick, &files)?,
        Command::Stats { loc, write } => print_stats(&loc, write)?,
        Command::Dump { loc } => dump(&loc)?,
        Command::Verify { loc } => verify(&loc)?,
    }
    Ok(())
}

fn load(
    loc: &Path,
    graph: Option<String>,
    strategy: &str,
    stats: bool,
    tick: u64,
    files: &[String],
) -> quadstore::Result<()> {
    let dataset = Dataset::open(StoreConfig::at(loc))?;
    let options = LoaderOptions {
        strategy: strategy.parse::<IndexBuild>()?,
        collect_stats: stats,
        tick,
        ..LoaderOptions::default()
    };
    let target = match graph {
        Some(iri) => LoadTarget::NamedGraph(
            NamedNode::new(iri.as_str())
                .map_err(|e| StoreError::Config(format!("bad graph IRI {iri}: {e}")))?
                .into(),
        ),
        None => LoadTarget::Dataset,
    };

    let mut sources = Vec::with_capacity(files.len());
    for file in files {
        sources.push(open_source(file)?);
    }
    let quads = sources.into_iter().flat_map(|(format, reader)| {
        RdfParser::from_format(format)
            .for_reader(reader)
            .map(|quad| {
                quad.map(Quad::from)
                    .map_err(|e| StoreError::Codec(e.to_string()))
            })
    });

    let mut loader = BulkLoader::new(dataset.clone(), options);
    let report = loader.load(target, quads)?;
    info!(
        "{} tuples added ({} read)",
        report.tuples_added, report.tuples_seen
    );
    dataset.close()
}

fn open_source(file: &str) -> quadstore::Result<(RdfFormat, Box<dyn Read>)> {
    if file == "-" {
        return Ok((RdfFormat::NQuads, Box::new(BufReader::new(io::stdin()))));
    }
    let path = Path::new(file);
    let format = path
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(RdfFormat::from_extension)
        .ok_or_else(|| {
            StoreError::Config(format!(
                "cannot tell the RDF syntax of {file} from its extension"
            ))
        })?;
    Ok((format, Box::new(BufReader::new(File::open(path)?))))
}

fn print_stats(loc: &Path, write: bool) -> quadstore::Result<()> {
    let dataset = Dataset::open(StoreConfig::at(loc))?;
    let statistics = quadstore::stats::collect(&dataset)?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    statistics.write_to(&mut out)?;
    out.flush()?;
    if write {
        statistics.save(&loc.join(STATS_FILE))?;
        info!("Wrote {}", loc.join(STATS_FILE).display());
    }
    dataset.close()
}

fn dump(loc: &Path) -> quadstore::Result<()> {
    let dataset = Dataset::open(StoreConfig::at(loc))?;
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for quad in dataset.find_quads(None, None, None, None)? {
        writeln!(out, "{}", quad?)?;
    }
    out.flush()?;
    dataset.close()
}

fn verify(loc: &Path) -> quadstore::Result<()> {
    let dataset = Dataset::open(StoreConfig::at(loc))?;
    dataset.verify()?;
    println!(
        "{}: {} tuples, indexes agree",
        loc.display(),
        dataset.len()?
    );
    dataset.close()
}
