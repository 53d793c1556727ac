use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use xorsim::{KadConf, Network, Routable, RoutableKind};

#[derive(Parser, Debug)]
#[command(name = "xorsim")]
#[command(author, version, about = "Kademlia-style DHT simulator", long_about = None)]
struct Args {
    /// Seed for the run's random generator; one seed reproduces one run.
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Identifier width in bits.
    #[arg(long, default_value_t = 64)]
    n_bits: u32,

    /// Bucket capacity and replication factor.
    #[arg(short, long, default_value_t = 20)]
    k: usize,

    /// Lookup fan-out per convergence round.
    #[arg(short, long, default_value_t = 3)]
    alpha: usize,

    /// Number of simulated nodes.
    #[arg(short = 'n', long, default_value_t = 100)]
    n_nodes: usize,

    /// How many peers each joining node asks for when looking itself up.
    #[arg(long, default_value_t = 20)]
    n_initial_conn: usize,

    /// Number of simulated files to place.
    #[arg(long, default_value_t = 50)]
    n_files: usize,

    /// Bootstrap addresses assigned to the first created nodes.
    #[arg(short = 'B', long = "bootstrap", value_name = "ADDR")]
    bootstrap: Vec<String>,

    /// Write a JSON snapshot of the finished run here.
    #[arg(long, value_name = "PATH")]
    save: Option<PathBuf>,

    /// Write a Graphviz export of the routing topology here.
    #[arg(long, value_name = "PATH")]
    graph: Option<PathBuf>,

    /// Drop into an interactive shell after the run.
    #[arg(short, long)]
    interactive: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let conf = KadConf {
        n_bits: args.n_bits,
        k: args.k,
        alpha: args.alpha,
        n_nodes: args.n_nodes,
        bootstrap: args.bootstrap.clone(),
    };
    let mut network = Network::new(conf, args.seed).context("invalid identifier space")?;

    network.initialize_nodes(args.n_initial_conn);
    network.initialize_files(args.n_files);

    let mismatches = network.check_files();
    if mismatches.is_empty() {
        info!("consistency check passed");
    } else {
        for m in &mismatches {
            warn!(
                file = %m.file,
                entry = %m.entry,
                expected = ?m.expected,
                actual = ?m.actual,
                "decentralized lookup disagreed with ground truth"
            );
        }
        warn!(count = mismatches.len(), "consistency check found mismatches");
    }

    if let Some(path) = &args.save {
        network.snapshot().save(path)?;
    }
    if let Some(path) = &args.graph {
        let mut out = File::create(path)
            .with_context(|| format!("creating graph export at {}", path.display()))?;
        network.export_dot(&mut out).context("writing graph export")?;
        info!(path = %path.display(), "graph exported");
    }

    if args.interactive {
        shell(&mut network)?;
    }
    Ok(())
}

/// Minimal interactive driver over the network's public entry points.
/// Unknown commands report and continue; EOF or `quit` exits.
fn shell(network: &mut Network) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "xorsim> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let mut words = line.split_whitespace();
        let Some(cmd) = words.next() else { continue };
        match cmd {
            "help" => {
                println!("commands:");
                println!("  status              node and file counts");
                println!("  lookup <hex-id>     decentralized lookup from a random entry node");
                println!("  rand-lookup         look up a random routable from a random entry");
                println!("  rand-routable       describe a random node or file");
                println!("  check               run the consistency oracle");
                println!("  save <path>         write a JSON snapshot");
                println!("  graph <path>        write a Graphviz export");
                println!("  quit                exit the shell");
            }
            "status" => {
                println!(
                    "{} nodes, {} files, {} bits, k={}, alpha={}",
                    network.nodes().len(),
                    network.files().len(),
                    network.conf().n_bits,
                    network.conf().k,
                    network.conf().alpha
                );
            }
            "lookup" => match words.next() {
                Some(hex) => {
                    let target = u128::from_str_radix(hex.trim_start_matches("0x"), 16)
                        .ok()
                        .and_then(|raw| network.space().id(raw).ok());
                    match target {
                        Some(target) => network.rand_node(|net, entry| {
                            let found = net.lookup(entry, target);
                            println!("lookup of {target} from {entry}:");
                            for id in found {
                                println!("  {id}");
                            }
                        }),
                        None => eprintln!("not a valid identifier for this id space"),
                    }
                }
                None => eprintln!("usage: lookup <hex-id>"),
            },
            "rand-lookup" => network.rand_routable(|net, r| {
                net.rand_node(move |inner, entry| {
                    let found = inner.lookup(entry, r.id);
                    println!("lookup of {:?} {} from {}:", r.kind, r.id, entry);
                    for id in &found {
                        println!("  {id}");
                    }
                    if r.kind == RoutableKind::File {
                        let holding = found
                            .iter()
                            .filter(|n| {
                                inner.lookup_cheat(**n).is_some_and(|node| node.holds(r.id))
                            })
                            .count();
                        println!("  ({holding} of {} hold a replica)", found.len());
                    }
                });
            }),
            "rand-routable" => network.rand_routable(|net, r| match r.kind {
                RoutableKind::Node => {
                    if let Some(node) = net.lookup_cheat(r.id) {
                        println!(
                            "node {} with {} contacts and {} replicas",
                            node.id(),
                            node.table().len(),
                            node.replicas().len()
                        );
                    }
                }
                RoutableKind::File => {
                    if let Some(file) = net.files().iter().find(|f| f.id() == r.id) {
                        println!("file {} referenced by {}", file.id(), file.referencer());
                    }
                }
            }),
            "check" => {
                let reports = network.check_files();
                if reports.is_empty() {
                    println!("all files consistent");
                } else {
                    for m in &reports {
                        println!(
                            "mismatch for file {} (entry {}): expected {:?}, got {:?}",
                            m.file, m.entry, m.expected, m.actual
                        );
                    }
                    println!("{} mismatching files", reports.len());
                }
            }
            "save" => match words.next() {
                Some(path) => {
                    if let Err(e) = network.snapshot().save(Path::new(path)) {
                        eprintln!("save failed: {e:#}");
                    }
                }
                None => eprintln!("usage: save <path>"),
            },
            "graph" => match words.next() {
                Some(path) => {
                    let result = File::create(path)
                        .map_err(anyhow::Error::from)
                        .and_then(|mut out| Ok(network.export_dot(&mut out)?));
                    if let Err(e) = result {
                        eprintln!("graph export failed: {e:#}");
                    }
                }
                None => eprintln!("usage: graph <path>"),
            },
            "quit" | "exit" => break,
            other => eprintln!("unknown command: {other} (try `help`)"),
        }
    }
    Ok(())
}
