//! Benchmark harness for the query engine
//!
//! Supports:
//! - Table benchmarks (sequential vs parallel rows)
//! - Route benchmarks
//! - Concurrent table bursts with dataset reloads mid-burst
//!
//! Graphs are synthetic grids so runs need no input data.
//! Outputs: p50/p95/p99 times + counters

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use hdrhistogram::Histogram;
use rand::prelude::*;

use butterfly_query::matrix::many_to_many_with_stats;
use butterfly_query::{
    logging, many_to_many_parallel, point_to_point, CancelToken, EdgeWeight, Engine,
    EngineConfig, NodeId, Payload, PhantomNode, ResultMatrix, SearchWorkspace, ServiceRequest,
    StaticGraph, WorkspacePool,
};

#[derive(Parser)]
#[command(name = "butterfly-query-bench")]
#[command(about = "Benchmark harness for butterfly-query")]
struct Cli {
    /// Grid width
    #[arg(long, global = true, default_value = "200")]
    width: u32,

    /// Grid height
    #[arg(long, global = true, default_value = "200")]
    height: u32,

    /// Random seed for reproducibility
    #[arg(long, global = true, default_value = "42")]
    seed: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Benchmark N×N tables, sequential and parallel rows
    Table {
        /// Table size (sources = targets = size)
        #[arg(long, default_value = "50")]
        size: usize,

        /// Number of tables per mode
        #[arg(long, default_value = "20")]
        n_queries: usize,
    },

    /// Benchmark point-to-point queries
    Route {
        /// Number of queries
        #[arg(long, default_value = "1000")]
        n_queries: usize,
    },

    /// Concurrent table queries while the dataset is reloaded
    Concurrent {
        /// Worker threads issuing queries
        #[arg(long, default_value = "8")]
        threads: usize,

        /// Queries per thread
        #[arg(long, default_value = "50")]
        queries_per_thread: usize,

        /// Reloads during the burst
        #[arg(long, default_value = "5")]
        reloads: usize,

        /// Table size
        #[arg(long, default_value = "10")]
        size: usize,
    },
}

/// Two-way grid with random edge weights in 1..=100
fn grid_graph(width: u32, height: u32, seed: u64) -> Result<StaticGraph> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut edges = Vec::with_capacity((width * height * 2) as usize);
    for row in 0..height {
        for col in 0..width {
            let id = row * width + col;
            if col + 1 < width {
                edges.push((id, id + 1, rng.random_range(1..=100) as EdgeWeight));
            }
            if row + 1 < height {
                edges.push((id, id + width, rng.random_range(1..=100) as EdgeWeight));
            }
        }
    }
    Ok(StaticGraph::from_undirected_edges(
        (width * height) as usize,
        &edges,
    )?)
}

fn random_phantoms(rng: &mut StdRng, n_nodes: u32, count: usize) -> Vec<PhantomNode> {
    (0..count)
        .map(|_| PhantomNode::at_node(rng.random_range(0..n_nodes) as NodeId))
        .collect()
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init("warn", false)?;

    match cli.command {
        Commands::Table { size, n_queries } => {
            run_table_bench(cli.width, cli.height, cli.seed, size, n_queries)
        }
        Commands::Route { n_queries } => run_route_bench(cli.width, cli.height, cli.seed, n_queries),
        Commands::Concurrent {
            threads,
            queries_per_thread,
            reloads,
            size,
        } => run_concurrent_bench(
            cli.width,
            cli.height,
            cli.seed,
            threads,
            queries_per_thread,
            reloads,
            size,
        ),
    }
}

fn run_table_bench(width: u32, height: u32, seed: u64, size: usize, n_queries: usize) -> Result<()> {
    println!("═══════════════════════════════════════════════════════════════");
    println!("  TABLE BENCHMARK: {}x{} grid, {}x{} tables", width, height, size, size);
    println!("═══════════════════════════════════════════════════════════════");

    let graph = grid_graph(width, height, seed)?;
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
    let cancel = CancelToken::none();
    let mut workspace = SearchWorkspace::new();
    let pool = WorkspacePool::new(rayon::current_num_threads());

    let mut seq_hist = Histogram::<u64>::new(3)?;
    let mut par_hist = Histogram::<u64>::new(3)?;
    let mut bucket_items = 0usize;
    let mut forward_pops = 0usize;
    let mut stalled = 0usize;

    for _ in 0..n_queries {
        let phantoms = random_phantoms(&mut rng, width * height, size);

        let start = Instant::now();
        let (sequential, stats) =
            many_to_many_with_stats(&graph, &mut workspace, &phantoms, &[], &[], &cancel)?;
        seq_hist.record(start.elapsed().as_micros() as u64)?;
        bucket_items += stats.bucket_items;
        forward_pops += stats.forward_pops;
        stalled += stats.stalled_nodes;

        let start = Instant::now();
        let parallel =
            many_to_many_parallel(&graph, &mut workspace, &pool, &phantoms, &[], &[], &cancel)?;
        par_hist.record(start.elapsed().as_micros() as u64)?;

        if sequential != parallel {
            bail!("parallel table differs from sequential table");
        }
    }

    print_histogram_stats("Sequential", &seq_hist);
    print_histogram_stats("Parallel rows", &par_hist);
    println!("  row workspaces allocated: {}", pool.created_count());
    println!("  avg bucket items: {}", format_number((bucket_items / n_queries.max(1)) as u64));
    println!("  avg forward pops: {}", format_number((forward_pops / n_queries.max(1)) as u64));
    println!("  avg stalled:      {}", format_number((stalled / n_queries.max(1)) as u64));
    Ok(())
}

fn run_route_bench(width: u32, height: u32, seed: u64, n_queries: usize) -> Result<()> {
    println!("═══════════════════════════════════════════════════════════════");
    println!("  ROUTE BENCHMARK: {}x{} grid, {} queries", width, height, n_queries);
    println!("═══════════════════════════════════════════════════════════════");

    let graph = grid_graph(width, height, seed)?;
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(2));
    let cancel = CancelToken::none();
    let mut workspace = SearchWorkspace::new();
    let mut hist = Histogram::<u64>::new(3)?;
    let mut unreachable = 0usize;

    for _ in 0..n_queries {
        let pair = random_phantoms(&mut rng, width * height, 2);
        let start = Instant::now();
        let result = point_to_point(&graph, &mut workspace, &pair[0], &pair[1], false, &cancel)?;
        hist.record(start.elapsed().as_micros() as u64)?;
        if !result.is_reachable() {
            unreachable += 1;
        }
    }

    print_histogram_stats("Route", &hist);
    println!("  unreachable: {}", unreachable);
    Ok(())
}

fn run_concurrent_bench(
    width: u32,
    height: u32,
    seed: u64,
    threads: usize,
    queries_per_thread: usize,
    reloads: usize,
    size: usize,
) -> Result<()> {
    println!("═══════════════════════════════════════════════════════════════");
    println!(
        "  CONCURRENT BENCHMARK: {} threads x {} tables, {} reloads",
        threads, queries_per_thread, reloads
    );
    println!("═══════════════════════════════════════════════════════════════");

    // Odd generations serve graph A, even generations graph B
    let graph_a = grid_graph(width, height, seed)?;
    let graph_b = grid_graph(width, height, seed.wrapping_add(100))?;
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(3));
    let request = ServiceRequest {
        phantoms: random_phantoms(&mut rng, width * height, size),
        ..Default::default()
    };

    let expected = |graph: &StaticGraph| -> Result<ResultMatrix> {
        let mut ws = SearchWorkspace::new();
        Ok(butterfly_query::many_to_many(
            graph,
            &mut ws,
            &request.phantoms,
            &[],
            &[],
            &CancelToken::none(),
        )?)
    };
    let expected_a = expected(&graph_a)?;
    let expected_b = expected(&graph_b)?;

    let config = EngineConfig {
        live_reload: true,
        max_table_size: size.max(1),
        workspace_pool_size: threads,
        ..Default::default()
    };
    let engine = Arc::new(Engine::new(config, graph_a.clone()));
    let mismatches = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let workers: Vec<_> = (0..threads)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let mismatches = Arc::clone(&mismatches);
            let request = request.clone();
            let expected_a = expected_a.clone();
            let expected_b = expected_b.clone();
            thread::spawn(move || -> Result<Histogram<u64>> {
                let mut hist = Histogram::<u64>::new(3)?;
                for _ in 0..queries_per_thread {
                    let query_start = Instant::now();
                    let response = engine.dispatch("table", &request);
                    hist.record(query_start.elapsed().as_micros() as u64)?;

                    let Payload::Table { generation, matrix } = response.payload else {
                        bail!("table query failed with status {}", response.status);
                    };
                    let expected = if generation % 2 == 1 { &expected_a } else { &expected_b };
                    if &matrix != expected {
                        mismatches.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Ok(hist)
            })
        })
        .collect();

    for i in 0..reloads {
        thread::sleep(Duration::from_millis(5));
        let next = if i % 2 == 0 { graph_b.clone() } else { graph_a.clone() };
        let generation = engine.reload(next)?;
        println!("  reload -> generation {}", generation);
    }

    let mut total = Histogram::<u64>::new(3)?;
    for worker in workers {
        let hist = match worker.join() {
            Ok(result) => result?,
            Err(_) => bail!("worker thread panicked"),
        };
        total.add(&hist)?;
    }
    let elapsed = start.elapsed();

    print_histogram_stats("Table (concurrent)", &total);
    println!(
        "  throughput: {:.1} tables/s",
        total.len() as f64 / elapsed.as_secs_f64()
    );
    println!("  final generation: {}", engine.generation());

    let mismatches = mismatches.load(Ordering::Relaxed);
    if mismatches > 0 {
        bail!("{} results did not match their generation", mismatches);
    }
    println!("  all results consistent with their generation");
    Ok(())
}

fn print_histogram_stats(name: &str, hist: &Histogram<u64>) {
    println!("───────────────────────────────────────────────────────────────");
    println!("  {} timing (μs)", name);
    println!("───────────────────────────────────────────────────────────────");
    println!("    min:    {:>10.0}", hist.min() as f64);
    println!("    p50:    {:>10.0}", hist.value_at_quantile(0.50) as f64);
    println!("    p90:    {:>10.0}", hist.value_at_quantile(0.90) as f64);
    println!("    p95:    {:>10.0}", hist.value_at_quantile(0.95) as f64);
    println!("    p99:    {:>10.0}", hist.value_at_quantile(0.99) as f64);
    println!("    max:    {:>10.0}", hist.max() as f64);
    println!("    mean:   {:>10.1}", hist.mean());
    println!("    stdev:  {:>10.1}", hist.stdev());
}

fn format_number(n: u64) -> String {
    if n >= 1_000_000_000 {
        format!("{:.2}B", n as f64 / 1_000_000_000.0)
    } else if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.2}K", n as f64 / 1_000.0)
    } else {
        format!("{}", n)
    }
}
