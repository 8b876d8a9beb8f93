/*
 * SimSim
 * Copyright (C) 2024 The SimSim developers
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program. If not, see <http://www.gnu.org/licenses/>.
 */

//! The run controller: selects mode and measure, drives the phases and
//! renders the run report.
//!
//! A run walks `Loading -> Inverting (user mode only) -> Accumulating ->
//! Finalising -> Writing` and stops at the first fault; nothing is retried.

use std::fmt::Write as _;
use std::mem;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::csr::Csr;
use crate::error::{Result, SimError};
use crate::invert;
use crate::io::{self, TripletBaskets, BASKETS_PER_CHUNK};
use crate::measures::{CosineStats, JaccardStats, Measure, PairStats, PearsonStats};
use crate::shard::{accumulate, AccumulateStats, ShardBy, ShardedPairMap, DEFAULT_SHARDS};
use crate::topk::{select_top_k, SelectCounts, SelectParams};
use crate::types::{Basket, BasketChunk};

/// Which axis carries the similarity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    User,
    Item,
}

impl Mode {
    pub fn parse(name: &str) -> Option<Mode> {
        match name {
            "user" => Some(Mode::User),
            "item" => Some(Mode::Item),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Mode::User => "user",
            Mode::Item => "item",
        }
    }

    fn csv_header(self) -> [&'static str; 3] {
        match self {
            Mode::User => ["uIdx", "vIdx", "sim"],
            Mode::Item => ["iIdx", "jIdx", "sim"],
        }
    }
}

/// Phases of a run, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Init,
    Loading,
    Inverting,
    Accumulating,
    Finalising,
    Writing,
    Done,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Loading => "loading",
            Phase::Inverting => "inverting",
            Phase::Accumulating => "accumulating",
            Phase::Finalising => "finalising",
            Phase::Writing => "writing",
            Phase::Done => "done",
        }
    }
}

/// Everything a run needs; the `similarity` binary builds this from flags.
pub struct RunConfig {
    pub mode: Mode,
    pub measure: Measure,
    pub k: usize,
    pub min_co: u32,
    /// None picks the measure's default.
    pub shrink: Option<f64>,
    pub pct_users: u32,
    pub pct_items: u32,
    /// 0 picks the number of logical cores.
    pub workers: usize,
    pub num_shards: usize,
    /// Accumulator memory ceiling in bytes; 0 disables it.
    pub mem_ceiling: usize,
    /// Triplet CSV, required in item mode.
    pub triplets: Option<PathBuf>,
    /// CSR directory, required in user mode.
    pub csr_dir: Option<PathBuf>,
    pub output: PathBuf,
    pub report: Option<PathBuf>,
}

impl RunConfig {
    fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(SimError::InvalidParameter("k must be at least 1".to_string()));
        }
        if let Some(shrink) = self.shrink {
            if !(shrink >= 0.0) {
                return Err(SimError::InvalidParameter(
                    "shrink must be non-negative".to_string(),
                ));
            }
        }
        Ok(())
    }
}

struct PhaseClock {
    run_start: Instant,
    phase_start: Instant,
    phase: Phase,
    timings: Vec<(Phase, Duration)>,
}

impl PhaseClock {
    fn start() -> Self {
        let now = Instant::now();
        PhaseClock {
            run_start: now,
            phase_start: now,
            phase: Phase::Init,
            timings: Vec::new(),
        }
    }

    fn enter(&mut self, next: Phase) {
        if self.phase != Phase::Init {
            self.timings.push((self.phase, self.phase_start.elapsed()));
        }
        self.phase = next;
        self.phase_start = Instant::now();
    }

    fn finish(mut self) -> (Vec<(Phase, Duration)>, Duration) {
        self.enter(Phase::Done);
        (self.timings, self.run_start.elapsed())
    }
}

/// Counters, parameters and timings of a finished run.
#[derive(Debug)]
pub struct RunReport {
    pub mode: Mode,
    pub measure: Measure,
    pub k: usize,
    pub min_co: u32,
    pub shrink: f64,
    pub pct_users: u32,
    pub pct_items: u32,
    pub workers: usize,
    pub shards: usize,
    /// Size of the similarity axis.
    pub rows: usize,
    /// Shared nodes on the other axis (items in user mode, kept users in item mode).
    pub shared_nodes: u64,
    /// Sampled (outer, inner) entries feeding the baskets.
    pub entries: u64,
    pub baskets: u64,
    pub pair_updates: u64,
    pub distinct_pairs: usize,
    pub select: SelectCounts,
    pub rows_written: u64,
    pub lines_written: u64,
    pub timings: Vec<(Phase, Duration)>,
    pub total: Duration,
    pub output: PathBuf,
}

fn to_millis(duration: Duration) -> u64 {
    duration.as_secs() * 1_000 + u64::from(duration.subsec_millis())
}

impl RunReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "== {} {}-based similarity ==",
            self.measure.name(),
            self.mode.name()
        );
        let _ = writeln!(out, "similarity rows          : {}", self.rows);
        let _ = writeln!(out, "shared nodes             : {}", self.shared_nodes);
        let _ = writeln!(out, "entries sampled          : {}", self.entries);
        let _ = writeln!(
            out,
            "pct_users / pct_items    : {}% / {}%",
            self.pct_users, self.pct_items
        );
        let _ = writeln!(out, "workers                  : {}", self.workers);
        let _ = writeln!(out, "shards                   : {}", self.shards);
        let _ = writeln!(out);
        let _ = writeln!(out, "baskets consumed         : {}", self.baskets);
        let _ = writeln!(out, "pair updates             : {}", self.pair_updates);
        let _ = writeln!(out, "distinct pairs           : {}", self.distinct_pairs);
        let _ = writeln!(
            out,
            "dropped (below support)  : {}",
            self.select.dropped_support
        );
        let _ = writeln!(
            out,
            "dropped (degenerate)     : {}",
            self.select.dropped_degenerate
        );
        let _ = writeln!(
            out,
            "dropped (non-positive)   : {}",
            self.select.dropped_non_positive
        );
        let _ = writeln!(out, "similarities retained    : {}", self.select.retained);
        let _ = writeln!(out, "rows written             : {}", self.rows_written);
        let _ = writeln!(out, "lines written            : {}", self.lines_written);
        let _ = writeln!(
            out,
            "parameters               : k={} min_co={} shrink={}",
            self.k, self.min_co, self.shrink
        );
        let _ = writeln!(out);
        let _ = writeln!(out, "timings:");
        for (phase, duration) in &self.timings {
            let _ = writeln!(
                out,
                "  {:<22} : {}ms",
                phase.name(),
                to_millis(*duration)
            );
        }
        let _ = writeln!(out, "  {:<22} : {}ms", "total", to_millis(self.total));
        let _ = writeln!(out);
        let _ = writeln!(out, "output:");
        let _ = writeln!(out, "  {}", self.output.display());
        out
    }
}

/// Runs the full pipeline described by `config` and returns its report.
pub fn run(config: &RunConfig) -> Result<RunReport> {
    config.validate()?;
    let workers = if config.workers == 0 {
        num_cpus::get()
    } else {
        config.workers
    };
    let shards = if config.num_shards == 0 {
        DEFAULT_SHARDS
    } else {
        config.num_shards
    };
    let shrink = config
        .shrink
        .unwrap_or_else(|| config.measure.default_shrink());
    let params = SelectParams {
        k: config.k,
        min_co: config.min_co,
        shrink,
    };

    match config.mode {
        Mode::User => run_user_based(config, workers, shards, params),
        Mode::Item => run_item_based(config, workers, shards, params),
    }
}

/// What the selection and writing phases hand back to the controller.
struct PipelineOutcome {
    accumulate: AccumulateStats,
    distinct_pairs: usize,
    select: SelectCounts,
    rows_written: u64,
    lines_written: u64,
}

/// Single-threaded finalisation: scores the joined map, keeps top-K per row
/// and writes the neighbor CSV.
fn finalise_and_write<S: PairStats>(
    map: &ShardedPairMap<S>,
    num_rows: usize,
    score: impl Fn(u32, u32, &S) -> Option<f64>,
    config: &RunConfig,
    params: &SelectParams,
    clock: &mut PhaseClock,
    accumulated: AccumulateStats,
) -> Result<PipelineOutcome> {
    clock.enter(Phase::Finalising);
    let (lists, select) = select_top_k(map, num_rows, params, score);

    clock.enter(Phase::Writing);
    println!("Writing neighbors to {}", config.output.display());
    let lines_written = io::write_neighbors(&config.output, config.mode.csv_header(), &lists)?;
    let rows_written = lists.iter().filter(|list| !list.is_empty()).count() as u64;

    Ok(PipelineOutcome {
        accumulate: accumulated,
        distinct_pairs: map.len(),
        select,
        rows_written,
        lines_written,
    })
}

/// Baskets per chunk when they come from the inverted CSR.
const INVERTED_CHUNK: usize = 1024;

/// Chunks in-memory baskets for the pool. Baskets with fewer than two
/// members produce no pairs and are skipped at the source.
fn chunk_baskets(
    baskets: Vec<Basket>,
    chunk_size: usize,
) -> impl Iterator<Item = Result<BasketChunk>> {
    let mut source = baskets.into_iter();
    let mut exhausted = false;
    std::iter::from_fn(move || {
        if exhausted {
            return None;
        }
        let mut chunk = BasketChunk::with_capacity(chunk_size);
        for basket in source.by_ref() {
            if basket.len() < 2 {
                continue;
            }
            chunk.push(basket);
            if chunk.len() == chunk_size {
                return Some(Ok(chunk));
            }
        }
        exhausted = true;
        if chunk.is_empty() {
            None
        } else {
            Some(Ok(chunk))
        }
    })
}

/// Chunks baskets straight off the triplet stream, holding one chunk at most.
fn stream_chunks<'a>(
    stream: &'a mut TripletBaskets,
) -> impl Iterator<Item = Result<BasketChunk>> + 'a {
    let mut exhausted = false;
    std::iter::from_fn(move || {
        if exhausted {
            return None;
        }
        let mut chunk = BasketChunk::with_capacity(BASKETS_PER_CHUNK);
        loop {
            match stream.next_basket() {
                Ok(Some(basket)) => {
                    if basket.len() < 2 {
                        continue;
                    }
                    chunk.push(basket);
                    if chunk.len() == BASKETS_PER_CHUNK {
                        return Some(Ok(chunk));
                    }
                }
                Ok(None) => {
                    exhausted = true;
                    return if chunk.is_empty() { None } else { Some(Ok(chunk)) };
                }
                Err(fault) => {
                    exhausted = true;
                    return Some(Err(fault));
                }
            }
        }
    })
}

fn run_user_based(
    config: &RunConfig,
    workers: usize,
    shards: usize,
    params: SelectParams,
) -> Result<RunReport> {
    let dir = config.csr_dir.as_deref().ok_or_else(|| {
        SimError::InvalidParameter("user mode requires a CSR directory".to_string())
    })?;

    let mut clock = PhaseClock::start();
    clock.enter(Phase::Loading);
    println!("Loading user matrix from {}", dir.display());
    let csr = Csr::read(dir)?;
    let num_users = csr.num_rows();
    let num_items = csr.num_cols();
    println!(
        "Found {} users, {} items, {} ratings",
        num_users,
        num_items,
        csr.nnz()
    );

    clock.enter(Phase::Inverting);
    let inverted = invert::invert_user_csr(&csr, config.pct_users, config.pct_items);
    let entries = inverted.entries;
    let degrees = inverted.degrees;
    let baskets = inverted.baskets;
    drop(csr);

    println!(
        "Accumulating user pairs with {} workers over {} shards",
        workers, shards
    );
    let outcome = match config.measure {
        // Pearson over the user-centered matrix is cosine on centered values.
        Measure::Cosine | Measure::Pearson => {
            let map =
                ShardedPairMap::<CosineStats>::with_ceiling(shards, ShardBy::Pair, config.mem_ceiling);
            clock.enter(Phase::Accumulating);
            let accumulated = accumulate(chunk_baskets(baskets, INVERTED_CHUNK), &map, workers)?;
            finalise_and_write(
                &map,
                num_users,
                |_, _, stats: &CosineStats| stats.score(),
                config,
                &params,
                &mut clock,
                accumulated,
            )?
        }
        Measure::Jaccard => {
            let map = ShardedPairMap::<JaccardStats>::with_ceiling(
                shards,
                ShardBy::Pair,
                config.mem_ceiling,
            );
            clock.enter(Phase::Accumulating);
            let accumulated = accumulate(chunk_baskets(baskets, INVERTED_CHUNK), &map, workers)?;
            finalise_and_write(
                &map,
                num_users,
                |user_a, user_b, stats: &JaccardStats| {
                    stats.score(degrees[user_a as usize], degrees[user_b as usize])
                },
                config,
                &params,
                &mut clock,
                accumulated,
            )?
        }
    };

    finish_report(
        config,
        workers,
        shards,
        params,
        num_users,
        num_items as u64,
        entries,
        outcome,
        clock,
    )
}

fn run_item_based(
    config: &RunConfig,
    workers: usize,
    shards: usize,
    params: SelectParams,
) -> Result<RunReport> {
    let path = config.triplets.as_deref().ok_or_else(|| {
        SimError::InvalidParameter("item mode requires a triplet CSV".to_string())
    })?;

    let mut clock = PhaseClock::start();
    clock.enter(Phase::Loading);
    println!("Streaming triplets from {}", path.display());
    let mut stream = TripletBaskets::open(path, config.pct_users, config.pct_items)?;

    println!(
        "Accumulating item pairs with {} workers over {} shards",
        workers, shards
    );
    let outcome = match config.measure {
        Measure::Cosine => {
            let map =
                ShardedPairMap::<CosineStats>::with_ceiling(shards, ShardBy::Pair, config.mem_ceiling);
            clock.enter(Phase::Accumulating);
            let accumulated = accumulate(stream_chunks(&mut stream), &map, workers)?;
            finalise_and_write(
                &map,
                stream.num_inner_rows(),
                |_, _, stats: &CosineStats| stats.score(),
                config,
                &params,
                &mut clock,
                accumulated,
            )?
        }
        // Item-based Pearson shards by outer key so a whole outer row scans
        // from one shard.
        Measure::Pearson => {
            let map = ShardedPairMap::<PearsonStats>::with_ceiling(
                shards,
                ShardBy::Outer,
                config.mem_ceiling,
            );
            clock.enter(Phase::Accumulating);
            let accumulated = accumulate(stream_chunks(&mut stream), &map, workers)?;
            finalise_and_write(
                &map,
                stream.num_inner_rows(),
                |_, _, stats: &PearsonStats| stats.score(),
                config,
                &params,
                &mut clock,
                accumulated,
            )?
        }
        Measure::Jaccard => {
            let map = ShardedPairMap::<JaccardStats>::with_ceiling(
                shards,
                ShardBy::Pair,
                config.mem_ceiling,
            );
            clock.enter(Phase::Accumulating);
            let accumulated = accumulate(stream_chunks(&mut stream), &map, workers)?;
            let degrees = mem::take(&mut stream.inner_degrees);
            finalise_and_write(
                &map,
                stream.num_inner_rows(),
                move |item_a, item_b, stats: &JaccardStats| {
                    let degree_a = degrees.get(&item_a).copied().unwrap_or(0);
                    let degree_b = degrees.get(&item_b).copied().unwrap_or(0);
                    stats.score(degree_a, degree_b)
                },
                config,
                &params,
                &mut clock,
                accumulated,
            )?
        }
    };

    let stats = stream.stats;
    finish_report(
        config,
        workers,
        shards,
        params,
        stream.num_inner_rows(),
        stats.outers_kept,
        stats.triplets_kept,
        outcome,
        clock,
    )
}

#[allow(clippy::too_many_arguments)]
fn finish_report(
    config: &RunConfig,
    workers: usize,
    shards: usize,
    params: SelectParams,
    rows: usize,
    shared_nodes: u64,
    entries: u64,
    outcome: PipelineOutcome,
    clock: PhaseClock,
) -> Result<RunReport> {
    let (timings, total) = clock.finish();
    let report = RunReport {
        mode: config.mode,
        measure: config.measure,
        k: params.k,
        min_co: params.min_co,
        shrink: params.shrink,
        pct_users: config.pct_users,
        pct_items: config.pct_items,
        workers,
        shards,
        rows,
        shared_nodes,
        entries,
        baskets: outcome.accumulate.baskets,
        pair_updates: outcome.accumulate.pair_updates,
        distinct_pairs: outcome.distinct_pairs,
        select: outcome.select,
        rows_written: outcome.rows_written,
        lines_written: outcome.lines_written,
        timings,
        total,
        output: config.output.clone(),
    };

    if let Some(report_path) = &config.report {
        io::write_report(report_path, &report.render())?;
    }
    Ok(report)
}
