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

use std::env;
use std::path::PathBuf;
use std::process;

use getopts::Options;

use simsim::measures::Measure;
use simsim::run::{run, Mode, RunConfig};

fn main() {
    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optopt("m", "mode", "Similarity axis: user | item (required).", "MODE");
    opts.optopt(
        "s",
        "measure",
        "Statistical kernel: cosine | pearson | jaccard (required).",
        "MEASURE",
    );
    opts.optopt("k", "neighbors", "Neighbors to keep per row (optional, defaults to 20).", "NUMBER");
    opts.optopt(
        "",
        "min-co",
        "Minimum co-occurrence count below which a pair is discarded (optional, defaults to 3).",
        "NUMBER",
    );
    opts.optopt(
        "",
        "shrink",
        "Shrinkage lambda multiplying scores by n/(n+lambda) (optional, defaults to 20 for \
         pearson and 0 otherwise).",
        "NUMBER",
    );
    opts.optopt(
        "",
        "pct-users",
        "Deterministic user sampling percentage in 0-100 (optional, defaults to 100).",
        "NUMBER",
    );
    opts.optopt(
        "",
        "pct-items",
        "Deterministic item sampling percentage in 0-100 (optional, defaults to 100).",
        "NUMBER",
    );
    opts.optopt(
        "w",
        "workers",
        "Size of the accumulation pool (optional, defaults to the number of logical cores).",
        "NUMBER",
    );
    opts.optopt("", "shards", "Accumulator shard count (optional, defaults to 64).", "NUMBER");
    opts.optopt(
        "",
        "mem-ceiling-mb",
        "Fail the run when the accumulator would exceed this many megabytes (optional, 0 \
         disables the ceiling and is the default).",
        "NUMBER",
    );
    opts.optopt(
        "t",
        "triplets",
        "Triplet CSV (outer,inner,value) sorted by outer id; required in item mode.",
        "PATH",
    );
    opts.optopt(
        "c",
        "csr",
        "Directory holding indptr.bin, indices.bin, data.bin and meta.json; required in user \
         mode.",
        "PATH",
    );
    opts.optopt("o", "output", "Neighbor CSV output path (required).", "PATH");
    opts.optopt("r", "report", "Run report output path (optional).", "PATH");
    opts.optflag("h", "help", "Print this help menu");

    let matches = match opts.parse(&args[1..]) {
        Ok(matches) => matches,
        Err(failure) => {
            let hint = failure.to_string();
            return print_usage_and_exit(&program, opts, Some(&hint));
        }
    };

    if matches.opt_present("h") {
        return print_usage_and_exit(&program, opts, None);
    }

    let mode = match matches.opt_str("m").as_deref().and_then(Mode::parse) {
        Some(mode) => mode,
        None => {
            return print_usage_and_exit(&program, opts, Some("Please specify --mode=user|item."))
        }
    };
    let measure = match matches.opt_str("s").as_deref().and_then(Measure::parse) {
        Some(measure) => measure,
        None => {
            return print_usage_and_exit(
                &program,
                opts,
                Some("Please specify --measure=cosine|pearson|jaccard."),
            )
        }
    };
    let output = match matches.opt_str("o") {
        Some(path) => PathBuf::from(path),
        None => {
            return print_usage_and_exit(&program, opts, Some("Please specify --output."));
        }
    };

    let k = match matches.opt_get_default("k", 20usize) {
        Ok(k) => k,
        Err(failure) => {
            let hint = format!("Problem with option 'k': {}", failure);
            return print_usage_and_exit(&program, opts, Some(&hint));
        }
    };
    let min_co = match matches.opt_get_default("min-co", 3u32) {
        Ok(min_co) => min_co,
        Err(failure) => {
            let hint = format!("Problem with option 'min-co': {}", failure);
            return print_usage_and_exit(&program, opts, Some(&hint));
        }
    };
    let shrink = match matches.opt_get::<f64>("shrink") {
        Ok(shrink) => shrink,
        Err(failure) => {
            let hint = format!("Problem with option 'shrink': {}", failure);
            return print_usage_and_exit(&program, opts, Some(&hint));
        }
    };
    let pct_users = match matches.opt_get_default("pct-users", 100u32) {
        Ok(pct) => pct,
        Err(failure) => {
            let hint = format!("Problem with option 'pct-users': {}", failure);
            return print_usage_and_exit(&program, opts, Some(&hint));
        }
    };
    let pct_items = match matches.opt_get_default("pct-items", 100u32) {
        Ok(pct) => pct,
        Err(failure) => {
            let hint = format!("Problem with option 'pct-items': {}", failure);
            return print_usage_and_exit(&program, opts, Some(&hint));
        }
    };
    let workers = match matches.opt_get_default("workers", 0usize) {
        Ok(workers) => workers,
        Err(failure) => {
            let hint = format!("Problem with option 'workers': {}", failure);
            return print_usage_and_exit(&program, opts, Some(&hint));
        }
    };
    let num_shards = match matches.opt_get_default("shards", 0usize) {
        Ok(shards) => shards,
        Err(failure) => {
            let hint = format!("Problem with option 'shards': {}", failure);
            return print_usage_and_exit(&program, opts, Some(&hint));
        }
    };
    let mem_ceiling_mb = match matches.opt_get_default("mem-ceiling-mb", 0usize) {
        Ok(ceiling) => ceiling,
        Err(failure) => {
            let hint = format!("Problem with option 'mem-ceiling-mb': {}", failure);
            return print_usage_and_exit(&program, opts, Some(&hint));
        }
    };

    let config = RunConfig {
        mode,
        measure,
        k,
        min_co,
        shrink,
        pct_users,
        pct_items,
        workers,
        num_shards,
        mem_ceiling: mem_ceiling_mb * 1024 * 1024,
        triplets: matches.opt_str("t").map(PathBuf::from),
        csr_dir: matches.opt_str("c").map(PathBuf::from),
        output,
        report: matches.opt_str("r").map(PathBuf::from),
    };

    match run(&config) {
        Ok(report) => print!("{}", report.render()),
        Err(fault) => {
            eprintln!("similarity run failed: {}", fault);
            process::exit(1);
        }
    }
}

fn print_usage_and_exit(program: &str, opts: Options, hint: Option<&str>) {
    if let Some(hint) = hint {
        eprintln!("\n{}\n", hint);
    }

    let brief = format!("Usage: {} [options]", program);
    eprint!("{}", opts.usage(&brief));
}
