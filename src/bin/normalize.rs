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

//! Builds the user-centered CSR artifacts from a triplet CSV: per-user
//! means, `indptr.bin`/`indices.bin`/`data.bin` with `r - mean(u)` values,
//! and `meta.json`.

use std::env;
use std::path::PathBuf;
use std::process;

use getopts::Options;

use simsim::center::center_by_user;
use simsim::error::Result;
use simsim::io::{read_triplets, write_means};

fn main() {
    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optopt(
        "t",
        "triplets",
        "Triplet CSV (outer,inner,value) sorted by outer id (required).",
        "PATH",
    );
    opts.optopt(
        "o",
        "out-dir",
        "Output directory for the centered CSR blobs and meta.json (required).",
        "PATH",
    );
    opts.optopt(
        "",
        "means",
        "Output path of the per-user means CSV (optional, defaults to means.csv inside the \
         output directory).",
        "PATH",
    );
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

    let triplets_path = match matches.opt_str("t") {
        Some(path) => PathBuf::from(path),
        None => return print_usage_and_exit(&program, opts, Some("Please specify --triplets.")),
    };
    let out_dir = match matches.opt_str("o") {
        Some(path) => PathBuf::from(path),
        None => return print_usage_and_exit(&program, opts, Some("Please specify --out-dir.")),
    };
    let means_path = matches
        .opt_str("means")
        .map(PathBuf::from)
        .unwrap_or_else(|| out_dir.join("means.csv"));

    if let Err(fault) = normalize(&triplets_path, &out_dir, &means_path) {
        eprintln!("normalize failed: {}", fault);
        process::exit(1);
    }
}

fn normalize(
    triplets_path: &std::path::Path,
    out_dir: &std::path::Path,
    means_path: &std::path::Path,
) -> Result<()> {
    println!("Reading {} to compute per-user means", triplets_path.display());
    let file = read_triplets(triplets_path)?;
    println!(
        "Found {} ratings over {} users and {} items",
        file.triplets.len(),
        file.num_outer,
        file.num_inner
    );

    let centered = center_by_user(&file.triplets)?;

    println!("Writing means to {}", means_path.display());
    write_means(means_path, &centered.means)?;

    println!("Writing centered CSR to {}", out_dir.display());
    centered.csr.write(out_dir)?;

    println!(
        "Centered matrix ready: U={} I={} NNZ={}",
        centered.csr.num_rows(),
        centered.csr.num_cols(),
        centered.csr.nnz()
    );
    Ok(())
}

fn print_usage_and_exit(program: &str, opts: Options, hint: Option<&str>) {
    if let Some(hint) = hint {
        eprintln!("\n{}\n", hint);
    }

    let brief = format!("Usage: {} [options]", program);
    eprint!("{}", opts.usage(&brief));
}
