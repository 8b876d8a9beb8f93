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

//! Hold-out evaluation of rating prediction: splits the ratings per user,
//! predicts the held-out ones from a precomputed neighbor CSV and reports
//! MAE and RMSE.

use std::env;
use std::path::PathBuf;
use std::process;

use getopts::Options;

use simsim::error::Result;
use simsim::io::{read_means, read_neighbors, read_triplets};
use simsim::predict::{evaluate, holdout_split, PredictModel};

fn main() {
    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optopt(
        "m",
        "model",
        "Prediction model: user | item (required).",
        "MODEL",
    );
    opts.optopt(
        "t",
        "triplets",
        "Triplet CSV (outer,inner,value) with the full ratings (required).",
        "PATH",
    );
    opts.optopt("s", "sim", "Neighbor CSV produced by a similarity run (required).", "PATH");
    opts.optopt(
        "",
        "means",
        "Per-user means CSV; required for the user model.",
        "PATH",
    );
    opts.optopt(
        "",
        "test-ratio",
        "Fraction of each user's ratings to hold out (optional, defaults to 0.1).",
        "NUMBER",
    );
    opts.optopt(
        "",
        "k-eval",
        "Neighbors to consider per prediction; 0 uses all from the CSV (optional, defaults \
         to 0).",
        "NUMBER",
    );
    opts.optopt("", "seed", "Hold-out split seed (optional, defaults to 42).", "NUMBER");
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

    let model = match matches.opt_str("m").as_deref().and_then(PredictModel::parse) {
        Some(model) => model,
        None => {
            return print_usage_and_exit(&program, opts, Some("Please specify --model=user|item."))
        }
    };
    let triplets_path = match matches.opt_str("t") {
        Some(path) => PathBuf::from(path),
        None => return print_usage_and_exit(&program, opts, Some("Please specify --triplets.")),
    };
    let sim_path = match matches.opt_str("s") {
        Some(path) => PathBuf::from(path),
        None => return print_usage_and_exit(&program, opts, Some("Please specify --sim.")),
    };
    let means_path = matches.opt_str("means").map(PathBuf::from);
    if model == PredictModel::UserBased && means_path.is_none() {
        return print_usage_and_exit(
            &program,
            opts,
            Some("The user model needs --means from the normalize step."),
        );
    }

    let test_ratio = match matches.opt_get_default("test-ratio", 0.1f64) {
        Ok(ratio) => ratio,
        Err(failure) => {
            let hint = format!("Problem with option 'test-ratio': {}", failure);
            return print_usage_and_exit(&program, opts, Some(&hint));
        }
    };
    let k_eval = match matches.opt_get_default("k-eval", 0usize) {
        Ok(k_eval) => k_eval,
        Err(failure) => {
            let hint = format!("Problem with option 'k-eval': {}", failure);
            return print_usage_and_exit(&program, opts, Some(&hint));
        }
    };
    let seed = match matches.opt_get_default("seed", 42u64) {
        Ok(seed) => seed,
        Err(failure) => {
            let hint = format!("Problem with option 'seed': {}", failure);
            return print_usage_and_exit(&program, opts, Some(&hint));
        }
    };

    if let Err(fault) = predict(
        model,
        &triplets_path,
        &sim_path,
        means_path.as_deref(),
        test_ratio,
        k_eval,
        seed,
    ) {
        eprintln!("prediction failed: {}", fault);
        process::exit(1);
    }
}

fn predict(
    model: PredictModel,
    triplets_path: &std::path::Path,
    sim_path: &std::path::Path,
    means_path: Option<&std::path::Path>,
    test_ratio: f64,
    k_eval: usize,
    seed: u64,
) -> Result<()> {
    println!("Reading ratings from {}", triplets_path.display());
    let file = read_triplets(triplets_path)?;

    println!("Reading neighbors from {}", sim_path.display());
    let neighbors = read_neighbors(sim_path)?;

    let means = match means_path {
        Some(path) => read_means(path)?,
        None => Vec::new(),
    };

    let holdout = holdout_split(&file.triplets, file.num_outer, test_ratio, seed);
    println!(
        "Hold-out split: {} test ratings, seed {}",
        holdout.test.len(),
        seed
    );

    let result = evaluate(model, &holdout, &neighbors, &means, k_eval);
    let label = match model {
        PredictModel::UserBased => "USER",
        PredictModel::ItemBased => "ITEM",
    };
    println!(
        "[MODEL={}] evaluated={}  MAE={:.4}  RMSE={:.4}",
        label, result.evaluated, result.mae, result.rmse
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
