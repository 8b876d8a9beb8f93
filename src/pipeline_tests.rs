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

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write as _;
    use std::path::{Path, PathBuf};

    use tempfile::tempdir;

    use crate::center::center_by_user;
    use crate::io::write_means;
    use crate::measures::Measure;
    use crate::run::{run, Mode, RunConfig};

    /* The end-to-end fixture: 3 users, 3 items, six ratings. Every pair of
       items shares exactly one co-rating user, and every pair of users
       shares exactly one co-rated item. */
    const MINI_TRIPLETS: &str = "\
outer,inner,value
0,0,5
0,1,3
1,0,4
1,2,2
2,1,1
2,2,5
";

    fn write_triplets(dir: &Path) -> PathBuf {
        let path = dir.join("ratings.csv");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(MINI_TRIPLETS.as_bytes()).unwrap();
        path
    }

    fn item_config(dir: &Path, measure: Measure) -> RunConfig {
        RunConfig {
            mode: Mode::Item,
            measure,
            k: 2,
            min_co: 1,
            shrink: Some(0.0),
            pct_users: 100,
            pct_items: 100,
            workers: 2,
            num_shards: 8,
            mem_ceiling: 0,
            triplets: Some(write_triplets(dir)),
            csr_dir: None,
            output: dir.join("neighbors.csv"),
            report: Some(dir.join("report.txt")),
        }
    }

    fn user_config(dir: &Path, measure: Measure) -> RunConfig {
        let triplets: Vec<(u32, u32, f64)> = vec![
            (0, 0, 5.0),
            (0, 1, 3.0),
            (1, 0, 4.0),
            (1, 2, 2.0),
            (2, 1, 1.0),
            (2, 2, 5.0),
        ];
        let centered = center_by_user(&triplets).unwrap();
        let csr_dir = dir.join("matrix_user_csr");
        centered.csr.write(&csr_dir).unwrap();
        write_means(&dir.join("means.csv"), &centered.means).unwrap();

        RunConfig {
            mode: Mode::User,
            measure,
            k: 2,
            min_co: 1,
            shrink: Some(0.0),
            pct_users: 100,
            pct_items: 100,
            workers: 2,
            num_shards: 8,
            mem_ceiling: 0,
            triplets: None,
            csr_dir: Some(csr_dir),
            output: dir.join("neighbors.csv"),
            report: Some(dir.join("report.txt")),
        }
    }

    fn output_lines(config: &RunConfig) -> Vec<String> {
        fs::read_to_string(&config.output)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn cosine_item_based_end_to_end() {
        let dir = tempdir().unwrap();
        let config = item_config(dir.path(), Measure::Cosine);
        let report = run(&config).unwrap();

        /* Pair (0,1): dot 15, norms 25 and 9, cosine 15/15 = 1. The other
           two pairs work out to 1 as well. */
        assert_eq!(
            output_lines(&config),
            vec![
                "iIdx,jIdx,sim",
                "0,1,1.000000",
                "0,2,1.000000",
                "1,0,1.000000",
                "1,2,1.000000",
                "2,0,1.000000",
                "2,1,1.000000",
            ]
        );
        assert_eq!(report.baskets, 3);
        assert_eq!(report.distinct_pairs, 3);
        assert_eq!(report.select.retained, 6);
        assert_eq!(report.rows_written, 3);
        assert_eq!(report.lines_written, 6);
    }

    #[test]
    fn pearson_item_based_has_no_defined_pairs() {
        let dir = tempdir().unwrap();
        let config = item_config(dir.path(), Measure::Pearson);
        let report = run(&config).unwrap();

        /* Every pair is co-rated by exactly one user, so both variance
           terms vanish and nothing survives; the CSV is header-only. */
        assert_eq!(output_lines(&config), vec!["iIdx,jIdx,sim"]);
        assert_eq!(report.select.dropped_degenerate, 3);
        assert_eq!(report.select.retained, 0);
        assert_eq!(report.lines_written, 0);
    }

    #[test]
    fn jaccard_item_based_end_to_end() {
        let dir = tempdir().unwrap();
        let config = item_config(dir.path(), Measure::Jaccard);
        let report = run(&config).unwrap();

        /* All degrees are 2 and all intersections 1: 1/(2+2-1) = 1/3,
           with score ties ordered by ascending neighbor id. */
        assert_eq!(
            output_lines(&config),
            vec![
                "iIdx,jIdx,sim",
                "0,1,0.333333",
                "0,2,0.333333",
                "1,0,0.333333",
                "1,2,0.333333",
                "2,0,0.333333",
                "2,1,0.333333",
            ]
        );
        assert_eq!(report.select.retained, 6);
    }

    #[test]
    fn cosine_user_based_on_the_centered_matrix() {
        let dir = tempdir().unwrap();
        let config = user_config(dir.path(), Measure::Cosine);
        let report = run(&config).unwrap();

        /* Centered ratings leave pairs (0,1) and (0,2) perfectly aligned
           and pair (1,2) negatively aligned, which the positivity filter
           removes. */
        assert_eq!(
            output_lines(&config),
            vec![
                "uIdx,vIdx,sim",
                "0,1,1.000000",
                "0,2,1.000000",
                "1,0,1.000000",
                "2,0,1.000000",
            ]
        );
        assert_eq!(report.select.dropped_non_positive, 1);
        assert_eq!(report.rows_written, 3);
    }

    #[test]
    fn user_based_pearson_equals_cosine_on_centered_values() {
        let dir = tempdir().unwrap();
        let cosine_config = user_config(dir.path(), Measure::Cosine);
        run(&cosine_config).unwrap();
        let cosine_output = fs::read_to_string(&cosine_config.output).unwrap();

        let pearson_dir = tempdir().unwrap();
        let pearson_config = user_config(pearson_dir.path(), Measure::Pearson);
        run(&pearson_config).unwrap();
        let pearson_output = fs::read_to_string(&pearson_config.output).unwrap();

        assert_eq!(cosine_output, pearson_output);
    }

    #[test]
    fn shrinkage_dampens_singleton_pairs() {
        let dir = tempdir().unwrap();
        let mut config = item_config(dir.path(), Measure::Cosine);
        config.shrink = Some(3.0);
        run(&config).unwrap();

        /* Raw cosine 1.0 at n=1 becomes 1 * 1/(1+3) = 0.25. */
        let lines = output_lines(&config);
        assert_eq!(lines[1], "0,1,0.250000");
        assert!(lines[1..].iter().all(|line| line.ends_with("0.250000")));
    }

    #[test]
    fn min_co_two_empties_the_mini_example() {
        let dir = tempdir().unwrap();
        let mut config = item_config(dir.path(), Measure::Cosine);
        config.min_co = 2;
        let report = run(&config).unwrap();

        assert_eq!(output_lines(&config), vec!["iIdx,jIdx,sim"]);
        assert_eq!(report.select.dropped_support, 3);
    }

    #[test]
    fn k_one_keeps_the_argmax_with_id_tiebreak() {
        let dir = tempdir().unwrap();
        let mut config = item_config(dir.path(), Measure::Jaccard);
        config.k = 1;
        run(&config).unwrap();

        assert_eq!(
            output_lines(&config),
            vec![
                "iIdx,jIdx,sim",
                "0,1,0.333333",
                "1,0,0.333333",
                "2,0,0.333333",
            ]
        );
    }

    #[test]
    fn zero_percent_sampling_writes_an_empty_csv() {
        let dir = tempdir().unwrap();
        let mut config = item_config(dir.path(), Measure::Cosine);
        config.pct_users = 0;
        let report = run(&config).unwrap();

        assert_eq!(output_lines(&config), vec!["iIdx,jIdx,sim"]);
        assert_eq!(report.baskets, 0);
        assert_eq!(report.entries, 0);

        let user_dir = tempdir().unwrap();
        let mut config = user_config(user_dir.path(), Measure::Cosine);
        config.pct_items = 0;
        let report = run(&config).unwrap();
        assert_eq!(output_lines(&config), vec!["uIdx,vIdx,sim"]);
        assert_eq!(report.entries, 0);
    }

    #[test]
    fn sampled_runs_are_byte_identical() {
        let first_dir = tempdir().unwrap();
        let mut first = item_config(first_dir.path(), Measure::Cosine);
        first.pct_items = 50;
        let first_report = run(&first).unwrap();
        let first_output = fs::read_to_string(&first.output).unwrap();

        let second_dir = tempdir().unwrap();
        let mut second = item_config(second_dir.path(), Measure::Cosine);
        second.pct_items = 50;
        let second_report = run(&second).unwrap();
        let second_output = fs::read_to_string(&second.output).unwrap();

        assert_eq!(first_output, second_output);
        assert_eq!(first_report.entries, second_report.entries);
        assert_eq!(first_report.baskets, second_report.baskets);
        assert_eq!(first_report.pair_updates, second_report.pair_updates);
        assert_eq!(first_report.distinct_pairs, second_report.distinct_pairs);
        assert_eq!(first_report.select, second_report.select);
        assert_eq!(first_report.lines_written, second_report.lines_written);
    }

    #[test]
    fn report_file_carries_greppable_labels() {
        let dir = tempdir().unwrap();
        let config = item_config(dir.path(), Measure::Cosine);
        run(&config).unwrap();

        let report = fs::read_to_string(config.report.as_ref().unwrap()).unwrap();
        assert!(report.contains("== cosine item-based similarity =="));
        assert!(report.contains("baskets consumed"));
        assert!(report.contains("distinct pairs"));
        assert!(report.contains("similarities retained"));
        assert!(report.contains("lines written"));
        assert!(report.contains("accumulating"));
        assert!(report.contains("total"));
        assert!(report.contains("neighbors.csv"));
    }

    #[test]
    fn memory_ceiling_aborts_the_run() {
        let dir = tempdir().unwrap();
        let mut config = item_config(dir.path(), Measure::Cosine);
        // Far too small for even one entry.
        config.mem_ceiling = 1;
        let fault = run(&config).unwrap_err();
        assert!(matches!(
            fault,
            crate::error::SimError::MemoryCeilingExceeded { .. }
        ));
    }

    #[test]
    fn missing_input_is_an_invalid_parameter() {
        let dir = tempdir().unwrap();
        let mut config = item_config(dir.path(), Measure::Cosine);
        config.triplets = None;
        let fault = run(&config).unwrap_err();
        assert!(matches!(
            fault,
            crate::error::SimError::InvalidParameter(_)
        ));
    }
}
