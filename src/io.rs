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

//! CSV input and output: the triplet basket stream, means files, the
//! neighbor CSV and the run report.

use std::fs::{self, File};
use std::path::Path;

use fnv::FnvHashMap;

use crate::error::{Result, SimError};
use crate::sampling::keep_by_pct;
use crate::topk::ScoredNeighbor;
use crate::types::Basket;

/// Baskets per chunk handed to the accumulation pool when streaming triplets.
pub const BASKETS_PER_CHUNK: usize = 4096;

/// Counters collected while streaming a triplet file.
#[derive(Debug, Default, Clone, Copy)]
pub struct TripletStreamStats {
    /// Outer keys that contributed at least one sampled entry.
    pub outers_kept: u64,
    /// Triplets that survived both sampling filters.
    pub triplets_kept: u64,
    /// Largest inner id seen among kept triplets.
    pub max_inner: Option<u32>,
}

/// Streams one basket per outer key from a triplet CSV sorted by outer id.
///
/// Exactly one basket (the current outer key's) is held in memory. Sampling
/// is applied per outer and per inner id; a filtered outer key drops its
/// whole group. Sampled inner degrees are counted on the fly for the
/// Jaccard union term.
pub struct TripletBaskets {
    reader: csv::Reader<File>,
    path: String,
    pct_outer: u32,
    pct_inner: u32,
    record: csv::StringRecord,
    current: Option<(u32, Basket)>,
    last_outer: Option<u32>,
    line: u64,
    done: bool,
    pub inner_degrees: FnvHashMap<u32, u32>,
    pub stats: TripletStreamStats,
}

impl TripletBaskets {
    pub fn open(path: &Path, pct_outer: u32, pct_inner: u32) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(|fault| SimError::csv(path, fault))?;

        let headers = reader
            .headers()
            .map_err(|fault| SimError::csv(path, fault))?;
        if headers.len() != 3 {
            return Err(SimError::format(
                path,
                format!("expected a 3-column header, found {} columns", headers.len()),
            ));
        }

        Ok(TripletBaskets {
            reader,
            path: path.display().to_string(),
            pct_outer,
            pct_inner,
            record: csv::StringRecord::new(),
            current: None,
            last_outer: None,
            line: 1,
            done: false,
            inner_degrees: FnvHashMap::default(),
            stats: TripletStreamStats::default(),
        })
    }

    /// The next complete basket, or `Ok(None)` at end of stream.
    pub fn next_basket(&mut self) -> Result<Option<Basket>> {
        if self.done {
            return Ok(None);
        }
        loop {
            let more = self
                .reader
                .read_record(&mut self.record)
                .map_err(|fault| self.csv_fault(fault))?;
            if !more {
                self.done = true;
                return Ok(self.current.take().map(|(_, basket)| basket));
            }
            self.line += 1;

            let (outer, inner, value) = self.parse_record()?;
            if let Some(last) = self.last_outer {
                if outer < last {
                    return Err(self.format_fault(format!(
                        "triplets not sorted by outer id at line {}",
                        self.line
                    )));
                }
            }
            self.last_outer = Some(outer);

            let completed = match &self.current {
                Some((current_outer, _)) if *current_outer != outer => {
                    self.current.take().map(|(_, basket)| basket)
                }
                _ => None,
            };

            if keep_by_pct(outer, self.pct_outer) && keep_by_pct(inner, self.pct_inner) {
                match &mut self.current {
                    Some((_, basket)) => basket.push((inner, value)),
                    None => {
                        self.current = Some((outer, vec![(inner, value)]));
                        self.stats.outers_kept += 1;
                    }
                }
                *self.inner_degrees.entry(inner).or_insert(0) += 1;
                self.stats.triplets_kept += 1;
                self.stats.max_inner = Some(self.stats.max_inner.map_or(inner, |m| m.max(inner)));
            }

            if let Some(basket) = completed {
                return Ok(Some(basket));
            }
        }
    }

    /// Rows needed to index every kept inner id.
    pub fn num_inner_rows(&self) -> usize {
        self.stats.max_inner.map_or(0, |m| m as usize + 1)
    }

    fn parse_record(&self) -> Result<(u32, u32, f64)> {
        if self.record.len() != 3 {
            return Err(self.format_fault(format!(
                "expected 3 fields at line {}, found {}",
                self.line,
                self.record.len()
            )));
        }
        let outer = self.parse_id(0, "outer")?;
        let inner = self.parse_id(1, "inner")?;
        let value: f64 = self.record[2].trim().parse().map_err(|_| {
            self.format_fault(format!(
                "malformed value '{}' at line {}",
                &self.record[2], self.line
            ))
        })?;
        if !value.is_finite() {
            return Err(self.format_fault(format!("non-finite value at line {}", self.line)));
        }
        Ok((outer, inner, value))
    }

    fn parse_id(&self, field: usize, label: &str) -> Result<u32> {
        self.record[field].trim().parse().map_err(|_| {
            self.format_fault(format!(
                "malformed {} id '{}' at line {}",
                label, &self.record[field], self.line
            ))
        })
    }

    fn format_fault(&self, detail: String) -> SimError {
        SimError::InvalidFormat {
            path: self.path.clone(),
            detail,
        }
    }

    fn csv_fault(&self, fault: csv::Error) -> SimError {
        SimError::Csv {
            path: self.path.clone(),
            source: fault,
        }
    }
}

/// A whole triplet file in memory, for preprocessing and evaluation.
pub struct TripletFile {
    pub triplets: Vec<(u32, u32, f64)>,
    pub num_outer: usize,
    pub num_inner: usize,
}

pub fn read_triplets(path: &Path) -> Result<TripletFile> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|fault| SimError::csv(path, fault))?;

    let mut triplets = Vec::new();
    let mut num_outer = 0usize;
    let mut num_inner = 0usize;
    let mut record = csv::StringRecord::new();
    let mut line = 1u64;
    loop {
        let more = reader
            .read_record(&mut record)
            .map_err(|fault| SimError::csv(path, fault))?;
        if !more {
            break;
        }
        line += 1;
        let (outer, inner, value) = parse_triplet_record(path, &record, line)?;
        num_outer = num_outer.max(outer as usize + 1);
        num_inner = num_inner.max(inner as usize + 1);
        triplets.push((outer, inner, value));
    }

    Ok(TripletFile {
        triplets,
        num_outer,
        num_inner,
    })
}

fn parse_triplet_record(
    path: &Path,
    record: &csv::StringRecord,
    line: u64,
) -> Result<(u32, u32, f64)> {
    if record.len() != 3 {
        return Err(SimError::format(
            path,
            format!("expected 3 fields at line {}, found {}", line, record.len()),
        ));
    }
    let outer: u32 = record[0].trim().parse().map_err(|_| {
        SimError::format(
            path,
            format!("malformed outer id '{}' at line {}", &record[0], line),
        )
    })?;
    let inner: u32 = record[1].trim().parse().map_err(|_| {
        SimError::format(
            path,
            format!("malformed inner id '{}' at line {}", &record[1], line),
        )
    })?;
    let value: f64 = record[2].trim().parse().map_err(|_| {
        SimError::format(
            path,
            format!("malformed value '{}' at line {}", &record[2], line),
        )
    })?;
    Ok((outer, inner, value))
}

/// Reads the `idx,mean` CSV; row i must carry index i.
pub fn read_means(path: &Path) -> Result<Vec<f64>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|fault| SimError::csv(path, fault))?;

    let mut means = Vec::new();
    let mut record = csv::StringRecord::new();
    let mut line = 1u64;
    loop {
        let more = reader
            .read_record(&mut record)
            .map_err(|fault| SimError::csv(path, fault))?;
        if !more {
            break;
        }
        line += 1;
        if record.len() != 2 {
            return Err(SimError::format(
                path,
                format!("expected 2 fields at line {}, found {}", line, record.len()),
            ));
        }
        let index: usize = record[0].trim().parse().map_err(|_| {
            SimError::format(
                path,
                format!("malformed index '{}' at line {}", &record[0], line),
            )
        })?;
        if index != means.len() {
            return Err(SimError::format(
                path,
                format!(
                    "expected index {} at line {}, found {}",
                    means.len(),
                    line,
                    index
                ),
            ));
        }
        let mean: f64 = record[1].trim().parse().map_err(|_| {
            SimError::format(
                path,
                format!("malformed mean '{}' at line {}", &record[1], line),
            )
        })?;
        means.push(mean);
    }
    Ok(means)
}

pub fn write_means(path: &Path, means: &[f64]) -> Result<()> {
    ensure_parent_dir(path)?;
    let mut writer = csv::Writer::from_path(path).map_err(|fault| SimError::csv(path, fault))?;
    writer
        .write_record(["idx", "mean"])
        .map_err(|fault| SimError::csv(path, fault))?;
    for (index, mean) in means.iter().enumerate() {
        writer
            .write_record([index.to_string(), mean.to_string()])
            .map_err(|fault| SimError::csv(path, fault))?;
    }
    writer.flush().map_err(|fault| SimError::io(path, fault))?;
    Ok(())
}

/// Reads a neighbor CSV back into per-row lists, preserving file order.
pub fn read_neighbors(path: &Path) -> Result<crate::types::NeighborLists> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|fault| SimError::csv(path, fault))?;

    let mut lists = crate::types::NeighborLists::default();
    let mut record = csv::StringRecord::new();
    let mut line = 1u64;
    loop {
        let more = reader
            .read_record(&mut record)
            .map_err(|fault| SimError::csv(path, fault))?;
        if !more {
            break;
        }
        line += 1;
        let (row, neighbor, score) = parse_triplet_record(path, &record, line)?;
        lists.entry(row).or_default().push((neighbor, score));
    }
    Ok(lists)
}

/// Writes the neighbor CSV: header, then rows grouped by ascending row id,
/// each group already in top-K order. Scores carry six fractional digits.
/// Returns the number of data lines written.
pub fn write_neighbors(
    path: &Path,
    header: [&str; 3],
    lists: &[Vec<ScoredNeighbor>],
) -> Result<u64> {
    ensure_parent_dir(path)?;
    let mut writer = csv::Writer::from_path(path).map_err(|fault| SimError::csv(path, fault))?;
    writer
        .write_record(header)
        .map_err(|fault| SimError::csv(path, fault))?;

    let mut lines = 0u64;
    for (row, neighbors) in lists.iter().enumerate() {
        for neighbor in neighbors {
            writer
                .write_record([
                    row.to_string(),
                    neighbor.id.to_string(),
                    format!("{:.6}", neighbor.score),
                ])
                .map_err(|fault| SimError::csv(path, fault))?;
            lines += 1;
        }
    }
    writer.flush().map_err(|fault| SimError::io(path, fault))?;
    Ok(lines)
}

pub fn write_report(path: &Path, report: &str) -> Result<()> {
    ensure_parent_dir(path)?;
    fs::write(path, report).map_err(|fault| SimError::io(path, fault))
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|fault| SimError::io(parent, fault))?;
        }
    }
    Ok(())
}
