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

//! Compressed-sparse-row storage of the ratings matrix.
//!
//! A matrix lives on disk as three headerless little-endian blobs next to a
//! JSON meta blob describing the shape: `indptr.bin` (int64, U+1 entries),
//! `indices.bin` (int32, NNZ entries), `data.bin` (float32, NNZ entries) and
//! `meta.json`. Lengths are derived from file sizes, so every structural
//! assumption is checked on load and violations fail with a message naming
//! the offending row or position.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

pub const INDPTR_FILE: &str = "indptr.bin";
pub const INDICES_FILE: &str = "indices.bin";
pub const DATA_FILE: &str = "data.bin";
pub const META_FILE: &str = "meta.json";

/// Shape and element widths of the three binary blobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrMeta {
    pub users: usize,
    pub items: usize,
    pub nnz: usize,
    pub dtypes: DTypes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DTypes {
    pub indptr: String,
    pub indices: String,
    pub data: String,
}

impl CsrMeta {
    pub fn for_shape(users: usize, items: usize, nnz: usize) -> Self {
        CsrMeta {
            users,
            items,
            nnz,
            dtypes: DTypes {
                indptr: "int64".to_string(),
                indices: "int32".to_string(),
                data: "float32".to_string(),
            },
        }
    }
}

/// An immutable CSR view over row pointers, column indices and values.
///
/// Row `r` occupies positions `[indptr[r], indptr[r+1])` of `indices` and
/// `data`. Once constructed the matrix never changes; downstream components
/// hold read-only references for the life of a run.
#[derive(Debug)]
pub struct Csr {
    indptr: Vec<i64>,
    indices: Vec<i32>,
    data: Vec<f32>,
    num_cols: usize,
}

impl Csr {
    /// Assembles a matrix from its parts, checking every structural invariant.
    pub fn new(indptr: Vec<i64>, indices: Vec<i32>, data: Vec<f32>, num_cols: usize) -> Result<Self> {
        let csr = Csr {
            indptr,
            indices,
            data,
            num_cols,
        };
        csr.validate(Path::new("csr"))?;
        Ok(csr)
    }

    pub fn num_rows(&self) -> usize {
        self.indptr.len() - 1
    }

    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    /// Column indices and values of one row.
    pub fn row(&self, row: usize) -> (&[i32], &[f32]) {
        let start = self.indptr[row] as usize;
        let end = self.indptr[row + 1] as usize;
        (&self.indices[start..end], &self.data[start..end])
    }

    /// Loads a matrix from a directory holding the three blobs and `meta.json`.
    pub fn read(dir: &Path) -> Result<Self> {
        let meta_path = dir.join(META_FILE);
        let meta_bytes =
            fs::read(&meta_path).map_err(|fault| SimError::io(&meta_path, fault))?;
        let meta: CsrMeta = serde_json::from_slice(&meta_bytes)
            .map_err(|fault| SimError::format(&meta_path, format!("malformed meta blob: {}", fault)))?;

        let indptr = read_i64_blob(&dir.join(INDPTR_FILE))?;
        let indices = read_i32_blob(&dir.join(INDICES_FILE))?;
        let data = read_f32_blob(&dir.join(DATA_FILE))?;

        if indptr.len() != meta.users + 1 {
            return Err(SimError::format(
                dir,
                format!(
                    "meta declares {} users but the row pointer blob has {} entries",
                    meta.users,
                    indptr.len()
                ),
            ));
        }
        if indices.len() != meta.nnz {
            return Err(SimError::format(
                dir,
                format!(
                    "meta declares nnz={} but found {} column indices",
                    meta.nnz,
                    indices.len()
                ),
            ));
        }

        let csr = Csr {
            indptr,
            indices,
            data,
            num_cols: meta.items,
        };
        csr.validate(dir)?;
        Ok(csr)
    }

    /// Persists the three blobs and `meta.json` into `dir`.
    pub fn write(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|fault| SimError::io(dir, fault))?;

        let mut indptr_bytes = Vec::with_capacity(self.indptr.len() * 8);
        for value in &self.indptr {
            indptr_bytes.extend_from_slice(&value.to_le_bytes());
        }
        write_blob(&dir.join(INDPTR_FILE), &indptr_bytes)?;

        let mut indices_bytes = Vec::with_capacity(self.indices.len() * 4);
        for value in &self.indices {
            indices_bytes.extend_from_slice(&value.to_le_bytes());
        }
        write_blob(&dir.join(INDICES_FILE), &indices_bytes)?;

        let mut data_bytes = Vec::with_capacity(self.data.len() * 4);
        for value in &self.data {
            data_bytes.extend_from_slice(&value.to_le_bytes());
        }
        write_blob(&dir.join(DATA_FILE), &data_bytes)?;

        let meta = CsrMeta::for_shape(self.num_rows(), self.num_cols, self.nnz());
        let meta_path = dir.join(META_FILE);
        let meta_bytes = serde_json::to_vec_pretty(&meta)
            .map_err(|fault| SimError::format(&meta_path, format!("meta serialization failed: {}", fault)))?;
        write_blob(&meta_path, &meta_bytes)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if self.indptr.is_empty() {
            return Err(SimError::format(path, "row pointer blob is empty"));
        }
        if self.indptr[0] != 0 {
            return Err(SimError::format(path, "row pointers must start at 0"));
        }
        for row in 1..self.indptr.len() {
            if self.indptr[row] < self.indptr[row - 1] {
                return Err(SimError::format(
                    path,
                    format!("row pointers decrease at row {}", row - 1),
                ));
            }
        }
        let nnz = self.indptr[self.indptr.len() - 1];
        if nnz < 0 || nnz as usize != self.indices.len() {
            return Err(SimError::format(
                path,
                format!(
                    "row pointers end at {} but there are {} column indices",
                    nnz,
                    self.indices.len()
                ),
            ));
        }
        if self.data.len() != self.indices.len() {
            return Err(SimError::format(
                path,
                format!(
                    "{} column indices but {} values",
                    self.indices.len(),
                    self.data.len()
                ),
            ));
        }
        for (position, &column) in self.indices.iter().enumerate() {
            if column < 0 || column as usize >= self.num_cols {
                return Err(SimError::format(
                    path,
                    format!(
                        "column index {} at position {} exceeds {} columns",
                        column, position, self.num_cols
                    ),
                ));
            }
        }
        for (position, &value) in self.data.iter().enumerate() {
            if !value.is_finite() {
                return Err(SimError::format(
                    path,
                    format!("non-finite value at position {}", position),
                ));
            }
        }
        Ok(())
    }
}

fn read_i64_blob(path: &Path) -> Result<Vec<i64>> {
    let bytes = fs::read(path).map_err(|fault| SimError::io(path, fault))?;
    if bytes.len() % 8 != 0 {
        return Err(SimError::format(
            path,
            format!("{} bytes is not a multiple of the 8-byte element width", bytes.len()),
        ));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| i64::from_le_bytes(chunk.try_into().expect("chunk width")))
        .collect())
}

fn read_i32_blob(path: &Path) -> Result<Vec<i32>> {
    let bytes = fs::read(path).map_err(|fault| SimError::io(path, fault))?;
    if bytes.len() % 4 != 0 {
        return Err(SimError::format(
            path,
            format!("{} bytes is not a multiple of the 4-byte element width", bytes.len()),
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| i32::from_le_bytes(chunk.try_into().expect("chunk width")))
        .collect())
}

fn read_f32_blob(path: &Path) -> Result<Vec<f32>> {
    let bytes = fs::read(path).map_err(|fault| SimError::io(path, fault))?;
    if bytes.len() % 4 != 0 {
        return Err(SimError::format(
            path,
            format!("{} bytes is not a multiple of the 4-byte element width", bytes.len()),
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(chunk.try_into().expect("chunk width")))
        .collect())
}

fn write_blob(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).map_err(|fault| SimError::io(path, fault))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn small_matrix() -> Csr {
        // 3 users x 3 items: the ratings from the MovieLens-style mini example.
        Csr::new(
            vec![0, 2, 4, 6],
            vec![0, 1, 0, 2, 1, 2],
            vec![5.0, 3.0, 4.0, 2.0, 1.0, 5.0],
            3,
        )
        .unwrap()
    }

    #[test]
    fn round_trip_through_directory() {
        let dir = tempdir().unwrap();
        small_matrix().write(dir.path()).unwrap();

        let loaded = Csr::read(dir.path()).unwrap();
        assert_eq!(loaded.num_rows(), 3);
        assert_eq!(loaded.num_cols(), 3);
        assert_eq!(loaded.nnz(), 6);

        let (columns, values) = loaded.row(1);
        assert_eq!(columns, &[0, 2]);
        assert_eq!(values, &[4.0, 2.0]);
    }

    #[test]
    fn rejects_decreasing_row_pointers() {
        let fault = Csr::new(vec![0, 4, 2], vec![0, 0, 0, 0], vec![1.0; 4], 3).unwrap_err();
        assert!(fault.to_string().contains("decrease at row 1"));
    }

    #[test]
    fn rejects_row_pointer_not_starting_at_zero() {
        let fault = Csr::new(vec![1, 2], vec![0, 0], vec![1.0, 1.0], 3).unwrap_err();
        assert!(fault.to_string().contains("start at 0"));
    }

    #[test]
    fn rejects_nnz_mismatch() {
        let fault = Csr::new(vec![0, 3], vec![0, 1], vec![1.0, 1.0], 3).unwrap_err();
        assert!(fault.to_string().contains("row pointers end at 3"));
    }

    #[test]
    fn rejects_out_of_range_column() {
        let fault = Csr::new(vec![0, 1], vec![3], vec![1.0], 3).unwrap_err();
        assert!(fault.to_string().contains("column index 3 at position 0"));
    }

    #[test]
    fn rejects_non_finite_value() {
        let fault = Csr::new(vec![0, 1], vec![0], vec![f32::NAN], 3).unwrap_err();
        assert!(fault.to_string().contains("non-finite value at position 0"));
    }

    #[test]
    fn rejects_truncated_blob() {
        let dir = tempdir().unwrap();
        small_matrix().write(dir.path()).unwrap();

        // Chop one byte off the row pointer blob.
        let indptr_path = dir.path().join(INDPTR_FILE);
        let mut bytes = fs::read(&indptr_path).unwrap();
        bytes.pop();
        fs::write(&indptr_path, &bytes).unwrap();

        let fault = Csr::read(dir.path()).unwrap_err();
        assert!(fault.to_string().contains("not a multiple of the 8-byte"));
    }

    #[test]
    fn rejects_meta_shape_mismatch() {
        let dir = tempdir().unwrap();
        small_matrix().write(dir.path()).unwrap();

        let meta_path = dir.path().join(META_FILE);
        let mut meta: CsrMeta =
            serde_json::from_slice(&fs::read(&meta_path).unwrap()).unwrap();
        meta.nnz = 99;
        fs::write(&meta_path, serde_json::to_vec(&meta).unwrap()).unwrap();

        let fault = Csr::read(dir.path()).unwrap_err();
        assert!(fault.to_string().contains("meta declares nnz=99"));
    }
}
