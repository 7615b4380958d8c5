//! Checkpoint artifacts of the shimming pipeline.
//!
//! Plain whitespace-separated text for vectors, segments, and the
//! response matrix (one line per block), JSON for the results summary.
//! Loaders fail with `LoadFailed`; shape checks are the caller's duty.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use undulator_types::error::{UndulatorError, UndulatorResult};

/// Final summary persisted next to the other artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShimmingResults {
    pub nsv: usize,
    pub error_rms_before: f64,
    pub error_rms_predicted: f64,
    pub block_names: Vec<String>,
    pub shims: Vec<f64>,
    pub rounded_shims: Vec<f64>,
}

pub fn save_segments(path: &str, segments: &[(f64, f64)]) -> UndulatorResult<()> {
    let mut out = String::new();
    for (start, end) in segments {
        out.push_str(&format!("{start}\t{end}\n"));
    }
    std::fs::write(path, out)?;
    Ok(())
}

pub fn load_segments(path: &str) -> UndulatorResult<Vec<(f64, f64)>> {
    let contents = read(path)?;
    let mut segments = Vec::new();
    for (i, line) in numeric_lines(&contents) {
        if line.len() != 2 {
            return Err(UndulatorError::LoadFailed(format!(
                "{path}:{i}: expected 2 columns, got {}",
                line.len()
            )));
        }
        segments.push((line[0], line[1]));
    }
    Ok(segments)
}

pub fn save_vector(path: &str, values: &[f64]) -> UndulatorResult<()> {
    let mut out = String::new();
    for v in values {
        out.push_str(&format!("{v}\n"));
    }
    std::fs::write(path, out)?;
    Ok(())
}

pub fn load_vector(path: &str) -> UndulatorResult<Vec<f64>> {
    let contents = read(path)?;
    let mut values = Vec::new();
    for (i, line) in numeric_lines(&contents) {
        if line.len() != 1 {
            return Err(UndulatorError::LoadFailed(format!(
                "{path}:{i}: expected 1 column, got {}",
                line.len()
            )));
        }
        values.push(line[0]);
    }
    Ok(values)
}

/// Response matrix `R ∈ ℝ^(M×N)`: one persisted line per block (column),
/// M values per line.
pub fn save_response_matrix(path: &str, matrix: &Array2<f64>) -> UndulatorResult<()> {
    let mut out = String::new();
    for j in 0..matrix.ncols() {
        let col: Vec<String> = (0..matrix.nrows())
            .map(|i| format!("{}", matrix[[i, j]]))
            .collect();
        out.push_str(&col.join("\t"));
        out.push('\n');
    }
    std::fs::write(path, out)?;
    Ok(())
}

pub fn load_response_matrix(path: &str) -> UndulatorResult<Array2<f64>> {
    let contents = read(path)?;
    let mut columns: Vec<Vec<f64>> = Vec::new();
    for (i, line) in numeric_lines(&contents) {
        if let Some(first) = columns.first() {
            if line.len() != first.len() {
                return Err(UndulatorError::LoadFailed(format!(
                    "{path}:{i}: ragged matrix, expected {} values, got {}",
                    first.len(),
                    line.len()
                )));
            }
        }
        columns.push(line);
    }
    if columns.is_empty() {
        return Err(UndulatorError::LoadFailed(format!(
            "{path}: empty response matrix"
        )));
    }
    let (m, n) = (columns[0].len(), columns.len());
    let mut matrix = Array2::zeros((m, n));
    for (j, col) in columns.iter().enumerate() {
        for (i, &v) in col.iter().enumerate() {
            matrix[[i, j]] = v;
        }
    }
    Ok(matrix)
}

pub fn save_block_names(path: &str, names: &[String]) -> UndulatorResult<()> {
    std::fs::write(path, names.join("\n") + "\n")?;
    Ok(())
}

pub fn load_block_names(path: &str) -> UndulatorResult<Vec<String>> {
    let contents = read(path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

pub fn save_error(path: &str, err: &Array1<f64>) -> UndulatorResult<()> {
    save_vector(path, err.as_slice().unwrap_or(&[]))
}

pub fn load_error(path: &str) -> UndulatorResult<Array1<f64>> {
    Ok(Array1::from_vec(load_vector(path)?))
}

pub fn save_results(path: &str, results: &ShimmingResults) -> UndulatorResult<()> {
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(path, json)?;
    Ok(())
}

pub fn load_results(path: &str) -> UndulatorResult<ShimmingResults> {
    let contents = read(path)?;
    Ok(serde_json::from_str(&contents)?)
}

fn read(path: &str) -> UndulatorResult<String> {
    std::fs::read_to_string(path)
        .map_err(|e| UndulatorError::LoadFailed(format!("{path}: {e}")))
}

fn numeric_lines(contents: &str) -> impl Iterator<Item = (usize, Vec<f64>)> + '_ {
    contents
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(i, l)| {
            (
                i + 1,
                l.split_whitespace()
                    .filter_map(|t| t.parse::<f64>().ok())
                    .collect::<Vec<f64>>(),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp(name: &str) -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name).to_str().unwrap().to_string();
        (dir, path)
    }

    #[test]
    fn test_segments_roundtrip() {
        let (_dir, path) = tmp("segments.txt");
        let segments = vec![(-50.0, -25.0), (-25.0, 0.0), (0.0, 25.0)];
        save_segments(&path, &segments).unwrap();
        let back = load_segments(&path).unwrap();
        assert_eq!(back, segments);
    }

    #[test]
    fn test_vector_roundtrip() {
        let (_dir, path) = tmp("shims.txt");
        let values = vec![0.05, -0.1, 0.0, 0.15];
        save_vector(&path, &values).unwrap();
        assert_eq!(load_vector(&path).unwrap(), values);
    }

    #[test]
    fn test_response_matrix_roundtrip() {
        let (_dir, path) = tmp("matrix.txt");
        let matrix = Array2::from_shape_fn((5, 3), |(i, j)| (i * 10 + j) as f64 * 0.1);
        save_response_matrix(&path, &matrix).unwrap();
        let back = load_response_matrix(&path).unwrap();
        assert_eq!(back.dim(), (5, 3));
        for i in 0..5 {
            for j in 0..3 {
                assert!((back[[i, j]] - matrix[[i, j]]).abs() < 1e-12);
            }
        }
        // One line per block: 3 lines.
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 3);
    }

    #[test]
    fn test_ragged_matrix_rejected() {
        let (_dir, path) = tmp("matrix.txt");
        std::fs::write(&path, "1 2 3\n4 5\n").unwrap();
        assert!(matches!(
            load_response_matrix(&path),
            Err(UndulatorError::LoadFailed(_))
        ));
    }

    #[test]
    fn test_missing_file_is_load_failed() {
        assert!(matches!(
            load_vector("/nonexistent/shims.txt"),
            Err(UndulatorError::LoadFailed(_))
        ));
    }

    #[test]
    fn test_block_names_roundtrip() {
        let (_dir, path) = tmp("names.txt");
        let names = vec!["cse_B001".to_string(), "cse_B003".to_string()];
        save_block_names(&path, &names).unwrap();
        assert_eq!(load_block_names(&path).unwrap(), names);
    }

    #[test]
    fn test_results_roundtrip() {
        let (_dir, path) = tmp("results.json");
        let results = ShimmingResults {
            nsv: 12,
            error_rms_before: 0.3,
            error_rms_predicted: 0.05,
            block_names: vec!["cse_B001".to_string()],
            shims: vec![0.07],
            rounded_shims: vec![0.05],
        };
        save_results(&path, &results).unwrap();
        let back = load_results(&path).unwrap();
        assert_eq!(back.nsv, 12);
        assert_eq!(back.rounded_shims, results.rounded_shims);
    }
}
