//! External collaborators (spec.md §6) modeled as a trait object, the same
//! shape as `reqpool`/`reqactor` injecting a `Pool`/chain spec into the
//! actor instead of hardcoding a prover backend.
//!
//! The real alignment/trim/scoring kernels are out of scope (spec.md §1);
//! this seam exists so the worker loop can be exercised end to end against
//! a deterministic test double.

use farmcore_lib::{FarmResult, PairId};

/// A per-residue secondary-structure prediction row, as parsed from a
/// `.ss2` dataframe (spec.md §6 `read_ss2`).
#[derive(Debug, Clone, PartialEq)]
pub struct Ss2Row {
    pub residue_index: u32,
    pub amino_acid: char,
    pub secondary_structure: char,
    pub coil_prob: f64,
    pub helix_prob: f64,
    pub sheet_prob: f64,
}

/// Which stage `update_psipred` is being invoked for, matching the
/// `stage∈{"msa","trimal"}` parameter of spec.md §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsipredStage {
    Msa,
    Trimal,
}

/// The black-box alignment/trim/scoring routines the worker loop calls.
/// spec.md §6 gives these signatures; implementations are free to shell
/// out, link a native library, or (for tests) fabricate deterministic
/// output.
pub trait ScoringBackend: Send + Sync {
    fn generate_msa(&self, sequences: &str, aligner_name: &str, params: &str) -> FarmResult<String>;

    fn trim(&self, sequences: &str, thresholds: &[f64], alignment: &str) -> FarmResult<String>;

    fn read_ss2(&self, contents: &str) -> FarmResult<Vec<Ss2Row>>;

    fn update_psipred(
        &self,
        alignment: &str,
        dfs: &[(String, Vec<Ss2Row>)],
        stage: PsipredStage,
    ) -> FarmResult<Vec<(String, Vec<Ss2Row>)>>;

    fn score_pair(
        &self,
        pair: &PairId,
        ss2_1: &[Ss2Row],
        ss2_2: &[Ss2Row],
        alignment: &str,
        gap_open: f64,
        gap_extend: f64,
    ) -> FarmResult<(f64, f64)>;

    /// Post-aggregation normalization of the concatenated score frame.
    fn set_final_sim_scores(&self, frame: &str) -> FarmResult<String>;
}

/// Deterministic in-memory double used by worker-loop tests: produces
/// stable, reproducible scores from a seeded hash of each pair's ids rather
/// than running a real aligner.
pub struct MockScoringBackend;

impl ScoringBackend for MockScoringBackend {
    fn generate_msa(&self, sequences: &str, _aligner_name: &str, _params: &str) -> FarmResult<String> {
        Ok(format!("ALIGNED\n{sequences}"))
    }

    fn trim(&self, _sequences: &str, _thresholds: &[f64], alignment: &str) -> FarmResult<String> {
        Ok(alignment.to_string())
    }

    fn read_ss2(&self, contents: &str) -> FarmResult<Vec<Ss2Row>> {
        contents
            .lines()
            .enumerate()
            .map(|(i, _)| {
                Ok(Ss2Row {
                    residue_index: i as u32,
                    amino_acid: 'A',
                    secondary_structure: 'C',
                    coil_prob: 1.0,
                    helix_prob: 0.0,
                    sheet_prob: 0.0,
                })
            })
            .collect()
    }

    fn update_psipred(
        &self,
        _alignment: &str,
        dfs: &[(String, Vec<Ss2Row>)],
        _stage: PsipredStage,
    ) -> FarmResult<Vec<(String, Vec<Ss2Row>)>> {
        Ok(dfs.to_vec())
    }

    fn score_pair(
        &self,
        pair: &PairId,
        ss2_1: &[Ss2Row],
        ss2_2: &[Ss2Row],
        _alignment: &str,
        _gap_open: f64,
        _gap_extend: f64,
    ) -> FarmResult<(f64, f64)> {
        let seed = pair.seq1.len() as f64 + pair.seq2.len() as f64;
        let overlap = ss2_1.len().min(ss2_2.len()) as f64;
        Ok((seed % 1.0 + 0.5, overlap / (ss2_1.len().max(ss2_2.len()).max(1) as f64)))
    }

    fn set_final_sim_scores(&self, frame: &str) -> FarmResult<String> {
        Ok(frame.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_backend_scores_deterministically() {
        let backend = MockScoringBackend;
        let pair = PairId {
            seq1: "abc".into(),
            seq2: "defg".into(),
        };
        let ss2 = vec![Ss2Row {
            residue_index: 0,
            amino_acid: 'A',
            secondary_structure: 'C',
            coil_prob: 1.0,
            helix_prob: 0.0,
            sheet_prob: 0.0,
        }];
        let first = backend.score_pair(&pair, &ss2, &ss2, "", -5.0, -2.0).unwrap();
        let second = backend.score_pair(&pair, &ss2, &ss2, "", -5.0, -2.0).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn read_ss2_counts_one_row_per_line() {
        let backend = MockScoringBackend;
        let rows = backend.read_ss2("line1\nline2\nline3\n").unwrap();
        assert_eq!(rows.len(), 3);
    }
}
