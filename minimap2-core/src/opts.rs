//! Configuration: index-build options, mapping options, presets and the
//! scoring matrix.
//!
//! Generalizes the teacher's `Minimap2Opts`/`Preset` pair (which only
//! toggled a handful of `minimap2 -x`-style flags) into the full parameter
//! set named in spec §6.

/// Indexing-side parameters (§4.2, §6).
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// k-mer length.
    pub k: usize,
    /// Minimizer window length.
    pub w: usize,
    /// Number of low bits of the k-mer hash used to select a bucket.
    /// Must be `<= 2*k`.
    pub bucket_bits: u32,
    /// Percentile cutoffs (descending rarity) used to derive occurrence
    /// tiers, e.g. `{0.05, 0.01, 0.001}`.
    pub occurrence_fractions: Vec<f64>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            k: 15,
            w: 10,
            bucket_bits: 14,
            occurrence_fractions: vec![0.05, 0.01, 0.001],
        }
    }
}

/// Mapping-side parameters (§4.5–§4.7, §6).
#[derive(Debug, Clone)]
pub struct MapOptions {
    /// Chaining window length, in linear (ref/query) bases.
    pub wlen: i64,
    /// Target gap length used when picking the next seed on a chain.
    pub tglen: i64,
    /// Minimum accepted alignment score.
    pub min_score: i32,
    /// Minimum score ratio (relative to the best chain) to keep a result.
    pub min_ratio: f64,
    /// 4x4 match/mismatch matrix, row-major, indexed by 2-bit base code.
    pub scoring_matrix: ScoringMatrix,
    /// Linear/affine gap penalties `(gap_open, gap_extend)` for the short
    /// and long gap cost functions.
    pub gap_open: i32,
    pub gap_extend: i32,
    pub gap_open_long: i32,
    pub gap_extend_long: i32,
    /// X-drop threshold for the external DP kernel.
    pub xdrop: i32,
    /// Maximum number of chain extension attempts before the engine gives
    /// up on the remainder of a query's chains (§4.7).
    pub max_chain_trials: u32,
    /// Maximum number of seed-advance attempts within one chain (§4.7).
    pub max_seed_trials: u32,
    /// Supplementary/secondary overlap threshold (§4.7 post-processing).
    pub secondary_overlap_ratio: f64,
    /// When true, pairs with `ref_id < query_id` are skipped — the
    /// all-versus-all lower-triangle elimination (§4.4, §9).
    pub all_vs_all: bool,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            wlen: 7000,
            tglen: 7000,
            min_score: 50,
            min_ratio: 0.3,
            scoring_matrix: ScoringMatrix::simple(1, -1),
            gap_open: 1,
            gap_extend: 1,
            gap_open_long: 0,
            gap_extend_long: 0,
            xdrop: 50,
            max_chain_trials: 50_000,
            max_seed_trials: 8,
            secondary_overlap_ratio: 1.2,
            all_vs_all: false,
        }
    }
}

impl MapOptions {
    /// Sets the all-versus-all triangle-elimination mode (§9 Open
    /// Question: "accept 'skip pair when ref_id < query_id under
    /// caller-supplied id spaces' as the contract").
    pub fn all_vs_all(mut self, enabled: bool) -> Self {
        self.all_vs_all = enabled;
        self
    }
}

/// A 4x4 integer match/mismatch matrix over the 2-bit base alphabet
/// `{A, C, G, T}` (N is handled separately by the DP kernel).
#[derive(Debug, Clone, Copy)]
pub struct ScoringMatrix {
    pub cells: [[i32; 4]; 4],
}

impl ScoringMatrix {
    /// Builds the common `match`/`mismatch` uniform matrix.
    pub fn simple(match_score: i32, mismatch_penalty: i32) -> Self {
        let mut cells = [[mismatch_penalty; 4]; 4];
        for (i, row) in cells.iter_mut().enumerate() {
            row[i] = match_score;
        }
        Self { cells }
    }

    /// Derives `(mcoef, xcoef)` from the actual shape of the matrix,
    /// rather than assuming 4 diagonal and 12 off-diagonal cells (§9 Open
    /// Question: "a re-implementation should recompute denominators from
    /// the matrix structure").
    pub fn mcoef_xcoef(&self) -> (f64, f64) {
        let mut diag_sum = 0i64;
        let mut diag_n = 0i64;
        let mut off_sum = 0i64;
        let mut off_n = 0i64;
        for i in 0..4 {
            for j in 0..4 {
                if i == j {
                    diag_sum += self.cells[i][j] as i64;
                    diag_n += 1;
                } else {
                    off_sum += self.cells[i][j] as i64;
                    off_n += 1;
                }
            }
        }
        let mcoef = diag_sum as f64 / diag_n.max(1) as f64;
        let xcoef = -(off_sum as f64) / off_n.max(1) as f64;
        (mcoef, xcoef)
    }
}

/// Sequencing-technology presets bundling index and map options, mirroring
/// the teacher's `Preset` enum (`MapOnt`, `MapPb`, ...) but resolved to
/// full parameter sets instead of a `-x` string handed to an external CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// Oxford Nanopore long reads.
    Ont,
    /// PacBio CLR/HiFi long reads.
    Pacbio,
    /// All-versus-all read overlap (no reference, read set maps to itself).
    AllVsAll,
}

impl Preset {
    /// Returns the `(IndexOptions, MapOptions)` pair for this preset.
    pub fn resolve(self) -> (IndexOptions, MapOptions) {
        let index = match self {
            Preset::Ont => IndexOptions { k: 15, w: 10, ..Default::default() },
            Preset::Pacbio => IndexOptions {
                k: 15,
                w: (2 * 15 + 2) / 3,
                ..Default::default()
            },
            Preset::AllVsAll => IndexOptions { k: 15, w: 5, ..Default::default() },
        };
        let map = match self {
            Preset::AllVsAll => MapOptions::default().all_vs_all(true),
            _ => MapOptions::default(),
        };
        (index, map)
    }
}
