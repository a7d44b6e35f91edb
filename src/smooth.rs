//! Tricube kernel smoothing of decoded calls
//!
//! Informative calls (methylated = 1, unmethylated = 0) become observations placed
//! at their genomic position (x) and their cell's pseudotime (y). The smoother
//! estimates the methylation level at grid points as a kernel-weighted mean of the
//! observations, using a product of two tricube kernels.
//!
//! Observations are kept sorted by x so that each grid column only visits the
//! observations inside the kernel's support.

use std::ops::Range;
use std::thread;

use ndarray::{Array2, ArrayView2, ArrayViewMut2, Axis};

use crate::codec::CallCode;
use crate::error::{Result, SmoothError};

/// Tricube kernel with total support `width` (zero for `|d| >= width / 2`)
#[must_use]
pub fn tricube(d: f64, width: f64) -> f64 {
    let t = 2.0 * d.abs() / width;
    if t < 1.0 {
        70.0 / 81.0 * (1.0 - t.powi(3)).powi(3)
    } else {
        0.0
    }
}

fn check_lengths(calls: &ArrayView2<'_, u8>, positions: &[u32]) -> Result<()> {
    if positions.len() == calls.nrows() {
        Ok(())
    } else {
        Err(SmoothError::PositionLength {
            expected: calls.nrows(),
            found: positions.len(),
        }
        .into())
    }
}

fn check_pseudotime(calls: &ArrayView2<'_, u8>, pseudotime: &[f64]) -> Result<()> {
    if pseudotime.len() == calls.ncols() {
        Ok(())
    } else {
        Err(SmoothError::PseudotimeLength {
            expected: calls.ncols(),
            found: pseudotime.len(),
        }
        .into())
    }
}

/// Informative calls placed on the position × pseudotime plane, sorted by position
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Observations {
    x: Vec<f64>,
    y: Vec<f64>,
    values: Vec<f64>,
}
impl Observations {
    /// Builds observations from `(x, y, value)` triples in any order
    #[must_use]
    pub fn new(mut points: Vec<(f64, f64, f64)>) -> Self {
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut obs = Self::default();
        for (x, y, value) in points {
            obs.x.push(x);
            obs.y.push(y);
            obs.values.push(value);
        }
        obs
    }

    /// Collects the informative calls of a decoded table
    ///
    /// `positions` must align with the rows of `calls` and `pseudotime` with its
    /// columns (after any cell mask was applied).
    pub fn from_calls(
        calls: ArrayView2<'_, u8>,
        positions: &[u32],
        pseudotime: &[f64],
    ) -> Result<Self> {
        check_lengths(&calls, positions)?;
        check_pseudotime(&calls, pseudotime)?;

        let mut points = Vec::new();
        for (row, &position) in calls.rows().into_iter().zip(positions) {
            for (&code, &pt) in row.iter().zip(pseudotime) {
                if let Some(value) = CallCode::from_bits(code).value() {
                    points.push((f64::from(position), pt, value));
                }
            }
        }
        Ok(Self::new(points))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    #[must_use]
    pub fn x(&self) -> &[f64] {
        &self.x
    }

    #[must_use]
    pub fn y(&self) -> &[f64] {
        &self.y
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Indices of the observations with `x` inside `[lo, hi]`
    fn window(&self, lo: f64, hi: f64) -> Range<usize> {
        let left = self.x.partition_point(|&x| x < lo);
        let right = self.x.partition_point(|&x| x <= hi);
        left..right.max(left)
    }
}

/// Kernel widths and parallelism of the smoother
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SmootherConfig {
    /// Kernel support along genomic position
    pub xwidth: f64,
    /// Kernel support along pseudotime
    pub ywidth: f64,
    /// Worker threads for grid evaluation (0 = all available CPUs)
    pub num_threads: usize,
}
impl SmootherConfig {
    #[must_use]
    pub fn new(xwidth: f64, ywidth: f64) -> Self {
        Self {
            xwidth,
            ywidth,
            num_threads: 1,
        }
    }

    #[must_use]
    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    fn validate(&self) -> Result<()> {
        for width in [self.xwidth, self.ywidth] {
            if !(width.is_finite() && width > 0.0) {
                return Err(SmoothError::InvalidWidth(width).into());
            }
        }
        Ok(())
    }
}

/// Tricube-weighted local averaging over a position × pseudotime grid
#[derive(Clone, Copy, Debug)]
pub struct KernelSmoother {
    config: SmootherConfig,
}
impl KernelSmoother {
    pub fn new(config: SmootherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> SmootherConfig {
        self.config
    }

    /// Smoothed methylation at one point, `NaN` without local support
    #[must_use]
    pub fn smooth_at(&self, obs: &Observations, x: f64, y: f64) -> f64 {
        let (window, xweights) = self.position_weights(obs, x);
        self.weighted_mean(obs, window, &xweights, y)
    }

    /// Observations within the positional support of `x` and their kernel weights
    fn position_weights(&self, obs: &Observations, x: f64) -> (Range<usize>, Vec<f64>) {
        let half = self.config.xwidth / 2.0;
        let window = obs.window(x - half, x + half);
        let xweights = window
            .clone()
            .map(|i| tricube(obs.x[i] - x, self.config.xwidth))
            .collect();
        (window, xweights)
    }

    fn weighted_mean(
        &self,
        obs: &Observations,
        window: Range<usize>,
        xweights: &[f64],
        y: f64,
    ) -> f64 {
        let mut total = 0.0;
        let mut weighted = 0.0;
        for (i, &wx) in window.zip(xweights) {
            let w = wx * tricube(obs.y[i] - y, self.config.ywidth);
            total += w;
            weighted += w * obs.values[i];
        }
        if total > 0.0 {
            weighted / total
        } else {
            f64::NAN
        }
    }

    /// Fills one output row per target position
    fn smooth_rows(
        &self,
        obs: &Observations,
        xs: &[f64],
        ys: &[f64],
        mut out: ArrayViewMut2<'_, f64>,
    ) {
        for (mut row, &x) in out.rows_mut().into_iter().zip(xs) {
            let (window, xweights) = self.position_weights(obs, x);
            for (cell, &y) in row.iter_mut().zip(ys) {
                *cell = self.weighted_mean(obs, window.clone(), &xweights, y);
            }
        }
    }

    /// Smoothed methylation on the grid `xs × ys`
    ///
    /// The result has one row per target position and one column per target pseudotime.
    #[must_use]
    pub fn smooth_grid(&self, obs: &Observations, xs: &[f64], ys: &[f64]) -> Array2<f64> {
        let mut grid = Array2::<f64>::zeros((xs.len(), ys.len()));
        if xs.is_empty() {
            return grid;
        }

        let num_threads = if self.config.num_threads == 0 {
            num_cpus::get()
        } else {
            self.config.num_threads.min(num_cpus::get())
        }
        .max(1);
        if num_threads == 1 {
            self.smooth_rows(obs, xs, ys, grid.view_mut());
            return grid;
        }

        let rows_per_thread = xs.len().div_ceil(num_threads);
        thread::scope(|scope| {
            for (chunk, t_xs) in grid
                .axis_chunks_iter_mut(Axis(0), rows_per_thread)
                .zip(xs.chunks(rows_per_thread))
            {
                scope.spawn(move || self.smooth_rows(obs, t_xs, ys, chunk));
            }
        });
        grid
    }
}

/// Informative calls split by methylation state, as `[position, pseudotime]` points
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataPoints {
    pub methylated: Vec<[f64; 2]>,
    pub unmethylated: Vec<[f64; 2]>,
}
impl DataPoints {
    pub fn from_calls(
        calls: ArrayView2<'_, u8>,
        positions: &[u32],
        pseudotime: &[f64],
    ) -> Result<Self> {
        check_lengths(&calls, positions)?;
        check_pseudotime(&calls, pseudotime)?;

        let mut points = Self::default();
        for (row, &position) in calls.rows().into_iter().zip(positions) {
            for (&code, &pt) in row.iter().zip(pseudotime) {
                let point = [f64::from(position), pt];
                match CallCode::from_bits(code) {
                    CallCode::Methylated => points.methylated.push(point),
                    CallCode::Unmethylated => points.unmethylated.push(point),
                    CallCode::NoData | CallCode::Ambiguous => {}
                }
            }
        }
        Ok(points)
    }
}

/// Per-position call counts
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Coverage {
    pub positions: Vec<u32>,
    pub methylated: Vec<u32>,
    pub unmethylated: Vec<u32>,
    pub ambiguous: Vec<u32>,
}
impl Coverage {
    pub fn from_calls(calls: ArrayView2<'_, u8>, positions: &[u32]) -> Result<Self> {
        check_lengths(&calls, positions)?;

        let mut coverage = Self {
            positions: positions.to_vec(),
            ..Self::default()
        };
        for row in calls.rows() {
            let mut counts = [0u32; 4];
            for &code in row {
                counts[(code & 0b11) as usize] += 1;
            }
            coverage.unmethylated.push(counts[CallCode::Unmethylated as usize]);
            coverage.methylated.push(counts[CallCode::Methylated as usize]);
            coverage.ambiguous.push(counts[CallCode::Ambiguous as usize]);
        }
        Ok(coverage)
    }

    /// Number of cells with any call at each position
    #[must_use]
    pub fn total(&self) -> Vec<u32> {
        self.methylated
            .iter()
            .zip(&self.unmethylated)
            .zip(&self.ambiguous)
            .map(|((m, u), a)| m + u + a)
            .collect()
    }

    /// Sums the total coverage into bins of `bin_width` bases covering `start..end`
    ///
    /// Positions outside `start..end` are ignored.
    pub fn dense_sum(&self, start: u32, end: u32, bin_width: u32) -> Result<Vec<u64>> {
        if bin_width == 0 {
            return Err(SmoothError::InvalidBinWidth.into());
        }
        let n_bins = end.saturating_sub(start).div_ceil(bin_width) as usize;
        let mut bins = vec![0u64; n_bins];
        for (&position, total) in self.positions.iter().zip(self.total()) {
            if (start..end).contains(&position) {
                bins[((position - start) / bin_width) as usize] += u64::from(total);
            }
        }
        Ok(bins)
    }
}
