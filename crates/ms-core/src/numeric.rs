use crate::{MsError, MsResult};

/// Floating point type used throughout the workspace.
pub type Real = f64;

/// Absolute/relative tolerance pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tolerances {
    pub abs: Real,
    pub rel: Real,
}

impl Default for Tolerances {
    fn default() -> Self {
        Self {
            abs: 1e-12,
            rel: 1e-9,
        }
    }
}

impl Tolerances {
    pub fn new(abs: Real, rel: Real) -> Self {
        Self { abs, rel }
    }

    /// Error weight for a component of magnitude `value`.
    pub fn weight(&self, value: Real) -> Real {
        self.abs + self.rel * value.abs()
    }
}

pub fn nearly_equal(a: Real, b: Real, tol: Tolerances) -> bool {
    let diff = (a - b).abs();
    if diff <= tol.abs {
        return true;
    }
    diff <= tol.rel * a.abs().max(b.abs())
}

pub fn ensure_finite(v: Real, what: &'static str) -> MsResult<Real> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(MsError::NonFinite { what, value: v })
    }
}

/// Check every entry of a slice is finite.
pub fn ensure_all_finite(values: &[Real], what: &'static str) -> MsResult<()> {
    for &v in values {
        ensure_finite(v, what)?;
    }
    Ok(())
}

/// Weighted root-mean-square norm: `sqrt(mean((v_i / w_i)^2))`.
///
/// Returns 0 for empty input.
pub fn wrms_norm(values: &[Real], weights: &[Real]) -> Real {
    debug_assert_eq!(values.len(), weights.len());
    if values.is_empty() {
        return 0.0;
    }
    let sum: Real = values
        .iter()
        .zip(weights)
        .map(|(v, w)| {
            let s = v / w;
            s * s
        })
        .sum();
    (sum / values.len() as Real).sqrt()
}
