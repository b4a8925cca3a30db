//! OCP configuration and node-0 state bounds.

use crate::error::{SolveError, SolveResult};
use ms_sim::IntegratorConfig;

/// Configuration of the shooting transcription and its solve.
#[derive(Clone, Debug)]
pub struct OcpConfig {
    pub start_time: f64,
    pub final_time: f64,
    /// Number of shooting intervals N
    pub node_count: usize,
    pub kkt_tolerance: f64,
    pub max_iterations: usize,
    /// Step budget of each interval integration
    pub max_integrator_steps: usize,
    /// Fill the initial guess by forward simulation instead of copying node 0
    pub auto_init: bool,
    pub integrator: IntegratorConfig,
}

impl Default for OcpConfig {
    fn default() -> Self {
        Self {
            start_time: 0.0,
            final_time: 1.0,
            node_count: 20,
            kkt_tolerance: 1e-6,
            max_iterations: 200,
            max_integrator_steps: 10_000,
            auto_init: true,
            integrator: IntegratorConfig::with_tolerance(1e-8),
        }
    }
}

impl OcpConfig {
    pub fn validate(&self) -> SolveResult<()> {
        if !self.start_time.is_finite() || !self.final_time.is_finite() {
            return Err(SolveError::ProblemSetup {
                what: "Horizon bounds must be finite".to_string(),
            });
        }
        if self.final_time <= self.start_time {
            return Err(SolveError::ProblemSetup {
                what: format!(
                    "final_time {} must be after start_time {}",
                    self.final_time, self.start_time
                ),
            });
        }
        if self.node_count == 0 {
            return Err(SolveError::ProblemSetup {
                what: "node_count must be at least 1".to_string(),
            });
        }
        if !(self.kkt_tolerance > 0.0) {
            return Err(SolveError::ProblemSetup {
                what: format!("kkt_tolerance must be positive, got {}", self.kkt_tolerance),
            });
        }
        if self.max_iterations == 0 || self.max_integrator_steps == 0 {
            return Err(SolveError::ProblemSetup {
                what: "Iteration and step limits must be positive".to_string(),
            });
        }
        self.integrator_config().validate()?;
        Ok(())
    }

    /// Integrator settings with the configured step budget applied.
    pub fn integrator_config(&self) -> IntegratorConfig {
        IntegratorConfig {
            max_steps: self.max_integrator_steps,
            ..self.integrator.clone()
        }
    }

    /// Equally spaced node times `t_0..=t_N`.
    pub fn time_grid(&self) -> Vec<f64> {
        let n = self.node_count;
        let h = (self.final_time - self.start_time) / n as f64;
        (0..=n)
            .map(|i| {
                if i == n {
                    self.final_time
                } else {
                    self.start_time + i as f64 * h
                }
            })
            .collect()
    }
}

/// Bounds on the node-0 state `[x; z]`. Unbounded entries are infinite.
#[derive(Clone, Debug, PartialEq)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Self {
        Self { lower, upper }
    }

    pub fn unbounded(len: usize) -> Self {
        Self {
            lower: vec![f64::NEG_INFINITY; len],
            upper: vec![f64::INFINITY; len],
        }
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// Check lengths against the node state size and `lower <= upper`.
    pub fn validate(&self, ns: usize) -> SolveResult<()> {
        if self.lower.len() != ns || self.upper.len() != ns {
            return Err(SolveError::ProblemSetup {
                what: format!(
                    "Bounds have lengths {}/{}, expected {ns}",
                    self.lower.len(),
                    self.upper.len()
                ),
            });
        }
        for (j, (&lo, &up)) in self.lower.iter().zip(&self.upper).enumerate() {
            if lo.is_nan() || up.is_nan() {
                return Err(SolveError::ProblemSetup {
                    what: format!("Bound {j} is NaN"),
                });
            }
            if lo > up {
                return Err(SolveError::Infeasible {
                    what: format!("Bound {j}: lower {lo} > upper {up}"),
                });
            }
        }
        Ok(())
    }

    /// Starting value for component `j`: midpoint, the finite side, or zero.
    pub fn guess(&self, j: usize) -> f64 {
        let (lo, up) = (self.lower[j], self.upper[j]);
        match (lo.is_finite(), up.is_finite()) {
            (true, true) => 0.5 * (lo + up),
            (true, false) => lo,
            (false, true) => up,
            (false, false) => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(OcpConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_empty_horizon() {
        let config = OcpConfig {
            final_time: 0.0,
            ..OcpConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SolveError::ProblemSetup { .. })
        ));

        let config = OcpConfig {
            node_count: 0,
            ..OcpConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn time_grid_ends_exactly() {
        let config = OcpConfig {
            final_time: 5.0,
            node_count: 20,
            ..OcpConfig::default()
        };
        let grid = config.time_grid();
        assert_eq!(grid.len(), 21);
        assert_eq!(grid[0], 0.0);
        assert_eq!(grid[20], 5.0);
        assert!((grid[1] - 0.25).abs() < 1e-15);
    }

    #[test]
    fn step_budget_reaches_integrator() {
        let config = OcpConfig {
            max_integrator_steps: 42,
            ..OcpConfig::default()
        };
        assert_eq!(config.integrator_config().max_steps, 42);
    }

    #[test]
    fn bound_checks() {
        let bounds = Bounds::new(vec![1.0, 0.0], vec![1.0, -1.0]);
        assert!(matches!(bounds.validate(2), Err(SolveError::Infeasible { .. })));
        assert!(matches!(
            Bounds::unbounded(2).validate(3),
            Err(SolveError::ProblemSetup { .. })
        ));
    }

    #[test]
    fn guesses_follow_bounds() {
        let bounds = Bounds::new(
            vec![1.0, 2.0, f64::NEG_INFINITY, f64::NEG_INFINITY],
            vec![3.0, f64::INFINITY, -1.0, f64::INFINITY],
        );
        let guesses: Vec<f64> = (0..4).map(|j| bounds.guess(j)).collect();
        assert_eq!(guesses, vec![2.0, 2.0, -1.0, 0.0]);
    }
}
