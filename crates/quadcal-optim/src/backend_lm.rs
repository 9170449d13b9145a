use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};
use quadcal_core::Real;

use crate::{NllsProblem, NllsSolverBackend, SolveOptions, SolveReport};

struct LmAdapter<'a, P: NllsProblem> {
    problem: &'a P,
    params: DVector<Real>,
}

impl<P: NllsProblem> LeastSquaresProblem<Real, Dyn, Dyn> for LmAdapter<'_, P> {
    type ResidualStorage = Owned<Real, Dyn>;
    type JacobianStorage = Owned<Real, Dyn, Dyn>;
    type ParameterStorage = Owned<Real, Dyn>;

    fn set_params(&mut self, x: &DVector<Real>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<Real> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<Real>> {
        let r = self.problem.residuals(&self.params);
        r.iter().all(|v| v.is_finite()).then_some(r)
    }

    fn jacobian(&self) -> Option<DMatrix<Real>> {
        let j = self.problem.jacobian(&self.params);
        j.iter().all(|v| v.is_finite()).then_some(j)
    }
}

/// Levenberg-Marquardt (MINPACK port) backend.
#[derive(Debug, Default, Clone)]
pub struct LmBackend;

impl NllsSolverBackend for LmBackend {
    fn solve<P: NllsProblem>(
        &self,
        problem: &P,
        x0: DVector<Real>,
        opts: &SolveOptions,
    ) -> (DVector<Real>, SolveReport) {
        let lm = LevenbergMarquardt::new()
            .with_ftol(opts.ftol)
            .with_xtol(opts.xtol)
            .with_gtol(opts.gtol)
            .with_patience(opts.max_iters.max(1));

        let (adapter, report) = lm.minimize(LmAdapter { problem, params: x0 });
        tracing::debug!(
            evaluations = report.number_of_evaluations,
            cost = report.objective_function,
            termination = ?report.termination,
            "lm finished"
        );

        (
            adapter.params,
            SolveReport {
                iterations: report.number_of_evaluations,
                final_cost: report.objective_function,
                converged: report.termination.was_successful(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Rosenbrock as residuals `[10 (y - x²), 1 - x]`.
    struct Rosenbrock;

    impl NllsProblem for Rosenbrock {
        fn num_params(&self) -> usize {
            2
        }
        fn num_residuals(&self) -> usize {
            2
        }
        fn residuals(&self, x: &DVector<Real>) -> DVector<Real> {
            DVector::from_vec(vec![10.0 * (x[1] - x[0] * x[0]), 1.0 - x[0]])
        }
    }

    #[test]
    fn solves_rosenbrock_with_numeric_jacobian() {
        let (x, report) = LmBackend.solve(
            &Rosenbrock,
            DVector::from_vec(vec![-1.2, 1.0]),
            &SolveOptions::default(),
        );
        assert!((x[0] - 1.0).abs() < 1e-6, "x = {}", x[0]);
        assert!((x[1] - 1.0).abs() < 1e-6, "y = {}", x[1]);
        assert!(report.final_cost < 1e-12);
        assert!(report.iterations > 0);
    }
}
