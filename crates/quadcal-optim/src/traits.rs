use nalgebra::{DMatrix, DVector};
use quadcal_core::Real;

/// Dense non-linear least-squares problem.
pub trait NllsProblem {
    fn num_params(&self) -> usize;
    fn num_residuals(&self) -> usize;

    fn residuals(&self, x: &DVector<Real>) -> DVector<Real>;

    /// Jacobian of [`Self::residuals`]; central differences by default.
    fn jacobian(&self, x: &DVector<Real>) -> DMatrix<Real> {
        central_difference_jacobian(x, self.num_residuals(), |p| self.residuals(p))
    }
}

/// Relative step used by [`central_difference_jacobian`].
pub const FD_REL_STEP: Real = 1e-6;

/// Numerical Jacobian of `f` at `x` by central differences.
///
/// The step for parameter `i` is `FD_REL_STEP * max(1, |x_i|)`.
pub fn central_difference_jacobian<F>(x: &DVector<Real>, rows: usize, f: F) -> DMatrix<Real>
where
    F: Fn(&DVector<Real>) -> DVector<Real>,
{
    let mut jac = DMatrix::zeros(rows, x.len());
    let mut shifted = x.clone();
    for i in 0..x.len() {
        let h = FD_REL_STEP * x[i].abs().max(1.0);
        shifted[i] = x[i] + h;
        let r_plus = f(&shifted);
        shifted[i] = x[i] - h;
        let r_minus = f(&shifted);
        shifted[i] = x[i];
        jac.set_column(i, &((r_plus - r_minus) / (2.0 * h)));
    }
    jac
}

#[derive(Debug, Clone, Copy)]
pub struct SolveOptions {
    /// Iteration cap; the LM backend turns this into `max_iters * (n + 1)`
    /// residual evaluations, following MINPACK.
    pub max_iters: usize,
    pub ftol: Real,
    pub gtol: Real,
    pub xtol: Real,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            max_iters: 200,
            ftol: 1e-10,
            gtol: 1e-10,
            xtol: 1e-10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SolveReport {
    pub iterations: usize,
    pub final_cost: Real,
    pub converged: bool,
}

pub trait NllsSolverBackend {
    fn solve<P: NllsProblem>(
        &self,
        problem: &P,
        x0: DVector<Real>,
        opts: &SolveOptions,
    ) -> (DVector<Real>, SolveReport);
}
