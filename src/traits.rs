use sparsetools::csc::CSC;
use spsolve::Solver;

/// Sparse linear system solver used for Newton steps, DC power flows
/// and sensitivities.
///
/// `b` holds one or more right-hand sides of length `a_mat.cols()`
/// stacked end to end. The matrix is factorized once per call.
pub trait LinearSolver: Sync {
    fn solve(&self, a_mat: &CSC<usize, f64>, b: &[f64]) -> Result<Vec<f64>, String>;
}

/// Adapts an `spsolve` solver.
pub struct SpSolver<S>(pub S);

impl<S> LinearSolver for SpSolver<S>
where
    S: Solver<usize, f64> + Sync,
{
    fn solve(&self, a_mat: &CSC<usize, f64>, b: &[f64]) -> Result<Vec<f64>, String> {
        let mut x = b.to_vec();
        self.0
            .solve(
                a_mat.cols(),
                a_mat.rowidx(),
                a_mat.colptr(),
                a_mat.values(),
                &mut x,
                false,
            )
            .map_err(|err| err.to_string())?;
        if x.iter().any(|v| !v.is_finite()) {
            return Err("solution is not finite".to_string());
        }
        Ok(x)
    }
}
