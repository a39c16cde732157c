use nalgebra::{DMatrix, DVector};

/// A covariance function between two sets of points
pub trait Kernel {
    /// Cross-covariance of the rows of `x1` (N1, D) and `x2` (N2, D)
    fn covariance(&self, x1: &DMatrix<f64>, x2: &DMatrix<f64>) -> DMatrix<f64>;

    /// Covariance of a set of points with itself
    fn gram(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        let k = self.covariance(x, x);
        // exact symmetry keeps the Cholesky factorization happy
        (&k + k.transpose()) * 0.5
    }

    /// Prior variances k(x_i, x_i) without the full gram matrix
    fn diagonal(&self, x: &DMatrix<f64>) -> DVector<f64> {
        DVector::from_fn(x.nrows(), |i, _| {
            let xi = x.rows(i, 1).into_owned();
            self.covariance(&xi, &xi)[(0, 0)]
        })
    }
}

/// Squared exponential kernel
///
/// k(x, x') = v exp(-|x - x'|² / (2 l²))
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rbf {
    pub lengthscale: f64,
    pub variance: f64,
}

impl Rbf {
    pub fn new(lengthscale: f64) -> Self {
        Self {
            lengthscale,
            variance: 1.0,
        }
    }
}

fn squared_distance(x1: &DMatrix<f64>, x2: &DMatrix<f64>, i: usize, j: usize) -> f64 {
    x1.row(i)
        .iter()
        .zip(x2.row(j).iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum()
}

impl Kernel for Rbf {
    fn covariance(&self, x1: &DMatrix<f64>, x2: &DMatrix<f64>) -> DMatrix<f64> {
        let denom = 2.0 * self.lengthscale * self.lengthscale;
        DMatrix::from_fn(x1.nrows(), x2.nrows(), |i, j| {
            self.variance * (-squared_distance(x1, x2, i, j) / denom).exp()
        })
    }

    fn diagonal(&self, x: &DMatrix<f64>) -> DVector<f64> {
        DVector::from_element(x.nrows(), self.variance)
    }
}

/// cov(f(x1), f'(x2)) of a one-dimensional RBF process
///
/// ∂k(x1, x2)/∂x2 = k(x1, x2) (x1 - x2) / l²
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RbfGrad1d(pub Rbf);

impl Kernel for RbfGrad1d {
    fn covariance(&self, x1: &DMatrix<f64>, x2: &DMatrix<f64>) -> DMatrix<f64> {
        let ls2 = self.0.lengthscale * self.0.lengthscale;
        let k = self.0.covariance(x1, x2);
        DMatrix::from_fn(x1.nrows(), x2.nrows(), |i, j| {
            k[(i, j)] * (x1[(i, 0)] - x2[(j, 0)]) / ls2
        })
    }

    /// not symmetric; a gram matrix of this kernel is a cross-covariance
    fn gram(&self, x: &DMatrix<f64>) -> DMatrix<f64> {
        self.covariance(x, x)
    }
}

/// cov(f'(x1), f'(x2)) of a one-dimensional RBF process
///
/// ∂²k(x1, x2)/∂x1∂x2 = k(x1, x2) (1/l² - (x1 - x2)²/l⁴)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RbfHess1d(pub Rbf);

impl Kernel for RbfHess1d {
    fn covariance(&self, x1: &DMatrix<f64>, x2: &DMatrix<f64>) -> DMatrix<f64> {
        let ls2 = self.0.lengthscale * self.0.lengthscale;
        let k = self.0.covariance(x1, x2);
        DMatrix::from_fn(x1.nrows(), x2.nrows(), |i, j| {
            let d = x1[(i, 0)] - x2[(j, 0)];
            k[(i, j)] * (1.0 / ls2 - d * d / (ls2 * ls2))
        })
    }
}

/// K + ridge I
pub fn add_ridge(k: &DMatrix<f64>, ridge: f64) -> DMatrix<f64> {
    let mut ret = k.clone();
    for i in 0..k.nrows().min(k.ncols()) {
        ret[(i, i)] += ridge;
    }
    ret
}
