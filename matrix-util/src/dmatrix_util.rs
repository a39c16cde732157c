use crate::traits::*;
use candle_core::{DType, Device, Tensor};
pub use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;

impl SampleOps for DMatrix<f64> {
    type Mat = Self;
    type Scalar = f64;

    fn rnorm_with<R: Rng>(dd: usize, nn: usize, rng: &mut R) -> Self::Mat {
        // sequential on purpose: one generator, one stream
        DMatrix::<f64>::from_fn(dd, nn, |_, _| rng.sample(StandardNormal))
    }
}

impl ConvertMatOps for DMatrix<f64> {
    type Mat = Self;
    type Scalar = f64;

    fn from_tensor(tensor: &Tensor) -> anyhow::Result<Self::Mat> {
        let tensor = tensor.to_dtype(DType::F64)?;
        let rows: Vec<Vec<f64>> = match tensor.rank() {
            1 => vec![tensor.to_vec1()?],
            2 => tensor.to_vec2()?,
            r => anyhow::bail!("expected a 1D or 2D tensor, got rank {}", r),
        };

        let nrows = rows.len();
        let ncols = rows.first().map(|x| x.len()).unwrap_or(0);
        Ok(DMatrix::<f64>::from_row_iterator(
            nrows,
            ncols,
            rows.into_iter().flatten(),
        ))
    }

    fn to_tensor(&self, dev: &Device) -> anyhow::Result<Tensor> {
        // nalgebra is column-major; candle is row-major
        let data = self.transpose().as_slice().to_vec();
        Ok(Tensor::from_vec(data, (self.nrows(), self.ncols()), dev)?)
    }
}

impl ConvertMatOps for DVector<f64> {
    type Mat = Self;
    type Scalar = f64;

    fn from_tensor(tensor: &Tensor) -> anyhow::Result<Self::Mat> {
        let data: Vec<f64> = tensor.to_dtype(DType::F64)?.flatten_all()?.to_vec1()?;
        Ok(DVector::<f64>::from_vec(data))
    }

    fn to_tensor(&self, dev: &Device) -> anyhow::Result<Tensor> {
        Ok(Tensor::from_slice(self.as_slice(), self.len(), dev)?)
    }
}
