use crate::common_io::Delimiter;
use candle_core::Device;
use candle_core::Tensor;
use rand::Rng;

/// Reading off from `Tensor`
pub trait ConvertMatOps {
    type Mat;
    type Scalar;

    fn from_tensor(_: &Tensor) -> anyhow::Result<Self::Mat>;
    fn to_tensor(&self, dev: &Device) -> anyhow::Result<Tensor>;
}

/// Operations to sample random matrices
pub trait SampleOps {
    type Mat;
    type Scalar;

    /// Sample a matrix from `N(0,1)` with a caller-owned generator
    /// so that the draws can be reproduced from a seed
    fn rnorm_with<R: Rng>(dd: usize, nn: usize, rng: &mut R) -> Self::Mat;
}

/// A matrix with named columns, e.g., a header line of a TSV file
pub struct MatWithNames<M> {
    pub cols: Vec<Box<str>>,
    pub mat: M,
}

/// Read and write matrices from and to files
pub trait IoOps {
    type Scalar;
    type Mat;

    fn read_file_delim(
        file: &str,
        delim: impl Into<Delimiter>,
        skip: Option<usize>,
    ) -> anyhow::Result<Self::Mat>;

    fn from_tsv(tsv_file: &str, skip: Option<usize>) -> anyhow::Result<Self::Mat> {
        Self::read_file_delim(tsv_file, "\t", skip)
    }

    /// Read a matrix whose first non-comment line names the columns
    fn read_named_columns(
        file: &str,
        delim: impl Into<Delimiter>,
    ) -> anyhow::Result<MatWithNames<Self::Mat>>;

    fn write_file_delim(&self, file: &str, delim: &str) -> anyhow::Result<()>;

    /// Write a matrix with a header line of column names
    fn write_named_columns(
        &self,
        file: &str,
        delim: &str,
        column_names: &[Box<str>],
    ) -> anyhow::Result<()>;

    fn to_tsv(&self, tsv_file: &str) -> anyhow::Result<()> {
        self.write_file_delim(tsv_file, "\t")
    }
}
