use crate::common_io::{read_lines_of_types, write_lines, Delimiter};
use crate::traits::*;
pub use nalgebra::{DMatrix, DVector};

use std::fmt::{Debug, Display};
use std::str::FromStr;

fn rows_to_dmatrix<T>(data: Vec<Vec<T>>, file: &str) -> anyhow::Result<DMatrix<T>>
where
    T: nalgebra::Scalar,
{
    if data.is_empty() {
        return Err(anyhow::anyhow!("No data in file {}", file));
    }

    let ncols = data[0].len();
    let nrows = data.len();

    if let Some((i, _)) = data.iter().enumerate().find(|(_, x)| x.len() != ncols) {
        return Err(anyhow::anyhow!(
            "{}: row {} has a different number of fields (expected {})",
            file,
            i,
            ncols
        ));
    }

    let data = data.into_iter().flatten().collect::<Vec<_>>();
    Ok(DMatrix::<T>::from_row_iterator(nrows, ncols, data))
}

fn format_rows<T>(mat: &DMatrix<T>, delim: &str) -> Vec<Box<str>>
where
    T: nalgebra::Scalar + Display,
{
    // par_iter() or par_bridge() will
    // mess up the order of the rows
    mat.row_iter()
        .map(|row| {
            row.iter()
                .map(|x| format!("{}", *x))
                .collect::<Vec<String>>()
                .join(delim)
                .into_boxed_str()
        })
        .collect()
}

impl<T> IoOps for DMatrix<T>
where
    T: nalgebra::Scalar + Send + FromStr + Display + Copy,
    <T as FromStr>::Err: Debug,
{
    type Scalar = T;
    type Mat = Self;

    fn read_file_delim(
        tsv_file: &str,
        delim: impl Into<Delimiter>,
        skip: Option<usize>,
    ) -> anyhow::Result<Self::Mat> {
        let hdr_line = match skip {
            Some(skip) => skip as i64,
            None => -1, // no skipping
        };

        let data = read_lines_of_types::<T>(tsv_file, delim, hdr_line)?.lines;
        rows_to_dmatrix(data, tsv_file)
    }

    fn read_named_columns(
        file: &str,
        delim: impl Into<Delimiter>,
    ) -> anyhow::Result<MatWithNames<Self::Mat>> {
        let out = read_lines_of_types::<T>(file, delim, 0)?;
        let mat = rows_to_dmatrix(out.lines, file)?;

        if out.header.len() != mat.ncols() {
            return Err(anyhow::anyhow!(
                "{}: {} column names for {} columns",
                file,
                out.header.len(),
                mat.ncols()
            ));
        }

        Ok(MatWithNames {
            cols: out.header,
            mat,
        })
    }

    fn write_file_delim(&self, tsv_file: &str, delim: &str) -> anyhow::Result<()> {
        write_lines(&format_rows(self, delim), tsv_file)
    }

    fn write_named_columns(
        &self,
        file: &str,
        delim: &str,
        column_names: &[Box<str>],
    ) -> anyhow::Result<()> {
        if column_names.len() != self.ncols() {
            return Err(anyhow::anyhow!(
                "{} column names for {} columns",
                column_names.len(),
                self.ncols()
            ));
        }

        let mut lines = Vec::with_capacity(self.nrows() + 1);
        lines.push(column_names.join(delim).into_boxed_str());
        lines.extend(format_rows(self, delim));
        write_lines(&lines, file)
    }
}
