use matrix_util::common_io::{create_temp_dir_file, write_lines};
use matrix_util::traits::{IoOps, SampleOps};
use nalgebra::DMatrix;
use rand::rngs::SmallRng;
use rand::SeedableRng;

#[test]
fn dmatrix_io_test() -> anyhow::Result<()> {
    let mut rng = SmallRng::seed_from_u64(1);
    let xx = DMatrix::<f64>::rnorm_with(50, 20, &mut rng);

    let tsv_file = create_temp_dir_file("txt.gz")?;
    xx.to_tsv(tsv_file.to_str().unwrap())?;

    let yy = DMatrix::<f64>::read_file_delim(tsv_file.to_str().unwrap(), "\t", None)?;

    approx::assert_abs_diff_eq!(xx, yy, epsilon = 1e-12);

    Ok(())
}

#[test]
fn named_columns_io_test() -> anyhow::Result<()> {
    let mut rng = SmallRng::seed_from_u64(2);
    let xx = DMatrix::<f64>::rnorm_with(10, 3, &mut rng);
    let names: Vec<Box<str>> = vec!["a".into(), "b".into(), "c".into()];

    let tsv_file = create_temp_dir_file("tsv")?;
    xx.write_named_columns(tsv_file.to_str().unwrap(), "\t", &names)?;

    let out = DMatrix::<f64>::read_named_columns(tsv_file.to_str().unwrap(), "\t")?;
    assert_eq!(out.cols, names);
    approx::assert_abs_diff_eq!(xx, out.mat, epsilon = 1e-12);

    Ok(())
}

#[test]
fn ragged_rows_are_rejected() -> anyhow::Result<()> {
    let tsv_file = create_temp_dir_file("tsv")?;
    write_lines(&["1\t2", "3"], tsv_file.to_str().unwrap())?;
    assert!(DMatrix::<f64>::read_file_delim(tsv_file.to_str().unwrap(), "\t", None).is_err());
    Ok(())
}

#[test]
fn comments_and_blank_lines_are_skipped() -> anyhow::Result<()> {
    let tsv_file = create_temp_dir_file("tsv")?;
    write_lines(
        &["# produced by hand", "x\ty", "1\t2", "", "3\t4"],
        tsv_file.to_str().unwrap(),
    )?;
    let out = DMatrix::<f64>::read_named_columns(tsv_file.to_str().unwrap(), "\t")?;
    assert_eq!(out.mat.nrows(), 2);
    assert_eq!(out.mat[(1, 0)], 3.0);
    Ok(())
}
