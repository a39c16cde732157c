use std::collections::{BTreeMap, BTreeSet};

use candle_util::candle_core::{Device, Tensor};
use lentil::config::{EnsembleConfig, FamilyKind, McmcConfig, VariationalConfig};
use lentil::ensemble::{predict_posterior, EnsembleModel, PosteriorDraws};
use lentil::mcmc::fit_mcmc;
use lentil::tailfree::{Binding, FamilyTree, LatentKey, ROOT_NAME};
use lentil::variational::fit_variational;
use lentil::{EnsembleError, Result};
use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use rand::SeedableRng;

fn scalar(v: f64, dev: &Device) -> Result<Binding> {
    Ok(Binding::Value(Tensor::new(&[v], dev)?))
}

fn function(v: &[f64], dev: &Device) -> Result<Binding> {
    Ok(Binding::Value(Tensor::from_slice(v, (1, v.len()), dev)?))
}

fn row(t: &Tensor) -> Result<Vec<f64>> {
    Ok(t.flatten_all()?.to_vec1::<f64>()?)
}

#[test]
fn tree_nodes_are_the_root_and_the_nonroot_nodes() -> Result<()> {
    let json = r#"{"root": ["g1", "g2", "d"], "g1": ["a", "b"], "g2": ["c", "g3"], "g3": ["e", "f"]}"#;
    let tree = FamilyTree::from_json_str(json)?;

    let mut expected = BTreeSet::new();
    for (parent, children) in tree.to_parent_map() {
        expected.insert(parent);
        expected.extend(children);
    }

    let mut found: BTreeSet<String> = tree
        .nonroot_node_names()
        .into_iter()
        .map(String::from)
        .collect();
    found.insert(ROOT_NAME.to_string());

    assert_eq!(found, expected);
    assert_eq!(tree.leaf_names(), vec!["a", "b", "c", "e", "f", "d"]);
    Ok(())
}

#[test]
fn two_models_at_one_point() -> Result<()> {
    let x = DMatrix::from_element(1, 1, 0.0);
    let y = DVector::from_element(1, 15.0);
    let base = BTreeMap::from([
        ("a".to_string(), vec![10.0]),
        ("b".to_string(), vec![20.0]),
    ]);
    let tree = FamilyTree::from_json_str(r#"{"root": ["a", "b"]}"#)?;
    let model = EnsembleModel::new(x, y, base, tree, EnsembleConfig::default())?;

    let dev = model.device().clone();
    let tree = model.tree();
    let (root, a, b) = (tree.root(), tree.id("a").unwrap(), tree.id("b").unwrap());

    let bindings = BTreeMap::from([
        (LatentKey::NodeWeight(a), function(&[0.0], &dev)?),
        (LatentKey::NodeWeight(b), function(&[1.0], &dev)?),
        (LatentKey::Temperature(root), scalar(0.0, &dev)?),
        (LatentKey::Residual, function(&[0.0], &dev)?),
        (LatentKey::Sigma, scalar(-5.0, &dev)?),
    ]);
    let mut rng = SmallRng::seed_from_u64(1);
    let values = model.bind(&bindings, 1, &mut rng)?;
    let out = model.forward(&values)?;

    let w = row(&out.cond_weights[&root])?;
    assert!(w[1] > w[0], "{:?}", w);
    approx::assert_abs_diff_eq!(w[0] + w[1], 1.0, epsilon = 1e-10);

    let mean = row(&out.observation.mean)?[0];
    assert!(mean > 15.0 && mean < 20.0, "mean {}", mean);
    Ok(())
}

#[test]
fn leaf_weight_is_the_product_along_its_path() -> Result<()> {
    let n = 3;
    let x = DMatrix::from_fn(n, 1, |i, _| i as f64);
    let y = DVector::zeros(n);
    let base = BTreeMap::from([
        ("m1".to_string(), vec![1.0; n]),
        ("m2".to_string(), vec![-1.0; n]),
    ]);
    let tree = FamilyTree::from_json_str(r#"{"root": ["g1"], "g1": ["m1", "m2"]}"#)?;
    let model = EnsembleModel::new(x, y, base, tree, EnsembleConfig::default())?;

    let dev = model.device().clone();
    let tree = model.tree();
    let g1 = tree.id("g1").unwrap();
    let m1 = tree.id("m1").unwrap();
    let m2 = tree.id("m2").unwrap();

    let bindings = BTreeMap::from([
        (LatentKey::NodeWeight(g1), function(&[-3.0, 0.0, 3.0], &dev)?),
        (LatentKey::NodeWeight(m1), function(&[0.5, 0.0, -0.2], &dev)?),
        (LatentKey::NodeWeight(m2), function(&[0.0, 0.4, 0.1], &dev)?),
    ]);
    let mut rng = SmallRng::seed_from_u64(2);
    let values = model.bind(&bindings, 1, &mut rng)?;
    let out = model.forward(&values)?;

    // a single child takes all of its parent's mass
    let root_w = row(&out.cond_weights[&tree.root()])?;
    assert!(root_w.iter().all(|&w| (w - 1.0).abs() < 1e-12));

    // (1, N, 2) with children in m1, m2 order
    let g1_w = out.cond_weights[&g1].flatten_all()?.to_vec1::<f64>()?;
    let leaf_w = out.leaf_weights.flatten_all()?.to_vec1::<f64>()?;
    for i in 0..n {
        approx::assert_abs_diff_eq!(leaf_w[2 * i], g1_w[2 * i], epsilon = 1e-12);
        approx::assert_abs_diff_eq!(leaf_w[2 * i] + leaf_w[2 * i + 1], 1.0, epsilon = 1e-10);
    }
    Ok(())
}

#[test]
fn mismatched_base_model_is_named() {
    let x = DMatrix::from_fn(4, 1, |i, _| i as f64);
    let y = DVector::zeros(4);
    let base = BTreeMap::from([
        ("good".to_string(), vec![0.0; 4]),
        ("short".to_string(), vec![0.0; 3]),
    ]);
    let tree = FamilyTree::flat(&["good", "short"]).unwrap();
    match EnsembleModel::new(x, y, base, tree, EnsembleConfig::default()) {
        Err(EnsembleError::Config(msg)) => assert!(msg.contains("short"), "{}", msg),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("short predictions were accepted"),
    }
}

#[test]
fn leaves_must_match_the_base_models() {
    let x = DMatrix::from_fn(4, 1, |i, _| i as f64);
    let y = DVector::zeros(4);
    let base = BTreeMap::from([("a".to_string(), vec![0.0; 4]), ("b".to_string(), vec![0.0; 4])]);
    let tree = FamilyTree::from_json_str(r#"{"root": ["a", "c"]}"#).unwrap();
    let res = EnsembleModel::new(x, y, base, tree, EnsembleConfig::default());
    assert!(matches!(res, Err(EnsembleError::Config(_))));
}

/// Two models, one right on the left half and one on the right half
fn switching_model() -> Result<EnsembleModel> {
    let n = 20;
    let x = DMatrix::from_fn(n, 1, |i, _| i as f64 / (n - 1) as f64);
    let truth: Vec<f64> = (0..n).map(|i| if i < n / 2 { 1.0 } else { -1.0 }).collect();
    let y = DVector::from_vec(truth.clone());
    let base = BTreeMap::from([
        ("left".to_string(), vec![1.0; n]),
        ("right".to_string(), vec![-1.0; n]),
    ]);
    let tree = FamilyTree::flat(&["left", "right"])?;
    let config = EnsembleConfig {
        lengthscale_weight: 0.2,
        sigma_loc: -2.0,
        ..Default::default()
    };
    EnsembleModel::new(x, y, base, tree, config)
}

#[test]
fn variational_fit_predicts_at_new_points() -> Result<()> {
    let model = switching_model()?;
    for family in [FamilyKind::MeanField, FamilyKind::Sparse] {
        let config = VariationalConfig {
            family,
            n_iters: 300,
            learning_rate: 0.05,
            n_mc_samples: 5,
            n_inducing: 8,
            log_every: 100,
            ..Default::default()
        };
        let fit = fit_variational(&model, &config)?;
        assert_eq!(fit.loss_trace.len(), 300);
        assert!(fit.loss_trace.iter().all(|l| l.is_finite()));

        let mut rng = SmallRng::seed_from_u64(3);
        let draws = fit.params.sample(50, &mut rng);
        let x_new = DMatrix::from_column_slice(3, 1, &[0.05, 0.5, 0.95]);
        let base_new = BTreeMap::from([
            ("left".to_string(), vec![1.0; 3]),
            ("right".to_string(), vec![-1.0; 3]),
        ]);
        let pred = predict_posterior(&model, &x_new, &base_new, &draws, &mut rng)?;
        assert_eq!(pred.predictive.shape(), (50, 3));
        assert_eq!(pred.mean.shape(), (50, 3));

        let w = pred.mean_leaf_weights()?;
        assert_eq!(w.shape(), (3, 2));
        for i in 0..3 {
            approx::assert_abs_diff_eq!(w[(i, 0)] + w[(i, 1)], 1.0, epsilon = 1e-8);
        }
        // the left model should dominate near x = 0 and fade toward x = 1
        assert!(w[(0, 0)] > w[(2, 0)], "{:?} ({:?})", w, family);
    }
    Ok(())
}

#[test]
fn saved_mcmc_draws_give_the_same_predictions() -> Result<()> {
    let model = switching_model()?;
    let config = McmcConfig {
        n_samples: 20,
        warmup: 20,
        seed: 7,
        ..Default::default()
    };
    let fit = fit_mcmc(&model, &config)?;
    assert_eq!(fit.draws.n_samples(), 20);
    assert!(fit.log_likelihoods.iter().all(|l| l.is_finite()));

    let dir = tempfile::tempdir()?;
    let prefix = dir.path().join("fit");
    let prefix = prefix.to_string_lossy();
    fit.draws.write(model.tree(), &prefix)?;
    let reread = PosteriorDraws::read(model.tree(), &prefix)?;

    let x_new = DMatrix::from_column_slice(2, 1, &[0.25, 0.75]);
    let base_new = BTreeMap::from([
        ("left".to_string(), vec![1.0; 2]),
        ("right".to_string(), vec![-1.0; 2]),
    ]);
    let pred = predict_posterior(
        &model,
        &x_new,
        &base_new,
        &fit.draws,
        &mut SmallRng::seed_from_u64(9),
    )?;
    let pred_reread = predict_posterior(
        &model,
        &x_new,
        &base_new,
        &reread,
        &mut SmallRng::seed_from_u64(9),
    )?;

    for (a, b) in pred.mean.iter().zip(pred_reread.mean.iter()) {
        approx::assert_abs_diff_eq!(*a, *b, epsilon = 1e-6);
    }
    Ok(())
}
