use ccspred::data::{
    DEFAULT_COMMON_ADDUCTS,
    N_DESCRIPTORS,
};
use ccspred::features::{
    DescriptorSelection,
    FeatureConfig,
    ZeroVariancePolicy,
};
use ccspred::ml::{
    EnsembleOptions,
    EstimatorParams,
    ParameterGrid,
    Ridge,
    ZeroTargetPolicy,
};
use ccspred::{
    CcsPredError,
    ClusterEnsemble,
    CombinedDataset,
    CompoundRecord,
    FeatureAssembler,
    PipelineConfig,
    ScaledData,
    SplitData,
    StandardScaler,
    StratifyBy,
    TrainedModel,
    evaluate_per_source,
    train_pipeline,
};
use rand::{
    Rng,
    SeedableRng,
};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;

const SOURCES: [&str; 4] = ["zhou1016", "may_0316", "hine1217", "righetti0420"];

fn synthetic_records(n: usize, seed: u64) -> Vec<CompoundRecord> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let mz = rng.gen_range(50.0..1000.0);
            let adduct_idx = i % DEFAULT_COMMON_ADDUCTS.len();
            let descriptors: Vec<f64> = (0..N_DESCRIPTORS)
                .map(|_| rng.gen_range(0.0..20.0))
                .collect();
            let ccs = 100.0
                + 0.18 * mz
                + 4.0 * adduct_idx as f64
                + 0.5 * descriptors[0]
                + rng.gen_range(-1.0..1.0);
            CompoundRecord {
                name: format!("cmpd_{}", i),
                mz,
                adduct: DEFAULT_COMMON_ADDUCTS[adduct_idx].to_string(),
                ccs,
                src_tag: SOURCES[(i / 7) % SOURCES.len()].to_string(),
                descriptors: Some(descriptors),
            }
        })
        .collect()
}

#[test]
fn test_thousand_row_scenario_with_three_clusters() {
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let records: Vec<CompoundRecord> = (0..1000)
        .map(|i| CompoundRecord {
            name: format!("c{}", i),
            mz: rng.gen_range(50.0..=1000.0),
            adduct: DEFAULT_COMMON_ADDUCTS[i % 6].to_string(),
            ccs: rng.gen_range(100.0..=300.0),
            src_tag: "synthetic".to_string(),
            descriptors: Some((0..N_DESCRIPTORS).map(|_| rng.gen_range(0.0..10.0)).collect()),
        })
        .collect();

    let assembler = FeatureAssembler::try_new(&FeatureConfig::default()).unwrap();
    let assembled = assembler.assemble(&records).unwrap();
    assert_eq!(assembled.len(), 1000);

    let scaler = StandardScaler::new(ZeroVariancePolicy::UnitScale)
        .fit(&assembled.x)
        .unwrap();
    let x = scaler.transform(&assembled.x).unwrap();

    let params = vec![EstimatorParams::new(); 3];
    let ensemble = ClusterEnsemble::new(Ridge::default())
        .fit(&x, &assembled.y, 3, &params, 42, &EnsembleOptions::default())
        .unwrap();

    let sizes = ensemble.cluster_sizes().unwrap();
    assert_eq!(sizes.len(), 3);
    assert_eq!(sizes.iter().sum::<usize>(), 1000);

    let preds = ensemble.predict(&x).unwrap();
    assert_eq!(preds.len(), 1000);
    assert!(preds.iter().all(|p| p.is_finite()));
}

#[test]
fn test_source_stratification_keeps_proportions() {
    let records = synthetic_records(600, 3);
    let assembler = FeatureAssembler::try_new(&FeatureConfig::default()).unwrap();
    let assembled = assembler.assemble(&records).unwrap();
    let split = SplitData::from_assembled(&assembled, StratifyBy::Source, 0.2, 7).unwrap();

    let mut all: Vec<usize> = split
        .split
        .train
        .iter()
        .chain(split.split.test.iter())
        .copied()
        .collect();
    all.sort_unstable();
    assert_eq!(all, (0..600).collect::<Vec<_>>());

    let proportions = |rows: &[usize]| {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for &r in rows {
            *counts.entry(assembled.src_tags[r].as_str()).or_default() += 1;
        }
        counts
            .into_iter()
            .map(|(k, v)| (k, v as f64 / rows.len() as f64))
            .collect::<HashMap<_, _>>()
    };
    let train = proportions(&split.split.train);
    let test = proportions(&split.split.test);
    for tag in SOURCES {
        let diff = (train[tag] - test[tag]).abs();
        assert!(diff < 0.05, "{} differs by {}", tag, diff);
    }
}

#[test]
fn test_constant_target_still_splits() {
    let mut records = synthetic_records(50, 4);
    records.iter_mut().for_each(|r| r.ccs = 180.0);
    let assembler = FeatureAssembler::try_new(&FeatureConfig::default()).unwrap();
    let assembled = assembler.assemble(&records).unwrap();

    let split = SplitData::from_assembled(&assembled, StratifyBy::TargetBins, 0.2, 0).unwrap();
    assert_eq!(split.split.test.len(), 10);
    assert_eq!(split.split.train.len(), 40);
    assert_eq!(split.x_train.nrows(), 40);
}

#[test]
fn test_scaled_training_columns_are_standardized() {
    let records = synthetic_records(200, 5);
    let config = FeatureConfig {
        descriptor_selection: DescriptorSelection::Indices(vec![0, 3]),
        ..Default::default()
    };
    let assembler = FeatureAssembler::try_new(&config).unwrap();
    let assembled = assembler.assemble(&records).unwrap();
    let split = SplitData::from_assembled(&assembled, StratifyBy::Source, 0.25, 1).unwrap();
    let scaled = ScaledData::from_split(split, ZeroVariancePolicy::UnitScale).unwrap();

    // No training row carries an adduct outside the allow-list, so the
    // "other" column is constant.
    let degenerate = scaled.scaler.degenerate_columns().unwrap().to_vec();
    assert_eq!(degenerate.len(), 1);

    let n = scaled.x_train.nrows() as f64;
    for j in 0..scaled.x_train.ncols() {
        let col: Vec<f64> = scaled.x_train.column(j).collect();
        let mean = col.iter().sum::<f64>() / n;
        let var = col.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        assert!(mean.abs() < 1e-9, "column {} mean {}", j, mean);
        if degenerate.contains(&j) {
            assert_eq!(var, 0.0);
        } else {
            assert!((var - 1.0).abs() < 1e-9, "column {} variance {}", j, var);
        }
    }
}

#[test]
fn test_train_persist_and_predict() {
    let records = synthetic_records(300, 6);
    let config = PipelineConfig {
        descriptor_selection: DescriptorSelection::Indices(vec![0, 1, 2]),
        cluster_counts: vec![1, 2],
        per_estimator_grid: ParameterGrid::new().with("alpha", [0.1, 1.0]),
        estimator: "ridge".to_string(),
        cv_folds: 3,
        kmeans_n_init: 3,
        ..Default::default()
    };

    let report = train_pipeline(&config, &records, false).unwrap();
    // 2 assignments for k=1, 4 for k=2
    assert_eq!(report.grid_scores.len(), 6);
    assert_eq!(report.n_excluded, 0);
    assert!(report.summary.test.r2 > 0.9, "test r2 {}", report.summary.test.r2);
    assert!(report.summary.test.cumulative_error.within_10 > 90.0);

    let dir = std::env::temp_dir().join(format!("ccspred_model_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("model.json");
    report.model.save_json(&path).unwrap();
    let restored = TrainedModel::load_json(&path).unwrap();
    std::fs::remove_dir_all(&dir).ok();

    let mut inputs = records[..20].to_vec();
    inputs[3].descriptors = None;
    let before = report.model.predict_records(&inputs).unwrap();
    let after = restored.predict_records(&inputs).unwrap();
    assert!(before[3].is_none());
    assert!(after[3].is_none());
    for (a, b) in before.iter().zip(after.iter()) {
        if let (Some(a), Some(b)) = (a, b) {
            assert!((a.value - b.value).abs() < 1e-6);
            assert_eq!(a.cluster, b.cluster);
            assert!((a.centroid_distance - b.centroid_distance).abs() < 1e-9);
            assert!(a.cluster < 2);
        }
    }

    let dataset = CombinedDataset::from_records(records);
    let per_source = evaluate_per_source(&report.model, &dataset, ZeroTargetPolicy::Error).unwrap();
    let tags: Vec<&str> = per_source.iter().map(|s| s.tag.as_str()).collect();
    assert_eq!(tags, SOURCES.to_vec());
    assert!(per_source.iter().all(|s| s.metrics.is_some()));
}

#[test]
fn test_per_source_metrics_use_held_out_rows_only() {
    let mut records = synthetic_records(240, 8);
    records[0].descriptors = None;
    records[5].ccs = f64::NAN;
    records[9].mz = f64::INFINITY;
    let config = PipelineConfig {
        descriptor_selection: DescriptorSelection::Indices(vec![0, 1]),
        cluster_counts: vec![2],
        per_estimator_grid: ParameterGrid::new()
            .with("C", [100.0])
            .with("gamma", [0.1]),
        estimator: "svr".to_string(),
        cv_folds: 3,
        kmeans_n_init: 2,
        ..Default::default()
    };
    let report = train_pipeline(&config, &records, false).unwrap();
    assert_eq!(report.n_excluded, 3);
    assert_eq!(report.n_missing_descriptors, 1);
    assert_eq!(report.n_non_finite, 2);

    // Same assembly and split as inside the pipeline.
    let assembled = report.model.assembler.assemble(&records).unwrap();
    let split = SplitData::from_assembled(
        &assembled,
        config.stratify_by().unwrap(),
        config.test_fraction,
        config.seed,
    )
    .unwrap();
    let mut expected: HashMap<&str, usize> = HashMap::new();
    for &i in split.split.test.iter() {
        *expected.entry(assembled.src_tags[i].as_str()).or_default() += 1;
    }

    assert_eq!(report.test_per_source.len(), expected.len());
    for source in report.test_per_source.iter() {
        assert_eq!(source.n_records, expected[source.tag.as_str()], "{}", source.tag);
        let metrics = source.metrics.as_ref().unwrap();
        assert_eq!(metrics.n_rows, source.n_records);
    }
    let total: usize = report.test_per_source.iter().map(|s| s.n_records).sum();
    assert_eq!(total, report.summary.test.n_rows);
    assert!(total < records.len() / 2);
}

#[test]
fn test_load_rejects_inconsistent_model() {
    let records = synthetic_records(150, 9);
    let config = PipelineConfig {
        descriptor_selection: DescriptorSelection::Omit,
        cluster_counts: vec![2],
        per_estimator_grid: ParameterGrid::new().with("alpha", [1.0]),
        estimator: "ridge".to_string(),
        cv_folds: 3,
        kmeans_n_init: 2,
        ..Default::default()
    };
    let report = train_pipeline(&config, &records, false).unwrap();
    report.model.validate().unwrap();

    let dir = std::env::temp_dir().join(format!("ccspred_tampered_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let original = serde_json::to_value(&report.model).unwrap();

    let mut missing_estimator = original.clone();
    missing_estimator["ensemble"]["state"]["estimators"]
        .as_array_mut()
        .unwrap()
        .pop();
    let mut unsorted = original.clone();
    unsorted["assembler"]["encoder"]["state"]["categories"]
        .as_array_mut()
        .unwrap()
        .reverse();

    for (name, value) in [("estimators", missing_estimator), ("encoder", unsorted)] {
        let path = dir.join(format!("{}.json", name));
        std::fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();
        match TrainedModel::load_json(&path) {
            Err(CcsPredError::InvalidModel { .. }) => {}
            other => panic!("{}: expected InvalidModel, got {:?}", name, other.map(|_| ())),
        }
    }
    std::fs::remove_dir_all(&dir).ok();
}

