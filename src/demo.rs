//! Seeded synthetic artifacts for running the application without a trained
//! model on disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use statrs::statistics::Statistics;
use tracing::info;

use crate::config::Number;
use crate::dataset::DatasetSplit;
use crate::features::FEATURE_COUNT;
use crate::model::{Activation, Classifier, DenseLayer, Standardization};

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "Age",
    "Sex",
    "ChestPainType",
    "RestingBP",
    "Cholesterol",
    "FastingBS",
    "RestingECG",
    "MaxHR",
    "ExerciseAngina",
    "Oldpeak",
    "ST_Slope",
    "MajorVessels",
    "Thalassemia",
    "Sex_M",
    "Sex_F",
    "ChestPainType_TA",
    "ChestPainType_ATA",
    "ChestPainType_NAP",
    "ChestPainType_ASY",
    "ExerciseAngina_Y",
];

/// Direction each standardized feature pushes the risk unit.
const RISK_WEIGHTS: [Number; FEATURE_COUNT] = [
    0.6, 0.3, 0.2, 0.3, 0.4, 0.2, 0.1, -0.5, 0.5, 0.6, 0.3, 0.5, 0.4, 0.3, -0.3, 0.0, -0.4, -0.2,
    0.6, 0.5,
];

const HIDDEN_UNITS: usize = 6;

fn normal(mean: f64, std_dev: f64) -> Normal<f64> {
    Normal::new(mean, std_dev).expect("constant distribution parameters are valid")
}

fn patient(rng: &mut StdRng) -> Vec<Number> {
    let age = normal(54.0, 9.0).sample(rng).round().clamp(28.0, 77.0);
    let sex = u8::from(rng.gen_bool(0.79));
    let cp = match rng.gen_range(0..100) {
        0..=4 => 0,
        5..=23 => 1,
        24..=45 => 2,
        _ => 3,
    };
    let trestbps = normal(132.0, 18.0).sample(rng).round().clamp(80.0, 200.0);
    let chol = normal(240.0, 55.0).sample(rng).round().clamp(85.0, 600.0);
    let fbs = u8::from(rng.gen_bool(0.23));
    let restecg = rng.gen_range(0..3);
    let thalach = normal(137.0, 25.0).sample(rng).round().clamp(60.0, 202.0);
    let exang = u8::from(rng.gen_bool(0.4));
    let oldpeak = (normal(0.9, 1.05).sample(rng).abs() * 10.0).round().min(62.0) / 10.0;
    let slope = rng.gen_range(0..3);
    let ca = rng.gen_range(0..4);
    let thal = rng.gen_range(1..4);

    let one_hot = |on: bool| if on { 1.0 } else { 0.0 };
    vec![
        age as Number,
        Number::from(sex),
        cp as Number,
        trestbps as Number,
        chol as Number,
        Number::from(fbs),
        restecg as Number,
        thalach as Number,
        Number::from(exang),
        oldpeak as Number,
        slope as Number,
        ca as Number,
        thal as Number,
        one_hot(sex == 1),
        one_hot(sex == 0),
        one_hot(cp == 0),
        one_hot(cp == 1),
        one_hot(cp == 2),
        one_hot(cp == 3),
        one_hot(exang == 1),
    ]
}

fn standardization(rows: &[Vec<Number>]) -> Standardization {
    let (mean, scale) = (0..FEATURE_COUNT)
        .map(|j| {
            let column: Vec<f64> = rows.iter().map(|r| f64::from(r[j])).collect();
            let mean = column.iter().mean();
            let std_dev = column.iter().std_dev();
            let scale = if std_dev.is_finite() && std_dev > 1e-9 {
                std_dev
            } else {
                1.0
            };
            let mean = if mean.is_finite() { mean } else { 0.0 };
            (mean as Number, scale as Number)
        })
        .unzip();
    Standardization { mean, scale }
}

/// Builds a synthetic dataset split and a small network fitted to its scale.
pub fn generate(seed: u64, train_rows: usize, test_rows: usize) -> (Classifier, DatasetSplit) {
    let mut rng = StdRng::seed_from_u64(seed);
    let x_train: Vec<Vec<Number>> = (0..train_rows).map(|_| patient(&mut rng)).collect();
    let x_test: Vec<Vec<Number>> = (0..test_rows).map(|_| patient(&mut rng)).collect();

    let noise = normal(0.0, 0.3);
    let hidden: Vec<Vec<Number>> = (0..HIDDEN_UNITS)
        .map(|unit| {
            if unit == 0 {
                RISK_WEIGHTS.to_vec()
            } else {
                (0..FEATURE_COUNT)
                    .map(|_| noise.sample(&mut rng) as Number)
                    .collect()
            }
        })
        .collect();
    let mut output = vec![2.5];
    output.extend((1..HIDDEN_UNITS).map(|_| noise.sample(&mut rng) as Number));

    let classifier = Classifier {
        standardization: Some(standardization(&x_train)),
        layers: vec![
            DenseLayer {
                weights: hidden,
                bias: vec![0.0; HIDDEN_UNITS],
                activation: Activation::Tanh,
            },
            DenseLayer {
                weights: vec![output],
                bias: vec![-0.2],
                activation: Activation::Sigmoid,
            },
        ],
    };

    let split = DatasetSplit {
        feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        x_train,
        x_test,
    };
    (classifier, split)
}

/// Writes `model.json` and `dataset.bin` into `dir`.
pub fn write_artifacts(dir: &Path, seed: u64) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create artifact directory '{}'", dir.display()))?;
    let (classifier, split) = generate(seed, 734, 184);

    let model_path = dir.join("model.json");
    let data_path = dir.join("dataset.bin");
    classifier
        .save(&model_path)
        .context("Failed to write demo model")?;
    split.save(&data_path).context("Failed to write demo dataset")?;

    info!(
        model = %model_path.display(),
        dataset = %data_path.display(),
        seed,
        "Wrote demo artifacts"
    );
    Ok((model_path, data_path))
}
