//! One-shot explainability pass run before the server accepts requests.

use std::time::Instant;

use tracing::info;

use crate::charts::{
    bar_plot, dependence_plot, force_plot, summary_plot, waterfall_plot, Chart, ChartArtifact,
    ChartKind,
};
use crate::config::Settings;
use crate::dataset::DatasetSplit;
use crate::error::{ChartError, ExplainError};
use crate::explain::Explainer;
use crate::model::Classifier;

#[derive(Debug, Clone)]
pub struct PrecomputeOptions {
    pub background_size: usize,
    pub seed: u64,
    pub attribution_passes: usize,
    pub dependence_feature: String,
}

impl From<&Settings> for PrecomputeOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            background_size: settings.background_size,
            seed: settings.seed,
            attribution_passes: settings.attribution_passes,
            dependence_feature: settings.dependence_feature.clone(),
        }
    }
}

/// Computes attributions over the evaluation set and renders every chart in
/// `ChartKind::ALL` order. Any failure aborts the whole pass.
pub fn precompute_charts(
    model: &Classifier,
    data: &DatasetSplit,
    options: &PrecomputeOptions,
) -> Result<Vec<Chart>, ChartError> {
    let dependence = data
        .feature_index(&options.dependence_feature)
        .ok_or_else(|| ExplainError::UnknownFeature(options.dependence_feature.clone()))?;
    let first_row = data.x_test.first().ok_or(ExplainError::EmptyEvaluation)?;

    let started = Instant::now();
    let background = data.sample_background(options.background_size, options.seed);
    let explainer = Explainer::new(
        model,
        background,
        options.attribution_passes,
        options.seed,
    )?;
    let class1 = explainer.explain(&data.x_test)?;
    let class0 = class1.complement();
    info!(
        rows = data.x_test.len(),
        base_value = class1.base_value,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Attribution values ready"
    );

    let first = class1.row(0).ok_or(ExplainError::EmptyEvaluation)?;
    let names = &data.feature_names;
    let mut charts = Vec::with_capacity(ChartKind::ALL.len());
    for kind in ChartKind::ALL {
        let caption = match kind {
            ChartKind::Dependence => format!("{} ({})", kind.label(), options.dependence_feature),
            _ => kind.label().to_string(),
        };
        let artifact: ChartArtifact = match kind {
            ChartKind::SummaryClass0 => summary_plot(&caption, &class0, &data.x_test, names)?,
            ChartKind::SummaryClass1 => summary_plot(&caption, &class1, &data.x_test, names)?,
            ChartKind::Dependence => dependence_plot(
                &caption,
                &class1,
                &data.x_test,
                dependence,
                &options.dependence_feature,
            )?,
            ChartKind::Bar => bar_plot(&caption, &class1, names)?,
            ChartKind::Waterfall => waterfall_plot(&caption, class1.base_value, first, names)?,
            ChartKind::Force => force_plot(class1.base_value, first, first_row, names),
        };
        charts.push(Chart {
            kind,
            caption,
            artifact,
        });
    }

    info!(
        charts = charts.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Explainability charts precomputed"
    );
    Ok(charts)
}
