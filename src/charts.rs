//! Explainability chart artifacts.
//!
//! Raster charts are drawn with plotters into an RGB buffer and stored as PNG.
//! The force plot is emitted as a self-contained HTML fragment instead.

use std::fmt::Write as _;
use std::io::Cursor;
use std::sync::OnceLock;

use base64::Engine as _;
use plotters::coord::Shift;
use plotters::prelude::*;

use crate::config::Number;
use crate::error::ChartError;
use crate::explain::Attributions;
use crate::vector_ops::{column_bounds, mean_abs_by_column, normalize_in_range};

pub const CHART_WIDTH: u32 = 800;
pub const CHART_HEIGHT: u32 = 600;

/// Family name the bundled font is registered under.
pub const FONT_FAMILY: &str = "sans-serif";
static FONT_BYTES: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");
const TITLE_SIZE: i32 = 22;
const LABEL_SIZE: i32 = 13;
/// Left label area wide enough for the longest feature name.
const NAME_AREA: u32 = 150;

const LOW_COLOR: (u8, u8, u8) = (30, 136, 229);
const HIGH_COLOR: (u8, u8, u8) = (255, 0, 82);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartKind {
    SummaryClass0,
    SummaryClass1,
    Dependence,
    Bar,
    Waterfall,
    Force,
}

impl ChartKind {
    /// Fixed precomputation order.
    pub const ALL: [ChartKind; 6] = [
        ChartKind::SummaryClass0,
        ChartKind::SummaryClass1,
        ChartKind::Dependence,
        ChartKind::Bar,
        ChartKind::Waterfall,
        ChartKind::Force,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::SummaryClass0 => "SHAP Summary Plot (Class 0: No Heart Disease)",
            Self::SummaryClass1 => "SHAP Summary Plot (Class 1: Heart Disease)",
            Self::Dependence => "SHAP Dependence Plot",
            Self::Bar => "SHAP Bar Plot (Mean Feature Importance)",
            Self::Waterfall => "SHAP Waterfall Plot (First Test Sample)",
            Self::Force => "SHAP Force Plot (First Test Sample)",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChartArtifact {
    Raster { png: Vec<u8>, width: u32, height: u32 },
    Markup(String),
}

impl ChartArtifact {
    /// HTML to embed in a page.
    pub fn to_html(&self, alt: &str) -> String {
        match self {
            Self::Raster { png, width, height } => format!(
                r#"<img src="data:image/png;base64,{}" width="{width}" height="{height}" alt="{}">"#,
                base64::engine::general_purpose::STANDARD.encode(png),
                escape_html(alt)
            ),
            Self::Markup(markup) => markup.clone(),
        }
    }

    /// PNG bytes for static documents. Markup has no static rendition.
    pub fn png(&self) -> Option<&[u8]> {
        match self {
            Self::Raster { png, .. } => Some(png),
            Self::Markup(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Raster { png, .. } => png.is_empty(),
            Self::Markup(markup) => markup.trim().is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Chart {
    pub kind: ChartKind,
    /// Caption shown with the chart and used as the narration topic.
    pub caption: String,
    pub artifact: ChartArtifact,
}

fn msg<E: std::fmt::Display>(e: E) -> String {
    e.to_string()
}

fn rgb((r, g, b): (u8, u8, u8)) -> RGBColor {
    RGBColor(r, g, b)
}

/// Linear blend between the low and high colors, `t` in [0, 1].
fn gradient(t: Number) -> RGBColor {
    let mix = |a: u8, b: u8| (f32::from(a) + (f32::from(b) - f32::from(a)) * t).round() as u8;
    RGBColor(
        mix(LOW_COLOR.0, HIGH_COLOR.0),
        mix(LOW_COLOR.1, HIGH_COLOR.1),
        mix(LOW_COLOR.2, HIGH_COLOR.2),
    )
}

fn padded(lo: f64, hi: f64) -> (f64, f64) {
    let (lo, hi) = if lo.is_finite() && hi.is_finite() {
        (lo, hi)
    } else {
        (0.0, 0.0)
    };
    let pad = ((hi - lo) * 0.05).max(1e-3);
    (lo - pad, hi + pad)
}

/// Small deterministic vertical offset so overlapping dots stay visible.
fn jitter(i: usize) -> f64 {
    ((i * 37 % 17) as f64 / 16.0 - 0.5) * 0.6
}

/// Registers the bundled font with plotters once per process.
fn ensure_font() -> Result<(), ChartError> {
    static REGISTERED: OnceLock<bool> = OnceLock::new();
    let ok = *REGISTERED.get_or_init(|| {
        plotters::style::register_font(FONT_FAMILY, FontStyle::Normal, FONT_BYTES).is_ok()
    });
    if ok {
        Ok(())
    } else {
        Err(ChartError::Render {
            chart: "font",
            message: "bundled font could not be parsed".to_string(),
        })
    }
}

fn raster(
    chart: &'static str,
    draw: impl FnOnce(DrawingArea<BitMapBackend<'_>, Shift>) -> Result<(), String>,
) -> Result<ChartArtifact, ChartError> {
    ensure_font()?;
    let mut buffer = vec![0u8; (CHART_WIDTH * CHART_HEIGHT * 3) as usize];
    {
        let root =
            BitMapBackend::with_buffer(&mut buffer, (CHART_WIDTH, CHART_HEIGHT)).into_drawing_area();
        draw(root).map_err(|message| ChartError::Render { chart, message })?;
    }
    let image = image::RgbImage::from_raw(CHART_WIDTH, CHART_HEIGHT, buffer).ok_or_else(|| {
        ChartError::Render {
            chart,
            message: "pixel buffer size mismatch".to_string(),
        }
    })?;
    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), image::ImageOutputFormat::Png)?;
    Ok(ChartArtifact::Raster {
        png,
        width: CHART_WIDTH,
        height: CHART_HEIGHT,
    })
}

fn feature_name(names: &[String], feature: usize) -> String {
    names
        .get(feature)
        .cloned()
        .unwrap_or_else(|| format!("feature {feature}"))
}

/// One tick per feature row, at integer positions.
fn row_ticks(rows: usize) -> Vec<f64> {
    (0..rows).map(|i| i as f64).collect()
}

/// Name of the feature drawn at row `y`, or nothing between rows.
fn row_label(order: &[usize], names: &[String], y: f64) -> String {
    let i = y.round();
    if i < 0.0 || (y - i).abs() > 1e-6 {
        return String::new();
    }
    order
        .get(i as usize)
        .map(|&feature| feature_name(names, feature))
        .unwrap_or_default()
}

/// Feature indices ordered from least to most important, so the most
/// important feature is drawn at the top of the y axis.
fn importance_order(attributions: &Attributions) -> Vec<usize> {
    let importance = mean_abs_by_column(&attributions.values);
    let mut order: Vec<usize> = (0..importance.len()).collect();
    order.sort_by(|a, b| importance[*a].total_cmp(&importance[*b]));
    order
}

/// Beeswarm-style summary: one row per feature, dots colored by feature value.
pub fn summary_plot(
    title: &str,
    attributions: &Attributions,
    data: &[Vec<Number>],
    feature_names: &[String],
) -> Result<ChartArtifact, ChartError> {
    let order = importance_order(attributions);
    let lo = attributions.values.iter().flatten().copied().fold(Number::INFINITY, Number::min);
    let hi = attributions.values.iter().flatten().copied().fold(Number::NEG_INFINITY, Number::max);
    let (x0, x1) = padded(f64::from(lo), f64::from(hi));
    let rows = order.len() as f64;
    let label = |y: &f64| row_label(&order, feature_names, *y);

    raster("summary plot", |root| {
        root.fill(&WHITE).map_err(msg)?;
        let mut chart = ChartBuilder::on(&root)
            .caption(title, (FONT_FAMILY, TITLE_SIZE))
            .margin(20)
            .x_label_area_size(45)
            .y_label_area_size(NAME_AREA)
            .build_cartesian_2d(
                x0..x1,
                (-0.5..rows - 0.5).with_key_points(row_ticks(order.len())),
            )
            .map_err(msg)?;
        chart
            .configure_mesh()
            .disable_y_mesh()
            .label_style((FONT_FAMILY, LABEL_SIZE))
            .y_label_formatter(&label)
            .x_desc("SHAP value (impact on model output)")
            .draw()
            .map_err(msg)?;
        chart
            .draw_series(std::iter::once(PathElement::new(
                vec![(0.0, -0.5), (0.0, rows - 0.5)],
                BLACK.mix(0.4),
            )))
            .map_err(msg)?;

        for (y, &feature) in order.iter().enumerate() {
            let bounds = column_bounds(data, feature);
            chart
                .draw_series(attributions.values.iter().zip(data).enumerate().map(
                    |(i, (values, row))| {
                        let color = gradient(normalize_in_range(row[feature], bounds));
                        Circle::new(
                            (f64::from(values[feature]), y as f64 + jitter(i)),
                            3,
                            color.filled(),
                        )
                    },
                ))
                .map_err(msg)?;
        }
        root.present().map_err(msg)
    })
}

/// Feature value against its attribution across the evaluation set.
pub fn dependence_plot(
    title: &str,
    attributions: &Attributions,
    data: &[Vec<Number>],
    feature: usize,
    feature_label: &str,
) -> Result<ChartArtifact, ChartError> {
    let (vx0, vx1) = column_bounds(data, feature);
    let values = attributions.column(feature);
    let lo = values.iter().copied().fold(Number::INFINITY, Number::min);
    let hi = values.iter().copied().fold(Number::NEG_INFINITY, Number::max);
    let (x0, x1) = padded(f64::from(vx0), f64::from(vx1));
    let (y0, y1) = padded(f64::from(lo), f64::from(hi));

    raster("dependence plot", |root| {
        root.fill(&WHITE).map_err(msg)?;
        let mut chart = ChartBuilder::on(&root)
            .caption(title, (FONT_FAMILY, TITLE_SIZE))
            .margin(20)
            .x_label_area_size(45)
            .y_label_area_size(70)
            .build_cartesian_2d(x0..x1, y0..y1)
            .map_err(msg)?;
        chart
            .configure_mesh()
            .label_style((FONT_FAMILY, LABEL_SIZE))
            .x_desc(feature_label)
            .y_desc(format!("SHAP value for {feature_label}"))
            .draw()
            .map_err(msg)?;
        chart
            .draw_series(std::iter::once(PathElement::new(
                vec![(x0, 0.0), (x1, 0.0)],
                BLACK.mix(0.3),
            )))
            .map_err(msg)?;
        chart
            .draw_series(data.iter().zip(&values).map(|(row, v)| {
                let t = normalize_in_range(*v, (lo, hi));
                Circle::new(
                    (f64::from(row[feature]), f64::from(*v)),
                    3,
                    gradient(t).filled(),
                )
            }))
            .map_err(msg)?;
        root.present().map_err(msg)
    })
}

/// Mean absolute attribution per feature as horizontal bars.
pub fn bar_plot(
    title: &str,
    attributions: &Attributions,
    feature_names: &[String],
) -> Result<ChartArtifact, ChartError> {
    let importance = mean_abs_by_column(&attributions.values);
    let order = importance_order(attributions);
    let top = importance.iter().copied().fold(0.0, Number::max);
    let x1 = f64::from(top) * 1.05 + 1e-3;
    let rows = order.len() as f64;
    let label = |y: &f64| row_label(&order, feature_names, *y);

    raster("bar plot", |root| {
        root.fill(&WHITE).map_err(msg)?;
        let mut chart = ChartBuilder::on(&root)
            .caption(title, (FONT_FAMILY, TITLE_SIZE))
            .margin(20)
            .x_label_area_size(45)
            .y_label_area_size(NAME_AREA)
            .build_cartesian_2d(
                0.0..x1,
                (-0.5..rows - 0.5).with_key_points(row_ticks(order.len())),
            )
            .map_err(msg)?;
        chart
            .configure_mesh()
            .disable_y_mesh()
            .label_style((FONT_FAMILY, LABEL_SIZE))
            .y_label_formatter(&label)
            .x_desc("mean |SHAP value|")
            .draw()
            .map_err(msg)?;
        chart
            .draw_series(order.iter().enumerate().map(|(y, &feature)| {
                let y = y as f64;
                Rectangle::new(
                    [(0.0, y - 0.35), (f64::from(importance[feature]), y + 0.35)],
                    rgb(LOW_COLOR).filled(),
                )
            }))
            .map_err(msg)?;
        root.present().map_err(msg)
    })
}

/// Cumulative contributions for one row, from the base value up to f(x).
pub fn waterfall_plot(
    title: &str,
    base_value: Number,
    contributions: &[Number],
    feature_names: &[String],
) -> Result<ChartArtifact, ChartError> {
    let mut order: Vec<usize> = (0..contributions.len()).collect();
    order.sort_by(|a, b| contributions[*a].abs().total_cmp(&contributions[*b].abs()));

    let mut steps = Vec::with_capacity(order.len());
    let mut running = f64::from(base_value);
    for &feature in &order {
        let start = running;
        running += f64::from(contributions[feature]);
        steps.push((start, running));
    }
    let output = running;
    let lo = steps
        .iter()
        .flat_map(|(a, b)| [*a, *b])
        .fold(f64::from(base_value), f64::min);
    let hi = steps
        .iter()
        .flat_map(|(a, b)| [*a, *b])
        .fold(f64::from(base_value), f64::max);
    let (x0, x1) = padded(lo, hi);
    let rows = steps.len() as f64;
    let label = |y: &f64| row_label(&order, feature_names, *y);

    raster("waterfall plot", |root| {
        root.fill(&WHITE).map_err(msg)?;
        let mut chart = ChartBuilder::on(&root)
            .caption(title, (FONT_FAMILY, TITLE_SIZE))
            .margin(20)
            .x_label_area_size(45)
            .y_label_area_size(NAME_AREA)
            .build_cartesian_2d(
                x0..x1,
                (-0.5..rows - 0.5).with_key_points(row_ticks(order.len())),
            )
            .map_err(msg)?;
        chart
            .configure_mesh()
            .disable_y_mesh()
            .label_style((FONT_FAMILY, LABEL_SIZE))
            .y_label_formatter(&label)
            .x_desc(format!(
                "E[f(X)] = {:.3}    f(x) = {output:.3}",
                f64::from(base_value)
            ))
            .draw()
            .map_err(msg)?;
        for marker in [f64::from(base_value), output] {
            chart
                .draw_series(std::iter::once(PathElement::new(
                    vec![(marker, -0.5), (marker, rows - 0.5)],
                    BLACK.mix(0.3),
                )))
                .map_err(msg)?;
        }
        chart
            .draw_series(steps.iter().enumerate().map(|(y, (start, end))| {
                let color = if end >= start { HIGH_COLOR } else { LOW_COLOR };
                let y = y as f64;
                Rectangle::new([(*start, y - 0.4), (*end, y + 0.4)], rgb(color).filled())
            }))
            .map_err(msg)?;
        root.present().map_err(msg)
    })
}

/// Additive force layout for one row as an inline SVG fragment.
///
/// Positive contributions end at f(x) from the left, negative ones start at
/// f(x) and extend to the right; the base value sits where they balance.
pub fn force_plot(
    base_value: Number,
    contributions: &[Number],
    row: &[Number],
    feature_names: &[String],
) -> ChartArtifact {
    const WIDTH: f64 = 800.0;
    const HEIGHT: f64 = 140.0;
    const MARGIN: f64 = 20.0;
    const BAR_Y: f64 = 60.0;
    const BAR_H: f64 = 28.0;

    let output: f64 =
        f64::from(base_value) + contributions.iter().map(|c| f64::from(*c)).sum::<f64>();
    let positive: f64 = contributions.iter().filter(|c| **c > 0.0).map(|c| f64::from(*c)).sum();
    let negative: f64 = contributions.iter().filter(|c| **c < 0.0).map(|c| f64::from(-*c)).sum();
    let left = output - positive;
    let right = output + negative;
    let span = (right - left).max(1e-9);
    let scale = |v: f64| MARGIN + (v - left) / span * (WIDTH - 2.0 * MARGIN);

    let mut pushes_up: Vec<usize> = (0..contributions.len())
        .filter(|i| contributions[*i] > 0.0)
        .collect();
    pushes_up.sort_by(|a, b| contributions[*a].total_cmp(&contributions[*b]));
    let mut pushes_down: Vec<usize> = (0..contributions.len())
        .filter(|i| contributions[*i] < 0.0)
        .collect();
    pushes_down.sort_by(|a, b| contributions[*a].total_cmp(&contributions[*b]).reverse());

    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<div class="force-plot"><svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {WIDTH} {HEIGHT}" width="{WIDTH}" height="{HEIGHT}" font-family="sans-serif" font-size="11">"#
    );

    let segment = |svg: &mut String, start: f64, end: f64, feature: usize, color: (u8, u8, u8)| {
        let (x0, x1) = (scale(start.min(end)), scale(start.max(end)));
        let name = feature_names
            .get(feature)
            .map_or_else(|| format!("feature {feature}"), |n| escape_html(n));
        let value = row.get(feature).copied().unwrap_or(Number::NAN);
        let _ = write!(
            svg,
            r#"<rect x="{x0:.2}" y="{BAR_Y}" width="{:.2}" height="{BAR_H}" fill="rgb({},{},{})" stroke="white"><title>{name} = {value} ({:+.4})</title></rect>"#,
            (x1 - x0).max(0.5),
            color.0,
            color.1,
            color.2,
            contributions[feature]
        );
        if x1 - x0 > 60.0 {
            let _ = write!(
                svg,
                r#"<text x="{:.2}" y="{}" text-anchor="middle">{name} = {value}</text>"#,
                (x0 + x1) / 2.0,
                BAR_Y + BAR_H + 16.0
            );
        }
    };

    let mut cursor = left;
    for &feature in &pushes_up {
        let end = cursor + f64::from(contributions[feature]);
        segment(&mut svg, cursor, end, feature, HIGH_COLOR);
        cursor = end;
    }
    for &feature in &pushes_down {
        let end = cursor - f64::from(contributions[feature]);
        segment(&mut svg, cursor, end, feature, LOW_COLOR);
        cursor = end;
    }

    for (label, value, y) in [("f(x)", output, 20.0), ("base value", f64::from(base_value), 45.0)] {
        let x = scale(value);
        let _ = write!(
            svg,
            r#"<line x1="{x:.2}" y1="{}" x2="{x:.2}" y2="{}" stroke="black"/><text x="{x:.2}" y="{y}" text-anchor="middle">{label} {value:.3}</text>"#,
            y + 4.0,
            BAR_Y + BAR_H
        );
    }
    svg.push_str("</svg>");
    let _ = write!(
        svg,
        r#"<p class="force-legend"><span style="color:rgb({},{},{})">&#9632; higher risk</span> <span style="color:rgb({},{},{})">&#9632; lower risk</span></p></div>"#,
        HIGH_COLOR.0, HIGH_COLOR.1, HIGH_COLOR.2, LOW_COLOR.0, LOW_COLOR.1, LOW_COLOR.2
    );
    ChartArtifact::Markup(svg)
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> (Attributions, Vec<Vec<Number>>) {
        let data: Vec<Vec<Number>> = (0..12)
            .map(|i| (0..4).map(|j| (i * 3 + j) as Number).collect())
            .collect();
        let values = data
            .iter()
            .map(|row| row.iter().enumerate().map(|(j, v)| (v - 10.0) * 0.01 * j as Number).collect())
            .collect();
        (
            Attributions {
                base_value: 0.4,
                values,
            },
            data,
        )
    }

    fn is_png(artifact: &ChartArtifact) -> bool {
        artifact
            .png()
            .is_some_and(|png| png.starts_with(&[0x89, b'P', b'N', b'G']))
    }

    fn names() -> Vec<String> {
        ["Age", "Cholesterol", "MaxHR", "ChestPainType_ASY"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn raster_charts_encode_png() {
        let (attributions, data) = sample();
        let names = names();
        assert!(is_png(&summary_plot("Summary", &attributions, &data, &names).unwrap()));
        assert!(is_png(
            &dependence_plot("Dependence", &attributions, &data, 2, "MaxHR").unwrap()
        ));
        assert!(is_png(&bar_plot("Bar", &attributions, &names).unwrap()));
        assert!(is_png(
            &waterfall_plot("Waterfall", attributions.base_value, &attributions.values[0], &names)
                .unwrap()
        ));
    }

    #[test]
    fn labelled_charts_draw_text() {
        let (attributions, _) = sample();
        let labelled = bar_plot("Bar", &attributions, &names()).unwrap();
        let decoded = image::load_from_memory(labelled.png().unwrap()).unwrap().to_rgb8();
        // The name area left of the plot holds dark glyph pixels only when text is drawn.
        let dark = (0..NAME_AREA)
            .flat_map(|x| (0..CHART_HEIGHT).map(move |y| (x, y)))
            .filter(|&(x, y)| decoded.get_pixel(x, y).0.iter().all(|c| *c < 100))
            .count();
        assert!(dark > 50, "{dark} dark pixels in the label area");
    }

    #[test]
    fn row_labels_follow_importance_order() {
        let names = names();
        let order = [2, 0, 3, 1];
        assert_eq!(row_label(&order, &names, 0.0), "MaxHR");
        assert_eq!(row_label(&order, &names, 3.0), "Cholesterol");
        assert_eq!(row_label(&order, &names, 0.5), "");
        assert_eq!(row_label(&order, &names, -1.0), "");
        assert_eq!(row_label(&[7], &names, 0.0), "feature 7");
    }

    #[test]
    fn flat_inputs_still_render() {
        let attributions = Attributions {
            base_value: 0.5,
            values: vec![vec![0.0; 4]; 3],
        };
        let data = vec![vec![1.0; 4]; 3];
        assert!(is_png(&summary_plot("Flat", &attributions, &data, &names()).unwrap()));
        assert!(is_png(
            &dependence_plot("Flat", &attributions, &data, 0, "Age").unwrap()
        ));
    }

    #[test]
    fn force_plot_is_markup_with_escaped_names() {
        let names: Vec<String> = vec!["Age".into(), "<b>".into(), "Chol".into()];
        let artifact = force_plot(0.3, &[0.2, -0.1, 0.15], &[50.0, 1.0, 240.0], &names);
        assert!(artifact.png().is_none());
        let html = artifact.to_html("force");
        assert!(html.starts_with("<div class=\"force-plot\"><svg"));
        assert!(html.contains("&lt;b&gt;"));
        assert!(!html.contains("<b>"));
        assert!(html.contains("f(x) 0.550"));
    }

    #[test]
    fn raster_html_embeds_base64() {
        let artifact = ChartArtifact::Raster {
            png: vec![1, 2, 3],
            width: 4,
            height: 5,
        };
        let html = artifact.to_html("a \"chart\"");
        assert!(html.contains("data:image/png;base64,AQID"));
        assert!(html.contains("alt=\"a &quot;chart&quot;\""));
        assert!(!artifact.is_empty());
    }
}
