//! PDF report: one page per chart with its narration, then a page of health tips.

use printpdf::{
    BuiltinFont, Image, ImageTransform, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference,
    PdfLayerReference,
};
use tracing::debug;

use crate::charts::Chart;
use crate::error::ReportError;

pub const REPORT_FILENAME: &str = "heartify_report.pdf";

/// Characters per narration line; an estimate, not a font measurement.
pub const WRAP_COLUMNS: usize = 95;

pub const HEALTH_TIPS: [&str; 10] = [
    "Eat a balanced diet rich in vegetables, fruits, whole grains and lean protein.",
    "Limit salt, added sugar, saturated fat and processed foods.",
    "Get at least 150 minutes of moderate aerobic activity every week.",
    "Do not smoke, and avoid second-hand smoke.",
    "Keep alcohol consumption within recommended limits.",
    "Maintain a healthy body weight and waist circumference.",
    "Check your blood pressure regularly and follow treatment if it is high.",
    "Have your cholesterol and blood sugar measured as advised by your doctor.",
    "Sleep seven to nine hours a night and manage stress.",
    "Seek medical help promptly for chest pain, breathlessness or fainting.",
];

const PAGE_WIDTH: Mm = Mm(210.0);
const PAGE_HEIGHT: Mm = Mm(297.0);
const MARGIN_MM: f32 = 20.0;
const IMAGE_DPI: f32 = 150.0;
const HEADING_SIZE: f32 = 14.0;
const BODY_SIZE: f32 = 10.5;
const LINE_MM: f32 = 5.0;

struct Fonts {
    bold: IndirectFontRef,
    regular: IndirectFontRef,
}

/// Assembles the whole document in memory.
///
/// Markup-only charts keep their heading and narration but carry no image.
pub fn build_report(
    charts: &[Chart],
    narrations: &[String],
    health_tips: &[&str],
) -> Result<Vec<u8>, ReportError> {
    if charts.len() != narrations.len() {
        return Err(ReportError::Mismatch {
            charts: charts.len(),
            narrations: narrations.len(),
        });
    }

    let (doc, first_page, first_layer) =
        PdfDocument::new("Heartify Report", PAGE_WIDTH, PAGE_HEIGHT, "Layer 1");
    let fonts = Fonts {
        bold: doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(pdf_err)?,
        regular: doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(pdf_err)?,
    };

    let mut layer = doc.get_page(first_page).get_layer(first_layer);
    for (index, (chart, narration)) in charts.iter().zip(narrations).enumerate() {
        if index > 0 {
            layer = new_page(&doc);
        }
        chart_page(&layer, &fonts, index + 1, chart, narration)?;
    }
    if !charts.is_empty() {
        layer = new_page(&doc);
    }
    tips_page(&layer, &fonts, health_tips);

    let bytes = doc.save_to_bytes().map_err(pdf_err)?;
    debug!(pages = charts.len() + 1, bytes = bytes.len(), "Report assembled");
    Ok(bytes)
}

fn pdf_err<E: std::fmt::Debug>(e: E) -> ReportError {
    ReportError::Pdf(format!("{e:?}"))
}

fn new_page(doc: &PdfDocumentReference) -> PdfLayerReference {
    let (page, layer) = doc.add_page(PAGE_WIDTH, PAGE_HEIGHT, "Layer 1");
    doc.get_page(page).get_layer(layer)
}

fn chart_page(
    layer: &PdfLayerReference,
    fonts: &Fonts,
    number: usize,
    chart: &Chart,
    narration: &str,
) -> Result<(), ReportError> {
    let mut y = PAGE_HEIGHT.0 - MARGIN_MM;
    layer.use_text(
        pdf_text(&format!("Chart {number}: {}", chart.caption)),
        HEADING_SIZE,
        Mm(MARGIN_MM),
        Mm(y),
        &fonts.bold,
    );
    y -= 10.0;

    if let Some(png) = chart.artifact.png() {
        let decoded = image::load_from_memory_with_format(png, image::ImageFormat::Png)?;
        let height_mm = decoded.height() as f32 / IMAGE_DPI * 25.4;
        y -= height_mm;
        Image::from_dynamic_image(&decoded).add_to_layer(
            layer.clone(),
            ImageTransform {
                translate_x: Some(Mm(MARGIN_MM)),
                translate_y: Some(Mm(y)),
                dpi: Some(IMAGE_DPI),
                ..Default::default()
            },
        );
        y -= 10.0;
    }

    for line in wrap_text(&pdf_text(narration), WRAP_COLUMNS) {
        if y < MARGIN_MM {
            break;
        }
        layer.use_text(line, BODY_SIZE, Mm(MARGIN_MM), Mm(y), &fonts.regular);
        y -= LINE_MM;
    }
    Ok(())
}

fn tips_page(layer: &PdfLayerReference, fonts: &Fonts, tips: &[&str]) {
    let mut y = PAGE_HEIGHT.0 - MARGIN_MM;
    layer.use_text("Health Tips", HEADING_SIZE, Mm(MARGIN_MM), Mm(y), &fonts.bold);
    y -= 12.0;
    for (i, tip) in tips.iter().enumerate() {
        for (j, line) in wrap_text(&pdf_text(tip), WRAP_COLUMNS - 4).into_iter().enumerate() {
            let text = if j == 0 {
                format!("{}. {line}", i + 1)
            } else {
                format!("    {line}")
            };
            layer.use_text(text, BODY_SIZE, Mm(MARGIN_MM), Mm(y), &fonts.regular);
            y -= LINE_MM;
        }
        y -= 2.0;
    }
}

/// Greedy word wrap by character count. Words longer than `width` are split.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut line = String::new();
        let mut len = 0;
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > width {
                if len > 0 {
                    lines.push(std::mem::take(&mut line));
                    len = 0;
                }
                lines.push(word.drain(..width).collect());
            }
            if word.is_empty() {
                continue;
            }
            if len > 0 && len + 1 + word.len() > width {
                lines.push(std::mem::take(&mut line));
                len = 0;
            }
            if len > 0 {
                line.push(' ');
                len += 1;
            }
            len += word.len();
            line.extend(word);
        }
        if len > 0 {
            lines.push(line);
        }
    }
    lines
}

/// Reduces text to what the built-in PDF fonts can show.
pub fn pdf_text(text: &str) -> String {
    text.chars()
        .filter_map(|c| match c {
            '\u{2018}' | '\u{2019}' => Some('\''),
            '\u{201C}' | '\u{201D}' => Some('"'),
            '\u{2013}' | '\u{2014}' => Some('-'),
            '\u{2022}' => Some('-'),
            '*' | '#' | '`' => None,
            '\n' | '\t' => Some(c),
            c if c.is_control() => None,
            c if u32::from(c) < 0x80 => Some(c),
            _ => Some('?'),
        })
        .collect()
}
