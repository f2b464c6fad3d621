use std::collections::HashMap;

use crate::config::Number;
use crate::error::FeatureError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Float,
}

/// Form fields in the order the classifier expects them.
pub const FORM_FIELDS: [(&str, FieldKind); FEATURE_COUNT] = [
    ("age", FieldKind::Integer),
    ("sex", FieldKind::Integer),
    ("cp", FieldKind::Integer),
    ("trestbps", FieldKind::Integer),
    ("chol", FieldKind::Integer),
    ("fbs", FieldKind::Integer),
    ("restecg", FieldKind::Integer),
    ("thalach", FieldKind::Integer),
    ("exang", FieldKind::Integer),
    ("oldpeak", FieldKind::Float),
    ("slope", FieldKind::Integer),
    ("ca", FieldKind::Integer),
    ("thal", FieldKind::Integer),
    ("Sex_M", FieldKind::Integer),
    ("Sex_F", FieldKind::Integer),
    ("ChestPainType_TA", FieldKind::Integer),
    ("ChestPainType_ATA", FieldKind::Integer),
    ("ChestPainType_NAP", FieldKind::Integer),
    ("ChestPainType_ASY", FieldKind::Integer),
    ("ExerciseAngina_Y", FieldKind::Integer),
];

pub const FEATURE_COUNT: usize = 20;

/// One-hot indicator fields, the categorical field that drives each one and
/// the code that switches it on.
pub const INDICATORS: [(&str, &str, i64); 7] = [
    ("Sex_M", "sex", 1),
    ("Sex_F", "sex", 0),
    ("ChestPainType_TA", "cp", 0),
    ("ChestPainType_ATA", "cp", 1),
    ("ChestPainType_NAP", "cp", 2),
    ("ChestPainType_ASY", "cp", 3),
    ("ExerciseAngina_Y", "exang", 1),
];

/// Choices offered for the categorical fields, first entry selected by default.
pub const CATEGORY_CHOICES: [(&str, &[(i64, &str)]); 3] = [
    ("sex", &[(1, "Male"), (0, "Female")]),
    (
        "cp",
        &[
            (0, "Typical angina (TA)"),
            (1, "Atypical angina (ATA)"),
            (2, "Non-anginal pain (NAP)"),
            (3, "Asymptomatic (ASY)"),
        ],
    ),
    ("exang", &[(0, "No"), (1, "Yes")]),
];

/// Overwrites the one-hot indicators from their categorical fields so the two
/// encodings cannot disagree. Indicators whose source is missing or does not
/// parse are left as submitted.
pub fn derive_indicators(form: &mut HashMap<String, String>) {
    for (indicator, source, code) in INDICATORS {
        let Some(value) = form.get(source).and_then(|v| v.trim().parse::<i64>().ok()) else {
            continue;
        };
        let flag = if value == code { "1" } else { "0" };
        form.insert(indicator.to_string(), flag.to_string());
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: [Number; FEATURE_COUNT],
}

impl FeatureVector {
    /// Builds the classifier input from submitted form fields.
    ///
    /// Values are not range checked; anything that parses is passed through.
    pub fn from_form(form: &HashMap<String, String>) -> Result<Self, FeatureError> {
        let mut values = [0.0; FEATURE_COUNT];
        for (slot, (name, kind)) in values.iter_mut().zip(FORM_FIELDS) {
            let raw = form.get(name).ok_or(FeatureError::Missing(name))?;
            *slot = parse_field(name, kind, raw)?;
        }
        Ok(Self { values })
    }

    pub fn as_slice(&self) -> &[Number] {
        &self.values
    }
}

impl From<[Number; FEATURE_COUNT]> for FeatureVector {
    fn from(values: [Number; FEATURE_COUNT]) -> Self {
        Self { values }
    }
}

fn parse_field(name: &'static str, kind: FieldKind, raw: &str) -> Result<Number, FeatureError> {
    let trimmed = raw.trim();
    let invalid = || FeatureError::Invalid {
        field: name,
        value: raw.to_string(),
    };
    match kind {
        FieldKind::Integer => trimmed
            .parse::<i64>()
            .map(|v| v as Number)
            .map_err(|_| invalid()),
        FieldKind::Float => trimmed
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|v| v as Number)
            .ok_or_else(invalid),
    }
}

#[cfg(test)]
pub(crate) fn sample_form() -> HashMap<String, String> {
    [
        ("age", "57"),
        ("sex", "1"),
        ("cp", "3"),
        ("trestbps", "140"),
        ("chol", "289"),
        ("fbs", "0"),
        ("restecg", "1"),
        ("thalach", "123"),
        ("exang", "1"),
        ("oldpeak", "1.5"),
        ("slope", "1"),
        ("ca", "2"),
        ("thal", "3"),
        ("Sex_M", "1"),
        ("Sex_F", "0"),
        ("ChestPainType_TA", "0"),
        ("ChestPainType_ATA", "0"),
        ("ChestPainType_NAP", "0"),
        ("ChestPainType_ASY", "1"),
        ("ExerciseAngina_Y", "1"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}
