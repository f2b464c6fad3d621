use minijinja::{context, Environment, Value};
use serde::Serialize;

use crate::features::{FieldKind, CATEGORY_CHOICES, FORM_FIELDS, INDICATORS};

const TEMPLATES: [(&str, &str); 7] = [
    ("base.html", include_str!("../templates/base.html")),
    ("index.html", include_str!("../templates/index.html")),
    ("form.html", include_str!("../templates/form.html")),
    ("result.html", include_str!("../templates/result.html")),
    ("xai_intro.html", include_str!("../templates/xai_intro.html")),
    ("xai.html", include_str!("../templates/xai.html")),
    ("report_done.html", include_str!("../templates/report_done.html")),
];

#[derive(Serialize)]
struct Choice {
    value: i64,
    label: &'static str,
}

/// One input on the patient form. Categorical fields render as selects and
/// indicator fields as hidden inputs kept in sync with their select.
#[derive(Serialize)]
struct FormField {
    name: &'static str,
    step: &'static str,
    choices: Vec<Choice>,
    source: Option<&'static str>,
    code: Option<i64>,
    value: &'static str,
}

fn form_field(name: &'static str, kind: FieldKind) -> FormField {
    let choices: Vec<Choice> = CATEGORY_CHOICES
        .into_iter()
        .find(|(field, _)| *field == name)
        .map(|(_, choices)| {
            choices
                .iter()
                .map(|&(value, label)| Choice { value, label })
                .collect()
        })
        .unwrap_or_default();
    let indicator = INDICATORS.into_iter().find(|(field, _, _)| *field == name);
    // Hidden inputs start out matching the default (first) choice of their source.
    let value = indicator
        .and_then(|(_, source, code)| {
            CATEGORY_CHOICES
                .into_iter()
                .find(|(field, _)| *field == source)
                .and_then(|(_, choices)| choices.first())
                .map(|(default, _)| if *default == code { "1" } else { "0" })
        })
        .unwrap_or("");
    FormField {
        name,
        step: match kind {
            FieldKind::Integer => "1",
            FieldKind::Float => "any",
        },
        choices,
        source: indicator.map(|(_, source, _)| source),
        code: indicator.map(|(_, _, code)| code),
        value,
    }
}

/// HTML templates compiled once at startup.
pub struct Pages {
    env: Environment<'static>,
}

impl Pages {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        for (name, source) in TEMPLATES {
            env.add_template(name, source)?;
        }
        Ok(Self { env })
    }

    pub fn render(&self, name: &str, ctx: Value) -> Result<String, minijinja::Error> {
        self.env.get_template(name)?.render(ctx)
    }

    pub fn index(&self) -> Result<String, minijinja::Error> {
        self.render("index.html", context! {})
    }

    pub fn form(&self) -> Result<String, minijinja::Error> {
        let fields: Vec<FormField> = FORM_FIELDS
            .into_iter()
            .map(|(name, kind)| form_field(name, kind))
            .collect();
        self.render("form.html", context! { fields })
    }

    pub fn result(&self, result: &str, probability: f64) -> Result<String, minijinja::Error> {
        self.render(
            "result.html",
            context! { result, probability => format!("{:.1}%", probability * 100.0) },
        )
    }

    pub fn xai_intro(&self) -> Result<String, minijinja::Error> {
        self.render("xai_intro.html", context! {})
    }

    pub fn report_done(&self) -> Result<String, minijinja::Error> {
        self.render("report_done.html", context! {})
    }
}
