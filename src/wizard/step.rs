use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Values keyed by field name, as submitted or as accepted after validation.
pub type FieldValues = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rule {
    Email,
    Integer { min: i64, max: i64 },
    MinLength { min: usize },
    Boolean,
    OneOf { choices: Vec<String> },
}

impl Rule {
    pub fn accepts(&self, value: &str) -> bool {
        match self {
            Rule::Email => looks_like_email(value),
            Rule::Integer { min, max } => value
                .parse::<i64>()
                .map(|n| (*min..=*max).contains(&n))
                .unwrap_or(false),
            Rule::MinLength { min } => value.chars().count() >= *min,
            Rule::Boolean => parse_bool(value).is_some(),
            Rule::OneOf { choices } => choices.iter().any(|c| c == value),
        }
    }

    fn default_message(&self) -> String {
        match self {
            Rule::Email => "メールアドレスの形式が不正です".to_string(),
            Rule::Integer { min, max } => format!("{min}〜{max} の整数を入力してください"),
            Rule::MinLength { min } => format!("{min} 文字以上で入力してください"),
            Rule::Boolean => "0|1|true|false のいずれかを入力してください".to_string(),
            Rule::OneOf { choices } => format!("{} のいずれかを入力してください", choices.join("|")),
        }
    }
}

/// A rule plus the message reported when it rejects a value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validator {
    pub rule: Rule,
    pub message: String,
}

impl Validator {
    pub fn new(rule: Rule) -> Self {
        let message = rule.default_message();
        Self { rule, message }
    }

    pub fn with_message(rule: Rule, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub key: String,
    pub label: String,
    pub required: bool,
    pub secret: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    pub validators: Vec<Validator>,
}

impl FieldSpec {
    pub fn required(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            required: true,
            secret: false,
            default: None,
            validators: vec![],
        }
    }

    pub fn optional(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(key, label)
        }
    }

    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.validators.push(Validator::new(rule));
        self
    }

    pub fn validator(mut self, validator: Validator) -> Self {
        self.validators.push(validator);
        self
    }

    /// Checks one value; returns the first rejecting validator's message.
    fn validate(&self, value: Option<&str>) -> Result<Option<String>, String> {
        // Secrets are kept verbatim; blank input still counts as missing.
        let value = value
            .filter(|v| !v.trim().is_empty())
            .map(|v| if self.secret { v } else { v.trim() });
        let Some(value) = value.or(self.default.as_deref()) else {
            if self.required {
                return Err("必須項目です".to_string());
            }
            return Ok(None);
        };

        for validator in &self.validators {
            if !validator.rule.accepts(value) {
                return Err(validator.message.clone());
            }
        }
        Ok(Some(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for FieldError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepDefinition {
    pub id: String,
    pub title: String,
    pub fields: Vec<FieldSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_step_id: Option<String>,
}

impl StepDefinition {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            fields: vec![],
            next_step_id: None,
        }
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn next(mut self, step_id: impl Into<String>) -> Self {
        self.next_step_id = Some(step_id.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.next_step_id.is_none()
    }

    /// Validates every field independently and reports all failures at once.
    ///
    /// Accepted values are trimmed, defaults are filled in, and keys the step
    /// does not declare are dropped.
    pub fn validate(&self, values: &FieldValues) -> Result<FieldValues, Vec<FieldError>> {
        let mut accepted = FieldValues::new();
        let mut errors = Vec::new();

        for field in &self.fields {
            match field.validate(values.get(&field.key).map(String::as_str)) {
                Ok(Some(value)) => {
                    accepted.insert(field.key.clone(), value);
                }
                Ok(None) => {}
                Err(message) => errors.push(FieldError {
                    field: field.key.clone(),
                    message,
                }),
            }
        }

        if errors.is_empty() {
            Ok(accepted)
        } else {
            Err(errors)
        }
    }
}

pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn looks_like_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') || s.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((host, tld)) = domain.rsplit_once('.') else {
        return false;
    };
    !host.is_empty() && !tld.is_empty()
}
