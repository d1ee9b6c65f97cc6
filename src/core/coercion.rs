//! Matching and type coercion of raw caller input against a service's input schema.
//!
//! Validation runs in two passes. The first collects every mandatory parameter that
//! has neither a caller value nor a default and fails fast with the whole list. The
//! second coerces every remaining parameter and aggregates all failures into one report.

use crate::domain::model::{
    number_to_json, CellValue, DefaultValue, ExecutionError, FieldError, FieldErrorKind,
    MatchRank, ParamType, ParameterDefinition, ServiceDescriptor,
};
use serde_json::{Map, Value};

const TRUE_TOKENS: &[&str] = &[
    "true", "yes", "y", "1", "on", "t", "x", "ja", "j", "si", "sí", "oui", "vrai", "wahr",
    "verdadero", "sim", "da", "tak", "evet", "是", "はい",
];

const FALSE_TOKENS: &[&str] = &[
    "false", "no", "n", "0", "off", "f", "nein", "non", "faux", "falsch", "falso", "não", "nao",
    "nie", "hayır", "ne", "否", "いいえ",
];

const NUMBER_TOLERANCE: f64 = 1e-9;

/// A caller value after coercion, ready to be written to its cell(s).
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Number(f64),
    Text(String),
    Bool(bool),
    /// Row-major block written from the address's top-left cell.
    Array(Vec<Vec<CellValue>>),
    /// Blank the target cell.
    Clear,
}

impl InputValue {
    pub fn to_json(&self) -> Value {
        match self {
            InputValue::Number(n) => number_to_json(*n),
            InputValue::Text(s) => Value::String(s.clone()),
            InputValue::Bool(b) => Value::Bool(*b),
            InputValue::Array(rows) => Value::Array(
                rows.iter()
                    .map(|row| Value::Array(row.iter().map(CellValue::to_json).collect()))
                    .collect(),
            ),
            InputValue::Clear => Value::Null,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoercedInput<'a> {
    pub definition: &'a ParameterDefinition,
    pub value: InputValue,
}

/// Resolve, default and coerce every input of `service`.
pub fn coerce_inputs<'a>(
    service: &'a ServiceDescriptor,
    raw: &Map<String, Value>,
) -> Result<Vec<CoercedInput<'a>>, ExecutionError> {
    let definitions = service.inputs();
    let resolved = resolve_values(service, raw);

    // 第一輪：缺少必填欄位時直接返回
    let missing: Vec<String> = definitions
        .iter()
        .zip(&resolved)
        .filter(|(definition, value)| {
            definition.mandatory && value.is_none() && definition.default.is_none()
        })
        .map(|(definition, _)| definition.name.clone())
        .collect();
    if !missing.is_empty() {
        tracing::debug!("Missing mandatory parameters: {:?}", missing);
        return Err(ExecutionError::missing_parameters(missing));
    }

    // 第二輪：逐欄轉型並彙整所有錯誤
    let mut coerced = Vec::with_capacity(definitions.len());
    let mut errors = Vec::new();
    for (definition, supplied) in definitions.iter().zip(resolved) {
        let outcome = match (supplied, &definition.default) {
            (Some(value), _) => coerce_value(definition, value),
            (None, Some(DefaultValue::Literal(value))) => coerce_value(definition, value),
            (None, Some(DefaultValue::Clear)) => Ok(InputValue::Clear),
            (None, None) => continue,
        };
        match outcome {
            Ok(value) => coerced.push(CoercedInput { definition, value }),
            Err(error) => errors.push(error),
        }
    }

    if errors.is_empty() {
        Ok(coerced)
    } else {
        tracing::debug!("{} parameter(s) failed validation", errors.len());
        Err(ExecutionError::invalid_parameters(errors))
    }
}

/// For each input definition, the best-ranked caller value (null and blank values are absent).
fn resolve_values<'v>(service: &ServiceDescriptor, raw: &'v Map<String, Value>) -> Vec<Option<&'v Value>> {
    let index = service.input_index();
    let mut best: Vec<Option<(MatchRank, &'v Value)>> = vec![None; service.inputs().len()];

    for (key, value) in raw {
        if is_blank(value) {
            continue;
        }
        let Some((position, rank)) = index.lookup(key) else {
            tracing::debug!("Ignoring unknown input key '{}'", key);
            continue;
        };
        match best[position] {
            Some((current, _)) if current <= rank => {}
            _ => best[position] = Some((rank, value)),
        }
    }

    best.into_iter().map(|slot| slot.map(|(_, value)| value)).collect()
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Coerce one value according to its definition's declared type and constraints.
pub fn coerce_value(definition: &ParameterDefinition, value: &Value) -> Result<InputValue, FieldError> {
    match definition.param_type {
        ParamType::Number => coerce_number(definition, value).map(InputValue::Number),
        ParamType::Boolean => coerce_boolean(definition, value).map(InputValue::Bool),
        ParamType::String => coerce_string(definition, value).map(InputValue::Text),
        ParamType::Array => coerce_array(definition, value).map(InputValue::Array),
    }
}

fn coerce_number(definition: &ParameterDefinition, value: &Value) -> Result<f64, FieldError> {
    let (parsed, had_percent_sign) = match value {
        Value::Number(n) => (n.as_f64(), false),
        Value::String(s) => {
            let text = s.trim();
            match text.strip_suffix('%') {
                Some(stripped) => (parse_number(stripped), true),
                None => (parse_number(text), false),
            }
        }
        _ => (None, false),
    };
    let mut number = parsed.ok_or_else(|| type_mismatch(definition, value))?;

    if had_percent_sign {
        number /= 100.0;
    }
    if definition.implies_percentage() {
        let threshold = definition.max.unwrap_or(1.0);
        if number.abs() > threshold {
            number /= 100.0;
        }
    }

    if let Some(min) = definition.min {
        if number < min {
            return Err(FieldError {
                field: definition.name.clone(),
                kind: FieldErrorKind::BelowMinimum,
                message: format!("{} must be at least {}, got {}", definition.name, min, number),
                allowed: None,
            });
        }
    }
    if let Some(max) = definition.max {
        if number > max {
            return Err(FieldError {
                field: definition.name.clone(),
                kind: FieldErrorKind::AboveMaximum,
                message: format!("{} must be at most {}, got {}", definition.name, max, number),
                allowed: None,
            });
        }
    }

    if let Some(allowed) = &definition.allowed_values {
        let matches = allowed
            .iter()
            .filter_map(|candidate| match candidate {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => parse_number(s.trim()),
                _ => None,
            })
            .any(|candidate| (candidate - number).abs() <= NUMBER_TOLERANCE);
        if !matches {
            return Err(invalid_enum(definition, &number_to_json(number), allowed));
        }
    }

    Ok(number)
}

fn parse_number(text: &str) -> Option<f64> {
    let number = text.trim().parse::<f64>().ok()?;
    number.is_finite().then_some(number)
}

fn coerce_boolean(definition: &ParameterDefinition, value: &Value) -> Result<bool, FieldError> {
    let flag = parse_boolean(value).ok_or_else(|| type_mismatch(definition, value))?;

    if let Some(allowed) = &definition.allowed_values {
        if !allowed.iter().filter_map(parse_boolean).any(|candidate| candidate == flag) {
            return Err(invalid_enum(definition, &Value::Bool(flag), allowed));
        }
    }
    Ok(flag)
}

pub(crate) fn parse_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_f64() {
            Some(x) if x == 1.0 => Some(true),
            Some(x) if x == 0.0 => Some(false),
            _ => None,
        },
        Value::String(s) => {
            let token = s.trim().to_lowercase();
            if TRUE_TOKENS.contains(&token.as_str()) {
                Some(true)
            } else if FALSE_TOKENS.contains(&token.as_str()) {
                Some(false)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn coerce_string(definition: &ParameterDefinition, value: &Value) -> Result<String, FieldError> {
    let text = scalar_to_string(value).ok_or_else(|| type_mismatch(definition, value))?;
    let text = text.trim().to_string();

    let Some(allowed) = &definition.allowed_values else {
        return Ok(text);
    };

    // 命中時改用白名單中的寫法，公式端才能精確比對
    let canonical = allowed.iter().filter_map(scalar_to_string).find(|candidate| {
        let candidate = candidate.trim();
        if definition.case_sensitive {
            candidate == text
        } else {
            candidate.to_lowercase() == text.to_lowercase()
        }
    });

    match canonical {
        Some(candidate) => Ok(candidate.trim().to_string()),
        None => Err(invalid_enum(definition, &Value::String(text), allowed)),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn coerce_array(
    definition: &ParameterDefinition,
    value: &Value,
) -> Result<Vec<Vec<CellValue>>, FieldError> {
    let Value::Array(items) = value else {
        return Err(type_mismatch(definition, value));
    };

    let width = definition.address.col_count().max(1) as usize;
    let rows: Vec<Vec<CellValue>> = if !items.is_empty() && items.iter().all(Value::is_array) {
        items
            .iter()
            .map(|row| {
                row.as_array()
                    .into_iter()
                    .flatten()
                    .map(|cell| array_cell(definition, cell))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<_, _>>()?
    } else {
        let cells = items
            .iter()
            .map(|cell| array_cell(definition, cell))
            .collect::<Result<Vec<_>, _>>()?;
        if definition.address.is_range() {
            cells.chunks(width).map(<[CellValue]>::to_vec).collect()
        } else {
            vec![cells]
        }
    };

    if definition.address.is_range() {
        let too_tall = rows.len() > definition.address.row_count() as usize;
        let too_wide = rows.iter().any(|row| row.len() > width);
        if too_tall || too_wide {
            return Err(FieldError {
                field: definition.name.clone(),
                kind: FieldErrorKind::TypeMismatch,
                message: format!(
                    "{} does not fit in {} ({} rows x {} columns)",
                    definition.name,
                    definition.address,
                    definition.address.row_count(),
                    width
                ),
                allowed: None,
            });
        }
    }

    Ok(rows)
}

fn array_cell(definition: &ParameterDefinition, value: &Value) -> Result<CellValue, FieldError> {
    match value {
        Value::Null => Ok(CellValue::Empty),
        Value::Bool(b) => Ok(CellValue::Bool(*b)),
        Value::Number(n) => n
            .as_f64()
            .map(CellValue::Number)
            .ok_or_else(|| type_mismatch(definition, value)),
        Value::String(s) => Ok(CellValue::Text(s.clone())),
        _ => Err(type_mismatch(definition, value)),
    }
}

fn type_mismatch(definition: &ParameterDefinition, value: &Value) -> FieldError {
    FieldError {
        field: definition.name.clone(),
        kind: FieldErrorKind::TypeMismatch,
        message: format!(
            "{} expects a {} value, got {}",
            definition.name, definition.param_type, value
        ),
        allowed: None,
    }
}

fn invalid_enum(definition: &ParameterDefinition, value: &Value, allowed: &[Value]) -> FieldError {
    let listed: Vec<String> = allowed
        .iter()
        .map(|v| scalar_to_string(v).unwrap_or_else(|| v.to_string()))
        .collect();
    FieldError {
        field: definition.name.clone(),
        kind: FieldErrorKind::InvalidEnumValue,
        message: format!(
            "{} must be one of [{}], got {}",
            definition.name,
            listed.join(", "),
            value
        ),
        allowed: Some(allowed.to_vec()),
    }
}
