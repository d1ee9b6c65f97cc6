use crate::utils::error::{Result, ServiceError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Declared type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    Number,
    String,
    Boolean,
    Array,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamType::Number => "number",
            ParamType::String => "string",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
        };
        f.write_str(name)
    }
}

/// A cell position, 1-based on both axes (`B3` is row 3, column 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRef {
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Parse `A1`-style notation. `$` anchors are ignored and letters are case-insensitive.
    pub fn parse(reference: &str) -> Option<Self> {
        let cleaned: String = reference
            .trim()
            .chars()
            .filter(|c| *c != '$')
            .collect();
        let split = cleaned.find(|c: char| c.is_ascii_digit())?;
        let (letters, digits) = cleaned.split_at(split);
        if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }

        let mut col: u32 = 0;
        for c in letters.to_ascii_uppercase().bytes() {
            col = col.checked_mul(26)?.checked_add(u32::from(c - b'A') + 1)?;
        }
        let row = digits.parse::<u32>().ok()?;
        if row == 0 {
            return None;
        }
        Some(Self { row, col })
    }

    pub fn col_to_letters(col: u32) -> String {
        let mut result = String::new();
        let mut n = col;
        while n > 0 {
            n -= 1;
            result.insert(0, (b'A' + (n % 26) as u8) as char);
            n /= 26;
        }
        result
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", CellRef::col_to_letters(self.col), self.row)
    }
}

/// Cell binding of a parameter: one cell or a rectangular range, optionally on a named sheet.
///
/// Serialized as A1 text: `B2`, `Inputs!B2`, `'Rate Table'!B2:C5`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CellAddress {
    pub sheet: Option<String>,
    pub start: CellRef,
    pub end: CellRef,
}

impl CellAddress {
    pub fn parse(address: &str) -> Result<Self> {
        let invalid = |reason: &str| ServiceError::AddressError {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        let (sheet, cells) = match address.rsplit_once('!') {
            Some((sheet, cells)) => {
                let sheet = sheet.trim();
                let sheet = sheet
                    .strip_prefix('\'')
                    .and_then(|s| s.strip_suffix('\''))
                    .map(|s| s.replace("''", "'"))
                    .unwrap_or_else(|| sheet.to_string());
                if sheet.is_empty() {
                    return Err(invalid("sheet name is empty"));
                }
                (Some(sheet), cells)
            }
            None => (None, address),
        };

        let (first, second) = match cells.split_once(':') {
            Some((first, second)) => (first, second),
            None => (cells, cells),
        };
        let first = CellRef::parse(first).ok_or_else(|| invalid("expected A1 notation"))?;
        let second = CellRef::parse(second).ok_or_else(|| invalid("expected A1 notation"))?;

        // 統一成左上 / 右下
        let start = CellRef::new(first.row.min(second.row), first.col.min(second.col));
        let end = CellRef::new(first.row.max(second.row), first.col.max(second.col));

        Ok(Self { sheet, start, end })
    }

    /// True when the normalized start and end references differ.
    pub fn is_range(&self) -> bool {
        self.start != self.end
    }

    pub fn row(&self) -> u32 {
        self.start.row
    }

    pub fn col(&self) -> u32 {
        self.start.col
    }

    pub fn row_count(&self) -> u32 {
        self.end.row - self.start.row + 1
    }

    pub fn col_count(&self) -> u32 {
        self.end.col - self.start.col + 1
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(sheet) = &self.sheet {
            if sheet.chars().all(|c| c.is_alphanumeric() || c == '_') {
                write!(f, "{}!", sheet)?;
            } else {
                write!(f, "'{}'!", sheet.replace('\'', "''"))?;
            }
        }
        if self.is_range() {
            write!(f, "{}:{}", self.start, self.end)
        } else {
            write!(f, "{}", self.start)
        }
    }
}

impl TryFrom<String> for CellAddress {
    type Error = ServiceError;

    fn try_from(value: String) -> Result<Self> {
        CellAddress::parse(&value)
    }
}

impl From<CellAddress> for String {
    fn from(address: CellAddress) -> Self {
        address.to_string()
    }
}

/// Value used when the caller omits an optional input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultValue {
    /// Coerced exactly like a caller-supplied value.
    Literal(Value),
    /// Blank the target cell instead of writing a value.
    Clear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    pub address: CellAddress,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub allowed_values: Option<Vec<Value>>,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub default: Option<DefaultValue>,
    #[serde(default)]
    pub percentage: bool,
    #[serde(default)]
    pub format: Option<String>,
}

impl ParameterDefinition {
    pub fn new(name: &str, address: &str, param_type: ParamType) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            title: None,
            address: CellAddress::parse(address)?,
            param_type,
            mandatory: false,
            min: None,
            max: None,
            allowed_values: None,
            case_sensitive: false,
            default: None,
            percentage: false,
            format: None,
        })
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_allowed_values(mut self, values: Vec<Value>, case_sensitive: bool) -> Self {
        self.allowed_values = Some(values);
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn as_percentage(mut self) -> Self {
        self.percentage = true;
        self
    }

    pub fn with_format(mut self, format: &str) -> Self {
        self.format = Some(format.to_string());
        self
    }

    /// Display title, falling back to the parameter name.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }

    /// Both bounds declared and inside `[0, 1]`.
    pub fn has_fractional_bounds(&self) -> bool {
        matches!(
            (self.min, self.max),
            (Some(min), Some(max)) if (0.0..=1.0).contains(&min) && (0.0..=1.0).contains(&max)
        )
    }

    pub fn implies_percentage(&self) -> bool {
        self.percentage || self.has_fractional_bounds()
    }
}

/// Where the serialized spreadsheet model lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource {
    Inline(String),
    File(PathBuf),
}

impl ModelSource {
    pub fn read(&self) -> Result<Vec<u8>> {
        match self {
            ModelSource::Inline(text) => Ok(text.as_bytes().to_vec()),
            ModelSource::File(path) => std::fs::read(path).map_err(|e| ServiceError::ModelError {
                message: format!("cannot read model file {}: {}", path.display(), e),
            }),
        }
    }
}

/// Lowercase and drop spaces, underscores and hyphens.
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// How a caller key matched a definition; lower ranks win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchRank {
    ExactName,
    NormalizedName,
    ExactTitle,
    NormalizedTitle,
}

/// Lookup tables from caller-facing keys to input definition positions.
#[derive(Debug, Clone, Default)]
pub struct SchemaIndex {
    exact_name: HashMap<String, usize>,
    normalized_name: HashMap<String, usize>,
    exact_title: HashMap<String, usize>,
    normalized_title: HashMap<String, usize>,
}

impl SchemaIndex {
    pub fn build(definitions: &[ParameterDefinition]) -> Self {
        let mut index = Self::default();
        // 名稱衝突時，先宣告的定義優先
        for (position, definition) in definitions.iter().enumerate() {
            index
                .exact_name
                .entry(definition.name.clone())
                .or_insert(position);
            index
                .normalized_name
                .entry(normalize_key(&definition.name))
                .or_insert(position);
            if let Some(title) = &definition.title {
                index.exact_title.entry(title.clone()).or_insert(position);
                index
                    .normalized_title
                    .entry(normalize_key(title))
                    .or_insert(position);
            }
        }
        index
    }

    /// Resolve a caller key to `(definition position, match rank)`.
    pub fn lookup(&self, key: &str) -> Option<(usize, MatchRank)> {
        if let Some(&position) = self.exact_name.get(key) {
            return Some((position, MatchRank::ExactName));
        }
        let normalized = normalize_key(key);
        if let Some(&position) = self.normalized_name.get(&normalized) {
            return Some((position, MatchRank::NormalizedName));
        }
        if let Some(&position) = self.exact_title.get(key) {
            return Some((position, MatchRank::ExactTitle));
        }
        self.normalized_title
            .get(&normalized)
            .map(|&position| (position, MatchRank::NormalizedTitle))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    inputs: Vec<ParameterDefinition>,
    #[serde(default)]
    outputs: Vec<ParameterDefinition>,
    pub model: ModelSource,
    #[serde(skip)]
    index: OnceLock<SchemaIndex>,
}

impl ServiceDescriptor {
    pub fn new(
        id: &str,
        name: &str,
        inputs: Vec<ParameterDefinition>,
        outputs: Vec<ParameterDefinition>,
        model: ModelSource,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            inputs,
            outputs,
            model,
            index: OnceLock::new(),
        }
    }

    pub fn inputs(&self) -> &[ParameterDefinition] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[ParameterDefinition] {
        &self.outputs
    }

    /// Normalized-key index over the inputs, built on first use.
    pub fn input_index(&self) -> &SchemaIndex {
        self.index.get_or_init(|| SchemaIndex::build(&self.inputs))
    }
}

/// Metadata accompanying a request, forwarded to telemetry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestInfo {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionRequest {
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(default)]
    pub request: RequestInfo,
}

/// A value held by a spreadsheet cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
    Error(String),
}

impl CellValue {
    pub fn to_json(&self) -> Value {
        match self {
            CellValue::Empty => Value::Null,
            CellValue::Number(n) => number_to_json(*n),
            CellValue::Text(s) | CellValue::Error(s) => Value::String(s.clone()),
            CellValue::Bool(b) => Value::Bool(*b),
        }
    }
}

/// Integral values inside the exactly-representable range become JSON integers.
pub fn number_to_json(n: f64) -> Value {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    if n.fract() == 0.0 && n.abs() < MAX_EXACT {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedInput {
    pub name: String,
    pub title: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedOutput {
    pub name: String,
    pub title: String,
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub format_string: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    /// Milliseconds.
    pub execution_time: u64,
    pub cached: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub service_id: String,
    pub service_name: String,
    pub inputs: Vec<ResolvedInput>,
    pub outputs: Vec<ResolvedOutput>,
    pub metadata: ExecutionMetadata,
}

impl ExecutionResult {
    pub fn output(&self, name: &str) -> Option<&Value> {
        self.outputs.iter().find(|o| o.name == name).map(|o| &o.value)
    }

    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.iter().find(|i| i.name == name).map(|i| &i.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    #[serde(rename = "CALCULATION_ERROR")]
    Calculation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Calculation => "CALCULATION_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldErrorKind {
    TypeMismatch,
    BelowMinimum,
    AboveMaximum,
    InvalidEnumValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub kind: FieldErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub allowed: Option<Vec<Value>>,
}

/// Error payload of a failed execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{error}: {message}")]
pub struct ExecutionError {
    pub error: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<Value>,
}

impl ExecutionError {
    pub fn missing_parameters(names: Vec<String>) -> Self {
        Self {
            error: ErrorKind::Validation,
            message: format!("Missing required parameters: {}", names.join(", ")),
            details: Some(serde_json::json!({ "missing": names })),
        }
    }

    pub fn invalid_parameters(errors: Vec<FieldError>) -> Self {
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        let message = format!("Invalid parameters: {}", fields.join(", "));
        Self {
            error: ErrorKind::Validation,
            message,
            details: Some(serde_json::json!({ "errors": errors })),
        }
    }

    pub fn calculation(message: impl Into<String>) -> Self {
        Self {
            error: ErrorKind::Calculation,
            message: message.into(),
            details: None,
        }
    }

    /// Names listed under `details.missing`, if any.
    pub fn missing(&self) -> Vec<String> {
        self.details
            .as_ref()
            .and_then(|d| d.get("missing"))
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Entries listed under `details.errors`, if any.
    pub fn field_errors(&self) -> Vec<FieldError> {
        self.details
            .as_ref()
            .and_then(|d| d.get("errors"))
            .and_then(|errors| serde_json::from_value(errors.clone()).ok())
            .unwrap_or_default()
    }
}

/// Either response shape; they are told apart by the presence of `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecutionResponse {
    Failure(ExecutionError),
    Success(ExecutionResult),
}

impl From<std::result::Result<ExecutionResult, ExecutionError>> for ExecutionResponse {
    fn from(outcome: std::result::Result<ExecutionResult, ExecutionError>) -> Self {
        match outcome {
            Ok(result) => ExecutionResponse::Success(result),
            Err(error) => ExecutionResponse::Failure(error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
}

/// One telemetry record per execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub service_id: String,
    pub status: ExecutionStatus,
    pub execution_time_ms: u64,
    pub cached: bool,
    pub error_kind: Option<ErrorKind>,
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_single_cell_address() {
        let address = CellAddress::parse("Inputs!$B$2").unwrap();
        assert_eq!(address.sheet.as_deref(), Some("Inputs"));
        assert_eq!(address.start, CellRef::new(2, 2));
        assert!(!address.is_range());
        assert_eq!(address.to_string(), "Inputs!B2");
    }

    #[test]
    fn test_parse_range_address_normalizes_corners() {
        let address = CellAddress::parse("'Rate Table'!c5:b2").unwrap();
        assert_eq!(address.sheet.as_deref(), Some("Rate Table"));
        assert_eq!(address.start, CellRef::new(2, 2));
        assert_eq!(address.end, CellRef::new(5, 3));
        assert!(address.is_range());
        assert_eq!(address.row_count(), 4);
        assert_eq!(address.col_count(), 2);
        assert_eq!(address.to_string(), "'Rate Table'!B2:C5");
    }

    #[test]
    fn test_degenerate_range_is_single_cell() {
        let address = CellAddress::parse("A1:$A$1").unwrap();
        assert!(!address.is_range());
        assert!(address.sheet.is_none());
    }

    #[test]
    fn test_invalid_addresses() {
        assert!(CellAddress::parse("Inputs!").is_err());
        assert!(CellAddress::parse("!A1").is_err());
        assert!(CellAddress::parse("A0").is_err());
        assert!(CellAddress::parse("12").is_err());
    }

    #[test]
    fn test_column_letters() {
        assert_eq!(CellRef::col_to_letters(1), "A");
        assert_eq!(CellRef::col_to_letters(26), "Z");
        assert_eq!(CellRef::col_to_letters(27), "AA");
        assert_eq!(CellRef::parse("AA10"), Some(CellRef::new(10, 27)));
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("Interest_Rate"), "interestrate");
        assert_eq!(normalize_key("interest-rate"), "interestrate");
        assert_eq!(normalize_key("Interest Rate"), "interestrate");
    }

    #[test]
    fn test_schema_index_ranks() {
        let definitions = vec![
            ParameterDefinition::new("interest_rate", "B1", ParamType::Number)
                .unwrap()
                .with_title("Annual Rate"),
            ParameterDefinition::new("years", "B2", ParamType::Number).unwrap(),
        ];
        let index = SchemaIndex::build(&definitions);

        assert_eq!(index.lookup("interest_rate"), Some((0, MatchRank::ExactName)));
        assert_eq!(index.lookup("Interest-Rate"), Some((0, MatchRank::NormalizedName)));
        assert_eq!(index.lookup("Annual Rate"), Some((0, MatchRank::ExactTitle)));
        assert_eq!(index.lookup("annual_rate"), Some((0, MatchRank::NormalizedTitle)));
        assert_eq!(index.lookup("YEARS"), Some((1, MatchRank::NormalizedName)));
        assert_eq!(index.lookup("months"), None);
    }

    #[test]
    fn test_default_value_serde_shapes() {
        let literal: DefaultValue = serde_json::from_value(json!({ "literal": 30 })).unwrap();
        assert_eq!(literal, DefaultValue::Literal(json!(30)));
        let clear: DefaultValue = serde_json::from_value(json!("clear")).unwrap();
        assert_eq!(clear, DefaultValue::Clear);
    }

    #[test]
    fn test_number_to_json_prefers_integers() {
        assert_eq!(number_to_json(30.0), json!(30));
        assert_eq!(number_to_json(0.05), json!(0.05));
        assert_eq!(number_to_json(f64::NAN), Value::Null);
    }

    #[test]
    fn test_error_shape_serialization() {
        let error = ExecutionError::missing_parameters(vec!["rate".to_string()]);
        let value = serde_json::to_value(&error).unwrap();
        assert_eq!(value["error"], json!("VALIDATION_ERROR"));
        assert_eq!(value["details"]["missing"], json!(["rate"]));
        assert_eq!(error.missing(), vec!["rate".to_string()]);
    }
}
