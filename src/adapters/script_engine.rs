//! In-process calculation engine backed by Rhai expressions.
//!
//! A model is a JSON document:
//!
//! ```json
//! {
//!   "active_sheet": "Inputs",
//!   "sheets": [
//!     { "name": "Inputs", "cells": { "B2": 0.05, "B3": 30 } },
//!     { "name": "Calc", "cells": { "B2": "=Inputs!B2 * 100", "B3": "=SUM(Inputs!B2:B3)" } }
//!   ]
//! }
//! ```
//!
//! Strings starting with `=` are formulas. Before compilation, `A1` references become
//! `CELL(sheet, row, col)` calls and `SUM/AVG/AVERAGE/MIN/MAX/COUNT(A1:B5)` become
//! `*_RANGE(sheet, r1, c1, r2, c2)` calls. Everything else is plain Rhai, so use float
//! literals (`12.0`) where integer division would surprise.

use crate::domain::model::{CellRef, CellValue};
use crate::domain::ports::{CalculationEngine, LoadOptions, Workbook};
use crate::utils::error::{Result, ServiceError};
use regex::{Captures, Regex};
use dashmap::DashMap;
use rhai::{Dynamic, Engine, EvalAltResult, ImmutableString, AST};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

pub const DEFAULT_MAX_ROWS: u32 = 1_048_576;
pub const DEFAULT_MAX_COLS: u32 = 16_384;

const CYCLE_ERROR: &str = "#CYCLE!";
const NUM_ERROR: &str = "#NUM!";

type CellKey = (usize, u32, u32);
type Values = Arc<DashMap<CellKey, CellValue>>;
type SheetIndex = Arc<HashMap<String, usize>>;

#[derive(Debug, Deserialize)]
struct ModelDocument {
    #[serde(default)]
    active_sheet: Option<String>,
    sheets: Vec<SheetDocument>,
}

#[derive(Debug, Deserialize)]
struct SheetDocument {
    name: String,
    #[serde(default)]
    rows: Option<u32>,
    #[serde(default)]
    cols: Option<u32>,
    #[serde(default)]
    cells: BTreeMap<String, Value>,
}

#[derive(Debug, Clone)]
struct Sheet {
    name: String,
    rows: u32,
    cols: u32,
}

struct Formula {
    key: CellKey,
    ast: AST,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptEngine;

impl ScriptEngine {
    pub fn new() -> Self {
        Self
    }
}

impl CalculationEngine for ScriptEngine {
    type Workbook = ScriptWorkbook;

    fn load(&self, model: &[u8], options: &LoadOptions) -> Result<ScriptWorkbook> {
        let document: ModelDocument = serde_json::from_slice(model).map_err(|e| ServiceError::ModelError {
            message: format!("invalid model document: {}", e),
        })?;
        ScriptWorkbook::from_document(document, options)
    }
}

/// Workbook whose formula cells are compiled Rhai expressions.
pub struct ScriptWorkbook {
    sheets: Vec<Sheet>,
    sheet_index: SheetIndex,
    active: usize,
    /// Sheet that was active when the model was loaded.
    default_sheet: usize,
    values: Values,
    formulas: Vec<Formula>,
    engine: Engine,
    dirty: AtomicBool,
}

impl ScriptWorkbook {
    fn from_document(document: ModelDocument, options: &LoadOptions) -> Result<Self> {
        if document.sheets.is_empty() {
            return Err(ServiceError::ModelError {
                message: "model has no sheets".to_string(),
            });
        }

        let sheets: Vec<Sheet> = document
            .sheets
            .iter()
            .map(|sheet| Sheet {
                name: sheet.name.clone(),
                rows: sheet.rows.unwrap_or(DEFAULT_MAX_ROWS),
                cols: sheet.cols.unwrap_or(DEFAULT_MAX_COLS),
            })
            .collect();
        let mut by_name = HashMap::new();
        for (position, sheet) in sheets.iter().enumerate() {
            if by_name.insert(sheet.name.clone(), position).is_some() {
                return Err(ServiceError::ModelError {
                    message: format!("duplicate sheet '{}'", sheet.name),
                });
            }
        }
        let sheet_index: SheetIndex = Arc::new(by_name);

        let active = match &document.active_sheet {
            Some(name) => *sheet_index
                .get(name)
                .ok_or_else(|| ServiceError::SheetNotFound { sheet: name.clone() })?,
            None => 0,
        };

        let values: Values = Arc::new(DashMap::new());
        let engine = create_engine(Arc::clone(&values), Arc::clone(&sheet_index));

        let mut formulas = Vec::new();
        for (position, sheet) in document.sheets.iter().enumerate() {
            for (reference, raw) in &sheet.cells {
                let at = CellRef::parse(reference).ok_or_else(|| {
                    ServiceError::ModelError {
                        message: format!("invalid cell reference '{}!{}'", sheet.name, reference),
                    }
                })?;
                let key = (position, at.row, at.col);
                match raw {
                    Value::String(text) if text.starts_with('=') => {
                        let script = preprocess_formula(&text[1..], &sheet.name);
                        let ast = engine.compile_expression(&script).map_err(|e| {
                            ServiceError::ModelError {
                                message: format!(
                                    "formula in {}!{} does not compile: {}",
                                    sheet.name, reference, e
                                ),
                            }
                        })?;
                        formulas.push(Formula { key, ast });
                    }
                    Value::Null => {}
                    Value::String(text) => {
                        values.insert(key, CellValue::Text(text.clone()));
                    }
                    Value::Bool(b) => {
                        values.insert(key, CellValue::Bool(*b));
                    }
                    Value::Number(n) => {
                        values.insert(key, CellValue::Number(n.as_f64().unwrap_or_default()));
                    }
                    other => {
                        return Err(ServiceError::ModelError {
                            message: format!(
                                "unsupported literal in {}!{}: {}",
                                sheet.name, reference, other
                            ),
                        });
                    }
                }
            }
        }

        let workbook = Self {
            sheets,
            sheet_index,
            active,
            default_sheet: active,
            values,
            formulas,
            engine,
            dirty: AtomicBool::new(true),
        };
        if options.recalculate_on_load {
            workbook.settle()?;
        }
        tracing::debug!(
            "Loaded script workbook with {} sheet(s) and {} formula(s)",
            workbook.sheets.len(),
            workbook.formulas.len()
        );
        Ok(workbook)
    }

    pub fn formula_count(&self) -> usize {
        self.formulas.len()
    }

    /// Recalculate if a write happened since the last recalculation.
    fn settle(&self) -> Result<()> {
        if self.dirty.swap(false, Ordering::AcqRel) {
            self.recalculate()?;
        }
        Ok(())
    }

    /// Evaluate every formula until no value changes. Formulas still changing after
    /// `formulas + 1` passes are part of a cycle.
    fn recalculate(&self) -> Result<()> {
        let max_passes = self.formulas.len() + 1;
        let mut changed: Vec<CellKey> = Vec::new();

        for _ in 0..max_passes {
            changed.clear();
            for formula in &self.formulas {
                let value = match self.engine.eval_ast::<Dynamic>(&formula.ast) {
                    Ok(result) => dynamic_to_cell(result),
                    Err(e) => CellValue::Error(format!("#ERROR: {}", e)),
                };
                let current = self
                    .values
                    .get(&formula.key)
                    .map(|entry| entry.value().clone())
                    .unwrap_or(CellValue::Empty);
                if current != value {
                    self.values.insert(formula.key, value);
                    changed.push(formula.key);
                }
            }
            if changed.is_empty() {
                return Ok(());
            }
        }

        // 仍在變動的公式視為循環參照
        for key in &changed {
            self.values.insert(*key, CellValue::Error(CYCLE_ERROR.to_string()));
        }
        tracing::warn!("⚠️ {} formula(s) did not settle (circular reference)", changed.len());
        Ok(())
    }

    fn check_bounds(&self, row: u32, col: u32) -> Result<()> {
        let sheet = &self.sheets[self.active];
        if row == 0 || col == 0 || row > sheet.rows || col > sheet.cols {
            return Err(ServiceError::OutOfBounds {
                sheet: sheet.name.clone(),
                row,
                col,
                rows: sheet.rows,
                cols: sheet.cols,
            });
        }
        Ok(())
    }
}

impl Workbook for ScriptWorkbook {
    fn active_sheet_name(&self) -> &str {
        &self.sheets[self.active].name
    }

    fn default_sheet_name(&self) -> &str {
        &self.sheets[self.default_sheet].name
    }

    fn has_sheet(&self, name: &str) -> bool {
        self.sheet_index.contains_key(name)
    }

    fn activate_sheet(&mut self, name: &str) -> Result<()> {
        self.active = *self
            .sheet_index
            .get(name)
            .ok_or_else(|| ServiceError::SheetNotFound {
                sheet: name.to_string(),
            })?;
        Ok(())
    }

    fn dimensions(&self) -> (u32, u32) {
        let sheet = &self.sheets[self.active];
        (sheet.rows, sheet.cols)
    }

    fn cell_value(&self, row: u32, col: u32) -> Result<CellValue> {
        self.check_bounds(row, col)?;
        self.settle()?;
        Ok(self
            .values
            .get(&(self.active, row, col))
            .map(|entry| entry.value().clone())
            .unwrap_or(CellValue::Empty))
    }

    fn set_cell_value(&mut self, row: u32, col: u32, value: CellValue) -> Result<()> {
        self.check_bounds(row, col)?;
        let key = (self.active, row, col);

        // 寫入常數會覆蓋原本的公式
        self.formulas.retain(|formula| formula.key != key);
        match value {
            CellValue::Empty => {
                self.values.remove(&key);
            }
            other => {
                self.values.insert(key, other);
            }
        }
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }
}

fn dynamic_to_cell(value: Dynamic) -> CellValue {
    if value.is_unit() {
        return CellValue::Empty;
    }
    if let Ok(b) = value.as_bool() {
        return CellValue::Bool(b);
    }
    if let Ok(n) = value.as_float() {
        return if n.is_finite() {
            CellValue::Number(n)
        } else {
            CellValue::Error(NUM_ERROR.to_string())
        };
    }
    if let Ok(n) = value.as_int() {
        return CellValue::Number(n as f64);
    }
    if value.is_string() {
        return value
            .into_string()
            .map(CellValue::Text)
            .unwrap_or_else(|e| CellValue::Error(e.to_string()));
    }
    CellValue::Text(value.to_string())
}

fn cell_to_dynamic(value: Option<&CellValue>) -> Dynamic {
    match value {
        None | Some(CellValue::Empty) => Dynamic::from_float(0.0),
        Some(CellValue::Number(n)) => Dynamic::from_float(*n),
        Some(CellValue::Text(s)) | Some(CellValue::Error(s)) => Dynamic::from(s.clone()),
        Some(CellValue::Bool(b)) => Dynamic::from_bool(*b),
    }
}

fn resolve_sheet(
    sheets: &SheetIndex,
    sheet: &str,
) -> std::result::Result<usize, Box<EvalAltResult>> {
    sheets
        .get(sheet)
        .copied()
        .ok_or_else(|| format!("unknown sheet '{}'", sheet).into())
}

/// Numeric values of a rectangular block; non-numeric cells are skipped.
fn range_numbers(
    values: &Values,
    sheets: &SheetIndex,
    sheet: &str,
    bounds: (i64, i64, i64, i64),
) -> std::result::Result<Vec<f64>, Box<EvalAltResult>> {
    let position = resolve_sheet(sheets, sheet)?;
    let (r1, c1, r2, c2) = bounds;
    let mut numbers = Vec::new();
    for row in r1.min(r2)..=r1.max(r2) {
        for col in c1.min(c2)..=c1.max(c2) {
            if let Some(entry) = values.get(&(position, row as u32, col as u32)) {
                if let CellValue::Number(n) = entry.value() {
                    numbers.push(*n);
                }
            }
        }
    }
    Ok(numbers)
}

fn create_engine(values: Values, sheets: SheetIndex) -> Engine {
    let mut engine = Engine::new();

    let (cell_values, cell_sheets) = (Arc::clone(&values), Arc::clone(&sheets));
    engine.register_fn(
        "CELL",
        move |sheet: ImmutableString, row: i64, col: i64| -> std::result::Result<Dynamic, Box<EvalAltResult>> {
            let position = resolve_sheet(&cell_sheets, &sheet)?;
            let entry = cell_values.get(&(position, row as u32, col as u32));
            Ok(cell_to_dynamic(entry.as_deref()))
        },
    );

    let (sum_values, sum_sheets) = (Arc::clone(&values), Arc::clone(&sheets));
    engine.register_fn(
        "SUM_RANGE",
        move |sheet: ImmutableString, r1: i64, c1: i64, r2: i64, c2: i64| -> std::result::Result<f64, Box<EvalAltResult>> {
            let numbers = range_numbers(&sum_values, &sum_sheets, &sheet, (r1, c1, r2, c2))?;
            Ok(numbers.iter().sum())
        },
    );

    let (avg_values, avg_sheets) = (Arc::clone(&values), Arc::clone(&sheets));
    engine.register_fn(
        "AVG_RANGE",
        move |sheet: ImmutableString, r1: i64, c1: i64, r2: i64, c2: i64| -> std::result::Result<f64, Box<EvalAltResult>> {
            let numbers = range_numbers(&avg_values, &avg_sheets, &sheet, (r1, c1, r2, c2))?;
            if numbers.is_empty() {
                return Err("AVERAGE of an empty range".into());
            }
            Ok(numbers.iter().sum::<f64>() / numbers.len() as f64)
        },
    );

    let (min_values, min_sheets) = (Arc::clone(&values), Arc::clone(&sheets));
    engine.register_fn(
        "MIN_RANGE",
        move |sheet: ImmutableString, r1: i64, c1: i64, r2: i64, c2: i64| -> std::result::Result<f64, Box<EvalAltResult>> {
            let numbers = range_numbers(&min_values, &min_sheets, &sheet, (r1, c1, r2, c2))?;
            Ok(numbers.into_iter().reduce(f64::min).unwrap_or(0.0))
        },
    );

    let (max_values, max_sheets) = (Arc::clone(&values), Arc::clone(&sheets));
    engine.register_fn(
        "MAX_RANGE",
        move |sheet: ImmutableString, r1: i64, c1: i64, r2: i64, c2: i64| -> std::result::Result<f64, Box<EvalAltResult>> {
            let numbers = range_numbers(&max_values, &max_sheets, &sheet, (r1, c1, r2, c2))?;
            Ok(numbers.into_iter().reduce(f64::max).unwrap_or(0.0))
        },
    );

    let (count_values, count_sheets) = (values, sheets);
    engine.register_fn(
        "COUNT_RANGE",
        move |sheet: ImmutableString, r1: i64, c1: i64, r2: i64, c2: i64| -> std::result::Result<f64, Box<EvalAltResult>> {
            let numbers = range_numbers(&count_values, &count_sheets, &sheet, (r1, c1, r2, c2))?;
            Ok(numbers.len() as f64)
        },
    );

    // PMT(rate, periods, present_value): periodic payment, negative like the spreadsheet function
    engine.register_fn("PMT", |rate: f64, periods: f64, present_value: f64| -> f64 {
        if rate == 0.0 {
            -present_value / periods
        } else {
            -present_value * rate / (1.0 - (1.0 + rate).powf(-periods))
        }
    });

    engine.register_fn("ROUND", |value: f64, digits: i64| -> f64 {
        let factor = 10f64.powi(digits as i32);
        (value * factor).round() / factor
    });

    engine
}

fn range_fn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(SUM|AVERAGE|AVG|MIN|MAX|COUNT)\(\s*(?:('[^']+'|[A-Za-z_][A-Za-z0-9_]*)!)?(\$?[A-Za-z]{1,3}\$?[0-9]+):(\$?[A-Za-z]{1,3}\$?[0-9]+)\s*\)",
        )
        .expect("range function regex must compile")
    })
}

fn cell_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:('[^']+'|[A-Za-z_][A-Za-z0-9_]*)!)?(\$?[A-Za-z]{1,3}\$?[0-9]+)\b")
            .expect("cell reference regex must compile")
    })
}

fn sheet_literal(prefix: Option<&str>, own_sheet: &str) -> String {
    let name = prefix
        .map(|p| p.trim_matches('\''))
        .unwrap_or(own_sheet);
    format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Rewrite spreadsheet references into calls to the registered built-ins.
pub fn preprocess_formula(formula: &str, own_sheet: &str) -> String {
    let with_ranges = range_fn_re().replace_all(formula, |caps: &Captures| {
        let name = match &caps[1] {
            "SUM" => "SUM_RANGE",
            "AVERAGE" | "AVG" => "AVG_RANGE",
            "MIN" => "MIN_RANGE",
            "MAX" => "MAX_RANGE",
            _ => "COUNT_RANGE",
        };
        match (
            CellRef::parse(&caps[3]),
            CellRef::parse(&caps[4]),
        ) {
            (Some(start), Some(end)) => format!(
                "{}({}, {}, {}, {}, {})",
                name,
                sheet_literal(caps.get(2).map(|m| m.as_str()), own_sheet),
                start.row,
                start.col,
                end.row,
                end.col
            ),
            _ => caps[0].to_string(),
        }
    });

    // 只替換字串常值以外的片段
    with_ranges
        .split('"')
        .enumerate()
        .map(|(i, segment)| {
            if i % 2 == 1 {
                segment.to_string()
            } else {
                replace_cell_refs(segment, own_sheet)
            }
        })
        .collect::<Vec<_>>()
        .join("\"")
}

fn replace_cell_refs(segment: &str, own_sheet: &str) -> String {
    let mut output = String::with_capacity(segment.len());
    let mut last = 0;
    for caps in cell_ref_re().captures_iter(segment) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let before = segment[..whole.start()].chars().next_back();
        let after = segment[whole.end()..].chars().next();
        let inside_identifier = before.is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.');
        let is_call = after.is_some_and(|c| c == '(');
        let Some(at) = CellRef::parse(&caps[2]) else {
            continue;
        };
        if inside_identifier || is_call {
            continue;
        }
        output.push_str(&segment[last..whole.start()]);
        output.push_str(&format!(
            "CELL({}, {}, {})",
            sheet_literal(caps.get(1).map(|m| m.as_str()), own_sheet),
            at.row,
            at.col
        ));
        last = whole.end();
    }
    output.push_str(&segment[last..]);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r#"{
        "active_sheet": "Inputs",
        "sheets": [
            { "name": "Inputs", "cells": { "B1": 0.05, "B2": 30.0, "B3": 100000.0, "A5": "label" } },
            { "name": "Calc", "rows": 50, "cols": 10, "cells": {
                "B1": "=Inputs!B1 * 100.0",
                "B2": "=B1 + 1.0",
                "B3": "=SUM(Inputs!B1:B3)",
                "B4": "=ROUND(-PMT(Inputs!B1 / 12.0, Inputs!B2 * 12.0, Inputs!B3), 2)",
                "B5": "=\"Total: \" + Inputs!A5"
            } }
        ]
    }"#;

    fn load(recalculate: bool) -> ScriptWorkbook {
        ScriptEngine::new()
            .load(
                MODEL.as_bytes(),
                &LoadOptions {
                    recalculate_on_load: recalculate,
                },
            )
            .unwrap()
    }

    fn number(workbook: &ScriptWorkbook, row: u32, col: u32) -> f64 {
        match workbook.cell_value(row, col).unwrap() {
            CellValue::Number(n) => n,
            other => panic!("expected number, got {:?}", other),
        }
    }

    #[test]
    fn test_preprocess_cell_refs() {
        assert_eq!(
            preprocess_formula("Inputs!B2 * $C$3", "Calc"),
            "CELL(\"Inputs\", 2, 2) * CELL(\"Calc\", 3, 3)"
        );
        assert_eq!(
            preprocess_formula("'Rate Table'!A1 + 1", "Calc"),
            "CELL(\"Rate Table\", 1, 1) + 1"
        );
    }

    #[test]
    fn test_preprocess_leaves_strings_and_calls_alone() {
        assert_eq!(preprocess_formula("\"A1\" + LOG10(B2)", "S"), "\"A1\" + LOG10(CELL(\"S\", 2, 2))");
    }

    #[test]
    fn test_preprocess_ranges() {
        assert_eq!(
            preprocess_formula("SUM(Data!A1:B3) + AVERAGE(C1:C2)", "Calc"),
            "SUM_RANGE(\"Data\", 1, 1, 3, 2) + AVG_RANGE(\"Calc\", 1, 3, 2, 3)"
        );
    }

    #[test]
    fn test_formulas_evaluate_lazily() {
        let mut workbook = load(false);
        workbook.activate_sheet("Calc").unwrap();
        assert!((number(&workbook, 1, 2) - 5.0).abs() < 1e-9);
        assert!((number(&workbook, 2, 2) - 6.0).abs() < 1e-9);
        assert!((number(&workbook, 3, 2) - 100030.05).abs() < 1e-6);
        assert!((number(&workbook, 4, 2) - 536.82).abs() < 1e-9);
        assert_eq!(workbook.cell_value(5, 2).unwrap(), CellValue::Text("Total: label".into()));
    }

    #[test]
    fn test_write_recalculates_dependents() {
        let mut workbook = load(true);
        workbook.set_cell_value(1, 2, CellValue::Number(0.07)).unwrap();
        workbook.activate_sheet("Calc").unwrap();
        assert!((number(&workbook, 1, 2) - 7.0).abs() < 1e-9);
        assert!((number(&workbook, 2, 2) - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_overwriting_formula_with_constant() {
        let mut workbook = load(false);
        workbook.activate_sheet("Calc").unwrap();
        assert_eq!(workbook.formula_count(), 5);
        workbook.set_cell_value(1, 2, CellValue::Number(1.0)).unwrap();
        assert_eq!(workbook.formula_count(), 4);
        assert!((number(&workbook, 2, 2) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_dimensions_and_bounds() {
        let mut workbook = load(false);
        assert_eq!(workbook.dimensions(), (DEFAULT_MAX_ROWS, DEFAULT_MAX_COLS));
        workbook.activate_sheet("Calc").unwrap();
        assert_eq!(workbook.dimensions(), (50, 10));
        assert!(matches!(
            workbook.cell_value(51, 1),
            Err(ServiceError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_unknown_sheet() {
        let mut workbook = load(false);
        assert!(!workbook.has_sheet("Summary"));
        assert!(matches!(
            workbook.activate_sheet("Summary"),
            Err(ServiceError::SheetNotFound { .. })
        ));
    }

    #[test]
    fn test_default_sheet_survives_activation() {
        let mut workbook = load(false);
        assert_eq!(workbook.default_sheet_name(), "Inputs");
        workbook.activate_sheet("Calc").unwrap();
        assert_eq!(workbook.active_sheet_name(), "Calc");
        assert_eq!(workbook.default_sheet_name(), "Inputs");
    }

    #[test]
    fn test_circular_reference_is_flagged() {
        let model = r#"{ "sheets": [ { "name": "S", "cells": { "A1": "=B1 + 1.0", "B1": "=A1 + 1.0" } } ] }"#;
        let workbook = ScriptEngine::new()
            .load(model.as_bytes(), &LoadOptions::default())
            .unwrap();
        assert_eq!(workbook.cell_value(1, 1).unwrap(), CellValue::Error(CYCLE_ERROR.into()));
    }

    #[test]
    fn test_invalid_models() {
        let engine = ScriptEngine::new();
        let options = LoadOptions::default();
        assert!(engine.load(b"not json", &options).is_err());
        assert!(engine.load(br#"{ "sheets": [] }"#, &options).is_err());
        assert!(engine
            .load(br#"{ "sheets": [ { "name": "S", "cells": { "A1": "=1 +" } } ] }"#, &options)
            .is_err());
        assert!(engine
            .load(br#"{ "sheets": [ { "name": "S", "cells": { "??": 1 } } ] }"#, &options)
            .is_err());
        assert!(engine
            .load(br#"{ "active_sheet": "X", "sheets": [ { "name": "S" } ] }"#, &options)
            .is_err());
    }
}
