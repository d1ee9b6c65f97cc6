//! Writes coerced inputs into a cached workbook and reads the output cells back.
//!
//! The orchestrator never asks the engine to recalculate: engines recalculate
//! dependents as a side effect of cell writes.

use crate::core::coercion::{CoercedInput, InputValue};
use crate::domain::model::{CellAddress, CellValue, ParameterDefinition, ResolvedOutput, ServiceDescriptor};
use crate::domain::ports::Workbook;
use crate::utils::error::{Result, ServiceError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;

/// How long a calculation holds the cached workbook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    /// One lock for the whole write/read cycle: at most one calculation per workbook.
    #[default]
    PerExecution,
    /// One lock per cell or range operation. Concurrent executions against the same
    /// service may observe each other's inputs.
    PerOperation,
}

/// Scoped access to a workbook for a single operation.
pub trait WorkbookAccess {
    type Workbook: Workbook;

    fn with<R>(&mut self, operation: impl FnOnce(&mut Self::Workbook) -> Result<R>) -> Result<R>;
}

/// Access through a lock the caller already holds for the whole calculation.
pub struct Exclusive<'a, W>(pub &'a mut W);

impl<W: Workbook> WorkbookAccess for Exclusive<'_, W> {
    type Workbook = W;

    fn with<R>(&mut self, operation: impl FnOnce(&mut W) -> Result<R>) -> Result<R> {
        operation(&mut *self.0)
    }
}

/// Access that takes the workbook lock separately for every operation.
pub struct PerOperation<'a, W>(pub &'a Mutex<W>);

impl<W: Workbook> WorkbookAccess for PerOperation<'_, W> {
    type Workbook = W;

    fn with<R>(&mut self, operation: impl FnOnce(&mut W) -> Result<R>) -> Result<R> {
        let mut workbook = self
            .0
            .lock()
            .map_err(|_| ServiceError::engine("workbook lock poisoned by an earlier failure"))?;
        operation(&mut *workbook)
    }
}

/// Apply every input, then read every output of `service`, in declaration order.
pub fn run_calculation<A: WorkbookAccess>(
    access: &mut A,
    service: &ServiceDescriptor,
    inputs: &[CoercedInput<'_>],
) -> Result<Vec<ResolvedOutput>> {
    for input in inputs {
        access.with(|workbook| write_input(workbook, input))?;
    }

    let mut outputs = Vec::with_capacity(service.outputs().len());
    for definition in service.outputs() {
        let value = access.with(|workbook| read_output(workbook, definition))?;
        outputs.push(ResolvedOutput {
            name: definition.name.clone(),
            title: definition.display_title().to_string(),
            value,
            format_string: definition.format.clone(),
        });
    }
    Ok(outputs)
}

fn write_input<W: Workbook>(workbook: &mut W, input: &CoercedInput<'_>) -> Result<()> {
    let address = &input.definition.address;
    switch_sheet(workbook, address)?;

    let (row, col) = (address.row(), address.col());
    match &input.value {
        InputValue::Array(rows) => {
            let height = rows.len() as u32;
            let width = rows.iter().map(Vec::len).max().unwrap_or(0) as u32;
            if height > 0 && width > 0 {
                let last_row = row.checked_add(height - 1);
                let last_col = col.checked_add(width - 1);
                match (last_row, last_col) {
                    (Some(last_row), Some(last_col)) => ensure_within(workbook, last_row, last_col)?,
                    _ => {
                        let (rows, cols) = workbook.dimensions();
                        return Err(ServiceError::OutOfBounds {
                            sheet: workbook.active_sheet_name().to_string(),
                            row: last_row.unwrap_or(u32::MAX),
                            col: last_col.unwrap_or(u32::MAX),
                            rows,
                            cols,
                        });
                    }
                }
            }
            for (r, line) in rows.iter().enumerate() {
                for (c, value) in line.iter().enumerate() {
                    workbook.set_cell_value(row + r as u32, col + c as u32, value.clone())?;
                }
            }
        }
        scalar => {
            ensure_within(workbook, row, col)?;
            workbook.set_cell_value(row, col, scalar_cell(scalar))?;
        }
    }

    tracing::debug!(
        "Wrote input '{}' to {}",
        input.definition.name,
        address
    );
    Ok(())
}

fn scalar_cell(value: &InputValue) -> CellValue {
    match value {
        InputValue::Number(n) => CellValue::Number(*n),
        InputValue::Text(s) => CellValue::Text(s.clone()),
        InputValue::Bool(b) => CellValue::Bool(*b),
        InputValue::Clear | InputValue::Array(_) => CellValue::Empty,
    }
}

fn read_output<W: Workbook>(workbook: &mut W, definition: &ParameterDefinition) -> Result<Value> {
    let address = &definition.address;
    switch_sheet(workbook, address)?;
    ensure_within(workbook, address.end.row, address.end.col)?;

    let value = if address.is_range() {
        let block = workbook.range_values(
            address.row(),
            address.col(),
            address.row_count(),
            address.col_count(),
        )?;
        Value::Array(
            block
                .iter()
                .map(|line| Value::Array(line.iter().map(CellValue::to_json).collect()))
                .collect(),
        )
    } else {
        workbook.cell_value(address.row(), address.col())?.to_json()
    };

    tracing::debug!("Read output '{}' from {}", definition.name, address);
    Ok(value)
}

fn switch_sheet<W: Workbook>(workbook: &mut W, address: &CellAddress) -> Result<()> {
    let sheet = match address.sheet.as_deref() {
        Some(sheet) => sheet,
        None => workbook.default_sheet_name(),
    };
    if workbook.active_sheet_name() == sheet {
        return Ok(());
    }
    let sheet = sheet.to_string();
    if !workbook.has_sheet(&sheet) {
        return Err(ServiceError::SheetNotFound { sheet });
    }
    workbook.activate_sheet(&sheet)
}

fn ensure_within<W: Workbook>(workbook: &W, row: u32, col: u32) -> Result<()> {
    let (rows, cols) = workbook.dimensions();
    if row > rows || col > cols {
        return Err(ServiceError::OutOfBounds {
            sheet: workbook.active_sheet_name().to_string(),
            row,
            col,
            rows,
            cols,
        });
    }
    Ok(())
}
