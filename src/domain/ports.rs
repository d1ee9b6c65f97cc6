use crate::domain::model::{CellValue, ExecutionEvent};
use crate::utils::error::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    pub recalculate_on_load: bool,
}

/// Builds mutable workbooks from serialized spreadsheet models.
pub trait CalculationEngine: Send + Sync {
    type Workbook: Workbook + Send + 'static;

    fn load(&self, model: &[u8], options: &LoadOptions) -> Result<Self::Workbook>;
}

/// A loaded spreadsheet. Row and column indices are 1-based and address the active sheet.
///
/// Implementations recalculate dependent cells on their own after a write;
/// callers never request a recalculation.
pub trait Workbook {
    fn active_sheet_name(&self) -> &str;

    /// Sheet that sheet-less addresses refer to: the one active when the model was loaded.
    fn default_sheet_name(&self) -> &str;

    fn has_sheet(&self, name: &str) -> bool;

    /// Make `name` the active sheet. Fails with `SheetNotFound` for unknown names.
    fn activate_sheet(&mut self, name: &str) -> Result<()>;

    /// `(rows, cols)` of the active sheet.
    fn dimensions(&self) -> (u32, u32);

    fn cell_value(&self, row: u32, col: u32) -> Result<CellValue>;

    fn set_cell_value(&mut self, row: u32, col: u32, value: CellValue) -> Result<()>;

    /// Row-major block of `rows` x `cols` values starting at `(row, col)`.
    fn range_values(&self, row: u32, col: u32, rows: u32, cols: u32) -> Result<Vec<Vec<CellValue>>> {
        let mut block = Vec::with_capacity(rows as usize);
        for r in row..row + rows {
            let mut line = Vec::with_capacity(cols as usize);
            for c in col..col + cols {
                line.push(self.cell_value(r, c)?);
            }
            block.push(line);
        }
        Ok(block)
    }
}

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn record(&self, event: ExecutionEvent) -> Result<()>;
}
