//! Row filters and the pipeline that gates which rows a chain yields.

use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, ContentArrangement, Table as ComfyTable};
use std::fmt;
use tracing::{info, warn};

use crate::data::row_buffer::RowBuffer;
use crate::error::Result;

/// Outcome of one predicate on one row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject,
    /// The predicate could not classify the row. Treated as a rejection
    /// but left out of the counts.
    Undecided,
}

impl From<bool> for Verdict {
    fn from(accept: bool) -> Self {
        if accept {
            Verdict::Accept
        } else {
            Verdict::Reject
        }
    }
}

impl From<Option<bool>> for Verdict {
    fn from(accept: Option<bool>) -> Self {
        accept.map_or(Verdict::Undecided, Verdict::from)
    }
}

/// A named predicate over the current row
pub trait RowFilter {
    fn name(&self) -> &str;

    fn passes(&mut self, row: &mut RowBuffer) -> Result<Verdict>;

    /// Called once after the last row
    fn finalize(&mut self) {}
}

struct FnFilter<F> {
    name: String,
    predicate: F,
}

impl<F> RowFilter for FnFilter<F>
where
    F: FnMut(&mut RowBuffer) -> Result<Verdict>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn passes(&mut self, row: &mut RowBuffer) -> Result<Verdict> {
        (self.predicate)(row)
    }
}

/// A predicate with its pass/fail accounting
pub struct Filter {
    predicate: Box<dyn RowFilter>,
    total: u64,
    passing: u64,
    passthrough: bool,
    hooks: Vec<Box<dyn FnMut()>>,
}

impl Filter {
    pub fn new(predicate: impl RowFilter + 'static) -> Self {
        Self {
            predicate: Box::new(predicate),
            total: 0,
            passing: 0,
            passthrough: false,
            hooks: Vec::new(),
        }
    }

    /// Filter from a closure
    pub fn from_fn<V, F>(name: impl Into<String>, mut predicate: F) -> Self
    where
        V: Into<Verdict>,
        F: FnMut(&mut RowBuffer) -> Result<V> + 'static,
    {
        Self::new(FnFilter {
            name: name.into(),
            predicate: move |row: &mut RowBuffer| predicate(row).map(Into::<Verdict>::into),
        })
    }

    /// Accept every row without evaluating the predicate, keeping a slot
    /// in the cut-flow
    pub fn with_passthrough(mut self, passthrough: bool) -> Self {
        self.passthrough = passthrough;
        self
    }

    /// Run `hook` for every accepted row
    pub fn with_hook(mut self, hook: impl FnMut() + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        self.predicate.name()
    }

    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    /// Rows classified by this filter
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn passing(&self) -> u64 {
        self.passing
    }

    pub fn failing(&self) -> u64 {
        self.total - self.passing
    }

    /// Evaluate the filter on a row, updating the counts
    pub fn apply(&mut self, row: &mut RowBuffer) -> Result<bool> {
        let verdict = if self.passthrough {
            Verdict::Accept
        } else {
            self.predicate.passes(row)?
        };
        match verdict {
            Verdict::Accept => {
                self.total += 1;
                self.passing += 1;
                for hook in &mut self.hooks {
                    hook();
                }
                Ok(true)
            }
            Verdict::Reject => {
                self.total += 1;
                Ok(false)
            }
            Verdict::Undecided => {
                warn!(
                    target: "filter",
                    "Filter `{}` could not decide on row {}. The row is rejected and not counted",
                    self.name(),
                    row.entry()
                );
                Ok(false)
            }
        }
    }

    fn finalize(&mut self) {
        self.predicate.finalize();
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filter")
            .field("name", &self.name())
            .field("total", &self.total)
            .field("passing", &self.passing)
            .field("passthrough", &self.passthrough)
            .finish()
    }
}

/// One line of a cut-flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CutflowEntry {
    pub name: String,
    pub total: u64,
    pub passing: u64,
    pub passthrough: bool,
}

impl CutflowEntry {
    /// Fraction of classified rows accepted, `None` before any row
    pub fn efficiency(&self) -> Option<f64> {
        (self.total > 0).then(|| self.passing as f64 / self.total as f64)
    }
}

/// Filters applied in order; a row is accepted only if every filter
/// accepts it
#[derive(Debug, Default)]
pub struct FilterPipeline {
    filters: Vec<Filter>,
    finalized: bool,
}

impl FilterPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, filter: Filter) {
        if filter.is_passthrough() {
            info!(target: "filter", "Filter `{}` will run in pass-through mode", filter.name());
        } else {
            info!(target: "filter", "Filter `{}` is activated", filter.name());
        }
        self.filters.push(filter);
    }

    pub fn with(mut self, filter: Filter) -> Self {
        self.push(filter);
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Filter> {
        self.filters.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Filter> {
        self.filters.iter().find(|f| f.name() == name)
    }

    /// Run the filters on a row, stopping at the first rejection
    pub fn accept(&mut self, row: &mut RowBuffer) -> Result<bool> {
        for filter in &mut self.filters {
            if !filter.apply(row)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Finalize every filter. Later calls do nothing.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        for filter in &mut self.filters {
            filter.finalize();
        }
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn cutflow(&self) -> Vec<CutflowEntry> {
        self.filters
            .iter()
            .map(|f| CutflowEntry {
                name: f.name().to_string(),
                total: f.total(),
                passing: f.passing(),
                passthrough: f.is_passthrough(),
            })
            .collect()
    }

    /// Cut-flow rendered as a table
    pub fn cutflow_table(&self) -> ComfyTable {
        let mut table = ComfyTable::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["Filter", "Total", "Passing", "Efficiency"]);
        for entry in self.cutflow() {
            let name = if entry.passthrough {
                format!("{} (pass-through)", entry.name)
            } else {
                entry.name.clone()
            };
            let efficiency = entry
                .efficiency()
                .map(|e| format!("{:.1}%", e * 100.0))
                .unwrap_or_else(|| "-".to_string());
            table.add_row(vec![
                Cell::new(name),
                Cell::new(entry.total),
                Cell::new(entry.passing),
                Cell::new(efficiency),
            ]);
        }
        table
    }
}
