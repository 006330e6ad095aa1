// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Renumbering and scan-slot planning on top of the page store.
//
// Page numbers are always 1..N. Renumbering assigns each selected page a new
// label `start + k * step`, keeps the labels of the other pages, and reorders
// the document by label. A negative step over all pages therefore reverses
// the document; a step of 2 over the odd pages interleaves them with a
// later duplex back side.

use scanpaper_core::error::{Result, ScanpaperError};
use tracing::{debug, info, instrument};

use crate::store::{PageEntry, PageStore};

/// Which pages a renumber applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenumberSelection {
    All,
    /// Current page numbers, in the order they receive new labels.
    Selected(Vec<u32>),
}

impl PageStore {
    /// Whether renumbering with `start`/`step` gives every page a distinct,
    /// positive number.
    pub fn valid_renumber(&self, start: i64, step: i64, selection: &RenumberSelection) -> Result<bool> {
        debug!(start, step, ?selection, "checking renumber");
        if step == 0 || start < 1 {
            return Ok(false);
        }
        let pages = self.pages()?;
        match selection {
            RenumberSelection::All => {
                let last = start + (pages.len() as i64 - 1).max(0) * step;
                Ok(step > 0 || last > 0)
            }
            RenumberSelection::Selected(selected) => {
                let unselected: Vec<i64> = pages
                    .iter()
                    .map(|e| i64::from(e.number))
                    .filter(|n| !selected.iter().any(|&s| i64::from(s) == *n))
                    .collect();
                let clash = (0..selected.len() as i64)
                    .map(|i| start + step * i)
                    .any(|n| n < 1 || unselected.contains(&n));
                Ok(!clash)
            }
        }
    }

    /// Renumber the document.
    ///
    /// Without `start` the numbering is already ascending and contiguous, so
    /// nothing changes. Otherwise this is one undoable edit.
    #[instrument(skip(self))]
    pub fn renumber(
        &mut self,
        start: Option<i64>,
        step: i64,
        selection: &RenumberSelection,
    ) -> Result<Vec<PageEntry>> {
        let Some(start) = start else {
            return self.pages();
        };
        if !self.valid_renumber(start, step, selection)? {
            return Err(ScanpaperError::InvalidArgument(format!(
                "start {start} and step {step} would give duplicate or non-positive page numbers"
            )));
        }

        let pages = self.pages()?;
        let mut labels: Vec<i64> = pages.iter().map(|e| i64::from(e.number)).collect();
        let targets: Vec<usize> = match selection {
            RenumberSelection::All => (0..pages.len()).collect(),
            RenumberSelection::Selected(numbers) => numbers
                .iter()
                .map(|&n| {
                    pages
                        .iter()
                        .position(|e| e.number == n)
                        .ok_or_else(|| ScanpaperError::NotFound(format!("page number {n}")))
                })
                .collect::<Result<_>>()?,
        };
        for (k, &index) in targets.iter().enumerate() {
            labels[index] = start + k as i64 * step;
        }

        let mut order: Vec<usize> = (0..pages.len()).collect();
        order.sort_by_key(|&i| labels[i]);
        let rows: Vec<_> = order.iter().map(|&i| pages[i].row_id).collect();
        self.reorder(&rows)?;

        info!(start, step, pages = rows.len(), "renumbered");
        self.pages()
    }

    /// How many pages can be scanned from `start` in steps of `step` before
    /// running into an existing page. `None` means no limit.
    pub fn pages_possible(&self, start: i64, step: i64) -> Result<Option<usize>> {
        if step == 0 {
            return Err(ScanpaperError::InvalidArgument("step must not be zero".into()));
        }
        let numbers: Vec<i64> = self.pages()?.iter().map(|e| i64::from(e.number)).collect();
        let Some(&max) = numbers.last() else {
            if step < 0 {
                // Slots start, start + step, ... down to 1.
                let slots = start.saturating_sub(1).div_euclid(step.saturating_neg()) + 1;
                return Ok(Some(usize::try_from(slots).unwrap_or(0)));
            }
            return Ok(None);
        };
        if step > 0 && max < start {
            return Ok(None);
        }

        let mut num = 0i64;
        loop {
            let candidate = start + num * step;
            if step > 0 && candidate > max {
                return Ok(None);
            }
            if step < 0 && candidate < 1 {
                return Ok(Some(num as usize));
            }
            if numbers.contains(&candidate) {
                return Ok(Some(num as usize));
            }
            num += 1;
        }
    }
}
