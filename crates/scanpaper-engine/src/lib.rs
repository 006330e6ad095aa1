// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanpaper Engine: the versioned page store, page operations and the job
// worker that serialises them. Front-ends talk to a `Worker` and never touch
// the store directly.

pub mod operations;
pub mod renumber;
pub mod store;
pub mod worker;

pub use operations::{Delta, OperationContext, OperationOutput, PageOperation, SplitDirection, Tools};
pub use renumber::RenumberSelection;
pub use store::{DeleteSelector, PageEntry, PageQuery, PageStore};
pub use worker::{DataItem, JobEvent, JobHandle, JobResult, Outcome, Request, Worker};
