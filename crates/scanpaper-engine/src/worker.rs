// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job worker: a dedicated thread that owns the page store and executes
// requests one at a time, strictly in submission order.
//
// Each request gets its own event channel. The worker reports `Queued`,
// `Started`, any number of `Progress`/`Data` events, and finally exactly one
// of `Finished` or `Error`. A cancelled request ends without either; its
// channel simply closes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn};

use scanpaper_core::cancel::CancelToken;
use scanpaper_core::config::EngineConfig;
use scanpaper_core::error::{Result, ScanpaperError};
use scanpaper_core::human_errors::humanize_error;
use scanpaper_core::types::{PageAnalysis, PageId, Placement, RequestId};
use scanpaper_document::Page;

use crate::operations::{self, OperationContext, PageOperation, Tools};
use crate::renumber::RenumberSelection;
use crate::store::{DeleteSelector, PageEntry, PageQuery, PageStore};

/// Work the worker can be asked to do.
#[derive(Debug, Clone)]
pub enum Request {
    /// Run a page operation on the page with this id.
    Page { page: PageId, op: PageOperation },
    /// Cache channel statistics on each page, one progress tick per page.
    Analyse { pages: Vec<PageId> },
    /// Append an image file to the end of the document.
    Import { path: PathBuf },
    /// Append an already built page to the end of the document.
    ImportPage { page: Box<Page> },
    Delete(DeleteSelector),
    Renumber {
        start: Option<i64>,
        step: i64,
        selection: RenumberSelection,
    },
    Undo,
    Redo,
    GetPage(PageQuery),
    /// Report the current ordering and nothing else.
    Pages,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Page { op, .. } => op.name(),
            Self::Analyse { .. } => "analyse",
            Self::Import { .. } | Self::ImportPage { .. } => "import",
            Self::Delete(_) => "delete",
            Self::Renumber { .. } => "renumber",
            Self::Undo => "undo",
            Self::Redo => "redo",
            Self::GetPage(_) => "get page",
            Self::Pages => "list pages",
        }
    }
}

/// A partial result streamed while a request runs.
#[derive(Debug, Clone)]
pub enum DataItem {
    /// A page written to the store (or read from it), with the number it now
    /// has and, for operation output, where it was placed.
    Page {
        page: Box<Page>,
        number: u32,
        placement: Option<Placement>,
    },
    Analysis { page: PageId, analysis: PageAnalysis },
    /// One page of a batch failed; the batch carried on.
    PageError { page: PageId, message: String },
    /// Something an external tool printed.
    Message(String),
}

/// Summary delivered with `Finished`.
#[derive(Debug, Clone)]
pub struct JobResult {
    /// More requests are waiting behind this one.
    pub pending: bool,
    pub num_completed_jobs: usize,
    pub total_jobs: usize,
    /// Document order after the request.
    pub pages: Vec<PageEntry>,
}

#[derive(Debug, Clone)]
pub enum JobEvent {
    Queued { pending: usize },
    Started,
    Progress { num_completed_jobs: usize, total_jobs: usize },
    Data(DataItem),
    Finished(JobResult),
    Error(String),
}

/// How a request ended, as seen by [`JobHandle::wait`].
#[derive(Debug)]
pub enum Outcome {
    Finished { result: JobResult, data: Vec<DataItem> },
    Failed(String),
    Cancelled,
}

/// The caller's end of one request.
#[derive(Debug)]
pub struct JobHandle {
    pub id: RequestId,
    events: mpsc::UnboundedReceiver<JobEvent>,
}

impl JobHandle {
    /// Next event, or `None` once the request is over.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    /// Blocking form of [`next_event`](Self::next_event) for callers outside
    /// an async runtime.
    pub fn blocking_next_event(&mut self) -> Option<JobEvent> {
        self.events.blocking_recv()
    }

    pub async fn wait(mut self) -> Outcome {
        let mut data = Vec::new();
        while let Some(event) = self.events.recv().await {
            if let Some(outcome) = collect(event, &mut data) {
                return outcome;
            }
        }
        Outcome::Cancelled
    }

    pub fn wait_blocking(mut self) -> Outcome {
        let mut data = Vec::new();
        while let Some(event) = self.events.blocking_recv() {
            if let Some(outcome) = collect(event, &mut data) {
                return outcome;
            }
        }
        Outcome::Cancelled
    }
}

fn collect(event: JobEvent, data: &mut Vec<DataItem>) -> Option<Outcome> {
    match event {
        JobEvent::Data(item) => {
            data.push(item);
            None
        }
        JobEvent::Finished(result) => Some(Outcome::Finished {
            result,
            data: std::mem::take(data),
        }),
        JobEvent::Error(message) => Some(Outcome::Failed(message)),
        JobEvent::Queued { .. } | JobEvent::Started | JobEvent::Progress { .. } => None,
    }
}

enum Job {
    Run(Request),
    /// Marks the end of a cancellation: everything queued before it is
    /// dropped, the flag is cleared when it is reached.
    ClearCancel,
}

struct Envelope {
    id: RequestId,
    job: Job,
    events: mpsc::UnboundedSender<JobEvent>,
}

/// Handle to the worker thread.
///
/// Dropping it lets the worker finish what is queued, then closes the store.
pub struct Worker {
    tx: Option<mpsc::UnboundedSender<Envelope>>,
    cancel: CancelToken,
    pending: Arc<AtomicUsize>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    /// Open the session at `path` and start a worker for it. Store errors
    /// (such as a foreign file) are returned here, before any thread starts.
    pub fn open(path: impl AsRef<Path>, config: &EngineConfig) -> Result<Self> {
        let store = PageStore::open(path, config)?;
        Self::spawn(store, Tools::from_config(config), config)
    }

    /// Start a worker that takes ownership of `store`.
    pub fn spawn(store: PageStore, tools: Tools, config: &EngineConfig) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancelToken::new();
        let pending = Arc::new(AtomicUsize::new(0));

        let state = WorkerState {
            store,
            tools,
            cancel: cancel.clone(),
            pending: Arc::clone(&pending),
            default_resolution: config.default_resolution,
        };
        let thread = std::thread::Builder::new()
            .name("scanpaper-worker".into())
            .spawn(move || state.run(rx))
            .map_err(|e| ScanpaperError::Worker(format!("failed to start worker thread: {e}")))?;

        Ok(Self {
            tx: Some(tx),
            cancel,
            pending,
            thread: Some(thread),
        })
    }

    /// Queue a request.
    pub fn submit(&self, request: Request) -> Result<JobHandle> {
        debug!(kind = request.name(), "submitting request");
        self.enqueue(Job::Run(request))
    }

    /// Cancel the running request and everything queued so far. The
    /// returned handle finishes once the worker has caught up.
    pub fn cancel(&self) -> Result<JobHandle> {
        info!("cancelling queued requests");
        self.cancel.cancel();
        self.enqueue(Job::ClearCancel)
    }

    fn enqueue(&self, job: Job) -> Result<JobHandle> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| ScanpaperError::Worker("worker has shut down".into()))?;
        let id = RequestId::new();
        let (events_tx, events) = mpsc::unbounded_channel();

        let depth = self.pending.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = events_tx.send(JobEvent::Queued { pending: depth });
        if tx.send(Envelope { id, job, events: events_tx }).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(ScanpaperError::Worker("worker has stopped".into()));
        }
        Ok(JobHandle { id, events })
    }

    /// Requests submitted but not yet started.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Let the worker drain its queue, then wait for it to close the store.
    pub fn shutdown(mut self) -> Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> Result<()> {
        self.tx.take();
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| ScanpaperError::Worker("worker thread panicked".into())),
            None => Ok(()),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!(error = %e, "worker did not stop cleanly");
        }
    }
}

/// Everything the worker thread owns.
struct WorkerState {
    store: PageStore,
    tools: Tools,
    cancel: CancelToken,
    pending: Arc<AtomicUsize>,
    default_resolution: f64,
}

/// Per-request bookkeeping.
struct Progress<'a> {
    events: &'a mpsc::UnboundedSender<JobEvent>,
    completed: usize,
    total: usize,
}

impl Progress<'_> {
    fn send(&self, event: JobEvent) {
        // A caller that dropped its handle no longer cares.
        let _ = self.events.send(event);
    }

    fn data(&self, item: DataItem) {
        self.send(JobEvent::Data(item));
    }

    fn tick(&mut self) {
        self.completed += 1;
        self.send(JobEvent::Progress {
            num_completed_jobs: self.completed,
            total_jobs: self.total,
        });
    }
}

impl WorkerState {
    fn run(mut self, mut rx: mpsc::UnboundedReceiver<Envelope>) {
        info!("worker started");
        while let Some(envelope) = rx.blocking_recv() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            self.handle(envelope);
        }
        if let Err(e) = self.store.close() {
            error!(error = %e, "failed to close page store");
        }
        info!("worker stopped");
    }

    fn handle(&mut self, envelope: Envelope) {
        let Envelope { id, job, events } = envelope;
        let request = match job {
            Job::Run(request) => request,
            Job::ClearCancel => {
                self.cancel.reset();
                let _ = events.send(JobEvent::Started);
                self.finish(&events, 0, 0);
                return;
            }
        };

        let span = info_span!("request", %id, kind = request.name());
        let _guard = span.enter();
        if self.cancel.is_cancelled() {
            debug!("dropped by cancellation");
            return;
        }

        let _ = events.send(JobEvent::Started);
        let mut progress = Progress {
            events: &events,
            completed: 0,
            total: match &request {
                Request::Analyse { pages } => pages.len(),
                _ => 1,
            },
        };

        match self.execute(request, &mut progress) {
            Ok(()) => {
                // requests without progress ticks still count as one job done
                let completed = progress.completed.max(progress.total.min(1));
                self.finish(&events, completed, progress.total);
            }
            Err(e) => {
                if let Err(abort) = self.store.abort_edit() {
                    error!(error = %abort, "failed to roll back edit");
                }
                if e.is_cancelled() {
                    info!("request cancelled");
                } else {
                    error!(error = %e, "request failed");
                    let _ = events.send(JobEvent::Error(humanize_error(&e).render()));
                }
            }
        }
    }

    fn finish(&self, events: &mpsc::UnboundedSender<JobEvent>, completed: usize, total: usize) {
        let pages = match self.store.pages() {
            Ok(pages) => pages,
            Err(e) => {
                let _ = events.send(JobEvent::Error(humanize_error(&e).render()));
                return;
            }
        };
        let _ = events.send(JobEvent::Finished(JobResult {
            pending: self.pending.load(Ordering::SeqCst) > 0,
            num_completed_jobs: completed,
            total_jobs: total,
            pages,
        }));
    }

    fn execute(&mut self, request: Request, progress: &mut Progress<'_>) -> Result<()> {
        match request {
            Request::Page { page, op } => self.run_operation(page, &op, progress),
            Request::Analyse { pages } => self.analyse(&pages, progress),
            Request::Import { path } => {
                let page = Page::import(&path, self.store.temp_dir(), self.default_resolution)?;
                self.cancel.checkpoint()?;
                self.append(page, progress)
            }
            Request::ImportPage { page } => self.append(*page, progress),
            Request::Delete(selector) => self.store.delete_pages(&selector).map(drop),
            Request::Renumber { start, step, selection } => {
                self.store.renumber(start, step, &selection).map(drop)
            }
            Request::Undo => self.store.undo().map(drop),
            Request::Redo => self.store.redo().map(drop),
            Request::GetPage(query) => {
                let page = self.store.get_page(query)?;
                let number = self.store.find_number_by_id(page.id)?.unwrap_or_default();
                progress.data(DataItem::Page {
                    page: Box::new(page),
                    number,
                    placement: None,
                });
                Ok(())
            }
            Request::Pages => Ok(()),
        }
    }

    /// Load the current version of `id`, failing the way a request on a
    /// deleted page should.
    fn current_page(&self, id: PageId, what: &str) -> Result<Page> {
        match self.store.get_page(PageQuery::Id(id)) {
            Err(ScanpaperError::NotFound(_)) => Err(ScanpaperError::NotFound(format!(
                "Page for process {id} no longer exists. Cannot {what}."
            ))),
            other => other,
        }
    }

    fn run_operation(&mut self, id: PageId, op: &PageOperation, progress: &mut Progress<'_>) -> Result<()> {
        let page = self.current_page(id, op.name())?;
        let temp_dir = self.store.temp_dir().to_path_buf();
        let output = op.apply(
            &page,
            &mut OperationContext {
                temp_dir: &temp_dir,
                cancel: &self.cancel,
                tools: &mut self.tools,
            },
        )?;
        for message in output.messages {
            warn!(%message, "tool message");
            progress.data(DataItem::Message(message));
        }

        self.cancel.checkpoint()?;
        self.store.take_snapshot()?;
        let mut applied = Vec::with_capacity(output.deltas.len());
        for delta in output.deltas {
            let anchor = delta.placement.anchor();
            let number = self.store.find_number_by_id(anchor)?.ok_or_else(|| {
                ScanpaperError::NotFound(format!(
                    "Page for process {anchor} no longer exists. Cannot {}.",
                    op.name()
                ))
            })?;
            let mut page = delta.page;
            let number = match delta.placement {
                Placement::Replace(_) => {
                    page.row_id = Some(self.store.replace_page(&page, number)?);
                    number
                }
                Placement::InsertAfter(_) => {
                    page.row_id = Some(self.store.add_page(&page, number + 1)?);
                    number + 1
                }
            };
            applied.push(DataItem::Page {
                page: Box::new(page),
                number,
                placement: Some(delta.placement),
            });
        }
        self.store.finish_edit()?;

        for item in applied {
            progress.data(item);
        }
        progress.tick();
        Ok(())
    }

    fn analyse(&mut self, ids: &[PageId], progress: &mut Progress<'_>) -> Result<()> {
        for &id in ids {
            self.cancel.checkpoint()?;
            match self.analyse_one(id) {
                Ok(analysis) => progress.data(DataItem::Analysis { page: id, analysis }),
                Err(e) if e.is_store_level() || e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(page = %id, error = %e, "analysis failed, continuing");
                    progress.data(DataItem::PageError {
                        page: id,
                        message: humanize_error(&e).render(),
                    });
                }
            }
            progress.tick();
        }
        Ok(())
    }

    fn analyse_one(&mut self, id: PageId) -> Result<PageAnalysis> {
        let mut page = self.current_page(id, "analyse")?;
        let analysis = operations::analyse(&page)?;
        self.cancel.checkpoint()?;
        page.analysis = Some(analysis.clone());
        self.store.update_page_metadata(&page)?;
        Ok(analysis)
    }

    fn append(&mut self, mut page: Page, progress: &mut Progress<'_>) -> Result<()> {
        let number = self.store.page_count()? as u32 + 1;
        page.row_id = Some(self.store.add_page(&page, number)?);
        info!(number, id = %page.id, "page appended");
        progress.data(DataItem::Page {
            page: Box::new(page),
            number,
            placement: None,
        });
        progress.tick();
        Ok(())
    }
}
