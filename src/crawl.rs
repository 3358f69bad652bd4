//! Crawl orchestration: sequential pagination, bounded detail fan-out,
//! assembly in discovery order.

use std::{
    collections::HashSet,
    fmt,
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use futures::future::join_all;
use kdam::{Bar, BarExt, tqdm};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    catalog::{CatalogRecord, ListingRow, write_catalog},
    detail::{DetailRecord, parse_detail},
    error::{Error, Result},
    fetch::PageSource,
    listing::parse_listing,
};

pub const DEFAULT_START_URL: &str =
    "https://www.shl.com/solutions/products/product-catalog/?type=1";
pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_MAX_PAGES: usize = 500;

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub start_url: Url,
    /// Maximum detail fetches in flight at once.
    pub concurrency: usize,
    /// Upper bound on listing pages walked.
    pub max_pages: usize,
    pub show_progress: bool,
}

impl CrawlConfig {
    pub fn new(start_url: Url) -> Self {
        Self {
            start_url,
            concurrency: DEFAULT_CONCURRENCY,
            max_pages: DEFAULT_MAX_PAGES,
            show_progress: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlPhase {
    Idle,
    Listing,
    DetailFetching,
    Assembling,
    Done,
    Failed,
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CrawlPhase::Idle => "idle",
            CrawlPhase::Listing => "listing",
            CrawlPhase::DetailFetching => "detail-fetching",
            CrawlPhase::Assembling => "assembling",
            CrawlPhase::Done => "done",
            CrawlPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Cooperative cancellation flag shared between a crawl and its caller.
///
/// Raising it stops pagination before the next page and makes detail
/// tasks that have not started yet skip their fetch. Requests already in
/// flight run to completion or time out.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters describing how a crawl went.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    pub pages: usize,
    pub rows: usize,
    /// Listing rows dropped because their URL was already seen.
    pub duplicates: usize,
    /// Records whose detail page was fetched and parsed.
    pub complete: usize,
    /// Records whose detail page could not be fetched.
    pub degraded: usize,
    /// Records whose detail fetch never started because of a stop request.
    pub skipped: usize,
    pub stopped: bool,
}

#[derive(Debug, Clone)]
pub struct CrawlOutput {
    pub records: Vec<CatalogRecord>,
    pub report: CrawlReport,
}

enum DetailOutcome {
    Parsed(DetailRecord),
    Missing,
    Skipped,
}

pub struct Crawler<S> {
    source: S,
    config: CrawlConfig,
    stop: StopSignal,
    phase: CrawlPhase,
}

impl<S: PageSource> Crawler<S> {
    pub fn new(source: S, config: CrawlConfig) -> Self {
        Self {
            source,
            config,
            stop: StopSignal::new(),
            phase: CrawlPhase::Idle,
        }
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn phase(&self) -> CrawlPhase {
        self.phase
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn enter(&mut self, phase: CrawlPhase) {
        debug!(from = %self.phase, to = %phase, "crawl phase");
        self.phase = phase;
    }

    /// Crawl the catalog and write it to `path`.
    ///
    /// The destination directory is prepared before any network traffic,
    /// so an unwritable destination fails fast.
    pub async fn crawl_to_file(&mut self, path: &Path) -> Result<CrawlReport> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && std::fs::create_dir_all(parent).is_err()
        {
            self.enter(CrawlPhase::Failed);
            return Err(Error::DataDir(parent.to_path_buf()));
        }

        let output = self.run().await?;
        if let Err(e) = write_catalog(path, &output.records) {
            self.enter(CrawlPhase::Failed);
            return Err(e);
        }

        info!(
            path = %path.display(),
            records = output.records.len(),
            "catalog written"
        );
        Ok(output.report)
    }

    /// Walk every listing page, fetch every detail page, and assemble the
    /// records in discovery order.
    pub async fn run(&mut self) -> Result<CrawlOutput> {
        self.enter(CrawlPhase::Listing);
        let mut report = CrawlReport::default();
        let rows = match self.walk_listing(&mut report).await {
            Ok(rows) => rows,
            Err(e) => {
                self.enter(CrawlPhase::Failed);
                return Err(e);
            }
        };
        report.rows = rows.len();
        info!(pages = report.pages, rows = rows.len(), "listing complete");

        self.enter(CrawlPhase::DetailFetching);
        let progress =
            DetailProgress::new(rows.len(), self.config.show_progress);
        let outcomes = self.fetch_details(&rows, &progress).await;
        progress.finish();

        self.enter(CrawlPhase::Assembling);
        let records: Vec<CatalogRecord> = rows
            .into_iter()
            .zip(outcomes)
            .map(|(row, outcome)| {
                let detail = match outcome {
                    DetailOutcome::Parsed(detail) => {
                        report.complete += 1;
                        detail
                    }
                    DetailOutcome::Missing => {
                        warn!(
                            url = %row.url,
                            "detail unavailable, using defaults"
                        );
                        report.degraded += 1;
                        DetailRecord::default()
                    }
                    DetailOutcome::Skipped => {
                        report.skipped += 1;
                        DetailRecord::default()
                    }
                };
                CatalogRecord::assemble(row, detail)
            })
            .collect();

        report.stopped |= self.stop.is_requested();
        self.enter(CrawlPhase::Done);
        info!(
            complete = report.complete,
            degraded = report.degraded,
            skipped = report.skipped,
            "crawl finished"
        );

        Ok(CrawlOutput { records, report })
    }

    async fn walk_listing(
        &self,
        report: &mut CrawlReport,
    ) -> Result<Vec<ListingRow>> {
        let mut next = Some(self.config.start_url.clone());
        let mut visited = HashSet::new();
        let mut seen = HashSet::new();
        let mut rows = Vec::new();

        while let Some(url) = next.take() {
            if self.stop.is_requested() {
                info!("stop requested, ending pagination");
                report.stopped = true;
                break;
            }
            if report.pages >= self.config.max_pages.max(1) {
                warn!(
                    max_pages = self.config.max_pages,
                    "page cap reached, ending pagination"
                );
                break;
            }
            if !visited.insert(url.to_string()) {
                warn!(%url, "next link revisits a page, ending pagination");
                break;
            }

            let Some(html) = self.source.fetch(&url).await else {
                if report.pages == 0 {
                    return Err(Error::ListingUnavailable {
                        url: url.to_string(),
                    });
                }
                warn!(%url, "listing page unavailable, ending pagination");
                break;
            };
            report.pages += 1;

            let page = parse_listing(&html, &url);
            for row in page.rows {
                if seen.insert(row.url.to_string()) {
                    rows.push(row);
                } else {
                    report.duplicates += 1;
                }
            }
            next = page.next;
        }

        Ok(rows)
    }

    /// Every row ticks `progress` exactly once, fetched or skipped.
    async fn fetch_details(
        &self,
        rows: &[ListingRow],
        progress: &DetailProgress,
    ) -> Vec<DetailOutcome> {
        let permits = Semaphore::new(self.config.concurrency.max(1));

        let permits = &permits;
        let source = &self.source;
        let stop = &self.stop;

        let tasks = rows.iter().map(|row| async move {
            let Ok(_permit) = permits.acquire().await else {
                progress.tick();
                return DetailOutcome::Skipped;
            };
            if stop.is_requested() {
                progress.tick();
                return DetailOutcome::Skipped;
            }

            let outcome = match source.fetch(&row.url).await {
                Some(html) => {
                    DetailOutcome::Parsed(parse_detail(&html).resolve())
                }
                None => DetailOutcome::Missing,
            };
            progress.tick();
            outcome
        });

        join_all(tasks).await
    }
}

struct DetailProgress {
    bar: Mutex<Option<Bar>>,
    done: AtomicUsize,
}

impl DetailProgress {
    fn new(total: usize, show: bool) -> Self {
        Self {
            bar: Mutex::new(show.then(|| {
                tqdm!(total = total, desc = "Details", unit = "page")
            })),
            done: AtomicUsize::new(0),
        }
    }

    fn tick(&self) {
        self.done.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut guard) = self.bar.lock()
            && let Some(bar) = guard.as_mut()
        {
            bar.update(1).ok();
        }
    }

    #[cfg(test)]
    fn done(&self) -> usize {
        self.done.load(Ordering::SeqCst)
    }

    fn finish(&self) {
        if self.bar.lock().is_ok_and(|b| b.is_some()) {
            eprintln!();
        }
    }
}
