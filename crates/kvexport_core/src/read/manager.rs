//! The per-split pagination loop.

use super::request::{PageFetcher, ReadRequest, Step};
use crate::client::{Cursor, PageResult};
use crate::error::{ExportError, ExportResult};
use crate::rate::RateController;
use crate::split::{Segment, Split};
use crate::stats::{CancelToken, NoopReporter, ProgressReporter, ReadStats};
use crate::value::Item;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::{error, info};

/// Where a read manager is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadState {
    /// About to start a segment.
    Pending,
    /// A page fetch is in flight.
    Fetching,
    /// The current segment has more pages.
    Continuing,
    /// Every segment is read.
    Exhausted,
    /// A segment failed; the manager will not fetch again.
    Failed,
}

impl ReadState {
    /// Returns true if no further pages will be fetched.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReadState::Exhausted | ReadState::Failed)
    }
}

/// The last known-good page boundary of a split.
///
/// The first remaining segment resumes at `cursor`; the rest start over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Segments not yet exhausted, in read order.
    pub remaining_segments: Vec<u32>,
    /// Resume point inside the first remaining segment.
    pub cursor: Option<Cursor>,
}

impl Checkpoint {
    /// Returns true if nothing is left to read.
    pub fn is_complete(&self) -> bool {
        self.remaining_segments.is_empty()
    }

    /// Encodes the checkpoint as JSON.
    pub fn to_json(&self) -> ExportResult<String> {
        serde_json::to_string(self).map_err(|e| ExportError::Checkpoint(e.to_string()))
    }

    /// Decodes a checkpoint from JSON.
    pub fn from_json(json: &str) -> ExportResult<Self> {
        serde_json::from_str(json).map_err(|e| ExportError::Checkpoint(e.to_string()))
    }
}

/// Reads every segment of one split, one page at a time.
///
/// Segments are read in order and pages within a segment strictly follow
/// the cursor chain. Cancellation is checked before each page. A fatal
/// failure ends the manager in [`ReadState::Failed`]; failed segments are
/// never retried here.
pub struct ReadManager<F> {
    fetcher: F,
    rate: RateController,
    split: Split,
    remaining: VecDeque<Segment>,
    current: Option<ReadRequest>,
    state: ReadState,
    stats: ReadStats,
    cancel: CancelToken,
    reporter: Arc<dyn ProgressReporter>,
}

impl<F> std::fmt::Debug for ReadManager<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadManager")
            .field("state", &self.state)
            .field("current", &self.current)
            .field("remaining", &self.remaining.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<F: PageFetcher> ReadManager<F> {
    /// Creates a manager reading `split` from its first segment.
    pub fn new(fetcher: F, rate: RateController, split: Split) -> Self {
        let remaining: VecDeque<Segment> = split.segments().collect();
        let state = if remaining.is_empty() {
            ReadState::Exhausted
        } else {
            ReadState::Pending
        };
        Self {
            fetcher,
            rate,
            split,
            remaining,
            current: None,
            state,
            stats: ReadStats::default(),
            cancel: CancelToken::new(),
            reporter: Arc::new(NoopReporter),
        }
    }

    /// Creates a manager continuing `split` from `checkpoint`.
    ///
    /// Fails if the checkpoint names a segment outside the split, or one
    /// segment twice.
    pub fn resume(
        fetcher: F,
        rate: RateController,
        split: Split,
        checkpoint: Checkpoint,
    ) -> ExportResult<Self> {
        let mut seen = BTreeSet::new();
        for &id in &checkpoint.remaining_segments {
            if !split.segment_ids().contains(&id) {
                return Err(ExportError::Checkpoint(format!(
                    "segment {id} is not part of this split"
                )));
            }
            if !seen.insert(id) {
                return Err(ExportError::Checkpoint(format!(
                    "segment {id} is listed more than once"
                )));
            }
        }
        let total = split.total_segments();
        let mut remaining = checkpoint
            .remaining_segments
            .iter()
            .map(|&id| Segment::new(id, total))
            .collect::<ExportResult<VecDeque<_>>>()?;

        let mut manager = Self::new(fetcher, rate, split);
        manager.current = remaining.pop_front().map(|segment| {
            let row_key = manager.split.row_key(segment.id());
            ReadRequest::resume(segment, row_key, checkpoint.cursor.clone())
        });
        manager.state = if manager.current.is_some() {
            ReadState::Pending
        } else {
            ReadState::Exhausted
        };
        manager.remaining = remaining;
        Ok(manager)
    }

    /// Uses `token` for cancellation.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Sends progress to `reporter`.
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Current state.
    pub fn state(&self) -> ReadState {
        self.state
    }

    /// The split being read.
    pub fn split(&self) -> &Split {
        &self.split
    }

    /// The request the next page will be fetched with, if a segment is in progress.
    pub fn current_request(&self) -> Option<&ReadRequest> {
        self.current.as_ref()
    }

    /// Cumulative counters, throttling included.
    pub fn stats(&self) -> ReadStats {
        let mut stats = self.stats.clone();
        let (waits, waited) = self.rate.throttling();
        stats.throttle_waits = waits;
        stats.throttled_for = waited;
        stats
    }

    /// A token that cancels this manager.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Requests cancellation at the next page boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The last known-good page boundary.
    pub fn checkpoint(&self) -> Checkpoint {
        let mut remaining_segments: Vec<u32> = Vec::with_capacity(self.remaining.len() + 1);
        remaining_segments.extend(self.current.as_ref().map(|r| r.segment().id()));
        remaining_segments.extend(self.remaining.iter().map(Segment::id));
        Checkpoint {
            remaining_segments,
            cursor: self.current.as_ref().and_then(|r| r.cursor().cloned()),
        }
    }

    fn invalid_state(&self, to: ReadState) -> ExportError {
        ExportError::InvalidState {
            from: format!("{:?}", self.state),
            to: format!("{to:?}"),
        }
    }

    /// Fetches the next page, `None` once every segment is exhausted.
    ///
    /// Returns [`ExportError::Cancelled`] without fetching if cancellation
    /// was requested; the checkpoint still points at the next page.
    pub fn next_page(&mut self) -> ExportResult<Option<PageResult>> {
        match self.state {
            ReadState::Failed | ReadState::Fetching => {
                return Err(self.invalid_state(ReadState::Fetching))
            }
            ReadState::Exhausted => return Ok(None),
            ReadState::Pending | ReadState::Continuing => {}
        }
        if self.cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }

        let request = match self.current.take() {
            Some(request) => request,
            None => match self.remaining.pop_front() {
                Some(segment) => ReadRequest::first(segment, self.split.row_key(segment.id())),
                None => {
                    self.state = ReadState::Exhausted;
                    return Ok(None);
                }
            },
        };
        let segment = request.segment();

        self.state = ReadState::Fetching;
        match request.execute(&self.fetcher, &mut self.rate) {
            Step::Continue { page, next } => {
                self.current = Some(next);
                self.state = ReadState::Continuing;
                self.stats.record_page(&page);
                self.reporter.page_read(segment, &page, &self.stats);
                Ok(Some(page))
            }
            Step::Done { page } => {
                self.stats.record_page(&page);
                self.stats.segments_completed += 1;
                self.state = if self.remaining.is_empty() {
                    ReadState::Exhausted
                } else {
                    ReadState::Pending
                };
                self.reporter.page_read(segment, &page, &self.stats);
                self.reporter.segment_completed(segment, &self.stats);
                info!(
                    segment = segment.id(),
                    remaining = self.remaining.len(),
                    "segment exhausted"
                );
                Ok(Some(page))
            }
            Step::Failed(err) => {
                error!(segment = segment.id(), error = %err, "segment failed");
                self.current = Some(request);
                self.state = ReadState::Failed;
                Err(ExportError::SegmentFailed {
                    segment: segment.id(),
                    source: Box::new(err),
                })
            }
        }
    }

    /// Reads to the end, handing every item to `sink` page by page.
    ///
    /// A page's items all reach the sink before the next page is requested.
    pub fn run<E, S>(&mut self, mut sink: S) -> Result<ReadStats, E>
    where
        E: From<ExportError>,
        S: FnMut(Item) -> Result<(), E>,
    {
        while let Some(page) = self.next_page()? {
            for item in page.items {
                sink(item)?;
            }
        }
        Ok(self.stats())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RateConfig;
    use crate::error::RemoteError;
    use crate::filter::QueryFilter;
    use crate::rate::RequestLimit;
    use crate::retry::RetryResult;
    use crate::value::AttributeValue;
    use parking_lot::Mutex;

    /// Serves a fixed number of single-item pages per segment.
    struct ScriptedFetcher {
        pages_per_segment: usize,
        seen: Mutex<Vec<(u32, Option<Cursor>)>>,
        fail_segment: Option<u32>,
    }

    impl ScriptedFetcher {
        fn new(pages_per_segment: usize) -> Self {
            Self {
                pages_per_segment,
                seen: Mutex::new(Vec::new()),
                fail_segment: None,
            }
        }
    }

    fn cursor(page: usize) -> Cursor {
        Cursor::new(Item::from([("page".to_string(), AttributeValue::number(page))]))
    }

    impl PageFetcher for ScriptedFetcher {
        fn fetch(
            &self,
            request: &ReadRequest,
            _limit: RequestLimit,
        ) -> ExportResult<RetryResult<PageResult>> {
            let segment = request.segment().id();
            self.seen.lock().push((segment, request.cursor().cloned()));
            if self.fail_segment == Some(segment) {
                return Err(ExportError::Remote(RemoteError::AccessDenied("no".into())));
            }
            let page_no = request
                .cursor()
                .and_then(|c| c.key()["page"].as_f64())
                .map_or(0, |p| p as usize + 1);
            let next_cursor = (page_no + 1 < self.pages_per_segment).then(|| cursor(page_no));
            let item = Item::from([("segment".to_string(), AttributeValue::number(segment))]);
            Ok(RetryResult::new(
                PageResult {
                    items: vec![item],
                    next_cursor,
                    consumed_capacity: 1.0,
                    retries: 0,
                },
                0,
            ))
        }
    }

    fn rate() -> RateController {
        RateController::new(RateConfig::new(1000.0), Arc::new(ManualClock::new())).unwrap()
    }

    fn manager(fetcher: ScriptedFetcher, segments: Vec<u32>) -> ReadManager<ScriptedFetcher> {
        let rate = rate();
        let split = Split::new(segments, 8, 0, QueryFilter::new()).unwrap();
        ReadManager::new(fetcher, rate, split)
    }

    #[test]
    fn pages_follow_the_cursor_chain() {
        let mut reader = manager(ScriptedFetcher::new(3), vec![1, 5]);
        let mut items = Vec::new();
        let stats = reader
            .run(|item| {
                items.push(item);
                Ok::<_, ExportError>(())
            })
            .unwrap();

        assert_eq!(items.len(), 6);
        assert_eq!(stats.pages, 6);
        assert_eq!(stats.segments_completed, 2);
        assert_eq!(reader.state(), ReadState::Exhausted);
        assert!(reader.next_page().unwrap().is_none());

        let seen = reader.fetcher.seen.lock().clone();
        let expected = vec![
            (1, None),
            (1, Some(cursor(0))),
            (1, Some(cursor(1))),
            (5, None),
            (5, Some(cursor(0))),
            (5, Some(cursor(1))),
        ];
        assert_eq!(seen, expected);
    }

    #[test]
    fn states_move_through_the_lifecycle() {
        let mut reader = manager(ScriptedFetcher::new(2), vec![0, 1]);
        assert_eq!(reader.state(), ReadState::Pending);
        reader.next_page().unwrap();
        assert_eq!(reader.state(), ReadState::Continuing);
        reader.next_page().unwrap();
        assert_eq!(reader.state(), ReadState::Pending);
        reader.next_page().unwrap();
        reader.next_page().unwrap();
        assert_eq!(reader.state(), ReadState::Exhausted);
    }

    #[test]
    fn failure_is_terminal() {
        let mut fetcher = ScriptedFetcher::new(2);
        fetcher.fail_segment = Some(4);
        let mut reader = manager(fetcher, vec![3, 4, 6]);
        reader.next_page().unwrap();
        reader.next_page().unwrap();

        let err = reader.next_page().unwrap_err();
        assert!(matches!(err, ExportError::SegmentFailed { segment: 4, .. }));
        assert_eq!(reader.state(), ReadState::Failed);
        assert!(matches!(
            reader.next_page(),
            Err(ExportError::InvalidState { .. })
        ));
        assert_eq!(reader.checkpoint().remaining_segments, vec![4, 6]);
    }

    #[test]
    fn cancellation_keeps_the_last_cursor() {
        let mut reader = manager(ScriptedFetcher::new(4), vec![2]);
        reader.next_page().unwrap();
        reader.next_page().unwrap();
        reader.cancel();

        assert!(matches!(reader.next_page(), Err(ExportError::Cancelled)));
        let checkpoint = reader.checkpoint();
        assert_eq!(checkpoint.remaining_segments, vec![2]);
        assert_eq!(checkpoint.cursor, Some(cursor(1)));
        assert_eq!(reader.fetcher.seen.lock().len(), 2);
    }

    #[test]
    fn resume_starts_at_the_checkpoint() {
        let checkpoint = Checkpoint {
            remaining_segments: vec![5],
            cursor: Some(cursor(0)),
        };
        let json = checkpoint.to_json().unwrap();
        let checkpoint = Checkpoint::from_json(&json).unwrap();

        let split = Split::new(vec![1, 5], 8, 0, QueryFilter::new()).unwrap();
        let mut reader =
            ReadManager::resume(ScriptedFetcher::new(3), rate(), split, checkpoint).unwrap();
        let stats = reader.run(|_| Ok::<_, ExportError>(())).unwrap();

        assert_eq!(stats.pages, 2);
        let seen = reader.fetcher.seen.lock().clone();
        assert_eq!(seen[0], (5, Some(cursor(0))));
    }

    #[test]
    fn resume_rejects_foreign_segments() {
        let split = Split::new(vec![1], 8, 0, QueryFilter::new()).unwrap();
        let checkpoint = Checkpoint {
            remaining_segments: vec![2],
            cursor: None,
        };
        let err =
            ReadManager::resume(ScriptedFetcher::new(1), rate(), split, checkpoint).unwrap_err();
        assert!(matches!(err, ExportError::Checkpoint(_)));
        assert!(Checkpoint::from_json("{").is_err());
    }

    #[test]
    fn resume_rejects_repeated_segments() {
        let split = Split::new(vec![1, 5], 8, 0, QueryFilter::new()).unwrap();
        let checkpoint = Checkpoint {
            remaining_segments: vec![5, 5],
            cursor: None,
        };
        let fetcher = ScriptedFetcher::new(1);
        let err = ReadManager::resume(fetcher, rate(), split, checkpoint).unwrap_err();
        assert!(matches!(err, ExportError::Checkpoint(ref m) if m.contains("more than once")));
    }

    #[test]
    fn empty_split_is_exhausted() {
        let mut reader = manager(ScriptedFetcher::new(1), vec![]);
        assert_eq!(reader.state(), ReadState::Exhausted);
        assert!(reader.next_page().unwrap().is_none());
        assert!(reader.checkpoint().is_complete());
    }
}
