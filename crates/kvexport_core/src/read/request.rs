//! One page read and the fetchers that perform it.

use crate::client::{Cursor, ExportClient, PageResult, RemoteStore};
use crate::config::{keys, JobConf};
use crate::error::ExportResult;
use crate::filter::{ColumnType, FilterOperator, NAryFilter, QueryFilter};
use crate::rate::{RateController, RequestLimit};
use crate::retry::RetryResult;
use crate::split::Segment;

/// The cursor state of one segment at one page boundary.
///
/// Requests are values: each page produces a fresh request for the next one,
/// so any request can be checkpointed as is.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    segment: Segment,
    row_key: u64,
    cursor: Option<Cursor>,
}

impl ReadRequest {
    /// The first request of a segment.
    pub fn first(segment: Segment, row_key: u64) -> Self {
        Self {
            segment,
            row_key,
            cursor: None,
        }
    }

    /// A request resuming a segment at `cursor`.
    pub fn resume(segment: Segment, row_key: u64, cursor: Option<Cursor>) -> Self {
        Self {
            segment,
            row_key,
            cursor,
        }
    }

    /// The request for the page after this one.
    pub fn next(&self, cursor: Cursor) -> Self {
        Self {
            segment: self.segment,
            row_key: self.row_key,
            cursor: Some(cursor),
        }
    }

    /// The segment being read.
    pub fn segment(&self) -> Segment {
        self.segment
    }

    /// Row-key value used by keyed reads.
    pub fn row_key(&self) -> u64 {
        self.row_key
    }

    /// Where this page starts, `None` for the first page.
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// Fetches this request's page.
    ///
    /// Asks `rate` for a limit first, which may block, then fetches through
    /// `fetcher` and feeds the page cost back into `rate`.
    pub fn execute<F>(&self, fetcher: &F, rate: &mut RateController) -> Step
    where
        F: PageFetcher + ?Sized,
    {
        let limit = rate.next_limit();
        match fetcher.fetch(self, limit) {
            Ok(RetryResult { value: page, retries }) => {
                rate.record(page.consumed_capacity, page.items.len(), retries);
                match page.next_cursor.clone() {
                    Some(cursor) => Step::Continue {
                        next: self.next(cursor),
                        page,
                    },
                    None => Step::Done { page },
                }
            }
            Err(err) => Step::Failed(err),
        }
    }
}

/// Outcome of executing one [`ReadRequest`].
#[derive(Debug)]
pub enum Step {
    /// A page was read and the segment has more; `next` continues it.
    Continue {
        /// The page read.
        page: PageResult,
        /// The request for the following page.
        next: ReadRequest,
    },
    /// The last page of the segment was read.
    Done {
        /// The page read.
        page: PageResult,
    },
    /// The read failed fatally.
    Failed(crate::error::ExportError),
}

/// Performs the remote call for one request.
pub trait PageFetcher: Send {
    /// Fetches the page for `request`, capped by `limit`.
    fn fetch(
        &self,
        request: &ReadRequest,
        limit: RequestLimit,
    ) -> ExportResult<RetryResult<PageResult>>;
}

impl<F: PageFetcher + ?Sized> PageFetcher for Box<F> {
    fn fetch(
        &self,
        request: &ReadRequest,
        limit: RequestLimit,
    ) -> ExportResult<RetryResult<PageResult>> {
        (**self).fetch(request, limit)
    }
}

/// Reads physical segments with parallel scans.
#[derive(Debug, Clone)]
pub struct ScanFetcher<S> {
    client: ExportClient<S>,
    table: String,
    attributes: Option<Vec<String>>,
    filter: QueryFilter,
}

impl<S: RemoteStore> ScanFetcher<S> {
    /// Creates a fetcher, failing if the table name is not configured.
    pub fn from_conf(
        client: ExportClient<S>,
        conf: &JobConf,
        filter: QueryFilter,
    ) -> ExportResult<Self> {
        let table = conf.get_required(keys::TABLE_NAME)?.to_string();
        Ok(Self {
            client,
            table,
            attributes: conf.attributes(),
            filter,
        })
    }
}

impl<S: RemoteStore> PageFetcher for ScanFetcher<S> {
    fn fetch(
        &self,
        request: &ReadRequest,
        limit: RequestLimit,
    ) -> ExportResult<RetryResult<PageResult>> {
        self.client.scan_table(
            &self.table,
            &self.filter,
            request.segment(),
            request.cursor(),
            limit,
            self.attributes.as_deref(),
        )
    }
}

/// Queries one synthetic row-key bucket per segment.
///
/// Each request clones the split's template filter and adds
/// `row_key EQ <row key>` to the clone, so the template never changes.
#[derive(Debug, Clone)]
pub struct KeyedQueryFetcher<S> {
    client: ExportClient<S>,
    table: String,
    row_key_name: String,
    attributes: Option<Vec<String>>,
    template: QueryFilter,
}

impl<S: RemoteStore> KeyedQueryFetcher<S> {
    /// Creates a fetcher.
    ///
    /// Fails if the row-key name, then the table name, is not configured.
    pub fn from_conf(
        client: ExportClient<S>,
        conf: &JobConf,
        template: QueryFilter,
    ) -> ExportResult<Self> {
        let row_key_name = conf.get_required(keys::ROW_KEY_NAME)?.to_string();
        let table = conf.get_required(keys::TABLE_NAME)?.to_string();
        Ok(Self {
            client,
            table,
            row_key_name,
            attributes: conf.attributes(),
            template,
        })
    }

    /// The shared template filter.
    pub fn template(&self) -> &QueryFilter {
        &self.template
    }

    /// The filter sent for `request`.
    pub fn filter_for(&self, request: &ReadRequest) -> ExportResult<QueryFilter> {
        let mut filter = self.template.clone();
        let bucket = NAryFilter::new(
            &self.row_key_name,
            FilterOperator::Eq,
            ColumnType::Number,
            [request.row_key().to_string()],
        )?;
        filter.add_key_condition(&bucket)?;
        Ok(filter)
    }
}

impl<S: RemoteStore> PageFetcher for KeyedQueryFetcher<S> {
    fn fetch(
        &self,
        request: &ReadRequest,
        limit: RequestLimit,
    ) -> ExportResult<RetryResult<PageResult>> {
        let filter = self.filter_for(request)?;
        self.client.query_table(
            &self.table,
            &filter,
            request.cursor(),
            limit,
            self.attributes.as_deref(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{RateConfig, RetryConfig};
    use crate::error::ExportError;
    use crate::filter::IndexInfo;
    use crate::memory::MemoryStore;
    use crate::retry::FibonacciRetryer;
    use crate::value::AttributeValue;
    use std::sync::Arc;

    fn client(store: Arc<MemoryStore>) -> ExportClient<Arc<MemoryStore>> {
        let retryer = FibonacciRetryer::new(RetryConfig::new(3), Arc::new(ManualClock::new()));
        ExportClient::new(store, retryer)
    }

    fn template() -> QueryFilter {
        let mut filter = QueryFilter::new();
        filter.set_index(IndexInfo::new("rowKeyIndex", "rowKey", Some("ts".into())));
        let range = NAryFilter::new("ts", FilterOperator::Between, ColumnType::Number, ["1", "9"])
            .unwrap();
        filter.add_key_condition(&range).unwrap();
        filter
    }

    #[test]
    fn keyed_request_adds_row_key_equality_to_a_copy() {
        let conf = JobConf::new()
            .with(keys::ROW_KEY_NAME, "rowKey")
            .with(keys::TABLE_NAME, "events");
        let fetcher =
            KeyedQueryFetcher::from_conf(client(Arc::new(MemoryStore::new())), &conf, template())
                .unwrap();
        let request = ReadRequest::first(Segment::new(6, 10).unwrap(), 7);

        let filter = fetcher.filter_for(&request).unwrap();
        let condition = &filter.key_conditions()["rowKey"];
        assert_eq!(condition.operator, FilterOperator::Eq);
        assert_eq!(condition.values, vec![AttributeValue::N("7".into())]);
        assert_eq!(filter.key_conditions().len(), 2);

        assert_eq!(fetcher.template(), &template());
        assert!(!fetcher.template().key_conditions().contains_key("rowKey"));
    }

    #[test]
    fn keyed_fetcher_checks_row_key_before_table() {
        let store = Arc::new(MemoryStore::new());
        let err = KeyedQueryFetcher::from_conf(client(store.clone()), &JobConf::new(), template())
            .unwrap_err();
        assert_eq!(err.setting(), Some(keys::ROW_KEY_NAME));

        let conf = JobConf::new().with(keys::TABLE_NAME, "events");
        let err =
            KeyedQueryFetcher::from_conf(client(store.clone()), &conf, template()).unwrap_err();
        assert_eq!(err.setting(), Some(keys::ROW_KEY_NAME));

        let conf = JobConf::new().with(keys::ROW_KEY_NAME, "rowKey");
        let err =
            KeyedQueryFetcher::from_conf(client(store.clone()), &conf, template()).unwrap_err();
        assert_eq!(err.setting(), Some(keys::TABLE_NAME));
        assert_eq!(store.call_count(), 0);
    }

    #[test]
    fn scan_fetcher_requires_table() {
        let err = ScanFetcher::from_conf(
            client(Arc::new(MemoryStore::new())),
            &JobConf::new(),
            QueryFilter::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ExportError::Configuration { .. }));
    }

    #[test]
    fn next_request_keeps_segment_and_takes_cursor() {
        let first = ReadRequest::first(Segment::new(2, 4).unwrap(), 2);
        let cursor = Cursor::new(Default::default());
        let next = first.next(cursor.clone());
        assert_eq!(next.segment(), first.segment());
        assert_eq!(next.cursor(), Some(&cursor));
        assert!(first.cursor().is_none());
    }

    #[test]
    fn failed_fetch_surfaces_as_failed_step() {
        let store = Arc::new(MemoryStore::new());
        let conf = JobConf::new().with(keys::TABLE_NAME, "missing");
        let fetcher = ScanFetcher::from_conf(client(store), &conf, QueryFilter::new()).unwrap();
        let clock = Arc::new(ManualClock::new());
        let mut rate = RateController::new(RateConfig::new(10.0), clock).unwrap();
        let request = ReadRequest::first(Segment::new(0, 1).unwrap(), 0);

        match request.execute(&fetcher, &mut rate) {
            Step::Failed(ExportError::Remote(err)) => assert!(!err.is_transient()),
            other => panic!("unexpected step: {other:?}"),
        }
    }
}
