use crate::domain::ports::PlatformEvent;
use crate::domain::transaction::{Download, PlatformError, PlatformErrorKind, Transaction};
use crate::error::{IapError, Result};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::io::Read;

/// Separates content ids in the `content` column of a transaction row.
pub const CONTENT_SEPARATOR: char = '|';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Transaction,
    Download,
    RestoreCompleted,
    RestoreFailed,
}

/// One row of an event script.
///
/// Columns: `event, transaction, product, state, content, url, error`.
/// Trailing columns a row does not need may be left out.
#[derive(Debug, Clone, Deserialize)]
pub struct EventRow {
    pub event: EventKind,
    pub transaction: Option<String>,
    pub product: Option<String>,
    pub state: Option<String>,
    pub content: Option<String>,
    pub url: Option<String>,
    pub error: Option<PlatformErrorKind>,
}

fn required<'a>(value: &'a Option<String>, column: &str) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| IapError::InvalidEvent(format!("missing {column}")))
}

/// Parses a state column through the enum's own serde names.
fn parse_state<T: DeserializeOwned>(raw: &str, what: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .map_err(|_| IapError::InvalidEvent(format!("unknown {what} state '{raw}'")))
}

fn scripted_error(kind: PlatformErrorKind) -> PlatformError {
    PlatformError::new(kind, format!("{kind:?} reported by script").to_lowercase())
}

impl TryFrom<EventRow> for PlatformEvent {
    type Error = IapError;

    fn try_from(row: EventRow) -> Result<Self> {
        match row.event {
            EventKind::Transaction => {
                let mut tx = Transaction::new(
                    required(&row.transaction, "transaction")?,
                    required(&row.product, "product")?,
                    parse_state(required(&row.state, "state")?, "transaction")?,
                );
                if let Some(content) = row.content.as_deref().filter(|c| !c.is_empty()) {
                    tx = tx.with_content(content.split(CONTENT_SEPARATOR).map(str::trim));
                }
                if let Some(kind) = row.error {
                    tx = tx.with_error(scripted_error(kind));
                }
                Ok(PlatformEvent::TransactionUpdated(tx))
            }
            EventKind::Download => {
                let mut download = Download::waiting(
                    required(&row.transaction, "transaction")?,
                    required(&row.content, "content")?,
                )
                .with_state(parse_state(required(&row.state, "state")?, "download")?);
                if let Some(url) = row.url.filter(|u| !u.is_empty()) {
                    download = download.with_url(url);
                }
                if let Some(kind) = row.error {
                    download = download.with_error(scripted_error(kind));
                }
                Ok(PlatformEvent::DownloadUpdated(download))
            }
            EventKind::RestoreCompleted => Ok(PlatformEvent::RestoreCompleted),
            EventKind::RestoreFailed => Ok(PlatformEvent::RestoreFailed(scripted_error(
                row.error.unwrap_or(PlatformErrorKind::Unknown),
            ))),
        }
    }
}

/// Reads platform events from a CSV script.
///
/// Wraps `csv::Reader` with whitespace trimming and flexible record lengths,
/// and yields one `Result<PlatformEvent>` per row.
pub struct EventReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> EventReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily reads and converts rows; a bad row yields an error and
    /// reading continues with the next one.
    pub fn events(self) -> impl Iterator<Item = Result<PlatformEvent>> {
        self.reader.into_deserialize::<EventRow>().map(|result| {
            result
                .map_err(IapError::from)
                .and_then(PlatformEvent::try_from)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::{DownloadState, TransactionId, TransactionState};

    const HEADER: &str = "event, transaction, product, state, content, url, error\n";

    fn read(rows: &str) -> Vec<Result<PlatformEvent>> {
        EventReader::new(format!("{HEADER}{rows}").as_bytes())
            .events()
            .collect()
    }

    #[test]
    fn test_reader_valid_stream() {
        let results = read(
            "transaction, t1, p1, purchased\n\
             transaction, t2, p1, failed, , , cancelled\n\
             restore_completed\n",
        );
        assert_eq!(results.len(), 3);

        match results[0].as_ref().unwrap() {
            PlatformEvent::TransactionUpdated(tx) => {
                assert_eq!(tx.id, TransactionId::from("t1"));
                assert_eq!(tx.state, TransactionState::Purchased);
                assert!(tx.downloads.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match results[1].as_ref().unwrap() {
            PlatformEvent::TransactionUpdated(tx) => assert!(tx.is_cancelled()),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(*results[2].as_ref().unwrap(), PlatformEvent::RestoreCompleted);
    }

    #[test]
    fn test_reader_content_and_downloads() {
        let results = read(
            "transaction, t1, p1, purchased, a|b\n\
             download, t1, , finished, a, file:///a\n\
             download, t1, , failed, b, , network\n",
        );

        match results[0].as_ref().unwrap() {
            PlatformEvent::TransactionUpdated(tx) => {
                let ids: Vec<_> = tx.downloads.iter().map(|d| d.content_id.as_str()).collect();
                assert_eq!(ids, vec!["a", "b"]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match results[1].as_ref().unwrap() {
            PlatformEvent::DownloadUpdated(d) => {
                assert_eq!(d.state, DownloadState::Finished);
                assert_eq!(d.content_url.as_deref(), Some("file:///a"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        match results[2].as_ref().unwrap() {
            PlatformEvent::DownloadUpdated(d) => {
                assert_eq!(d.error.as_ref().map(|e| e.kind), Some(PlatformErrorKind::Network));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_reader_malformed_line() {
        let results = read(
            "refund, t1, p1, purchased\n\
             transaction, t1, p1, granted\n\
             transaction, , p1, purchased\n\
             download, t1, , finished\n\
             transaction, t2, p1, deferred\n",
        );

        assert_eq!(results.len(), 5);
        assert!(results[0].is_err());
        assert!(matches!(results[1], Err(IapError::InvalidEvent(_))));
        assert!(matches!(results[2], Err(IapError::InvalidEvent(_))));
        assert!(matches!(results[3], Err(IapError::InvalidEvent(_))));
        assert!(results[4].is_ok());
    }

    #[test]
    fn test_every_state_name_parses() {
        for (raw, state) in [
            ("purchasing", TransactionState::Purchasing),
            ("purchased", TransactionState::Purchased),
            ("failed", TransactionState::Failed),
            ("restored", TransactionState::Restored),
            ("deferred", TransactionState::Deferred),
        ] {
            assert_eq!(parse_state::<TransactionState>(raw, "transaction").unwrap(), state);
        }
        for (raw, state) in [
            ("waiting", DownloadState::Waiting),
            ("active", DownloadState::Active),
            ("paused", DownloadState::Paused),
            ("finished", DownloadState::Finished),
            ("failed", DownloadState::Failed),
            ("cancelled", DownloadState::Cancelled),
        ] {
            assert_eq!(parse_state::<DownloadState>(raw, "download").unwrap(), state);
        }

        match parse_state::<DownloadState>("Finished", "download") {
            Err(IapError::InvalidEvent(msg)) => assert_eq!(msg, "unknown download state 'Finished'"),
            other => panic!("expected invalid event, got {other:?}"),
        }
    }

    #[test]
    fn test_restore_failed_defaults_to_unknown() {
        let results = read("restore_failed\nrestore_failed, , , , , , cancelled\n");
        match (results[0].as_ref().unwrap(), results[1].as_ref().unwrap()) {
            (PlatformEvent::RestoreFailed(first), PlatformEvent::RestoreFailed(second)) => {
                assert_eq!(first.kind, PlatformErrorKind::Unknown);
                assert!(second.is_cancellation());
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }
}
