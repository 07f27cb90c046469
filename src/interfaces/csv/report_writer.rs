use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// What an observer (or the dispatcher) did for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Callback {
    Success,
    Failure,
    ContentReady,
    Finalized,
    Restore,
}

/// One line of the replay report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportRow {
    pub transaction: String,
    pub product: String,
    pub callback: Callback,
    pub detail: String,
}

impl ReportRow {
    pub fn new(
        transaction: impl Into<String>,
        product: impl Into<String>,
        callback: Callback,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            transaction: transaction.into(),
            product: product.into(),
            callback,
            detail: detail.into(),
        }
    }
}

/// Writes report rows as CSV with the header
/// `transaction,product,callback,detail`.
pub struct ReportWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_rows<I>(&mut self, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = ReportRow>,
    {
        let mut wrote_any = false;
        for row in rows {
            self.writer.serialize(row)?;
            wrote_any = true;
        }
        if !wrote_any {
            self.writer
                .write_record(["transaction", "product", "callback", "detail"])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(rows: Vec<ReportRow>) -> String {
        let mut out = Vec::new();
        ReportWriter::new(&mut out).write_rows(rows).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_writer_emits_header_and_rows() {
        let output = render(vec![
            ReportRow::new("t1", "p1", Callback::Success, ""),
            ReportRow::new("t1", "p1", Callback::ContentReady, "a,file:///a"),
            ReportRow::new("t1", "p1", Callback::Finalized, ""),
        ]);

        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines[0], "transaction,product,callback,detail");
        assert_eq!(lines[1], "t1,p1,success,");
        assert_eq!(lines[2], "t1,p1,content_ready,\"a,file:///a\"");
        assert_eq!(lines[3], "t1,p1,finalized,");
    }

    #[test]
    fn test_writer_header_without_rows() {
        assert_eq!(render(Vec::new()), "transaction,product,callback,detail\n");
    }
}
