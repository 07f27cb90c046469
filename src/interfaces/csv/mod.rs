//! CSV adapters used by the `iapkit` binary: event scripts in, callback
//! reports out.

pub mod event_reader;
pub mod report_writer;
