//! File-backed pipeline endpoints: the CSV source and the report sink.

mod csv_reader;
mod report_writer;

pub use csv_reader::{sniff_delimiter, CsvReader};
pub use report_writer::ReportWriter;
