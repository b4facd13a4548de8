//! Output renderers: markdown for the terminal, pretty JSON, and the PDF report.

pub(crate) mod json;
pub(crate) mod markdown;
pub(crate) mod pdf;
