//! Internal utility helpers for paths and text layout.

pub(crate) mod paths;
pub(crate) mod text;
