//! Transform adapters from site HTML into CLI-facing entity models.

pub(crate) mod event;
