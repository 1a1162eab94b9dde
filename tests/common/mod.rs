// Each test binary compiles this module separately and uses a different subset of it.
#![allow(dead_code)]

pub(crate) mod blocks;

pub(crate) mod counter_app;

pub(crate) mod logging;

pub(crate) mod mem_headers;

pub(crate) mod mem_ledger;

pub(crate) mod network;

pub(crate) mod scripted;
