//! Common utils shared by the aggregators and the grouping table

pub mod context;
pub mod profiler;
pub mod types;
pub mod utils;
