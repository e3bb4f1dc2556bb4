pub mod perf;
pub mod time_utils;
