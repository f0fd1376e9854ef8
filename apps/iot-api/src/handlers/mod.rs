//! Handlers 模块

pub mod health;
pub mod metrics;
pub mod query;
pub mod submit;

pub use health::*;
pub use metrics::*;
pub use query::*;
pub use submit::*;
