//! Mock proxy core API
//!
//! Entry points for hosts embedding the core: runtime lifecycle, capture
//! queries and logging setup.

pub mod capture_api;
pub mod logging;
pub mod proxy_api;
