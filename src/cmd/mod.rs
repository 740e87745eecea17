//! CLI command implementations.
//!
//! | Module     | Commands handled |
//! |------------|------------------|
//! | `handle`   | `Handle`         |
//! | `history`  | `History`        |
//! | `rollback` | `Rollback`       |
//! | `config`   | `Config`         |

pub mod config;
pub mod handle;
pub mod history;
pub mod rollback;

pub use config::cmd_config;
pub use handle::cmd_handle;
pub use history::cmd_history;
pub use rollback::cmd_rollback;
