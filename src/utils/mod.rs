pub mod error;
pub mod text;

pub use error::{ApiError, ApiResult};
pub use text::{contains_any, first_match, fold_for_matching, truncate_chars};
