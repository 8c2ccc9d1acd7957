//! Core layer: pure scheduling decisions and URL preparation.

mod policy;
mod url;

pub use policy::{Promotion, plan_promotion, ready_prefix};
pub use url::{CACHE_BUST_PARAM, cache_bust, prepare_request, resolve_url};
