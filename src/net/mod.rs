pub mod url;

pub use url::{parse_wss_url, UrlParts};
