pub mod legal;

pub use legal::lexml::{HttpPageFetcher, LexmlClient, PageFetcher};
