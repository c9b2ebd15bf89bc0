//! Article content helpers: HTML scanning, description processors, the
//! HTTPS capability probe, extraction and thumbnails.

pub mod domain;
pub mod extractor;
pub mod html;
pub mod processor;
pub mod thumbnailer;

pub use domain::HttpsProbe;
pub use extractor::{extract_for_article, Extractor, HtmlExtractor};
pub use processor::{AbsolutizeUrls, ArticleProcessor, ProxyHttp, RelativeUrl};
pub use thumbnailer::{make_thumbnail, DescriptionThumbnailer, ExtractThumbnailer, Thumbnailer};
