//! Source image acquisition and validation.
//!
//! [`ImageFinder`] checks local files and downloaded bytes against size and
//! dimension limits and, with the `fetch` feature, downloads images from URLs.
//! Links to Tenor and Giphy pages are resolved to the media they show, and
//! short queries are treated as emoji and fetched from the emoji CDN.
//!
//! # Example
//!
//! ```rust
//! use captioncard::finder::ImageFinder;
//!
//! let finder = ImageFinder::default();
//! assert_eq!(finder.max_size_humanized(), "6.00 MiB");
//! assert!(finder.sanitize_bytes(vec![0; 16]).is_ok());
//! ```

use std::path::Path;

use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::CaptionConfig;
use crate::CaptionError;

pub static URL_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^https?://\S+").unwrap());
pub static TENOR_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://(www\.)?tenor\.com/view/\S+/?").unwrap());
pub static GIPHY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https?://(www\.)?giphy\.com/gifs/[A-Za-z0-9]+/?").unwrap());

const ALLOWED_CONTENT_TYPES: [&str; 4] = ["image/png", "image/jpeg", "image/jpg", "image/webp"];
const ALLOWED_SUFFIXES: [&str; 4] = [".png", ".jpg", ".jpeg", ".webp"];

/// Queries shorter than this many characters are looked up as emoji.
const EMOJI_QUERY_LEN: usize = 8;

/// Formats a byte count with binary units and two decimals, e.g. `6.00 MiB`.
pub fn humanize_size(bytes: u64) -> String {
    const UNITS: [&str; 8] = ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"];
    if bytes == 1 {
        return "1 Byte".to_string();
    }
    if bytes < 1024 {
        return format!("{} Bytes", bytes);
    }
    let mut size = bytes as f64 / 1024.0;
    let mut unit = 0;
    while size >= 1024.0 && unit + 1 < UNITS.len() {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}

/// Formats an integer with thousands separators, e.g. `4,096`.
fn with_commas(n: u32) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Extracts the media URL from a Tenor page.
pub fn scrape_tenor(html: &str) -> Option<String> {
    let after = html.split("contentUrl").nth(1)?;
    let segment = after.split("content").next()?.get(2..)?;
    let url = segment.split('"').nth(1)?;
    Some(url.replace("\\u002F", "/"))
}

/// Extracts the media URL from a Giphy page.
pub fn scrape_giphy(html: &str) -> Option<String> {
    let tail = html.split("https://media").nth(2)?;
    let path = tail.split('"').next()?;
    Some(format!("https://media{}", path))
}

/// Finds and validates the image a caption is rendered on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFinder {
    pub max_width: u32,
    pub max_height: u32,
    pub max_size: u64,
}

impl Default for ImageFinder {
    fn default() -> Self {
        ImageFinder {
            max_width: 2048,
            max_height: 2048,
            max_size: 6 * 1024 * 1024,
        }
    }
}

impl ImageFinder {
    pub fn from_config(config: &CaptionConfig) -> Self {
        ImageFinder {
            max_width: config.max_image_width,
            max_height: config.max_image_height,
            max_size: config.max_image_bytes,
        }
    }

    pub fn max_size_humanized(&self) -> String {
        humanize_size(self.max_size)
    }

    fn too_large(&self, what: &str, size: u64) -> CaptionError {
        CaptionError::invalid_input(format!(
            "{} is too large. ({} > {})",
            what,
            humanize_size(size),
            self.max_size_humanized()
        ))
    }

    /// Rejects byte buffers above the size limit.
    pub fn sanitize_bytes(&self, bytes: Vec<u8>) -> Result<Vec<u8>, CaptionError> {
        if bytes.len() as u64 > self.max_size {
            return Err(self.too_large("Image", bytes.len() as u64));
        }
        Ok(bytes)
    }

    /// Checks an attachment's name, size and dimensions before it is read.
    pub fn sanitize_attachment(
        &self,
        filename: &str,
        size: u64,
        dimensions: Option<(u32, u32)>,
        allow_gifs: bool,
    ) -> Result<(), CaptionError> {
        let lower = filename.to_lowercase();
        let suffix_allowed = ALLOWED_SUFFIXES.iter().any(|s| lower.ends_with(s))
            || (allow_gifs && lower.ends_with(".gif"));
        if !suffix_allowed {
            let suffix = match filename.rsplit_once('.') {
                Some((_, suffix)) => suffix,
                None => "none",
            };
            return Err(CaptionError::invalid_input(format!(
                "Attachment file extension of `{}` not supported.",
                suffix
            )));
        }

        if size > self.max_size {
            return Err(self.too_large("Attachment", size));
        }

        let (width, height) = match dimensions {
            Some((w, h)) if w > 0 && h > 0 => (w, h),
            _ => {
                return Err(CaptionError::invalid_input(
                    "Invalid attachment. (Could not get a width or height from it)",
                ))
            }
        };
        if width > self.max_width {
            return Err(CaptionError::invalid_input(format!(
                "Attachment width of {} surpasses the maximum of {}.",
                with_commas(width),
                with_commas(self.max_width)
            )));
        }
        if height > self.max_height {
            return Err(CaptionError::invalid_input(format!(
                "Attachment height of {} surpasses the maximum of {}.",
                with_commas(height),
                with_commas(self.max_height)
            )));
        }
        Ok(())
    }

    /// Reads a local image file after validating it like an attachment.
    pub fn load_file(&self, path: &Path, allow_gifs: bool) -> Result<Vec<u8>, CaptionError> {
        let read_error = |e: std::io::Error| {
            CaptionError::invalid_input(format!("Could not read {}: {}", path.display(), e))
        };
        let size = std::fs::metadata(path).map_err(read_error)?.len();
        let dimensions = image::ImageReader::open(path)
            .and_then(|reader| reader.with_guessed_format())
            .ok()
            .and_then(|reader| reader.into_dimensions().ok());

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        self.sanitize_attachment(filename, size, dimensions, allow_gifs)?;

        let bytes = std::fs::read(path).map_err(read_error)?;
        debug!("Read {} from {}", humanize_size(bytes.len() as u64), path.display());
        Ok(bytes)
    }
}

#[cfg(feature = "fetch")]
fn invalid_url(url: &str) -> CaptionError {
    CaptionError::Network {
        message: "Invalid image/image URL.".to_string(),
        url: Some(url.to_string()),
    }
}

#[cfg(feature = "fetch")]
impl ImageFinder {
    /// Builds the HTTP client used by [`fetch`](Self::fetch).
    pub fn client(timeout: std::time::Duration) -> Result<reqwest::Client, CaptionError> {
        reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CaptionError::Network {
                message: format!("Could not create the HTTP client: {}", e),
                url: None,
            })
    }

    async fn get_page(client: &reqwest::Client, url: &str) -> Option<String> {
        let response = client.get(url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.text().await.ok()
    }

    /// Resolves a query to a direct image URL.
    ///
    /// Short queries are emoji; Tenor and Giphy pages are scraped.
    pub async fn resolve_url(
        &self,
        client: &reqwest::Client,
        query: &str,
    ) -> Result<String, CaptionError> {
        let query = query.trim().trim_matches(|c| c == '<' || c == '>');
        if query.chars().count() < EMOJI_QUERY_LEN {
            return Ok(crate::glyphs::url_from_emoji(query));
        }

        let scraped = if TENOR_REGEX.is_match(query) {
            Self::get_page(client, query).await.and_then(|page| scrape_tenor(&page))
        } else if GIPHY_REGEX.is_match(query) {
            Self::get_page(client, query).await.and_then(|page| scrape_giphy(&page))
        } else {
            return Ok(query.to_string());
        };
        scraped.ok_or_else(|| invalid_url(query))
    }

    /// Downloads the image a query points at and validates it.
    ///
    /// Nothing is retried; every failure is final.
    pub async fn fetch(
        &self,
        client: &reqwest::Client,
        query: &str,
        allow_gifs: bool,
    ) -> Result<Vec<u8>, CaptionError> {
        let url = self.resolve_url(client, query).await?;
        let parsed = reqwest::Url::parse(&url).map_err(|_| invalid_url(&url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid_url(&url));
        }
        info!("Fetching {}", url);

        let response = client.get(parsed).send().await.map_err(|e| {
            let message = if e.is_builder() {
                "Invalid image/image URL.".to_string()
            } else {
                format!("Could not fetch your image. ({})", e)
            };
            CaptionError::Network {
                message,
                url: Some(url.clone()),
            }
        })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(CaptionError::Network {
                message: format!(
                    "Could not fetch your image. ({}: {})",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                ),
                url: Some(url),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or("").trim().to_lowercase())
            .unwrap_or_default();
        let allowed = ALLOWED_CONTENT_TYPES.contains(&content_type.as_str())
            || (allow_gifs && content_type == "image/gif");
        if !allowed {
            return Err(CaptionError::invalid_input(format!(
                "Content type of `{}` not supported.",
                content_type
            )));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_size {
                return Err(self.too_large("Image", length));
            }
        }

        let bytes = response.bytes().await.map_err(|e| CaptionError::Network {
            message: format!("Could not fetch your image. ({})", e),
            url: Some(url.clone()),
        })?;
        self.sanitize_bytes(bytes.to_vec())
    }
}
