use regex::Regex;
use std::{collections::BTreeSet, fmt::Debug};

use super::Error;

/// Finds the managed image blobs a piece of diary HTML refers to.
///
/// Implementations return blob *identifiers* (the file names used with a
/// [`BlobStore`](super::BlobStore)), not URLs, and never include externally hosted images.
pub trait ImageRefScanner: Debug + Send + Sync {
	fn scan(&self, html: &str) -> BTreeSet<String>;

	/// All identifiers referenced across many pieces of content, each appearing once.
	fn scan_all<'a>(&self, contents: impl IntoIterator<Item = &'a str>) -> BTreeSet<String>
	where
		Self: Sized,
	{
		contents
			.into_iter()
			.flat_map(|html| self.scan(html))
			.collect()
	}
}

// `src` must follow whitespace, so `data-src` and friends don't count
const IMG_SRC: &str = r#"(?i)<img\b[^>]*?\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)')"#;

/// Picks `src` attributes out of `<img>` tags with a regular expression.
///
/// This is not an HTML parser, and doesn't pretend to be one; it copes with the markup the diary
/// editor produces (single or double quoted `src`, other attributes in any order).
///
/// Only root-relative URLs under the managed prefix count, unless the scanner has been told
/// which origins are ours with [`with_origin`](Self::with_origin).  Anything hosted elsewhere
/// is not ours to touch, whatever its path looks like.
#[derive(Clone, Debug)]
pub struct RegexImageScanner {
	img_src: Regex,
	managed_prefix: String,
	origins: Vec<String>,
}

impl RegexImageScanner {
	/// Scanner for images served under `managed_prefix` (such as `/api/uploads/`).
	///
	/// # Errors
	///
	/// Returns [`Error::Config`] if the prefix isn't a root-relative path below `/`.
	pub fn new(managed_prefix: impl Into<String>) -> Result<Self, Error> {
		let managed_prefix = managed_prefix.into();
		let segments = managed_prefix.trim_matches('/');

		if !managed_prefix.starts_with('/') || segments.is_empty() {
			return Err(Error::config(format!(
				"upload prefix {managed_prefix:?} must be a path below the root"
			)));
		}

		Ok(Self {
			img_src: Regex::new(IMG_SRC)
				.map_err(|e| Error::insanity(format!("img regex failed to compile: {e}")))?,
			managed_prefix: format!("/{segments}/"),
			origins: Vec::new(),
		})
	}

	/// Also treat absolute URLs on `origin` (such as `https://diary.example`) as managed.
	pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
		self.origins.push(origin.into().trim_end_matches('/').to_string());
		self
	}

	fn identifier_for<'a>(&self, src: &'a str) -> Option<&'a str> {
		let src = src.trim();

		// Query and fragment go first, so they can't supply a path of their own
		let url = src.split(['?', '#']).next().unwrap_or(src);

		let path = if url.starts_with('/') && !url.starts_with("//") {
			url
		} else {
			self.origins
				.iter()
				.find_map(|origin| url.strip_prefix(origin.as_str()))
				.filter(|rest| rest.starts_with('/'))?
		};

		path.strip_prefix(self.managed_prefix.as_str())
			.filter(|name| {
				!name.is_empty() && *name != "." && *name != ".." && !name.contains(['/', '\\'])
			})
	}
}

impl ImageRefScanner for RegexImageScanner {
	#[tracing::instrument(level = "trace", skip_all)]
	fn scan(&self, html: &str) -> BTreeSet<String> {
		self.img_src
			.captures_iter(html)
			.filter_map(|c| c.get(1).or_else(|| c.get(2)))
			.filter_map(|m| self.identifier_for(m.as_str()))
			.map(str::to_string)
			.collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::DEFAULT_UPLOAD_PREFIX;

	fn scanner() -> RegexImageScanner {
		RegexImageScanner::new(DEFAULT_UPLOAD_PREFIX).unwrap()
	}

	fn ids(v: &[&str]) -> BTreeSet<String> {
		v.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn finds_managed_images() {
		let scanner = scanner();
		let html = r#"<p>morning</p><img src="/api/uploads/1700000000000-cat.png" alt="cat">
			<p>then</p><img class="wide" src='/api/uploads/1700000000001-dog.jpg'>"#;

		assert_eq!(
			ids(&["1700000000000-cat.png", "1700000000001-dog.jpg"]),
			scanner.scan(html)
		);
	}

	#[test]
	fn skips_external_images() {
		let scanner = scanner();
		let html = r#"<img src="https://example.com/pics/cat.png"><img src="data:image/png;base64,AAAA">"#;

		assert!(scanner.scan(html).is_empty());
	}

	#[test]
	fn external_hosts_with_an_uploads_path_are_skipped() {
		let scanner = scanner();
		let html = r#"<img src="https://elsewhere.example/uploads/x.png">
			<img src="https://elsewhere.example/api/uploads/y.png">
			<img src="//cdn.example/api/uploads/z.png">
			<img src="https://x.example/a?next=/api/uploads/1-a.png">
			<img src="/a?next=/api/uploads/1-a.png">
			<img src="/uploads/2-b.png">"#;

		assert!(scanner.scan(html).is_empty());
	}

	#[test]
	fn absolute_urls_count_only_on_our_origin() {
		let html = r#"<IMG SRC="https://diary.example/api/uploads/1-a.gif?v=2">
			<img src="https://diary.example.evil/api/uploads/2-b.png">"#;

		assert!(scanner().scan(html).is_empty());

		let scanner = scanner().with_origin("https://diary.example/");
		assert_eq!(ids(&["1-a.gif"]), scanner.scan(html));
	}

	#[test]
	fn query_and_fragment_are_dropped() {
		let html = r#"<img src="/api/uploads/1-a.png?v=3"><img src="/api/uploads/2-b.png#top">
			<img src="/api/uploads/nested/3-c.png"><img src="/api/uploads/..">"#;

		assert_eq!(ids(&["1-a.png", "2-b.png"]), scanner().scan(html));
	}

	#[test]
	fn deduplicates_within_and_across_entries() {
		let scanner = scanner();
		let first = r#"<img src="/api/uploads/1-a.png"><img src="/api/uploads/1-a.png">"#;
		let second = r#"<img src="/api/uploads/1-a.png"><img src="/api/uploads/2-b.png">"#;

		assert_eq!(ids(&["1-a.png", "2-b.png"]), scanner.scan_all([first, second]));
	}

	#[test]
	fn ignores_things_that_are_not_img_src() {
		let scanner = scanner();
		let html = r#"<a href="/api/uploads/1-a.png">link</a><imgur src="/api/uploads/2-b.png">
			<img data-src="/api/uploads/3-c.png"><img src="/api/uploads/">"#;

		assert!(scanner.scan(html).is_empty());
	}

	#[test]
	fn custom_prefix() {
		let scanner = RegexImageScanner::new("/media/").unwrap();
		let html = r#"<img src="/media/1-a.png"><img src="/api/uploads/2-b.png">"#;

		assert_eq!(ids(&["1-a.png"]), scanner.scan(html));
		assert!(matches!(RegexImageScanner::new("/"), Err(Error::Config(_))));
		assert!(matches!(RegexImageScanner::new("media/"), Err(Error::Config(_))));

		// Trailing slash or not, it's the same prefix
		let bare = RegexImageScanner::new("/media").unwrap();
		assert_eq!(ids(&["1-a.png"]), bare.scan(html));
	}
}
