//! Page readers for the catalogue's fixed layouts.
//!
//! Readers are pure `(path, body) -> entities` functions behind small traits
//! so the pipeline never depends on any specific page layout. The selectors
//! and text patterns here encode the catalogue's hand-written HTML; parse
//! misses are per-item and never fatal to a run.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::warn;
use url::Url;

use crate::domain::entities::{Album, Artist};

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error("artist page '{0}' is blacklisted")]
    Blacklisted(String),

    #[error("'{0}' does not look like an artist page url")]
    NotAnArtistUrl(String),

    #[error("invalid artist page '{0}': {1}")]
    InvalidArtist(String, &'static str),
}

/// Extracts artist page URLs from an index page (volume, rock or jazz list).
pub trait ArtistIndexReader: Send + Sync {
    fn read(&self, path: &str, body: &str) -> Result<Vec<String>, ReadError>;
}

/// Extracts album review rows from a yearly ratings page.
pub trait RatingsReader: Send + Sync {
    fn read(&self, path: &str, body: &str) -> Result<Vec<Album>, ReadError>;
}

/// Extracts one artist (with raw albums) from their catalogue page.
pub trait ArtistPageReader: Send + Sync {
    fn read(&self, path: &str, body: &str) -> Result<Artist, ReadError>;
}

fn sel(selector: &str) -> Selector {
    Selector::parse(selector).expect("static selector")
}

static ARTIST_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/(avant|jazz|vol)\S*\.html$").expect("static regex"));
static RATING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9](?:\.[0-9])?)/10").expect("static regex"));
static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(([0-9]{4})\)").expect("static regex"));
static ALBUM_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r".+[0-9](?:\.[0-9])?/10[^\n]*").expect("static regex"));
static ALBUM_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^,(]+)").expect("static regex"));

/// Resolves an href the way a browser would, relative to the page document.
fn resolve_href(page_path: &str, href: &str) -> Option<String> {
    let base = Url::parse("http://catalogue.invalid")
        .ok()?
        .join(page_path)
        .ok()?;
    let resolved = base.join(href).ok()?;
    Some(resolved.path().to_string())
}

fn looks_like_artist_url(path: &str) -> bool {
    ARTIST_URL_RE.is_match(path)
}

/// Reader for the per-volume artist index pages, whose artist list lives in a
/// jump-to `<select>` element.
pub struct VolumeIndexReader {
    volume: u8,
}

impl VolumeIndexReader {
    #[must_use]
    pub fn new(volume: u8) -> Self {
        Self { volume }
    }
}

impl ArtistIndexReader for VolumeIndexReader {
    fn read(&self, _path: &str, body: &str) -> Result<Vec<String>, ReadError> {
        let doc = Html::parse_document(body);
        let options = sel("select > option");
        let volume_dir = format!("/vol{}/", self.volume);

        let mut urls = Vec::new();
        for option in doc.select(&options) {
            let Some(value) = option.value().attr("value") else {
                continue;
            };
            if !value.ends_with(".html") {
                continue;
            }
            if let Some(url) = resolve_href(&volume_dir, value) {
                if looks_like_artist_url(&url) {
                    urls.push(url);
                }
            }
        }
        Ok(urls)
    }
}

/// Reader for the rock musicians index, a plain link table.
pub struct RockIndexReader;

impl ArtistIndexReader for RockIndexReader {
    fn read(&self, path: &str, body: &str) -> Result<Vec<String>, ReadError> {
        let doc = Html::parse_document(body);
        Ok(links(&doc, &sel("table:nth-of-type(3) a"), path))
    }
}

/// Reader for the jazz musicians index, links inside fixed-width cells.
pub struct JazzIndexReader;

impl ArtistIndexReader for JazzIndexReader {
    fn read(&self, path: &str, body: &str) -> Result<Vec<String>, ReadError> {
        let doc = Html::parse_document(body);
        Ok(links(&doc, &sel(r#"[width="400"] a[href]"#), path))
    }
}

fn links(doc: &Html, selector: &Selector, page_path: &str) -> Vec<String> {
    let mut urls = Vec::new();
    for anchor in doc.select(selector) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        match resolve_href(page_path, href) {
            Some(url) if looks_like_artist_url(&url) => urls.push(url),
            Some(_) => {}
            None => warn!("could not resolve href '{}' on {}", href, page_path),
        }
    }
    urls
}

/// Reader for the yearly CD review pages.
///
/// Rows carry artist link, album link and a highlighted rating cell; the
/// release year is the page's own year.
pub struct RatingsPageReader {
    year: i32,
    row_selector: Selector,
}

impl RatingsPageReader {
    /// Layout used by the 1990-1999 pages.
    #[must_use]
    pub fn nineties(year: i32) -> Self {
        Self {
            year,
            row_selector: sel("table tr"),
        }
    }

    /// Layout used by the 2000+ pages (and the rolling new-ratings page).
    #[must_use]
    pub fn two_thousands(year: i32) -> Self {
        Self {
            year,
            row_selector: sel(r#"table[bgcolor="ffa000"] tr"#),
        }
    }
}

impl RatingsReader for RatingsPageReader {
    fn read(&self, path: &str, body: &str) -> Result<Vec<Album>, ReadError> {
        let doc = Html::parse_document(body);
        let link_sel = sel("td > a");
        let rating_sel = sel(r#"td[bgcolor="f00000"]"#);

        let mut albums = Vec::new();
        for row in doc.select(&self.row_selector) {
            let mut row_links = row.select(&link_sel);
            let Some(artist_link) = row_links.next() else {
                continue;
            };
            let album_link = row_links.next();

            let href = artist_link
                .value()
                .attr("href")
                .or_else(|| album_link.and_then(|a| a.value().attr("href")))
                .unwrap_or_default();
            let artist_name = text_of(&artist_link);
            let album_name = album_link.map(|a| text_of(&a)).unwrap_or_default();
            let rating_text = row
                .select(&rating_sel)
                .next()
                .map(|cell| text_of(&cell))
                .unwrap_or_default();

            if href.is_empty() || artist_name.is_empty() || album_name.is_empty() {
                continue;
            }
            let Some(artist_url) = resolve_href(path, href) else {
                continue;
            };
            let Some(rating) = parse_rating(&rating_text) else {
                continue;
            };

            albums.push(Album {
                page_url: path.to_string(),
                artist_url,
                artist_name,
                name: album_name,
                rating,
                year: self.year,
            });
        }
        Ok(albums)
    }
}

fn text_of(element: &scraper::ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn parse_rating(text: &str) -> Option<f64> {
    RATING_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// A handful of pages that are artist-shaped but are not artist pages.
const BLACKLIST: &[&str] = &[
    "/vol6/current.html",
    "/vol6/petshop.html",
    "/vol5/knottmik.html",
    "/vol5/combine.html",
    "/vol5/thornpau.html",
    "/vol3/tomrercl.html",
];

/// Pages whose heading does not carry the artist's usable name.
static NAME_EXCEPTIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("/vol6/belleli.html", "Tractor's Revenge"),
        ("/vol7/blkjks.html", "BLK JKS"),
        ("/vol7/kem.html", "Kern"),
        ("/vol4/eae.html", "The Electronic Art Ensemble"),
        ("/avant/zeier.html", "Marc Zeier"),
        ("/vol6/aurora.html", "Aurora Sutra"),
    ])
});

/// Reader for individual artist pages: heading name, coloured bio cell and
/// the discography table with `Album (Year), N/10` review lines.
pub struct CatalogArtistPageReader;

impl ArtistPageReader for CatalogArtistPageReader {
    fn read(&self, path: &str, body: &str) -> Result<Artist, ReadError> {
        if BLACKLIST.contains(&path) {
            return Err(ReadError::Blacklisted(path.to_string()));
        }
        if !looks_like_artist_url(path) {
            return Err(ReadError::NotAnArtistUrl(path.to_string()));
        }

        let doc = Html::parse_document(body);

        // White-background pages only carry an untranslated stub bio.
        if doc.select(&sel(r#"body[bgcolor="FFFFFF"]"#)).next().is_some() {
            return Err(ReadError::InvalidArtist(path.to_string(), "non standard bio"));
        }

        let name = artist_name(path, &doc);
        if name.is_empty() {
            return Err(ReadError::InvalidArtist(path.to_string(), "no name"));
        }

        let (bio, related_artists) = bio_and_related(path, &doc);
        let albums = artist_page_albums(path, &name, &doc);

        Ok(Artist {
            url: path.to_string(),
            name,
            bio,
            related_artists,
            albums,
        })
    }
}

fn artist_name(path: &str, doc: &Html) -> String {
    if let Some(exception) = NAME_EXCEPTIONS.get(path) {
        return (*exception).to_string();
    }
    for selector in ["center h1", "center h2", "center font"] {
        if let Some(heading) = doc.select(&sel(selector)).next() {
            let name = text_of(&heading);
            if !name.is_empty() {
                return name;
            }
        }
    }
    String::new()
}

/// The bio lives in one of a few known background-coloured cells; links in it
/// that point at other artist pages become the related-artists list.
fn bio_and_related(path: &str, doc: &Html) -> (String, Vec<String>) {
    let anchor_sel = sel("a[href]");
    for selector in [
        r#"td[bgcolor="eebb88"]"#,
        r##"td[bgcolor="#eebb88"]"##,
        r#"td[bgcolor="e6dfaa"]"#,
    ] {
        if let Some(cell) = doc.select(&sel(selector)).next() {
            let bio = cell.text().collect::<String>().trim().to_string();

            let mut related = Vec::new();
            for anchor in cell.select(&anchor_sel) {
                if let Some(url) = anchor
                    .value()
                    .attr("href")
                    .and_then(|href| resolve_href(path, href))
                {
                    if looks_like_artist_url(&url) && url != path && !related.contains(&url) {
                        related.push(url);
                    }
                }
            }
            return (bio, related);
        }
    }
    (String::new(), Vec::new())
}

/// Review lines look like `Trout Mask Replica (1969), 9.5/10` or
/// `Doc at the Radar Station, 7.5/10 (1980)`; the year may be missing.
fn artist_page_albums(path: &str, artist: &str, doc: &Html) -> Vec<Album> {
    let Some(table) = doc.select(&sel("table")).next() else {
        return Vec::new();
    };
    let Some(cell) = table.select(&sel("td")).next() else {
        return Vec::new();
    };
    let cell_text = cell.text().collect::<String>();

    let mut albums = Vec::new();
    for line in ALBUM_LINE_RE.find_iter(&cell_text) {
        let line = line.as_str();
        let Some(rating) = parse_rating(line) else {
            continue;
        };
        let Some(name) = ALBUM_NAME_RE
            .captures(line)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|name| !name.is_empty())
        else {
            continue;
        };
        let year = YEAR_RE
            .captures(line)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0);

        albums.push(Album {
            page_url: path.to_string(),
            artist_url: path.to_string(),
            artist_name: artist.to_string(),
            name,
            rating,
            year,
        });
    }
    albums
}
