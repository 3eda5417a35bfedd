// src/services/sitemap.rs

//! Sitemap generation for published lessons.

use std::fmt::Write as _;

use chrono::{NaiveDate, Utc};

use crate::error::Result;
use crate::models::{LessonRecord, SitemapConfig, sort_by_recent};
use crate::storage::LessonStore;

/// How often a page is expected to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeFreq {
    Daily,
    Weekly,
    Monthly,
}

impl ChangeFreq {
    fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

/// One `<url>` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SitemapEntry {
    pub loc: String,
    pub lastmod: NaiveDate,
    pub changefreq: ChangeFreq,
    pub priority: f32,
    /// Rendered as an XML comment before the entry
    pub label: Option<String>,
}

/// Builds the site's `urlset` document.
#[derive(Debug, Clone)]
pub struct SitemapBuilder {
    base_url: String,
}

impl SitemapBuilder {
    pub fn new(config: &SitemapConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Entries for the static pages followed by the given lessons, in order.
    pub fn entries(&self, lessons: &[LessonRecord], today: NaiveDate) -> Vec<SitemapEntry> {
        let mut entries = vec![
            SitemapEntry {
                loc: format!("{}/", self.base_url),
                lastmod: today,
                changefreq: ChangeFreq::Daily,
                priority: 1.0,
                label: Some("Homepage".to_string()),
            },
            SitemapEntry {
                loc: format!("{}/auth", self.base_url),
                lastmod: today,
                changefreq: ChangeFreq::Monthly,
                priority: 0.3,
                label: Some("Auth page".to_string()),
            },
        ];

        entries.extend(lessons.iter().map(|lesson| SitemapEntry {
            loc: format!("{}/lesson/{}", self.base_url, lesson.id),
            lastmod: lesson
                .updated_at
                .map(|t| t.date_naive())
                .unwrap_or(today),
            changefreq: ChangeFreq::Weekly,
            priority: 0.8,
            label: Some(lesson.title.clone()),
        }));

        entries
    }

    /// Render lessons as sitemap XML.
    pub fn render(&self, lessons: &[LessonRecord], today: NaiveDate) -> String {
        let mut xml = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n",
        );

        for entry in self.entries(lessons, today) {
            if let Some(label) = &entry.label {
                let _ = writeln!(xml, "    <!-- {} -->", comment_text(label));
            }
            let _ = write!(
                xml,
                "    <url>\n\
                 \x20       <loc>{}</loc>\n\
                 \x20       <lastmod>{}</lastmod>\n\
                 \x20       <changefreq>{}</changefreq>\n\
                 \x20       <priority>{:.1}</priority>\n\
                 \x20   </url>\n",
                escape_xml(&entry.loc),
                entry.lastmod.format("%Y-%m-%d"),
                entry.changefreq.as_str(),
                entry.priority
            );
        }

        xml.push_str("</urlset>\n");
        xml
    }

    /// Load published lessons, newest first, and render them.
    pub async fn generate<S: LessonStore>(&self, store: &S) -> Result<String> {
        let mut lessons = store.published_lessons().await?;
        sort_by_recent(&mut lessons);
        log::info!("Generating sitemap for {} published lessons", lessons.len());
        Ok(self.render(&lessons, Utc::now().date_naive()))
    }
}

/// Escape text for use in XML element content.
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Make text safe inside `<!-- -->`: no `--`, no trailing `-`.
fn comment_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '-' && out.ends_with('-') {
            out.push(' ');
        }
        if !c.is_control() {
            out.push(c);
        }
    }
    if out.ends_with('-') {
        out.push(' ');
    }
    out
}
