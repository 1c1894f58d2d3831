use std::collections::HashSet;

use regex::Regex;

use crate::config::NormalizerConfig;
use crate::errors::SyncError;

/// Canonicalizes Beatport titles into the form Spotify lists them under.
#[derive(Debug, Clone)]
pub struct TitleNormalizer {
    noise: Option<Regex>,
    tags: Regex,
    allowed_labels: Vec<String>,
}

impl TitleNormalizer {
    pub fn new(cfg: &NormalizerConfig) -> Result<Self, SyncError> {
        let phrases: Vec<String> = cfg
            .noise_phrases
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(regex::escape)
            .collect();

        let noise = if phrases.is_empty() {
            None
        } else {
            // either "(Phrase)" with its parens or a bare "Phrase"
            let alt = phrases.join("|");
            let pattern = format!(r"(?i)\(\s*(?:{alt})\s*\)|\b(?:{alt})\b");
            Some(
                Regex::new(&pattern)
                    .map_err(|e| SyncError::Config(format!("noise phrase pattern: {e}")))?,
            )
        };

        let tags = Regex::new(r"\(([^()]*)\)")
            .map_err(|e| SyncError::Config(format!("tag pattern: {e}")))?;

        Ok(Self {
            noise,
            tags,
            allowed_labels: cfg.allowed_labels.clone(),
        })
    }

    pub fn normalize(&self, raw_title: &str) -> String {
        self.normalize_with_label(raw_title, None)
    }

    /// Strips noise phrases, then appends `label` as `(Label)` when it is in
    /// the allow-set and the title does not already mention it.
    pub fn normalize_with_label(&self, raw_title: &str, label: Option<&str>) -> String {
        let stripped = match &self.noise {
            Some(re) => re.replace_all(raw_title, " ").into_owned(),
            None => raw_title.to_string(),
        };
        let mut title = self.tidy_tags(&stripped);

        if let Some(label) = label.and_then(|l| self.allowed_label(l)) {
            if !title.to_lowercase().contains(&label.to_lowercase()) {
                title = format!("{title} ({label})").trim().to_string();
            }
        }
        title
    }

    fn allowed_label(&self, label: &str) -> Option<&str> {
        let label = label.trim();
        self.allowed_labels
            .iter()
            .find(|allowed| allowed.eq_ignore_ascii_case(label))
            .map(String::as_str)
    }

    /// Drops empty `()` and repeated parenthetical tags, collapses whitespace.
    fn tidy_tags(&self, title: &str) -> String {
        let mut seen = HashSet::new();
        let mut out = String::with_capacity(title.len());
        let mut last = 0;

        for caps in self.tags.captures_iter(title) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            out.push_str(&title[last..whole.start()]);
            last = whole.end();

            let inner = inner.as_str().split_whitespace().collect::<Vec<_>>().join(" ");
            if inner.is_empty() || !seen.insert(inner.to_lowercase()) {
                continue;
            }
            out.push_str(&format!(" ({inner}) "));
        }
        out.push_str(&title[last..]);

        out.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}
