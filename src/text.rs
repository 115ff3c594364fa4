//! Text helpers shared by the ingestion and AI steps.

use std::collections::HashMap;
use std::sync::OnceLock;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid tag regex"))
}

fn whitespace_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace regex"))
}

fn id_attr_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"\b(id|pid)="([^"]*)""#).expect("valid id attribute regex"))
}

/// Strip tags (without inserting anything), decode common entities and
/// collapse whitespace
pub fn clean_html(text: &str) -> String {
    let stripped = tag_pattern().replace_all(text, "");
    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&");
    whitespace_pattern()
        .replace_all(&decoded, " ")
        .trim()
        .to_string()
}

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

pub fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// First `<tag>…</tag>` content, trimmed; matches across newlines
pub fn extract_tag(response: &str, tag: &str) -> Option<String> {
    let pattern = format!(r"(?s)<{0}>(.*?)</{0}>", regex::escape(tag));
    let re = Regex::new(&pattern).ok()?;
    re.captures(response)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Deterministic speech id derived from its context and content
pub fn speech_uuid(agenda_uuid: &str, date: DateTime<Utc>, speaker: &str, text: &str) -> String {
    let content = format!("{}_{}_{}_{}", agenda_uuid, date.to_rfc3339(), speaker, text);
    let digest = hex::encode(Sha256::digest(content.as_bytes()));
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, digest.as_bytes()).to_string()
}

/// Replaces database ids with opaque per-run tokens in AI prompts
#[derive(Debug, Clone)]
pub struct IdObfuscator {
    key: [u8; 16],
}

impl Default for IdObfuscator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdObfuscator {
    /// Fresh random key
    pub fn new() -> Self {
        Self {
            key: *Uuid::new_v4().as_bytes(),
        }
    }

    pub fn with_key(key: [u8; 16]) -> Self {
        Self { key }
    }

    /// base64url of the first 8 bytes of sha256(key ‖ "{prefix}_{id}")
    pub fn encode(&self, prefix: &str, id: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.key);
        hasher.update(format!("{}_{}", prefix, id).as_bytes());
        let digest = hasher.finalize();
        URL_SAFE_NO_PAD.encode(&digest[..8])
    }

    /// Start a token table for one prompt
    pub fn tokens(&self) -> TokenMap<'_> {
        TokenMap {
            obfuscator: self,
            reverse: HashMap::new(),
        }
    }
}

/// Tokens issued for one prompt, with their reverse mapping
#[derive(Debug)]
pub struct TokenMap<'a> {
    obfuscator: &'a IdObfuscator,
    reverse: HashMap<(String, String), i64>,
}

impl TokenMap<'_> {
    /// Token for an id, remembered for `resolve`
    pub fn register(&mut self, prefix: &str, id: i64) -> String {
        let token = self.obfuscator.encode(prefix, id);
        self.reverse
            .insert((prefix.to_string(), token.clone()), id);
        token
    }

    pub fn resolve(&self, prefix: &str, token: &str) -> Option<i64> {
        self.reverse
            .get(&(prefix.to_string(), token.to_string()))
            .copied()
    }

    /// Replace known tokens in `id="…"` and `pid="…"` attributes with real ids
    pub fn substitute(&self, text: &str) -> String {
        id_attr_pattern()
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let attr = &caps[1];
                let token = &caps[2];
                let prefix = if attr == "id" { "agenda" } else { "politician" };
                match self.resolve(prefix, token) {
                    Some(id) => format!("{}=\"{}\"", attr, id),
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_clean_html() {
        assert_eq!(
            clean_html("<p>Austatud&nbsp;juhataja!</p>\n\n<p>Head   kolleegid &amp; külalised</p>"),
            "Austatud juhataja! Head kolleegid & külalised"
        );
        assert_eq!(clean_html("   "), "");
    }

    #[test]
    fn test_clean_html_inline_tags_leave_no_gaps() {
        assert_eq!(clean_html("Tere<b>!</b> Ki<i>ri</i>"), "Tere! Kiri");
        assert_eq!(clean_html("<p>Lõpp.</p>\n<p>Algus</p>"), "Lõpp. Algus");

        let date = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        assert_eq!(
            speech_uuid("agenda-1", date, "Mari Maasikas", &clean_html("Tere<b>!</b>")),
            speech_uuid("agenda-1", date, "Mari Maasikas", "Tere!")
        );
    }

    #[test]
    fn test_escape_unescape() {
        let raw = r#"A & B <c> "d" 'e'"#;
        let escaped = escape_xml(raw);
        assert_eq!(escaped, "A &amp; B &lt;c&gt; &quot;d&quot; &apos;e&apos;");
        assert_eq!(unescape_xml(&escaped), raw);
        // &amp;lt; must come back as the literal "&lt;"
        assert_eq!(unescape_xml("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_extract_tag_spans_lines() {
        let response = "noise\n<summary>\nSõnavõtja\nrääkis\n</summary> trailing <summary>second</summary>";
        assert_eq!(extract_tag(response, "summary").as_deref(), Some("Sõnavõtja\nrääkis"));
        assert_eq!(extract_tag(response, "analysis"), None);
    }

    #[test]
    fn test_speech_uuid_is_deterministic() {
        let date = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let a = speech_uuid("agenda-1", date, "Mari Maasikas", "Tere");
        let b = speech_uuid("agenda-1", date, "Mari Maasikas", "Tere");
        let c = speech_uuid("agenda-1", date, "Mari Maasikas", "Tere!");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(Uuid::parse_str(&a).unwrap().get_version_num(), 5);
    }

    #[test]
    fn test_obfuscator_tokens() {
        let obfuscator = IdObfuscator::with_key([7; 16]);
        let token = obfuscator.encode("agenda", 42);
        assert_eq!(token.len(), 11);
        assert_eq!(token, obfuscator.encode("agenda", 42));
        assert_ne!(token, obfuscator.encode("politician", 42));
        assert_ne!(token, IdObfuscator::with_key([8; 16]).encode("agenda", 42));

        let mut tokens = obfuscator.tokens();
        let agenda = tokens.register("agenda", 42);
        let pol = tokens.register("politician", 7);
        assert_eq!(tokens.resolve("agenda", &agenda), Some(42));
        assert_eq!(tokens.resolve("politician", &agenda), None);

        let xml = format!(r#"<agenda id="{}"><decision pid="{}">x</decision><activity pid="">y</activity></agenda>"#, agenda, pol);
        assert_eq!(
            tokens.substitute(&xml),
            r#"<agenda id="42"><decision pid="7">x</decision><activity pid="">y</activity></agenda>"#
        );
    }
}
