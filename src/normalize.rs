//! Turns an uploaded file into a standalone, directly loadable HTML document.
//!
//! Markup passes through untouched apart from title extraction. Component-style
//! scripts (`.js`, `.jsx`, `.ts`, `.tsx`) are rewritten so their default export
//! becomes a named binding, then embedded in the page built by
//! [`crate::document::ComponentDocument`].
//!
//! Export detection is a fixed, ordered list of regex rules rather than a
//! parser. The first rule that matches wins; the runtime fallback chain in the
//! generated page covers whatever the rules miss.

use std::sync::OnceLock;

use regex::Regex;

use crate::document::{ComponentDocument, SYNTHETIC_COMPONENT_NAME};

pub const COMPONENT_EXTENSIONS: [&str; 4] = ["js", "jsx", "ts", "tsx"];
pub const MARKUP_EXTENSIONS: [&str; 2] = ["html", "htm"];
pub const DEFAULT_PLACEHOLDER_TITLES: [&str; 1] = ["Document"];

const STANDALONE_MARKERS: [&str; 2] = ["<!doctype", "<html"];
const DOCTYPE_PREFIX: &str = "<!DOCTYPE html>\n";
const BYTE_ORDER_MARK: char = '\u{feff}';

// Identifiers that can follow `export default` without naming a binding.
const NON_BINDING_WORDS: [&str; 7] = [
    "function", "class", "async", "new", "await", "typeof", "void",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Markup,
    Component,
}

impl SourceKind {
    pub fn detect(filename: &str) -> Self {
        let is_component = extension_of(filename).is_some_and(|ext| {
            COMPONENT_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        });
        if is_component {
            Self::Component
        } else {
            Self::Markup
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Markup => "markup",
            Self::Component => "component",
        }
    }
}

/// Which export-default shape the rewrite recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportForm {
    /// `export default function Foo` / `export default class Foo`
    NamedDeclaration,
    /// `export default Foo;`
    BareIdentifier,
    /// `export default <anything else>`, bound to the synthetic name.
    Expression,
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRewrite {
    pub code: String,
    pub component_name: String,
    pub form: ExportForm,
    pub preamble: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedGame {
    pub html: String,
    pub title: String,
    pub kind: SourceKind,
    pub component_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    placeholder_titles: Vec<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self {
            placeholder_titles: DEFAULT_PLACEHOLDER_TITLES
                .iter()
                .map(|title| (*title).to_owned())
                .collect(),
        }
    }
}

impl Normalizer {
    pub fn with_placeholder_titles<I, S>(titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            placeholder_titles: titles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn normalize(&self, raw: &str, filename: &str) -> NormalizedGame {
        match SourceKind::detect(filename) {
            SourceKind::Component => {
                let rewrite = rewrite_component_source(raw);
                let html = render_component_document(&rewrite, filename);
                NormalizedGame {
                    html,
                    title: strip_component_extension(filename),
                    kind: SourceKind::Component,
                    component_name: Some(rewrite.component_name),
                }
            }
            SourceKind::Markup => {
                let html = if is_standalone_document(raw) {
                    raw.to_owned()
                } else {
                    format!("{DOCTYPE_PREFIX}{raw}")
                };
                NormalizedGame {
                    html,
                    title: self.markup_title(raw, filename),
                    kind: SourceKind::Markup,
                    component_name: None,
                }
            }
        }
    }

    pub fn markup_title(&self, raw: &str, filename: &str) -> String {
        match extract_document_title(raw) {
            Some(title) if !self.is_placeholder(&title) => title,
            _ => strip_extension(filename),
        }
    }

    fn is_placeholder(&self, title: &str) -> bool {
        self.placeholder_titles.iter().any(|known| known == title)
    }
}

/// Normalizes with the default placeholder titles.
pub fn normalize(raw: &str, filename: &str) -> NormalizedGame {
    Normalizer::default().normalize(raw, filename)
}

/// True when the content starts (after whitespace) with `<!doctype` or `<html`,
/// in any letter case.
pub fn is_standalone_document(content: &str) -> bool {
    let trimmed =
        content.trim_start_matches(|ch: char| ch.is_whitespace() || ch == BYTE_ORDER_MARK);
    STANDALONE_MARKERS.iter().any(|marker| {
        trimmed
            .get(..marker.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(marker))
    })
}

/// Wraps component source regardless of the filename's extension. Used at
/// launch time for stored content that is not yet a standalone document.
pub fn wrap_component_source(code: &str, filename: &str) -> String {
    render_component_document(&rewrite_component_source(code), filename)
}

fn render_component_document(rewrite: &ComponentRewrite, filename: &str) -> String {
    ComponentDocument {
        title: filename,
        preamble: &rewrite.preamble,
        code: &rewrite.code,
        component_name: &rewrite.component_name,
    }
    .render()
}

struct ExportRules {
    named_declaration: Regex,
    bare_identifier: Regex,
    any_default: Regex,
}

struct ImportRules {
    dom_client: Regex,
    react_default: Regex,
    react_trailing_default: Regex,
    react_namespace: Regex,
}

fn export_rules() -> &'static ExportRules {
    static RULES: OnceLock<ExportRules> = OnceLock::new();
    RULES.get_or_init(|| ExportRules {
        named_declaration: compile(
            r"export\s+default\s+((?:async\s+)?function|class)\s+([A-Za-z0-9_$]+)",
        ),
        bare_identifier: compile(r"(?m)export\s+default\s+([A-Za-z0-9_$]+)[ \t]*(?:;|$)"),
        any_default: compile(r"export\s+default\b"),
    })
}

fn import_rules() -> &'static ImportRules {
    static RULES: OnceLock<ImportRules> = OnceLock::new();
    RULES.get_or_init(|| ImportRules {
        dom_client: compile(r#"import\s+[\s\S]*?from\s+['"]react-dom/client['"]"#),
        react_default: compile(r"\bimport\s+React\b"),
        react_trailing_default: compile(r"\bimport\s+[^;]*?,\s*React\b"),
        react_namespace: compile(r"\bimport\s+\*\s+as\s+React\b"),
    })
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in normalizer pattern should compile")
}

/// Applies the export rules in priority order, then synthesizes missing imports.
pub fn rewrite_component_source(code: &str) -> ComponentRewrite {
    let rules = export_rules();
    let (code, component_name, form) = if let Some(caps) = rules.named_declaration.captures(code) {
        let name = caps[2].to_owned();
        let rewritten = rules
            .named_declaration
            .replacen(code, 1, "${1} ${2}")
            .into_owned();
        (rewritten, name, ExportForm::NamedDeclaration)
    } else if let Some(name) = bare_identifier_export(rules, code) {
        let rewritten = rules.bare_identifier.replacen(code, 1, "").into_owned();
        (rewritten, name, ExportForm::BareIdentifier)
    } else if rules.any_default.is_match(code) {
        let replacement = format!("const {SYNTHETIC_COMPONENT_NAME} =");
        let rewritten = rules
            .any_default
            .replacen(code, 1, regex::NoExpand(&replacement))
            .into_owned();
        (
            rewritten,
            SYNTHETIC_COMPONENT_NAME.to_owned(),
            ExportForm::Expression,
        )
    } else {
        (
            code.to_owned(),
            SYNTHETIC_COMPONENT_NAME.to_owned(),
            ExportForm::Missing,
        )
    };

    let preamble = import_preamble(&code);
    ComponentRewrite {
        code,
        component_name,
        form,
        preamble,
    }
}

fn bare_identifier_export(rules: &ExportRules, code: &str) -> Option<String> {
    let caps = rules.bare_identifier.captures(code)?;
    let name = &caps[1];
    if NON_BINDING_WORDS.iter().any(|word| *word == name) {
        return None;
    }
    Some(name.to_owned())
}

fn import_preamble(code: &str) -> String {
    let rules = import_rules();
    let mut preamble = String::new();
    let imports_react = rules.react_default.is_match(code)
        || rules.react_trailing_default.is_match(code)
        || rules.react_namespace.is_match(code);
    if !imports_react {
        preamble.push_str("import React from 'react';\n");
    }
    if !rules.dom_client.is_match(code) {
        preamble.push_str("import { createRoot } from 'react-dom/client';\n");
    }
    preamble
}

/// The document title as a browser would report it: first `<title>`, entities
/// decoded, whitespace collapsed. `None` when missing or blank.
pub fn extract_document_title(html: &str) -> Option<String> {
    static TITLE: OnceLock<Regex> = OnceLock::new();
    let pattern = TITLE.get_or_init(|| compile(r"(?is)<title\b[^>]*>(.*?)</title\s*>"));
    let raw = pattern.captures(html)?.get(1)?.as_str();
    let collapsed = decode_entities(raw)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_owned();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let decoded = tail
            .find(';')
            .filter(|end| *end <= 10)
            .and_then(|end| decode_entity(&tail[1..end]).map(|ch| (ch, end)));
        match decoded {
            Some((ch, end)) => {
                out.push(ch);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let digits = name.strip_prefix('#')?;
            let code = match digits.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => digits.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}

fn extension_of(filename: &str) -> Option<&str> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.contains(['/', '\\']) {
        return None;
    }
    Some(ext)
}

/// Drops a trailing markup or component extension. Any other suffix after a
/// dot (`notes.txt`, `Level 1.5`) is part of the name.
pub fn strip_extension(filename: &str) -> String {
    match extension_of(filename) {
        Some(ext) if is_game_extension(ext) => {
            filename[..filename.len() - ext.len() - 1].to_owned()
        }
        _ => filename.to_owned(),
    }
}

fn is_game_extension(ext: &str) -> bool {
    COMPONENT_EXTENSIONS
        .iter()
        .chain(MARKUP_EXTENSIONS.iter())
        .any(|known| ext.eq_ignore_ascii_case(known))
}

/// Drops a trailing component-script extension only.
pub fn strip_component_extension(filename: &str) -> String {
    match SourceKind::detect(filename) {
        SourceKind::Component => strip_extension(filename),
        SourceKind::Markup => filename.to_owned(),
    }
}

pub fn is_importable_filename(filename: &str) -> bool {
    extension_of(filename).is_some_and(is_game_extension)
}

/// Display form of a stored name: underscores read as spaces.
pub fn format_display_name(name: &str) -> String {
    name.replace('_', " ")
}
