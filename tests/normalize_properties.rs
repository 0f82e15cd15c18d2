use vibevault::document::FALLBACK_COMPONENT_NAMES;
use vibevault::normalize::{is_standalone_document, normalize, Normalizer, SourceKind};

fn script_block(html: &str) -> &str {
    let start = html
        .find("<script type=\"text/babel\"")
        .expect("component document should embed a babel script");
    let end = html[start..]
        .find("</script>")
        .map(|offset| start + offset)
        .expect("babel script should be closed");
    &html[start..end]
}

fn first_candidate(script: &str) -> &str {
    let marker = "typeof ";
    let start = script.find(marker).expect("mount script checks candidates") + marker.len();
    let rest = &script[start..];
    let end = rest
        .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_' || ch == '$'))
        .unwrap_or(rest.len());
    &rest[..end]
}

#[test]
fn titled_markup_is_returned_byte_identical() {
    let inputs = [
        ("pong.html", "<!DOCTYPE html><html><head><title>Pong Deluxe</title></head><body></body></html>"),
        ("a.htm", "<html>\n<head><title>  Space   Race </title></head></html>"),
        ("b.html", "  <!doctype HTML>\r\n<title>Fish &amp; Chips</title>"),
        ("bom.html", "\u{feff}<!DOCTYPE html><html><head><title>Pong</title></head></html>"),
    ];
    let expected = ["Pong Deluxe", "Space Race", "Fish & Chips", "Pong"];
    for ((filename, raw), title) in inputs.into_iter().zip(expected) {
        let game = normalize(raw, filename);
        assert_eq!(game.kind, SourceKind::Markup, "{filename}");
        assert_eq!(game.title, title, "{filename}");
        assert_eq!(game.html, raw, "{filename} content should be untouched");
    }
}

#[test]
fn untitled_markup_falls_back_to_filename_stem() {
    let cases = [
        ("quiz.html", "<html><head><title></title></head><body>?</body></html>"),
        ("maze.html", "<!DOCTYPE html><html><body>no title</body></html>"),
        ("clicker.game.html", "<!DOCTYPE html><title>Document</title>"),
        ("blank.htm", "<html><title>   </title></html>"),
        ("Level 1.5", "<!DOCTYPE html><p>no extension to strip</p>"),
        ("notes.txt", "<!DOCTYPE html><title>Document</title>"),
    ];
    let expected = ["quiz", "maze", "clicker.game", "blank", "Level 1.5", "notes.txt"];
    for ((filename, raw), title) in cases.into_iter().zip(expected) {
        assert_eq!(normalize(raw, filename).title, title, "{filename}");
    }
}

#[test]
fn configured_placeholders_replace_the_default_list() {
    let normalizer = Normalizer::with_placeholder_titles(["Untitled"]);
    let raw = "<!DOCTYPE html><title>Untitled</title>";
    assert_eq!(normalizer.normalize(raw, "snake.html").title, "snake");
    let raw = "<!DOCTYPE html><title>Document</title>";
    assert_eq!(normalizer.normalize(raw, "snake.html").title, "Document");
}

#[test]
fn platformer_component_resolves_its_own_name_first() {
    let game = normalize(
        "export default function Platformer(){return null}",
        "platformer.jsx",
    );
    assert_eq!(game.kind, SourceKind::Component);
    assert_eq!(game.title, "platformer");
    assert_eq!(game.component_name.as_deref(), Some("Platformer"));

    let script = script_block(&game.html);
    assert_eq!(first_candidate(script), "Platformer");
    assert!(script.contains("function Platformer(){return null}"));
    assert!(!script.contains("export default"));
}

#[test]
fn named_default_exports_lose_the_qualifier_for_every_declaration_form() {
    let sources = [
        ("export default function Snake() {}", "Snake"),
        ("export default async function Loader() {}", "Loader"),
        ("export default class Board extends React.Component {}", "Board"),
        ("const Tetris = () => null;\nexport default Tetris;", "Tetris"),
        ("function Breakout() {}\nexport default Breakout", "Breakout"),
    ];
    for (source, name) in sources {
        let game = normalize(source, "game.tsx");
        let script = script_block(&game.html);
        assert_eq!(first_candidate(script), name, "{source}");
        assert!(!script.contains("export default"), "{source}");
    }
}

#[test]
fn missing_default_export_keeps_the_fallback_chain() {
    for source in [
        "function App() { return <div/>; }",
        "const Game = () => <canvas/>;",
        "",
        "export const helper = 1;",
    ] {
        let game = normalize(source, "untitled.js");
        assert!(is_standalone_document(&game.html));
        let script = script_block(&game.html);
        for name in FALLBACK_COMPONENT_NAMES {
            assert!(
                script.contains(&format!("typeof {name} !== 'undefined'")),
                "{source:?} should check for {name}"
            );
        }
    }
}

#[test]
fn anonymous_default_export_is_bound_to_the_synthetic_name() {
    let game = normalize("export default () => <h1>hi</h1>;", "hello.jsx");
    let script = script_block(&game.html);
    assert!(script.contains("const VibeApp = () => <h1>hi</h1>;"));
    assert_eq!(first_candidate(script), "VibeApp");
}

#[test]
fn output_is_always_standalone_and_stable_on_second_pass() {
    let inputs = [
        ("frag.html", "<canvas id=\"c\"></canvas>"),
        ("full.html", "<!DOCTYPE html><title>T</title>"),
        ("comp.jsx", "export default function C(){return null}"),
        ("weird.ts", "let x: number = 1;"),
    ];
    for (filename, raw) in inputs {
        let first = normalize(raw, filename);
        assert!(is_standalone_document(&first.html), "{filename}");

        let again = normalize(&first.html, &format!("{filename}.html"));
        assert_eq!(again.kind, SourceKind::Markup);
        assert_eq!(again.html, first.html, "{filename} should be a fixed point");
    }
}

#[test]
fn existing_imports_are_not_duplicated() {
    let source = "import React, { useState } from 'react';\nimport { createRoot } from 'react-dom/client';\nexport default function Counter(){ const [n] = useState(0); return n; }";
    let game = normalize(source, "counter.jsx");
    let script = script_block(&game.html);
    assert_eq!(script.matches("from 'react'").count(), 1);
    assert_eq!(script.matches("from 'react-dom/client'").count(), 1);
}
