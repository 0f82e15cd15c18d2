//! Standalone document skeleton for component-style game sources.
//!
//! The generated page pins every runtime dependency to an exact version on a
//! public CDN, transpiles the embedded source in the browser, and mounts the
//! resolved component into `#root`. Uncaught guest errors replace the mount
//! point with an error panel instead of leaving a blank page.

use serde_json::{json, Map, Value};

/// Identifier bound to an anonymous `export default` expression.
pub const SYNTHETIC_COMPONENT_NAME: &str = "VibeApp";

/// Names tried, in order, after the detected component identifier.
pub const FALLBACK_COMPONENT_NAMES: [&str; 3] = [SYNTHETIC_COMPONENT_NAME, "App", "Game"];

pub const TRANSPILER_URL: &str = "https://unpkg.com/@babel/standalone/babel.min.js";
pub const STYLE_UTILITY_URL: &str = "https://cdn.tailwindcss.com";
pub const MOUNT_ELEMENT_ID: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinnedDependency {
    pub specifier: &'static str,
    pub url: &'static str,
}

pub const PINNED_DEPENDENCIES: [PinnedDependency; 8] = [
    PinnedDependency {
        specifier: "react",
        url: "https://esm.sh/react@18.3.1",
    },
    PinnedDependency {
        specifier: "react-dom/client",
        url: "https://esm.sh/react-dom@18.3.1/client",
    },
    PinnedDependency {
        specifier: "lucide-react",
        url: "https://esm.sh/lucide-react@0.469.0?external=react,react-dom",
    },
    PinnedDependency {
        specifier: "framer-motion",
        url: "https://esm.sh/framer-motion@11.15.0?external=react,react-dom",
    },
    PinnedDependency {
        specifier: "recharts",
        url: "https://esm.sh/recharts@2.15.0?external=react,react-dom",
    },
    PinnedDependency {
        specifier: "clsx",
        url: "https://esm.sh/clsx@2.1.1",
    },
    PinnedDependency {
        specifier: "tailwind-merge",
        url: "https://esm.sh/tailwind-merge@2.5.5",
    },
    PinnedDependency {
        specifier: "date-fns",
        url: "https://esm.sh/date-fns@4.1.0",
    },
];

const ERROR_HANDLER_SCRIPT: &str = r#"  <script>
    window.onerror = function(message, source, lineno, colno, error) {
      const root = document.getElementById('root');
      if (root) {
        root.innerHTML = `<div style="color:#ef4444; background:#1a1a1a; padding:20px; font-family:monospace; height:100vh; display:flex; flex-direction:column; justify-content:center; align-items:center; text-align:center;">
          <h2 style="font-size:24px; margin-bottom:10px;">Runtime Error</h2>
          <div style="background:#2a0000; padding:15px; border-radius:8px; border:1px solid #ff0000; max-width:800px; text-align:left;">
             <div style="font-weight:bold; margin-bottom:5px;">${message}</div>
             <div style="font-size:12px; opacity:0.7;">${source} : ${lineno}:${colno}</div>
          </div>
        </div>`;
      }
    };
  </script>
"#;

const BASE_STYLE: &str = r#"  <style>
    body { background-color: #000; color: #eee; margin: 0; }
    #root { width: 100%; min-height: 100vh; display: flex; flex-direction: column; }
  </style>
"#;

/// Inputs for one generated page.
#[derive(Debug, Clone, Copy)]
pub struct ComponentDocument<'a> {
    pub title: &'a str,
    pub preamble: &'a str,
    pub code: &'a str,
    pub component_name: &'a str,
}

impl ComponentDocument<'_> {
    pub fn render(&self) -> String {
        let mut html = String::with_capacity(self.code.len() + 4096);
        html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
        html.push_str("  <meta charset=\"UTF-8\">\n");
        html.push_str(
            "  <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n",
        );
        html.push_str("  <title>");
        html.push_str(&escape_html(self.title));
        html.push_str("</title>\n");
        html.push_str(ERROR_HANDLER_SCRIPT);
        html.push_str(&format!("  <script src=\"{STYLE_UTILITY_URL}\"></script>\n"));
        html.push_str("  <script type=\"importmap\">\n");
        html.push_str(&import_map_json());
        html.push_str("\n  </script>\n");
        html.push_str(&format!("  <script src=\"{TRANSPILER_URL}\"></script>\n"));
        html.push_str(BASE_STYLE);
        html.push_str("</head>\n<body>\n");
        html.push_str(&format!("  <div id=\"{MOUNT_ELEMENT_ID}\"></div>\n"));
        html.push_str("  <script type=\"text/babel\" data-type=\"module\">\n");
        html.push_str(self.preamble);
        html.push_str(self.code);
        if !self.code.ends_with('\n') {
            html.push('\n');
        }
        html.push_str(&mount_script(&candidate_chain(self.component_name)));
        html.push_str("  </script>\n</body>\n</html>\n");
        html
    }
}

/// The import map body, one entry per pinned dependency.
pub fn import_map_json() -> String {
    let imports = PINNED_DEPENDENCIES
        .iter()
        .map(|dep| (dep.specifier.to_owned(), Value::String(dep.url.to_owned())))
        .collect::<Map<String, Value>>();
    // Serializing a json! value cannot fail.
    serde_json::to_string_pretty(&json!({ "imports": imports })).unwrap_or_default()
}

/// Resolution order: the detected identifier first, then the fixed fallbacks,
/// without repeats.
pub fn candidate_chain(component_name: &str) -> Vec<&str> {
    let mut chain: Vec<&str> = Vec::with_capacity(FALLBACK_COMPONENT_NAMES.len() + 1);
    if !component_name.is_empty() {
        chain.push(component_name);
    }
    for name in FALLBACK_COMPONENT_NAMES {
        if !chain.contains(&name) {
            chain.push(name);
        }
    }
    chain
}

fn mount_script(candidates: &[&str]) -> String {
    let mut script = String::new();
    script.push_str(&format!(
        "    const rootEl = document.getElementById('{MOUNT_ELEMENT_ID}');\n"
    ));
    script.push_str("    if (rootEl) {\n      try {\n");
    script.push_str("        let ComponentToRender = null;\n");
    for name in candidates {
        script.push_str(&format!(
            "        if (!ComponentToRender) {{ try {{ if (typeof {name} !== 'undefined') ComponentToRender = {name}; }} catch (e) {{}} }}\n"
        ));
    }
    script.push_str("        if (ComponentToRender) {\n");
    script.push_str("          const root = createRoot(rootEl);\n");
    script.push_str("          root.render(<ComponentToRender />);\n");
    script.push_str("        }\n");
    script.push_str("      } catch (e) { console.error(e); }\n    }\n");
    script
}

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
