//! Embedded documentation and templates.
//!
//! Everything here is baked into the binary so `hive init` and `hive docs`
//! work without the source tree.

/// Embeds docs at compile time as text.
///
/// Generates:
/// - Public constants for each embedded document
/// - `get_embedded_doc(name)` function for lookup
/// - `list_docs()` function for discovery
macro_rules! embedded_docs {
    ($($name:literal => $path:literal => $const_name:ident),* $(,)?) => {
        $(
            pub const $const_name: &str =
                include_str!(concat!("../../templates/docs/", $path));
        )*

        pub fn get_embedded_doc(name: &str) -> Option<&'static str> {
            let key = name.strip_suffix(".md").unwrap_or(name);
            match key {
                $( $name => Some($const_name), )*
                _ => None,
            }
        }

        pub fn list_docs() -> Vec<&'static str> {
            vec![ $( $name, )* ]
        }
    };
}

embedded_docs! {
    "build-secrets" => "build-secrets.md" => DOC_BUILD_SECRETS,
    "sandbox-protocol" => "sandbox-protocol.md" => DOC_SANDBOX_PROTOCOL,
}

pub const TEMPLATE_HIVE_CONFIG: &str = include_str!("../../templates/hive.yaml");

/// Extract every fenced block tagged `lang` from a markdown document.
pub fn fenced_blocks(doc: &str, lang: &str) -> Vec<String> {
    let opener = format!("```{}", lang);
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    for line in doc.lines() {
        let trimmed = line.trim();
        if current.is_none() {
            if trimmed == opener {
                current = Some(Vec::new());
            }
            continue;
        }
        if trimmed == "```" {
            if let Some(lines) = current.take() {
                blocks.push(dedent(&lines));
            }
        } else if let Some(lines) = current.as_mut() {
            lines.push(line);
        }
    }
    blocks
}

fn dedent(lines: &[&str]) -> String {
    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    lines
        .iter()
        .map(|l| if l.len() >= indent { &l[indent..] } else { l.trim_start() })
        .collect::<Vec<_>>()
        .join("\n")
}
