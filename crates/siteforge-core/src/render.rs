//! Deterministic HTML rendering of component trees
//!
//! Output depends only on the tree, the page meta-tags and the theme key.
//! Properties are kept in sorted maps and children in their linear order,
//! so rendering unchanged input twice yields byte-identical output.
//!
//! Every element carries `data-sf-id` and `data-sf-type` so the editor can
//! swap a re-rendered fragment into a live preview.
//!
//! Only block kinds wrap their children. Children of text-level kinds
//! (`text`, `heading`, `link`, `button`) and of void kinds (`image`, `input`,
//! `divider`) are written right after the element's closing tag.

use serde::{Deserialize, Serialize};
use std::fmt::Write;
use tracing::warn;

use crate::component::{Component, ComponentId, ComponentKind, PropValue, Props};
use crate::site::Page;
use crate::tree::{ComponentTree, Node};
use crate::{Error, Result};

/// Theme used when the supplied key is not a safe stylesheet name.
pub const FALLBACK_THEME: &str = "default";

/// Non-fatal conditions encountered while rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderWarning {
    /// A component of an unknown type was replaced with a placeholder.
    PlaceholderUsed { id: ComponentId, component_type: String },
}

/// A complete HTML document for a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub html: String,
    pub warnings: Vec<RenderWarning>,
}

/// Rendered HTML of a single component subtree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: ComponentId,
    pub html: String,
    pub warnings: Vec<RenderWarning>,
}

/// Render a full page document.
pub fn render_page(page: &Page, theme: &str) -> Document {
    let theme = sanitize_theme(theme);
    let mut html = String::new();
    let mut warnings = Vec::new();

    html.push_str("<!DOCTYPE html>\n");
    let _ = writeln!(html, "<html data-theme=\"{}\">", escape_attr(theme));
    html.push_str("<head>\n<meta charset=\"utf-8\">\n");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    let _ = writeln!(html, "<title>{}</title>", escape_text(&page.title));
    for tag in &page.meta {
        let attr = if tag.key.starts_with("og:") || tag.key.starts_with("article:") {
            "property"
        } else {
            "name"
        };
        let _ = writeln!(
            html,
            "<meta {}=\"{}\" content=\"{}\">",
            attr,
            escape_attr(&tag.key),
            escape_attr(&tag.value)
        );
    }
    let _ = writeln!(
        html,
        "<link rel=\"stylesheet\" href=\"/themes/{}.css\">",
        escape_attr(theme)
    );
    html.push_str("</head>\n<body>\n");
    let _ = write!(html, "<main class=\"sf-page\" data-sf-page=\"{}\">", page.id);
    for id in page.tree.root_children() {
        write_node(&mut html, &page.tree, id, &mut warnings);
    }
    html.push_str("</main>\n</body>\n</html>\n");

    Document { html, warnings }
}

/// Render the subtree rooted at `id` of `tree`.
///
/// # Errors
/// - `Error::ComponentNotFound` if `id` is not in the tree
pub fn render_node(tree: &ComponentTree, id: &ComponentId) -> Result<Fragment> {
    if !tree.contains(id) {
        return Err(Error::ComponentNotFound(id.to_string()));
    }
    let mut html = String::new();
    let mut warnings = Vec::new();
    write_node(&mut html, tree, id, &mut warnings);
    Ok(Fragment {
        id: id.clone(),
        html,
        warnings,
    })
}

/// Render a component in wire form, with its subtree, in isolation.
///
/// # Errors
/// - `Error::DuplicateId`/`Error::DepthExceeded` if the component is not a
///   well-formed subtree
pub fn render_component(component: &Component) -> Result<Fragment> {
    let tree = ComponentTree::from_components(vec![component.clone()])?;
    render_node(&tree, &component.id)
}

fn write_node(
    out: &mut String,
    tree: &ComponentTree,
    id: &ComponentId,
    warnings: &mut Vec<RenderWarning>,
) {
    let Some(node) = tree.get(id) else {
        return;
    };
    let props = node.props();

    match node.kind() {
        ComponentKind::Text => {
            open(out, "p", node, &[]);
            out.push_str(&text_prop(props, "text"));
            out.push_str("</p>");
            write_children(out, tree, node, warnings);
        }
        ComponentKind::Heading => {
            let level = props
                .get("level")
                .and_then(PropValue::as_i64)
                .map(|l| l.clamp(1, 6) as u8)
                .unwrap_or(2);
            let tag = format!("h{}", level);
            open(out, &tag, node, &[]);
            out.push_str(&text_prop(props, "text"));
            let _ = write!(out, "</{}>", tag);
            write_children(out, tree, node, warnings);
        }
        ComponentKind::Image => {
            let src = safe_url(&scalar_prop(props, "src"));
            let alt = scalar_prop(props, "alt");
            open(out, "img", node, &[("src", src), ("alt", alt)]);
            write_children(out, tree, node, warnings);
        }
        ComponentKind::Container => {
            open(out, "div", node, &[]);
            write_children(out, tree, node, warnings);
            out.push_str("</div>");
        }
        ComponentKind::Section => {
            open(out, "section", node, &[]);
            write_children(out, tree, node, warnings);
            out.push_str("</section>");
        }
        ComponentKind::Columns => {
            let count = props
                .get("columns")
                .and_then(PropValue::as_i64)
                .map(|c| c.clamp(1, 12) as u8)
                .unwrap_or_else(|| node.children().len().clamp(1, 12) as u8);
            open(out, "div", node, &[("data-columns", count.to_string())]);
            write_children(out, tree, node, warnings);
            out.push_str("</div>");
        }
        ComponentKind::Form => {
            let method = match scalar_prop(props, "method").to_ascii_lowercase().as_str() {
                "get" => "get",
                _ => "post",
            };
            let action = safe_url(&scalar_prop(props, "action"));
            open(
                out,
                "form",
                node,
                &[("action", action), ("method", method.to_string())],
            );
            write_children(out, tree, node, warnings);
            out.push_str("</form>");
        }
        ComponentKind::Input => {
            let input_type = scalar_prop(props, "input_type");
            let input_type = if !input_type.is_empty()
                && input_type.bytes().all(|b| b.is_ascii_lowercase())
            {
                input_type
            } else {
                "text".to_string()
            };
            let mut attrs = vec![
                ("type", input_type),
                ("name", scalar_prop(props, "name")),
            ];
            let placeholder = scalar_prop(props, "placeholder");
            if !placeholder.is_empty() {
                attrs.push(("placeholder", placeholder));
            }
            open(out, "input", node, &attrs);
            write_children(out, tree, node, warnings);
        }
        ComponentKind::Button => {
            let button_type = match scalar_prop(props, "button_type").as_str() {
                "button" => "button",
                "reset" => "reset",
                _ => "submit",
            };
            open(out, "button", node, &[("type", button_type.to_string())]);
            out.push_str(&text_prop(props, "label"));
            out.push_str("</button>");
            write_children(out, tree, node, warnings);
        }
        ComponentKind::Link => {
            let mut attrs = vec![("href", safe_url(&scalar_prop(props, "href")))];
            if props.get("new_tab").and_then(PropValue::as_bool) == Some(true) {
                attrs.push(("target", "_blank".to_string()));
                attrs.push(("rel", "noopener noreferrer".to_string()));
            }
            open(out, "a", node, &attrs);
            out.push_str(&text_prop(props, "text"));
            out.push_str("</a>");
            write_children(out, tree, node, warnings);
        }
        ComponentKind::Divider => {
            open(out, "hr", node, &[]);
            write_children(out, tree, node, warnings);
        }
        ComponentKind::Other(tag) => {
            warn!(
                component_id = %node.id(),
                component_type = %tag,
                "Rendering placeholder for unknown component type"
            );
            warnings.push(RenderWarning::PlaceholderUsed {
                id: node.id().clone(),
                component_type: tag.clone(),
            });
            let _ = write!(
                out,
                "<div class=\"sf-placeholder\" data-sf-id=\"{}\" data-sf-type=\"{}\" role=\"note\">\
                 <span class=\"sf-placeholder-label\">\
                 Unsupported component type &quot;{}&quot;</span>",
                escape_attr(node.id().as_str()),
                escape_attr(tag),
                escape_text(tag)
            );
            write_children(out, tree, node, warnings);
            out.push_str("</div>");
        }
    }
}

fn write_children(
    out: &mut String,
    tree: &ComponentTree,
    node: &Node,
    warnings: &mut Vec<RenderWarning>,
) {
    for child in node.children() {
        write_node(out, tree, child, warnings);
    }
}

/// Write an opening tag with the common attributes followed by `extra`.
fn open(out: &mut String, tag: &str, node: &Node, extra: &[(&str, String)]) {
    let _ = write!(
        out,
        "<{} data-sf-id=\"{}\" data-sf-type=\"{}\" class=\"sf-{}",
        tag,
        escape_attr(node.id().as_str()),
        escape_attr(node.kind().as_str()),
        escape_attr(node.kind().as_str())
    );
    if let Some(class) = node.props().get("class").and_then(PropValue::as_str) {
        let class = class.trim();
        if !class.is_empty() {
            out.push(' ');
            out.push_str(&escape_attr(class));
        }
    }
    out.push('"');
    for (name, value) in extra {
        let _ = write!(out, " {}=\"{}\"", name, escape_attr(value));
    }
    out.push('>');
}

fn scalar_prop(props: &Props, key: &str) -> String {
    props
        .get(key)
        .and_then(PropValue::to_scalar_string)
        .unwrap_or_default()
}

fn text_prop(props: &Props, key: &str) -> String {
    escape_text(&scalar_prop(props, key))
}

/// Neutralize script-bearing URL schemes.
fn safe_url(url: &str) -> String {
    let trimmed = url.trim();
    let lowered: String = trimmed
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect::<String>()
        .to_ascii_lowercase();
    if lowered.starts_with("javascript:")
        || lowered.starts_with("vbscript:")
        || lowered.starts_with("data:")
    {
        "#".to_string()
    } else {
        trimmed.to_string()
    }
}

fn sanitize_theme(theme: &str) -> &str {
    let valid = !theme.is_empty()
        && theme.len() <= 64
        && theme
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid { theme } else { FALLBACK_THEME }
}

/// Escape text content.
pub fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape a double-quoted attribute value.
pub fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::NewComponent;
    use crate::site::{Page, WebsiteId};

    fn page_with(components: Vec<NewComponent>) -> Page {
        let mut page = Page::new(WebsiteId::new(), "/", "Home & <Welcome>")
            .with_meta("description", "A \"quoted\" site")
            .with_meta("og:title", "Home");
        for (i, component) in components.into_iter().enumerate() {
            let (tree, _) = page.tree.insert(None, component, i).unwrap();
            page.tree = tree;
        }
        page
    }

    #[test]
    fn test_render_page_is_deterministic() {
        let page = page_with(vec![
            NewComponent::new(ComponentKind::Heading)
                .with_id("h")
                .with_prop("text", "Hello")
                .with_prop("level", 1.0),
            NewComponent::new(ComponentKind::Container)
                .with_id("box")
                .with_prop("class", "wide")
                .with_prop("zeta", "z")
                .with_prop("alpha", "a")
                .with_child(
                    NewComponent::new(ComponentKind::Text)
                        .with_id("t")
                        .with_prop("text", "x < y"),
                ),
        ]);

        let first = render_page(&page, "ocean");
        let second = render_page(&page, "ocean");
        assert_eq!(first.html, second.html);
        assert!(first.warnings.is_empty());

        let html = &first.html;
        assert!(html.contains("<title>Home &amp; &lt;Welcome&gt;</title>"));
        assert!(html.contains("<meta name=\"description\" content=\"A &quot;quoted&quot; site\">"));
        assert!(html.contains("<meta property=\"og:title\" content=\"Home\">"));
        assert!(html.contains("href=\"/themes/ocean.css\""));
        assert!(html.contains(
            "<h1 data-sf-id=\"h\" data-sf-type=\"heading\" class=\"sf-heading\">Hello</h1>"
        ));
        assert!(html.contains(
            "<div data-sf-id=\"box\" data-sf-type=\"container\" class=\"sf-container wide\">\
             <p data-sf-id=\"t\" data-sf-type=\"text\" class=\"sf-text\">x &lt; y</p></div>"
        ));
        // Pre-order: heading precedes the container
        assert!(html.find("data-sf-id=\"h\"").unwrap() < html.find("data-sf-id=\"box\"").unwrap());
    }

    #[test]
    fn test_unknown_type_renders_placeholder() {
        let page = page_with(vec![
            NewComponent::new("carousel")
                .with_id("c")
                .with_child(
                    NewComponent::new(ComponentKind::Text)
                        .with_id("inner")
                        .with_prop("text", "kept"),
                ),
            NewComponent::new(ComponentKind::Text)
                .with_id("after")
                .with_prop("text", "still here"),
        ]);
        let doc = render_page(&page, "default");

        assert_eq!(
            doc.warnings,
            vec![RenderWarning::PlaceholderUsed {
                id: "c".into(),
                component_type: "carousel".to_string()
            }]
        );
        assert!(doc.html.contains("sf-placeholder"));
        assert!(doc.html.contains("kept"));
        assert!(doc.html.contains("still here"));
    }

    #[test]
    fn test_render_component_in_isolation() {
        let page = page_with(vec![
            NewComponent::new(ComponentKind::Link)
                .with_id("l")
                .with_prop("href", "javascript:alert(1)")
                .with_prop("text", "click")
                .with_prop("new_tab", true),
        ]);
        let component = page.tree.find(&"l".into()).unwrap();
        let fragment = render_component(&component).unwrap();
        assert_eq!(
            fragment.html,
            "<a data-sf-id=\"l\" data-sf-type=\"link\" class=\"sf-link\" href=\"#\" \
             target=\"_blank\" rel=\"noopener noreferrer\">click</a>"
        );
        assert_eq!(render_node(&page.tree, &"l".into()).unwrap(), fragment);
    }

    #[test]
    fn test_children_of_inline_and_void_kinds_follow_the_element() {
        let page = page_with(vec![
            NewComponent::new(ComponentKind::Text)
                .with_id("t")
                .with_prop("text", "Intro")
                .with_child(
                    NewComponent::new(ComponentKind::Container)
                        .with_id("moved")
                        .with_child(
                            NewComponent::new(ComponentKind::Text)
                                .with_id("deep")
                                .with_prop("text", "Deep"),
                        ),
                ),
            NewComponent::new(ComponentKind::Image)
                .with_id("img")
                .with_prop("src", "/a.png")
                .with_child(
                    NewComponent::new(ComponentKind::Link)
                        .with_id("caption")
                        .with_prop("text", "Credit"),
                ),
        ]);

        let text = render_node(&page.tree, &"t".into()).unwrap().html;
        assert!(text.starts_with(
            "<p data-sf-id=\"t\" data-sf-type=\"text\" class=\"sf-text\">Intro</p>\
             <div data-sf-id=\"moved\""
        ));
        assert!(text.ends_with("Deep</p></div>"));

        let image = render_node(&page.tree, &"img".into()).unwrap().html;
        assert!(image.contains("alt=\"\"><a data-sf-id=\"caption\""));
        assert!(image.ends_with(">Credit</a>"));
    }

    #[test]
    fn test_unsafe_theme_falls_back() {
        let page = page_with(vec![]);
        let doc = render_page(&page, "../evil\"");
        assert!(doc.html.contains("/themes/default.css"));
        assert!(doc.html.contains("data-theme=\"default\""));
    }

    #[test]
    fn test_form_controls() {
        let page = page_with(vec![
            NewComponent::new(ComponentKind::Form)
                .with_id("f")
                .with_prop("action", "/subscribe")
                .with_child(
                    NewComponent::new(ComponentKind::Input)
                        .with_id("email")
                        .with_prop("input_type", "email")
                        .with_prop("name", "email"),
                )
                .with_child(
                    NewComponent::new(ComponentKind::Button)
                        .with_id("go")
                        .with_prop("label", "Join"),
                ),
        ]);
        let fragment = render_node(&page.tree, &"f".into()).unwrap();
        assert!(fragment.html.starts_with(concat!(
            "<form data-sf-id=\"f\" data-sf-type=\"form\" class=\"sf-form\" ",
            "action=\"/subscribe\" method=\"post\">"
        )));
        assert!(fragment.html.contains("type=\"email\" name=\"email\">"));
        assert!(fragment.html.contains(">Join</button></form>"));
    }
}
