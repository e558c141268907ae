//! UI-framework detection and component-ancestry collection.
//!
//! Frameworks tag DOM elements with marker properties pointing into their
//! internal component trees. Detection checks the markers in a fixed
//! priority order and the first structural match wins; the walk itself is
//! framework-agnostic, reading whichever of the known slot names the node
//! carries.

use pagelens_sanitize::PageValue;

use crate::model::ComponentAncestryEntry;

/// Parent-chain hops inspected per walk, counting skipped markup nodes.
pub const MAX_ANCESTRY_DEPTH: usize = 10;
/// Prop keys reported per component.
pub const MAX_PROP_KEYS: usize = 20;
/// State-slot keys reported per component.
pub const MAX_STATE_KEYS: usize = 10;

const REACT_MARKER_PREFIX: &str = "__reactFiber$";
const VUE_MARKER: &str = "__vueParentComponent";
const SVELTE_MARKER: &str = "__svelte_meta";
const CHILDREN_PROP: &str = "children";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Framework {
    React,
    Vue,
    Svelte,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::React => "react",
            Framework::Vue => "vue",
            Framework::Svelte => "svelte",
        }
    }
}

/// A framework's tree node for the element an error surfaced on.
#[derive(Clone, Debug)]
pub struct DetectedComponent {
    pub framework: Framework,
    pub node: PageValue,
}

/// Checks an element's marker properties, React before Vue before Svelte.
pub fn detect_component(element: &PageValue) -> Option<DetectedComponent> {
    let keys = element.entry_keys()?;
    if let Some(marker) = keys.iter().find(|key| key.starts_with(REACT_MARKER_PREFIX)) {
        return element.entry(marker).map(|node| DetectedComponent {
            framework: Framework::React,
            node,
        });
    }
    if keys.iter().any(|key| key == VUE_MARKER) {
        return element.entry(VUE_MARKER).map(|node| DetectedComponent {
            framework: Framework::Vue,
            node,
        });
    }
    if keys.iter().any(|key| key == SVELTE_MARKER) {
        return element.entry(SVELTE_MARKER).map(|node| DetectedComponent {
            framework: Framework::Svelte,
            node,
        });
    }
    None
}

/// Walks the parent chain from the error-site node, root-first in the
/// returned list. Markup nodes (string-typed, like host elements) are
/// skipped but still spend a hop.
pub fn component_ancestry(detected: &DetectedComponent) -> Vec<ComponentAncestryEntry> {
    let mut collected = Vec::new();
    let mut node = Some(detected.node.clone());
    let mut hops = 0;
    while let Some(current) = node {
        if hops >= MAX_ANCESTRY_DEPTH {
            break;
        }
        hops += 1;
        if let Some(entry) = describe_node(&current) {
            collected.push(entry);
        }
        node = parent_of(&current);
    }
    collected.reverse();
    collected
}

fn describe_node(node: &PageValue) -> Option<ComponentAncestryEntry> {
    let name = component_name(node)?;
    let prop_keys = collect_prop_keys(node);
    let (has_state, state_keys) = state_of(node);
    Some(ComponentAncestryEntry {
        name,
        prop_keys,
        has_state,
        state_keys,
    })
}

/// `None` marks a plain-markup node. Components with no recoverable name
/// report as "Anonymous".
fn component_name(node: &PageValue) -> Option<String> {
    let slot = node.entry("type")?;
    match &slot {
        PageValue::Str(_) => None,
        PageValue::Function { name } => Some(or_anonymous(name.clone())),
        PageValue::Object(_) => {
            let display = slot.entry("displayName").and_then(text_of);
            let type_name = slot.entry("name").and_then(text_of);
            Some(or_anonymous(display.or(type_name).unwrap_or_default()))
        }
        _ => None,
    }
}

fn collect_prop_keys(node: &PageValue) -> Vec<String> {
    let props = node
        .entry("memoizedProps")
        .or_else(|| node.entry("props"));
    let Some(keys) = props.as_ref().and_then(PageValue::entry_keys) else {
        return Vec::new();
    };
    keys.into_iter()
        .filter(|key| key != CHILDREN_PROP)
        .take(MAX_PROP_KEYS)
        .collect()
}

fn state_of(node: &PageValue) -> (Option<bool>, Option<Vec<String>>) {
    let state = node
        .entry("memoizedState")
        .or_else(|| node.entry("state"));
    match state {
        None | Some(PageValue::Null) => (None, None),
        Some(slot) => {
            let keys = slot
                .entry_keys()
                .map(|keys| keys.into_iter().take(MAX_STATE_KEYS).collect());
            (Some(true), keys)
        }
    }
}

fn parent_of(node: &PageValue) -> Option<PageValue> {
    node.entry("return")
        .or_else(|| node.entry("parent"))
        .filter(|parent| !matches!(parent, PageValue::Null))
}

fn text_of(value: PageValue) -> Option<String> {
    value.as_str().map(str::to_string)
}

fn or_anonymous(name: String) -> String {
    if name.is_empty() {
        "Anonymous".to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn react_element(fiber: PageValue) -> PageValue {
        PageValue::object(vec![("__reactFiber$k3x9".into(), fiber)])
    }

    fn named_fiber(name: &str, parent: PageValue) -> PageValue {
        PageValue::object(vec![
            ("type".into(), PageValue::function(name)),
            ("return".into(), parent),
        ])
    }

    #[test]
    fn fiber_chain_reports_root_first_and_skips_markup() {
        let root = PageValue::object(vec![
            (
                "type".into(),
                PageValue::object(vec![("displayName".into(), PageValue::text("Cart"))]),
            ),
            ("return".into(), PageValue::Null),
        ]);
        let host = PageValue::object(vec![
            ("type".into(), PageValue::text("div")),
            ("return".into(), root),
        ]);
        let leaf = PageValue::object(vec![
            ("type".into(), PageValue::function("CartItem")),
            (
                "memoizedProps".into(),
                PageValue::object(vec![
                    ("sku".into(), PageValue::text("A-1")),
                    ("qty".into(), 2i64.into()),
                    ("children".into(), PageValue::Null),
                ]),
            ),
            (
                "memoizedState".into(),
                PageValue::object(vec![("expanded".into(), true.into())]),
            ),
            ("return".into(), host),
        ]);

        let detected = detect_component(&react_element(leaf)).expect("react marker");
        assert_eq!(detected.framework, Framework::React);

        let ancestry = component_ancestry(&detected);
        let names: Vec<&str> = ancestry.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Cart", "CartItem"]);

        let leaf_entry = &ancestry[1];
        assert_eq!(leaf_entry.prop_keys, vec!["sku".to_string(), "qty".to_string()]);
        assert_eq!(leaf_entry.has_state, Some(true));
        assert_eq!(leaf_entry.state_keys, Some(vec!["expanded".to_string()]));
        assert_eq!(ancestry[0].has_state, None);
    }

    #[test]
    fn react_marker_outranks_vue() {
        let element = PageValue::object(vec![
            (
                "__vueParentComponent".into(),
                PageValue::object(vec![("type".into(), PageValue::function("App"))]),
            ),
            (
                "__reactFiber$z".into(),
                PageValue::object(vec![("type".into(), PageValue::function("Root"))]),
            ),
        ]);
        let detected = detect_component(&element).expect("detected");
        assert_eq!(detected.framework, Framework::React);
    }

    #[test]
    fn vue_instances_walk_through_parent_slots() {
        let app = PageValue::object(vec![
            (
                "type".into(),
                PageValue::object(vec![("name".into(), PageValue::text("App"))]),
            ),
            ("parent".into(), PageValue::Null),
        ]);
        let checkout = PageValue::object(vec![
            (
                "type".into(),
                PageValue::object(vec![("name".into(), PageValue::text("Checkout"))]),
            ),
            (
                "props".into(),
                PageValue::object(vec![("total".into(), 9.5.into())]),
            ),
            ("parent".into(), app),
        ]);
        let element = PageValue::object(vec![("__vueParentComponent".into(), checkout)]);

        let detected = detect_component(&element).expect("vue marker");
        assert_eq!(detected.framework, Framework::Vue);
        let ancestry = component_ancestry(&detected);
        let names: Vec<&str> = ancestry.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["App", "Checkout"]);
        assert_eq!(ancestry[1].prop_keys, vec!["total".to_string()]);
    }

    #[test]
    fn walk_stops_after_ten_hops() {
        let mut chain = PageValue::Null;
        for n in 0..15 {
            chain = PageValue::object(vec![
                ("type".into(), PageValue::function(format!("C{n}"))),
                ("return".into(), chain),
            ]);
        }
        let detected = detect_component(&react_element(chain)).expect("detected");
        let ancestry = component_ancestry(&detected);
        assert_eq!(ancestry.len(), MAX_ANCESTRY_DEPTH);
        // Innermost ten of the fifteen, outermost-reached first.
        assert_eq!(ancestry.first().map(|e| e.name.as_str()), Some("C5"));
        assert_eq!(ancestry.last().map(|e| e.name.as_str()), Some("C14"));
    }

    #[test]
    fn prop_keys_cap_at_twenty() {
        let props: Vec<(String, PageValue)> = (0..25)
            .map(|n| (format!("p{n:02}"), PageValue::Null))
            .collect();
        let fiber = PageValue::object(vec![
            ("type".into(), PageValue::function("Wide")),
            ("memoizedProps".into(), PageValue::object(props)),
            ("return".into(), PageValue::Null),
        ]);
        let detected = detect_component(&react_element(fiber)).expect("detected");
        let ancestry = component_ancestry(&detected);
        assert_eq!(ancestry[0].prop_keys.len(), MAX_PROP_KEYS);
    }

    #[test]
    fn unnamed_components_report_as_anonymous() {
        let fiber = named_fiber("", PageValue::Null);
        let detected = detect_component(&react_element(fiber)).expect("detected");
        let ancestry = component_ancestry(&detected);
        assert_eq!(ancestry[0].name, "Anonymous");
    }

    #[test]
    fn unmarked_elements_detect_nothing() {
        let element = PageValue::object(vec![("id".into(), PageValue::text("root"))]);
        assert!(detect_component(&element).is_none());
        assert!(detect_component(&PageValue::text("div")).is_none());
    }
}
