//! The self-contained serializer scheme.
//!
//! Marked ids get private base-54 names and the whole output is wrapped in
//! an IIFE so the bindings never leak; one expression per top-level call, no
//! state persisted between calls.

use crate::features::Feature;
use crate::ir::{Node, RefId};

use super::{CoreState, Scheme, Serializer};

/// First-character alphabet (54 symbols).
const HEAD: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ_$";
/// Tail alphabet (64 symbols).
const TAIL: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ_$0123456789";

/// Words the encoding must never produce as-is.
const RESERVED: &[&str] = &[
    "do", "if", "in", "as", "of", "for", "let", "new", "try", "var", "case", "else", "enum",
    "eval", "null", "this", "true", "void", "with", "await", "break", "catch", "class", "const",
    "false", "super", "throw", "while", "yield", "delete", "export", "import", "public", "return",
    "static", "switch", "typeof", "default", "extends", "finally", "package", "private",
    "continue", "debugger", "function", "arguments", "interface", "protected", "implements",
    "instanceof",
];

/// Base-54 identifier encoding of an id: `a`, `b`, …, `A`, …, `$`, `ab`, ….
///
/// A name whose underscore-stripped form is a reserved word gets one more
/// leading underscore; the remap is injective because the plain encoding
/// never produces two names differing only in leading underscores mapping
/// to the same escape.
pub(crate) fn identifier(id: u32) -> String {
    let mut out = String::new();
    out.push(HEAD[(id as usize) % HEAD.len()] as char);
    let mut rest = (id as usize) / HEAD.len();
    while rest > 0 {
        out.push(TAIL[rest % TAIL.len()] as char);
        rest /= TAIL.len();
    }
    if RESERVED.contains(&out.trim_start_matches('_')) {
        out.insert(0, '_');
    }
    out
}

/// Scheme: private names, IIFE wrapper.
#[derive(Debug, Default)]
pub(crate) struct ContainedScheme;

impl Scheme for ContainedScheme {
    fn ref_param(&mut self, core: &mut CoreState, id: RefId) -> String {
        core.marked.insert(id.as_u32());
        identifier(id.as_u32())
    }

    fn assign(&mut self, core: &mut CoreState, id: RefId, expr: String) -> String {
        if core.marked.contains(&id.as_u32()) {
            format!("{}={expr}", identifier(id.as_u32()))
        } else {
            expr
        }
    }

    fn finish(
        &mut self,
        core: &mut CoreState,
        root: &Node,
        body: String,
        patches: String,
    ) -> String {
        if core.marked.is_empty() && patches.is_empty() {
            return statement_safe(body);
        }

        let seq = if patches.is_empty() {
            body
        } else {
            match root.own_id() {
                Some(id) => {
                    let name = self.ref_param(core, id);
                    if body.starts_with(&format!("{name}=")) {
                        format!("({body},{patches},{name})")
                    } else {
                        format!("({name}={body},{patches},{name})")
                    }
                }
                // Patches without an addressable root cannot arise from the
                // parser; keep the expression well-formed anyway.
                None => format!("({body},{patches})"),
            }
        };

        let mut ids: Vec<u32> = core.marked.iter().copied().collect();
        ids.sort_unstable();
        let params = ids
            .iter()
            .map(|id| identifier(*id))
            .collect::<Vec<_>>()
            .join(",");

        if core.features.has(Feature::ARROW_FUNCTION) {
            format!("(({params})=>({seq}))()")
        } else {
            format!("(function({params}){{return {seq}}})()")
        }
    }
}

/// Parenthesizes expressions a statement position would misparse.
fn statement_safe(body: String) -> String {
    if body.starts_with('{') {
        format!("({body})")
    } else {
        body
    }
}

/// Serializes a tree in self-contained mode.
pub(crate) fn serialize_tree(
    node: &Node,
    features: Feature,
    plugins: crate::plugin::PluginRegistry,
) -> crate::error::Result<String> {
    Serializer::new(features, plugins, ContainedScheme).serialize_top(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_names_are_single_letters() {
        assert_eq!(identifier(0), "a");
        assert_eq!(identifier(25), "z");
        assert_eq!(identifier(26), "A");
        assert_eq!(identifier(52), "_");
        assert_eq!(identifier(53), "$");
    }

    #[test]
    fn names_grow_past_the_alphabet() {
        assert_eq!(identifier(54), "ab");
        assert_ne!(identifier(54 * 64), identifier(54));
    }

    #[test]
    fn reserved_words_are_escaped() {
        // 'd' is head index 3, 'o' is tail index 14.
        let id = 3 + 54 * 14;
        assert_eq!(identifier(id), "_do");
    }
}
