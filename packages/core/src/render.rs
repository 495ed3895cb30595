//! Human-readable rendering of call signatures.
//!
//! The output is plain text for terminals and logs. It is not a wire format.
//!
//! ```text
//! widget.update(w: Widget, *, label: Optional[str] = ...) -> Widget
//! ```
//!
//! Signatures that would not fit in 75 columns put one parameter per line:
//!
//! ```text
//! dataset.create(
//!     name: str,
//!     description: Optional[str] = ...,
//!     *,
//!     assets: list[Asset],
//! ) -> Dataset
//! ```

use crate::signature::{Param, ParamKind, Signature, TypeExpr};

/// Width past which parameters are wrapped onto their own lines.
pub const WRAP_WIDTH: usize = 75;

/// Render `signature` as it would be called under `name`.
pub fn render_signature(name: &str, signature: &Signature) -> String {
    let mut parts = Vec::with_capacity(signature.params.len() + 1);
    let mut keyword_marker_due = true;
    for param in &signature.params {
        match param.kind {
            ParamKind::VarPositional => keyword_marker_due = false,
            ParamKind::Keyword if keyword_marker_due => {
                parts.push("*".to_string());
                keyword_marker_due = false;
            }
            _ => {}
        }
        parts.push(render_param(param));
    }

    // name, the parentheses, and a ", " per part
    let width = name.len() + parts.iter().map(|p| p.len() + 2).sum::<usize>();
    let mut out = if width > WRAP_WIDTH {
        let body: String = parts.iter().map(|p| format!("    {p},\n")).collect();
        format!("{name}(\n{body})")
    } else {
        format!("{name}({})", parts.join(", "))
    };

    if let Some(ret) = &signature.returns {
        out.push_str(&format!(" -> {ret}"));
    }
    out
}

/// Render one parameter: `name: type`, with the `*`/`**` prefix for
/// catch-alls and ` = ...` when it has a default. `Any` is left unannotated.
pub fn render_param(param: &Param) -> String {
    let prefix = match param.kind {
        ParamKind::VarPositional => "*",
        ParamKind::VarKeyword => "**",
        ParamKind::Positional | ParamKind::Keyword => "",
    };
    let mut out = format!("{prefix}{}", param.name);
    match (&param.ty, param.has_default) {
        (TypeExpr::Any, true) => out.push_str("=..."),
        (TypeExpr::Any, false) => {}
        (ty, true) => out.push_str(&format!(": {ty} = ...")),
        (ty, false) => out.push_str(&format!(": {ty}")),
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
