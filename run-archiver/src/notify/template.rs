//! `{placeholder}` report templates.

use std::collections::BTreeMap;

pub const DEFAULT_TEMPLATE: &str = "\
Run archive report
==================
Status:      {status}
Run:         {run_name}
Host:        {host}
Report id:   {run_id}
Finished:    {finished_at}

Bundle:      {bundle}
Digest:      {digest}
Destination: {destination}
Error:       {error}
";

/// Substitute `{name}` placeholders from `fields`.
///
/// Placeholders with no matching field, and braces that do not enclose a
/// plain identifier, are copied through verbatim.
pub fn render(template: &str, fields: &BTreeMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];

        let name_len = after
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(after.len());
        let name = &after[..name_len];
        let closed = after[name_len..].starts_with('}');

        match fields.get(name) {
            Some(value) if closed && !name.is_empty() => {
                out.push_str(value);
                rest = &after[name_len + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}
