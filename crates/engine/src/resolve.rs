//! # Template Resolution
//!
//! Request templates reference variables with `{{ name }}` markers. This module replaces
//! those markers with values from a [`VariableScope`] and produces the substituted clone
//! of a [`RequestTemplate`] handed to an execution client.
//!
//! ## Lookup order
//!
//! - `{{ vars.workflow.region }}` - exact key
//! - `{{ region }}` - exact key, then `vars.request.region`, then `vars.workflow.region`
//! - `{{ env.HOME }}` - process environment captured in the ambient scope
//!
//! Unresolved markers are left in place so the user can see exactly what was missing.
//!
//! ## Usage
//!
//! ```rust
//! use weft_engine::resolve::interpolate;
//! use weft_engine::scope::VariableScope;
//!
//! let scope = VariableScope::from_pairs([("vars.workflow.host", "api.example.com")]);
//! assert_eq!(interpolate("https://{{ host }}/users", &scope), "https://api.example.com/users");
//! assert_eq!(interpolate("{{missing}}", &scope), "{{missing}}");
//! ```

use tracing::debug;
use weft_types::RequestTemplate;

use crate::executor::PreparedRequest;
use crate::scope::VariableScope;

const OPEN_MARKER: &str = "{{";
const CLOSE_MARKER: &str = "}}";

/// Replaces every `{{ name }}` marker in `input` with its value from `scope`.
pub fn interpolate(input: &str, scope: &VariableScope) -> String {
    let mut output_string = String::with_capacity(input.len());
    let mut remaining_string = input;

    while let Some(template_start) = remaining_string.find(OPEN_MARKER) {
        let (string_before_template, string_after_template) = remaining_string.split_at(template_start);
        output_string.push_str(string_before_template);

        let Some(template_end_index) = string_after_template.find(CLOSE_MARKER) else {
            // No closing marker; keep the rest verbatim.
            output_string.push_str(string_after_template);
            return output_string;
        };

        let marker = &string_after_template[..template_end_index + CLOSE_MARKER.len()];
        let name = string_after_template[OPEN_MARKER.len()..template_end_index].trim();
        match scope.lookup(name) {
            Some(value) => output_string.push_str(value),
            None => {
                debug!(variable = %name, "template variable unresolved");
                output_string.push_str(marker);
            }
        }
        remaining_string = &string_after_template[template_end_index + CLOSE_MARKER.len()..];
    }

    output_string.push_str(remaining_string);
    output_string
}

/// Produces the substituted clone of `template`; the template itself is never modified.
pub fn render_request(template: &RequestTemplate, scope: &VariableScope) -> PreparedRequest {
    PreparedRequest {
        name: template.name.clone(),
        protocol: template.protocol,
        method: interpolate(&template.method, scope),
        url: interpolate(&template.url, scope),
        headers: template
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), interpolate(value, scope)))
            .collect(),
        body: template.body.as_ref().map(|body| interpolate(body, scope)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use weft_types::{ExecutionOptions, Protocol};

    fn template() -> RequestTemplate {
        let mut headers = IndexMap::new();
        headers.insert("Authorization".to_string(), "Bearer {{token}}".to_string());
        RequestTemplate {
            name: "GetUser".into(),
            protocol: Protocol::Http,
            method: "GET".into(),
            url: "https://{{host}}/users/{{ vars.request.id }}".into(),
            headers,
            body: Some("{\"id\": \"{{id}}\"}".into()),
            when: None,
            for_each: None,
            options: ExecutionOptions::default(),
            line: 3,
        }
    }

    #[test]
    fn substitutes_url_headers_and_body() {
        let scope = VariableScope::from_pairs([("host", "example.com"), ("vars.request.id", "42"), ("vars.workflow.token", "t0k")]);
        let original = template();
        let prepared = render_request(&original, &scope);

        assert_eq!(prepared.url, "https://example.com/users/42");
        assert_eq!(prepared.headers["Authorization"], "Bearer t0k");
        assert_eq!(prepared.body.as_deref(), Some("{\"id\": \"42\"}"));
        assert_eq!(original, template());
    }

    #[test]
    fn unterminated_marker_is_preserved() {
        let scope = VariableScope::from_pairs([("a", "1")]);
        assert_eq!(interpolate("x {{a}} {{b", &scope), "x 1 {{b");
    }

    #[test]
    fn handles_multibyte_text_around_markers() {
        let scope = VariableScope::from_pairs([("city", "Zürich")]);
        assert_eq!(interpolate("café → {{city}} ✓", &scope), "café → Zürich ✓");
    }
}
