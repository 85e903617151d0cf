//! Source line annotation for parsed documents.
//!
//! serde does not report positions, so after parsing the raw text is scanned by
//! indentation to find where requests, workflows, steps, branches, switch blocks and
//! for-each declarations start. Block YAML and pretty-printed JSON are both understood.
//! Anything the scanner cannot place keeps line 0 and inherits the enclosing
//! declaration's line when the workflow is resolved.

use weft_types::{Branch, Document, ForEachSpec, WorkflowStep};

/// Fills every `line` field that is still 0.
pub(crate) fn annotate_document(document: &mut Document, content: &str) {
    let source = SourceLines::new(content);
    let root = source.whole();

    let request_items = source.sequence(root, "requests");
    let aligned = request_items.len() == document.requests.len();
    for (position, request) in document.requests.iter_mut().enumerate() {
        let item = request_items.get(position).copied().filter(|_| aligned);
        if request.line == 0 {
            request.line = match item {
                Some(item) => item.start + 1,
                None => source.name_line(&request.name),
            };
        }
        if let (Some(spec), Some(item)) = (request.for_each.as_mut(), item) {
            source.annotate_for_each(item, spec);
        }
    }

    let workflow_items = source.sequence(root, "workflows");
    let aligned = workflow_items.len() == document.workflows.len();
    for (position, workflow) in document.workflows.iter_mut().enumerate() {
        let item = workflow_items.get(position).copied().filter(|_| aligned);
        if workflow.line == 0 {
            workflow.line = match item {
                Some(item) => item.start + 1,
                None => source.name_line(&workflow.name),
            };
        }
        let Some(item) = item else {
            continue;
        };
        let step_items = source.sequence(item, "steps");
        if step_items.len() != workflow.steps.len() {
            continue;
        }
        for (step, span) in workflow.steps.iter_mut().zip(step_items) {
            source.annotate_step(span, step);
        }
    }
}

/// Half-open range of 0-based line indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

struct SourceLines<'a> {
    lines: Vec<&'a str>,
}

impl<'a> SourceLines<'a> {
    fn new(content: &'a str) -> Self {
        Self {
            lines: content.lines().collect(),
        }
    }

    fn whole(&self) -> Span {
        Span {
            start: 0,
            end: self.lines.len(),
        }
    }

    fn annotate_step(&self, item: Span, step: &mut WorkflowStep) {
        if step.line == 0 {
            step.line = item.start + 1;
        }
        if step.when_line == 0
            && let Some(line) = self.direct_key_line(item, "when")
        {
            step.when_line = line + 1;
        }
        if let Some(spec) = step.for_each.as_mut() {
            self.annotate_for_each(item, spec);
        }

        if let Some(block) = step.if_block.as_mut()
            && let Some(if_line) = self.direct_key_line(item, "if")
        {
            let body = self.children(if_line, item);
            self.annotate_keyed_branch(body, "then", &mut block.then);
            let elif_items = self.sequence(body, "elif");
            if elif_items.len() == block.elif.len() {
                for (branch, span) in block.elif.iter_mut().zip(elif_items) {
                    self.annotate_branch(span, branch);
                }
            }
            if let Some(otherwise) = block.otherwise.as_mut() {
                self.annotate_keyed_branch(body, "else", otherwise);
            }
        }

        if let Some(block) = step.switch.as_mut()
            && let Some(switch_line) = self.direct_key_line(item, "switch")
        {
            let body = self.children(switch_line, item);
            if block.line == 0 {
                block.line = self.direct_key_line(body, "expr").unwrap_or(switch_line) + 1;
            }
            let case_items = self.sequence(body, "cases");
            if case_items.len() == block.cases.len() {
                for (branch, span) in block.cases.iter_mut().zip(case_items) {
                    self.annotate_branch(span, branch);
                }
            }
            if let Some(default) = block.default.as_mut() {
                self.annotate_keyed_branch(body, "default", default);
            }
        }
    }

    fn annotate_for_each(&self, item: Span, spec: &mut ForEachSpec) {
        if spec.line > 0 {
            return;
        }
        if let Some(key_line) = self.direct_key_line(item, "for_each") {
            let body = self.children(key_line, item);
            spec.line = self.direct_key_line(body, "expr").unwrap_or(key_line) + 1;
        }
    }

    /// Branch declared under a mapping key such as `then:` or `default:`.
    fn annotate_keyed_branch(&self, within: Span, key: &str, branch: &mut Branch) {
        let Some(key_line) = self.direct_key_line(within, key) else {
            return;
        };
        if branch.line == 0 {
            let body = self.children(key_line, within);
            branch.line = self.direct_key_line(body, "when").unwrap_or(key_line) + 1;
        }
    }

    /// Branch whose own keys live in `span`; the line points at its condition when present.
    fn annotate_branch(&self, span: Span, branch: &mut Branch) {
        if branch.line == 0 {
            branch.line = self.direct_key_line(span, "when").unwrap_or(span.start) + 1;
        }
    }

    /// Items of the sequence stored under `key`, each spanning up to the next item.
    fn sequence(&self, within: Span, key: &str) -> Vec<Span> {
        let Some(key_line) = self.direct_key_line(within, key) else {
            return Vec::new();
        };
        let body = self.children(key_line, within);

        let mut starts = Vec::new();
        let mut item_indent = None;
        for index in body.start..body.end {
            let line = self.lines[index];
            let trimmed = line.trim_start();
            if !is_item_marker(trimmed) {
                continue;
            }
            let indent = line.len() - trimmed.len();
            match item_indent {
                None => {
                    item_indent = Some(indent);
                    starts.push(index);
                }
                Some(expected) if expected == indent => starts.push(index),
                Some(_) => {}
            }
        }

        starts
            .iter()
            .enumerate()
            .map(|(position, &start)| Span {
                start,
                end: starts.get(position + 1).copied().unwrap_or(body.end),
            })
            .collect()
    }

    /// Lines nested under the key declared on `key_line`.
    fn children(&self, key_line: usize, within: Span) -> Span {
        let start = key_line + 1;
        let Some((column, _)) = line_key(self.lines[key_line]) else {
            return Span { start, end: start };
        };
        let mut end = start;
        while end < within.end {
            let line = self.lines[end];
            let trimmed = line.trim_start();
            if !(trimmed.is_empty() || trimmed.starts_with('#')) {
                let indent = line.len() - trimmed.len();
                // Block sequences may sit at the same indentation as their key.
                if indent < column || (indent == column && !trimmed.starts_with('-')) {
                    break;
                }
            }
            end += 1;
        }
        Span { start, end }
    }

    /// First line in `within` declaring `key` at the span's own nesting level.
    fn direct_key_line(&self, within: Span, key: &str) -> Option<usize> {
        let mut level = None;
        for index in within.start..within.end.min(self.lines.len()) {
            let Some((column, name)) = line_key(self.lines[index]) else {
                continue;
            };
            let level = *level.get_or_insert(column);
            if column == level && name == key {
                return Some(index);
            }
        }
        None
    }

    /// 1-based line of the first `name: <name>` declaration, or 0 when not found.
    fn name_line(&self, name: &str) -> usize {
        self.lines
            .iter()
            .position(|line| {
                let line = line.trim_start().trim_start_matches('-').trim();
                let Some(value) = line.strip_prefix("name:").or_else(|| line.strip_prefix("\"name\":")) else {
                    return false;
                };
                value.trim().trim_end_matches(',').trim_matches(|c| c == '"' || c == '\'') == name
            })
            .map(|index| index + 1)
            .unwrap_or(0)
    }
}

fn is_item_marker(trimmed: &str) -> bool {
    trimmed == "-" || trimmed.starts_with("- ") || trimmed.starts_with('{')
}

/// Column and name of the first mapping key on `line`, skipping sequence dashes and
/// opening braces. Handles `key:`, `"key":` and `'key':`.
fn line_key(line: &str) -> Option<(usize, &str)> {
    let mut rest = line;
    let mut column = 0;
    loop {
        let trimmed = rest.trim_start();
        column += rest.len() - trimmed.len();
        rest = trimmed;
        if let Some(after) = rest.strip_prefix('-')
            && (after.is_empty() || after.starts_with(char::is_whitespace))
        {
            column += 1;
            rest = after;
            continue;
        }
        if let Some(after) = rest.strip_prefix('{') {
            column += 1;
            rest = after;
            continue;
        }
        break;
    }

    let (name, after) = match rest.chars().next() {
        Some(quote @ ('"' | '\'')) => {
            let inner = &rest[1..];
            let end = inner.find(quote)?;
            (&inner[..end], &inner[end + 1..])
        }
        _ => {
            let end = rest.find(':')?;
            (rest[..end].trim_end(), &rest[end..])
        }
    };
    let after = after.trim_start().strip_prefix(':')?;
    if !(after.is_empty() || after.starts_with(char::is_whitespace)) {
        return None;
    }
    if name.is_empty() || name.contains(char::is_whitespace) || name.starts_with('#') {
        return None;
    }
    Some((column, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Document {
        let mut document: Document = serde_yaml::from_str(yaml).expect("parse document");
        annotate_document(&mut document, yaml);
        document
    }

    #[test]
    fn line_key_skips_dashes_braces_and_quotes() {
        assert_eq!(line_key("  - using: Login"), Some((4, "using")));
        assert_eq!(line_key("    - { when: \"'eu'\", run: Eu }"), Some((8, "when")));
        assert_eq!(line_key("    \"for_each\": {"), Some((4, "for_each")));
        assert_eq!(line_key("  url: https://example.com"), Some((2, "url")));
        assert_eq!(line_key("  - https://example.com"), None);
        assert_eq!(line_key("# steps: none"), None);
    }

    #[test]
    fn annotates_steps_branches_and_loops() {
        let document = parse(
            r#"requests:
  - name: Ping
    url: https://example.com/{{item}}
    for_each:
      expr: '["a"]'
workflows:
  - name: route
    steps:
      - using: Ping
        when: ready == "yes"
      - kind: if
        if:
          then:
            when: region == "eu"
            run: Ping
          elif:
            - when: region == "us"
              run: Ping
          else:
            fail: unsupported
      - kind: switch
        switch:
          expr: region
          cases:
            - { when: "'eu'", run: Ping }
          default: { run: Ping }
      - kind: for_each
        using: Ping
        for_each:
          as: id
          expr: '[1, 2]'
"#,
        );

        assert_eq!(document.requests[0].line, 2);
        assert_eq!(document.requests[0].for_each.as_ref().map(|spec| spec.line), Some(5));
        let workflow = &document.workflows[0];
        assert_eq!(workflow.line, 7);

        let steps = &workflow.steps;
        assert_eq!((steps[0].line, steps[0].when_line), (9, 10));

        assert_eq!(steps[1].line, 11);
        let if_block = steps[1].if_block.as_ref().expect("if block");
        assert_eq!(if_block.then.line, 14);
        assert_eq!(if_block.elif[0].line, 17);
        assert_eq!(if_block.otherwise.as_ref().map(|branch| branch.line), Some(19));

        let switch = steps[2].switch.as_ref().expect("switch block");
        assert_eq!(switch.line, 23);
        assert_eq!(switch.cases[0].line, 25);
        assert_eq!(switch.default.as_ref().map(|branch| branch.line), Some(26));

        assert_eq!(steps[3].for_each.as_ref().map(|spec| spec.line), Some(31));
    }

    #[test]
    fn annotates_indentless_sequences() {
        let document = parse(
            r#"requests:
- name: A
  url: https://example.com/a
workflows:
- name: flat
  steps:
  - using: A
  - using: A
    when: "true"
"#,
        );
        let steps = &document.workflows[0].steps;
        assert_eq!(steps[0].line, 7);
        assert_eq!((steps[1].line, steps[1].when_line), (8, 9));
    }

    #[test]
    fn annotates_pretty_printed_json() {
        let json = r#"{
  "requests": [
    { "name": "A", "url": "https://example.com/a" }
  ],
  "workflows": [
    {
      "name": "smoke",
      "steps": [
        {
          "using": "A",
          "when": "ready"
        }
      ]
    }
  ]
}"#;
        let mut document: Document = serde_json::from_str(json).expect("parse document");
        annotate_document(&mut document, json);

        assert_eq!(document.requests[0].line, 3);
        assert_eq!(document.workflows[0].line, 6);
        let step = &document.workflows[0].steps[0];
        assert_eq!((step.line, step.when_line), (9, 11));
    }
}
