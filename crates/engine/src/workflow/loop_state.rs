//! For-each loop cursor.
//!
//! Holds the items of one active loop and the scope keys its variable is bound under.

use weft_types::Iteration;

use crate::expr::ExprValue;
use crate::scope::loop_scope_keys;

/// Cursor over the precomputed items of an active for-each.
///
/// The source expression is evaluated once; the items are never recomputed while the
/// loop runs. The cursor only moves forward and the loop is exhausted when it reaches the
/// item count.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopState {
    items: Vec<ExprValue>,
    cursor: usize,
    var: String,
    scope_keys: Vec<String>,
}

impl LoopState {
    /// Returns `None` for an empty item list; an empty loop never starts.
    pub fn new(items: Vec<ExprValue>, var: impl Into<String>, promote: bool) -> Option<Self> {
        if items.is_empty() {
            return None;
        }
        let var = var.into();
        let scope_keys = loop_scope_keys(&var, promote);
        Some(Self {
            items,
            cursor: 0,
            var,
            scope_keys,
        })
    }

    pub fn current(&self) -> Option<&ExprValue> {
        self.items.get(self.cursor)
    }

    /// 1-based position of the current item.
    pub fn iteration(&self) -> Iteration {
        Iteration {
            index: (self.cursor + 1).min(self.items.len()),
            total: self.items.len(),
        }
    }

    pub fn advance(&mut self) {
        if !self.is_exhausted() {
            self.cursor += 1;
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor == self.items.len()
    }

    pub fn var(&self) -> &str {
        &self.var
    }

    /// Keys the current item is bound under in the dispatch scope.
    pub fn scope_keys(&self) -> &[String] {
        &self.scope_keys
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_items_never_start_a_loop() {
        assert!(LoopState::new(Vec::new(), "item", true).is_none());
    }

    #[test]
    fn cursor_walks_items_until_exhausted() {
        let items = vec![ExprValue::Json(json!("a")), ExprValue::Json(json!("b"))];
        let mut state = LoopState::new(items, "region", true).expect("loop");

        assert_eq!(state.iteration(), Iteration { index: 1, total: 2 });
        assert_eq!(state.current(), Some(&ExprValue::string("a")));
        state.advance();
        assert_eq!(state.iteration(), Iteration { index: 2, total: 2 });
        assert!(!state.is_exhausted());
        state.advance();
        assert!(state.is_exhausted());
        assert_eq!(state.current(), None);
        state.advance();
        assert!(state.is_exhausted());
    }

    #[test]
    fn scope_keys_follow_promotion() {
        let promoted = LoopState::new(vec![ExprValue::null()], "id", true).expect("loop");
        assert_eq!(promoted.scope_keys(), ["vars.request.id", "vars.workflow.id"]);
        let local = LoopState::new(vec![ExprValue::null()], "id", false).expect("loop");
        assert_eq!(local.scope_keys(), ["vars.request.id"]);
    }
}
