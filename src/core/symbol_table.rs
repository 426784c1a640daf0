// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Symbol table: a tree of lexical scopes holding labels, constants and
//! macros.
//!
//! The table persists across resolution passes. Each symbol records the
//! pass in which it was last defined; defining the same name twice in one
//! pass is a duplicate, while redefinition in a later pass is the normal
//! fixpoint update. Scope nodes are keyed by name within their parent so
//! that a re-walk of the AST reuses the same tree, keeping lookups of
//! previous-pass values cheap and deterministic.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::core::expr::Value;
use crate::core::parser::MacroDef;
use crate::core::tokenizer::Span;

pub type ScopeId = usize;

#[derive(Debug, Clone)]
pub enum Symbol {
    Label { value: i64 },
    Constant { value: Value },
    Macro { def: Rc<MacroDef>, captured: ScopeId },
}

#[derive(Debug, Clone)]
pub struct SymbolRecord {
    pub sym: Symbol,
    /// Pass in which the symbol was last defined (1-based).
    pub pass: u32,
    pub defined_at: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum DefineOutcome {
    New,
    Unchanged,
    /// Redefined on a later pass with a different value - the fixpoint
    /// loop must run another pass.
    Changed,
    /// Defined twice within the same pass.
    Duplicate,
}

#[derive(Debug)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    /// Scope name; anonymous scopes carry a synthesized `@`-prefixed name
    /// and are not addressable from source.
    pub name: String,
    pub anonymous: bool,
    symbols: IndexMap<String, SymbolRecord>,
    children: IndexMap<String, ScopeId>,
}

#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                parent: None,
                name: String::new(),
                anonymous: false,
                symbols: IndexMap::new(),
                children: IndexMap::new(),
            }],
        }
    }

    pub const ROOT: ScopeId = 0;

    /// Find or create the child scope `name` of `parent`. Reuse keeps
    /// scope identity stable across passes.
    pub fn ensure_child(&mut self, parent: ScopeId, name: &str, anonymous: bool) -> ScopeId {
        if let Some(id) = self.scopes[parent].children.get(name) {
            return *id;
        }
        let id = self.scopes.len();
        self.scopes.push(Scope {
            parent: Some(parent),
            name: name.to_string(),
            anonymous,
            symbols: IndexMap::new(),
            children: IndexMap::new(),
        });
        self.scopes[parent].children.insert(name.to_string(), id);
        id
    }

    #[must_use]
    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id]
    }

    /// Path of named scopes from the root down to `id`, for debug info
    /// and listings. Anonymous scopes are skipped; macro invocation
    /// scopes keep their `name@index` form.
    #[must_use]
    pub fn scope_path(&self, id: ScopeId) -> Vec<String> {
        let mut path = Vec::new();
        let mut cursor = Some(id);
        while let Some(scope_id) = cursor {
            let scope = &self.scopes[scope_id];
            if !scope.name.is_empty() && !scope.anonymous {
                path.push(scope.name.clone());
            }
            cursor = scope.parent;
        }
        path.reverse();
        path
    }

    pub fn define_label(
        &mut self,
        scope: ScopeId,
        name: &str,
        value: i64,
        pass: u32,
        span: Span,
    ) -> DefineOutcome {
        let target = if name.starts_with('@') {
            self.nearest_named(scope)
        } else {
            scope
        };
        match self.scopes[target].symbols.get_mut(name) {
            Some(record) => {
                if record.pass == pass {
                    return DefineOutcome::Duplicate;
                }
                let outcome = match &record.sym {
                    Symbol::Label { value: old } if *old == value => DefineOutcome::Unchanged,
                    _ => DefineOutcome::Changed,
                };
                record.sym = Symbol::Label { value };
                record.pass = pass;
                record.defined_at = span;
                outcome
            }
            None => {
                self.scopes[target].symbols.insert(
                    name.to_string(),
                    SymbolRecord {
                        sym: Symbol::Label { value },
                        pass,
                        defined_at: span,
                    },
                );
                DefineOutcome::New
            }
        }
    }

    pub fn define_constant(
        &mut self,
        scope: ScopeId,
        name: &str,
        value: Value,
        pass: u32,
        span: Span,
    ) -> DefineOutcome {
        match self.scopes[scope].symbols.get_mut(name) {
            Some(record) => {
                if record.pass == pass {
                    return DefineOutcome::Duplicate;
                }
                let outcome = match &record.sym {
                    Symbol::Constant { value: old } if *old == value => DefineOutcome::Unchanged,
                    _ => DefineOutcome::Changed,
                };
                record.sym = Symbol::Constant { value };
                record.pass = pass;
                record.defined_at = span;
                outcome
            }
            None => {
                self.scopes[scope].symbols.insert(
                    name.to_string(),
                    SymbolRecord {
                        sym: Symbol::Constant { value },
                        pass,
                        defined_at: span,
                    },
                );
                DefineOutcome::New
            }
        }
    }

    pub fn define_macro(
        &mut self,
        scope: ScopeId,
        def: Rc<MacroDef>,
        pass: u32,
        span: Span,
    ) -> DefineOutcome {
        let name = def.name.clone();
        match self.scopes[scope].symbols.get_mut(&name) {
            Some(record) => {
                if record.pass == pass {
                    return DefineOutcome::Duplicate;
                }
                record.pass = pass;
                DefineOutcome::Unchanged
            }
            None => {
                self.scopes[scope].symbols.insert(
                    name,
                    SymbolRecord {
                        sym: Symbol::Macro {
                            def,
                            captured: scope,
                        },
                        pass,
                        defined_at: span,
                    },
                );
                DefineOutcome::New
            }
        }
    }

    /// Resolve a possibly qualified path from `scope`.
    ///
    /// Unqualified names search the scope chain up to the root. Local
    /// (`@`-prefixed) names search only the nearest non-anonymous scope.
    /// Qualified `outer::inner` walks outward until a scope or symbol
    /// named `outer` is visible, then descends by child-scope names.
    #[must_use]
    pub fn lookup(&self, scope: ScopeId, path: &[String]) -> Option<&SymbolRecord> {
        match path {
            [] => None,
            [name] if name.starts_with('@') => {
                let target = self.nearest_named(scope);
                self.scopes[target].symbols.get(name)
            }
            [name] => {
                let mut cursor = Some(scope);
                while let Some(id) = cursor {
                    if let Some(record) = self.scopes[id].symbols.get(name) {
                        return Some(record);
                    }
                    cursor = self.scopes[id].parent;
                }
                None
            }
            [head, rest @ ..] => {
                let mut cursor = Some(scope);
                while let Some(id) = cursor {
                    if let Some(child) = self.scopes[id].children.get(head) {
                        return self.lookup_in(*child, rest);
                    }
                    cursor = self.scopes[id].parent;
                }
                None
            }
        }
    }

    fn lookup_in(&self, scope: ScopeId, path: &[String]) -> Option<&SymbolRecord> {
        match path {
            [] => None,
            [name] => self.scopes[scope].symbols.get(name),
            [head, rest @ ..] => {
                let child = self.scopes[scope].children.get(head)?;
                self.lookup_in(*child, rest)
            }
        }
    }

    fn nearest_named(&self, scope: ScopeId) -> ScopeId {
        let mut cursor = scope;
        loop {
            if !self.scopes[cursor].anonymous {
                return cursor;
            }
            match self.scopes[cursor].parent {
                Some(parent) => cursor = parent,
                None => return SymbolTable::ROOT,
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::{DefineOutcome, Symbol, SymbolTable};
    use crate::core::expr::Value;
    use crate::core::tokenizer::Span;

    fn span() -> Span {
        Span::default()
    }

    fn label_value(table: &SymbolTable, scope: usize, name: &str) -> Option<i64> {
        table
            .lookup(scope, &[name.to_string()])
            .and_then(|record| match record.sym {
                Symbol::Label { value } => Some(value),
                _ => None,
            })
    }

    #[test]
    fn define_and_lookup_in_nested_scope() {
        let mut table = SymbolTable::new();
        let inner = table.ensure_child(SymbolTable::ROOT, "irq", false);
        assert_eq!(
            table.define_label(SymbolTable::ROOT, "start", 0x0801, 1, span()),
            DefineOutcome::New
        );
        // inner scope sees outer symbol
        assert_eq!(label_value(&table, inner, "start"), Some(0x0801));
    }

    #[test]
    fn duplicate_in_same_pass_is_rejected() {
        let mut table = SymbolTable::new();
        let _ = table.define_label(SymbolTable::ROOT, "x", 1, 1, span());
        assert_eq!(
            table.define_label(SymbolTable::ROOT, "x", 2, 1, span()),
            DefineOutcome::Duplicate
        );
    }

    #[test]
    fn later_pass_redefinition_reports_change() {
        let mut table = SymbolTable::new();
        let _ = table.define_label(SymbolTable::ROOT, "x", 0x0801, 1, span());
        assert_eq!(
            table.define_label(SymbolTable::ROOT, "x", 0x0803, 2, span()),
            DefineOutcome::Changed
        );
        assert_eq!(
            table.define_label(SymbolTable::ROOT, "x", 0x0803, 3, span()),
            DefineOutcome::Unchanged
        );
    }

    #[test]
    fn shadowing_in_child_scope() {
        let mut table = SymbolTable::new();
        let inner = table.ensure_child(SymbolTable::ROOT, "sub", false);
        let _ = table.define_label(SymbolTable::ROOT, "x", 1, 1, span());
        let _ = table.define_label(inner, "x", 2, 1, span());
        assert_eq!(label_value(&table, inner, "x"), Some(2));
        assert_eq!(label_value(&table, SymbolTable::ROOT, "x"), Some(1));
    }

    #[test]
    fn qualified_lookup_walks_out_then_down() {
        let mut table = SymbolTable::new();
        let outer = table.ensure_child(SymbolTable::ROOT, "outer", false);
        let sibling = table.ensure_child(SymbolTable::ROOT, "sibling", false);
        let _ = table.define_label(outer, "entry", 0x1000, 1, span());
        let record = table
            .lookup(sibling, &["outer".to_string(), "entry".to_string()])
            .expect("qualified lookup");
        assert!(matches!(record.sym, Symbol::Label { value: 0x1000 }));
    }

    #[test]
    fn local_labels_stay_in_named_scope() {
        let mut table = SymbolTable::new();
        let named = table.ensure_child(SymbolTable::ROOT, "block", false);
        let anon = table.ensure_child(named, "@for@1", true);
        // defining from inside the anonymous scope lands in `block`
        let _ = table.define_label(anon, "@loop", 0x2000, 1, span());
        assert_eq!(label_value(&table, anon, "@loop"), Some(0x2000));
        assert_eq!(label_value(&table, named, "@loop"), Some(0x2000));
        // not visible from the root
        assert_eq!(label_value(&table, SymbolTable::ROOT, "@loop"), None);
    }

    #[test]
    fn ensure_child_reuses_scopes() {
        let mut table = SymbolTable::new();
        let a = table.ensure_child(SymbolTable::ROOT, "s", false);
        let b = table.ensure_child(SymbolTable::ROOT, "s", false);
        assert_eq!(a, b);
    }

    #[test]
    fn scope_path_skips_anonymous() {
        let mut table = SymbolTable::new();
        let named = table.ensure_child(SymbolTable::ROOT, "outer", false);
        let anon = table.ensure_child(named, "@if@1", true);
        let leaf = table.ensure_child(anon, "inner", false);
        assert_eq!(table.scope_path(leaf), vec!["outer", "inner"]);
    }

    #[test]
    fn constants_hold_values() {
        let mut table = SymbolTable::new();
        let _ = table.define_constant(
            SymbolTable::ROOT,
            "msg",
            Value::Str(b"hi".to_vec()),
            1,
            span(),
        );
        let record = table
            .lookup(SymbolTable::ROOT, &["msg".to_string()])
            .expect("constant");
        assert!(matches!(&record.sym, Symbol::Constant { value: Value::Str(bytes) } if bytes == b"hi"));
    }
}
