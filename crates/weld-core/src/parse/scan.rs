//! Statement-level module scanner.
//!
//! Splits the token stream into top-level statements (semicolons, block ends and
//! the usual ASI newline rules), then summarizes each one: import/export clauses,
//! declared bindings, identifier reads and whether evaluating it can be observed.

use super::lexer::{tokenize, Token, TokenKind};
use super::{
    ExportEntry, ImportBinding, ImportDecl, ImportKind, ImportSite, Loader, ModuleAst,
    ModuleParser, ParseError, Reference, Statement, StatementKind,
};
use std::collections::{BTreeMap, HashSet};

/// The default [`ModuleParser`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanParser;

impl ModuleParser for ScanParser {
    fn parse(&self, source: &str, loader: Loader) -> Result<ModuleAst, ParseError> {
        match loader {
            Loader::Json => {
                serde_json::from_str::<serde_json::Value>(source)
                    .map_err(|e| ParseError::new(e.to_string(), 0))?;
                Ok(value_module(source.len()))
            }
            Loader::Text => Ok(value_module(source.len())),
            Loader::Empty => Ok(ModuleAst::default()),
            Loader::Js | Loader::Jsx | Loader::Ts | Loader::Tsx => {
                Scanner::new(source, loader.is_typescript())?.run()
            }
        }
    }
}

/// JSON and text modules: a single pure statement assigning `module.exports`.
fn value_module(len: usize) -> ModuleAst {
    ModuleAst {
        statements: vec![Statement {
            kind: StatementKind::Expression,
            start: 0,
            end: len,
            declares: Vec::new(),
            refs: Vec::new(),
            side_effects: false,
        }],
        uses_commonjs: true,
        ..ModuleAst::default()
    }
}

const RESERVED: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete", "do",
    "else", "export", "extends", "finally", "for", "function", "if", "import", "in",
    "instanceof", "new", "return", "super", "switch", "this", "throw", "try", "typeof", "var",
    "void", "while", "with", "yield", "true", "false", "null",
];

/// Keywords after which an expression is still expected (no call, no ASI).
const OPERATOR_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await", "extends", "export", "import", "default", "const", "let", "var",
    "function", "class", "async",
];

const ASSIGNMENT_OPS: &[&str] = &[
    "=", "+=", "-=", "*=", "/=", "%=", "**=", "<<=", ">>=", ">>>=", "&=", "|=", "^=", "&&=",
    "||=", "??=",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Head {
    /// Ends at the `}` closing its body.
    Block,
    /// `if`: may continue with `else`.
    If,
    /// `try`: may continue with `catch`/`finally`.
    Try,
    /// `do`: continues with `while (...)`.
    Do,
    Expr,
}

struct Scanner<'a> {
    src: &'a str,
    toks: Vec<Token>,
    /// For every bracket token, the index of its partner.
    partner: Vec<usize>,
    ts: bool,
    ast: ModuleAst,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str, ts: bool) -> Result<Self, ParseError> {
        let toks = tokenize(src)?;
        let partner = match_brackets(src, &toks)?;
        Ok(Self {
            src,
            toks,
            partner,
            ts,
            ast: ModuleAst::default(),
        })
    }

    fn run(mut self) -> Result<ModuleAst, ParseError> {
        let mut i = 0;
        while i < self.toks.len() {
            let end = self.statement_end(i);
            self.statement(i, end)?;
            i = end;
        }
        if self.ts {
            self.elide_unused_imports();
        }
        Ok(self.ast)
    }

    // ---- token helpers ----

    fn text(&self, i: usize) -> &'a str {
        self.toks.get(i).map_or("", |t| &self.src[t.start..t.end])
    }

    fn is(&self, i: usize, p: &str) -> bool {
        self.toks
            .get(i)
            .is_some_and(|t| t.kind == TokenKind::Punct && self.text(i) == p)
    }

    fn is_word(&self, i: usize, w: &str) -> bool {
        self.toks
            .get(i)
            .is_some_and(|t| t.kind == TokenKind::Ident && self.text(i) == w)
    }

    fn is_ident(&self, i: usize) -> bool {
        self.toks.get(i).is_some_and(|t| t.kind == TokenKind::Ident)
    }

    fn kind(&self, i: usize) -> Option<TokenKind> {
        self.toks.get(i).map(|t| t.kind)
    }

    fn string_at(&self, i: usize) -> Option<String> {
        self.toks
            .get(i)
            .and_then(Token::string_value)
            .map(str::to_string)
    }

    fn is_open(&self, i: usize) -> bool {
        match self.kind(i) {
            Some(TokenKind::Punct) => matches!(self.text(i), "(" | "[" | "{"),
            Some(TokenKind::TemplateHead) => true,
            _ => false,
        }
    }

    /// A token after which `(` is a call and `[` is a member access.
    fn ends_expression(&self, i: usize) -> bool {
        match self.kind(i) {
            Some(TokenKind::Ident) => !OPERATOR_KEYWORDS.contains(&self.text(i)),
            Some(
                TokenKind::Str
                | TokenKind::Number
                | TokenKind::Regex
                | TokenKind::Template
                | TokenKind::TemplateTail,
            ) => true,
            Some(TokenKind::Punct) => matches!(self.text(i), ")" | "]" | "}" | "++" | "--"),
            _ => false,
        }
    }

    // ---- statement splitting ----

    fn head(&self, start: usize) -> Head {
        let mut i = start;
        if self.is_word(i, "export") {
            i += 1;
            if self.is_word(i, "default") {
                i += 1;
            }
        }
        if self.is_word(i, "declare") {
            i += 1;
        }
        match self.text(i) {
            "{" if self.kind(i) == Some(TokenKind::Punct) => Head::Block,
            "if" => Head::If,
            "try" => Head::Try,
            "do" => Head::Do,
            "function" | "class" | "for" | "while" | "switch" | "with" | "interface" | "enum" => {
                Head::Block
            }
            "async" if self.is_word(i + 1, "function") => Head::Block,
            "abstract" if self.is_word(i + 1, "class") => Head::Block,
            "const" if self.is_word(i + 1, "enum") => Head::Block,
            "namespace" | "module" if self.is_ident(i + 1) || self.kind(i + 1) == Some(TokenKind::Str) => {
                Head::Block
            }
            _ => Head::Expr,
        }
    }

    fn continues(&self, head: Head, next: usize) -> bool {
        match head {
            Head::If => self.is_word(next, "else"),
            Head::Try => self.is_word(next, "catch") || self.is_word(next, "finally"),
            Head::Do => self.is_word(next, "while"),
            Head::Block | Head::Expr => false,
        }
    }

    /// Whether a line break before token `j` terminates the statement.
    fn asi_breaks(&self, j: usize) -> bool {
        if !self.ends_expression(j - 1) {
            return false;
        }
        match self.kind(j) {
            Some(TokenKind::Ident) => !matches!(self.text(j), "instanceof" | "in" | "as" | "satisfies"),
            Some(TokenKind::Str | TokenKind::Number | TokenKind::Regex) => true,
            Some(TokenKind::Punct) => {
                matches!(self.text(j), "{" | "!" | "~" | "++" | "--" | "@" | "#" | ";")
            }
            _ => false,
        }
    }

    /// Exclusive end token index of the statement starting at `start`.
    fn statement_end(&self, start: usize) -> usize {
        let head = self.head(start);
        // `if (x)\n foo()` must not split after the condition.
        let mut guarded_close = None;
        if matches!(head, Head::Block | Head::If) {
            if let Some(open) = (start..self.toks.len().min(start + 4)).find(|&k| self.is(k, "(")) {
                if matches!(self.text(start), "if" | "for" | "while" | "with") {
                    guarded_close = Some(self.partner[open]);
                }
            }
        }

        let mut j = start;
        while j < self.toks.len() {
            let t = &self.toks[j];
            if j > start
                && t.newline_before
                && Some(j - 1) != guarded_close
                && !self.continues(head, j)
                && self.asi_breaks(j)
            {
                return j;
            }
            if self.is_open(j) {
                // Jump over the whole bracketed group.
                let close = self.partner[j];
                if self.is(close, "}") && close > j {
                    let after = close + 1;
                    let block_end = matches!(head, Head::Block | Head::If | Head::Try | Head::Do)
                        && self.is(j, "{");
                    if block_end && !self.continues(head, after) {
                        // `do {} while (x)` and class/function bodies end here
                        if head != Head::Do {
                            return after;
                        }
                    }
                }
                j = close + 1;
                continue;
            }
            if self.is(j, ";") {
                if self.continues(head, j + 1) {
                    j += 1;
                    continue;
                }
                return j + 1;
            }
            j += 1;
        }
        self.toks.len()
    }

    // ---- statement classification ----

    fn statement(&mut self, start: usize, end: usize) -> Result<(), ParseError> {
        let mut last = end;
        while last > start && self.is(last - 1, ";") {
            last -= 1;
        }
        if last == start {
            return Ok(());
        }

        let index = self.ast.statements.len();
        let mut stmt = Statement {
            kind: StatementKind::Expression,
            start: self.toks[start].start,
            end: self.toks[end - 1].end,
            declares: Vec::new(),
            refs: Vec::new(),
            side_effects: true,
        };

        self.scan_markers(start, last, index);

        let first = self.text(start);
        match first {
            "import" if !self.is(start + 1, "(") && !self.is(start + 1, ".") => {
                self.import_declaration(start + 1, last, index, &mut stmt)?;
            }
            "export" => self.export_declaration(start + 1, last, index, &mut stmt)?,
            _ => {
                self.declaration_or_expression(start, last, &mut stmt);
                stmt.refs = self.collect_refs(start, last);
            }
        }

        self.ast.statements.push(stmt);
        Ok(())
    }

    /// Import sites nested anywhere in the statement, plus module-format markers.
    fn scan_markers(&mut self, start: usize, end: usize, index: usize) {
        let mut i = start;
        while i < end {
            let after_dot = i > 0 && (self.is(i - 1, ".") || self.is(i - 1, "?."));
            if self.kind(i) == Some(TokenKind::Ident) && !after_dot {
                match self.text(i) {
                    "require" if self.is(i + 1, "(") => {
                        if let Some(spec) = self.string_at(i + 2) {
                            if self.is(i + 3, ")") {
                                self.push_site(spec, ImportKind::RequireCall, BTreeMap::new(), false, index);
                            }
                        }
                    }
                    "import" if self.is(i + 1, "(") => {
                        if let Some(spec) = self.string_at(i + 2) {
                            let attributes = if self.is(i + 3, ",") {
                                self.attributes_object(i + 4, true)
                            } else {
                                BTreeMap::new()
                            };
                            self.push_site(spec, ImportKind::DynamicImport, attributes, false, index);
                        }
                    }
                    "import" if self.is(i + 1, ".") && self.is_word(i + 2, "meta") => {
                        self.ast.has_esm_syntax = true;
                    }
                    "new" if self.is_word(i + 1, "Worker") && self.is(i + 2, "(") => {
                        let spec = self.string_at(i + 3).or_else(|| {
                            // new Worker(new URL("./w.js", import.meta.url))
                            (self.is_word(i + 3, "new") && self.is_word(i + 4, "URL") && self.is(i + 5, "("))
                                .then(|| self.string_at(i + 6))
                                .flatten()
                        });
                        if let Some(spec) = spec {
                            self.push_site(spec, ImportKind::DynamicImport, BTreeMap::new(), true, index);
                        }
                    }
                    "module" => {
                        let is_key = self.is(i + 1, ":") && (self.is(i.wrapping_sub(1), "{") || self.is(i.wrapping_sub(1), ","));
                        if !is_key {
                            self.ast.uses_module_var = true;
                            if self.is(i + 1, ".") && self.is_word(i + 2, "exports") {
                                self.ast.uses_commonjs = true;
                            }
                        }
                    }
                    "exports" if self.is(i + 1, ".") || self.is(i + 1, "[") || self.is(i + 1, "=") => {
                        self.ast.uses_commonjs = true;
                    }
                    _ => {}
                }
            }
            i += 1;
        }
    }

    fn push_site(
        &mut self,
        specifier: String,
        kind: ImportKind,
        attributes: BTreeMap<String, String>,
        worker: bool,
        stmt: usize,
    ) -> usize {
        self.ast.import_sites.push(ImportSite {
            specifier,
            kind,
            attributes,
            worker,
            stmt,
        });
        self.ast.import_sites.len() - 1
    }

    /// `{ type: "json" }`, or `{ with: { type: "json" } }` for dynamic import options.
    fn attributes_object(&self, open: usize, nested: bool) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        if !self.is(open, "{") {
            return out;
        }
        let close = self.partner[open];
        let mut i = open + 1;
        while i < close {
            if nested && (self.is_word(i, "with") || self.is_word(i, "assert")) && self.is(i + 1, ":") {
                return self.attributes_object(i + 2, false);
            }
            let key = match self.kind(i) {
                Some(TokenKind::Ident) => Some(self.text(i).to_string()),
                Some(TokenKind::Str) => self.string_at(i),
                _ => None,
            };
            if let (Some(key), true, Some(value)) = (key, self.is(i + 1, ":"), self.string_at(i + 2)) {
                out.insert(key, value);
                i += 3;
                continue;
            }
            i += 1;
        }
        out
    }

    /// Parses `from "spec" [with {...}]` at `i`. Returns the specifier, attributes, next index.
    fn from_clause(&self, i: usize) -> Option<(String, BTreeMap<String, String>, usize)> {
        if !self.is_word(i, "from") {
            return None;
        }
        let spec = self.string_at(i + 1)?;
        let mut next = i + 2;
        let mut attributes = BTreeMap::new();
        if self.is_word(next, "with") || self.is_word(next, "assert") {
            attributes = self.attributes_object(next + 1, false);
            if self.is(next + 1, "{") {
                next = self.partner[next + 1] + 1;
            }
        }
        Some((spec, attributes, next))
    }

    fn module_export_name(&self, i: usize) -> Option<String> {
        match self.kind(i)? {
            TokenKind::Ident => Some(self.text(i).to_string()),
            TokenKind::Str => self.string_at(i),
            _ => None,
        }
    }

    /// `{ a, b as c, type T }` starting at `open`. Returns (name, alias) pairs and the index after `}`.
    fn specifier_list(&self, open: usize) -> (Vec<(String, String)>, usize) {
        let close = self.partner[open];
        let mut out = Vec::new();
        let mut i = open + 1;
        while i < close {
            if self.is(i, ",") {
                i += 1;
                continue;
            }
            // `type X` / `type X as Y` are erased; `type` alone or `type as x` is a name.
            if self.ts
                && self.is_word(i, "type")
                && (self.is_ident(i + 1) || self.kind(i + 1) == Some(TokenKind::Str))
                && !self.is_word(i + 1, "as")
            {
                i += 2;
                if self.is_word(i, "as") {
                    i += 2;
                }
                continue;
            }
            let Some(name) = self.module_export_name(i) else {
                i += 1;
                continue;
            };
            i += 1;
            let mut alias = name.clone();
            if self.is_word(i, "as") {
                if let Some(a) = self.module_export_name(i + 1) {
                    alias = a;
                }
                i += 2;
            }
            out.push((name, alias));
        }
        (out, close + 1)
    }

    fn import_declaration(
        &mut self,
        mut i: usize,
        end: usize,
        index: usize,
        stmt: &mut Statement,
    ) -> Result<(), ParseError> {
        self.ast.has_esm_syntax = true;
        stmt.kind = StatementKind::Import;
        stmt.side_effects = false;

        // `import type X from`, `import type { X } from`
        if self.ts
            && self.is_word(i, "type")
            && !self.is_word(i + 1, "from")
            && !self.is(i + 1, ",")
            && !self.is(i + 1, "=")
        {
            stmt.kind = StatementKind::Type;
            return Ok(());
        }

        // `import x = require("y")`
        if self.is_ident(i) && self.is(i + 1, "=") {
            stmt.kind = StatementKind::Declaration;
            stmt.declares.push(self.text(i).to_string());
            stmt.side_effects = true;
            stmt.refs = self.collect_refs(i + 2, end);
            return Ok(());
        }

        // `import "side-effect"`
        if let Some(spec) = self.string_at(i) {
            let mut attributes = BTreeMap::new();
            if self.is_word(i + 1, "with") || self.is_word(i + 1, "assert") {
                attributes = self.attributes_object(i + 2, false);
            }
            let site = self.push_site(spec, ImportKind::ImportStatement, attributes, false, index);
            self.ast.imports.push(ImportDecl {
                site,
                stmt: index,
                bindings: Vec::new(),
            });
            return Ok(());
        }

        let mut bindings = Vec::new();
        while i < end && !self.is_word(i, "from") {
            if self.is(i, "*") && self.is_word(i + 1, "as") && self.is_ident(i + 2) {
                bindings.push(ImportBinding::Namespace {
                    local: self.text(i + 2).to_string(),
                });
                i += 3;
            } else if self.is(i, "{") {
                let (names, next) = self.specifier_list(i);
                for (imported, local) in names {
                    if imported == "default" {
                        bindings.push(ImportBinding::Default { local });
                    } else {
                        bindings.push(ImportBinding::Named { imported, local });
                    }
                }
                i = next;
            } else if self.is_ident(i) {
                bindings.push(ImportBinding::Default {
                    local: self.text(i).to_string(),
                });
                i += 1;
            } else {
                i += 1;
            }
        }

        let Some((spec, attributes, _)) = self.from_clause(i) else {
            return Err(ParseError::new(
                "Expected \"from\" in import declaration",
                self.toks.get(i).map_or(self.src.len(), |t| t.start),
            ));
        };
        stmt.declares = bindings.iter().map(|b| b.local().to_string()).collect();
        let site = self.push_site(spec, ImportKind::ImportStatement, attributes, false, index);
        self.ast.imports.push(ImportDecl {
            site,
            stmt: index,
            bindings,
        });
        Ok(())
    }

    fn export_declaration(
        &mut self,
        i: usize,
        end: usize,
        index: usize,
        stmt: &mut Statement,
    ) -> Result<(), ParseError> {
        self.ast.has_esm_syntax = true;
        stmt.kind = StatementKind::Export;
        stmt.side_effects = false;

        // TypeScript: `export = x`, `export as namespace X`, `export type ...`, `export interface`, `export declare`
        if self.is(i, "=") {
            self.ast.uses_commonjs = true;
            stmt.side_effects = true;
            stmt.refs = self.collect_refs(i + 1, end);
            return Ok(());
        }
        if self.is_word(i, "as")
            || self.is_word(i, "interface")
            || self.is_word(i, "declare")
            || (self.is_word(i, "type") && !self.is(i + 1, "=") && self.ts)
        {
            stmt.kind = StatementKind::Type;
            return Ok(());
        }

        // export * from / export * as ns from
        if self.is(i, "*") {
            let (exported, from_at) = if self.is_word(i + 1, "as") {
                (self.module_export_name(i + 2), i + 3)
            } else {
                (None, i + 1)
            };
            let Some((spec, attributes, _)) = self.from_clause(from_at) else {
                return Err(ParseError::new("Expected \"from\" after export *", self.toks[i].start));
            };
            let site = self.push_site(spec, ImportKind::ImportStatement, attributes, false, index);
            self.ast.exports.push(match exported {
                Some(exported) => ExportEntry::ReExportNamespace {
                    exported,
                    site,
                    stmt: index,
                },
                None => ExportEntry::Star { site, stmt: index },
            });
            return Ok(());
        }

        // export { a as b } [from "x"]
        if self.is(i, "{") {
            let (names, next) = self.specifier_list(i);
            if let Some((spec, attributes, _)) = self.from_clause(next) {
                let site = self.push_site(spec, ImportKind::ImportStatement, attributes, false, index);
                for (imported, exported) in names {
                    self.ast.exports.push(ExportEntry::ReExport {
                        exported,
                        imported,
                        site,
                        stmt: index,
                    });
                }
            } else {
                for (local, exported) in names {
                    stmt.refs.push(Reference {
                        name: local.clone(),
                        property: None,
                    });
                    self.ast.exports.push(ExportEntry::Local {
                        exported,
                        local,
                        stmt: index,
                    });
                }
            }
            return Ok(());
        }

        if self.is_word(i, "default") {
            return self.export_default(i + 1, end, index, stmt);
        }

        // export const/let/var/function/class/enum/namespace
        self.declaration_or_expression(i, end, stmt);
        stmt.refs = self.collect_refs(i, end);
        if stmt.kind == StatementKind::Declaration {
            stmt.kind = StatementKind::Export;
            for name in &stmt.declares {
                self.ast.exports.push(ExportEntry::Local {
                    exported: name.clone(),
                    local: name.clone(),
                    stmt: index,
                });
            }
        }
        Ok(())
    }

    fn export_default(
        &mut self,
        i: usize,
        end: usize,
        index: usize,
        stmt: &mut Statement,
    ) -> Result<(), ParseError> {
        if self.is_word(i, "interface") {
            stmt.kind = StatementKind::Type;
            return Ok(());
        }
        let mut j = i;
        if self.is_word(j, "async") && self.is_word(j + 1, "function") {
            j += 1;
        }
        if self.is_word(j, "abstract") && self.is_word(j + 1, "class") {
            j += 1;
        }
        let is_fn = self.is_word(j, "function");
        let is_class = self.is_word(j, "class");
        let mut local = "default".to_string();
        if is_fn || is_class {
            let mut name_at = j + 1;
            if self.is(name_at, "*") {
                name_at += 1;
            }
            if self.is_ident(name_at) && !(is_class && matches!(self.text(name_at), "extends" | "implements")) {
                local = self.text(name_at).to_string();
            }
            stmt.side_effects = is_class && self.class_side_effects(j, end);
        } else {
            stmt.side_effects = self.expr_side_effects(i, end);
        }
        stmt.declares.push(local.clone());
        stmt.refs = self.collect_refs(i, end);
        self.ast.exports.push(ExportEntry::Local {
            exported: "default".to_string(),
            local,
            stmt: index,
        });
        Ok(())
    }

    /// Classifies a non-import statement starting at `i`, filling kind, declares and side effects.
    fn declaration_or_expression(&mut self, mut i: usize, end: usize, stmt: &mut Statement) {
        if self.ts && self.is_word(i, "declare") {
            stmt.kind = StatementKind::Type;
            stmt.side_effects = false;
            return;
        }
        let word = if self.kind(i) == Some(TokenKind::Ident) { self.text(i) } else { "" };
        match word {
            "const" | "let" | "var" if self.is(i + 1, "{") || self.is(i + 1, "[") || self.is_ident(i + 1) => {
                if word == "const" && self.is_word(i + 1, "enum") {
                    self.simple_declaration(i + 2, stmt);
                    return;
                }
                stmt.kind = StatementKind::Declaration;
                stmt.side_effects = self.declarators(i + 1, end, &mut stmt.declares);
            }
            "function" => {
                let name_at = if self.is(i + 1, "*") { i + 2 } else { i + 1 };
                self.simple_declaration(name_at, stmt);
            }
            "async" if self.is_word(i + 1, "function") => {
                let name_at = if self.is(i + 2, "*") { i + 3 } else { i + 2 };
                self.simple_declaration(name_at, stmt);
            }
            "abstract" if self.is_word(i + 1, "class") => {
                i += 1;
                self.simple_declaration(i + 1, stmt);
                stmt.side_effects = self.class_side_effects(i, end);
            }
            "class" => {
                self.simple_declaration(i + 1, stmt);
                stmt.side_effects = self.class_side_effects(i, end);
            }
            "enum" => self.simple_declaration(i + 1, stmt),
            "namespace" | "module" if self.ts && self.is_ident(i + 1) => {
                self.simple_declaration(i + 1, stmt);
            }
            "interface" if self.ts && self.is_ident(i + 1) => {
                stmt.kind = StatementKind::Type;
                stmt.side_effects = false;
            }
            "type" if self.ts && self.is_ident(i + 1) && (self.is(i + 2, "=") || self.is(i + 2, "<")) => {
                stmt.kind = StatementKind::Type;
                stmt.side_effects = false;
            }
            "if" | "for" | "while" | "do" | "try" | "switch" | "throw" | "return" | "with"
            | "debugger" | "break" | "continue" => {
                stmt.side_effects = true;
            }
            _ => {
                stmt.side_effects = self.is(i, "{") || self.expr_side_effects(i, end);
            }
        }
    }

    fn simple_declaration(&self, name_at: usize, stmt: &mut Statement) {
        stmt.kind = StatementKind::Declaration;
        stmt.side_effects = false;
        if self.is_ident(name_at) {
            stmt.declares.push(self.text(name_at).to_string());
        }
    }

    /// `a = 1, { b, c: [d] } = obj`. Pushes declared names; returns whether any initializer
    /// or pattern can have side effects. Destructuring always can (getters, iterators).
    fn declarators(&self, start: usize, end: usize, declares: &mut Vec<String>) -> bool {
        let mut effects = false;
        let mut i = start;
        while i < end {
            let decl_end = self.next_top_level(i, end, &[","]);
            if self.is(i, "{") || self.is(i, "[") {
                self.pattern_names(i, declares);
                effects = true;
            } else if self.is_ident(i) {
                declares.push(self.text(i).to_string());
                let init = (i + 1..decl_end).find(|&k| self.is(k, "=") && self.depth_zero_between(i, k));
                if let Some(eq) = init {
                    effects |= self.expr_side_effects(eq + 1, decl_end);
                }
            }
            i = decl_end + 1;
        }
        effects
    }

    /// No unmatched bracket between `a` and `b` (they're siblings in one group).
    fn depth_zero_between(&self, a: usize, b: usize) -> bool {
        let mut k = a;
        while k < b {
            if self.is_open(k) {
                k = self.partner[k] + 1;
                if k > b {
                    return false;
                }
            } else {
                k += 1;
            }
        }
        true
    }

    /// Index of the next separator in `seps` at the current nesting level, or `end`.
    fn next_top_level(&self, mut i: usize, end: usize, seps: &[&str]) -> usize {
        while i < end {
            if self.is_open(i) {
                i = self.partner[i] + 1;
                continue;
            }
            if seps.iter().any(|s| self.is(i, s)) {
                return i;
            }
            i += 1;
        }
        end
    }

    /// Binding names in a destructuring pattern opened at `open`.
    fn pattern_names(&self, open: usize, out: &mut Vec<String>) {
        let close = self.partner[open];
        let object = self.is(open, "{");
        let mut i = open + 1;
        while i < close {
            let elem_end = self.next_top_level(i, close, &[","]);
            let mut k = i;
            if self.is(k, "...") {
                k += 1;
            }
            if object && self.is(k, "[") {
                // computed key: `[expr]: target`
                k = self.partner[k] + 1;
            }
            if object && (self.is_ident(k) || matches!(self.kind(k), Some(TokenKind::Str | TokenKind::Number))) && self.is(k + 1, ":") {
                k += 2;
            } else if object && self.is(k, ":") {
                k += 1;
            }
            if self.is(k, "{") || self.is(k, "[") {
                self.pattern_names(k, out);
            } else if self.is_ident(k) {
                out.push(self.text(k).to_string());
            }
            i = elem_end + 1;
        }
    }

    fn class_side_effects(&self, class_at: usize, end: usize) -> bool {
        let Some(body) = (class_at..end).find(|&k| self.is(k, "{") && self.depth_zero_between(class_at, k)) else {
            return true;
        };
        if let Some(ext) = (class_at..body).find(|&k| self.is_word(k, "extends")) {
            if self.expr_side_effects(ext + 1, body) {
                return true;
            }
        }
        if (class_at..body).any(|k| self.is(k, "@")) {
            return true;
        }
        let close = self.partner[body];
        let mut k = body + 1;
        while k < close {
            if self.is(k, "@") {
                return true;
            }
            if self.is(k, "[") && (self.is(k - 1, "{") || self.is(k - 1, ";") || self.is(k - 1, "}") || self.toks[k].newline_before) {
                return true;
            }
            if self.is_word(k, "static") {
                if self.is(k + 1, "{") {
                    return true;
                }
                let member_end = self.next_top_level(k + 1, close, &[";", "{", "("]);
                if self.is(member_end, ";") || member_end == close {
                    if let Some(eq) = (k + 1..member_end).find(|&m| self.is(m, "=")) {
                        if eq + 2 != member_end || !self.is_literal(eq + 1) {
                            return true;
                        }
                    }
                }
            }
            if self.is_open(k) {
                k = self.partner[k] + 1;
            } else {
                k += 1;
            }
        }
        false
    }

    fn is_literal(&self, i: usize) -> bool {
        match self.kind(i) {
            Some(TokenKind::Str | TokenKind::Number | TokenKind::Template | TokenKind::Regex) => true,
            Some(TokenKind::Ident) => matches!(self.text(i), "true" | "false" | "null" | "undefined"),
            _ => false,
        }
    }

    /// Whether evaluating tokens `[start, end)` as an expression can be observed.
    ///
    /// Function bodies are skipped. Calls, `new`, member reads (getters), assignments,
    /// updates, spread, `in`/`instanceof`, `await`/`yield`/`delete` and template
    /// substitutions count as effects; `@__PURE__` calls and `new`s do not.
    fn expr_side_effects(&self, start: usize, end: usize) -> bool {
        let mut pure_pending = false;
        let mut i = start;
        while i < end {
            let t = &self.toks[i];
            if t.pure {
                pure_pending = true;
            }
            match t.kind {
                TokenKind::Ident => match self.text(i) {
                    "function" => {
                        i = self.skip_function(i, end);
                        continue;
                    }
                    "class" => {
                        if self.class_side_effects(i, end) {
                            return true;
                        }
                        i = (i..end)
                            .find(|&k| self.is(k, "{"))
                            .map_or(end, |b| self.partner[b] + 1);
                        continue;
                    }
                    "new" if !pure_pending => return true,
                    "await" | "yield" | "delete" | "throw" | "in" | "instanceof" => return true,
                    "import" if self.is(i + 1, "(") => return true,
                    _ if self.is(i + 1, "=>") => {
                        i = self.skip_arrow_body(i + 2, end);
                        continue;
                    }
                    _ => {}
                },
                TokenKind::Punct => match self.text(i) {
                    "(" => {
                        let close = self.partner[i];
                        if self.is(close + 1, "=>") {
                            i = self.skip_arrow_body(close + 2, end);
                            continue;
                        }
                        if self.is(close + 1, "{") {
                            // method definition in an object literal
                            i = self.partner[close + 1] + 1;
                            continue;
                        }
                        if i > start && self.ends_expression(i - 1) && !self.is_word(i - 1, "async") {
                            if pure_pending {
                                pure_pending = false;
                            } else {
                                return true;
                            }
                        }
                    }
                    "[" if i > start && self.ends_expression(i - 1) => return true,
                    "." | "?." if self.is_ident(i + 1) => return true,
                    "++" | "--" | "..." => return true,
                    p if ASSIGNMENT_OPS.contains(&p) => return true,
                    _ => {}
                },
                TokenKind::TemplateHead => return true,
                TokenKind::Template if i > start && self.ends_expression(i - 1) => return true,
                _ => {}
            }
            i += 1;
        }
        false
    }

    fn skip_function(&self, at: usize, end: usize) -> usize {
        let Some(params) = (at..end).find(|&k| self.is(k, "(")) else {
            return end;
        };
        let after = self.partner[params] + 1;
        (after..end)
            .find(|&k| self.is(k, "{"))
            .map_or(end, |body| self.partner[body] + 1)
    }

    fn skip_arrow_body(&self, at: usize, end: usize) -> usize {
        if self.is(at, "{") {
            return self.partner[at] + 1;
        }
        let mut i = at;
        while i < end {
            if self.is_open(i) {
                i = self.partner[i] + 1;
                continue;
            }
            if matches!(self.text(i), "," | ")" | "]" | "}" | ";") && self.kind(i) == Some(TokenKind::Punct) {
                return i;
            }
            i += 1;
        }
        end
    }

    /// Identifier reads in `[start, end)`, with `x.prop` / `x["prop"]` recorded as a property read.
    fn collect_refs(&self, start: usize, end: usize) -> Vec<Reference> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for i in start..end {
            if self.kind(i) != Some(TokenKind::Ident) {
                continue;
            }
            let name = self.text(i);
            if RESERVED.contains(&name) {
                continue;
            }
            if i > 0 && (self.is(i - 1, ".") || self.is(i - 1, "?.")) {
                continue;
            }
            // object literal key
            if self.is(i + 1, ":") && i > 0 && (self.is(i - 1, "{") || self.is(i - 1, ",")) {
                continue;
            }
            let property = if (self.is(i + 1, ".") || self.is(i + 1, "?.")) && self.is_ident(i + 2) {
                Some(self.text(i + 2).to_string())
            } else if self.is(i + 1, "[") && self.is(i + 3, "]") {
                self.string_at(i + 2)
            } else {
                None
            };
            let r = Reference {
                name: name.to_string(),
                property,
            };
            if seen.insert(r.clone()) {
                out.push(r);
            }
        }
        out
    }

    /// TypeScript drops imports whose bindings are never read: they may name only types.
    fn elide_unused_imports(&mut self) {
        let used: HashSet<&str> = self
            .ast
            .statements
            .iter()
            .flat_map(|s| s.refs.iter().map(|r| r.name.as_str()))
            .collect();
        let elided: HashSet<usize> = self
            .ast
            .imports
            .iter()
            .filter(|d| !d.bindings.is_empty() && d.bindings.iter().all(|b| !used.contains(b.local())))
            .map(|d| d.site)
            .collect();
        if elided.is_empty() {
            return;
        }

        let mut remap = vec![usize::MAX; self.ast.import_sites.len()];
        let mut kept = Vec::new();
        for (old, site) in std::mem::take(&mut self.ast.import_sites).into_iter().enumerate() {
            if !elided.contains(&old) {
                remap[old] = kept.len();
                kept.push(site);
            }
        }
        self.ast.import_sites = kept;
        self.ast.imports.retain(|d| !elided.contains(&d.site));
        for decl in &mut self.ast.imports {
            decl.site = remap[decl.site];
            if let Some(stmt) = self.ast.statements.get_mut(decl.stmt) {
                stmt.declares.retain(|n| decl.bindings.iter().any(|b| b.local() == n));
            }
        }
        for entry in &mut self.ast.exports {
            match entry {
                ExportEntry::ReExport { site, .. }
                | ExportEntry::ReExportNamespace { site, .. }
                | ExportEntry::Star { site, .. } => *site = remap[*site],
                ExportEntry::Local { .. } => {}
            }
        }
    }
}

fn match_brackets(src: &str, toks: &[Token]) -> Result<Vec<usize>, ParseError> {
    let mut partner: Vec<usize> = (0..toks.len()).collect();
    let mut stack: Vec<usize> = Vec::new();
    for (i, t) in toks.iter().enumerate() {
        let closes = match t.kind {
            TokenKind::Punct => match t.text(src) {
                "(" | "[" | "{" => {
                    stack.push(i);
                    continue;
                }
                ")" => Some("("),
                "]" => Some("["),
                "}" => Some("{"),
                _ => None,
            },
            TokenKind::TemplateHead => {
                stack.push(i);
                continue;
            }
            TokenKind::TemplateTail => Some("`"),
            _ => None,
        };
        let Some(expected) = closes else { continue };
        let Some(open) = stack.pop() else {
            return Err(ParseError::new(format!("Unexpected \"{}\"", t.text(src)), t.start));
        };
        let matches = match toks[open].kind {
            TokenKind::TemplateHead => expected == "`",
            _ => toks[open].text(src) == expected,
        };
        if !matches {
            return Err(ParseError::new(format!("Unexpected \"{}\"", t.text(src)), t.start));
        }
        partner[open] = i;
        partner[i] = open;
    }
    if let Some(open) = stack.pop() {
        return Err(ParseError::new("Unexpected end of file", toks[open].start));
    }
    Ok(partner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(src: &str) -> ModuleAst {
        ScanParser.parse(src, Loader::Js).unwrap()
    }

    fn scan_ts(src: &str) -> ModuleAst {
        ScanParser.parse(src, Loader::Ts).unwrap()
    }

    #[test]
    fn test_import_bindings() {
        let ast = scan("import def, { a, b as c, default as d } from './x' with { type: 'json' };\nimport * as ns from 'y'\nimport 'z'");
        assert_eq!(ast.import_sites.len(), 3);
        assert_eq!(ast.import_sites[0].specifier, "./x");
        assert_eq!(ast.import_sites[0].attributes.get("type").map(String::as_str), Some("json"));
        assert_eq!(
            ast.imports[0].bindings,
            vec![
                ImportBinding::Default { local: "def".into() },
                ImportBinding::Named { imported: "a".into(), local: "a".into() },
                ImportBinding::Named { imported: "b".into(), local: "c".into() },
                ImportBinding::Default { local: "d".into() },
            ]
        );
        assert_eq!(ast.imports[1].bindings, vec![ImportBinding::Namespace { local: "ns".into() }]);
        assert!(ast.imports[2].bindings.is_empty());
        assert_eq!(ast.statements.len(), 3);
        assert!(ast.has_esm_syntax);
    }

    #[test]
    fn test_export_forms() {
        let ast = scan(
            "export const x = 1, { y } = obj\nexport function f() {}\nexport { a as b } from './a'\nexport * from './star'\nexport * as ns from './ns'\nexport { x as z }\nexport default 42",
        );
        let names: Vec<_> = ast.export_names().collect();
        assert_eq!(names, vec!["x", "y", "f", "b", "ns", "z", "default"]);
        assert!(ast.exports.iter().any(|e| matches!(e, ExportEntry::Star { .. })));
        assert!(matches!(
            &ast.exports[3],
            ExportEntry::ReExport { exported, imported, .. } if exported == "b" && imported == "a"
        ));
        // destructuring declaration is never pure
        assert!(ast.statements[0].side_effects);
        assert!(!ast.statements[1].side_effects);
    }

    #[test]
    fn test_require_dynamic_import_and_worker() {
        let ast = scan(
            "const b = require('./b')\nimport('./lazy.js', { with: { type: 'json' } }).then(m => m)\nnew Worker(new URL('./w.js', import.meta.url))",
        );
        let kinds: Vec<_> = ast.import_sites.iter().map(|s| (s.specifier.as_str(), s.kind, s.worker)).collect();
        assert_eq!(
            kinds,
            vec![
                ("./b", ImportKind::RequireCall, false),
                ("./lazy.js", ImportKind::DynamicImport, false),
                ("./w.js", ImportKind::DynamicImport, true),
            ]
        );
        assert_eq!(ast.import_sites[1].attributes.get("type").map(String::as_str), Some("json"));
        assert_eq!(ast.import_sites[2].stmt, 2);
        assert!(ast.has_esm_syntax);
    }

    #[test]
    fn test_commonjs_markers() {
        let ast = scan("module.exports = { message: 'hi' }");
        assert!(ast.uses_commonjs);
        assert!(ast.uses_module_var);
        assert!(!ast.has_esm_syntax);

        let ast = scan("exports.__esModule = true; exports.default = 1");
        assert!(ast.uses_commonjs);
        assert!(!ast.uses_module_var);
    }

    #[test]
    fn test_side_effect_classification() {
        let ast = scan(
            "const a = 1\nconst b = () => console.log(1)\nconsole.log('x')\nconst c = obj.prop\nconst d = /* @__PURE__ */ make()\nconst e = `t${a}`\nclass K { static { init() } }\nclass L extends Base { m() { run() } }\nconst o = { m() { run() }, k: [1, 2] }",
        );
        let effects: Vec<_> = ast.statements.iter().map(|s| s.side_effects).collect();
        assert_eq!(effects, vec![false, false, true, true, false, true, true, false, false]);
    }

    #[test]
    fn test_asi_and_blocks() {
        let ast = scan("if (x)\n  foo()\nelse bar()\nfunction f() {\n}\n(function () {})()\nlet y = a\n++b");
        assert_eq!(ast.statements.len(), 5);
        assert_eq!(ast.statements[1].declares, vec!["f"]);
    }

    #[test]
    fn test_refs_capture_member_reads() {
        let ast = scan("import * as ns from './ns'\nconsole.log(ns.foo, ns['bar'], { ns })");
        let refs = &ast.statements[1].refs;
        assert!(refs.contains(&Reference { name: "ns".into(), property: Some("foo".into()) }));
        assert!(refs.contains(&Reference { name: "ns".into(), property: Some("bar".into()) }));
        assert!(refs.contains(&Reference { name: "ns".into(), property: None }));
        assert!(!refs.iter().any(|r| r.name == "log"));
    }

    #[test]
    fn test_typescript_erasure() {
        let ast = scan_ts(
            "import type { T } from './types'\nimport { U, v } from './mixed'\nimport { Only } from './only-types'\nexport interface I { a: string }\ntype A = string\nexport type { T }\nlet x: U = v()",
        );
        let specs: Vec<_> = ast.import_sites.iter().map(|s| s.specifier.as_str()).collect();
        assert_eq!(specs, vec!["./mixed"]);
        assert_eq!(ast.imports[0].site, 0);
        assert!(ast.statements.iter().filter(|s| s.kind == StatementKind::Type).count() >= 3);
    }

    #[test]
    fn test_json_and_text_are_commonjs_values() {
        let ast = ScanParser.parse("{\"a\": 1}", Loader::Json).unwrap();
        assert!(ast.uses_commonjs);
        assert!(!ast.statements[0].side_effects);
        assert!(ScanParser.parse("{nope", Loader::Json).is_err());
    }

    #[test]
    fn test_unbalanced_brackets_is_parse_error() {
        let err = ScanParser.parse("function f() {", Loader::Js).unwrap_err();
        assert_eq!(err.message, "Unexpected end of file");
    }
}
