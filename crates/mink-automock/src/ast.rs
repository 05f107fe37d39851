//! The module shape the transformer works on.
//!
//! Only what affects the export surface is represented. Parsers lower their
//! own AST into these types; offsets are byte offsets into the parsed source.

/// Byte range in the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// Start offset (inclusive)
    pub start: usize,
    /// End offset (exclusive)
    pub end: usize,
}

impl Span {
    /// Create a span
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// Top-level statements of a module, in source order
#[derive(Debug, Clone, Default)]
pub struct ModuleAst {
    /// Export-affecting statements; everything else is [`ModuleItem::Other`]
    pub items: Vec<ModuleItem>,
}

/// One top-level statement
#[derive(Debug, Clone)]
pub enum ModuleItem {
    /// `export <declaration>` or `export { ... } [from "..."]`
    ExportNamed(ExportNamed),
    /// `export default ...`
    ExportDefault(ExportDefault),
    /// `export * [as ns] from "..."`
    ExportAll(ExportAll),
    /// Anything that does not export
    Other,
}

/// `export <declaration>` or `export { ... } [from "..."]`
#[derive(Debug, Clone)]
pub struct ExportNamed {
    /// Whole statement
    pub span: Span,
    /// Exported declaration, when there is one
    pub declaration: Option<ExportedDeclaration>,
    /// `{ a, b as c }` specifiers
    pub specifiers: Vec<ExportSpecifier>,
    /// Module of a re-export
    pub source: Option<String>,
    /// `export type { ... }`
    pub type_only: bool,
}

/// Declaration following `export`
#[derive(Debug, Clone)]
pub struct ExportedDeclaration {
    /// The declaration without the `export` keyword
    pub span: Span,
    /// What it declares
    pub kind: DeclarationKind,
}

/// Declaration kinds that matter for the export surface
#[derive(Debug, Clone)]
pub enum DeclarationKind {
    /// `function name() {}`
    Function {
        /// Binding name
        name: String,
    },
    /// `class Name {}`
    Class {
        /// Binding name
        name: String,
    },
    /// `const`/`let`/`var` with one binding pattern per declarator
    Variable {
        /// Declarator patterns in order
        targets: Vec<BindingTarget>,
    },
    /// `enum Name {}`
    Enum {
        /// Binding name
        name: String,
    },
    /// Interfaces, type aliases and ambient declarations; erased at runtime
    TypeOnly,
}

/// Binding pattern of a variable declarator
#[derive(Debug, Clone, PartialEq)]
pub enum BindingTarget {
    /// `a`
    Identifier(String),
    /// `[a, , b, ...rest]`; holes are `None`
    Array {
        /// Elements in order
        elements: Vec<Option<BindingTarget>>,
        /// Trailing rest element
        rest: Option<Box<BindingTarget>>,
    },
    /// `{ a, b: c, ...rest }`; each property is its value pattern
    Object {
        /// Property value patterns in order
        properties: Vec<BindingTarget>,
        /// Trailing rest element
        rest: Option<Box<BindingTarget>>,
    },
    /// `a = 1`
    Assignment(Span),
    /// `obj.prop`
    Member(Span),
}

/// `local as exported`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSpecifier {
    /// Name inside the module (or in the re-export source)
    pub local: String,
    /// Name seen by importers
    pub exported: String,
    /// `export { type T }`
    pub type_only: bool,
}

/// What follows `export default`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultKind {
    /// Any expression
    Expression,
    /// `function [name]() {}`
    Function,
    /// `class [Name] {}`
    Class,
    /// `interface I {}`
    TypeOnly,
}

/// `export default ...`
#[derive(Debug, Clone)]
pub struct ExportDefault {
    /// Whole statement
    pub span: Span,
    /// The exported expression or declaration
    pub declaration_span: Span,
    /// Shape of the declaration
    pub kind: DefaultKind,
}

/// `export * [as ns] from "source"`
#[derive(Debug, Clone)]
pub struct ExportAll {
    /// Whole statement
    pub span: Span,
    /// Re-exported module
    pub source: String,
    /// Namespace name for `export * as ns`
    pub exported: Option<String>,
    /// `export type * from ...`
    pub type_only: bool,
}
