//! Parsers producing [`ModuleAst`]

use oxc_allocator::Allocator;
use oxc_ast::ast::*;
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType};
use tracing::trace;

use crate::ast::{
    BindingTarget, DeclarationKind, DefaultKind, ExportAll, ExportDefault, ExportNamed,
    ExportSpecifier, ExportedDeclaration, ModuleAst, ModuleItem, Span,
};
use crate::error::{AutomockError, AutomockResult};

/// Source of a [`ModuleAst`]
pub trait ModuleParser {
    /// Parse `source` into its top-level export shape
    fn parse(&self, source: &str) -> AutomockResult<ModuleAst>;
}

impl<F> ModuleParser for F
where
    F: Fn(&str) -> AutomockResult<ModuleAst>,
{
    fn parse(&self, source: &str) -> AutomockResult<ModuleAst> {
        self(source)
    }
}

/// oxc-backed parser
#[derive(Debug, Clone, Copy)]
pub struct OxcParser {
    source_type: SourceType,
}

impl OxcParser {
    /// Parser for ES modules
    pub fn new() -> Self {
        Self {
            source_type: SourceType::mjs(),
        }
    }

    /// Parser for TypeScript modules
    pub fn typescript() -> Self {
        Self {
            source_type: SourceType::ts(),
        }
    }

    /// Pick the source type from a file path, falling back to ES modules
    pub fn for_path(path: &str) -> Self {
        Self {
            source_type: SourceType::from_path(path).unwrap_or_else(|_| SourceType::mjs()),
        }
    }
}

impl Default for OxcParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleParser for OxcParser {
    fn parse(&self, source: &str) -> AutomockResult<ModuleAst> {
        let allocator = Allocator::default();
        let result = Parser::new(&allocator, source, self.source_type).parse();

        if let Some(error) = result.errors.first() {
            return Err(AutomockError::parse(error.to_string()));
        }

        let items: Vec<ModuleItem> = result.program.body.iter().map(lower_statement).collect();
        trace!(statements = items.len(), "lowered module");
        Ok(ModuleAst { items })
    }
}

fn span(span: oxc_span::Span) -> Span {
    Span::new(span.start as usize, span.end as usize)
}

fn lower_statement(stmt: &Statement) -> ModuleItem {
    match stmt {
        Statement::ExportNamedDeclaration(export) => ModuleItem::ExportNamed(ExportNamed {
            span: span(export.span),
            declaration: export.declaration.as_ref().map(lower_declaration),
            specifiers: export
                .specifiers
                .iter()
                .map(|spec| ExportSpecifier {
                    local: spec.local.name().to_string(),
                    exported: spec.exported.name().to_string(),
                    type_only: spec.export_kind.is_type(),
                })
                .collect(),
            source: export.source.as_ref().map(|source| source.value.to_string()),
            type_only: export.export_kind.is_type(),
        }),

        Statement::ExportDefaultDeclaration(export) => {
            let kind = match &export.declaration {
                ExportDefaultDeclarationKind::FunctionDeclaration(_) => DefaultKind::Function,
                ExportDefaultDeclarationKind::ClassDeclaration(_) => DefaultKind::Class,
                ExportDefaultDeclarationKind::TSInterfaceDeclaration(_) => DefaultKind::TypeOnly,
                _ => DefaultKind::Expression,
            };
            ModuleItem::ExportDefault(ExportDefault {
                span: span(export.span),
                declaration_span: span(export.declaration.span()),
                kind,
            })
        }

        Statement::ExportAllDeclaration(export) => ModuleItem::ExportAll(ExportAll {
            span: span(export.span),
            source: export.source.value.to_string(),
            exported: export.exported.as_ref().map(|name| name.name().to_string()),
            type_only: export.export_kind.is_type(),
        }),

        _ => ModuleItem::Other,
    }
}

fn lower_declaration(decl: &Declaration) -> ExportedDeclaration {
    let kind = match decl {
        Declaration::VariableDeclaration(var) if !var.declare => DeclarationKind::Variable {
            targets: var
                .declarations
                .iter()
                .map(|declarator| lower_pattern(&declarator.id))
                .collect(),
        },
        Declaration::FunctionDeclaration(func) if !func.declare => DeclarationKind::Function {
            name: binding_name(func.id.as_ref()),
        },
        Declaration::ClassDeclaration(class) if !class.declare => DeclarationKind::Class {
            name: binding_name(class.id.as_ref()),
        },
        Declaration::TSEnumDeclaration(decl) if !decl.declare => DeclarationKind::Enum {
            name: decl.id.name.to_string(),
        },
        // Interfaces, type aliases, namespaces and `declare` forms
        _ => DeclarationKind::TypeOnly,
    };
    ExportedDeclaration {
        span: span(decl.span()),
        kind,
    }
}

fn binding_name(id: Option<&BindingIdentifier>) -> String {
    id.map(|id| id.name.to_string()).unwrap_or_default()
}

fn lower_pattern(pattern: &BindingPattern) -> BindingTarget {
    match pattern {
        BindingPattern::BindingIdentifier(ident) => BindingTarget::Identifier(ident.name.to_string()),
        BindingPattern::ArrayPattern(array) => BindingTarget::Array {
            elements: array
                .elements
                .iter()
                .map(|element| element.as_ref().map(lower_pattern))
                .collect(),
            rest: array
                .rest
                .as_ref()
                .map(|rest| Box::new(lower_pattern(&rest.argument))),
        },
        BindingPattern::ObjectPattern(object) => BindingTarget::Object {
            properties: object
                .properties
                .iter()
                .map(|property| lower_pattern(&property.value))
                .collect(),
            rest: object
                .rest
                .as_ref()
                .map(|rest| Box::new(lower_pattern(&rest.argument))),
        },
        BindingPattern::AssignmentPattern(assign) => BindingTarget::Assignment(span(assign.span)),
    }
}
