//! Rewrite a module so that every export is replaced by a mock.
//!
//! The export statements are rewritten in place into plain bindings, then a
//! namespace object collecting those bindings is appended together with a call
//! into the runtime mocker and an `export { ... }` list re-exporting each
//! mocked field under its original name.

use tracing::debug;

use crate::ast::{BindingTarget, DeclarationKind, DefaultKind, ModuleAst, ModuleItem};
use crate::error::{AutomockError, AutomockResult, UnsupportedPattern};
use crate::parser::ModuleParser;
use crate::splice::{SegmentMapping, SourceEdits};

/// Binding holding the value of `export default`
pub const DEFAULT_BINDING: &str = "__mink_default__";

/// Global property the generated code reads the mocker from, by default
pub const DEFAULT_GLOBAL_ACCESSOR: &str = "__mink_mocker__";

const CURRENT_MODULE: &str = "__mink_current_es_module__";
const MOCKED_MODULE: &str = "__mink_mocked_module__";

/// How the runtime mocker treats functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockKind {
    /// No-op mocks
    #[default]
    Automock,
    /// Mocks that call through to the original
    Autospy,
}

impl MockKind {
    /// Name passed to `mockObject`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automock => "automock",
            Self::Autospy => "autospy",
        }
    }
}

/// Options for [`automock`]
#[derive(Debug, Clone)]
pub struct AutomockOptions {
    /// `globalThis` property holding the runtime mocker
    pub global_accessor: String,
    /// Automock or autospy
    pub mock_kind: MockKind,
}

impl Default for AutomockOptions {
    fn default() -> Self {
        Self {
            global_accessor: DEFAULT_GLOBAL_ACCESSOR.to_string(),
            mock_kind: MockKind::Automock,
        }
    }
}

impl AutomockOptions {
    /// Options for spying instead of mocking
    pub fn autospy() -> Self {
        Self {
            mock_kind: MockKind::Autospy,
            ..Self::default()
        }
    }
}

/// One export of the rewritten module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDescriptor {
    /// Binding inside the module
    pub name: String,
    /// Export name when it differs from `name`
    pub alias: Option<String>,
}

impl ExportDescriptor {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            alias: None,
        }
    }

    fn aliased(name: &str, alias: &str) -> Self {
        Self {
            name: name.to_string(),
            alias: (name != alias).then(|| alias.to_string()),
        }
    }

    /// Name importers see
    pub fn exported(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// Result of [`transform`]
#[derive(Debug, Clone)]
pub struct AutomockOutput {
    /// Rewritten module text
    pub code: String,
    /// Exports in declaration order
    pub exports: Vec<ExportDescriptor>,
    /// Unchanged segments of the original text
    pub mappings: Vec<SegmentMapping>,
}

/// Rewrite `source` so every export is mocked
pub fn automock(
    source: &str,
    parser: &impl ModuleParser,
    options: &AutomockOptions,
) -> AutomockResult<String> {
    transform(source, parser, options).map(|output| output.code)
}

/// Rewrite `source`, also reporting the collected exports and mappings
pub fn transform(
    source: &str,
    parser: &impl ModuleParser,
    options: &AutomockOptions,
) -> AutomockResult<AutomockOutput> {
    let ast = parser.parse(source)?;
    let mut edits = SourceEdits::new(source);
    let exports = rewrite_exports(&ast, &mut edits)?;
    edits.append(&mocked_namespace(&exports, options));

    debug!(
        exports = exports.len(),
        mock_kind = options.mock_kind.as_str(),
        "automocked module"
    );

    Ok(AutomockOutput {
        code: edits.finish(),
        mappings: edits.mappings(),
        exports,
    })
}

/// Turn every export statement into plain bindings and collect descriptors
fn rewrite_exports(ast: &ModuleAst, edits: &mut SourceEdits<'_>) -> AutomockResult<Vec<ExportDescriptor>> {
    let mut exports = Vec::new();
    let mut imported = 0usize;
    let mut fresh_import = || {
        let name = format!("__mink_imported_{}__", imported);
        imported += 1;
        name
    };

    for item in &ast.items {
        match item {
            ModuleItem::ExportAll(all) => {
                if all.type_only {
                    edits.remove(all.span.start, all.span.end)?;
                    continue;
                }
                let Some(namespace) = &all.exported else {
                    return Err(AutomockError::unsupported(UnsupportedPattern::ExportAll {
                        source: all.source.clone(),
                    }));
                };
                let local = fresh_import();
                edits.overwrite(
                    all.span.start,
                    all.span.end,
                    &format!("import * as {} from {};", local, quote(&all.source)),
                )?;
                exports.push(ExportDescriptor::aliased(&local, namespace));
            }

            ModuleItem::ExportDefault(default) => match default.kind {
                DefaultKind::TypeOnly => {
                    edits.remove(default.span.start, default.span.end)?;
                }
                kind => {
                    edits.overwrite(
                        default.span.start,
                        default.declaration_span.start,
                        &format!("const {} = ", DEFAULT_BINDING),
                    )?;
                    if matches!(kind, DefaultKind::Function | DefaultKind::Class) {
                        edits.insert(default.declaration_span.end, ";")?;
                    }
                    exports.push(ExportDescriptor::aliased(DEFAULT_BINDING, "default"));
                }
            },

            ModuleItem::ExportNamed(named) if named.type_only => {
                edits.remove(named.span.start, named.span.end)?;
            }

            ModuleItem::ExportNamed(named) => {
                if let Some(decl) = &named.declaration {
                    match &decl.kind {
                        DeclarationKind::TypeOnly => {
                            edits.remove(named.span.start, named.span.end)?;
                            continue;
                        }
                        DeclarationKind::Function { name }
                        | DeclarationKind::Class { name }
                        | DeclarationKind::Enum { name } => {
                            exports.push(ExportDescriptor::named(name));
                        }
                        DeclarationKind::Variable { targets } => {
                            for target in targets {
                                collect_bindings(target, &mut exports)?;
                            }
                        }
                    }
                    // Drop the `export` keyword, keep the declaration.
                    edits.remove(named.span.start, decl.span.start)?;
                    continue;
                }

                let specifiers = named.specifiers.iter().filter(|spec| !spec.type_only);
                match &named.source {
                    None => {
                        for spec in specifiers {
                            exports.push(ExportDescriptor::aliased(&spec.local, &spec.exported));
                        }
                        edits.remove(named.span.start, named.span.end)?;
                    }
                    Some(source) => {
                        let mut imports = Vec::new();
                        for spec in specifiers {
                            let local = fresh_import();
                            imports.push(format!("{} as {}", export_name(&spec.local), local));
                            exports.push(ExportDescriptor::aliased(&local, &spec.exported));
                        }
                        if imports.is_empty() {
                            edits.remove(named.span.start, named.span.end)?;
                        } else {
                            edits.overwrite(
                                named.span.start,
                                named.span.end,
                                &format!("import {{ {} }} from {};", imports.join(", "), quote(source)),
                            )?;
                        }
                    }
                }
            }

            ModuleItem::Other => {}
        }
    }

    Ok(exports)
}

/// Every identifier bound by a declarator pattern
fn collect_bindings(target: &BindingTarget, out: &mut Vec<ExportDescriptor>) -> AutomockResult<()> {
    match target {
        BindingTarget::Identifier(name) => out.push(ExportDescriptor::named(name)),
        BindingTarget::Array { elements, rest } => {
            for element in elements.iter().flatten() {
                collect_bindings(element, out)?;
            }
            if let Some(rest) = rest {
                collect_bindings(rest, out)?;
            }
        }
        BindingTarget::Object { properties, rest } => {
            for property in properties {
                collect_bindings(property, out)?;
            }
            if let Some(rest) = rest {
                collect_bindings(rest, out)?;
            }
        }
        BindingTarget::Assignment(_) => {
            return Err(AutomockError::unsupported(UnsupportedPattern::AssignmentPattern));
        }
        BindingTarget::Member(_) => {
            return Err(AutomockError::unsupported(UnsupportedPattern::MemberExpression));
        }
    }
    Ok(())
}

/// Code appended after the rewritten module body
fn mocked_namespace(exports: &[ExportDescriptor], options: &AutomockOptions) -> String {
    let mut lines = vec![
        String::new(),
        format!("const {} = {{", CURRENT_MODULE),
        "  [Symbol.toStringTag]: \"Module\",".to_string(),
        "  __esModule: true,".to_string(),
    ];
    lines.extend(
        exports
            .iter()
            .map(|export| format!("  [{}]: {},", quote(export.exported()), export.name)),
    );
    lines.push("}".to_string());
    lines.push(format!(
        "const {} = globalThis[{}].mockObject({}, {})",
        MOCKED_MODULE,
        quote(&options.global_accessor),
        CURRENT_MODULE,
        quote(options.mock_kind.as_str())
    ));
    lines.extend(exports.iter().enumerate().map(|(index, export)| {
        format!(
            "const __mink_mocked_{}__ = {}[{}]",
            index,
            MOCKED_MODULE,
            quote(export.exported())
        )
    }));
    lines.push("export {".to_string());
    lines.extend(exports.iter().enumerate().map(|(index, export)| {
        format!("  __mink_mocked_{}__ as {},", index, export_name(export.exported()))
    }));
    lines.push("}".to_string());

    let mut code = lines.join("\n");
    code.push('\n');
    code
}

/// JavaScript string literal for `s`
fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}

/// `s` as a module export name: bare when it is an identifier, quoted otherwise
fn export_name(s: &str) -> String {
    if is_identifier(s) { s.to_string() } else { quote(s) }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' || first == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}
