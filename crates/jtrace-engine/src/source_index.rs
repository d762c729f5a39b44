//! Outline of a single Java compilation unit.
//!
//! The source is parsed with tree-sitter-java and walked for the facts the
//! tracer asks about:
//!
//! - which types are declared, which are public and top-level, and their
//!   binary names;
//! - which methods exist (used to find `main` and to key per-method facts);
//! - which locals are declared `final`;
//! - which locals and fields are initialized with a lambda, and what that
//!   lambda looks like written out as an implementation of its functional
//!   interface's single abstract method.
//!
//! Syntax errors only drop the affected nodes. Lookups that miss mean
//! "unknown".

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use jtrace_jdwp::signature::{method_argument_signatures, signature_to_type_name};
use tree_sitter::{Node, Parser, Tree};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Class,
    Interface,
    Enum,
    Record,
    Annotation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeOutline {
    pub kind: TypeKind,
    pub name: String,
    /// `pkg.Outer$Inner`.
    pub binary_name: String,
    pub is_public: bool,
    pub is_top_level: bool,
    /// 1-based line where the declaration (including modifiers) starts.
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodOutline {
    /// Binary name of the declaring type.
    pub declaring_type: String,
    /// `<init>` for constructors.
    pub name: String,
    pub is_public: bool,
    pub is_static: bool,
    /// Erased simple parameter types, varargs written as arrays.
    pub params: Vec<String>,
    pub return_type: String,
    pub line: u32,
}

impl MethodOutline {
    pub fn key(&self) -> String {
        method_key(&self.declaring_type, &self.name, &self.params)
    }

    /// `public static void main(String[])` or `main(String...)`.
    pub fn is_main(&self) -> bool {
        self.name == "main"
            && self.is_public
            && self.is_static
            && self.return_type == "void"
            && self.params.len() == 1
            && self.params[0] == "String[]"
    }
}

/// Normalized lookup key for a method: `pkg.Outer.Inner.name(int,String[])`.
pub fn method_key(declaring_type: &str, name: &str, params: &[String]) -> String {
    format!(
        "{}.{}({})",
        declaring_type.replace('$', "."),
        name,
        params.join(",")
    )
}

/// The lookup key for a method as the VM reports it: a binary class name, a
/// method name and a JNI method signature.
pub fn runtime_method_key(declaring_type: &str, name: &str, jni_signature: &str) -> String {
    let params: Vec<String> = method_argument_signatures(jni_signature)
        .iter()
        .map(|sig| simple_type_name(&signature_to_type_name(sig)))
        .collect();
    method_key(declaring_type, name, &params)
}

/// `java.util.Map$Entry[]` → `Entry[]`.
fn simple_type_name(type_name: &str) -> String {
    let base_len = type_name.find('[').unwrap_or(type_name.len());
    let (base, dims) = type_name.split_at(base_len);
    let simple = base.rsplit(['.', '$']).next().unwrap_or(base);
    format!("{simple}{dims}")
}

#[derive(Debug, Default)]
struct MethodFacts {
    finals: BTreeSet<String>,
    lambdas: BTreeMap<String, String>,
}

/// Single abstract method of a functional interface.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Sam {
    type_params: Vec<String>,
    return_type: String,
    name: String,
    params: Vec<String>,
}

#[derive(Debug, Default)]
pub struct SourceIndex {
    package: Option<String>,
    types: Vec<TypeOutline>,
    methods: Vec<MethodOutline>,
    facts: HashMap<String, MethodFacts>,
    field_lambdas: HashMap<(String, String), String>,
}


impl SourceIndex {
    pub fn parse(source: &str) -> Self {
        let tree = match parse_java(source) {
            Ok(tree) => tree,
            Err(err) => {
                tracing::debug!(target: "jtrace.engine", error = %err, "source outline unavailable");
                return Self::default();
            }
        };
        let mut builder = OutlineBuilder::new(source);
        builder.program(tree.root_node());
        builder.finish()
    }

    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }

    pub fn types(&self) -> &[TypeOutline] {
        &self.types
    }

    pub fn methods(&self) -> &[MethodOutline] {
        &self.methods
    }

    pub fn public_top_level_types(&self) -> Vec<&TypeOutline> {
        self.types
            .iter()
            .filter(|ty| ty.is_top_level && ty.is_public)
            .collect()
    }

    pub fn main_methods(&self) -> Vec<&MethodOutline> {
        self.methods.iter().filter(|m| m.is_main()).collect()
    }

    pub fn method(&self, key: &str) -> Option<&MethodOutline> {
        self.methods.iter().find(|m| m.key() == key)
    }

    /// Whether local `name` of the method keyed `method_key` is declared `final`.
    pub fn is_final_local(&self, method_key: &str, name: &str) -> bool {
        self.facts
            .get(method_key)
            .is_some_and(|facts| facts.finals.contains(name))
    }

    /// Reconstructed lambda assigned to local `name` in the method keyed `method_key`.
    pub fn local_lambda(&self, method_key: &str, name: &str) -> Option<&str> {
        self.facts
            .get(method_key)
            .and_then(|facts| facts.lambdas.get(name))
            .map(String::as_str)
    }

    /// Reconstructed lambda assigned to field `field` of `class_binary_name`.
    pub fn field_lambda(&self, class_binary_name: &str, field: &str) -> Option<&str> {
        self.field_lambdas
            .get(&(class_binary_name.to_owned(), field.to_owned()))
            .map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Outline builder

#[derive(Debug, Default, Clone, Copy)]
struct Modifiers {
    is_public: bool,
    is_private: bool,
    is_static: bool,
    is_default: bool,
    is_final: bool,
}

/// Enclosing type while walking members.
struct TypeScope {
    kind: TypeKind,
    binary_name: String,
    /// Type variable → erased simple name, including enclosing scopes.
    type_vars: HashMap<String, String>,
    type_params: Vec<String>,
}

enum LambdaOwner {
    Local { method_key: String },
    Field { class_binary_name: String },
}

struct PendingLambda {
    owner: LambdaOwner,
    name: String,
    declared_type: String,
    params: Vec<(Option<String>, String)>,
    body: LambdaBody,
}

enum LambdaBody {
    Expression(String),
    Block(String),
}

struct OutlineBuilder<'s> {
    src: &'s str,
    index: SourceIndex,
    /// Functional interfaces declared in this file, by simple name.
    sams: HashMap<String, Sam>,
    pending: Vec<PendingLambda>,
}

impl<'s> OutlineBuilder<'s> {
    fn new(src: &'s str) -> Self {
        OutlineBuilder {
            src,
            index: SourceIndex::default(),
            sams: HashMap::new(),
            pending: Vec::new(),
        }
    }

    fn text(&self, node: Node<'_>) -> &'s str {
        node_text(self.src, node)
    }

    fn finish(mut self) -> SourceIndex {
        for pending in std::mem::take(&mut self.pending) {
            let Some(text) = self.render_lambda(&pending) else {
                continue;
            };
            match pending.owner {
                LambdaOwner::Local { method_key } => {
                    self.index
                        .facts
                        .entry(method_key)
                        .or_default()
                        .lambdas
                        .insert(pending.name, text);
                }
                LambdaOwner::Field { class_binary_name } => {
                    self.index
                        .field_lambdas
                        .insert((class_binary_name, pending.name), text);
                }
            }
        }
        self.index
    }

    fn program(&mut self, root: Node<'_>) {
        for child in named_children(root) {
            if child.kind() == "package_declaration" {
                let name = named_children(child)
                    .into_iter()
                    .find(|n| matches!(n.kind(), "identifier" | "scoped_identifier"));
                if let Some(name) = name {
                    self.index.package = Some(strip_whitespace(self.text(name)));
                }
            } else {
                self.type_declaration(child, None);
            }
        }
    }

    fn type_declaration(&mut self, node: Node<'_>, outer: Option<&TypeScope>) {
        let kind = match node.kind() {
            "class_declaration" => TypeKind::Class,
            "interface_declaration" => TypeKind::Interface,
            "enum_declaration" => TypeKind::Enum,
            "record_declaration" => TypeKind::Record,
            "annotation_type_declaration" => TypeKind::Annotation,
            _ => return,
        };
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name).to_owned();
        let binary_name = match (outer, &self.index.package) {
            (Some(outer), _) => format!("{}${name}", outer.binary_name),
            (None, Some(package)) => format!("{package}.{name}"),
            (None, None) => name.clone(),
        };
        let modifiers = modifiers_of(node);
        self.index.types.push(TypeOutline {
            kind,
            name,
            binary_name: binary_name.clone(),
            is_public: modifiers.is_public,
            is_top_level: outer.is_none(),
            line: line_of(node),
        });

        let mut type_vars = outer.map(|o| o.type_vars.clone()).unwrap_or_default();
        let declared = self.type_parameters(node);
        let type_params = declared.iter().map(|(var, _)| var.clone()).collect();
        type_vars.extend(declared);
        let scope = TypeScope {
            kind,
            binary_name,
            type_vars,
            type_params,
        };

        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        if kind == TypeKind::Annotation {
            return;
        }
        let record_header = if kind == TypeKind::Record {
            node.child_by_field_name("parameters")
        } else {
            None
        };
        let mut abstract_methods = Vec::new();
        self.members(body, &scope, record_header, &mut abstract_methods);

        if kind == TypeKind::Interface && abstract_methods.len() == 1 {
            if let Some(mut sam) = abstract_methods.pop() {
                sam.type_params = scope.type_params.clone();
                let simple = simple_type_name(&scope.binary_name);
                self.sams.insert(simple, sam);
            }
        }
    }

    /// `<T, V extends Comparable<V>>` → [(`T`, `Object`), (`V`, `Comparable`)].
    fn type_parameters(&self, node: Node<'_>) -> Vec<(String, String)> {
        let Some(params) = node.child_by_field_name("type_parameters") else {
            return Vec::new();
        };
        named_children(params)
            .into_iter()
            .filter(|p| p.kind() == "type_parameter")
            .filter_map(|p| {
                let name = named_children(p)
                    .into_iter()
                    .find(|n| matches!(n.kind(), "type_identifier" | "identifier"))?;
                let erasure = find_named_child(p, "type_bound")
                    .and_then(|bound| bound.named_child(0))
                    .map(|first| simple_type_name(&strip_generics(&type_text(self.src, first))))
                    .unwrap_or_else(|| "Object".to_owned());
                Some((self.text(name).to_owned(), erasure))
            })
            .collect()
    }

    fn members(
        &mut self,
        body: Node<'_>,
        scope: &TypeScope,
        record_header: Option<Node<'_>>,
        abstract_methods: &mut Vec<Sam>,
    ) {
        for member in named_children(body) {
            match member.kind() {
                "method_declaration" => self.method(member, scope, abstract_methods),
                "constructor_declaration" => {
                    self.constructor(member, scope, member.child_by_field_name("parameters"))
                }
                "compact_constructor_declaration" => self.constructor(member, scope, record_header),
                "field_declaration" | "constant_declaration" => self.field(member, scope),
                "enum_body_declarations" => {
                    self.members(member, scope, record_header, abstract_methods)
                }
                _ => self.type_declaration(member, Some(scope)),
            }
        }
    }

    fn method(&mut self, node: Node<'_>, scope: &TypeScope, abstract_methods: &mut Vec<Sam>) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let name = self.text(name).to_owned();
        let modifiers = modifiers_of(node);
        let own_type_params = self.type_parameters(node);
        let mut type_vars = scope.type_vars.clone();
        let is_generic = !own_type_params.is_empty();
        type_vars.extend(own_type_params);

        let params = self.parameters(node.child_by_field_name("parameters"), &type_vars);
        let written_return = node
            .child_by_field_name("type")
            .map(|ty| type_text(self.src, ty))
            .unwrap_or_else(|| "void".to_owned());
        let outline = MethodOutline {
            declaring_type: scope.binary_name.clone(),
            name: name.clone(),
            is_public: modifiers.is_public,
            is_static: modifiers.is_static,
            params: params.iter().map(|(erased, _)| erased.clone()).collect(),
            return_type: erase_type(&written_return, &type_vars),
            line: line_of(node),
        };
        let key = outline.key();
        self.index.methods.push(outline);

        match node.child_by_field_name("body") {
            Some(body) => self.method_body(&key, body),
            None => {
                let is_abstract =
                    !modifiers.is_static && !modifiers.is_default && !modifiers.is_private;
                if scope.kind == TypeKind::Interface && is_abstract && !is_generic {
                    abstract_methods.push(Sam {
                        type_params: Vec::new(),
                        return_type: written_return,
                        name,
                        params: params.into_iter().map(|(_, written)| written).collect(),
                    });
                }
            }
        }
    }

    fn constructor(&mut self, node: Node<'_>, scope: &TypeScope, params: Option<Node<'_>>) {
        let modifiers = modifiers_of(node);
        let params = self.parameters(params, &scope.type_vars);
        let outline = MethodOutline {
            declaring_type: scope.binary_name.clone(),
            name: "<init>".to_owned(),
            is_public: modifiers.is_public,
            is_static: false,
            params: params.into_iter().map(|(erased, _)| erased).collect(),
            return_type: "void".to_owned(),
            line: line_of(node),
        };
        let key = outline.key();
        self.index.methods.push(outline);
        if let Some(body) = node.child_by_field_name("body") {
            self.method_body(&key, body);
        }
    }

    /// (erased simple type, written type) per parameter.
    fn parameters(
        &self,
        node: Option<Node<'_>>,
        type_vars: &HashMap<String, String>,
    ) -> Vec<(String, String)> {
        let Some(node) = node else {
            return Vec::new();
        };
        named_children(node)
            .into_iter()
            .filter_map(|param| {
                let written = match param.kind() {
                    "formal_parameter" => {
                        let ty = type_text(self.src, param.child_by_field_name("type")?);
                        let dims = param
                            .child_by_field_name("dimensions")
                            .map(|d| self.text(d).matches('[').count())
                            .unwrap_or(0);
                        format!("{ty}{}", "[]".repeat(dims))
                    }
                    "spread_parameter" => {
                        let ty = named_children(param).into_iter().find(|n| {
                            !matches!(
                                n.kind(),
                                "modifiers"
                                    | "variable_declarator"
                                    | "annotation"
                                    | "marker_annotation"
                            )
                        })?;
                        format!("{}[]", type_text(self.src, ty))
                    }
                    _ => return None,
                };
                Some((erase_type(&written, type_vars), written))
            })
            .collect()
    }

    fn field(&mut self, node: Node<'_>, scope: &TypeScope) {
        let Some(ty) = node.child_by_field_name("type") else {
            return;
        };
        let declared_type = type_text(self.src, ty);
        for declarator in named_children(node) {
            if declarator.kind() != "variable_declarator" {
                continue;
            }
            let owner = LambdaOwner::Field {
                class_binary_name: scope.binary_name.clone(),
            };
            self.lambda_declarator(declarator, &declared_type, owner);
        }
    }

    /// Final locals and lambda-initialized locals anywhere in a body.
    fn method_body(&mut self, method_key: &str, body: Node<'_>) {
        let mut declarations = Vec::new();
        visit_nodes(body, &mut |node| {
            if matches!(
                node.kind(),
                "local_variable_declaration" | "enhanced_for_statement" | "resource"
            ) {
                declarations.push(node);
            }
        });

        for node in declarations {
            let is_final = modifiers_of(node).is_final;
            if node.kind() != "local_variable_declaration" {
                if let (true, Some(name)) = (is_final, node.child_by_field_name("name")) {
                    self.add_final(method_key, name);
                }
                continue;
            }
            let declared_type = node
                .child_by_field_name("type")
                .map(|ty| type_text(self.src, ty))
                .unwrap_or_default();
            for declarator in named_children(node) {
                if declarator.kind() != "variable_declarator" {
                    continue;
                }
                if is_final {
                    if let Some(name) = declarator.child_by_field_name("name") {
                        self.add_final(method_key, name);
                    }
                }
                let owner = LambdaOwner::Local {
                    method_key: method_key.to_owned(),
                };
                self.lambda_declarator(declarator, &declared_type, owner);
            }
        }
    }

    fn add_final(&mut self, method_key: &str, name: Node<'_>) {
        let name = self.text(name).to_owned();
        self.index
            .facts
            .entry(method_key.to_owned())
            .or_default()
            .finals
            .insert(name);
    }

    fn lambda_declarator(&mut self, declarator: Node<'_>, declared_type: &str, owner: LambdaOwner) {
        let (Some(name), Some(value)) = (
            declarator.child_by_field_name("name"),
            declarator.child_by_field_name("value"),
        ) else {
            return;
        };
        if value.kind() != "lambda_expression" {
            return;
        }
        let Some((params, body)) = self.lambda(value) else {
            return;
        };
        self.pending.push(PendingLambda {
            owner,
            name: self.text(name).to_owned(),
            declared_type: declared_type.to_owned(),
            params,
            body,
        });
    }

    /// Parameters (explicit type unless `var` or inferred, name) and body.
    fn lambda(&self, node: Node<'_>) -> Option<(Vec<(Option<String>, String)>, LambdaBody)> {
        let params_node = node.child_by_field_name("parameters")?;
        let params = match params_node.kind() {
            "identifier" => vec![(None, self.text(params_node).to_owned())],
            "inferred_parameters" => named_children(params_node)
                .into_iter()
                .filter(|n| n.kind() == "identifier")
                .map(|n| (None, self.text(n).to_owned()))
                .collect(),
            "formal_parameters" => named_children(params_node)
                .into_iter()
                .filter(|n| n.kind() == "formal_parameter")
                .map(|p| {
                    let ty = p
                        .child_by_field_name("type")
                        .map(|ty| type_text(self.src, ty))
                        .filter(|ty| ty != "var");
                    let name = p
                        .child_by_field_name("name")
                        .map(|n| self.text(n).to_owned())
                        .unwrap_or_default();
                    (ty, name)
                })
                .collect(),
            _ => return None,
        };

        let body = node.child_by_field_name("body")?;
        let body = if body.kind() == "block" {
            LambdaBody::Block(self.text(body).to_owned())
        } else {
            LambdaBody::Expression(self.text(body).trim().to_owned())
        };
        Some((params, body))
    }

    fn render_lambda(&self, pending: &PendingLambda) -> Option<String> {
        let (base, args) = split_type_arguments(&pending.declared_type);
        let simple = simple_type_name(&base);
        let sam = self
            .sams
            .get(&simple)
            .cloned()
            .or_else(|| builtin_sam(&simple))?;
        if sam.params.len() != pending.params.len() {
            return None;
        }

        let bindings: HashMap<String, String> = sam
            .type_params
            .iter()
            .enumerate()
            .map(|(i, var)| {
                let bound = args
                    .get(i)
                    .map(|arg| resolve_wildcard(arg))
                    .unwrap_or_else(|| "Object".to_owned());
                (var.clone(), bound)
            })
            .collect();

        let return_type = substitute_type_vars(&sam.return_type, &bindings);
        let params: Vec<String> = pending
            .params
            .iter()
            .zip(&sam.params)
            .map(|((written, name), sam_type)| {
                let ty = written
                    .clone()
                    .unwrap_or_else(|| substitute_type_vars(sam_type, &bindings));
                format!("{ty} {name}")
            })
            .collect();
        let signature = format!("{return_type} {}({})", sam.name, params.join(", "));

        Some(match &pending.body {
            LambdaBody::Expression(expr) if return_type == "void" => {
                format!("{signature} {{\n    {expr};\n}}")
            }
            LambdaBody::Expression(expr) => format!("{signature} {{\n    return {expr};\n}}"),
            LambdaBody::Block(block) => format!("{signature} {block}"),
        })
    }
}

// ---------------------------------------------------------------------------
// tree-sitter-java helpers

thread_local! {
    static JAVA_PARSER: RefCell<Result<Parser, String>> = RefCell::new({
        let mut parser = Parser::new();
        match parser.set_language(tree_sitter_java::language()) {
            Ok(()) => Ok(parser),
            Err(_) => Err("tree-sitter-java language load failed".to_owned()),
        }
    });
}

fn parse_java(source: &str) -> Result<Tree, String> {
    JAVA_PARSER.with(|cell| {
        let mut parser = cell
            .try_borrow_mut()
            .map_err(|_| "tree-sitter parser is already in use".to_owned())?;
        let parser = parser.as_mut().map_err(|err| err.clone())?;
        parser
            .parse(source, None)
            .ok_or_else(|| "tree-sitter produced no syntax tree".to_owned())
    })
}

/// Pre-order walk over every node below (and including) `node`.
fn visit_nodes<'a, F: FnMut(Node<'a>)>(node: Node<'a>, f: &mut F) {
    f(node);
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        visit_nodes(child, f);
    }
}

fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    (0..node.named_child_count())
        .filter_map(|idx| node.named_child(idx))
        .collect()
}

fn find_named_child<'a>(node: Node<'a>, kind: &str) -> Option<Node<'a>> {
    named_children(node).into_iter().find(|child| child.kind() == kind)
}

fn node_text<'a>(source: &'a str, node: Node<'_>) -> &'a str {
    &source[node.byte_range()]
}

fn line_of(node: Node<'_>) -> u32 {
    u32::try_from(node.start_position().row + 1).unwrap_or(u32::MAX)
}

fn modifiers_of(node: Node<'_>) -> Modifiers {
    let mut modifiers = Modifiers::default();
    let Some(list) = node
        .child_by_field_name("modifiers")
        .or_else(|| find_named_child(node, "modifiers"))
    else {
        return modifiers;
    };
    for idx in 0..list.child_count() {
        let Some(child) = list.child(idx) else {
            continue;
        };
        match child.kind() {
            "public" => modifiers.is_public = true,
            "private" => modifiers.is_private = true,
            "static" => modifiers.is_static = true,
            "default" => modifiers.is_default = true,
            "final" => modifiers.is_final = true,
            _ => {}
        }
    }
    modifiers
}

/// A type as written, without annotations or comments, normalized to
/// `Map<String, List<? extends Number>>[]` spacing.
fn type_text(source: &str, node: Node<'_>) -> String {
    let mut leaves = Vec::new();
    type_leaves(source, node, &mut leaves);

    let mut out = String::new();
    let mut prev_word = false;
    for leaf in leaves {
        let word = leaf == "?"
            || leaf.starts_with(|c: char| c.is_alphanumeric() || c == '_' || c == '$');
        if (word && prev_word) || leaf == "&" {
            out.push(' ');
        }
        out.push_str(leaf);
        if leaf == "," || leaf == "&" {
            out.push(' ');
        }
        prev_word = word;
    }
    out
}

fn type_leaves<'s>(source: &'s str, node: Node<'_>, out: &mut Vec<&'s str>) {
    if matches!(
        node.kind(),
        "annotation" | "marker_annotation" | "comment" | "line_comment" | "block_comment"
    ) {
        return;
    }
    if node.child_count() == 0 {
        out.push(node_text(source, node));
        return;
    }
    for idx in 0..node.child_count() {
        if let Some(child) = node.child(idx) {
            type_leaves(source, child, out);
        }
    }
}

fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

// ---------------------------------------------------------------------------
// Type text

/// `List<String>[]` → `List[]`.
fn strip_generics(type_text: &str) -> String {
    let mut out = String::new();
    let mut depth = 0usize;
    for c in type_text.chars() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            c if depth == 0 && !c.is_whitespace() => out.push(c),
            _ => {}
        }
    }
    out
}

/// Erase a written type to the simple name the VM would report.
fn erase_type(type_text: &str, type_vars: &HashMap<String, String>) -> String {
    let stripped = strip_generics(type_text);
    let simple = simple_type_name(&stripped);
    let base_len = simple.find('[').unwrap_or(simple.len());
    let (base, dims) = simple.split_at(base_len);
    match type_vars.get(base) {
        Some(erasure) => format!("{erasure}{dims}"),
        None => simple,
    }
}

/// `Function<Integer, ? extends Number>` → (`Function`, [`Integer`, `? extends Number`]).
fn split_type_arguments(type_text: &str) -> (String, Vec<String>) {
    let Some(open) = type_text.find('<') else {
        return (type_text.trim().to_owned(), Vec::new());
    };
    let base = type_text[..open].trim().to_owned();
    let Some(close) = type_text.rfind('>') else {
        return (base, Vec::new());
    };
    let inner = &type_text[open + 1..close];

    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in inner.chars() {
        match c {
            '<' => {
                depth += 1;
                current.push(c);
            }
            '>' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                args.push(current.trim().to_owned());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        args.push(current.trim().to_owned());
    }
    (base, args)
}

/// `?` → `Object`, `? extends T` / `? super T` → `T`.
fn resolve_wildcard(arg: &str) -> String {
    let arg = arg.trim();
    if arg == "?" {
        return "Object".to_owned();
    }
    for prefix in ["? extends ", "? super "] {
        if let Some(bound) = arg.strip_prefix(prefix) {
            return bound.trim().to_owned();
        }
    }
    arg.to_owned()
}

/// Replace whole-word type variables in `type_text`.
fn substitute_type_vars(type_text: &str, bindings: &HashMap<String, String>) -> String {
    let mut out = String::new();
    let mut word = String::new();
    let flush = |word: &mut String, out: &mut String| {
        if !word.is_empty() {
            match bindings.get(word.as_str()) {
                Some(bound) => out.push_str(bound),
                None => out.push_str(word),
            }
            word.clear();
        }
    };
    for c in type_text.chars() {
        if c.is_alphanumeric() || c == '_' || c == '$' {
            word.push(c);
        } else {
            flush(&mut word, &mut out);
            out.push(c);
        }
    }
    flush(&mut word, &mut out);
    out
}

/// Functional interfaces from the JDK that lambdas are commonly assigned to.
fn builtin_sam(simple_name: &str) -> Option<Sam> {
    let (type_params, return_type, name, params): (&[&str], &str, &str, &[&str]) =
        match simple_name {
            "Runnable" => (&[], "void", "run", &[]),
            "Callable" => (&["V"], "V", "call", &[]),
            "Comparator" => (&["T"], "int", "compare", &["T", "T"]),
            "Function" => (&["T", "R"], "R", "apply", &["T"]),
            "BiFunction" => (&["T", "U", "R"], "R", "apply", &["T", "U"]),
            "UnaryOperator" => (&["T"], "T", "apply", &["T"]),
            "BinaryOperator" => (&["T"], "T", "apply", &["T", "T"]),
            "Consumer" => (&["T"], "void", "accept", &["T"]),
            "BiConsumer" => (&["T", "U"], "void", "accept", &["T", "U"]),
            "Supplier" => (&["T"], "T", "get", &[]),
            "Predicate" => (&["T"], "boolean", "test", &["T"]),
            "BiPredicate" => (&["T", "U"], "boolean", "test", &["T", "U"]),
            "IntFunction" => (&["R"], "R", "apply", &["int"]),
            "LongFunction" => (&["R"], "R", "apply", &["long"]),
            "DoubleFunction" => (&["R"], "R", "apply", &["double"]),
            "ToIntFunction" => (&["T"], "int", "applyAsInt", &["T"]),
            "ToLongFunction" => (&["T"], "long", "applyAsLong", &["T"]),
            "ToDoubleFunction" => (&["T"], "double", "applyAsDouble", &["T"]),
            "ToIntBiFunction" => (&["T", "U"], "int", "applyAsInt", &["T", "U"]),
            "ToLongBiFunction" => (&["T", "U"], "long", "applyAsLong", &["T", "U"]),
            "ToDoubleBiFunction" => (&["T", "U"], "double", "applyAsDouble", &["T", "U"]),
            "IntUnaryOperator" => (&[], "int", "applyAsInt", &["int"]),
            "LongUnaryOperator" => (&[], "long", "applyAsLong", &["long"]),
            "DoubleUnaryOperator" => (&[], "double", "applyAsDouble", &["double"]),
            "IntBinaryOperator" => (&[], "int", "applyAsInt", &["int", "int"]),
            "LongBinaryOperator" => (&[], "long", "applyAsLong", &["long", "long"]),
            "DoubleBinaryOperator" => (&[], "double", "applyAsDouble", &["double", "double"]),
            "IntPredicate" => (&[], "boolean", "test", &["int"]),
            "LongPredicate" => (&[], "boolean", "test", &["long"]),
            "DoublePredicate" => (&[], "boolean", "test", &["double"]),
            "IntConsumer" => (&[], "void", "accept", &["int"]),
            "LongConsumer" => (&[], "void", "accept", &["long"]),
            "DoubleConsumer" => (&[], "void", "accept", &["double"]),
            "ObjIntConsumer" => (&["T"], "void", "accept", &["T", "int"]),
            "ObjLongConsumer" => (&["T"], "void", "accept", &["T", "long"]),
            "ObjDoubleConsumer" => (&["T"], "void", "accept", &["T", "double"]),
            "IntSupplier" => (&[], "int", "getAsInt", &[]),
            "LongSupplier" => (&[], "long", "getAsLong", &[]),
            "DoubleSupplier" => (&[], "double", "getAsDouble", &[]),
            "BooleanSupplier" => (&[], "boolean", "getAsBoolean", &[]),
            "IntToLongFunction" => (&[], "long", "applyAsLong", &["int"]),
            "IntToDoubleFunction" => (&[], "double", "applyAsDouble", &["int"]),
            "LongToIntFunction" => (&[], "int", "applyAsInt", &["long"]),
            "LongToDoubleFunction" => (&[], "double", "applyAsDouble", &["long"]),
            "DoubleToIntFunction" => (&[], "int", "applyAsInt", &["double"]),
            "DoubleToLongFunction" => (&[], "long", "applyAsLong", &["double"]),
            _ => return None,
        };
    Some(Sam {
        type_params: type_params.iter().map(|p| (*p).to_owned()).collect(),
        return_type: return_type.to_owned(),
        name: name.to_owned(),
        params: params.iter().map(|p| (*p).to_owned()).collect(),
    })
}
