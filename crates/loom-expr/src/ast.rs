//! Abstract Syntax Tree
//!
//! Arena-allocated AST for the statement and expression subset the sandboxed
//! evaluator runs. Nodes refer to each other by [`NodeId`].

use crate::token::Span;
use std::ops::Index;
use std::rc::Rc;

/// AST Node ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

/// Abstract Syntax Tree container
#[derive(Debug, Default)]
pub struct Ast {
    nodes: Vec<AstNode>,
}

impl Ast {
    pub fn new() -> Self { Self::default() }

    pub fn add_node(&mut self, node: AstNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: NodeId) -> Option<&AstNode> { self.nodes.get(id.0 as usize) }
    pub fn len(&self) -> usize { self.nodes.len() }
    pub fn is_empty(&self) -> bool { self.nodes.is_empty() }
    pub fn nodes(&self) -> impl Iterator<Item = &AstNode> { self.nodes.iter() }
}

impl Index<NodeId> for Ast {
    type Output = AstNode;

    fn index(&self, id: NodeId) -> &AstNode {
        &self.nodes[id.0 as usize]
    }
}

/// AST Node
#[derive(Debug, Clone)]
pub struct AstNode {
    pub kind: AstNodeKind,
    pub span: Span,
}

impl AstNode {
    pub fn new(kind: AstNodeKind, span: Span) -> Self { Self { kind, span } }
}

/// AST Node kinds
#[derive(Debug, Clone)]
pub enum AstNodeKind {
    // Statements
    Program { body: Vec<NodeId> },
    ExpressionStatement { expr: NodeId },
    BlockStatement { body: Vec<NodeId> },
    EmptyStatement,
    ReturnStatement { argument: Option<NodeId> },
    IfStatement { test: NodeId, consequent: NodeId, alternate: Option<NodeId> },

    // Declarations
    VariableDeclaration { declarations: Vec<NodeId> },
    VariableDeclarator { name: Box<str>, init: Option<NodeId> },

    // Expressions
    Identifier { name: Box<str> },
    Literal { value: LiteralValue },
    ArrayExpression { elements: Vec<NodeId> },
    ObjectExpression { properties: Vec<NodeId> },
    Property { key: Box<str>, value: NodeId },
    /// `locals` are the `var` names hoisted to the function frame
    FunctionExpression { name: Option<Box<str>>, params: Vec<Box<str>>, body: NodeId, locals: Vec<Box<str>> },
    UnaryExpression { operator: UnaryOp, argument: NodeId },
    UpdateExpression { operator: UpdateOp, argument: NodeId, prefix: bool },
    BinaryExpression { operator: BinaryOp, left: NodeId, right: NodeId },
    LogicalExpression { operator: LogicalOp, left: NodeId, right: NodeId },
    AssignmentExpression { operator: AssignOp, target: NodeId, value: NodeId },
    ConditionalExpression { test: NodeId, consequent: NodeId, alternate: NodeId },
    CallExpression { callee: NodeId, arguments: Vec<NodeId> },
    MemberExpression { object: NodeId, property: MemberProperty },
}

impl AstNodeKind {
    /// Can this node be assigned to?
    pub fn is_assignable(&self) -> bool {
        matches!(self, AstNodeKind::Identifier { .. } | AstNodeKind::MemberExpression { .. })
    }
}

#[derive(Debug, Clone)]
pub enum MemberProperty {
    /// `object.name`
    Static(Box<str>),
    /// `object[expr]`
    Computed(NodeId),
}

#[derive(Debug, Clone)]
pub enum LiteralValue { Undefined, Null, Bool(bool), Number(f64), String(Rc<str>) }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp { Minus, Plus, Not, Typeof, Void }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp { Increment, Decrement }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add, Sub, Mul, Div, Mod, LessThan, LessThanEq, GreaterThan, GreaterThanEq,
    Equal, NotEqual, StrictEqual, StrictNotEqual, In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp { And, Or, NullishCoalescing }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp { Assign, AddAssign, SubAssign, MulAssign, DivAssign, ModAssign }

impl AssignOp {
    /// Binary operator applied before storing, for compound assignments
    pub fn binary(self) -> Option<BinaryOp> {
        match self {
            AssignOp::Assign => None,
            AssignOp::AddAssign => Some(BinaryOp::Add),
            AssignOp::SubAssign => Some(BinaryOp::Sub),
            AssignOp::MulAssign => Some(BinaryOp::Mul),
            AssignOp::DivAssign => Some(BinaryOp::Div),
            AssignOp::ModAssign => Some(BinaryOp::Mod),
        }
    }
}

/// A parsed program, cheap to clone and share
#[derive(Debug, Clone)]
pub struct Program {
    ast: Rc<Ast>,
    root: NodeId,
    hoisted: Rc<[Box<str>]>,
    free_names: Rc<[Box<str>]>,
}

impl Program {
    pub(crate) fn new(ast: Ast, root: NodeId, hoisted: Vec<Box<str>>) -> Self {
        let free_names = collect_free_names(&ast, root, &hoisted).into();
        Self { ast: Rc::new(ast), root, hoisted: hoisted.into(), free_names }
    }

    pub fn ast(&self) -> &Ast {
        &self.ast
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Top-level statements
    pub fn body(&self) -> &[NodeId] {
        match &self.ast[self.root].kind {
            AstNodeKind::Program { body } => body,
            _ => &[],
        }
    }

    /// `var` names declared at program level
    pub fn hoisted(&self) -> &[Box<str>] {
        &self.hoisted
    }

    /// Names the program reads or writes without declaring them, in order of
    /// first appearance. These must all be supplied as variables.
    pub fn free_names(&self) -> &[Box<str>] {
        &self.free_names
    }

    pub fn references(&self, name: &str) -> bool {
        self.free_names.iter().any(|n| &**n == name)
    }
}

fn collect_free_names(ast: &Ast, root: NodeId, hoisted: &[Box<str>]) -> Vec<Box<str>> {
    let mut bound: Vec<Vec<&str>> = vec![hoisted.iter().map(|n| &**n).collect()];
    let mut seen: Vec<(u32, &str)> = Vec::new();
    walk_free_names(ast, root, &mut bound, &mut seen);

    seen.sort_by_key(|(start, _)| *start);
    let mut free: Vec<Box<str>> = Vec::new();
    for (_, name) in seen {
        if !free.iter().any(|n| &**n == name) {
            free.push(name.into());
        }
    }
    free
}

/// Collect identifiers not bound by any enclosing function frame. `bound`
/// holds one frame per function being walked, the program frame first.
fn walk_free_names<'a>(ast: &'a Ast, id: NodeId, bound: &mut Vec<Vec<&'a str>>, seen: &mut Vec<(u32, &'a str)>) {
    let node = &ast[id];
    match &node.kind {
        AstNodeKind::Identifier { name } => {
            if !bound.iter().any(|frame| frame.contains(&&**name)) {
                seen.push((node.span.start, name));
            }
        }
        AstNodeKind::FunctionExpression { name, params, body, locals } => {
            let mut frame: Vec<&str> = name.as_deref().into_iter().collect();
            frame.extend(params.iter().map(|p| &**p));
            frame.extend(locals.iter().map(|l| &**l));
            bound.push(frame);
            walk_free_names(ast, *body, bound, seen);
            bound.pop();
        }
        kind => {
            for child in children(kind) {
                walk_free_names(ast, child, bound, seen);
            }
        }
    }
}

/// Direct child nodes, in source order
pub(crate) fn children(kind: &AstNodeKind) -> Vec<NodeId> {
    match kind {
        AstNodeKind::Program { body } | AstNodeKind::BlockStatement { body } => body.clone(),
        AstNodeKind::ExpressionStatement { expr } => vec![*expr],
        AstNodeKind::ReturnStatement { argument } => argument.iter().copied().collect(),
        AstNodeKind::IfStatement { test, consequent, alternate } => {
            let mut out = vec![*test, *consequent];
            out.extend(alternate);
            out
        }
        AstNodeKind::VariableDeclaration { declarations } => declarations.clone(),
        AstNodeKind::VariableDeclarator { init, .. } => init.iter().copied().collect(),
        AstNodeKind::ArrayExpression { elements } => elements.clone(),
        AstNodeKind::ObjectExpression { properties } => properties.clone(),
        AstNodeKind::Property { value, .. } => vec![*value],
        AstNodeKind::UnaryExpression { argument, .. } | AstNodeKind::UpdateExpression { argument, .. } => {
            vec![*argument]
        }
        AstNodeKind::BinaryExpression { left, right, .. } | AstNodeKind::LogicalExpression { left, right, .. } => {
            vec![*left, *right]
        }
        AstNodeKind::AssignmentExpression { target, value, .. } => vec![*target, *value],
        AstNodeKind::ConditionalExpression { test, consequent, alternate } => vec![*test, *consequent, *alternate],
        AstNodeKind::CallExpression { callee, arguments } => {
            let mut out = vec![*callee];
            out.extend(arguments);
            out
        }
        AstNodeKind::MemberExpression { object, property } => match property {
            MemberProperty::Static(_) => vec![*object],
            MemberProperty::Computed(key) => vec![*object, *key],
        },
        AstNodeKind::FunctionExpression { body, .. } => vec![*body],
        AstNodeKind::EmptyStatement | AstNodeKind::Identifier { .. } | AstNodeKind::Literal { .. } => Vec::new(),
    }
}
