use std::collections::HashMap;

use super::lexer::{Token, TokenKind, tokenize};
use super::pattern::{MethodPattern, ParamPattern, SimplePattern, TypePattern, resolve_type_name};
use super::{ArgPattern, Pointcut};
use crate::error::{AopError, Result};
use crate::types::{
    ACC_ABSTRACT, ACC_FINAL, ACC_NATIVE, ACC_PRIVATE, ACC_PROTECTED, ACC_PUBLIC, ACC_STATIC, ACC_SYNCHRONIZED,
    TypeHierarchy, is_primitive, package_of,
};

pub const POINTCUT_ANNOTATION: &str = "org.aspectj.lang.annotation.Pointcut";

/// AspectJ primitives Spring AOP does not support.
const UNSUPPORTED_PRIMITIVES: &[&str] = &[
    "call",
    "get",
    "set",
    "initialization",
    "preinitialization",
    "staticinitialization",
    "handler",
    "adviceexecution",
    "withincode",
    "cflow",
    "cflowbelow",
    "if",
    "@this",
    "@withincode",
];

/// Where names inside an expression are resolved.
#[derive(Clone)]
pub struct CompileContext<'a> {
    pub hierarchy: TypeHierarchy<'a>,
    /// Class whose package qualifies simple type names and whose hierarchy
    /// holds the `@Pointcut` methods unqualified references point to.
    pub scope_class: Option<String>,
    /// Advice formal parameter name to its declared type.
    pub bindings: HashMap<String, String>,
}

impl<'a> CompileContext<'a> {
    pub fn new(hierarchy: TypeHierarchy<'a>) -> Self {
        Self {
            hierarchy,
            scope_class: None,
            bindings: HashMap::new(),
        }
    }

    pub fn with_scope(mut self, class_name: impl Into<String>) -> Self {
        self.scope_class = Some(class_name.into());
        self
    }

    pub fn with_bindings(mut self, bindings: HashMap<String, String>) -> Self {
        self.bindings = bindings;
        self
    }

    fn package(&self) -> &str {
        self.scope_class.as_deref().map(package_of).unwrap_or("")
    }
}

pub fn compile_pointcut(expression: &str, cx: &CompileContext<'_>) -> Result<Pointcut> {
    compile_nested(expression, cx, &mut Vec::new())
}

/// Compiles a standalone type pattern such as a `declare-parents` `types-matching` value.
pub fn compile_type_pattern(text: &str, cx: &CompileContext<'_>) -> Result<TypePattern> {
    let tokens = tokenize(text).map_err(|reason| AopError::malformed(text, reason))?;
    type_pattern_all(&tokens, cx.package(), &cx.hierarchy).map_err(|reason| AopError::malformed(text, reason))
}

fn compile_nested(expression: &str, cx: &CompileContext<'_>, stack: &mut Vec<String>) -> Result<Pointcut> {
    let tokens = tokenize(expression).map_err(|reason| AopError::malformed(expression, reason))?;
    if tokens.is_empty() {
        return Err(AopError::malformed(expression, "empty pointcut expression"));
    }
    let mut parser = Parser {
        expression,
        cx,
        stack,
        cursor: Cursor::new(&tokens),
    };
    let pointcut = parser.parse_or()?;
    if let Some(token) = parser.cursor.peek() {
        return Err(parser.error(format!("unexpected token at offset {}", token.offset)));
    }
    Ok(pointcut)
}

struct Cursor<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Cursor<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn peek_is(&self, kind: &TokenKind) -> bool {
        self.peek().is_some_and(|t| t.is(kind))
    }

    fn next(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token)
    }

    fn next_word(&mut self) -> Option<&'t str> {
        let word = self.peek()?.word()?;
        self.pos += 1;
        Some(word)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek_is(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.peek().and_then(Token::word) == Some(word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn rest(&mut self) -> &'t [Token] {
        let rest = &self.tokens[self.pos..];
        self.pos = self.tokens.len();
        rest
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    /// Consumes `( ... )` and returns the tokens in between.
    fn group(&mut self) -> std::result::Result<&'t [Token], String> {
        if !self.eat(&TokenKind::LParen) {
            return Err(match self.peek() {
                Some(token) => format!("expected '(' at offset {}", token.offset),
                None => "expected '(' but reached the end".to_string(),
            });
        }
        let start = self.pos;
        let mut depth = 1usize;
        while let Some(token) = self.next() {
            match token.kind {
                TokenKind::LParen => depth += 1,
                TokenKind::RParen => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(&self.tokens[start..self.pos - 1]);
                    }
                }
                _ => {}
            }
        }
        Err("unbalanced parentheses".to_string())
    }
}

/// Splits on top-level commas. An empty slice has no parts.
fn split_commas(tokens: &[Token]) -> Vec<&[Token]> {
    if tokens.is_empty() {
        return Vec::new();
    }
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::LParen => depth += 1,
            TokenKind::RParen => depth = depth.saturating_sub(1),
            TokenKind::Comma if depth == 0 => {
                parts.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&tokens[start..]);
    parts
}

fn single_word(tokens: &[Token]) -> Option<&str> {
    match tokens {
        [token] => token.word(),
        _ => None,
    }
}

/// A simple lowercase identifier, which in argument positions names a formal.
fn is_formal_name(word: &str) -> bool {
    let mut chars = word.chars();
    chars.next().is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        && !is_primitive(word)
}

fn modifier_flag(word: &str) -> Option<u16> {
    Some(match word {
        "public" => ACC_PUBLIC,
        "protected" => ACC_PROTECTED,
        "private" => ACC_PRIVATE,
        "static" => ACC_STATIC,
        "final" => ACC_FINAL,
        "synchronized" => ACC_SYNCHRONIZED,
        "native" => ACC_NATIVE,
        "abstract" => ACC_ABSTRACT,
        _ => return None,
    })
}

fn type_pattern_all(
    tokens: &[Token],
    package: &str,
    hierarchy: &TypeHierarchy<'_>,
) -> std::result::Result<TypePattern, String> {
    if tokens.is_empty() {
        return Err("missing type pattern".to_string());
    }
    let mut cursor = Cursor::new(tokens);
    let pattern = type_or(&mut cursor, package, hierarchy)?;
    match cursor.peek() {
        None => Ok(pattern),
        Some(token) => Err(format!("unexpected token in type pattern at offset {}", token.offset)),
    }
}

fn type_or(
    cursor: &mut Cursor<'_>,
    package: &str,
    hierarchy: &TypeHierarchy<'_>,
) -> std::result::Result<TypePattern, String> {
    let mut left = type_and(cursor, package, hierarchy)?;
    while cursor.eat(&TokenKind::OrOr) {
        let right = type_and(cursor, package, hierarchy)?;
        left = TypePattern::Or(Box::new(left), Box::new(right));
    }
    Ok(left)
}

fn type_and(
    cursor: &mut Cursor<'_>,
    package: &str,
    hierarchy: &TypeHierarchy<'_>,
) -> std::result::Result<TypePattern, String> {
    let mut left = type_unit(cursor, package, hierarchy)?;
    while cursor.eat(&TokenKind::AndAnd) {
        let right = type_unit(cursor, package, hierarchy)?;
        left = TypePattern::And(Box::new(left), Box::new(right));
    }
    Ok(left)
}

fn type_unit(
    cursor: &mut Cursor<'_>,
    package: &str,
    hierarchy: &TypeHierarchy<'_>,
) -> std::result::Result<TypePattern, String> {
    if cursor.eat(&TokenKind::Bang) {
        return Ok(TypePattern::Not(Box::new(type_unit(cursor, package, hierarchy)?)));
    }
    if cursor.eat(&TokenKind::LParen) {
        let inner = type_or(cursor, package, hierarchy)?;
        if !cursor.eat(&TokenKind::RParen) {
            return Err("expected ')' in type pattern".to_string());
        }
        return Ok(inner);
    }
    let mut annotations = Vec::new();
    while let Some(annotation) = cursor.peek().and_then(Token::word).and_then(|w| w.strip_prefix('@')) {
        cursor.pos += 1;
        annotations.push(resolve_type_name(annotation, package, hierarchy));
    }
    let word = cursor.next_word().ok_or_else(|| "expected a type pattern".to_string())?;
    TypePattern::from_word(word, package)?.with_annotations(annotations)
}

struct Parser<'p, 'a> {
    expression: &'p str,
    cx: &'p CompileContext<'a>,
    stack: &'p mut Vec<String>,
    cursor: Cursor<'p>,
}

impl<'p, 'a> Parser<'p, 'a> {
    fn error(&self, reason: impl Into<String>) -> AopError {
        AopError::malformed(self.expression, reason)
    }

    fn parse_or(&mut self) -> Result<Pointcut> {
        let mut left = self.parse_and()?;
        while self.cursor.eat(&TokenKind::OrOr) || self.cursor.eat_word("or") {
            let right = self.parse_and()?;
            left = Pointcut::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Pointcut> {
        let mut left = self.parse_unary()?;
        while self.cursor.eat(&TokenKind::AndAnd) || self.cursor.eat_word("and") {
            let right = self.parse_unary()?;
            left = Pointcut::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Pointcut> {
        if self.cursor.eat(&TokenKind::Bang) || self.cursor.eat_word("not") {
            return Ok(Pointcut::Not(Box::new(self.parse_unary()?)));
        }
        if self.cursor.eat(&TokenKind::LParen) {
            let inner = self.parse_or()?;
            if !self.cursor.eat(&TokenKind::RParen) {
                return Err(self.error("expected ')'"));
            }
            return Ok(inner);
        }
        self.parse_designator()
    }

    fn parse_designator(&mut self) -> Result<Pointcut> {
        let Some(word) = self.cursor.next_word() else {
            return Err(match self.cursor.peek() {
                Some(token) => self.error(format!("expected a pointcut designator at offset {}", token.offset)),
                None => self.error("expected a pointcut designator but reached the end"),
            });
        };
        let body = self.cursor.group().map_err(|reason| self.error(reason))?;
        match word {
            "execution" => Ok(Pointcut::Execution(self.method_pattern(body)?)),
            "within" => Ok(Pointcut::Within(self.type_pattern(body)?)),
            "this" => Ok(Pointcut::This(self.exact_type(body, word)?)),
            "target" => Ok(Pointcut::Target(self.exact_type(body, word)?)),
            "args" => Ok(Pointcut::Args(self.arg_patterns(body, word)?)),
            "@annotation" => Ok(Pointcut::AtAnnotation(self.exact_type(body, word)?)),
            "@within" => Ok(Pointcut::AtWithin(self.exact_type(body, word)?)),
            "@target" => Ok(Pointcut::AtTarget(self.exact_type(body, word)?)),
            "@args" => Ok(Pointcut::AtArgs(self.arg_patterns(body, word)?)),
            "bean" => {
                let name = single_word(body).ok_or_else(|| self.error("bean() takes a single name pattern"))?;
                Ok(Pointcut::Bean(SimplePattern::new(name).map_err(|reason| self.error(reason))?))
            }
            w if UNSUPPORTED_PRIMITIVES.contains(&w) || w.starts_with('@') || w.contains(['*', '+', '[']) => {
                Err(self.error(format!("Unsupported pointcut primitive '{w}'")))
            }
            w => self.reference(w, body),
        }
    }

    fn type_pattern(&self, tokens: &[Token]) -> Result<TypePattern> {
        type_pattern_all(tokens, self.cx.package(), &self.cx.hierarchy).map_err(|reason| self.error(reason))
    }

    /// A bound formal or an exact type name.
    fn exact_type(&self, body: &[Token], designator: &str) -> Result<String> {
        let word = single_word(body).ok_or_else(|| self.error(format!("{designator}() takes a single type")))?;
        self.exact_type_word(word, designator)
    }

    fn exact_type_word(&self, word: &str, designator: &str) -> Result<String> {
        if let Some(bound) = self.cx.bindings.get(word) {
            return Ok(bound.clone());
        }
        if is_formal_name(word) {
            return Err(self.error(format!("formal unbound in pointcut: {word}")));
        }
        if word.contains(['*', '+']) || word.contains("..") {
            return Err(self.error(format!("{designator}() requires an exact type, found '{word}'")));
        }
        Ok(resolve_type_name(word, self.cx.package(), &self.cx.hierarchy))
    }

    fn arg_patterns(&self, body: &[Token], designator: &str) -> Result<Vec<ArgPattern>> {
        split_commas(body)
            .into_iter()
            .map(|part| -> Result<ArgPattern> {
                let word = single_word(part)
                    .ok_or_else(|| self.error(format!("{designator}() arguments must be single names")))?;
                Ok(match word {
                    ".." => ArgPattern::Ellipsis,
                    "*" => ArgPattern::Any,
                    _ => ArgPattern::Type(self.exact_type_word(word, designator)?),
                })
            })
            .collect()
    }

    fn method_pattern(&self, body: &[Token]) -> Result<MethodPattern> {
        let package = self.cx.package();
        let hierarchy = &self.cx.hierarchy;
        let mut cursor = Cursor::new(body);

        let mut annotations = Vec::new();
        let mut modifiers = Vec::new();
        loop {
            let negated = cursor.peek_is(&TokenKind::Bang);
            let index = cursor.pos + usize::from(negated);
            let Some(word) = body.get(index).and_then(Token::word) else {
                break;
            };
            if let Some(annotation) = word.strip_prefix('@') {
                annotations.push((negated, resolve_type_name(annotation, package, hierarchy)));
            } else if let Some(flag) = modifier_flag(word) {
                modifiers.push((negated, flag));
            } else {
                break;
            }
            cursor.pos = index + 1;
        }

        let return_type = type_unit(&mut cursor, package, hierarchy).map_err(|reason| self.error(reason))?;

        let (declaring_type, name) = if cursor.peek_is(&TokenKind::LParen) {
            let group = cursor.group().map_err(|reason| self.error(reason))?;
            let declaring = self.type_pattern(group)?;
            let name = cursor
                .next_word()
                .and_then(|w| w.strip_prefix('.'))
                .ok_or_else(|| self.error("expected '.name' after declaring type"))?;
            (Some(declaring), name)
        } else {
            let word = cursor.next_word().ok_or_else(|| self.error("missing method name pattern"))?;
            match word.rsplit_once('.') {
                None => (None, word),
                Some((declaring, name)) => {
                    if declaring.is_empty() || name.is_empty() {
                        return Err(self.error(format!("invalid method pattern '{word}'")));
                    }
                    let declaring = if declaring.ends_with('.') {
                        format!("{declaring}.*")
                    } else {
                        declaring.to_string()
                    };
                    let pattern = TypePattern::from_word(&declaring, package).map_err(|reason| self.error(reason))?;
                    (Some(pattern), name)
                }
            }
        };
        let name = SimplePattern::new(name).map_err(|reason| self.error(reason))?;

        let params = cursor
            .group()
            .map_err(|reason| self.error(format!("missing parameter list: {reason}")))?;
        let params = split_commas(params)
            .into_iter()
            .map(|part| match single_word(part) {
                Some("..") => Ok(ParamPattern::Ellipsis),
                _ => self.type_pattern(part).map(ParamPattern::Type),
            })
            .collect::<Result<Vec<_>>>()?;

        let mut throws = Vec::new();
        if cursor.eat_word("throws") {
            for part in split_commas(cursor.rest()) {
                let (negated, part) = match part.split_first() {
                    Some((first, rest)) if first.is(&TokenKind::Bang) => (true, rest),
                    _ => (false, part),
                };
                throws.push((negated, self.type_pattern(part)?));
            }
        }
        if !cursor.at_end() {
            return Err(self.error("unexpected tokens after method pattern"));
        }

        Ok(MethodPattern {
            annotations,
            modifiers,
            return_type,
            declaring_type,
            name,
            params,
            throws,
        })
    }

    /// Inlines a reference to an `@Pointcut` method.
    fn reference(&mut self, word: &str, body: &[Token]) -> Result<Pointcut> {
        let hierarchy = self.cx.hierarchy;
        let (class_name, method_name) = match word.rsplit_once('.') {
            Some((class, method)) => (resolve_type_name(class, self.cx.package(), &hierarchy), method),
            None => {
                let scope = self.cx.scope_class.clone().ok_or_else(|| {
                    self.error(format!("cannot resolve pointcut reference '{word}' outside an aspect"))
                })?;
                (scope, word)
            }
        };
        let args: Vec<&str> = split_commas(body)
            .into_iter()
            .map(|part| single_word(part).ok_or_else(|| self.error("pointcut reference arguments must be names")))
            .collect::<Result<_>>()?;

        let class = hierarchy.load(&class_name).ok_or_else(|| AopError::unresolved(&class_name))?;
        let (owner, method) = hierarchy
            .superclass_chain(&class)
            .into_iter()
            .find_map(|owner| {
                let method = owner
                    .methods
                    .iter()
                    .find(|m| {
                        m.name == method_name
                            && m.parameter_types.len() == args.len()
                            && m.annotation(POINTCUT_ANNOTATION).is_some()
                    })?
                    .clone();
                Some((owner, method))
            })
            .ok_or_else(|| self.error(format!("can't find referenced pointcut {method_name}")))?;

        let key = format!("{}.{}", owner.name, method.signature());
        if self.stack.contains(&key) {
            return Err(self.error(format!("circular pointcut reference to {key}")));
        }
        let annotation = method
            .annotation(POINTCUT_ANNOTATION)
            .ok_or_else(|| self.error(format!("{key} is not a pointcut")))?;
        let expression = annotation
            .string("value")
            .ok_or_else(|| self.error(format!("pointcut {key} has no expression")))?
            .to_string();

        let formals: Vec<String> = match annotation.string("argNames") {
            Some(names) => names.split(',').map(|n| n.trim().to_string()).collect(),
            None if method.parameter_types.is_empty() => Vec::new(),
            None => method
                .parameter_names
                .clone()
                .ok_or_else(|| self.error(format!("parameter names of pointcut {key} are not available")))?,
        };
        if formals.len() != method.parameter_types.len() {
            return Err(self.error(format!(
                "pointcut {key} declares {} parameters but names {}",
                method.parameter_types.len(),
                formals.len()
            )));
        }

        let mut bindings = HashMap::new();
        for ((formal, declared), arg) in formals.into_iter().zip(&method.parameter_types).zip(&args) {
            let bound = match *arg {
                "*" | ".." => declared.clone(),
                arg => self.exact_type_word(arg, word)?,
            };
            bindings.insert(formal, bound);
        }

        let nested = CompileContext {
            hierarchy,
            scope_class: Some(owner.name.clone()),
            bindings,
        };
        self.stack.push(key);
        let result = compile_nested(&expression, &nested, self.stack);
        self.stack.pop();
        result
    }
}
