//! The deserializer: an evaluator for the emitted expression subset.
//!
//! `deserialize` evaluates the source text the serialize phase produced and
//! rebuilds the value graph. The interpreter is a straight tree walk over
//! the subset grammar with closures, the builtin constructor set the
//! emitter uses, an expando side-table for controller hooks (`$R[i].s`,
//! `.e`, …), and a microtask queue so `Promise.resolve().then(()=>ref)`
//! reads `ref` only after the main expression finished evaluating.
//!
//! A persistent [`Evaluator`] keeps the `self` global (`$R` tables,
//! `$REFS`) alive between calls, which is what cross-mode and streaming
//! round-trips need.

/// Lexer for the subset.
pub mod lex;
/// AST and parser for the subset.
pub mod parse;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{Result, VivicodeError};
use crate::escape::form_urldecode;
use crate::ir::{ErrorKind, ObjectFlag, TypedArrayKind, WellKnownSymbol};
use crate::registry::ReferenceRegistry;
use crate::value::{JsValue, ObjectKind, PromiseState, StreamMessage};

use self::parse::{BinOp, Expr, MemberKey, ObjProp, PropName, Stmt, UnaryOp};

const ITERATOR_EXPANDO: &str = "@@iterator";
const DRAIN_LIMIT: usize = 100_000;

fn err(msg: impl Into<String>) -> VivicodeError {
    VivicodeError::Eval(msg.into())
}

/// Builtin namespaces and constructors the emitted code references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    ObjectNs,
    ObjectCreate,
    ObjectAssign,
    ObjectSeal,
    ObjectFreeze,
    ObjectPreventExtensions,
    SymbolNs,
    PromiseNs,
    PromiseResolve,
    PromiseReject,
    MapCtor,
    SetCtor,
    DateCtor,
    ErrorCtor(ErrorKind),
    AggregateErrorCtor,
    TypedArrayCtor(TypedArrayKind),
    UrlCtor,
    UrlSearchParamsCtor,
    BlobCtor,
    FileCtor,
    HeadersCtor,
    FormDataCtor,
    RequestCtor,
    ResponseCtor,
    EventCtor,
    CustomEventCtor,
    DomExceptionCtor,
    ReadableStreamCtor,
}

/// A closure: parameters, body, captured scope.
struct Closure {
    params: Vec<String>,
    body: ClosureBody,
    scope: Rc<Scope>,
}

enum ClosureBody {
    Expr(Expr),
    Block(Vec<Stmt>),
}

/// A runtime value of the interpreter; `Js` is the subset visible to the
/// reconstructed graph.
#[derive(Clone)]
enum EvalValue {
    Js(JsValue),
    Closure(Rc<Closure>),
    Builtin(Builtin),
    /// A method bound to a receiver value.
    Method(JsValue, Rc<str>),
    /// A promise executor callback.
    Settler {
        target: JsValue,
        resolve: bool,
    },
    /// The controller handed to `ReadableStream`'s `start`.
    Controller(JsValue),
    /// The result of `array.values()`.
    ValuesIter(Rc<RefCell<(Vec<JsValue>, usize)>>),
}

/// A lexical scope.
struct Scope {
    vars: RefCell<HashMap<String, EvalValue>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    fn child(parent: &Rc<Scope>) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: Some(Rc::clone(parent)),
        })
    }

    fn lookup(self: &Rc<Scope>, name: &str) -> Option<EvalValue> {
        let mut scope = Rc::clone(self);
        loop {
            if let Some(value) = scope.vars.borrow().get(name) {
                return Some(value.clone());
            }
            let parent = scope.parent.as_ref().map(Rc::clone)?;
            scope = parent;
        }
    }

    /// Assignment: writes where the binding lives, or creates a global
    /// (sloppy-mode semantics, which the emitted IIFEs rely on).
    fn set(self: &Rc<Scope>, name: &str, value: EvalValue) {
        let mut scope = Rc::clone(self);
        loop {
            if scope.vars.borrow().contains_key(name) {
                scope.vars.borrow_mut().insert(name.to_string(), value);
                return;
            }
            let parent = scope.parent.as_ref().map(Rc::clone);
            match parent {
                Some(parent) => scope = parent,
                None => {
                    scope.vars.borrow_mut().insert(name.to_string(), value);
                    return;
                }
            }
        }
    }

    fn declare(&self, name: &str, value: EvalValue) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }
}

/// A member key after evaluation.
enum ResolvedKey {
    /// An ordinary property name.
    Plain(String),
    /// The `Symbol.iterator` installation sentinel.
    Iterator,
}

enum Microtask {
    /// `.then(cb)`: when `base` settles, run `cb` and settle `result`.
    Then {
        base: JsValue,
        callback: EvalValue,
        result: JsValue,
    },
    /// Adopt the state of `from` into `result` (a thunk returned a
    /// promise).
    Adopt { from: JsValue, result: JsValue },
}

/// The evaluation context: globals, expandos and the microtask queue.
///
/// One instance per `deserialize` call; keep an instance alive across calls
/// to share `self.$R` between cross-mode expressions.
pub struct Evaluator {
    global: Rc<Scope>,
    expandos: RefCell<HashMap<usize, HashMap<String, EvalValue>>>,
    microtasks: RefCell<Vec<Microtask>>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    /// A fresh evaluator with an empty reference table.
    pub fn new() -> Self {
        Self::with_registry(&ReferenceRegistry::new())
    }

    /// A fresh evaluator whose `self.$REFS` table mirrors `registry`.
    pub fn with_registry(registry: &ReferenceRegistry) -> Self {
        let global = Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent: None,
        });

        let host = JsValue::empty_object();
        let refs = JsValue::empty_object();
        for tag in registry.tags() {
            if let Some(handle) = registry.lookup(&tag) {
                refs.set_prop(tag, handle);
            }
        }
        host.set_prop("$REFS", refs);
        global.declare("self", EvalValue::Js(host));

        let builtins: &[(&str, Builtin)] = &[
            ("Object", Builtin::ObjectNs),
            ("Symbol", Builtin::SymbolNs),
            ("Promise", Builtin::PromiseNs),
            ("Map", Builtin::MapCtor),
            ("Set", Builtin::SetCtor),
            ("Date", Builtin::DateCtor),
            ("Error", Builtin::ErrorCtor(ErrorKind::Error)),
            ("EvalError", Builtin::ErrorCtor(ErrorKind::Eval)),
            ("RangeError", Builtin::ErrorCtor(ErrorKind::Range)),
            ("ReferenceError", Builtin::ErrorCtor(ErrorKind::Reference)),
            ("SyntaxError", Builtin::ErrorCtor(ErrorKind::Syntax)),
            ("TypeError", Builtin::ErrorCtor(ErrorKind::Type)),
            ("URIError", Builtin::ErrorCtor(ErrorKind::Uri)),
            ("AggregateError", Builtin::AggregateErrorCtor),
            ("URL", Builtin::UrlCtor),
            ("URLSearchParams", Builtin::UrlSearchParamsCtor),
            ("Blob", Builtin::BlobCtor),
            ("File", Builtin::FileCtor),
            ("Headers", Builtin::HeadersCtor),
            ("FormData", Builtin::FormDataCtor),
            ("Request", Builtin::RequestCtor),
            ("Response", Builtin::ResponseCtor),
            ("Event", Builtin::EventCtor),
            ("CustomEvent", Builtin::CustomEventCtor),
            ("DOMException", Builtin::DomExceptionCtor),
            ("ReadableStream", Builtin::ReadableStreamCtor),
        ];
        for (name, builtin) in builtins {
            global.declare(name, EvalValue::Builtin(*builtin));
        }
        for kind in [
            TypedArrayKind::Int8,
            TypedArrayKind::Uint8,
            TypedArrayKind::Uint8Clamped,
            TypedArrayKind::Int16,
            TypedArrayKind::Uint16,
            TypedArrayKind::Int32,
            TypedArrayKind::Uint32,
            TypedArrayKind::Float32,
            TypedArrayKind::Float64,
            TypedArrayKind::BigInt64,
            TypedArrayKind::BigUint64,
            TypedArrayKind::DataView,
        ] {
            global.declare(kind.constructor(), EvalValue::Builtin(Builtin::TypedArrayCtor(kind)));
        }

        Self {
            global,
            expandos: RefCell::new(HashMap::new()),
            microtasks: RefCell::new(Vec::new()),
        }
    }

    /// Evaluates one emitted expression to a value.
    pub fn eval(&self, source: &str) -> Result<JsValue> {
        let expr = parse::parse(source)?;
        let value = self.eval_expr(&expr, &self.global)?;
        self.drain_microtasks()?;
        match value {
            EvalValue::Js(v) => Ok(v),
            _ => Err(err("expression did not produce a plain value")),
        }
    }

    // --- EXPRESSIONS ---

    fn eval_expr(&self, expr: &Expr, scope: &Rc<Scope>) -> Result<EvalValue> {
        match expr {
            Expr::Num(n) => Ok(EvalValue::Js(JsValue::Number(*n))),
            Expr::BigInt(digits) => Ok(EvalValue::Js(JsValue::bigint(digits.clone()))),
            Expr::Str(s) => Ok(EvalValue::Js(JsValue::string(s.clone()))),
            Expr::Regex(source, flags) => {
                Ok(EvalValue::Js(JsValue::regexp(source.clone(), flags.clone())))
            }
            Expr::Ident(name) => match name.as_str() {
                "true" => Ok(EvalValue::Js(JsValue::Bool(true))),
                "false" => Ok(EvalValue::Js(JsValue::Bool(false))),
                "null" => Ok(EvalValue::Js(JsValue::Null)),
                "undefined" => Ok(EvalValue::Js(JsValue::Undefined)),
                "NaN" => Ok(EvalValue::Js(JsValue::Number(f64::NAN))),
                "Infinity" => Ok(EvalValue::Js(JsValue::Number(f64::INFINITY))),
                _ => scope
                    .lookup(name)
                    .ok_or_else(|| err(format!("{name} is not defined"))),
            },
            Expr::Array(items) => {
                let array = JsValue::array_with_holes(vec![None; items.len()]);
                for (index, item) in items.iter().enumerate() {
                    if let Some(item) = item {
                        let value = self.eval_js(item, scope)?;
                        array.set_index(index, value);
                    }
                }
                Ok(EvalValue::Js(array))
            }
            Expr::Object(props) => self.eval_object_literal(props, scope),
            Expr::Seq(parts) => {
                let mut last = EvalValue::Js(JsValue::Undefined);
                for part in parts {
                    last = self.eval_expr(part, scope)?;
                }
                Ok(last)
            }
            // Like the host language, the target's object and key evaluate
            // before the right-hand side; the table header
            // `(self.$R=self.$R||[])[…]=…` depends on that order.
            Expr::Assign(target, value) => match &**target {
                Expr::Ident(name) => {
                    let value = self.eval_expr(value, scope)?;
                    scope.set(name, value.clone());
                    Ok(value)
                }
                Expr::Member(object_expr, key) => {
                    let object = match self.eval_expr(object_expr, scope)? {
                        EvalValue::Js(v) => v,
                        _ => return Err(err("cannot assign members on this value")),
                    };
                    let key = self.resolve_key(key, scope)?;
                    let value = self.eval_expr(value, scope)?;
                    match key {
                        ResolvedKey::Plain(k) => {
                            self.member_set_js(&object, &k, value.clone())?;
                        }
                        ResolvedKey::Iterator => {
                            self.install_iterator(&object, value.clone())?;
                        }
                    }
                    Ok(value)
                }
                _ => Err(err("invalid assignment target")),
            },
            Expr::Member(object, key) => {
                let object = self.eval_expr(object, scope)?;
                self.member_get(&object, key, scope)
            }
            Expr::Call(callee, args) => {
                let callee = self.eval_expr(callee, scope)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval_expr(arg, scope))
                    .collect::<Result<Vec<_>>>()?;
                self.call(callee, args)
            }
            Expr::New(callee, args) => {
                let callee = self.eval_expr(callee, scope)?;
                let args = args
                    .iter()
                    .map(|arg| self.eval_expr(arg, scope))
                    .collect::<Result<Vec<_>>>()?;
                self.construct(callee, args)
            }
            Expr::ArrowExpr(params, body) => Ok(EvalValue::Closure(Rc::new(Closure {
                params: params.clone(),
                body: ClosureBody::Expr((**body).clone()),
                scope: Rc::clone(scope),
            }))),
            Expr::ArrowBlock(params, body) | Expr::Function(params, body) => {
                Ok(EvalValue::Closure(Rc::new(Closure {
                    params: params.clone(),
                    body: ClosureBody::Block(body.clone()),
                    scope: Rc::clone(scope),
                })))
            }
            Expr::Unary(op, operand) => match op {
                UnaryOp::Void => {
                    self.eval_expr(operand, scope)?;
                    Ok(EvalValue::Js(JsValue::Undefined))
                }
                UnaryOp::Not => {
                    let operand = self.eval_expr(operand, scope)?;
                    Ok(EvalValue::Js(JsValue::Bool(!truthy(&operand))))
                }
                UnaryOp::Neg => {
                    let operand = self.eval_expr(operand, scope)?;
                    match operand {
                        EvalValue::Js(JsValue::Number(n)) => {
                            Ok(EvalValue::Js(JsValue::Number(-n)))
                        }
                        EvalValue::Js(JsValue::BigInt(digits)) => {
                            let negated = match digits.strip_prefix('-') {
                                Some(rest) => rest.to_string(),
                                None => format!("-{digits}"),
                            };
                            Ok(EvalValue::Js(JsValue::bigint(negated)))
                        }
                        _ => Err(err("unary minus on a non-number")),
                    }
                }
            },
            Expr::Binary(op, lhs, rhs) => match op {
                BinOp::Or => {
                    let lhs = self.eval_expr(lhs, scope)?;
                    if truthy(&lhs) {
                        Ok(lhs)
                    } else {
                        self.eval_expr(rhs, scope)
                    }
                }
                BinOp::Div => {
                    let lhs = self.eval_number(lhs, scope)?;
                    let rhs = self.eval_number(rhs, scope)?;
                    Ok(EvalValue::Js(JsValue::Number(lhs / rhs)))
                }
                BinOp::Ge => {
                    let lhs = self.eval_number(lhs, scope)?;
                    let rhs = self.eval_number(rhs, scope)?;
                    Ok(EvalValue::Js(JsValue::Bool(lhs >= rhs)))
                }
            },
            Expr::PostIncr(target) => match &**target {
                Expr::Ident(name) => {
                    let current = scope
                        .lookup(name)
                        .ok_or_else(|| err(format!("{name} is not defined")))?;
                    let n = match current {
                        EvalValue::Js(JsValue::Number(n)) => n,
                        _ => return Err(err("++ on a non-number")),
                    };
                    scope.set(name, EvalValue::Js(JsValue::Number(n + 1.0)));
                    Ok(EvalValue::Js(JsValue::Number(n)))
                }
                _ => Err(err("++ target must be a variable")),
            },
        }
    }

    fn eval_js(&self, expr: &Expr, scope: &Rc<Scope>) -> Result<JsValue> {
        match self.eval_expr(expr, scope)? {
            EvalValue::Js(v) => Ok(v),
            _ => Err(err("expected a plain value")),
        }
    }

    fn eval_number(&self, expr: &Expr, scope: &Rc<Scope>) -> Result<f64> {
        match self.eval_expr(expr, scope)? {
            EvalValue::Js(JsValue::Number(n)) => Ok(n),
            _ => Err(err("expected a number")),
        }
    }

    fn eval_object_literal(&self, props: &[ObjProp], scope: &Rc<Scope>) -> Result<EvalValue> {
        let object = JsValue::empty_object();
        for prop in props {
            match prop {
                ObjProp::KeyValue(name, value) => {
                    let value = self.eval_expr(value, scope)?;
                    self.install_prop(&object, name, value, scope)?;
                }
                ObjProp::Method(name, params, body) => {
                    let closure = EvalValue::Closure(Rc::new(Closure {
                        params: params.clone(),
                        body: ClosureBody::Block(body.clone()),
                        scope: Rc::clone(scope),
                    }));
                    self.install_prop(&object, name, closure, scope)?;
                }
            }
        }
        Ok(EvalValue::Js(object))
    }

    fn install_prop(
        &self,
        object: &JsValue,
        name: &PropName,
        value: EvalValue,
        scope: &Rc<Scope>,
    ) -> Result<()> {
        match name {
            PropName::Literal(key) => {
                self.member_set_js(object, key, value)?;
            }
            PropName::Computed(key_expr) => {
                let key = self.eval_expr(key_expr, scope)?;
                match key {
                    EvalValue::Js(JsValue::Symbol(WellKnownSymbol::Iterator)) => {
                        self.install_iterator(object, value)?;
                    }
                    EvalValue::Js(JsValue::String(key)) => {
                        self.member_set_js(object, &key, value)?;
                    }
                    _ => return Err(err("unsupported computed key")),
                }
            }
        }
        Ok(())
    }

    /// Installs the iterable protocol: keeps the closure reachable and
    /// eagerly drains one iterator to materialize the item list. The drain
    /// is best-effort: a cyclic graph can reference slots no patch has
    /// filled yet, which a real host would also observe on a first
    /// pre-patch drain.
    fn install_iterator(&self, object: &JsValue, function: EvalValue) -> Result<()> {
        self.expando_set(object, ITERATOR_EXPANDO, function.clone());
        if let Ok(iterator) = self.call(function, Vec::new()) {
            if let Ok(items) = self.drain_iterator(iterator) {
                object.set_iterator(items);
            }
        }
        Ok(())
    }

    fn drain_iterator(&self, iterator: EvalValue) -> Result<Vec<JsValue>> {
        match iterator {
            EvalValue::ValuesIter(state) => {
                let state = state.borrow();
                Ok(state.0[state.1..].to_vec())
            }
            EvalValue::Js(iterator) => {
                let mut items = Vec::new();
                for _ in 0..DRAIN_LIMIT {
                    let next = self.member_get(
                        &EvalValue::Js(iterator.clone()),
                        &MemberKey::Static("next".into()),
                        &self.global,
                    )?;
                    let step = self.call(next, Vec::new())?;
                    let step = match step {
                        EvalValue::Js(v) => v,
                        _ => return Err(err("iterator step is not an object")),
                    };
                    let done = self.plain_prop(&step, "done");
                    if truthy(&EvalValue::Js(done)) {
                        return Ok(items);
                    }
                    items.push(self.plain_prop(&step, "value"));
                }
                Err(err("iterator did not terminate"))
            }
            _ => Err(err("value is not an iterator")),
        }
    }

    fn plain_prop(&self, object: &JsValue, key: &str) -> JsValue {
        if let Some(obj) = object.as_object() {
            if let ObjectKind::Plain { props, .. } = &*obj.kind() {
                if let Some((_, value)) = props.iter().find(|(k, _)| k == key) {
                    return value.clone();
                }
            }
        }
        JsValue::Undefined
    }

    // --- MEMBER ACCESS ---

    fn member_get(
        &self,
        object: &EvalValue,
        key: &MemberKey,
        scope: &Rc<Scope>,
    ) -> Result<EvalValue> {
        // Resolve the key first: static names stay strings, computed keys
        // may be numbers (array indexing) or symbols.
        let key_string: String = match key {
            MemberKey::Static(name) => name.clone(),
            MemberKey::Computed(expr) => match self.eval_expr(expr, scope)? {
                EvalValue::Js(JsValue::String(s)) => s.to_string(),
                EvalValue::Js(JsValue::Number(n)) => crate::serializer::format_number(n),
                EvalValue::Js(JsValue::Symbol(WellKnownSymbol::Iterator)) => {
                    ITERATOR_EXPANDO.to_string()
                }
                _ => return Err(err("unsupported computed key")),
            },
        };

        match object {
            EvalValue::Builtin(ns) => builtin_member(*ns, &key_string),
            EvalValue::Controller(stream) => match key_string.as_str() {
                "enqueue" | "error" | "close" => {
                    Ok(EvalValue::Method(stream.clone(), Rc::from(key_string)))
                }
                _ => Err(err("unknown controller member")),
            },
            EvalValue::ValuesIter(_) => Err(err("iterator has no members")),
            EvalValue::Js(value) => self.js_member_get(value, &key_string),
            _ => Err(err("cannot read members of this value")),
        }
    }

    fn js_member_get(&self, value: &JsValue, key: &str) -> Result<EvalValue> {
        match value {
            JsValue::Undefined | JsValue::Null => {
                return Err(err(format!(
                    "cannot read {key:?} of {}",
                    value.type_name()
                )))
            }
            JsValue::Object(_) => {}
            _ => return Ok(EvalValue::Js(JsValue::Undefined)),
        }

        if let Some(found) = self.expando_get(value, key) {
            return Ok(found);
        }

        let obj = match value.as_object() {
            Some(o) => o,
            None => return Ok(EvalValue::Js(JsValue::Undefined)),
        };
        let kind = obj.kind();
        let result = match &*kind {
            ObjectKind::Plain { props, .. } => props
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| EvalValue::Js(v.clone())),
            ObjectKind::Array { items, .. } => {
                if key == "length" {
                    Some(EvalValue::Js(JsValue::Number(items.len() as f64)))
                } else if key == "values" {
                    Some(EvalValue::Method(value.clone(), Rc::from("values")))
                } else if let Ok(index) = key.parse::<usize>() {
                    Some(EvalValue::Js(
                        items
                            .get(index)
                            .and_then(Clone::clone)
                            .unwrap_or(JsValue::Undefined),
                    ))
                } else {
                    None
                }
            }
            ObjectKind::TypedArray { buffer, .. } if key == "buffer" => {
                Some(EvalValue::Js(buffer.clone()))
            }
            ObjectKind::Map { .. } if key == "set" => {
                Some(EvalValue::Method(value.clone(), Rc::from("set")))
            }
            ObjectKind::Set { .. } if key == "add" => {
                Some(EvalValue::Method(value.clone(), Rc::from("add")))
            }
            ObjectKind::FormData { .. } if key == "append" => {
                Some(EvalValue::Method(value.clone(), Rc::from("append")))
            }
            ObjectKind::Promise(_) if key == "then" || key == "catch" => {
                Some(EvalValue::Method(value.clone(), Rc::from(key)))
            }
            _ => None,
        };
        Ok(result.unwrap_or(EvalValue::Js(JsValue::Undefined)))
    }

    /// Resolves a member key to either a plain property name or the
    /// iterator-installation sentinel.
    fn resolve_key(&self, key: &MemberKey, scope: &Rc<Scope>) -> Result<ResolvedKey> {
        match key {
            MemberKey::Static(name) => Ok(ResolvedKey::Plain(name.clone())),
            MemberKey::Computed(expr) => match self.eval_expr(expr, scope)? {
                EvalValue::Js(JsValue::String(s)) => Ok(ResolvedKey::Plain(s.to_string())),
                EvalValue::Js(JsValue::Number(n)) => {
                    Ok(ResolvedKey::Plain(crate::serializer::format_number(n)))
                }
                EvalValue::Js(JsValue::Symbol(WellKnownSymbol::Iterator)) => {
                    Ok(ResolvedKey::Iterator)
                }
                _ => Err(err("unsupported computed key")),
            },
        }
    }

    /// Property write on a host value. Plain values land in the graph;
    /// interpreter-only values (closures, settlers) go to the expando
    /// table.
    fn member_set_js(&self, object: &JsValue, key: &str, value: EvalValue) -> Result<()> {
        let obj = match object.as_object() {
            Some(o) => o,
            None => return Err(err("cannot assign members on a primitive")),
        };

        if let EvalValue::Js(plain) = &value {
            let mut kind = obj.kind_mut();
            match &mut *kind {
                ObjectKind::Plain { props, .. } => {
                    if let Some(slot) = props.iter_mut().find(|(k, _)| k == key) {
                        slot.1 = plain.clone();
                    } else {
                        props.push((key.to_string(), plain.clone()));
                    }
                    return Ok(());
                }
                ObjectKind::Array { items, .. } => {
                    if let Ok(index) = key.parse::<usize>() {
                        if items.len() <= index {
                            items.resize(index + 1, None);
                        }
                        items[index] = Some(plain.clone());
                        return Ok(());
                    }
                }
                ObjectKind::Error { props, .. }
                | ObjectKind::AggregateError { props, .. } => {
                    if let Some(slot) = props.iter_mut().find(|(k, _)| k == key) {
                        slot.1 = plain.clone();
                    } else {
                        props.push((key.to_string(), plain.clone()));
                    }
                    return Ok(());
                }
                _ => {}
            }
        }

        self.expando_set(object, key, value);
        Ok(())
    }

    fn expando_get(&self, object: &JsValue, key: &str) -> Option<EvalValue> {
        let identity = object.identity()?;
        self.expandos
            .borrow()
            .get(&identity)
            .and_then(|slots| slots.get(key))
            .cloned()
    }

    fn expando_set(&self, object: &JsValue, key: &str, value: EvalValue) {
        if let Some(identity) = object.identity() {
            self.expandos
                .borrow_mut()
                .entry(identity)
                .or_default()
                .insert(key.to_string(), value);
        }
    }

    // --- CALLS ---

    fn call(&self, callee: EvalValue, args: Vec<EvalValue>) -> Result<EvalValue> {
        match callee {
            EvalValue::Closure(closure) => self.call_closure(&closure, args),
            EvalValue::Settler { target, resolve } => {
                let payload = first_js(&args);
                target.settle_promise(if resolve {
                    Ok(payload)
                } else {
                    Err(payload)
                });
                Ok(EvalValue::Js(JsValue::Undefined))
            }
            EvalValue::Method(receiver, name) => self.call_method(&receiver, &name, args),
            EvalValue::Builtin(builtin) => self.call_builtin(builtin, args, false),
            _ => Err(err("value is not callable")),
        }
    }

    fn construct(&self, callee: EvalValue, args: Vec<EvalValue>) -> Result<EvalValue> {
        match callee {
            EvalValue::Builtin(builtin) => self.call_builtin(builtin, args, true),
            _ => Err(err("constructor is not a builtin")),
        }
    }

    fn call_closure(&self, closure: &Closure, args: Vec<EvalValue>) -> Result<EvalValue> {
        let scope = Scope::child(&closure.scope);
        for (index, param) in closure.params.iter().enumerate() {
            let value = args
                .get(index)
                .cloned()
                .unwrap_or(EvalValue::Js(JsValue::Undefined));
            scope.declare(param, value);
        }
        match &closure.body {
            ClosureBody::Expr(expr) => self.eval_expr(expr, &scope),
            ClosureBody::Block(stmts) => {
                for stmt in stmts {
                    match stmt {
                        Stmt::Expr(expr) => {
                            self.eval_expr(expr, &scope)?;
                        }
                        Stmt::Return(None) => return Ok(EvalValue::Js(JsValue::Undefined)),
                        Stmt::Return(Some(expr)) => return self.eval_expr(expr, &scope),
                    }
                }
                Ok(EvalValue::Js(JsValue::Undefined))
            }
        }
    }

    fn call_method(&self, receiver: &JsValue, name: &str, args: Vec<EvalValue>) -> Result<EvalValue> {
        match name {
            "set" => {
                let key = first_js(&args);
                let value = nth_js(&args, 1);
                receiver.map_set(key, value);
                Ok(EvalValue::Js(receiver.clone()))
            }
            "add" => {
                receiver.set_add(first_js(&args));
                Ok(EvalValue::Js(receiver.clone()))
            }
            "append" => {
                let key = match first_js(&args) {
                    JsValue::String(s) => s.to_string(),
                    other => other.type_name().to_string(),
                };
                receiver.form_append(key, nth_js(&args, 1));
                Ok(EvalValue::Js(receiver.clone()))
            }
            "values" => {
                let items = match receiver.as_object().map(|o| o.kind()) {
                    Some(kind) => match &*kind {
                        ObjectKind::Array { items, .. } => items
                            .iter()
                            .map(|item| item.clone().unwrap_or(JsValue::Undefined))
                            .collect(),
                        _ => Vec::new(),
                    },
                    None => Vec::new(),
                };
                Ok(EvalValue::ValuesIter(Rc::new(RefCell::new((items, 0)))))
            }
            "then" => {
                let callback = args
                    .into_iter()
                    .next()
                    .unwrap_or(EvalValue::Js(JsValue::Undefined));
                let result = pending_promise();
                self.microtasks.borrow_mut().push(Microtask::Then {
                    base: receiver.clone(),
                    callback,
                    result: result.clone(),
                });
                Ok(EvalValue::Js(result))
            }
            "catch" => {
                // Emitted code never relies on catch-handler output; the
                // result simply adopts the base promise.
                let result = pending_promise();
                self.microtasks.borrow_mut().push(Microtask::Adopt {
                    from: receiver.clone(),
                    result: result.clone(),
                });
                Ok(EvalValue::Js(result))
            }
            "enqueue" => {
                receiver.stream_push(StreamMessage::Next(first_js(&args)));
                Ok(EvalValue::Js(JsValue::Undefined))
            }
            "error" => {
                receiver.stream_push(StreamMessage::Error(first_js(&args)));
                Ok(EvalValue::Js(JsValue::Undefined))
            }
            "close" => {
                receiver.stream_push(StreamMessage::Close);
                Ok(EvalValue::Js(JsValue::Undefined))
            }
            other => Err(err(format!("unknown method {other:?}"))),
        }
    }

    fn call_builtin(
        &self,
        builtin: Builtin,
        args: Vec<EvalValue>,
        constructed: bool,
    ) -> Result<EvalValue> {
        match builtin {
            Builtin::ObjectNs => {
                // Plain call boxes a primitive.
                Ok(EvalValue::Js(JsValue::boxed(first_js(&args))))
            }
            Builtin::ObjectCreate => match first_js(&args) {
                JsValue::Null => Ok(EvalValue::Js(JsValue::null_proto_object(
                    Vec::<(String, JsValue)>::new(),
                ))),
                _ => Err(err("Object.create is only used with null")),
            },
            Builtin::ObjectAssign => {
                let mut iter = args.into_iter();
                let target = match iter.next() {
                    Some(EvalValue::Js(v)) => v,
                    _ => return Err(err("Object.assign needs a target")),
                };
                for source in iter {
                    let source = match source {
                        EvalValue::Js(v) => v,
                        _ => continue,
                    };
                    let (props, iterator) = match source.as_object().map(|o| o.kind()) {
                        Some(kind) => match &*kind {
                            ObjectKind::Plain {
                                props, iterator, ..
                            } => (props.clone(), iterator.clone()),
                            _ => (Vec::new(), None),
                        },
                        None => (Vec::new(), None),
                    };
                    for (key, value) in props {
                        self.member_set_js(&target, &key, EvalValue::Js(value))?;
                    }
                    if let Some(items) = iterator {
                        target.set_iterator(items);
                    }
                    if let Some(function) = self.expando_get(&source, ITERATOR_EXPANDO) {
                        self.expando_set(&target, ITERATOR_EXPANDO, function);
                    }
                }
                Ok(EvalValue::Js(target))
            }
            Builtin::ObjectSeal => {
                let target = first_js(&args);
                target.set_flag(ObjectFlag::Sealed);
                Ok(EvalValue::Js(target))
            }
            Builtin::ObjectFreeze => {
                let target = first_js(&args);
                target.set_flag(ObjectFlag::Frozen);
                Ok(EvalValue::Js(target))
            }
            Builtin::ObjectPreventExtensions => {
                let target = first_js(&args);
                target.set_flag(ObjectFlag::NonExtensible);
                Ok(EvalValue::Js(target))
            }
            Builtin::SymbolNs => Err(err("Symbol is not callable")),
            Builtin::PromiseNs => {
                if !constructed {
                    return Err(err("Promise must be constructed"));
                }
                let executor = args
                    .into_iter()
                    .next()
                    .ok_or_else(|| err("Promise needs an executor"))?;
                let promise = pending_promise();
                self.call(
                    executor,
                    vec![
                        EvalValue::Settler {
                            target: promise.clone(),
                            resolve: true,
                        },
                        EvalValue::Settler {
                            target: promise.clone(),
                            resolve: false,
                        },
                    ],
                )?;
                Ok(EvalValue::Js(promise))
            }
            Builtin::PromiseResolve => Ok(EvalValue::Js(JsValue::promise_resolved(first_js(
                &args,
            )))),
            Builtin::PromiseReject => Ok(EvalValue::Js(JsValue::promise_rejected(first_js(
                &args,
            )))),
            Builtin::MapCtor => {
                let mut entries = Vec::new();
                if let JsValue::Object(obj) = first_js(&args) {
                    if let ObjectKind::Array { items, .. } = &*obj.kind() {
                        for item in items.iter().flatten() {
                            let key = self.index_of(item, 0);
                            let value = self.index_of(item, 1);
                            entries.push((key, value));
                        }
                    }
                }
                Ok(EvalValue::Js(JsValue::map(entries)))
            }
            Builtin::SetCtor => {
                let mut out = Vec::new();
                if let JsValue::Object(obj) = first_js(&args) {
                    if let ObjectKind::Array { items, .. } = &*obj.kind() {
                        for item in items.iter().flatten() {
                            out.push(item.clone());
                        }
                    }
                }
                Ok(EvalValue::Js(JsValue::set(out)))
            }
            Builtin::DateCtor => match first_js(&args) {
                JsValue::Number(ms) => Ok(EvalValue::Js(JsValue::date(ms))),
                _ => Err(err("Date needs epoch milliseconds")),
            },
            Builtin::ErrorCtor(kind) => {
                let message = string_arg(&args, 0);
                Ok(EvalValue::Js(JsValue::error(kind, message)))
            }
            Builtin::AggregateErrorCtor => {
                let errors = match first_js(&args) {
                    JsValue::Object(obj) => match &*obj.kind() {
                        ObjectKind::Array { items, .. } => items
                            .iter()
                            .map(|item| item.clone().unwrap_or(JsValue::Undefined))
                            .collect(),
                        _ => Vec::new(),
                    },
                    _ => Vec::new(),
                };
                let message = string_arg(&args, 1);
                Ok(EvalValue::Js(JsValue::aggregate_error(message, errors)))
            }
            Builtin::TypedArrayCtor(kind) => self.construct_view(kind, &args),
            Builtin::UrlCtor => Ok(EvalValue::Js(JsValue::url(string_arg(&args, 0)))),
            Builtin::UrlSearchParamsCtor => Ok(EvalValue::Js(JsValue::url_search_params(
                form_urldecode(&string_arg(&args, 0)),
            ))),
            Builtin::BlobCtor => {
                let bytes = self.body_bytes(&first_js(&args))?;
                let content_type = self.option_string(&args, 1, "type");
                Ok(EvalValue::Js(JsValue::blob(content_type, bytes)))
            }
            Builtin::FileCtor => {
                let bytes = self.body_bytes(&first_js(&args))?;
                let name = string_arg(&args, 1);
                let content_type = self.option_string(&args, 2, "type");
                let last_modified = match self.option_prop(&args, 2, "lastModified") {
                    JsValue::Number(n) => n,
                    _ => 0.0,
                };
                Ok(EvalValue::Js(JsValue::file(
                    name,
                    content_type,
                    last_modified,
                    bytes,
                )))
            }
            Builtin::HeadersCtor => {
                let mut entries: Vec<(String, String)> = Vec::new();
                if let JsValue::Object(obj) = first_js(&args) {
                    if let ObjectKind::Array { items, .. } = &*obj.kind() {
                        for item in items.iter().flatten() {
                            let key = self.index_of(item, 0);
                            let value = self.index_of(item, 1);
                            if let (JsValue::String(k), JsValue::String(v)) = (key, value) {
                                entries.push((k.to_string(), v.to_string()));
                            }
                        }
                    }
                }
                Ok(EvalValue::Js(JsValue::headers(entries)))
            }
            Builtin::FormDataCtor => Ok(EvalValue::Js(JsValue::form_data(
                Vec::<(String, JsValue)>::new(),
            ))),
            Builtin::RequestCtor => {
                let url = string_arg(&args, 0);
                let options = nth_js(&args, 1);
                Ok(EvalValue::Js(JsValue::request(url, options)))
            }
            Builtin::ResponseCtor => {
                let body = match first_js(&args) {
                    JsValue::Null | JsValue::Undefined => None,
                    other => Some(other),
                };
                let options = nth_js(&args, 1);
                Ok(EvalValue::Js(JsValue::response(body, options)))
            }
            Builtin::EventCtor => Ok(EvalValue::Js(JsValue::event(
                string_arg(&args, 0),
                nth_js(&args, 1),
            ))),
            Builtin::CustomEventCtor => Ok(EvalValue::Js(JsValue::custom_event(
                string_arg(&args, 0),
                nth_js(&args, 1),
            ))),
            Builtin::DomExceptionCtor => Ok(EvalValue::Js(JsValue::dom_exception(
                string_arg(&args, 0),
                string_arg(&args, 1),
            ))),
            Builtin::ReadableStreamCtor => {
                let stream = JsValue::stream_recorded(Vec::new());
                let start = match args.into_iter().next() {
                    Some(EvalValue::Js(options)) => self.expando_get(&options, "start"),
                    _ => None,
                };
                if let Some(start) = start {
                    self.call(start, vec![EvalValue::Controller(stream.clone())])?;
                }
                Ok(EvalValue::Js(stream))
            }
        }
    }

    fn construct_view(&self, kind: TypedArrayKind, args: &[EvalValue]) -> Result<EvalValue> {
        let first = first_js(args);
        if let Some(obj) = first.as_object() {
            let is_array = matches!(&*obj.kind(), ObjectKind::Array { .. });
            if is_array {
                // `new Uint8Array([…])` — the buffer-building form.
                let bytes: Vec<u8> = match &*obj.kind() {
                    ObjectKind::Array { items, .. } => items
                        .iter()
                        .map(|item| match item {
                            Some(JsValue::Number(n)) => Ok(*n as u8),
                            _ => Err(err("byte lists must hold numbers")),
                        })
                        .collect::<Result<_>>()?,
                    _ => Vec::new(),
                };
                let length = bytes.len() as u32;
                let buffer = JsValue::array_buffer(bytes);
                return Ok(EvalValue::Js(JsValue::typed_array(kind, buffer, 0, length)));
            }
            let is_buffer = matches!(&*obj.kind(), ObjectKind::ArrayBuffer { .. });
            if is_buffer {
                let byte_offset = match nth_js(args, 1) {
                    JsValue::Number(n) => n as u32,
                    _ => 0,
                };
                let length = match nth_js(args, 2) {
                    JsValue::Number(n) => n as u32,
                    _ => {
                        let total = match &*obj.kind() {
                            ObjectKind::ArrayBuffer { bytes } => bytes.len() as u32,
                            _ => 0,
                        };
                        (total - byte_offset) / kind.bytes_per_element()
                    }
                };
                return Ok(EvalValue::Js(JsValue::typed_array(
                    kind,
                    first.clone(),
                    byte_offset,
                    length,
                )));
            }
        }
        Err(err("typed array needs a buffer or byte list"))
    }

    fn index_of(&self, array: &JsValue, index: usize) -> JsValue {
        if let Some(obj) = array.as_object() {
            if let ObjectKind::Array { items, .. } = &*obj.kind() {
                return items
                    .get(index)
                    .and_then(Clone::clone)
                    .unwrap_or(JsValue::Undefined);
            }
        }
        JsValue::Undefined
    }

    fn body_bytes(&self, parts: &JsValue) -> Result<Vec<u8>> {
        // Blob/File constructor part lists hold exactly one ArrayBuffer in
        // emitted code.
        let part = self.index_of(parts, 0);
        if let Some(obj) = part.as_object() {
            if let ObjectKind::ArrayBuffer { bytes } = &*obj.kind() {
                return Ok(bytes.clone());
            }
        }
        Err(err("body parts must be an ArrayBuffer list"))
    }

    fn option_prop(&self, args: &[EvalValue], index: usize, key: &str) -> JsValue {
        self.plain_prop(&nth_js(args, index), key)
    }

    fn option_string(&self, args: &[EvalValue], index: usize, key: &str) -> String {
        match self.option_prop(args, index, key) {
            JsValue::String(s) => s.to_string(),
            _ => String::new(),
        }
    }

    // --- MICROTASKS ---

    fn drain_microtasks(&self) -> Result<()> {
        for _ in 0..DRAIN_LIMIT {
            let tasks: Vec<Microtask> = self.microtasks.borrow_mut().drain(..).collect();
            if tasks.is_empty() {
                return Ok(());
            }
            let mut progressed = false;
            let mut still = Vec::new();
            for task in tasks {
                match task {
                    Microtask::Then {
                        base,
                        callback,
                        result,
                    } => match promise_state(&base) {
                        Some(Ok(value)) => {
                            progressed = true;
                            let out = self.call(callback, vec![EvalValue::Js(value)])?;
                            self.settle_from(&result, out, &mut still);
                        }
                        Some(Err(payload)) => {
                            // No rejection handler in emitted `.then`; the
                            // rejection propagates.
                            progressed = true;
                            result.settle_promise(Err(payload));
                        }
                        None => still.push(Microtask::Then {
                            base,
                            callback,
                            result,
                        }),
                    },
                    Microtask::Adopt { from, result } => match promise_state(&from) {
                        Some(outcome) => {
                            progressed = true;
                            result.settle_promise(outcome);
                        }
                        None => still.push(Microtask::Adopt { from, result }),
                    },
                }
            }
            self.microtasks.borrow_mut().extend(still);
            if !progressed {
                // Remaining tasks wait on promises settled by future
                // expressions (streaming follow-ups).
                return Ok(());
            }
        }
        Err(err("microtask queue did not quiesce"))
    }

    fn settle_from(&self, result: &JsValue, out: EvalValue, still: &mut Vec<Microtask>) {
        match out {
            EvalValue::Js(value) => {
                let is_promise = value
                    .as_object()
                    .map(|o| matches!(&*o.kind(), ObjectKind::Promise(_)))
                    .unwrap_or(false);
                if is_promise {
                    match promise_state(&value) {
                        Some(outcome) => result.settle_promise(outcome),
                        None => still.push(Microtask::Adopt {
                            from: value,
                            result: result.clone(),
                        }),
                    }
                } else {
                    result.settle_promise(Ok(value));
                }
            }
            _ => result.settle_promise(Ok(JsValue::Undefined)),
        }
    }
}

// --- SMALL HELPERS ---

/// Member access on a builtin namespace object.
fn builtin_member(ns: Builtin, key: &str) -> Result<EvalValue> {
    match (ns, key) {
        (Builtin::ObjectNs, "create") => Ok(EvalValue::Builtin(Builtin::ObjectCreate)),
        (Builtin::ObjectNs, "assign") => Ok(EvalValue::Builtin(Builtin::ObjectAssign)),
        (Builtin::ObjectNs, "seal") => Ok(EvalValue::Builtin(Builtin::ObjectSeal)),
        (Builtin::ObjectNs, "freeze") => Ok(EvalValue::Builtin(Builtin::ObjectFreeze)),
        (Builtin::ObjectNs, "preventExtensions") => {
            Ok(EvalValue::Builtin(Builtin::ObjectPreventExtensions))
        }
        (Builtin::SymbolNs, prop) => WellKnownSymbol::from_property(prop)
            .map(|symbol| EvalValue::Js(JsValue::Symbol(symbol)))
            .ok_or_else(|| err(format!("unknown symbol {prop:?}"))),
        (Builtin::PromiseNs, "resolve") => Ok(EvalValue::Builtin(Builtin::PromiseResolve)),
        (Builtin::PromiseNs, "reject") => Ok(EvalValue::Builtin(Builtin::PromiseReject)),
        (ns, key) => Err(err(format!("unknown member {key:?} on {ns:?}"))),
    }
}

fn pending_promise() -> JsValue {
    JsValue::Object(crate::value::JsObject::new(ObjectKind::Promise(
        PromiseState::Pending(None),
    )))
}

/// Settled state of a promise value, if any.
fn promise_state(promise: &JsValue) -> Option<std::result::Result<JsValue, JsValue>> {
    let obj = promise.as_object()?;
    match &*obj.kind() {
        ObjectKind::Promise(PromiseState::Resolved(v)) => Some(Ok(v.clone())),
        ObjectKind::Promise(PromiseState::Rejected(v)) => Some(Err(v.clone())),
        _ => None,
    }
}

fn truthy(value: &EvalValue) -> bool {
    match value {
        EvalValue::Js(v) => match v {
            JsValue::Undefined | JsValue::Null => false,
            JsValue::Bool(b) => *b,
            JsValue::Number(n) => *n != 0.0 && !n.is_nan(),
            JsValue::String(s) => !s.is_empty(),
            JsValue::BigInt(digits) => !matches!(&**digits, "0" | "-0"),
            JsValue::Symbol(_) | JsValue::Object(_) => true,
        },
        _ => true,
    }
}

fn first_js(args: &[EvalValue]) -> JsValue {
    nth_js(args, 0)
}

fn nth_js(args: &[EvalValue], index: usize) -> JsValue {
    match args.get(index) {
        Some(EvalValue::Js(v)) => v.clone(),
        _ => JsValue::Undefined,
    }
}

fn string_arg(args: &[EvalValue], index: usize) -> String {
    match nth_js(args, index) {
        JsValue::String(s) => s.to_string(),
        JsValue::Undefined => String::new(),
        other => other.type_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_literals() {
        let ev = Evaluator::new();
        assert!(matches!(ev.eval("1/0"), Ok(JsValue::Number(n)) if n.is_infinite()));
        assert!(matches!(ev.eval("(\"hi\")"), Ok(JsValue::String(s)) if &*s == "hi"));
    }

    #[test]
    fn evaluates_cycles_through_iife() {
        let ev = Evaluator::new();
        let value = ev.eval("((a)=>((a={},a.self=a,a)))()").unwrap();
        let self_value = ev.plain_prop(&value, "self");
        assert_eq!(value.identity(), self_value.identity());
    }

    #[test]
    fn then_runs_after_main_expression() {
        let ev = Evaluator::new();
        let value = ev
            .eval("((a)=>((a=[Promise.resolve().then(()=>a)],a)))()")
            .unwrap();
        let promise = ev.index_of(&value, 0);
        match promise_state(&promise) {
            Some(Ok(inner)) => assert_eq!(inner.identity(), value.identity()),
            other => panic!("expected settled promise, got {other:?}"),
        }
    }

    #[test]
    fn shared_table_persists_across_evals() {
        let ev = Evaluator::new();
        ev.eval("(($R)=>($R[0]={x:1}))(self.$R=self.$R||[])")
            .unwrap();
        let second = ev
            .eval("(($R)=>($R[0]))(self.$R=self.$R||[])")
            .unwrap();
        assert!(matches!(
            ev.plain_prop(&second, "x"),
            JsValue::Number(n) if n == 1.0
        ));
    }
}
