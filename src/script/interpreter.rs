//! 语法树解释执行
//!
//! 直接遍历语法树求值：
//! - 词法作用域（`var` 函数级，`let`/`const` 块级）与闭包
//! - 原型链、`new`、`this`、`instanceof`
//! - 运行期错误以可捕获的 `TypeError`/`ReferenceError`/`RangeError` 对象抛出
//! - 每个抛出的值都带有抛出点的调用栈

use crate::script::ast::*;
use crate::script::builtins;
use crate::script::parser::parse_program;
use crate::script::scope::{self, Env, Scope};
use crate::script::value::{
    Callable, NativeFn, Object, ObjectClass, ObjectRef, Value, valid_array_length,
};
use crate::script::{Exception, ScriptError, TraceFrame};
use std::collections::HashSet;
use std::rc::Rc;

/// 脚本调用深度上限，包括顶层帧
///
/// 接近上限的递归需要 `with_script_stack` 提供的线程栈。
pub const MAX_CALL_DEPTH: usize = 2000;

pub type Exec<T> = Result<T, Throw>;

/// 脚本中抛出的值及抛出时的调用栈
#[derive(Clone, Debug)]
pub struct Throw {
    pub value: Value,
    pub trace: Vec<TraceFrame>,
}

impl Throw {
    /// 转换为不依赖解释器的异常描述
    pub fn to_exception(&self) -> Exception {
        let (name, message) = match &self.value {
            Value::Object(_) => {
                let name = self
                    .value
                    .lookup_str("name")
                    .unwrap_or_else(|| "Error".to_string());
                let message = match self.value.lookup("message") {
                    Some(message) if !message.is_nullish() => message.to_display(),
                    _ => String::new(),
                };
                (name, message)
            }
            other => ("Error".to_string(), other.to_display()),
        };
        Exception {
            name,
            message,
            trace: self.trace.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Error,
    TypeError,
    ReferenceError,
    RangeError,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::RangeError => "RangeError",
        }
    }
}

/// 内置原型对象
pub struct Intrinsics {
    pub object_proto: ObjectRef,
    pub function_proto: ObjectRef,
    pub array_proto: ObjectRef,
    pub string_proto: ObjectRef,
    pub number_proto: ObjectRef,
    pub boolean_proto: ObjectRef,
    pub error_proto: ObjectRef,
    pub type_error_proto: ObjectRef,
    pub reference_error_proto: ObjectRef,
    pub range_error_proto: ObjectRef,
}

impl Intrinsics {
    fn all(&self) -> Vec<ObjectRef> {
        vec![
            self.object_proto.clone(),
            self.function_proto.clone(),
            self.array_proto.clone(),
            self.string_proto.clone(),
            self.number_proto.clone(),
            self.boolean_proto.clone(),
            self.error_proto.clone(),
            self.type_error_proto.clone(),
            self.reference_error_proto.clone(),
            self.range_error_proto.clone(),
        ]
    }

    fn new() -> Self {
        let object_proto = ObjectRef::new(Object::new(ObjectClass::Plain, None));
        let plain = || ObjectRef::new(Object::new(ObjectClass::Plain, Some(object_proto.clone())));
        let error_proto = ObjectRef::new(Object::new(ObjectClass::Error, Some(object_proto.clone())));
        let sub_error =
            || ObjectRef::new(Object::new(ObjectClass::Error, Some(error_proto.clone())));
        Self {
            function_proto: plain(),
            array_proto: ObjectRef::new(Object::new(
                ObjectClass::Array(Vec::new()),
                Some(object_proto.clone()),
            )),
            string_proto: plain(),
            number_proto: plain(),
            boolean_proto: plain(),
            type_error_proto: sub_error(),
            reference_error_proto: sub_error(),
            range_error_proto: sub_error(),
            error_proto,
            object_proto,
        }
    }

    pub fn error_proto_for(&self, kind: ErrorKind) -> ObjectRef {
        match kind {
            ErrorKind::Error => self.error_proto.clone(),
            ErrorKind::TypeError => self.type_error_proto.clone(),
            ErrorKind::ReferenceError => self.reference_error_proto.clone(),
            ErrorKind::RangeError => self.range_error_proto.clone(),
        }
    }
}

/// 语句执行结果
enum Completion {
    /// 正常结束，携带最近一个表达式语句的值
    Normal(Option<Value>),
    Return(Value),
    Break,
    Continue,
}

struct Frame {
    function: Rc<str>,
    unit: Rc<str>,
    line: u32,
}

/// 赋值目标
enum Reference {
    Binding(Rc<str>),
    Property(Value, Rc<str>),
}

pub struct Interpreter {
    global: Env,
    intrinsics: Intrinsics,
    frames: Vec<Frame>,
    output: Vec<String>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        let mut interpreter = Self {
            global: Scope::global(),
            intrinsics: Intrinsics::new(),
            frames: Vec::new(),
            output: Vec::new(),
        };
        builtins::install(&mut interpreter);
        interpreter
    }

    pub fn intrinsics(&self) -> &Intrinsics {
        &self.intrinsics
    }

    /// 解析并执行一段源码，返回最后一个表达式语句的值
    pub fn run(&mut self, source: &str, unit: &str) -> Result<Value, ScriptError> {
        let program = parse_program(source, unit)?;
        let depth = self.frames.len();
        self.frames.push(Frame {
            function: Rc::from("<toplevel>"),
            unit: Rc::from(unit),
            line: 1,
        });
        let global = self.global.clone();
        self.hoist(&program.body, &global);
        let result = self.exec_stmts(&program.body, &global);
        self.frames.truncate(depth);
        match result {
            Ok(Completion::Normal(value)) => Ok(value.unwrap_or_default()),
            Ok(_) => Ok(Value::Undefined),
            Err(throw) => Err(ScriptError::Uncaught(throw.to_exception())),
        }
    }

    /// 全局绑定快照（按绑定顺序）
    pub fn global_bindings(&self) -> Vec<(String, Value)> {
        self.global
            .borrow()
            .bindings()
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.global.borrow().get_own(name)
    }

    pub fn define_global(&mut self, name: &str, value: Value) {
        self.global.borrow_mut().declare(name, value);
    }

    /// 取出 `print` 累积的输出
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    pub(crate) fn push_output(&mut self, line: String) {
        tracing::debug!(target: "scriptest::script", "{}", line);
        self.output.push(line);
    }

    /// 清空调用栈，用于执行环境退出时
    pub fn reset(&mut self) {
        self.frames.clear();
    }

    pub fn call_depth(&self) -> usize {
        self.frames.len()
    }

    /// 拆除全局可达的对象图
    ///
    /// 原型与 `constructor`、闭包与定义它的作用域互相引用，`Rc` 无法回收，
    /// 只能在环境销毁前逐个清空。之后解释器不再可用。
    pub fn teardown(&mut self) {
        let mut seen = HashSet::new();
        let mut scopes: Vec<Env> = vec![self.global.clone()];
        let mut objects: Vec<ObjectRef> = self.intrinsics.all();
        while !scopes.is_empty() || !objects.is_empty() {
            while let Some(env) = scopes.pop() {
                if !seen.insert(Rc::as_ptr(&env) as *const ()) {
                    continue;
                }
                let (values, parent) = env.borrow_mut().release();
                objects.extend(values.into_iter().filter_map(|value| match value {
                    Value::Object(object) => Some(object),
                    _ => None,
                }));
                scopes.extend(parent);
            }
            while let Some(object) = objects.pop() {
                if !seen.insert(object.addr()) {
                    continue;
                }
                let (values, scope) = object.borrow_mut().release();
                objects.extend(values.into_iter().filter_map(|value| match value {
                    Value::Object(object) => Some(object),
                    _ => None,
                }));
                scopes.extend(scope);
            }
        }
        self.frames.clear();
        self.output.clear();
    }

    // === 对象构造工具 ===

    pub fn new_object(&self) -> ObjectRef {
        ObjectRef::new(Object::new(
            ObjectClass::Plain,
            Some(self.intrinsics.object_proto.clone()),
        ))
    }

    pub fn new_array(&self, items: Vec<Value>) -> Value {
        Value::Object(ObjectRef::new(Object::new(
            ObjectClass::Array(items),
            Some(self.intrinsics.array_proto.clone()),
        )))
    }

    pub fn new_native(&self, name: &'static str, call: NativeFn) -> ObjectRef {
        let function = ObjectRef::new(Object::new(
            ObjectClass::Function(Callable::Native { name, call }),
            Some(self.intrinsics.function_proto.clone()),
        ));
        function.borrow_mut().define_hidden("name", Value::string(name));
        function
    }

    fn new_function(&self, decl: &Rc<FunctionDecl>, env: &Env) -> Value {
        let function = ObjectRef::new(Object::new(
            ObjectClass::Function(Callable::Script {
                decl: decl.clone(),
                scope: env.clone(),
            }),
            Some(self.intrinsics.function_proto.clone()),
        ));
        let prototype = self.new_object();
        prototype
            .borrow_mut()
            .define_hidden("constructor", Value::Object(function.clone()));
        {
            let mut object = function.borrow_mut();
            object.define_hidden("prototype", Value::Object(prototype));
            object.define_hidden(
                "name",
                Value::string(decl.name.as_deref().unwrap_or_default()),
            );
        }
        Value::Object(function)
    }

    /// 创建错误对象（不抛出）
    pub fn make_error(&self, kind: ErrorKind, message: &str) -> Value {
        let error = ObjectRef::new(Object::new(
            ObjectClass::Error,
            Some(self.intrinsics.error_proto_for(kind)),
        ));
        error
            .borrow_mut()
            .set_own("message", Value::string(message));
        Value::Object(error)
    }

    /// 创建并包装一个待抛出的错误
    pub fn throw_error(&self, kind: ErrorKind, message: impl AsRef<str>) -> Throw {
        self.throw_value(self.make_error(kind, message.as_ref()))
    }

    pub fn throw_value(&self, value: Value) -> Throw {
        Throw {
            value,
            trace: self.capture_trace(),
        }
    }

    fn capture_trace(&self) -> Vec<TraceFrame> {
        self.frames
            .iter()
            .rev()
            .map(|frame| TraceFrame {
                function: frame.function.to_string(),
                unit: frame.unit.to_string(),
                line: frame.line,
            })
            .collect()
    }

    // === 调用 ===

    pub fn call(&mut self, callee: &Value, this: Value, args: &[Value]) -> Exec<Value> {
        self.invoke(callee, this, args, false)
    }

    /// `new callee(args)`
    pub fn construct(&mut self, callee: &Value, args: &[Value]) -> Exec<Value> {
        let Some(constructor) = callee.as_object().filter(|o| o.callable().is_some()) else {
            return Err(self.throw_error(
                ErrorKind::TypeError,
                format!("{} is not a constructor", callee.to_display()),
            ));
        };
        let proto = match constructor.lookup("prototype") {
            Some(Value::Object(proto)) => proto,
            _ => self.intrinsics.object_proto.clone(),
        };
        let class = if proto.ptr_eq(&self.intrinsics.error_proto)
            || proto.inherits_from(&self.intrinsics.error_proto)
        {
            ObjectClass::Error
        } else {
            ObjectClass::Plain
        };
        let instance = ObjectRef::new(Object::new(class, Some(proto)));
        let result = self.invoke(callee, Value::Object(instance.clone()), args, true)?;
        match result {
            Value::Object(_) => Ok(result),
            _ => Ok(Value::Object(instance)),
        }
    }

    fn invoke(
        &mut self,
        callee: &Value,
        this: Value,
        args: &[Value],
        constructing: bool,
    ) -> Exec<Value> {
        let Some(callable) = callee.as_object().and_then(|o| o.callable()) else {
            return Err(self.throw_error(
                ErrorKind::TypeError,
                format!("{} is not a function", callee.to_display()),
            ));
        };
        if self.frames.len() >= MAX_CALL_DEPTH {
            return Err(self.throw_error(ErrorKind::RangeError, "Maximum call stack size exceeded"));
        }
        match callable {
            Callable::Native { call, .. } => call(self, &this, args, constructing),
            Callable::Script { decl, scope } => {
                let env = Scope::function(scope, this);
                {
                    let mut frame = env.borrow_mut();
                    if let Some(name) = &decl.name {
                        frame.declare(name, callee.clone());
                    }
                    for (index, param) in decl.params.iter().enumerate() {
                        frame.declare(param, args.get(index).cloned().unwrap_or_default());
                    }
                }
                let arguments = self.new_array(args.to_vec());
                if !env.borrow().has_own("arguments") {
                    env.borrow_mut().declare("arguments", arguments);
                }
                self.hoist(&decl.body, &env);

                let function = match callee.lookup_str("name") {
                    Some(name) if !name.is_empty() => Rc::from(name),
                    _ => Rc::from("<anonymous>"),
                };
                self.frames.push(Frame {
                    function,
                    unit: decl.unit.clone(),
                    line: decl.line,
                });
                let result = self.exec_stmts(&decl.body, &env);
                self.frames.pop();

                match result? {
                    Completion::Return(value) => Ok(value),
                    _ => Ok(Value::Undefined),
                }
            }
        }
    }

    // === 属性访问 ===

    /// 读取属性，原始值使用对应的内置原型
    pub fn get(&mut self, target: &Value, key: &str) -> Exec<Value> {
        let proto = match target {
            Value::Undefined | Value::Null => {
                return Err(self.throw_error(
                    ErrorKind::TypeError,
                    format!(
                        "Cannot read property '{}' of {}",
                        key,
                        target.to_display()
                    ),
                ));
            }
            Value::Object(object) => return Ok(object.lookup(key).unwrap_or_default()),
            Value::String(s) => {
                if key == "length" {
                    return Ok(Value::Number(s.chars().count() as f64));
                }
                if let Ok(index) = key.parse::<usize>()
                    && let Some(c) = s.chars().nth(index)
                {
                    return Ok(Value::string(c.to_string()));
                }
                &self.intrinsics.string_proto
            }
            Value::Number(_) => &self.intrinsics.number_proto,
            Value::Bool(_) => &self.intrinsics.boolean_proto,
        };
        Ok(proto.lookup(key).unwrap_or_default())
    }

    pub fn put(&mut self, target: &Value, key: &str, value: Value) -> Exec<()> {
        match target {
            Value::Undefined | Value::Null => Err(self.throw_error(
                ErrorKind::TypeError,
                format!("Cannot set property '{}' of {}", key, target.to_display()),
            )),
            Value::Object(object) => {
                if key == "length"
                    && object.is_array()
                    && valid_array_length(value.to_number()).is_none()
                {
                    return Err(self.throw_error(ErrorKind::RangeError, "Invalid array length"));
                }
                object.borrow_mut().set_own(key, value);
                Ok(())
            }
            // 原始值上的赋值静默忽略
            _ => Ok(()),
        }
    }

    /// ToString，对象会调用其 `toString` 方法
    pub fn to_string(&mut self, value: &Value) -> Exec<String> {
        match value {
            Value::Object(_) => {
                let method = self.get(value, "toString")?;
                if method.is_callable() {
                    let result = self.call(&method, value.clone(), &[])?;
                    if !matches!(result, Value::Object(_)) {
                        return Ok(result.to_display());
                    }
                }
                Ok(value.to_display())
            }
            other => Ok(other.to_display()),
        }
    }

    fn to_primitive(&mut self, value: Value) -> Exec<Value> {
        match value {
            Value::Object(_) => Ok(Value::string(self.to_string(&value)?)),
            other => Ok(other),
        }
    }

    // === 语句 ===

    /// 函数声明与 `var` 提升
    fn hoist(&mut self, body: &[Stmt], env: &Env) {
        for stmt in body {
            match &stmt.kind {
                StmtKind::Function(decl) => {
                    let function = self.new_function(decl, env);
                    if let Some(name) = &decl.name {
                        env.borrow_mut().declare(name, function);
                    }
                }
                _ => self.hoist_vars(stmt, env),
            }
        }
    }

    fn hoist_vars(&self, stmt: &Stmt, env: &Env) {
        let declare = |name: &Rc<str>| {
            if !env.borrow().has_own(name) {
                env.borrow_mut().declare(name, Value::Undefined);
            }
        };
        match &stmt.kind {
            StmtKind::Declare {
                kind: DeclKind::Var,
                decls,
            } => decls.iter().for_each(|(name, _)| declare(name)),
            StmtKind::ForIn {
                kind: Some(DeclKind::Var),
                name,
                body,
                ..
            } => {
                declare(name);
                self.hoist_vars(body, env);
            }
            StmtKind::Block(stmts) => stmts.iter().for_each(|s| self.hoist_vars(s, env)),
            StmtKind::If {
                then, otherwise, ..
            } => {
                self.hoist_vars(then, env);
                if let Some(otherwise) = otherwise {
                    self.hoist_vars(otherwise, env);
                }
            }
            StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } => {
                self.hoist_vars(body, env)
            }
            StmtKind::For { init, body, .. } => {
                if let Some(init) = init {
                    self.hoist_vars(init, env);
                }
                self.hoist_vars(body, env);
            }
            StmtKind::Try {
                block,
                handler,
                finalizer,
            } => {
                block.iter().for_each(|s| self.hoist_vars(s, env));
                if let Some((_, stmts)) = handler {
                    stmts.iter().for_each(|s| self.hoist_vars(s, env));
                }
                if let Some(stmts) = finalizer {
                    stmts.iter().for_each(|s| self.hoist_vars(s, env));
                }
            }
            _ => {}
        }
    }

    fn exec_stmts(&mut self, stmts: &[Stmt], env: &Env) -> Exec<Completion> {
        let mut last = None;
        for stmt in stmts {
            match self.exec_stmt(stmt, env)? {
                Completion::Normal(Some(value)) => last = Some(value),
                Completion::Normal(None) => {}
                abrupt => return Ok(abrupt),
            }
        }
        Ok(Completion::Normal(last))
    }

    fn exec_block(&mut self, stmts: &[Stmt], env: &Env) -> Exec<Completion> {
        let block = Scope::block(env.clone());
        self.exec_stmts(stmts, &block)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, env: &Env) -> Exec<Completion> {
        if let Some(frame) = self.frames.last_mut() {
            frame.line = stmt.line;
        }
        match &stmt.kind {
            StmtKind::Expr(expr) => Ok(Completion::Normal(Some(self.eval(expr, env)?))),
            StmtKind::Declare { kind, decls } => {
                self.exec_declare(*kind, decls, env)?;
                Ok(Completion::Normal(None))
            }
            // 函数体顶层的声明已在提升阶段绑定，块内声明在此绑定
            StmtKind::Function(decl) => {
                if let Some(name) = &decl.name
                    && !env.borrow().has_own(name)
                {
                    let function = self.new_function(decl, env);
                    env.borrow_mut().declare(name, function);
                }
                Ok(Completion::Normal(None))
            }
            StmtKind::Empty => Ok(Completion::Normal(None)),
            StmtKind::Block(stmts) => self.exec_block(stmts, env),
            StmtKind::If {
                test,
                then,
                otherwise,
            } => {
                if self.eval(test, env)?.truthy() {
                    self.exec_stmt(then, env)
                } else if let Some(otherwise) = otherwise {
                    self.exec_stmt(otherwise, env)
                } else {
                    Ok(Completion::Normal(None))
                }
            }
            StmtKind::While { test, body } => {
                while self.eval(test, env)?.truthy() {
                    match self.exec_stmt(body, env)? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Continue | Completion::Normal(_) => {}
                    }
                }
                Ok(Completion::Normal(None))
            }
            StmtKind::DoWhile { body, test } => {
                loop {
                    match self.exec_stmt(body, env)? {
                        Completion::Break => break,
                        Completion::Return(value) => return Ok(Completion::Return(value)),
                        Completion::Continue | Completion::Normal(_) => {}
                    }
                    if !self.eval(test, env)?.truthy() {
                        break;
                    }
                }
                Ok(Completion::Normal(None))
            }
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => self.exec_for(init.as_deref(), test.as_ref(), update.as_ref(), body, env),
            StmtKind::ForIn {
                kind,
                name,
                object,
                body,
            } => self.exec_for_in(*kind, name, object, body, env),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::Undefined,
                };
                Ok(Completion::Return(value))
            }
            StmtKind::Break => Ok(Completion::Break),
            StmtKind::Continue => Ok(Completion::Continue),
            StmtKind::Throw(expr) => {
                let value = self.eval(expr, env)?;
                Err(self.throw_value(value))
            }
            StmtKind::Try {
                block,
                handler,
                finalizer,
            } => self.exec_try(block, handler.as_ref(), finalizer.as_deref(), env),
        }
    }

    fn exec_declare(
        &mut self,
        kind: DeclKind,
        decls: &[(Rc<str>, Option<Expr>)],
        env: &Env,
    ) -> Exec<()> {
        for (name, init) in decls {
            match (kind, init) {
                (DeclKind::Var, Some(init)) => {
                    let value = self.eval(init, env)?;
                    if let Expr::Function(decl) = init {
                        infer_name(decl, &value, name);
                    }
                    if !scope::assign(env, name, value.clone()) {
                        scope::function_scope(env).borrow_mut().declare(name, value);
                    }
                }
                (DeclKind::Var, None) => {
                    let target = scope::function_scope(env);
                    if !target.borrow().has_own(name) {
                        target.borrow_mut().declare(name, Value::Undefined);
                    }
                }
                (_, init) => {
                    let value = match init {
                        Some(init) => self.eval(init, env)?,
                        None => Value::Undefined,
                    };
                    env.borrow_mut().declare(name, value);
                }
            }
        }
        Ok(())
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
        env: &Env,
    ) -> Exec<Completion> {
        let loop_env = Scope::block(env.clone());
        if let Some(init) = init {
            self.exec_stmt(init, &loop_env)?;
        }
        loop {
            if let Some(test) = test
                && !self.eval(test, &loop_env)?.truthy()
            {
                break;
            }
            match self.exec_stmt(body, &loop_env)? {
                Completion::Break => break,
                Completion::Return(value) => return Ok(Completion::Return(value)),
                Completion::Continue | Completion::Normal(_) => {}
            }
            if let Some(update) = update {
                self.eval(update, &loop_env)?;
            }
        }
        Ok(Completion::Normal(None))
    }

    fn exec_for_in(
        &mut self,
        kind: Option<DeclKind>,
        name: &Rc<str>,
        object: &Expr,
        body: &Stmt,
        env: &Env,
    ) -> Exec<Completion> {
        let target = self.eval(object, env)?;
        let keys: Vec<Rc<str>> = match &target {
            Value::Object(object) => object.enumerable_keys(),
            Value::String(s) => (0..s.chars().count())
                .map(|i| Rc::from(i.to_string()))
                .collect(),
            _ => Vec::new(),
        };
        let loop_env = Scope::block(env.clone());
        for key in keys {
            let value = Value::String(key);
            match kind {
                Some(DeclKind::Let) | Some(DeclKind::Const) => {
                    loop_env.borrow_mut().declare(name, value)
                }
                _ => self.assign_binding(name, value, &loop_env),
            }
            match self.exec_stmt(body, &loop_env)? {
                Completion::Break => break,
                Completion::Return(value) => return Ok(Completion::Return(value)),
                Completion::Continue | Completion::Normal(_) => {}
            }
        }
        Ok(Completion::Normal(None))
    }

    fn exec_try(
        &mut self,
        block: &[Stmt],
        handler: Option<&(Rc<str>, Vec<Stmt>)>,
        finalizer: Option<&[Stmt]>,
        env: &Env,
    ) -> Exec<Completion> {
        let depth = self.frames.len();
        let mut result = self.exec_block(block, env);
        if let Some((name, stmts)) = handler
            && let Err(throw) = &result
        {
            let thrown = throw.value.clone();
            self.frames.truncate(depth);
            let catch_env = Scope::block(env.clone());
            catch_env.borrow_mut().declare(name, thrown);
            result = self.exec_stmts(stmts, &catch_env);
        }
        if let Some(stmts) = finalizer {
            self.frames.truncate(depth);
            match self.exec_block(stmts, env)? {
                Completion::Normal(_) => {}
                abrupt => return Ok(abrupt),
            }
        }
        result
    }

    // === 表达式 ===

    fn eval(&mut self, expr: &Expr, env: &Env) -> Exec<Value> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::String(s) => Ok(Value::String(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::This => Ok(scope::this_value(env)),
            Expr::Ident(name) => self.lookup_binding(name, env),
            Expr::Array(items) => {
                let values = items
                    .iter()
                    .map(|item| self.eval(item, env))
                    .collect::<Exec<Vec<_>>>()?;
                Ok(self.new_array(values))
            }
            Expr::Object(props) => {
                let object = self.new_object();
                for (key, value) in props {
                    let value = self.eval(value, env)?;
                    object.borrow_mut().set_own(key, value);
                }
                Ok(Value::Object(object))
            }
            Expr::Function(decl) => Ok(self.new_function(decl, env)),
            Expr::Unary { op, expr } => self.eval_unary(*op, expr, env),
            Expr::Update {
                increment,
                prefix,
                target,
            } => self.eval_update(*increment, *prefix, target, env),
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                self.binary(*op, left, right)
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left, env)?;
                match (op, left.truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.eval(right, env),
                }
            }
            Expr::Conditional {
                test,
                then,
                otherwise,
            } => {
                if self.eval(test, env)?.truthy() {
                    self.eval(then, env)
                } else {
                    self.eval(otherwise, env)
                }
            }
            Expr::Assign { op, target, value } => self.eval_assign(*op, target, value, env),
            Expr::Member { object, property } => {
                let object = self.eval(object, env)?;
                self.get(&object, property)
            }
            Expr::Index { object, index } => {
                let object = self.eval(object, env)?;
                let key = self.eval(index, env)?;
                let key = self.to_string(&key)?;
                self.get(&object, &key)
            }
            Expr::Call { callee, args } => self.eval_call(callee, args, env),
            Expr::New { callee, args } => {
                let constructor = self.eval(callee, env)?;
                let args = self.eval_args(args, env)?;
                self.construct(&constructor, &args)
            }
            Expr::Delete(target) => match self.resolve_reference(target, env)? {
                Reference::Property(Value::Object(object), key) => {
                    Ok(Value::Bool(object.borrow_mut().delete(&key)))
                }
                Reference::Property(_, _) => Ok(Value::Bool(true)),
                Reference::Binding(_) => Ok(Value::Bool(false)),
            },
        }
    }

    fn eval_args(&mut self, args: &[Expr], env: &Env) -> Exec<Vec<Value>> {
        args.iter().map(|arg| self.eval(arg, env)).collect()
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr], env: &Env) -> Exec<Value> {
        let (function, this, label) = match callee {
            Expr::Member { object, property } => {
                let object = self.eval(object, env)?;
                let function = self.get(&object, property)?;
                (function, object, property.to_string())
            }
            Expr::Index { object, index } => {
                let object = self.eval(object, env)?;
                let key = self.eval(index, env)?;
                let key = self.to_string(&key)?;
                let function = self.get(&object, &key)?;
                (function, object, key)
            }
            Expr::Ident(name) => (self.lookup_binding(name, env)?, Value::Undefined, name.to_string()),
            other => (self.eval(other, env)?, Value::Undefined, "expression".to_string()),
        };
        if !function.is_callable() {
            return Err(self.throw_error(
                ErrorKind::TypeError,
                format!("{} is not a function", label),
            ));
        }
        let args = self.eval_args(args, env)?;
        self.call(&function, this, &args)
    }

    fn eval_unary(&mut self, op: UnaryOp, expr: &Expr, env: &Env) -> Exec<Value> {
        if op == UnaryOp::Typeof
            && let Expr::Ident(name) = expr
            && scope::lookup(env, name).is_none()
        {
            return Ok(Value::string("undefined"));
        }
        let value = self.eval(expr, env)?;
        Ok(match op {
            UnaryOp::Not => Value::Bool(!value.truthy()),
            UnaryOp::Negate => Value::Number(-self.to_primitive(value)?.to_number()),
            UnaryOp::Plus => Value::Number(self.to_primitive(value)?.to_number()),
            UnaryOp::Typeof => Value::string(value.type_of()),
        })
    }

    fn eval_update(
        &mut self,
        increment: bool,
        prefix: bool,
        target: &Expr,
        env: &Env,
    ) -> Exec<Value> {
        let reference = self.resolve_reference(target, env)?;
        let old = self.read_reference(&reference, env)?;
        let old = self.to_primitive(old)?.to_number();
        let new = if increment { old + 1.0 } else { old - 1.0 };
        self.write_reference(reference, Value::Number(new), env)?;
        Ok(Value::Number(if prefix { new } else { old }))
    }

    fn eval_assign(
        &mut self,
        op: Option<BinaryOp>,
        target: &Expr,
        value: &Expr,
        env: &Env,
    ) -> Exec<Value> {
        let reference = self.resolve_reference(target, env)?;
        let value = match op {
            None => {
                let result = self.eval(value, env)?;
                if let Expr::Function(decl) = value {
                    let name = match &reference {
                        Reference::Binding(name) | Reference::Property(_, name) => name,
                    };
                    infer_name(decl, &result, name);
                }
                result
            }
            Some(op) => {
                let current = self.read_reference(&reference, env)?;
                let rhs = self.eval(value, env)?;
                self.binary(op, current, rhs)?
            }
        };
        self.write_reference(reference, value.clone(), env)?;
        Ok(value)
    }

    fn resolve_reference(&mut self, target: &Expr, env: &Env) -> Exec<Reference> {
        match target {
            Expr::Ident(name) => Ok(Reference::Binding(name.clone())),
            Expr::Member { object, property } => {
                let object = self.eval(object, env)?;
                Ok(Reference::Property(object, property.clone()))
            }
            Expr::Index { object, index } => {
                let object = self.eval(object, env)?;
                let key = self.eval(index, env)?;
                let key = self.to_string(&key)?;
                Ok(Reference::Property(object, Rc::from(key)))
            }
            _ => Err(self.throw_error(ErrorKind::ReferenceError, "Invalid assignment target")),
        }
    }

    fn read_reference(&mut self, reference: &Reference, env: &Env) -> Exec<Value> {
        match reference {
            Reference::Binding(name) => self.lookup_binding(name, env),
            Reference::Property(object, key) => self.get(object, key),
        }
    }

    fn write_reference(&mut self, reference: Reference, value: Value, env: &Env) -> Exec<()> {
        match reference {
            Reference::Binding(name) => {
                self.assign_binding(&name, value, env);
                Ok(())
            }
            Reference::Property(object, key) => self.put(&object, &key, value),
        }
    }

    fn lookup_binding(&self, name: &str, env: &Env) -> Exec<Value> {
        scope::lookup(env, name).ok_or_else(|| {
            self.throw_error(ErrorKind::ReferenceError, format!("{} is not defined", name))
        })
    }

    /// 未声明的变量赋值落到全局作用域
    fn assign_binding(&self, name: &str, value: Value, env: &Env) {
        if !scope::assign(env, name, value.clone()) {
            self.global.borrow_mut().declare(name, value);
        }
    }

    fn binary(&mut self, op: BinaryOp, left: Value, right: Value) -> Exec<Value> {
        let result = match op {
            BinaryOp::Add => {
                let left = self.to_primitive(left)?;
                let right = self.to_primitive(right)?;
                match (&left, &right) {
                    (Value::String(_), _) | (_, Value::String(_)) => {
                        Value::string(format!("{}{}", left.to_display(), right.to_display()))
                    }
                    _ => Value::Number(left.to_number() + right.to_number()),
                }
            }
            BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
            BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
            BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
            BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
            BinaryOp::Eq => Value::Bool(left.loose_equals(&right)),
            BinaryOp::NotEq => Value::Bool(!left.loose_equals(&right)),
            BinaryOp::StrictEq => Value::Bool(left.strict_equals(&right)),
            BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(&right)),
            BinaryOp::Less | BinaryOp::LessEq | BinaryOp::Greater | BinaryOp::GreaterEq => {
                let left = self.to_primitive(left)?;
                let right = self.to_primitive(right)?;
                Value::Bool(compare(op, &left, &right))
            }
            BinaryOp::Instanceof => {
                if !right.is_callable() {
                    return Err(self.throw_error(
                        ErrorKind::TypeError,
                        "Right-hand side of 'instanceof' is not callable",
                    ));
                }
                let inherits = match (&left, right.lookup("prototype")) {
                    (Value::Object(object), Some(Value::Object(proto))) => {
                        object.inherits_from(&proto)
                    }
                    _ => false,
                };
                Value::Bool(inherits)
            }
            BinaryOp::In => {
                let Value::Object(object) = &right else {
                    return Err(self.throw_error(
                        ErrorKind::TypeError,
                        "Cannot use 'in' operator on a non-object",
                    ));
                };
                let key = self.to_string(&left)?;
                Value::Bool(object.lookup(&key).is_some())
            }
        };
        Ok(result)
    }
}

/// 匿名函数表达式以赋值目标命名（`Foo.prototype.bar = function() {}`）
fn infer_name(decl: &FunctionDecl, function: &Value, name: &str) {
    if decl.name.is_none()
        && let Value::Object(object) = function
    {
        object.borrow_mut().define_hidden("name", Value::string(name));
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> bool {
    if let (Value::String(a), Value::String(b)) = (left, right) {
        return match op {
            BinaryOp::Less => a < b,
            BinaryOp::LessEq => a <= b,
            BinaryOp::Greater => a > b,
            _ => a >= b,
        };
    }
    let (a, b) = (left.to_number(), right.to_number());
    match op {
        BinaryOp::Less => a < b,
        BinaryOp::LessEq => a <= b,
        BinaryOp::Greater => a > b,
        _ => a >= b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::with_script_stack;

    fn eval(source: &str) -> Value {
        Interpreter::new().run(source, "test.js").unwrap()
    }

    fn uncaught(source: &str) -> Exception {
        match Interpreter::new().run(source, "test.js") {
            Err(ScriptError::Uncaught(exception)) => exception,
            other => panic!("Expected uncaught exception, got {:?}", other),
        }
    }

    #[test]
    fn test_arithmetic_and_strings() {
        assert_eq!(eval("1 + 2 * 3"), Value::from(7.0));
        assert_eq!(eval("'a' + 1 + 2"), Value::from("a12"));
        assert_eq!(eval("7 % 4 - -1"), Value::from(4.0));
        assert_eq!(eval("'abc'.length + [1, 2].length"), Value::from(5.0));
    }

    #[test]
    fn test_prototype_based_objects() {
        let source = r#"
            function Calculator() { this.accumulator = 0; }
            function Calculator_add(value) { return this.accumulator += value; }
            Calculator.prototype.add = Calculator_add;
            var calc = new Calculator();
            calc.add(5);
            calc.add(-2);
            calc.accumulator
        "#;
        assert_eq!(eval(source), Value::from(3.0));
    }

    #[test]
    fn test_inheritance_with_call() {
        let source = r#"
            function Base(name) { this.name = name; }
            Base.prototype.greet = function() { return "hi " + this.name; };
            function Derived(name) { Base.call(this, name); }
            Derived.prototype = new Base();
            var d = new Derived("bob");
            d.greet() + (d instanceof Base ? "!" : "?")
        "#;
        assert_eq!(eval(source), Value::from("hi bob!"));
    }

    #[test]
    fn test_closures_and_hoisting() {
        let source = r#"
            var result = later();
            function later() { return counter()() + counter()(); }
            function counter() { var n = 0; return function() { n++; return n; }; }
            result
        "#;
        assert_eq!(eval(source), Value::from(2.0));
    }

    #[test]
    fn test_loops_and_control_flow() {
        let source = r#"
            var total = 0;
            for (var i = 0; i < 10; i++) {
                if (i % 2) continue;
                if (i > 6) break;
                total += i;
            }
            var keys = "";
            for (var k in { a: 1, b: 2 }) keys += k;
            var n = 0;
            do { n++; } while (n < 3);
            total + ":" + keys + ":" + n
        "#;
        assert_eq!(eval(source), Value::from("12:ab:3"));
    }

    #[test]
    fn test_try_catch_finally() {
        let source = r#"
            var log = [];
            function risky() { throw new TypeError("bad"); }
            try { risky(); } catch (e) { log.push(e.name + "/" + e.message); } finally { log.push("done"); }
            try { undefinedFunction(); } catch (e) { log.push(e.name); }
            log.join(",")
        "#;
        assert_eq!(eval(source), Value::from("TypeError/bad,done,ReferenceError"));
    }

    #[test]
    fn test_uncaught_error_carries_trace() {
        let exception = uncaught("function inner() {\n  null.x;\n}\nfunction outer() { inner(); }\nouter();");
        assert_eq!(exception.name, "TypeError");
        assert!(exception.message.contains("Cannot read property 'x'"));
        assert_eq!(exception.trace[0].function, "inner");
        assert_eq!(exception.trace[0].line, 2);
        assert_eq!(exception.trace[1].function, "outer");
        assert_eq!(exception.trace.last().unwrap().function, "<toplevel>");
    }

    #[test]
    fn test_method_names_are_inferred_for_traces() {
        let exception = uncaught("var Box = {};\nBox.open = function() {\n  throw new Error('stuck');\n};\nBox.open();");
        assert_eq!(exception.trace[0].function, "open");
        assert_eq!(exception.trace[0].line, 3);
    }

    #[test]
    fn test_thrown_primitive() {
        let exception = uncaught("throw 'boom'");
        assert_eq!(exception.name, "Error");
        assert_eq!(exception.message, "boom");
    }

    #[test]
    fn test_call_depth_limit() {
        let exception = with_script_stack(|| uncaught("function recurse() { return recurse(); } recurse();"))
            .unwrap();
        assert_eq!(exception.name, "RangeError");
        assert_eq!(exception.trace.len(), MAX_CALL_DEPTH);
    }

    #[test]
    fn test_deep_recursion_within_limit() {
        let source = r#"
            function depth(n) { return n === 0 ? 0 : 1 + depth(n - 1); }
            function fact(n) { return n <= 1 ? 1 : n * fact(n - 1); }
            depth(1500) + ":" + (fact(100) > 9e157)
        "#;
        let result = with_script_stack(|| eval(source).to_display()).unwrap();
        assert_eq!(result, "1500:true");
    }

    #[test]
    fn test_array_growth_is_bounded() {
        let source = r#"
            var log = [];
            var a = [];
            a[4294967294] = 1;
            log.push(a.length, a[4294967294]);
            try { a.length = 1e10; } catch (e) { log.push(e.name); }
            try { new Array(1e10); } catch (e) { log.push(e.name); }
            try { a.length = -1; } catch (e) { log.push(e.name); }
            a.length = 3;
            log.push(a.length);
            log.join(",")
        "#;
        assert_eq!(eval(source), Value::from("0,1,RangeError,RangeError,RangeError,3"));
    }

    #[test]
    fn test_teardown_breaks_reference_cycles() {
        let mut interpreter = Interpreter::new();
        interpreter
            .run(
                "function Node() { this.me = this; }\n\
                 var node = new Node();\n\
                 var counter = (function() { var n = 0; return function() { return n++; }; })();\n\
                 counter();",
                "cycles.js",
            )
            .unwrap();
        let weak = |name: &str| {
            interpreter
                .global(name)
                .and_then(|value| value.as_object().map(ObjectRef::downgrade))
                .unwrap()
        };
        let watched = [weak("Node"), weak("node"), weak("counter")];

        interpreter.teardown();
        drop(interpreter);
        assert!(watched.iter().all(|weak| weak.upgrade().is_none()));
    }

    #[test]
    fn test_bindings_survive_runs_in_order() {
        let mut interpreter = Interpreter::new();
        let before = interpreter.global_bindings().len();
        interpreter.run("var first = 1;", "a.js").unwrap();
        interpreter.run("var second = first + 1;", "b.js").unwrap();
        assert_eq!(interpreter.global("second"), Some(Value::from(2.0)));
        let names: Vec<String> = interpreter.global_bindings()[before..]
            .iter()
            .map(|(name, _)| name.clone())
            .collect();
        assert_eq!(names, vec!["first", "second"]);
    }

    #[test]
    fn test_typeof_undeclared_and_sloppy_globals() {
        assert_eq!(eval("typeof missing"), Value::from("undefined"));
        assert_eq!(
            eval("function f() { leaked = 3; } f(); leaked"),
            Value::from(3.0)
        );
    }
}
