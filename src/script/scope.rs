use crate::script::value::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub type Env = Rc<RefCell<Scope>>;

/// 词法作用域
///
/// 绑定按声明顺序保存，全局作用域的顺序就是测试发现的顺序。
pub struct Scope {
    bindings: Vec<(Rc<str>, Value)>,
    index: HashMap<Rc<str>, usize>,
    parent: Option<Env>,
    /// 函数作用域（或全局作用域），`var` 声明落在这里
    function: Option<FunctionFrame>,
}

pub struct FunctionFrame {
    pub this: Value,
}

impl Scope {
    pub fn global() -> Env {
        Rc::new(RefCell::new(Self {
            bindings: Vec::new(),
            index: HashMap::new(),
            parent: None,
            function: Some(FunctionFrame {
                this: Value::Undefined,
            }),
        }))
    }

    pub fn function(parent: Env, this: Value) -> Env {
        Rc::new(RefCell::new(Self {
            bindings: Vec::new(),
            index: HashMap::new(),
            parent: Some(parent),
            function: Some(FunctionFrame { this }),
        }))
    }

    pub fn block(parent: Env) -> Env {
        Rc::new(RefCell::new(Self {
            bindings: Vec::new(),
            index: HashMap::new(),
            parent: Some(parent),
            function: None,
        }))
    }

    /// 在本作用域声明（已存在则覆盖）
    pub fn declare(&mut self, name: &str, value: Value) {
        match self.index.get(name) {
            Some(&slot) => self.bindings[slot].1 = value,
            None => {
                let name: Rc<str> = Rc::from(name);
                self.index.insert(name.clone(), self.bindings.len());
                self.bindings.push((name, value));
            }
        }
    }

    pub fn has_own(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get_own(&self, name: &str) -> Option<Value> {
        self.index
            .get(name)
            .map(|&slot| self.bindings[slot].1.clone())
    }

    /// 清空作用域，返回其中的值与父作用域
    pub fn release(&mut self) -> (Vec<Value>, Option<Env>) {
        self.index.clear();
        let mut values: Vec<Value> = self.bindings.drain(..).map(|(_, value)| value).collect();
        values.extend(self.function.take().map(|frame| frame.this));
        (values, self.parent.take())
    }

    pub fn is_function_scope(&self) -> bool {
        self.function.is_some()
    }

    pub fn parent(&self) -> Option<Env> {
        self.parent.clone()
    }

    pub fn bindings(&self) -> &[(Rc<str>, Value)] {
        &self.bindings
    }
}

pub fn lookup(env: &Env, name: &str) -> Option<Value> {
    let mut current = Some(env.clone());
    while let Some(scope) = current {
        let scope = scope.borrow();
        if let Some(value) = scope.get_own(name) {
            return Some(value);
        }
        current = scope.parent.clone();
    }
    None
}

/// 给已存在的绑定赋值，找不到时返回 false
pub fn assign(env: &Env, name: &str, value: Value) -> bool {
    let mut current = Some(env.clone());
    while let Some(scope) = current {
        if scope.borrow().has_own(name) {
            scope.borrow_mut().declare(name, value);
            return true;
        }
        current = scope.borrow().parent.clone();
    }
    false
}

/// 最近的函数作用域（`var` 与函数声明的落点）
pub fn function_scope(env: &Env) -> Env {
    let mut current = env.clone();
    loop {
        let parent = {
            let scope = current.borrow();
            if scope.is_function_scope() {
                None
            } else {
                scope.parent.clone()
            }
        };
        match parent {
            Some(parent) => current = parent,
            None => return current,
        }
    }
}

pub fn this_value(env: &Env) -> Value {
    let scope = function_scope(env);
    let scope = scope.borrow();
    scope
        .function
        .as_ref()
        .map(|frame| frame.this.clone())
        .unwrap_or_default()
}
