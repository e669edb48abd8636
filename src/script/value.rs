//! 运行时值
//!
//! - 原始值（undefined、null、布尔、数字、字符串）按值复制
//! - 对象通过 `ObjectRef` 共享，带原型链和按插入顺序排列的属性
//! - 函数是带 `Callable` 的对象：脚本闭包或原生函数

use crate::script::ast::FunctionDecl;
use crate::script::interpreter::{Exec, Interpreter};
use crate::script::scope::Env;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

/// 原生函数签名：解释器、this、参数、是否通过 `new` 调用
pub type NativeFn = fn(&mut Interpreter, &Value, &[Value], bool) -> Exec<Value>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(ObjectRef),
}

#[derive(Clone)]
pub enum Callable {
    Script { decl: Rc<FunctionDecl>, scope: Env },
    Native { name: &'static str, call: NativeFn },
}

pub enum ObjectClass {
    Plain,
    Array(Vec<Value>),
    Function(Callable),
    Error,
}

pub struct Object {
    pub proto: Option<ObjectRef>,
    pub class: ObjectClass,
    props: Vec<Property>,
}

struct Property {
    key: Rc<str>,
    value: Value,
    enumerable: bool,
}

#[derive(Clone)]
pub struct ObjectRef(Rc<RefCell<Object>>);

/// 数组连续存储的长度上限，更大的下标按普通属性保存
pub const MAX_DENSE_LENGTH: usize = 1 << 20;

/// 可作为数组 `length` 的值
pub fn valid_array_length(len: f64) -> Option<usize> {
    (len >= 0.0 && len.fract() == 0.0 && len <= MAX_DENSE_LENGTH as f64).then_some(len as usize)
}

impl Object {
    pub fn new(class: ObjectClass, proto: Option<ObjectRef>) -> Self {
        Self {
            proto,
            class,
            props: Vec::new(),
        }
    }

    pub fn get_own(&self, key: &str) -> Option<Value> {
        if let ObjectClass::Array(items) = &self.class {
            if key == "length" {
                return Some(Value::Number(items.len() as f64));
            }
            if let Some(value) = array_index(key).and_then(|index| items.get(index)) {
                return Some(value.clone());
            }
        }
        self.props
            .iter()
            .find(|prop| prop.key.as_ref() == key)
            .map(|prop| prop.value.clone())
    }

    pub fn has_own(&self, key: &str) -> bool {
        self.get_own(key).is_some()
    }

    pub fn set_own(&mut self, key: &str, value: Value) {
        if let ObjectClass::Array(items) = &mut self.class {
            if key == "length" {
                // 非法长度由解释器在赋值前拒绝
                if let Some(len) = valid_array_length(value.to_number()) {
                    items.resize(len, Value::Undefined);
                }
                return;
            }
            if let Some(index) = array_index(key).filter(|&index| index < MAX_DENSE_LENGTH) {
                if index >= items.len() {
                    items.resize(index + 1, Value::Undefined);
                }
                items[index] = value;
                return;
            }
        }
        match self.props.iter_mut().find(|prop| prop.key.as_ref() == key) {
            Some(prop) => prop.value = value,
            None => self.props.push(Property {
                key: Rc::from(key),
                value,
                enumerable: true,
            }),
        }
    }

    /// 定义不可枚举属性（内置方法、`prototype`、`constructor` 等）
    pub fn define_hidden(&mut self, key: &str, value: Value) {
        self.set_own(key, value);
        if let Some(prop) = self.props.iter_mut().find(|prop| prop.key.as_ref() == key) {
            prop.enumerable = false;
        }
    }

    pub fn delete(&mut self, key: &str) -> bool {
        if let ObjectClass::Array(items) = &mut self.class
            && let Some(slot) = array_index(key).and_then(|index| items.get_mut(index))
        {
            *slot = Value::Undefined;
            return true;
        }
        self.props.retain(|prop| prop.key.as_ref() != key);
        true
    }

    /// 取出全部引用并清空对象，返回属性值、原型与闭包作用域
    pub fn release(&mut self) -> (Vec<Value>, Option<Env>) {
        let mut values: Vec<Value> = self.props.drain(..).map(|prop| prop.value).collect();
        values.extend(self.proto.take().map(Value::Object));
        let scope = match std::mem::replace(&mut self.class, ObjectClass::Plain) {
            ObjectClass::Array(items) => {
                values.extend(items);
                None
            }
            ObjectClass::Function(Callable::Script { scope, .. }) => Some(scope),
            _ => None,
        };
        (values, scope)
    }

    /// 自有可枚举属性名，数组下标在前
    pub fn own_keys(&self) -> Vec<Rc<str>> {
        let mut keys: Vec<Rc<str>> = match &self.class {
            ObjectClass::Array(items) => (0..items.len()).map(|i| Rc::from(i.to_string())).collect(),
            _ => Vec::new(),
        };
        keys.extend(
            self.props
                .iter()
                .filter(|prop| prop.enumerable)
                .map(|prop| prop.key.clone()),
        );
        keys
    }
}

fn array_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    key.parse::<usize>().ok()
}

impl ObjectRef {
    pub fn new(object: Object) -> Self {
        Self(Rc::new(RefCell::new(object)))
    }

    pub fn borrow(&self) -> Ref<'_, Object> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Object> {
        self.0.borrow_mut()
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// 对象身份，用于遍历时去重
    pub fn addr(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }

    #[cfg(test)]
    pub(crate) fn downgrade(&self) -> std::rc::Weak<RefCell<Object>> {
        Rc::downgrade(&self.0)
    }

    /// 沿原型链查找属性
    pub fn lookup(&self, key: &str) -> Option<Value> {
        let mut current = Some(self.clone());
        while let Some(object) = current {
            let object = object.borrow();
            if let Some(value) = object.get_own(key) {
                return Some(value);
            }
            current = object.proto.clone();
        }
        None
    }

    pub fn callable(&self) -> Option<Callable> {
        match &self.borrow().class {
            ObjectClass::Function(callable) => Some(callable.clone()),
            _ => None,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self.borrow().class, ObjectClass::Array(_))
    }

    /// 数组元素快照，非数组返回 None
    pub fn array_items(&self) -> Option<Vec<Value>> {
        match &self.borrow().class {
            ObjectClass::Array(items) => Some(items.clone()),
            _ => None,
        }
    }

    /// 判断 `proto` 是否出现在本对象的原型链上
    pub fn inherits_from(&self, proto: &ObjectRef) -> bool {
        let mut current = self.borrow().proto.clone();
        while let Some(object) = current {
            if object.ptr_eq(proto) {
                return true;
            }
            current = object.borrow().proto.clone();
        }
        false
    }

    /// 沿原型链收集可枚举属性名（自有属性在前，去重）
    pub fn enumerable_keys(&self) -> Vec<Rc<str>> {
        let mut keys: Vec<Rc<str>> = Vec::new();
        let mut current = Some(self.clone());
        while let Some(object) = current {
            let object = object.borrow();
            for key in object.own_keys() {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
            current = object.proto.clone();
        }
        keys
    }
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Rc::from(s.as_ref()))
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn is_callable(&self) -> bool {
        self.as_object().is_some_and(|o| o.callable().is_some())
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// 纯数据查找（不调用脚本代码），原始值返回 None
    pub fn lookup(&self, key: &str) -> Option<Value> {
        self.as_object().and_then(|o| o.lookup(key))
    }

    /// 读取字符串属性，缺失或非字符串时返回 None
    pub fn lookup_str(&self, key: &str) -> Option<String> {
        match self.lookup(key) {
            Some(Value::String(s)) => Some(s.to_string()),
            _ => None,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(o) => {
                if o.callable().is_some() {
                    "function"
                } else {
                    "object"
                }
            }
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(s),
            Value::Object(o) => {
                if let ObjectClass::Array(items) = &o.borrow().class {
                    match items.as_slice() {
                        [] => return 0.0,
                        [single] => return single.to_number(),
                        _ => {}
                    }
                }
                f64::NAN
            }
        }
    }

    /// 不执行脚本代码的字符串转换
    pub fn to_display(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::String(s) => s.to_string(),
            Value::Object(o) => object_to_display(o),
        }
    }

    /// `===`
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// `==`，对象仅按引用比较
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::Object(_), Value::Object(_)) => self.strict_equals(other),
            (Value::Object(_), _) => Value::string(self.to_display()).loose_equals(other),
            (_, Value::Object(_)) => self.loose_equals(&Value::string(other.to_display())),
            (Value::String(a), Value::String(b)) => a == b,
            _ => self.to_number() == other.to_number(),
        }
    }
}

fn object_to_display(object: &ObjectRef) -> String {
    {
        let borrowed = object.borrow();
        match &borrowed.class {
            ObjectClass::Array(items) => {
                return items
                    .iter()
                    .map(|item| {
                        if item.is_nullish() {
                            String::new()
                        } else {
                            item.to_display()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(",");
            }
            ObjectClass::Function(callable) => {
                let name = match callable {
                    Callable::Script { decl, .. } => decl.name.as_deref().unwrap_or("").to_string(),
                    Callable::Native { name, .. } => name.to_string(),
                };
                return format!("function {}() {{ [code] }}", name);
            }
            ObjectClass::Error | ObjectClass::Plain => {}
        }
    }

    match (object.lookup("name"), object.lookup("message")) {
        (Some(name), Some(message)) if !name.is_nullish() => {
            let message = message.to_display();
            if message.is_empty() {
                name.to_display()
            } else {
                format!("{}: {}", name.to_display(), message)
            }
        }
        _ => "[object Object]".to_string(),
    }
}

pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16)
            .map(|n| n as f64)
            .unwrap_or(f64::NAN);
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ if trimmed.chars().any(|c| c.is_alphabetic() && c != 'e' && c != 'E') => f64::NAN,
        _ => trimmed.parse::<f64>().unwrap_or(f64::NAN),
    }
}

/// ECMAScript 风格的数字格式化：整数不带小数部分
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s),
            other => write!(f, "{}", other.to_display()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_equals(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_to_string() {
        assert_eq!(number_to_string(5.0), "5");
        assert_eq!(number_to_string(-5.0), "-5");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(0.25), "0.25");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_string_to_number() {
        assert_eq!(string_to_number(" 42 "), 42.0);
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x10"), 16.0);
        assert!(string_to_number("abc").is_nan());
        assert_eq!(string_to_number("1e3"), 1000.0);
    }

    #[test]
    fn test_equality() {
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.strict_equals(&Value::Undefined));
        assert!(Value::from("5").loose_equals(&Value::from(5.0)));
        assert!(!Value::from("5").strict_equals(&Value::from(5.0)));
        assert!(Value::from(true).loose_equals(&Value::from(1.0)));
        assert!(!Value::from(f64::NAN).strict_equals(&Value::from(f64::NAN)));
    }

    #[test]
    fn test_array_properties_and_keys() {
        let array = ObjectRef::new(Object::new(ObjectClass::Array(Vec::new()), None));
        array.borrow_mut().set_own("2", Value::from("c"));
        array.borrow_mut().set_own("extra", Value::from(1.0));
        assert_eq!(array.lookup("length"), Some(Value::Number(3.0)));
        let keys: Vec<String> = array
            .borrow()
            .own_keys()
            .iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(keys, vec!["0", "1", "2", "extra"]);
        assert_eq!(Value::Object(array).to_display(), ",,c");
    }

    #[test]
    fn test_far_index_is_stored_sparsely() {
        let array = ObjectRef::new(Object::new(ObjectClass::Array(Vec::new()), None));
        array.borrow_mut().set_own("4294967294", Value::from(1.0));
        assert_eq!(array.lookup("length"), Some(Value::Number(0.0)));
        assert_eq!(array.lookup("4294967294"), Some(Value::from(1.0)));
        assert!(array.array_items().unwrap().is_empty());

        array.borrow_mut().set_own("length", Value::from(1e10));
        assert_eq!(array.lookup("length"), Some(Value::Number(0.0)));
        assert!(array.borrow_mut().delete("4294967294"));
        assert_eq!(array.lookup("4294967294"), None);
    }

    #[test]
    fn test_prototype_lookup_and_insertion_order() {
        let proto = ObjectRef::new(Object::new(ObjectClass::Plain, None));
        proto.borrow_mut().set_own("kind", Value::from("case"));
        let child = ObjectRef::new(Object::new(ObjectClass::Plain, Some(proto.clone())));
        child.borrow_mut().set_own("b", Value::from(1.0));
        child.borrow_mut().set_own("a", Value::from(2.0));
        assert_eq!(child.lookup("kind"), Some(Value::from("case")));
        assert!(child.inherits_from(&proto));
        let keys: Vec<String> = child
            .enumerable_keys()
            .iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(keys, vec!["b", "a", "kind"]);
    }

    #[test]
    fn test_hidden_properties_are_not_enumerated() {
        let object = ObjectRef::new(Object::new(ObjectClass::Plain, None));
        object.borrow_mut().define_hidden("constructor", Value::Null);
        object.borrow_mut().set_own("visible", Value::from(1.0));
        object.borrow_mut().set_own("constructor", Value::from(2.0));
        let keys: Vec<String> = object
            .enumerable_keys()
            .iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(keys, vec!["visible"]);
        assert_eq!(object.lookup("constructor"), Some(Value::from(2.0)));
    }
}
