//! 内置全局对象与原型方法

use crate::script::interpreter::{ErrorKind, Exec, Interpreter};
use crate::script::value::{NativeFn, ObjectClass, ObjectRef, Value, valid_array_length};

fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or_default()
}

fn define(interpreter: &Interpreter, target: &ObjectRef, name: &'static str, call: NativeFn) {
    let function = interpreter.new_native(name, call);
    target
        .borrow_mut()
        .define_hidden(name, Value::Object(function));
}

/// 构造函数与原型互相关联并注册为全局绑定
fn constructor(
    interpreter: &mut Interpreter,
    name: &'static str,
    call: NativeFn,
    proto: &ObjectRef,
) -> ObjectRef {
    let function = interpreter.new_native(name, call);
    function
        .borrow_mut()
        .define_hidden("prototype", Value::Object(proto.clone()));
    proto
        .borrow_mut()
        .define_hidden("constructor", Value::Object(function.clone()));
    interpreter.define_global(name, Value::Object(function.clone()));
    function
}

pub fn install(interpreter: &mut Interpreter) {
    interpreter.define_global("undefined", Value::Undefined);
    interpreter.define_global("NaN", Value::Number(f64::NAN));
    interpreter.define_global("Infinity", Value::Number(f64::INFINITY));

    let intrinsics = interpreter.intrinsics();
    let object_proto = intrinsics.object_proto.clone();
    let function_proto = intrinsics.function_proto.clone();
    let array_proto = intrinsics.array_proto.clone();
    let string_proto = intrinsics.string_proto.clone();
    let number_proto = intrinsics.number_proto.clone();
    let boolean_proto = intrinsics.boolean_proto.clone();

    define(interpreter, &object_proto, "hasOwnProperty", object_has_own_property);
    define(interpreter, &object_proto, "toString", object_to_string);
    constructor(interpreter, "Object", object_ctor, &object_proto);

    define(interpreter, &function_proto, "call", function_call);
    define(interpreter, &function_proto, "apply", function_apply);
    define(interpreter, &function_proto, "toString", function_to_string);
    constructor(interpreter, "Function", function_ctor, &function_proto);

    define(interpreter, &array_proto, "push", array_push);
    define(interpreter, &array_proto, "pop", array_pop);
    define(interpreter, &array_proto, "join", array_join);
    define(interpreter, &array_proto, "slice", array_slice);
    define(interpreter, &array_proto, "indexOf", array_index_of);
    define(interpreter, &array_proto, "toString", array_to_string);
    let array = constructor(interpreter, "Array", array_ctor, &array_proto);
    define(interpreter, &array, "isArray", array_is_array);

    define(interpreter, &string_proto, "charAt", string_char_at);
    define(interpreter, &string_proto, "indexOf", string_index_of);
    define(interpreter, &string_proto, "substring", string_substring);
    define(interpreter, &string_proto, "toUpperCase", string_to_upper_case);
    define(interpreter, &string_proto, "toLowerCase", string_to_lower_case);
    define(interpreter, &string_proto, "split", string_split);
    define(interpreter, &string_proto, "toString", primitive_to_string);
    constructor(interpreter, "String", string_ctor, &string_proto);

    define(interpreter, &number_proto, "toString", primitive_to_string);
    define(interpreter, &number_proto, "toFixed", number_to_fixed);
    constructor(interpreter, "Number", number_ctor, &number_proto);

    define(interpreter, &boolean_proto, "toString", primitive_to_string);
    constructor(interpreter, "Boolean", boolean_ctor, &boolean_proto);

    install_errors(interpreter);

    let math = interpreter.new_object();
    define(interpreter, &math, "abs", math_abs);
    define(interpreter, &math, "floor", math_floor);
    define(interpreter, &math, "ceil", math_ceil);
    define(interpreter, &math, "round", math_round);
    define(interpreter, &math, "min", math_min);
    define(interpreter, &math, "max", math_max);
    define(interpreter, &math, "pow", math_pow);
    define(interpreter, &math, "sqrt", math_sqrt);
    math.borrow_mut()
        .define_hidden("PI", Value::Number(std::f64::consts::PI));
    interpreter.define_global("Math", Value::Object(math));

    let print = interpreter.new_native("print", global_print);
    interpreter.define_global("print", Value::Object(print));
    let is_nan = interpreter.new_native("isNaN", global_is_nan);
    interpreter.define_global("isNaN", Value::Object(is_nan));
    let parse_int = interpreter.new_native("parseInt", global_parse_int);
    interpreter.define_global("parseInt", Value::Object(parse_int));
    let parse_float = interpreter.new_native("parseFloat", global_parse_float);
    interpreter.define_global("parseFloat", Value::Object(parse_float));
}

fn install_errors(interpreter: &mut Interpreter) {
    let kinds: [(ErrorKind, NativeFn); 4] = [
        (ErrorKind::Error, error_ctor),
        (ErrorKind::TypeError, type_error_ctor),
        (ErrorKind::ReferenceError, reference_error_ctor),
        (ErrorKind::RangeError, range_error_ctor),
    ];
    for (kind, call) in kinds {
        let proto = interpreter.intrinsics().error_proto_for(kind);
        {
            let mut proto = proto.borrow_mut();
            proto.define_hidden("name", Value::string(kind.name()));
            if kind == ErrorKind::Error {
                proto.define_hidden("message", Value::string(""));
            }
        }
        if kind == ErrorKind::Error {
            define(interpreter, &proto, "toString", error_to_string);
        }
        constructor(interpreter, kind.name(), call, &proto);
    }
}

// === Object ===

fn object_ctor(interpreter: &mut Interpreter, this: &Value, args: &[Value], constructing: bool) -> Exec<Value> {
    match arg(args, 0) {
        value @ Value::Object(_) => Ok(value),
        _ if constructing => Ok(this.clone()),
        _ => Ok(Value::Object(interpreter.new_object())),
    }
}

fn object_has_own_property(interpreter: &mut Interpreter, this: &Value, args: &[Value], _: bool) -> Exec<Value> {
    let key = interpreter.to_string(&arg(args, 0))?;
    Ok(Value::Bool(
        this.as_object().is_some_and(|o| o.borrow().has_own(&key)),
    ))
}

fn object_to_string(_: &mut Interpreter, this: &Value, _: &[Value], _: bool) -> Exec<Value> {
    let tag = match this {
        Value::Undefined => "Undefined",
        Value::Null => "Null",
        Value::Object(o) if o.is_array() => "Array",
        Value::Object(o) if o.callable().is_some() => "Function",
        Value::Object(o) if matches!(o.borrow().class, ObjectClass::Error) => "Error",
        _ => "Object",
    };
    Ok(Value::string(format!("[object {}]", tag)))
}

// === Function ===

fn function_ctor(interpreter: &mut Interpreter, _: &Value, _: &[Value], _: bool) -> Exec<Value> {
    Err(interpreter.throw_error(
        ErrorKind::Error,
        "Function constructor is not supported",
    ))
}

fn function_call(interpreter: &mut Interpreter, this: &Value, args: &[Value], _: bool) -> Exec<Value> {
    let receiver = arg(args, 0);
    let rest = args.get(1..).unwrap_or_default();
    interpreter.call(this, receiver, rest)
}

fn function_apply(interpreter: &mut Interpreter, this: &Value, args: &[Value], _: bool) -> Exec<Value> {
    let receiver = arg(args, 0);
    let list = match arg(args, 1) {
        Value::Undefined | Value::Null => Vec::new(),
        Value::Object(o) => {
            let object = o.borrow();
            match &object.class {
                ObjectClass::Array(items) => items.clone(),
                _ => Vec::new(),
            }
        }
        _ => {
            return Err(interpreter.throw_error(
                ErrorKind::TypeError,
                "second argument to Function.prototype.apply must be an array",
            ));
        }
    };
    interpreter.call(this, receiver, &list)
}

fn function_to_string(_: &mut Interpreter, this: &Value, _: &[Value], _: bool) -> Exec<Value> {
    Ok(Value::string(this.to_display()))
}

// === Array ===

fn array_ctor(interpreter: &mut Interpreter, _: &Value, args: &[Value], _: bool) -> Exec<Value> {
    if let [Value::Number(len)] = args {
        let Some(len) = valid_array_length(*len) else {
            return Err(interpreter.throw_error(ErrorKind::RangeError, "Invalid array length"));
        };
        return Ok(interpreter.new_array(vec![Value::Undefined; len]));
    }
    Ok(interpreter.new_array(args.to_vec()))
}

fn array_is_array(_: &mut Interpreter, _: &Value, args: &[Value], _: bool) -> Exec<Value> {
    Ok(Value::Bool(
        arg(args, 0).as_object().is_some_and(|o| o.is_array()),
    ))
}

/// 取得 this 对应的数组元素副本
fn array_items(interpreter: &Interpreter, this: &Value) -> Exec<Vec<Value>> {
    if let Value::Object(o) = this
        && let ObjectClass::Array(items) = &o.borrow().class
    {
        return Ok(items.clone());
    }
    Err(interpreter.throw_error(ErrorKind::TypeError, "receiver is not an array"))
}

fn array_push(interpreter: &mut Interpreter, this: &Value, args: &[Value], _: bool) -> Exec<Value> {
    if let Value::Object(o) = this
        && let ObjectClass::Array(items) = &mut o.borrow_mut().class
    {
        items.extend(args.iter().cloned());
        return Ok(Value::Number(items.len() as f64));
    }
    Err(interpreter.throw_error(ErrorKind::TypeError, "receiver is not an array"))
}

fn array_pop(interpreter: &mut Interpreter, this: &Value, _: &[Value], _: bool) -> Exec<Value> {
    if let Value::Object(o) = this
        && let ObjectClass::Array(items) = &mut o.borrow_mut().class
    {
        return Ok(items.pop().unwrap_or_default());
    }
    Err(interpreter.throw_error(ErrorKind::TypeError, "receiver is not an array"))
}

fn array_join(interpreter: &mut Interpreter, this: &Value, args: &[Value], _: bool) -> Exec<Value> {
    let items = array_items(interpreter, this)?;
    let separator = match arg(args, 0) {
        Value::Undefined => ",".to_string(),
        other => interpreter.to_string(&other)?,
    };
    let mut parts = Vec::with_capacity(items.len());
    for item in &items {
        parts.push(if item.is_nullish() {
            String::new()
        } else {
            interpreter.to_string(item)?
        });
    }
    Ok(Value::string(parts.join(&separator)))
}

fn array_to_string(interpreter: &mut Interpreter, this: &Value, _: &[Value], _: bool) -> Exec<Value> {
    array_join(interpreter, this, &[], false)
}

/// 负数下标从末尾计算，结果截断到 [0, len]
fn relative_index(value: &Value, len: usize, default: usize) -> usize {
    if matches!(value, Value::Undefined) {
        return default;
    }
    let n = value.to_number();
    if n.is_nan() {
        return 0;
    }
    let n = n.trunc();
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    }
}

fn array_slice(interpreter: &mut Interpreter, this: &Value, args: &[Value], _: bool) -> Exec<Value> {
    let items = array_items(interpreter, this)?;
    let start = relative_index(&arg(args, 0), items.len(), 0);
    let end = relative_index(&arg(args, 1), items.len(), items.len());
    let slice = if start < end {
        items[start..end].to_vec()
    } else {
        Vec::new()
    };
    Ok(interpreter.new_array(slice))
}

fn array_index_of(interpreter: &mut Interpreter, this: &Value, args: &[Value], _: bool) -> Exec<Value> {
    let items = array_items(interpreter, this)?;
    let needle = arg(args, 0);
    let position = items.iter().position(|item| item.strict_equals(&needle));
    Ok(Value::Number(position.map_or(-1.0, |p| p as f64)))
}

// === String / Number / Boolean ===

fn string_ctor(interpreter: &mut Interpreter, _: &Value, args: &[Value], _: bool) -> Exec<Value> {
    if args.is_empty() {
        return Ok(Value::string(""));
    }
    Ok(Value::string(interpreter.to_string(&args[0])?))
}

fn number_ctor(interpreter: &mut Interpreter, _: &Value, args: &[Value], _: bool) -> Exec<Value> {
    if args.is_empty() {
        return Ok(Value::Number(0.0));
    }
    let value = match &args[0] {
        object @ Value::Object(_) => Value::string(interpreter.to_string(object)?),
        other => other.clone(),
    };
    Ok(Value::Number(value.to_number()))
}

fn boolean_ctor(_: &mut Interpreter, _: &Value, args: &[Value], _: bool) -> Exec<Value> {
    Ok(Value::Bool(arg(args, 0).truthy()))
}

fn primitive_to_string(_: &mut Interpreter, this: &Value, _: &[Value], _: bool) -> Exec<Value> {
    Ok(Value::string(this.to_display()))
}

fn number_to_fixed(_: &mut Interpreter, this: &Value, args: &[Value], _: bool) -> Exec<Value> {
    let digits = arg(args, 0).to_number();
    let digits = if digits.is_nan() { 0 } else { digits.clamp(0.0, 20.0) as usize };
    Ok(Value::string(format!("{:.*}", digits, this.to_number())))
}

fn this_string(interpreter: &mut Interpreter, this: &Value) -> Exec<String> {
    interpreter.to_string(this)
}

fn string_char_at(interpreter: &mut Interpreter, this: &Value, args: &[Value], _: bool) -> Exec<Value> {
    let s = this_string(interpreter, this)?;
    let index = arg(args, 0).to_number();
    let index = if index.is_nan() { 0.0 } else { index.trunc() };
    let c = if index < 0.0 {
        None
    } else {
        s.chars().nth(index as usize)
    };
    Ok(Value::string(c.map(String::from).unwrap_or_default()))
}

fn string_index_of(interpreter: &mut Interpreter, this: &Value, args: &[Value], _: bool) -> Exec<Value> {
    let s = this_string(interpreter, this)?;
    let needle = interpreter.to_string(&arg(args, 0))?;
    let position = s
        .find(&needle)
        .map(|byte| s[..byte].chars().count() as f64);
    Ok(Value::Number(position.unwrap_or(-1.0)))
}

fn string_substring(interpreter: &mut Interpreter, this: &Value, args: &[Value], _: bool) -> Exec<Value> {
    let chars: Vec<char> = this_string(interpreter, this)?.chars().collect();
    let clamp = |value: &Value, default: usize| {
        if matches!(value, Value::Undefined) {
            return default;
        }
        let n = value.to_number();
        if n.is_nan() || n < 0.0 {
            0
        } else {
            (n.trunc() as usize).min(chars.len())
        }
    };
    let start = clamp(&arg(args, 0), 0);
    let end = clamp(&arg(args, 1), chars.len());
    let (start, end) = if start > end { (end, start) } else { (start, end) };
    Ok(Value::string(chars[start..end].iter().collect::<String>()))
}

fn string_to_upper_case(interpreter: &mut Interpreter, this: &Value, _: &[Value], _: bool) -> Exec<Value> {
    Ok(Value::string(this_string(interpreter, this)?.to_uppercase()))
}

fn string_to_lower_case(interpreter: &mut Interpreter, this: &Value, _: &[Value], _: bool) -> Exec<Value> {
    Ok(Value::string(this_string(interpreter, this)?.to_lowercase()))
}

fn string_split(interpreter: &mut Interpreter, this: &Value, args: &[Value], _: bool) -> Exec<Value> {
    let s = this_string(interpreter, this)?;
    let parts: Vec<Value> = match arg(args, 0) {
        Value::Undefined => vec![Value::string(&s)],
        separator => {
            let separator = interpreter.to_string(&separator)?;
            if separator.is_empty() {
                s.chars().map(|c| Value::string(c.to_string())).collect()
            } else {
                s.split(separator.as_str()).map(Value::string).collect()
            }
        }
    };
    Ok(interpreter.new_array(parts))
}

// === Error ===

fn construct_error(
    interpreter: &mut Interpreter,
    kind: ErrorKind,
    this: &Value,
    args: &[Value],
    constructing: bool,
) -> Exec<Value> {
    let target = match this {
        Value::Object(_) if constructing => this.clone(),
        _ => interpreter.make_error(kind, ""),
    };
    let message = arg(args, 0);
    if !matches!(message, Value::Undefined) {
        let message = interpreter.to_string(&message)?;
        interpreter.put(&target, "message", Value::string(message))?;
    }
    Ok(target)
}

fn error_ctor(interpreter: &mut Interpreter, this: &Value, args: &[Value], constructing: bool) -> Exec<Value> {
    construct_error(interpreter, ErrorKind::Error, this, args, constructing)
}

fn type_error_ctor(interpreter: &mut Interpreter, this: &Value, args: &[Value], constructing: bool) -> Exec<Value> {
    construct_error(interpreter, ErrorKind::TypeError, this, args, constructing)
}

fn reference_error_ctor(interpreter: &mut Interpreter, this: &Value, args: &[Value], constructing: bool) -> Exec<Value> {
    construct_error(interpreter, ErrorKind::ReferenceError, this, args, constructing)
}

fn range_error_ctor(interpreter: &mut Interpreter, this: &Value, args: &[Value], constructing: bool) -> Exec<Value> {
    construct_error(interpreter, ErrorKind::RangeError, this, args, constructing)
}

fn error_to_string(interpreter: &mut Interpreter, this: &Value, _: &[Value], _: bool) -> Exec<Value> {
    let name = match interpreter.get(this, "name")? {
        Value::Undefined => "Error".to_string(),
        other => interpreter.to_string(&other)?,
    };
    let message = match interpreter.get(this, "message")? {
        Value::Undefined => String::new(),
        other => interpreter.to_string(&other)?,
    };
    Ok(Value::string(match (name.is_empty(), message.is_empty()) {
        (_, true) => name,
        (true, false) => message,
        (false, false) => format!("{}: {}", name, message),
    }))
}

// === Math ===

fn math_unary(args: &[Value], op: fn(f64) -> f64) -> Exec<Value> {
    Ok(Value::Number(op(arg(args, 0).to_number())))
}

fn math_abs(_: &mut Interpreter, _: &Value, args: &[Value], _: bool) -> Exec<Value> {
    math_unary(args, f64::abs)
}

fn math_floor(_: &mut Interpreter, _: &Value, args: &[Value], _: bool) -> Exec<Value> {
    math_unary(args, f64::floor)
}

fn math_ceil(_: &mut Interpreter, _: &Value, args: &[Value], _: bool) -> Exec<Value> {
    math_unary(args, f64::ceil)
}

fn math_round(_: &mut Interpreter, _: &Value, args: &[Value], _: bool) -> Exec<Value> {
    // 0.5 向正无穷取整
    math_unary(args, |n| (n + 0.5).floor())
}

fn math_sqrt(_: &mut Interpreter, _: &Value, args: &[Value], _: bool) -> Exec<Value> {
    math_unary(args, f64::sqrt)
}

fn math_pow(_: &mut Interpreter, _: &Value, args: &[Value], _: bool) -> Exec<Value> {
    Ok(Value::Number(
        arg(args, 0).to_number().powf(arg(args, 1).to_number()),
    ))
}

fn math_min(_: &mut Interpreter, _: &Value, args: &[Value], _: bool) -> Exec<Value> {
    let mut result = f64::INFINITY;
    for value in args {
        let n = value.to_number();
        if n.is_nan() {
            return Ok(Value::Number(f64::NAN));
        }
        result = result.min(n);
    }
    Ok(Value::Number(result))
}

fn math_max(_: &mut Interpreter, _: &Value, args: &[Value], _: bool) -> Exec<Value> {
    let mut result = f64::NEG_INFINITY;
    for value in args {
        let n = value.to_number();
        if n.is_nan() {
            return Ok(Value::Number(f64::NAN));
        }
        result = result.max(n);
    }
    Ok(Value::Number(result))
}

// === 全局函数 ===

fn global_print(interpreter: &mut Interpreter, _: &Value, args: &[Value], _: bool) -> Exec<Value> {
    let mut parts = Vec::with_capacity(args.len());
    for value in args {
        parts.push(interpreter.to_string(value)?);
    }
    interpreter.push_output(parts.join(" "));
    Ok(Value::Undefined)
}

fn global_is_nan(_: &mut Interpreter, _: &Value, args: &[Value], _: bool) -> Exec<Value> {
    Ok(Value::Bool(arg(args, 0).to_number().is_nan()))
}

fn global_parse_int(interpreter: &mut Interpreter, _: &Value, args: &[Value], _: bool) -> Exec<Value> {
    let text = interpreter.to_string(&arg(args, 0))?;
    let radix = match arg(args, 1) {
        Value::Undefined => 10,
        other => other.to_number() as u32,
    };
    Ok(Value::Number(parse_int(&text, radix)))
}

fn parse_int(text: &str, radix: u32) -> f64 {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (radix, digits) = match digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        Some(hex) if radix == 16 || radix == 10 => (16, hex),
        _ => (radix, digits),
    };
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let mut result: Option<f64> = None;
    for c in digits.chars() {
        match c.to_digit(radix) {
            Some(d) => result = Some(result.unwrap_or(0.0) * f64::from(radix) + f64::from(d)),
            None => break,
        }
    }
    match result {
        Some(n) if negative => -n,
        Some(n) => n,
        None => f64::NAN,
    }
}

fn global_parse_float(interpreter: &mut Interpreter, _: &Value, args: &[Value], _: bool) -> Exec<Value> {
    let text = interpreter.to_string(&arg(args, 0))?;
    let text = text.trim();
    // 取最长的可解析前缀
    let parsed = (1..=text.len())
        .rev()
        .filter(|&end| text.is_char_boundary(end))
        .find_map(|end| text[..end].parse::<f64>().ok().filter(|n| n.is_finite()));
    Ok(Value::Number(parsed.unwrap_or(f64::NAN)))
}
