//! 嵌入式脚本引擎
//!
//! 支持测试脚本所需的 ECMAScript 子集：函数与闭包、原型继承、
//! `new`/`this`、异常处理以及常用的内置对象。

pub mod ast;
pub mod builtins;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod scope;
pub mod value;

pub use interpreter::{ErrorKind, Exec, Interpreter, Throw};
pub use value::{ObjectRef, Value};

use std::fmt;
use thiserror::Error;

/// 执行脚本的线程栈大小，足以容纳 `MAX_CALL_DEPTH` 层脚本调用
pub const SCRIPT_STACK_SIZE: usize = 512 * 1024 * 1024;

/// 在栈空间充足的专用线程上完成一段脚本工作
///
/// 执行环境不能跨线程移动，环境的创建、加载与执行都应放在 `work` 内。
/// `work` 中的 panic 会在调用线程上继续传播。
pub fn with_script_stack<T, F>(work: F) -> std::io::Result<T>
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    std::thread::scope(|scope| {
        let handle = std::thread::Builder::new()
            .name("scriptest-script".to_string())
            .stack_size(SCRIPT_STACK_SIZE)
            .spawn_scoped(scope, work)?;
        match handle.join() {
            Ok(value) => Ok(value),
            Err(payload) => std::panic::resume_unwind(payload),
        }
    })
}

/// 调用栈中的一帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub function: String,
    pub unit: String,
    pub line: u32,
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at {} ({}:{})", self.function, self.unit, self.line)
    }
}

/// 脚本抛出且未被捕获的异常
#[derive(Debug, Clone)]
pub struct Exception {
    pub name: String,
    pub message: String,
    /// 最内层在前
    pub trace: Vec<TraceFrame>,
}

impl Exception {
    /// 多行形式：首行为 `名称: 消息`，其后每行一帧
    pub fn stack(&self) -> String {
        let mut out = self.headline();
        for frame in &self.trace {
            out.push_str("\n    ");
            out.push_str(&frame.to_string());
        }
        out
    }

    fn headline(&self) -> String {
        if self.message.is_empty() {
            self.name.clone()
        } else {
            format!("{}: {}", self.name, self.message)
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.trace.first() {
            Some(frame) => write!(f, "{} ({}:{})", self.headline(), frame.unit, frame.line),
            None => write!(f, "{}", self.headline()),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum ScriptError {
    #[error("{unit}:{line}:{column}: 语法错误: {message}")]
    Syntax {
        unit: String,
        line: u32,
        column: u32,
        message: String,
    },

    #[error("未捕获的异常: {0}")]
    Uncaught(Exception),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exception_rendering() {
        let exception = Exception {
            name: "TypeError".to_string(),
            message: "x is not a function".to_string(),
            trace: vec![
                TraceFrame {
                    function: "testAdd".to_string(),
                    unit: "CalculatorTest.js".to_string(),
                    line: 12,
                },
                TraceFrame {
                    function: "<toplevel>".to_string(),
                    unit: "CalculatorTest.js".to_string(),
                    line: 30,
                },
            ],
        };
        assert_eq!(
            exception.to_string(),
            "TypeError: x is not a function (CalculatorTest.js:12)"
        );
        assert_eq!(
            exception.stack(),
            "TypeError: x is not a function\n    at testAdd (CalculatorTest.js:12)\n    at <toplevel> (CalculatorTest.js:30)"
        );
    }

    #[test]
    fn test_syntax_error_display() {
        let err = ScriptError::Syntax {
            unit: "broken.js".to_string(),
            line: 3,
            column: 7,
            message: "unexpected token".to_string(),
        };
        assert_eq!(err.to_string(), "broken.js:3:7: 语法错误: unexpected token");
    }
}
