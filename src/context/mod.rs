//! 脚本执行环境
//!
//! `ScriptContext` 持有一个解释器，按顺序累积加载的源码单元。
//! 访问环境必须先 `enter()`，得到的 `ContextScope` 被释放时即退出；
//! 嵌套进入复用同一个解释器，只有最外层退出时才清理调用栈。

pub mod source;

pub use source::{Charset, SourceSelector, SourceUnit};

use crate::error::{Result, ScriptestError};
use crate::script::{Exec, Interpreter, ScriptError, Value};

const PRELUDE: (&str, &str) = ("prelude.js", include_str!("library/prelude.js"));
const UNIT: (&str, &str) = ("unit.js", include_str!("library/unit.js"));

/// 已加载源码单元的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedUnit {
    pub name: String,
    pub order: usize,
    pub charset: Option<Charset>,
}

pub struct ScriptContext {
    interpreter: Interpreter,
    depth: usize,
    generation: u64,
    library: Vec<LoadedUnit>,
    units: Vec<LoadedUnit>,
}

impl ScriptContext {
    /// 创建环境并加载内置脚本库
    pub fn new() -> Result<Self> {
        let mut context = Self {
            interpreter: Interpreter::new(),
            depth: 0,
            generation: 0,
            library: Vec::new(),
            units: Vec::new(),
        };
        for (order, (name, source)) in [PRELUDE, UNIT].into_iter().enumerate() {
            context
                .interpreter
                .run(source, name)
                .map_err(ScriptestError::Bootstrap)?;
            context.library.push(LoadedUnit {
                name: name.to_string(),
                order,
                charset: None,
            });
        }
        context.interpreter.reset();
        tracing::debug!("Script context bootstrapped");
        Ok(context)
    }

    pub fn enter(&mut self) -> ContextScope<'_> {
        if self.depth == 0 {
            self.interpreter.reset();
        }
        self.depth += 1;
        self.generation += 1;
        ContextScope { context: self }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// 每次进入递增，从不回退
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn units(&self) -> &[LoadedUnit] {
        &self.units
    }

    pub fn library_units(&self) -> &[LoadedUnit] {
        &self.library
    }

    pub fn load(&mut self, unit: SourceUnit) -> Result<()> {
        self.enter().load(unit)
    }

    pub fn evaluate(&mut self, code: &str, name: &str) -> Result<Value> {
        self.enter().evaluate(code, name)
    }
}

/// 已进入的执行环境，释放即退出
pub struct ContextScope<'a> {
    context: &'a mut ScriptContext,
}

impl ContextScope<'_> {
    /// 嵌套进入同一环境
    pub fn enter(&mut self) -> ContextScope<'_> {
        self.context.enter()
    }

    pub fn depth(&self) -> usize {
        self.context.depth
    }

    pub fn generation(&self) -> u64 {
        self.context.generation
    }

    /// 在当前环境中执行源码单元，其全局绑定追加到累积状态中
    pub fn load(&mut self, unit: SourceUnit) -> Result<()> {
        tracing::debug!(unit = unit.name(), bytes = unit.content().len(), "Loading source unit");
        let result = self.context.interpreter.run(unit.content(), unit.name());
        match result {
            Ok(_) => {
                let order = self.context.units.len();
                self.context.units.push(LoadedUnit {
                    name: unit.name().to_string(),
                    order,
                    charset: unit.charset(),
                });
                Ok(())
            }
            Err(source) => Err(ScriptestError::ScriptLoad {
                unit: unit.name().to_string(),
                source,
            }),
        }
    }

    /// 执行一段内联代码并返回其值，不记录到源码日志
    pub fn evaluate(&mut self, code: &str, name: &str) -> Result<Value> {
        self.context
            .interpreter
            .run(code, name)
            .map_err(|err| evaluation_error(name, err))
    }

    /// 全局绑定快照（按绑定顺序）
    pub fn bindings(&self) -> Vec<(String, Value)> {
        self.context.interpreter.global_bindings()
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.context.interpreter.global(name)
    }

    pub fn interpreter(&mut self) -> &mut Interpreter {
        &mut self.context.interpreter
    }

    pub fn call(&mut self, callee: &Value, this: Value, args: &[Value]) -> Exec<Value> {
        self.context.interpreter.call(callee, this, args)
    }

    pub fn construct(&mut self, callee: &Value, args: &[Value]) -> Exec<Value> {
        self.context.interpreter.construct(callee, args)
    }

    pub fn get(&mut self, target: &Value, key: &str) -> Exec<Value> {
        self.context.interpreter.get(target, key)
    }

    /// 取出脚本 `print` 的输出
    pub fn take_output(&mut self) -> Vec<String> {
        self.context.interpreter.take_output()
    }
}

impl Drop for ContextScope<'_> {
    fn drop(&mut self) {
        self.context.depth -= 1;
        if self.context.depth == 0 {
            self.context.interpreter.reset();
        }
    }
}

impl Drop for ScriptContext {
    fn drop(&mut self) {
        self.interpreter.teardown();
        tracing::debug!(units = self.units.len(), "Script context released");
    }
}

fn evaluation_error(name: &str, err: ScriptError) -> ScriptestError {
    ScriptestError::ScriptEvaluation {
        name: name.to_string(),
        message: err.to_string(),
    }
}
