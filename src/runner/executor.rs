use crate::context::ContextScope;
use crate::discovery::{EntityKind, TestEntity, kind_of};
use crate::runner::types::{TestCaseResult, TestOutcome};
use crate::script::{Exec, Throw, Value};
use std::time::Instant;

/// 套件嵌套深度上限
const MAX_SUITE_DEPTH: usize = 32;

/// 依次执行发现的测试实体
///
/// 单个测试的失败或错误只记录在结果中，不会中断其余测试。
pub struct TestExecutor<'s, 'c> {
    scope: &'s mut ContextScope<'c>,
    results: Vec<TestCaseResult>,
}

impl<'s, 'c> TestExecutor<'s, 'c> {
    pub fn new(scope: &'s mut ContextScope<'c>) -> Self {
        Self {
            scope,
            results: Vec::new(),
        }
    }

    /// 执行所有实体
    pub fn execute_all(mut self, entities: &[TestEntity]) -> Vec<TestCaseResult> {
        for entity in entities {
            match entity {
                TestEntity::Case { name, constructor } => self.run_case(name, constructor),
                TestEntity::Suite { name, value } => self.run_suite(name, value, 0),
            }
        }
        self.results
    }

    /// 用例构造函数的每个 `test*` 方法各运行在一个新实例上
    fn run_case(&mut self, classname: &str, constructor: &Value) {
        let methods = test_methods(constructor);
        tracing::debug!(case = classname, tests = methods.len(), "Running test case");
        for method in methods {
            let start = Instant::now();
            let result = match self.scope.construct(constructor, &[Value::string(&method)]) {
                Ok(instance) => self.run_test(classname, &instance, &method, start),
                Err(throw) => faulted(classname, &method, start, &throw),
            };
            self.results.push(result);
        }
    }

    fn run_suite(&mut self, suite_name: &str, suite: &Value, depth: usize) {
        if depth >= MAX_SUITE_DEPTH {
            self.push_invalid(suite_name, suite_name, "test suites are nested too deeply");
            return;
        }
        let Some(tests) = suite
            .lookup("tests")
            .and_then(|tests| tests.as_object().and_then(|o| o.array_items()))
        else {
            self.push_invalid(suite_name, suite_name, "suite has no 'tests' array");
            return;
        };

        for (index, test) in tests.iter().enumerate() {
            match kind_of(test) {
                Some(EntityKind::CaseConstructor) => {
                    let classname = test.lookup_str("name").unwrap_or_else(|| suite_name.to_string());
                    self.run_case(&classname, test);
                }
                Some(EntityKind::CaseInstance) => {
                    let classname = self.instance_classname(test, suite_name);
                    match test.lookup_str("name") {
                        Some(method) => {
                            let start = Instant::now();
                            let result = self.run_test(&classname, test, &method, start);
                            self.results.push(result);
                        }
                        None => self.push_invalid(
                            &classname,
                            &format!("{}[{}]", suite_name, index),
                            "test case instance has no method name",
                        ),
                    }
                }
                Some(EntityKind::Suite) => {
                    let name = nested_name(test, suite_name, index);
                    self.run_suite(&name, test, depth + 1);
                }
                Some(EntityKind::SuiteConstructor) => {
                    let name = nested_name(test, suite_name, index);
                    match self.scope.construct(test, &[]) {
                        Ok(nested) => self.run_suite(&name, &nested, depth + 1),
                        Err(throw) => {
                            let result = faulted(suite_name, &name, Instant::now(), &throw);
                            self.results.push(result);
                        }
                    }
                }
                None => self.push_invalid(
                    suite_name,
                    &format!("{}[{}]", suite_name, index),
                    &format!("not a test: {}", test),
                ),
            }
        }
    }

    /// setUp → 测试方法 → tearDown
    ///
    /// tearDown 仅在 setUp 成功后执行；记录第一个出现的异常。
    fn run_test(&mut self, classname: &str, instance: &Value, method: &str, start: Instant) -> TestCaseResult {
        let fault = match self.invoke_hook(instance, "setUp") {
            Err(throw) => Some(throw),
            Ok(()) => {
                let test = self.invoke_method(instance, method).err();
                let teardown = self.invoke_hook(instance, "tearDown").err();
                test.or(teardown)
            }
        };
        match fault {
            None => TestCaseResult::passed(classname, method, start.elapsed()),
            Some(throw) => faulted(classname, method, start, &throw),
        }
    }

    fn invoke_method(&mut self, instance: &Value, method: &str) -> Exec<()> {
        let function = self.scope.get(instance, method)?;
        self.scope.call(&function, instance.clone(), &[])?;
        Ok(())
    }

    fn invoke_hook(&mut self, instance: &Value, hook: &str) -> Exec<()> {
        let function = self.scope.get(instance, hook)?;
        if function.is_callable() {
            self.scope.call(&function, instance.clone(), &[])?;
        }
        Ok(())
    }

    /// 用例实例的类名
    ///
    /// `X.prototype = new TestCase()` 使实例的 `constructor` 解析为 `TestCase`，
    /// 所以先在全局绑定中查找原型与实例原型相同的用例构造函数。
    fn instance_classname(&self, instance: &Value, fallback: &str) -> String {
        let proto = instance.as_object().and_then(|object| object.borrow().proto.clone());
        if let Some(proto) = proto {
            let bound = self.scope.bindings().into_iter().find(|(_, value)| {
                kind_of(value) == Some(EntityKind::CaseConstructor)
                    && matches!(value.lookup("prototype"), Some(Value::Object(p)) if p.ptr_eq(&proto))
            });
            if let Some((name, _)) = bound {
                return name;
            }
        }
        instance
            .lookup("constructor")
            .and_then(|constructor| constructor.lookup_str("name"))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| fallback.to_string())
    }

    fn push_invalid(&mut self, classname: &str, name: &str, message: &str) {
        tracing::warn!(suite = classname, test = name, "{}", message);
        self.results.push(TestCaseResult::faulted(
            TestOutcome::Error,
            classname,
            name,
            Default::default(),
            "TypeError".to_string(),
            message.to_string(),
            String::new(),
        ));
    }
}

/// 沿原型链收集 `test*` 方法名（自有属性在前，按插入顺序，去重）
pub fn test_methods(constructor: &Value) -> Vec<String> {
    let Some(Value::Object(prototype)) = constructor.lookup("prototype") else {
        return Vec::new();
    };
    prototype
        .enumerable_keys()
        .into_iter()
        .filter(|key| key.starts_with("test"))
        .filter(|key| prototype.lookup(key).is_some_and(|value| value.is_callable()))
        .map(|key| key.to_string())
        .collect()
}

fn nested_name(suite: &Value, parent: &str, index: usize) -> String {
    suite
        .lookup_str("name")
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("{}[{}]", parent, index))
}

/// 按异常的 `__kind` 区分失败与错误
fn faulted(classname: &str, name: &str, start: Instant, throw: &Throw) -> TestCaseResult {
    let outcome = match throw.value.lookup_str("__kind").as_deref() {
        Some("failure") => TestOutcome::Failure,
        _ => TestOutcome::Error,
    };
    let exception = throw.to_exception();
    TestCaseResult::faulted(
        outcome,
        classname,
        name,
        start.elapsed(),
        exception.name.clone(),
        exception.message.clone(),
        exception.stack(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ScriptContext, SourceUnit};

    fn run(source: &str, entities: impl Fn(&mut ContextScope<'_>) -> Vec<TestEntity>) -> Vec<TestCaseResult> {
        let mut context = ScriptContext::new().unwrap();
        context.load(SourceUnit::new("tests.js", source)).unwrap();
        let mut scope = context.enter();
        let entities = entities(&mut scope);
        TestExecutor::new(&mut scope).execute_all(&entities)
    }

    fn case(scope: &mut ContextScope<'_>, name: &str) -> TestEntity {
        TestEntity::Case {
            name: name.to_string(),
            constructor: scope.global(name).unwrap(),
        }
    }

    #[test]
    fn test_outcomes_are_classified() {
        let source = r#"
            function MixedTest(name) { TestCase.call(this, name); }
            MixedTest.prototype = new TestCase();
            MixedTest.prototype.testPass = function() { this.assertEquals(2, 1 + 1); };
            MixedTest.prototype.testFail = function() { this.assertEquals("sum", 2, 3); };
            MixedTest.prototype.testError = function() { undefinedHelper(); };
            MixedTest.prototype.helper = function() {};
        "#;
        let results = run(source, |scope| vec![case(scope, "MixedTest")]);
        let summary: Vec<(&str, TestOutcome)> = results
            .iter()
            .map(|r| (r.name.as_str(), r.outcome))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("testPass", TestOutcome::Passed),
                ("testFail", TestOutcome::Failure),
                ("testError", TestOutcome::Error),
            ]
        );
        assert_eq!(results[1].message.as_deref(), Some("sum expected:<2> but was:<3>"));
        assert_eq!(results[1].kind.as_deref(), Some("AssertionFailedError"));
        assert_eq!(results[2].kind.as_deref(), Some("ReferenceError"));
        assert!(results.iter().all(|r| r.classname == "MixedTest"));
    }

    #[test]
    fn test_each_method_gets_fresh_instance_and_hooks_run() {
        let source = r#"
            var log = [];
            function HookTest(name) { TestCase.call(this, name); this.count = 0; }
            HookTest.prototype = new TestCase();
            HookTest.prototype.setUp = function() { this.count++; log.push("setUp:" + this.name); };
            HookTest.prototype.tearDown = function() { log.push("tearDown:" + this.name); };
            HookTest.prototype.testA = function() { this.assertEquals(1, this.count); };
            HookTest.prototype.testB = function() { this.assertEquals(1, this.count); };
        "#;
        let mut context = ScriptContext::new().unwrap();
        context.load(SourceUnit::new("hooks.js", source)).unwrap();
        let mut scope = context.enter();
        let entities = vec![case(&mut scope, "HookTest")];
        let results = TestExecutor::new(&mut scope).execute_all(&entities);
        assert!(results.iter().all(|r| r.is_passed()));
        let log = scope.evaluate("log.join(',')", "inspect").unwrap();
        assert_eq!(
            log,
            Value::from("setUp:testA,tearDown:testA,setUp:testB,tearDown:testB")
        );
    }

    #[test]
    fn test_failing_setup_skips_teardown() {
        let source = r#"
            var tornDown = false;
            function BrokenSetUpTest(name) { TestCase.call(this, name); }
            BrokenSetUpTest.prototype = new TestCase();
            BrokenSetUpTest.prototype.setUp = function() { throw new Error("no fixture"); };
            BrokenSetUpTest.prototype.tearDown = function() { tornDown = true; };
            BrokenSetUpTest.prototype.testNever = function() {};
        "#;
        let mut context = ScriptContext::new().unwrap();
        context.load(SourceUnit::new("setup.js", source)).unwrap();
        let mut scope = context.enter();
        let entities = vec![case(&mut scope, "BrokenSetUpTest")];
        let results = TestExecutor::new(&mut scope).execute_all(&entities);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, TestOutcome::Error);
        assert_eq!(results[0].message.as_deref(), Some("no fixture"));
        assert_eq!(scope.evaluate("tornDown", "inspect").unwrap(), Value::from(false));
    }

    #[test]
    fn test_teardown_error_counts_when_test_passed() {
        let source = r#"
            function LeakyTest(name) { TestCase.call(this, name); }
            LeakyTest.prototype = new TestCase();
            LeakyTest.prototype.tearDown = function() { throw new Error("leak"); };
            LeakyTest.prototype.testFine = function() {};
            LeakyTest.prototype.testFails = function() { this.fail("first"); };
        "#;
        let results = run(source, |scope| vec![case(scope, "LeakyTest")]);
        assert_eq!(results[0].outcome, TestOutcome::Error);
        assert_eq!(results[0].message.as_deref(), Some("leak"));
        assert_eq!(results[1].outcome, TestOutcome::Failure);
        assert_eq!(results[1].message.as_deref(), Some("first"));
    }

    #[test]
    fn test_suite_expansion() {
        let source = r#"
            function ATest(name) { TestCase.call(this, name); }
            ATest.prototype = new TestCase();
            ATest.prototype.testOne = function() {};
            ATest.prototype.testTwo = function() {};

            var inner = new TestSuite("inner");
            inner.addTest(new ATest("testTwo"));

            var outer = new TestSuite("outer");
            outer.addTestSuite(ATest);
            outer.addTest(inner);
            outer.addTest(42);
        "#;
        let results = run(source, |scope| {
            vec![TestEntity::Suite {
                name: "outer".to_string(),
                value: scope.global("outer").unwrap(),
            }]
        });
        let names: Vec<&str> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["testOne", "testTwo", "testTwo", "outer[2]"]);
        assert_eq!(results[2].classname, "ATest");
        assert_eq!(results[3].outcome, TestOutcome::Error);
        assert!(results[..3].iter().all(|r| r.is_passed()));
    }

    #[test]
    fn test_methods_walk_prototype_chain() {
        let mut context = ScriptContext::new().unwrap();
        context
            .load(SourceUnit::new(
                "chain.js",
                r#"
                function BaseTest(name) { TestCase.call(this, name); }
                BaseTest.prototype = new TestCase();
                BaseTest.prototype.testShared = function() {};
                function DerivedTest(name) { BaseTest.call(this, name); }
                DerivedTest.prototype = new BaseTest();
                DerivedTest.prototype.testOwn = function() {};
                DerivedTest.prototype.testing = 5;
                "#,
            ))
            .unwrap();
        let scope = context.enter();
        let methods = test_methods(&scope.global("DerivedTest").unwrap());
        assert_eq!(methods, vec!["testOwn", "testShared"]);
    }
}
