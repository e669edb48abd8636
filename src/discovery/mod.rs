//! 测试发现
//!
//! 在已加载的执行环境中按命名约定收集测试实体：
//! - `AllTests`：读取名为 `AllTests` 的组合套件
//! - `TestSuites`：所有以 `TestSuite` 结尾的套件
//! - `TestCases`：所有以 `TestCase`（或 `Test`）结尾的用例构造函数
//!
//! 实体类型由脚本库在原型上标注的 `__kind` 决定。

use crate::context::ContextScope;
use crate::error::{Result, ScriptestError};
use crate::script::Value;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

pub const ALL_TESTS_BINDING: &str = "AllTests";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DiscoveryMode {
    AllTests,
    TestSuites,
    #[default]
    TestCases,
}

impl DiscoveryMode {
    /// 未指定套件名时使用的报告标题
    pub fn default_title(&self) -> &'static str {
        match self {
            DiscoveryMode::AllTests => "AllTests",
            DiscoveryMode::TestSuites => "AllTestSuites",
            DiscoveryMode::TestCases => "AllTestCases",
        }
    }

    pub fn strategy(&self) -> Box<dyn DiscoveryStrategy> {
        match self {
            DiscoveryMode::AllTests => Box::new(AllTests),
            DiscoveryMode::TestSuites => Box::new(TestSuites),
            DiscoveryMode::TestCases => Box::new(TestCases),
        }
    }
}

impl FromStr for DiscoveryMode {
    type Err = ScriptestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "alltests" => Ok(DiscoveryMode::AllTests),
            "testsuites" => Ok(DiscoveryMode::TestSuites),
            "testcases" => Ok(DiscoveryMode::TestCases),
            _ => Err(ScriptestError::Config(format!(
                "未知的发现模式: {} (可选: AllTests, TestSuites, TestCases)",
                s
            ))),
        }
    }
}

impl fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiscoveryMode::AllTests => "AllTests",
            DiscoveryMode::TestSuites => "TestSuites",
            DiscoveryMode::TestCases => "TestCases",
        };
        write!(f, "{}", name)
    }
}

/// 可运行的测试实体
#[derive(Debug, Clone)]
pub enum TestEntity {
    /// 组合套件对象（`tests` 数组）
    Suite { name: String, value: Value },
    /// 用例构造函数，每个 `test*` 方法是一个测试
    Case { name: String, constructor: Value },
}

impl TestEntity {
    pub fn name(&self) -> &str {
        match self {
            TestEntity::Suite { name, .. } | TestEntity::Case { name, .. } => name,
        }
    }
}

/// 发现结果：报告标题与有序实体列表
#[derive(Debug, Clone)]
pub struct Discovery {
    pub title: String,
    pub entities: Vec<TestEntity>,
}

/// 值的实体类型，仅依据 `__kind` 标记判断
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    CaseConstructor,
    SuiteConstructor,
    Suite,
    CaseInstance,
}

const KIND_MARKER: &str = "__kind";

pub fn kind_of(value: &Value) -> Option<EntityKind> {
    let object = value.as_object()?;
    if object.callable().is_some() {
        let prototype = object.lookup("prototype")?;
        return match prototype.lookup_str(KIND_MARKER)?.as_str() {
            "case" => Some(EntityKind::CaseConstructor),
            "suite" => Some(EntityKind::SuiteConstructor),
            _ => None,
        };
    }
    match value.lookup_str(KIND_MARKER)?.as_str() {
        "suite" => Some(EntityKind::Suite),
        "case" => Some(EntityKind::CaseInstance),
        _ => None,
    }
}

/// 由执行环境产生有序测试实体集合
pub trait DiscoveryStrategy {
    fn mode(&self) -> DiscoveryMode;

    fn discover(&self, scope: &mut ContextScope<'_>, suite_name: Option<&str>) -> Result<Discovery>;
}

fn title(mode: DiscoveryMode, suite_name: Option<&str>) -> String {
    match suite_name {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => mode.default_title().to_string(),
    }
}

/// 将套件构造函数实例化为套件对象
fn instantiate_suite(scope: &mut ContextScope<'_>, name: &str, constructor: &Value) -> Result<Value> {
    scope.construct(constructor, &[]).map_err(|throw| {
        ScriptestError::ScriptEvaluation {
            name: name.to_string(),
            message: throw.to_exception().to_string(),
        }
    })
}

fn suite_regex() -> &'static Regex {
    static SUITE_REGEX: OnceLock<Regex> = OnceLock::new();
    SUITE_REGEX.get_or_init(|| Regex::new(r"^[A-Za-z_$][\w$]*TestSuite$").unwrap())
}

fn case_regex() -> &'static Regex {
    static CASE_REGEX: OnceLock<Regex> = OnceLock::new();
    CASE_REGEX.get_or_init(|| Regex::new(r"^[A-Za-z_$][\w$]*(TestCase|Test)$").unwrap())
}

/// 读取 `AllTests` 绑定
pub struct AllTests;

impl DiscoveryStrategy for AllTests {
    fn mode(&self) -> DiscoveryMode {
        DiscoveryMode::AllTests
    }

    fn discover(&self, scope: &mut ContextScope<'_>, suite_name: Option<&str>) -> Result<Discovery> {
        let Some(value) = scope.global(ALL_TESTS_BINDING) else {
            tracing::warn!("No '{}' binding found, nothing to run", ALL_TESTS_BINDING);
            return Ok(Discovery {
                title: title(self.mode(), suite_name),
                entities: Vec::new(),
            });
        };

        let suite = match kind_of(&value) {
            Some(EntityKind::Suite) => value,
            Some(EntityKind::SuiteConstructor) => instantiate_suite(scope, ALL_TESTS_BINDING, &value)?,
            _ if value.is_callable() => {
                let result = scope
                    .call(&value, Value::Undefined, &[])
                    .map_err(|throw| ScriptestError::ScriptEvaluation {
                        name: ALL_TESTS_BINDING.to_string(),
                        message: throw.to_exception().to_string(),
                    })?;
                if kind_of(&result) != Some(EntityKind::Suite) {
                    return Err(ScriptestError::ScriptEvaluation {
                        name: ALL_TESTS_BINDING.to_string(),
                        message: format!("{}() 未返回测试套件", ALL_TESTS_BINDING),
                    });
                }
                result
            }
            _ => {
                return Err(ScriptestError::ScriptEvaluation {
                    name: ALL_TESTS_BINDING.to_string(),
                    message: format!("'{}' 不是测试套件: {}", ALL_TESTS_BINDING, value),
                });
            }
        };

        // 套件自身的名称优先于默认标题，调用方指定的名称优先于二者
        let own_name = suite.lookup_str("name").filter(|name| !name.is_empty());
        let title = match (suite_name, own_name) {
            (Some(name), _) if !name.is_empty() => name.to_string(),
            (_, Some(name)) => name,
            _ => self.mode().default_title().to_string(),
        };
        Ok(Discovery {
            title,
            entities: vec![TestEntity::Suite {
                name: ALL_TESTS_BINDING.to_string(),
                value: suite,
            }],
        })
    }
}

/// 收集所有 `*TestSuite` 绑定
pub struct TestSuites;

impl DiscoveryStrategy for TestSuites {
    fn mode(&self) -> DiscoveryMode {
        DiscoveryMode::TestSuites
    }

    fn discover(&self, scope: &mut ContextScope<'_>, suite_name: Option<&str>) -> Result<Discovery> {
        let mut entities = Vec::new();
        for (name, value) in scope.bindings() {
            if !suite_regex().is_match(&name) {
                continue;
            }
            match kind_of(&value) {
                Some(EntityKind::Suite) => entities.push(TestEntity::Suite { name, value }),
                Some(EntityKind::SuiteConstructor) => {
                    let value = instantiate_suite(scope, &name, &value)?;
                    entities.push(TestEntity::Suite { name, value });
                }
                _ => tracing::debug!(binding = %name, "Skipping binding that is not a suite"),
            }
        }
        if entities.is_empty() {
            tracing::warn!("No test suites discovered");
        }
        Ok(Discovery {
            title: title(self.mode(), suite_name),
            entities,
        })
    }
}

/// 收集所有 `*TestCase` / `*Test` 用例构造函数
pub struct TestCases;

impl DiscoveryStrategy for TestCases {
    fn mode(&self) -> DiscoveryMode {
        DiscoveryMode::TestCases
    }

    fn discover(&self, scope: &mut ContextScope<'_>, suite_name: Option<&str>) -> Result<Discovery> {
        let entities: Vec<TestEntity> = scope
            .bindings()
            .into_iter()
            .filter(|(name, value)| {
                case_regex().is_match(name) && kind_of(value) == Some(EntityKind::CaseConstructor)
            })
            .map(|(name, constructor)| TestEntity::Case { name, constructor })
            .collect();
        if entities.is_empty() {
            tracing::warn!("No test cases discovered");
        }
        Ok(Discovery {
            title: title(self.mode(), suite_name),
            entities,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ScriptContext, SourceUnit};

    const SCRIPTS: &str = r#"
        function FirstTest(name) { TestCase.call(this, name); }
        FirstTest.prototype = new TestCase();
        FirstTest.prototype.testOne = function() {};

        function HelperTest() {}

        function SecondTestCase(name) { TestCase.call(this, name); }
        SecondTestCase.prototype = new TestCase();

        var MathTestSuite = new TestSuite("math");
        MathTestSuite.addTestSuite(FirstTest);
        var NotATestSuite = 3;
    "#;

    fn context() -> ScriptContext {
        let mut context = ScriptContext::new().unwrap();
        context.load(SourceUnit::new("scripts.js", SCRIPTS)).unwrap();
        context
    }

    fn names(discovery: &Discovery) -> Vec<&str> {
        discovery.entities.iter().map(|e| e.name()).collect()
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("ALLTESTS".parse::<DiscoveryMode>().unwrap(), DiscoveryMode::AllTests);
        assert_eq!("testSuites".parse::<DiscoveryMode>().unwrap(), DiscoveryMode::TestSuites);
        assert_eq!(DiscoveryMode::default(), DiscoveryMode::TestCases);
        assert!("everything".parse::<DiscoveryMode>().is_err());
    }

    #[test]
    fn test_case_discovery_follows_binding_order() {
        let mut context = context();
        let mut scope = context.enter();
        let discovery = TestCases.discover(&mut scope, None).unwrap();
        assert_eq!(discovery.title, "AllTestCases");
        assert_eq!(names(&discovery), vec!["FirstTest", "SecondTestCase"]);
    }

    #[test]
    fn test_suite_discovery_skips_non_suites() {
        let mut context = context();
        let mut scope = context.enter();
        let discovery = TestSuites.discover(&mut scope, Some("Suites")).unwrap();
        assert_eq!(discovery.title, "Suites");
        assert_eq!(names(&discovery), vec!["MathTestSuite"]);
    }

    #[test]
    fn test_missing_all_tests_is_empty() {
        let mut context = context();
        let mut scope = context.enter();
        let discovery = AllTests.discover(&mut scope, None).unwrap();
        assert_eq!(discovery.title, "AllTests");
        assert!(discovery.entities.is_empty());
    }

    #[test]
    fn test_all_tests_function_returning_suite() {
        let mut context = context();
        context
            .load(SourceUnit::new(
                "AllTests.js",
                "function AllTests() { var s = new TestSuite('Everything'); s.addTestSuite(FirstTest); return s; }",
            ))
            .unwrap();
        let mut scope = context.enter();
        let discovery = AllTests.discover(&mut scope, None).unwrap();
        assert_eq!(discovery.title, "Everything");
        assert_eq!(discovery.entities.len(), 1);
    }

    #[test]
    fn test_all_tests_rejects_non_suite() {
        let mut context = context();
        context
            .load(SourceUnit::new("AllTests.js", "var AllTests = 42;"))
            .unwrap();
        let mut scope = context.enter();
        let err = AllTests.discover(&mut scope, None).unwrap_err();
        assert!(matches!(err, ScriptestError::ScriptEvaluation { .. }));
    }

    #[test]
    fn test_library_names_never_match() {
        assert!(!case_regex().is_match("TestCase"));
        assert!(!case_regex().is_match("Test"));
        assert!(!suite_regex().is_match("TestSuite"));
        assert!(case_regex().is_match("CalculatorTest"));
        assert!(suite_regex().is_match("AllTestSuite"));
    }
}
