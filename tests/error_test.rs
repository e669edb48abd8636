use scriptest::{Result, ScriptContext, ScriptestError, SourceUnit};
use std::path::PathBuf;

#[test]
fn test_config_error() {
    let err = ScriptestError::Config("没有声明任何测试套件".to_string());
    assert_eq!(err.to_string(), "配置错误: 没有声明任何测试套件");
}

#[test]
fn test_tests_failed() {
    let err = ScriptestError::TestsFailed {
        errors: 2,
        failures: 3,
    };
    assert_eq!(err.to_string(), "测试未通过: 2 个错误, 3 个失败");
}

#[test]
fn test_source_read_names_the_file() {
    let err = ScriptestError::SourceRead {
        path: PathBuf::from("test/MissingTest.js"),
        message: "not found".to_string(),
    };
    assert_eq!(err.to_string(), "无法读取源文件 test/MissingTest.js: not found");
}

#[test]
fn test_script_load_names_the_unit() {
    let mut context = ScriptContext::new().unwrap();
    let err = context
        .load(SourceUnit::new("BrokenTest.js", "var x = ;"))
        .unwrap_err();
    match &err {
        ScriptestError::ScriptLoad { unit, .. } => assert_eq!(unit, "BrokenTest.js"),
        other => panic!("Expected ScriptLoad, got {:?}", other),
    }
    let message = err.to_string();
    assert!(message.starts_with("脚本加载失败 [BrokenTest.js]: BrokenTest.js:1:"));
    assert!(message.contains("语法错误"));
}

#[test]
fn test_uncaught_exception_while_loading() {
    let mut context = ScriptContext::new().unwrap();
    let err = context
        .load(SourceUnit::new("Throws.js", "\nthrow new TypeError(\"bad setup\");"))
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "脚本加载失败 [Throws.js]: 未捕获的异常: TypeError: bad setup (Throws.js:2)"
    );
}

#[test]
fn test_deeply_nested_source_is_a_load_error() {
    let mut context = ScriptContext::new().unwrap();
    let source = format!("var x = {}1{};", "(".repeat(200), ")".repeat(200));
    let err = context.load(SourceUnit::new("Nested.js", source)).unwrap_err();
    match &err {
        ScriptestError::ScriptLoad { unit, .. } => assert_eq!(unit, "Nested.js"),
        other => panic!("Expected ScriptLoad, got {:?}", other),
    }
    assert!(err.to_string().contains("nesting too deep"));
    assert!(context.evaluate("typeof TestCase", "inspect").is_ok());
}

#[test]
fn test_error_conversion_from_anyhow() {
    let anyhow_err = anyhow::anyhow!("test anyhow error");
    let err: ScriptestError = anyhow_err.into();
    assert!(err.to_string().contains("test anyhow error"));
}

#[test]
fn test_result_type() {
    fn returns_error() -> Result<()> {
        Err(ScriptestError::Other("test".to_string()))
    }

    match returns_error() {
        Err(ScriptestError::Other(msg)) => assert_eq!(msg, "test"),
        _ => panic!("Expected Other"),
    }
}
