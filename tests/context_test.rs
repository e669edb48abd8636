use scriptest::script::Value;
use scriptest::{ScriptContext, ScriptestError, SourceUnit};

#[test]
fn test_nested_entry_leaves_no_residue() {
    let mut context = ScriptContext::new().unwrap();
    let library: Vec<String> = context.library_units().iter().map(|u| u.name.clone()).collect();
    assert_eq!(library, vec!["prelude.js", "unit.js"]);

    {
        let mut outer = context.enter();
        assert_eq!(outer.depth(), 1);
        {
            let inner = outer.enter();
            assert_eq!(inner.depth(), 2);
        }
        assert_eq!(outer.depth(), 1);
    }

    assert_eq!(context.depth(), 0);
    assert_eq!(context.generation(), 2);
    assert_eq!(context.library_units().len(), 2);
    assert!(context.units().is_empty());
}

#[test]
fn test_later_units_see_earlier_bindings() {
    let mut context = ScriptContext::new().unwrap();
    let mut scope = context.enter();
    scope
        .load(SourceUnit::new("Calculator.js", "function square(x) { return x * x; }"))
        .unwrap();
    scope
        .load(SourceUnit::new("Uses.js", "var nine = square(3);"))
        .unwrap();

    assert_eq!(scope.global("nine"), Some(Value::from(9.0)));
    let names: Vec<String> = scope.bindings().into_iter().map(|(name, _)| name).collect();
    let square = names.iter().position(|n| n == "square").unwrap();
    let nine = names.iter().position(|n| n == "nine").unwrap();
    assert!(square < nine);
    drop(scope);

    let loaded: Vec<(String, usize)> = context.units().iter().map(|u| (u.name.clone(), u.order)).collect();
    assert_eq!(
        loaded,
        vec![("Calculator.js".to_string(), 0), ("Uses.js".to_string(), 1)]
    );
}

#[test]
fn test_context_stays_usable_after_failures() {
    let mut context = ScriptContext::new().unwrap();
    context.load(SourceUnit::new("good.js", "var kept = 'yes';")).unwrap();
    assert!(context.load(SourceUnit::new("bad.js", "kept = 'no'; missing();")).is_err());

    let err = context.evaluate("nope(", "driver").unwrap_err();
    assert!(matches!(err, ScriptestError::ScriptEvaluation { ref name, .. } if name == "driver"));

    let value = context.evaluate("typeof TestCase", "inspect").unwrap();
    assert_eq!(value, Value::from("function"));
    assert_eq!(context.units().len(), 1);
}

#[test]
fn test_evaluate_does_not_record_units() {
    let mut context = ScriptContext::new().unwrap();
    let value = context.evaluate("[1, 2, 3].length", "inspect").unwrap();
    assert_eq!(value, Value::from(3.0));
    assert!(context.units().is_empty());
}
