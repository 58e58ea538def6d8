mod common;
use dyn_loader::RegistryError;

#[test]
#[should_panic(expected = "Cyclic dependency detected")]
fn test_load_cycle() {
    let project = common::TestProject::new();
    project
        .module("a.js", "a", &["b"], &[])
        .module("b.js", "b", &["a"], &[]);

    project.build().unwrap();
}

#[test]
#[should_panic(expected = "Cyclic dependency detected")]
fn test_cycle_through_lazy_edge() {
    let project = common::TestProject::new();
    project
        .module("a.js", "a", &["b"], &[])
        .module("b.js", "b", &[], &["a"]);

    project.build().unwrap();
}

#[test]
fn test_self_dependency_names_module() {
    let project = common::TestProject::new();
    project.module("loop.js", "loop", &[], &["loop"]);

    match project.build() {
        Err(RegistryError::CyclicDependency { module, dependency }) => {
            assert_eq!(module, "loop");
            assert_eq!(dependency, "loop");
        }
        other => panic!("expected a cyclic dependency error, got {other:?}"),
    }
}

#[test]
fn test_longer_cycle_is_reported() {
    let project = common::TestProject::new();
    project
        .module("a.js", "a", &["b"], &[])
        .module("b.js", "b", &["c"], &[])
        .module("c.js", "c", &[], &["a"])
        .module("d.js", "d", &["a"], &[]);

    let err = project.build().unwrap_err();
    assert!(
        matches!(err, RegistryError::CyclicDependency { .. }),
        "unexpected error: {err}"
    );
}

#[test]
fn test_diamond_is_not_a_cycle() {
    let project = common::TestProject::new();
    project
        .module("a.js", "a", &["b", "c"], &[])
        .module("b.js", "b", &["d"], &[])
        .module("c.js", "c", &[], &["d"])
        .module("d.js", "d", &[], &[]);

    let registry = project.registry();
    let order: Vec<&str> = registry.modules().map(|m| m.name.as_str()).collect();
    let position = |name| order.iter().position(|n| *n == name).unwrap();
    assert!(position("d") < position("b"));
    assert!(position("d") < position("c"));
    assert!(position("b") < position("a"));
    assert!(position("c") < position("a"));
}
