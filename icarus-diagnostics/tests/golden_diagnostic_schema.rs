//! Golden test over the diagnostic code surface: one `category/name` pair
//! per variant, serialized and compared against a fixed list. Catches a
//! variant being renamed or removed without a corresponding update here,
//! the same role `vex-diagnostics/tests/golden_diagnostic_schema.rs` plays
//! for that crate's JSON wire shape.

use icarus_ast::SourceRange;
use icarus_diagnostics::Diagnostic;
use serde_json::json;

fn one_of_each() -> Vec<Diagnostic> {
    let r = SourceRange::unknown();
    vec![
        Diagnostic::UndeclaredIdentifier { name: "x".into(), range: r, suggestions: vec![] },
        Diagnostic::NotAType { range: r, found: "3".into() },
        Diagnostic::InvalidCast { from: "i32".into(), to: "bool".into(), range: r },
        Diagnostic::CyclicDependency { cycle: vec!["X".into()], ranges: vec![r] },
        Diagnostic::ImmovableType { type_desc: "S".into(), range: r },
        Diagnostic::UncopyableType { type_desc: "S".into(), range: r },
        Diagnostic::DeclarationOutOfOrder { name: "x".into(), use_range: r, decl_range: r },
        Diagnostic::UncapturedIdentifier { name: "x".into(), range: r },
        Diagnostic::NonCallableInOverloadSet { name: "x".into(), range: r },
        Diagnostic::DereferencingNonPointer { type_desc: "i32".into(), range: r },
        Diagnostic::NegatingUnsignedInteger { type_desc: "u32".into(), range: r },
        Diagnostic::InvalidUnaryOperatorCall { op: "-".into(), operand_type: "bool".into(), range: r },
        Diagnostic::InvalidUnaryOperatorOverload { op: "-".into(), range: r },
        Diagnostic::UnexpandedUnaryOperatorArgument { range: r },
        Diagnostic::AssigningToConstant { range: r },
        Diagnostic::NonAddressableExpression { range: r },
        Diagnostic::NonConstantImport { range: r },
        Diagnostic::InvalidImport { locator: "foo".into(), range: r },
        Diagnostic::PatternMatchingFailed { reason: "not sufficiently simple".into(), range: r },
        Diagnostic::PatternTypeMismatch { expected: "*T".into(), found: "i32".into(), range: r },
        Diagnostic::MissingArgument { callee: "f".into(), param: "x".into(), range: r },
        Diagnostic::UnknownNamedArgument { callee: "f".into(), arg_name: "z".into(), range: r },
        Diagnostic::UncoveredCombination { combination: "bool".into(), range: r },
        Diagnostic::AmbiguousDispatch { combination: "i32".into(), range: r },
    ]
}

#[test]
fn diagnostic_code_surface_matches_the_golden_list() {
    let codes: Vec<String> = one_of_each().iter().map(Diagnostic::code).collect();
    let golden = vec![
        "type-error/undeclared-identifier",
        "type-error/not-a-type",
        "type-error/invalid-cast",
        "type-error/cyclic-dependency",
        "type-error/immovable-type",
        "type-error/uncopyable-type",
        "type-error/declaration-out-of-order",
        "type-error/uncaptured-identifier",
        "type-error/non-callable-in-overload-set",
        "type-error/dereferencing-non-pointer",
        "type-error/negating-unsigned-integer",
        "type-error/invalid-unary-operator-call",
        "type-error/invalid-unary-operator-overload",
        "type-error/unexpanded-unary-operator-argument",
        "value-category-error/assigning-to-constant",
        "value-category-error/non-addressable-expression",
        "value-category-error/non-constant-import",
        "value-error/invalid-import",
        "pattern-error/pattern-matching-failed",
        "pattern-error/pattern-type-mismatch",
        "call-error/missing-argument",
        "call-error/unknown-named-argument",
        "dispatch-error/uncovered-combination",
        "dispatch-error/ambiguous-dispatch",
    ];
    assert_eq!(codes, golden);

    // Round-trips through JSON the same way a driver reporting diagnostics
    // to an external tool would serialize the code list.
    let serialized = serde_json::to_string(&codes).expect("code list serializes");
    let parsed: serde_json::Value = serde_json::from_str(&serialized).expect("valid json");
    assert_eq!(parsed, json!(golden));
}
