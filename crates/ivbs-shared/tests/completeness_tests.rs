//! Completeness analyzer tests.
//!
//! Covers the flush and continuation escape hatches, single-line and
//! multi-line block forms, and exact nesting.

use ivbs_shared::completeness::{analyze, scan_blocks, BlockKind, Completeness, INDENT_UNIT};

fn incomplete_with_indent(depth: usize) -> Completeness {
    Completeness::Incomplete {
        indent: Some(INDENT_UNIT.repeat(depth)),
    }
}

// =============================================================================
// Escape hatches
// =============================================================================

#[test]
fn test_continuation_marker_wins_over_block_state() {
    let result = analyze("x = 1 + _");
    assert_eq!(result, Completeness::Incomplete { indent: None });

    // Balanced blocks do not matter either
    let result = analyze("Sub x()\nEnd Sub\ny = a & _");
    assert_eq!(result, Completeness::Incomplete { indent: None });

    // Nor does a trailing blank line
    let result = analyze("y = a & _\n\n");
    assert_eq!(result, Completeness::Incomplete { indent: None });
}

#[test]
fn test_blank_final_line_flushes_unclosed_block() {
    assert_eq!(analyze("Sub x()\n  WScript.Echo 1\n\n"), Completeness::Complete);
    assert_eq!(analyze("If a Then\n   "), Completeness::Complete);
}

#[test]
fn test_empty_input_is_complete() {
    assert_eq!(analyze(""), Completeness::Complete);
}

#[test]
fn test_single_trailing_newline_is_not_a_flush() {
    assert_eq!(analyze("Sub x()\n"), incomplete_with_indent(1));
}

// =============================================================================
// Sub / Function
// =============================================================================

#[test]
fn test_open_sub_is_incomplete_with_indent() {
    assert_eq!(analyze("Sub x()"), incomplete_with_indent(1));
    assert_eq!(analyze("Sub x"), incomplete_with_indent(1));
    assert_eq!(analyze("Private Sub helper(a, b)"), incomplete_with_indent(1));
}

#[test]
fn test_closed_sub_is_complete() {
    assert_eq!(analyze("Sub x()\n  Echo 1\nEnd Sub"), Completeness::Complete);
    assert_eq!(analyze("Sub x()\n\tWScript.Echo 1\nEnd Sub"), Completeness::Complete);
    assert_eq!(analyze("Sub x\n\tWScript.Echo 1\nEnd Sub"), Completeness::Complete);
}

#[test]
fn test_blocks_on_one_line_are_complete() {
    assert_eq!(analyze("Sub x WScript.Echo 1 End Sub"), Completeness::Complete);
    assert_eq!(
        analyze("Sub x WScript.Echo 1 End Sub Function y() y = 2 End Function"),
        Completeness::Complete
    );
}

#[test]
fn test_function_blocks() {
    assert_eq!(analyze("Function x()"), incomplete_with_indent(1));
    assert_eq!(
        analyze("Function x()\n\tWScript.Echo 1\nEnd Function"),
        Completeness::Complete
    );
}

#[test]
fn test_exit_statements_do_not_open_blocks() {
    let code = "Function f(n)\n  If n < 0 Then Exit Function\n  f = n\nEnd Function";
    assert_eq!(analyze(code), Completeness::Complete);
}

// =============================================================================
// Conditionals and loops
// =============================================================================

#[test]
fn test_single_line_if_does_not_open_block() {
    assert_eq!(analyze("If a Then b = 1"), Completeness::Complete);
    assert_eq!(analyze("If a Then b = 1 Else b = 2"), Completeness::Complete);
}

#[test]
fn test_multi_line_if_needs_end_if() {
    assert_eq!(analyze("If a > 1 Then"), incomplete_with_indent(1));
    assert_eq!(
        analyze("If a > 1 Then\n  b = 1\nElseIf a < 0 Then\n  b = 2\nElse\n  b = 3\nEnd If"),
        Completeness::Complete
    );
}

#[test]
fn test_if_keyword_case_insensitive() {
    assert_eq!(analyze("IF a THEN\n  b = 1\nend if"), Completeness::Complete);
}

#[test]
fn test_loops() {
    assert_eq!(analyze("For i = 1 To 10"), incomplete_with_indent(1));
    assert_eq!(analyze("For Each x In items\n  WScript.Echo x\nNext"), Completeness::Complete);
    assert_eq!(analyze("Do While x < 3\n  x = x + 1\nLoop"), Completeness::Complete);
    assert_eq!(analyze("Do\n  x = x + 1\nLoop Until x > 3"), Completeness::Complete);
    assert_eq!(analyze("While x < 3\n  x = x + 1\nWend"), Completeness::Complete);
    assert_eq!(analyze("Do Until done"), incomplete_with_indent(1));
}

#[test]
fn test_select_and_with() {
    assert_eq!(analyze("Select Case x"), incomplete_with_indent(1));
    assert_eq!(
        analyze("Select Case x\n  Case 1\n    y = 1\n  Case Else\n    y = 0\nEnd Select"),
        Completeness::Complete
    );
    assert_eq!(analyze("With obj\n  .Name = \"a\"\nEnd With"), Completeness::Complete);
}

#[test]
fn test_class_with_property() {
    let code = "Class Point\n  Private px\n  Public Property Get X\n    X = px\n  End Property\nEnd Class";
    assert_eq!(analyze(code), Completeness::Complete);

    let open = "Class Point\n  Public Property Get X";
    assert_eq!(analyze(open), incomplete_with_indent(2));
}

// =============================================================================
// Exact nesting
// =============================================================================

#[test]
fn test_repeated_same_kind_blocks_are_counted() {
    // Two nested Ifs with only one End If is still open
    let code = "If a Then\n  If b Then\n    c = 1\n  End If";
    assert_eq!(analyze(code), incomplete_with_indent(1));

    let closed = "If a Then\n  If b Then\n    c = 1\n  End If\nEnd If";
    assert_eq!(analyze(closed), Completeness::Complete);
}

#[test]
fn test_second_unclosed_sub_detected() {
    let code = "Sub a()\nEnd Sub\nSub b()";
    assert_eq!(analyze(code), incomplete_with_indent(1));
}

#[test]
fn test_indent_grows_with_depth() {
    let code = "Sub a()\n  For i = 1 To 3\n    If i > 1 Then";
    assert_eq!(analyze(code), incomplete_with_indent(3));
}

#[test]
fn test_stray_closer_is_incomplete() {
    assert_eq!(analyze("End Sub"), incomplete_with_indent(1));
    assert_eq!(analyze("Sub a()\nEnd Function"), incomplete_with_indent(1));
}

// =============================================================================
// Literals and comments
// =============================================================================

#[test]
fn test_keywords_in_strings_and_comments_are_ignored() {
    assert_eq!(analyze("WScript.Echo \"Sub x()\""), Completeness::Complete);
    assert_eq!(analyze("x = 1 ' For each item"), Completeness::Complete);
    assert_eq!(analyze("Rem Function f()"), Completeness::Complete);
}

#[test]
fn test_on_error_resume_next_is_not_a_loop_closer() {
    assert_eq!(analyze("On Error Resume Next"), Completeness::Complete);

    let code = "For i = 1 To 3\n  On Error Resume Next\n  x = 1 / 0\nNext";
    assert_eq!(analyze(code), Completeness::Complete);

    let code = "Sub a()\n  On Error Resume Next\nEnd Sub";
    assert_eq!(analyze(code), Completeness::Complete);

    let scan = scan_blocks("For i = 1 To 3\n  On Error Resume Next");
    assert_eq!(scan.open, vec![BlockKind::For]);
}

#[test]
fn test_statement_separator_splits_if_forms() {
    assert_eq!(analyze("If a Then : b = 1 : End If"), Completeness::Complete);
    let scan = scan_blocks("If a Then : b = 1");
    assert_eq!(scan.open, vec![BlockKind::If]);
}

#[test]
fn test_continued_condition_spanning_lines() {
    let code = "If a And _\n   b Then\n  c = 1\nEnd If";
    assert_eq!(analyze(code), Completeness::Complete);
}

#[test]
fn test_completeness_serializes_like_front_ends_expect() {
    let json = serde_json::to_value(analyze("Sub x()")).unwrap();
    assert_eq!(json, serde_json::json!({"status": "incomplete", "indent": "  "}));

    let json = serde_json::to_value(analyze("x = 1 _")).unwrap();
    assert_eq!(json, serde_json::json!({"status": "incomplete"}));

    let json = serde_json::to_value(analyze("x = 1")).unwrap();
    assert_eq!(json, serde_json::json!({"status": "complete"}));
}
