//! Redundant `true`/`false` literals in boolean expressions

use crate::diagnostic::{Fix, TextEdit};
use crate::dispatch::RuleContext;
use crate::reporter::Issue;
use crate::rule::{Rule, RuleCategory, RuleError, RuleMeta};
use crate::syntax::{Keyword, Node, Span, SyntaxKind, TokenKind};

use SyntaxKind as K;

const MESSAGE: &str = "Remove the unnecessary Boolean literal(s).";

pub struct BooleanLiteralUnnecessary {
    meta: RuleMeta,
}

impl BooleanLiteralUnnecessary {
    pub fn new() -> Self {
        Self {
            meta: RuleMeta::new(
                "boolean-literal-unnecessary",
                "BooleanLiteralUnnecessary",
                "Boolean literals should not be redundant",
            )
            .with_category(RuleCategory::Style)
            .with_tag("clumsy")
            .fixable()
            .with_rationale(
                "Comparing to or combining with a boolean literal adds noise without changing the result.",
            )
            .with_example_bad("if (ready == true) { }")
            .with_example_good("if (ready) { }"),
        }
    }
}

impl Default for BooleanLiteralUnnecessary {
    fn default() -> Self {
        Self::new()
    }
}

/// `Some(value)` when `node` is a `true`/`false` literal, ignoring parentheses
fn bool_literal(node: Node<'_>) -> Option<bool> {
    let inner = node.unparenthesized();
    if inner.kind() != K::LiteralExpr {
        return None;
    }
    match inner.token_kind() {
        Some(TokenKind::Keyword(Keyword::True)) => Some(true),
        Some(TokenKind::Keyword(Keyword::False)) => Some(false),
        _ => None,
    }
}

fn literal_text(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

fn binary_precedence(op: TokenKind) -> u8 {
    use TokenKind::*;
    match op {
        QuestionQuestion => 2,
        PipePipe => 3,
        AmpAmp => 4,
        Pipe => 5,
        Caret => 6,
        Amp => 7,
        EqEq | BangEq => 8,
        Lt | Gt | LtEq | GtEq => 9,
        Shl => 10,
        Plus | Minus => 11,
        _ => 12,
    }
}

/// Whether `node` can appear as an operand of an operator of precedence `min` unparenthesised
fn binds_at_least(node: Node<'_>, min: u8) -> bool {
    match node.kind() {
        K::BinaryExpr => node.token_kind().map_or(false, |op| binary_precedence(op) >= min),
        K::IsPatternExpr | K::AsExpr => 9 >= min,
        K::ConditionalExpr | K::AssignmentExpr | K::LambdaExpr | K::SwitchExpr | K::ThrowExpr => false,
        _ => true,
    }
}

fn operand(node: Node<'_>, min: u8) -> String {
    if binds_at_least(node, min) {
        node.text().to_string()
    } else {
        format!("({})", node.text())
    }
}

fn negated(node: Node<'_>) -> String {
    let node = node.unparenthesized();
    if let Some(value) = bool_literal(node) {
        return literal_text(!value).to_string();
    }
    format!("!{}", operand(node, 13))
}

/// Replacement for the whole expression, and whether the rewrite keeps every side effect
struct Rewrite {
    removed: Span,
    replacement: String,
    safe: bool,
}

impl BooleanLiteralUnnecessary {
    fn binary(&self, ctx: &RuleContext<'_>, node: Node<'_>) -> Option<Rewrite> {
        let op = node.token_kind()?;
        let op_span = node.token_span()?;
        let (left, right) = (node.child(0)?, node.child(1)?);
        let (left_lit, right_lit) = (bool_literal(left), bool_literal(right));
        let to_left = || Span::from_bounds(left.span().start, op_span.end());
        let to_right = || Span::from_bounds(op_span.start, right.span().end());

        match op {
            TokenKind::EqEq | TokenKind::BangEq => {
                let (value, other, removed) = match (left_lit, right_lit) {
                    (_, Some(value)) => (value, left, to_right()),
                    (Some(value), None) => (value, right, to_left()),
                    (None, None) => return None,
                };
                if ctx.model().type_of(other).is_nullable_value_type() {
                    return None;
                }
                let keep = value == (op == TokenKind::EqEq);
                let replacement = if keep { other.text().to_string() } else { negated(other) };
                Some(Rewrite {
                    removed,
                    replacement,
                    safe: true,
                })
            }
            TokenKind::AmpAmp | TokenKind::PipePipe => {
                let is_and = op == TokenKind::AmpAmp;
                if let Some(value) = left_lit {
                    // `true || x` and `false && x` never evaluate `x`
                    return Some(if value == is_and {
                        Rewrite {
                            removed: to_left(),
                            replacement: right.text().to_string(),
                            safe: true,
                        }
                    } else {
                        Rewrite {
                            removed: to_right(),
                            replacement: literal_text(value).to_string(),
                            safe: true,
                        }
                    });
                }
                let value = right_lit?;
                Some(if value == is_and {
                    Rewrite {
                        removed: to_right(),
                        replacement: left.text().to_string(),
                        safe: true,
                    }
                } else {
                    Rewrite {
                        removed: to_left(),
                        replacement: literal_text(value).to_string(),
                        safe: false,
                    }
                })
            }
            _ => None,
        }
    }

    fn conditional(&self, ctx: &RuleContext<'_>, node: Node<'_>) -> Option<Rewrite> {
        let (cond, when_true, when_false) = (node.child(0)?, node.child(1)?, node.child(2)?);
        match (bool_literal(when_true), bool_literal(when_false)) {
            (Some(t), Some(f)) if t != f => Some(Rewrite {
                removed: Span::from_bounds(when_true.span().start, when_false.span().end()),
                replacement: if t { cond.text().to_string() } else { negated(cond) },
                safe: true,
            }),
            (Some(_), Some(_)) | (None, None) => None,
            (Some(t), None) => {
                if !is_boolean(ctx, when_false) {
                    return None;
                }
                let replacement = if t {
                    format!("{} || {}", operand(cond, 3), operand(when_false, 4))
                } else {
                    format!("{} && {}", negated(cond), operand(when_false, 5))
                };
                Some(Rewrite {
                    removed: when_true.span(),
                    replacement,
                    safe: true,
                })
            }
            (None, Some(f)) => {
                if !is_boolean(ctx, when_true) {
                    return None;
                }
                let replacement = if f {
                    format!("{} || {}", negated(cond), operand(when_true, 4))
                } else {
                    format!("{} && {}", operand(cond, 4), operand(when_true, 5))
                };
                Some(Rewrite {
                    removed: when_false.span(),
                    replacement,
                    safe: true,
                })
            }
        }
    }
}

/// Operands that may be combined with `&&`/`||`: not `null`, not a known non-bool type
fn is_boolean(ctx: &RuleContext<'_>, node: Node<'_>) -> bool {
    let inner = node.unparenthesized();
    if inner.kind() == K::LiteralExpr && inner.token_kind() == Some(TokenKind::Keyword(Keyword::Null)) {
        return false;
    }
    let ty = ctx.model().type_of(inner);
    ty.is_unknown() || ty.is_bool()
}

impl Rule for BooleanLiteralUnnecessary {
    fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    fn triggers(&self) -> &[SyntaxKind] {
        &[K::BinaryExpr, K::PrefixUnaryExpr, K::ConditionalExpr]
    }

    fn check(&self, ctx: &RuleContext<'_>, node: Node<'_>) -> Result<(), RuleError> {
        let rewrite = match node.kind() {
            K::BinaryExpr => self.binary(ctx, node),
            K::ConditionalExpr => self.conditional(ctx, node),
            K::PrefixUnaryExpr if node.token_kind() == Some(TokenKind::Bang) => node
                .child(0)
                .and_then(bool_literal)
                .map(|value| Rewrite {
                    removed: node.span(),
                    replacement: literal_text(!value).to_string(),
                    safe: true,
                }),
            _ => None,
        };
        let Some(rewrite) = rewrite else {
            return Ok(());
        };

        let edits = vec![TextEdit::replace(node.span(), rewrite.replacement)];
        let description = "Remove the unnecessary Boolean literal";
        let fix = if rewrite.safe && !node.contains_comments() {
            Fix::safe(description, edits)
        } else {
            Fix::unsafe_fix(description, edits)
        };
        ctx.report(Issue::new(rewrite.removed, MESSAGE).with_fix(fix));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixer::{FixMode, Fixer};
    use crate::rules::testing;

    fn wrap(body: &str) -> String {
        format!("class C {{ void M(bool a, bool b, bool? n) {{ {} }} }}", body)
    }

    fn fixed(body: &str) -> String {
        let text = wrap(body);
        let diags = testing::check(&BooleanLiteralUnnecessary::new(), &text);
        Fixer::apply(&text, &diags, FixMode::All).text
    }

    fn assert_fixed(body: &str, expected: &str) {
        assert_eq!(fixed(body), wrap(expected));
    }

    #[test]
    fn test_reports_removable_parts() {
        let rule = BooleanLiteralUnnecessary::new();
        assert_eq!(testing::spans(&rule, &wrap("var x = a == true;")), vec!["== true"]);
        assert_eq!(testing::spans(&rule, &wrap("var x = false != a;")), vec!["false !="]);
        assert_eq!(testing::spans(&rule, &wrap("var z = true || ((true));")), vec!["|| ((true))"]);
        assert_eq!(testing::spans(&rule, &wrap("var x = !true;")), vec!["!true"]);
        assert_eq!(testing::spans(&rule, &wrap("var x = a ? true : false;")), vec!["true : false"]);
    }

    #[test]
    fn test_fix_rewrites() {
        assert_fixed("var x = a == true;", "var x = a;");
        assert_fixed("var x = a == false;", "var x = !a;");
        assert_fixed("var x = a != true;", "var x = !a;");
        assert_fixed("var z = true || ((true));", "var z = true;");
        assert_fixed("var x = a && true;", "var x = a;");
        assert_fixed("var x = false || a;", "var x = a;");
        assert_fixed("var x = a ? false : true;", "var x = !a;");
        assert_fixed("var x = a ? true : b;", "var x = a || b;");
        assert_fixed("var x = a ? b : false;", "var x = a && b;");
        assert_fixed("var x = (a == b) == false;", "var x = !(a == b);");
    }

    #[test]
    fn test_compliant_expressions() {
        let rule = BooleanLiteralUnnecessary::new();
        assert!(testing::lines(&rule, &wrap("var x = a == b; var y = a && b;")).is_empty());
        assert!(testing::lines(&rule, &wrap("var x = n == true; var y = a ? true : true;")).is_empty());
        assert!(testing::lines(&rule, &wrap("object o = a ? true : null;")).is_empty());
    }

    #[test]
    fn test_side_effect_dropping_fix_is_unsafe() {
        let text = wrap("var x = Check() || true;");
        let diags = testing::check(&BooleanLiteralUnnecessary::new(), &text);
        assert_eq!(diags.len(), 1);
        assert!(diags[0].has_unsafe_fix());
        assert_eq!(Fixer::apply(&text, &diags, FixMode::SafeOnly).applied, 0);
    }
}
