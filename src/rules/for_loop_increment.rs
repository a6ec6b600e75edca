//! `for` loops whose update moves the counter away from the stop condition

use crate::dispatch::RuleContext;
use crate::reporter::Issue;
use crate::rule::{Rule, RuleCategory, RuleError, RuleMeta};
use crate::syntax::{Node, SyntaxKind, TokenKind};

use SyntaxKind as K;

pub struct ForLoopIncrementSign {
    meta: RuleMeta,
}

impl ForLoopIncrementSign {
    pub fn new() -> Self {
        Self {
            meta: RuleMeta::new(
                "for-loop-increment-sign",
                "ForLoopIncrementSign",
                "A \"for\" loop update clause should move the counter in the right direction",
            )
            .with_category(RuleCategory::Correctness)
            .with_example_bad("for (int i = 0; i < n; i--) { }")
            .with_example_good("for (int i = 0; i < n; i++) { }"),
        }
    }
}

impl Default for ForLoopIncrementSign {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

/// Name of a plain identifier, looking through parentheses
fn identifier(node: Node<'_>) -> Option<&str> {
    let node = node.unparenthesized();
    (node.kind() == K::IdentifierName).then(|| node.name()).flatten()
}

/// Sign of an integer literal, allowing a leading unary minus
fn literal_sign(node: Node<'_>) -> Option<Direction> {
    let node = node.unparenthesized();
    match node.kind() {
        K::LiteralExpr if node.token_kind() == Some(TokenKind::IntLiteral) => {
            let digits = node.text().trim_start_matches("0x").trim_matches('0');
            (!digits.is_empty()).then_some(Direction::Up)
        }
        K::PrefixUnaryExpr if node.token_kind() == Some(TokenKind::Minus) => {
            match literal_sign(node.child(0)?)? {
                Direction::Up => Some(Direction::Down),
                Direction::Down => Some(Direction::Up),
            }
        }
        K::PrefixUnaryExpr if node.token_kind() == Some(TokenKind::Plus) => literal_sign(node.child(0)?),
        _ => None,
    }
}

fn flip(direction: Direction) -> Direction {
    match direction {
        Direction::Up => Direction::Down,
        Direction::Down => Direction::Up,
    }
}

/// Variable and direction an update expression moves it in
fn update_direction(expr: Node<'_>) -> Option<(&str, Direction)> {
    let expr = expr.unparenthesized();
    match expr.kind() {
        K::PrefixUnaryExpr | K::PostfixUnaryExpr => {
            let name = identifier(expr.child(0)?)?;
            match expr.token_kind()? {
                TokenKind::PlusPlus => Some((name, Direction::Up)),
                TokenKind::MinusMinus => Some((name, Direction::Down)),
                _ => None,
            }
        }
        K::AssignmentExpr => {
            let name = identifier(expr.child(0)?)?;
            let value = expr.child(1)?;
            match expr.token_kind()? {
                TokenKind::PlusEq => Some((name, literal_sign(value)?)),
                TokenKind::MinusEq => Some((name, flip(literal_sign(value)?))),
                TokenKind::Eq => {
                    // i = i + k, i = i - k
                    let value = value.unparenthesized();
                    if value.kind() != K::BinaryExpr || identifier(value.child(0)?)? != name {
                        return None;
                    }
                    let step = literal_sign(value.child(1)?)?;
                    match value.token_kind()? {
                        TokenKind::Plus => Some((name, step)),
                        TokenKind::Minus => Some((name, flip(step))),
                        _ => None,
                    }
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// Direction `counter` must move in to reach the bound of `condition`
fn required_direction(condition: Node<'_>, counter: &str) -> Option<Direction> {
    let condition = condition.unparenthesized();
    if condition.kind() != K::BinaryExpr {
        return None;
    }
    let towards_right = match condition.token_kind()? {
        TokenKind::Lt | TokenKind::LtEq => Direction::Up,
        TokenKind::Gt | TokenKind::GtEq => Direction::Down,
        _ => return None,
    };
    if identifier(condition.child(0)?) == Some(counter) {
        Some(towards_right)
    } else if identifier(condition.child(1)?) == Some(counter) {
        Some(flip(towards_right))
    } else {
        None
    }
}

impl Rule for ForLoopIncrementSign {
    fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    fn triggers(&self) -> &[SyntaxKind] {
        &[K::ForStmt]
    }

    fn check(&self, ctx: &RuleContext<'_>, node: Node<'_>) -> Result<(), RuleError> {
        let Some(condition) = node.child_of_kind(K::ForCondition).and_then(|c| c.child(0)) else {
            return Ok(());
        };
        let Some(incrementor) = node.child_of_kind(K::ForIncrementor) else {
            return Ok(());
        };
        let updates: Vec<Node<'_>> = incrementor.children().collect();
        let [update] = updates.as_slice() else {
            return Ok(());
        };
        let Some((updated, moves)) = update_direction(*update) else {
            return Ok(());
        };
        if required_direction(condition, updated).map_or(true, |required| moves == required) {
            return Ok(());
        }

        let verb = match moves {
            Direction::Up => "incremented",
            Direction::Down => "decremented",
        };
        ctx.report(
            Issue::new(
                update.span(),
                format!("'{}' is {} and will never reach 'stop condition'.", updated, verb),
            )
            .with_secondary(condition.span(), None),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing;

    fn wrap(header: &str) -> String {
        format!("class C {{\n void M(int x, int y) {{\n  for ({}) {{ }}\n }}\n}}", header)
    }

    #[test]
    fn test_wrong_direction() {
        let rule = ForLoopIncrementSign::new();
        let diags = testing::check(&rule, &wrap("int i = x; i > y; i++"));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].message, "'i' is incremented and will never reach 'stop condition'.");
        assert_eq!(diags[0].location.line, 3);
        assert_eq!(diags[0].secondary.len(), 1);
        let text = wrap("int i = x; i > y; i++");
        assert_eq!(&text[diags[0].secondary[0].location.span.range()], "i > y");

        assert_eq!(
            testing::lines(&rule, &wrap("int i = x; i < y; i -= 2")),
            vec![(3, "'i' is decremented and will never reach 'stop condition'.".to_string())]
        );
        assert_eq!(testing::lines(&rule, &wrap("int i = x; y > i; i--")).len(), 1);
        assert_eq!(testing::lines(&rule, &wrap("int i = x; i <= y; i = i - 1")).len(), 1);
        assert_eq!(testing::lines(&rule, &wrap("int i = x; i >= y; i += -1")).len(), 0);
    }

    #[test]
    fn test_compliant_loops() {
        let rule = ForLoopIncrementSign::new();
        for header in [
            "int i = x; i < y; i++",
            "int i = x; i > y; --i",
            "int i = x; y < i; i--",
            "int i = x; i < y; i += x",
            "int i = x, j = 0; i < y; j--",
            "int i = x; i < y; i++, y--",
            ";;",
            "int i = x; i != y; i--",
        ] {
            assert!(testing::lines(&rule, &wrap(header)).is_empty(), "{}", header);
        }
    }
}
