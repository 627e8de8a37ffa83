//! Arithmetic for expression and numeric-result zones.
//!
//! Expressions are small infix formulas (`3 + 4`, `2 × (5 − 1)`, `12 ÷ 3`).
//! Values are compared with a fixed tolerance; operands are integers or
//! decimals and can be rewritten in place for collision avoidance.

use crate::core::rng::SeededRng;

/// Two values closer than this are considered equal.
pub const VALUE_EPSILON: f64 = 1e-9;

/// Deepest nesting of parentheses and unary minus the evaluator accepts.
pub const MAX_NESTING: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq)]
enum Token {
    Number { value: f64, start: usize, end: usize },
    Add,
    Sub,
    Mul,
    Div,
    Open,
    Close,
}

fn tokenize(text: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let start = pos;
                let mut end = pos;
                while let Some(&(p, d)) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        end = p + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value: f64 = text[start..end].parse().ok()?;
                tokens.push(Token::Number { value, start, end });
            }
            '+' => {
                tokens.push(Token::Add);
                chars.next();
            }
            '-' | '−' | '–' => {
                tokens.push(Token::Sub);
                chars.next();
            }
            '*' | '×' | '·' => {
                tokens.push(Token::Mul);
                chars.next();
            }
            '/' | '÷' => {
                tokens.push(Token::Div);
                chars.next();
            }
            '(' => {
                tokens.push(Token::Open);
                chars.next();
            }
            ')' => {
                tokens.push(Token::Close);
                chars.next();
            }
            _ => return None,
        }
    }

    if tokens.is_empty() {
        None
    } else {
        Some(tokens)
    }
}

/// Recursive-descent evaluator.
///
/// ```text
/// expr   := term (('+' | '-') term)*
/// term   := factor (('*' | '/') factor)*
/// factor := '-' factor | number | '(' expr ')'
/// ```
struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    depth: usize,
}

impl<'t> Parser<'t> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn expr(&mut self) -> Option<f64> {
        let mut acc = self.term()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Add => {
                    self.pos += 1;
                    acc += self.term()?;
                }
                Token::Sub => {
                    self.pos += 1;
                    acc -= self.term()?;
                }
                _ => break,
            }
        }
        Some(acc)
    }

    fn term(&mut self) -> Option<f64> {
        let mut acc = self.factor()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Mul => {
                    self.pos += 1;
                    acc *= self.factor()?;
                }
                Token::Div => {
                    self.pos += 1;
                    let divisor = self.factor()?;
                    if divisor.abs() < VALUE_EPSILON {
                        return None;
                    }
                    acc /= divisor;
                }
                _ => break,
            }
        }
        Some(acc)
    }

    fn factor(&mut self) -> Option<f64> {
        if self.depth >= MAX_NESTING {
            return None;
        }
        self.depth += 1;
        let value = self.factor_inner();
        self.depth -= 1;
        value
    }

    fn factor_inner(&mut self) -> Option<f64> {
        match self.peek()? {
            Token::Sub => {
                self.pos += 1;
                Some(-self.factor()?)
            }
            Token::Number { value, .. } => {
                self.pos += 1;
                Some(value)
            }
            Token::Open => {
                self.pos += 1;
                let inner = self.expr()?;
                if self.peek() != Some(Token::Close) {
                    return None;
                }
                self.pos += 1;
                Some(inner)
            }
            _ => None,
        }
    }
}

/// Evaluate an expression or a numeric result. `None` if not arithmetic.
pub fn evaluate(text: &str) -> Option<f64> {
    let tokens = tokenize(text)?;
    let mut parser = Parser { tokens: &tokens, pos: 0, depth: 0 };
    let value = parser.expr()?;
    if parser.pos != tokens.len() || !value.is_finite() {
        return None;
    }
    Some(value)
}

/// Whether two values are equal within [`VALUE_EPSILON`].
#[inline]
pub fn values_equal(a: f64, b: f64) -> bool {
    (a - b).abs() < VALUE_EPSILON
}

/// Render a value the way numeric results are written.
pub fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Rewrite one operand of an expression.
///
/// The operand and the delta (1..=9) come from the PRNG; the rest of the
/// text, including spacing and operator glyphs, is preserved. Returns
/// `None` if the text has no operands or the rewrite no longer evaluates.
pub fn perturb_operand(text: &str, rng: &mut SeededRng) -> Option<String> {
    let tokens = tokenize(text)?;
    let operands: Vec<(f64, usize, usize)> = tokens
        .iter()
        .filter_map(|t| match *t {
            Token::Number { value, start, end } => Some((value, start, end)),
            _ => None,
        })
        .collect();

    let &(value, start, end) = rng.choose(&operands)?;
    let delta = (rng.next_int(9) + 1) as f64;
    let replaced = if rng.next_bool(0.5) && value - delta >= 0.0 {
        value - delta
    } else {
        value + delta
    };

    let mut rewritten = String::with_capacity(text.len() + 2);
    rewritten.push_str(&text[..start]);
    rewritten.push_str(&format_value(replaced));
    rewritten.push_str(&text[end..]);

    evaluate(&rewritten).map(|_| rewritten)
}

/// Synthesize `a + b` with non-negative integer operands summing to `value`.
pub fn synthesize_sum(value: f64, rng: &mut SeededRng) -> Option<String> {
    if value.fract() != 0.0 || !(0.0..=1e9).contains(&value) {
        return None;
    }
    let total = value as i64;
    let a = rng.next_int_range(0, total as i32) as i64;
    Some(format!("{} + {}", a, total - a))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluate_basic() {
        assert_eq!(evaluate("3 + 4"), Some(7.0));
        assert_eq!(evaluate("2 × 6"), Some(12.0));
        assert_eq!(evaluate("12 ÷ 3"), Some(4.0));
        assert_eq!(evaluate("10 − 4"), Some(6.0));
        assert_eq!(evaluate("2 + 3 * 4"), Some(14.0));
        assert_eq!(evaluate("(2 + 3) * 4"), Some(20.0));
        assert_eq!(evaluate("-3 + 5"), Some(2.0));
        assert_eq!(evaluate("1.5 * 2"), Some(3.0));
        assert_eq!(evaluate("7"), Some(7.0));
        assert_eq!(evaluate("1/2"), Some(0.5));
    }

    #[test]
    fn test_evaluate_rejects_garbage() {
        assert_eq!(evaluate(""), None);
        assert_eq!(evaluate("cat"), None);
        assert_eq!(evaluate("3 +"), None);
        assert_eq!(evaluate("(1 + 2"), None);
        assert_eq!(evaluate("4 / 0"), None);
        assert_eq!(evaluate("1 2"), None);
        assert_eq!(evaluate("1..2"), None);
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let shallow = format!("{}1{}", "(".repeat(MAX_NESTING - 1), ")".repeat(MAX_NESTING - 1));
        assert_eq!(evaluate(&shallow), Some(1.0));

        let deep = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        assert_eq!(evaluate(&deep), None);

        let negations = format!("{}7", "-".repeat(200_000));
        assert_eq!(evaluate(&negations), None);
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(7.0), "7");
        assert_eq!(format_value(-3.0), "-3");
        assert_eq!(format_value(0.5), "0.5");
    }

    #[test]
    fn test_perturb_changes_value_and_keeps_layout() {
        let mut rng = SeededRng::new(42);
        let original = "3 × 4";
        let rewritten = perturb_operand(original, &mut rng).unwrap();

        assert!(rewritten.contains(" × "));
        let before = evaluate(original).unwrap();
        let after = evaluate(&rewritten).unwrap();
        assert!(!values_equal(before, after));
    }

    #[test]
    fn test_perturb_is_deterministic() {
        let a = perturb_operand("12 ÷ 3 + 1", &mut SeededRng::new(9));
        let b = perturb_operand("12 ÷ 3 + 1", &mut SeededRng::new(9));
        assert_eq!(a, b);
        assert!(perturb_operand("banana", &mut SeededRng::new(9)).is_none());
    }

    #[test]
    fn test_synthesize_sum() {
        let mut rng = SeededRng::new(5);
        let text = synthesize_sum(12.0, &mut rng).unwrap();
        assert_eq!(evaluate(&text), Some(12.0));
        assert!(synthesize_sum(0.5, &mut rng).is_none());
        assert!(synthesize_sum(-1.0, &mut rng).is_none());
    }
}
