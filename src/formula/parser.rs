//! Arithmetic tokenizer and recursive-descent evaluator
//!
//! Grammar:
//!   expr   := term (('+' | '-') term)*
//!   term   := factor (('*' | '/') factor)*
//!   factor := ('+' | '-') factor | number | '(' expr ')'

use crate::error::OrchestrationError;
use crate::Result;

/// Bounds recursion on hostile inputs such as "((((((...".
const MAX_NESTING: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut end = start;
                let mut dots = 0;
                while let Some(&(i, d)) = chars.peek() {
                    if d.is_ascii_digit() {
                        end = i + 1;
                    } else if d == '.' {
                        dots += 1;
                        end = i + 1;
                    } else {
                        break;
                    }
                    chars.next();
                }

                let literal = &input[start..end];
                if dots > 1 || literal == "." {
                    return Err(OrchestrationError::Evaluation(format!(
                        "Malformed number '{}'",
                        literal
                    )));
                }

                let value = literal.parse::<f64>().map_err(|_| {
                    OrchestrationError::Evaluation(format!("Malformed number '{}'", literal))
                })?;
                tokens.push(Token::Number(value));
            }
            '+' | '-' | '*' | '/' | '(' | ')' => {
                tokens.push(match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '(' => Token::LParen,
                    _ => Token::RParen,
                });
                chars.next();
            }
            other => {
                return Err(OrchestrationError::Evaluation(format!(
                    "Unexpected character '{}'",
                    other
                )));
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expr(&mut self) -> Result<f64> {
        let mut value = self.term()?;

        while let Some(op) = self.peek() {
            match op {
                Token::Plus => {
                    self.advance();
                    value += self.term()?;
                }
                Token::Minus => {
                    self.advance();
                    value -= self.term()?;
                }
                _ => break,
            }
        }

        Ok(value)
    }

    fn term(&mut self) -> Result<f64> {
        let mut value = self.factor()?;

        while let Some(op) = self.peek() {
            match op {
                Token::Star => {
                    self.advance();
                    value *= self.factor()?;
                }
                Token::Slash => {
                    self.advance();
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        return Err(OrchestrationError::Evaluation(
                            "Division by zero".to_string(),
                        ));
                    }
                    value /= divisor;
                }
                _ => break,
            }
        }

        Ok(value)
    }

    fn factor(&mut self) -> Result<f64> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(OrchestrationError::Evaluation(
                "Expression nested too deeply".to_string(),
            ));
        }

        let value = match self.advance() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::Minus) => self.factor().map(|v| -v),
            Some(Token::Plus) => self.factor(),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(OrchestrationError::Evaluation(
                        "Unbalanced parentheses".to_string(),
                    )),
                }
            }
            Some(Token::RParen) => Err(OrchestrationError::Evaluation(
                "Unexpected ')'".to_string(),
            )),
            Some(_) => Err(OrchestrationError::Evaluation(
                "Operator without operand".to_string(),
            )),
            None => Err(OrchestrationError::Evaluation(
                "Unexpected end of expression".to_string(),
            )),
        };

        self.depth -= 1;
        value
    }
}

/// Evaluate a pure arithmetic expression with standard precedence.
pub fn evaluate_arithmetic(input: &str) -> Result<f64> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(OrchestrationError::Evaluation(
            "Empty expression".to_string(),
        ));
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;

    if parser.pos != parser.tokens.len() {
        return Err(OrchestrationError::Evaluation(
            "Unexpected trailing input".to_string(),
        ));
    }

    if !value.is_finite() {
        return Err(OrchestrationError::Evaluation(
            "Result is not a finite number".to_string(),
        ));
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(input: &str) -> f64 {
        evaluate_arithmetic(input).unwrap()
    }

    #[test]
    fn test_precedence_and_associativity() {
        assert_eq!(eval("1 + 2 * 3"), 7.0);
        assert_eq!(eval("(1 + 2) * 3"), 9.0);
        assert_eq!(eval("10 - 4 - 3"), 3.0);
        assert_eq!(eval("100 / 10 / 5"), 2.0);
        assert_eq!(eval("2 * 3 + 4 * 5"), 26.0);
    }

    #[test]
    fn test_unary_and_decimals() {
        assert_eq!(eval("-3 + 5"), 2.0);
        assert_eq!(eval("2 - -3"), 5.0);
        assert_eq!(eval("-(2 + 3)"), -5.0);
        assert_eq!(eval("0.5 * 4"), 2.0);
        assert_eq!(eval(".5 + 1."), 1.5);
    }

    #[test]
    fn test_division_by_zero() {
        let err = evaluate_arithmetic("150 / 0").unwrap_err();
        assert!(err.to_string().contains("Division by zero"));

        let err = evaluate_arithmetic("1 / (2 - 2)").unwrap_err();
        assert!(err.to_string().contains("Division by zero"));
    }

    #[test]
    fn test_malformed_inputs() {
        for input in ["", "   ", "1 +", "(1 + 2", "1 + 2)", "1..2", ".", "2 ** 3", "3 4", "*"] {
            assert!(
                evaluate_arithmetic(input).is_err(),
                "expected error for {:?}",
                input
            );
        }
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        assert!(evaluate_arithmetic(&deep).is_err());

        let shallow = format!("{}1{}", "(".repeat(20), ")".repeat(20));
        assert_eq!(eval(&shallow), 1.0);
    }
}
