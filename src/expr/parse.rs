//! Formula parser for persisted artifacts.
//!
//! A reopened expression is compiled against its declared operand names
//! before anything is evaluated: identifiers outside the declared set and
//! calls outside the function whitelist are rejected here, which is the
//! whole injection guard for untrusted artifacts.

use crate::dtype::Scalar;
use crate::errors::{
    FormulaParseSnafu, Result, UnknownFunctionSnafu, UnknownIdentifierSnafu,
};
use crate::expr::node::{BinOp, ExprNode, Func, UnOp};

pub fn parse_formula(formula: &str, operand_names: &[&str]) -> Result<ExprNode> {
    let tokens = tokenize(formula)?;
    let mut p = Parser {
        tokens,
        pos: 0,
        names: operand_names,
    };
    let node = p.parse_or()?;
    match p.peek() {
        Some(tok) => FormulaParseSnafu {
            pos: tok.pos,
            reason: format!("unexpected trailing '{}'", tok.text()),
        }
        .fail(),
        None => Ok(node),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(Scalar),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    pos: usize,
}

impl Token {
    fn text(&self) -> String {
        match &self.kind {
            TokenKind::Number(v) => v.to_string(),
            TokenKind::Ident(s) => s.clone(),
            TokenKind::Op(s) => (*s).to_string(),
            TokenKind::LParen => "(".to_string(),
            TokenKind::RParen => ")".to_string(),
            TokenKind::Comma => ",".to_string(),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let bytes = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        let pos = i;
        match c {
            b' ' | b'\t' | b'\n' | b'\r' => {
                i += 1;
            }
            b'(' => {
                out.push(Token { kind: TokenKind::LParen, pos });
                i += 1;
            }
            b')' => {
                out.push(Token { kind: TokenKind::RParen, pos });
                i += 1;
            }
            b',' => {
                out.push(Token { kind: TokenKind::Comma, pos });
                i += 1;
            }
            b'+' | b'-' | b'/' | b'&' | b'|' | b'^' | b'~' => {
                let op = match c {
                    b'+' => "+",
                    b'-' => "-",
                    b'/' => "/",
                    b'&' => "&",
                    b'|' => "|",
                    b'^' => "^",
                    _ => "~",
                };
                out.push(Token { kind: TokenKind::Op(op), pos });
                i += 1;
            }
            b'*' => {
                if bytes.get(i + 1) == Some(&b'*') {
                    out.push(Token { kind: TokenKind::Op("**"), pos });
                    i += 2;
                } else {
                    out.push(Token { kind: TokenKind::Op("*"), pos });
                    i += 1;
                }
            }
            b'=' | b'!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    let op = if c == b'=' { "==" } else { "!=" };
                    out.push(Token { kind: TokenKind::Op(op), pos });
                    i += 2;
                } else {
                    return FormulaParseSnafu {
                        pos,
                        reason: format!("stray '{}'", c as char),
                    }
                    .fail();
                }
            }
            b'<' | b'>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    let op = if c == b'<' { "<=" } else { ">=" };
                    out.push(Token { kind: TokenKind::Op(op), pos });
                    i += 2;
                } else {
                    let op = if c == b'<' { "<" } else { ">" };
                    out.push(Token { kind: TokenKind::Op(op), pos });
                    i += 1;
                }
            }
            b'0'..=b'9' | b'.' => {
                let mut j = i;
                let mut float = false;
                while j < bytes.len() {
                    match bytes[j] {
                        b'0'..=b'9' => j += 1,
                        b'.' => {
                            float = true;
                            j += 1;
                        }
                        b'e' | b'E' => {
                            float = true;
                            j += 1;
                            if matches!(bytes.get(j), Some(b'+') | Some(b'-')) {
                                j += 1;
                            }
                        }
                        _ => break,
                    }
                }
                let text = &src[i..j];
                let value = if float {
                    text.parse::<f64>().ok().map(Scalar::F64)
                } else {
                    text.parse::<i64>().ok().map(Scalar::I64)
                };
                match value {
                    Some(v) => out.push(Token { kind: TokenKind::Number(v), pos }),
                    None => {
                        return FormulaParseSnafu {
                            pos,
                            reason: format!("bad numeric literal '{text}'"),
                        }
                        .fail()
                    }
                }
                i = j;
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                let mut j = i;
                while j < bytes.len()
                    && (bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_')
                {
                    j += 1;
                }
                out.push(Token {
                    kind: TokenKind::Ident(src[i..j].to_string()),
                    pos,
                });
                i = j;
            }
            other => {
                return FormulaParseSnafu {
                    pos,
                    reason: format!("unexpected byte '{}'", other as char),
                }
                .fail()
            }
        }
    }
    Ok(out)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    names: &'a [&'a str],
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn eat_op(&mut self, ops: &[&str]) -> Option<&'static str> {
        if let Some(Token { kind: TokenKind::Op(op), .. }) = self.peek() {
            if let Some(hit) = ops.iter().find(|o| *o == op) {
                let hit: &'static str = match *hit {
                    "+" => "+",
                    "-" => "-",
                    "*" => "*",
                    "/" => "/",
                    "**" => "**",
                    "==" => "==",
                    "!=" => "!=",
                    "<" => "<",
                    "<=" => "<=",
                    ">" => ">",
                    ">=" => ">=",
                    "&" => "&",
                    "|" => "|",
                    "^" => "^",
                    _ => "~",
                };
                self.pos += 1;
                return Some(hit);
            }
        }
        None
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<()> {
        match self.peek() {
            Some(tok) if &tok.kind == kind => {
                self.pos += 1;
                Ok(())
            }
            Some(tok) => FormulaParseSnafu {
                pos: tok.pos,
                reason: format!("expected {what}, found '{}'", tok.text()),
            }
            .fail(),
            None => FormulaParseSnafu {
                pos: self.tokens.last().map(|t| t.pos + 1).unwrap_or(0),
                reason: format!("expected {what}, found end of formula"),
            }
            .fail(),
        }
    }

    fn parse_or(&mut self) -> Result<ExprNode> {
        let mut lhs = self.parse_xor()?;
        while self.eat_op(&["|"]).is_some() {
            let rhs = self.parse_xor()?;
            lhs = ExprNode::binary(BinOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_xor(&mut self) -> Result<ExprNode> {
        let mut lhs = self.parse_and()?;
        while self.eat_op(&["^"]).is_some() {
            let rhs = self.parse_and()?;
            lhs = ExprNode::binary(BinOp::Xor, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<ExprNode> {
        let mut lhs = self.parse_cmp()?;
        while self.eat_op(&["&"]).is_some() {
            let rhs = self.parse_cmp()?;
            lhs = ExprNode::binary(BinOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_cmp(&mut self) -> Result<ExprNode> {
        let lhs = self.parse_addsub()?;
        if let Some(op) = self.eat_op(&["==", "!=", "<=", "<", ">=", ">"]) {
            let rhs = self.parse_addsub()?;
            let op = match op {
                "==" => BinOp::Eq,
                "!=" => BinOp::Ne,
                "<" => BinOp::Lt,
                "<=" => BinOp::Le,
                ">" => BinOp::Gt,
                _ => BinOp::Ge,
            };
            return Ok(ExprNode::binary(op, lhs, rhs));
        }
        Ok(lhs)
    }

    fn parse_addsub(&mut self) -> Result<ExprNode> {
        let mut lhs = self.parse_muldiv()?;
        while let Some(op) = self.eat_op(&["+", "-"]) {
            let rhs = self.parse_muldiv()?;
            let op = if op == "+" { BinOp::Add } else { BinOp::Sub };
            lhs = ExprNode::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_muldiv(&mut self) -> Result<ExprNode> {
        let mut lhs = self.parse_unary()?;
        while let Some(op) = self.eat_op(&["*", "/"]) {
            let rhs = self.parse_unary()?;
            let op = if op == "*" { BinOp::Mul } else { BinOp::Div };
            lhs = ExprNode::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<ExprNode> {
        if self.eat_op(&["-"]).is_some() {
            return Ok(ExprNode::unary(UnOp::Neg, self.parse_unary()?));
        }
        if self.eat_op(&["~"]).is_some() {
            return Ok(ExprNode::unary(UnOp::Not, self.parse_unary()?));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<ExprNode> {
        let base = self.parse_atom()?;
        if self.eat_op(&["**"]).is_some() {
            // Right-associative; the exponent may carry its own unary sign.
            let exp = self.parse_unary()?;
            return Ok(ExprNode::binary(BinOp::Pow, base, exp));
        }
        Ok(base)
    }

    fn parse_atom(&mut self) -> Result<ExprNode> {
        let Some(tok) = self.peek().cloned() else {
            return FormulaParseSnafu {
                pos: self.tokens.last().map(|t| t.pos + 1).unwrap_or(0),
                reason: "unexpected end of formula".to_string(),
            }
            .fail();
        };
        match tok.kind {
            TokenKind::Number(v) => {
                self.pos += 1;
                Ok(ExprNode::Literal(v))
            }
            TokenKind::LParen => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.expect(&TokenKind::RParen, "')'")?;
                Ok(inner)
            }
            TokenKind::Ident(name) => {
                self.pos += 1;
                match name.as_str() {
                    "true" => return Ok(ExprNode::Literal(Scalar::Bool(true))),
                    "false" => return Ok(ExprNode::Literal(Scalar::Bool(false))),
                    _ => {}
                }
                if matches!(self.peek(), Some(Token { kind: TokenKind::LParen, .. })) {
                    self.pos += 1;
                    if name == "where" {
                        let cond = self.parse_or()?;
                        self.expect(&TokenKind::Comma, "','")?;
                        let x = self.parse_or()?;
                        self.expect(&TokenKind::Comma, "','")?;
                        let y = self.parse_or()?;
                        self.expect(&TokenKind::RParen, "')'")?;
                        return Ok(ExprNode::select(cond, x, y));
                    }
                    let Some(func) = Func::from_name(&name) else {
                        return UnknownFunctionSnafu { name }.fail();
                    };
                    let arg = self.parse_or()?;
                    self.expect(&TokenKind::RParen, "')'")?;
                    return Ok(ExprNode::call(func, arg));
                }
                match self.names.iter().position(|n| *n == name) {
                    Some(slot) => Ok(ExprNode::OperandRef(slot)),
                    None => UnknownIdentifierSnafu { name }.fail(),
                }
            }
            _ => FormulaParseSnafu {
                pos: tok.pos,
                reason: format!("unexpected '{}'", tok.text()),
            }
            .fail(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EngineError;

    #[test]
    fn test_rendered_formula_reparses() {
        let node = ExprNode::binary(
            BinOp::Mul,
            ExprNode::binary(
                BinOp::Add,
                ExprNode::OperandRef(0),
                ExprNode::Literal(Scalar::F64(2.0)),
            ),
            ExprNode::call(Func::Sin, ExprNode::OperandRef(1)),
        );
        let text = node.to_string();
        let back = parse_formula(&text, &["o0", "o1"]).unwrap();
        assert_eq!(back, node);
    }

    #[test]
    fn test_precedence() {
        let node = parse_formula("o0 + o1 * 2", &["o0", "o1"]).unwrap();
        assert_eq!(node.to_string(), "(o0 + (o1 * 2))");

        let node = parse_formula("-o0 ** 2", &["o0"]).unwrap();
        assert_eq!(node.to_string(), "(-(o0 ** 2))");

        let node = parse_formula("o0 < 1 & o1 >= 2", &["o0", "o1"]).unwrap();
        assert_eq!(node.to_string(), "((o0 < 1) & (o1 >= 2))");
    }

    #[test]
    fn test_where_form() {
        let node = parse_formula("where(o0 > 0, o1, 0.0)", &["o0", "o1"]).unwrap();
        assert!(matches!(node, ExprNode::Where { .. }));
    }

    #[test]
    fn test_unknown_identifier_rejected() {
        let err = parse_formula("o0 + evil", &["o0"]).unwrap_err();
        assert!(matches!(err, EngineError::UnknownIdentifier { .. }));
    }

    #[test]
    fn test_disallowed_function_rejected() {
        let err = parse_formula("open(o0)", &["o0"]).unwrap_err();
        assert!(matches!(err, EngineError::UnknownFunction { .. }));

        let err = parse_formula("__import__(o0)", &["o0"]).unwrap_err();
        assert!(matches!(err, EngineError::UnknownFunction { .. }));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(parse_formula("o0 + ", &["o0"]).is_err());
        assert!(parse_formula("o0 $ o1", &["o0", "o1"]).is_err());
        assert!(parse_formula("(o0", &["o0"]).is_err());
    }
}
