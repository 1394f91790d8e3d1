//! Reader for the expression attributes of legacy tree documents.
//!
//! Legacy `eval` attributes hold Python literals: numbers, strings,
//! `True`/`False`/`None`, lists, tuples, dicts, `ref('xml_id')` lookups and
//! `Command.<op>(...)` relation commands. Commands are lowered to the
//! legacy opcode tuples so that [`Value::into_relation_if_commands`] has a
//! single input shape to convert.

use indexmap::IndexMap;

use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Minus,
    Plus,
    Eof,
}

/// Expressions with these markers stay live code.
const CODE_MARKERS: &[&str] = &["time.", "obj().", "DateTime."];

/// True when the expression must be kept verbatim instead of evaluated.
pub fn is_live_code(src: &str) -> bool {
    CODE_MARKERS.iter().any(|m| src.contains(m))
}

/// Evaluate a literal expression.
pub fn evaluate(src: &str) -> Result<Value, String> {
    let tokens = lex(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expr()?;
    match parser.peek() {
        Token::Eof => Ok(value),
        other => Err(format!("unexpected trailing token {:?}", other)),
    }
}

fn lex(src: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0usize;

    while pos < chars.len() {
        let c = chars[pos];
        if c.is_whitespace() {
            pos += 1;
            continue;
        }
        let single = match c {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            '{' => Some(Token::LBrace),
            '}' => Some(Token::RBrace),
            ',' => Some(Token::Comma),
            ':' => Some(Token::Colon),
            '-' => Some(Token::Minus),
            '+' => Some(Token::Plus),
            '.' if !chars.get(pos + 1).is_some_and(|n| n.is_ascii_digit()) => Some(Token::Dot),
            _ => None,
        };
        if let Some(tok) = single {
            tokens.push(tok);
            pos += 1;
            continue;
        }

        if c == '\'' || c == '"' {
            let (s, next) = lex_string(&chars, pos)?;
            tokens.push(Token::Str(s));
            pos = next;
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            let start = pos;
            while pos < chars.len()
                && (chars[pos].is_ascii_alphanumeric() || chars[pos] == '.' || chars[pos] == '_')
            {
                // exponent sign
                if (chars[pos] == 'e' || chars[pos] == 'E')
                    && matches!(chars.get(pos + 1), Some('-') | Some('+'))
                {
                    pos += 1;
                }
                pos += 1;
            }
            let text: String = chars[start..pos].iter().filter(|c| **c != '_').collect();
            let is_float = text.contains('.') || text.contains('e') || text.contains('E');
            if is_float {
                let f = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{}'", text))?;
                tokens.push(Token::Float(f));
            } else {
                let i = text
                    .parse::<i64>()
                    .map_err(|_| format!("invalid number '{}'", text))?;
                tokens.push(Token::Int(i));
            }
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = pos;
            while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                pos += 1;
            }
            tokens.push(Token::Name(chars[start..pos].iter().collect()));
            continue;
        }

        return Err(format!("unexpected character '{}'", c));
    }
    tokens.push(Token::Eof);
    Ok(tokens)
}

fn lex_string(chars: &[char], start: usize) -> Result<(String, usize), String> {
    let quote = chars[start];
    let triple = chars.get(start + 1) == Some(&quote) && chars.get(start + 2) == Some(&quote);
    let mut pos = if triple { start + 3 } else { start + 1 };
    let mut out = String::new();
    loop {
        let Some(&c) = chars.get(pos) else {
            return Err("unterminated string literal".to_owned());
        };
        if c == quote {
            if !triple {
                return Ok((out, pos + 1));
            }
            if chars.get(pos + 1) == Some(&quote) && chars.get(pos + 2) == Some(&quote) {
                return Ok((out, pos + 3));
            }
        }
        if c == '\\' {
            let Some(&esc) = chars.get(pos + 1) else {
                return Err("unterminated escape".to_owned());
            };
            match esc {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '0' => out.push('\0'),
                '\\' | '\'' | '"' => out.push(esc),
                '\n' => {}
                other => {
                    out.push('\\');
                    out.push(other);
                }
            }
            pos += 2;
            continue;
        }
        if c == '\n' && !triple {
            return Err("newline in string literal".to_owned());
        }
        out.push(c);
        pos += 1;
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, want: Token) -> Result<(), String> {
        let got = self.advance();
        if got == want {
            Ok(())
        } else {
            Err(format!("expected {:?}, found {:?}", want, got))
        }
    }

    fn expr(&mut self) -> Result<Value, String> {
        match self.advance() {
            Token::Int(i) => Ok(Value::Int(i)),
            Token::Float(f) => Ok(Value::Float(f)),
            Token::Str(mut s) => {
                // implicit concatenation of adjacent literals
                while let Token::Str(next) = self.peek().clone() {
                    self.pos += 1;
                    s.push_str(&next);
                }
                Ok(Value::Str(s))
            }
            Token::Minus => match self.expr()? {
                Value::Int(i) => Ok(Value::Int(-i)),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(format!("cannot negate {:?}", other)),
            },
            Token::Plus => self.expr(),
            Token::LBracket => Ok(Value::List(self.items(Token::RBracket)?)),
            Token::LParen => {
                if *self.peek() == Token::RParen {
                    self.pos += 1;
                    return Ok(Value::Tuple(Vec::new()));
                }
                let first = self.expr()?;
                match self.advance() {
                    Token::RParen => Ok(first),
                    Token::Comma => {
                        let mut items = vec![first];
                        items.extend(self.items(Token::RParen)?);
                        Ok(Value::Tuple(items))
                    }
                    other => Err(format!("expected ',' or ')', found {:?}", other)),
                }
            }
            Token::LBrace => self.dict(),
            Token::Name(name) => self.name(name),
            other => Err(format!("unexpected token {:?}", other)),
        }
    }

    /// Comma-separated items up to `close`, trailing comma allowed.
    fn items(&mut self, close: Token) -> Result<Vec<Value>, String> {
        let mut items = Vec::new();
        loop {
            if *self.peek() == close {
                self.pos += 1;
                return Ok(items);
            }
            items.push(self.expr()?);
            match self.advance() {
                Token::Comma => continue,
                tok if tok == close => return Ok(items),
                other => return Err(format!("expected ',' or {:?}, found {:?}", close, other)),
            }
        }
    }

    fn dict(&mut self) -> Result<Value, String> {
        let mut map = IndexMap::new();
        loop {
            if *self.peek() == Token::RBrace {
                self.pos += 1;
                return Ok(Value::Map(map));
            }
            let key = match self.expr()? {
                Value::Str(s) => s,
                Value::Int(i) => i.to_string(),
                other => return Err(format!("unsupported dict key {:?}", other)),
            };
            self.expect(Token::Colon)?;
            let value = self.expr()?;
            map.insert(key, value);
            match self.advance() {
                Token::Comma => continue,
                Token::RBrace => return Ok(Value::Map(map)),
                other => return Err(format!("expected ',' or '}}', found {:?}", other)),
            }
        }
    }

    fn name(&mut self, name: String) -> Result<Value, String> {
        match name.as_str() {
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            "None" => Ok(Value::Null),
            "ref" => {
                self.expect(Token::LParen)?;
                let target = match self.advance() {
                    Token::Str(s) => s,
                    other => return Err(format!("ref() expects a string, found {:?}", other)),
                };
                self.expect(Token::RParen)?;
                Ok(Value::Ref(target))
            }
            "Command" => {
                self.expect(Token::Dot)?;
                let op = match self.advance() {
                    Token::Name(op) => op,
                    other => return Err(format!("expected command name, found {:?}", other)),
                };
                self.expect(Token::LParen)?;
                let args = self.items(Token::RParen)?;
                lower_command(&op, args)
            }
            other => Err(format!("unsupported name '{}'", other)),
        }
    }
}

fn lower_command(op: &str, mut args: Vec<Value>) -> Result<Value, String> {
    let arity = |n: usize, args: &Vec<Value>| {
        if args.len() == n {
            Ok(())
        } else {
            Err(format!("Command.{} takes {} argument(s), got {}", op, n, args.len()))
        }
    };
    let tuple = |code: i64, id: Value, payload: Value| {
        Value::Tuple(vec![Value::Int(code), id, payload])
    };
    match op {
        "create" => {
            arity(1, &args)?;
            Ok(tuple(0, Value::Int(0), args.remove(0)))
        }
        "update" => {
            arity(2, &args)?;
            let payload = args.remove(1);
            Ok(tuple(1, args.remove(0), payload))
        }
        "delete" | "unlink" | "link" => {
            arity(1, &args)?;
            let code = match op {
                "delete" => 2,
                "unlink" => 3,
                _ => 4,
            };
            Ok(tuple(code, args.remove(0), Value::Int(0)))
        }
        "clear" => {
            arity(0, &args)?;
            Ok(tuple(5, Value::Int(0), Value::Int(0)))
        }
        "set" => {
            arity(1, &args)?;
            Ok(tuple(6, Value::Int(0), args.remove(0)))
        }
        other => Err(format!("unknown command '{}'", other)),
    }
}
