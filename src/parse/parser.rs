use memmap::Mmap;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::Display;
use std::fs::File;
use std::path::Path;

use super::tokenizer::{tokenize_line, Token, TokenKind};
use crate::ir::{BinOp, Expr, Instruction, Operand, Program, Value};

pub const WHITVM_EXTENSION: &str = "whitvm";

#[derive(Debug)]
pub(crate) enum ParseErrorKind {
    UnclosedDelimiter(usize, char),
    UnbalancedParen(usize),
    UnexpectedToken(usize, String),
    UnknownOpcode(usize, String),
    Arity(usize, &'static str, String),
    DuplicateLabel(usize, String),
    UndefinedLabel(usize, String),
    FileOpenError(Box<dyn Error>),
    MemoryMapError(Box<dyn Error>),
    InvalidExtension(String),
    InvalidEncoding(Box<dyn Error>),
}

impl ParseErrorKind {
    pub(crate) fn throw<T>(self) -> Result<T, ParseError> {
        let msg = match &self {
            ParseErrorKind::UnclosedDelimiter(line, sigil) => {
                format!("line {}: unclosed {} delimiter", line, sigil)
            }
            ParseErrorKind::UnbalancedParen(line) => {
                format!("line {}: unbalanced parenthesis", line)
            }
            ParseErrorKind::UnexpectedToken(line, token) => {
                format!("line {}: unexpected token: {}", line, token)
            }
            ParseErrorKind::UnknownOpcode(line, opcode) => {
                format!("line {}: unknown opcode: {}", line, opcode)
            }
            ParseErrorKind::Arity(line, opcode, detail) => {
                format!("line {}: {}: {}", line, opcode, detail)
            }
            ParseErrorKind::DuplicateLabel(line, label) => {
                format!("line {}: duplicate label declaration: {}", line, label)
            }
            ParseErrorKind::UndefinedLabel(line, label) => {
                format!("line {}: jump to undeclared label: {}", line, label)
            }
            ParseErrorKind::FileOpenError(err) => {
                format!("failed to open file, details: {}", err)
            }
            ParseErrorKind::MemoryMapError(err) => {
                format!("failed to memory map file, details: {}", err)
            }
            ParseErrorKind::InvalidExtension(file_name) => {
                format!("expected a .{} file, got: {}", WHITVM_EXTENSION, file_name)
            }
            ParseErrorKind::InvalidEncoding(err) => {
                format!("source is not valid utf-8, details: {}", err)
            }
        };
        Err(ParseError { msg, kind: self })
    }
}

impl Display for ParseErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug)]
#[allow(dead_code)]
pub struct ParseError {
    pub(crate) msg: String,
    pub(crate) kind: ParseErrorKind,
}

impl Error for ParseError {}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.msg)
    }
}

/// Reads a `.whitvm` source file through a read-only memory map.
pub fn read_source(file_name: &str) -> Result<String, ParseError> {
    let path = Path::new(file_name);
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext == WHITVM_EXTENSION => {}
        _ => return ParseErrorKind::InvalidExtension(file_name.to_string()).throw(),
    }
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) => return ParseErrorKind::FileOpenError(Box::new(err)).throw(),
    };
    let source = unsafe {
        match Mmap::map(&file) {
            Ok(map) => map,
            Err(err) => return ParseErrorKind::MemoryMapError(Box::new(err)).throw(),
        }
    };
    match std::str::from_utf8(&source) {
        Ok(text) => Ok(text.to_string()),
        Err(err) => ParseErrorKind::InvalidEncoding(Box::new(err)).throw(),
    }
}

impl Program {
    pub fn from_source(source: &str) -> Result<Program, ParseError> {
        parse(source)
    }

    pub fn from_file(file_name: &str) -> Result<Program, ParseError> {
        parse(&read_source(file_name)?)
    }
}

/// Parses a complete source text into a program.
///
/// Lines are blank, a single `:label:` declaration binding the next
/// instruction index, or one instruction. Every jump target is checked
/// against the label map before the program is returned.
pub fn parse(source: &str) -> Result<Program, ParseError> {
    let mut instructions = Vec::new();
    let mut labels: HashMap<String, usize> = HashMap::new();

    for (index, raw) in source.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        let tokens = tokenize_line(line, line_no)?;
        if tokens.len() == 1 && tokens[0].kind == TokenKind::Label {
            let name = tokens[0].text.clone();
            if labels.contains_key(&name) {
                return ParseErrorKind::DuplicateLabel(line_no, name).throw();
            }
            labels.insert(name, instructions.len());
            continue;
        }

        instructions.push(instruction(&tokens, line_no)?);
    }

    for instr in &instructions {
        if let Instruction::Jmp {
            target: Operand::LabelRef(name),
            line,
            ..
        } = instr
        {
            if !labels.contains_key(name) {
                return ParseErrorKind::UndefinedLabel(*line, name.clone()).throw();
            }
        }
    }

    Ok(Program {
        instructions,
        labels,
    })
}

fn instruction(tokens: &[Token], line: usize) -> Result<Instruction, ParseError> {
    let opcode = &tokens[0];
    if opcode.kind != TokenKind::Word {
        return ParseErrorKind::UnknownOpcode(line, opcode.text.clone()).throw();
    }

    match opcode.text.as_str() {
        "set" => {
            if tokens.len() != 3 {
                return ParseErrorKind::Arity(line, "set", "expected exactly 2 arguments".into())
                    .throw();
            }
            let dest = var_name(&tokens[1], line)?;
            let value = value_operand(&tokens[2], line)?;
            Ok(Instruction::Set { dest, value, line })
        }
        "say" => {
            if !(2..=4).contains(&tokens.len()) {
                return ParseErrorKind::Arity(line, "say", "expected 1 to 3 arguments".into())
                    .throw();
            }
            let value = value_operand(&tokens[1], line)?;
            let newlines = match tokens.get(2) {
                Some(token) => value_operand(token, line)?,
                None => Operand::default_one(),
            };
            let condition = match tokens.get(3) {
                Some(token) => value_operand(token, line)?,
                None => Operand::default_one(),
            };
            Ok(Instruction::Say {
                value,
                newlines,
                condition,
                line,
            })
        }
        "ask" => {
            if !(2..=3).contains(&tokens.len()) {
                return ParseErrorKind::Arity(line, "ask", "expected 1 or 2 arguments".into())
                    .throw();
            }
            let count = value_operand(&tokens[1], line)?;
            if let Operand::Literal(Value::Integer(n)) = &count {
                if *n < 1 {
                    return ParseErrorKind::Arity(
                        line,
                        "ask",
                        format!("option count must be at least 1, got {}", n),
                    )
                    .throw();
                }
            }
            let condition = match tokens.get(2) {
                Some(token) => value_operand(token, line)?,
                None => Operand::default_one(),
            };
            Ok(Instruction::Ask {
                count,
                condition,
                line,
            })
        }
        "jmp" => {
            if !(2..=3).contains(&tokens.len()) {
                return ParseErrorKind::Arity(line, "jmp", "expected 1 or 2 arguments".into())
                    .throw();
            }
            if tokens[1].kind != TokenKind::Label {
                return ParseErrorKind::Arity(
                    line,
                    "jmp",
                    format!("first argument must be a :label:, got {}", tokens[1].text),
                )
                .throw();
            }
            let target = Operand::LabelRef(tokens[1].text.clone());
            let condition = match tokens.get(2) {
                Some(token) => value_operand(token, line)?,
                None => Operand::default_one(),
            };
            Ok(Instruction::Jmp {
                target,
                condition,
                line,
            })
        }
        "halt" => {
            if tokens.len() > 2 {
                return ParseErrorKind::Arity(line, "halt", "expected at most 1 argument".into())
                    .throw();
            }
            let condition = match tokens.get(1) {
                Some(token) => value_operand(token, line)?,
                None => Operand::default_one(),
            };
            Ok(Instruction::Halt { condition, line })
        }
        opcode => ParseErrorKind::UnknownOpcode(line, opcode.to_string()).throw(),
    }
}

fn var_name(token: &Token, line: usize) -> Result<String, ParseError> {
    if token.kind != TokenKind::Var || token.text.is_empty() {
        return ParseErrorKind::UnexpectedToken(
            line,
            format!("expected a *variable*, got {}", token.text),
        )
        .throw();
    }
    Ok(token.text.clone())
}

fn value_operand(token: &Token, line: usize) -> Result<Operand, ParseError> {
    match token.kind {
        TokenKind::Word => match token.text.parse::<i64>() {
            Ok(n) => Ok(Operand::Literal(Value::Integer(n))),
            Err(_) => ParseErrorKind::UnexpectedToken(line, token.text.clone()).throw(),
        },
        TokenKind::Str => Ok(Operand::Literal(Value::Text(token.text.clone()))),
        TokenKind::Var => Ok(Operand::VarRef(var_name(token, line)?)),
        TokenKind::Expr => Ok(Operand::Expr(parse_expr(&token.text, line)?)),
        TokenKind::Label => {
            ParseErrorKind::UnexpectedToken(line, format!(":{}:", token.text)).throw()
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
enum ExprToken {
    Int(i64),
    Str(String),
    Var(String),
    Sub(String),
    Op(BinOp),
    Word(String),
}

/// Parses the text between `(` and `)` into an expression tree.
///
/// Grammar, tightest first: term, `* / %`, `+ -`, `== != < > <= >=`, all
/// left-associative. A `*` immediately followed by an identifier character
/// opens a variable reference; any other `*` is multiplication.
pub(crate) fn parse_expr(text: &str, line: usize) -> Result<Expr, ParseError> {
    let tokens = lex_expr(text, line)?;
    let mut parser = ExprParser {
        tokens,
        pos: 0,
        line,
    };
    let expr = parser.expression()?;
    if parser.pos != parser.tokens.len() {
        return ParseErrorKind::UnexpectedToken(line, parser.describe_current()).throw();
    }
    Ok(expr)
}

fn lex_expr(text: &str, line: usize) -> Result<Vec<ExprToken>, ParseError> {
    let bytes = text.as_bytes();
    let mut tokens: Vec<ExprToken> = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() {
            i += 1;
            continue;
        }

        match bytes[i] {
            b'#' => {
                let end = match (i + 1..bytes.len()).find(|&j| bytes[j] == b'#') {
                    Some(end) => end,
                    None => return ParseErrorKind::UnclosedDelimiter(line, '#').throw(),
                };
                tokens.push(ExprToken::Str(text[i + 1..end].to_string()));
                i = end + 1;
            }
            b'*' => {
                if i + 1 < bytes.len() && is_ident_byte(bytes[i + 1]) {
                    let end = match (i + 1..bytes.len()).find(|&j| bytes[j] == b'*') {
                        Some(end) => end,
                        None => return ParseErrorKind::UnclosedDelimiter(line, '*').throw(),
                    };
                    tokens.push(ExprToken::Var(text[i + 1..end].to_string()));
                    i = end + 1;
                } else {
                    tokens.push(ExprToken::Op(BinOp::Multiply));
                    i += 1;
                }
            }
            b'(' => {
                let mut depth = 1;
                let mut j = i + 1;
                while j < bytes.len() && depth > 0 {
                    match bytes[j] {
                        b'(' => depth += 1,
                        b')' => depth -= 1,
                        _ => {}
                    }
                    j += 1;
                }
                if depth != 0 {
                    return ParseErrorKind::UnbalancedParen(line).throw();
                }
                tokens.push(ExprToken::Sub(text[i + 1..j - 1].to_string()));
                i = j;
            }
            b')' => return ParseErrorKind::UnbalancedParen(line).throw(),
            b'-' => {
                let after_operand = matches!(
                    tokens.last(),
                    Some(ExprToken::Int(_))
                        | Some(ExprToken::Str(_))
                        | Some(ExprToken::Var(_))
                        | Some(ExprToken::Sub(_))
                );
                if !after_operand && i + 1 < bytes.len() && bytes[i + 1].is_ascii_digit() {
                    let start = i;
                    i += 1;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                    tokens.push(int_token(&text[start..i], line)?);
                } else {
                    tokens.push(ExprToken::Op(BinOp::Subtract));
                    i += 1;
                }
            }
            _ if two_byte_op(bytes, i).is_some() => {
                tokens.push(ExprToken::Op(two_byte_op(bytes, i).unwrap()));
                i += 2;
            }
            b'+' => {
                tokens.push(ExprToken::Op(BinOp::Add));
                i += 1;
            }
            b'/' => {
                tokens.push(ExprToken::Op(BinOp::Divide));
                i += 1;
            }
            b'%' => {
                tokens.push(ExprToken::Op(BinOp::Modulo));
                i += 1;
            }
            b'<' => {
                tokens.push(ExprToken::Op(BinOp::Less));
                i += 1;
            }
            b'>' => {
                tokens.push(ExprToken::Op(BinOp::Greater));
                i += 1;
            }
            b'0'..=b'9' => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                tokens.push(int_token(&text[start..i], line)?);
            }
            byte if is_ident_byte(byte) => {
                let start = i;
                while i < bytes.len() && is_ident_byte(bytes[i]) {
                    i += 1;
                }
                tokens.push(ExprToken::Word(text[start..i].to_string()));
            }
            byte => {
                return ParseErrorKind::UnexpectedToken(line, (byte as char).to_string()).throw()
            }
        }
    }

    Ok(tokens)
}

fn is_ident_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

fn two_byte_op(bytes: &[u8], i: usize) -> Option<BinOp> {
    if i + 1 >= bytes.len() {
        return None;
    }
    match &bytes[i..i + 2] {
        b"==" => Some(BinOp::Equal),
        b"!=" => Some(BinOp::NotEqual),
        b"<=" => Some(BinOp::LessEqual),
        b">=" => Some(BinOp::GreaterEqual),
        _ => None,
    }
}

fn int_token(text: &str, line: usize) -> Result<ExprToken, ParseError> {
    match text.parse::<i64>() {
        Ok(n) => Ok(ExprToken::Int(n)),
        Err(_) => ParseErrorKind::UnexpectedToken(line, text.to_string()).throw(),
    }
}

struct ExprParser {
    tokens: Vec<ExprToken>,
    pos: usize,
    line: usize,
}

impl ExprParser {
    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.relational()
    }

    fn relational(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[
                BinOp::Equal,
                BinOp::NotEqual,
                BinOp::Less,
                BinOp::Greater,
                BinOp::LessEqual,
                BinOp::GreaterEqual,
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&[BinOp::Add, BinOp::Subtract], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(
            &[BinOp::Multiply, BinOp::Divide, BinOp::Modulo],
            Self::term,
        )
    }

    fn binary_level(
        &mut self,
        ops: &[BinOp],
        next: fn(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        let mut lhs = next(self)?;
        while let Some(ExprToken::Op(op)) = self.tokens.get(self.pos) {
            if !ops.contains(op) {
                break;
            }
            let op = *op;
            self.pos += 1;
            let rhs = next(self)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let token = match self.tokens.get(self.pos) {
            Some(token) => token.clone(),
            None => {
                return ParseErrorKind::UnexpectedToken(self.line, "end of expression".into())
                    .throw()
            }
        };
        self.pos += 1;
        match token {
            ExprToken::Int(n) => Ok(Expr::Literal(Value::Integer(n))),
            ExprToken::Str(s) => Ok(Expr::Literal(Value::Text(s))),
            ExprToken::Var(name) => Ok(Expr::Var(name)),
            ExprToken::Sub(text) => parse_expr(&text, self.line),
            ExprToken::Word(word) if word == "rng" => {
                let min = self.rng_arg()?;
                let max = self.rng_arg()?;
                Ok(Expr::Rng(Box::new(min), Box::new(max)))
            }
            ExprToken::Word(word) => ParseErrorKind::UnexpectedToken(self.line, word).throw(),
            ExprToken::Op(op) => {
                ParseErrorKind::UnexpectedToken(self.line, op.symbol().to_string()).throw()
            }
        }
    }

    // rng arguments are single terms: a literal, a variable reference, or a
    // parenthesized subexpression.
    fn rng_arg(&mut self) -> Result<Expr, ParseError> {
        let token = match self.tokens.get(self.pos) {
            Some(token) => token.clone(),
            None => {
                return ParseErrorKind::UnexpectedToken(self.line, "end of expression".into())
                    .throw()
            }
        };
        self.pos += 1;
        match token {
            ExprToken::Int(n) => Ok(Expr::Literal(Value::Integer(n))),
            ExprToken::Var(name) => Ok(Expr::Var(name)),
            ExprToken::Sub(text) => parse_expr(&text, self.line),
            other => {
                ParseErrorKind::UnexpectedToken(self.line, format!("{:?}", other)).throw()
            }
        }
    }

    fn describe_current(&self) -> String {
        match self.tokens.get(self.pos) {
            Some(ExprToken::Op(op)) => op.symbol().to_string(),
            Some(ExprToken::Int(n)) => n.to_string(),
            Some(ExprToken::Str(s)) => format!("#{}#", s),
            Some(ExprToken::Var(name)) => format!("*{}*", name),
            Some(ExprToken::Sub(_)) => "(".to_string(),
            Some(ExprToken::Word(word)) => word.clone(),
            None => "end of expression".to_string(),
        }
    }
}
