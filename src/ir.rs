use std::collections::HashMap;
use std::fmt::Display;

/// A runtime scalar. Booleans are encoded as the integers 1 and 0.
#[derive(Debug, PartialEq, Clone)]
pub enum Value {
    Integer(i64),
    Text(String),
}

impl Value {
    /// Boolean reading of a value: non-zero integers and non-empty strings
    /// are true.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Integer(n) => *n != 0,
            Value::Text(s) => !s.is_empty(),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{}", n),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BinOp {
    Multiply,
    Divide,
    Modulo,
    Add,
    Subtract,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Multiply => "*",
            BinOp::Divide => "/",
            BinOp::Modulo => "%",
            BinOp::Add => "+",
            BinOp::Subtract => "-",
            BinOp::Equal => "==",
            BinOp::NotEqual => "!=",
            BinOp::Less => "<",
            BinOp::Greater => ">",
            BinOp::LessEqual => "<=",
            BinOp::GreaterEqual => ">=",
        }
    }
}

/// A parsed expression tree. Operators are left-associative; `Rng` is the
/// built-in `rng min max` call.
#[derive(Debug, PartialEq, Clone)]
pub enum Expr {
    Literal(Value),
    Var(String),
    Rng(Box<Expr>, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn contains_rng(&self) -> bool {
        match self {
            Expr::Literal(_) | Expr::Var(_) => false,
            Expr::Rng(..) => true,
            Expr::Binary(_, lhs, rhs) => lhs.contains_rng() || rhs.contains_rng(),
        }
    }
}

/// The parsed form of an instruction argument.
#[derive(Debug, PartialEq, Clone)]
pub enum Operand {
    Literal(Value),
    VarRef(String),
    Expr(Expr),
    LabelRef(String),
}

impl Operand {
    /// The implicit value of an omitted `nl_qty` or `condition` operand.
    pub fn default_one() -> Operand {
        Operand::Literal(Value::Integer(1))
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Operand::Literal(Value::Integer(1)))
    }

    pub fn is_literal_zero(&self) -> bool {
        matches!(self, Operand::Literal(Value::Integer(0)))
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Literal(Value::Integer(n)) => write!(f, "{}", n),
            Operand::Literal(Value::Text(s)) => write!(f, "#{}#", s),
            Operand::VarRef(name) => write!(f, "*{}*", name),
            Operand::Expr(expr) => write!(f, "({})", render_expr(expr)),
            Operand::LabelRef(name) => write!(f, ":{}:", name),
        }
    }
}

fn render_expr(expr: &Expr) -> String {
    match expr {
        Expr::Literal(Value::Integer(n)) => format!("{}", n),
        Expr::Literal(Value::Text(s)) => format!("#{}#", s),
        Expr::Var(name) => format!("*{}*", name),
        Expr::Rng(min, max) => format!("rng {} {}", render_term(min), render_term(max)),
        Expr::Binary(op, lhs, rhs) => {
            format!("{} {} {}", render_term(lhs), op.symbol(), render_term(rhs))
        }
    }
}

fn render_term(expr: &Expr) -> String {
    match expr {
        Expr::Literal(_) | Expr::Var(_) => render_expr(expr),
        Expr::Rng(..) | Expr::Binary(..) => format!("({})", render_expr(expr)),
    }
}

/// One parsed instruction, tagged with its 1-based source line for
/// diagnostics. Omitted trailing operands are stored as their defaults.
#[derive(Debug, PartialEq, Clone)]
pub enum Instruction {
    Set {
        dest: String,
        value: Operand,
        line: usize,
    },
    Say {
        value: Operand,
        newlines: Operand,
        condition: Operand,
        line: usize,
    },
    Ask {
        count: Operand,
        condition: Operand,
        line: usize,
    },
    Jmp {
        target: Operand,
        condition: Operand,
        line: usize,
    },
    Halt {
        condition: Operand,
        line: usize,
    },
}

impl Instruction {
    pub fn line(&self) -> usize {
        match self {
            Instruction::Set { line, .. }
            | Instruction::Say { line, .. }
            | Instruction::Ask { line, .. }
            | Instruction::Jmp { line, .. }
            | Instruction::Halt { line, .. } => *line,
        }
    }
}

/// An immutable parsed program: the instruction sequence plus the map from
/// label name to the instruction index it binds.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    pub labels: HashMap<String, usize>,
}

impl Program {
    /// Renders the program back to source in canonical form: one
    /// instruction per line, single spaces, no indentation, and trailing
    /// operands equal to their default elided.
    pub fn to_source(&self) -> String {
        let mut by_index: Vec<Vec<&str>> = vec![Vec::new(); self.instructions.len() + 1];
        for (name, index) in &self.labels {
            by_index[*index].push(name);
        }
        for names in &mut by_index {
            names.sort_unstable();
        }

        let mut out = String::new();
        for (i, instr) in self.instructions.iter().enumerate() {
            for name in &by_index[i] {
                out.push(':');
                out.push_str(name);
                out.push_str(":\n");
            }
            out.push_str(&render_instruction(instr));
            out.push('\n');
        }
        for name in &by_index[self.instructions.len()] {
            out.push(':');
            out.push_str(name);
            out.push_str(":\n");
        }

        out
    }
}

fn render_instruction(instr: &Instruction) -> String {
    match instr {
        Instruction::Set { dest, value, .. } => format!("set *{}* {}", dest, value),
        Instruction::Say {
            value,
            newlines,
            condition,
            ..
        } => {
            if !condition.is_default() {
                format!("say {} {} {}", value, newlines, condition)
            } else if !newlines.is_default() {
                format!("say {} {}", value, newlines)
            } else {
                format!("say {}", value)
            }
        }
        Instruction::Ask {
            count, condition, ..
        } => {
            if !condition.is_default() {
                format!("ask {} {}", count, condition)
            } else {
                format!("ask {}", count)
            }
        }
        Instruction::Jmp {
            target, condition, ..
        } => {
            if !condition.is_default() {
                format!("jmp {} {}", target, condition)
            } else {
                format!("jmp {}", target)
            }
        }
        Instruction::Halt { condition, .. } => {
            if !condition.is_default() {
                format!("halt {}", condition)
            } else {
                "halt".to_string()
            }
        }
    }
}
