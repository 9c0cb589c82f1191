use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::Display;
use std::io::{stdin, stdout, BufRead, Stdout, StdinLock, Write};

use super::eval::{as_int, eval};
use crate::ir::{Instruction, Operand, Program, Value};

#[derive(Debug)]
pub(crate) enum VmErrorKind {
    UndefinedVariable(usize, String),
    Type(usize, String),
    DivisionByZero(usize),
    Input(usize, String),
    Range(usize, String),
    Io(usize),
    LogicError(usize),
}

impl VmErrorKind {
    pub(crate) fn throw<T>(self) -> Result<T, VmError> {
        let msg = match &self {
            VmErrorKind::UndefinedVariable(line, name) => {
                format!("line {}: undefined variable: {}", line, name)
            }
            VmErrorKind::Type(line, detail) => format!("line {}: type error: {}", line, detail),
            VmErrorKind::DivisionByZero(line) => format!("line {}: division by zero", line),
            VmErrorKind::Input(line, detail) => {
                format!("line {}: bad input: {}", line, detail)
            }
            VmErrorKind::Range(line, detail) => {
                format!("line {}: value out of range: {}", line, detail)
            }
            VmErrorKind::Io(line) => format!("line {}: output stream error", line),
            VmErrorKind::LogicError(line) => format!(
                "line {}: the parser delivered an inconsistent instruction, this is a bug in \
                 whitvm itself rather than in the program being run, please report it along \
                 with the offending source",
                line
            ),
        };
        Err(VmError { msg, kind: self })
    }
}

impl Display for VmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug)]
#[allow(dead_code)]
pub struct VmError {
    pub(crate) msg: String,
    pub(crate) kind: VmErrorKind,
}

impl Error for VmError {}

impl Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.msg)
    }
}

/// Configuration options for the interpreter
#[derive(Debug, Clone, Default)]
pub struct VmConfig {
    suppress_output: bool,
    debug: bool,
    seed: Option<u64>,
}

impl VmConfig {
    /// Creates a new interpreter config with the given arguments
    ///
    /// - `suppress_output` evaluate everything but write nothing
    /// - `debug` print the program counter and instruction before each step
    /// - `seed` fixed PRNG seed for deterministic replay; entropy when `None`
    pub fn new(suppress_output: bool, debug: bool, seed: Option<u64>) -> VmConfig {
        VmConfig {
            suppress_output,
            debug,
            seed,
        }
    }

    /// Returns a default configuration: output on, entropy-seeded PRNG
    pub fn default_entropy() -> VmConfig {
        VmConfig {
            suppress_output: false,
            debug: false,
            seed: None,
        }
    }

    /// Returns a configuration with a fixed PRNG seed for deterministic replay
    pub fn seeded(seed: u64) -> VmConfig {
        VmConfig {
            suppress_output: false,
            debug: false,
            seed: Some(seed),
        }
    }

    /// Returns a configuration that evaluates everything but writes nothing
    pub fn suppressed() -> VmConfig {
        VmConfig {
            suppress_output: true,
            debug: false,
            seed: Some(0),
        }
    }
}

/// The root component for the virtual machine. Owns the program, the data
/// memory and the program counter; the reader and writer are borrowed in
/// for the duration of the run.
pub struct Vm<R, W> {
    config: VmConfig,
    program: Program,
    dmem: HashMap<String, Value>,
    pc: usize,
    input: R,
    output: W,
    rng: StdRng,
    done: bool,
}

impl Vm<StdinLock<'static>, Stdout> {
    /// Creates an interpreter wired to the process stdin and stdout
    pub fn with_stdio(program: Program, config: VmConfig) -> Vm<StdinLock<'static>, Stdout> {
        Vm::new(program, config, stdin().lock(), stdout())
    }
}

impl<R: BufRead, W: Write> Vm<R, W> {
    /// Creates a new interpreter with the given arguments
    ///
    /// - `program` the parsed program to execute
    /// - `config` the configuration of the interpreter
    /// - `input` the reader `ask` takes its lines from
    /// - `output` the writer `say` emits to
    pub fn new(program: Program, config: VmConfig, input: R, output: W) -> Vm<R, W> {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Vm {
            config,
            program,
            dmem: HashMap::new(),
            pc: 0,
            input,
            output,
            rng,
            done: false,
        }
    }

    /// Returns the index of the next instruction to be executed in a `Some`
    /// variant. None if the program has reached its end.
    pub fn next_instruction(&self) -> Option<usize> {
        if self.done {
            return None;
        }
        if self.pc < self.program.instructions.len() {
            Some(self.pc)
        } else {
            None
        }
    }

    /// Executes all instructions - runs the program.
    pub fn run(&mut self) -> Result<(), VmError> {
        while let Some(pc) = self.next_instruction() {
            self.exec(pc)?;
        }

        Ok(())
    }

    /// Resets the interpreter state without re-parsing the source
    pub fn reset(&mut self) {
        self.dmem.clear();
        self.pc = 0;
        self.done = false;
        if let Some(seed) = self.config.seed {
            self.rng = StdRng::seed_from_u64(seed);
        }
    }

    /// Read access to the data memory, mainly for tests and debugging
    pub fn dmem(&self) -> &HashMap<String, Value> {
        &self.dmem
    }

    /// The current program counter
    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Executes the instruction at `pc`. Every handler leaves the program
    /// counter on the next instruction to run; control-flow handlers assign
    /// it directly instead of stepping.
    pub fn exec(&mut self, pc: usize) -> Result<(), VmError> {
        if self.config.debug {
            dbg!(pc);
            dbg!(&self.program.instructions[pc]);
        }
        let instr = self.program.instructions[pc].clone();
        match instr {
            Instruction::Set { dest, value, line } => self.set(dest, &value, line),
            Instruction::Say {
                value,
                newlines,
                condition,
                line,
            } => self.say(&value, &newlines, &condition, line),
            Instruction::Ask {
                count,
                condition,
                line,
            } => self.ask(&count, &condition, line),
            Instruction::Jmp {
                target,
                condition,
                line,
            } => self.jmp(&target, &condition, line),
            Instruction::Halt { condition, line } => self.halt(&condition, line),
        }
    }

    fn operand_value(&mut self, operand: &Operand, line: usize) -> Result<Value, VmError> {
        match operand {
            Operand::Literal(value) => Ok(value.clone()),
            Operand::VarRef(name) => match self.dmem.get(name) {
                Some(value) => Ok(value.clone()),
                None => VmErrorKind::UndefinedVariable(line, name.clone()).throw(),
            },
            Operand::Expr(expr) => eval(expr, &self.dmem, &mut self.rng, line),
            Operand::LabelRef(_) => VmErrorKind::LogicError(line).throw(),
        }
    }

    fn set(&mut self, dest: String, value: &Operand, line: usize) -> Result<(), VmError> {
        let value = self.operand_value(value, line)?;
        self.dmem.insert(dest, value);
        self.pc += 1;

        Ok(())
    }

    fn say(
        &mut self,
        value: &Operand,
        newlines: &Operand,
        condition: &Operand,
        line: usize,
    ) -> Result<(), VmError> {
        let condition = self.operand_value(condition, line)?;
        if condition.is_truthy() {
            let out = self.operand_value(value, line)?;
            let count = as_int(&self.operand_value(newlines, line)?, line)?;
            if count < 0 {
                return VmErrorKind::Range(
                    line,
                    format!("newline count must not be negative, got {}", count),
                )
                .throw();
            }
            self.emit(&format!("{}", out), line)?;
            self.emit(&"\n".repeat(count as usize), line)?;
        }
        self.pc += 1;

        Ok(())
    }

    fn ask(&mut self, count: &Operand, condition: &Operand, line: usize) -> Result<(), VmError> {
        let condition = self.operand_value(condition, line)?;
        let count = as_int(&self.operand_value(count, line)?, line)?;
        if count < 1 {
            return VmErrorKind::Range(
                line,
                format!("option count must be at least 1, got {}", count),
            )
            .throw();
        }
        let count = count as usize;
        let end = self.program.instructions.len();

        if !condition.is_truthy() {
            // Disabled dispatch degrades to a skip over the option block.
            self.pc = (self.pc + 1 + count).min(end);
            return Ok(());
        }

        if self.output.flush().is_err() {
            return VmErrorKind::Io(line).throw();
        }
        let mut text = String::new();
        match self.input.read_line(&mut text) {
            Ok(0) => {
                return VmErrorKind::Input(line, "end of input".to_string()).throw();
            }
            Ok(_) => {}
            Err(_) => {
                return VmErrorKind::Input(line, "failed to read a line".to_string()).throw();
            }
        }
        let choice = match text.trim().parse::<i64>() {
            Ok(choice) => choice,
            Err(_) => {
                return VmErrorKind::Input(
                    line,
                    format!("expected an integer, got: {}", text.trim()),
                )
                .throw();
            }
        };

        if choice >= 1 && choice <= count as i64 {
            self.pc = (self.pc + choice as usize).min(end);
        } else {
            // Out-of-range input falls through to option 1.
            self.pc += 1;
        }

        Ok(())
    }

    fn jmp(&mut self, target: &Operand, condition: &Operand, line: usize) -> Result<(), VmError> {
        let condition = self.operand_value(condition, line)?;
        if !condition.is_truthy() {
            self.pc += 1;
            return Ok(());
        }

        if let Operand::LabelRef(name) = target {
            if let Some(index) = self.program.labels.get(name) {
                self.pc = *index;
                return Ok(());
            }
        }

        VmErrorKind::LogicError(line).throw()
    }

    fn halt(&mut self, condition: &Operand, line: usize) -> Result<(), VmError> {
        let condition = self.operand_value(condition, line)?;
        if condition.is_truthy() {
            self.pc = self.program.instructions.len();
            self.done = true;
        } else {
            self.pc += 1;
        }

        Ok(())
    }

    fn emit(&mut self, text: &str, line: usize) -> Result<(), VmError> {
        if self.config.suppress_output {
            return Ok(());
        }
        if write!(self.output, "{}", text).is_err() {
            return VmErrorKind::Io(line).throw();
        }
        if self.output.flush().is_err() {
            return VmErrorKind::Io(line).throw();
        }

        Ok(())
    }
}
