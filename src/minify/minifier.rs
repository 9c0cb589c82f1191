use std::error::Error;
use std::fmt::Display;

use super::{liveness, passes};
use crate::ir::Program;
use crate::parse::ParseError;

// Pass rounds are bounded; in practice the pipeline settles after two.
const MAX_ROUNDS: usize = 8;

#[derive(Debug)]
pub(crate) enum MinifyErrorKind {
    InvalidSource(ParseError),
    ReparseFailed(ParseError),
}

impl MinifyErrorKind {
    pub(crate) fn throw<T>(self) -> Result<T, MinifyError> {
        let msg = match &self {
            MinifyErrorKind::InvalidSource(err) => {
                format!("source does not parse: {}", err)
            }
            MinifyErrorKind::ReparseFailed(err) => format!(
                "a minification pass produced source that no longer parses, this is a bug in \
                 whitvm itself, please report it along with the offending source: {}",
                err
            ),
        };
        Err(MinifyError { msg, kind: self })
    }
}

impl Display for MinifyErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug)]
#[allow(dead_code)]
pub struct MinifyError {
    pub(crate) msg: String,
    pub(crate) kind: MinifyErrorKind,
}

impl Error for MinifyError {}

impl Display for MinifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl MinifyError {
    /// True when the input itself was at fault rather than a pass.
    pub fn is_source_error(&self) -> bool {
        matches!(self.kind, MinifyErrorKind::InvalidSource(_))
    }
}

/// Configuration options for the minifier. Comment removal, default-operand
/// elision and whitespace normalization are always on; everything else is
/// opt-in.
#[derive(Debug, Clone)]
pub struct MinifyConfig {
    pub fold_constants: bool,
    pub dead_stores: bool,
    pub remove_unreachable: bool,
    pub pool_strings: bool,
    pub pool_threshold: usize,
    pub shrink_names: bool,
}

impl MinifyConfig {
    /// Returns a configuration with only the always-on passes
    pub fn essential() -> MinifyConfig {
        MinifyConfig {
            fold_constants: false,
            dead_stores: false,
            remove_unreachable: false,
            pool_strings: false,
            pool_threshold: 2,
            shrink_names: false,
        }
    }

    /// Returns a configuration with every optional pass enabled
    pub fn aggressive() -> MinifyConfig {
        MinifyConfig {
            fold_constants: true,
            dead_stores: true,
            remove_unreachable: true,
            pool_strings: true,
            pool_threshold: 2,
            shrink_names: true,
        }
    }
}

impl Default for MinifyConfig {
    fn default() -> MinifyConfig {
        MinifyConfig::essential()
    }
}

/// Minifies a source text, preserving the observable output trace for every
/// input sequence.
///
/// The pipeline operates on the parsed program, re-renders to canonical
/// source after each round and reparses it as a self-check, iterating until
/// a round changes nothing. Pass order: constant folding before dead-store
/// elimination, dead-store elimination before pooling and name shrinking.
pub fn minify(source: &str, config: &MinifyConfig) -> Result<String, MinifyError> {
    let mut program = match Program::from_source(source) {
        Ok(program) => program,
        Err(err) => return MinifyErrorKind::InvalidSource(err).throw(),
    };
    let mut rendered = program.to_source();

    for _ in 0..MAX_ROUNDS {
        passes::strip_comments(&mut program);
        if config.fold_constants {
            passes::fold_constants(&mut program);
        }
        if config.dead_stores {
            liveness::eliminate_dead_stores(&mut program);
        }
        if config.remove_unreachable {
            passes::remove_unreachable(&mut program);
        }
        if config.pool_strings {
            passes::pool_strings(&mut program, config.pool_threshold);
        }
        if config.shrink_names {
            passes::shrink_names(&mut program);
        }

        let out = program.to_source();
        program = match Program::from_source(&out) {
            Ok(program) => program,
            Err(err) => return MinifyErrorKind::ReparseFailed(err).throw(),
        };
        if out == rendered {
            return Ok(out);
        }
        rendered = out;
    }

    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::{minify, MinifyConfig, MinifyError};
    use crate::interpret::{Vm, VmConfig};
    use crate::ir::Program;
    use std::error::Error;
    use std::io::Cursor;

    fn run_with_input(source: &str, input: &str) -> Result<String, Box<dyn Error>> {
        let program = Program::from_source(source)?;
        let mut output = Vec::new();
        let mut vm = Vm::new(
            program,
            VmConfig::seeded(11),
            Cursor::new(input.as_bytes().to_vec()),
            &mut output,
        );
        vm.run()?;
        Ok(String::from_utf8(output)?)
    }

    #[test]
    fn essential_minification_normalizes_and_strips() -> Result<(), MinifyError> {
        let source = "\

:start:
    say   #game start#   1   1
    say #this is a comment# 1 0

    say #bye# 2 1
";
        let out = minify(source, &MinifyConfig::essential())?;
        assert_eq!(out, ":start:\nsay #game start#\nsay #bye# 2\n");

        Ok(())
    }

    #[test]
    fn minify_rejects_invalid_source() {
        let err = minify("say #unclosed\n", &MinifyConfig::essential()).unwrap_err();
        assert!(err.is_source_error());
    }

    #[test]
    fn minify_is_idempotent() -> Result<(), MinifyError> {
        let source = "\
:start:
    set *greeting* #hello hello#
    say *greeting* 1 1
    say #hello hello# 1 1
    say #hello hello# 1 1
    set *scratch* 99
    jmp :start: (2 > 3)
    halt
";
        let config = MinifyConfig::aggressive();
        let once = minify(source, &config)?;
        assert_eq!(minify(&once, &config)?, once);

        Ok(())
    }

    #[test]
    fn minified_adventure_plays_identically() -> Result<(), Box<dyn Error>> {
        let source = "\
:start:
    set *health* 100
    set *gold* 0
    say #You awake in a mysterious place.# 1 1
    say #1) Explore  2) Rest# 1 1
    say #debugging note# 1 0
    ask 2
    jmp :explore:
    jmp :rest:
:explore:
    say #You find 50 gold!# 1 1
    set *gold* 50
    say *gold* 1 (*gold* > 0)
    jmp :end:
:rest:
    say #You feel refreshed.# 1 1
    jmp :end:
:end:
    say #Game Over!# 1 1
";
        let config = MinifyConfig::aggressive();
        let minified = minify(source, &config).map_err(|err| err.to_string())?;
        assert!(minified.len() < source.len());
        for input in ["1\n", "2\n", "7\n"] {
            assert_eq!(run_with_input(source, input)?, run_with_input(&minified, input)?);
        }

        Ok(())
    }

    #[test]
    fn minified_loop_prints_the_same_trace() -> Result<(), Box<dyn Error>> {
        let source = "\
set *i* 0
set *limit* (1 + 2)
:loop:
    say *i* 1 1
    set *i* (*i* + 1)
    jmp :loop: (*i* < *limit*)
";
        let minified =
            minify(source, &MinifyConfig::aggressive()).map_err(|err| err.to_string())?;
        assert_eq!(run_with_input(source, "")?, run_with_input(&minified, "")?);
        assert_eq!(run_with_input(&minified, "")?, "0\n1\n2\n");

        Ok(())
    }

    #[test]
    fn disabled_ask_minifies_to_the_same_trace() -> Result<(), Box<dyn Error>> {
        let source = "\
ask 2 0
jmp :a:
jmp :b:
say #C# 1 1
halt
:a:
say #A# 1 1
halt
:b:
say #B# 1 1
halt
";
        let minified =
            minify(source, &MinifyConfig::aggressive()).map_err(|err| err.to_string())?;
        assert_eq!(run_with_input(&minified, "")?, "C\n");

        Ok(())
    }
}
