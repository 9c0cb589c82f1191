use std::collections::{HashMap, HashSet};

use super::passes::{collect_operand_vars, operands, protected_indices, retain_instructions};
use crate::ir::{Instruction, Operand, Program, Value};

/// The control-flow successors of the instruction at `i`. Indices equal to
/// the program length mean termination and are filtered by the callers.
///
/// An unconditional `jmp`/`halt` (literal truthy condition) does not flow
/// through; a literal-false condition only falls through; anything else
/// does both. An active `ask n` can land anywhere in its option window, a
/// disabled one skips past it, and one whose count is not a literal is
/// treated as able to reach everything after it.
pub(super) fn successors(program: &Program, i: usize) -> Vec<usize> {
    let len = program.instructions.len();
    match &program.instructions[i] {
        Instruction::Set { .. } | Instruction::Say { .. } => vec![i + 1],
        Instruction::Jmp {
            target, condition, ..
        } => {
            let target = match target {
                Operand::LabelRef(name) => program.labels.get(name).copied(),
                _ => None,
            };
            match (condition_truth(condition), target) {
                (Some(true), Some(t)) => vec![t],
                (Some(false), _) | (_, None) => vec![i + 1],
                (None, Some(t)) => vec![i + 1, t],
            }
        }
        Instruction::Halt { condition, .. } => match condition_truth(condition) {
            Some(true) => vec![],
            _ => vec![i + 1],
        },
        Instruction::Ask {
            count, condition, ..
        } => {
            let window = match count {
                Operand::Literal(Value::Integer(n)) if *n >= 1 => *n as usize,
                _ => return (i + 1..=len).collect(),
            };
            match condition_truth(condition) {
                Some(false) => vec![i + 1 + window],
                Some(true) => (i + 1..=i + window).collect(),
                None => (i + 1..=i + 1 + window).collect(),
            }
        }
    }
}

fn intern(ids: &mut HashMap<String, usize>, name: &str) -> usize {
    let next = ids.len();
    *ids.entry(name.to_string()).or_insert(next)
}

// The condition's truth when it is a literal, `None` when it is only known
// at runtime.
fn condition_truth(condition: &Operand) -> Option<bool> {
    match condition {
        Operand::Literal(value) => Some(value.is_truthy()),
        _ => None,
    }
}

/// Removes `set` instructions whose destination is dead: not read on any
/// path before the next `set` of the same variable. Liveness is a backward
/// fixpoint over the per-instruction successor graph. Stores inside `ask`
/// dispatch windows are kept (removal would shift the dispatch), and so are
/// stores whose right-hand side draws from `rng` (later draws observe the
/// advanced stream).
pub(super) fn eliminate_dead_stores(program: &mut Program) {
    let len = program.instructions.len();
    if len == 0 {
        return;
    }

    let mut ids: HashMap<String, usize> = HashMap::new();
    let mut use_sets: Vec<HashSet<usize>> = Vec::with_capacity(len);
    let mut def_sets: Vec<Option<usize>> = Vec::with_capacity(len);
    for instr in &program.instructions {
        let mut uses = HashSet::new();
        for operand in operands(instr) {
            collect_operand_vars(operand, &mut |name| {
                uses.insert(intern(&mut ids, name));
            });
        }
        use_sets.push(uses);
        def_sets.push(match instr {
            Instruction::Set { dest, .. } => Some(intern(&mut ids, dest)),
            _ => None,
        });
    }

    let succs: Vec<Vec<usize>> = (0..len)
        .map(|i| {
            successors(program, i)
                .into_iter()
                .filter(|succ| *succ < len)
                .collect()
        })
        .collect();

    let mut live_in: Vec<HashSet<usize>> = vec![HashSet::new(); len];
    let mut live_out: Vec<HashSet<usize>> = vec![HashSet::new(); len];
    let mut changed = true;
    while changed {
        changed = false;
        for i in (0..len).rev() {
            let mut out = HashSet::new();
            for succ in &succs[i] {
                out.extend(live_in[*succ].iter().copied());
            }

            let mut in_set = use_sets[i].clone();
            for id in &out {
                if def_sets[i] != Some(*id) {
                    in_set.insert(*id);
                }
            }

            if out != live_out[i] {
                live_out[i] = out;
                changed = true;
            }
            if in_set != live_in[i] {
                live_in[i] = in_set;
                changed = true;
            }
        }
    }

    let protected = protected_indices(program);
    let keep: Vec<bool> = program
        .instructions
        .iter()
        .enumerate()
        .map(|(i, instr)| match instr {
            Instruction::Set { value, .. } => {
                let dead = match def_sets[i] {
                    Some(id) => !live_out[i].contains(&id),
                    None => false,
                };
                let draws = matches!(value, Operand::Expr(expr) if expr.contains_rng());
                !dead || draws || protected[i]
            }
            _ => true,
        })
        .collect();
    if keep.iter().any(|keep_this| !keep_this) {
        retain_instructions(program, &keep);
    }
}

#[cfg(test)]
mod tests {
    use super::{eliminate_dead_stores, successors};
    use crate::parse::parser::parse;
    use crate::parse::ParseError;

    #[test]
    fn successor_shapes() -> Result<(), ParseError> {
        let program = parse("set *x* 1\njmp :end:\nsay #dead#\n:end:\nhalt\n")?;
        assert_eq!(successors(&program, 0), vec![1]);
        // Unconditional jump: target only.
        assert_eq!(successors(&program, 1), vec![3]);
        // Unconditional halt: nothing.
        assert_eq!(successors(&program, 3), Vec::<usize>::new());

        let program = parse("jmp :end: (*x*)\nhalt 0\n:end:\nhalt\n")?;
        assert_eq!(successors(&program, 0), vec![1, 2]);
        assert_eq!(successors(&program, 1), vec![2]);

        let program = parse("ask 2\njmp :a:\njmp :a:\nhalt\n:a:\nhalt\n")?;
        assert_eq!(successors(&program, 0), vec![1, 2]);

        let program = parse("ask 2 0\njmp :a:\njmp :a:\nhalt\n:a:\nhalt\n")?;
        assert_eq!(successors(&program, 0), vec![3]);

        Ok(())
    }

    #[test]
    fn unread_store_is_removed() -> Result<(), ParseError> {
        let mut program = parse("set *unused* 5\nsay #hi#\n")?;
        eliminate_dead_stores(&mut program);
        assert_eq!(program.to_source(), "say #hi#\n");

        Ok(())
    }

    #[test]
    fn store_read_later_is_kept() -> Result<(), ParseError> {
        let source = "set *x* 5\nsay *x*\n";
        let mut program = parse(source)?;
        eliminate_dead_stores(&mut program);
        assert_eq!(program.to_source(), source);

        Ok(())
    }

    #[test]
    fn store_shadowed_before_any_read_is_removed() -> Result<(), ParseError> {
        let mut program = parse("set *x* 1\nset *x* 2\nsay *x*\n")?;
        eliminate_dead_stores(&mut program);
        assert_eq!(program.to_source(), "set *x* 2\nsay *x*\n");

        Ok(())
    }

    #[test]
    fn store_live_around_a_loop_is_kept() -> Result<(), ParseError> {
        let source = "\
set *i* 0
:loop:
say *i*
set *i* (*i* + 1)
jmp :loop: (*i* < 3)
";
        let mut program = parse(source)?;
        eliminate_dead_stores(&mut program);
        assert_eq!(program.to_source(), source);

        Ok(())
    }

    #[test]
    fn rng_stores_are_never_removed() -> Result<(), ParseError> {
        let source = "set *roll* (rng 1 6)\nsay #done#\n";
        let mut program = parse(source)?;
        eliminate_dead_stores(&mut program);
        assert_eq!(program.to_source(), source);

        Ok(())
    }

    #[test]
    fn stores_inside_ask_windows_are_kept() -> Result<(), ParseError> {
        let source = "ask 2\nset *unused* 1\nset *unused* 2\nsay #after#\n";
        let mut program = parse(source)?;
        eliminate_dead_stores(&mut program);
        assert_eq!(program.instructions.len(), 4);

        Ok(())
    }

    #[test]
    fn dead_chains_collapse_over_iterations() -> Result<(), ParseError> {
        // x feeds only y, y feeds nothing: two rounds strip both.
        let mut program = parse("set *x* 1\nset *y* *x*\nsay #hi#\n")?;
        eliminate_dead_stores(&mut program);
        eliminate_dead_stores(&mut program);
        assert_eq!(program.to_source(), "say #hi#\n");

        Ok(())
    }
}
