use std::collections::{HashMap, HashSet};

use crate::interpret::eval::apply_binary;
use crate::ir::{Expr, Instruction, Operand, Program, Value};

/// The value-bearing operands of an instruction, in source order. A `jmp`
/// target is a label, not a value, and is not included.
pub(super) fn operands(instr: &Instruction) -> Vec<&Operand> {
    match instr {
        Instruction::Set { value, .. } => vec![value],
        Instruction::Say {
            value,
            newlines,
            condition,
            ..
        } => vec![value, newlines, condition],
        Instruction::Ask {
            count, condition, ..
        } => vec![count, condition],
        Instruction::Jmp { condition, .. } => vec![condition],
        Instruction::Halt { condition, .. } => vec![condition],
    }
}

pub(super) fn operands_mut(instr: &mut Instruction) -> Vec<&mut Operand> {
    match instr {
        Instruction::Set { value, .. } => vec![value],
        Instruction::Say {
            value,
            newlines,
            condition,
            ..
        } => vec![value, newlines, condition],
        Instruction::Ask {
            count, condition, ..
        } => vec![count, condition],
        Instruction::Jmp { condition, .. } => vec![condition],
        Instruction::Halt { condition, .. } => vec![condition],
    }
}

/// Marks every instruction inside an `ask` dispatch window. Removing one
/// would shift the offsets the dispatch lands on, so the structural passes
/// leave them alone. An `ask` whose count is not an integer literal has an
/// unknown window and protects everything after it.
pub(super) fn protected_indices(program: &Program) -> Vec<bool> {
    let len = program.instructions.len();
    let mut protected = vec![false; len];
    for (i, instr) in program.instructions.iter().enumerate() {
        if let Instruction::Ask { count, .. } = instr {
            let window = match count {
                Operand::Literal(Value::Integer(n)) if *n >= 1 => i + 1 + *n as usize,
                _ => len,
            };
            for slot in protected.iter_mut().take(window.min(len)).skip(i + 1) {
                *slot = true;
            }
        }
    }
    protected
}

/// Drops every instruction whose `keep` flag is false and rebinds each
/// label to the next surviving instruction.
pub(super) fn retain_instructions(program: &mut Program, keep: &[bool]) {
    let len = program.instructions.len();
    let mut new_index = vec![0; len + 1];
    let mut kept = 0;
    for i in 0..len {
        new_index[i] = kept;
        if keep[i] {
            kept += 1;
        }
    }
    new_index[len] = kept;

    for index in program.labels.values_mut() {
        *index = new_index[*index];
    }
    let mut slot = 0;
    program.instructions.retain(|_| {
        let keep_this = keep[slot];
        slot += 1;
        keep_this
    });
}

/// Removes `say … _ 0` comment instructions: a condition of literal zero
/// makes them no-ops by construction.
pub(super) fn strip_comments(program: &mut Program) {
    let protected = protected_indices(program);
    let keep: Vec<bool> = program
        .instructions
        .iter()
        .enumerate()
        .map(|(i, instr)| {
            let comment = matches!(
                instr,
                Instruction::Say { condition, .. } if condition.is_literal_zero()
            );
            !comment || protected[i]
        })
        .collect();
    if keep.iter().any(|keep_this| !keep_this) {
        retain_instructions(program, &keep);
    }
}

/// Evaluates every expression subtree whose leaves are all literals and
/// replaces it with its result. `rng` subtrees are never folded. A subtree
/// whose folding would trap (division by zero) is left as written.
pub(super) fn fold_constants(program: &mut Program) {
    for instr in &mut program.instructions {
        let line = instr.line();
        for operand in operands_mut(instr) {
            if let Operand::Expr(expr) = operand {
                fold_expr(expr, line);
                let hoisted = match expr {
                    Expr::Literal(value) => Some(Operand::Literal(value.clone())),
                    Expr::Var(name) => Some(Operand::VarRef(name.clone())),
                    _ => None,
                };
                if let Some(hoisted) = hoisted {
                    *operand = hoisted;
                }
            }
        }
    }
}

fn fold_expr(expr: &mut Expr, line: usize) {
    match expr {
        Expr::Literal(_) | Expr::Var(_) => {}
        Expr::Rng(min, max) => {
            fold_expr(min, line);
            fold_expr(max, line);
        }
        Expr::Binary(op, lhs, rhs) => {
            fold_expr(lhs, line);
            fold_expr(rhs, line);
            if let (Expr::Literal(lhs), Expr::Literal(rhs)) = (&**lhs, &**rhs) {
                if let Ok(value) = apply_binary(*op, lhs, rhs, line) {
                    *expr = Expr::Literal(value);
                }
            }
        }
    }
}

/// Removes instructions that no walk from instruction 0 can reach. An
/// unconditional `jmp`/`halt` does not flow through; a conditional one
/// branches and falls through; an `ask` reaches its whole dispatch window.
/// Label-bound positions are kept conservatively, and so is the option
/// window of every surviving `ask`: even a disabled dispatch skips over
/// those instructions by count.
pub(super) fn remove_unreachable(program: &mut Program) {
    let len = program.instructions.len();
    if len == 0 {
        return;
    }

    let mut reachable = vec![false; len];
    let mut worklist = vec![0];
    for index in program.labels.values() {
        if *index < len {
            worklist.push(*index);
        }
    }
    while let Some(i) = worklist.pop() {
        if reachable[i] {
            continue;
        }
        reachable[i] = true;
        for succ in super::liveness::successors(program, i) {
            if succ < len && !reachable[succ] {
                worklist.push(succ);
            }
        }
    }

    let mut keep = reachable.clone();
    for (i, instr) in program.instructions.iter().enumerate() {
        if !reachable[i] {
            continue;
        }
        if let Instruction::Ask { count, .. } = instr {
            let window = match count {
                Operand::Literal(Value::Integer(n)) if *n >= 1 => i + 1 + *n as usize,
                _ => len,
            };
            for slot in keep.iter_mut().take(window.min(len)).skip(i + 1) {
                *slot = true;
            }
        }
    }

    if keep.iter().any(|keep_this| !keep_this) {
        retain_instructions(program, &keep);
    }
}

/// Extracts strings used at least `threshold` times into variables that are
/// assigned once at the top of the program, which dominates every use.
pub(super) fn pool_strings(program: &mut Program, threshold: usize) {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for instr in &program.instructions {
        for operand in operands(instr) {
            count_operand_strings(operand, &mut counts);
        }
    }

    let mut pooled: Vec<String> = counts
        .into_iter()
        .filter(|(_, count)| *count >= threshold.max(1))
        .map(|(text, _)| text)
        .collect();
    pooled.sort_unstable();
    if pooled.is_empty() {
        return;
    }

    let used = variable_names(program);
    let mut fresh = short_names().filter(|name| !used.contains(name));
    let mut map = HashMap::new();
    for text in &pooled {
        if let Some(name) = fresh.next() {
            map.insert(text.clone(), name);
        }
    }

    for instr in &mut program.instructions {
        for operand in operands_mut(instr) {
            pool_operand_strings(operand, &map);
        }
    }

    let setup: Vec<Instruction> = pooled
        .iter()
        .map(|text| Instruction::Set {
            dest: map[text].clone(),
            value: Operand::Literal(Value::Text(text.clone())),
            line: 0,
        })
        .collect();
    for index in program.labels.values_mut() {
        *index += setup.len();
    }
    program.instructions.splice(0..0, setup);
}

fn count_operand_strings(operand: &Operand, counts: &mut HashMap<String, usize>) {
    match operand {
        Operand::Literal(Value::Text(text)) => {
            *counts.entry(text.clone()).or_insert(0) += 1;
        }
        Operand::Expr(expr) => count_expr_strings(expr, counts),
        _ => {}
    }
}

fn count_expr_strings(expr: &Expr, counts: &mut HashMap<String, usize>) {
    match expr {
        Expr::Literal(Value::Text(text)) => {
            *counts.entry(text.clone()).or_insert(0) += 1;
        }
        Expr::Literal(_) | Expr::Var(_) => {}
        Expr::Rng(min, max) => {
            count_expr_strings(min, counts);
            count_expr_strings(max, counts);
        }
        Expr::Binary(_, lhs, rhs) => {
            count_expr_strings(lhs, counts);
            count_expr_strings(rhs, counts);
        }
    }
}

fn pool_operand_strings(operand: &mut Operand, map: &HashMap<String, String>) {
    match operand {
        Operand::Literal(Value::Text(text)) => {
            if let Some(name) = map.get(text) {
                *operand = Operand::VarRef(name.clone());
            }
        }
        Operand::Expr(expr) => pool_expr_strings(expr, map),
        _ => {}
    }
}

fn pool_expr_strings(expr: &mut Expr, map: &HashMap<String, String>) {
    match expr {
        Expr::Literal(Value::Text(text)) => {
            if let Some(name) = map.get(text) {
                *expr = Expr::Var(name.clone());
            }
        }
        Expr::Literal(_) | Expr::Var(_) => {}
        Expr::Rng(min, max) => {
            pool_expr_strings(min, map);
            pool_expr_strings(max, map);
        }
        Expr::Binary(_, lhs, rhs) => {
            pool_expr_strings(lhs, map);
            pool_expr_strings(rhs, map);
        }
    }
}

/// Renames every variable and label to the shortest fresh identifiers,
/// consistently across declarations, references and expression leaves.
/// Names are assigned in first-appearance order, which makes a second
/// application the identity.
pub(super) fn shrink_names(program: &mut Program) {
    let mut var_order = Vec::new();
    let mut seen = HashSet::new();
    for instr in &program.instructions {
        if let Instruction::Set { dest, .. } = instr {
            if seen.insert(dest.clone()) {
                var_order.push(dest.clone());
            }
        }
        for operand in operands(instr) {
            collect_operand_vars(operand, &mut |name| {
                if seen.insert(name.to_string()) {
                    var_order.push(name.to_string());
                }
            });
        }
    }
    let var_map: HashMap<String, String> = var_order
        .into_iter()
        .zip(short_names())
        .collect();

    let mut label_order: Vec<(usize, String)> = program
        .labels
        .iter()
        .map(|(name, index)| (*index, name.clone()))
        .collect();
    label_order.sort_unstable();
    let label_map: HashMap<String, String> = label_order
        .into_iter()
        .map(|(_, name)| name)
        .zip(short_names())
        .collect();

    for instr in &mut program.instructions {
        if let Instruction::Set { dest, .. } = instr {
            if let Some(short) = var_map.get(dest) {
                *dest = short.clone();
            }
        }
        if let Instruction::Jmp { target, .. } = instr {
            if let Operand::LabelRef(name) = target {
                if let Some(short) = label_map.get(name) {
                    *name = short.clone();
                }
            }
        }
        for operand in operands_mut(instr) {
            rename_operand_vars(operand, &var_map);
        }
    }
    let labels = std::mem::take(&mut program.labels);
    program.labels = labels
        .into_iter()
        .map(|(name, index)| (label_map[&name].clone(), index))
        .collect();
}

pub(super) fn collect_operand_vars(operand: &Operand, visit: &mut dyn FnMut(&str)) {
    match operand {
        Operand::VarRef(name) => visit(name),
        Operand::Expr(expr) => collect_expr_vars(expr, visit),
        _ => {}
    }
}

fn collect_expr_vars(expr: &Expr, visit: &mut dyn FnMut(&str)) {
    match expr {
        Expr::Var(name) => visit(name),
        Expr::Literal(_) => {}
        Expr::Rng(min, max) => {
            collect_expr_vars(min, visit);
            collect_expr_vars(max, visit);
        }
        Expr::Binary(_, lhs, rhs) => {
            collect_expr_vars(lhs, visit);
            collect_expr_vars(rhs, visit);
        }
    }
}

fn rename_operand_vars(operand: &mut Operand, map: &HashMap<String, String>) {
    match operand {
        Operand::VarRef(name) => {
            if let Some(short) = map.get(name) {
                *name = short.clone();
            }
        }
        Operand::Expr(expr) => rename_expr_vars(expr, map),
        _ => {}
    }
}

fn rename_expr_vars(expr: &mut Expr, map: &HashMap<String, String>) {
    match expr {
        Expr::Var(name) => {
            if let Some(short) = map.get(name) {
                *name = short.clone();
            }
        }
        Expr::Literal(_) => {}
        Expr::Rng(min, max) => {
            rename_expr_vars(min, map);
            rename_expr_vars(max, map);
        }
        Expr::Binary(_, lhs, rhs) => {
            rename_expr_vars(lhs, map);
            rename_expr_vars(rhs, map);
        }
    }
}

fn variable_names(program: &Program) -> HashSet<String> {
    let mut names = HashSet::new();
    for instr in &program.instructions {
        if let Instruction::Set { dest, .. } = instr {
            names.insert(dest.clone());
        }
        for operand in operands(instr) {
            collect_operand_vars(operand, &mut |name| {
                names.insert(name.to_string());
            });
        }
    }
    names
}

// a, b, ..., z, aa, ab, ... in bijective base 26.
fn short_names() -> impl Iterator<Item = String> {
    (0usize..).map(|index| {
        let mut n = index;
        let mut name = String::new();
        loop {
            name.insert(0, (b'a' + (n % 26) as u8) as char);
            n /= 26;
            if n == 0 {
                break;
            }
            n -= 1;
        }
        name
    })
}

#[cfg(test)]
mod tests {
    use super::{
        fold_constants, pool_strings, remove_unreachable, short_names, shrink_names,
        strip_comments,
    };
    use crate::ir::{Instruction, Operand, Value};
    use crate::parse::parser::parse;
    use crate::parse::ParseError;

    #[test]
    fn short_name_sequence() {
        let names: Vec<String> = short_names().take(29).collect();
        assert_eq!(names[0], "a");
        assert_eq!(names[25], "z");
        assert_eq!(names[26], "aa");
        assert_eq!(names[27], "ab");
        assert_eq!(names[28], "ac");
    }

    #[test]
    fn comments_are_stripped() -> Result<(), ParseError> {
        let mut program = parse("say #a comment# 1 0\nsay #real# 1 1\n")?;
        strip_comments(&mut program);
        assert_eq!(program.instructions.len(), 1);
        assert_eq!(program.to_source(), "say #real#\n");

        Ok(())
    }

    #[test]
    fn comments_inside_ask_windows_survive() -> Result<(), ParseError> {
        let source = "ask 2\nsay #note# 1 0\njmp :a:\n:a:\nhalt\n";
        let mut program = parse(source)?;
        strip_comments(&mut program);
        assert_eq!(program.instructions.len(), 4);

        Ok(())
    }

    #[test]
    fn stripping_rebinds_labels() -> Result<(), ParseError> {
        let mut program = parse("say #note# 1 0\n:top:\nsay #note# 1 0\nhalt\n")?;
        strip_comments(&mut program);
        assert_eq!(program.labels["top"], 0);
        assert_eq!(program.instructions.len(), 1);

        Ok(())
    }

    #[test]
    fn literal_expressions_fold() -> Result<(), ParseError> {
        let mut program = parse("say (2 + 3 * 4)\nset *x* (1 == 1)\n")?;
        fold_constants(&mut program);
        assert_eq!(
            program.to_source(),
            "say 14\nset *x* 1\n"
        );

        Ok(())
    }

    #[test]
    fn folding_skips_variables_rng_and_traps() -> Result<(), ParseError> {
        let mut program = parse("say (*x* + 1)\nsay (rng 1 6)\nsay (1 / 0) 1 0\n")?;
        fold_constants(&mut program);
        assert_eq!(
            program.to_source(),
            "say (*x* + 1)\nsay (rng 1 6)\nsay (1 / 0) 1 0\n"
        );

        Ok(())
    }

    #[test]
    fn folding_reduces_literal_subtrees() -> Result<(), ParseError> {
        let mut program = parse("say (2 * 3 + *x*)\n")?;
        fold_constants(&mut program);
        assert_eq!(program.to_source(), "say (6 + *x*)\n");

        Ok(())
    }

    #[test]
    fn unreachable_code_after_jump_is_removed() -> Result<(), ParseError> {
        let source = "jmp :end:\nsay #dead#\n:end:\nhalt\n";
        let mut program = parse(source)?;
        remove_unreachable(&mut program);
        assert_eq!(program.to_source(), "jmp :end:\n:end:\nhalt\n");

        Ok(())
    }

    #[test]
    fn conditional_jump_flows_through() -> Result<(), ParseError> {
        let source = "jmp :end: (*x* == 1)\nsay #alive#\n:end:\nhalt\n";
        let mut program = parse(source)?;
        remove_unreachable(&mut program);
        assert_eq!(program.instructions.len(), 3);

        Ok(())
    }

    #[test]
    fn ask_windows_stay_reachable() -> Result<(), ParseError> {
        let source = "ask 2\njmp :a:\njmp :b:\n:a:\nhalt\n:b:\nhalt\n";
        let mut program = parse(source)?;
        remove_unreachable(&mut program);
        assert_eq!(program.instructions.len(), 5);

        Ok(())
    }

    #[test]
    fn disabled_ask_keeps_its_skip_window() -> Result<(), ParseError> {
        // The options never run, but the skip jumps over them by count.
        let source = "ask 2 0\njmp :a:\njmp :b:\nsay #C#\nhalt\n:a:\nhalt\n:b:\nhalt\n";
        let mut program = parse(source)?;
        remove_unreachable(&mut program);
        assert_eq!(program.instructions.len(), 7);

        Ok(())
    }

    #[test]
    fn code_after_unconditional_halt_is_removed_until_a_label() -> Result<(), ParseError> {
        let source = "halt\nsay #dead#\n:tail:\nsay #kept#\n";
        let mut program = parse(source)?;
        remove_unreachable(&mut program);
        assert_eq!(program.to_source(), "halt\n:tail:\nsay #kept#\n");

        Ok(())
    }

    #[test]
    fn repeated_strings_are_pooled() -> Result<(), ParseError> {
        let source = "say #hello#\nsay #hello#\nsay #once#\n";
        let mut program = parse(source)?;
        pool_strings(&mut program, 2);
        assert_eq!(
            program.to_source(),
            "set *a* #hello#\nsay *a*\nsay *a*\nsay #once#\n"
        );

        Ok(())
    }

    #[test]
    fn pooling_shifts_labels_and_skips_used_names() -> Result<(), ParseError> {
        let source = ":top:\nset *a* 1\nsay #x#\nsay #x#\njmp :top: (*a* == 0)\n";
        let mut program = parse(source)?;
        pool_strings(&mut program, 2);
        assert_eq!(program.labels["top"], 1);
        match &program.instructions[0] {
            Instruction::Set { dest, value, .. } => {
                assert_ne!(dest, "a");
                assert_eq!(*value, Operand::Literal(Value::Text("x".to_string())));
            }
            other => panic!("expected a pooling set, got {:?}", other),
        }

        Ok(())
    }

    #[test]
    fn names_shrink_consistently() -> Result<(), ParseError> {
        let source = "\
:start_screen:
set *player_gender* #Male#
say *player_gender*
jmp :start_screen: (*player_gender* == #Female#)
";
        let mut program = parse(source)?;
        shrink_names(&mut program);
        assert_eq!(
            program.to_source(),
            ":a:\nset *a* #Male#\nsay *a*\njmp :a: (*a* == #Female#)\n"
        );

        Ok(())
    }

    #[test]
    fn shrinking_is_idempotent() -> Result<(), ParseError> {
        let source = "set *zeta* 1\nset *alpha* *zeta*\nsay *alpha*\n";
        let mut program = parse(source)?;
        shrink_names(&mut program);
        let once = program.to_source();
        shrink_names(&mut program);
        assert_eq!(program.to_source(), once);

        Ok(())
    }
}
