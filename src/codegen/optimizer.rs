//! Boundary consolidation
//!
//! `EMIT_UNLESS_BOUNDARY` / `BOUNDARY` pairs whose outcome is decidable at
//! compile time are resolved here, leaving the runtime pairing only where
//! control flow separates them:
//!
//! - a pending emit whose next non-static instruction is `BOUNDARY` is always
//!   cancelled, so it is dropped;
//! - a pending emit followed only by static emits (no `BOUNDARY` ever reached
//!   in its static context) always fires, so it degrades to `EMIT_STATIC`;
//! - control flow between the two preserves both for the runtime.
//!
//! A `BOUNDARY` that no surviving pending emit can reach is dead and dropped.

use crate::ir::{Instruction, Opcode};

/// Instructions that emit without branching; they may sit between a pending
/// emit and its boundary without forcing the runtime pairing.
fn is_static_emit(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::EmitStatic | Opcode::EmitIfDialect | Opcode::EmitEval | Opcode::EmitSystemValue
    )
}

fn is_control_flow(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::If
            | Opcode::ElseIf
            | Opcode::Else
            | Opcode::End
            | Opcode::LoopStart
            | Opcode::LoopEnd
            | Opcode::IfSystemLimit
            | Opcode::IfSystemOffset
    )
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Resolution {
    Drop,
    Degrade,
    Preserve,
}

fn resolve(instructions: &[Instruction], idx: usize) -> Resolution {
    for ins in &instructions[idx + 1..] {
        if ins.op == Opcode::Boundary {
            return Resolution::Drop;
        }
        if is_control_flow(ins.op) {
            return Resolution::Preserve;
        }
        if is_static_emit(ins.op) {
            continue;
        }
        // anything else (another pending emit) keeps the runtime pairing
        return Resolution::Preserve;
    }
    Resolution::Degrade
}

pub fn optimize(instructions: Vec<Instruction>) -> Vec<Instruction> {
    let mut out: Vec<Instruction> = Vec::with_capacity(instructions.len());
    let mut live_pending = false;

    for (idx, ins) in instructions.iter().enumerate() {
        match ins.op {
            Opcode::EmitUnlessBoundary => match resolve(&instructions, idx) {
                Resolution::Drop => {}
                Resolution::Degrade => {
                    let mut degraded = ins.clone();
                    degraded.op = Opcode::EmitStatic;
                    out.push(degraded);
                }
                Resolution::Preserve => {
                    live_pending = true;
                    out.push(ins.clone());
                }
            },
            Opcode::Boundary => {
                // dead marker unless a preserved pending emit precedes it
                if live_pending {
                    out.push(ins.clone());
                }
            }
            _ => out.push(ins.clone()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::Position;

    fn eub(value: &str) -> Instruction {
        Instruction::emit_unless_boundary(value, Position::new(1, 1))
    }

    fn stat(value: &str) -> Instruction {
        Instruction::emit_static(value, Position::new(1, 1))
    }

    #[test]
    fn test_adjacent_pair_is_dropped() {
        let out = optimize(vec![
            stat("a"),
            eub(","),
            Instruction::boundary(Position::new(1, 5)),
            stat("b"),
        ]);
        let ops: Vec<Opcode> = out.iter().map(|i| i.op).collect();
        assert_eq!(ops, vec![Opcode::EmitStatic, Opcode::EmitStatic]);
    }

    #[test]
    fn test_unpaired_pending_degrades_to_static() {
        let out = optimize(vec![stat("a"), eub(","), stat("b")]);
        let ops: Vec<Opcode> = out.iter().map(|i| i.op).collect();
        assert_eq!(
            ops,
            vec![Opcode::EmitStatic, Opcode::EmitStatic, Opcode::EmitStatic]
        );
        assert_eq!(out[1].value.as_deref(), Some(","));
    }

    #[test]
    fn test_control_flow_preserves_runtime_pairing() {
        let out = optimize(vec![
            Instruction::if_expr(0, Position::new(1, 1)),
            eub(","),
            stat("email"),
            Instruction::end(Position::new(1, 30)),
            Instruction::boundary(Position::new(2, 1)),
            stat("FROM users"),
        ]);
        let ops: Vec<Opcode> = out.iter().map(|i| i.op).collect();
        assert_eq!(
            ops,
            vec![
                Opcode::If,
                Opcode::EmitUnlessBoundary,
                Opcode::EmitStatic,
                Opcode::End,
                Opcode::Boundary,
                Opcode::EmitStatic,
            ]
        );
    }

    #[test]
    fn test_dead_boundary_is_dropped() {
        let out = optimize(vec![
            stat("a"),
            Instruction::boundary(Position::new(1, 5)),
            stat("b"),
        ]);
        let ops: Vec<Opcode> = out.iter().map(|i| i.op).collect();
        assert_eq!(ops, vec![Opcode::EmitStatic, Opcode::EmitStatic]);
    }

    #[test]
    fn test_loop_trailing_delimiter_preserved() {
        let out = optimize(vec![
            Instruction::loop_start("uid", 0, Position::new(1, 1)),
            stat("(x)"),
            eub(","),
            Instruction::loop_end(Position::new(3, 1)),
        ]);
        assert_eq!(out[2].op, Opcode::EmitUnlessBoundary);
    }
}
