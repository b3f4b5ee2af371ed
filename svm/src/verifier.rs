//! Static safety verification. A program that passes every check here can
//! still be stopped at runtime by the interpreter's iteration cap and
//! region bounds; the verifier's job is to reject programs whose execution
//! cannot be bounded or whose memory accesses have no traceable provenance
//! before a single instruction runs.

use crate::bytecode::{
    self, insn_at, instruction_count, is_known_opcode, writes_dst, BpfInsn, BPF_ALU32, BPF_ALU64,
    BPF_JMP, BPF_LD, BPF_LDX, BPF_ST, BPF_STX, FRAME_POINTER_REG, JMP_JA,
};
use crate::memory::{MemoryMap, RegionKind};
use crate::BpfProgram;
use log::warn;
use std::collections::VecDeque;
use thiserror::Error;

/// Limits the verifier enforces. Every field has a default; callers
/// override as needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyPolicy {
    pub max_instructions: usize,
    pub allow_infinite_loops: bool,
    /// maximum frame depth below r10, in bytes
    pub max_stack_depth: usize,
}

impl Default for VerifyPolicy {
    fn default() -> Self {
        Self {
            max_instructions: 4096,
            allow_infinite_loops: false,
            max_stack_depth: 4096,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifierError {
    #[error("program is empty")]
    EmptyProgram,
    #[error("program length {0} is not a multiple of 8")]
    RaggedProgram(usize),
    #[error("too many instructions: {count} > {max}")]
    TooManyInstructions { count: usize, max: usize },
    #[error("unknown opcode 0x{opcode:02x} at pc {pc}")]
    UnknownOpcode { pc: usize, opcode: u8 },
    #[error("invalid register r{reg} at pc {pc}")]
    InvalidRegister { pc: usize, reg: u8 },
    #[error("write to read-only frame pointer r10 at pc {pc}")]
    FramePointerWrite { pc: usize },
    #[error("lddw at pc {pc} is missing its second slot")]
    IncompleteLddw { pc: usize },
    #[error("jump at pc {pc} to out-of-range target {target}")]
    JumpOutOfBounds { pc: usize, target: i64 },
    #[error("jump at pc {pc} lands inside an lddw pair at {target}")]
    JumpIntoLddw { pc: usize, target: usize },
    #[error("memory access at pc {pc} has no traceable region provenance")]
    UntracedMemoryAccess { pc: usize },
    #[error("unbounded loop: cycle through pc {pc} never strictly decreases a tested induction variable")]
    UnboundedLoop { pc: usize },
    #[error("stack access at pc {pc} reaches {depth} bytes below the frame pointer, max {max}")]
    StackDepthExceeded { pc: usize, depth: i64, max: usize },
}

/// Per-register abstract value for the provenance dataflow. Pointers carry
/// their region and, when derivable, a constant offset: stack offsets are
/// relative to r10, heap/input offsets relative to the region base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AbsVal {
    Uninit,
    Scalar,
    Ptr(RegionKind, Option<i64>),
    Unknown,
}

impl AbsVal {
    fn join(self, other: AbsVal) -> AbsVal {
        use AbsVal::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Ptr(ra, _), Ptr(rb, _)) if ra == rb => Ptr(ra, None),
            _ => Unknown,
        }
    }

    fn bump(self, delta: i64) -> AbsVal {
        match self {
            AbsVal::Ptr(region, Some(offset)) => AbsVal::Ptr(region, Some(offset + delta)),
            AbsVal::Ptr(region, None) => AbsVal::Ptr(region, None),
            AbsVal::Scalar => AbsVal::Scalar,
            _ => AbsVal::Unknown,
        }
    }
}

type RegState = [AbsVal; bytecode::REGISTER_COUNT];

/// One load/store discovered by the dataflow, with the abstract value of
/// its base register at that point.
#[derive(Debug, Clone, Copy)]
struct AccessRecord {
    pc: usize,
    base: AbsVal,
    off: i64,
    size: usize,
}

pub struct BpfVerifier {
    policy: VerifyPolicy,
    last_error: Option<String>,
}

impl BpfVerifier {
    pub fn new(policy: VerifyPolicy) -> Self {
        Self {
            policy,
            last_error: None,
        }
    }

    pub fn policy(&self) -> &VerifyPolicy {
        &self.policy
    }

    /// The retained reason for the most recent rejection.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Run every check in order; the first failure is the reported reason.
    pub fn verify(&mut self, program: &BpfProgram) -> Result<(), VerifierError> {
        self.last_error = None;
        let result = self.run_checks(&program.code);
        if let Err(err) = &result {
            let reason = err.to_string();
            warn!("bpf program rejected: {reason}");
            self.last_error = Some(reason);
        }
        result
    }

    fn run_checks(&self, code: &[u8]) -> Result<(), VerifierError> {
        // 1. instruction count bound
        let count = instruction_count(code).ok_or(VerifierError::RaggedProgram(code.len()))?;
        if count == 0 {
            return Err(VerifierError::EmptyProgram);
        }
        if count > self.policy.max_instructions {
            return Err(VerifierError::TooManyInstructions {
                count,
                max: self.policy.max_instructions,
            });
        }

        // 2. well-formedness
        let is_continuation = Self::check_well_formed(code, count)?;

        // 3. jump targets in range
        Self::check_jump_targets(code, count, &is_continuation)?;

        let (states, accesses) = Self::provenance_dataflow(code, count, &is_continuation);

        // 4. memory-access classification
        for access in &accesses {
            if !matches!(access.base, AbsVal::Ptr(..)) {
                return Err(VerifierError::UntracedMemoryAccess { pc: access.pc });
            }
        }

        // 5. loop termination
        if !self.policy.allow_infinite_loops {
            Self::check_termination(code, count, &is_continuation, &states)?;
        }

        // 6. stack-depth bound
        for access in &accesses {
            if let AbsVal::Ptr(RegionKind::Stack, Some(offset)) = access.base {
                let low = offset + access.off;
                let high = low + access.size as i64;
                let depth = -low;
                // the frame is the window [r10 - max_stack_depth, r10)
                if depth > self.policy.max_stack_depth as i64 || high > 0 {
                    return Err(VerifierError::StackDepthExceeded {
                        pc: access.pc,
                        depth,
                        max: self.policy.max_stack_depth,
                    });
                }
            }
        }

        Ok(())
    }

    /// Validate opcodes and register fields; returns the lddw-continuation
    /// bitmap the later passes use to step over second slots.
    fn check_well_formed(code: &[u8], count: usize) -> Result<Vec<bool>, VerifierError> {
        let mut is_continuation = vec![false; count];
        let mut pc = 0;
        while pc < count {
            let insn = insn_at(code, pc);
            if !is_known_opcode(insn.opcode) {
                return Err(VerifierError::UnknownOpcode {
                    pc,
                    opcode: insn.opcode,
                });
            }
            if insn.dst as usize >= bytecode::REGISTER_COUNT {
                return Err(VerifierError::InvalidRegister {
                    pc,
                    reg: insn.dst,
                });
            }
            if insn.src as usize >= bytecode::REGISTER_COUNT {
                return Err(VerifierError::InvalidRegister {
                    pc,
                    reg: insn.src,
                });
            }
            if writes_dst(&insn) && insn.dst == FRAME_POINTER_REG {
                return Err(VerifierError::FramePointerWrite { pc });
            }
            if insn.is_lddw() {
                if pc + 1 >= count {
                    return Err(VerifierError::IncompleteLddw { pc });
                }
                let cont = insn_at(code, pc + 1);
                if cont.opcode != 0 {
                    return Err(VerifierError::IncompleteLddw { pc });
                }
                is_continuation[pc + 1] = true;
                pc += 2;
            } else {
                pc += 1;
            }
        }
        Ok(is_continuation)
    }

    fn check_jump_targets(
        code: &[u8],
        count: usize,
        is_continuation: &[bool],
    ) -> Result<(), VerifierError> {
        for pc in 0..count {
            if is_continuation[pc] {
                continue;
            }
            let insn = insn_at(code, pc);
            if insn.class() != BPF_JMP || insn.is_exit() {
                continue;
            }
            let target = pc as i64 + 1 + insn.off as i64;
            if target < 0 || target >= count as i64 {
                return Err(VerifierError::JumpOutOfBounds { pc, target });
            }
            if is_continuation[target as usize] {
                return Err(VerifierError::JumpIntoLddw {
                    pc,
                    target: target as usize,
                });
            }
        }
        Ok(())
    }

    /// Successors of `pc` for dataflow and CFG purposes. Conditional
    /// fall-through past the last instruction is a runtime fault, not a
    /// static edge.
    fn successors(code: &[u8], count: usize, pc: usize) -> Vec<usize> {
        let insn = insn_at(code, pc);
        if insn.is_exit() {
            return vec![];
        }
        if insn.class() == BPF_JMP {
            let target = (pc as i64 + 1 + insn.off as i64) as usize;
            if insn.op() == JMP_JA {
                return vec![target];
            }
            let mut out = vec![target];
            if pc + 1 < count {
                out.push(pc + 1);
            }
            return out;
        }
        let next = if insn.is_lddw() { pc + 2 } else { pc + 1 };
        if next < count {
            vec![next]
        } else {
            vec![]
        }
    }

    /// Forward abstract interpretation over the CFG. Returns the fixpoint
    /// in-state of every reachable instruction plus the discovered memory
    /// accesses, in pc order, evaluated against those states.
    fn provenance_dataflow(
        code: &[u8],
        count: usize,
        is_continuation: &[bool],
    ) -> (Vec<Option<RegState>>, Vec<AccessRecord>) {
        let mut states: Vec<Option<RegState>> = vec![None; count];
        let mut entry = [AbsVal::Uninit; bytecode::REGISTER_COUNT];
        // calling convention: r1 = input pointer, r2 = input length,
        // r10 = frame pointer at offset 0
        entry[1] = AbsVal::Ptr(RegionKind::Input, Some(0));
        entry[2] = AbsVal::Scalar;
        entry[10] = AbsVal::Ptr(RegionKind::Stack, Some(0));
        states[0] = Some(entry);

        let mut worklist: VecDeque<usize> = VecDeque::from([0]);
        while let Some(pc) = worklist.pop_front() {
            let state = match states[pc] {
                Some(state) => state,
                None => continue,
            };
            let out = Self::transfer(&insn_at(code, pc), code, pc, &state);
            for succ in Self::successors(code, count, pc) {
                let merged = match states[succ] {
                    None => out,
                    Some(existing) => {
                        let mut merged = existing;
                        for (slot, incoming) in merged.iter_mut().zip(out.iter()) {
                            *slot = slot.join(*incoming);
                        }
                        merged
                    }
                };
                if states[succ] != Some(merged) {
                    states[succ] = Some(merged);
                    worklist.push_back(succ);
                }
            }
        }

        let mut accesses = Vec::new();
        for pc in 0..count {
            if is_continuation[pc] {
                continue;
            }
            let state = match states[pc] {
                Some(state) => state,
                None => continue, // unreachable code never executes
            };
            let insn = insn_at(code, pc);
            match insn.class() {
                BPF_LDX => accesses.push(AccessRecord {
                    pc,
                    base: state[insn.src as usize],
                    off: insn.off as i64,
                    size: insn.access_size(),
                }),
                BPF_ST | BPF_STX => accesses.push(AccessRecord {
                    pc,
                    base: state[insn.dst as usize],
                    off: insn.off as i64,
                    size: insn.access_size(),
                }),
                _ => {}
            }
        }
        (states, accesses)
    }

    fn transfer(insn: &BpfInsn, code: &[u8], pc: usize, state: &RegState) -> RegState {
        use bytecode::{ALU_ADD, ALU_MOV, ALU_SUB};
        let mut out = *state;
        let dst = insn.dst as usize;
        match insn.class() {
            BPF_LD if insn.is_lddw() => {
                let cont = insn_at(code, pc + 1);
                let imm64 = (insn.imm as u32 as u64) | ((cont.imm as u32 as u64) << 32);
                out[dst] = match MemoryMap::region_of(imm64) {
                    // stack constants cannot be related to r10 statically
                    Some(RegionKind::Stack) => AbsVal::Ptr(RegionKind::Stack, None),
                    Some(region) => {
                        let base = match region {
                            RegionKind::Heap => crate::memory::MM_HEAP_START,
                            RegionKind::Input => crate::memory::MM_INPUT_START,
                            RegionKind::Stack => unreachable!(),
                        };
                        AbsVal::Ptr(region, Some((imm64 - base) as i64))
                    }
                    None => AbsVal::Scalar,
                };
            }
            BPF_ALU64 => {
                let src_val = if insn.uses_reg_source() {
                    state[insn.src as usize]
                } else {
                    AbsVal::Scalar
                };
                out[dst] = match insn.op() {
                    ALU_MOV => {
                        if insn.uses_reg_source() {
                            src_val
                        } else {
                            AbsVal::Scalar
                        }
                    }
                    ALU_ADD => {
                        if insn.uses_reg_source() {
                            match (state[dst], src_val) {
                                (AbsVal::Ptr(region, _), AbsVal::Scalar) => {
                                    AbsVal::Ptr(region, None)
                                }
                                (AbsVal::Scalar, AbsVal::Ptr(region, _)) => {
                                    AbsVal::Ptr(region, None)
                                }
                                (AbsVal::Scalar, AbsVal::Scalar) => AbsVal::Scalar,
                                _ => AbsVal::Unknown,
                            }
                        } else {
                            state[dst].bump(insn.imm as i64)
                        }
                    }
                    ALU_SUB => {
                        if insn.uses_reg_source() {
                            match (state[dst], src_val) {
                                (AbsVal::Ptr(region, _), AbsVal::Scalar) => {
                                    AbsVal::Ptr(region, None)
                                }
                                (AbsVal::Ptr(ra, _), AbsVal::Ptr(rb, _)) if ra == rb => {
                                    AbsVal::Scalar
                                }
                                (AbsVal::Scalar, AbsVal::Scalar) => AbsVal::Scalar,
                                _ => AbsVal::Unknown,
                            }
                        } else {
                            state[dst].bump(-(insn.imm as i64))
                        }
                    }
                    // any other arithmetic destroys provenance
                    _ => AbsVal::Scalar,
                };
            }
            BPF_ALU32 => {
                // 32-bit results are zero-extended scalars
                out[dst] = AbsVal::Scalar;
            }
            BPF_LDX => {
                out[dst] = AbsVal::Scalar;
            }
            _ => {}
        }
        out
    }

    /// Tarjan SCC over the CFG; every nontrivial SCC must strictly decrease
    /// an induction register that one of its own exit branches tests.
    fn check_termination(
        code: &[u8],
        count: usize,
        is_continuation: &[bool],
        states: &[Option<RegState>],
    ) -> Result<(), VerifierError> {
        let sccs = Self::strongly_connected_components(code, count, is_continuation, states);
        for scc in sccs {
            let self_loop = scc.len() == 1 && {
                let pc = scc[0];
                Self::successors(code, count, pc).contains(&pc)
            };
            if scc.len() == 1 && !self_loop {
                continue;
            }
            if !Self::scc_has_bounded_induction(code, count, &scc) {
                let pc = *scc.iter().min().expect("scc is nonempty");
                return Err(VerifierError::UnboundedLoop { pc });
            }
        }
        Ok(())
    }

    fn scc_has_bounded_induction(code: &[u8], count: usize, scc: &[usize]) -> bool {
        use bytecode::{ALU_ADD, ALU_SUB};
        let in_scc = |pc: usize| scc.contains(&pc);

        // registers strictly decreased by a constant somewhere in the cycle
        let mut decremented = [false; bytecode::REGISTER_COUNT];
        for &pc in scc {
            let insn = insn_at(code, pc);
            if matches!(insn.class(), BPF_ALU64 | BPF_ALU32) && !insn.uses_reg_source() {
                let decrements = (insn.op() == ALU_SUB && insn.imm > 0)
                    || (insn.op() == ALU_ADD && insn.imm < 0);
                if decrements {
                    decremented[insn.dst as usize] = true;
                }
            }
        }

        // a conditional branch inside the cycle that tests a decremented
        // register and can leave the cycle
        for &pc in scc {
            let insn = insn_at(code, pc);
            if insn.class() != BPF_JMP || insn.is_exit() || insn.op() == JMP_JA {
                continue;
            }
            let escapes = Self::successors(code, count, pc)
                .iter()
                .any(|succ| !in_scc(*succ));
            if !escapes {
                continue;
            }
            if decremented[insn.dst as usize]
                || (insn.uses_reg_source() && decremented[insn.src as usize])
            {
                return true;
            }
        }
        false
    }

    /// Iterative Tarjan over reachable, non-continuation instructions.
    fn strongly_connected_components(
        code: &[u8],
        count: usize,
        is_continuation: &[bool],
        states: &[Option<RegState>],
    ) -> Vec<Vec<usize>> {
        let reachable =
            |pc: usize| pc < count && !is_continuation[pc] && states[pc].is_some();

        let mut index = vec![usize::MAX; count];
        let mut lowlink = vec![usize::MAX; count];
        let mut on_stack = vec![false; count];
        let mut stack: Vec<usize> = Vec::new();
        let mut next_index = 0usize;
        let mut sccs: Vec<Vec<usize>> = Vec::new();

        for start in 0..count {
            if !reachable(start) || index[start] != usize::MAX {
                continue;
            }
            // explicit DFS frame: (node, successor cursor)
            let mut frames: Vec<(usize, usize)> = vec![(start, 0)];
            while let Some(&(node, cursor)) = frames.last() {
                if cursor == 0 {
                    index[node] = next_index;
                    lowlink[node] = next_index;
                    next_index += 1;
                    stack.push(node);
                    on_stack[node] = true;
                }
                let succs: Vec<usize> = Self::successors(code, count, node)
                    .into_iter()
                    .filter(|succ| reachable(*succ))
                    .collect();
                if cursor < succs.len() {
                    frames.last_mut().expect("frame exists").1 += 1;
                    let succ = succs[cursor];
                    if index[succ] == usize::MAX {
                        frames.push((succ, 0));
                    } else if on_stack[succ] {
                        lowlink[node] = lowlink[node].min(index[succ]);
                    }
                } else {
                    frames.pop();
                    if let Some(&(parent, _)) = frames.last() {
                        lowlink[parent] = lowlink[parent].min(lowlink[node]);
                    }
                    if lowlink[node] == index[node] {
                        let mut component = Vec::new();
                        loop {
                            let member = stack.pop().expect("tarjan stack underflow");
                            on_stack[member] = false;
                            component.push(member);
                            if member == node {
                                break;
                            }
                        }
                        sccs.push(component);
                    }
                }
            }
        }
        sccs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::asm::*;
    use crate::bytecode::{ALU_ADD, ALU_DIV, ALU_SUB, BPF_B, BPF_DW, BPF_W, JMP_JGT, JMP_JNE};
    use crate::memory::{MM_HEAP_START, MM_INPUT_START};
    use assert_matches::assert_matches;

    fn verify(code: Vec<u8>) -> Result<(), VerifierError> {
        verify_with(code, VerifyPolicy::default())
    }

    fn verify_with(code: Vec<u8>, policy: VerifyPolicy) -> Result<(), VerifierError> {
        BpfVerifier::new(policy).verify(&BpfProgram::new(code))
    }

    #[test]
    fn test_trivial_exit_program() {
        assert_eq!(verify(program(&[&[exit()]])), Ok(()));
    }

    #[test]
    fn test_empty_and_ragged_programs() {
        assert_matches!(verify(vec![]), Err(VerifierError::EmptyProgram));
        assert_matches!(verify(vec![0u8; 9]), Err(VerifierError::RaggedProgram(9)));
    }

    #[test]
    fn test_instruction_count_boundary() {
        let policy = VerifyPolicy {
            max_instructions: 4,
            ..VerifyPolicy::default()
        };
        // exactly max_instructions: accepted
        let at_limit = program(&[&[
            mov64_imm(0, 1),
            mov64_imm(1, 2),
            mov64_imm(2, 3),
            exit(),
        ]]);
        assert_eq!(verify_with(at_limit, policy.clone()), Ok(()));
        // one more: rejected
        let over = program(&[&[
            mov64_imm(0, 1),
            mov64_imm(1, 2),
            mov64_imm(2, 3),
            mov64_imm(3, 4),
            exit(),
        ]]);
        assert_matches!(
            verify_with(over, policy),
            Err(VerifierError::TooManyInstructions { count: 5, max: 4 })
        );
    }

    #[test]
    fn test_unknown_opcode() {
        let code = program(&[&[insn(0xE7, 0, 0, 0, 0), exit()]]);
        assert_matches!(
            verify(code),
            Err(VerifierError::UnknownOpcode { pc: 0, opcode: 0xE7 })
        );
    }

    #[test]
    fn test_frame_pointer_is_read_only() {
        let code = program(&[&[mov64_imm(10, 0), exit()]]);
        assert_matches!(verify(code), Err(VerifierError::FramePointerWrite { pc: 0 }));
    }

    #[test]
    fn test_lddw_needs_second_slot() {
        let [lo, _] = lddw(1, 0xFFFF_FFFF_FFFF);
        let code = program(&[&[lo]]);
        assert_matches!(verify(code), Err(VerifierError::IncompleteLddw { pc: 0 }));
    }

    #[test]
    fn test_jump_out_of_range() {
        let code = program(&[&[ja(5), exit()]]);
        assert_matches!(
            verify(code),
            Err(VerifierError::JumpOutOfBounds { pc: 0, target: 6 })
        );
        let code = program(&[&[ja(-2), exit()]]);
        assert_matches!(
            verify(code),
            Err(VerifierError::JumpOutOfBounds { pc: 0, target: -1 })
        );
    }

    #[test]
    fn test_jump_into_lddw_pair() {
        let [lo, hi] = lddw(1, MM_HEAP_START);
        let code = program(&[&[jmp_imm(JMP_JNE, 0, 0, 1), lo, hi, exit()]]);
        assert_matches!(
            verify(code),
            Err(VerifierError::JumpIntoLddw { pc: 0, target: 2 })
        );
    }

    #[test]
    fn test_stack_access_is_traceable() {
        // store through r10 and reload
        let code = program(&[&[
            st_imm(BPF_DW, 10, -8, 7),
            ldx(BPF_DW, 0, 10, -8),
            exit(),
        ]]);
        assert_eq!(verify(code), Ok(()));
    }

    #[test]
    fn test_input_pointer_arithmetic_is_traceable() {
        // r1 arrives as the input pointer; bump and deref
        let code = program(&[&[
            alu64_imm(ALU_ADD, 1, 4),
            ldx(BPF_W, 0, 1, 0),
            exit(),
        ]]);
        assert_eq!(verify(code), Ok(()));
    }

    #[test]
    fn test_lddw_heap_pointer_is_traceable() {
        let [lo, hi] = lddw(2, MM_HEAP_START + 16);
        let code = program(&[&[lo, hi, ldx(BPF_DW, 0, 2, 0), exit()]]);
        assert_eq!(verify(code), Ok(()));
    }

    #[test]
    fn test_absolute_address_without_provenance_rejected() {
        // a synthesized scalar address is not traceable to a region
        let code = program(&[&[mov64_imm(1, 0x1000), ldx(BPF_DW, 0, 1, 0), exit()]]);
        assert_matches!(
            verify(code),
            Err(VerifierError::UntracedMemoryAccess { pc: 1 })
        );
    }

    #[test]
    fn test_multiplied_pointer_loses_provenance() {
        let [lo, hi] = lddw(2, MM_INPUT_START);
        let code = program(&[&[
            lo,
            hi,
            alu64_imm(bytecode::ALU_MUL, 2, 1),
            ldx(BPF_W, 0, 2, 0),
            exit(),
        ]]);
        assert_matches!(
            verify(code),
            Err(VerifierError::UntracedMemoryAccess { pc: 3 })
        );
    }

    #[test]
    fn test_uninitialized_base_rejected() {
        let code = program(&[&[ldx(BPF_DW, 0, 5, 0), exit()]]);
        assert_matches!(
            verify(code),
            Err(VerifierError::UntracedMemoryAccess { pc: 0 })
        );
    }

    #[test]
    fn test_tight_self_loop_rejected() {
        // `ja -1`: the canonical unbounded loop
        let code = program(&[&[ja(-1), exit()]]);
        assert_matches!(verify(code), Err(VerifierError::UnboundedLoop { pc: 0 }));
    }

    #[test]
    fn test_tight_self_loop_allowed_by_policy() {
        let policy = VerifyPolicy {
            allow_infinite_loops: true,
            ..VerifyPolicy::default()
        };
        let code = program(&[&[ja(-1), exit()]]);
        assert_eq!(verify_with(code, policy), Ok(()));
    }

    #[test]
    fn test_counted_loop_accepted() {
        // r1 = 10; loop { r1 -= 1; if r1 != 0 goto loop }; exit
        let code = program(&[&[
            mov64_imm(1, 10),
            alu64_imm(ALU_SUB, 1, 1),
            jmp_imm(JMP_JNE, 1, 0, -2),
            exit(),
        ]]);
        assert_eq!(verify(code), Ok(()));
    }

    #[test]
    fn test_loop_without_decrement_rejected() {
        // the counter never changes, so the test can never make progress
        let code = program(&[&[
            mov64_imm(1, 10),
            alu64_imm(ALU_ADD, 2, 1),
            jmp_imm(JMP_JNE, 1, 0, -2),
            exit(),
        ]]);
        assert_matches!(verify(code), Err(VerifierError::UnboundedLoop { .. }));
    }

    #[test]
    fn test_loop_counting_up_rejected() {
        // increments only; the conservative check refuses it
        let code = program(&[&[
            mov64_imm(1, 0),
            alu64_imm(ALU_ADD, 1, 1),
            jmp_imm(JMP_JGT, 1, 100, 1),
            ja(-3),
            exit(),
        ]]);
        assert_matches!(verify(code), Err(VerifierError::UnboundedLoop { .. }));
    }

    #[test]
    fn test_stack_depth_boundary() {
        let policy = VerifyPolicy {
            max_stack_depth: 64,
            ..VerifyPolicy::default()
        };
        let at_limit = program(&[&[st_imm(BPF_DW, 10, -64, 1), exit()]]);
        assert_eq!(verify_with(at_limit, policy.clone()), Ok(()));

        let too_deep = program(&[&[st_imm(BPF_DW, 10, -72, 1), exit()]]);
        assert_matches!(
            verify_with(too_deep, policy),
            Err(VerifierError::StackDepthExceeded { pc: 0, depth: 72, max: 64 })
        );
    }

    #[test]
    fn test_last_error_is_retained() {
        let mut verifier = BpfVerifier::new(VerifyPolicy::default());
        assert!(verifier.verify(&BpfProgram::new(program(&[&[ja(-1), exit()]]))).is_err());
        let reason = verifier.last_error().unwrap().to_string();
        assert!(reason.contains("loop"), "unexpected reason: {reason}");

        // a subsequent success clears it
        assert!(verifier.verify(&BpfProgram::new(program(&[&[exit()]]))).is_ok());
        assert!(verifier.last_error().is_none());
    }

    #[test]
    fn test_branchy_program_with_mov_chains() {
        // provenance survives register moves across branches
        let code = program(&[&[
            mov64_reg(3, 1),
            jmp_imm(bytecode::JMP_JEQ, 2, 0, 1),
            alu64_imm(ALU_ADD, 3, 8),
            ldx(BPF_B, 0, 3, 0),
            exit(),
        ]]);
        assert_eq!(verify(code), Ok(()));
    }

    #[test]
    fn test_div_then_exit_is_fine_statically() {
        // division by zero is a runtime fault, not a verifier concern
        let code = program(&[&[
            mov64_imm(0, 10),
            mov64_imm(1, 0),
            alu64_reg(ALU_DIV, 0, 1),
            exit(),
        ]]);
        assert_eq!(verify(code), Ok(()));
    }
}
