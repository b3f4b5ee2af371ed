//! The BPF interpreter: a fetch/decode/execute loop over verified
//! bytecode, charging one compute unit per executed instruction and
//! enforcing a hard iteration cap as a net under the verifier.

use crate::bytecode::{
    insn_at, instruction_count, BpfInsn, ALU_ADD, ALU_AND, ALU_ARSH, ALU_DIV, ALU_LSH, ALU_MOV,
    ALU_MUL, ALU_OR, ALU_RSH, ALU_SUB, ALU_XOR, BPF_ALU32, BPF_ALU64, BPF_JMP, BPF_LD, BPF_LDX,
    BPF_ST, BPF_STX, FRAME_POINTER_REG, JMP_JA, JMP_JEQ, JMP_JGE, JMP_JGT, JMP_JLE, JMP_JLT,
    JMP_JNE, JMP_JSET, JMP_JSGE, JMP_JSGT, JMP_JSLE, JMP_JSLT, REGISTER_COUNT,
};
use crate::memory::{MemoryMap, MM_INPUT_START};
use crate::{BpfExecutionContext, BpfExecutionResult, BpfProgram};
use sealane_sdk::outcome::ExecutionResult;

/// Hard cap on executed instructions, independent of the compute budget.
/// Protects against verifier false negatives.
pub const DEFAULT_MAX_ITERATIONS: u64 = 100_000;

enum Step {
    Continue,
    Exit,
    Fault(String),
}

pub struct Vm<'a> {
    code: &'a [u8],
    insn_count: usize,
    regs: [u64; REGISTER_COUNT],
    mem: MemoryMap,
    pc: usize,
    compute_budget: u64,
    consumed: u64,
    max_iterations: u64,
}

impl<'a> Vm<'a> {
    pub fn new(program: &'a BpfProgram, context: &BpfExecutionContext) -> Self {
        let insn_count = instruction_count(&program.code).unwrap_or(0);
        let mem = MemoryMap::new(
            context.stack_size,
            context.heap_size,
            context.input.clone(),
        );
        let mut regs = [0u64; REGISTER_COUNT];
        regs[1] = MM_INPUT_START;
        regs[2] = context.input.len() as u64;
        regs[10] = mem.stack_top();
        Self {
            code: &program.code,
            insn_count,
            regs,
            mem,
            pc: 0,
            compute_budget: context.compute_budget,
            consumed: 0,
            max_iterations: context.max_iterations,
        }
    }

    /// Run to EXIT, fault, or budget exhaustion. Failures are data in the
    /// result; this function never panics on guest behavior.
    pub fn run(mut self) -> BpfExecutionResult {
        let mut iterations = 0u64;
        loop {
            if iterations >= self.max_iterations {
                return BpfExecutionResult {
                    result: ExecutionResult::ProgramError,
                    return_value: 0,
                    compute_units_consumed: self.consumed,
                    error: Some(format!(
                        "program exceeded {} iterations at pc {}",
                        self.max_iterations, self.pc
                    )),
                };
            }
            if self.consumed >= self.compute_budget {
                return BpfExecutionResult {
                    result: ExecutionResult::ComputeBudgetExceeded,
                    return_value: 0,
                    compute_units_consumed: self.consumed,
                    error: Some(format!(
                        "compute budget of {} units exhausted at pc {}",
                        self.compute_budget, self.pc
                    )),
                };
            }
            if self.pc >= self.insn_count {
                return BpfExecutionResult {
                    result: ExecutionResult::ProgramError,
                    return_value: 0,
                    compute_units_consumed: self.consumed,
                    error: Some(format!("execution fell off the end at pc {}", self.pc)),
                };
            }
            iterations += 1;
            self.consumed += 1;
            let insn = insn_at(self.code, self.pc);
            match self.step(&insn) {
                Step::Continue => {}
                Step::Exit => {
                    return BpfExecutionResult {
                        result: ExecutionResult::Success,
                        return_value: self.regs[0],
                        compute_units_consumed: self.consumed,
                        error: None,
                    }
                }
                Step::Fault(reason) => {
                    return BpfExecutionResult {
                        result: ExecutionResult::ProgramError,
                        return_value: 0,
                        compute_units_consumed: self.consumed,
                        error: Some(reason),
                    }
                }
            }
        }
    }

    fn step(&mut self, insn: &BpfInsn) -> Step {
        if insn.is_exit() {
            return Step::Exit;
        }
        let dst = insn.dst as usize;
        let src = insn.src as usize;
        if dst >= REGISTER_COUNT || src >= REGISTER_COUNT {
            return Step::Fault(format!("invalid register at pc {}", self.pc));
        }
        match insn.class() {
            BPF_LD => {
                // only the two-slot load-immediate reaches execution
                if !insn.is_lddw() || self.pc + 1 >= self.insn_count {
                    return Step::Fault(format!("malformed load at pc {}", self.pc));
                }
                if insn.dst == FRAME_POINTER_REG {
                    return Step::Fault(format!("write to r10 at pc {}", self.pc));
                }
                let cont = insn_at(self.code, self.pc + 1);
                self.regs[dst] =
                    (insn.imm as u32 as u64) | ((cont.imm as u32 as u64) << 32);
                self.pc += 2;
                Step::Continue
            }
            BPF_LDX => {
                if insn.dst == FRAME_POINTER_REG {
                    return Step::Fault(format!("write to r10 at pc {}", self.pc));
                }
                let addr = self.regs[src].wrapping_add(insn.off as i64 as u64);
                match self.mem.load(addr, insn.access_size()) {
                    Ok(value) => {
                        self.regs[dst] = value;
                        self.pc += 1;
                        Step::Continue
                    }
                    Err(violation) => {
                        Step::Fault(format!("{violation} at pc {}", self.pc))
                    }
                }
            }
            BPF_ST => {
                let addr = self.regs[dst].wrapping_add(insn.off as i64 as u64);
                match self
                    .mem
                    .store(addr, insn.imm as i64 as u64, insn.access_size())
                {
                    Ok(()) => {
                        self.pc += 1;
                        Step::Continue
                    }
                    Err(violation) => {
                        Step::Fault(format!("{violation} at pc {}", self.pc))
                    }
                }
            }
            BPF_STX => {
                let addr = self.regs[dst].wrapping_add(insn.off as i64 as u64);
                match self.mem.store(addr, self.regs[src], insn.access_size()) {
                    Ok(()) => {
                        self.pc += 1;
                        Step::Continue
                    }
                    Err(violation) => {
                        Step::Fault(format!("{violation} at pc {}", self.pc))
                    }
                }
            }
            BPF_ALU64 => self.alu64(insn),
            BPF_ALU32 => self.alu32(insn),
            BPF_JMP => self.jump(insn),
            _ => Step::Fault(format!(
                "invalid opcode 0x{:02x} reached execution at pc {}",
                insn.opcode, self.pc
            )),
        }
    }

    fn alu64(&mut self, insn: &BpfInsn) -> Step {
        if insn.dst == FRAME_POINTER_REG {
            return Step::Fault(format!("write to r10 at pc {}", self.pc));
        }
        let dst = insn.dst as usize;
        let src_val = if insn.uses_reg_source() {
            self.regs[insn.src as usize]
        } else {
            insn.imm as i64 as u64
        };
        let dst_val = self.regs[dst];
        let result = match insn.op() {
            ALU_ADD => dst_val.wrapping_add(src_val),
            ALU_SUB => dst_val.wrapping_sub(src_val),
            ALU_MUL => dst_val.wrapping_mul(src_val),
            ALU_DIV => {
                if src_val == 0 {
                    return Step::Fault(format!("division by zero at pc {}", self.pc));
                }
                dst_val / src_val
            }
            ALU_OR => dst_val | src_val,
            ALU_AND => dst_val & src_val,
            ALU_LSH => dst_val.wrapping_shl((src_val & 63) as u32),
            ALU_RSH => dst_val.wrapping_shr((src_val & 63) as u32),
            ALU_XOR => dst_val ^ src_val,
            ALU_MOV => src_val,
            ALU_ARSH => ((dst_val as i64) >> (src_val & 63)) as u64,
            _ => {
                return Step::Fault(format!(
                    "invalid alu64 op at pc {}",
                    self.pc
                ))
            }
        };
        self.regs[dst] = result;
        self.pc += 1;
        Step::Continue
    }

    fn alu32(&mut self, insn: &BpfInsn) -> Step {
        if insn.dst == FRAME_POINTER_REG {
            return Step::Fault(format!("write to r10 at pc {}", self.pc));
        }
        let dst = insn.dst as usize;
        let src_val = if insn.uses_reg_source() {
            self.regs[insn.src as usize] as u32
        } else {
            insn.imm as u32
        };
        let dst_val = self.regs[dst] as u32;
        let result = match insn.op() {
            ALU_ADD => dst_val.wrapping_add(src_val),
            ALU_SUB => dst_val.wrapping_sub(src_val),
            ALU_MUL => dst_val.wrapping_mul(src_val),
            ALU_DIV => {
                if src_val == 0 {
                    return Step::Fault(format!("division by zero at pc {}", self.pc));
                }
                dst_val / src_val
            }
            ALU_OR => dst_val | src_val,
            ALU_AND => dst_val & src_val,
            ALU_LSH => dst_val.wrapping_shl(src_val & 31),
            ALU_RSH => dst_val.wrapping_shr(src_val & 31),
            ALU_XOR => dst_val ^ src_val,
            ALU_MOV => src_val,
            ALU_ARSH => ((dst_val as i32) >> (src_val & 31)) as u32,
            _ => {
                return Step::Fault(format!(
                    "invalid alu32 op at pc {}",
                    self.pc
                ))
            }
        };
        // 32-bit results are zero-extended into the 64-bit register
        self.regs[dst] = result as u64;
        self.pc += 1;
        Step::Continue
    }

    fn jump(&mut self, insn: &BpfInsn) -> Step {
        let dst_val = self.regs[insn.dst as usize];
        let src_val = if insn.uses_reg_source() {
            self.regs[insn.src as usize]
        } else {
            insn.imm as i64 as u64
        };
        let taken = match insn.op() {
            JMP_JA => true,
            JMP_JEQ => dst_val == src_val,
            JMP_JGT => dst_val > src_val,
            JMP_JGE => dst_val >= src_val,
            JMP_JSET => dst_val & src_val != 0,
            JMP_JNE => dst_val != src_val,
            JMP_JSGT => (dst_val as i64) > (src_val as i64),
            JMP_JSGE => (dst_val as i64) >= (src_val as i64),
            JMP_JLT => dst_val < src_val,
            JMP_JLE => dst_val <= src_val,
            JMP_JSLT => (dst_val as i64) < (src_val as i64),
            JMP_JSLE => (dst_val as i64) <= (src_val as i64),
            _ => {
                return Step::Fault(format!(
                    "invalid jump op at pc {}",
                    self.pc
                ))
            }
        };
        if taken {
            let target = self.pc as i64 + 1 + insn.off as i64;
            if target < 0 || target >= self.insn_count as i64 {
                return Step::Fault(format!(
                    "jump to out-of-bounds target {target} at pc {}",
                    self.pc
                ));
            }
            self.pc = target as usize;
        } else {
            self.pc += 1;
        }
        Step::Continue
    }
}
