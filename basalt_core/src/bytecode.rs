//! Stack-based bytecode consumed by the JIT.
//!
//! A [`BytecodeProgram`] is an ordered list of [`Instruction`]s plus a
//! constant pool. Each instruction carries an [`Opcode`] and up to two
//! operands. The position of an instruction in the list is also its
//! bytecode offset; jump operands refer to positions.
//!
//! # Stack Model
//!
//! ```text
//! LoadConst 0    ; push c0
//! LoadConst 1    ; push c1
//! Add            ; pop c1, pop c0, push (c0 + c1)
//! Return         ; pop result
//! ```
//!
//! The stack effect of every opcode is static (see [`Opcode::stack_effect`]),
//! which lets the register allocator derive live ranges without running
//! the program.

use std::fmt;
use std::sync::Arc;

// =============================================================================
// Opcode
// =============================================================================

/// Bytecode operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// No operation.
    Nop = 0,
    /// Push constant `arg` from the constant pool.
    LoadConst = 1,
    /// Push local slot `arg`.
    LoadLocal = 2,
    /// Pop into local slot `arg`.
    StoreLocal = 3,
    /// Pop two, push their sum.
    Add = 4,
    /// Pop two, push their difference.
    Sub = 5,
    /// Pop two, push their product.
    Mul = 6,
    /// Pop two, push their quotient.
    Div = 7,
    /// Discard the top of stack.
    Pop = 8,
    /// Duplicate the top of stack.
    Dup = 9,
    /// Unconditional jump to position `arg`.
    Jump = 10,
    /// Pop a condition; jump to position `arg` if it is falsy.
    JumpIfFalse = 11,
    /// Pop the return value and leave the function.
    Return = 12,
}

/// Number of values an instruction pops and pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackEffect {
    /// Values consumed from the top of the stack.
    pub pops: u8,
    /// Values produced onto the stack.
    pub pushes: u8,
}

impl StackEffect {
    const fn new(pops: u8, pushes: u8) -> Self {
        StackEffect { pops, pushes }
    }
}

impl Opcode {
    /// Every opcode, in encoding order.
    pub const ALL: [Opcode; 13] = [
        Opcode::Nop,
        Opcode::LoadConst,
        Opcode::LoadLocal,
        Opcode::StoreLocal,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Pop,
        Opcode::Dup,
        Opcode::Jump,
        Opcode::JumpIfFalse,
        Opcode::Return,
    ];

    /// Static stack effect of this opcode.
    ///
    /// `Dup` is modelled as consuming its source and producing two values,
    /// so that the copy and the original each get their own live range.
    #[inline]
    pub const fn stack_effect(self) -> StackEffect {
        match self {
            Opcode::Nop | Opcode::Jump => StackEffect::new(0, 0),
            Opcode::LoadConst | Opcode::LoadLocal => StackEffect::new(0, 1),
            Opcode::StoreLocal | Opcode::Pop | Opcode::JumpIfFalse | Opcode::Return => {
                StackEffect::new(1, 0)
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => StackEffect::new(2, 1),
            Opcode::Dup => StackEffect::new(1, 2),
        }
    }

    /// Number of operands this opcode reads.
    #[inline]
    pub const fn arity(self) -> u8 {
        match self {
            Opcode::LoadConst
            | Opcode::LoadLocal
            | Opcode::StoreLocal
            | Opcode::Jump
            | Opcode::JumpIfFalse => 1,
            _ => 0,
        }
    }

    /// Check if this opcode transfers control.
    #[inline]
    pub const fn is_branch(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::JumpIfFalse)
    }

    /// Check if this is a binary arithmetic opcode.
    #[inline]
    pub const fn is_arithmetic(self) -> bool {
        matches!(self, Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div)
    }

    /// Convert from the raw encoding.
    #[inline]
    pub const fn from_u8(raw: u8) -> Option<Opcode> {
        if (raw as usize) < Self::ALL.len() {
            Some(Self::ALL[raw as usize])
        } else {
            None
        }
    }

    /// Mnemonic used in disassembly and logs.
    pub const fn name(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::LoadConst => "LOAD_CONST",
            Opcode::LoadLocal => "LOAD_LOCAL",
            Opcode::StoreLocal => "STORE_LOCAL",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Pop => "POP",
            Opcode::Dup => "DUP",
            Opcode::Jump => "JUMP",
            Opcode::JumpIfFalse => "JUMP_IF_FALSE",
            Opcode::Return => "RETURN",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Instruction
// =============================================================================

/// A single bytecode instruction: opcode plus up to two operands.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    opcode: Opcode,
    operands: [u32; 2],
}

impl Instruction {
    /// Create an instruction with only an opcode.
    #[inline]
    pub const fn op(opcode: Opcode) -> Self {
        Instruction {
            opcode,
            operands: [0, 0],
        }
    }

    /// Create an instruction with one operand.
    #[inline]
    pub const fn op_a(opcode: Opcode, a: u32) -> Self {
        Instruction {
            opcode,
            operands: [a, 0],
        }
    }

    /// Create an instruction with two operands.
    #[inline]
    pub const fn op_ab(opcode: Opcode, a: u32, b: u32) -> Self {
        Instruction {
            opcode,
            operands: [a, b],
        }
    }

    /// Get the opcode.
    #[inline]
    pub const fn opcode(self) -> Opcode {
        self.opcode
    }

    /// First operand (constant index, local slot or jump target).
    #[inline]
    pub const fn arg(self) -> u32 {
        self.operands[0]
    }

    /// Second operand.
    #[inline]
    pub const fn arg2(self) -> u32 {
        self.operands[1]
    }

    /// Jump target position, if this is a branch.
    #[inline]
    pub const fn jump_target(self) -> Option<u32> {
        if self.opcode.is_branch() {
            Some(self.operands[0])
        } else {
            None
        }
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opcode.arity() {
            0 => write!(f, "{}", self.opcode),
            _ => write!(f, "{} {}", self.opcode, self.operands[0]),
        }
    }
}

// =============================================================================
// Constants
// =============================================================================

/// A constant pool entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// The absent value.
    None,
    /// Boolean.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Immutable string.
    Str(Arc<str>),
}

impl Constant {
    /// Integer view of a numeric constant.
    ///
    /// Booleans map to 0/1 and floats only when they hold an exact
    /// integer. Everything else is non-numeric.
    #[inline]
    pub fn as_integer(&self) -> Option<i64> {
        match *self {
            Constant::Int(i) => Some(i),
            Constant::Bool(b) => Some(b as i64),
            Constant::Float(f)
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 =>
            {
                Some(f as i64)
            }
            _ => None,
        }
    }

    /// Check if this constant is numeric in the integer sense of [`as_integer`].
    ///
    /// [`as_integer`]: Constant::as_integer
    #[inline]
    pub fn is_numeric(&self) -> bool {
        self.as_integer().is_some()
    }
}

// =============================================================================
// Program
// =============================================================================

/// A bytecode program: instructions plus constant pool.
///
/// Read-only once built. The JIT borrows it for the duration of a compile.
#[derive(Debug, Clone, PartialEq)]
pub struct BytecodeProgram {
    /// Name used in logs and diagnostics.
    name: Arc<str>,
    /// Instruction stream; position == bytecode offset.
    instructions: Box<[Instruction]>,
    /// Constant pool.
    constants: Box<[Constant]>,
    /// Number of local variable slots.
    local_count: u16,
}

impl BytecodeProgram {
    /// Create a program from raw parts.
    pub fn new(instructions: Vec<Instruction>, constants: Vec<Constant>) -> Self {
        let local_count = instructions
            .iter()
            .filter(|i| matches!(i.opcode(), Opcode::LoadLocal | Opcode::StoreLocal))
            .map(|i| i.arg().saturating_add(1))
            .max()
            .unwrap_or(0);
        BytecodeProgram {
            name: Arc::from("<anonymous>"),
            instructions: instructions.into_boxed_slice(),
            constants: constants.into_boxed_slice(),
            local_count: u16::try_from(local_count).unwrap_or(u16::MAX),
        }
    }

    /// An empty program.
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Set the program name.
    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Program name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instruction stream.
    #[inline]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Constant pool.
    #[inline]
    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    /// Constant at `index`, if present.
    #[inline]
    pub fn constant(&self, index: u32) -> Option<&Constant> {
        self.constants.get(index as usize)
    }

    /// Number of local slots referenced by the program.
    #[inline]
    pub fn local_count(&self) -> u16 {
        self.local_count
    }

    /// Number of instructions.
    #[inline]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Check if the program has no instructions.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Positions of backward branches (loop back-edges), in program order.
    pub fn back_edges(&self) -> impl Iterator<Item = u32> + '_ {
        self.instructions
            .iter()
            .enumerate()
            .filter_map(|(pos, instr)| match instr.jump_target() {
                Some(target) if (target as usize) <= pos => Some(pos as u32),
                _ => None,
            })
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Incremental builder for [`BytecodeProgram`].
///
/// Constants passed to [`load_const`](ProgramBuilder::load_const) are
/// appended to the pool as they appear.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    name: Option<Arc<str>>,
    instructions: Vec<Instruction>,
    constants: Vec<Constant>,
}

impl ProgramBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the program name.
    pub fn name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Current position (offset of the next instruction).
    #[inline]
    pub fn position(&self) -> u32 {
        self.instructions.len() as u32
    }

    /// Append a raw instruction.
    pub fn emit(mut self, instr: Instruction) -> Self {
        self.instructions.push(instr);
        self
    }

    /// Append a constant load, adding `value` to the pool.
    pub fn load_const(mut self, value: Constant) -> Self {
        let idx = self.constants.len() as u32;
        self.constants.push(value);
        self.instructions
            .push(Instruction::op_a(Opcode::LoadConst, idx));
        self
    }

    /// Append an integer constant load.
    pub fn load_int(self, value: i64) -> Self {
        self.load_const(Constant::Int(value))
    }

    /// Append a local load.
    pub fn load_local(self, slot: u32) -> Self {
        self.emit(Instruction::op_a(Opcode::LoadLocal, slot))
    }

    /// Append a local store.
    pub fn store_local(self, slot: u32) -> Self {
        self.emit(Instruction::op_a(Opcode::StoreLocal, slot))
    }

    /// Append an operand-less instruction.
    pub fn op(self, opcode: Opcode) -> Self {
        self.emit(Instruction::op(opcode))
    }

    /// Append a jump.
    pub fn jump(self, opcode: Opcode, target: u32) -> Self {
        debug_assert!(opcode.is_branch());
        self.emit(Instruction::op_a(opcode, target))
    }

    /// Finish building.
    pub fn build(self) -> BytecodeProgram {
        let program = BytecodeProgram::new(self.instructions, self.constants);
        match self.name {
            Some(name) => program.with_name(name),
            None => program,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
