//! Low-level IR consumed by the register allocator.
//!
//! A [`LirFunction`] is a list of [`Block`]s in linear-scan order. Every block begins
//! with a [`Opcode::Label`] instruction and its control-flow edges are recorded
//! explicitly on the block. Instruction operands are split into inputs, temps and
//! outputs; before allocation they refer to [`Variable`]s, afterwards every variable
//! has been replaced by a concrete [`Location`].

pub mod builder;
pub mod frame;

pub use builder::LirBuilder;
pub use frame::FrameMap;

use crate::backend::registers::{Register, RegisterClass, RegisterConfig, RegisterSet};
use crate::regalloc::interval::ProgPoint;
use crate::regalloc::operand_pool::OperandPool;
use smallvec::SmallVec;
use std::fmt;

// =============================================================================
// Kinds and Operands
// =============================================================================

/// Value kind of an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    Long,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// Managed reference, tracked by reference maps.
    Object,
    /// Untracked machine word.
    Word,
    /// No kind.
    Illegal,
}

impl Kind {
    /// Whether values of this kind live in floating-point registers.
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Kind::Float | Kind::Double)
    }

    /// Whether values of this kind take two slots on 32-bit targets.
    #[inline]
    pub const fn is_double_word(self) -> bool {
        matches!(self, Kind::Long | Kind::Double)
    }

    /// Whether values of this kind are managed references.
    #[inline]
    pub const fn is_reference(self) -> bool {
        matches!(self, Kind::Object)
    }

    /// Whether this is a real kind.
    #[inline]
    pub const fn is_legal(self) -> bool {
        !matches!(self, Kind::Illegal)
    }

    /// Register file values of this kind are allocated in.
    #[inline]
    pub const fn register_class(self) -> RegisterClass {
        if self.is_float() {
            RegisterClass::Fpu
        } else {
            RegisterClass::Cpu
        }
    }

    const fn type_char(self) -> char {
        match self {
            Kind::Int => 'i',
            Kind::Long => 'l',
            Kind::Float => 'f',
            Kind::Double => 'd',
            Kind::Object => 'a',
            Kind::Word => 'w',
            Kind::Illegal => '-',
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_char())
    }
}

/// A virtual register awaiting allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Variable {
    /// Index in the function's operand pool.
    pub index: u32,
    /// Value kind.
    pub kind: Kind,
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}{}", self.index, self.kind)
    }
}

/// A frame slot, or an incoming argument slot in the caller's frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackSlot {
    /// Slot index.
    pub index: u32,
    /// Kind of the value stored in the slot.
    pub kind: Kind,
    /// Whether the slot belongs to the caller's frame.
    pub in_caller_frame: bool,
}

impl StackSlot {
    /// A slot in the current frame.
    pub const fn new(index: u32, kind: Kind) -> Self {
        StackSlot {
            index,
            kind,
            in_caller_frame: false,
        }
    }

    /// An incoming argument slot.
    pub const fn caller(index: u32, kind: Kind) -> Self {
        StackSlot {
            index,
            kind,
            in_caller_frame: true,
        }
    }
}

impl fmt::Display for StackSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.in_caller_frame {
            write!(f, "in:s{}{}", self.index, self.kind)
        } else {
            write!(f, "s{}{}", self.index, self.kind)
        }
    }
}

/// An immediate value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Constant {
    /// Kind of the constant.
    pub kind: Kind,
    /// Raw bits.
    pub bits: i64,
}

impl Constant {
    /// An `Int` constant.
    pub const fn int(value: i32) -> Self {
        Constant {
            kind: Kind::Int,
            bits: value as i64,
        }
    }

    /// A `Long` constant.
    pub const fn long(value: i64) -> Self {
        Constant {
            kind: Kind::Long,
            bits: value,
        }
    }

    /// A `Double` constant.
    pub fn double(value: f64) -> Self {
        Constant {
            kind: Kind::Double,
            bits: value.to_bits() as i64,
        }
    }

    /// The null reference.
    pub const fn null() -> Self {
        Constant {
            kind: Kind::Object,
            bits: 0,
        }
    }
}

/// An instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// No operand.
    Illegal,
    /// A fixed physical register.
    Register(Register, Kind),
    /// A variable awaiting allocation.
    Variable(Variable),
    /// A stack slot.
    Stack(StackSlot),
    /// An immediate.
    Constant(Constant),
}

impl Operand {
    /// Kind of the operand.
    pub const fn kind(&self) -> Kind {
        match self {
            Operand::Illegal => Kind::Illegal,
            Operand::Register(_, kind) => *kind,
            Operand::Variable(v) => v.kind,
            Operand::Stack(s) => s.kind,
            Operand::Constant(c) => c.kind,
        }
    }

    /// Whether this is a variable.
    #[inline]
    pub const fn is_variable(&self) -> bool {
        matches!(self, Operand::Variable(_))
    }

    /// Whether this is a fixed register.
    #[inline]
    pub const fn is_register(&self) -> bool {
        matches!(self, Operand::Register(..))
    }

    /// Whether this is a variable or a fixed register.
    #[inline]
    pub const fn is_variable_or_register(&self) -> bool {
        matches!(self, Operand::Variable(_) | Operand::Register(..))
    }

    /// Whether this is a stack slot.
    #[inline]
    pub const fn is_stack(&self) -> bool {
        matches!(self, Operand::Stack(_))
    }

    /// Whether this is a constant.
    #[inline]
    pub const fn is_constant(&self) -> bool {
        matches!(self, Operand::Constant(_))
    }

    /// Whether this is a real operand.
    #[inline]
    pub const fn is_legal(&self) -> bool {
        !matches!(self, Operand::Illegal)
    }

    /// The variable, if any.
    pub const fn as_variable(&self) -> Option<Variable> {
        match self {
            Operand::Variable(v) => Some(*v),
            _ => None,
        }
    }

    /// The fixed register, if any.
    pub const fn as_register(&self) -> Option<Register> {
        match self {
            Operand::Register(r, _) => Some(*r),
            _ => None,
        }
    }

    /// The stack slot, if any.
    pub const fn as_stack(&self) -> Option<StackSlot> {
        match self {
            Operand::Stack(s) => Some(*s),
            _ => None,
        }
    }

    /// The concrete location, if this operand is a register or stack slot.
    pub const fn as_location(&self) -> Option<Location> {
        match self {
            Operand::Register(r, _) => Some(Location::Register(*r)),
            Operand::Stack(s) => Some(Location::Stack(*s)),
            _ => None,
        }
    }
}

impl From<Variable> for Operand {
    fn from(v: Variable) -> Self {
        Operand::Variable(v)
    }
}

impl From<StackSlot> for Operand {
    fn from(s: StackSlot) -> Self {
        Operand::Stack(s)
    }
}

impl From<Constant> for Operand {
    fn from(c: Constant) -> Self {
        Operand::Constant(c)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Illegal => write!(f, "-"),
            Operand::Register(r, kind) => write!(f, "{r}{kind}"),
            Operand::Variable(v) => write!(f, "{v}"),
            Operand::Stack(s) => write!(f, "{s}"),
            Operand::Constant(c) => write!(f, "#{}{}", c.bits, c.kind),
        }
    }
}

/// A concrete place assigned to a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    /// A physical register.
    Register(Register),
    /// A stack slot.
    Stack(StackSlot),
}

impl Location {
    /// Whether this is a register.
    #[inline]
    pub const fn is_register(&self) -> bool {
        matches!(self, Location::Register(_))
    }

    /// Whether this is a stack slot.
    #[inline]
    pub const fn is_stack(&self) -> bool {
        matches!(self, Location::Stack(_))
    }

    /// The register, if any.
    pub const fn register(&self) -> Option<Register> {
        match self {
            Location::Register(r) => Some(*r),
            Location::Stack(_) => None,
        }
    }

    /// The stack slot, if any.
    pub const fn stack_slot(&self) -> Option<StackSlot> {
        match self {
            Location::Stack(s) => Some(*s),
            Location::Register(_) => None,
        }
    }

    /// The location as an operand of the given kind.
    pub const fn to_operand(self, kind: Kind) -> Operand {
        match self {
            Location::Register(r) => Operand::Register(r, kind),
            Location::Stack(s) => Operand::Stack(StackSlot { kind, ..s }),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Register(r) => write!(f, "{r}"),
            Location::Stack(s) => write!(f, "{s}"),
        }
    }
}

/// The role of an operand within an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandMode {
    /// Read at the instruction.
    Input,
    /// Clobbered scratch.
    Temp,
    /// Written by the instruction.
    Output,
}

impl OperandMode {
    /// All modes in visiting order.
    pub const ALL: [OperandMode; 3] = [OperandMode::Input, OperandMode::Temp, OperandMode::Output];
}

// =============================================================================
// Debug Info
// =============================================================================

/// Values a deoptimization or safepoint must be able to recover.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameState {
    /// Local variable values.
    pub locals: Vec<Operand>,
    /// Expression stack values.
    pub stack: Vec<Operand>,
    /// Number of held monitors.
    pub locks: u32,
}

impl FrameState {
    /// Every legal value of the state.
    pub fn values(&self) -> impl Iterator<Item = &Operand> + '_ {
        self.locals
            .iter()
            .chain(self.stack.iter())
            .filter(|op| op.is_legal())
    }
}

/// Locations that hold managed references at an instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceMap {
    /// Registers holding references.
    pub registers: RegisterSet,
    /// Frame offsets (bytes) of stack slots holding references.
    pub stack_offsets: Vec<i32>,
}

impl ReferenceMap {
    /// Mark a register.
    pub fn set_register(&mut self, reg: Register) {
        self.registers = self.registers.insert(reg);
    }

    /// Mark a frame offset, keeping offsets sorted and unique.
    pub fn set_stack_offset(&mut self, offset: i32) {
        if let Err(pos) = self.stack_offsets.binary_search(&offset) {
            self.stack_offsets.insert(pos, offset);
        }
    }

    /// Whether a register is marked.
    pub fn has_register(&self, reg: Register) -> bool {
        self.registers.contains(reg)
    }

    /// Whether a frame offset is marked.
    pub fn has_stack_offset(&self, offset: i32) -> bool {
        self.stack_offsets.binary_search(&offset).is_ok()
    }
}

/// Frame state with every value replaced by its location at the instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeDebugInfo {
    /// Local values.
    pub locals: Vec<Operand>,
    /// Expression stack values.
    pub expressions: Vec<Operand>,
    /// Frame offsets of the lock slots.
    pub monitors: Vec<i32>,
}

/// Debug information attached to an instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebugInfo {
    /// Values to recover.
    pub state: FrameState,
    /// Filled by the allocator.
    pub reference_map: Option<ReferenceMap>,
    /// Filled by the allocator when debug info is enabled.
    pub scope: Option<ScopeDebugInfo>,
}

impl DebugInfo {
    /// Debug info for a frame state.
    pub fn new(state: FrameState) -> Self {
        DebugInfo {
            state,
            reference_map: None,
            scope: None,
        }
    }
}

/// An edge from a potentially throwing instruction to an exception handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionEdge {
    /// Handler block.
    pub handler: BlockId,
    /// Which input of the handler's phis flows along this edge.
    pub phi_operand: usize,
    /// Id of the throwing instruction, set by the allocator.
    pub throwing_op: Option<ProgPoint>,
    /// Moves to run before entering the handler, ending with a jump to it.
    pub entry_code: Option<Vec<Instruction>>,
}

// =============================================================================
// Instructions
// =============================================================================

/// Instruction opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Block entry marker.
    Label,
    /// Copy `inputs[0]` to `outputs[0]`.
    Move,
    /// Kind conversion of `inputs[0]` into `outputs[0]`.
    Convert,
    /// Conditional move; `inputs[0]` is the value kept when the condition fails.
    Cmove,
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise xor.
    Xor,
    /// Comparison setting the flags.
    Cmp,
    /// Conditional branch.
    Branch,
    /// Unconditional jump.
    Jump,
    /// Call.
    Call,
    /// Return from the function.
    Return,
    /// Throw an exception.
    Throw,
    /// Safepoint poll.
    Safepoint,
    /// No operation.
    Nop,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::Label => "label",
            Opcode::Move => "move",
            Opcode::Convert => "convert",
            Opcode::Cmove => "cmove",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Cmp => "cmp",
            Opcode::Branch => "branch",
            Opcode::Jump => "jump",
            Opcode::Call => "call",
            Opcode::Return => "return",
            Opcode::Throw => "throw",
            Opcode::Safepoint => "safepoint",
            Opcode::Nop => "nop",
        };
        f.write_str(name)
    }
}

/// A LIR instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Opcode.
    pub opcode: Opcode,
    /// Position assigned by numbering; `None` for moves inserted by the allocator.
    pub id: Option<ProgPoint>,
    /// Operands read.
    pub inputs: SmallVec<[Operand; 4]>,
    /// Scratch operands clobbered.
    pub temps: SmallVec<[Operand; 2]>,
    /// Operands written.
    pub outputs: SmallVec<[Operand; 2]>,
    /// Debug information, if the instruction can deoptimize or is a safepoint.
    pub info: Vec<DebugInfo>,
    /// Exception handler edges.
    pub exception_edges: Vec<ExceptionEdge>,
    /// Branch or jump target.
    pub target: Option<BlockId>,
    /// Whether the instruction destroys caller-saved registers.
    pub has_call: bool,
    /// Whether references live up to and including this instruction must be reported.
    pub patch_point: bool,
}

impl Instruction {
    /// An instruction without operands.
    pub fn new(opcode: Opcode) -> Self {
        Instruction {
            opcode,
            id: None,
            inputs: SmallVec::new(),
            temps: SmallVec::new(),
            outputs: SmallVec::new(),
            info: Vec::new(),
            exception_edges: Vec::new(),
            target: None,
            has_call: false,
            patch_point: false,
        }
    }

    /// Block label.
    pub fn label() -> Self {
        Instruction::new(Opcode::Label)
    }

    /// Copy `from` into `to`.
    pub fn mov(from: Operand, to: Operand) -> Self {
        Instruction::new(Opcode::Move).with_inputs([from]).with_outputs([to])
    }

    /// Unconditional jump.
    pub fn jump(target: BlockId) -> Self {
        Instruction {
            target: Some(target),
            ..Instruction::new(Opcode::Jump)
        }
    }

    /// Add inputs.
    #[must_use]
    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = Operand>) -> Self {
        self.inputs.extend(inputs);
        self
    }

    /// Add temps.
    #[must_use]
    pub fn with_temps(mut self, temps: impl IntoIterator<Item = Operand>) -> Self {
        self.temps.extend(temps);
        self
    }

    /// Add outputs.
    #[must_use]
    pub fn with_outputs(mut self, outputs: impl IntoIterator<Item = Operand>) -> Self {
        self.outputs.extend(outputs);
        self
    }

    /// Attach debug info for a frame state.
    #[must_use]
    pub fn with_state(mut self, state: FrameState) -> Self {
        self.info.push(DebugInfo::new(state));
        self
    }

    /// Mark as destroying caller-saved registers.
    #[must_use]
    pub fn with_call(mut self) -> Self {
        self.has_call = true;
        self
    }

    /// Mark as a patch point.
    #[must_use]
    pub fn with_patch_point(mut self) -> Self {
        self.patch_point = true;
        self
    }

    /// Operands of one mode.
    pub fn operands(&self, mode: OperandMode) -> &[Operand] {
        match mode {
            OperandMode::Input => &self.inputs,
            OperandMode::Temp => &self.temps,
            OperandMode::Output => &self.outputs,
        }
    }

    /// Mutable operands of one mode.
    pub fn operands_mut(&mut self, mode: OperandMode) -> &mut [Operand] {
        match mode {
            OperandMode::Input => &mut self.inputs,
            OperandMode::Temp => &mut self.temps,
            OperandMode::Output => &mut self.outputs,
        }
    }

    /// Whether debug info is attached.
    #[inline]
    pub fn has_info(&self) -> bool {
        !self.info.is_empty()
    }

    /// Whether this is a move.
    #[inline]
    pub fn is_move(&self) -> bool {
        self.opcode == Opcode::Move
    }

    /// Whether this is a jump or branch.
    #[inline]
    pub fn is_branch(&self) -> bool {
        matches!(self.opcode, Opcode::Jump | Opcode::Branch)
    }

    /// Source of a move.
    pub fn move_source(&self) -> Option<Operand> {
        self.is_move().then(|| self.inputs.first().copied()).flatten()
    }

    /// Destination of a move.
    pub fn move_result(&self) -> Option<Operand> {
        self.is_move().then(|| self.outputs.first().copied()).flatten()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{:>4} ", id.raw())?,
            None => write!(f, "   - ")?,
        }
        for (i, out) in self.outputs.iter().enumerate() {
            write!(f, "{}{out}", if i == 0 { "" } else { ", " })?;
        }
        if !self.outputs.is_empty() {
            write!(f, " = ")?;
        }
        write!(f, "{}", self.opcode)?;
        for (i, input) in self.inputs.iter().enumerate() {
            write!(f, "{}{input}", if i == 0 { " " } else { ", " })?;
        }
        if !self.temps.is_empty() {
            write!(f, " [temps:")?;
            for temp in &self.temps {
                write!(f, " {temp}")?;
            }
            write!(f, "]")?;
        }
        if let Some(target) = self.target {
            write!(f, " -> {target}")?;
        }
        Ok(())
    }
}

// =============================================================================
// Blocks and Functions
// =============================================================================

/// Identifier of a block; equal to its index in linear-scan order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    /// Index into [`LirFunction::blocks`].
    #[inline(always)]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// Block properties relevant to allocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockFlags {
    /// Entry of an exception handler.
    pub exception_entry: bool,
    /// Block with the back edge of a loop.
    pub loop_end: bool,
    /// Entry of an on-stack replacement.
    pub osr_entry: bool,
}

/// A phi at the head of an exception handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phi {
    /// Phi result.
    pub result: Variable,
    /// One input per exception edge, selected by [`ExceptionEdge::phi_operand`].
    pub inputs: Vec<Operand>,
}

/// A basic block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Identifier.
    pub id: BlockId,
    /// Instructions; the first is always a label.
    pub instructions: Vec<Instruction>,
    /// Control-flow predecessors.
    pub predecessors: Vec<BlockId>,
    /// Control-flow successors.
    pub successors: Vec<BlockId>,
    /// Handlers reachable from instructions in this block.
    pub exception_handlers: Vec<BlockId>,
    /// Phis of an exception handler.
    pub phis: Vec<Phi>,
    /// Innermost loop containing this block.
    pub loop_index: Option<u32>,
    /// Loop nesting depth.
    pub loop_depth: u32,
    /// Flags.
    pub flags: BlockFlags,
}

impl Block {
    /// An empty block holding only its label.
    pub fn new(id: BlockId) -> Self {
        Block {
            id,
            instructions: vec![Instruction::label()],
            predecessors: Vec::new(),
            successors: Vec::new(),
            exception_handlers: Vec::new(),
            phis: Vec::new(),
            loop_index: None,
            loop_depth: 0,
            flags: BlockFlags::default(),
        }
    }

    /// Whether the last instruction is a jump or branch.
    pub fn ends_with_branch(&self) -> bool {
        self.instructions.last().is_some_and(Instruction::is_branch)
    }
}

/// A function in LIR form.
#[derive(Debug, Clone)]
pub struct LirFunction {
    /// Function name, for diagnostics.
    pub name: String,
    /// Blocks in linear-scan order.
    pub blocks: Vec<Block>,
    /// Operand numbering for registers and variables.
    pub operands: OperandPool,
    /// Frame layout.
    pub frame: FrameMap,
    /// Number of loops.
    pub num_loops: u32,
}

impl LirFunction {
    /// An empty function for a target.
    pub fn new(name: impl Into<String>, registers: &RegisterConfig) -> Self {
        LirFunction {
            name: name.into(),
            blocks: Vec::new(),
            operands: OperandPool::new(registers),
            frame: FrameMap::new(registers.word_size()),
            num_loops: 0,
        }
    }

    /// Block by id.
    #[inline]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    /// Mutable block by id.
    #[inline]
    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    /// Total instruction count.
    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instructions.len()).sum()
    }

    /// Whether any block is an exception handler entry.
    pub fn has_exception_handlers(&self) -> bool {
        self.blocks.iter().any(|b| b.flags.exception_entry)
    }

    /// Iterate all instructions in order.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> + '_ {
        self.blocks.iter().flat_map(|b| b.instructions.iter())
    }

    /// Values the exception edges of `inst` hand to their handlers' phis.
    pub fn handler_phi_inputs<'f>(&'f self, inst: &'f Instruction) -> impl Iterator<Item = Operand> + 'f {
        inst.exception_edges.iter().flat_map(move |edge| {
            self.blocks
                .get(edge.handler.index())
                .into_iter()
                .flat_map(|handler| handler.phis.iter())
                .filter_map(move |phi| phi.inputs.get(edge.phi_operand).copied())
        })
    }
}

impl fmt::Display for LirFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "function {}", self.name)?;
        for block in &self.blocks {
            write!(f, "{}", block.id)?;
            if !block.predecessors.is_empty() {
                write!(f, " <- {:?}", block.predecessors)?;
            }
            if block.loop_depth > 0 {
                write!(f, " (loop depth {})", block.loop_depth)?;
            }
            writeln!(f)?;
            for inst in &block.instructions {
                writeln!(f, "  {inst}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::registers::reference::*;

    #[test]
    fn test_kind_classes() {
        assert!(Kind::Double.is_float());
        assert!(Kind::Double.is_double_word());
        assert_eq!(Kind::Object.register_class(), RegisterClass::Cpu);
        assert_eq!(Kind::Float.register_class(), RegisterClass::Fpu);
    }

    #[test]
    fn test_location_to_operand() {
        let reg = Location::Register(R2).to_operand(Kind::Int);
        assert_eq!(reg, Operand::Register(R2, Kind::Int));
        let slot = Location::Stack(StackSlot::new(3, Kind::Int)).to_operand(Kind::Object);
        assert_eq!(slot.as_stack().map(|s| s.kind), Some(Kind::Object));
    }

    #[test]
    fn test_reference_map_offsets_sorted() {
        let mut map = ReferenceMap::default();
        map.set_stack_offset(16);
        map.set_stack_offset(8);
        map.set_stack_offset(16);
        assert_eq!(map.stack_offsets, vec![8, 16]);
        map.set_register(R1);
        assert!(map.has_register(R1));
    }

    #[test]
    fn test_instruction_display() {
        let v = Variable {
            index: 3,
            kind: Kind::Int,
        };
        let inst = Instruction::mov(Operand::Constant(Constant::int(7)), v.into());
        assert_eq!(inst.to_string(), "   - v3i = move #7i");
    }
}
