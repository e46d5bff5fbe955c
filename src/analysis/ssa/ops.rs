//! SSA operations.
//!
//! [`IrOp`] is a closed tagged union over every opcode the rewriters understand. Each
//! variant carries exactly its operands: in-values as [`ValueId`]s and embedded type,
//! method and field references. The out-value of an instruction is not part of the
//! operation; it is stored on the [`Instruction`](crate::analysis::Instruction).
//!
//! # Operation Categories
//!
//! | Category | Operations |
//! |----------|------------|
//! | Constants | `Argument`, `ConstNumber`, `ConstString`, `ConstClass` |
//! | Types | `InitClass`, `CheckCast`, `InstanceOf`, `NewInstance`, `MoveException` |
//! | Arrays | `NewArrayEmpty`, `NewArrayFilled`, `MultiNewArray`, `ArrayGet`, `ArrayPut`, `ArrayLength` |
//! | Calls | `Invoke` |
//! | Fields | `InstanceGet`, `InstancePut`, `StaticGet`, `StaticPut` |
//! | Values | `Binop`, `Assume` |
//! | Control flow | `If`, `Goto`, `Return`, `Throw` |

use std::{fmt, sync::Arc};

use strum::Display;

use crate::{
    analysis::ssa::{BlockId, ValueId},
    graph::{DexType, FieldRef, InvokeKind, MethodRef},
};

/// Arithmetic and bitwise binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum BinopKind {
    /// `a + b`
    Add,
    /// `a - b`
    Sub,
    /// `a * b`
    Mul,
    /// `a / b`
    Div,
    /// `a % b`
    Rem,
    /// `a & b`
    And,
    /// `a | b`
    Or,
    /// `a ^ b`
    Xor,
    /// `a << b`
    Shl,
    /// `a >> b`
    Shr,
}

impl BinopKind {
    /// Returns `true` if the operator can throw (integer division by zero).
    #[must_use]
    pub const fn may_throw(self) -> bool {
        matches!(self, BinopKind::Div | BinopKind::Rem)
    }
}

/// Comparison of an `if` instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum IfKind {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Greater or equal.
    Ge,
    /// Greater than.
    Gt,
    /// Less or equal.
    Le,
}

/// An SSA operation.
#[derive(Debug, Clone, PartialEq)]
pub enum IrOp {
    /// The `index`-th incoming argument (receiver included).
    Argument {
        /// Argument index.
        index: usize,
    },
    /// A numeric constant. `0` typed `Null` is the `null` constant.
    ConstNumber {
        /// The raw value.
        value: i64,
    },
    /// A string constant.
    ConstString {
        /// The string.
        value: Arc<str>,
    },
    /// The `Class` object of a type.
    ConstClass {
        /// The referenced type.
        ty: DexType,
    },
    /// Triggers class initialization of a type.
    InitClass {
        /// The class to initialize.
        ty: DexType,
    },
    /// Downcast with runtime check.
    CheckCast {
        /// The value to cast.
        value: ValueId,
        /// The target type.
        ty: DexType,
    },
    /// Runtime type test.
    InstanceOf {
        /// The value to test.
        value: ValueId,
        /// The tested type.
        ty: DexType,
    },
    /// Allocation of an uninitialized instance.
    NewInstance {
        /// The instantiated class.
        ty: DexType,
    },
    /// Allocation of an array of default values.
    NewArrayEmpty {
        /// The array type.
        ty: DexType,
        /// Number of elements.
        size: ValueId,
    },
    /// Allocation of an array filled with the given elements.
    NewArrayFilled {
        /// The array type.
        ty: DexType,
        /// The elements, in order.
        elements: Vec<ValueId>,
    },
    /// Allocation of a multi-dimensional array.
    MultiNewArray {
        /// The array type.
        ty: DexType,
        /// Size of each dimension.
        dimensions: Vec<ValueId>,
    },
    /// The exception caught by a handler block.
    MoveException {
        /// The guard type of the handler.
        ty: DexType,
    },
    /// A method call.
    Invoke {
        /// The dispatch kind.
        kind: InvokeKind,
        /// The invoked method.
        method: MethodRef,
        /// In-values, receiver first for instance calls.
        args: Vec<ValueId>,
    },
    /// Read of an instance field.
    InstanceGet {
        /// The object.
        object: ValueId,
        /// The field.
        field: FieldRef,
    },
    /// Write of an instance field.
    InstancePut {
        /// The object.
        object: ValueId,
        /// The stored value.
        value: ValueId,
        /// The field.
        field: FieldRef,
    },
    /// Read of a static field.
    StaticGet {
        /// The field.
        field: FieldRef,
    },
    /// Write of a static field.
    StaticPut {
        /// The stored value.
        value: ValueId,
        /// The field.
        field: FieldRef,
    },
    /// Array element read.
    ArrayGet {
        /// The array.
        array: ValueId,
        /// The index.
        index: ValueId,
    },
    /// Array element write.
    ArrayPut {
        /// The array.
        array: ValueId,
        /// The index.
        index: ValueId,
        /// The stored value.
        value: ValueId,
    },
    /// Array length.
    ArrayLength {
        /// The array.
        array: ValueId,
    },
    /// Binary arithmetic.
    Binop {
        /// The operator.
        kind: BinopKind,
        /// Left operand.
        lhs: ValueId,
        /// Right operand.
        rhs: ValueId,
    },
    /// Conditional branch. Without `rhs` the comparison is against zero (or `null`).
    If {
        /// The comparison.
        kind: IfKind,
        /// Left operand.
        lhs: ValueId,
        /// Right operand, `None` for a zero test.
        rhs: Option<ValueId>,
        /// Target when the comparison holds.
        then_target: BlockId,
        /// Target otherwise.
        else_target: BlockId,
    },
    /// Unconditional branch.
    Goto {
        /// The target block.
        target: BlockId,
    },
    /// Method return.
    Return {
        /// The returned value, `None` for `void`.
        value: Option<ValueId>,
    },
    /// Throws an exception.
    Throw {
        /// The thrown value.
        value: ValueId,
    },
    /// An assumption about a value (non-null after a dominating check). The out-value is
    /// an alias of `value` with refined type.
    Assume {
        /// The assumed value.
        value: ValueId,
    },
}

impl IrOp {
    /// Returns the in-values of this operation, in operand order.
    #[must_use]
    pub fn uses(&self) -> Vec<ValueId> {
        match self {
            IrOp::Argument { .. }
            | IrOp::ConstNumber { .. }
            | IrOp::ConstString { .. }
            | IrOp::ConstClass { .. }
            | IrOp::InitClass { .. }
            | IrOp::NewInstance { .. }
            | IrOp::MoveException { .. }
            | IrOp::StaticGet { .. }
            | IrOp::Goto { .. } => Vec::new(),
            IrOp::CheckCast { value, .. }
            | IrOp::InstanceOf { value, .. }
            | IrOp::StaticPut { value, .. }
            | IrOp::Throw { value }
            | IrOp::Assume { value } => vec![*value],
            IrOp::NewArrayEmpty { size, .. } => vec![*size],
            IrOp::NewArrayFilled { elements: values, .. }
            | IrOp::MultiNewArray { dimensions: values, .. }
            | IrOp::Invoke { args: values, .. } => values.clone(),
            IrOp::InstanceGet { object, .. } => vec![*object],
            IrOp::InstancePut { object, value, .. } => vec![*object, *value],
            IrOp::ArrayGet { array, index } => vec![*array, *index],
            IrOp::ArrayPut { array, index, value } => vec![*array, *index, *value],
            IrOp::ArrayLength { array } => vec![*array],
            IrOp::Binop { lhs, rhs, .. } => vec![*lhs, *rhs],
            IrOp::If { lhs, rhs, .. } => {
                let mut uses = vec![*lhs];
                uses.extend(rhs.iter().copied());
                uses
            }
            IrOp::Return { value } => value.iter().copied().collect(),
        }
    }

    /// Replaces every use of `old` by `new`.
    pub fn replace_use(&mut self, old: ValueId, new: ValueId) {
        let swap = |v: &mut ValueId| {
            if *v == old {
                *v = new;
            }
        };
        match self {
            IrOp::Argument { .. }
            | IrOp::ConstNumber { .. }
            | IrOp::ConstString { .. }
            | IrOp::ConstClass { .. }
            | IrOp::InitClass { .. }
            | IrOp::NewInstance { .. }
            | IrOp::MoveException { .. }
            | IrOp::StaticGet { .. }
            | IrOp::Goto { .. } => {}
            IrOp::CheckCast { value, .. }
            | IrOp::InstanceOf { value, .. }
            | IrOp::StaticPut { value, .. }
            | IrOp::Throw { value }
            | IrOp::Assume { value } => swap(value),
            IrOp::NewArrayEmpty { size, .. } => swap(size),
            IrOp::NewArrayFilled { elements: values, .. }
            | IrOp::MultiNewArray { dimensions: values, .. }
            | IrOp::Invoke { args: values, .. } => values.iter_mut().for_each(swap),
            IrOp::InstanceGet { object, .. } => swap(object),
            IrOp::InstancePut { object, value, .. } => {
                swap(object);
                swap(value);
            }
            IrOp::ArrayGet { array, index } => {
                swap(array);
                swap(index);
            }
            IrOp::ArrayPut { array, index, value } => {
                swap(array);
                swap(index);
                swap(value);
            }
            IrOp::ArrayLength { array } => swap(array),
            IrOp::Binop { lhs, rhs, .. } => {
                swap(lhs);
                swap(rhs);
            }
            IrOp::If { lhs, rhs, .. } => {
                swap(lhs);
                if let Some(rhs) = rhs {
                    swap(rhs);
                }
            }
            IrOp::Return { value } => {
                if let Some(value) = value {
                    swap(value);
                }
            }
        }
    }

    /// Returns the normal-flow successor blocks of a terminator.
    #[must_use]
    pub fn targets(&self) -> Vec<BlockId> {
        match self {
            IrOp::If {
                then_target,
                else_target,
                ..
            } => {
                if then_target == else_target {
                    vec![*then_target]
                } else {
                    vec![*then_target, *else_target]
                }
            }
            IrOp::Goto { target } => vec![*target],
            _ => Vec::new(),
        }
    }

    /// Rewrites the normal-flow successor `old` of a terminator to `new`.
    pub fn replace_target(&mut self, old: BlockId, new: BlockId) {
        match self {
            IrOp::If {
                then_target,
                else_target,
                ..
            } => {
                if *then_target == old {
                    *then_target = new;
                }
                if *else_target == old {
                    *else_target = new;
                }
            }
            IrOp::Goto { target } if *target == old => *target = new,
            _ => {}
        }
    }

    /// Returns `true` if this operation ends a basic block.
    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        matches!(
            self,
            IrOp::If { .. } | IrOp::Goto { .. } | IrOp::Return { .. } | IrOp::Throw { .. }
        )
    }

    /// Returns `true` if the operation may throw at runtime.
    ///
    /// Within a block guarded by catch handlers, at most one instruction may throw.
    #[must_use]
    pub fn may_throw(&self) -> bool {
        match self {
            IrOp::Argument { .. }
            | IrOp::ConstNumber { .. }
            | IrOp::ConstString { .. }
            | IrOp::MoveException { .. }
            | IrOp::Assume { .. }
            | IrOp::If { .. }
            | IrOp::Goto { .. }
            | IrOp::Return { .. } => false,
            IrOp::Binop { kind, .. } => kind.may_throw(),
            _ => true,
        }
    }

    /// Returns `true` for invokes.
    #[must_use]
    pub const fn is_invoke(&self) -> bool {
        matches!(self, IrOp::Invoke { .. })
    }

    /// Returns `true` for field writes.
    #[must_use]
    pub const fn is_field_put(&self) -> bool {
        matches!(self, IrOp::InstancePut { .. } | IrOp::StaticPut { .. })
    }

    /// Returns `true` for the `null` / zero constant.
    #[must_use]
    pub const fn is_zero_const(&self) -> bool {
        matches!(self, IrOp::ConstNumber { value: 0 })
    }

    /// Returns the type embedded by type-carrying operations.
    #[must_use]
    pub fn embedded_type(&self) -> Option<&DexType> {
        match self {
            IrOp::ConstClass { ty }
            | IrOp::InitClass { ty }
            | IrOp::CheckCast { ty, .. }
            | IrOp::InstanceOf { ty, .. }
            | IrOp::NewInstance { ty }
            | IrOp::NewArrayEmpty { ty, .. }
            | IrOp::NewArrayFilled { ty, .. }
            | IrOp::MultiNewArray { ty, .. }
            | IrOp::MoveException { ty } => Some(ty),
            _ => None,
        }
    }

    /// Returns the embedded type for in-place substitution.
    pub fn embedded_type_mut(&mut self) -> Option<&mut DexType> {
        match self {
            IrOp::ConstClass { ty }
            | IrOp::InitClass { ty }
            | IrOp::CheckCast { ty, .. }
            | IrOp::InstanceOf { ty, .. }
            | IrOp::NewInstance { ty }
            | IrOp::NewArrayEmpty { ty, .. }
            | IrOp::NewArrayFilled { ty, .. }
            | IrOp::MultiNewArray { ty, .. }
            | IrOp::MoveException { ty } => Some(ty),
            _ => None,
        }
    }

    /// Returns the embedded field reference of field instructions.
    #[must_use]
    pub fn field(&self) -> Option<&FieldRef> {
        match self {
            IrOp::InstanceGet { field, .. }
            | IrOp::InstancePut { field, .. }
            | IrOp::StaticGet { field }
            | IrOp::StaticPut { field, .. } => Some(field),
            _ => None,
        }
    }

    /// Returns the invoked method of invokes.
    #[must_use]
    pub fn invoked_method(&self) -> Option<&MethodRef> {
        match self {
            IrOp::Invoke { method, .. } => Some(method),
            _ => None,
        }
    }

    /// Returns the opcode mnemonic.
    #[must_use]
    pub fn mnemonic(&self) -> String {
        match self {
            IrOp::Argument { .. } => "argument".into(),
            IrOp::ConstNumber { .. } => "const".into(),
            IrOp::ConstString { .. } => "const-string".into(),
            IrOp::ConstClass { .. } => "const-class".into(),
            IrOp::InitClass { .. } => "init-class".into(),
            IrOp::CheckCast { .. } => "check-cast".into(),
            IrOp::InstanceOf { .. } => "instance-of".into(),
            IrOp::NewInstance { .. } => "new-instance".into(),
            IrOp::NewArrayEmpty { .. } => "new-array".into(),
            IrOp::NewArrayFilled { .. } => "filled-new-array".into(),
            IrOp::MultiNewArray { .. } => "multi-new-array".into(),
            IrOp::MoveException { .. } => "move-exception".into(),
            IrOp::Invoke { kind, .. } => format!("invoke-{kind}"),
            IrOp::InstanceGet { .. } => "iget".into(),
            IrOp::InstancePut { .. } => "iput".into(),
            IrOp::StaticGet { .. } => "sget".into(),
            IrOp::StaticPut { .. } => "sput".into(),
            IrOp::ArrayGet { .. } => "aget".into(),
            IrOp::ArrayPut { .. } => "aput".into(),
            IrOp::ArrayLength { .. } => "array-length".into(),
            IrOp::Binop { kind, .. } => kind.to_string(),
            IrOp::If { kind, rhs, .. } => {
                if rhs.is_some() {
                    format!("if-{kind}")
                } else {
                    format!("if-{kind}z")
                }
            }
            IrOp::Goto { .. } => "goto".into(),
            IrOp::Return { .. } => "return".into(),
            IrOp::Throw { .. } => "throw".into(),
            IrOp::Assume { .. } => "assume".into(),
        }
    }
}

impl fmt::Display for IrOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())?;
        match self {
            IrOp::Argument { index } => write!(f, " #{index}")?,
            IrOp::ConstNumber { value } => write!(f, " {value}")?,
            IrOp::ConstString { value } => write!(f, " \"{value}\"")?,
            IrOp::Invoke { method, .. } => write!(f, " {method}")?,
            IrOp::If {
                then_target,
                else_target,
                ..
            } => write!(f, " -> {then_target} else {else_target}")?,
            IrOp::Goto { target } => write!(f, " {target}")?,
            other => {
                if let Some(ty) = other.embedded_type() {
                    write!(f, " {ty}")?;
                } else if let Some(field) = other.field() {
                    write!(f, " {field}")?;
                }
            }
        }
        let uses = self.uses();
        if !uses.is_empty() {
            let rendered: Vec<String> = uses.iter().map(ToString::to_string).collect();
            write!(f, " ({})", rendered.join(", "))?;
        }
        Ok(())
    }
}
