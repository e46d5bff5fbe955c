//! Method and field references.
//!
//! References name a member by holder, name and signature. They do not imply that a
//! definition exists; resolution against an [`Application`](crate::graph::Application)
//! is a separate step. All reference types are cheap to clone and hash by value.

use std::{fmt, sync::Arc};

use strum::{Display, EnumIter};

use crate::graph::DexType;

/// Name of instance initializers.
pub const INSTANCE_INITIALIZER: &str = "<init>";

/// Name of class initializers.
pub const CLASS_INITIALIZER: &str = "<clinit>";

/// A method prototype: the return type and the declared parameter types.
///
/// The receiver of instance methods is not part of the prototype.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Proto {
    /// The declared return type.
    pub return_type: DexType,
    /// The declared parameter types, in order.
    pub params: Vec<DexType>,
}

impl Proto {
    /// Creates a new prototype.
    #[must_use]
    pub fn new(return_type: DexType, params: Vec<DexType>) -> Self {
        Self {
            return_type,
            params,
        }
    }

    /// Returns the number of declared parameters.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Returns a prototype with every type passed through `f`.
    #[must_use]
    pub fn map_types(&self, mut f: impl FnMut(&DexType) -> DexType) -> Proto {
        Proto {
            return_type: f(&self.return_type),
            params: self.params.iter().map(&mut f).collect(),
        }
    }

    /// Returns `true` if any type of this prototype satisfies `pred`.
    #[must_use]
    pub fn mentions(&self, mut pred: impl FnMut(&DexType) -> bool) -> bool {
        pred(&self.return_type) || self.params.iter().any(pred)
    }
}

impl fmt::Debug for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for param in &self.params {
            write!(f, "{param}")?;
        }
        write!(f, "){}", self.return_type)
    }
}

/// A method reference: holder, name and prototype.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodRef {
    /// The class the reference is qualified with.
    pub holder: DexType,
    /// The simple method name.
    pub name: Arc<str>,
    /// The method prototype.
    pub proto: Proto,
}

impl MethodRef {
    /// Creates a new method reference.
    #[must_use]
    pub fn new(holder: DexType, name: &str, proto: Proto) -> Self {
        Self {
            holder,
            name: Arc::from(name),
            proto,
        }
    }

    /// Returns `true` for `<init>`.
    #[must_use]
    pub fn is_instance_initializer(&self) -> bool {
        &*self.name == INSTANCE_INITIALIZER
    }

    /// Returns `true` for `<clinit>`.
    #[must_use]
    pub fn is_class_initializer(&self) -> bool {
        &*self.name == CLASS_INITIALIZER
    }

    /// Returns `true` for either kind of initializer.
    #[must_use]
    pub fn is_initializer(&self) -> bool {
        self.is_instance_initializer() || self.is_class_initializer()
    }

    /// Returns the number of declared parameters (excluding any receiver).
    #[must_use]
    pub fn arity(&self) -> usize {
        self.proto.arity()
    }

    /// Returns `true` if this reference has the same name and prototype as `other`.
    ///
    /// The holder is ignored, which is how virtual dispatch and direct method lookup
    /// within one class match declarations.
    #[must_use]
    pub fn matches_signature(&self, other: &MethodRef) -> bool {
        self.name == other.name && self.proto == other.proto
    }

    /// Returns a copy of this reference qualified with another holder.
    #[must_use]
    pub fn with_holder(&self, holder: DexType) -> MethodRef {
        MethodRef {
            holder,
            name: self.name.clone(),
            proto: self.proto.clone(),
        }
    }

    /// Returns a copy of this reference with another prototype.
    #[must_use]
    pub fn with_proto(&self, proto: Proto) -> MethodRef {
        MethodRef {
            holder: self.holder.clone(),
            name: self.name.clone(),
            proto,
        }
    }

    /// Renders the reference as `holder.name(params)` using Java source names.
    #[must_use]
    pub fn to_source_string(&self) -> String {
        let params: Vec<String> = self.proto.params.iter().map(DexType::source_name).collect();
        format!(
            "{} {}.{}({})",
            self.proto.return_type.source_name(),
            self.holder.source_name(),
            self.name,
            params.join(", ")
        )
    }
}

impl fmt::Debug for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}{}", self.holder, self.name, self.proto)
    }
}

/// A field reference: holder, name and field type.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldRef {
    /// The class the reference is qualified with.
    pub holder: DexType,
    /// The simple field name.
    pub name: Arc<str>,
    /// The declared field type.
    pub ty: DexType,
}

impl FieldRef {
    /// Creates a new field reference.
    #[must_use]
    pub fn new(holder: DexType, name: &str, ty: DexType) -> Self {
        Self {
            holder,
            name: Arc::from(name),
            ty,
        }
    }

    /// Returns a copy of this reference with another field type.
    #[must_use]
    pub fn with_type(&self, ty: DexType) -> FieldRef {
        FieldRef {
            holder: self.holder.clone(),
            name: self.name.clone(),
            ty,
        }
    }

    /// Returns `true` if this reference has the same name and type as `other`.
    #[must_use]
    pub fn matches_signature(&self, other: &FieldRef) -> bool {
        self.name == other.name && self.ty == other.ty
    }
}

impl fmt::Debug for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}:{}", self.holder, self.name, self.ty)
    }
}

/// The dispatch kind of an invoke instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum InvokeKind {
    /// Non-virtual call of a private method or an instance initializer.
    Direct,
    /// Virtual dispatch on a class receiver.
    Virtual,
    /// Virtual dispatch on an interface receiver.
    Interface,
    /// Static call without receiver.
    Static,
    /// Non-virtual call of a superclass implementation.
    Super,
    /// Signature-polymorphic call (`MethodHandle.invoke`).
    Polymorphic,
}

impl InvokeKind {
    /// Returns `true` if the first in-value of the call is a receiver.
    #[must_use]
    pub const fn has_receiver(self) -> bool {
        !matches!(self, InvokeKind::Static)
    }
}
