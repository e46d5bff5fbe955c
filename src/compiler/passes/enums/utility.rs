//! The synthesized class providing runtime support for unboxed enums.

use crate::{
    analysis::{IrCode, IrCodeBuilder, IrOp},
    graph::{AccessFlags, ClassKind, DexType, EncodedMethod, MethodRef, ProgramClass, Proto},
    Result,
};

/// Binary name of the utility class.
pub const UTILITY_CLASS_NAME: &str = "$EnumUnboxingUtility";

/// A synthesized class together with the bodies of its methods.
#[derive(Debug, Clone)]
pub struct EnumUnboxingUtility {
    /// The class definition, to be added to the program.
    pub class: ProgramClass,
    /// The bodies of the class's methods.
    pub codes: Vec<IrCode>,
}

impl EnumUnboxingUtility {
    /// Returns the type of the utility class.
    #[must_use]
    pub fn utility_type() -> DexType {
        DexType::class(UTILITY_CLASS_NAME)
    }

    /// Returns `ordinal(I)I`, replacing `Enum.ordinal()` on an unboxed value.
    #[must_use]
    pub fn ordinal_method() -> MethodRef {
        MethodRef::new(Self::utility_type(), "ordinal", Proto::new(DexType::int(), vec![DexType::int()]))
    }

    /// Synthesizes the class.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] if a method body cannot be assembled.
    pub fn synthesize() -> Result<Self> {
        let mut class = ProgramClass::new(
            Self::utility_type(),
            ClassKind::Program,
            AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::SYNTHETIC,
            Some(DexType::object()),
        );
        let ordinal = Self::ordinal_method();
        class.methods.push(EncodedMethod::new(
            ordinal.clone(),
            AccessFlags::PUBLIC | AccessFlags::STATIC | AccessFlags::SYNTHETIC,
        ));

        // The value of an unboxed enum is its ordinal.
        let mut builder = IrCodeBuilder::new(ordinal, true)?;
        let entry = builder.entry();
        let argument = builder.arguments().first().copied();
        builder.effect(entry, IrOp::Return { value: argument })?;
        let codes = vec![builder.build()?];

        Ok(Self { class, codes })
    }

    /// Returns the type of the utility class.
    #[must_use]
    pub fn ty(&self) -> &DexType {
        &self.class.ty
    }
}
