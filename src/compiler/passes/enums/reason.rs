//! Outcomes of validating one use of an enum candidate.

use strum::{Display, EnumCount, EnumIter};

/// Why an enum cannot be unboxed, or [`Reason::Eligible`] if a use is fine.
///
/// Display renders the `SCREAMING_SNAKE_CASE` name used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, EnumCount)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    /// The use is representable with an `int`.
    Eligible,
    /// A keep rule pins the enum.
    Pinned,
    /// A `check-cast` to the enum.
    DownCast,
    /// The enum has subclasses (constants with bodies).
    Subtypes,
    /// The enum implements an interface.
    Interface,
    /// The enum declares instance fields.
    InstanceField,
    /// The value flows into a parameter of another type.
    GenericInvoke,
    /// A static field other than the constants and `$VALUES`.
    UnexpectedStaticField,
    /// The enum declares virtual methods.
    VirtualMethod,
    /// A direct method other than the constructor, `values()` and `valueOf()`.
    UnexpectedDirectMethod,
    /// The `Class` object of the enum is used.
    ConstClass,
    /// A phi merges the enum with an unrelated value.
    InvalidPhi,
    /// The enum declares no `<init>(String, int)`.
    NoInit,
    /// The constructor may do more than assign fields.
    InvalidInit,
    /// The static initializer may have side effects.
    InvalidClinit,
    /// A call without a single known target.
    InvalidInvoke,
    /// A method other than `clone()` is called on an array of the enum.
    InvalidInvokeOnArray,
    /// The enum is returned from a method declaring a supertype.
    ImplicitUpCastInReturn,
    /// `valueOf(String)` is called.
    ValueOfInvoke,
    /// `values()` is called.
    ValuesInvoke,
    /// `compareTo()` is called.
    CompareToInvoke,
    /// `toString()` is called.
    ToStringInvoke,
    /// `name()` is called.
    NameInvoke,
    /// A library method other than `ordinal()` receives the value.
    UnsupportedLibraryCall,
    /// An analysis summary needed to judge a use is missing.
    MissingInfoMap,
    /// A store into an unresolvable or non-program field.
    InvalidFieldPut,
    /// A store into an array of another type.
    InvalidArrayPut,
    /// A store into a field declared by an enum.
    FieldPutOnEnum,
    /// A store into a field declared with another type.
    TypeMissmatchFieldPut,
    /// A comparison with a value of another type.
    InvalidIfTypes,
    /// `null` is used as the receiver of an instance method of the enum.
    EnumMethodCalledWithNullReceiver,
    /// An `instance-of` test against the enum.
    InstanceOf,
    /// Any other instruction consuming the value.
    OtherUnsupportedInstruction,
}

impl Reason {
    /// Returns `true` for [`Reason::Eligible`].
    #[must_use]
    pub const fn is_eligible(self) -> bool {
        matches!(self, Reason::Eligible)
    }

    /// Returns `true` for the reasons only reported with debug logging enabled.
    ///
    /// Without debug logging these calls are plain [`Reason::UnsupportedLibraryCall`]s.
    #[must_use]
    pub const fn is_debug_only(self) -> bool {
        matches!(self, Reason::CompareToInvoke | Reason::ToStringInvoke | Reason::NameInvoke)
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_display_names() {
        assert_eq!(Reason::Eligible.to_string(), "ELIGIBLE");
        assert_eq!(Reason::ImplicitUpCastInReturn.to_string(), "IMPLICIT_UP_CAST_IN_RETURN");
        assert_eq!(Reason::InvalidClinit.to_string(), "INVALID_CLINIT");
        assert_eq!(Reason::TypeMissmatchFieldPut.to_string(), "TYPE_MISSMATCH_FIELD_PUT");
        assert_eq!(
            Reason::EnumMethodCalledWithNullReceiver.to_string(),
            "ENUM_METHOD_CALLED_WITH_NULL_RECEIVER"
        );
    }

    #[test]
    fn test_only_eligible_is_eligible() {
        assert_eq!(Reason::iter().filter(|r| r.is_eligible()).count(), 1);
        assert_eq!(Reason::COUNT, 33);
        assert_eq!(Reason::iter().filter(|r| r.is_debug_only()).count(), 3);
    }
}
