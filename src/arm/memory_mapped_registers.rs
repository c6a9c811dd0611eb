//! Helpers for mapping ARMv7-A debug registers onto the word-indexed APB
//! register bank (`debug_base + 4 * index`, see spec.md §6).

#[derive(Debug, thiserror::Error)]
#[error("overflow computing the APB address for register {register} (index {index:#x}) from debug base {debug_base:#x}")]
pub struct RegisterAddressOutOfBounds {
    register: &'static str,
    debug_base: u64,
    index: u64,
}

impl RegisterAddressOutOfBounds {
    pub(crate) fn new(register: &'static str, debug_base: u64, index: u64) -> Self {
        Self {
            register,
            debug_base,
            index,
        }
    }
}

/// A debug register addressed as a word index from the APB debug base.
///
/// Cortex-A debug registers are not memory-mapped in the conventional sense;
/// every access goes through the access port's TAR/DRW pipeline at
/// `debug_base + 4 * REG_INDEX` (see spec.md §4.1, §6).
pub trait ApbIndexedRegister<T>: Clone + From<T> + Into<T> + Sized + std::fmt::Debug {
    /// Word index of this register in the debug register bank.
    const REG_INDEX: u64;
    /// The register's name, for diagnostics.
    const NAME: &'static str;

    /// Resolve the APB register index into a byte address relative to `debug_base`.
    fn apb_address(debug_base: u64) -> Result<u64, RegisterAddressOutOfBounds> {
        debug_base
            .checked_add(4 * Self::REG_INDEX)
            .ok_or(RegisterAddressOutOfBounds {
                register: Self::NAME,
                debug_base,
                index: Self::REG_INDEX,
            })
    }
}

/// Create an [`ApbIndexedRegister`] type with a `bitfield!` mapping for its
/// fields.
///
/// # Example
/// ```ignore
/// memory_mapped_bitfield_register! {
///     pub struct Dbgdscr(u32);
///     34, "DBGDSCR",
///     impl From;
///     pub halted, set_halted: 0;
/// }
/// ```
macro_rules! memory_mapped_bitfield_register {
    ($(#[$outer:meta])* $visibility:vis struct $struct_name:ident($reg_type:ty); $index:expr, $reg_name:expr, impl From; $($rest:tt)*) => {
        $crate::arm::memory_mapped_registers::memory_mapped_bitfield_register!{
            $(#[$outer])* $visibility struct $struct_name($reg_type); $index, $reg_name, $($rest)*
        }

        impl From<$struct_name> for $reg_type {
            fn from(register: $struct_name) -> Self {
                register.0
            }
        }

        impl From<$reg_type> for $struct_name {
            fn from(value: $reg_type) -> Self {
                Self(value)
            }
        }
    };
    ($(#[$outer:meta])* $vis_modifier:vis struct $struct_name:ident($reg_type:ty); $index:expr, $reg_name:expr, $($rest:tt)*) => {
        bitfield::bitfield!{
            $(#[$outer])*
            #[doc = concat!("`bitfield::bitfield!` mapping for `", $reg_name, "`, APB index `", stringify!($index), "`.")]
            #[derive(Copy, Clone)]
            #[allow(clippy::upper_case_acronyms)]
            #[allow(non_camel_case_types)]
            ($vis_modifier) struct $struct_name($reg_type);
            impl Debug;
            $($rest)*
        }

        impl $crate::arm::memory_mapped_registers::ApbIndexedRegister<$reg_type> for $struct_name {
            const REG_INDEX: u64 = $index;
            const NAME: &'static str = $reg_name;
        }
    };
}

pub(crate) use memory_mapped_bitfield_register;
