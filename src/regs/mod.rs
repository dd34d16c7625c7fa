//! Bit-exact CCI-P control/status register layouts
//!
//! Every register is a plain `u64` newtype with mask/shift accessors, so the
//! layout does not depend on compiler bitfield ordering. Feature blocks are
//! fixed arrays of consecutive 64-bit CSRs read from a feature's base offset.

/// Size of one CSR in bytes
pub const CSR_SIZE: usize = 8;

/// Canonical value read from an unmapped or unresponsive region
pub const ALL_ONES: u64 = u64::MAX;

/// Extract `width` bits of `csr` starting at bit `shift`
#[inline]
pub const fn field(csr: u64, shift: u32, width: u32) -> u64 {
    (csr >> shift) & mask(width)
}

/// Replace `width` bits of `csr` starting at bit `shift` with `value`
#[inline]
pub const fn set_field(csr: u64, shift: u32, width: u32, value: u64) -> u64 {
    let m = mask(width);
    (csr & !(m << shift)) | ((value & m) << shift)
}

#[inline]
const fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Declares a 64-bit CSR newtype with a getter and a `with_*` setter per field.
macro_rules! csr_register {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                $field:ident / $setter:ident : $shift:expr, $width:expr;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
        $vis struct $name(pub u64);

        #[allow(dead_code)]
        impl $name {
            /// Raw register value
            #[inline]
            pub const fn csr(&self) -> u64 {
                self.0
            }

            /// Names of the fields with a nonzero value, in declaration order
            pub fn set_fields(&self) -> Vec<&'static str> {
                let mut names = Vec::new();
                $(
                    if self.$field() != 0 {
                        names.push(stringify!($field));
                    }
                )*
                names
            }

            $(
                $(#[$fmeta])*
                #[inline]
                pub const fn $field(&self) -> u64 {
                    $crate::regs::field(self.0, $shift, $width)
                }

                #[inline]
                pub const fn $setter(self, value: u64) -> Self {
                    Self($crate::regs::set_field(self.0, $shift, $width, value))
                }
            )*
        }

        impl From<u64> for $name {
            fn from(csr: u64) -> Self {
                Self(csr)
            }
        }
    };
}

/// A fixed run of consecutive CSRs decoded as one unit
pub trait RegisterBlock: Sized + Copy {
    /// Number of 64-bit CSRs in the block
    const CSR_COUNT: usize;

    /// Decode from `csrs`, which holds at least `CSR_COUNT` entries
    fn from_csrs(csrs: &[u64]) -> Self;

    /// Size of the block in bytes
    fn byte_len() -> usize {
        Self::CSR_COUNT * CSR_SIZE
    }
}

mod dfh;
pub mod fme;
pub mod port;

pub use dfh::{AfuHeader, AfuIdH, AfuIdL, DfhType, Dfh, FeatureId, Guid, NextAfu, Scratchpad};
