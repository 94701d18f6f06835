//! CPU type/subtype to architecture name mapping.

use serde::{Serialize, Serializer};
use std::fmt;

const CPU_ARCH_ABI64: u32 = 0x0100_0000;
const CPU_ARCH_ABI64_32: u32 = 0x0200_0000;

/// `cpu_type_t` values recognised by the name table
pub const CPU_TYPE_X86: u32 = 7;
/// 64-bit Intel
pub const CPU_TYPE_X86_64: u32 = CPU_TYPE_X86 | CPU_ARCH_ABI64;
/// 32-bit ARM
pub const CPU_TYPE_ARM: u32 = 12;
/// 64-bit ARM
pub const CPU_TYPE_ARM64: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64;
/// ARM64 with 32-bit pointers (watchOS)
pub const CPU_TYPE_ARM64_32: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64_32;

/// Capability bits carried in the high byte of `cpu_subtype_t`
const CPU_SUBTYPE_MASK: u32 = 0xff00_0000;

/// Architecture of a Mach-O slice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Arch {
    /// Generic 32-bit ARM
    Arm,
    /// ARMv4T
    ArmV4T,
    /// ARMv5TEJ
    ArmV5,
    /// ARMv6
    ArmV6,
    /// ARMv6-M
    ArmV6M,
    /// ARMv7
    ArmV7,
    /// ARMv7F (Cortex A9)
    ArmV7F,
    /// ARMv7S (Swift)
    ArmV7S,
    /// ARMv7K (watchOS)
    ArmV7K,
    /// ARMv7-M
    ArmV7M,
    /// ARMv7E-M
    ArmV7EM,
    /// ARMv8 in 32-bit mode
    ArmV8,
    /// Intel XScale
    XScale,
    /// Generic 64-bit ARM
    Arm64,
    /// ARMv8 64-bit
    Arm64V8,
    /// ARM64 with pointer authentication
    Arm64E,
    /// ARM64 with 32-bit pointers
    Arm64_32,
    /// 32-bit Intel
    I386,
    /// 64-bit Intel
    X86_64,
    /// 64-bit Intel, Haswell and later
    X86_64H,
    /// Any CPU type not in the table
    Unknown,
}

impl Arch {
    /// Resolves an architecture from a Mach-O CPU type and subtype.
    ///
    /// Capability bits in the subtype are ignored. A known CPU type with an
    /// unlisted subtype resolves to that type's generic name; an unknown CPU
    /// type resolves to [`Arch::Unknown`].
    pub fn from_cpu(cpu_type: u32, cpu_subtype: u32) -> Self {
        let subtype = cpu_subtype & !CPU_SUBTYPE_MASK;
        match cpu_type {
            CPU_TYPE_ARM => match subtype {
                5 => Arch::ArmV4T,
                6 => Arch::ArmV6,
                7 => Arch::ArmV5,
                8 => Arch::XScale,
                9 => Arch::ArmV7,
                10 => Arch::ArmV7F,
                11 => Arch::ArmV7S,
                12 => Arch::ArmV7K,
                13 => Arch::ArmV8,
                14 => Arch::ArmV6M,
                15 => Arch::ArmV7M,
                16 => Arch::ArmV7EM,
                _ => Arch::Arm,
            },
            CPU_TYPE_ARM64 => match subtype {
                1 => Arch::Arm64V8,
                2 => Arch::Arm64E,
                _ => Arch::Arm64,
            },
            CPU_TYPE_ARM64_32 => Arch::Arm64_32,
            CPU_TYPE_X86 => Arch::I386,
            CPU_TYPE_X86_64 => match subtype {
                8 => Arch::X86_64H,
                _ => Arch::X86_64,
            },
            _ => Arch::Unknown,
        }
    }

    /// Returns the conventional architecture name, e.g. `arm64` or `armv7s`
    pub fn name(self) -> &'static str {
        match self {
            Arch::Arm => "arm",
            Arch::ArmV4T => "armv4t",
            Arch::ArmV5 => "armv5",
            Arch::ArmV6 => "armv6",
            Arch::ArmV6M => "armv6m",
            Arch::ArmV7 => "armv7",
            Arch::ArmV7F => "armv7f",
            Arch::ArmV7S => "armv7s",
            Arch::ArmV7K => "armv7k",
            Arch::ArmV7M => "armv7m",
            Arch::ArmV7EM => "armv7em",
            Arch::ArmV8 => "armv8",
            Arch::XScale => "xscale",
            Arch::Arm64 => "arm64",
            Arch::Arm64V8 => "arm64v8",
            Arch::Arm64E => "arm64e",
            Arch::Arm64_32 => "arm64_32",
            Arch::I386 => "i386",
            Arch::X86_64 => "x86_64",
            Arch::X86_64H => "x86_64h",
            Arch::Unknown => "unknown",
        }
    }

    /// Returns true when the CPU type was not recognised
    pub fn is_unknown(self) -> bool {
        self == Arch::Unknown
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Arch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}
