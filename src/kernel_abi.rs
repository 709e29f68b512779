use std::fmt::{Display, Formatter, Result};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SupportedArch {
    X86,
    X64,
}

impl SupportedArch {
    /// Accepts both the fuzzer's naming (`amd64`, `386`) and the kernel's (`x86_64`, `i386`).
    pub fn from_name(name: &str) -> Option<SupportedArch> {
        match name {
            "amd64" | "x86_64" | "x64" => Some(SupportedArch::X64),
            "386" | "i386" | "x86" => Some(SupportedArch::X86),
            _ => None,
        }
    }
}

impl Display for SupportedArch {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            SupportedArch::X86 => write!(f, "386"),
            SupportedArch::X64 => write!(f, "amd64"),
        }
    }
}
