//! Register frame encoder
//!
//! Produces the in-memory image of the architecture's saved-register struct so
//! a probe program run against a synthetic context sees the same bytes it
//! would see on a real syscall entry.

use std::mem::{offset_of, size_of};

use bstrace_common::{Arm64Regs, X86_64Regs, MAX_SYSCALL_ARGS};

use crate::domain::{DecodeError, TraceError};

/// Supported register layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    Aarch64,
}

impl Arch {
    /// Layout of the running host
    ///
    /// # Errors
    /// `UnsupportedArchitecture` on anything other than x86-64 or arm64.
    pub fn host() -> Result<Self, TraceError> {
        match std::env::consts::ARCH {
            "x86_64" => Ok(Arch::X86_64),
            "aarch64" => Ok(Arch::Aarch64),
            other => Err(TraceError::UnsupportedArchitecture(other)),
        }
    }

    #[must_use]
    pub const fn layout(self) -> FrameLayout {
        match self {
            Arch::X86_64 => FrameLayout {
                size: size_of::<X86_64Regs>(),
                syscall_nr_offset: offset_of!(X86_64Regs, orig_rax),
                arg_offsets: [
                    offset_of!(X86_64Regs, rdi),
                    offset_of!(X86_64Regs, rsi),
                    offset_of!(X86_64Regs, rdx),
                    offset_of!(X86_64Regs, r10),
                    offset_of!(X86_64Regs, r8),
                    offset_of!(X86_64Regs, r9),
                ],
            },
            Arch::Aarch64 => {
                let x0 = offset_of!(Arm64Regs, regs);
                FrameLayout {
                    size: size_of::<Arm64Regs>(),
                    syscall_nr_offset: x0 + 8 * 8,
                    arg_offsets: [x0, x0 + 8, x0 + 16, x0 + 24, x0 + 32, x0 + 40],
                }
            }
        }
    }
}

/// Byte offsets inside a register frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub size: usize,
    pub syscall_nr_offset: usize,
    pub arg_offsets: [usize; MAX_SYSCALL_ARGS],
}

/// Saved user registers of one syscall
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterFrame {
    X86_64(X86_64Regs),
    Aarch64(Arm64Regs),
}

impl RegisterFrame {
    /// Place `nr` and `args` where the kernel would have saved them.
    ///
    /// Unspecified argument registers and every other field are zero.
    ///
    /// # Errors
    /// `TooManyArguments` when more than six arguments are given.
    pub fn encode(arch: Arch, nr: u64, args: &[u64]) -> Result<Self, TraceError> {
        if args.len() > MAX_SYSCALL_ARGS {
            return Err(TraceError::TooManyArguments(args.len()));
        }

        let frame = match arch {
            Arch::X86_64 => {
                let mut regs = X86_64Regs { orig_rax: nr, ..X86_64Regs::zeroed() };
                for (slot, &value) in [
                    &mut regs.rdi,
                    &mut regs.rsi,
                    &mut regs.rdx,
                    &mut regs.r10,
                    &mut regs.r8,
                    &mut regs.r9,
                ]
                .into_iter()
                .zip(args)
                {
                    *slot = value;
                }
                RegisterFrame::X86_64(regs)
            }
            Arch::Aarch64 => {
                let mut regs = Arm64Regs::zeroed();
                regs.regs[8] = nr;
                regs.regs[..args.len()].copy_from_slice(args);
                RegisterFrame::Aarch64(regs)
            }
        };
        Ok(frame)
    }

    /// Rebuild a frame from its native-endian image
    ///
    /// # Errors
    /// `Truncated` when `bytes` is shorter than the layout.
    pub fn decode(arch: Arch, bytes: &[u8]) -> Result<Self, DecodeError> {
        let need = arch.layout().size;
        if bytes.len() < need {
            return Err(DecodeError::Truncated { len: bytes.len(), need });
        }

        let w: Vec<u64> = bytes[..need].chunks_exact(8).map(ne_u64).collect();
        let frame = match arch {
            Arch::X86_64 => RegisterFrame::X86_64(X86_64Regs {
                r15: w[0],
                r14: w[1],
                r13: w[2],
                r12: w[3],
                rbp: w[4],
                rbx: w[5],
                r11: w[6],
                r10: w[7],
                r9: w[8],
                r8: w[9],
                rax: w[10],
                rcx: w[11],
                rdx: w[12],
                rsi: w[13],
                rdi: w[14],
                orig_rax: w[15],
                rip: w[16],
                cs: w[17],
                eflags: w[18],
                rsp: w[19],
                ss: w[20],
            }),
            Arch::Aarch64 => {
                let mut regs = Arm64Regs::zeroed();
                regs.regs.copy_from_slice(&w[..31]);
                regs.sp = w[31];
                regs.pc = w[32];
                regs.pstate = w[33];
                RegisterFrame::Aarch64(regs)
            }
        };
        Ok(frame)
    }

    #[must_use]
    pub const fn arch(&self) -> Arch {
        match self {
            RegisterFrame::X86_64(_) => Arch::X86_64,
            RegisterFrame::Aarch64(_) => Arch::Aarch64,
        }
    }

    #[must_use]
    pub const fn syscall_nr(&self) -> u64 {
        match self {
            RegisterFrame::X86_64(regs) => regs.syscall_nr(),
            RegisterFrame::Aarch64(regs) => regs.syscall_nr(),
        }
    }

    #[must_use]
    pub fn args(&self) -> [u64; MAX_SYSCALL_ARGS] {
        std::array::from_fn(|n| match self {
            RegisterFrame::X86_64(regs) => regs.arg(n),
            RegisterFrame::Aarch64(regs) => regs.arg(n),
        })
    }

    /// Native-endian image, exactly `layout().size` bytes
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.words().iter().flat_map(|w| w.to_ne_bytes()).collect()
    }

    fn words(&self) -> Vec<u64> {
        match self {
            RegisterFrame::X86_64(r) => vec![
                r.r15, r.r14, r.r13, r.r12, r.rbp, r.rbx, r.r11, r.r10, r.r9, r.r8, r.rax,
                r.rcx, r.rdx, r.rsi, r.rdi, r.orig_rax, r.rip, r.cs, r.eflags, r.rsp, r.ss,
            ],
            RegisterFrame::Aarch64(r) => {
                let mut words = r.regs.to_vec();
                words.extend([r.sp, r.pc, r.pstate]);
                words
            }
        }
    }
}

fn ne_u64(chunk: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(chunk);
    u64::from_ne_bytes(word)
}

/// Register frame with a stable address.
///
/// The probe dereferences [`address`](Self::address) during a synthetic run,
/// so the frame must stay alive (and must not move) for as long as any
/// context built from it is in use. Boxing pins it on the heap.
#[derive(Debug)]
pub struct SyscallContext {
    frame: Box<RegisterFrame>,
}

impl SyscallContext {
    #[must_use]
    pub fn new(frame: RegisterFrame) -> Self {
        Self { frame: Box::new(frame) }
    }

    #[must_use]
    pub fn frame(&self) -> &RegisterFrame {
        &self.frame
    }

    /// Address of the register struct itself
    #[must_use]
    pub fn address(&self) -> u64 {
        let ptr = match &*self.frame {
            RegisterFrame::X86_64(regs) => std::ptr::from_ref(regs).cast::<u8>(),
            RegisterFrame::Aarch64(regs) => std::ptr::from_ref(regs).cast::<u8>(),
        };
        ptr as usize as u64
    }
}

/// Encode a syscall for the host architecture.
///
/// # Errors
/// `UnsupportedArchitecture` or `TooManyArguments`.
pub fn build_syscall_args(nr: u64, args: &[u64]) -> Result<SyscallContext, TraceError> {
    let arch = Arch::host()?;
    Ok(SyscallContext::new(RegisterFrame::encode(arch, nr, args)?))
}
