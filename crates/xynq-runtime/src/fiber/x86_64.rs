//! x86_64 context switching.
//!
//! Voluntary switches happen at call boundaries, so only the System V
//! callee-saved set needs saving: rsp, rip, rbx, rbp, r12–r15.

use std::arch::naked_asm;

/// Saved register set. Field order is the asm offset table below — do not
/// reorder.
#[repr(C)]
pub struct SavedRegs {
    pub rsp: u64, // 0x00
    pub rip: u64, // 0x08
    pub rbx: u64, // 0x10
    pub rbp: u64, // 0x18
    pub r12: u64, // 0x20
    pub r13: u64, // 0x28
    pub r14: u64, // 0x30
    pub r15: u64, // 0x38
}

impl SavedRegs {
    pub const fn zeroed() -> Self {
        Self {
            rsp: 0,
            rip: 0,
            rbx: 0,
            rbp: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
        }
    }
}

/// Set up a fresh context so that switching to it runs `entry(arg)` on the
/// given stack.
///
/// # Safety
///
/// `regs` must point to writable `SavedRegs`; `stack_top` must be the top
/// of a live stack region.
pub unsafe fn init_context(regs: *mut SavedRegs, stack_top: *mut u8, entry: usize, arg: usize) {
    // 16-byte alignment per the System V ABI, minus 8 so the trampoline's
    // `call` leaves the callee correctly aligned.
    let aligned_sp = ((stack_top as usize) & !0xF) - 8;

    let regs = &mut *regs;
    regs.rsp = aligned_sp as u64;
    regs.rip = fiber_entry_trampoline as usize as u64;
    regs.rbx = 0;
    regs.rbp = 0;
    regs.r12 = entry as u64; // entry function
    regs.r13 = arg as u64; // entry argument
    regs.r14 = 0;
    regs.r15 = 0;
}

/// Trampoline: move the argument into place and call the entry function.
/// The entry never returns (it switches out instead); trap if it does.
#[unsafe(naked)]
unsafe extern "C" fn fiber_entry_trampoline() {
    naked_asm!("mov rdi, r13", "call r12", "ud2",);
}

/// Save the callee-saved registers into `old` and load `new`.
///
/// When some later switch restores `old`, execution resumes at the local
/// label below, which returns to this function's caller on the restored
/// stack.
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(_old: *mut SavedRegs, _new: *const SavedRegs) {
    naked_asm!(
        // Save into old (RDI).
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 1f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        // Load from new (RSI).
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "jmp rax",
        // Resume point for the saved context.
        "1:",
        "ret",
    );
}
