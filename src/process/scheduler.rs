//! Round-robin preemptive scheduler (component C6): process table, ready queue, context
//! switch points, fork/exec/wait syscall bodies, and timer-tick quantum accounting.
//!
//! Grounded on `original_source/src/kernel/process.c` + `scheduler.c`: a fixed-capacity
//! `process_table[MAX_PROCESSES]` slot array (O(1) lookup/removal by slot) plus a FIFO ready
//! queue holding only `READY` processes (`schedule()`'s "if current is still RUNNING, push it
//! back" guard, `ready_queue_push`/`ready_queue_pop`). The C source gets O(1) arbitrary removal
//! from its ready queue via an intrusive doubly-linked list; the idiomatic Rust equivalent here
//! is to never let a non-READY process enter the queue in the first place, which needs no
//! mid-queue removal at all — a `VecDeque` of slot indices, push_back/pop_front only.

use super::context::Context;
use super::pcb::{new_fd_table, Pcb, ProcessId, ProcessState, DEFAULT_QUANTUM, KERNEL_STACK_SIZE};
use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use lazy_static::lazy_static;
use spin::Mutex;

pub const MAX_PROCESSES: usize = 64;

/// Monotonic timer-tick counter, read by `syscalls::time::sys_sleep` to convert a
/// millisecond duration into a tick deadline (PIT assumed at 100 Hz, i.e. 10ms/tick,
/// matching `original_source/src/kernel/timer.c`'s default divisor).
static TICKS: AtomicU64 = AtomicU64::new(0);

pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

pub struct Scheduler {
    /// Fixed-capacity slot table — every live process (whatever its state) lives in exactly
    /// one slot here, mirroring `process_table[MAX_PROCESSES]`.
    pub process_table: Vec<Option<Pcb>>,
    /// FIFO of slot indices whose occupant is `READY`. Never holds a Blocked/Waiting/Zombie/
    /// Terminated slot — that is the §3/§4.6 invariant this split enforces structurally.
    pub ready_queue: VecDeque<usize>,
    /// Slot index of the currently running process.
    pub current: Option<usize>,
    next_id: u64,
    pub active: bool,
}

impl Scheduler {
    fn new() -> Self {
        let mut process_table = Vec::with_capacity(MAX_PROCESSES);
        for _ in 0..MAX_PROCESSES {
            process_table.push(None);
        }
        Scheduler {
            process_table,
            ready_queue: VecDeque::new(),
            current: None,
            next_id: 1,
            active: false,
        }
    }

    fn process_count(&self) -> usize {
        self.process_table.iter().filter(|s| s.is_some()).count()
    }

    fn find_free_slot(&self) -> Option<usize> {
        self.process_table.iter().position(|s| s.is_none())
    }

    fn slot_of(&self, pid: ProcessId) -> Option<usize> {
        self.process_table
            .iter()
            .position(|s| matches!(s, Some(p) if p.pid == pid))
    }

    fn insert(&mut self, proc: Pcb) -> Option<usize> {
        let slot = self.find_free_slot()?;
        self.process_table[slot] = Some(proc);
        Some(slot)
    }

    /// Flip every `Blocked` slot to `Ready` and enqueue it. Used for broad wakeups (pipe
    /// writes, SIGCONT's general case) where any number of waiters might need releasing.
    fn wake_all_blocked(&mut self) {
        let mut woke = Vec::new();
        for (slot, entry) in self.process_table.iter_mut().enumerate() {
            if let Some(proc) = entry {
                if proc.state == ProcessState::Blocked {
                    proc.state = ProcessState::Ready;
                    woke.push(slot);
                }
            }
        }
        for slot in woke {
            self.ready_queue.push_back(slot);
        }
    }

    /// Flip a single slot from `Blocked`/`Waiting` to `Ready` and enqueue it. Used when a
    /// specific target process is known (SIGCONT's pid, a reaped child's waiting parent).
    fn wake_slot(&mut self, slot: usize) {
        if let Some(proc) = self.process_table[slot].as_mut() {
            if matches!(proc.state, ProcessState::Blocked | ProcessState::Waiting) {
                proc.state = ProcessState::Ready;
                self.ready_queue.push_back(slot);
            }
        }
    }
}

lazy_static! {
    pub static ref SCHEDULER: Mutex<Scheduler> = Mutex::new(Scheduler::new());
}

pub fn init() {
    let mut sched = SCHEDULER.lock();
    let kernel_space = crate::memory::kernel_address_space_pml4();

    let kernel_process = Pcb {
        pid: ProcessId(0),
        parent_pid: None,
        name: String::from("kernel"),
        state: ProcessState::Running,
        exit_status: None,
        children: Vec::new(),
        context: Context::empty(),
        page_table: kernel_space,
        heap_start: 0,
        heap_current: 0,
        heap_max: 0,
        stack_bottom: 0,
        stack_top: 0,
        pages_allocated: 0,
        page_faults: 0,
        kernel_stack: Vec::new().into_boxed_slice(),
        user_allocations: Vec::new(),
        ticks_total: 0,
        ticks_remaining: DEFAULT_QUANTUM,
        priority: 0,
        fd_table: new_fd_table(),
        cwd: String::from("/"),
        pending_signal: None,
    };
    let slot = sched.insert(kernel_process).expect("process table has no free slots at boot");
    sched.current = Some(slot);
    sched.active = true;
    drop(sched);

    crate::log_info!("Scheduler initialized: round-robin, quantum = {} ticks.", DEFAULT_QUANTUM);
}

/// Spawn a kernel-mode helper task sharing the kernel's own address space.
pub fn spawn_kernel_task(entry: fn(), name: &str) -> Result<ProcessId, crate::error::KernelError> {
    let mut sched = SCHEDULER.lock();
    if sched.process_count() >= MAX_PROCESSES {
        return Err(crate::error::KernelError::TableFull);
    }

    let id = ProcessId(sched.next_id);
    sched.next_id += 1;

    let stack = vec![0u8; KERNEL_STACK_SIZE].into_boxed_slice();
    let mut stack_top = stack.as_ptr() as usize + KERNEL_STACK_SIZE;
    stack_top &= !0xF;

    let ctx = Context::new(entry as u64, stack_top as u64);
    let page_table = crate::memory::kernel_address_space_pml4();

    let process = Pcb {
        pid: id,
        parent_pid: None,
        name: String::from(name),
        state: ProcessState::Ready,
        exit_status: None,
        children: Vec::new(),
        context: ctx,
        page_table,
        heap_start: 0,
        heap_current: 0,
        heap_max: 0,
        stack_bottom: 0,
        stack_top: 0,
        pages_allocated: 0,
        page_faults: 0,
        kernel_stack: stack,
        user_allocations: Vec::new(),
        ticks_total: 0,
        ticks_remaining: DEFAULT_QUANTUM,
        priority: 0,
        fd_table: new_fd_table(),
        cwd: String::from("/"),
        pending_signal: None,
    };

    let slot = sched.insert(process).ok_or(crate::error::KernelError::TableFull)?;
    sched.ready_queue.push_back(slot);
    Ok(id)
}

/// Pop the next slot to run. Every slot index in `ready_queue` is, by construction, `READY`,
/// so no skip-and-requeue scan is needed here (contrast the teacher's `next_runnable`, which
/// had to tolerate Blocked entries because its ready queue held every process).
fn next_runnable(sched: &mut Scheduler) -> Option<usize> {
    sched.ready_queue.pop_front()
}

/// Common body of `yield_now`/`try_yield_now` once the scheduler lock is held. Only re-queues
/// `current` when it is still `Running` (§4.6: Blocked/Waiting/Zombie/Terminated processes are
/// never requeued here — their own state-setting logic, or `wake_all_blocked`/SIGCONT, is
/// responsible for putting them back on the ready queue later).
fn do_yield(sched: &mut Scheduler) {
    if !sched.active {
        return;
    }
    let next_slot = match next_runnable(sched) {
        Some(s) => s,
        None => return,
    };
    let current_slot = match sched.current {
        Some(s) => s,
        None => {
            sched.ready_queue.push_front(next_slot);
            return;
        }
    };
    if current_slot == next_slot {
        return;
    }

    let requeue_current = matches!(
        sched.process_table[current_slot].as_ref().map(|p| p.state),
        Some(ProcessState::Running)
    );
    if requeue_current {
        sched.process_table[current_slot].as_mut().unwrap().state = ProcessState::Ready;
    }

    let next = sched.process_table[next_slot].as_mut().unwrap();
    next.state = ProcessState::Running;
    next.ticks_remaining = DEFAULT_QUANTUM;
    let mut next_stack_top = next.kernel_stack.as_ptr() as u64 + KERNEL_STACK_SIZE as u64;
    next_stack_top &= !0xF;
    crate::interrupts::gdt::set_tss_rsp0(next_stack_top);

    sched.current = Some(next_slot);
    if requeue_current {
        sched.ready_queue.push_back(current_slot);
    }

    let current_ctx_ptr =
        &mut sched.process_table[current_slot].as_mut().unwrap().context as *mut Context;
    let next_ctx_ptr =
        &sched.process_table[next_slot].as_ref().unwrap().context as *const Context;

    unsafe {
        let cr3_val = sched.process_table[next_slot].as_ref().unwrap().page_table;
        core::arch::asm!("mov cr3, {0}", in(reg) cr3_val);
    }

    unsafe { super::context::switch_context(current_ctx_ptr, next_ctx_ptr) };
}

/// Cooperative/preemptive yield: park `current` back on the ready queue (if still runnable)
/// and switch to the next runnable task. A no-op if nothing else is runnable.
pub fn yield_now() {
    x86_64::instructions::interrupts::without_interrupts(|| {
        let mut sched = SCHEDULER.lock();
        do_yield(&mut sched);
    });
}

/// Like `yield_now`, but a no-op if the scheduler lock is already held (called from the
/// timer interrupt, which must never deadlock against a kernel critical section).
pub fn try_yield_now() {
    x86_64::instructions::interrupts::without_interrupts(|| {
        let mut sched = match SCHEDULER.try_lock() {
            Some(l) => l,
            None => return,
        };
        do_yield(&mut sched);
    });
}

/// Called on every timer tick (spec §4.6/§5.1): decrement the running task's quantum and
/// preempt it once exhausted.
pub fn tick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
    let expired = {
        let mut sched = SCHEDULER.lock();
        if let Some(current) = sched.current.and_then(|slot| sched.process_table[slot].as_mut()) {
            current.ticks_total += 1;
            if current.ticks_remaining > 0 {
                current.ticks_remaining -= 1;
            }
            current.ticks_remaining == 0
        } else {
            false
        }
    };
    if expired {
        try_yield_now();
    }
}

/// Terminate the current process: free its user memory, close its FDs, leave a Zombie
/// behind for `wait()` to reap, and switch away. Never returns.
pub fn exit_current(exit_code: i64) -> ! {
    x86_64::instructions::interrupts::without_interrupts(|| {
        let mut sched = SCHEDULER.lock();
        let current_slot = sched.current.expect("exit_current called without an active process");

        {
            let finished = sched.process_table[current_slot]
                .as_mut()
                .expect("exit_current: current slot empty");
            finished.state = ProcessState::Zombie;
            finished.exit_status = Some(exit_code);
            finished.user_allocations.clear();
            for slot in finished.fd_table.iter_mut() {
                *slot = None;
            }
        }

        // Release every page frame this process's user half still holds — the PML4 itself
        // stays alive (wait()'s reap path destroys it) since the zombie record is read until
        // then, but there is no reason to keep its mapped pages around.
        let page_table = sched.process_table[current_slot].as_ref().unwrap().page_table;
        crate::memory::paging::AddressSpace::from_pml4(page_table).clear_user_space();

        let parent_pid = sched.process_table[current_slot].as_ref().unwrap().parent_pid;
        if let Some(parent_pid) = parent_pid {
            if let Some(parent_slot) = sched.slot_of(parent_pid) {
                sched.wake_slot(parent_slot);
            }
        }

        let next_slot = match next_runnable(&mut sched) {
            Some(s) => s,
            None => {
                drop(sched);
                loop {
                    x86_64::instructions::hlt();
                }
            }
        };
        {
            let next = sched.process_table[next_slot].as_mut().unwrap();
            next.state = ProcessState::Running;
            next.ticks_remaining = DEFAULT_QUANTUM;
            let mut next_stack_top = next.kernel_stack.as_ptr() as u64 + KERNEL_STACK_SIZE as u64;
            next_stack_top &= !0xF;
            crate::interrupts::gdt::set_tss_rsp0(next_stack_top);
        }
        sched.current = Some(next_slot);

        let next_ctx_ptr = &sched.process_table[next_slot].as_ref().unwrap().context as *const Context;

        unsafe {
            let cr3_val = sched.process_table[next_slot].as_ref().unwrap().page_table;
            core::arch::asm!("mov cr3, {0}", in(reg) cr3_val);
        }

        drop(sched);
        unsafe { super::context::restore_context(next_ctx_ptr) };
    });
    unreachable!("exit_current should never return");
}

/// Snapshot for `ps` (syscall 10, component C17).
pub struct TaskInfo {
    pub pid: u64,
    pub name: String,
    pub state: ProcessState,
    pub ticks_total: u64,
    pub priority: u32,
    pub parent_pid: Option<u64>,
}

pub fn list_tasks() -> Vec<TaskInfo> {
    let sched = SCHEDULER.lock();
    let mut result = Vec::new();
    for entry in sched.process_table.iter() {
        if let Some(proc) = entry {
            result.push(TaskInfo {
                pid: proc.pid.0,
                name: proc.name.clone(),
                state: proc.state,
                ticks_total: proc.ticks_total,
                priority: proc.priority,
                parent_pid: proc.parent_pid.map(|p| p.0),
            });
        }
    }
    result
}

pub fn wake_all_blocked() {
    if let Some(mut sched) = SCHEDULER.try_lock() {
        sched.wake_all_blocked();
    }
}

pub fn current_pid() -> ProcessId {
    let sched = SCHEDULER.lock();
    sched
        .current
        .and_then(|slot| sched.process_table[slot].as_ref())
        .map(|p| p.pid)
        .unwrap_or(ProcessId(0))
}

/// Find a PCB (current or not) by PID and run `f` on it. Used by the signal layer and
/// by FD/memory syscalls that always operate on "the current process".
pub fn with_current<R>(f: impl FnOnce(&mut Pcb) -> R) -> Option<R> {
    let mut sched = SCHEDULER.lock();
    let slot = sched.current?;
    sched.process_table[slot].as_mut().map(f)
}

pub fn with_process<R>(pid: ProcessId, f: impl FnOnce(&mut Pcb) -> R) -> Option<R> {
    let mut sched = SCHEDULER.lock();
    let slot = sched.slot_of(pid)?;
    sched.process_table[slot].as_mut().map(f)
}

/// Wake a specific process blocked/waiting on something external (SIGCONT's pid-targeted
/// case). Returns whether a matching process was found at all (regardless of whether it was
/// actually in a wakeable state).
pub fn wake_process(pid: ProcessId) -> bool {
    let mut sched = SCHEDULER.lock();
    match sched.slot_of(pid) {
        Some(slot) => {
            sched.wake_slot(slot);
            true
        }
        None => false,
    }
}

/// Move a runnable process to `Blocked` (SIGSTOP). If its slot is currently sitting in
/// `ready_queue`, pull it back out first — a Blocked slot must never remain enqueued, or
/// `next_runnable` would hand it the CPU next time around.
pub fn block_process(pid: ProcessId) -> bool {
    let mut sched = SCHEDULER.lock();
    let slot = match sched.slot_of(pid) {
        Some(s) => s,
        None => return false,
    };
    let was_runnable = matches!(
        sched.process_table[slot].as_ref().map(|p| p.is_runnable()),
        Some(true)
    );
    if was_runnable {
        sched.process_table[slot].as_mut().unwrap().state = ProcessState::Blocked;
        sched.ready_queue.retain(|&s| s != slot);
    }
    true
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct TrapFrame {
    pub rcx: u64,
    pub rbx: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

const TRAP_FRAME_SIZE: u64 = core::mem::size_of::<TrapFrame>() as u64;

#[unsafe(naked)]
pub extern "C" fn fork_trampoline() {
    unsafe {
        core::arch::naked_asm!(
            "xor rax, rax",
            "pop rcx",
            "pop rbx",
            "pop rdi",
            "pop rsi",
            "pop rdx",
            "pop rbp",
            "pop r8",
            "pop r9",
            "pop r10",
            "pop r11",
            "pop r12",
            "pop r13",
            "pop r14",
            "pop r15",
            "iretq",
        );
    }
}

/// `fork()` (spec §5.3): deep-copy the caller's address space and duplicate its FD table
/// (bumping `Arc` refcounts — see SPEC_FULL.md §9 on FD refcounting across fork). Returns
/// the child's PID to the parent; the child resumes through `fork_trampoline` with rax = 0.
pub fn fork() -> Result<u64, crate::error::KernelError> {
    let mut sched = SCHEDULER.lock();
    if sched.process_count() >= MAX_PROCESSES {
        return Err(crate::error::KernelError::TableFull);
    }
    let free_slot = sched.find_free_slot().ok_or(crate::error::KernelError::TableFull)?;

    let current_slot = sched.current.ok_or(crate::error::KernelError::NoSuchProcess)?;
    let (parent_pid, parent_name, parent_stack_ptr, parent_fd_table, parent_space) = {
        let current = sched.process_table[current_slot]
            .as_ref()
            .ok_or(crate::error::KernelError::NoSuchProcess)?;
        (
            current.pid,
            current.name.clone(),
            current.kernel_stack.as_ptr(),
            current.fd_table.clone(),
            current.page_table,
        )
    };

    // `parent_space` is the PML4 the forking process actually runs under, which is not
    // necessarily the one currently loaded in CR3 (fork can run from any process's
    // context), so clone from an explicit handle rather than `AddressSpace::current()`.
    let parent_handle = crate::memory::paging::AddressSpace::from_pml4(parent_space);
    let cloned_space = parent_handle.clone_user_space()?;
    let cloned = cloned_space.pml4_phys();
    // Ownership of the new PML4 now lives in the child PCB's `page_table` field; the
    // `AddressSpace` wrapper itself carries no Drop behavior, so no leak occurs here.

    let child_kernel_stack = vec![0u8; KERNEL_STACK_SIZE].into_boxed_slice();
    let mut child_stack_top = child_kernel_stack.as_ptr() as u64 + KERNEL_STACK_SIZE as u64;
    child_stack_top &= !0xF;

    let mut parent_stack_top = parent_stack_ptr as u64 + KERNEL_STACK_SIZE as u64;
    parent_stack_top &= !0xF;

    let trap_frame_ptr = (parent_stack_top - TRAP_FRAME_SIZE) as *const TrapFrame;
    let trap_frame = unsafe { *trap_frame_ptr };
    let child_trap_frame_ptr = (child_stack_top - TRAP_FRAME_SIZE) as *mut TrapFrame;
    unsafe { *child_trap_frame_ptr = trap_frame };

    let mut child_context = Context::empty();
    child_context.rsp = child_stack_top - TRAP_FRAME_SIZE;
    child_context.rip = fork_trampoline as *const () as u64;

    let child_pid = ProcessId(sched.next_id);
    sched.next_id += 1;

    let (heap_start, heap_current, heap_max, stack_bottom, stack_top) = {
        let current = sched.process_table[current_slot].as_ref().unwrap();
        (
            current.heap_start,
            current.heap_current,
            current.heap_max,
            current.stack_bottom,
            current.stack_top,
        )
    };

    let child = Pcb {
        pid: child_pid,
        parent_pid: Some(parent_pid),
        name: alloc::format!("{}_child", parent_name),
        state: ProcessState::Ready,
        exit_status: None,
        children: Vec::new(),
        context: child_context,
        page_table: cloned,
        heap_start,
        heap_current,
        heap_max,
        stack_bottom,
        stack_top,
        pages_allocated: 0,
        page_faults: 0,
        kernel_stack: child_kernel_stack,
        user_allocations: Vec::new(),
        ticks_total: 0,
        ticks_remaining: DEFAULT_QUANTUM,
        priority: 0,
        fd_table: parent_fd_table,
        cwd: sched.process_table[current_slot].as_ref().unwrap().cwd.clone(),
        pending_signal: None,
    };

    sched.process_table[current_slot].as_mut().unwrap().children.push(child_pid);
    sched.process_table[free_slot] = Some(child);
    sched.ready_queue.push_back(free_slot);

    Ok(child_pid.0)
}

/// `wait(pid)` (spec §5.4): block until a matching child becomes a Zombie, then reap it
/// and return its exit status. `pid == -1` (`u64::MAX`) waits for any child. Returns
/// `u64::MAX` if the caller has no matching children at all.
pub fn wait(target_pid: u64) -> u64 {
    loop {
        let mut sched = SCHEDULER.lock();
        let current_slot = sched.current;
        let current_pid = current_slot
            .and_then(|slot| sched.process_table[slot].as_ref())
            .map(|p| p.pid)
            .unwrap_or(ProcessId(0));

        let mut child_found = false;
        let mut reaped_slot = None;
        let mut reaped_pid = ProcessId(0);
        let mut reaped_status: i64 = 0;

        for (slot, entry) in sched.process_table.iter().enumerate() {
            if let Some(proc) = entry {
                if proc.parent_pid == Some(current_pid)
                    && (target_pid == u64::MAX || proc.pid.0 == target_pid)
                {
                    child_found = true;
                    if proc.state == ProcessState::Zombie {
                        reaped_slot = Some(slot);
                        reaped_pid = proc.pid;
                        reaped_status = proc.exit_status.unwrap_or(0);
                        break;
                    }
                }
            }
        }

        if let Some(slot) = reaped_slot {
            let zombie = sched.process_table[slot].take().unwrap();
            // The zombie's user pages were already released at exit() time
            // (`exit_current` calls `clear_user_space` eagerly); the PML4 frame itself
            // outlives that because `wait()` still needs the PCB until this reap, so it is
            // only now safe to free — matching `original_source`'s `process_destroy`/
            // `free_process_struct`, which call `vmm_destroy_address_space` at reap time.
            crate::memory::paging::AddressSpace::from_pml4(zombie.page_table).destroy();

            if let Some(current_slot) = current_slot {
                if let Some(current) = sched.process_table[current_slot].as_mut() {
                    current.children.retain(|&c| c != reaped_pid);
                }
            }
            return reaped_status as u64;
        }

        if !child_found {
            return u64::MAX;
        }

        if let Some(current_slot) = current_slot {
            if let Some(current) = sched.process_table[current_slot].as_mut() {
                current.state = ProcessState::Waiting;
            }
        }
        drop(sched);

        x86_64::instructions::interrupts::enable();
        x86_64::instructions::hlt();
        yield_now();
    }
}

/// `execve(path)` (spec §5.5): replace the current process's image in place. On success this
/// never returns to the caller — it jumps straight into the loaded program via the usermode
/// trampoline. Only returns (with an error) if the load itself failed, before anything in the
/// current process was torn down.
pub fn exec(path: &str) -> Result<(), crate::loader::elf::ExecError> {
    let owned_path = String::from(path);
    let params = crate::loader::elf::load(&owned_path)?;

    x86_64::instructions::interrupts::without_interrupts(|| {
        let mut sched = SCHEDULER.lock();
        let current_slot = sched.current.expect("exec called without an active process");
        let current = sched.process_table[current_slot]
            .as_mut()
            .expect("exec called without an active process");

        let mut old_space = crate::memory::paging::AddressSpace::from_pml4(current.page_table);
        old_space.clear_user_space();
        old_space.destroy();

        current.page_table = params.pml4_phys;
        current.user_allocations = params.allocations;
        current.heap_start = params.heap_start;
        current.heap_current = params.heap_start;
        current.heap_max = params.heap_start + crate::memory::paging::USER_HEAP_START;
        current.stack_bottom = crate::memory::paging::USER_STACK_TOP - crate::memory::paging::USER_STACK_SIZE;
        current.stack_top = crate::memory::paging::USER_STACK_TOP;
        current.name = owned_path;

        let mut kernel_stack_top = current.kernel_stack.as_ptr() as u64 + KERNEL_STACK_SIZE as u64;
        kernel_stack_top &= !0xF;

        crate::loader::elf::set_pending_launch(params.entry, params.user_stack_top);
        current.context = Context::new(
            crate::loader::elf::usermode_trampoline as *const () as u64,
            kernel_stack_top,
        );

        crate::interrupts::gdt::set_tss_rsp0(kernel_stack_top);

        unsafe {
            let cr3_val = current.page_table;
            core::arch::asm!("mov cr3, {0}", in(reg) cr3_val);
        }

        let next_ctx_ptr = &current.context as *const Context;
        drop(sched);
        unsafe { super::context::restore_context(next_ctx_ptr) };
    });

    unreachable!("exec should never return on success");
}
