//! Seccomp allow-list rendered as a Kafel policy

use std::collections::BTreeSet;

/// Process startup: exec, dynamic loading, thread and TLS setup
const STARTUP: &[&str] = &[
    "execve",
    "execveat",
    "brk",
    "set_tid_address",
    "set_robust_list",
    "rseq",
    "prlimit64",
    "getrandom",
    "uname",
    "prctl",
    "sysinfo",
    "capget",
];

const MEMORY: &[&str] = &["mmap", "munmap", "mprotect", "mremap", "madvise", "msync"];

const IO: &[&str] = &[
    "read",
    "write",
    "readv",
    "writev",
    "pread64",
    "pwrite64",
    "openat",
    "close",
    "close_range",
    "lseek",
    "fstat",
    "newfstatat",
    "statx",
    "statfs",
    "fstatfs",
    "faccessat",
    "readlinkat",
    "getdents64",
    "getcwd",
    "chdir",
    "fchdir",
    "fcntl",
    "ioctl",
    "dup",
    "dup3",
    "pipe2",
    "ftruncate",
    "fsync",
    "fdatasync",
    "mkdirat",
    "unlinkat",
    "fchmod",
    "fchmodat",
    "umask",
    "ppoll",
    "pselect6",
    "epoll_create1",
    "epoll_ctl",
    "epoll_pwait",
    "eventfd2",
];

const SIGNALS: &[&str] = &[
    "rt_sigaction",
    "rt_sigprocmask",
    "rt_sigreturn",
    "rt_sigsuspend",
    "sigaltstack",
    "kill",
    "tgkill",
    "tkill",
];

const PROCESS: &[&str] = &[
    "clone",
    "clone3",
    "wait4",
    "waitid",
    "exit",
    "exit_group",
    "getpid",
    "getppid",
    "gettid",
    "getpgid",
    "setpgid",
    "getsid",
    "setsid",
    "getuid",
    "geteuid",
    "getgid",
    "getegid",
    "getgroups",
    "getresuid",
    "getresgid",
    "getrusage",
    "times",
    "futex",
    "sched_yield",
    "sched_getaffinity",
    "nanosleep",
    "clock_nanosleep",
    "clock_gettime",
    "clock_getres",
    "gettimeofday",
];

const SOCKETS: &[&str] = &[
    "socket",
    "socketpair",
    "connect",
    "bind",
    "listen",
    "accept",
    "accept4",
    "sendto",
    "recvfrom",
    "sendmsg",
    "recvmsg",
    "shutdown",
    "getsockname",
    "getpeername",
    "setsockopt",
    "getsockopt",
];

/// Legacy entry points that only exist on x86_64
#[cfg(target_arch = "x86_64")]
const ARCH: &[&str] = &[
    "arch_prctl",
    "open",
    "stat",
    "lstat",
    "access",
    "readlink",
    "getdents",
    "pipe",
    "dup2",
    "poll",
    "select",
    "epoll_wait",
    "fork",
    "vfork",
    "unlink",
    "mkdir",
    "time",
];

#[cfg(not(target_arch = "x86_64"))]
const ARCH: &[&str] = &[];

/// What happens to a syscall not on the list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DefaultAction {
    /// Kill the offending thread
    #[default]
    Kill,
    /// Kill the whole process
    KillProcess,
}

impl DefaultAction {
    fn as_kafel(self) -> &'static str {
        match self {
            DefaultAction::Kill => "KILL",
            DefaultAction::KillProcess => "KILL_PROCESS",
        }
    }
}

/// Explicit syscall allow-list with a default-deny fallback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeccompPolicy {
    allowed: BTreeSet<String>,
    default_action: DefaultAction,
}

impl Default for SeccompPolicy {
    /// Enough for short-lived commands: startup, memory, basic I/O, signals,
    /// process control and sockets.
    fn default() -> Self {
        let allowed = [STARTUP, MEMORY, IO, SIGNALS, PROCESS, SOCKETS, ARCH]
            .into_iter()
            .flatten()
            .map(|name| name.to_string())
            .collect();
        Self {
            allowed,
            default_action: DefaultAction::Kill,
        }
    }
}

impl SeccompPolicy {
    /// A policy that allows nothing.
    pub fn deny_all() -> Self {
        Self {
            allowed: BTreeSet::new(),
            default_action: DefaultAction::Kill,
        }
    }

    pub fn allow(mut self, syscall: impl Into<String>) -> Self {
        self.allowed.insert(syscall.into());
        self
    }

    pub fn with_default_action(mut self, action: DefaultAction) -> Self {
        self.default_action = action;
        self
    }

    pub fn allows(&self, syscall: &str) -> bool {
        self.allowed.contains(syscall)
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    pub fn default_action(&self) -> DefaultAction {
        self.default_action
    }

    /// Kafel source split into lines, each safe to emit as one
    /// `seccomp_string` entry.
    pub fn kafel_lines(&self) -> Vec<String> {
        if self.allowed.is_empty() {
            return vec![format!("DEFAULT {}", self.default_action.as_kafel())];
        }

        let names: Vec<&str> = self.allowed.iter().map(String::as_str).collect();
        let chunks: Vec<&[&str]> = names.chunks(8).collect();

        let mut lines = Vec::with_capacity(chunks.len() + 3);
        lines.push("ALLOW {".to_string());
        for (i, chunk) in chunks.iter().enumerate() {
            let sep = if i + 1 < chunks.len() { "," } else { "" };
            lines.push(format!("  {}{}", chunk.join(", "), sep));
        }
        lines.push("}".to_string());
        lines.push(format!("DEFAULT {}", self.default_action.as_kafel()));
        lines
    }
}
