//! nsjail policy document generation
//!
//! A [`NsjailPolicy`] is derived from a [`SandboxConfig`] and rendered in the
//! protobuf text format nsjail reads with `--config`. Units follow nsjail's
//! schema, which differs from the config in three places:
//!
//! - `time_limit` is whole seconds: `ceil(timeout_ms / 1000)`.
//! - `rlimit_as` and `rlimit_fsize` are MiB, rounded up and at least 1.
//! - `rlimit_cpu` is CPU seconds. The fractional core count becomes a
//!   per-minute budget, `ceil(cpus * 60)`, so `0.5` cores is 30 seconds.

use crate::config::{NetworkMode, SandboxConfig};
use crate::error::Result;
use crate::execution::InstanceId;
use crate::limits::{ceil_mib, cpu_seconds_per_minute};
use crate::seccomp::SeccompPolicy;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Host directories bound read-only into every jail
pub const SYSTEM_MOUNTS: &[&str] = &[
    "/bin",
    "/sbin",
    "/usr",
    "/lib",
    "/lib64",
    "/lib32",
    "/etc/alternatives",
    "/etc/ld.so.cache",
    "/etc/ssl",
];

/// Device nodes bound writable
const DEVICE_MOUNTS: &[&str] = &["/dev/null", "/dev/zero", "/dev/urandom"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountKind {
    Bind { src: PathBuf },
    Proc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub kind: MountKind,
    pub dst: PathBuf,
    pub rw: bool,

    /// nsjail aborts when a mandatory source is missing
    pub mandatory: bool,
}

impl Mount {
    pub fn bind(src: impl Into<PathBuf>, dst: impl Into<PathBuf>, rw: bool) -> Self {
        Self {
            kind: MountKind::Bind { src: src.into() },
            dst: dst.into(),
            rw,
            mandatory: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.mandatory = false;
        self
    }

    fn render(&self, out: &mut String) {
        out.push_str("mount {\n");
        match &self.kind {
            MountKind::Bind { src } => {
                let _ = writeln!(out, "  src: {}", quote(&src.display().to_string()));
                let _ = writeln!(out, "  dst: {}", quote(&self.dst.display().to_string()));
                out.push_str("  is_bind: true\n");
            }
            MountKind::Proc => {
                let _ = writeln!(out, "  dst: {}", quote(&self.dst.display().to_string()));
                out.push_str("  fstype: \"proc\"\n");
            }
        }
        let _ = writeln!(out, "  rw: {}", self.rw);
        if !self.mandatory {
            out.push_str("  mandatory: false\n");
        }
        out.push_str("}\n");
    }
}

/// Which namespaces the jail unshares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Namespaces {
    pub net: bool,
    pub user: bool,
    pub mount: bool,
    pub pid: bool,
    pub ipc: bool,
    pub uts: bool,
}

impl Namespaces {
    /// Everything on; the network namespace only when networking is off.
    pub fn for_network(mode: NetworkMode) -> Self {
        Self {
            net: mode == NetworkMode::None,
            user: true,
            mount: true,
            pid: true,
            ipc: true,
            uts: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsjailPolicy {
    pub name: String,
    pub hostname: String,
    pub cwd: Option<PathBuf>,
    pub time_limit_secs: u64,
    pub rlimit_as_mib: Option<u64>,
    pub rlimit_cpu_secs: Option<u64>,
    pub rlimit_fsize_mib: u64,
    pub rlimit_nofile: u64,
    pub namespaces: Namespaces,

    /// User to run as inside the jail
    pub uid: Option<String>,

    /// Capabilities kept, `CAP_` prefixed
    pub capabilities: Vec<String>,

    pub mounts: Vec<Mount>,
    pub seccomp: SeccompPolicy,
}

impl NsjailPolicy {
    /// Derive the policy for instance `id`.
    ///
    /// `scratch` is the host directory mounted at `/tmp`, writable only when
    /// the config allows writes.
    pub fn from_config(
        id: InstanceId,
        config: &SandboxConfig,
        scratch: &Path,
        hostname: &str,
        max_open_files: u64,
    ) -> Result<Self> {
        let rw = !config.filesystem.read_only;

        let mut mounts: Vec<Mount> = SYSTEM_MOUNTS
            .iter()
            .map(|dir| Mount::bind(dir, dir, false).optional())
            .collect();
        mounts.extend(
            DEVICE_MOUNTS
                .iter()
                .map(|dev| Mount::bind(dev, dev, true).optional()),
        );
        mounts.push(Mount {
            kind: MountKind::Proc,
            dst: PathBuf::from("/proc"),
            rw: false,
            mandatory: true,
        });
        mounts.push(Mount::bind(scratch, "/tmp", rw));
        mounts.extend(
            config
                .filesystem
                .allowed_paths
                .iter()
                .map(|path| Mount::bind(path, path, rw)),
        );

        Ok(Self {
            name: id.name(),
            hostname: hostname.to_string(),
            cwd: config.filesystem.work_dir.clone(),
            time_limit_secs: config.timeout_ms().div_ceil(1000),
            rlimit_as_mib: config.memory_bytes()?.map(ceil_mib),
            rlimit_cpu_secs: config.cpus.map(cpu_seconds_per_minute),
            rlimit_fsize_mib: ceil_mib(config.max_output_bytes as u64),
            rlimit_nofile: max_open_files,
            namespaces: Namespaces::for_network(config.network.mode),
            uid: config.user.clone(),
            capabilities: config.capability_names(),
            mounts,
            seccomp: SeccompPolicy::default(),
        })
    }

    /// Render in nsjail's protobuf text format.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(4096);

        let _ = writeln!(out, "name: {}", quote(&self.name));
        out.push_str("mode: ONCE\n");
        let _ = writeln!(out, "hostname: {}", quote(&self.hostname));
        if let Some(cwd) = &self.cwd {
            let _ = writeln!(out, "cwd: {}", quote(&cwd.display().to_string()));
        }
        let _ = writeln!(out, "time_limit: {}", self.time_limit_secs);
        out.push_str("log_level: ERROR\n");
        out.push_str("keep_env: false\n");
        out.push('\n');

        if let Some(mib) = self.rlimit_as_mib {
            out.push_str("rlimit_as_type: VALUE\n");
            let _ = writeln!(out, "rlimit_as: {}", mib);
        }
        if let Some(secs) = self.rlimit_cpu_secs {
            out.push_str("rlimit_cpu_type: VALUE\n");
            let _ = writeln!(out, "rlimit_cpu: {}", secs);
        }
        out.push_str("rlimit_fsize_type: VALUE\n");
        let _ = writeln!(out, "rlimit_fsize: {}", self.rlimit_fsize_mib);
        out.push_str("rlimit_nofile_type: VALUE\n");
        let _ = writeln!(out, "rlimit_nofile: {}", self.rlimit_nofile);
        out.push('\n');

        let ns = &self.namespaces;
        let _ = writeln!(out, "clone_newnet: {}", ns.net);
        let _ = writeln!(out, "clone_newuser: {}", ns.user);
        let _ = writeln!(out, "clone_newns: {}", ns.mount);
        let _ = writeln!(out, "clone_newpid: {}", ns.pid);
        let _ = writeln!(out, "clone_newipc: {}", ns.ipc);
        let _ = writeln!(out, "clone_newuts: {}", ns.uts);
        out.push('\n');

        if let Some(uid) = &self.uid {
            let _ = writeln!(
                out,
                "uidmap {{\n  inside_id: {}\n  outside_id: \"\"\n  count: 1\n}}",
                quote(uid)
            );
        }
        out.push_str("keep_caps: false\n");
        for cap in &self.capabilities {
            let _ = writeln!(out, "cap: {}", quote(cap));
        }
        out.push('\n');

        for mount in &self.mounts {
            mount.render(&mut out);
        }
        out.push('\n');

        for line in self.seccomp.kafel_lines() {
            let _ = writeln!(out, "seccomp_string: {}", quote(&line));
        }

        out
    }
}

/// Quote a protobuf text-format string.
fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}
